// SPDX-License-Identifier: Apache-2.0

//! The `Operation` trait: an inert, restartable recipe for a value. Built
//! around an owned, cheaply-cloneable [`crate::frame::Frame`] handle so
//! that an operation closure is always `'static` and can be boxed, sent
//! to `tokio::spawn`, and driven by [`crate::frame::evaluate`] without any
//! lifetime gymnastics.

use std::{future::Future, pin::Pin};

use crate::{error::Error, frame::Frame};

/// A boxed, owned future yielding an operation's result.
pub type BoxOperation<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// Something that can be run, once, inside a frame to produce a `T`.
///
/// Operations are values: constructing one does nothing by itself, and
/// nothing about running it mutates shared state outside the frame it is
/// given. Most callers never implement this directly — any
/// `FnOnce(Frame) -> Fut` closure already qualifies via the blanket
/// impl below.
pub trait Operation<T>: Send + 'static {
    /// Drives this operation to completion inside `frame`.
    fn run(self, frame: Frame) -> BoxOperation<'static, T>;
}

impl<T, F, Fut> Operation<T> for F
where
    F: FnOnce(Frame) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    fn run(self, frame: Frame) -> BoxOperation<'static, T> {
        Box::pin(self(frame))
    }
}

/// A type-erased operation: the concrete closure/state-machine type an
/// operation started out as is gone, leaving only "give me a frame, I'll
/// give you a future". Needed wherever callers compose a *list* of
/// operations of the same `T` but different shapes — `all`/`race` take
/// `Vec<O: Operation<T>>`, and every element of a `Vec` must share one
/// concrete type. [`boxed`] is how callers get there.
pub struct Boxed<T>(Box<dyn FnOnce(Frame) -> BoxOperation<'static, T> + Send>);

impl<T: Send + 'static> Operation<T> for Boxed<T> {
    fn run(self, frame: Frame) -> BoxOperation<'static, T> {
        (self.0)(frame)
    }
}

/// Erases `op`'s concrete type so it can share a `Vec` with differently
/// shaped operations producing the same `T` (e.g. as branches of
/// [`crate::all`] or [`crate::race`]).
pub fn boxed<T, O>(op: O) -> Boxed<T>
where
    T: Send + 'static,
    O: Operation<T>,
{
    Boxed(Box::new(move |frame| op.run(frame)))
}
