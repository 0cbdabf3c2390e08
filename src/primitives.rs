// SPDX-License-Identifier: Apache-2.0

//! `action` and `resource`: the two primitives that let
//! host code — or plain Rust logic not itself written as an `Operation`
//! — reach into the frame tree. `suspend`, `ensure`, and `spawn` are
//! plain [`crate::frame::Frame`] methods and live there instead, since
//! they need no bridging machinery of their own.
//!
//! Modeled on an `Addr::ask`/oneshot-reply pattern, generalized from
//! "send a message to an actor and await one reply" to "run a child
//! frame and await the value it hands back through an escape hatch".

use std::future::Future;

use tokio::sync::oneshot;

use crate::{error::Error, frame::Frame, task::Outcome};

/// The escape hatch a [`resource`] or [`action`] body calls exactly once
/// to hand a value back to its waiter.
pub struct Resolver<T> {
    tx: oneshot::Sender<Result<T, Error>>,
}

impl<T> Resolver<T> {
    /// Resolves with a value.
    pub fn resolve(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    /// Rejects with an error.
    pub fn reject(self, error: Error) {
        let _ = self.tx.send(Err(error));
    }
}

/// The escape hatch a [`resource`] body calls exactly once, after setup,
/// to publish its handle. Unlike [`Resolver`], this does not end the
/// child frame: the frame stays alive, parked, for as long as the
/// resource's own scope does.
pub struct Provider<T> {
    tx: Option<oneshot::Sender<T>>,
}

impl<T> Provider<T> {
    /// Publishes `value` to the waiter, then parks this frame until it is
    /// halted — i.e. until the scope that asked for this resource ends.
    pub async fn provide(mut self, frame: &Frame, value: T) -> Result<std::convert::Infallible, Error> {
        let tx = self.tx.take().expect("Provider::provide called more than once");
        let _ = tx.send(value);
        frame.suspend().await
    }
}

/// Bridges a single-shot, callback-style future into the frame tree
/// (`Action`): begins a child frame running `body(frame,
/// resolver)`, and resolves with whatever the body hands back through
/// its [`Resolver`], *after* that child frame's teardown has finished.
/// The body gets its own [`Frame`], exactly like [`resource`]'s body, so
/// it can register `ensure` cleanup or nest further operations before
/// resolving.
///
/// If the body's frame halts or errors before resolving, `action`
/// rejects with that same cause instead.
pub async fn action<T, F, Fut>(frame: &Frame, body: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce(Frame, Resolver<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = oneshot::channel::<Result<T, Error>>();
    let resolver = Resolver { tx };

    let child = frame
        .spawn::<(), _>(move |child_frame: Frame| async move {
            body(child_frame, resolver).await;
            Ok(())
        })
        .await?;
    let remnant = child.halt_remnant();

    tokio::select! {
        biased;
        resolved = rx => {
            // The value is ready; schedule the body frame's teardown and
            // only deliver the value once it completes.
            remnant.halt().await;
            resolved.map_err(|_| Error::ChannelClosed).and_then(|r| r)
        }
        outcome = child => {
            match outcome {
                Outcome::Value(()) => Err(Error::ChannelClosed),
                Outcome::Error(e) => Err(e),
                Outcome::Halt => Err(Error::Halted),
            }
        }
    }
}

/// Begins a long-lived child frame that calls `body(frame, provider)`
/// once to perform setup, then publishes a handle via [`Provider::provide`]
/// and parks until the resource's scope ends (`Resource`).
///
/// A setup failure — the body returning `Err` before ever calling
/// `provide` — surfaces immediately at this call site as
/// [`Error::ResourceSetup`], not later at scope teardown.
pub async fn resource<T, F, Fut>(frame: &Frame, body: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce(Frame, Provider<T>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel::<T>();
    let provider = Provider { tx: Some(tx) };

    let child = frame
        .spawn::<(), _>(move |child_frame: Frame| async move { body(child_frame, provider).await })
        .await?;

    tokio::select! {
        biased;
        handle = rx => handle.map_err(|_| Error::ChannelClosed),
        outcome = child => match outcome {
            Outcome::Value(()) => Err(Error::ChannelClosed),
            Outcome::Error(e) => Err(Error::ResourceSetup(std::sync::Arc::new(e))),
            Outcome::Halt => Err(Error::Halted),
        },
    }
}
