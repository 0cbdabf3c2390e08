// SPDX-License-Identifier: Apache-2.0

//! `Task<T>`: the handle returned by spawning or running a frame. `Task<T>`
//! is simply awaited for its [`Outcome`], and `halt` is a distinct,
//! non-consuming method a caller can call any number of times — halting
//! is idempotent.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::{error::Error, shutdown::ShutdownHandle};

/// How a frame settled.
///
/// `Halt` is its own variant, not folded into `Error`, because halting is
/// quiet cancellation rather than failure.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The frame's body returned a value and teardown succeeded.
    Value(T),
    /// The frame's body raised an error, or teardown itself failed.
    Error(Error),
    /// The frame was halted before it produced a value, and teardown of
    /// everything it had registered completed cleanly.
    Halt,
}

impl<T> Outcome<T> {
    /// True if this outcome is [`Outcome::Halt`].
    pub fn is_halt(&self) -> bool {
        matches!(self, Outcome::Halt)
    }

    /// Converts to `Result`, treating a halt as `Ok(None)` — useful for
    /// callers that only care whether a value was produced.
    pub fn into_option(self) -> Result<Option<T>, Error> {
        match self {
            Outcome::Value(v) => Ok(Some(v)),
            Outcome::Halt => Ok(None),
            Outcome::Error(e) => Err(e),
        }
    }
}

/// A handle to a running (or already-settled) frame.
///
/// Awaiting a `Task<T>` yields its [`Outcome`]. Calling [`Task::halt`]
/// requests teardown and waits for it to finish, independently of
/// whether anything is awaiting the task for its value.
pub struct Task<T> {
    halt: ShutdownHandle,
    done: ShutdownHandle,
    outcome: oneshot::Receiver<Outcome<T>>,
}

impl<T> Task<T> {
    pub(crate) fn new(halt: ShutdownHandle, done: ShutdownHandle, outcome: oneshot::Receiver<Outcome<T>>) -> Self {
        Task { halt, done, outcome }
    }

    /// Requests this frame to halt and waits for its teardown to
    /// complete. Idempotent: calling this more than once, concurrently or
    /// sequentially, just waits on the same completion signal.
    pub async fn halt(&self) {
        self.halt.shutdown();
        self.done.clone().await;
    }

    /// Consumes this handle, waiting for the frame's outcome.
    pub async fn join(self) -> Outcome<T>
    where
        T: Send + 'static,
    {
        match self.outcome.await {
            Ok(outcome) => outcome,
            // The spawned task's sender was dropped without sending,
            // which only happens if it panicked before reaching its own
            // outcome_tx.send — and a panic there already re-raises at
            // the JoinHandle awaited inside evaluate()'s own scope
            // termination path, so this arm is a defensive fallback, not
            // the common panic-reporting path.
            Err(_) => Outcome::Error(Error::ChannelClosed),
        }
    }

    /// Detaches a halt-only remnant of this task: something that can
    /// still request and await teardown after `self` has been consumed
    /// elsewhere (e.g. moved into a `select!` branch racing for its
    /// value). Used by [`crate::combinators::with_timeout`] to halt the
    /// losing side of the race.
    pub(crate) fn halt_remnant(&self) -> TaskHalt {
        TaskHalt {
            halt: self.halt.clone(),
            done: self.done.clone(),
        }
    }
}

/// See [`Task::halt_remnant`].
pub(crate) struct TaskHalt {
    halt: ShutdownHandle,
    done: ShutdownHandle,
}

impl TaskHalt {
    pub(crate) async fn halt(&self) {
        self.halt.shutdown();
        self.done.clone().await;
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = Pin::into_inner(self);
        Pin::new(&mut this.outcome)
            .poll(cx)
            .map(|res| res.unwrap_or(Outcome::Error(Error::ChannelClosed)))
    }
}

#[cfg(test)]
mod tests {
    use crate::{frame::Frame, scope::Scope};

    fn root() -> Scope {
        Scope::root(crate::config::Config::default())
    }

    #[tokio::test]
    async fn halting_a_task_twice_is_idempotent_and_both_calls_return() {
        let root = root();
        let task = root
            .run::<(), _>(|f: Frame| async move {
                let _: std::convert::Infallible = f.suspend().await?;
                unreachable!()
            })
            .await
            .unwrap();

        tokio::join!(task.halt(), task.halt());
        match task.join().await {
            super::Outcome::Halt => {}
            other => panic!("expected Halt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn awaiting_a_task_directly_yields_the_same_outcome_as_join() {
        let root = root();
        let task = root.run::<i32, _>(|_f: Frame| async move { Ok(99) }).await.unwrap();
        match task.await {
            super::Outcome::Value(v) => assert_eq!(v, 99),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
