// SPDX-License-Identifier: Apache-2.0

//! The frame evaluator: turns an [`Operation`] into a running
//! task attached to a scope, and drives its teardown.
//!
//! Spawn onto the runtime, race the body against a shutdown signal,
//! catch panics, join, promote errors to the owning scope. The exit
//! stack (`ensure`) is the one piece with no direct analogue in a plain
//! supervised-actor spawn, since actors there never needed
//! user-registered cleanup thunks distinct from `Drop`.

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::sync::{oneshot, Mutex};

use crate::{
    error::Error,
    operation::{BoxOperation, Operation},
    scope::{Cause, FrameEntry, Scope},
    shutdown::ShutdownHandle,
    task::{Outcome, Task},
};

/// A cleanup thunk registered via [`Frame::ensure`] / [`Frame::ensure_async`].
enum Cleanup {
    Sync(Box<dyn FnOnce() + Send>),
    Async(BoxOperation<'static, ()>),
}

/// The activation record an operation body runs with.
///
/// Cheap to clone: a `Frame` is a handle (scope + halt signal + a shared
/// exit stack), not an owner of unique state, so operation closures can
/// capture it by value and stay `'static` without borrowing gymnastics.
#[derive(Clone)]
pub struct Frame {
    pub(crate) scope: Scope,
    pub(crate) halt: ShutdownHandle,
    exit_stack: Arc<Mutex<Vec<Cleanup>>>,
}

impl Frame {
    fn new(scope: Scope, halt: ShutdownHandle) -> Self {
        Frame {
            scope,
            halt,
            exit_stack: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The scope this frame belongs to. `spawn` attaches new frames here
    /// as siblings of `self` (`Spawn`; also the access point `GetScope`
    /// would use to hand a scope handle to host callback code).
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Parks until this frame is halted, then unwinds via `?` (/// `Suspend`). The `Infallible` output means a caller can never
    /// observe an `Ok` from this call — it only ever resolves by halting.
    pub async fn suspend(&self) -> Result<std::convert::Infallible, Error> {
        self.halt.clone().await;
        Err(Error::Halted)
    }

    /// Registers a plain cleanup thunk, run during teardown in the
    /// reverse of registration order (`ensure`).
    pub async fn ensure<F>(&self, thunk: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.exit_stack.lock().await.push(Cleanup::Sync(Box::new(thunk)));
    }

    /// Registers an operation to be driven to completion during teardown,
    /// in the reverse of registration order. Cleanup thunks may
    /// themselves be operations.
    pub async fn ensure_async<O>(&self, op: O)
    where
        O: Operation<()>,
    {
        let frame = Frame::new(self.scope.clone(), ShutdownHandle::default());
        self.exit_stack
            .lock()
            .await
            .push(Cleanup::Async(op.run(frame)));
    }

    /// Attaches a new sibling frame to this frame's scope and returns
    /// immediately without awaiting it (`Spawn`).
    pub async fn spawn<T, O>(&self, op: O) -> Result<Task<T>, Error>
    where
        T: Send + 'static,
        O: Operation<T>,
    {
        evaluate(self.scope.clone(), op).await
    }

    /// Runs the registered exit stack in reverse order, collecting every
    /// cleanup error rather than stopping at the first.
    /// Logs a warning (never forces anything) if a single thunk outlives
    /// the scope's configured `teardown_grace`.
    pub(crate) async fn teardown(&self) -> Vec<Error> {
        let thunks = std::mem::take(&mut *self.exit_stack.lock().await);
        let grace = self.scope.config().teardown_grace;
        let mut errors = Vec::new();
        for thunk in thunks.into_iter().rev() {
            let start = std::time::Instant::now();
            match thunk {
                Cleanup::Sync(f) => f(),
                Cleanup::Async(fut) => {
                    if let Err(e) = fut.await {
                        errors.push(e);
                    }
                }
            }
            if let Some(grace) = grace {
                let elapsed = start.elapsed();
                if elapsed > grace {
                    log::warn!(
                        "cleanup thunk in scope {} took {:?}, exceeding teardown_grace of {:?}",
                        self.scope.id(),
                        elapsed,
                        grace
                    );
                }
            }
        }
        errors
    }
}

/// Spawns `op` as a new frame attached to `scope`, returning a [`Task`]
/// handle without waiting for it to complete.
///
/// This is the one evaluator for every frame in the system: plain
/// `spawn`, the body of `action`/`resource`, and the primary operation a
/// combinator runs in a scope it just created all go through here.
pub(crate) async fn evaluate<T, O>(scope: Scope, op: O) -> Result<Task<T>, Error>
where
    T: Send + 'static,
    O: Operation<T>,
{
    let halt = ShutdownHandle::default();
    let done = ShutdownHandle::default();
    let (outcome_tx, outcome_rx) = oneshot::channel::<Outcome<T>>();

    let frame = Frame::new(scope.clone(), halt.clone());
    let frame_halt = halt.clone();
    let done_for_task = done.clone();
    let scope_for_task = scope.clone();

    let join = tokio::spawn(async move {
        let body = op.run(frame.clone());
        let raced = futures::future::select(frame_halt.clone(), AssertUnwindSafe(body).catch_unwind());

        let outcome = match raced.await {
            futures::future::Either::Left((_, _)) => {
                let errs = frame.teardown().await;
                match Error::aggregate(errs) {
                    Some(e) => Outcome::Error(e),
                    None => Outcome::Halt,
                }
            }
            futures::future::Either::Right((Ok(Ok(value)), _)) => {
                let errs = frame.teardown().await;
                match Error::aggregate(errs) {
                    Some(e) => Outcome::Error(e),
                    None => Outcome::Value(value),
                }
            }
            futures::future::Either::Right((Ok(Err(e)), _)) => {
                let mut errs = frame.teardown().await;
                if matches!(e, Error::Halted) {
                    match Error::aggregate(errs) {
                        Some(agg) => Outcome::Error(agg),
                        None => Outcome::Halt,
                    }
                } else {
                    errs.insert(0, e);
                    Outcome::Error(Error::aggregate(errs).expect("at least one error present"))
                }
            }
            futures::future::Either::Right((Err(panic), _)) => {
                // Best-effort cleanup before re-raising; the panic, not a
                // secondary teardown error, is what the caller sees.
                let _ = frame.teardown().await;
                std::panic::resume_unwind(panic);
            }
        };

        if let Outcome::Error(ref e) = outcome {
            log::log!(
                log::Level::Debug,
                "frame in scope {} failed, promoting to scope: {}",
                scope_for_task.id(),
                e
            );
            // The scope's recorded cause is wrapped as `Error::Child`: a
            // direct awaiter of *this* task still sees `e` itself (sent
            // below, unwrapped) per "promotes... as if thrown at
            // the yield site that spawned or awaited the child" — the
            // wrapping only matters to whoever later reads the scope's
            // cause (e.g. `call`'s error-boundary surfacing).
            let child_id = scope_for_task.id();
            scope_for_task
                .terminate(Cause::Error(Error::Child(child_id, Arc::new(e.clone()))))
                .await;
        }

        let _ = outcome_tx.send(outcome);
        done_for_task.shutdown();
    });

    match scope.attach_frame(FrameEntry { halt: halt.clone(), join }).await {
        Ok(()) => Ok(Task::new(halt, done, outcome_rx)),
        Err(e) => {
            // Scope went terminal between evaluate() being called and the
            // attach; the frame we just spawned must not outlive it.
            halt.shutdown();
            Err(e)
        }
    }
}

/// Convenience for combinators: wraps a plain async closure as an
/// [`Operation`] without requiring callers to spell out `Box::pin`.
pub fn operation<T, F, Fut>(body: F) -> impl Operation<T>
where
    T: Send + 'static,
    F: FnOnce(Frame) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    body
}
