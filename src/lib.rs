// SPDX-License-Identifier: Apache-2.0

//! A structured-concurrency runtime: lazy, restartable operations bound
//! to a hierarchical scope tree with cascading halt propagation.
//!
//! An [`Operation`] does nothing by itself — it is a recipe, not a
//! running thing. Handing one to [`Scope::run`] (or the crate-level
//! [`run`] / [`main`] entry points) activates it as a [`Frame`] attached
//! to a [`Scope`]: from inside that frame, [`spawn`](Frame::spawn) adds
//! siblings to the same scope, [`call`] and friends open narrower child
//! scopes, and halting any scope cascades down its whole subtree before
//! the halt is considered complete. Nothing a scope started ever
//! outlives it.
//!
//! ```text
//! Scope
//! ├── Frame               (a running operation)
//! ├── Scope                (opened by call/all/race)
//! │   ├── Frame
//! │   └── Frame
//! └── Frame
//! ```

mod channel;
mod combinators;
mod config;
mod error;
mod frame;
mod operation;
mod primitives;
mod scope;
mod shutdown;
mod signal;
mod task;

pub use channel::{create_channel, create_channel_default, Channel, Next, Subscription};
pub use combinators::{all, call, race, sleep, with_timeout, Branch};
pub use config::Config;
pub use error::{Error, ErrorLevel};
pub use frame::{operation, Frame};
pub use operation::{boxed, Boxed, Operation};
pub use primitives::{action, resource, Provider, Resolver};
pub use scope::{Scope, ScopeId};
pub use signal::{create_signal, Signal};
pub use task::{Outcome, Task};

use scope::Cause;

/// Runs `op` to completion in a fresh root scope and returns its result.
///
/// This is the library-level entry point (`run`): it does not
/// install a logger and does not listen for interrupts — see [`main`]
/// for the binary-level entry point that does both.
pub async fn run<T, O>(op: O) -> Result<T, Error>
where
    T: Send + 'static,
    O: Operation<T>,
{
    Runtime::new(Config::default()).run(op).await
}

/// Runs `op` to completion in a fresh root scope, additionally halting
/// the root scope on Ctrl-C (`main`). Intended for a binary's
/// `main` body; a library embedding this runtime should prefer [`run`].
pub async fn main<T, O>(op: O) -> Result<T, Error>
where
    T: Send + 'static,
    O: Operation<T>,
{
    let runtime = Runtime::new(Config::default());
    let task = runtime.scope().run(op).await?;

    let outcome = tokio::select! {
        biased;
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted, halting root scope");
            Outcome::Halt
        }
        outcome = task => outcome,
    };

    // Mirrors call()/all()/race(): terminate this scope once its task
    // settles, for *every* outcome — not only the Ctrl-C path — so
    // nothing the body spawned into the root outlives it. Idempotent: a
    // no-op if the root already recorded a cause (e.g. a background
    // failure promoted one first).
    let cause = match &outcome {
        Outcome::Value(_) => Cause::Return,
        Outcome::Error(_) | Outcome::Halt => Cause::Halt,
    };
    runtime.scope().terminate(cause).await;

    let result = resolve_halt(runtime.scope(), outcome).await;
    // "Halt at the root is silent success": only a genuine error is
    // logged and printed to the stderr-like sink; `Error::Halted` alone
    // means nothing more than a clean, requested shutdown.
    if let Err(e) = &result {
        if !matches!(e, Error::Halted) {
            log::log!(e.level(), "unhandled error reached the root scope: {e}");
            eprintln!("error: {e}");
        }
    }
    result
}

/// Turns a body task's settled [`Outcome`] into the `Result` an entry
/// point reports. `Outcome::Halt` alone doesn't say *why* the frame
/// halted — that's the enclosing scope's recorded [`Cause`], which is
/// set before any of its children are halted, so it's already available
/// by the time the body task itself settles.
async fn resolve_halt<T>(root: &Scope, outcome: Outcome<T>) -> Result<T, Error> {
    match outcome {
        Outcome::Value(v) => Ok(v),
        Outcome::Error(e) => Err(e),
        Outcome::Halt => match root.join().await {
            Cause::Error(e) => Err(e),
            Cause::Halt | Cause::Return => Err(Error::Halted),
        },
    }
}

/// A runtime instance: a root [`Scope`] plus the tunables in [`Config`]
/// that scopes and channels opened under it inherit.
pub struct Runtime {
    root: Scope,
    config: Config,
}

impl Runtime {
    /// Creates a runtime with a fresh root scope.
    pub fn new(config: Config) -> Self {
        Runtime {
            root: Scope::root(config.clone()),
            config,
        }
    }

    /// The runtime's tunables.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The runtime's root scope.
    pub fn scope(&self) -> &Scope {
        &self.root
    }

    /// Runs `op` in the root scope and awaits its outcome.
    pub async fn run<T, O>(&self, op: O) -> Result<T, Error>
    where
        T: Send + 'static,
        O: Operation<T>,
    {
        let task = self.root.run(op).await?;
        let outcome = task.join().await;

        // As in call()/all()/race(): terminate the scope once its task
        // settles, for every outcome, so anything the body spawned into
        // the root is torn down too. Idempotent: a no-op if the root
        // already recorded a cause via error promotion.
        let cause = match &outcome {
            Outcome::Value(_) => Cause::Return,
            Outcome::Error(_) | Outcome::Halt => Cause::Halt,
        };
        self.root.terminate(cause).await;

        resolve_halt(&self.root, outcome).await
    }
}
