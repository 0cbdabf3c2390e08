// SPDX-License-Identifier: Apache-2.0

//! Structured combinators built on top of [`crate::frame`] and
//! [`crate::scope`]: `call`, `all`, `race`, `with_timeout`,
//! `sleep`. Each one opens exactly the containment a human reviewer
//! would expect — a shared child scope for the operations it runs —
//! rather than leaving anything dangling past its own return.
//!
//! `call` opens a child scope, runs one operation in it, tears the scope
//! down when that operation settles, and propagates its outcome.
//! `all`/`race` generalize the same shape to many operations sharing one
//! scope.

use std::time::Duration;

use crate::{
    error::Error,
    frame::Frame,
    scope::Cause,
    task::Outcome,
};

/// Runs `op` in a fresh child scope, tearing that scope down — and with
/// it, anything `op` spawned into it — as soon as `op` settles. This is
/// the only way a caller opens a scope narrower than its own frame's.
pub async fn call<T, O>(frame: &Frame, op: O) -> Result<T, Error>
where
    T: Send + 'static,
    O: crate::operation::Operation<T>,
{
    let child_scope = frame.scope().child().await?;
    let task = child_scope.run(op).await?;
    let outcome = task.join().await;
    let value = match outcome {
        Outcome::Value(v) => Some(v),
        Outcome::Error(_) | Outcome::Halt => None,
    };

    // `evaluate` already promotes an error outcome to the scope that owns
    // the frame; for `Value`/`Halt` outcomes nothing has terminated the
    // scope yet, so do it here. `terminate` is idempotent either way.
    child_scope
        .terminate(if value.is_some() { Cause::Return } else { Cause::Halt })
        .await;

    // The scope's own recorded cause, not `op`'s frame's outcome, is
    // authoritative: if a *background* child spawned inside `op` failed
    // first, it already promoted that error to this scope (halting `op`'s
    // own frame along with it), and that is exactly the failure `call`
    // exists to surface at this call site ("error boundary").
    match child_scope.join().await {
        Cause::Error(e) => Err(e),
        Cause::Return | Cause::Halt => match value {
            Some(v) => Ok(v),
            None => Err(Error::Halted),
        },
    }
}

/// One branch's settlement out of [`all`] or [`race`], tagged with its
/// position in the input list so callers can tell which operation
/// produced it.
#[derive(Debug)]
pub struct Branch<T> {
    pub index: usize,
    pub value: T,
}

/// Runs every operation in `ops` concurrently inside one shared child
/// scope. If every operation returns a value, `all` returns them in
/// input order. If any operation fails, the scope is torn down — halting
/// every other branch still running — and that failure is the result
/// (`all`).
pub async fn all<T, O>(frame: &Frame, ops: Vec<O>) -> Result<Vec<T>, Error>
where
    T: Send + 'static,
    O: crate::operation::Operation<T>,
{
    let child_scope = frame.scope().child().await?;

    let mut tasks = Vec::with_capacity(ops.len());
    for op in ops {
        match child_scope.run(op).await {
            Ok(task) => tasks.push(task),
            Err(e) => {
                // The scope already rejects new children (it raced ahead
                // to terminal some other way); halt what we did manage
                // to start and surface this as the failure.
                for task in &tasks {
                    task.halt().await;
                }
                child_scope.terminate(Cause::Error(e.clone())).await;
                return Err(e);
            }
        }
    }

    let mut pending: Vec<_> = tasks.into_iter().enumerate().collect();
    let mut values: Vec<Option<T>> = (0..pending.len()).map(|_| None).collect();
    let mut first_error = None;

    while !pending.is_empty() {
        let futs = pending.iter_mut().map(|(_, task)| task);
        let (outcome, done_pos, _rest) = futures::future::select_all(futs).await;
        let (index, _) = pending.remove(done_pos);
        match outcome {
            Outcome::Value(v) => values[index] = Some(v),
            Outcome::Error(e) => {
                first_error.get_or_insert(e);
                break;
            }
            // A branch halting here, with no error of its own, means
            // something else already promoted a failure to `child_scope`
            // (e.g. a background spawn inside a different branch) and is
            // cascading the halt to every sibling. The real cause lives
            // on the scope, read below, not on this branch.
            Outcome::Halt => break,
        }
    }

    // One failure halts whatever else is still running, same as `race`.
    for (_, task) in &pending {
        task.halt().await;
    }

    let cause = match &first_error {
        Some(e) => Cause::Error(e.clone()),
        None => Cause::Return,
    };
    child_scope.terminate(cause).await;

    // The scope's own recorded cause is authoritative, not just this
    // loop's locally tracked `first_error`: a background child spawned
    // inside one of the branches can promote a failure to `child_scope`
    // and halt every branch before any of them ever reports its own
    // `Error` outcome.
    match child_scope.join().await {
        Cause::Error(e) => Err(e),
        Cause::Halt => Err(Error::Halted),
        Cause::Return => Ok(values.into_iter().map(|v| v.expect("every branch settled")).collect()),
    }
}

/// Runs every operation in `ops` concurrently inside one shared child
/// scope, returns as soon as the first one produces a value, and halts
/// the rest (`race`). If every branch errors or halts before
/// any produces a value, `race` propagates the first such cause.
pub async fn race<T, O>(frame: &Frame, ops: Vec<O>) -> Result<Branch<T>, Error>
where
    T: Send + 'static,
    O: crate::operation::Operation<T>,
{
    let child_scope = frame.scope().child().await?;

    let mut tasks = Vec::with_capacity(ops.len());
    for op in ops {
        tasks.push(child_scope.run(op).await?);
    }

    let mut pending: Vec<_> = tasks.into_iter().enumerate().collect();
    let mut first_failure = None;
    let winner = loop {
        if pending.is_empty() {
            break None;
        }
        let futs = pending.iter_mut().map(|(_, task)| task);
        let (outcome, done_pos, _rest) = futures::future::select_all(futs).await;
        let (index, _) = pending.remove(done_pos);
        match outcome {
            Outcome::Value(v) => break Some(Branch { index, value: v }),
            Outcome::Error(e) => {
                first_failure.get_or_insert(e);
            }
            // As in `all`: a bare halt here isn't itself a failure to
            // report, it's the cascade from whatever already promoted a
            // real cause to `child_scope`.
            Outcome::Halt => {}
        }
    };

    for (_, task) in &pending {
        task.halt().await;
    }

    let cause = match (&winner, &first_failure) {
        (Some(_), _) => Cause::Return,
        (None, Some(e)) => Cause::Error(e.clone()),
        (None, None) => Cause::Return,
    };
    child_scope.terminate(cause).await;

    // Trust the scope's own recorded cause over a locally tracked
    // failure: a background spawn inside a losing branch can promote
    // its error to `child_scope` and halt every branch before any of
    // them is ever observed failing directly.
    match winner {
        Some(branch) => Ok(branch),
        None => match child_scope.join().await {
            Cause::Error(e) => Err(e),
            Cause::Halt | Cause::Return => Err(first_failure.unwrap_or(Error::Halted)),
        },
    }
}

/// Races `op` against a deadline (`withTimeout`), exactly as
/// `race([op, sleep(ms).then(throw Timeout)])` would: `op` runs inside
/// its own fresh child scope, same as [`race`]'s branches, so a
/// background child `op` spawns is contained there too — a failure in
/// it promotes to *this* scope rather than escaping to the caller's own,
/// and is what `with_timeout` itself reports, not a halt the caller has
/// to go hunting for. On timeout, that scope is halted before
/// [`Error::Timeout`] is returned.
pub async fn with_timeout<T, O>(frame: &Frame, duration: Duration, op: O) -> Result<T, Error>
where
    T: Send + 'static,
    O: crate::operation::Operation<T>,
{
    let child_scope = frame.scope().child().await?;
    let task = child_scope.run(op).await?;
    let remnant = task.halt_remnant();

    let local: Result<T, Error> = tokio::select! {
        biased;
        outcome = task => match outcome {
            Outcome::Value(v) => Ok(v),
            Outcome::Error(e) => Err(e),
            Outcome::Halt => Err(Error::Halted),
        },
        _ = tokio::time::sleep(duration) => {
            remnant.halt().await;
            Err(Error::Timeout)
        }
    };

    child_scope
        .terminate(if local.is_ok() { Cause::Return } else { Cause::Halt })
        .await;

    // As in call()/all()/race(): trust the scope's own recorded cause
    // over the locally observed outcome — a background child spawned
    // inside `op` can promote a real failure to this scope before either
    // side of the race settles.
    match child_scope.join().await {
        Cause::Error(e) => Err(e),
        Cause::Return | Cause::Halt => local,
    }
}

/// Parks for `duration`, halting early if the enclosing frame is halted
/// first (`sleep`).
pub async fn sleep(frame: &Frame, duration: Duration) -> Result<(), Error> {
    tokio::select! {
        biased;
        result = frame.suspend() => match result {
            Ok(never) => match never {},
            Err(e) => Err(e),
        },
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, error::Error as Err_, operation::boxed, scope::Scope};

    fn root() -> Scope {
        Scope::root(Config::default())
    }

    #[derive(Debug, Clone, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[tokio::test]
    async fn all_collects_values_in_order() {
        let root = root();
        let task = root
            .run::<Vec<i32>, _>(|frame: Frame| async move {
                all(
                    &frame,
                    vec![
                        boxed(|_f: Frame| async move { Ok::<i32, Error>(1) }),
                        boxed(|_f: Frame| async move { Ok::<i32, Error>(2) }),
                        boxed(|_f: Frame| async move { Ok::<i32, Error>(3) }),
                    ],
                )
                .await
            })
            .await
            .unwrap();

        match task.join().await {
            Outcome::Value(values) => assert_eq!(values, vec![1, 2, 3]),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_first_failure_halts_remaining_siblings() {
        let root = root();
        let task = root
            .run::<Vec<()>, _>(|frame: Frame| async move {
                all(
                    &frame,
                    vec![
                        boxed(|f: Frame| async move {
                            let _: std::convert::Infallible = f.suspend().await?;
                            unreachable!()
                        }),
                        boxed(|_f: Frame| async move { Err(Err_::from_user(Boom)) }),
                    ],
                )
                .await
            })
            .await
            .unwrap();

        match task.join().await {
            Outcome::Error(_) => {}
            other => panic!("expected a failure to propagate, got {other:?}"),
        }
    }

    /// Neither branch of `all` fails directly — one of them spawns a
    /// background child that fails, which promotes to the shared child
    /// scope and halts every branch. `all` must surface that real cause
    /// rather than a synthesized `Error::Halted`.
    #[tokio::test]
    async fn all_surfaces_a_branchs_background_spawn_failure_as_the_real_cause() {
        let root = root();
        let task = root
            .run::<Vec<()>, _>(|frame: Frame| async move {
                all(
                    &frame,
                    vec![
                        boxed(|f: Frame| async move {
                            f.spawn::<(), _>(|_child: Frame| async move { Err(Err_::from_user(Boom)) })
                                .await?;
                            let _: std::convert::Infallible = f.suspend().await?;
                            unreachable!()
                        }),
                        boxed(|f: Frame| async move {
                            let _: std::convert::Infallible = f.suspend().await?;
                            unreachable!()
                        }),
                    ],
                )
                .await
            })
            .await
            .unwrap();

        match task.join().await {
            Outcome::Error(Err_::Child(_, cause)) => {
                assert!(cause.to_string().contains("boom"), "unexpected cause: {cause}")
            }
            other => panic!("expected the branch's background failure to surface, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn race_returns_first_success_and_halts_the_rest() {
        let root = root();
        let task = root
            .run::<Branch<&'static str>, _>(|frame: Frame| async move {
                race(
                    &frame,
                    vec![
                        boxed(|f: Frame| async move {
                            sleep(&f, Duration::from_millis(5)).await?;
                            Ok("fast")
                        }),
                        boxed(|f: Frame| async move {
                            let _: std::convert::Infallible = f.suspend().await?;
                            unreachable!()
                        }),
                    ],
                )
                .await
            })
            .await
            .unwrap();

        match task.join().await {
            Outcome::Value(branch) => {
                assert_eq!(branch.index, 0);
                assert_eq!(branch.value, "fast");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    /// race([sleep(10), sleep(1000)]) settles almost
    /// immediately and never drives the losing timer to completion.
    #[tokio::test(start_paused = true)]
    async fn race_with_leak_check_settles_without_the_losing_timer_firing() {
        let root = root();
        let start = tokio::time::Instant::now();

        let task = root
            .run::<Branch<()>, _>(|frame: Frame| async move {
                race(
                    &frame,
                    vec![
                        boxed(|f: Frame| async move { sleep(&f, Duration::from_millis(10)).await }),
                        boxed(|f: Frame| async move { sleep(&f, Duration::from_millis(1000)).await }),
                    ],
                )
                .await
            })
            .await
            .unwrap();

        let branch = match task.join().await {
            Outcome::Value(b) => b,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(branch.index, 0);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn with_timeout_halts_the_losing_operation_and_reports_timeout() {
        let root = root();
        let task = root
            .run::<(), _>(|frame: Frame| async move {
                with_timeout(&frame, Duration::from_millis(5), |f: Frame| async move {
                    let _: std::convert::Infallible = f.suspend().await?;
                    unreachable!()
                })
                .await
            })
            .await
            .unwrap();

        match task.join().await {
            Outcome::Error(Err_::Timeout) => {}
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    /// A background spawn inside `with_timeout`'s own operation must be
    /// contained to `with_timeout`'s own scope and surface as its `Err`
    /// — never escape past it to halt the caller's enclosing scope, the
    /// same error-boundary containment `call`/`all`/`race` give their
    /// operations.
    #[tokio::test]
    async fn with_timeout_contains_a_background_spawn_failure_as_its_own_error() {
        let root = root();
        let task = root
            .run::<Result<(), String>, _>(|frame: Frame| async move {
                let result = with_timeout(&frame, Duration::from_secs(5), |f: Frame| async move {
                    f.spawn::<(), _>(|_child: Frame| async move { Err(Err_::from_user(Boom)) })
                        .await?;
                    let _: std::convert::Infallible = f.suspend().await?;
                    unreachable!()
                })
                .await;
                Ok(result.map_err(|e| e.to_string()))
            })
            .await
            .unwrap();

        match task.join().await {
            Outcome::Value(Err(msg)) => assert!(msg.contains("boom"), "unexpected message: {msg}"),
            other => panic!("expected with_timeout() to surface the background failure, got {other:?}"),
        }
    }

    /// The `call` half: a background `spawn`'s failure
    /// surfaces as a foreground `Err` at the `call` site.
    #[tokio::test]
    async fn call_surfaces_background_spawn_failure_at_the_call_site() {
        let root = root();
        let task = root
            .run::<Result<(), String>, _>(|frame: Frame| async move {
                let result = call(&frame, |f: Frame| async move {
                    f.spawn::<(), _>(|_child: Frame| async move { Err(Err_::from_user(Boom)) })
                        .await?;
                    let _: std::convert::Infallible = f.suspend().await?;
                    unreachable!()
                })
                .await;
                Ok(result.map_err(|e| e.to_string()))
            })
            .await
            .unwrap();

        match task.join().await {
            Outcome::Value(Err(msg)) => assert!(msg.contains("boom"), "unexpected message: {msg}"),
            other => panic!("expected call() to surface the background failure, got {other:?}"),
        }
    }

    /// The "no `call`" half: the same background
    /// failure instead promotes past the spawning frame to the enclosing
    /// scope, rather than appearing as an `Err` the spawning frame itself
    /// observes.
    #[tokio::test]
    async fn without_call_background_spawn_failure_terminates_the_enclosing_scope() {
        let root = root();
        let task = root
            .run::<(), _>(|frame: Frame| async move {
                frame
                    .spawn::<(), _>(|_child: Frame| async move { Err(Err_::from_user(Boom)) })
                    .await?;
                let _: std::convert::Infallible = frame.suspend().await?;
                unreachable!()
            })
            .await
            .unwrap();

        // The frame itself never saw an `Err` from a `try`-style boundary;
        // it only ever observed `frame.suspend()` resolving via halt once
        // its own scope was torn down by the sibling's failure.
        match task.join().await {
            Outcome::Halt => {}
            other => panic!("expected the spawning frame to merely halt, got {other:?}"),
        }
    }

    /// Round-trip law: `yield* spawn(op)` then `yield* task` is
    /// observationally equivalent to `yield* op` directly, in both success
    /// and error cases.
    #[tokio::test]
    async fn spawn_then_join_is_equivalent_to_running_directly() {
        let root = root();

        let direct = root
            .run::<i32, _>(|_f: Frame| async move { Ok(7) })
            .await
            .unwrap()
            .join()
            .await;
        let via_spawn = root
            .run::<i32, _>(|frame: Frame| async move {
                let task = frame.spawn::<i32, _>(|_f: Frame| async move { Ok(7) }).await?;
                match task.join().await {
                    Outcome::Value(v) => Ok(v),
                    Outcome::Error(e) => Err(e),
                    Outcome::Halt => Err(Err_::Halted),
                }
            })
            .await
            .unwrap()
            .join()
            .await;

        match (direct, via_spawn) {
            (Outcome::Value(a), Outcome::Value(b)) => assert_eq!(a, b),
            (a, b) => panic!("expected both to succeed with the same value, got {a:?} / {b:?}"),
        }
    }
}
