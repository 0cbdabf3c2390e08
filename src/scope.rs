// SPDX-License-Identifier: Apache-2.0

//! The scope tree: a lifetime hierarchy with cascading halt propagation and
//! parent-fails-on-child-error semantics.
//!
//! An `Arc`-based registry of children with a single compare-exchange on
//! becoming terminal, generalized from actor-only children to the generic
//! frame and child-scope attachments this runtime needs.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_recursion::async_recursion;
use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use crate::{
    config::Config,
    error::Error,
    operation::Operation,
    shutdown::ShutdownHandle,
    task::Task,
};

/// An alias type indicating that this is a scope id.
pub type ScopeId = Uuid;

/// The root scope id, always a nil uuid.
pub const ROOT_SCOPE: ScopeId = Uuid::nil();

/// Why a scope became terminal. Exactly one cause is ever recorded.
#[derive(Debug, Clone)]
pub enum Cause {
    /// The scope's own body completed normally.
    Return,
    /// The scope's body, or one of its children, failed.
    Error(Error),
    /// The parent asked this scope to halt.
    Halt,
}

impl Cause {
    /// Converts a termination cause into the `Result` a waiter of this
    /// scope should observe. `Halt` is not an error; callers
    /// that need to distinguish it should match on `Cause` directly.
    pub fn into_result(self) -> Result<(), Option<Error>> {
        match self {
            Cause::Return => Ok(()),
            Cause::Halt => Err(None),
            Cause::Error(e) => Err(Some(e)),
        }
    }
}

/// One entry in a scope's ordered attachment list. Frames and nested
/// scopes share a single list so that teardown order is the reverse of
/// attachment order across both, interleaved by position.
enum Attachment {
    Frame(FrameEntry),
    Child(Scope),
}

/// What a scope needs in order to halt a frame attached to it and wait for
/// its teardown to finish.
pub(crate) struct FrameEntry {
    pub(crate) halt: ShutdownHandle,
    pub(crate) join: tokio::task::JoinHandle<()>,
}

struct ScopeInner {
    id: ScopeId,
    parent: Option<Scope>,
    config: Arc<Config>,
    children: RwLock<Vec<Attachment>>,
    terminal: AtomicBool,
    cause: RwLock<Option<Cause>>,
    on_terminal: RwLock<Option<Vec<oneshot::Sender<()>>>>,
}

impl fmt::Debug for ScopeInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeInner")
            .field("id", &self.id)
            .field("terminal", &self.terminal.load(Ordering::Acquire))
            .finish()
    }
}

/// A lifetime node. Exclusively owns its frames and child scopes. Cheap
/// to clone; internally an `Arc`.
#[derive(Clone, Debug)]
pub struct Scope(Arc<ScopeInner>);

impl Scope {
    /// Creates the root scope of a runtime.
    pub(crate) fn root(config: Config) -> Self {
        Scope(Arc::new(ScopeInner {
            id: ROOT_SCOPE,
            parent: None,
            config: Arc::new(config),
            children: RwLock::new(Vec::new()),
            terminal: AtomicBool::new(false),
            cause: RwLock::new(None),
            on_terminal: RwLock::new(Some(Vec::new())),
        }))
    }

    /// Creates a new scope as a child of this one. Inherits the parent's
    /// [`Config`]: tunables are set once, at the root, and
    /// every descendant scope and channel sees the same values.
    pub async fn child(&self) -> Result<Scope, Error> {
        if self.is_terminal() {
            return Err(Error::ScopeTerminated(self.id()));
        }
        let child = Scope(Arc::new(ScopeInner {
            id: Uuid::new_v4(),
            parent: Some(self.clone()),
            config: self.0.config.clone(),
            children: RwLock::new(Vec::new()),
            terminal: AtomicBool::new(false),
            cause: RwLock::new(None),
            on_terminal: RwLock::new(Some(Vec::new())),
        }));
        self.attach(Attachment::Child(child.clone())).await?;
        log::trace!("scope {} spawned child scope {}", self.id(), child.id());
        Ok(child)
    }

    /// The tunables this scope (and everything under it) was launched
    /// with.
    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub(crate) async fn attach_frame(&self, entry: FrameEntry) -> Result<(), Error> {
        self.attach(Attachment::Frame(entry)).await
    }

    async fn attach(&self, attachment: Attachment) -> Result<(), Error> {
        if self.is_terminal() {
            log::warn!("scope {} is already terminal, rejecting a new attachment", self.id());
            return Err(Error::ScopeTerminated(self.id()));
        }
        let mut children = self.0.children.write().await;
        // Re-check under the lock: termination may have raced us.
        if self.is_terminal() {
            log::warn!("scope {} went terminal while attaching, rejecting the new attachment", self.id());
            return Err(Error::ScopeTerminated(self.id()));
        }
        children.push(attachment);
        Ok(())
    }

    /// The scope's id.
    pub fn id(&self) -> ScopeId {
        self.0.id
    }

    /// The parent scope, if any.
    pub fn parent(&self) -> Option<Scope> {
        self.0.parent.clone()
    }

    /// Whether this scope has become terminal (no longer accepts
    /// children).
    pub fn is_terminal(&self) -> bool {
        self.0.terminal.load(Ordering::Acquire)
    }

    /// This scope's direct child scopes, in attachment order.
    pub async fn children(&self) -> Vec<Scope> {
        self.0
            .children
            .read()
            .await
            .iter()
            .filter_map(|a| match a {
                Attachment::Child(s) => Some(s.clone()),
                Attachment::Frame(_) => None,
            })
            .collect()
    }

    /// This scope's siblings (its parent's other children), or empty at
    /// the root.
    pub async fn siblings(&self) -> Vec<Scope> {
        match self.parent() {
            Some(parent) => parent.children().await.into_iter().filter(|s| s.id() != self.id()).collect(),
            None => Vec::new(),
        }
    }

    /// Walks up to find the root scope.
    pub fn root_scope(&self) -> Scope {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Finds a scope by id, searching this scope and its ancestors.
    pub fn find_by_id(&self, id: ScopeId) -> Option<Scope> {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            if scope.id() == id {
                return Some(scope);
            }
            current = scope.parent();
        }
        None
    }

    /// Requests this scope to halt. Idempotent: a second call is absorbed
    /// ("halting is idempotent").
    pub fn shutdown(&self) {
        let inner = self.0.clone();
        tokio::spawn(async move {
            Scope(inner).terminate(Cause::Halt).await;
        });
    }

    /// Terminates this scope with the given cause, halting every live
    /// child in reverse attachment order and awaiting each one's teardown
    /// before halting the next.
    #[async_recursion]
    pub(crate) async fn terminate(&self, cause: Cause) {
        // Claim the right to be the recorded terminator; a scope records
        // exactly one terminal cause.
        if self
            .0
            .terminal
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!(
                "scope {} already terminal, absorbing redundant terminate({:?})",
                self.id(),
                DebugCause(&cause)
            );
            return;
        }
        log::debug!("scope {} terminating ({:?})", self.id(), DebugCause(&cause));
        *self.0.cause.write().await = Some(cause);

        let attachments = std::mem::take(&mut *self.0.children.write().await);
        for attachment in attachments.into_iter().rev() {
            match attachment {
                Attachment::Frame(entry) => {
                    entry.halt.shutdown();
                    if let Err(e) = entry.join.await {
                        if e.is_panic() {
                            std::panic::resume_unwind(e.into_panic());
                        }
                    }
                }
                Attachment::Child(child) => {
                    child.terminate(Cause::Halt).await;
                }
            }
        }

        if let Some(waiters) = self.0.on_terminal.write().await.take() {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
        log::trace!("scope {} fully torn down", self.id());
    }

    /// Waits until this scope becomes terminal and returns its cause.
    pub(crate) async fn join(&self) -> Cause {
        if !self.is_terminal() {
            let (tx, rx) = oneshot::channel();
            let mut guard = self.0.on_terminal.write().await;
            match guard.as_mut() {
                Some(waiters) => {
                    waiters.push(tx);
                    drop(guard);
                    let _ = rx.await;
                }
                None => {
                    // Already torn down between the is_terminal check and
                    // taking the lock.
                }
            }
        }
        self.0
            .cause
            .read()
            .await
            .clone()
            .expect("terminal scope always records a cause")
    }

    /// Injects an operation into this scope from outside, e.g. from host
    /// callback code holding a [`crate::scope::Scope`] obtained via
    /// [`crate::Frame::scope`].
    pub async fn run<T, O>(&self, op: O) -> Result<Task<T>, Error>
    where
        T: Send + 'static,
        O: Operation<T>,
    {
        crate::frame::evaluate(self.clone(), op).await
    }
}

struct DebugCause<'a>(&'a Cause);
impl fmt::Debug for DebugCause<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Cause::Return => write!(f, "Return"),
            Cause::Error(_) => write!(f, "Error"),
            Cause::Halt => write!(f, "Halt"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::frame::Frame;

    fn root() -> Scope {
        Scope::root(Config::default())
    }

    #[tokio::test]
    async fn child_scope_inherits_parent_config() {
        let root = Scope::root(Config {
            channel_capacity: 7,
            teardown_grace: None,
        });
        let child = root.child().await.unwrap();
        assert_eq!(child.config().channel_capacity, 7);
    }

    #[tokio::test]
    async fn scope_rejects_new_children_once_terminal() {
        let root = root();
        root.terminate(Cause::Return).await;
        assert!(root.is_terminal());
        assert!(matches!(root.child().await, Err(Error::ScopeTerminated(_))));
    }

    #[tokio::test]
    async fn sibling_of_a_failed_frame_halts_quietly_not_as_an_error() {
        let root = root();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let task = root
            .run::<(), _>({
                let order = order.clone();
                move |frame: Frame| async move {
                    let survivor = frame
                        .spawn::<(), _>({
                            let order = order.clone();
                            move |f: Frame| async move {
                                f.ensure(move || order.lock().unwrap().push("survivor-cleanup")).await;
                                let _: std::convert::Infallible = f.suspend().await?;
                                unreachable!()
                            }
                        })
                        .await?;

                    frame
                        .spawn::<(), _>(|_f: Frame| async move {
                            #[derive(Debug, thiserror::Error)]
                            #[error("boom")]
                            struct Boom;
                            Err(Error::from_user(Boom))
                        })
                        .await?;

                    // The failing sibling's promotion halts this frame and
                    // `survivor` from outside; the await below observes
                    // `survivor` halting quietly, never as an error.
                    match survivor.join().await {
                        crate::task::Outcome::Halt => {}
                        other => panic!("expected sibling to halt quietly, got {other:?}"),
                    }
                    let _: std::convert::Infallible = frame.suspend().await?;
                    unreachable!()
                }
            })
            .await
            .unwrap();

        // The *scope*, not this particular frame's own outcome, is where
        // the failure is recorded (: "an error in any child frame
        // promotes to the scope").
        match task.join().await {
            crate::task::Outcome::Halt => {}
            other => panic!("unexpected outcome for the promoting frame itself: {other:?}"),
        }
        match root.join().await {
            Cause::Error(_) => {}
            other => panic!("expected the scope to report the failure, got {other:?}"),
        }
        assert_eq!(*order.lock().unwrap(), vec!["survivor-cleanup"]);
    }

    #[tokio::test]
    async fn teardown_halts_children_in_reverse_attachment_order() {
        let root = root();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = order.clone();
            root.run::<(), _>(move |f: Frame| async move {
                f.ensure(move || order.lock().unwrap().push(label)).await;
                let _: std::convert::Infallible = f.suspend().await?;
                unreachable!()
            })
            .await
            .unwrap();
        }

        root.terminate(Cause::Return).await;
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }
}
