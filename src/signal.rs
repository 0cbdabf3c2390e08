// SPDX-License-Identifier: Apache-2.0

//! `Signal`: a bridge from ordinary, non-operation Rust code (a UI
//! callback, a libc handler, anything not running inside a frame) into
//! the channel layer.
//!
//! A plain synchronous handle that hands a message into the async world
//! through a dedicated mailbox frame — the teacher's own
//! `Addr::send`-into-a-mailbox shape, rather than a bare `scope.run` per
//! call, so that two calls from two different host threads are ordered
//! by when they actually happened, not by how `tokio` happens to
//! schedule the tasks each call would otherwise have spawned.

use tokio::sync::mpsc;

use crate::{channel::Channel, frame::Frame, scope::Scope};

/// One enqueued mailbox entry: a `send`/`close` call captured in the
/// order it was made.
enum Mail<T, C> {
    Send(T),
    Close(C),
}

/// A send/close handle usable from outside any frame. Captures the scope
/// it was created in; calls made after that scope has gone terminal are
/// silently dropped rather than erroring, since there is no longer a
/// waiter who could observe the failure.
///
/// Cheap to clone: cloning shares the same underlying mailbox, channel,
/// and scope capture, so several host callbacks (e.g. more than one DOM
/// listener) can each hold their own handle to the same signal.
pub struct Signal<T, C> {
    scope: Scope,
    mailbox: mpsc::UnboundedSender<Mail<T, C>>,
    channel: Channel<T, C>,
}

impl<T, C> Clone for Signal<T, C> {
    fn clone(&self) -> Self {
        Signal {
            scope: self.scope.clone(),
            mailbox: self.mailbox.clone(),
            channel: self.channel.clone(),
        }
    }
}

/// Creates a signal rooted at `frame`'s scope, with `capacity` as the
/// per-subscription queue bound for its underlying channel.
///
/// Spawns a long-lived mailbox frame, attached to `frame`'s scope
/// exactly like any other [`Frame::spawn`], that drains `send`/`close`
/// calls in the order they were enqueued and replays them onto the
/// channel; it is halted along with everything else when that scope
/// ends.
pub async fn create_signal<T, C>(frame: &Frame, capacity: usize) -> Signal<T, C>
where
    T: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    let channel = crate::channel::create_channel(capacity);
    let (mailbox, mut inbox) = mpsc::unbounded_channel::<Mail<T, C>>();

    let forwarder_channel = channel.clone();
    let _ = frame
        .spawn::<(), _>(move |_f: Frame| async move {
            while let Some(mail) = inbox.recv().await {
                match mail {
                    Mail::Send(value) => {
                        let _ = forwarder_channel.send(value).await;
                    }
                    Mail::Close(close_value) => forwarder_channel.close(close_value).await,
                }
            }
            Ok(())
        })
        .await;

    Signal {
        scope: frame.scope().clone(),
        mailbox,
        channel,
    }
}

impl<T, C> Signal<T, C>
where
    T: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    /// Pushes `value` to every current subscriber. Ordinary, synchronous
    /// call — safe to invoke from a callback with no frame of its own.
    /// `UnboundedSender::send` never awaits, so this enqueues into the
    /// mailbox in exactly the order it was called, even when two
    /// separate host threads race to call it.
    pub fn send(&self, value: T) {
        if self.scope.is_terminal() {
            log::trace!("signal send dropped: owning scope {} already terminal", self.scope.id());
            return;
        }
        let _ = self.mailbox.send(Mail::Send(value));
    }

    /// Closes the underlying channel with `close_value`. Also silently
    /// dropped once the owning scope has ended.
    pub fn close(&self, close_value: C) {
        if self.scope.is_terminal() {
            log::trace!("signal close dropped: owning scope {} already terminal", self.scope.id());
            return;
        }
        let _ = self.mailbox.send(Mail::Close(close_value));
    }

    /// Subscribes to this signal's values from within `frame`, scoped to
    /// that frame exactly like [`Channel::subscribe`].
    pub async fn subscribe(&self, frame: &Frame) -> crate::channel::Subscription<T, C> {
        self.channel.subscribe(frame).await
    }
}
