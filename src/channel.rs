// SPDX-License-Identifier: Apache-2.0

//! Multi-subscriber, back-pressured channels (`Channel`, `Subscription`).
//! Built on an `Arc<RwLock<Vec<_>>>` of per-listener `mpsc` senders,
//! combined with [`crate::shutdown::ShutdownStream`] to scope a
//! subscription's lifetime to the frame that created it.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use crate::{error::Error, frame::Frame, shutdown::ShutdownStream};

/// An item delivered to a subscriber: either a value produced before the
/// channel closed, or the terminal marker carrying the close value `C`
/// (`Subscription<T, C>`).
enum Delivery<T, C> {
    Value(T),
    Close(C),
}

/// What [`Subscription::next`] returns: a value, or the terminal marker,
/// delivered exactly once and then repeated forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next<T, C> {
    /// A value produced by the channel.
    Value(T),
    /// The channel closed with this value. Once observed, every later call
    /// to `next()` returns this same variant again.
    Done(C),
}

struct Inner<C> {
    close: RwLock<Option<C>>,
}

/// A fan-out channel: every value sent is delivered to every subscriber
/// currently attached, each through its own bounded queue. A slow
/// subscriber back-pressures only the sender, never the other
/// subscribers.
pub struct Channel<T, C> {
    subscribers: Arc<RwLock<Vec<mpsc::Sender<Delivery<T, C>>>>>,
    inner: Arc<Inner<C>>,
    capacity: usize,
}

impl<T, C> Clone for Channel<T, C> {
    fn clone(&self) -> Self {
        Channel {
            subscribers: self.subscribers.clone(),
            inner: self.inner.clone(),
            capacity: self.capacity,
        }
    }
}

/// Creates a channel whose subscriptions each buffer up to `capacity`
/// unread values before `send` blocks (`createChannel`).
pub fn create_channel<T, C>(capacity: usize) -> Channel<T, C>
where
    T: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    Channel {
        subscribers: Arc::new(RwLock::new(Vec::new())),
        inner: Arc::new(Inner { close: RwLock::new(None) }),
        capacity,
    }
}

/// Creates a channel using `frame`'s scope's configured default capacity
/// (`channel_capacity`) instead of an explicit one.
pub fn create_channel_default<T, C>(frame: &Frame) -> Channel<T, C>
where
    T: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    create_channel(frame.scope().config().channel_capacity)
}

impl<T, C> Channel<T, C>
where
    T: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    /// Delivers `value` to every subscriber live at this instant. A
    /// subscription that starts after this call never observes `value`
    /// (ordering guarantee). A no-op once the channel has
    /// closed.
    pub async fn send(&self, value: T) -> Result<(), Error> {
        if self.inner.close.read().await.is_some() {
            return Ok(());
        }
        let mut subscribers = self.subscribers.write().await;
        let mut index = 0;
        while index < subscribers.len() {
            match subscribers[index].send(Delivery::Value(value.clone())).await {
                Ok(()) => index += 1,
                Err(_) => {
                    subscribers.remove(index);
                }
            }
        }
        Ok(())
    }

    /// Delivers the terminal marker carrying `close_value` to every live
    /// subscriber, then makes every later `send` a no-op. Idempotent: only
    /// the first close value is recorded and delivered.
    pub async fn close(&self, close_value: C) {
        let mut close = self.inner.close.write().await;
        if close.is_some() {
            return;
        }
        *close = Some(close_value.clone());
        drop(close);

        let mut subscribers = self.subscribers.write().await;
        for tx in subscribers.drain(..) {
            let _ = tx.send(Delivery::Close(close_value.clone())).await;
        }
    }

    /// Opens a new subscription. The subscription's stream ends when
    /// either the channel closes or `frame` itself tears down — a
    /// subscription never outlives the frame that created it, and its
    /// queue is deregistered and dropped as soon as that frame unwinds,
    /// not merely pruned the next time something happens to `send`.
    pub async fn subscribe(&self, frame: &Frame) -> Subscription<T, C> {
        let (tx, rx) = mpsc::channel(self.capacity.max(1));

        // A channel already closed before this subscription existed still
        // delivers the close value: a late subscriber must observe
        // *some* terminal state, just never a pre-subscription value.
        if let Some(close_value) = self.inner.close.read().await.clone() {
            let _ = tx.send(Delivery::Close(close_value)).await;
        } else {
            self.subscribers.write().await.push(tx.clone());
        }

        let (stream, handle) = ShutdownStream::new(ReceiverStream::new(rx));
        let subscribers = self.subscribers.clone();
        frame
            .ensure_async(move |_f: Frame| async move {
                handle.shutdown();
                subscribers.write().await.retain(|s| !s.same_channel(&tx));
                Ok(())
            })
            .await;

        Subscription { inner: stream, done: None }
    }
}

/// A single subscriber's view of a [`Channel`]. Owned by the frame that
/// created it via [`Channel::subscribe`].
pub struct Subscription<T, C> {
    inner: ShutdownStream<ReceiverStream<Delivery<T, C>>>,
    done: Option<C>,
}

impl<T, C: Clone> Subscription<T, C> {
    /// Produces the next value, or the terminal marker exactly once and
    /// then forever after (`subscription.next()`). Returns
    /// `None` only if the owning frame was torn down before the channel
    /// ever closed.
    pub async fn next(&mut self) -> Option<Next<T, C>> {
        if let Some(c) = &self.done {
            return Some(Next::Done(c.clone()));
        }
        match self.inner.next().await {
            Some(Delivery::Value(v)) => Some(Next::Value(v)),
            Some(Delivery::Close(c)) => {
                self.done = Some(c.clone());
                Some(Next::Done(c))
            }
            None => None,
        }
    }
}
