//! Live query subscriptions.
//!
//! The registry maps subscription ids to bounded channels. The transport's
//! reader routes every notification through [`LiveRegistry::route`]; pushes for
//! ids nobody subscribed to are dropped with a warning.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::protocol::{Action, Notification};

#[derive(Debug, Clone, Default)]
pub struct LiveRegistry {
    subscriptions: Arc<Mutex<HashMap<Uuid, mpsc::Sender<Notification>>>>,
}

impl LiveRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<Notification>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start buffering notifications for `id`.
    #[must_use]
    pub fn register(&self, id: Uuid, capacity: usize) -> LiveStream {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.lock().insert(id, tx);
        LiveStream { id, rx }
    }

    /// Stop routing notifications for `id`; its stream ends once drained.
    pub fn unregister(&self, id: &Uuid) -> bool {
        self.lock().remove(id).is_some()
    }

    #[must_use]
    pub fn contains(&self, id: &Uuid) -> bool {
        self.lock().contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver a notification to its subscriber.
    ///
    /// Returns false when the notification was dropped.
    pub fn route(&self, notification: Notification) -> bool {
        let id = notification.id;
        let killed = notification.action == Action::Killed;
        let mut subscriptions = self.lock();

        let Some(tx) = subscriptions.get(&id) else {
            tracing::warn!("Dropping notification for unknown live query {id}");
            return false;
        };

        let delivered = match tx.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Live query {id} is not keeping up; dropping notification");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Live query {id} stream was dropped; unregistering");
                subscriptions.remove(&id);
                return false;
            }
        };

        if killed {
            subscriptions.remove(&id);
        }
        delivered
    }

    /// End every stream, e.g. when the channel closes.
    pub fn close_all(&self) {
        let mut subscriptions = self.lock();
        if !subscriptions.is_empty() {
            tracing::debug!("Ending {} live query streams", subscriptions.len());
        }
        subscriptions.clear();
    }
}

/// Notifications for one live query.
///
/// Ends when the query is killed or the connection closes.
#[derive(Debug)]
pub struct LiveStream {
    id: Uuid,
    rx: mpsc::Receiver<Notification>,
}

impl LiveStream {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn next(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}

impl Stream for LiveStream {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surql_types::Value;

    fn notification(id: Uuid, action: Action) -> Notification {
        Notification {
            id,
            action,
            record: Value::from("person:1"),
            result: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_routes_to_subscriber() {
        let registry = LiveRegistry::new();
        let id = Uuid::new_v4();
        let mut stream = registry.register(id, 4);

        assert!(registry.route(notification(id, Action::Create)));
        let received = stream.next().await.unwrap();
        assert_eq!(received.action, Action::Create);
    }

    #[test]
    fn test_unknown_id_is_dropped() {
        let registry = LiveRegistry::new();
        let _stream = registry.register(Uuid::new_v4(), 4);
        assert!(!registry.route(notification(Uuid::new_v4(), Action::Update)));
    }

    #[test]
    fn test_full_channel_drops() {
        let registry = LiveRegistry::new();
        let id = Uuid::new_v4();
        let _stream = registry.register(id, 1);

        assert!(registry.route(notification(id, Action::Create)));
        assert!(!registry.route(notification(id, Action::Update)));
        assert!(registry.contains(&id));
    }

    #[test]
    fn test_dropped_stream_unregisters() {
        let registry = LiveRegistry::new();
        let id = Uuid::new_v4();
        drop(registry.register(id, 4));

        assert!(!registry.route(notification(id, Action::Create)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_killed_ends_subscription() {
        let registry = LiveRegistry::new();
        let id = Uuid::new_v4();
        let mut stream = registry.register(id, 4);

        assert!(registry.route(notification(id, Action::Killed)));
        assert!(!registry.contains(&id));
        assert_eq!(stream.next().await.unwrap().action, Action::Killed);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let registry = LiveRegistry::new();
        let mut first = registry.register(Uuid::new_v4(), 4);
        let mut second = registry.register(Uuid::new_v4(), 4);
        assert_eq!(registry.len(), 2);

        registry.close_all();
        assert!(first.next().await.is_none());
        assert!(second.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = LiveRegistry::new();
        let id = Uuid::new_v4();
        let mut stream = registry.register(id, 4);

        assert!(registry.unregister(&id));
        assert!(!registry.unregister(&id));
        assert!(stream.next().await.is_none());
    }
}
