use super::object::WatchedObject;
use crate::k8s::kinds::ObjectKind;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::config::SUBSCRIPTION_CHANNEL_CAPACITY;

/// A mutation the synchronizer applied to the cache
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Applied(WatchedObject),
    Deleted(WatchedObject),
    Relisted { kind: ObjectKind, count: usize },
}

impl CacheEvent {
    /// Key matched against subscription patterns
    #[must_use]
    pub fn pattern_key(&self) -> String {
        match self {
            Self::Applied(obj) | Self::Deleted(obj) => obj.key().pattern_key(),
            Self::Relisted { kind, .. } => format!("{}:", kind.key()),
        }
    }
}

pub struct Subscription {
    pub id: String,
    pub pattern: String,
    pub sender: mpsc::Sender<CacheEvent>,
}

impl Subscription {
    #[must_use]
    pub fn new(pattern: String) -> (Self, mpsc::Receiver<CacheEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_CAPACITY);
        let id = Uuid::new_v4().to_string();

        (
            Self {
                id,
                pattern,
                sender: tx,
            },
            rx,
        )
    }
}

#[derive(Default)]
pub struct SubscriptionManager {
    subscriptions: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager").finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in cache events whose key matches `pattern`
    ///
    /// Keys look like `pod:default:web-0`; a relist of a kind is keyed `pod:`.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn subscribe(&self, pattern: String) -> (String, mpsc::Receiver<CacheEvent>) {
        let (subscription, receiver) = Subscription::new(pattern.clone());
        let id = subscription.id.clone();

        let mut subs = self.subscriptions.write().await;
        subs.entry(pattern).or_default().push(subscription);

        (id, receiver)
    }

    pub async fn unsubscribe(&self, subscription_id: &str) {
        let mut subs = self.subscriptions.write().await;

        for subscriptions in subs.values_mut() {
            subscriptions.retain(|s| s.id != subscription_id);
        }

        subs.retain(|_, v| !v.is_empty());
    }

    /// Fan an event out to matching subscribers without waiting on slow receivers
    pub async fn notify(&self, event: &CacheEvent) {
        let key = event.pattern_key();
        let mut closed = Vec::new();
        {
            let subs = self.subscriptions.read().await;
            for (pattern, subscriptions) in subs.iter() {
                if !Self::pattern_matches(pattern, &key) {
                    continue;
                }
                for subscription in subscriptions {
                    match subscription.sender.try_send(event.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            debug!("Subscriber {} lagging, dropped event for {}", subscription.id, key);
                        }
                        Err(TrySendError::Closed(_)) => closed.push(subscription.id.clone()),
                    }
                }
            }
        }

        for id in closed {
            self.unsubscribe(&id).await;
        }
    }

    #[must_use]
    pub fn pattern_matches(pattern: &str, key: &str) -> bool {
        if pattern == "*" || pattern == key {
            return true;
        }

        // "pod:default:*" matches "pod:default:web-0"
        pattern
            .strip_suffix('*')
            .is_some_and(|prefix| key.starts_with(prefix))
    }

    pub async fn active_subscriptions(&self) -> usize {
        let subs = self.subscriptions.read().await;
        subs.values().map(Vec::len).sum()
    }
}
