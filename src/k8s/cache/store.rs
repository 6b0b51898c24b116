use super::kind_state::{KindState, SyncStatus};
use super::object::{ObjectKey, WatchedObject};
use super::subscription::{CacheEvent, SubscriptionManager};
use crate::error::{Error, Result};
use crate::k8s::kinds::ObjectKind;
use crate::k8s::snapshot::NamespaceFilter;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// In-memory mirror of cluster objects, written by the synchronizer only
#[derive(Debug)]
pub struct ObjectCache {
    inner: RwLock<Inner>,
    pub subscription_manager: Arc<SubscriptionManager>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, WatchedObject>,
    kinds: BTreeMap<ObjectKind, KindState>,
}

impl Inner {
    /// Check that `kind` can serve reads
    fn ensure_readable(&self, kind: ObjectKind) -> Result<()> {
        match self.kinds.get(&kind) {
            Some(state) if state.ready => match &state.status {
                SyncStatus::Failed(message) => Err(Error::Query {
                    kind,
                    message: message.clone(),
                }),
                _ => Ok(()),
            },
            _ => Err(Error::NotReady(kind)),
        }
    }

    fn keys_of(&self, kind: ObjectKind) -> impl Iterator<Item = &ObjectKey> {
        self.objects
            .range(ObjectKey::new(kind, None, "")..)
            .map(|(key, _)| key)
            .take_while(move |key| key.kind == kind)
    }
}

/// Change applied from an incremental stream
#[derive(Debug, Clone)]
pub enum ObjectChange {
    Applied(WatchedObject),
    Deleted(WatchedObject),
}

impl ObjectCache {
    /// Create a cache that will mirror `kinds`; every kind starts not ready
    #[must_use]
    pub fn new(kinds: &[ObjectKind]) -> Self {
        let kinds = kinds.iter().map(|k| (*k, KindState::new())).collect();
        Self {
            inner: RwLock::new(Inner {
                objects: BTreeMap::new(),
                kinds,
            }),
            subscription_manager: Arc::new(SubscriptionManager::new()),
        }
    }

    /// Replace every cached object of `kind` with a fresh listing and mark the kind ready
    #[allow(clippy::significant_drop_tightening)]
    pub async fn replace_kind(
        &self,
        kind: ObjectKind,
        objects: Vec<WatchedObject>,
        resource_version: Option<String>,
    ) -> usize {
        let count = objects.len();
        {
            let mut inner = self.inner.write().await;
            let fresh: HashSet<ObjectKey> = objects.iter().map(WatchedObject::key).collect();
            let stale: Vec<ObjectKey> = inner
                .keys_of(kind)
                .filter(|key| !fresh.contains(*key))
                .cloned()
                .collect();
            for key in &stale {
                inner.objects.remove(key);
            }
            for obj in objects {
                inner.objects.insert(obj.key(), obj);
            }
            inner
                .kinds
                .entry(kind)
                .or_default()
                .mark_listed(resource_version.clone());

            info!(
                "💾 {} cache listed: {} objects ({} dropped) at resourceVersion {}",
                kind,
                count,
                stale.len(),
                resource_version.as_deref().unwrap_or("-")
            );
        }

        self.subscription_manager
            .notify(&CacheEvent::Relisted { kind, count })
            .await;
        count
    }

    /// Apply one incremental change; the stream is ordered, so the latest event replaces the cached object
    pub async fn apply(&self, change: ObjectChange) {
        let event = {
            let mut inner = self.inner.write().await;
            match change {
                ObjectChange::Applied(obj) => {
                    debug!("⚡ APPLY {} @ {:?}", obj.key(), obj.resource_version);
                    if let Some(state) = inner.kinds.get_mut(&obj.kind) {
                        state.observe_version(obj.resource_version.clone());
                    }
                    inner.objects.insert(obj.key(), obj.clone());
                    CacheEvent::Applied(obj)
                }
                ObjectChange::Deleted(obj) => {
                    debug!("🗑️  DELETE {}", obj.key());
                    if let Some(state) = inner.kinds.get_mut(&obj.kind) {
                        state.observe_version(obj.resource_version.clone());
                    }
                    inner.objects.remove(&obj.key());
                    CacheEvent::Deleted(obj)
                }
            }
        };

        self.subscription_manager.notify(&event).await;
    }

    /// Record a bookmark without touching any object
    pub async fn observe_version(&self, kind: ObjectKind, resource_version: String) {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.kinds.get_mut(&kind) {
            state.observe_version(Some(resource_version));
        }
    }

    pub async fn mark_resyncing(&self, kind: ObjectKind) {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.kinds.get_mut(&kind) {
            state.mark_resyncing();
        }
    }

    pub async fn mark_failed(&self, kind: ObjectKind, error: String) {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.kinds.get_mut(&kind) {
            state.mark_failed(error);
        }
    }

    pub async fn kind_state(&self, kind: ObjectKind) -> Option<KindState> {
        self.inner.read().await.kinds.get(&kind).cloned()
    }

    pub async fn is_ready(&self, kind: ObjectKind) -> bool {
        self.inner
            .read()
            .await
            .kinds
            .get(&kind)
            .is_some_and(|s| s.ready)
    }

    /// Last resource version seen for `kind`, from a listing, event or bookmark
    pub async fn resource_version(&self, kind: ObjectKind) -> Option<String> {
        self.inner
            .read()
            .await
            .kinds
            .get(&kind)
            .and_then(|s| s.resource_version.clone())
    }

    /// Snapshot every object of `kind` whose namespace passes `filter`, in key order
    ///
    /// # Errors
    ///
    /// `NotReady` before the initial listing, `Query` once the kind's watch has been abandoned
    pub async fn list(&self, kind: ObjectKind, filter: &NamespaceFilter) -> Result<Vec<WatchedObject>> {
        let inner = self.inner.read().await;
        inner.ensure_readable(kind)?;

        let objects = match filter {
            NamespaceFilter::All => inner
                .objects
                .range(ObjectKey::new(kind, None, "")..)
                .take_while(|(key, _)| key.kind == kind)
                .map(|(_, obj)| obj.clone())
                .collect(),
            NamespaceFilter::Namespace(ns) => inner
                .objects
                .range(ObjectKey::new(kind, Some(ns.as_str()), "")..)
                .take_while(|(key, _)| {
                    key.kind == kind && key.namespace.as_deref() == Some(ns.as_str())
                })
                .map(|(_, obj)| obj.clone())
                .collect(),
        };
        Ok(objects)
    }

    /// Look up one object
    ///
    /// # Errors
    ///
    /// Same readiness rules as [`Self::list`]
    pub async fn get(&self, key: &ObjectKey) -> Result<Option<WatchedObject>> {
        let inner = self.inner.read().await;
        inner.ensure_readable(key.kind)?;
        Ok(inner.objects.get(key).cloned())
    }

    #[allow(clippy::significant_drop_tightening)]
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;

        let mut objects_per_kind = BTreeMap::new();
        for key in inner.objects.keys() {
            *objects_per_kind.entry(key.kind).or_insert(0) += 1;
        }

        CacheStats {
            total_objects: inner.objects.len(),
            objects_per_kind,
            ready_kinds: inner.kinds.values().filter(|s| s.ready).count(),
            pending_kinds: inner.kinds.values().filter(|s| !s.ready).count(),
            failed_kinds: inner
                .kinds
                .values()
                .filter(|s| matches!(s.status, SyncStatus::Failed(_)))
                .count(),
            relists: inner.kinds.values().map(|s| s.relists).sum(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_objects: usize,
    pub objects_per_kind: BTreeMap<ObjectKind, usize>,
    pub ready_kinds: usize,
    pub pending_kinds: usize,
    pub failed_kinds: usize,
    pub relists: u64,
}
