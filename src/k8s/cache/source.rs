use super::config::WATCH_TIMEOUT_SECONDS;
use super::object::WatchedObject;
use crate::error::{Error, Result};
use crate::k8s::kinds::ObjectKind;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::{Api, DynamicObject, ListParams, WatchEvent, WatchParams};
use kube::Client;
use tracing::debug;

/// A full listing of one kind
#[derive(Debug, Clone, Default)]
pub struct ListSnapshot {
    pub objects: Vec<WatchedObject>,
    pub resource_version: Option<String>,
}

/// One item of an incremental change stream
#[derive(Debug, Clone)]
pub enum WatchChange {
    Applied(WatchedObject),
    Deleted(WatchedObject),
    /// The server confirmed progress up to this resource version
    Bookmark(String),
}

pub type ChangeStream = BoxStream<'static, Result<WatchChange>>;

/// Where the synchronizer gets cluster state from
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Full listing of `kind`
    async fn list(&self, kind: ObjectKind) -> Result<ListSnapshot>;

    /// Change stream for `kind` starting after `resource_version`.
    ///
    /// The stream ends cleanly when the server closes the watch window; an
    /// `Err` item means the subscription can not be resumed from where it was.
    async fn watch(&self, kind: ObjectKind, resource_version: &str) -> Result<ChangeStream>;
}

/// [`ObjectSource`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSource {
    client: Client,
    namespace: Option<String>,
    watch_timeout: u32,
}

impl KubeSource {
    /// Source reading across all namespaces
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self {
            client,
            namespace: None,
            watch_timeout: WATCH_TIMEOUT_SECONDS,
        }
    }

    /// Restrict namespaced kinds to `namespace`; cluster-scoped kinds are unaffected
    #[must_use]
    pub fn scoped_to(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    fn api(&self, kind: ObjectKind) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match (&self.namespace, kind.is_namespaced()) {
            (Some(ns), true) => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }
}

impl std::fmt::Debug for KubeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSource")
            .field("namespace", &self.namespace)
            .field("watch_timeout", &self.watch_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ObjectSource for KubeSource {
    async fn list(&self, kind: ObjectKind) -> Result<ListSnapshot> {
        let list = self.api(kind).list(&ListParams::default()).await?;
        debug!("📋 Listed {} {} objects", list.items.len(), kind);

        let objects = list
            .items
            .into_iter()
            .map(|obj| WatchedObject::from_dynamic(kind, obj))
            .collect::<Result<Vec<_>>>()?;

        Ok(ListSnapshot {
            objects,
            resource_version: list.metadata.resource_version,
        })
    }

    async fn watch(&self, kind: ObjectKind, resource_version: &str) -> Result<ChangeStream> {
        let wp = WatchParams::default().timeout(self.watch_timeout);
        let stream = self.api(kind).watch(&wp, resource_version).await?;

        Ok(stream
            .map(move |event| match event {
                Ok(event) => convert_event(kind, event),
                Err(e) => Err(Error::Kube(e)),
            })
            .boxed())
    }
}

/// Translate a raw watch event into a cache change
///
/// # Errors
///
/// Server-side `Error` events (e.g. 410 Gone once the resource version is compacted) become
/// `Error::Query` so the caller knows to re-list.
pub fn convert_event(kind: ObjectKind, event: WatchEvent<DynamicObject>) -> Result<WatchChange> {
    match event {
        WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
            WatchedObject::from_dynamic(kind, obj).map(WatchChange::Applied)
        }
        WatchEvent::Deleted(obj) => WatchedObject::from_dynamic(kind, obj).map(WatchChange::Deleted),
        WatchEvent::Bookmark(bookmark) => Ok(WatchChange::Bookmark(bookmark.metadata.resource_version)),
        WatchEvent::Error(e) => Err(Error::Query {
            kind,
            message: format!("watch error {}: {}", e.code, e.message),
        }),
    }
}
