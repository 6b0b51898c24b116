use crate::error::Result;
use crate::k8s::cache::{ObjectCache, ObjectKey, WatchedObject};
use crate::k8s::kinds::ObjectKind;
use std::sync::Arc;

/// Which namespaces a snapshot query covers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NamespaceFilter {
    /// Every namespace, plus cluster-scoped objects
    #[default]
    All,
    Namespace(String),
}

impl NamespaceFilter {
    /// The empty string and `*` mean all namespaces
    #[must_use]
    pub fn parse(namespace: &str) -> Self {
        match namespace.trim() {
            "" | "*" => Self::All,
            ns => Self::Namespace(ns.to_string()),
        }
    }

    #[must_use]
    pub fn matches(&self, namespace: Option<&str>) -> bool {
        match self {
            Self::All => true,
            Self::Namespace(ns) => namespace == Some(ns.as_str()),
        }
    }
}

impl From<Option<String>> for NamespaceFilter {
    fn from(namespace: Option<String>) -> Self {
        namespace.map_or(Self::All, |ns| Self::parse(&ns))
    }
}

/// Point-in-time queries against a synchronized cache
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    cache: Arc<ObjectCache>,
}

impl SnapshotReader {
    #[must_use]
    pub const fn new(cache: Arc<ObjectCache>) -> Self {
        Self { cache }
    }

    /// Every cached object of `kind` in the namespaces selected by `filter`
    ///
    /// # Errors
    ///
    /// `NotReady` if `kind` has not completed its initial listing; `Query` if its
    /// synchronizer has since given up
    pub async fn list(&self, kind: ObjectKind, filter: &NamespaceFilter) -> Result<Vec<WatchedObject>> {
        self.cache.list(kind, filter).await
    }

    /// One cached object, if present
    ///
    /// # Errors
    ///
    /// Same readiness rules as [`Self::list`]
    pub async fn get(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<WatchedObject>> {
        let namespace = if kind.is_namespaced() { namespace } else { None };
        self.cache.get(&ObjectKey::new(kind, namespace, name)).await
    }
}

/// One display line per object: `Pod Name: web-0, Namespace: default`
#[must_use]
pub fn render(objects: &[WatchedObject]) -> Vec<String> {
    objects.iter().map(render_line).collect()
}

#[must_use]
pub fn render_line(object: &WatchedObject) -> String {
    format!(
        "{} Name: {}, Namespace: {}",
        object.kind,
        object.name,
        object.namespace.as_deref().unwrap_or_default()
    )
}
