use clap::ValueEnum;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{Event, Namespace, Pod};
use kube::core::ApiResource;
use std::fmt;

/// Object kinds the synchronizer knows how to mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum ObjectKind {
    Pod,
    #[value(name = "replicaset", alias = "rs")]
    ReplicaSet,
    Event,
    #[value(alias = "ns")]
    Namespace,
}

impl ObjectKind {
    pub const ALL: [Self; 4] = [Self::Pod, Self::ReplicaSet, Self::Event, Self::Namespace];

    /// Short lowercase key used in cache keys and log lines
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::ReplicaSet => "replicaset",
            Self::Event => "event",
            Self::Namespace => "namespace",
        }
    }

    /// `kind` field as the API server spells it
    #[must_use]
    pub const fn api_kind(self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::ReplicaSet => "ReplicaSet",
            Self::Event => "Event",
            Self::Namespace => "Namespace",
        }
    }

    #[must_use]
    pub const fn is_namespaced(self) -> bool {
        !matches!(self, Self::Namespace)
    }

    #[must_use]
    pub fn api_resource(self) -> ApiResource {
        match self {
            Self::Pod => ApiResource::erase::<Pod>(&()),
            Self::ReplicaSet => ApiResource::erase::<ReplicaSet>(&()),
            Self::Event => ApiResource::erase::<Event>(&()),
            Self::Namespace => ApiResource::erase::<Namespace>(&()),
        }
    }

    /// Reverse of [`Self::api_kind`]
    #[must_use]
    pub fn from_api_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.api_kind() == kind)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_kind())
    }
}
