use crate::error::{Error, Result};
use crate::k8s::kinds::ObjectKind;
use k8s_openapi::serde_json;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use std::fmt;

/// Identity of a cached object. Orders by kind, then namespace, then name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn new(kind: ObjectKind, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.map(ToString::to_string),
            name: name.to_string(),
        }
    }

    /// Key string that subscription patterns are matched against, `pod:default:web-0`
    #[must_use]
    pub fn pattern_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.kind.key(),
            self.namespace.as_deref().unwrap_or(""),
            self.name
        )
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// A remotely owned record mirrored into the cache
#[derive(Debug, Clone)]
pub struct WatchedObject {
    pub kind: ObjectKind,
    pub namespace: Option<String>,
    pub name: String,
    pub resource_version: Option<String>,
    pub payload: DynamicObject,
}

impl WatchedObject {
    /// Wrap an object received from the API server
    ///
    /// # Errors
    ///
    /// Returns an error if the object carries no name
    pub fn from_dynamic(kind: ObjectKind, payload: DynamicObject) -> Result<Self> {
        let name = payload
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::Custom(format!("{kind} object without metadata.name")))?;

        Ok(Self {
            kind,
            namespace: if kind.is_namespaced() {
                payload.namespace()
            } else {
                None
            },
            name,
            resource_version: payload.resource_version(),
            payload,
        })
    }

    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Decode the payload into its typed `k8s-openapi` form
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `K`'s schema
    pub fn decode<K: DeserializeOwned>(&self) -> Result<K> {
        let mut value = serde_json::to_value(&self.payload)?;
        // DynamicObject drops `kind`/`apiVersion` when its types are unset
        if let Some(map) = value.as_object_mut() {
            let resource = self.kind.api_resource();
            map.entry("apiVersion")
                .or_insert_with(|| serde_json::Value::String(resource.api_version));
            map.entry("kind")
                .or_insert_with(|| serde_json::Value::String(resource.kind));
        }
        Ok(serde_json::from_value(value)?)
    }
}
