#![allow(dead_code)]
//! In-memory object source for driving the synchronizer without a cluster

use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use k8s_openapi::serde_json::{self, json};
use kube::api::DynamicObject;
use podcache::error::{Error, Result};
use podcache::k8s::cache::{
    ChangeStream, ListSnapshot, ObjectSource, SyncConfig, WatchChange, WatchedObject,
};
use podcache::k8s::kinds::ObjectKind;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub type WatchSender = mpsc::UnboundedSender<Result<WatchChange>>;

/// Scripted responses per kind. A `list` or `watch` with nothing queued never completes,
/// like a cluster that does not answer.
#[derive(Default)]
pub struct FakeSource {
    lists: Mutex<HashMap<ObjectKind, VecDeque<oneshot::Receiver<Result<ListSnapshot>>>>>,
    watches: Mutex<HashMap<ObjectKind, VecDeque<mpsc::UnboundedReceiver<Result<WatchChange>>>>>,
    watch_calls: Mutex<Option<tokio::sync::mpsc::UnboundedSender<(ObjectKind, String)>>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a listing answered immediately
    pub fn push_list(&self, kind: ObjectKind, result: Result<ListSnapshot>) {
        let _ = self.defer_list(kind).send(result);
    }

    /// Queue a listing answered when the returned sender fires
    pub fn defer_list(&self, kind: ObjectKind) -> oneshot::Sender<Result<ListSnapshot>> {
        let (tx, rx) = oneshot::channel();
        self.lists
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(rx);
        tx
    }

    /// Queue a change stream; it stays open until the sender is dropped
    pub fn push_watch(&self, kind: ObjectKind) -> WatchSender {
        let (tx, rx) = mpsc::unbounded();
        self.watches
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(rx);
        tx
    }

    /// Report every watch call as `(kind, resourceVersion)`
    pub fn record_watch_calls(&self) -> tokio::sync::mpsc::UnboundedReceiver<(ObjectKind, String)> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        *self.watch_calls.lock().unwrap() = Some(tx);
        rx
    }
}

#[async_trait]
impl ObjectSource for FakeSource {
    async fn list(&self, kind: ObjectKind) -> Result<ListSnapshot> {
        let next = self
            .lists
            .lock()
            .unwrap()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);
        match next {
            Some(rx) => match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::Custom("listing abandoned".to_string())),
            },
            None => futures::future::pending().await,
        }
    }

    async fn watch(&self, kind: ObjectKind, resource_version: &str) -> Result<ChangeStream> {
        if let Some(calls) = self.watch_calls.lock().unwrap().as_ref() {
            let _ = calls.send((kind, resource_version.to_string()));
        }
        let next = self
            .watches
            .lock()
            .unwrap()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);
        Ok(match next {
            Some(rx) => rx.boxed(),
            None => futures::stream::pending().boxed(),
        })
    }
}

pub fn pod(namespace: &str, name: &str, rv: &str) -> WatchedObject {
    let payload: DynamicObject = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": namespace, "resourceVersion": rv }
    }))
    .unwrap();
    WatchedObject::from_dynamic(ObjectKind::Pod, payload).unwrap()
}

pub fn namespace(name: &str) -> WatchedObject {
    let payload: DynamicObject = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name, "resourceVersion": "1" }
    }))
    .unwrap();
    WatchedObject::from_dynamic(ObjectKind::Namespace, payload).unwrap()
}

pub fn snapshot(objects: Vec<WatchedObject>, rv: &str) -> ListSnapshot {
    ListSnapshot {
        objects,
        resource_version: Some(rv.to_string()),
    }
}

/// Three pods in `default`, one in `kube-system`
pub fn scenario_pods() -> Vec<WatchedObject> {
    vec![
        pod("default", "web-0", "11"),
        pod("default", "web-1", "12"),
        pod("default", "worker", "13"),
        pod("kube-system", "coredns", "14"),
    ]
}

/// Backoff short enough for tests
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        max_watch_restarts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
    }
}
