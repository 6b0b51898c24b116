/**
 * Cache Synchronizer
 *
 * Runs one background task per watched kind. Each task lists the kind,
 * publishes readiness, then follows the change stream until cancelled,
 * re-listing with backoff whenever the stream breaks.
 */
use super::config::SyncConfig;
use super::readiness::{ReadinessGate, ReadinessSignal};
use super::source::{KubeSource, ObjectSource, WatchChange};
use super::store::{ObjectCache, ObjectChange};
use crate::error::{Error, Result};
use crate::k8s::client::{self, Credentials};
use crate::k8s::kinds::ObjectKind;
use crate::k8s::snapshot::SnapshotReader;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Resource version to watch from when a listing carries none
const ANY_RESOURCE_VERSION: &str = "0";

/// What a kind task does next
#[derive(Debug)]
enum Next {
    Relist,
    Watch(String),
    Stop,
}

/// Owns the background tasks that keep an [`ObjectCache`] current
pub struct CacheSynchronizer {
    cache: Arc<ObjectCache>,
    gate: ReadinessGate,
    cancel: CancellationToken,
    stopped: AtomicBool,
    running: Arc<AtomicUsize>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Decrements the live task count when a kind task exits, including by panic
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CacheSynchronizer {
    /// Connect to the cluster described by `credentials` and start mirroring `kinds`
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if no API client can be built from the credentials
    pub fn connect(
        credentials: &Credentials,
        kinds: &[ObjectKind],
        namespace: Option<String>,
        config: SyncConfig,
    ) -> Result<Self> {
        let client = client::connect(credentials)?;
        info!("🔌 Connected to {} ({:?})", credentials.cluster_url(), credentials.source());
        let source = KubeSource::new(client).scoped_to(namespace);
        Ok(Self::start(Arc::new(source), kinds, config))
    }

    /// Start mirroring `kinds` from `source`. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(source: Arc<dyn ObjectSource>, kinds: &[ObjectKind], config: SyncConfig) -> Self {
        let (gate, signals) = ReadinessGate::new(kinds);
        let cache = Arc::new(ObjectCache::new(&gate.kinds()));
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(signals.len()));

        let tasks = signals
            .into_iter()
            .map(|signal| {
                let task = KindTask {
                    kind: signal.kind(),
                    source: source.clone(),
                    cache: cache.clone(),
                    config: config.clone(),
                    cancel: cancel.clone(),
                };
                let guard = RunningGuard(running.clone());
                tokio::spawn(async move {
                    let _guard = guard;
                    task.run(signal).await;
                })
            })
            .collect();

        info!("🔍 Cache synchronizer started for {:?}", gate.kinds());

        Self {
            cache,
            gate,
            cancel,
            stopped: AtomicBool::new(false),
            running,
            tasks: Mutex::new(tasks),
        }
    }

    #[must_use]
    pub fn cache(&self) -> Arc<ObjectCache> {
        self.cache.clone()
    }

    #[must_use]
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader::new(self.cache.clone())
    }

    #[must_use]
    pub fn gate(&self) -> ReadinessGate {
        self.gate.clone()
    }

    /// Block until every kind completed its initial listing, or `timeout` elapses
    ///
    /// # Errors
    ///
    /// Returns `Error::InitialList` if any kind failed its initial listing
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<bool> {
        self.gate.wait_timeout(timeout).await
    }

    /// Like [`Self::wait_until_ready`], but a timeout is an error naming the pending kinds
    ///
    /// # Errors
    ///
    /// `Error::SyncTimeout` on timeout, `Error::InitialList` on listing failure
    pub async fn require_ready(&self, timeout: Duration) -> Result<()> {
        if self.wait_until_ready(timeout).await? {
            Ok(())
        } else {
            Err(Error::SyncTimeout {
                pending: self.gate.pending(),
                waited: timeout,
            })
        }
    }

    /// Signal every kind task to exit. Returns `false` if already stopped.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("🛑 Stopping cache synchronizer");
        self.cancel.cancel();
        true
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// True once every kind task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.running.load(Ordering::SeqCst) == 0
    }

    /// Wait for every kind task to exit
    pub async fn join(&self) {
        let handles = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Synchronizer task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CacheSynchronizer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for CacheSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSynchronizer")
            .field("kinds", &self.gate.kinds())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// Background work for a single kind
struct KindTask {
    kind: ObjectKind,
    source: Arc<dyn ObjectSource>,
    cache: Arc<ObjectCache>,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl KindTask {
    async fn run(self, signal: ReadinessSignal) {
        let kind = self.kind;
        info!("🔍 Starting {} synchronizer", kind);

        let listed = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                info!("🔍 {} synchronizer cancelled before initial listing", kind);
                return;
            }
            listed = self.relist() => listed,
        };

        let mut next = match listed {
            Ok(next) => {
                signal.ready();
                next
            }
            Err(e) => {
                error!("❌ Initial {} listing failed: {}", kind, e);
                self.cache.mark_failed(kind, e.to_string()).await;
                signal.fail(e.to_string());
                return;
            }
        };

        let mut failures: u32 = 0;
        loop {
            let step = match next {
                Next::Stop => break,
                Next::Relist => tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => Ok(Next::Stop),
                    listed = self.relist() => listed,
                },
                Next::Watch(resource_version) => match self.follow(&resource_version).await {
                    Ok(next) => {
                        failures = 0;
                        Ok(next)
                    }
                    Err(e) => Err(e),
                },
            };

            next = match step {
                Ok(step) => step,
                Err(e) => {
                    failures += 1;
                    if failures > self.config.max_watch_restarts {
                        error!(
                            "❌ {} synchronizer exceeded maximum restart attempts ({}), stopping: {}",
                            kind, self.config.max_watch_restarts, e
                        );
                        self.cache.mark_failed(kind, e.to_string()).await;
                        break;
                    }

                    let delay = self.config.backoff_for(failures);
                    warn!(
                        "⚠️ {} stream dropped (attempt {}/{}): {}, re-listing in {:?}",
                        kind, failures, self.config.max_watch_restarts, e, delay
                    );
                    self.cache.mark_resyncing(kind).await;

                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => Next::Stop,
                        () = sleep(delay) => Next::Relist,
                    }
                }
            };
        }

        info!("🔍 {} synchronizer stopped", kind);
    }

    /// Full listing that replaces the kind's cache entries
    async fn relist(&self) -> Result<Next> {
        let snapshot = self.source.list(self.kind).await?;
        let resource_version = snapshot
            .resource_version
            .clone()
            .unwrap_or_else(|| ANY_RESOURCE_VERSION.to_string());
        self.cache
            .replace_kind(self.kind, snapshot.objects, snapshot.resource_version)
            .await;
        Ok(Next::Watch(resource_version))
    }

    /// Apply the change stream until it closes, breaks, or the task is cancelled
    async fn follow(&self, resource_version: &str) -> Result<Next> {
        let kind = self.kind;

        let mut stream = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(Next::Stop),
            stream = self.source.watch(kind, resource_version) => stream?,
        };
        debug!("📡 {} watch open at resourceVersion {}", kind, resource_version);

        let mut last_version = resource_version.to_string();
        loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(Next::Stop),
                item = stream.next() => item,
            };

            match item {
                None => {
                    debug!("📡 {} watch closed at resourceVersion {}, resuming", kind, last_version);
                    return Ok(Next::Watch(last_version));
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(WatchChange::Applied(obj))) => {
                    if let Some(rv) = &obj.resource_version {
                        last_version.clone_from(rv);
                    }
                    self.cache.apply(ObjectChange::Applied(obj)).await;
                }
                Some(Ok(WatchChange::Deleted(obj))) => {
                    if let Some(rv) = &obj.resource_version {
                        last_version.clone_from(rv);
                    }
                    self.cache.apply(ObjectChange::Deleted(obj)).await;
                }
                Some(Ok(WatchChange::Bookmark(rv))) => {
                    last_version.clone_from(&rv);
                    self.cache.observe_version(kind, rv).await;
                }
            }
        }
    }
}
