/**
 * Readiness gate
 *
 * One single-resolution signal per watched kind, combined into an all-of gate.
 * Each signal is a `watch` channel so any number of waiters observe the
 * transition, including waiters that arrive after it happened.
 */
use crate::error::{Error, Result};
use crate::k8s::kinds::ObjectKind;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

/// Write side for one kind, owned by that kind's background task
#[derive(Debug)]
pub struct ReadinessSignal {
    kind: ObjectKind,
    tx: watch::Sender<Readiness>,
}

impl ReadinessSignal {
    /// Resolve the signal as ready. Later calls do not change a resolved signal.
    pub fn ready(&self) {
        self.resolve(Readiness::Ready);
    }

    /// Resolve the signal as failed
    pub fn fail(&self, message: String) {
        self.resolve(Readiness::Failed(message));
    }

    fn resolve(&self, outcome: Readiness) {
        let kind = self.kind;
        self.tx.send_if_modified(|current| {
            if *current == Readiness::Pending {
                debug!("{} readiness resolved: {:?}", kind, outcome);
                *current = outcome;
                true
            } else {
                false
            }
        });
    }

    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        self.kind
    }
}

/// Read side: cloneable, waits for every kind
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    signals: BTreeMap<ObjectKind, watch::Receiver<Readiness>>,
}

impl ReadinessGate {
    /// Build a gate over `kinds` together with one signal per kind
    #[must_use]
    pub fn new(kinds: &[ObjectKind]) -> (Self, Vec<ReadinessSignal>) {
        let mut signals = BTreeMap::new();
        let mut writers = Vec::with_capacity(kinds.len());
        for kind in kinds {
            if signals.contains_key(kind) {
                continue;
            }
            let (tx, rx) = watch::channel(Readiness::Pending);
            signals.insert(*kind, rx);
            writers.push(ReadinessSignal { kind: *kind, tx });
        }
        (Self { signals }, writers)
    }

    /// Wait until every kind is ready
    ///
    /// # Errors
    ///
    /// `InitialList` as soon as any kind fails, or if its task ends before resolving
    pub async fn wait(&self) -> Result<()> {
        try_join_all(
            self.signals
                .iter()
                .map(|(kind, rx)| wait_signal(*kind, rx.clone())),
        )
        .await
        .map(|_| ())
    }

    /// Wait for readiness for at most `timeout`; `Ok(false)` when time runs out
    ///
    /// # Errors
    ///
    /// Same as [`Self::wait`]
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result.map(|()| true),
            Err(_) => Ok(false),
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.signals
            .values()
            .all(|rx| *rx.borrow() == Readiness::Ready)
    }

    /// Kinds whose signal has not resolved yet
    #[must_use]
    pub fn pending(&self) -> Vec<ObjectKind> {
        self.signals
            .iter()
            .filter(|(_, rx)| *rx.borrow() == Readiness::Pending)
            .map(|(kind, _)| *kind)
            .collect()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<ObjectKind> {
        self.signals.keys().copied().collect()
    }
}

/// Resolve one kind's signal; every kind is awaited concurrently so the first failure wins
async fn wait_signal(kind: ObjectKind, mut rx: watch::Receiver<Readiness>) -> Result<()> {
    let outcome = rx
        .wait_for(|r| *r != Readiness::Pending)
        .await
        .map(|r| (*r).clone());

    match outcome {
        Ok(Readiness::Ready) => Ok(()),
        Ok(Readiness::Failed(message)) => Err(Error::InitialList { kind, message }),
        Ok(Readiness::Pending) | Err(_) => Err(Error::InitialList {
            kind,
            message: "synchronizer stopped before the initial listing completed".to_string(),
        }),
    }
}
