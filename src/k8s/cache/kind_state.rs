use std::time::Instant;

/// Sync status of one watched kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Initial listing has not completed yet
    Pending,
    /// Listed and following the change stream
    Synced,
    /// Change stream dropped, re-listing
    Resyncing,
    /// Background task gave up
    Failed(String),
}

/// Bookkeeping the cache keeps for each watched kind
#[derive(Debug, Clone)]
pub struct KindState {
    pub status: SyncStatus,
    /// Latched once the initial listing lands; never cleared
    pub ready: bool,
    pub resource_version: Option<String>,
    pub last_synced: Option<Instant>,
    pub relists: u64,
}

impl Default for KindState {
    fn default() -> Self {
        Self::new()
    }
}

impl KindState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: SyncStatus::Pending,
            ready: false,
            resource_version: None,
            last_synced: None,
            relists: 0,
        }
    }

    /// Record a completed full listing
    pub fn mark_listed(&mut self, resource_version: Option<String>) {
        if self.ready {
            self.relists += 1;
        }
        self.ready = true;
        self.status = SyncStatus::Synced;
        self.resource_version = resource_version;
        self.last_synced = Some(Instant::now());
    }

    pub fn mark_resyncing(&mut self) {
        self.status = SyncStatus::Resyncing;
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = SyncStatus::Failed(error);
    }

    /// Advance the resource version from a watch event or bookmark
    pub fn observe_version(&mut self, resource_version: Option<String>) {
        if resource_version.is_some() {
            self.resource_version = resource_version;
        }
    }
}
