pub mod config;
pub mod kind_state;
pub mod object;
pub mod readiness;
pub mod source;
pub mod store;
pub mod subscription;
pub mod synchronizer;

pub use config::SyncConfig;
pub use kind_state::{KindState, SyncStatus};
pub use object::{ObjectKey, WatchedObject};
pub use readiness::{Readiness, ReadinessGate, ReadinessSignal};
pub use source::{ChangeStream, KubeSource, ListSnapshot, ObjectSource, WatchChange};
pub use store::{CacheStats, ObjectCache, ObjectChange};
pub use subscription::{CacheEvent, SubscriptionManager};
pub use synchronizer::CacheSynchronizer;
