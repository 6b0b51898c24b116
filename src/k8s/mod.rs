pub mod cache;
pub mod client;
pub mod kinds;
pub mod snapshot;

/// Default user agent - automatically uses the package version
///
/// Override with the `PODCACHE_USER_AGENT` environment variable.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Environment variable that replaces [`USER_AGENT`]
pub const USER_AGENT_ENV: &str = "PODCACHE_USER_AGENT";
