// Credential loading and client construction
use crate::error::{Error, Result as PcResult};
use hyper::http::{HeaderName, HeaderValue};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tracing::{debug, warn};

use super::{USER_AGENT, USER_AGENT_ENV};

/// Where a credential set was loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// In-cluster service account or the current kubeconfig context
    Inferred,
    /// An explicitly selected kubeconfig context
    Context(String),
}

/// An immutable bundle describing how to reach one cluster API endpoint
#[derive(Debug, Clone)]
pub struct Credentials {
    config: Config,
    source: CredentialSource,
}

impl Credentials {
    /// Load credentials the way `kubectl` would, optionally pinning a context
    ///
    /// # Errors
    ///
    /// Returns an error if no usable kubeconfig or in-cluster environment is found
    pub async fn load(context: Option<&str>) -> PcResult<Self> {
        let (config, source) = match context {
            Some(name) => {
                debug!("📄 Loading kubeconfig context {}", name);
                let options = KubeConfigOptions {
                    context: Some(name.to_string()),
                    ..KubeConfigOptions::default()
                };
                (
                    Config::from_kubeconfig(&options).await?,
                    CredentialSource::Context(name.to_string()),
                )
            }
            None => {
                debug!("📄 Loading Kubernetes configuration from default sources");
                (Config::infer().await?, CredentialSource::Inferred)
            }
        };
        Ok(Self { config, source })
    }

    #[must_use]
    pub fn cluster_url(&self) -> String {
        self.config.cluster_url.to_string()
    }

    #[must_use]
    pub const fn source(&self) -> &CredentialSource {
        &self.source
    }
}

/// Pick the user-agent: environment override first, then the package default
#[must_use]
pub fn resolve_user_agent() -> String {
    std::env::var(USER_AGENT_ENV)
        .ok()
        .filter(|ua| !ua.trim().is_empty())
        .unwrap_or_else(|| USER_AGENT.to_string())
}

/// Add a user-agent header to `config`, leaving it untouched if the value is not a valid header
pub fn add_user_agent_header(config: &mut Config, user_agent: Option<&str>) -> bool {
    let Some(user_agent) = user_agent else {
        return false;
    };
    match HeaderValue::from_str(user_agent) {
        Ok(header_value) => {
            config
                .headers
                .push((HeaderName::from_static("user-agent"), header_value));
            true
        }
        Err(e) => {
            warn!("Ignoring invalid user-agent {:?}: {}", user_agent, e);
            false
        }
    }
}

/// Build an API client from loaded credentials
///
/// # Errors
///
/// Returns `Error::Connection` if the client cannot be constructed (bad TLS material, unsupported auth)
pub fn connect(credentials: &Credentials) -> PcResult<Client> {
    let mut config = credentials.config.clone();
    add_user_agent_header(&mut config, Some(&resolve_user_agent()));

    Client::try_from(config).map_err(|e| Error::Connection(e.to_string()))
}
