use derive_more::From;
use k8s_openapi::serde_json;
use std::time::Duration;

use crate::k8s::kinds::ObjectKind;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    #[from]
    Kubeconfig(kube::config::KubeconfigError),

    #[from]
    Io(std::io::Error),

    /// The cluster could not be reached or the client could not be built
    Connection(String),

    /// Readiness was not reached within the allotted time
    SyncTimeout {
        pending: Vec<ObjectKind>,
        waited: Duration,
    },

    /// A query was issued before the kind completed its initial listing
    NotReady(ObjectKind),

    /// The initial listing of a kind failed; readiness can never be reached
    InitialList { kind: ObjectKind, message: String },

    /// A query failed after the kind had previously been ready
    Query { kind: ObjectKind, message: String },

    /// Custom error message
    Custom(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Json(e) => write!(fmt, "invalid object payload: {e}"),
            Self::Kube(e) => write!(fmt, "kubernetes api error: {e}"),
            Self::Infer(e) => write!(fmt, "unable to infer cluster credentials: {e}"),
            Self::Kubeconfig(e) => write!(fmt, "unable to load kubeconfig: {e}"),
            Self::Io(e) => write!(fmt, "i/o error: {e}"),
            Self::Connection(msg) => write!(fmt, "unable to connect to cluster: {msg}"),
            Self::SyncTimeout { pending, waited } => {
                let kinds: Vec<&str> = pending.iter().map(|k| k.key()).collect();
                write!(
                    fmt,
                    "cache sync timed out after {:?} waiting for [{}]",
                    waited,
                    kinds.join(", ")
                )
            }
            Self::NotReady(kind) => write!(fmt, "{kind} cache has not completed its initial listing"),
            Self::InitialList { kind, message } => {
                write!(fmt, "initial {kind} listing failed: {message}")
            }
            Self::Query { kind, message } => write!(fmt, "{kind} query failed: {message}"),
            Self::Custom(msg) => write!(fmt, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}
