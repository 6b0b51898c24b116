use clap::Parser;
use podcache::error::Error;
use podcache::k8s::cache::config::DEFAULT_SYNC_TIMEOUT_SECONDS;
use podcache::k8s::cache::{CacheEvent, CacheSynchronizer, SyncConfig};
use podcache::k8s::client::Credentials;
use podcache::k8s::kinds::ObjectKind;
use podcache::k8s::snapshot::{render, render_line, NamespaceFilter};
use std::fmt;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Only list objects in this namespace
    #[arg(short, long, conflicts_with = "all_namespaces")]
    namespace: Option<String>,

    /// List objects across all namespaces (the default)
    #[arg(short = 'A', long)]
    all_namespaces: bool,

    /// Kinds to synchronize and list
    #[arg(short, long = "kind", value_enum, default_value = "pod")]
    kinds: Vec<ObjectKind>,

    /// Kubeconfig context to use instead of the current one
    #[arg(long)]
    context: Option<String>,

    /// Seconds to wait for the initial cache sync
    #[arg(long, default_value_t = DEFAULT_SYNC_TIMEOUT_SECONDS)]
    sync_timeout: u64,

    /// Keep mirroring after the listing and log changes until interrupted
    #[arg(short, long)]
    follow: bool,
}

/// Setup phase a fatal error happened in
#[derive(Debug, Clone, Copy)]
enum Phase {
    Credentials,
    Connect,
    Sync,
    List,
}

impl Phase {
    const fn exit_code(self) -> u8 {
        match self {
            Self::Credentials => 2,
            Self::Connect => 3,
            Self::Sync => 4,
            Self::List => 5,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Credentials => "credential load",
            Self::Connect => "cache synchronizer start",
            Self::Sync => "cache sync",
            Self::List => "object listing",
        })
    }
}

#[derive(Debug)]
struct Failure {
    phase: Phase,
    source: Error,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.phase, self.source)
    }
}

trait InPhase<T> {
    fn in_phase(self, phase: Phase) -> Result<T, Failure>;
}

impl<T> InPhase<T> for podcache::error::Result<T> {
    fn in_phase(self, phase: Phase) -> Result<T, Failure> {
        self.map_err(|source| Failure { phase, source })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                    _ = term.recv() => info!("SIGTERM received"),
                }
            }
            Err(e) => {
                warn!("Unable to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("SIGINT received");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received");
    }
}

async fn run(args: Args) -> Result<(), Failure> {
    let filter = if args.all_namespaces {
        NamespaceFilter::All
    } else {
        NamespaceFilter::from(args.namespace)
    };
    let scope = match &filter {
        NamespaceFilter::All => None,
        NamespaceFilter::Namespace(ns) => Some(ns.clone()),
    };

    let credentials = Credentials::load(args.context.as_deref())
        .await
        .in_phase(Phase::Credentials)?;

    let sync = CacheSynchronizer::connect(&credentials, &args.kinds, scope, SyncConfig::default())
        .in_phase(Phase::Connect)?;

    let timeout = Duration::from_secs(args.sync_timeout);
    tokio::select! {
        ready = sync.require_ready(timeout) => ready.in_phase(Phase::Sync)?,
        () = shutdown_signal() => {
            sync.stop();
            return Err(Failure {
                phase: Phase::Sync,
                source: Error::Custom("interrupted before the cache synced".to_string()),
            });
        }
    }
    info!("Cache has been synced successfully");

    let reader = sync.reader();
    for kind in sync.gate().kinds() {
        info!("Listing all {} objects in {}", kind, describe(&filter));
        let objects = reader.list(kind, &filter).await.in_phase(Phase::List)?;
        for line in render(&objects) {
            println!("{line}");
        }
    }

    if args.follow {
        follow(&sync, &filter).await;
    }

    sync.stop();
    sync.join().await;
    Ok(())
}

/// Log every cache change in scope until a shutdown signal arrives
async fn follow(sync: &CacheSynchronizer, filter: &NamespaceFilter) {
    let cache = sync.cache();
    let (id, mut events) = cache.subscription_manager.subscribe("*".to_string()).await;
    info!("Following changes, press Ctrl-C to stop");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            event = events.recv() => match event {
                Some(CacheEvent::Applied(obj)) if filter.matches(obj.namespace.as_deref()) => {
                    println!("APPLIED {}", render_line(&obj));
                }
                Some(CacheEvent::Deleted(obj)) if filter.matches(obj.namespace.as_deref()) => {
                    println!("DELETED {}", render_line(&obj));
                }
                Some(CacheEvent::Relisted { kind, count }) => {
                    info!("{} cache re-listed with {} objects", kind, count);
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    cache.subscription_manager.unsubscribe(&id).await;
}

fn describe(filter: &NamespaceFilter) -> String {
    match filter {
        NamespaceFilter::All => "all namespaces".to_string(),
        NamespaceFilter::Namespace(ns) => format!("namespace {ns}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!("{}", failure);
            ExitCode::from(failure.phase.exit_code())
        }
    }
}
