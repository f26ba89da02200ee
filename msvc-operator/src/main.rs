//! msvc-operator: reconciles managed-service objects with a remote control plane.
//!
//! Objects are loaded from a JSON manifest file into an in-process store, then:
//! - a finalizer is added before anything is created remotely
//! - services are created, polled while provisioning and corrected on drift
//! - status is projected back onto each object

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use msvc_operator::clients::{
    HttpServiceClient, ServiceClient, SimulatedServiceClient, ThrottleConfig, ThrottledClient,
};
use msvc_operator::store::{MemoryStore, ObjectStore};
use msvc_operator::{
    BackoffConfig, Controller, ControllerConfig, Intervals, ManagedService, ServiceReconciler,
};

/// Managed service operator
#[derive(Parser, Debug)]
#[command(name = "msvc-operator", version, about)]
struct Args {
    /// JSON file with a list of managed service objects
    #[arg(long)]
    manifests: PathBuf,

    /// Control plane API base URL
    #[arg(long, default_value = "https://api.aiven.io")]
    api_url: String,

    /// Control plane API token
    #[arg(long, env = "MSVC_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Service type created for new services
    #[arg(long, default_value = "pg")]
    service_type: String,

    /// Use an in-memory simulated control plane instead of the API
    #[arg(long)]
    simulate: bool,

    /// Reads a simulated service stays in REBUILDING after create
    #[arg(long, default_value = "3")]
    simulated_provisioning_reads: u32,

    /// Number of concurrent reconcile workers
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Poll interval in seconds while a service is transitioning
    #[arg(long, default_value = "10")]
    poll_interval: u64,

    /// Resync interval in seconds for settled services
    #[arg(long, default_value = "300")]
    resync_interval: u64,

    /// Initial failure backoff in seconds
    #[arg(long, default_value = "1")]
    backoff_base: u64,

    /// Maximum failure backoff in seconds
    #[arg(long, default_value = "300")]
    backoff_cap: u64,

    /// Retry delay in seconds for unrecoverable failures
    #[arg(long, default_value = "3600")]
    unrecoverable_backoff: u64,

    /// Maximum control plane calls in flight
    #[arg(long, default_value = "8")]
    max_in_flight: usize,

    /// Minimum milliseconds between control plane calls
    #[arg(long, default_value = "0")]
    call_spacing_ms: u64,

    /// Timeout in seconds for a single control plane call
    #[arg(long, default_value = "30")]
    call_timeout: u64,
}

impl Args {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            intervals: Intervals {
                poll: Duration::from_secs(self.poll_interval),
                resync: Duration::from_secs(self.resync_interval),
            },
            backoff: BackoffConfig {
                base: Duration::from_secs(self.backoff_base),
                cap: Duration::from_secs(self.backoff_cap),
                unrecoverable: Duration::from_secs(self.unrecoverable_backoff),
            },
        }
    }

    fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            max_in_flight: self.max_in_flight,
            min_spacing: Duration::from_millis(self.call_spacing_ms),
            call_timeout: Duration::from_secs(self.call_timeout),
        }
    }

    fn service_client(&self) -> Result<Arc<dyn ServiceClient>> {
        if self.simulate {
            info!(
                provisioning_reads = self.simulated_provisioning_reads,
                "Using simulated control plane"
            );
            return Ok(Arc::new(SimulatedServiceClient::new(
                self.simulated_provisioning_reads,
            )));
        }

        let token = self
            .api_token
            .as_deref()
            .context("--api-token (or MSVC_API_TOKEN) is required unless --simulate is set")?;
        info!("API endpoint: {}", self.api_url);
        Ok(Arc::new(HttpServiceClient::new(
            &self.api_url,
            token,
            &self.service_type,
        )?))
    }
}

async fn load_manifests(store: &MemoryStore, path: &PathBuf) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let objects: Vec<ManagedService> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    for obj in objects {
        let key = obj.key();
        store
            .create(obj)
            .await
            .with_context(|| format!("Failed to load object {}", key))?;
        info!(object = %key, "Loaded object");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "msvc_operator=info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let store = Arc::new(MemoryStore::new());
    load_manifests(&store, &args.manifests).await?;

    let client = Arc::new(ThrottledClient::new(
        args.service_client()?,
        args.throttle_config(),
    ));
    let config = args.controller_config();
    let reconciler = Arc::new(ServiceReconciler::new(
        store.clone(),
        client,
        config.intervals,
    ));
    let controller = Arc::new(Controller::new(store.clone(), reconciler, config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(controller.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Received Ctrl-C");
    if shutdown_tx.send(true).is_err() {
        warn!("Controller already stopped");
    }
    handle.await.context("Controller task failed")?;

    for obj in store.list().await? {
        info!(
            object = %obj.key(),
            status = %serde_json::to_string(&obj.status)?,
            "Final status"
        );
    }

    Ok(())
}
