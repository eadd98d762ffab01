use clap::{Parser, Subcommand};
use starbug_controller::{
    wait_for_cache_sync, ApiClient, ApiListerWatcher, ApiPodControl, HealthConfig, HealthServer,
    InformerConfig, JobController, JobControllerConfig,
};
use starbug_core::{split_meta_namespace_key, GroupVersionKind, Job, Pod};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "starbug", about = "Starbug Job controller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job controller until interrupted
    Run {
        /// API server URL
        #[arg(long, env = "STARBUG_API_URL", default_value = "http://127.0.0.1:6443")]
        api_url: String,
        /// Number of concurrent sync workers
        #[arg(long, env = "STARBUG_WORKERS", default_value_t = 5)]
        workers: usize,
        /// Informer resync period in seconds (0 disables resync)
        #[arg(long, env = "STARBUG_RESYNC_SECS", default_value_t = 30)]
        resync_secs: u64,
        /// Address the health endpoints listen on
        #[arg(long, env = "STARBUG_HEALTH_BIND", default_value = "0.0.0.0:8081")]
        health_bind: String,
    },
    /// Sync a single job once and print the outcome
    Sync {
        /// API server URL
        #[arg(long, env = "STARBUG_API_URL", default_value = "http://127.0.0.1:6443")]
        api_url: String,
        /// Job to sync, as namespace/name
        key: String,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            api_url,
            workers,
            resync_secs,
            health_bind,
        } => run_controller(&api_url, workers, resync_secs, &health_bind).await,
        Commands::Sync { api_url, key } => run_sync(&api_url, &key).await,
    }
}

/// Build a job controller talking to the API server at `api_url`
fn create_controller(api_url: &str, config: JobControllerConfig) -> Arc<JobController> {
    let api_client = Arc::new(ApiClient::new(api_url));

    Arc::new(JobController::new(
        Arc::new(ApiListerWatcher::<Job>::new(
            api_client.clone(),
            GroupVersionKind::job(),
        )),
        Arc::new(ApiListerWatcher::<Pod>::new(
            api_client.clone(),
            GroupVersionKind::pod(),
        )),
        Arc::new(ApiPodControl::new(api_client.clone())),
        api_client,
        config,
    ))
}

/// Run the controller and health server until Ctrl-C
async fn run_controller(
    api_url: &str,
    workers: usize,
    resync_secs: u64,
    health_bind: &str,
) -> miette::Result<()> {
    info!("Starting starbug job controller against {}", api_url);

    let listen_addr: SocketAddr = health_bind
        .parse()
        .map_err(|e| miette::miette!("Invalid health bind address '{}': {}", health_bind, e))?;

    let config = JobControllerConfig {
        workers,
        informer: InformerConfig {
            resync_period: (resync_secs > 0).then(|| Duration::from_secs(resync_secs)),
            ..Default::default()
        },
        ..Default::default()
    };
    let controller = create_controller(api_url, config);

    let token = CancellationToken::new();

    // 1. Spawn health server
    let health = HealthServer::new(HealthConfig { listen_addr }, controller.synced_flags());
    let health_token = token.clone();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health.run(health_token).await {
            error!("Health server error: {}", e);
        }
    });

    // 2. Spawn job controller
    let controller_handle = tokio::spawn(controller.run(token.clone()));

    info!("All components started. Health endpoints on {}", listen_addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    // Wait for all tasks to finish with a timeout
    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(health_handle, controller_handle);
    })
    .await;

    info!("Shutdown complete");

    Ok(())
}

/// Prime the caches and sync one job
async fn run_sync(api_url: &str, key: &str) -> miette::Result<()> {
    split_meta_namespace_key(key)?;

    let controller = create_controller(api_url, JobControllerConfig::default());
    let token = CancellationToken::new();

    let informers = [
        tokio::spawn(controller.job_informer().run(token.clone())),
        tokio::spawn(controller.pod_informer().run(token.clone())),
    ];

    let synced_flags = controller.synced_flags();
    let synced = tokio::select! {
        synced = wait_for_cache_sync(&synced_flags, &token) => synced,
        _ = tokio::signal::ctrl_c() => false,
    };

    let result = if synced {
        controller.sync_one(key).await
    } else {
        Err(starbug_controller::ControllerError::internal_error(
            "caches did not sync",
        ))
    };

    token.cancel();
    for informer in informers {
        let _ = informer.await;
    }

    let outcome = result?;
    println!("{}: {:?}", key, outcome);
    Ok(())
}
