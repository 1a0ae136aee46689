use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use relay_cloud::gcs::GcsSettings;
use relay_cloud::{CloudStoreProvider, CredentialResolver, UploadPipeline};
use relay_comfyui::engine::ComfyUIEngine;
use relay_comfyui::outputs::{ArtifactCollector, PathMode};
use relay_core::clock::SystemClock;
use relay_events::{HostProgressSink, JobStore, LogSink, StatusSink};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_api::config::{HostReporting, WorkerConfig};
use relay_api::engine::JobRunner;
use relay_api::router::build_app_router;
use relay_api::state::AppState;

/// How often expired status entries are swept.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// How long in-flight jobs get to report after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_api=debug,relay_comfyui=info,relay_events=info,relay_cloud=info,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded worker configuration");
    tracing::debug!(?config, "Full configuration");

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;
    // Status deliveries must never wait on an endpoint indefinitely.
    let callback_http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(config.callback_timeout)
        .build()
        .context("Failed to build callback HTTP client")?;

    // --- Status store ---
    let store = Arc::new(JobStore::new(
        chrono::Duration::seconds(config.status_ttl_secs),
        config.status_capacity,
        Arc::new(SystemClock),
    ));
    spawn_purge_task(Arc::clone(&store));

    // --- Upload pipeline ---
    let resolver = CredentialResolver::from_encoded(
        config.gcp_credentials.as_deref(),
        config.aws_credentials.as_deref(),
    )
    .context("Invalid encoded storage credentials")?;
    let provider = CloudStoreProvider::new(
        http.clone(),
        GcsSettings {
            key_file: config.gcs_key_file.clone(),
            ..GcsSettings::default()
        },
        config.s3.clone(),
    );
    let uploader =
        UploadPipeline::new(resolver, Arc::new(provider)).with_timeout(config.upload_timeout);

    // --- Engine and runner ---
    let engine = ComfyUIEngine::from_api_url(&config.comfyui_url, http.clone());
    let path_mode = match &config.data_path {
        Some(root) => PathMode::DataVolume(root.clone()),
        None => PathMode::Relative,
    };
    tracing::info!(comfyui_url = %config.comfyui_url, ?path_mode, "Engine configured");

    let runner = Arc::new(
        JobRunner::new(
            Arc::new(engine),
            Arc::clone(&store),
            ArtifactCollector::new(path_mode),
            uploader,
            callback_http.clone(),
        )
        .with_sinks(host_sinks(&config, &callback_http))
        .with_engine_timeout(config.engine_timeout),
    );

    // --- Router ---
    let config = Arc::new(config);
    let state = AppState {
        config: Arc::clone(&config),
        store,
        runner: Arc::clone(&runner),
    };
    let app = build_app_router(state, &config);

    // --- Serve ---
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid HOST/PORT")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!(%addr, "Relay worker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!(in_flight = runner.in_flight(), "Cancelling in-flight jobs");
    runner.shutdown(SHUTDOWN_GRACE).await;
    tracing::info!("Relay worker shut down");
    Ok(())
}

/// Deployment-wide status sinks derived from the host reporting mode.
fn host_sinks(config: &WorkerConfig, http: &reqwest::Client) -> Vec<Arc<dyn StatusSink>> {
    match &config.host_reporting {
        HostReporting::Disabled => Vec::new(),
        HostReporting::Log => vec![Arc::new(LogSink)],
        HostReporting::Push { url, api_key } => vec![Arc::new(HostProgressSink::new(
            http.clone(),
            url.clone(),
            api_key.clone(),
        ))],
    }
}

fn spawn_purge_task(store: Arc<JobStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = store.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired run statuses");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
