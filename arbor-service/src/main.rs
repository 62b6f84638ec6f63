mod error;
mod quota;
mod routes;
mod state;

use arbor_core::{AnalysisRunner, Config, NodeIndex};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use quota::PassphraseQuota;
use state::{AppState, SharedState};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbor-service")]
#[command(about = "HTTP service for arbor tree summaries")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Path to config file
    #[arg(long, env = "ARBOR_CONFIG", default_value = "arbor.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(&args.config).expect("failed to load config");

    let index = Arc::new(
        NodeIndex::open(&config.storage.database).expect("failed to open node index"),
    );
    match index.fail_stale_tasks() {
        Ok(0) => {}
        Ok(n) => warn!(tasks = n, "marked interrupted tasks as failed"),
        Err(e) => warn!(error = %e, "failed to clean up stale tasks"),
    }
    match index.clear_pending_usage() {
        Ok(0) => {}
        Ok(n) => warn!(reservations = n, "dropped quota reservations of interrupted runs"),
        Err(e) => warn!(error = %e, "failed to clean up quota reservations"),
    }

    let access_enabled = config.access.enabled;
    let access = config.access.clone();
    let mut runner = AnalysisRunner::from_config(config, index).expect("failed to build runner");
    if access_enabled {
        let quota = PassphraseQuota::new(access, Arc::clone(runner.index()));
        runner = runner.with_access(Arc::new(quota));
    }
    info!(
        provider = runner.summarizer().provider(),
        access = access_enabled,
        "runner ready"
    );

    let state: SharedState = Arc::new(AppState::new(Arc::new(runner)));

    let app = Router::new()
        .route("/analyze", post(routes::analyze))
        .route("/status/{task_id}", get(routes::task_status))
        .route("/tasks/{task_id}/cancel", post(routes::cancel_task))
        .route("/snapshots", get(routes::list_snapshots))
        .route("/snapshots/{snapshot_id}/nodes", get(routes::list_nodes))
        .route("/snapshots/{snapshot_id}/node", get(routes::get_node))
        .route("/snapshots/{snapshot_id}/rebuild", post(routes::rebuild))
        .route("/tree/{snapshot_id}", get(routes::tree))
        .route("/search", get(routes::search))
        .route("/qa", post(routes::qa))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", args.bind, args.port);
    info!("arbor-service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listener");
    axum::serve(listener, app).await.expect("server error");
}
