use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use backend::{api, Supervisor, SupervisorConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Locations tried for the primary engine when ENGINE_PATH is not set
const ENGINE_CANDIDATES: &[&str] = &[
    "./target/release/engine",
    "./target/debug/engine",
    "./engine",
];

/// Locations tried for the hint engine when STOCKFISH_PATH is not set
const STOCKFISH_CANDIDATES: &[&str] = &[
    "/usr/local/bin/stockfish",
    "/usr/bin/stockfish",
    "/opt/homebrew/bin/stockfish",
];

fn probe(env_var: &str, candidates: &[&str]) -> Option<String> {
    if let Ok(path) = std::env::var(env_var) {
        if !path.is_empty() {
            return Some(path);
        }
    }
    candidates
        .iter()
        .find(|p| Path::new(p).exists())
        .map(|p| p.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenv::dotenv().ok();

    let config = SupervisorConfig {
        engine_path: probe("ENGINE_PATH", ENGINE_CANDIDATES),
        stockfish_path: probe("STOCKFISH_PATH", STOCKFISH_CANDIDATES),
    };
    let supervisor = Supervisor::start(config).await;
    let app = api::router(Arc::new(supervisor));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "api listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
