mod config;
mod errors;
mod formation;
mod llm_client;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::formation::judge::{LlmTeamJudge, NullJudge, TimeoutJudge};
use crate::formation::milp::{MicroLpSolver, MilpSolver};
use crate::formation::ranker::TeamJudge;
use crate::formation::TeamFormationEngine;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Teamform API v{}", env!("CARGO_PKG_VERSION"));

    // Team judge: Claude when a key is configured, deterministic ranking otherwise
    let judge_timeout = Duration::from_millis(config.judge_timeout_ms);
    let judge: Arc<dyn TeamJudge> = match &config.anthropic_api_key {
        Some(key) => {
            let llm = LlmClient::new(key.clone(), judge_timeout)?;
            info!(
                "LLM team judge initialized (model: {}, timeout: {}ms)",
                llm_client::MODEL,
                config.judge_timeout_ms
            );
            Arc::new(TimeoutJudge::new(LlmTeamJudge::new(llm), judge_timeout))
        }
        None => {
            info!("ANTHROPIC_API_KEY not set; using deterministic team ranking");
            Arc::new(TimeoutJudge::new(NullJudge, judge_timeout))
        }
    };

    // MILP backend for pools above the exact enumeration limit
    let solver: Arc<dyn MilpSolver> = Arc::new(MicroLpSolver);

    let engine = Arc::new(TeamFormationEngine::new(
        config.engine.clone(),
        solver,
        judge,
    ));
    let settings = engine.settings();
    info!(
        "Formation engine: exact_pool_limit={} max_pool_size={} max_team_size={} lambda_grid={:?} quality_gate={}",
        settings.exact_pool_limit,
        settings.max_pool_size,
        settings.max_team_size,
        settings.lambda_grid,
        if settings.quality.is_some() { "configured" } else { "per-request" }
    );

    // Build app state
    let state = AppState {
        config: config.clone(),
        engine,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS once the calling origins are known

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
