mod handlers;
mod metrics;
mod routes;

use axum::Router;
use progy_engine::config::EngineSettings;
use progy_engine::EngineContext;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

const DEFAULT_ADDR: &str = "127.0.0.1:3001";

pub struct AppState {
    pub ctx: EngineContext,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("PROGY_LOG_JSON")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Progy server booting...");

    let settings = EngineSettings::from_env()?;
    let ctx = EngineContext::from_settings(settings)?;

    info!(
        course_id = %ctx.course.id,
        runner = ctx.course.runner.strategy.name(),
        offline = ctx.settings.offline,
        workspace = %ctx.settings.workspace_root.display(),
        "Course loaded"
    );

    let state = Arc::new(AppState { ctx });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let addr = std::env::var("PROGY_API_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = TcpListener::bind(&addr).await?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
