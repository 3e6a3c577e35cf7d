mod api;
mod browser;
mod classify;
mod config;
mod cookies;
mod counts;
mod db;
mod dom;
mod error;
mod extract;
mod filter;
mod harvester;
mod output;
mod session;
mod sink;
mod site;

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use dotenv::dotenv;
use sqlx::PgPool;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::config::{HarvestConfig, HarvestInput, RuntimeSettings};

#[derive(OpenApi)]
#[openapi(
    paths(api::trigger_harvest, api::get_harvest_status, api::list_runs),
    components(schemas(
        api::HarvestResponse,
        api::RunStatus,
        api::RunState,
        config::HarvestInput,
        config::SessionInput,
        output::RunSummary
    )),
    tags((name = "harvest", description = "Search-post harvesting API"))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let settings = RuntimeSettings::from_env();

    let db = match &settings.database_url {
        Some(url) => {
            let pool = db::connect(url).await?;
            db::init_db(&pool).await?;
            Some(pool)
        }
        None => {
            info!("DATABASE_URL not set; datasets go to JSON lines only");
            None
        }
    };

    match one_shot_input()? {
        Some(input) => run_once(settings, db, input).await,
        None => serve(settings, db).await,
    }
}

/// `fb-search-harvester <input.json>`, else the `HARVEST_INPUT` env var holding the JSON itself.
fn one_shot_input() -> Result<Option<HarvestInput>> {
    let raw = match env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading input file {path}"))?,
        None => match env::var("HARVEST_INPUT") {
            Ok(raw) if !raw.trim().is_empty() => raw,
            _ => return Ok(None),
        },
    };
    let input = serde_json::from_str(&raw).context("parsing harvest input")?;
    Ok(Some(input))
}

async fn run_once(settings: RuntimeSettings, db: Option<PgPool>, input: HarvestInput) -> Result<()> {
    let config = HarvestConfig::from_input(input)?;
    let run_id = Uuid::new_v4();
    let pool_state_path = settings.session_state_dir.join("SESSION_POOL_STATE.json");

    let report = harvester::harvest_with_chrome(&settings, db, run_id, config, pool_state_path).await?;
    info!(
        run = %run_id,
        total = report.summary.total,
        attempts = report.attempts,
        outcome = ?report.outcome,
        "🏁 Harvest done"
    );
    Ok(())
}

async fn serve(settings: RuntimeSettings, db: Option<PgPool>) -> Result<()> {
    let addr = format!("0.0.0.0:{}", settings.port);
    let state = Arc::new(api::AppState::new(settings, db));

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/harvest", post(api::trigger_harvest))
        .route("/harvest/:run_id", get(api::get_harvest_status))
        .route("/runs", get(api::list_runs))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
