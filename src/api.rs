use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{HarvestConfig, HarvestInput, RuntimeSettings};
use crate::harvester::{self, RunOutcome};
use crate::output::RunSummary;

/// Finished runs kept for status lookups; running ones are never dropped.
pub const MAX_TRACKED_RUNS: usize = 500;

pub struct AppState {
    pub settings: RuntimeSettings,
    pub db: Option<PgPool>,
    pub runs: RwLock<HashMap<Uuid, RunStatus>>,
}

impl AppState {
    pub fn new(settings: RuntimeSettings, db: Option<PgPool>) -> Self {
        Self {
            settings,
            db,
            runs: RwLock::new(HashMap::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub query: String,
    pub state: RunState,
    #[schema(value_type = String)]
    pub started_at: DateTime<Utc>,
    #[schema(value_type = Option<String>)]
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: Option<u32>,
    pub summary: Option<RunSummary>,
    #[schema(value_type = Option<Object>)]
    pub outcome: Option<RunOutcome>,
    pub error: Option<String>,
}

/// Drops the oldest finished runs until at most `max` entries remain.
fn prune_finished(runs: &mut HashMap<Uuid, RunStatus>, max: usize) {
    if runs.len() <= max {
        return;
    }
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = runs
        .values()
        .filter(|status| status.state != RunState::Running)
        .map(|status| (status.finished_at.unwrap_or(status.started_at), status.run_id))
        .collect();
    finished.sort();
    let excess = runs.len() - max;
    for (_, run_id) in finished.into_iter().take(excess) {
        runs.remove(&run_id);
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HarvestResponse {
    pub run_id: Uuid,
    pub message: String,
}

#[utoipa::path(
    post,
    path = "/harvest",
    request_body = HarvestInput,
    responses(
        (status = 202, description = "Harvest started", body = HarvestResponse),
        (status = 400, description = "Invalid input")
    ),
    tag = "harvest"
)]
pub async fn trigger_harvest(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<HarvestInput>,
) -> Result<(StatusCode, Json<HarvestResponse>), (StatusCode, String)> {
    let config =
        HarvestConfig::from_input(payload).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let run_id = Uuid::new_v4();
    let mut runs = state.runs.write().await;
    prune_finished(&mut runs, MAX_TRACKED_RUNS.saturating_sub(1));
    runs.insert(
        run_id,
        RunStatus {
            run_id,
            query: config.query.clone(),
            state: RunState::Running,
            started_at: Utc::now(),
            finished_at: None,
            attempts: None,
            summary: None,
            outcome: None,
            error: None,
        },
    );
    drop(runs);
    info!(run = %run_id, query = %config.query, "🚀 Harvest queued");

    let task_state = state.clone();
    tokio::spawn(async move {
        let pool_state_path = task_state
            .settings
            .session_state_dir
            .join(format!("SESSION_POOL_STATE_{run_id}.json"));
        let result = harvester::harvest_with_chrome(
            &task_state.settings,
            task_state.db.clone(),
            run_id,
            config,
            pool_state_path,
        )
        .await;

        let mut runs = task_state.runs.write().await;
        if let Some(status) = runs.get_mut(&run_id) {
            status.finished_at = Some(Utc::now());
            match result {
                Ok(report) => {
                    info!(run = %run_id, total = report.summary.total, "✅ Harvest finished");
                    status.state = RunState::Succeeded;
                    status.attempts = Some(report.attempts);
                    status.summary = Some(report.summary);
                    status.outcome = Some(report.outcome);
                }
                Err(e) => {
                    error!(run = %run_id, "❌ Harvest failed: {:#}", e);
                    status.state = RunState::Failed;
                    status.error = Some(format!("{:#}", e));
                }
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(HarvestResponse {
            run_id,
            message: "Harvest started".to_string(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/harvest/{run_id}",
    params(("run_id" = Uuid, Path, description = "Run id returned by POST /harvest")),
    responses(
        (status = 200, description = "Run status", body = RunStatus),
        (status = 404, description = "Unknown run")
    ),
    tag = "harvest"
)]
pub async fn get_harvest_status(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunStatus>, StatusCode> {
    state
        .runs
        .read()
        .await
        .get(&run_id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[utoipa::path(
    get,
    path = "/runs",
    responses((status = 200, description = "All runs, newest first", body = Vec<RunStatus>)),
    tag = "harvest"
)]
pub async fn list_runs(State(state): State<Arc<AppState>>) -> Json<Vec<RunStatus>> {
    let mut runs: Vec<RunStatus> = state.runs.read().await.values().cloned().collect();
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Json(runs)
}
