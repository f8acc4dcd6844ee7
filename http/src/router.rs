use crate::error::AppError;
use axum::{
    extract::{
        Path,
        Query,
        State,
    },
    routing::{
        get,
        post,
    },
    Json,
    Router,
};
use chrono::{
    DateTime,
    Utc,
};
use edupulse_aggregator::{
    MetricSnapshot,
    Scope,
};
use edupulse_collector::{
    MetricFamily,
    TenantId,
    Window,
};
use edupulse_scheduler::{
    JobId,
    JobStatus,
    JobType,
    RollupJob,
    RollupScheduler,
    Trigger,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    str::FromStr,
    sync::Arc,
};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<RollupScheduler>,
    pub job_list_limit: usize,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/rollups", post(trigger_rollup).get(list_rollups))
        .route("/rollups/{id}", get(get_rollup))
        .route("/snapshots/{family}/latest", get(latest_snapshot))
        .route("/snapshots/{family}/as-of", get(snapshot_as_of))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerRequest {
    family: String,
    window_start: Option<DateTime<Utc>>,
    window_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerResponse {
    job_id: JobId,
    status: JobStatus,
}

/// The run itself is asynchronous; callers observe its outcome through the
/// job endpoints, not through this response.
async fn trigger_rollup(
    State(state): State<AppState>,
    Json(request): Json<TriggerRequest>,
) -> Result<Json<TriggerResponse>, AppError> {
    let job_type = parse_job_type(&request.family)?;
    let window = request_window(&request)?;

    let job = Arc::clone(&state.scheduler)
        .trigger_run(job_type, window, Trigger::Manual)
        .await?;

    tracing::info!(job_id = %job.id, job_type = %job.job_type, "api: rollup triggered");
    Ok(Json(TriggerResponse {
        job_id: job.id,
        status: job.status,
    }))
}

async fn get_rollup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RollupJob>, AppError> {
    let id = JobId::from_str(&id).map_err(|_| AppError::BadRequest(format!("invalid job id: {id}")))?;
    let job = state
        .scheduler
        .job(id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or(AppError::NotFound)?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_rollups(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RollupJob>>, AppError> {
    let limit = query.limit.unwrap_or(state.job_list_limit);
    let jobs = state
        .scheduler
        .recent_jobs(limit)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(jobs))
}

#[derive(Debug, Deserialize)]
struct ScopeQuery {
    scope: Option<String>,
}

async fn latest_snapshot(
    State(state): State<AppState>,
    Path(family): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<MetricSnapshot>, AppError> {
    let family = parse_family(&family)?;
    let scope = parse_scope(query.scope.as_deref());

    state
        .scheduler
        .latest_snapshot(family, &scope)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map(Json)
        .ok_or(AppError::NotFound)
}

#[derive(Debug, Deserialize)]
struct AsOfQuery {
    date: DateTime<Utc>,
    scope: Option<String>,
}

async fn snapshot_as_of(
    State(state): State<AppState>,
    Path(family): Path<String>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<MetricSnapshot>, AppError> {
    let family = parse_family(&family)?;
    let scope = parse_scope(query.scope.as_deref());

    state
        .scheduler
        .snapshot_as_of(family, &scope, query.date)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map(Json)
        .ok_or(AppError::NotFound)
}

fn parse_family(raw: &str) -> Result<MetricFamily, AppError> {
    MetricFamily::from_str(raw)
        .map_err(|_| AppError::BadRequest(format!("unknown metric family: {raw}")))
}

fn parse_job_type(raw: &str) -> Result<JobType, AppError> {
    JobType::from_str(raw).map_err(|_| {
        AppError::BadRequest(format!(
            "unknown metric family: {raw} (expected one of user, task, point, badge, full)"
        ))
    })
}

fn parse_scope(raw: Option<&str>) -> Scope {
    match raw {
        None | Some("") | Some("global") => Scope::Global,
        Some(tenant) => Scope::Tenant(TenantId::from(tenant)),
    }
}

fn request_window(request: &TriggerRequest) -> Result<Option<Window>, AppError> {
    match (request.window_start, request.window_end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => Window::new(start, end)
            .map(Some)
            .ok_or_else(|| AppError::BadRequest("windowStart must be before windowEnd".to_string())),
        _ => Err(AppError::BadRequest(
            "windowStart and windowEnd must be provided together".to_string(),
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn job_types_parse_from_request_strings() {
        assert!(matches!(parse_job_type("full"), Ok(JobType::Full)));
        assert!(matches!(
            parse_job_type("badge"),
            Ok(JobType::Family(MetricFamily::Badge))
        ));
        assert!(parse_job_type("grades").is_err());
    }

    #[test]
    fn scope_defaults_to_global() {
        assert_eq!(parse_scope(None), Scope::Global);
        assert_eq!(parse_scope(Some("global")), Scope::Global);
        assert_eq!(
            parse_scope(Some("school-3")),
            Scope::Tenant(TenantId::from("school-3"))
        );
    }

    #[test]
    fn window_halves_are_rejected() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let request = TriggerRequest {
            family: "task".to_string(),
            window_start: Some(start),
            window_end: None,
        };
        assert!(request_window(&request).is_err());

        let whole = TriggerRequest {
            family: "task".to_string(),
            window_start: Some(start),
            window_end: Some(start + chrono::Duration::hours(1)),
        };
        assert!(matches!(request_window(&whole), Ok(Some(_))));

        let neither = TriggerRequest {
            family: "task".to_string(),
            window_start: None,
            window_end: None,
        };
        assert!(matches!(request_window(&neither), Ok(None)));
    }

    #[test]
    fn inverted_windows_are_rejected() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let request = TriggerRequest {
            family: "task".to_string(),
            window_start: Some(start),
            window_end: Some(start - chrono::Duration::hours(1)),
        };
        assert!(request_window(&request).is_err());
    }
}
