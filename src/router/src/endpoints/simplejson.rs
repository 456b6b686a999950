//! SimpleJSON datasource endpoints
//!
//! `GET /` self test, `POST /search` metric listing and `POST /query`.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use querier::{QuerierError, TimeWindow, shape};
use simplejson_api::{ApiError, QueryRequest, ResponseFragment, SelfTestResponse};

use crate::RouterState;

pub fn router<S: RouterState>() -> Router<S> {
    Router::new()
        .route("/", get(self_test))
        .route("/search", post(search::<S>))
        .route("/query", post(query::<S>))
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Unknown target: {0}")]
    UnknownTarget(String),
    #[error("intervalMs must be a positive integer, got {0}")]
    InvalidInterval(i64),
    #[error("Invalid range.{field} '{value}': {reason}")]
    InvalidRange {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Querier(#[from] QuerierError),
}

impl QueryError {
    fn kind(&self) -> &'static str {
        match self {
            QueryError::UnknownTarget(_) => "unknown_target",
            QueryError::InvalidInterval(_) => "invalid_interval",
            QueryError::InvalidRange { .. } => "invalid_range",
            QueryError::Querier(_) => "query_failed",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            QueryError::Querier(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Query failed: {self}");
        } else {
            log::debug!("Rejected query: {self}");
        }
        (status, Json(ApiError::new(self.kind(), self.to_string()))).into_response()
    }
}

#[tracing::instrument]
pub async fn self_test() -> Json<SelfTestResponse> {
    Json(SelfTestResponse { ok: true })
}

/// Lists the exposed collections. The search term Grafana sends is ignored.
#[tracing::instrument(skip_all)]
pub async fn search<S: RouterState>(State(state): State<S>) -> Json<Vec<String>> {
    Json(state.config().series.collections.clone())
}

/// Runs one series query per target, in order. The first failing target
/// fails the whole request.
#[tracing::instrument(skip_all)]
pub async fn query<S: RouterState>(
    State(state): State<S>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<Vec<ResponseFragment>>, QueryError> {
    let (window, interval) = validate(&state, &request)?;
    log::debug!(
        "Query for {} target(s) over [{}, {}) every {interval}ms",
        request.targets.len(),
        window.start,
        window.end
    );

    let mut fragments = Vec::with_capacity(request.targets.len());
    for target in request.targets {
        let rows = state
            .querier()
            .build_and_run(&target.target, window, interval)
            .await?;
        fragments.push(shape(&target.target, target.target_type, rows));
    }

    Ok(Json(fragments))
}

fn validate<S: RouterState>(
    state: &S,
    request: &QueryRequest,
) -> Result<(TimeWindow, u64), QueryError> {
    if let Some(target) = request
        .targets
        .iter()
        .find(|target| !state.config().is_exposed(&target.target))
    {
        return Err(QueryError::UnknownTarget(target.target.clone()));
    }

    let interval = u64::try_from(request.interval_ms)
        .ok()
        .filter(|interval| *interval > 0)
        .ok_or(QueryError::InvalidInterval(request.interval_ms))?;

    let start = parse_instant("from", &request.range.from)?;
    let end = parse_instant("to", &request.range.to)?;

    Ok((TimeWindow::new(start, end), interval))
}

/// RFC 3339 instant, or epoch milliseconds as a string
fn parse_instant(field: &'static str, value: &str) -> Result<i64, QueryError> {
    let trimmed = value.trim();
    if let Ok(millis) = trimmed.parse::<i64>() {
        return Ok(millis);
    }

    chrono::DateTime::parse_from_rfc3339(trimmed)
        .map(|instant| instant.timestamp_millis())
        .map_err(|e| QueryError::InvalidRange {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}
