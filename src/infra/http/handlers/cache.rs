//! Operational endpoints: manual invalidation and health.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::error::ErrorReport;
use crate::cache::Entity;
use crate::domain::entities::RecordId;
use crate::infra::http::error::ApiError;
use crate::infra::http::extract::{ApiPath, ApiQuery};
use crate::infra::http::response::{ApiResponse, Envelope};
use crate::infra::http::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateQuery {
    pub id: Option<RecordId>,
}

pub async fn invalidate_entity(
    State(state): State<AppState>,
    ApiPath(entity): ApiPath<String>,
    ApiQuery(query): ApiQuery<InvalidateQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let entity: Entity = entity.parse()?;
    let report = state
        .cache
        .invalidator()
        .invalidate(entity, query.id)
        .await?;
    info!(
        target: "encore::http::cache",
        entity = %entity,
        id = ?query.id,
        deleted = report.deleted,
        "manual invalidation"
    );
    Ok(ApiResponse::ok(report))
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub database: &'static str,
    pub cache: &'static str,
    pub cache_backend: &'static str,
}

/// 200 when both stores answer, 503 otherwise. A disabled cache counts as up.
pub async fn health(State(state): State<AppState>) -> Response {
    let database = state.database.ping().await;
    let cache = state.cache.store().ping().await;

    let status = if database.is_ok() && cache.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let report = HealthReport {
        database: if database.is_ok() { "up" } else { "down" },
        cache: if cache.is_ok() { "up" } else { "down" },
        cache_backend: state.cache.store().backend(),
    };
    let msg = if status.is_success() {
        "healthy"
    } else {
        "unhealthy"
    };

    let mut response = (status, Json(Envelope::new(status, msg, Some(report)))).into_response();
    let mut failures = Vec::new();
    if let Err(err) = database {
        failures.push(format!("database: {err}"));
    }
    if let Err(err) = cache {
        failures.push(format!("cache: {err}"));
    }
    if !failures.is_empty() {
        ErrorReport::from_message("infra::http::health", status, failures.join("; "))
            .attach(&mut response);
    }
    response
}
