use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::application::journals::{CreateJournalCommand, UpdateJournalCommand};
use crate::application::repos::JournalFilter;
use crate::domain::entities::RecordId;
use crate::infra::http::error::ApiError;
use crate::infra::http::extract::{ApiJson, ApiPath, ApiQuery, Viewer};
use crate::infra::http::response::ApiResponse;
use crate::infra::http::state::AppState;

use super::page_params;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalListQuery {
    pub page_index: Option<i64>,
    pub page_size: Option<i64>,
    pub author: Option<RecordId>,
    pub search: Option<String>,
}

pub async fn list_journals(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiQuery(query): ApiQuery<JournalListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page_params(query.page_index, query.page_size, state.max_page_size)?;
    let filter = JournalFilter {
        author: query.author,
        search: query.search,
    };
    Ok(ApiResponse::ok(
        state.journals.list(viewer, page, filter).await?,
    ))
}

pub async fn get_journal(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.journals.detail(viewer, id).await?))
}

pub async fn create_journal(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiJson(command): ApiJson<CreateJournalCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(
        state.journals.create(viewer, command).await?,
    ))
}

pub async fn update_journal(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
    ApiJson(command): ApiJson<UpdateJournalCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.journals.update(viewer, id, command).await?,
    ))
}

pub async fn delete_journal(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    state.journals.delete(viewer, id).await?;
    Ok(ApiResponse::done("deleted"))
}
