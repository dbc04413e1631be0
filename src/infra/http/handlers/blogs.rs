//! Blog handlers

use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::application::blogs::{CreateBlogCommand, UpdateBlogCommand};
use crate::application::repos::BlogFilter;
use crate::domain::entities::RecordId;
use crate::infra::http::error::ApiError;
use crate::infra::http::extract::{ApiJson, ApiPath, ApiQuery, Viewer};
use crate::infra::http::response::ApiResponse;
use crate::infra::http::state::AppState;

use super::page_params;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogListQuery {
    pub page_index: Option<i64>,
    pub page_size: Option<i64>,
    pub author: Option<RecordId>,
    pub category: Option<String>,
    pub search: Option<String>,
}

pub async fn list_blogs(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<BlogListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page_params(query.page_index, query.page_size, state.max_page_size)?;
    let filter = BlogFilter {
        author: query.author,
        category: query.category,
        search: query.search,
    };
    let envelope = state.blogs.list(page, filter).await?;
    Ok(ApiResponse::ok(envelope))
}

pub async fn get_blog(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.blogs.detail(id).await?))
}

pub async fn create_blog(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiJson(command): ApiJson<CreateBlogCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(state.blogs.create(viewer, command).await?))
}

pub async fn update_blog(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
    ApiJson(command): ApiJson<UpdateBlogCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.blogs.update(viewer, id, command).await?))
}

pub async fn delete_blog(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    state.blogs.delete(viewer, id).await?;
    Ok(ApiResponse::done("deleted"))
}
