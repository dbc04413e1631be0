//! Follow graph and notification handlers

use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::domain::entities::RecordId;
use crate::infra::http::error::ApiError;
use crate::infra::http::extract::{ApiPath, ApiQuery, Viewer};
use crate::infra::http::response::ApiResponse;
use crate::infra::http::state::AppState;

use super::{PageQuery, page_params};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationListQuery {
    pub page_index: Option<i64>,
    pub page_size: Option<i64>,
    pub unread: Option<bool>,
}

pub async fn list_followers(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<RecordId>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page_params(query.page_index, query.page_size, state.max_page_size)?;
    Ok(ApiResponse::ok(state.follows.followers(user_id, page).await?))
}

pub async fn list_following(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<RecordId>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page_params(query.page_index, query.page_size, state.max_page_size)?;
    Ok(ApiResponse::ok(state.follows.following(user_id, page).await?))
}

/// Repeated follows succeed with `data: null`.
pub async fn follow_user(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(user_id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.follows.follow(viewer, user_id).await?))
}

pub async fn unfollow_user(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(user_id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    state.follows.unfollow(viewer, user_id).await?;
    Ok(ApiResponse::done("unfollowed"))
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiQuery(query): ApiQuery<NotificationListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page_params(query.page_index, query.page_size, state.max_page_size)?;
    let unread_only = query.unread.unwrap_or(false);
    Ok(ApiResponse::ok(
        state.notifications.list(viewer, page, unread_only).await?,
    ))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    state.notifications.mark_read(viewer, id).await?;
    Ok(ApiResponse::done("marked read"))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    state.notifications.delete(viewer, id).await?;
    Ok(ApiResponse::done("deleted"))
}
