//! Posts with their comment and reply threads.

use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::application::comments::CreateCommentCommand;
use crate::application::posts::{CreatePostCommand, UpdatePostCommand};
use crate::application::repos::PostFilter;
use crate::domain::entities::RecordId;
use crate::infra::http::error::ApiError;
use crate::infra::http::extract::{ApiJson, ApiPath, ApiQuery, Viewer};
use crate::infra::http::response::ApiResponse;
use crate::infra::http::state::AppState;

use super::{PageQuery, page_params};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostListQuery {
    pub page_index: Option<i64>,
    pub page_size: Option<i64>,
    pub author: Option<RecordId>,
}

pub async fn list_posts(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiQuery(query): ApiQuery<PostListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page_params(query.page_index, query.page_size, state.max_page_size)?;
    let filter = PostFilter {
        author: query.author,
    };
    Ok(ApiResponse::ok(state.posts.list(viewer, page, filter).await?))
}

pub async fn get_post(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.posts.detail(viewer, id).await?))
}

pub async fn create_post(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiJson(command): ApiJson<CreatePostCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(state.posts.create(viewer, command).await?))
}

pub async fn update_post(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
    ApiJson(command): ApiJson<UpdatePostCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.posts.update(viewer, id, command).await?,
    ))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    state.posts.delete(viewer, id).await?;
    Ok(ApiResponse::done("deleted"))
}

pub async fn list_comments(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(post_id): ApiPath<RecordId>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page_params(query.page_index, query.page_size, state.max_page_size)?;
    Ok(ApiResponse::ok(
        state.comments.list_for_post(viewer, post_id, page).await?,
    ))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(post_id): ApiPath<RecordId>,
    ApiJson(command): ApiJson<CreateCommentCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(
        state.comments.add_comment(viewer, post_id, command).await?,
    ))
}

pub async fn get_comment(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.comments.comment(viewer, id).await?))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    state.comments.delete_comment(viewer, id).await?;
    Ok(ApiResponse::done("deleted"))
}

pub async fn list_replies(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(comment_id): ApiPath<RecordId>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page_params(query.page_index, query.page_size, state.max_page_size)?;
    Ok(ApiResponse::ok(
        state.comments.list_replies(viewer, comment_id, page).await?,
    ))
}

pub async fn create_reply(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(comment_id): ApiPath<RecordId>,
    ApiJson(command): ApiJson<CreateCommentCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(
        state.comments.add_reply(viewer, comment_id, command).await?,
    ))
}

pub async fn get_reply(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.comments.reply(viewer, id).await?))
}

pub async fn delete_reply(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    state.comments.delete_reply(viewer, id).await?;
    Ok(ApiResponse::done("deleted"))
}
