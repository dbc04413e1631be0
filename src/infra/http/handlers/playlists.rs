use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::application::playlists::{
    AddTrackCommand, CreatePlaylistCommand, UpdatePlaylistCommand,
};
use crate::application::repos::PlaylistFilter;
use crate::domain::entities::RecordId;
use crate::infra::http::error::ApiError;
use crate::infra::http::extract::{ApiJson, ApiPath, ApiQuery, Viewer};
use crate::infra::http::response::ApiResponse;
use crate::infra::http::state::AppState;

use super::page_params;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistListQuery {
    pub page_index: Option<i64>,
    pub page_size: Option<i64>,
    pub owner: Option<RecordId>,
    pub search: Option<String>,
}

pub async fn list_playlists(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiQuery(query): ApiQuery<PlaylistListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page_params(query.page_index, query.page_size, state.max_page_size)?;
    let filter = PlaylistFilter {
        owner: query.owner,
        search: query.search,
    };
    Ok(ApiResponse::ok(
        state.playlists.list(viewer, page, filter).await?,
    ))
}

pub async fn get_playlist(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.playlists.detail(viewer, id).await?))
}

pub async fn create_playlist(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiJson(command): ApiJson<CreatePlaylistCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(
        state.playlists.create(viewer, command).await?,
    ))
}

pub async fn update_playlist(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
    ApiJson(command): ApiJson<UpdatePlaylistCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.playlists.update(viewer, id, command).await?,
    ))
}

pub async fn delete_playlist(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    state.playlists.delete(viewer, id).await?;
    Ok(ApiResponse::done("deleted"))
}

pub async fn add_playlist_track(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
    ApiJson(command): ApiJson<AddTrackCommand>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .playlists
        .add_track(viewer, id, command.music_id)
        .await?;
    Ok(ApiResponse::done("track added"))
}

pub async fn remove_playlist_track(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath((id, music_id)): ApiPath<(RecordId, RecordId)>,
) -> Result<impl IntoResponse, ApiError> {
    state.playlists.remove_track(viewer, id, music_id).await?;
    Ok(ApiResponse::done("track removed"))
}
