//! Album and music handlers

use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::application::albums::{CreateAlbumCommand, UpdateAlbumCommand};
use crate::application::music::{CreateMusicCommand, UpdateMusicCommand};
use crate::application::repos::{AlbumFilter, MusicFilter};
use crate::domain::entities::RecordId;
use crate::infra::http::error::ApiError;
use crate::infra::http::extract::{ApiJson, ApiPath, ApiQuery, Viewer};
use crate::infra::http::response::ApiResponse;
use crate::infra::http::state::AppState;

use super::page_params;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumListQuery {
    pub page_index: Option<i64>,
    pub page_size: Option<i64>,
    pub artist: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicListQuery {
    pub page_index: Option<i64>,
    pub page_size: Option<i64>,
    pub album: Option<RecordId>,
    pub artist: Option<String>,
    pub search: Option<String>,
}

pub async fn list_albums(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<AlbumListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page_params(query.page_index, query.page_size, state.max_page_size)?;
    let filter = AlbumFilter {
        artist: query.artist,
        search: query.search,
    };
    Ok(ApiResponse::ok(state.albums.list(page, filter).await?))
}

pub async fn get_album(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.albums.detail(id).await?))
}

pub async fn create_album(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiJson(command): ApiJson<CreateAlbumCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(
        state.albums.create(viewer, command).await?,
    ))
}

pub async fn update_album(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
    ApiJson(command): ApiJson<UpdateAlbumCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.albums.update(viewer, id, command).await?,
    ))
}

pub async fn delete_album(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    state.albums.delete(viewer, id).await?;
    Ok(ApiResponse::done("deleted"))
}

pub async fn list_music(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<MusicListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page_params(query.page_index, query.page_size, state.max_page_size)?;
    let filter = MusicFilter {
        album: query.album,
        artist: query.artist,
        search: query.search,
    };
    Ok(ApiResponse::ok(state.music.list(page, filter).await?))
}

pub async fn get_music(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.music.detail(id).await?))
}

pub async fn create_music(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiJson(command): ApiJson<CreateMusicCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::created(
        state.music.create(viewer, command).await?,
    ))
}

pub async fn update_music(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
    ApiJson(command): ApiJson<UpdateMusicCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(
        state.music.update(viewer, id, command).await?,
    ))
}

pub async fn delete_music(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    ApiPath(id): ApiPath<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    state.music.delete(viewer, id).await?;
    Ok(ApiResponse::done("deleted"))
}
