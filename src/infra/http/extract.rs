//! Request extractors whose rejections use the JSON envelope.

use axum::extract::{FromRequest, FromRequestParts, Path, Query};
use axum::http::request::Parts;
use axum::{Json, http::HeaderValue};

use crate::domain::entities::RecordId;

use super::error::{ApiError, codes};

pub const VIEWER_HEADER: &str = "x-viewer-id";

#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Viewer identity forwarded by the auth gateway. Absent means anonymous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer(pub Option<RecordId>);

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get(VIEWER_HEADER) {
            None => Ok(Viewer(None)),
            Some(value) => parse_viewer(value).map(|id| Viewer(Some(id))),
        }
    }
}

fn parse_viewer(value: &HeaderValue) -> Result<RecordId, ApiError> {
    let invalid = || {
        ApiError::bad_request(
            codes::INVALID_VIEWER,
            format!("`{VIEWER_HEADER}` must be a positive integer"),
        )
    };
    let id: RecordId = value
        .to_str()
        .map_err(|_| invalid())?
        .trim()
        .parse()
        .map_err(|_| invalid())?;
    if id <= 0 {
        return Err(invalid());
    }
    Ok(id)
}
