//! Uniform JSON envelope returned by every endpoint.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `{msg, data, success, version, code}`; `code` mirrors the HTTP status.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub msg: String,
    pub data: Option<T>,
    pub success: bool,
    pub version: &'static str,
    pub code: u16,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(status: StatusCode, msg: impl Into<String>, data: Option<T>) -> Self {
        Self {
            msg: msg.into(),
            data,
            success: status.is_success(),
            version: API_VERSION,
            code: status.as_u16(),
        }
    }
}

pub struct ApiResponse<T> {
    status: StatusCode,
    msg: &'static str,
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            msg: "ok",
            data: Some(data),
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            msg: "created",
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// Successful write with nothing to return; `data` serializes as null.
    pub fn done(msg: &'static str) -> Self {
        Self {
            status: StatusCode::OK,
            msg,
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(Envelope::new(self.status, self.msg, self.data)),
        )
            .into_response()
    }
}
