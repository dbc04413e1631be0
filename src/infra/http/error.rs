use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::{ErrorReport, ServiceError};
use crate::application::repos::RepoError;
use crate::cache::{KeyError, StoreError};
use crate::domain::error::DomainError;

use super::response::Envelope;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const INVALID_QUERY: &str = "invalid_query";
    pub const INVALID_BODY: &str = "invalid_body";
    pub const INVALID_PATH: &str = "invalid_path";
    pub const INVALID_PAGINATION: &str = "invalid_pagination";
    pub const INVALID_VIEWER: &str = "invalid_viewer";
    pub const UNKNOWN_ENTITY: &str = "unknown_entity";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_FOUND: &str = "not_found";
    pub const DUPLICATE: &str = "duplicate";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const INTEGRITY: &str = "integrity_error";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const REPO: &str = "repo_error";
    pub const CACHE: &str = "cache_error";
    pub const INTERNAL: &str = "internal_error";
}

/// Machine-readable detail carried in `data` of a failed envelope.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            hint,
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message, None)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report_detail = format!(
            "{}: {}",
            self.code,
            self.hint.as_deref().unwrap_or(&self.message)
        );
        // Server errors keep their detail out of the body.
        let hint = if self.status.is_server_error() {
            None
        } else {
            self.hint
        };
        let body = Envelope::new(
            self.status,
            self.message,
            Some(ErrorDetail {
                reason: self.code,
                hint,
            }),
        );
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message("infra::http", self.status, report_detail).attach(&mut response);
        response
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Domain(domain) => domain.into(),
            ServiceError::Pagination(err) => {
                ApiError::bad_request(codes::INVALID_PAGINATION, err.to_string())
            }
            ServiceError::Unauthenticated => ApiError::new(
                StatusCode::UNAUTHORIZED,
                codes::UNAUTHORIZED,
                "viewer identity required",
                None,
            ),
            ServiceError::CacheKey(err) => err.into(),
            ServiceError::Repo(err) => err.into(),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { entity } => ApiError::not_found(format!("{entity} not found")),
            DomainError::Validation { message } => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "validation failed",
                Some(message),
            ),
            DomainError::NotOwner { entity } => ApiError::new(
                StatusCode::FORBIDDEN,
                codes::FORBIDDEN,
                format!("only the owner may modify this {entity}"),
                None,
            ),
        }
    }
}

impl From<KeyError> for ApiError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::UnknownEntity(_) => {
                ApiError::bad_request(codes::UNKNOWN_ENTITY, err.to_string())
            }
            KeyError::UnknownFilter { .. } => {
                ApiError::bad_request(codes::BAD_REQUEST, err.to_string())
            }
            other => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::INTERNAL,
                "internal error",
                Some(other.to_string()),
            ),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Duplicate { constraint } => ApiError::new(
                StatusCode::CONFLICT,
                codes::DUPLICATE,
                "duplicate record",
                Some(constraint),
            ),
            RepoError::NotFound => ApiError::not_found("resource not found"),
            RepoError::InvalidInput { message } => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "invalid input",
                Some(message),
            ),
            RepoError::Integrity { message } => ApiError::new(
                StatusCode::CONFLICT,
                codes::INTEGRITY,
                "integrity constraint violated",
                Some(message),
            ),
            RepoError::Timeout => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::DB_TIMEOUT,
                "database timeout",
                None,
            ),
            RepoError::Persistence(message) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::REPO,
                "persistence error",
                Some(message),
            ),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::CACHE,
            "cache store unavailable",
            Some(err.to_string()),
        )
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_QUERY,
            "invalid query parameters",
            Some(rejection.body_text()),
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_BODY,
            "invalid request body",
            Some(rejection.body_text()),
        )
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_PATH,
            "invalid path parameter",
            Some(rejection.body_text()),
        )
    }
}
