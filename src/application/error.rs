use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{
    application::{pagination::PaginationError, repos::RepoError},
    cache::{KeyError, StoreError},
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Error chain attached to a response so the logging middleware can report
/// what the client was not shown.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Failures surfaced by the application services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error("authentication required")]
    Unauthenticated,
    #[error(transparent)]
    CacheKey(#[from] KeyError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl ServiceError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::Domain(DomainError::not_found(entity))
    }

    pub fn not_owner(entity: &'static str) -> Self {
        Self::Domain(DomainError::not_owner(entity))
    }
}

/// Process-level failures reported by `main`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("cache store error: {0}")]
    Cache(#[from] StoreError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn report_collects_the_source_chain() {
        let error = Outer(std::io::Error::other("inner"));
        let report = ErrorReport::from_error("test", StatusCode::BAD_GATEWAY, &error);
        assert_eq!(report.messages, vec!["outer".to_string(), "inner".to_string()]);
        assert_eq!(report.status, StatusCode::BAD_GATEWAY);
    }
}
