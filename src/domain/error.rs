use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("`{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("validation failed: {message}")]
    Validation { message: String },
    #[error("only the owner may modify this `{entity}`")]
    NotOwner { entity: &'static str },
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_owner(entity: &'static str) -> Self {
        Self::NotOwner { entity }
    }
}
