//! Field rules shared by the write paths.

use crate::domain::error::DomainError;

pub const TITLE_MAX_CHARS: usize = 200;
pub const NAME_MAX_CHARS: usize = 120;
pub const BODY_MAX_CHARS: usize = 20_000;
pub const URL_MAX_CHARS: usize = 2_048;

/// Trims `value` and checks it is non-blank and at most `max_chars` long.
pub fn required_text(
    field: &'static str,
    value: &str,
    max_chars: usize,
) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("`{field}` must not be blank")));
    }
    if trimmed.chars().count() > max_chars {
        return Err(DomainError::validation(format!(
            "`{field}` must be at most {max_chars} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Like [`required_text`], but blank input becomes `None`.
pub fn optional_text(
    field: &'static str,
    value: Option<&str>,
    max_chars: usize,
) -> Result<Option<String>, DomainError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => required_text(field, text, max_chars).map(Some),
    }
}

pub fn positive_duration(field: &'static str, secs: i32) -> Result<i32, DomainError> {
    if secs <= 0 {
        return Err(DomainError::validation(format!(
            "`{field}` must be a positive number of seconds"
        )));
    }
    Ok(secs)
}
