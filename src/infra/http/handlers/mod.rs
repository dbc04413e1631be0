//! Route handlers grouped by resource.

mod blogs;
mod cache;
mod journals;
mod music;
mod playlists;
mod posts;
mod social;

pub use blogs::*;
pub use cache::*;
pub use journals::*;
pub use music::*;
pub use playlists::*;
pub use posts::*;
pub use social::*;

use serde::Deserialize;

use crate::application::{error::ServiceError, pagination::PageParams};

use super::error::ApiError;

/// Required pagination parameters; no defaults are applied.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page_index: Option<i64>,
    pub page_size: Option<i64>,
}

fn page_params(
    page_index: Option<i64>,
    page_size: Option<i64>,
    max_page_size: u32,
) -> Result<PageParams, ApiError> {
    PageParams::from_query(page_index, page_size, max_page_size)
        .map_err(|err| ApiError::from(ServiceError::from(err)))
}

