//! Page-index pagination and the envelope every listing responds with.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaginationError {
    #[error("`{0}` is required")]
    Missing(&'static str),
    #[error("`{0}` must be a positive integer")]
    NotPositive(&'static str),
    #[error("`pageSize` must not exceed {max}")]
    TooLarge { max: u32 },
}

/// Validated 1-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageParams {
    index: u32,
    size: u32,
}

impl PageParams {
    pub fn new(index: u32, size: u32) -> Result<Self, PaginationError> {
        if index == 0 {
            return Err(PaginationError::NotPositive("pageIndex"));
        }
        if size == 0 {
            return Err(PaginationError::NotPositive("pageSize"));
        }
        Ok(Self { index, size })
    }

    /// Validates raw query values: both present, positive, and
    /// `size <= max_size`.
    pub fn from_query(
        index: Option<i64>,
        size: Option<i64>,
        max_size: u32,
    ) -> Result<Self, PaginationError> {
        let index = positive(index, "pageIndex")?;
        let size = positive(size, "pageSize")?;
        if size > max_size {
            return Err(PaginationError::TooLarge { max: max_size });
        }
        Self::new(index, size)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.index - 1) * i64::from(self.size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }
}

fn positive(value: Option<i64>, name: &'static str) -> Result<u32, PaginationError> {
    let value = value.ok_or(PaginationError::Missing(name))?;
    if value <= 0 {
        return Err(PaginationError::NotPositive(name));
    }
    u32::try_from(value).map_err(|_| PaginationError::NotPositive(name))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEnvelope<T> {
    pub page_index: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub total_records: u64,
    pub items: Vec<T>,
}

impl<T> PageEnvelope<T> {
    /// Items beyond `page_size` are dropped.
    pub fn build(page_index: u32, page_size: u32, total_records: u64, mut items: Vec<T>) -> Self {
        items.truncate(page_size as usize);
        let total_pages = if page_size == 0 {
            0
        } else {
            total_records.div_ceil(u64::from(page_size))
        };
        Self {
            page_index,
            page_size,
            total_pages,
            total_records,
            items,
        }
    }

    pub fn for_page(page: PageParams, total_records: u64, items: Vec<T>) -> Self {
        Self::build(page.index(), page.size(), total_records, items)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PageEnvelope<U> {
        PageEnvelope {
            page_index: self.page_index,
            page_size: self.page_size,
            total_pages: self.total_pages,
            total_records: self.total_records,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}
