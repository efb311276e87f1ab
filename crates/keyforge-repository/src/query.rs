//! Filter, sort, and paging parameters for list operations.
//!
//! Empty filter sets mean "no constraint". Paging is zero-based; page size
//! defaults to [`DEFAULT_PAGE_SIZE`] and a zero size is rejected explicitly
//! rather than silently clamped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::model::KeyPoolAlgorithm;

/// Default number of rows per page.
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Upper bound on page size, to keep a single read bounded.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Sortable key pool columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPoolSort {
    Id,
    Name,
    Algorithm,
    Status,
}

/// Sortable key columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySort {
    Id,
    GenerateDate,
}

/// Zero-based page selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            number: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Page {
    /// Reject unusable page sizes.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidQuery`] if the size is zero or
    /// exceeds [`MAX_PAGE_SIZE`].
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if self.size == 0 {
            return Err(RepositoryError::InvalidQuery {
                reason: "page size must be greater than zero".to_owned(),
            });
        }
        if self.size > MAX_PAGE_SIZE {
            return Err(RepositoryError::InvalidQuery {
                reason: format!("page size {} exceeds maximum {MAX_PAGE_SIZE}", self.size),
            });
        }
        Ok(())
    }

    /// Row offset of the first item on this page.
    #[must_use]
    pub fn offset(&self) -> usize {
        (self.number as usize).saturating_mul(self.size as usize)
    }
}

/// Filters for listing key pools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyPoolQuery {
    /// Restrict to these pool ids (empty = all).
    pub ids: Vec<Uuid>,
    /// Restrict to these names (empty = all).
    pub names: Vec<String>,
    /// Restrict to these algorithms (empty = all).
    pub algorithms: Vec<KeyPoolAlgorithm>,
    pub versioning_allowed: Option<bool>,
    pub import_allowed: Option<bool>,
    pub export_allowed: Option<bool>,
    /// Applied in order; ties broken by the next key.
    pub sort: Vec<(KeyPoolSort, SortDirection)>,
    pub page: Page,
}

impl KeyPoolQuery {
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidQuery`] for unusable paging.
    pub fn validate(&self) -> Result<(), RepositoryError> {
        self.page.validate()
    }
}

/// Filters for listing keys, per pool or globally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyQuery {
    /// Restrict to these pools (empty = all pools; ignored by the per-pool
    /// list operation, which fixes the pool).
    pub pool_ids: Vec<Uuid>,
    /// Restrict to these key ids (empty = all).
    pub ids: Vec<Uuid>,
    /// Only keys generated at or after this instant.
    pub generated_after: Option<DateTime<Utc>>,
    /// Only keys generated at or before this instant.
    pub generated_before: Option<DateTime<Utc>>,
    pub sort: Vec<(KeySort, SortDirection)>,
    pub page: Page,
}

impl KeyQuery {
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidQuery`] for unusable paging or an
    /// inverted date range.
    pub fn validate(&self) -> Result<(), RepositoryError> {
        self.page.validate()?;
        if let (Some(after), Some(before)) = (self.generated_after, self.generated_before) {
            if after > before {
                return Err(RepositoryError::InvalidQuery {
                    reason: format!("generated_after {after} is later than generated_before {before}"),
                });
            }
        }
        Ok(())
    }
}
