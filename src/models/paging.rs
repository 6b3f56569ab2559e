//! Paging parameters and page results.

use serde::{Deserialize, Serialize};

/// Page request: how many rows to skip, how many to take, and whether to
/// compute the total match count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingParams {
    /// Rows to skip. Negative values are treated as zero.
    #[serde(default)]
    pub skip: Option<i64>,
    /// Maximum rows to return. Capped by the persistence's max page size.
    #[serde(default)]
    pub take: Option<i64>,
    /// Whether to run an extra count query.
    #[serde(default)]
    pub total: bool,
}

impl PagingParams {
    /// Creates paging parameters.
    #[must_use]
    pub const fn new(skip: Option<i64>, take: Option<i64>, total: bool) -> Self {
        Self { skip, take, total }
    }

    /// Effective skip: the requested value, or zero when absent or negative.
    #[must_use]
    pub fn skip_or(&self, default: i64) -> i64 {
        self.skip.unwrap_or(default).max(0)
    }

    /// Effective take, never larger than `max_take` and never negative.
    #[must_use]
    pub fn take_or(&self, max_take: i64) -> i64 {
        self.take.map_or(max_take, |take| take.min(max_take)).max(0)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPage<T> {
    /// Entities on this page.
    pub data: Vec<T>,
    /// Total number of matching rows; present only when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

impl<T> DataPage<T> {
    /// Creates a page.
    #[must_use]
    pub const fn new(data: Vec<T>, total: Option<i64>) -> Self {
        Self { data, total }
    }
}

impl<T> Default for DataPage<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            total: None,
        }
    }
}
