//! Page/limit pagination shared by every listing.

use serde::{Deserialize, Serialize};

/// Hard ceiling for any `limit` a client may request.
pub const MAX_PAGE_LIMIT: u64 = 100;

/// 1-based page number and page size, already clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u64,
    limit: u64,
}

impl PageRequest {
    /// Missing or zero values fall back to page 1 and `default_limit`.
    pub fn new(page: Option<u64>, limit: Option<u64>, default_limit: u64) -> Self {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(default_limit)
            .clamp(1, MAX_PAGE_LIMIT);
        Self { page, limit }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.limit
    }

    /// Index range of this page within a collection of `len` items.
    pub fn range(&self, len: usize) -> std::ops::Range<usize> {
        let start = (self.offset() as usize).min(len);
        let end = (start + self.limit as usize).min(len);
        start..end
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None, 10)
    }
}

/// Pagination block returned next to every page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current: u64,
    pub pages: u64,
    pub total: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
}

impl Pagination {
    pub fn new(request: PageRequest, total: u64) -> Self {
        let current = request.page();
        let pages = total.div_ceil(request.limit());
        let has_next_page = current < pages;
        let has_prev_page = current > 1;
        Self {
            current,
            pages,
            total,
            has_next_page,
            has_prev_page,
            next_page: has_next_page.then_some(current + 1),
            prev_page: has_prev_page.then_some(current - 1),
        }
    }
}
