//! Page-number pagination shared by the catalog listings.

use std::iter::{Skip, Take};

use serde::Serialize;

/// A validated page request: `page` is 1-based, `page_size` is at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageWindow {
    page: u32,
    page_size: u32,
}

impl PageWindow {
    /// Build a window. Callers pass values already range-checked by the request
    /// validator; zero inputs are clamped to one so the arithmetic stays total.
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of records to skip before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1).saturating_mul(u64::from(self.page_size))
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }

    /// Restrict an already-ordered sequence to this window. Pages past the
    /// end yield nothing.
    pub fn apply<I: Iterator>(&self, ordered: I) -> Take<Skip<I>> {
        let start = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        ordered.skip(start).take(self.page_size as usize)
    }
}

/// `ceil(total / page_size)`; zero matches means zero pages.
pub fn page_count(total: u64, page_size: u32) -> u64 {
    let size = u64::from(page_size.max(1));
    total.div_ceil(size)
}

/// One page of results plus the total number of pages for the same query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub page_count: u64,
}

impl<T> PagedResult<T> {
    /// Pair a page of items with the page count derived from the same total
    /// that produced the slice.
    pub fn from_total(items: Vec<T>, total: u64, window: PageWindow) -> Self {
        Self {
            items,
            page_count: page_count(total, window.page_size()),
        }
    }
}
