use serde::{Deserialize, Serialize};

use crate::config;

/// Pagination query parameters. `page` is 1-based; both values are clamped
/// against the configured limits before any SQL is built.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        let api = &config::config().api;
        self.page_size
            .unwrap_or(api.default_page_size)
            .clamp(1, api.max_page_size)
    }

    /// SQL OFFSET for the resolved page
    pub fn offset(&self) -> i64 {
        (self.page() as i64 - 1) * self.page_size() as i64
    }

    pub fn limit(&self) -> i64 {
        self.page_size() as i64
    }
}

/// One page of results. `total` always counts every row matching the filter,
/// regardless of which page was requested.
#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T: Serialize> Page<T> {
    pub fn new(items: Vec<T>, total: i64, query: &PageQuery) -> Self {
        let page_size = query.page_size();
        Self {
            items,
            total,
            page: query.page(),
            page_size,
            total_pages: total_pages(total, page_size),
        }
    }
}

/// ceil(total / page_size), with 0 rows yielding 0 pages
pub fn total_pages(total: i64, page_size: u32) -> u32 {
    if total <= 0 {
        return 0;
    }
    ((total as u64 + page_size as u64 - 1) / page_size as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_is_ceiling_division() {
        assert_eq!(total_pages(0, 25), 0);
        assert_eq!(total_pages(1, 25), 1);
        assert_eq!(total_pages(25, 25), 1);
        assert_eq!(total_pages(26, 25), 2);
        assert_eq!(total_pages(100, 10), 10);
        assert_eq!(total_pages(101, 10), 11);
    }

    #[test]
    fn page_defaults_to_first() {
        let q = PageQuery { page: None, page_size: Some(10) };
        assert_eq!(q.page(), 1);
        assert_eq!(q.offset(), 0);
        assert_eq!(q.limit(), 10);
    }

    #[test]
    fn page_zero_is_clamped_to_one() {
        let q = PageQuery { page: Some(0), page_size: Some(10) };
        assert_eq!(q.page(), 1);
        assert_eq!(q.offset(), 0);
    }

    #[test]
    fn offset_advances_by_page_size() {
        let q = PageQuery { page: Some(3), page_size: Some(20) };
        assert_eq!(q.offset(), 40);
    }

    #[test]
    fn page_size_is_clamped_to_config_max() {
        let q = PageQuery { page: Some(1), page_size: Some(1_000_000) };
        assert!(q.page_size() <= crate::config::config().api.max_page_size);
    }
}
