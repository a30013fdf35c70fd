//! Page-based pagination for list endpoints.
//!
//! Metadata mirrors Laravel's length-aware paginator: `current_page`, `per_page`, `total`
//! and `last_page`.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub const DEFAULT_PER_PAGE: i64 = 15;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    /// 1-indexed. Defaults to 1.
    #[param(minimum = 1, default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,

    /// Defaults to 15, capped at 100.
    #[param(minimum = 1, maximum = 100, default = 15)]
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    DEFAULT_PER_PAGE
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PaginationParams {
    pub fn new(page: i64, per_page: i64) -> Self {
        Self { page, per_page }
    }

    pub fn page(&self) -> i64 {
        self.page.max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }

    pub fn limit_offset(&self) -> (i64, i64) {
        (self.per_page(), (self.page() - 1) * self.per_page())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PaginationMeta {
    pub current_page: i64,
    pub per_page: i64,
    pub total: i64,
    pub last_page: i64,
}

impl PaginationMeta {
    pub fn new(current_page: i64, per_page: i64, total: i64) -> Self {
        Self {
            current_page,
            per_page,
            total,
            last_page: ((total + per_page - 1) / per_page).max(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaginatedResponse<T: Serialize> {
    pub items: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T: Serialize> PaginatedResponse<T> {
    pub fn from_params(items: Vec<T>, params: &PaginationParams, total: i64) -> Self {
        Self {
            items,
            pagination: PaginationMeta::new(params.page(), params.per_page(), total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_are_clamped() {
        assert_eq!(PaginationParams::new(0, 15).page(), 1);
        assert_eq!(PaginationParams::new(1, 500).per_page(), MAX_PER_PAGE);
        assert_eq!(PaginationParams::new(1, 0).per_page(), 1);
    }

    #[test]
    fn test_limit_offset() {
        assert_eq!(PaginationParams::default().limit_offset(), (15, 0));
        assert_eq!(PaginationParams::new(3, 10).limit_offset(), (10, 20));
    }

    #[test]
    fn test_last_page() {
        assert_eq!(PaginationMeta::new(1, 15, 0).last_page, 1);
        assert_eq!(PaginationMeta::new(1, 15, 15).last_page, 1);
        assert_eq!(PaginationMeta::new(1, 15, 16).last_page, 2);
    }
}
