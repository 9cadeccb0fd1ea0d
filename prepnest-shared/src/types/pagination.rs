use serde::{Deserialize, Serialize};

/// Page-numbered pagination, zero-based: page 0 is the first window of
/// whatever ordering the endpoint applies (for message history, the most
/// recent batch).
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    20
}

impl PaginationParams {
    pub fn offset(&self) -> u64 {
        self.page * self.limit()
    }

    pub fn limit(&self) -> u64 {
        self.limit.clamp(1, 100)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { page: 0, limit: 20 }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T: Serialize> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub has_more: bool,
}

impl<T: Serialize> Paginated<T> {
    pub fn new(items: Vec<T>, total: u64, params: &PaginationParams) -> Self {
        let limit = params.limit();
        let has_more = params.offset() + (items.len() as u64) < total;
        Self {
            items,
            total,
            page: params.page,
            limit,
            has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_zero_starts_at_offset_zero() {
        let params = PaginationParams { page: 0, limit: 20 };
        assert_eq!(params.offset(), 0);
        assert_eq!(params.limit(), 20);
    }

    #[test]
    fn page_n_offsets_by_n_windows() {
        let params = PaginationParams { page: 3, limit: 25 };
        assert_eq!(params.offset(), 75);
    }

    #[test]
    fn limit_is_clamped() {
        let params = PaginationParams { page: 0, limit: 1000 };
        assert_eq!(params.limit(), 100);
        let params = PaginationParams { page: 0, limit: 0 };
        assert_eq!(params.limit(), 1);
    }

    #[test]
    fn has_more_reflects_remaining_items() {
        let params = PaginationParams { page: 0, limit: 10 };
        let page: Paginated<u32> = Paginated::new((0..10).collect(), 25, &params);
        assert!(page.has_more);

        let params = PaginationParams { page: 2, limit: 10 };
        let page: Paginated<u32> = Paginated::new((20..25).collect(), 25, &params);
        assert!(!page.has_more);
    }
}
