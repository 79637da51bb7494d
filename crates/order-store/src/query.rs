use chrono::{DateTime, Utc};
use common::{OrderStatus, UserId};
use serde::Serialize;

/// Largest page a single query returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// Builder for constructing order searches.
///
/// Used for the user's order history and the back-office condition search.
#[derive(Debug, Clone)]
pub struct OrderQuery {
    /// Filter by exact business order number.
    pub number: Option<String>,

    /// Filter by owning user.
    pub user_id: Option<UserId>,

    /// Filter by current status.
    pub status: Option<OrderStatus>,

    /// Orders created at or after this timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Orders created at or before this timestamp.
    pub to_timestamp: Option<DateTime<Utc>>,

    /// 1-based page number.
    pub page: usize,

    pub page_size: usize,
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            number: None,
            user_id: None,
            status: None,
            from_timestamp: None,
            to_timestamp: None,
            page: 1,
            page_size: 10,
        }
    }
}

impl OrderQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one user's orders.
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    /// Selects a page; page numbers below 1 are treated as 1 and the page
    /// size is clamped to `1..=MAX_PAGE_SIZE`.
    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page.max(1);
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Number of records to skip, saturating far past the last page.
    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1).saturating_mul(self.page_size)
    }
}

/// One page of results plus the total match count.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub total: u64,
    pub records: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_query_is_first_page() {
        let query = OrderQuery::new();
        assert_eq!(query.page, 1);
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn offset_follows_page() {
        let query = OrderQuery::for_user(UserId::new(1)).page(3, 20);
        assert_eq!(query.offset(), 40);

        let query = OrderQuery::new().page(0, 0);
        assert_eq!(query.page, 1);
        assert_eq!(query.page_size, 1);
    }

    #[test]
    fn oversized_page_parameters_are_bounded() {
        let query = OrderQuery::new().page(1, usize::MAX);
        assert_eq!(query.page_size, MAX_PAGE_SIZE);

        let query = OrderQuery::new().page(usize::MAX, 10);
        assert_eq!(query.offset(), usize::MAX);

        let query = OrderQuery::new().page(usize::MAX, usize::MAX);
        assert_eq!(query.page_size, MAX_PAGE_SIZE);
        assert_eq!(query.offset(), usize::MAX);
    }

    #[test]
    fn builder_sets_filters() {
        let query = OrderQuery::new()
            .number("A1")
            .status(OrderStatus::Delivering);
        assert_eq!(query.number.as_deref(), Some("A1"));
        assert_eq!(query.status, Some(OrderStatus::Delivering));
    }
}
