//! Cursor pagination for connection queries.

use objsync_protocol::ConnectionKey;

/// Parameters of one page of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of items to return. Must be at least 1.
    pub limit: usize,
    /// Key of the last item of the previous page.
    pub exclusive_start: Option<ConnectionKey>,
}

impl PageRequest {
    /// Requests the first page.
    pub fn first(limit: usize) -> Self {
        Self {
            limit,
            exclusive_start: None,
        }
    }

    /// Requests the page following `key`.
    pub fn after(limit: usize, key: ConnectionKey) -> Self {
        Self {
            limit,
            exclusive_start: Some(key),
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items in key order.
    pub items: Vec<T>,
    /// Key to continue from, `None` when this is the last page.
    pub last_key: Option<ConnectionKey>,
}

impl<T> Page<T> {
    /// Creates the last page of a query.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            last_key: None,
        }
    }

    /// Returns true if no further page exists.
    pub fn is_last(&self) -> bool {
        self.last_key.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_constructors() {
        assert_eq!(PageRequest::first(10).exclusive_start, None);
        let next = PageRequest::after(10, ConnectionKey::new("o1", "c9"));
        assert_eq!(next.exclusive_start, Some(ConnectionKey::new("o1", "c9")));
    }

    #[test]
    fn last_page() {
        let page: Page<u8> = Page::last(vec![1, 2]);
        assert!(page.is_last());
    }
}
