use serde::{Deserialize, Serialize};

/// Upper bound on page size.
pub const MAX_PAGE_LIMIT: usize = 1000;

/// A page request: zero-based page index and page size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page,
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    /// The first page with the given size.
    pub fn first(limit: usize) -> Self {
        Self::new(0, limit)
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.limit)
    }

    /// Cut one page out of an already-ordered list.
    pub fn apply<T>(&self, items: Vec<T>) -> Paged<T> {
        let total = items.len();
        let items = items
            .into_iter()
            .skip(self.offset())
            .take(self.limit)
            .collect();
        Paged {
            items,
            total,
            page: self.page,
            limit: self.limit,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, 50)
    }
}

/// One page of results plus the total size of the underlying list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

impl<T> Paged<T> {
    pub fn has_more(&self) -> bool {
        self.page.saturating_add(1).saturating_mul(self.limit) < self.total
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paged<U> {
        Paged {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_slices_pages() {
        let items: Vec<u32> = (0..25).collect();
        let p0 = Page::new(0, 10).apply(items.clone());
        assert_eq!(p0.items, (0..10).collect::<Vec<_>>());
        assert_eq!(p0.total, 25);
        assert!(p0.has_more());

        let p2 = Page::new(2, 10).apply(items.clone());
        assert_eq!(p2.items, (20..25).collect::<Vec<_>>());
        assert!(!p2.has_more());

        let p9 = Page::new(9, 10).apply(items);
        assert!(p9.items.is_empty());
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(Page::new(0, 0).limit, 1);
        assert_eq!(Page::new(0, 1_000_000).limit, MAX_PAGE_LIMIT);
    }
}
