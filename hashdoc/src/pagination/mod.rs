use serde::Serialize;

/// One page of query results with the paging metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// 1-based page number.
    pub page: usize,
    pub per_page: usize,
    /// Matching records across all pages.
    pub total: usize,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    /// Page 0 is treated as page 1 and a page size of 0 as 1.
    pub fn new(page: usize, per_page: usize, total: usize, items: Vec<T>) -> Self {
        Page {
            page: page.max(1),
            per_page: per_page.max(1),
            total,
            items,
        }
    }

    /// Offset of the first record of `page`.
    pub fn offset(page: usize, per_page: usize) -> usize {
        (page.max(1) - 1).saturating_mul(per_page.max(1))
    }

    pub fn pages(&self) -> usize {
        self.total.div_ceil(self.per_page)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            page: self.page,
            per_page: self.per_page,
            total: self.total,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}
