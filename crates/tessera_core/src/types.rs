//! Core type definitions for Tessera.

use std::fmt;

/// Identifier of a data page.
///
/// Page id 0 is reserved for the storage zero page and is cached apart from
/// every other id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u64);

impl PageId {
    /// The reserved zero page.
    pub const ZERO: PageId = PageId(0);

    /// Creates a new page ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// Position of a page in the write-ahead log.
///
/// Log page ids are assigned sequentially and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogPageId(pub u64);

impl LogPageId {
    /// Creates a new log page ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the id `count` pages further along the log.
    #[must_use]
    pub const fn advance(self, count: u64) -> Self {
        Self(self.0 + count)
    }

    /// Returns the number of pages from `earlier` to `self`.
    #[must_use]
    pub const fn distance_from(self, earlier: LogPageId) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for LogPageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log:{}", self.0)
    }
}

/// Identifier of a modify transaction.
///
/// Transaction ids are stamped into every page a transaction writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrxId(pub u64);

impl TrxId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trx:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_page_arithmetic() {
        let start = LogPageId::new(3);
        let end = start.advance(7);
        assert_eq!(end, LogPageId::new(10));
        assert_eq!(end.distance_from(start), 7);
        assert_eq!(start.distance_from(end), 0);
    }

    #[test]
    fn display() {
        assert_eq!(PageId::new(5).to_string(), "page:5");
        assert_eq!(LogPageId::new(9).to_string(), "log:9");
        assert_eq!(TrxId::new(2).to_string(), "trx:2");
    }
}
