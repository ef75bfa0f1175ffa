//! Property-based test generators using proptest.
//!
//! Provides strategies for generating page ids, page bodies and
//! transactions that respect the log's limits.

use crate::fixtures::TEST_PAGE_SIZE;
use proptest::prelude::*;
use tessera_core::PageId;
use tessera_storage::PAGE_HEADER_SIZE;

/// Largest body that fits a fixture page.
pub const MAX_TEST_BODY: usize = TEST_PAGE_SIZE - PAGE_HEADER_SIZE;

/// One change inside a modify transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOp {
    /// Writes a page body.
    Write(PageId, Vec<u8>),
    /// Frees a page.
    Free(PageId),
}

/// Strategy for page ids below `max`.
pub fn page_id_strategy(max: u64) -> impl Strategy<Value = PageId> {
    (0..max).prop_map(PageId)
}

/// Strategy for page bodies that fit a fixture page.
pub fn page_body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=MAX_TEST_BODY)
}

/// Strategy for a single page change, mostly writes.
pub fn page_op_strategy(max_page: u64) -> impl Strategy<Value = PageOp> {
    prop_oneof![
        4 => (page_id_strategy(max_page), page_body_strategy())
            .prop_map(|(id, body)| PageOp::Write(id, body)),
        1 => page_id_strategy(max_page).prop_map(PageOp::Free),
    ]
}

/// Strategy for a transaction of 1 to `max_ops` changes.
pub fn transaction_strategy(max_page: u64, max_ops: usize) -> impl Strategy<Value = Vec<PageOp>> {
    prop::collection::vec(page_op_strategy(max_page), 1..=max_ops.max(1))
}

/// Strategy for a history of up to `max_trx` transactions.
pub fn history_strategy(
    max_page: u64,
    max_ops: usize,
    max_trx: usize,
) -> impl Strategy<Value = Vec<Vec<PageOp>>> {
    prop::collection::vec(transaction_strategy(max_page, max_ops), 1..=max_trx.max(1))
}

/// Strategy for page ids that collide in a cache of `cache_size` slots:
/// every id maps to the same slot as `base`.
pub fn colliding_ids_strategy(base: u64, cache_size: u64, count: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1u64..1000, count).prop_map(move |multipliers| {
        multipliers
            .into_iter()
            .map(|m| base + m * cache_size)
            .collect()
    })
}

/// Applies `ops` to `log` as one transaction.
///
/// # Panics
///
/// Panics if the transaction cannot be committed.
pub fn apply_ops(log: &tessera_core::PagedLog, ops: &[PageOp]) {
    let mut trx = log.begin_modify().expect("Failed to begin modify");
    for op in ops {
        match op {
            PageOp::Write(id, body) => trx.write_page(*id, body).expect("Failed to write page"),
            PageOp::Free(id) => trx.free_page(*id),
        }
    }
    trx.commit().expect("Failed to commit");
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn bodies_fit_pages() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let body = page_body_strategy().new_tree(&mut runner).unwrap().current();
            assert!(body.len() <= MAX_TEST_BODY);
        }
    }

    #[test]
    fn colliding_ids_share_slot() {
        let mut runner = TestRunner::default();
        let ids = colliding_ids_strategy(5, 64, 10)
            .new_tree(&mut runner)
            .unwrap()
            .current();
        assert!(ids.iter().all(|id| id % 64 == 5));
    }

    proptest! {
        #[test]
        fn transactions_are_non_empty(trx in transaction_strategy(16, 8)) {
            prop_assert!(!trx.is_empty());
            prop_assert!(trx.len() <= 8);
        }
    }
}
