//! Property tests across the log, the cache and replication.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tessera_core::{CoreError, LockManager, LogPageId, LogStorage, PageCache, PageId};
use tessera_repl_agent::SlaveConfig;
use tessera_testkit::prelude::*;

fn model_of(history: &[Vec<PageOp>]) -> BTreeMap<PageId, Option<Vec<u8>>> {
    let mut model = BTreeMap::new();
    for trx in history {
        for op in trx {
            match op {
                PageOp::Write(id, body) => model.insert(*id, Some(body.clone())),
                PageOp::Free(id) => model.insert(*id, None),
            };
        }
    }
    model
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reads_follow_committed_history(history in history_strategy(24, 6, 12)) {
        let log = TestLog::memory();
        for trx in &history {
            apply_ops(&log, trx);
        }

        let read = log.begin_read().unwrap();
        for (id, expected) in model_of(&history) {
            prop_assert_eq!(read.read(id).unwrap(), expected);
        }
    }

    #[test]
    fn slave_converges_from_any_prefix(
        master_pages in 1u64..40,
        split in 0.0f64..=1.0,
        chunk in 1u32..8,
    ) {
        let slave_pages = (master_pages as f64 * split) as u64;
        let pair = ReplicaPair::new(master_pages, slave_pages.min(master_pages));
        let (agent, _faults) = pair.loopback_agent(
            SlaveConfig::new("loopback", 0).with_max_pages_per_transaction(chunk),
        );
        let mut client = pair.connector().client();

        let applied = agent.run_once(&mut client).unwrap();
        prop_assert_eq!(applied, master_pages - slave_pages.min(master_pages));
        let (master_next, slave_next) = pair.positions();
        prop_assert_eq!(master_next, slave_next);
        pair.assert_prefix();

        prop_assert_eq!(agent.run_once(&mut client).unwrap(), 0);
    }

    #[test]
    fn replicated_slave_reads_like_master(history in history_strategy(16, 4, 8)) {
        let master = TestLog::memory();
        for trx in &history {
            apply_ops(&master, trx);
        }
        let pair = ReplicaPair {
            slave: TestLog::memory_slave(master.log_info().unwrap().log_id),
            master,
        };
        let (agent, _faults) = pair.loopback_agent(SlaveConfig::new("loopback", 0));
        agent.run_once(&mut pair.connector().client()).unwrap();

        let master_read = pair.master.begin_read().unwrap();
        let slave_read = pair.slave.begin_read().unwrap();
        for id in model_of(&history).keys() {
            prop_assert_eq!(slave_read.read(*id).unwrap(), master_read.read(*id).unwrap());
        }
    }

    #[test]
    fn colliding_ids_never_return_stale_pages(
        ids in colliding_ids_strategy(3, 16, 8),
    ) {
        let cache = PageCache::new(TEST_PAGE_SIZE, 16, 4);
        let mut buf = vec![0u8; TEST_PAGE_SIZE];
        for (i, id) in ids.iter().enumerate() {
            cache.put_page(PageId(*id), &vec![i as u8; TEST_PAGE_SIZE]);
        }
        let last = *ids.last().unwrap();
        for (i, id) in ids.iter().enumerate() {
            if cache.get_page(PageId(*id), &mut buf) {
                prop_assert_eq!(*id, last);
                let newest = ids.iter().rposition(|x| x == id).unwrap();
                prop_assert!(buf.iter().all(|b| *b == newest as u8), "stale page at {}", i);
            }
        }
    }
}

#[test]
fn file_log_survives_reopen() {
    let log = TestLog::file();
    populate(&log, 9, 3);
    let before = log_bytes(&log, LogPageId(0), LogPageId(9));

    let reopened = log.reopen();
    let info = reopened.log_info().unwrap();
    assert_eq!(info.next, LogPageId(9));
    assert_eq!(log_bytes(&reopened, LogPageId(0), LogPageId(9)), before);
    assert_eq!(
        reopened.begin_read().unwrap().read(PageId(2)).unwrap(),
        Some(page_contents(2, 8))
    );
}

#[test]
fn modify_lock_times_out_while_held() {
    let locks = Arc::new(LockManager::new(Duration::from_millis(50)));
    let held = locks.lock_modify().unwrap();

    let other = Arc::clone(&locks);
    let result = thread::spawn(move || other.lock_modify().map(|_| ())).join().unwrap();
    assert!(matches!(result, Err(CoreError::RolledBack { .. })));

    drop(held);
    assert!(locks.lock_modify().is_ok());
}

#[test]
fn commit_waits_for_readers() {
    let locks = LockManager::new(Duration::from_millis(50));
    let read = locks.lock_read().unwrap();
    assert!(locks.lock_commit().is_err());
    // Readers share the lock.
    assert!(locks.lock_read().is_ok());
    drop(read);
    assert!(locks.lock_commit().is_ok());
}

#[test]
fn writers_do_not_block_readers() {
    let log = TestLog::memory();
    populate(&log, 2, 2);
    let mut trx = log.begin_modify().unwrap();
    trx.write_page(PageId(0), b"pending").unwrap();

    let read = log.begin_read().unwrap();
    assert_eq!(read.read(PageId(0)).unwrap(), Some(page_contents(0, 0)));
    drop(read);
    trx.commit().unwrap();
}

#[test]
fn stress_concurrent_writers_and_readers() {
    let log = TestLog::memory();
    let config = StressConfig {
        operations: 300,
        threads: 3,
        page_count: 12,
        pages_per_transaction: 2,
    };
    let result = stress_readers_and_writer(Arc::clone(&log.log), &config);
    result.log_summary("readers and writer");
    assert_eq!(result.failed_ops, 0);
    assert_eq!(log.log_info().unwrap().next, LogPageId(600));
}
