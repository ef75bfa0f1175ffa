//! End-to-end replication scenarios over the loopback transport.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_core::{LogPageId, LogStorage, PageId};
use tessera_repl_agent::{
    AgentState, FaultKind, MasterClient, ReplicationError, SlaveConfig, SlaveMode,
};
use tessera_testkit::prelude::*;

fn slave_config() -> SlaveConfig {
    SlaveConfig::new("loopback", 0).with_mode(SlaveMode::realtime(Duration::from_millis(20)))
}

fn wait_for(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn slave_catches_up_in_one_session() {
    init_tracing();
    let pair = ReplicaPair::new(10, 3);
    let (agent, faults) = pair.loopback_agent(slave_config());
    let mut client = pair.connector().client();

    assert_eq!(client.sync_log(LogPageId(3)).unwrap(), LogPageId(10));
    assert_eq!(agent.run_once(&mut client).unwrap(), 7);

    let (master_next, slave_next) = pair.positions();
    assert_eq!(master_next, slave_next);
    pair.assert_prefix();
    assert!(faults.try_recv().is_err());
}

#[test]
fn second_cycle_applies_nothing() {
    let pair = ReplicaPair::new(6, 0);
    let (agent, _faults) = pair.loopback_agent(slave_config());
    let mut client = pair.connector().client();

    assert_eq!(agent.run_once(&mut client).unwrap(), 6);
    assert_eq!(agent.run_once(&mut client).unwrap(), 0);
    assert_eq!(agent.stats().transactions_committed, 1);
}

#[test]
fn chunks_are_separate_transactions() {
    let pair = ReplicaPair::new(10, 0);
    let (agent, _faults) =
        pair.loopback_agent(slave_config().with_max_pages_per_transaction(4));
    let mut client = pair.connector().client();

    assert_eq!(agent.run_once(&mut client).unwrap(), 10);
    let stats = agent.stats();
    assert_eq!(stats.transactions_committed, 3);
    assert_eq!(stats.pages_applied, 10);
    pair.assert_prefix();
}

#[test]
fn interrupted_chunk_is_rolled_back() {
    let pair = ReplicaPair::new(10, 0);
    let (agent, _faults) =
        pair.loopback_agent(slave_config().with_max_pages_per_transaction(4));
    let connector = FailingConnector::new(pair.connector(), FaultPlan::none().drop_after_pages(6));
    let info = pair.slave.log_info().unwrap();

    let mut client = tessera_repl_agent::Connector::connect(&connector, &info).unwrap();
    let err = agent.run_once(&mut client).unwrap_err();
    assert!(err.is_retryable());
    // The first chunk committed, the second lost its connection mid-way.
    assert_eq!(pair.positions().1, LogPageId(4));
    pair.assert_prefix();

    let mut client = tessera_repl_agent::Connector::connect(&connector, &info).unwrap();
    assert_eq!(agent.run_once(&mut client).unwrap(), 6);
    assert_eq!(pair.positions().1, LogPageId(10));
    pair.assert_prefix();
}

#[test]
fn diverged_slave_is_not_synced() {
    let pair = ReplicaPair::new(10, 0);

    let other = TestLog::memory();
    let mut trx = other.begin_modify().unwrap();
    for page in 0..3 {
        trx.write_page(PageId(page), &[0xAA; 32]).unwrap();
    }
    trx.commit().unwrap();
    copy_log(&other, &pair.slave, LogPageId(3));

    let (agent, _faults) = pair.loopback_agent(slave_config());
    let mut client = pair.connector().client();
    let err = agent.run_once(&mut client).unwrap_err();
    assert!(matches!(err, ReplicationError::WrongPageId(_)));
    assert!(err.is_fatal());
    assert_eq!(pair.positions().1, LogPageId(3));
}

#[test]
fn slave_of_another_master_is_rejected_even_when_empty() {
    let master = TestLog::memory();
    populate(&master, 4, 2);
    let pair = ReplicaPair {
        master,
        slave: TestLog::memory_slave(uuid::Uuid::new_v4()),
    };
    let (agent, _faults) = pair.loopback_agent(slave_config());
    let mut client = pair.connector().client();

    assert!(matches!(
        agent.run_once(&mut client),
        Err(ReplicationError::WrongPageId(_))
    ));
    assert!(pair.slave.log_info().unwrap().is_empty());
}

#[test]
fn realtime_agent_follows_master() {
    init_tracing();
    let pair = ReplicaPair::new(5, 0);
    let (agent, faults) = pair.loopback_agent(slave_config());
    let handle = agent.spawn().unwrap();

    wait_for(|| pair.positions().1 == LogPageId(5));
    populate(&pair.master, 7, 3);
    wait_for(|| pair.positions().1 == LogPageId(12));
    pair.assert_prefix();

    assert_eq!(handle.close().unwrap(), AgentState::Stopped);
    assert!(faults.try_recv().is_err());
}

#[test]
fn fault_is_reported_to_sink() {
    let pair = ReplicaPair::new(4, 0);
    let other = TestLog::memory();
    let mut trx = other.begin_modify().unwrap();
    trx.write_page(PageId(9), &[0xAA; 16]).unwrap();
    trx.commit().unwrap();
    copy_log(&other, &pair.slave, LogPageId(1));

    let (agent, faults) = pair.loopback_agent(slave_config());
    let handle = agent.spawn().unwrap();

    let fault = faults
        .recv_timeout(Duration::from_secs(5))
        .expect("fault not reported");
    assert_eq!(fault.kind, FaultKind::WrongPageId);
    wait_for(|| handle.is_finished());
    assert!(matches!(handle.agent().state(), AgentState::Faulted(_)));
}

#[test]
fn transient_errors_are_retried() {
    let pair = ReplicaPair::new(3, 0);
    let (tx, faults) = crossbeam_channel::unbounded();
    let connector = FailingConnector::new(pair.connector(), FaultPlan::none().refuse_connects(2));
    let agent = tessera_repl_agent::ReplicationAgent::new(
        slave_config(),
        Arc::clone(&pair.slave.log),
        connector,
        Arc::new(tx),
    )
    .unwrap();
    let handle = agent.spawn().unwrap();

    wait_for(|| pair.positions().1 == LogPageId(3));
    assert!(handle.agent().stats().transient_errors >= 2);
    assert_eq!(handle.close().unwrap(), AgentState::Stopped);
    assert!(faults.try_recv().is_err());
}

#[test]
fn promoted_slave_stops_agent() {
    let pair = ReplicaPair::new(2, 2);
    pair.slave.set_slave(false, None).unwrap();

    let (agent, faults) = pair.loopback_agent(slave_config());
    let handle = agent.spawn().unwrap();
    wait_for(|| handle.is_finished());
    assert_eq!(handle.agent().state(), AgentState::Stopped);
    assert!(faults.try_recv().is_err());
}

fn failing_agent(
    pair: &ReplicaPair,
    mode: SlaveMode,
    plan: FaultPlan,
) -> (
    tessera_repl_agent::AgentHandle<tessera_core::PagedLog, FailingConnector<LoopbackConnector>>,
    FailingConnector<LoopbackConnector>,
    crossbeam_channel::Receiver<tessera_repl_agent::Fault>,
) {
    let (tx, faults) = crossbeam_channel::unbounded();
    let connector = FailingConnector::new(pair.connector(), plan);
    let agent = tessera_repl_agent::ReplicationAgent::new(
        SlaveConfig::new("loopback", 0)
            .with_mode(mode)
            .with_max_pages_per_transaction(4),
        Arc::clone(&pair.slave.log),
        connector.clone(),
        Arc::new(tx),
    )
    .unwrap();
    (agent.spawn().unwrap(), connector, faults)
}

fn realtime(check: Duration, ttl: Duration) -> SlaveMode {
    SlaveMode::Realtime {
        check_timeout: check,
        connection_ttl: ttl,
    }
}

#[test]
fn realtime_connection_is_reused_within_ttl() {
    let pair = ReplicaPair::new(3, 0);
    let (handle, connector, _faults) = failing_agent(
        &pair,
        realtime(Duration::from_millis(10), Duration::from_secs(3600)),
        FaultPlan::none(),
    );

    wait_for(|| handle.agent().stats().cycles >= 8);
    populate(&pair.master, 2, 2);
    wait_for(|| pair.positions().1 == LogPageId(5));

    assert_eq!(connector.connects(), 1);
    assert_eq!(handle.agent().stats().reconnects, 0);
    handle.close().unwrap();
}

#[test]
fn realtime_connection_is_reopened_after_ttl() {
    let pair = ReplicaPair::new(3, 0);
    let (handle, connector, _faults) = failing_agent(
        &pair,
        realtime(Duration::from_millis(10), Duration::from_millis(30)),
        FaultPlan::none(),
    );

    wait_for(|| connector.connects() >= 3);
    assert!(handle.agent().stats().reconnects >= 2);
    assert_eq!(handle.agent().stats().transient_errors, 0);
    assert_eq!(pair.positions().1, LogPageId(3));
    handle.close().unwrap();
}

#[test]
fn realtime_connection_is_dropped_after_io_error() {
    let pair = ReplicaPair::new(10, 0);
    let (handle, connector, faults) = failing_agent(
        &pair,
        realtime(Duration::from_millis(10), Duration::from_secs(3600)),
        FaultPlan::none().drop_after_pages(6),
    );

    wait_for(|| pair.positions().1 == LogPageId(10));
    pair.assert_prefix();
    let stats = handle.agent().stats();
    assert_eq!(stats.transient_errors, 1);
    assert_eq!(connector.connects(), 2);

    // The replacement connection is kept once healthy.
    wait_for(|| handle.agent().stats().cycles >= stats.cycles + 5);
    assert_eq!(connector.connects(), 2);
    assert!(faults.try_recv().is_err());
    handle.close().unwrap();
}

#[test]
fn corrupted_page_faults_agent_without_applying() {
    let pair = ReplicaPair::new(6, 2);
    let (handle, connector, faults) = failing_agent(
        &pair,
        realtime(Duration::from_millis(10), Duration::from_secs(3600)),
        FaultPlan::none().corrupt_page(1),
    );

    let fault = faults
        .recv_timeout(Duration::from_secs(5))
        .expect("fault not reported");
    assert_eq!(fault.kind, FaultKind::TransactionCorrupted);
    wait_for(|| handle.is_finished());

    assert!(matches!(
        handle.agent().state(),
        AgentState::Faulted(tessera_repl_agent::Fault {
            kind: FaultKind::TransactionCorrupted,
            ..
        })
    ));
    assert_eq!(connector.injected(), 1);
    assert_eq!(pair.positions().1, LogPageId(2));
    assert!(faults.try_recv().is_err());
}
