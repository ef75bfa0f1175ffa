//! # Tessera Replication Agent
//!
//! Slave-side WAL replication for Tessera.
//!
//! This crate provides:
//! - [`ReplicationAgent`]: the state machine that checks the slave against
//!   its master and pulls missing log pages
//! - [`TrxDestination`] / [`TrxReader`]: page-at-a-time transfer into the
//!   slave's log buffer
//! - [`MasterClient`] / [`Connector`]: the transport seam, with a TCP
//!   implementation
//! - [`CronSchedule`]: five-field schedules for the cron mode
//!
//! ## Cycle
//!
//! 1. Confirm the slave's last log page with the master (`check_slave`)
//! 2. Ask for the master's `next` (`sync_log`)
//! 3. Apply the gap in chunks, each as one local modify transaction
//!
//! ## Key Invariants
//!
//! - Pages are applied in log order, never renumbered
//! - A failed chunk is rolled back; the slave's `next` never moves partially
//! - Divergence and corruption are terminal: the agent faults and hands the
//!   [`Fault`] to its [`CriticalErrorSink`]
//! - A storage that is no longer a slave stops the agent without a fault

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod agent;
mod config;
mod cron;
mod destination;
mod error;
mod reader;
mod sink;
mod state;
mod transport;

pub use agent::{AgentHandle, ReplicationAgent};
pub use config::{SlaveConfig, SlaveMode};
pub use cron::CronSchedule;
pub use destination::TrxDestination;
pub use error::{ReplicationError, ReplicationResult};
pub use reader::TrxReader;
pub use sink::{CriticalErrorSink, StorageShutdown};
pub use state::{AgentState, AgentStats, Fault, FaultKind};
pub use transport::{
    AbortHandle, Connector, LastPage, MasterClient, PageRun, TcpConnector, TcpMasterClient,
};
