//! # Tessera Testkit
//!
//! Test utilities for Tessera.
//!
//! This crate provides:
//! - Log fixtures: in-memory and file-backed logs, populated masters and
//!   master/slave pairs
//! - Property-based test generators using proptest
//! - In-process and fault-injecting replication transports
//! - Stress helpers for concurrent transactions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::prelude::*;
//!
//! #[test]
//! fn slave_catches_up() {
//!     let pair = ReplicaPair::new(10, 3);
//!     let (agent, _faults) = pair.loopback_agent(SlaveConfig::new("loopback", 0));
//!     agent.run_once(&mut pair.connector().client()).unwrap();
//!     pair.assert_prefix();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod loopback;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::loopback::*;
    pub use crate::stress::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use loopback::*;
pub use stress::*;
