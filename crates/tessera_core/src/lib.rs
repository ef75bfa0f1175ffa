//! # Tessera Core
//!
//! Durability layer of the Tessera page store:
//!
//! - [`PageCache`]: a sharded, fixed-capacity page cache
//! - [`LockManager`]: read, modify and commit locks with bounded waits
//! - [`LogStorage`]: the log coordinator contract, implemented by
//!   [`PagedLog`] on top of a `tessera_storage` backend
//! - [`ReadTransaction`] and [`ModifyTransaction`] for local clients
//!
//! Replication builds on the same [`LogStorage`] contract: a slave applies
//! pages received from its master through [`ModifyScope`], the same path a
//! local writer uses.
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::{PagedLog, PageId, StorageConfig};
//! use tessera_storage::InMemoryBackend;
//!
//! let config = StorageConfig::new().page_size(512);
//! let log = PagedLog::create(Box::new(InMemoryBackend::new()), config).unwrap();
//!
//! let mut trx = log.begin_modify().unwrap();
//! trx.write_page(PageId::new(1), b"hello").unwrap();
//! trx.commit().unwrap();
//!
//! let read = log.begin_read().unwrap();
//! assert_eq!(read.read(PageId::new(1)).unwrap(), Some(b"hello".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod lock;
mod log;
mod transaction;
mod types;

pub use cache::{CacheStats, PageCache};
pub use config::StorageConfig;
pub use error::{CoreError, CoreResult};
pub use lock::{CommitLock, LockManager, ModifyLock, ReadLock};
pub use log::{
    LogBuffer, LogInfo, LogStorage, ModifyScope, ModifyTicket, PagedLog, LOG_HEADER_SIZE,
    LOG_MAGIC, LOG_VERSION,
};
pub use transaction::{ModifyTransaction, ReadTransaction};
pub use types::{LogPageId, PageId, TrxId};
