//! Write-ahead log: state snapshots, the coordinator contract and the
//! page-structured implementation.

mod buffer;
mod info;
mod paged;
mod storage;

pub use buffer::LogBuffer;
pub use info::{LogInfo, LOG_HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
pub use paged::PagedLog;
pub use storage::{LogStorage, ModifyScope, ModifyTicket};
