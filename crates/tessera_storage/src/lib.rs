//! # Tessera Storage
//!
//! Byte backends and the fixed-size page format for Tessera.
//!
//! This crate is the lowest layer of the engine. It provides two things:
//!
//! - [`StorageBackend`]: an opaque, positionally addressed byte store. The log
//!   coordinator in `tessera_core` lays pages out on top of it.
//! - The page format: every page is `page_size` bytes and starts with a
//!   [`PageHeader`] carrying the page id, the id of the transaction that wrote
//!   it, a CRC-32 of the body and the logical body length.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use tessera_storage::{seal_page, verify_page, InMemoryBackend, StorageBackend};
//!
//! let mut page = vec![0u8; 512];
//! seal_page(&mut page, 7, 1, b"hello").unwrap();
//!
//! let mut backend = InMemoryBackend::new();
//! backend.write_at(512, &page).unwrap();
//! let read = backend.read_at(512, 512).unwrap();
//! let header = verify_page(&read).unwrap();
//! assert_eq!(header.page_id, 7);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod page;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use page::{
    page_body, seal_freed_page, seal_page, verify_page, PageHeader, FREED_PAGE_LENGTH,
    MIN_PAGE_SIZE, PAGE_HEADER_SIZE,
};
