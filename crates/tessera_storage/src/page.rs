//! Fixed-size page format.
//!
//! Every page is `page_size` bytes and begins with a 24-byte header:
//!
//! ```text
//! ┌──────────┬──────────┬─────────┬────────────┬──────────────┐
//! │ page_id  │ trx_id   │ crc     │ length     │ body ...     │
//! │ (u64 LE) │ (u64 LE) │ (u32 LE)│ (u32 LE)   │              │
//! └──────────┴──────────┴─────────┴────────────┴──────────────┘
//! ```
//!
//! `crc` is the CRC-32 of `body[..length]`. A `length` of
//! [`FREED_PAGE_LENGTH`] marks a freed page whose body is empty.

use crate::error::{StorageError, StorageResult};

/// Size of the page header in bytes.
pub const PAGE_HEADER_SIZE: usize = 24;

/// Smallest supported page size; a log header page must fit in one page.
pub const MIN_PAGE_SIZE: usize = 128;

/// Length marker for a freed page.
pub const FREED_PAGE_LENGTH: u32 = u32::MAX;

/// Decoded page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Id of the data page this image belongs to.
    pub page_id: u64,
    /// Id of the transaction that wrote the page.
    pub trx_id: u64,
    /// CRC-32 of the logical body.
    pub crc: u32,
    /// Logical body length, or [`FREED_PAGE_LENGTH`].
    pub length: u32,
}

impl PageHeader {
    /// Decodes the header at the start of `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` is shorter than [`PAGE_HEADER_SIZE`].
    pub fn decode(buf: &[u8]) -> StorageResult<Self> {
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(StorageError::InvalidPage(format!(
                "buffer of {} bytes cannot hold a page header",
                buf.len()
            )));
        }
        Ok(Self {
            page_id: u64::from_le_bytes(le_array(&buf[0..8])),
            trx_id: u64::from_le_bytes(le_array(&buf[8..16])),
            crc: u32::from_le_bytes(le_array(&buf[16..20])),
            length: u32::from_le_bytes(le_array(&buf[20..24])),
        })
    }

    /// Writes the header into the first [`PAGE_HEADER_SIZE`] bytes of `buf`.
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.page_id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.trx_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.crc.to_le_bytes());
        buf[20..24].copy_from_slice(&self.length.to_le_bytes());
    }

    /// Returns true if this header marks a freed page.
    #[must_use]
    pub fn is_freed(&self) -> bool {
        self.length == FREED_PAGE_LENGTH
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Fills `buf` with a page image of `body`.
///
/// The whole buffer is used as the page; bytes after the body are zeroed.
///
/// # Errors
///
/// Returns an error if the body does not fit.
pub fn seal_page(buf: &mut [u8], page_id: u64, trx_id: u64, body: &[u8]) -> StorageResult<()> {
    let capacity = buf.len().saturating_sub(PAGE_HEADER_SIZE);
    if body.len() > capacity {
        return Err(StorageError::InvalidPage(format!(
            "body of {} bytes exceeds page capacity {}",
            body.len(),
            capacity
        )));
    }

    let header = PageHeader {
        page_id,
        trx_id,
        crc: crc32fast::hash(body),
        length: body.len() as u32,
    };
    header.encode_into(buf);
    buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + body.len()].copy_from_slice(body);
    buf[PAGE_HEADER_SIZE + body.len()..].fill(0);
    Ok(())
}

/// Fills `buf` with a freed-page tombstone.
///
/// # Errors
///
/// Returns an error if `buf` cannot hold a header.
pub fn seal_freed_page(buf: &mut [u8], page_id: u64, trx_id: u64) -> StorageResult<()> {
    if buf.len() < PAGE_HEADER_SIZE {
        return Err(StorageError::InvalidPage("page buffer too small".into()));
    }
    let header = PageHeader {
        page_id,
        trx_id,
        crc: 0,
        length: FREED_PAGE_LENGTH,
    };
    header.encode_into(buf);
    buf[PAGE_HEADER_SIZE..].fill(0);
    Ok(())
}

/// Verifies a page image and returns its header.
///
/// # Errors
///
/// Returns an error if the recorded length does not fit the buffer or the
/// body does not match the recorded CRC.
pub fn verify_page(buf: &[u8]) -> StorageResult<PageHeader> {
    let header = PageHeader::decode(buf)?;
    if header.is_freed() {
        return Ok(header);
    }

    let body = page_body(buf, &header)?;
    let actual = crc32fast::hash(body);
    if actual != header.crc {
        return Err(StorageError::ChecksumMismatch {
            page_id: header.page_id,
            expected: header.crc,
            actual,
        });
    }
    Ok(header)
}

/// Returns the logical body of a page.
///
/// # Errors
///
/// Returns an error if the recorded length does not fit the buffer.
pub fn page_body<'a>(buf: &'a [u8], header: &PageHeader) -> StorageResult<&'a [u8]> {
    if header.is_freed() {
        return Ok(&[]);
    }
    let end = PAGE_HEADER_SIZE + header.length as usize;
    if end > buf.len() {
        return Err(StorageError::InvalidPage(format!(
            "page {} declares {} body bytes in a {} byte page",
            header.page_id,
            header.length,
            buf.len()
        )));
    }
    Ok(&buf[PAGE_HEADER_SIZE..end])
}
