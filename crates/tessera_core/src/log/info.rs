//! Log state snapshot and its on-disk header encoding.

use crate::error::{CoreError, CoreResult};
use crate::types::LogPageId;
use uuid::Uuid;

/// Magic bytes at the start of the log header.
pub const LOG_MAGIC: [u8; 4] = *b"TSLG";

/// Current on-disk format version.
pub const LOG_VERSION: u16 = 1;

/// Encoded size of a [`LogInfo`] header, including its CRC.
pub const LOG_HEADER_SIZE: usize = 4 + 2 + 2 + 16 + 16 + 8 * 4 + 4;

const FLAG_SLAVE: u16 = 1;
const FLAG_SUCCESSFUL_STOP: u16 = 1 << 1;
const FLAG_HAS_MASTER: u16 = 1 << 2;

/// Point-in-time snapshot of a log's counters and flags.
///
/// `start <= checkpoint <= next` always holds. `next` is the log page id the
/// next append will use, so the last written page is `next - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogInfo {
    /// Identity of this log.
    pub log_id: Uuid,
    /// First log page still held by the log.
    pub start: LogPageId,
    /// Log page id the next append will use.
    pub next: LogPageId,
    /// Last checkpointed position.
    pub checkpoint: LogPageId,
    /// Total body bytes recorded in committed pages.
    pub data_length: u64,
    /// Whether the log is a replication slave.
    pub slave: bool,
    /// Identity of the master log, set on slave copies.
    pub master_log_id: Option<Uuid>,
    /// Whether the log was closed cleanly last time.
    pub successful_stop: bool,
    /// On-disk format version.
    pub version: u16,
}

impl LogInfo {
    /// Creates the state of a fresh, empty master log.
    #[must_use]
    pub fn new_master() -> Self {
        Self {
            log_id: Uuid::new_v4(),
            start: LogPageId(0),
            next: LogPageId(0),
            checkpoint: LogPageId(0),
            data_length: 0,
            slave: false,
            master_log_id: None,
            successful_stop: true,
            version: LOG_VERSION,
        }
    }

    /// Creates the state of a fresh, empty slave of `master_log_id`.
    #[must_use]
    pub fn new_slave(master_log_id: Uuid) -> Self {
        Self {
            slave: true,
            master_log_id: Some(master_log_id),
            ..Self::new_master()
        }
    }

    /// Returns true if the log is a replication slave.
    #[must_use]
    pub fn is_slave(&self) -> bool {
        self.slave
    }

    /// Returns true if the log holds no pages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.next == self.start
    }

    /// Returns the last written log page, if any.
    #[must_use]
    pub fn last_page(&self) -> Option<LogPageId> {
        if self.is_empty() {
            None
        } else {
            Some(LogPageId(self.next.0 - 1))
        }
    }

    /// Returns the log id a replication peer should compare against: the
    /// master's id on a slave, or this log's own id on a master.
    #[must_use]
    pub fn replication_log_id(&self) -> Uuid {
        self.master_log_id.unwrap_or(self.log_id)
    }

    /// Encodes the header into [`LOG_HEADER_SIZE`] bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LOG_HEADER_SIZE);

        buf.extend_from_slice(&LOG_MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());

        let mut flags = 0u16;
        if self.slave {
            flags |= FLAG_SLAVE;
        }
        if self.successful_stop {
            flags |= FLAG_SUCCESSFUL_STOP;
        }
        if self.master_log_id.is_some() {
            flags |= FLAG_HAS_MASTER;
        }
        buf.extend_from_slice(&flags.to_le_bytes());

        buf.extend_from_slice(self.log_id.as_bytes());
        buf.extend_from_slice(self.master_log_id.unwrap_or_else(Uuid::nil).as_bytes());

        buf.extend_from_slice(&self.start.0.to_le_bytes());
        buf.extend_from_slice(&self.next.0.to_le_bytes());
        buf.extend_from_slice(&self.checkpoint.0.to_le_bytes());
        buf.extend_from_slice(&self.data_length.to_le_bytes());

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a header written by [`LogInfo::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] on a bad magic, an unsupported
    /// version, a short buffer, a CRC mismatch or broken counters.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < LOG_HEADER_SIZE {
            return Err(CoreError::invalid_format("log header too short"));
        }
        if data[0..4] != LOG_MAGIC {
            return Err(CoreError::invalid_format("invalid log magic"));
        }

        let body = &data[..LOG_HEADER_SIZE - 4];
        let stored = u32::from_le_bytes(array(&data[LOG_HEADER_SIZE - 4..LOG_HEADER_SIZE]));
        let actual = crc32fast::hash(body);
        if stored != actual {
            return Err(CoreError::invalid_format(format!(
                "log header checksum mismatch: expected {stored:08x}, got {actual:08x}"
            )));
        }

        let version = u16::from_le_bytes(array(&data[4..6]));
        if version > LOG_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported log version: {version}"
            )));
        }
        let flags = u16::from_le_bytes(array(&data[6..8]));

        let log_id = Uuid::from_bytes(array(&data[8..24]));
        let master = Uuid::from_bytes(array(&data[24..40]));

        let counter = |at: usize| u64::from_le_bytes(array(&data[at..at + 8]));
        let info = Self {
            log_id,
            start: LogPageId(counter(40)),
            next: LogPageId(counter(48)),
            checkpoint: LogPageId(counter(56)),
            data_length: counter(64),
            slave: flags & FLAG_SLAVE != 0,
            master_log_id: (flags & FLAG_HAS_MASTER != 0).then_some(master),
            successful_stop: flags & FLAG_SUCCESSFUL_STOP != 0,
            version,
        };

        if !(info.start <= info.checkpoint && info.checkpoint <= info.next) {
            return Err(CoreError::invalid_format(format!(
                "log counters out of order: start {} checkpoint {} next {}",
                info.start, info.checkpoint, info.next
            )));
        }
        Ok(info)
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
