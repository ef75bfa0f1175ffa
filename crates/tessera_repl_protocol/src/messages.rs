//! Protocol messages.

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{read_frame, write_frame};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use uuid::Uuid;

/// A request from a slave to its master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Presents a replication token.
    Authenticate {
        /// Identity of the slave.
        slave_id: Uuid,
        /// Token issued for this slave and log.
        token: Vec<u8>,
    },
    /// Asks the master to confirm the slave's last log page.
    ///
    /// `last_trx_id` and `last_page_crc` describe page `slave_next - 1` and
    /// are absent when the slave log is empty.
    CheckLastLog {
        /// Log id the slave replicates.
        master_log_id: Uuid,
        /// The slave's next log page id.
        slave_next: u64,
        /// Transaction id of the slave's last page.
        last_trx_id: Option<u64>,
        /// Body CRC of the slave's last page.
        last_page_crc: Option<u32>,
    },
    /// Asks for the master's next log page id.
    SyncLog {
        /// The slave's next log page id.
        slave_next: u64,
    },
    /// Asks for up to `max_pages` committed pages starting at `start`.
    ReadLog {
        /// First log page id to read.
        start: u64,
        /// Upper bound on the number of pages returned.
        max_pages: u32,
    },
}

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The slave's last page does not match the master's log.
    WrongPageId,
    /// The connection has not presented a valid token.
    NotAuthorized,
    /// The request is malformed or out of range.
    InvalidRequest,
    /// The master failed while serving the request.
    Internal,
}

/// A response from the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// The token was accepted.
    Authenticated,
    /// The slave's last page matches the master's log.
    LastLogConfirmed,
    /// The master's next log page id.
    MasterNext {
        /// Next log page id on the master.
        next: u64,
    },
    /// Header of a page stream. Exactly `count * page_size` raw bytes follow
    /// on the stream, in log order.
    LogPages {
        /// Log page id of the first page.
        start: u64,
        /// Number of pages that follow.
        count: u32,
        /// Size of every page.
        page_size: u32,
    },
    /// The request failed.
    Error {
        /// Failure class.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

fn encode<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(out)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

impl Request {
    /// Returns the frame kind code.
    #[must_use]
    pub fn kind(&self) -> u8 {
        match self {
            Request::Authenticate { .. } => 0x01,
            Request::CheckLastLog { .. } => 0x02,
            Request::SyncLog { .. } => 0x03,
            Request::ReadLog { .. } => 0x04,
        }
    }

    /// Encodes the message payload to CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes a message payload from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid request.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }

    /// Writes the request as one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> ProtocolResult<()> {
        write_frame(writer, self.kind(), &self.encode()?)
    }

    /// Reads one request frame.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, a bad frame, or a kind that does not
    /// match the payload.
    pub fn read_from<R: Read>(reader: &mut R) -> ProtocolResult<Self> {
        let (kind, payload) = read_frame(reader)?;
        let request = Self::decode(&payload)?;
        if request.kind() != kind {
            return Err(ProtocolError::UnexpectedKind(kind));
        }
        Ok(request)
    }
}

impl Response {
    /// Creates an error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Returns the frame kind code.
    #[must_use]
    pub fn kind(&self) -> u8 {
        match self {
            Response::Authenticated => 0x81,
            Response::LastLogConfirmed => 0x82,
            Response::MasterNext { .. } => 0x83,
            Response::LogPages { .. } => 0x84,
            Response::Error { .. } => 0xFF,
        }
    }

    /// Encodes the message payload to CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes a message payload from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid response.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }

    /// Writes the response as one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> ProtocolResult<()> {
        write_frame(writer, self.kind(), &self.encode()?)
    }

    /// Reads one response frame.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, a bad frame, or a kind that does not
    /// match the payload.
    pub fn read_from<R: Read>(reader: &mut R) -> ProtocolResult<Self> {
        let (kind, payload) = read_frame(reader)?;
        let response = Self::decode(&payload)?;
        if response.kind() != kind {
            return Err(ProtocolError::UnexpectedKind(kind));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::write_frame;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn request_over_stream() {
        let request = Request::CheckLastLog {
            master_log_id: Uuid::new_v4(),
            slave_next: 3,
            last_trx_id: Some(17),
            last_page_crc: Some(0xDEAD_BEEF),
        };
        let mut out = Vec::new();
        request.write_to(&mut out).unwrap();
        assert_eq!(out[0], 0x02);
        assert_eq!(Request::read_from(&mut Cursor::new(out)).unwrap(), request);
    }

    #[test]
    fn log_pages_followed_by_raw_bytes() {
        let mut out = Vec::new();
        Response::LogPages {
            start: 3,
            count: 2,
            page_size: 4,
        }
        .write_to(&mut out)
        .unwrap();
        out.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut cursor = Cursor::new(out);
        let header = Response::read_from(&mut cursor).unwrap();
        assert!(matches!(header, Response::LogPages { count: 2, .. }));
        let mut raw = [0u8; 8];
        cursor.read_exact(&mut raw).unwrap();
        assert_eq!(raw, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn mismatched_kind_rejected() {
        let payload = Response::Authenticated.encode().unwrap();
        let mut out = Vec::new();
        write_frame(&mut out, 0x83, &payload).unwrap();
        assert!(matches!(
            Response::read_from(&mut Cursor::new(out)),
            Err(ProtocolError::UnexpectedKind(0x83))
        ));
    }

    #[test]
    fn request_is_not_a_response() {
        let mut out = Vec::new();
        Request::SyncLog { slave_next: 1 }.write_to(&mut out).unwrap();
        assert!(Response::read_from(&mut Cursor::new(out)).is_err());
    }

    #[test]
    fn error_response() {
        let response = Response::error(ErrorCode::WrongPageId, "diverged at 4");
        let decoded = Response::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded, response);
    }

    proptest! {
        #[test]
        fn read_log_requests_survive_framing(start in any::<u64>(), max_pages in any::<u32>()) {
            let request = Request::ReadLog { start, max_pages };
            let mut out = Vec::new();
            request.write_to(&mut out).unwrap();
            prop_assert_eq!(Request::read_from(&mut Cursor::new(out)).unwrap(), request);
        }
    }
}
