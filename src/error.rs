//! Errors surfaced by the client.
//!
//! Every failure falls into one of four groups (see [`ErrorKind`]):
//!
//! - **I/O**: socket or TLS failures and short reads. The connection must be discarded.
//! - **Protocol**: unexpected packets, oversized blocks, unknown column types and corrupted
//!   frames. The stream position is no longer trustworthy so the connection must be discarded.
//! - **Server**: a well-formed [`Exception`] reported by the server. The connection stays usable.
//! - **Usage**: local validation failures detected before any bytes are written.
//!
//! Nothing in this crate retries automatically.
use std::io;

use thiserror::Error;

use crate::compress::FrameError;
use crate::protocol::response::Exception;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Protocol,
    Server,
    Usage,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("[{op}] unexpected packet {packet} from server")]
    UnexpectedPacket { op: &'static str, packet: u8 },

    #[error("unexpected end of stream during {0}")]
    UnexpectedEndOfStream(&'static str),

    #[error("unsupported server revision {revision}, minimum is {minimum}")]
    UnsupportedServerRevision { revision: u64, minimum: u64 },

    #[error("block reports {rows} rows, limit is {limit}")]
    BlockTooLarge { rows: u64, limit: u64 },

    #[error("column '{column}' has {rows} rows, expected {expected}")]
    ColumnRowMismatch {
        column: String,
        rows: usize,
        expected: usize,
    },

    #[error("unknown column type '{0}'")]
    UnknownColumnType(String),

    #[error("column '{0}' uses a custom serialization kind which is not supported")]
    CustomSerialization(String),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Exception(#[from] Exception),

    #[error("setting '{key}' cannot be encoded at revision {revision}")]
    UnsupportedSetting { key: String, revision: u64 },

    #[error("batch has already been sent")]
    BatchAlreadySent,

    #[error("batch is finalized, no further appends are accepted")]
    BatchFinalized,

    #[error("invalid batch column index {0}")]
    BatchColumnIndex(usize),

    #[error("named and positional bind parameters cannot be mixed")]
    MixedBindStyles,

    #[error("no bind argument for parameter {0}")]
    MissingBindArg(String),

    #[error("query references {expected} positional arguments, {got} were given")]
    BindArgCount { expected: usize, got: usize },

    #[error("row has {got} values, expected {expected}")]
    RowLength { expected: usize, got: usize },

    #[error("cannot convert {value} into column type {column_type}")]
    Conversion { value: String, column_type: String },

    #[error("connection is closed")]
    Closed,

    #[error("query was canceled before end of stream")]
    Canceled,

    #[error("tls error: {0}")]
    Tls(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(e) => {
                if e.get_ref().is_some_and(|inner| inner.is::<FrameError>()) {
                    ErrorKind::Protocol
                } else {
                    ErrorKind::Io
                }
            }
            Error::Tls(_) | Error::Closed | Error::Canceled => ErrorKind::Io,
            Error::UnexpectedPacket { .. }
            | Error::UnexpectedEndOfStream(_)
            | Error::UnsupportedServerRevision { .. }
            | Error::BlockTooLarge { .. }
            | Error::ColumnRowMismatch { .. }
            | Error::UnknownColumnType(_)
            | Error::CustomSerialization(_)
            | Error::Frame(_) => ErrorKind::Protocol,
            Error::Exception(_) => ErrorKind::Server,
            Error::UnsupportedSetting { .. }
            | Error::BatchAlreadySent
            | Error::BatchFinalized
            | Error::BatchColumnIndex(_)
            | Error::MixedBindStyles
            | Error::MissingBindArg(_)
            | Error::BindArgCount { .. }
            | Error::RowLength { .. }
            | Error::Conversion { .. } => ErrorKind::Usage,
        }
    }

    /// Whether the connection that produced this error has to be thrown away.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Io | ErrorKind::Protocol)
    }

    /// The server exception, if this error is one.
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Error::Exception(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn conversion(value: impl std::fmt::Debug, column_type: &str) -> Self {
        Error::Conversion {
            value: format!("{value:?}"),
            column_type: column_type.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_inside_io_are_protocol_errors() {
        let err: Error =
            io::Error::new(io::ErrorKind::InvalidData, FrameError::UnknownMethod(0x11)).into();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.is_fatal());

        let err: Error = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn server_exceptions_are_not_fatal() {
        let err: Error = Exception {
            code: 60,
            name: "DB::Exception".into(),
            message: "Table default.missing does not exist".into(),
            stack_trace: String::new(),
            nested: vec![],
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(!err.is_fatal());
        assert_eq!(err.exception().map(|e| e.code), Some(60));
    }

    #[test]
    fn usage_errors_are_not_fatal() {
        assert!(!Error::MixedBindStyles.is_fatal());
        assert!(!Error::BatchAlreadySent.is_fatal());
    }
}
