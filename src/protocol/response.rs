//! Server packet bodies.
//!
//! The packet type byte has already been consumed when these decoders run.
use std::{io::Read, time::Duration};

use thiserror::Error;

use super::{
    CLIENT_REVISION, DBMS_MIN_PROTOCOL_VERSION_WITH_SERVER_QUERY_TIME_IN_PROGRESS,
    DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO, DBMS_MIN_REVISION_WITH_SERVER_DISPLAY_NAME,
    DBMS_MIN_REVISION_WITH_SERVER_TIMEZONE, DBMS_MIN_REVISION_WITH_VERSION_PATCH,
};
use crate::{binary::Decoder, error::Result};

/// Identity the server reported in its hello.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub display_name: String,
    pub version_major: u64,
    pub version_minor: u64,
    pub version_patch: u64,
    /// Revision announced by the server, before negotiation.
    pub revision: u64,
    pub timezone: Option<String>,
}

impl ServerInfo {
    pub(crate) fn decode(r: &mut dyn Read) -> Result<Self> {
        let mut info = ServerInfo {
            name: r.read_string()?,
            version_major: r.read_uvarint()?,
            version_minor: r.read_uvarint()?,
            revision: r.read_uvarint()?,
            ..Default::default()
        };
        // the server only sends what both sides understand
        let revision = info.revision.min(CLIENT_REVISION);
        if revision >= DBMS_MIN_REVISION_WITH_SERVER_TIMEZONE {
            info.timezone = Some(r.read_string()?);
        }
        if revision >= DBMS_MIN_REVISION_WITH_SERVER_DISPLAY_NAME {
            info.display_name = r.read_string()?;
        }
        if revision >= DBMS_MIN_REVISION_WITH_VERSION_PATCH {
            info.version_patch = r.read_uvarint()?;
        } else {
            info.version_patch = info.revision;
        }
        Ok(info)
    }
}

impl std::fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}.{}.{} (revision {})",
            self.name, self.version_major, self.version_minor, self.version_patch, self.revision
        )
    }
}

/// An error reported by the server.
///
/// The server sends a chain of causes; the first one is the exception itself and the rest end
/// up, in order, in `nested`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("code: {code}, message: {message}")]
pub struct Exception {
    pub code: i32,
    pub name: String,
    pub message: String,
    pub stack_trace: String,
    pub nested: Vec<Exception>,
}

impl Exception {
    pub(crate) fn decode(r: &mut dyn Read) -> Result<Self> {
        let (mut primary, mut more) = Self::decode_one(r)?;
        while more {
            let (cause, next) = Self::decode_one(r)?;
            primary.nested.push(cause);
            more = next;
        }
        Ok(primary)
    }

    fn decode_one(r: &mut dyn Read) -> Result<(Self, bool)> {
        let exception = Exception {
            code: r.read_i32()?,
            name: r.read_string()?,
            message: r.read_string()?,
            stack_trace: r.read_string()?,
            nested: Vec::new(),
        };
        Ok((exception, r.read_bool()?))
    }
}

/// Counters reported while a query runs. Each packet carries the increment since the previous
/// one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub rows: u64,
    pub bytes: u64,
    pub total_rows: u64,
    pub wrote_rows: u64,
    pub wrote_bytes: u64,
    pub elapsed: Duration,
}

impl Progress {
    pub(crate) fn decode(r: &mut dyn Read, revision: u64) -> Result<Self> {
        let mut progress = Progress {
            rows: r.read_uvarint()?,
            bytes: r.read_uvarint()?,
            total_rows: r.read_uvarint()?,
            ..Default::default()
        };
        if revision >= DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO {
            progress.wrote_rows = r.read_uvarint()?;
            progress.wrote_bytes = r.read_uvarint()?;
        }
        if revision >= DBMS_MIN_PROTOCOL_VERSION_WITH_SERVER_QUERY_TIME_IN_PROGRESS {
            progress.elapsed = Duration::from_nanos(r.read_uvarint()?);
        }
        Ok(progress)
    }
}

/// Statistics sent once a query has produced all of its data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileInfo {
    pub rows: u64,
    pub blocks: u64,
    pub bytes: u64,
    pub applied_limit: bool,
    pub rows_before_limit: u64,
    pub calculated_rows_before_limit: bool,
}

impl ProfileInfo {
    pub(crate) fn decode(r: &mut dyn Read) -> Result<Self> {
        Ok(ProfileInfo {
            rows: r.read_uvarint()?,
            blocks: r.read_uvarint()?,
            bytes: r.read_uvarint()?,
            applied_limit: r.read_bool()?,
            rows_before_limit: r.read_uvarint()?,
            calculated_rows_before_limit: r.read_bool()?,
        })
    }
}
