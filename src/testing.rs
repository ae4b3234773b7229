//! Scripted server for unit tests.
//!
//! [`MockTransport`] replays queued reply chunks and records everything the client writes.
//! Each `read` returns at most one chunk, so the client never sees bytes of a later chunk
//! before it has consumed the earlier ones. The packet helpers build server replies with the
//! crate's own encoder.
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::{
    binary::Encoder,
    block::Block,
    column::Registry,
    compress::{self, Method},
    config::{Auth, Options},
    connection::Connection,
    error::{Error, ErrorKind},
    protocol::{CLIENT_REVISION, Transport, server},
    query::Release,
    value::Value,
};

#[derive(Debug, Default)]
struct Wire {
    chunks: VecDeque<Vec<u8>>,
    output: Vec<u8>,
    deadlines: Vec<bool>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    wire: Arc<Mutex<Wire>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn wire(&self) -> std::sync::MutexGuard<'_, Wire> {
        self.wire.lock().unwrap()
    }

    pub(crate) fn push(&self, chunk: impl Into<Vec<u8>>) {
        self.wire().chunks.push_back(chunk.into());
    }

    /// Queues `chunk` ahead of everything already pushed.
    pub(crate) fn push_front(&self, chunk: impl Into<Vec<u8>>) {
        self.wire().chunks.push_front(chunk.into());
    }

    pub(crate) fn output(&self) -> Vec<u8> {
        self.wire().output.clone()
    }

    pub(crate) fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.wire().output)
    }

    pub(crate) fn pending_chunks(&self) -> usize {
        self.wire().chunks.len()
    }

    /// `true` for every deadline set, `false` for every deadline cleared, in order.
    pub(crate) fn deadlines(&self) -> Vec<bool> {
        self.wire().deadlines.clone()
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wire = self.wire();
        let Some(chunk) = wire.chunks.front_mut() else {
            return Ok(0);
        };
        let n = buf.len().min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            wire.chunks.pop_front();
        }
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.wire().output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        self.wire().deadlines.push(deadline.is_some());
        Ok(())
    }
}

/// A server hello packet. Optional fields follow `revision` the way a real server sends them.
pub(crate) fn write_server_info(
    out: &mut Vec<u8>,
    name: &str,
    major: u64,
    minor: u64,
    revision: u64,
) {
    let negotiated = revision.min(CLIENT_REVISION);
    out.write_u8(server::HELLO).unwrap();
    out.write_string(name).unwrap();
    out.write_uvarint(major).unwrap();
    out.write_uvarint(minor).unwrap();
    out.write_uvarint(revision).unwrap();
    if negotiated >= crate::protocol::DBMS_MIN_REVISION_WITH_SERVER_TIMEZONE {
        out.write_string("UTC").unwrap();
    }
    if negotiated >= crate::protocol::DBMS_MIN_REVISION_WITH_SERVER_DISPLAY_NAME {
        out.write_string(name).unwrap();
    }
    if negotiated >= crate::protocol::DBMS_MIN_REVISION_WITH_VERSION_PATCH {
        out.write_uvarint(1).unwrap();
    }
}

pub(crate) fn hello(revision: u64) -> Vec<u8> {
    let mut out = Vec::new();
    write_server_info(&mut out, "ClickHouse", 23, 8, revision);
    out
}

pub(crate) fn exception(code: i32, message: &str) -> Vec<u8> {
    let mut out = vec![server::EXCEPTION];
    out.write_i32(code).unwrap();
    out.write_string("DB::Exception").unwrap();
    out.write_string(message).unwrap();
    out.write_string("").unwrap();
    out.write_bool(false).unwrap();
    out
}

/// A data-like packet (`Data`, `Totals`, `Log`, ...) carrying `block`.
pub(crate) fn block_packet(packet: u8, block: &Block, revision: u64, compressed: bool) -> Vec<u8> {
    let mut out = vec![packet];
    out.write_string("").unwrap();
    let mut body = Vec::new();
    block.encode(&mut body, revision).unwrap();
    if compressed {
        compress::encode_frame(Method::Lz4, &body, &mut out);
    } else {
        out.extend(body);
    }
    out
}

pub(crate) fn data(block: &Block) -> Vec<u8> {
    block_packet(server::DATA, block, CLIENT_REVISION, false)
}

pub(crate) fn progress(rows: u64) -> Vec<u8> {
    let mut out = vec![server::PROGRESS];
    for v in [rows, rows * 8, 0, 0, 0, 1_000] {
        out.write_uvarint(v).unwrap();
    }
    out
}

pub(crate) fn profile_info(rows: u64) -> Vec<u8> {
    let mut out = vec![server::PROFILE_INFO];
    out.write_uvarint(rows).unwrap();
    out.write_uvarint(1).unwrap();
    out.write_uvarint(rows * 8).unwrap();
    out.write_bool(false).unwrap();
    out.write_uvarint(0).unwrap();
    out.write_bool(false).unwrap();
    out
}

pub(crate) fn table_columns() -> Vec<u8> {
    let mut out = vec![server::TABLE_COLUMNS];
    out.write_string("").unwrap();
    out.write_string("columns format version: 1\n1 columns:\n`n` UInt64\n").unwrap();
    out
}

pub(crate) fn pong() -> Vec<u8> {
    vec![server::PONG]
}

pub(crate) fn end_of_stream() -> Vec<u8> {
    vec![server::END_OF_STREAM]
}

/// A single `UInt64` column named `n`.
pub(crate) fn numbers(values: &[u64]) -> Block {
    let mut column = Registry::default().column("UInt64").unwrap();
    for v in values {
        column.append(&Value::UInt64(*v)).unwrap();
    }
    Block::new().with_column("n", column)
}

/// A connection that completed its handshake against `transport`, with the handshake traffic
/// already consumed.
pub(crate) fn connected(transport: &MockTransport, options: &Options) -> Connection<MockTransport> {
    transport.push(hello(CLIENT_REVISION));
    let conn = Connection::handshake(transport.clone(), &Auth::default(), options).unwrap();
    transport.take_output();
    conn
}

/// Connections handed to a release callback, with the kind of error they were released with.
pub(crate) type Released = Arc<Mutex<Vec<(Connection<MockTransport>, Option<ErrorKind>)>>>;

pub(crate) fn recorder() -> (Released, Release<MockTransport>) {
    let released: Released = Arc::default();
    let sink = Arc::clone(&released);
    let release: Release<MockTransport> =
        Box::new(move |conn: Connection<MockTransport>, err: Option<&Error>| {
            sink.lock().unwrap().push((conn, err.map(Error::kind)));
        });
    (released, release)
}

/// Waits for the first release, which may happen on another thread.
pub(crate) fn wait_released(released: &Released) -> Option<ErrorKind> {
    for _ in 0..500 {
        if let Some((_, kind)) = released.lock().unwrap().first() {
            return *kind;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    panic!("connection was never released");
}
