//! A single connection to a server.
//!
//! A [`Connection`] owns one transport and runs one operation at a time. [`ping`] and [`exec`]
//! borrow it; [`query`] and [`prepare_batch`] take ownership and hand it to a release callback
//! once they are done, which is how a pool gets it back.
//!
//! [`ping`]: Connection::ping
//! [`exec`]: Connection::exec
//! [`query`]: Connection::query
//! [`prepare_batch`]: Connection::prepare_batch
use std::{
    io::Write,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use log::{debug, info, trace};

use crate::{
    bind::{Arg, bind},
    binary::{Decoder, Encoder},
    block::Block,
    config::{Auth, Options},
    error::{Error, Result},
    protocol::{
        CLIENT_REVISION, DBMS_MIN_REVISION_WITH_CLIENT_INFO, Socket, Stream, Transport, client,
        request::{ClientInfo, Query, Request},
        response::{Exception, ProfileInfo, Progress, ServerInfo},
        server,
    },
    query::QueryOptions,
    settings::Settings,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// What a stream of server packets boils down to once the bookkeeping packets are handled.
#[derive(Debug)]
pub(crate) enum Packet {
    /// `Data`, `Totals` or `Extremes`.
    Block(Block),
    EndOfStream,
}

pub struct Connection<T: Transport = Socket> {
    id: u64,
    stream: Stream<T>,
    revision: u64,
    server: ServerInfo,
    options: Options,
    closed: bool,
    connected_at: Instant,
}

impl Connection<Socket> {
    /// Dials `addr` (`host:port`) and performs the handshake.
    pub fn connect(addr: &str, auth: &Auth, options: &Options) -> Result<Self> {
        let socket = Socket::connect(addr, options)?;
        Self::handshake(socket, auth, options)
    }
}

impl<T: Transport> Connection<T> {
    /// Performs the handshake over an already established transport.
    ///
    /// A server that answers the hello with end-of-stream yields a connection that is already
    /// [closed](Connection::is_closed).
    pub fn handshake(transport: T, auth: &Auth, options: &Options) -> Result<Self> {
        let mut conn = Connection {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            stream: Stream::new(transport, options.compression.method()),
            revision: CLIENT_REVISION,
            server: ServerInfo::default(),
            options: options.clone(),
            closed: false,
            connected_at: Instant::now(),
        };
        let deadline = Instant::now() + options.dial_timeout;
        conn.with_deadline(Some(deadline), |c| c.hello(auth))?;
        Ok(conn)
    }

    fn hello(&mut self, auth: &Auth) -> Result<()> {
        let client = ClientInfo::from(&self.options);
        Request::Hello { client, auth }.encode(&mut self.stream, self.revision)?;
        self.stream.flush()?;

        match self.stream.read_u8()? {
            server::HELLO => {
                let info = ServerInfo::decode(&mut self.stream)?;
                if info.revision < DBMS_MIN_REVISION_WITH_CLIENT_INFO {
                    return Err(Error::UnsupportedServerRevision {
                        revision: info.revision,
                        minimum: DBMS_MIN_REVISION_WITH_CLIENT_INFO,
                    });
                }
                self.revision = self.revision.min(info.revision);
                info!(
                    "[conn {}] connected to {info}, negotiated revision {}",
                    self.id, self.revision
                );
                self.server = info;
                Request::Addendum.encode(&mut self.stream, self.revision)?;
                self.stream.flush()?;
                Ok(())
            }
            server::EXCEPTION => Err(Exception::decode(&mut self.stream)?.into()),
            server::END_OF_STREAM => {
                debug!("[conn {}] server closed the connection during handshake", self.id);
                self.closed = true;
                Ok(())
            }
            packet => Err(Error::UnexpectedPacket {
                op: "handshake",
                packet,
            }),
        }
    }

    /// Runs `op` with the transport deadline set to `deadline`, clearing it afterwards whatever
    /// the outcome. A fatal error closes the connection.
    pub(crate) fn with_deadline<R>(
        &mut self,
        deadline: Option<Instant>,
        op: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let result = match deadline {
            Some(deadline) => match self.stream.set_deadline(Some(deadline)) {
                Ok(()) => {
                    let result = op(self);
                    let cleared = self.stream.set_deadline(None);
                    result.and_then(|r| cleared.map(|()| r).map_err(Error::from))
                }
                Err(e) => Err(e.into()),
            },
            None => op(self),
        };
        if let Err(e) = &result {
            if e.is_fatal() {
                debug!("[conn {}] closing after error: {e}", self.id);
                self.closed = true;
            }
        }
        result
    }

    pub(crate) fn deadline(&self, timeout: Option<Duration>) -> Option<Instant> {
        timeout
            .or(self.options.read_timeout)
            .map(|t| Instant::now() + t)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Round trip to the server. Progress packets that arrive first are skipped.
    pub fn ping(&mut self) -> Result<()> {
        self.ensure_open()?;
        let deadline = self.deadline(None);
        self.with_deadline(deadline, |c| {
            Request::Ping.encode(&mut c.stream, c.revision)?;
            c.stream.flush()?;
            loop {
                match c.stream.read_u8()? {
                    server::PONG => {
                        trace!("[conn {}] pong", c.id);
                        return Ok(());
                    }
                    server::PROGRESS => {
                        Progress::decode(&mut c.stream, c.revision)?;
                    }
                    server::EXCEPTION => return Err(Exception::decode(&mut c.stream)?.into()),
                    packet => return Err(Error::UnexpectedPacket { op: "ping", packet }),
                }
            }
        })
    }

    /// Runs a statement that returns no rows, waiting for the server to finish it.
    pub fn exec(&mut self, sql: &str, args: &[Arg]) -> Result<()> {
        let body = bind(sql, args)?;
        self.ensure_open()?;
        let deadline = self.deadline(None);
        let mut options = QueryOptions::default();
        self.with_deadline(deadline, |c| {
            c.send_query(&body, &options.query_id, &options.settings)?;
            c.process("exec", &mut options)
        })
    }

    /// Sends a query packet followed by the empty block that ends its external data.
    pub(crate) fn send_query(
        &mut self,
        body: &str,
        query_id: &str,
        settings: &Settings,
    ) -> Result<()> {
        let settings = self.options.settings.merged(settings);
        debug!("[conn {}] query {query_id:?}: {body}", self.id);
        Request::Query(Query {
            id: query_id,
            body,
            settings: &settings,
            compression: self.options.compression.enabled(),
            client: ClientInfo::from(&self.options),
        })
        .encode(&mut self.stream, self.revision)?;
        self.send_data(&Block::new())?;
        self.stream.flush()?;
        Ok(())
    }

    /// Writes a data packet. Only the block itself is compressed. Nothing is flushed.
    pub(crate) fn send_data(&mut self, block: &Block) -> Result<()> {
        block.check_rows()?;
        self.stream.write_u8(client::DATA)?;
        self.stream.write_string("")?;
        let compressed = self.options.compression.enabled();
        if compressed {
            self.stream.set_write_compression(true)?;
        }
        let encoded = block.encode(&mut self.stream, self.revision);
        if compressed {
            self.stream.set_write_compression(false)?;
        }
        encoded
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }

    fn read_block(&mut self, compressed: bool) -> Result<Block> {
        // temporary table name
        self.stream.read_string()?;
        let compressed = compressed && self.options.compression.enabled();
        if compressed {
            self.stream.set_read_compression(true)?;
        }
        let block = Block::decode(&mut self.stream, self.revision, &self.options.registry);
        if compressed {
            let reset = self.stream.set_read_compression(false);
            let block = block?;
            reset?;
            return Ok(block);
        }
        block
    }

    /// Reads packets until one that matters to the caller arrives. Progress, profile info,
    /// table columns, logs and profile events are consumed along the way.
    pub(crate) fn receive(
        &mut self,
        op: &'static str,
        options: &mut QueryOptions,
    ) -> Result<Packet> {
        loop {
            let packet = self.stream.read_u8()?;
            trace!("[conn {}] <- {}", self.id, server::name(packet));
            match packet {
                server::DATA | server::TOTALS | server::EXTREMES => {
                    return Ok(Packet::Block(self.read_block(true)?));
                }
                server::EXCEPTION => return Err(Exception::decode(&mut self.stream)?.into()),
                server::END_OF_STREAM => return Ok(Packet::EndOfStream),
                server::PROGRESS => {
                    let progress = Progress::decode(&mut self.stream, self.revision)?;
                    if let Some(on_progress) = options.on_progress.as_mut() {
                        on_progress(&progress);
                    }
                }
                server::PROFILE_INFO => {
                    let profile = ProfileInfo::decode(&mut self.stream)?;
                    if let Some(on_profile_info) = options.on_profile_info.as_mut() {
                        on_profile_info(&profile);
                    }
                }
                server::TABLE_COLUMNS => {
                    self.stream.read_string()?;
                    self.stream.read_string()?;
                }
                server::LOG | server::PROFILE_EVENTS => {
                    let block = self.read_block(false)?;
                    for row in block.iter_rows() {
                        let line: Vec<String> = row.iter().map(ToString::to_string).collect();
                        let name = server::name(packet);
                        debug!("[conn {}] server {name}: {}", self.id, line.join(" "));
                    }
                }
                packet => return Err(Error::UnexpectedPacket { op, packet }),
            }
        }
    }

    /// Reads up to and including end-of-stream, ignoring any blocks.
    pub(crate) fn process(&mut self, op: &'static str, options: &mut QueryOptions) -> Result<()> {
        loop {
            if let Packet::EndOfStream = self.receive(op, options)? {
                return Ok(());
            }
        }
    }

    /// The first block of a result: its schema.
    pub(crate) fn first_block(
        &mut self,
        op: &'static str,
        options: &mut QueryOptions,
    ) -> Result<Block> {
        match self.receive(op, options)? {
            Packet::Block(block) => Ok(block),
            Packet::EndOfStream => Err(Error::UnexpectedEndOfStream(op)),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    /// Negotiated protocol revision.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn transport(&self) -> &T {
        self.stream.transport()
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("server", &self.server)
            .field("revision", &self.revision)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
