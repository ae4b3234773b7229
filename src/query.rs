//! Streaming query execution.
//!
//! A query runs in two phases. The calling thread sends the query and waits for the first block,
//! which describes the result columns. A background worker then takes the connection and reads
//! the remaining blocks, handing them over through a channel with room for two blocks so a slow
//! consumer holds back the socket reads. The worker reports a failure on a separate error channel
//! before it closes the block channel.
//!
//! Either way the connection ends up in the release callback, exactly once.
use std::{
    fmt,
    sync::mpsc::{self, Receiver},
    time::Duration,
};

use log::debug;

use crate::{
    bind::{Arg, bind},
    block::Block,
    connection::Connection,
    error::{Error, Result},
    protocol::{
        Socket, Transport,
        response::{ProfileInfo, Progress},
        thread,
    },
    settings::Settings,
};

/// Blocks buffered between the worker and the consumer.
pub const BLOCK_BUFFER: usize = 2;

/// Receives the connection once an operation that took it is over, together with the error
/// that ended it, if any.
pub type Release<T = Socket> = Box<dyn FnOnce(Connection<T>, Option<&Error>) + Send>;

/// A release callback that drops the connection.
pub(crate) fn discard<T: Transport>() -> Release<T> {
    Box::new(|_: Connection<T>, _: Option<&Error>| {})
}

pub type ProgressFn = Box<dyn FnMut(&Progress) + Send>;
pub type ProfileInfoFn = Box<dyn FnMut(&ProfileInfo) + Send>;

/// Per-query options.
#[derive(Default)]
pub struct QueryOptions {
    pub query_id: String,
    /// Overrides the connection settings for this query only.
    pub settings: Settings,
    /// Deadline for the whole query, streaming included. Falls back to the connection's read
    /// timeout.
    pub timeout: Option<Duration>,
    pub on_progress: Option<ProgressFn>,
    pub on_profile_info: Option<ProfileInfoFn>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_id(mut self, id: impl Into<String>) -> Self {
        self.query_id = id.into();
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_progress(mut self, f: impl FnMut(&Progress) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_profile_info(mut self, f: impl FnMut(&ProfileInfo) + Send + 'static) -> Self {
        self.on_profile_info = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("query_id", &self.query_id)
            .field("settings", &self.settings)
            .field("timeout", &self.timeout)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_profile_info", &self.on_profile_info.is_some())
            .finish()
    }
}

/// A connection on loan to one operation.
///
/// [`Lease::release`] hands the connection to the release callback. A lease that is dropped
/// instead releases with [`Error::Canceled`] and marks the connection closed, since the
/// operation stopped at an unknown point of the exchange.
pub(crate) struct Lease<T: Transport> {
    held: Option<(Connection<T>, Release<T>)>,
}

impl<T: Transport> Lease<T> {
    pub(crate) fn new(conn: Connection<T>, release: Release<T>) -> Self {
        Self {
            held: Some((conn, release)),
        }
    }

    pub(crate) fn conn(&mut self) -> Result<&mut Connection<T>> {
        self.held.as_mut().map(|(conn, _)| conn).ok_or(Error::Closed)
    }

    pub(crate) fn is_released(&self) -> bool {
        self.held.is_none()
    }

    pub(crate) fn release(&mut self, err: Option<&Error>) {
        if let Some((conn, release)) = self.held.take() {
            release(conn, err);
        }
    }
}

impl<T: Transport> Drop for Lease<T> {
    fn drop(&mut self) {
        if let Some((conn, _)) = self.held.as_mut() {
            debug!("[conn {}] released without finishing", conn.id());
            conn.mark_closed();
        }
        self.release(Some(&Error::Canceled));
    }
}

impl<T: Transport> Connection<T> {
    /// Runs a query whose result is streamed. The connection is dropped once the stream ends;
    /// use [`query_with`](Self::query_with) to get it back.
    pub fn query(self, sql: &str, args: &[Arg]) -> Result<Rows> {
        self.query_with(sql, args, QueryOptions::default(), discard())
    }

    /// Runs a query whose result is streamed.
    ///
    /// The returned [`Rows`] holds the schema block; data blocks arrive through it in server
    /// order. `release` is called exactly once: with the error if the query fails before
    /// returning, otherwise by the worker when the stream ends, fails or is abandoned.
    pub fn query_with(
        mut self,
        sql: &str,
        args: &[Arg],
        mut options: QueryOptions,
        release: Release<T>,
    ) -> Result<Rows> {
        let body = match bind(sql, args).and_then(|body| self.ensure_open().map(|()| body)) {
            Ok(body) => body,
            Err(e) => {
                release(self, Some(&e));
                return Err(e);
            }
        };

        let deadline = self.deadline(options.timeout);
        let schema = self.with_deadline(deadline, |c| {
            c.send_query(&body, &options.query_id, &options.settings)?;
            c.first_block("query", &mut options)
        });
        let schema = match schema {
            Ok(schema) => schema,
            Err(e) => {
                release(self, Some(&e));
                return Err(e);
            }
        };

        let (blocks_tx, blocks) = mpsc::sync_channel(BLOCK_BUFFER);
        let (errors_tx, errors) = mpsc::sync_channel(1);
        thread::spawn_receiver(
            Lease::new(self, release),
            options,
            deadline,
            blocks_tx,
            errors_tx,
        )?;
        Ok(Rows {
            schema,
            blocks,
            errors,
            done: false,
        })
    }
}

/// A streaming query result.
///
/// Iterating yields the data blocks in server order and, if the query failed, one final error.
/// Empty blocks are never yielded. Dropping `Rows` early cancels the stream; the connection is
/// then released as unusable.
pub struct Rows {
    schema: Block,
    blocks: Receiver<Block>,
    errors: Receiver<Error>,
    done: bool,
}

impl Rows {
    /// The first block of the result. It names and types the columns and usually has no rows.
    pub fn schema(&self) -> &Block {
        &self.schema
    }

    pub fn columns(&self) -> Vec<&str> {
        self.schema.names().collect()
    }

    /// Schema, block channel and error channel. The block channel closes when the stream ends;
    /// by then the error channel holds the error, if there was one.
    pub fn into_parts(self) -> (Block, Receiver<Block>, Receiver<Error>) {
        (self.schema, self.blocks, self.errors)
    }

    /// Reads the rest of the stream, discarding it.
    pub fn close(self) -> Result<()> {
        for block in self {
            block?;
        }
        Ok(())
    }
}

impl Iterator for Rows {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.blocks.recv() {
            Ok(block) => Some(Ok(block)),
            Err(_) => {
                self.done = true;
                self.errors.try_recv().ok().map(Err)
            }
        }
    }
}

impl fmt::Debug for Rows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows")
            .field("columns", &self.columns())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        bind::named,
        config::{Compression, Options},
        error::ErrorKind,
        protocol::{CLIENT_REVISION, server},
        testing::{self, MockTransport, recorder, wait_released},
    };

    #[test]
    fn schema_then_blocks_in_order() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::data(&testing::numbers(&[])));
        transport.push(testing::progress(3));
        transport.push(testing::data(&testing::numbers(&[1])));
        transport.push(testing::data(&testing::numbers(&[2, 3])));
        transport.push(testing::data(&testing::numbers(&[])));
        transport.push(testing::profile_info(6));
        transport.push(testing::data(&testing::numbers(&[4, 5, 6])));
        transport.push(testing::end_of_stream());

        let (released, release) = recorder();
        let rows = conn
            .query_with("SELECT n FROM t", &[], QueryOptions::new(), release)
            .unwrap();
        assert_eq!(rows.columns(), ["n"]);
        assert_eq!(rows.schema().rows(), 0);

        let blocks: Vec<Block> = rows.collect::<Result<_>>().unwrap();
        assert_eq!(
            blocks,
            [
                testing::numbers(&[1]),
                testing::numbers(&[2, 3]),
                testing::numbers(&[4, 5, 6])
            ]
        );
        assert_eq!(wait_released(&released), None);
        assert!(!released.lock().unwrap()[0].0.is_closed());
    }

    #[test]
    fn exception_mid_stream_is_the_only_error() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::data(&testing::numbers(&[])));
        transport.push(testing::exception(241, "Memory limit exceeded"));

        let (released, release) = recorder();
        let rows = conn
            .query_with("SELECT n FROM t", &[], QueryOptions::new(), release)
            .unwrap();
        let (_, blocks, errors) = rows.into_parts();

        assert!(blocks.recv().is_err());
        let err = errors.recv().unwrap();
        let exception = err.exception().unwrap();
        assert_eq!(exception.code, 241);
        assert_eq!(exception.message, "Memory limit exceeded");
        assert!(errors.try_recv().is_err());
        assert_eq!(wait_released(&released), Some(ErrorKind::Server));
    }

    #[test]
    fn iterator_ends_with_the_error() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::data(&testing::numbers(&[])));
        transport.push(testing::data(&testing::numbers(&[1])));
        transport.push(testing::exception(159, "Timeout exceeded"));

        let (_released, release) = recorder();
        let mut rows = conn
            .query_with("SELECT n FROM t", &[], QueryOptions::new(), release)
            .unwrap();
        assert_eq!(rows.next().unwrap().unwrap(), testing::numbers(&[1]));
        assert!(matches!(rows.next(), Some(Err(Error::Exception(_)))));
        assert!(rows.next().is_none());
    }

    #[test]
    fn failure_before_the_schema_releases_synchronously() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::exception(60, "Table default.t does not exist"));

        let (released, release) = recorder();
        let err = conn
            .query_with("SELECT n FROM t", &[], QueryOptions::new(), release)
            .unwrap_err();
        assert_eq!(err.exception().map(|e| e.code), Some(60));
        assert_eq!(released.lock().unwrap().len(), 1);
        assert_eq!(released.lock().unwrap()[0].1, Some(ErrorKind::Server));
    }

    #[test]
    fn end_of_stream_before_the_schema() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::end_of_stream());

        let (_released, release) = recorder();
        let err = conn
            .query_with("SELECT 1", &[], QueryOptions::new(), release)
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfStream("query")));
    }

    #[test]
    fn mixed_bind_styles_send_nothing() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());

        let (released, release) = recorder();
        let err = conn
            .query_with(
                "SELECT * FROM t WHERE a = $1 AND b = @b",
                &[1_u8.into(), named("b", 2_u8)],
                QueryOptions::new(),
                release,
            )
            .unwrap_err();
        assert!(matches!(err, Error::MixedBindStyles));
        assert!(transport.output().is_empty());
        assert_eq!(released.lock().unwrap()[0].1, Some(ErrorKind::Usage));
    }

    #[test]
    fn dropping_rows_cancels_the_stream() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::data(&testing::numbers(&[])));
        for i in 0..8 {
            transport.push(testing::data(&testing::numbers(&[i])));
        }
        transport.push(testing::end_of_stream());

        let (released, release) = recorder();
        let rows = conn
            .query_with("SELECT n FROM t", &[], QueryOptions::new(), release)
            .unwrap();
        drop(rows);

        assert_eq!(wait_released(&released), Some(ErrorKind::Io));
        assert!(released.lock().unwrap()[0].0.is_closed());
    }

    #[test]
    fn callbacks_and_compressed_blocks() {
        let options = Options::builder().compression(Compression::Lz4).build();
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &options);
        let compressed = |values: &[u64]| {
            testing::block_packet(server::DATA, &testing::numbers(values), CLIENT_REVISION, true)
        };
        transport.push(compressed(&[]));
        transport.push(testing::progress(2));
        transport.push(compressed(&[10, 20]));
        transport.push(testing::profile_info(2));
        transport.push(testing::end_of_stream());

        let progress = Arc::new(Mutex::new(0));
        let profile = Arc::new(Mutex::new(None));
        let options = {
            let progress = Arc::clone(&progress);
            let profile = Arc::clone(&profile);
            QueryOptions::new()
                .query_id("abc")
                .on_progress(move |p| *progress.lock().unwrap() += p.rows)
                .on_profile_info(move |p| *profile.lock().unwrap() = Some(p.rows))
        };

        let (released, release) = recorder();
        let rows = conn.query_with("SELECT n FROM t", &[], options, release).unwrap();
        let blocks: Vec<Block> = rows.collect::<Result<_>>().unwrap();
        assert_eq!(blocks, [testing::numbers(&[10, 20])]);
        assert_eq!(wait_released(&released), None);
        assert_eq!(*progress.lock().unwrap(), 2);
        assert_eq!(*profile.lock().unwrap(), Some(2));
    }

    #[test]
    fn dropped_lease_releases_once_as_canceled() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        let (released, release) = recorder();

        let lease = Lease::new(conn, release);
        assert!(!lease.is_released());
        drop(lease);

        let released = released.lock().unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].1, Some(ErrorKind::Io));
        assert!(released[0].0.is_closed());
    }
}
