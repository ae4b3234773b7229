//! Batch inserts.
//!
//! [`Connection::prepare_batch`] sends the `INSERT` and reads back the block that describes the
//! target columns. Rows are accumulated into that block on the client and go out as one data
//! packet on [`Batch::send`], followed by the empty block that ends the insert.
use std::{mem, sync::LazyLock};

use log::{debug, info};
use regex::Regex;

use crate::{
    block::Block,
    column::Column,
    connection::Connection,
    error::{Error, Result},
    protocol::{Socket, Transport},
    query::{Lease, QueryOptions, Release, discard},
    value::Value,
};

static VALUES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bVALUES\b").expect("values keyword pattern"));

/// Cuts the statement right after its `VALUES` keyword, adding the keyword if it is missing.
/// Inline rows are never sent; the data travels as blocks.
///
/// The keyword is the last `VALUES` outside parentheses and quotes, so quoted identifiers and
/// column lists that happen to contain the word are left alone.
fn insert_statement(sql: &str) -> String {
    match VALUES.find_iter(sql).filter(|m| top_level(&sql[..m.start()])).last() {
        Some(m) => format!("{}VALUES", &sql[..m.start()]),
        None => format!("{} VALUES", sql.trim_end()),
    }
}

/// Whether the end of `prefix` lies outside any parenthesis or quoted text.
fn top_level(prefix: &str) -> bool {
    let mut depth = 0_usize;
    let mut quote = None;
    let mut escaped = false;
    for c in prefix.chars() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            },
        }
    }
    depth == 0 && quote.is_none()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Sent,
    Aborted,
}

impl<T: Transport> Connection<T> {
    /// Starts an insert. The connection is dropped once the batch is sent or aborted; use
    /// [`prepare_batch_with`](Self::prepare_batch_with) to get it back.
    pub fn prepare_batch(self, sql: &str) -> Result<Batch<T>> {
        self.prepare_batch_with(sql, QueryOptions::default(), discard())
    }

    /// Starts an insert. `release` runs exactly once: here if the insert cannot be started,
    /// otherwise when the batch is sent, aborted or dropped.
    pub fn prepare_batch_with(
        mut self,
        sql: &str,
        mut options: QueryOptions,
        release: Release<T>,
    ) -> Result<Batch<T>> {
        if let Err(e) = self.ensure_open() {
            release(self, Some(&e));
            return Err(e);
        }
        let query = insert_statement(sql);
        let deadline = self.deadline(options.timeout);
        let schema = self.with_deadline(deadline, |c| {
            c.send_query(&query, &options.query_id, &options.settings)?;
            c.first_block("insert", &mut options)
        });
        match schema {
            Ok(block) => {
                debug!(
                    "[conn {}] batch open for {} columns",
                    self.id(),
                    block.column_count()
                );
                Ok(Batch {
                    lease: Lease::new(self, release),
                    block,
                    options,
                    state: State::Open,
                })
            }
            Err(e) => {
                release(self, Some(&e));
                Err(e)
            }
        }
    }
}

/// Rows waiting to be inserted.
///
/// A batch is single use: once [sent](Batch::send) or [aborted](Batch::abort) it accepts no
/// more rows and cannot be sent again. Dropping a batch that was never sent aborts it.
pub struct Batch<T: Transport = Socket> {
    lease: Lease<T>,
    block: Block,
    options: QueryOptions,
    state: State,
}

impl<T: Transport> Batch<T> {
    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::Sent | State::Aborted => Err(Error::BatchFinalized),
        }
    }

    /// Column names and types of the target table, in insert order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.block.columns().map(|(name, column)| (name, column.type_name()))
    }

    pub fn rows(&self) -> usize {
        self.block.rows()
    }

    pub fn is_sent(&self) -> bool {
        self.state == State::Sent
    }

    /// Appends one row, its values in column order. A row that fails to convert leaves the batch
    /// unchanged.
    pub fn append(&mut self, row: &[Value]) -> Result<()> {
        self.ensure_open()?;
        self.block.append_row(row)
    }

    /// A handle for filling column `index` directly. Columns filled this way must end up with
    /// the same number of rows before the batch is sent.
    pub fn column(&mut self, index: usize) -> Result<BatchColumn<'_>> {
        self.ensure_open()?;
        let column = self
            .block
            .column_mut(index)
            .ok_or(Error::BatchColumnIndex(index))?;
        Ok(BatchColumn { column })
    }

    /// Sends the accumulated rows and waits for the server to acknowledge the insert.
    ///
    /// The rows are gone afterwards whatever the outcome, so a second call fails with
    /// [`Error::BatchAlreadySent`] without touching the connection. Columns of unequal length
    /// are reported before anything is written and leave the batch open.
    pub fn send(&mut self) -> Result<()> {
        match self.state {
            State::Open => {}
            State::Sent => return Err(Error::BatchAlreadySent),
            State::Aborted => return Err(Error::BatchFinalized),
        }
        let rows = self.block.check_rows()?;
        self.state = State::Sent;

        let block = mem::take(&mut self.block);
        let options = &mut self.options;
        let result = self.lease.conn().and_then(|conn| {
            let deadline = conn.deadline(options.timeout);
            conn.with_deadline(deadline, |c| {
                if rows > 0 {
                    c.send_data(&block)?;
                }
                c.send_data(&Block::new())?;
                c.flush()?;
                c.process("insert", options)
            })
        });

        match &result {
            Ok(()) => {
                if let Ok(conn) = self.lease.conn() {
                    info!("[conn {}] inserted {rows} rows", conn.id());
                }
            }
            Err(Error::Exception(_)) => {}
            Err(_) => {
                if let Ok(conn) = self.lease.conn() {
                    conn.mark_closed();
                }
            }
        }
        self.lease.release(result.as_ref().err());
        result
    }

    /// Gives up on the insert without sending any rows. The server is still waiting for data
    /// at this point, so the connection is released as closed.
    pub fn abort(&mut self) -> Result<()> {
        match self.state {
            State::Open => {}
            State::Sent => return Err(Error::BatchAlreadySent),
            State::Aborted => return Err(Error::BatchFinalized),
        }
        self.state = State::Aborted;
        self.block = Block::new();
        if let Ok(conn) = self.lease.conn() {
            debug!("[conn {}] batch aborted", conn.id());
            conn.mark_closed();
        }
        self.lease.release(Some(&Error::Canceled));
        Ok(())
    }
}

impl<T: Transport> std::fmt::Debug for Batch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("state", &self.state)
            .field("rows", &self.block.rows())
            .field("released", &self.lease.is_released())
            .finish_non_exhaustive()
    }
}

/// One column of an open batch.
#[derive(Debug)]
pub struct BatchColumn<'a> {
    column: &'a mut dyn Column,
}

impl BatchColumn<'_> {
    pub fn rows(&self) -> usize {
        self.column.rows()
    }

    pub fn append(&mut self, value: impl Into<Value>) -> Result<()> {
        self.column.append(&value.into())
    }

    /// Appends every value or none of them.
    pub fn extend<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let rows = self.column.rows();
        for value in values {
            if let Err(e) = self.column.append(&value.into()) {
                self.column.truncate(rows);
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        column::Registry,
        config::Options,
        error::ErrorKind,
        protocol::client,
        testing::{self, MockTransport, recorder, wait_released},
    };

    fn client_data(block: &Block) -> Vec<u8> {
        let mut packet = testing::data(block);
        packet[0] = client::DATA;
        packet
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    fn two_columns() -> Block {
        let registry = Registry::default();
        Block::new()
            .with_column("id", registry.column("UInt64").unwrap())
            .with_column("name", registry.column("String").unwrap())
    }

    #[test]
    fn statements_end_at_values() {
        assert_eq!(insert_statement("INSERT INTO t"), "INSERT INTO t VALUES");
        assert_eq!(insert_statement("INSERT INTO t VALUES"), "INSERT INTO t VALUES");
        assert_eq!(
            insert_statement("insert into t (a, b) values (1, 2)"),
            "insert into t (a, b) VALUES"
        );
        assert_eq!(
            insert_statement("INSERT INTO my_values_log\n"),
            "INSERT INTO my_values_log VALUES"
        );
        assert_eq!(
            insert_statement("INSERT INTO t (id, `values`) VALUES"),
            "INSERT INTO t (id, `values`) VALUES"
        );
        assert_eq!(
            insert_statement("INSERT INTO t (id, values) VALUES (1, 'values (2)')"),
            "INSERT INTO t (id, values) VALUES"
        );
        assert_eq!(
            insert_statement("INSERT INTO t (\"values\")"),
            "INSERT INTO t (\"values\") VALUES"
        );
    }

    #[test]
    fn send_transmits_rows_then_terminator() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::table_columns());
        transport.push(testing::data(&testing::numbers(&[])));
        transport.push(testing::progress(2));
        transport.push(testing::end_of_stream());

        let (released, release) = recorder();
        let mut batch = conn
            .prepare_batch_with("INSERT INTO t (n) VALUES (1)", QueryOptions::new(), release)
            .unwrap();
        assert!(contains(&transport.take_output(), b"INSERT INTO t (n) VALUES"));
        assert_eq!(batch.columns().collect::<Vec<_>>(), [("n", "UInt64")]);

        batch.append(&[Value::UInt64(1)]).unwrap();
        batch.append(&[Value::UInt64(2)]).unwrap();
        assert_eq!(batch.rows(), 2);
        batch.send().unwrap();
        assert!(batch.is_sent());

        let mut expected = client_data(&testing::numbers(&[1, 2]));
        expected.extend(client_data(&Block::new()));
        assert_eq!(transport.take_output(), expected);
        assert_eq!(wait_released(&released), None);
        assert!(!released.lock().unwrap()[0].0.is_closed());
    }

    #[test]
    fn empty_batch_sends_only_the_terminator() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::data(&testing::numbers(&[])));
        transport.push(testing::end_of_stream());

        let mut batch = conn.prepare_batch("INSERT INTO t").unwrap();
        transport.take_output();
        batch.send().unwrap();
        assert_eq!(transport.take_output(), client_data(&Block::new()));
    }

    #[test]
    fn second_send_fails_without_retransmitting() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::data(&testing::numbers(&[])));
        transport.push(testing::end_of_stream());

        let (released, release) = recorder();
        let mut batch = conn
            .prepare_batch_with("INSERT INTO t", QueryOptions::new(), release)
            .unwrap();
        batch.append(&[Value::UInt64(7)]).unwrap();
        batch.send().unwrap();
        transport.take_output();

        assert!(matches!(batch.send(), Err(Error::BatchAlreadySent)));
        assert!(transport.output().is_empty());
        assert!(matches!(batch.append(&[Value::UInt64(8)]), Err(Error::BatchFinalized)));
        assert!(matches!(batch.column(0), Err(Error::BatchFinalized)));
        assert!(matches!(batch.abort(), Err(Error::BatchAlreadySent)));
        assert_eq!(released.lock().unwrap().len(), 1);
    }

    #[test]
    fn server_exception_keeps_the_connection() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::data(&testing::numbers(&[])));
        transport.push(testing::exception(252, "Too many parts"));

        let (released, release) = recorder();
        let mut batch = conn
            .prepare_batch_with("INSERT INTO t", QueryOptions::new(), release)
            .unwrap();
        batch.append(&[Value::UInt64(1)]).unwrap();
        let err = batch.send().unwrap_err();
        assert_eq!(err.exception().map(|e| e.code), Some(252));

        let released = released.lock().unwrap();
        assert_eq!(released[0].1, Some(ErrorKind::Server));
        assert!(!released[0].0.is_closed());
    }

    #[test]
    fn lost_connection_during_send_closes_it() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::data(&testing::numbers(&[])));

        let (released, release) = recorder();
        let mut batch = conn
            .prepare_batch_with("INSERT INTO t", QueryOptions::new(), release)
            .unwrap();
        batch.append(&[Value::UInt64(1)]).unwrap();
        let err = batch.send().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        let released = released.lock().unwrap();
        assert_eq!(released[0].1, Some(ErrorKind::Io));
        assert!(released[0].0.is_closed());
    }

    #[test]
    fn abort_sends_nothing_and_closes() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::data(&testing::numbers(&[])));

        let (released, release) = recorder();
        let mut batch = conn
            .prepare_batch_with("INSERT INTO t", QueryOptions::new(), release)
            .unwrap();
        transport.take_output();
        batch.append(&[Value::UInt64(1)]).unwrap();
        batch.abort().unwrap();

        assert!(transport.output().is_empty());
        assert!(matches!(batch.append(&[Value::UInt64(2)]), Err(Error::BatchFinalized)));
        assert!(matches!(batch.send(), Err(Error::BatchFinalized)));
        assert!(matches!(batch.abort(), Err(Error::BatchFinalized)));

        let released = released.lock().unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].1, Some(ErrorKind::Io));
        assert!(released[0].0.is_closed());
    }

    #[test]
    fn dropping_an_unsent_batch_aborts_it() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::data(&testing::numbers(&[])));

        let (released, release) = recorder();
        let batch = conn
            .prepare_batch_with("INSERT INTO t", QueryOptions::new(), release)
            .unwrap();
        drop(batch);

        let released = released.lock().unwrap();
        assert_eq!(released.len(), 1);
        assert!(released[0].0.is_closed());
    }

    #[test]
    fn column_handles() {
        let transport = MockTransport::new();
        let conn = testing::connected(&transport, &Options::default());
        transport.push(testing::data(&two_columns()));
        transport.push(testing::end_of_stream());

        let mut batch = conn.prepare_batch("INSERT INTO people").unwrap();
        transport.take_output();
        assert!(matches!(batch.column(2), Err(Error::BatchColumnIndex(2))));

        batch.column(0).unwrap().extend([1_u64, 2]).unwrap();
        // nothing is written while columns disagree
        let err = batch.send().unwrap_err();
        assert!(matches!(err, Error::ColumnRowMismatch { .. }));
        assert!(transport.output().is_empty());
        assert!(!batch.is_sent());

        let mut names = batch.column(1).unwrap();
        names.append("ada").unwrap();
        names.append("grace").unwrap();
        assert_eq!(names.rows(), 2);

        let mut ids = batch.column(0).unwrap();
        assert!(ids.extend([Value::UInt64(3), Value::Int64(-1)]).is_err());
        assert_eq!(ids.rows(), 2);

        batch.send().unwrap();
        let sent = transport.take_output();
        assert!(contains(&sent, b"grace"));
    }
}
