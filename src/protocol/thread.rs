//! Background readers for streaming results.
use std::{sync::mpsc::SyncSender, thread, time::Instant};

use log::debug;

use super::Transport;
use crate::{
    block::Block,
    connection::{Connection, Packet},
    error::{Error, Result},
    query::{Lease, QueryOptions},
};

/// Spawns the thread that reads the rest of a query result off the leased connection.
///
/// Non-empty blocks go to `blocks` in server order. The connection is always released before
/// `blocks` is closed, and a failure is reported on `errors` in between, so a consumer that sees
/// the block channel close finds the connection back in its pool and any error already queued.
/// If the thread cannot be spawned the lease is dropped, which releases the connection as
/// canceled.
pub(crate) fn spawn_receiver<T: Transport>(
    mut lease: Lease<T>,
    mut options: QueryOptions,
    deadline: Option<Instant>,
    blocks: SyncSender<Block>,
    errors: SyncSender<Error>,
) -> Result<()> {
    let id = lease.conn().map(|conn| conn.id()).unwrap_or_default();
    thread::Builder::new()
        .name(format!("tundra-query-{id}"))
        .spawn(move || {
            let result = lease.conn().and_then(|conn| {
                conn.with_deadline(deadline, |c| stream(c, &mut options, &blocks))
            });
            match result {
                Ok(count) => {
                    debug!("[conn {id}] query finished after {count} blocks");
                    lease.release(None);
                    drop(blocks);
                }
                Err(e) => {
                    debug!("[conn {id}] query stream failed: {e}");
                    lease.release(Some(&e));
                    // nobody is listening once the rows were dropped
                    let _ = errors.send(e);
                    drop(blocks);
                }
            }
        })?;
    Ok(())
}

fn stream<T: Transport>(
    conn: &mut Connection<T>,
    options: &mut QueryOptions,
    blocks: &SyncSender<Block>,
) -> Result<usize> {
    let mut count = 0;
    loop {
        match conn.receive("query", options)? {
            Packet::Block(block) if block.rows() == 0 => {}
            Packet::Block(block) => {
                blocks.send(block).map_err(|_| Error::Canceled)?;
                count += 1;
            }
            Packet::EndOfStream => return Ok(count),
        }
    }
}
