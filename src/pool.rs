//! A small connection pool.
//!
//! [`Client`] checks a connection out for every operation and takes it back through the release
//! callback once the operation is over. Healthy connections are kept idle up to
//! `max_idle_conns`; connections that saw an I/O or protocol error, were closed, or outlived
//! `conn_max_lifetime` are dropped. At most `max_open_conns` connections exist at once (zero
//! means no limit); callers beyond that wait for one to come back.
use std::{
    fmt,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use log::{debug, info, warn};

use crate::{
    batch::Batch,
    bind::Arg,
    config::{Auth, OpenStrategy, Options},
    connection::Connection,
    error::{Error, ErrorKind, Result},
    protocol::{Socket, Transport},
    query::{QueryOptions, Release, Rows},
};

type Dialer<T> = dyn Fn(&str, &Auth, &Options) -> Result<Connection<T>> + Send + Sync;

/// Connection counts at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub open: usize,
    pub idle: usize,
}

struct PoolState<T: Transport> {
    idle: Vec<Connection<T>>,
    open: usize,
}

struct Shared<T: Transport> {
    addrs: Vec<String>,
    auth: Auth,
    options: Options,
    state: Mutex<PoolState<T>>,
    returned: Condvar,
    next: AtomicUsize,
    dialer: Box<Dialer<T>>,
}

impl<T: Transport> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reusable(&self, conn: &Connection<T>, err: Option<&Error>) -> bool {
        err.is_none_or(|e| e.kind() == ErrorKind::Server)
            && !conn.is_closed()
            && conn.connected_at().elapsed() < self.options.conn_max_lifetime
    }

    fn acquire(&self) -> Result<Connection<T>> {
        let mut state = self.lock();
        loop {
            while let Some(conn) = state.idle.pop() {
                if self.reusable(&conn, None) {
                    return Ok(conn);
                }
                debug!("[conn {}] dropping stale idle connection", conn.id());
                state.open -= 1;
            }
            let max = self.options.max_open_conns;
            if max == 0 || state.open < max {
                state.open += 1;
                break;
            }
            state = self
                .returned
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(state);

        self.dial().inspect_err(|_| {
            self.lock().open -= 1;
            self.returned.notify_one();
        })
    }

    fn dial(&self) -> Result<Connection<T>> {
        let n = self.addrs.len();
        let start = match self.options.conn_open_strategy {
            OpenStrategy::InOrder => 0,
            OpenStrategy::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % n.max(1),
        };
        let mut last = Error::Closed;
        for i in 0..n {
            let addr = &self.addrs[(start + i) % n];
            match (self.dialer)(addr, &self.auth, &self.options) {
                Ok(conn) if conn.is_closed() => {
                    warn!("{addr} closed the connection during handshake");
                    last = Error::Closed;
                }
                Ok(conn) => {
                    info!("[conn {}] opened to {addr}", conn.id());
                    return Ok(conn);
                }
                Err(e) => {
                    warn!("failed to connect to {addr}: {e}");
                    last = e;
                }
            }
        }
        Err(last)
    }

    fn put(&self, conn: Connection<T>, err: Option<&Error>) {
        let mut state = self.lock();
        if self.reusable(&conn, err) && state.idle.len() < self.options.max_idle_conns {
            debug!("[conn {}] back to the pool", conn.id());
            state.idle.push(conn);
        } else {
            debug!("[conn {}] discarded", conn.id());
            state.open -= 1;
        }
        drop(state);
        self.returned.notify_one();
    }
}

/// A pooled client for one or more server addresses.
pub struct Client<T: Transport = Socket> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Client<Socket> {
    /// Connections are dialed lazily, so this never touches the network.
    pub fn new(addrs: Vec<String>, auth: Auth, options: Options) -> Self {
        Self::with_dialer(addrs, auth, options, Connection::connect)
    }
}

impl<T: Transport> Client<T> {
    /// A pool that opens connections through `dialer`.
    pub fn with_dialer<F>(addrs: Vec<String>, auth: Auth, options: Options, dialer: F) -> Self
    where
        F: Fn(&str, &Auth, &Options) -> Result<Connection<T>> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                addrs,
                auth,
                options,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    open: 0,
                }),
                returned: Condvar::new(),
                next: AtomicUsize::new(0),
                dialer: Box::new(dialer),
            }),
        }
    }

    fn release(&self) -> Release<T> {
        let shared = Arc::clone(&self.shared);
        Box::new(move |conn: Connection<T>, err: Option<&Error>| {
            shared.put(conn, err)
        })
    }

    pub fn ping(&self) -> Result<()> {
        let mut conn = self.shared.acquire()?;
        let result = conn.ping();
        self.shared.put(conn, result.as_ref().err());
        result
    }

    pub fn exec(&self, sql: &str, args: &[Arg]) -> Result<()> {
        let mut conn = self.shared.acquire()?;
        let result = conn.exec(sql, args);
        self.shared.put(conn, result.as_ref().err());
        result
    }

    pub fn query(&self, sql: &str, args: &[Arg]) -> Result<Rows> {
        self.query_with(sql, args, QueryOptions::default())
    }

    pub fn query_with(&self, sql: &str, args: &[Arg], options: QueryOptions) -> Result<Rows> {
        let conn = self.shared.acquire()?;
        conn.query_with(sql, args, options, self.release())
    }

    pub fn prepare_batch(&self, sql: &str) -> Result<Batch<T>> {
        let conn = self.shared.acquire()?;
        conn.prepare_batch_with(sql, QueryOptions::default(), self.release())
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    pub fn stats(&self) -> Stats {
        let state = self.shared.lock();
        Stats {
            open: state.open,
            idle: state.idle.len(),
        }
    }
}

impl<T: Transport> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("addrs", &self.shared.addrs)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
