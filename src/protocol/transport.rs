use std::{
    io::{self, BufReader, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Instant,
};

use log::{debug, trace};

use crate::{
    compress::{self, Method},
    config::Options,
    error::{Error, Result},
};

/// Bytes written while compression is off are sent to the socket once this much is pending,
/// even without an explicit flush.
const OUTPUT_HIGH_WATER: usize = 1 << 20;

/// A bidirectional byte channel to the server with deadline support.
///
/// A deadline is absolute: every read and write after it has passed fails with
/// [`io::ErrorKind::TimedOut`] until it is cleared with `set_deadline(None)`.
pub trait Transport: Read + Write + Send + 'static {
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()>;
}

enum SocketKind {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

/// TCP (optionally TLS) socket to a server.
pub struct Socket {
    kind: SocketKind,
    deadline: Option<Instant>,
}

impl Socket {
    /// Dials `addr` (`host:port`), trying every resolved address within the dial timeout.
    pub fn connect(addr: &str, options: &Options) -> Result<Self> {
        let mut last = None;
        for resolved in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&resolved, options.dial_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!("connected to {resolved} ({addr})");
                    return Self::wrap(stream, addr, options);
                }
                Err(e) => {
                    debug!("dial {resolved} failed: {e}");
                    last = Some(e);
                }
            }
        }
        Err(last
            .unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("{addr} did not resolve"))
            })
            .into())
    }

    #[cfg(feature = "tls")]
    fn wrap(stream: TcpStream, addr: &str, options: &Options) -> Result<Self> {
        let kind = match &options.tls {
            Some(tls) => SocketKind::Tls(Box::new(super::tls::wrap(stream, addr, tls)?)),
            None => SocketKind::Plain(stream),
        };
        Ok(Self {
            kind,
            deadline: None,
        })
    }

    #[cfg(not(feature = "tls"))]
    fn wrap(stream: TcpStream, _addr: &str, options: &Options) -> Result<Self> {
        if options.tls.is_some() {
            return Err(Error::Tls(
                "TLS requested but the 'tls' feature is not enabled".into(),
            ));
        }
        Ok(Self {
            kind: SocketKind::Plain(stream),
            deadline: None,
        })
    }

    fn tcp(&self) -> &TcpStream {
        match &self.kind {
            SocketKind::Plain(s) => s,
            #[cfg(feature = "tls")]
            SocketKind::Tls(s) => &s.sock,
        }
    }

    /// Applies the remaining time until the deadline as the socket timeout.
    fn arm(&self) -> io::Result<()> {
        let Some(deadline) = self.deadline else {
            return Ok(());
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded"));
        }
        let tcp = self.tcp();
        tcp.set_read_timeout(Some(remaining))?;
        tcp.set_write_timeout(Some(remaining))
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.arm()?;
        match &mut self.kind {
            SocketKind::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            SocketKind::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.arm()?;
        match &mut self.kind {
            SocketKind::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            SocketKind::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.arm()?;
        match &mut self.kind {
            SocketKind::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            SocketKind::Tls(s) => s.flush(),
        }
    }
}

impl Transport for Socket {
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        self.deadline = deadline;
        if deadline.is_none() {
            let tcp = self.tcp();
            tcp.set_read_timeout(None)?;
            tcp.set_write_timeout(None)?;
        }
        Ok(())
    }
}

/// Buffered, compression aware byte stream over a [`Transport`].
///
/// Compression is toggled separately per direction. Writes are buffered until [`flush`]; while
/// write compression is on they are cut into frames. Reads come straight from the socket buffer
/// or, while read compression is on, from decompressed frames.
///
/// [`flush`]: Write::flush
pub struct Stream<T: Transport> {
    reader: compress::Reader<BufReader<T>>,
    writer: compress::Writer<Vec<u8>>,
    read_compressed: bool,
    write_compressed: bool,
}

impl<T: Transport> Stream<T> {
    pub fn new(transport: T, method: Method) -> Self {
        Self {
            reader: compress::Reader::new(BufReader::new(transport)),
            writer: compress::Writer::new(Vec::new(), method),
            read_compressed: false,
            write_compressed: false,
        }
    }

    pub fn transport(&self) -> &T {
        self.reader.get_ref().get_ref()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.reader.get_mut().get_mut()
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        self.transport_mut().set_deadline(deadline)
    }

    pub fn set_read_compression(&mut self, on: bool) -> io::Result<()> {
        if self.read_compressed && !on {
            self.reader.reset()?;
        }
        self.read_compressed = on;
        Ok(())
    }

    /// Turning write compression off closes the current frame so that later plain bytes
    /// cannot end up inside it.
    pub fn set_write_compression(&mut self, on: bool) -> io::Result<()> {
        if self.write_compressed && !on {
            self.writer.finish_frame()?;
        }
        self.write_compressed = on;
        Ok(())
    }

    fn drain(&mut self) -> io::Result<()> {
        let out = self.writer.get_mut();
        if out.is_empty() {
            return Ok(());
        }
        trace!("sending {} bytes", out.len());
        self.reader.get_mut().get_mut().write_all(out)?;
        out.clear();
        Ok(())
    }
}

impl<T: Transport> Read for Stream<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_compressed {
            self.reader.read(buf)
        } else {
            self.reader.get_mut().read(buf)
        }
    }
}

impl<T: Transport> Write for Stream<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = if self.write_compressed {
            self.writer.write(buf)?
        } else {
            self.writer.get_mut().extend_from_slice(buf);
            buf.len()
        };
        if self.writer.get_ref().len() >= OUTPUT_HIGH_WATER {
            self.drain()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.write_compressed {
            self.writer.finish_frame()?;
        }
        self.drain()?;
        self.transport_mut().flush()
    }
}
