//! # TCP Transport
//!
//! Plain blocking socket transport. Both directions share one `TcpStream`:
//! `&TcpStream` implements `Read` and `Write`, so the receive loop and the
//! senders never contend on a lock here.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use rmux_common::{MuxError, MuxResult};

use super::{is_transient, Liveness, Transport, TransportFactory, TransportState};
use crate::config::ClientConfig;

/// Socket transport over a connected `TcpStream`.
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    liveness: Liveness,
}

impl TcpTransport {
    /// Wraps an already connected stream.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        let liveness = Liveness::new(TransportState::Connecting);
        liveness.open();
        Ok(TcpTransport {
            stream,
            peer,
            liveness,
        })
    }

    /// Remote address of the socket.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for TcpTransport {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (&self.stream).write(buf).map_err(|err| {
            if !is_transient(&err) {
                self.liveness.fault();
            }
            err
        })
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.stream).read(buf).map_err(|err| {
            if !is_transient(&err) {
                self.liveness.fault();
            }
            err
        })
    }

    fn close(&self) {
        if self.liveness.close() {
            // Shutting down both halves wakes the reader blocked in `read`.
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    fn state(&self) -> TransportState {
        self.liveness.get()
    }
}

/// Factory for [`TcpTransport`].
///
/// Never sets a read timeout: the receive loop blocks on reads for the whole
/// connection lifetime.
#[derive(Debug, Clone)]
pub struct TcpFactory {
    connect_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    nodelay: bool,
}

impl TcpFactory {
    /// Creates a factory using the socket options from `config`.
    pub fn new(config: &ClientConfig) -> Self {
        TcpFactory {
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
            nodelay: config.nodelay,
        }
    }

    fn connect_stream(&self, addr: &str) -> io::Result<TcpStream> {
        let mut last_err = None;
        for socket_addr in addr.to_socket_addrs()? {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&socket_addr, timeout),
                None => TcpStream::connect(socket_addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    debug!(%socket_addr, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
        }))
    }
}

impl Default for TcpFactory {
    fn default() -> Self {
        TcpFactory::new(&ClientConfig::default())
    }
}

impl TransportFactory for TcpFactory {
    fn connect(&self, addr: &str) -> MuxResult<Arc<dyn Transport>> {
        let connect_error = |source| MuxError::Connect {
            addr: addr.to_string(),
            source,
        };

        let stream = self.connect_stream(addr).map_err(connect_error)?;
        stream.set_write_timeout(self.write_timeout).map_err(connect_error)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(self.nodelay).map_err(connect_error)?;

        let transport = TcpTransport::from_stream(stream).map_err(connect_error)?;
        debug!(peer = %transport.peer_addr(), "tcp transport open");
        Ok(Arc::new(transport))
    }
}
