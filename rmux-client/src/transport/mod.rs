//! # Transport Abstraction
//!
//! Purpose: Describe the byte channel the connection runs over as one
//! capability set (`write`, `read`, `close`), so sockets, buffered streams,
//! and in-process pipes are interchangeable.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: The connection holds `Arc<dyn Transport>` and
//!    never inspects the concrete kind.
//! 2. **Shared Halves**: Methods take `&self`; the receive loop reads while
//!    senders write through the same handle.
//! 3. **Partial I/O Is Normal**: `write` may accept fewer bytes than offered
//!    and `read` may return any count; `Ok(0)` from `read` is end of stream.
//! 4. **Idempotent Close**: `close` may be called from any thread, any number
//!    of times, and must unblock a pending `read`.

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use rmux_common::MuxResult;

pub mod memory;
mod tcp;

pub use tcp::{TcpFactory, TcpTransport};

/// Liveness of a transport handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Handshake in progress.
    Connecting,
    /// Usable for reads and writes.
    Open,
    /// Closed locally; the handle is released.
    Closed,
    /// A read or write failed; the handle is no longer trustworthy.
    Faulted,
}

/// Bidirectional byte channel owned by exactly one connection.
pub trait Transport: Send + Sync {
    /// Writes some prefix of `buf`, returning how many bytes were accepted.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Reads into `buf`, blocking until at least one byte or end of stream.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Closes both directions; a blocked `read` returns `Ok(0)` or an error.
    fn close(&self);

    /// Current liveness.
    fn state(&self) -> TransportState;
}

/// Opens transports for an address.
pub trait TransportFactory {
    /// Establishes a new transport, failing with `MuxError::Connect`.
    fn connect(&self, addr: &str) -> MuxResult<Arc<dyn Transport>>;

    /// Releases a transport created by this factory.
    fn shutdown(&self, transport: &dyn Transport) {
        transport.close();
    }
}

/// Writes all of `buf`, looping over partial writes.
pub fn write_all(transport: &dyn Transport, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match transport.write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Atomic liveness cell shared by the bundled transports.
#[derive(Debug)]
pub(crate) struct Liveness(AtomicU8);

impl Liveness {
    pub(crate) fn new(state: TransportState) -> Self {
        Liveness(AtomicU8::new(encode_state(state)))
    }

    pub(crate) fn get(&self) -> TransportState {
        match self.0.load(Ordering::Acquire) {
            0 => TransportState::Connecting,
            1 => TransportState::Open,
            2 => TransportState::Closed,
            _ => TransportState::Faulted,
        }
    }

    pub(crate) fn open(&self) {
        let _ = self.0.compare_exchange(
            encode_state(TransportState::Connecting),
            encode_state(TransportState::Open),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Marks the handle faulted unless it was already closed.
    pub(crate) fn fault(&self) {
        let _ = self.0.compare_exchange(
            encode_state(TransportState::Open),
            encode_state(TransportState::Faulted),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Returns true for the first close only.
    pub(crate) fn close(&self) -> bool {
        self.0.swap(encode_state(TransportState::Closed), Ordering::AcqRel)
            != encode_state(TransportState::Closed)
    }
}

const fn encode_state(state: TransportState) -> u8 {
    match state {
        TransportState::Connecting => 0,
        TransportState::Open => 1,
        TransportState::Closed => 2,
        TransportState::Faulted => 3,
    }
}

/// Errors that leave the handle usable.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_closes_once() {
        let cell = Liveness::new(TransportState::Connecting);
        cell.open();
        assert_eq!(cell.get(), TransportState::Open);
        assert!(cell.close());
        assert!(!cell.close());
        cell.fault();
        assert_eq!(cell.get(), TransportState::Closed);
    }

    #[test]
    fn write_all_loops_over_partial_writes() {
        let (client, server) = memory::pair_with_chunk(3);
        write_all(&client, b"*1\r\n$4\r\nPING\r\n").unwrap();
        assert_eq!(client.write_calls(), 5);

        let mut buf = [0u8; 64];
        let mut received = Vec::new();
        while received.len() < 14 {
            let n = server.read(&mut buf).unwrap();
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(&received, b"*1\r\n$4\r\nPING\r\n");
    }
}
