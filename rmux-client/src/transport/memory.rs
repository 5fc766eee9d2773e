//! # In-Memory Transport
//!
//! Purpose: Connect two endpoints inside one process with a blocking duplex
//! pipe, for tests and for embedding a responder without sockets.
//!
//! ## Design Principles
//! 1. **Same Contract as Sockets**: Reads block until data or close; writes
//!    after close fail with `BrokenPipe`.
//! 2. **Fault Injection**: `pair_with_chunk` caps every read and write, so
//!    callers see the partial I/O a real socket can produce.
//! 3. **Observable Flushes**: Each endpoint counts its `write` calls.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{Liveness, Transport, TransportState};

struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
}

/// One direction of the duplex pipe.
struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Pipe {
            state: Mutex::new(PipeState {
                buf: VecDeque::new(),
                closed: false,
            }),
            readable: Condvar::new(),
        })
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.readable.notify_all();
    }
}

/// One endpoint of an in-process duplex pipe.
pub struct MemoryTransport {
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
    chunk: usize,
    writes: AtomicUsize,
    liveness: Liveness,
}

/// Creates a connected pair of endpoints.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    pair_with_chunk(usize::MAX)
}

/// Creates a connected pair where every read and write moves at most
/// `chunk` bytes.
pub fn pair_with_chunk(chunk: usize) -> (MemoryTransport, MemoryTransport) {
    let chunk = chunk.max(1);
    let a_to_b = Pipe::new();
    let b_to_a = Pipe::new();
    (
        MemoryTransport::new(b_to_a.clone(), a_to_b.clone(), chunk),
        MemoryTransport::new(a_to_b, b_to_a, chunk),
    )
}

impl MemoryTransport {
    fn new(inbound: Arc<Pipe>, outbound: Arc<Pipe>, chunk: usize) -> Self {
        let liveness = Liveness::new(TransportState::Connecting);
        liveness.open();
        MemoryTransport {
            inbound,
            outbound,
            chunk,
            writes: AtomicUsize::new(0),
            liveness,
        }
    }

    /// Number of `write` calls that accepted bytes on this endpoint.
    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Transport for MemoryTransport {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.outbound.state.lock();
        if state.closed {
            self.liveness.fault();
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let n = buf.len().min(self.chunk);
        state.buf.extend(&buf[..n]);
        drop(state);

        self.outbound.readable.notify_all();
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(n)
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.inbound.state.lock();
        while state.buf.is_empty() && !state.closed {
            self.inbound.readable.wait(&mut state);
        }

        let n = state.buf.len().min(buf.len()).min(self.chunk);
        for (dst, src) in buf.iter_mut().zip(state.buf.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn close(&self) {
        if self.liveness.close() {
            self.inbound.close();
            self.outbound.close();
        }
    }

    fn state(&self) -> TransportState {
        self.liveness.get()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}
