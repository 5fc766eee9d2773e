//! # Multiplexed Connection
//!
//! Purpose: Share one transport among any number of threads and async tasks,
//! pipelining their commands and routing every reply back to its caller.
//!
//! ## Design Principles
//! 1. **Single Writer Region**: Encode, queue append, and transport write
//!    happen under one lock, so queue order is wire order byte for byte.
//! 2. **Single Reader**: One background thread owns decoding and is the only
//!    consumer of the pending queue.
//! 3. **One Completion Path**: Blocking and async calls wait on the same
//!    one-shot slot, so both see identical ordering and errors.
//! 4. **Fail Everything Once**: Any read failure, end of stream, or framing
//!    error faults the connection and fails every queued request.
//!
//! ## Structure Overview
//!
//! ```text
//! Connection
//!   ├── shared: Arc<Shared>
//!   │     ├── transport: Arc<dyn Transport>
//!   │     ├── outbound: Mutex<BytesMut>      (writer region)
//!   │     ├── pending: Mutex<PendingQueue>   (append: senders, pop: reader)
//!   │     ├── state: AtomicU8
//!   │     └── counters: Counters
//!   └── reader: JoinHandle  ──► receive_loop(shared)
//! ```

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, warn};

use rmux_common::{encode_command, MuxError, MuxResult, RespDecoder, RespValue};

use crate::batch::Batch;
use crate::config::ClientConfig;
use crate::pending::{PendingEntry, PendingQueue, PendingReply, Slot};
use crate::stats::{ConnectionStats, Counters};
use crate::transport::{write_all, Transport, TransportFactory, TransportState};

const PING: &[u8] = b"PING";
const ECHO: &[u8] = b"ECHO";

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, or shut down by the caller.
    Disconnected,
    /// Transport open, receive loop starting.
    Connecting,
    /// Accepting commands.
    Connected,
    /// The transport failed; outstanding requests were failed.
    Faulted,
}

impl ConnectionState {
    const fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Faulted => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Faulted,
            _ => ConnectionState::Disconnected,
        }
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    outbound: Mutex<BytesMut>,
    pending: Mutex<PendingQueue>,
    state: AtomicU8,
    counters: Counters,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn ensure_open(&self) -> MuxResult<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Faulted => Err(MuxError::ConnectionLost),
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                Err(MuxError::Usage("connection is not open"))
            }
        }
    }

    /// Writes `frames` in full; a failed write faults the connection.
    ///
    /// Callers hold the outbound lock.
    fn flush(&self, frames: &[u8]) -> MuxResult<()> {
        write_all(&*self.transport, frames).map_err(|err| {
            self.fault("write failed");
            MuxError::Io(err)
        })
    }

    /// Routes one decoded reply to the oldest pending request.
    fn dispatch(&self, value: RespValue) -> Result<(), &'static str> {
        let entry = match self.pending.lock().pop() {
            Some(entry) => entry,
            None => {
                warn!("reply arrived with no pending request");
                return Err("unsolicited reply");
            }
        };

        let result = match value {
            RespValue::Error(message) => Err(MuxError::Reply(message)),
            other => Ok(other),
        };
        self.counters
            .record_completed(entry.is_discard(), result.is_err());
        entry.complete(result);
        Ok(())
    }

    /// Moves to `Faulted` (unless shut down), closes the transport, and fails
    /// everything still queued. Safe to call more than once.
    fn fault(&self, reason: &'static str) {
        let previous = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
            (state != ConnectionState::Disconnected.as_u8())
                .then_some(ConnectionState::Faulted.as_u8())
        });
        match previous.map(ConnectionState::from_u8) {
            Ok(ConnectionState::Faulted) => {}
            Ok(_) => warn!(reason, "connection faulted"),
            Err(_) => debug!(reason, "receive loop stopped after shutdown"),
        }

        self.transport.close();
        self.fail_pending();
    }

    fn fail_pending(&self) {
        let orphaned = self.pending.lock().close();
        if orphaned.is_empty() {
            return;
        }
        debug!(count = orphaned.len(), "failing outstanding requests");
        self.counters.record_lost(orphaned.len());
        for entry in orphaned {
            entry.complete(Err(MuxError::ConnectionLost));
        }
    }
}

/// One transport multiplexed among many concurrent callers.
///
/// All methods take `&self`; share the connection with `Arc` or scoped
/// threads. Dropping it shuts it down.
pub struct Connection {
    shared: Arc<Shared>,
    config: ClientConfig,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Opens a transport through `factory` and starts the receive loop.
    ///
    /// **Input**: transport factory, address, configuration.
    /// **Output**: a `Connected` connection, or `MuxError::Connect`.
    pub fn connect(
        factory: &dyn TransportFactory,
        addr: &str,
        config: ClientConfig,
    ) -> MuxResult<Self> {
        debug!(addr, "connecting");
        let transport = factory.connect(addr)?;
        Self::with_transport(transport, config)
    }

    /// Runs the multiplexer over an already open transport.
    ///
    /// **Logic**:
    /// 1. Build shared state in `Connecting`.
    /// 2. Spawn exactly one receive loop thread.
    /// 3. Move to `Connected` unless the loop already faulted.
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> MuxResult<Self> {
        let shared = Arc::new(Shared {
            transport,
            outbound: Mutex::new(BytesMut::with_capacity(config.write_buffer_size)),
            pending: Mutex::new(PendingQueue::new()),
            state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
            counters: Counters::default(),
        });

        let reader = {
            let shared = shared.clone();
            let read_size = config.read_buffer_size.max(1);
            thread::Builder::new()
                .name("rmux-recv".to_string())
                .spawn(move || receive_loop(shared, read_size))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(err) => {
                shared.transport.close();
                return Err(MuxError::Io(err));
            }
        };

        let _ = shared.state.compare_exchange(
            ConnectionState::Connecting.as_u8(),
            ConnectionState::Connected.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        debug!(state = ?shared.state(), "connection ready");

        Ok(Connection {
            shared,
            config,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// True only while `Connected`.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Liveness of the underlying transport.
    pub fn transport_state(&self) -> TransportState {
        self.shared.transport.state()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ConnectionStats {
        let in_flight = self.shared.pending.lock().len();
        self.shared.counters.snapshot(in_flight)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends a command and returns a handle to its reply without waiting.
    pub fn submit(&self, args: &[&[u8]]) -> MuxResult<PendingReply> {
        let (tx, reply) = PendingReply::channel();
        self.enqueue(args, Slot::Reply(tx))?;
        Ok(reply)
    }

    /// Sends a command whose reply is consumed and dropped.
    ///
    /// Never waits for the reply, so it serves blocking and async callers
    /// alike.
    pub fn submit_forget(&self, args: &[&[u8]]) -> MuxResult<()> {
        self.enqueue(args, Slot::Discard)
    }

    /// Sends a command and blocks until its reply arrives.
    ///
    /// Error replies come back as `MuxError::Reply`.
    pub fn execute(&self, args: &[&[u8]]) -> MuxResult<RespValue> {
        self.submit(args)?.wait()
    }

    /// Sends a command and suspends until its reply arrives, bounded by
    /// `response_timeout` when configured.
    pub async fn execute_async(&self, args: &[&[u8]]) -> MuxResult<RespValue> {
        let reply = self.submit(args)?;
        match self.config.response_timeout {
            Some(timeout) => reply.recv_timeout(timeout).await,
            None => reply.recv().await,
        }
    }

    /// Round-trips a PING and checks for `+PONG`.
    pub fn ping(&self) -> MuxResult<()> {
        expect_pong(self.execute(&[PING])?)
    }

    /// Async form of [`ping`](Connection::ping).
    pub async fn ping_async(&self) -> MuxResult<()> {
        expect_pong(self.execute_async(&[PING]).await?)
    }

    /// Pipelines a PING without waiting for its reply.
    pub fn ping_forget(&self) -> MuxResult<()> {
        self.submit_forget(&[PING])
    }

    /// Sends `payload` with ECHO and returns the echoed bytes.
    pub fn echo(&self, payload: &[u8]) -> MuxResult<Bytes> {
        expect_bulk(self.execute(&[ECHO, payload])?)
    }

    /// Async form of [`echo`](Connection::echo).
    pub async fn echo_async(&self, payload: &[u8]) -> MuxResult<Bytes> {
        expect_bulk(self.execute_async(&[ECHO, payload]).await?)
    }

    /// Starts a batch bound to this connection.
    pub fn create_batch(&self) -> Batch<'_> {
        Batch::new(self)
    }

    /// Closes the transport and waits for the receive loop to fail every
    /// outstanding request. Idempotent.
    pub fn shutdown(&self) {
        let previous = self
            .shared
            .state
            .swap(ConnectionState::Disconnected.as_u8(), Ordering::AcqRel);
        if previous != ConnectionState::Disconnected.as_u8() {
            debug!("shutting down connection");
        }

        self.shared.transport.close();
        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
        // Covers a receive loop that died without reaching its own cleanup.
        self.shared.fail_pending();
    }

    /// Encodes one command, queues its entry, and flushes, all inside the
    /// writer region.
    fn enqueue(&self, args: &[&[u8]], slot: Slot) -> MuxResult<()> {
        self.shared.ensure_open()?;

        let mut outbound = self.shared.outbound.lock();
        outbound.clear();
        encode_command(args, &mut outbound);
        self.shared.pending.lock().push(PendingEntry::new(slot))?;
        self.shared.counters.record_submitted(1);
        let result = self.shared.flush(&outbound);
        outbound.clear();
        result
    }

    /// Queues a batch's entries as one block and writes its frames with one
    /// `write_all`.
    ///
    /// When the connection refuses the block, every entry fails with the
    /// same error `execute` reports.
    pub(crate) fn enqueue_block(&self, frames: &[u8], entries: Vec<PendingEntry>) -> MuxResult<()> {
        if let Err(err) = self.shared.ensure_open() {
            let usage = match &err {
                MuxError::Usage(message) => Some(*message),
                _ => None,
            };
            for entry in entries {
                entry.complete(Err(usage.map_or(MuxError::ConnectionLost, MuxError::Usage)));
            }
            return Err(err);
        }

        let _writer = self.shared.outbound.lock();
        let count = entries.len();
        self.shared.pending.lock().push_block(entries)?;
        self.shared.counters.record_submitted(count);
        self.shared.flush(frames)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Background reader: decode, dispatch, and fault on the first failure.
///
/// **Logic**:
/// 1. Decode every complete reply already buffered and dispatch each.
/// 2. When the decoder needs more data, read from the transport.
/// 3. On end of stream, read error, or bad framing, fault the connection.
fn receive_loop(shared: Arc<Shared>, read_size: usize) {
    let mut buf = BytesMut::with_capacity(read_size);
    let mut chunk = vec![0u8; read_size];
    let mut decoder = RespDecoder::new();

    let reason = loop {
        match decoder.decode(&mut buf) {
            Ok(Some(value)) => {
                if let Err(reason) = shared.dispatch(value) {
                    break reason;
                }
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "undecodable reply; dropping connection");
                break "protocol error";
            }
        }

        match read_chunk(&*shared.transport, &mut chunk) {
            Ok(0) => break "end of stream",
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) => {
                debug!(error = %err, "transport read failed");
                break "read failed";
            }
        }
    };

    shared.fault(reason);
}

fn read_chunk(transport: &dyn Transport, chunk: &mut [u8]) -> io::Result<usize> {
    loop {
        match transport.read(chunk) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

fn expect_pong(value: RespValue) -> MuxResult<()> {
    match value {
        RespValue::Simple(text) if text.as_ref() == b"PONG" => Ok(()),
        _ => Err(MuxError::UnexpectedResponse),
    }
}

fn expect_bulk(value: RespValue) -> MuxResult<Bytes> {
    match value {
        RespValue::Bulk(Some(data)) => Ok(data),
        _ => Err(MuxError::UnexpectedResponse),
    }
}
