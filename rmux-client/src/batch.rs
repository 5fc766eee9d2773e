//! # Command Batch
//!
//! Purpose: Stage many commands privately and hand them to the connection as
//! one contiguous queue block and one transport write.
//!
//! ## Design Principles
//! 1. **Builder Pattern**: Staging only touches the batch's own buffer and
//!    entry list; the shared queue and transport are untouched until execute.
//! 2. **Syscall Amortization**: The whole staged buffer goes out in one
//!    `write_all`, however many commands it holds.
//! 3. **Wait on the Tail**: FIFO matching means the last entry completes
//!    last, so waiting on it covers the whole batch.
//! 4. **Single Use**: A second execute, or staging after execute, is a
//!    `MuxError::Usage`.

use bytes::BytesMut;
use tokio::sync::oneshot;

use rmux_common::{encode_command, MuxError, MuxResult};

use crate::connection::Connection;
use crate::pending::{PendingEntry, PendingReply, Slot};

const PING: &[u8] = b"PING";

/// Commands staged for one combined flush.
///
/// Dropping a batch that was never executed fails its reply handles with
/// `MuxError::Usage`.
pub struct Batch<'a> {
    conn: &'a Connection,
    buf: BytesMut,
    entries: Vec<PendingEntry>,
    executed: bool,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Batch {
            conn,
            buf: BytesMut::with_capacity(conn.config().write_buffer_size),
            entries: Vec::new(),
            executed: false,
        }
    }

    /// Stages a command and returns a handle to its reply.
    ///
    /// The handle resolves only after [`execute`](Batch::execute) sends the
    /// batch.
    pub fn stage(&mut self, args: &[&[u8]]) -> MuxResult<PendingReply> {
        self.ensure_staging()?;
        let (tx, reply) = PendingReply::channel();
        encode_command(args, &mut self.buf);
        self.entries.push(PendingEntry::new(Slot::Reply(tx)));
        Ok(reply)
    }

    /// Stages a fire-and-forget command. No handle is returned.
    pub fn stage_forget(&mut self, args: &[&[u8]]) -> MuxResult<()> {
        self.ensure_staging()?;
        encode_command(args, &mut self.buf);
        self.entries.push(PendingEntry::new(Slot::Discard));
        Ok(())
    }

    /// Stages a PING and returns a handle to its reply.
    pub fn ping(&mut self) -> MuxResult<PendingReply> {
        self.stage(&[PING])
    }

    /// Stages a fire-and-forget PING.
    pub fn ping_forget(&mut self) -> MuxResult<()> {
        self.stage_forget(&[PING])
    }

    /// Number of staged commands.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sends the batch and blocks until its last reply has been matched.
    ///
    /// # Panics
    ///
    /// Panics when called from inside an async runtime; use
    /// [`execute_async`](Batch::execute_async) there.
    pub fn execute(&mut self) -> MuxResult<()> {
        match self.flush()? {
            Some(done) => done.blocking_recv().map_err(|_| MuxError::ConnectionLost),
            None => Ok(()),
        }
    }

    /// Sends the batch and suspends until its last reply has been matched.
    pub async fn execute_async(&mut self) -> MuxResult<()> {
        match self.flush()? {
            Some(done) => done.await.map_err(|_| MuxError::ConnectionLost),
            None => Ok(()),
        }
    }

    /// Hands the staged block to the connection.
    ///
    /// Returns the receiver fired when the tail entry completes, or `None`
    /// for an empty batch (nothing is written).
    fn flush(&mut self) -> MuxResult<Option<oneshot::Receiver<()>>> {
        if self.executed {
            return Err(MuxError::Usage("batch already executed"));
        }
        self.executed = true;

        let mut entries = std::mem::take(&mut self.entries);
        let last = match entries.last_mut() {
            Some(last) => last,
            None => return Ok(None),
        };
        let (tx, rx) = oneshot::channel();
        last.notify_on_complete(tx);

        self.conn.enqueue_block(&self.buf, entries)?;
        self.buf.clear();
        Ok(Some(rx))
    }

    fn ensure_staging(&self) -> MuxResult<()> {
        if self.executed {
            return Err(MuxError::Usage("cannot stage after execute"));
        }
        Ok(())
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        for entry in self.entries.drain(..) {
            entry.complete(Err(MuxError::Usage("batch dropped before execute")));
        }
    }
}
