//! # Pending Request Queue
//!
//! Purpose: Keep the ledger of requests written to the wire and not yet
//! answered, and hand each reply to the oldest one.
//!
//! ## Design Principles
//! 1. **FIFO Matching**: RESP has no request ids; the Nth reply belongs to
//!    the Nth request, so the queue only ever completes its head.
//! 2. **One-Shot Slots**: Each waited request owns a one-shot channel; the
//!    caller blocks on it or awaits it, the receive loop fills it.
//! 3. **Close Once**: Closing hands every remaining entry back for failure
//!    and rejects later pushes, so nothing can be stranded.

use std::collections::VecDeque;
use std::mem;
use std::time::Duration;

use tokio::sync::oneshot;

use rmux_common::{MuxError, MuxResult, RespValue};

pub(crate) type ReplySender = oneshot::Sender<MuxResult<RespValue>>;

/// Where a completed reply goes.
pub(crate) enum Slot {
    /// Deliver to a waiting caller.
    Reply(ReplySender),
    /// Fire-and-forget: consume and drop.
    Discard,
}

/// One in-flight request.
pub(crate) struct PendingEntry {
    seq: u64,
    slot: Slot,
    // Set on a batch's last entry; fired after the slot is filled.
    notify: Option<oneshot::Sender<()>>,
}

impl PendingEntry {
    pub(crate) fn new(slot: Slot) -> Self {
        PendingEntry {
            seq: 0,
            slot,
            notify: None,
        }
    }

    /// Wire position assigned when the entry was queued.
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn is_discard(&self) -> bool {
        matches!(self.slot, Slot::Discard)
    }

    pub(crate) fn notify_on_complete(&mut self, tx: oneshot::Sender<()>) {
        self.notify = Some(tx);
    }

    /// Delivers `result` to the slot.
    ///
    /// A waiter that has already given up (dropped receiver) is treated like
    /// a discarded entry. Failures never fire the batch notifier, so a batch
    /// waiting on this entry observes the loss as a dropped channel.
    pub(crate) fn complete(self, result: MuxResult<RespValue>) {
        let delivered = result.is_ok() || matches!(result, Err(MuxError::Reply(_)));
        match self.slot {
            Slot::Reply(tx) => {
                let _ = tx.send(result);
            }
            Slot::Discard => {
                if let Err(err) = result {
                    tracing::trace!(seq = self.seq, error = %err, "discarded reply error");
                }
            }
        }
        if delivered {
            if let Some(notify) = self.notify {
                let _ = notify.send(());
            }
        }
    }
}

/// Ordered ledger of in-flight requests.
pub(crate) struct PendingQueue {
    entries: VecDeque<PendingEntry>,
    next_seq: u64,
    closed: bool,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        PendingQueue {
            entries: VecDeque::new(),
            next_seq: 0,
            closed: false,
        }
    }

    /// Appends one entry at the tail, returning its wire position.
    pub(crate) fn push(&mut self, mut entry: PendingEntry) -> MuxResult<u64> {
        if self.closed {
            return Err(MuxError::ConnectionLost);
        }
        let seq = self.next_seq;
        entry.seq = seq;
        self.next_seq += 1;
        self.entries.push_back(entry);
        Ok(seq)
    }

    /// Appends `entries` as one contiguous block.
    pub(crate) fn push_block(&mut self, entries: Vec<PendingEntry>) -> MuxResult<()> {
        if self.closed {
            return Err(MuxError::ConnectionLost);
        }
        self.entries.reserve(entries.len());
        for mut entry in entries {
            entry.seq = self.next_seq;
            self.next_seq += 1;
            self.entries.push_back(entry);
        }
        Ok(())
    }

    /// Removes the oldest entry.
    pub(crate) fn pop(&mut self) -> Option<PendingEntry> {
        self.entries.pop_front()
    }

    /// Rejects further pushes and returns everything still queued.
    pub(crate) fn close(&mut self) -> VecDeque<PendingEntry> {
        self.closed = true;
        mem::take(&mut self.entries)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handle to the reply of one submitted command.
///
/// Dropping the handle abandons the wait only; the request stays queued and
/// its reply is still drained from the stream.
#[must_use = "a reply handle does nothing unless waited on"]
pub struct PendingReply {
    rx: oneshot::Receiver<MuxResult<RespValue>>,
}

impl PendingReply {
    pub(crate) fn channel() -> (ReplySender, PendingReply) {
        let (tx, rx) = oneshot::channel();
        (tx, PendingReply { rx })
    }

    /// Blocks the current thread until the reply arrives.
    ///
    /// # Panics
    ///
    /// Panics when called from inside an async runtime; use [`recv`] there.
    ///
    /// [`recv`]: PendingReply::recv
    pub fn wait(self) -> MuxResult<RespValue> {
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(MuxError::ConnectionLost))
    }

    /// Suspends the current task until the reply arrives.
    pub async fn recv(self) -> MuxResult<RespValue> {
        self.rx.await.unwrap_or_else(|_| Err(MuxError::ConnectionLost))
    }

    /// Like [`recv`](PendingReply::recv) but gives up after `timeout`.
    pub async fn recv_timeout(self, timeout: Duration) -> MuxResult<RespValue> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(MuxError::Timeout),
        }
    }
}
