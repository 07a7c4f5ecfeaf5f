//! handoff.rs
//! Bulk hand-off of buffered worker items to the recorder over a bounded channel.
//!
//! Buffered mode: after a pause the worker raises `draining`, ships its buffer in
//! chunks of at most `chunk_size` items, then sends `Drained`. The receiver clears
//! `draining` once it has seen `Drained`, which releases the worker.
//! Streaming mode: single items are pushed with `try_send` while polling; on a full
//! channel the worker falls back to its local buffer (order is preserved because it
//! keeps buffering until the next drain).

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use log::debug;

use crate::acquisition::{signals::WorkerSignals, types::WorkerItem};

/// Chunks kept in flight in buffered mode.
pub const CHUNK_DEPTH: usize = 4;
/// Single-item messages kept in flight in streaming mode.
pub const STREAM_DEPTH: usize = 4_096;

const WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum HandOff {
    Items(Vec<WorkerItem>),
    Drained,
}

pub fn channel(depth: usize, chunk_size: usize) -> (HandOffSender, HandOffReceiver) {
    let (tx, rx) = bounded(depth.max(1));
    (
        HandOffSender { tx, chunk_size: chunk_size.max(1) },
        HandOffReceiver { rx },
    )
}

pub struct HandOffSender {
    tx: Sender<HandOff>,
    chunk_size: usize,
}

impl HandOffSender {
    /// Non-blocking push of one item; hands the item back if the channel is full.
    pub fn push(&self, item: WorkerItem) -> Result<(), Vec<WorkerItem>> {
        self.tx.try_send(HandOff::Items(vec![item])).map_err(|e| match e.into_inner() {
            HandOff::Items(v) => v,
            HandOff::Drained => Vec::new(),
        })
    }

    /// Ships the whole buffer in order and terminates the drain with `Drained`.
    ///
    /// `pending` is kept current while chunks go out. Returns `false` if the
    /// receiver is gone or a quit was requested while the channel stayed full;
    /// unsent items are then lost with the receiver.
    pub fn ship(&self, buffer: &mut Vec<WorkerItem>, signals: &WorkerSignals) -> bool {
        let items = std::mem::take(buffer);
        let total = items.len();
        let mut remaining = total;
        let mut iter = items.into_iter();
        let mut chunks = 0usize;

        loop {
            let chunk: Vec<WorkerItem> = iter.by_ref().take(self.chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            remaining -= chunk.len();
            signals.set_pending(remaining);
            if !self.send(HandOff::Items(chunk), signals) {
                return false;
            }
            chunks += 1;
        }

        debug!("[HandOff] shipped {} items in {} chunks", total, chunks);
        self.send(HandOff::Drained, signals)
    }

    fn send(&self, mut msg: HandOff, signals: &WorkerSignals) -> bool {
        loop {
            match self.tx.send_timeout(msg, WAIT_SLICE) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(m)) => {
                    if signals.quit_request.is_set() {
                        return false;
                    }
                    msg = m;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

pub struct HandOffReceiver {
    rx: Receiver<HandOff>,
}

impl HandOffReceiver {
    /// Collects everything handed off since the last call, in production order.
    ///
    /// If a drain is due or in flight this blocks until the worker has shipped
    /// its whole buffer. `worker_alive` lets the wait end early if the worker
    /// thread has already exited.
    pub fn collect(&self, signals: &WorkerSignals, worker_alive: impl Fn() -> bool) -> Vec<WorkerItem> {
        let mut items = Vec::new();

        // A buffer that is still growing will not be shipped before the next pause.
        let drain_due = signals.draining.is_set() || (signals.pending() > 0 && !signals.polling.is_set());
        if !drain_due {
            self.take_available(&mut items);
            return items;
        }

        while !signals.draining.wait_timeout(WAIT_SLICE) {
            if !worker_alive() {
                self.take_available(&mut items);
                return items;
            }
        }

        loop {
            match self.rx.recv_timeout(WAIT_SLICE) {
                Ok(HandOff::Items(chunk)) => items.extend(chunk),
                Ok(HandOff::Drained) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if !worker_alive() {
                        self.take_available(&mut items);
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        signals.draining.clear();
        items
    }

    fn take_available(&self, items: &mut Vec<WorkerItem>) {
        while let Ok(msg) = self.rx.try_recv() {
            if let HandOff::Items(chunk) = msg {
                items.extend(chunk);
            }
        }
    }
}
