//! # Packet Queue - per-stream FIFO between demuxer and decoders
//!
//! ```text
//! ┌─────────┐  put   ┌─────────────┐  get   ┌──────────────┐
//! │ Demuxer │───────►│ PacketQueue │───────►│ Decode stage │
//! └─────────┘        └─────────────┘        └──────────────┘
//!      ▲                    │ total_bytes
//!      └────── watermark ───┘
//! ```
//!
//! The queue never rejects input. Boundedness comes from the demuxer
//! checking `total_bytes` against a watermark before it reads more.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::QueueError;
use crate::packet::Packet;
use crate::shutdown::{ShutdownSignal, Wake};

#[derive(Default)]
struct QueueState {
    packets: VecDeque<Packet>,
    total_bytes: usize,
    /// No more packets will arrive
    closed: bool,
}

impl QueueState {
    fn pop(&mut self) -> Option<Packet> {
        let packet = self.packets.pop_front()?;
        self.total_bytes -= packet.size();
        Some(packet)
    }
}

/// Thread-safe FIFO of compressed packets for one elementary stream.
pub struct PacketQueue {
    name: &'static str,
    state: Mutex<QueueState>,
    available: Condvar,
    shutdown: Arc<ShutdownSignal>,
}

impl PacketQueue {
    /// Create a queue and register it for shutdown wake-ups.
    pub fn new(name: &'static str, shutdown: &Arc<ShutdownSignal>) -> Arc<Self> {
        let queue = Arc::new(Self {
            name,
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            shutdown: shutdown.clone(),
        });
        let waker: Arc<dyn Wake> = queue.clone();
        let waker: Weak<dyn Wake> = Arc::downgrade(&waker);
        shutdown.register(waker);
        queue
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append a packet and wake one waiting consumer.
    pub fn put(&self, packet: Packet) {
        let mut state = self.state.lock();
        state.total_bytes += packet.size();
        state.packets.push_back(packet);
        self.available.notify_one();
    }

    /// Remove the head packet.
    ///
    /// `Ok(None)` means "no data": the queue is empty and either `block` is
    /// false or the queue has been closed. After shutdown this always fails,
    /// even with packets still queued.
    pub fn get(&self, block: bool) -> Result<Option<Packet>, QueueError> {
        let mut state = self.state.lock();
        loop {
            if self.shutdown.is_requested() {
                return Err(QueueError::Shutdown);
            }
            if let Some(packet) = state.pop() {
                return Ok(Some(packet));
            }
            if !block || state.closed {
                return Ok(None);
            }
            self.available.wait(&mut state);
        }
    }

    /// Like a blocking `get`, but gives up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<Packet>, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if self.shutdown.is_requested() {
                return Err(QueueError::Shutdown);
            }
            if let Some(packet) = state.pop() {
                return Ok(Some(packet));
            }
            if state.closed {
                return Ok(None);
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return match state.pop() {
                    Some(packet) if !self.shutdown.is_requested() => Ok(Some(packet)),
                    Some(_) => Err(QueueError::Shutdown),
                    None => Ok(None),
                };
            }
        }
    }

    /// Mark end of input. Waiters drain what is left, then see "no data".
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();
    }

    /// Closed and fully drained.
    pub fn is_finished(&self) -> bool {
        let state = self.state.lock();
        state.closed && state.packets.is_empty()
    }

    /// Drop every queued packet.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        state.packets.clear();
        state.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the sizes of the queued packets.
    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }
}

impl Wake for PacketQueue {
    fn wake_all(&self) {
        let _state = self.state.lock();
        self.available.notify_all();
    }
}
