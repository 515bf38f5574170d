//! # Picture Queue - decoded frames awaiting presentation
//!
//! A fixed-capacity ring of picture slots. The video stage fills the slot at
//! the write index and commits it; the presentation loop displays the slot at
//! the read index and consumes it.
//!
//! ```text
//!              write_index                read_index
//!                   │                          │
//!  decode thread ──►[slot][slot][slot][slot]──► presentation loop
//!                   └──── size <= capacity ────┘
//! ```
//!
//! Each slot sits behind its own mutex only to satisfy the borrow checker.
//! The ring's `size` bookkeeping guarantees those locks are never contended:
//! the producer owns slots from admission until commit, the consumer from
//! peek until consume.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::QueueError;
use crate::shutdown::{ShutdownSignal, Wake};

/// Row alignment of picture planes.
const PLANE_ALIGN: usize = 32;

fn align(value: usize) -> usize {
    (value + PLANE_ALIGN - 1) & !(PLANE_ALIGN - 1)
}

// ============================================================================
// Decoded Picture
// ============================================================================

/// A decoded frame in planar YUV 4:2:0, ready to hand to a presenter.
#[derive(Debug, Default)]
pub struct DecodedPicture {
    planes: [Vec<u8>; 3],
    strides: [usize; 3],
    width: u32,
    height: u32,
    allocated: bool,
    /// Corrected presentation timestamp (seconds)
    pub pts: f64,
}

impl DecodedPicture {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub fn strides(&self) -> [usize; 3] {
        self.strides
    }

    pub fn planes(&self) -> [&[u8]; 3] {
        [&self.planes[0], &self.planes[1], &self.planes[2]]
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.planes[index]
    }

    /// Make sure the buffers match `width`x`height`, reallocating if not.
    /// Returns true when a reallocation happened.
    pub fn ensure_geometry(&mut self, width: u32, height: u32) -> bool {
        if self.allocated && self.width == width && self.height == height {
            return false;
        }
        let w = width as usize;
        let h = height as usize;
        let chroma_w = (w + 1) / 2;
        let chroma_h = (h + 1) / 2;

        self.strides = [align(w), align(chroma_w), align(chroma_w)];
        self.planes = [
            vec![0u8; self.strides[0] * h],
            vec![128u8; self.strides[1] * chroma_h],
            vec![128u8; self.strides[2] * chroma_h],
        ];
        self.width = width;
        self.height = height;
        self.allocated = true;
        true
    }

    /// Copy three source planes row by row into this picture's buffers.
    /// The picture must already have the source's geometry.
    pub fn copy_planes(&mut self, src: [&[u8]; 3], src_strides: [usize; 3]) {
        let w = self.width as usize;
        let h = self.height as usize;
        let rows = [h, (h + 1) / 2, (h + 1) / 2];
        let widths = [w, (w + 1) / 2, (w + 1) / 2];

        for plane in 0..3 {
            let dst_stride = self.strides[plane];
            let dst = &mut self.planes[plane];
            for row in 0..rows[plane] {
                let src_start = row * src_strides[plane];
                let src_end = (src_start + widths[plane]).min(src[plane].len());
                if src_start >= src_end {
                    break;
                }
                let len = src_end - src_start;
                let dst_start = row * dst_stride;
                dst[dst_start..dst_start + len].copy_from_slice(&src[plane][src_start..src_end]);
            }
        }
    }
}

// ============================================================================
// Ring
// ============================================================================

#[derive(Debug, Default)]
struct Ring {
    read_index: usize,
    write_index: usize,
    size: usize,
    /// Producer will commit no more pictures
    finished: bool,
}

pub struct PictureQueue {
    slots: Vec<Mutex<DecodedPicture>>,
    ring: Mutex<Ring>,
    /// Producer waits here while the ring is full
    space: Condvar,
    /// Signalled on commit, for consumers that prefer to wait
    ready: Condvar,
    shutdown: Arc<ShutdownSignal>,
    reallocations: AtomicU64,
}

impl PictureQueue {
    pub fn new(capacity: usize, shutdown: &Arc<ShutdownSignal>) -> Arc<Self> {
        let capacity = capacity.max(1);
        let queue = Arc::new(Self {
            slots: (0..capacity).map(|_| Mutex::new(DecodedPicture::default())).collect(),
            ring: Mutex::new(Ring::default()),
            space: Condvar::new(),
            ready: Condvar::new(),
            shutdown: shutdown.clone(),
            reallocations: AtomicU64::new(0),
        });
        let waker: Arc<dyn Wake> = queue.clone();
        let waker: Weak<dyn Wake> = Arc::downgrade(&waker);
        shutdown.register(waker);
        queue
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn size(&self) -> usize {
        self.ring.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn read_index(&self) -> usize {
        self.ring.lock().read_index
    }

    pub fn write_index(&self) -> usize {
        self.ring.lock().write_index
    }

    /// Number of slot buffer (re)allocations so far.
    pub fn reallocations(&self) -> u64 {
        self.reallocations.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Producer API (video decode thread)
    // ========================================================================

    /// Block while the ring is full, then hand out the slot at the write index.
    pub fn acquire_slot_for_write(&self) -> Result<WriteSlot<'_>, QueueError> {
        let index = {
            let mut ring = self.ring.lock();
            while ring.size >= self.capacity() && !self.shutdown.is_requested() {
                self.space.wait(&mut ring);
            }
            if self.shutdown.is_requested() {
                return Err(QueueError::Shutdown);
            }
            ring.write_index
        };
        Ok(WriteSlot {
            queue: self,
            index,
            picture: self.slots[index].lock(),
        })
    }

    /// Publish the slot at the write index.
    fn commit_write(&self) {
        let mut ring = self.ring.lock();
        ring.write_index = (ring.write_index + 1) % self.capacity();
        ring.size += 1;
        self.ready.notify_one();
    }

    /// Declare that no more pictures will be committed.
    pub fn finish(&self) {
        let mut ring = self.ring.lock();
        ring.finished = true;
        self.ready.notify_all();
    }

    /// Finished and every committed picture has been consumed.
    pub fn is_exhausted(&self) -> bool {
        let ring = self.ring.lock();
        ring.finished && ring.size == 0
    }

    // ========================================================================
    // Consumer API (presentation loop)
    // ========================================================================

    /// The picture at the read index, if one has been committed.
    pub fn peek(&self) -> Option<ReadSlot<'_>> {
        let index = {
            let ring = self.ring.lock();
            if ring.size == 0 {
                return None;
            }
            ring.read_index
        };
        Some(ReadSlot {
            queue: self,
            index,
            picture: self.slots[index].lock(),
        })
    }

    /// Release the slot at the read index and wake one blocked producer.
    pub fn consume_read(&self) {
        let mut ring = self.ring.lock();
        if ring.size == 0 {
            return;
        }
        ring.read_index = (ring.read_index + 1) % self.capacity();
        ring.size -= 1;
        self.space.notify_one();
    }

    /// Wait up to `timeout` for a committed picture. Returns whether one is ready.
    pub fn wait_for_picture(&self, timeout: Duration) -> bool {
        let mut ring = self.ring.lock();
        if ring.size == 0 && !ring.finished && !self.shutdown.is_requested() {
            self.ready.wait_for(&mut ring, timeout);
        }
        ring.size > 0
    }
}

impl Wake for PictureQueue {
    fn wake_all(&self) {
        let _ring = self.ring.lock();
        self.space.notify_all();
        self.ready.notify_all();
    }
}

/// Exclusive access to the slot being filled by the producer.
pub struct WriteSlot<'a> {
    queue: &'a PictureQueue,
    index: usize,
    picture: MutexGuard<'a, DecodedPicture>,
}

impl WriteSlot<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Resize the slot for the incoming frame, counting reallocations.
    pub fn prepare(&mut self, width: u32, height: u32) {
        if self.picture.ensure_geometry(width, height) {
            self.queue.reallocations.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Picture slot {} allocated at {}x{}", self.index, width, height);
        }
    }

    pub fn commit(self) {
        let queue = self.queue;
        drop(self.picture);
        queue.commit_write();
    }
}

impl Deref for WriteSlot<'_> {
    type Target = DecodedPicture;

    fn deref(&self) -> &DecodedPicture {
        &self.picture
    }
}

impl DerefMut for WriteSlot<'_> {
    fn deref_mut(&mut self) -> &mut DecodedPicture {
        &mut self.picture
    }
}

/// Access to the picture at the read index while it is displayed.
pub struct ReadSlot<'a> {
    queue: &'a PictureQueue,
    index: usize,
    picture: MutexGuard<'a, DecodedPicture>,
}

impl ReadSlot<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn consume(self) {
        let queue = self.queue;
        drop(self.picture);
        queue.consume_read();
    }
}

impl Deref for ReadSlot<'_> {
    type Target = DecodedPicture;

    fn deref(&self) -> &DecodedPicture {
        &self.picture
    }
}

// ============================================================================
// Tests
// ============================================================================
