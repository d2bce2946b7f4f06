use core::{cell::RefCell, ffi::c_void, ptr::NonNull, slice};

use embassy_sync::blocking_mutex;
use portable_atomic::{AtomicU32, Ordering};

use crate::DefaultRawMutex;

/// Ownership token for a receive buffer allocated by the transport.
///
/// This is deliberately neither [Clone] nor [Copy]. The only way to get rid of it is to hand it
/// back to [Transport::free_rx_buffer](crate::Transport::free_rx_buffer), which makes a double
/// release impossible to express.
#[derive(Debug)]
#[must_use = "the receive buffer has to be released through the transport"]
pub struct NativeHandle(*mut c_void);
impl NativeHandle {
    /// Wrap the raw handle passed to the receive callback.
    ///
    /// SAFETY:
    /// The handle must not be released by anyone else, while this token exists.
    pub const unsafe fn from_raw(raw: *mut c_void) -> Self {
        Self(raw)
    }
    /// Returns the raw handle, consuming the token.
    pub fn into_raw(self) -> *mut c_void {
        self.0
    }
    /// Returns the raw handle without giving up ownership.
    pub fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}
unsafe impl Send for NativeHandle {}

/// A frame received from the transport.
///
/// The payload is a view into the receive buffer identified by [NativeHandle], so it stays valid
/// until the handle is released.
#[must_use = "the receive buffer has to be released through the transport"]
pub struct RxFrame {
    buffer: NonNull<u8>,
    length: u16,
    handle: NativeHandle,
}
impl RxFrame {
    /// Create a new frame from the arguments of the receive callback.
    ///
    /// SAFETY:
    /// `buffer` must be valid for reads of `length` bytes, until `handle` is released.
    pub const unsafe fn new(buffer: NonNull<u8>, length: u16, handle: NativeHandle) -> Self {
        Self {
            buffer,
            length,
            handle,
        }
    }
    /// The length of the payload in bytes.
    pub const fn len(&self) -> usize {
        self.length as usize
    }
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }
    /// Returns the payload.
    pub fn payload(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.buffer.as_ptr(), self.len()) }
    }
    /// Returns the handle of the receive buffer.
    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }
    /// Give up the payload and return the ownership token, so it can be released.
    pub fn into_handle(self) -> NativeHandle {
        self.handle
    }
}
unsafe impl Send for RxFrame {}

/// Fixed size ring of frames.
struct FrameRing<const N: usize> {
    slots: [Option<RxFrame>; N],
    head: usize,
    len: usize,
}
impl<const N: usize> FrameRing<N> {
    const EMPTY_SLOT: Option<RxFrame> = None;

    const fn new() -> Self {
        Self {
            slots: [Self::EMPTY_SLOT; N],
            head: 0,
            len: 0,
        }
    }
    #[inline]
    const fn wrap(index: usize) -> usize {
        if index >= N {
            index - N
        } else {
            index
        }
    }
    fn pop_front(&mut self) -> Option<RxFrame> {
        if self.len == 0 {
            return None;
        }
        let frame = self.slots[self.head].take();
        self.head = Self::wrap(self.head + 1);
        self.len -= 1;
        frame
    }
    /// Append a frame, evicting the oldest one if the ring is full.
    fn push_back(&mut self, frame: RxFrame) -> Option<RxFrame> {
        let evicted = if self.len == N {
            self.pop_front()
        } else {
            None
        };
        self.slots[Self::wrap(self.head + self.len)] = Some(frame);
        self.len += 1;
        evicted
    }
}

/// A bounded FIFO of received frames with drop-oldest backpressure.
///
/// The storage is a pre-allocated ring of `N` slots, so [FrameQueue::enqueue] neither allocates
/// nor blocks and runs in constant time. It is therefore safe to call from the receive callback,
/// which usually runs in interrupt context. Access is guarded by a [blocking_mutex::Mutex], which
/// with the `critical_section` feature is a critical section and is held only for a handful of
/// instructions.
///
/// The queue never hands a frame to two owners. Frames leave it either through
/// [FrameQueue::dequeue] or as the eviction result of [FrameQueue::enqueue], and in both cases the
/// caller becomes responsible for releasing the [NativeHandle].
pub struct FrameQueue<const N: usize> {
    ring: blocking_mutex::Mutex<DefaultRawMutex, RefCell<FrameRing<N>>>,
    dropped: AtomicU32,
}
impl<const N: usize> FrameQueue<N> {
    pub const fn new() -> Self {
        assert!(N > 0, "A frame queue needs at least one slot.");
        Self {
            ring: blocking_mutex::Mutex::new(RefCell::new(FrameRing::new())),
            dropped: AtomicU32::new(0),
        }
    }
    /// The maximum number of frames held by the queue.
    pub const fn capacity(&self) -> usize {
        N
    }
    /// Admit a frame.
    ///
    /// If the queue is full, the oldest frame is evicted to make room and returned. This always
    /// succeeds. `on_admitted` runs while the lock is still held, right after the frame was
    /// appended, so it must not block.
    ///
    /// The evicted frame isn't released here, since releasing a receive buffer may have to take a
    /// lock inside the transport, which isn't possible inside a critical section.
    pub fn enqueue(&self, frame: RxFrame, on_admitted: impl FnOnce()) -> Option<RxFrame> {
        let evicted = self.ring.lock(|ring| {
            let evicted = ring.borrow_mut().push_back(frame);
            on_admitted();
            evicted
        });
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }
    /// Remove the oldest frame from the queue.
    pub fn dequeue(&self) -> Option<RxFrame> {
        self.ring.lock(|ring| ring.borrow_mut().pop_front())
    }
    /// The number of frames currently waiting.
    pub fn len(&self) -> usize {
        self.ring.lock(|ring| ring.borrow().len)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// The number of frames evicted since creation.
    pub fn dropped_frames(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}
impl<const N: usize> Default for FrameQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
