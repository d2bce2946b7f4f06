use core::{
    cell::{Cell, RefCell},
    future::{poll_fn, Future},
    task::Poll,
};

use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex, waitqueue::MultiWakerRegistration};
use embassy_time::{Duration, Timer};
use portable_atomic::{AtomicU32, Ordering};

use crate::{event::EVENT_BIT_WIDTH, DefaultRawMutex};

/// The number of tasks, that can wait on an [EventGroup] without disturbing each other.
pub const MAX_EVENT_WAITERS: usize = 8;

/// A set of 32 event bits, which a task can wait on.
///
/// This can be shared between multiple users, each of which owns a range of the bits. Setting
/// bits never blocks and may be done from interrupt context. Waiting doesn't consume the bits, so
/// whoever waits has to check the underlying condition again afterwards.
///
/// Up to [MAX_EVENT_WAITERS] tasks can wait on a group at once. Any further waiters still get
/// woken, but cause spurious wakeups for all others.
pub struct EventGroup {
    bits: AtomicU32,
    wakers: blocking_mutex::Mutex<
        DefaultRawMutex,
        RefCell<MultiWakerRegistration<MAX_EVENT_WAITERS>>,
    >,
}
impl EventGroup {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
            wakers: blocking_mutex::Mutex::new(RefCell::new(MultiWakerRegistration::new())),
        }
    }
    /// Set the specified bits and wake all waiting tasks.
    pub fn set_bits(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::AcqRel);
        self.wakers.lock(|wakers| wakers.borrow_mut().wake());
    }
    /// Clear the specified bits.
    pub fn clear_bits(&self, bits: u32) {
        self.bits.fetch_and(!bits, Ordering::AcqRel);
    }
    /// Returns the bits currently set.
    pub fn bits(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }
    pub(crate) fn reset(&self) {
        self.bits.store(0, Ordering::Release);
    }
    /// Wait until any bit in `mask` is set.
    ///
    /// Returns the bits of `mask`, that were set.
    pub fn wait_bits(&self, mask: u32) -> impl Future<Output = u32> + use<'_> {
        poll_fn(move |cx| {
            // Registering first means, that a concurrent set_bits either shows up in the load
            // below or wakes us.
            self.wakers
                .lock(|wakers| wakers.borrow_mut().register(cx.waker()));
            let set = self.bits.load(Ordering::Acquire) & mask;
            if set != 0 {
                Poll::Ready(set)
            } else {
                Poll::Pending
            }
        })
    }
}
impl Default for EventGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy)]
enum Binding<'a> {
    Unbound,
    Shared { group: &'a EventGroup, offset: u8 },
    Private,
}

/// Routes the driver's event bits into an [EventGroup].
///
/// The group can either be supplied by the user through [EventNotifier::bind], in which case the
/// bits are shifted by the offset passed along, or be the notifier's own private group, which is
/// only bound for the duration of a wait. While nothing is bound, setting and clearing bits does
/// nothing.
pub struct EventNotifier<'a> {
    binding: blocking_mutex::Mutex<DefaultRawMutex, Cell<Binding<'a>>>,
    private: EventGroup,
}
impl<'a> EventNotifier<'a> {
    /// The highest offset, at which all event bits still fit into an [EventGroup].
    pub const MAX_OFFSET: u8 = (u32::BITS - EVENT_BIT_WIDTH) as u8;

    pub const fn new() -> Self {
        Self {
            binding: blocking_mutex::Mutex::new(Cell::new(Binding::Unbound)),
            private: EventGroup::new(),
        }
    }
    /// Bind a shared group, replacing the previous binding.
    ///
    /// Returns `false` and leaves the binding untouched, if the offset is larger than
    /// [Self::MAX_OFFSET].
    pub fn bind(&self, group: &'a EventGroup, offset: u8) -> bool {
        if offset > Self::MAX_OFFSET {
            return false;
        }
        self.binding
            .lock(|binding| binding.set(Binding::Shared { group, offset }));
        true
    }
    /// Bind the private group at offset zero, if nothing else is bound.
    ///
    /// The private group is reset beforehand.
    pub(crate) fn bind_private(&self) -> bool {
        self.binding.lock(|binding| {
            if matches!(binding.get(), Binding::Unbound) {
                self.private.reset();
                binding.set(Binding::Private);
                true
            } else {
                false
            }
        })
    }
    /// Unbind the private group.
    ///
    /// If a shared group was bound in the meantime, it stays bound.
    pub(crate) fn unbind_private(&self) {
        self.binding.lock(|binding| {
            if matches!(binding.get(), Binding::Private) {
                binding.set(Binding::Unbound);
            }
        })
    }
    /// Check if any group is bound.
    pub fn is_bound(&self) -> bool {
        !matches!(self.binding.lock(Cell::get), Binding::Unbound)
    }
    /// Resolve the binding into the group and the offset.
    fn target(&self) -> Option<(&EventGroup, u8)> {
        match self.binding.lock(Cell::get) {
            Binding::Unbound => None,
            Binding::Shared { group, offset } => Some((group, offset)),
            Binding::Private => Some((&self.private, 0)),
        }
    }
    /// Set and clear bits in one step.
    ///
    /// Bits contained in both masks end up set.
    pub fn update(&self, set: u32, clear: u32) {
        if let Some((group, offset)) = self.target() {
            if clear != 0 {
                group.clear_bits(clear << offset);
            }
            if set != 0 {
                group.set_bits(set << offset);
            }
        }
    }
    pub fn set(&self, bits: u32) {
        self.update(bits, 0);
    }
    pub fn clear(&self, bits: u32) {
        self.update(0, bits);
    }
    /// Returns the bits set in the bound group, shifted back to offset zero.
    pub fn bits(&self) -> Option<u32> {
        self.target()
            .map(|(group, offset)| (group.bits() >> offset) & crate::event::ALL_EVENTS)
    }
    /// Wait until any bit in `mask` is set in the bound group, or the timeout expires.
    ///
    /// Returns the bits of `mask`, that were set, or zero on timeout or if nothing is bound.
    pub async fn wait(&self, mask: u32, timeout: Duration) -> u32 {
        let Some((group, offset)) = self.target() else {
            return 0;
        };
        match select(group.wait_bits(mask << offset), Timer::after(timeout)).await {
            Either::First(set) => set >> offset,
            Either::Second(_) => {
                trace!("Waiting for events {} timed out.", mask);
                0
            }
        }
    }
}
impl Default for EventNotifier<'_> {
    fn default() -> Self {
        Self::new()
    }
}
