//! # `esp-wifi-bridge`
//! This connects the Wi-Fi driver of ESP32-series chips, which delivers frames and link events
//! from interrupt context, to a task consuming those frames. It is agnostic of the actual radio
//! stack, which is abstracted behind the [Transport] trait.
//! ## Overview
//! This chapter will give a short overview of how frames and events flow through the bridge.
//!
//! ### Receive (RX)
//! The first time an interface (STA or AP) is started, we ask the transport to register its
//! receive callback for that interface. From then on, the transport passes every received frame
//! to [WiFi::receive_frame]. This only wraps the buffer and the handle to it in an [RxFrame] and
//! appends it to the [FrameQueue] of the interface. Those queues have a fixed capacity, and once
//! one is full, the oldest frame is evicted and its buffer is returned to the transport. A frame
//! is never lost without its buffer being released, and never released twice.
//!
//! The consumer drains a queue with [WiFi::read], which copies the oldest frame into a buffer
//! supplied by the caller. If that buffer is too small, the frame is dropped instead of being
//! kept around, so that one oversized frame can't block the queue.
//!
//! ### Transmit (TX)
//! Transmission is simply forwarded to the transport. [WiFi::write] only maps the status code
//! returned by the transport. It doesn't retry or buffer anything.
//!
//! ### Events
//! Link events (interfaces starting and stopping, the station connecting and disconnecting) are
//! passed to [WiFi::handle_event]. These update the [WiFiStatus] and are signalled as bits
//! through an [EventGroup], just like the availability of frames. A task can wait for any
//! combination of those bits with [WiFi::wait_for_event]. The group can be supplied by the user
//! and shared with other users, in which case the driver's bits are shifted by an offset. If no
//! group was supplied, the driver checks the status directly and falls back to a private group
//! for the duration of the wait.
//!
//! Since reception runs concurrently to the consumer, the bit indicating a waiting frame is only
//! a hint. After a wait returned, the queue has to be checked again. Once a read emptied a queue,
//! the bit is cleared and the queue checked again, so that a frame received in between doesn't go
//! unnoticed.

#![no_std]
pub(crate) mod fmt;

pub mod event;
mod frame;
mod sync;
mod transport;
mod wifi;

pub use event::{LinkEvent, Role, WiFiStatus};
pub use frame::{FrameQueue, NativeHandle, RxFrame};
pub use sync::{EventGroup, EventNotifier, MAX_EVENT_WAITERS};
pub use transport::{SendStatus, Transport, TransportError, ERR_ARG, ERR_OK};
pub use wifi::*;

cfg_if::cfg_if! {
    if #[cfg(feature = "critical_section")] {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    } else {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::NoopRawMutex;
    }
}
