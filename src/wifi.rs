use core::{cell::Cell, fmt};

use embassy_sync::blocking_mutex;
use embassy_time::Duration;
use macro_bits::check_bit;
use portable_atomic::{AtomicBool, Ordering};

use crate::{
    event::{
        LinkEvent, Role, WiFiStatus, ALL_EVENTS, AP_FRAME_RECEIVED, AP_STARTED, STA_CONNECTED,
        STA_DISCONNECTED, STA_FRAME_RECEIVED, STA_STARTED,
    },
    frame::{FrameQueue, RxFrame},
    sync::{EventGroup, EventNotifier},
    transport::{SendStatus, Transport},
    DefaultRawMutex,
};

/// Numeric codes for [WiFiResult]s, as used by binding layers.
pub const WIFI_ERR_OK: i32 = 0;
pub const WIFI_ERR_AGAIN: i32 = 1;
pub const WIFI_ERR_INVAL: i32 = 2;
pub const WIFI_ERR_UNSPEC: i32 = 3;

/// The number of frames, that can wait in each queue before the oldest one is dropped.
pub const MAX_PENDING_FRAMES: usize = 20;
/// A sensible timeout for [WiFi::wait_for_event].
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

const ROLES: [Role; 2] = [Role::Sta, Role::Ap];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WiFiError {
    /// Nothing is available right now. Wait and try again.
    Again,
    /// The buffer was too small for the frame, or the interface doesn't exist.
    InvalidArgument,
    /// The transport failed.
    Unspecified,
}
impl WiFiError {
    /// Returns the numeric code of the error.
    pub const fn code(self) -> i32 {
        match self {
            Self::Again => WIFI_ERR_AGAIN,
            Self::InvalidArgument => WIFI_ERR_INVAL,
            Self::Unspecified => WIFI_ERR_UNSPEC,
        }
    }
}
impl fmt::Display for WiFiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Again => "nothing to read",
            Self::InvalidArgument => "invalid argument",
            Self::Unspecified => "unspecified transport error",
        })
    }
}

pub type WiFiResult<T> = Result<T, WiFiError>;

/// Bridge between the radio and the task consuming its frames.
///
/// The transport hands received frames to [WiFi::receive_frame] and link events to
/// [WiFi::handle_event], both of which are safe to call from interrupt context. The consumer
/// drains the queues with [WiFi::read] and sleeps in [WiFi::wait_for_event] in between.
///
/// Since the transport has to reach the driver from its callbacks, this will usually live in a
/// `static`.
pub struct WiFi<'a, T: Transport, const N: usize = MAX_PENDING_FRAMES> {
    transport: T,
    status: blocking_mutex::Mutex<DefaultRawMutex, Cell<WiFiStatus>>,
    notifier: EventNotifier<'a>,
    sta_frames: FrameQueue<N>,
    ap_frames: FrameQueue<N>,
    rx_callback_registered: [AtomicBool; 2],
}
impl<'a, T: Transport, const N: usize> WiFi<'a, T, N> {
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            status: blocking_mutex::Mutex::new(Cell::new(WiFiStatus::new())),
            notifier: EventNotifier::new(),
            sta_frames: FrameQueue::new(),
            ap_frames: FrameQueue::new(),
            rx_callback_registered: [AtomicBool::new(false), AtomicBool::new(false)],
        }
    }
    /// Returns the transport, for everything not handled by the driver.
    pub fn transport(&self) -> &T {
        &self.transport
    }
    fn frame_queue(&self, role: Role) -> &FrameQueue<N> {
        match role {
            Role::Sta => &self.sta_frames,
            Role::Ap => &self.ap_frames,
        }
    }
    /// Initialize the radio.
    pub fn initialize(&self) -> WiFiResult<()> {
        trace!("Initializing WiFi.");
        if self.transport.init().is_err() {
            error!("Failed to initialize the transport.");
            return Err(WiFiError::Unspecified);
        }
        self.transition(|status| status.set_wifi_inited(true), 0, 0);
        Ok(())
    }
    /// Deinitialize the radio.
    ///
    /// All pending frames are dropped, including those received while the transport shuts down.
    pub fn deinitialize(&self) -> WiFiResult<()> {
        trace!("Deinitializing WiFi.");
        for role in ROLES {
            self.drain(role);
        }
        if self.transport.deinit().is_err() {
            error!("Failed to deinitialize the transport.");
            return Err(WiFiError::Unspecified);
        }
        // The callbacks may have fired until the transport was gone.
        for role in ROLES {
            self.drain(role);
        }
        // The callbacks are gone with the transport.
        for registered in &self.rx_callback_registered {
            registered.store(false, Ordering::Release);
        }
        self.transition(|status| status.set_wifi_inited(false), 0, 0);
        Ok(())
    }
    /// Release all frames waiting for the interface.
    fn drain(&self, role: Role) {
        let queue = self.frame_queue(role);
        let mut released = 0usize;
        while let Some(frame) = queue.dequeue() {
            self.transport.free_rx_buffer(frame.into_handle());
            released += 1;
        }
        self.refresh_frame_bit(role);
        if released != 0 {
            debug!("Released {} pending {} frames.", released, role.name());
        }
    }
    /// Returns the current status.
    pub fn get_status(&self) -> WiFiStatus {
        self.status.lock(Cell::get)
    }
    /// Update the status and the notifier bits in one step.
    fn transition(&self, f: impl FnOnce(&mut WiFiStatus), set: u32, clear: u32) {
        self.status.lock(|status| {
            let mut new_status = status.get();
            f(&mut new_status);
            status.set(new_status);
            self.notifier.update(set, clear);
        });
    }
    /// Make the notifier bits reflect the status and the queues.
    ///
    /// This has to be called with the status locked.
    fn sync_notifier(&self, status: WiFiStatus) {
        let (mut set, mut clear) = status.event_bits();
        for role in ROLES {
            if self.frame_queue(role).is_empty() {
                clear |= role.frame_received_bit();
            } else {
                set |= role.frame_received_bit();
            }
        }
        self.notifier.update(set, clear);
    }
    /// Bind an [EventGroup], through which events will be signalled.
    ///
    /// The driver's bits occupy the group starting at `offset`, so it must be at most
    /// [EventNotifier::MAX_OFFSET]. Any previous binding is replaced and the bits are set up to
    /// match the current state.
    pub fn bind_notifier(&self, group: &'a EventGroup, offset: u8) -> WiFiResult<()> {
        self.status.lock(|status| {
            if !self.notifier.bind(group, offset) {
                return Err(WiFiError::InvalidArgument);
            }
            trace!("Bound event group at offset {}.", offset);
            self.sync_notifier(status.get());
            Ok(())
        })
    }
    /// Check the status and the queues directly.
    fn events_pending(&self, mask: u32) -> bool {
        let status = self.get_status();
        (status.ap_started() && check_bit!(mask, AP_STARTED))
            || (status.sta_connected() && check_bit!(mask, STA_CONNECTED))
            || (status.sta_started() && check_bit!(mask, STA_STARTED))
            || (!self.ap_frames.is_empty() && check_bit!(mask, AP_FRAME_RECEIVED))
            || (!self.sta_frames.is_empty() && check_bit!(mask, STA_FRAME_RECEIVED))
    }
    /// Wait until any of the events in `mask` is signalled, or the timeout expires.
    ///
    /// This is only a hint. Whatever was waited for has to be checked again afterwards.
    ///
    /// If no [EventGroup] is bound, the status and the queues are checked first and, if nothing
    /// is pending, the driver's private group is bound until the wait is over.
    pub async fn wait_for_event(&self, mask: u32, timeout: Duration) {
        let mask = mask & ALL_EVENTS;
        if !self.notifier.is_bound() {
            if self.events_pending(mask) {
                return;
            }
            let bound_private = self.status.lock(|status| {
                let bound = self.notifier.bind_private();
                if bound {
                    self.sync_notifier(status.get());
                }
                bound
            });
            if bound_private {
                struct UnbindOnDrop<'n, 'g>(&'n EventNotifier<'g>);
                impl Drop for UnbindOnDrop<'_, '_> {
                    fn drop(&mut self) {
                        self.0.unbind_private();
                    }
                }
                let _unbind_on_drop = UnbindOnDrop(&self.notifier);
                self.notifier.wait(mask, timeout).await;
                return;
            }
        }
        self.notifier.wait(mask, timeout).await;
    }
    /// Process an event from the transport.
    ///
    /// Events without meaning to the driver are ignored.
    pub fn handle_event(&self, event: LinkEvent) {
        debug!("WiFi event: {}", event.name());
        match event {
            LinkEvent::StaStart => self.start(Role::Sta),
            LinkEvent::StaStop => self.stop(Role::Sta),
            LinkEvent::StaConnected => self.transition(
                |status| status.set_sta_connected(true),
                STA_CONNECTED,
                STA_DISCONNECTED,
            ),
            LinkEvent::StaDisconnected => self.transition(
                |status| status.set_sta_connected(false),
                STA_DISCONNECTED,
                STA_CONNECTED,
            ),
            LinkEvent::ApStart => self.start(Role::Ap),
            LinkEvent::ApStop => self.stop(Role::Ap),
            LinkEvent::ApStaConnected | LinkEvent::ApStaDisconnected => {}
            LinkEvent::Other(id) => trace!("Ignoring event {}.", id),
        }
    }
    fn start(&self, role: Role) {
        self.register_rx_callback(role);
        self.transition(
            |status| status.set_started(role, true),
            role.started_bit(),
            role.stopped_bit(),
        );
    }
    fn stop(&self, role: Role) {
        self.transition(
            |status| status.set_started(role, false),
            role.stopped_bit(),
            role.started_bit(),
        );
    }
    /// Register the receive callback for the interface, unless that already happened.
    fn register_rx_callback(&self, role: Role) {
        let registered = &self.rx_callback_registered[role.into_raw() as usize];
        if registered.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!("Registering {} RX callback.", role.name());
        if self.transport.register_rx_callback(role).is_err() {
            error!("Failed to register the {} RX callback.", role.name());
            registered.store(false, Ordering::Release);
        }
    }
    /// Queue a frame received on the interface.
    ///
    /// This is meant to be called from the receive callback of the transport. It doesn't block
    /// or allocate. If the queue is full, the oldest frame is dropped.
    pub fn receive_frame(&self, role: Role, frame: RxFrame) {
        let bit = role.frame_received_bit();
        // Signalling inside the queue's lock means, that the bit can't show up after the frame
        // was already read.
        let evicted = self
            .frame_queue(role)
            .enqueue(frame, || self.notifier.set(bit));
        if let Some(evicted) = evicted {
            warn!(
                "Too many {} frames pending, dropping the oldest one.",
                role.name()
            );
            self.transport.free_rx_buffer(evicted.into_handle());
        }
    }
    /// Clear the frame bit, once the queue ran empty.
    fn refresh_frame_bit(&self, role: Role) {
        if self.frame_queue(role).is_empty() && self.notifier.is_bound() {
            self.clear_frame_bit_and_recheck(role);
        }
    }
    fn clear_frame_bit_and_recheck(&self, role: Role) {
        let bit = role.frame_received_bit();
        self.notifier.clear(bit);
        // A frame may have been received, between checking the queue and clearing the bit.
        if !self.frame_queue(role).is_empty() {
            self.notifier.set(bit);
        }
    }
    /// Copy the oldest frame of the interface into `buffer`.
    ///
    /// Returns the length of the frame. If no frame is waiting, [WiFiError::Again] is returned.
    /// If the frame doesn't fit into `buffer`, [WiFiError::InvalidArgument] is returned and the
    /// frame is dropped. It won't be available to a later read.
    pub fn read(&self, role: Role, buffer: &mut [u8]) -> WiFiResult<usize> {
        let Some(frame) = self.frame_queue(role).dequeue() else {
            return Err(WiFiError::Again);
        };
        let res = if frame.len() > buffer.len() {
            debug!(
                "Dropping {} frame of {} bytes, since the buffer only holds {} bytes.",
                role.name(),
                frame.len(),
                buffer.len()
            );
            Err(WiFiError::InvalidArgument)
        } else {
            buffer[..frame.len()].copy_from_slice(frame.payload());
            Ok(frame.len())
        };
        self.transport.free_rx_buffer(frame.into_handle());
        self.refresh_frame_bit(role);
        res
    }
    /// Hand a frame to the transport for transmission.
    ///
    /// Success only means, that the transport accepted the frame.
    pub fn write(&self, role: Role, buffer: &[u8]) -> WiFiResult<()> {
        match self.transport.send(role, buffer) {
            SendStatus::Ok => Ok(()),
            SendStatus::InvalidArgument => Err(WiFiError::InvalidArgument),
            SendStatus::Other(code) => {
                debug!("Sending {} frame failed with {}.", role.name(), code);
                Err(WiFiError::Unspecified)
            }
        }
    }
    /// The number of frames waiting for the interface.
    pub fn pending_frames(&self, role: Role) -> usize {
        self.frame_queue(role).len()
    }
    /// The number of frames dropped for the interface, because its queue was full.
    pub fn dropped_frames(&self, role: Role) -> u32 {
        self.frame_queue(role).dropped_frames()
    }
}
impl<T: Transport, const N: usize> Drop for WiFi<'_, T, N> {
    fn drop(&mut self) {
        for role in ROLES {
            self.drain(role);
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::{boxed::Box, sync::OnceLock, thread, time::Duration as StdDuration, vec::Vec};

    use embassy_time::{Duration, Instant};
    use portable_atomic::Ordering;

    use super::*;
    use crate::{
        event::STA_STOPPED,
        frame::{tests::test_frame, NativeHandle},
        sync::tests::block_on,
        transport::{mock::MockTransport, Transport, TransportError, ERR_ARG, ERR_OK},
    };

    type TestWiFi<'a> = WiFi<'a, MockTransport>;

    fn frame_bit_matches_queue(wifi: &TestWiFi<'_>, group: &EventGroup, role: Role) -> bool {
        check_bit!(group.bits(), role.frame_received_bit()) == (wifi.pending_frames(role) != 0)
    }

    #[test]
    fn read_from_empty_queue() {
        let wifi = TestWiFi::new(MockTransport::new());
        let mut buffer = [0u8; 64];
        assert_eq!(wifi.read(Role::Sta, &mut buffer), Err(WiFiError::Again));
        assert_eq!(WiFiError::Again.code(), WIFI_ERR_AGAIN);
    }

    #[test]
    fn read_copies_frame() {
        let wifi = TestWiFi::new(MockTransport::new());
        let payload: Vec<u8> = (0..20).collect();
        wifi.receive_frame(Role::Ap, test_frame(7, &payload));

        let mut buffer = [0u8; 64];
        assert_eq!(wifi.read(Role::Ap, &mut buffer), Ok(20));
        assert_eq!(&buffer[..20], payload.as_slice());
        assert_eq!(wifi.transport().freed(), [7]);
        assert_eq!(wifi.read(Role::Ap, &mut buffer), Err(WiFiError::Again));
    }

    #[test]
    fn undersized_buffer_drops_frame() {
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.receive_frame(Role::Ap, test_frame(3, &[0xaa; 50]));

        let mut buffer = [0u8; 10];
        assert_eq!(
            wifi.read(Role::Ap, &mut buffer),
            Err(WiFiError::InvalidArgument)
        );
        assert_eq!(buffer, [0u8; 10]);
        assert_eq!(wifi.transport().freed(), [3]);
        assert_eq!(wifi.read(Role::Ap, &mut buffer), Err(WiFiError::Again));
    }

    #[test]
    fn queues_are_independent() {
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.receive_frame(Role::Sta, test_frame(1, &[1]));
        wifi.receive_frame(Role::Ap, test_frame(2, &[2]));

        let mut buffer = [0u8; 4];
        assert_eq!(wifi.read(Role::Ap, &mut buffer), Ok(1));
        assert_eq!(buffer[0], 2);
        assert_eq!(wifi.pending_frames(Role::Sta), 1);
        assert_eq!(wifi.read(Role::Sta, &mut buffer), Ok(1));
        assert_eq!(buffer[0], 1);
    }

    #[test]
    fn overflow_releases_evicted_frame() {
        let wifi = WiFi::<'_, MockTransport, 4>::new(MockTransport::new());
        for id in 1..=5 {
            wifi.receive_frame(Role::Sta, test_frame(id, &[id as u8]));
        }
        assert_eq!(wifi.pending_frames(Role::Sta), 4);
        assert_eq!(wifi.dropped_frames(Role::Sta), 1);
        assert_eq!(wifi.transport().freed(), [1]);

        let mut buffer = [0u8; 1];
        let mut received = Vec::new();
        while wifi.read(Role::Sta, &mut buffer).is_ok() {
            received.push(buffer[0]);
        }
        assert_eq!(received, [2, 3, 4, 5]);
        assert_eq!(wifi.transport().freed(), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn frame_bit_tracks_queue() {
        let group = EventGroup::new();
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.bind_notifier(&group, 0).unwrap();
        let mut buffer = [0u8; 8];

        // Interleave reception and reading, and check at every quiescent point.
        for round in 0..10usize {
            for id in 0..round % 3 {
                wifi.receive_frame(Role::Sta, test_frame(round * 10 + id, &[0; 4]));
                assert!(frame_bit_matches_queue(&wifi, &group, Role::Sta));
            }
            let _ = wifi.read(Role::Sta, &mut buffer);
            assert!(frame_bit_matches_queue(&wifi, &group, Role::Sta));
            let capacity = if round % 2 == 0 { 2 } else { buffer.len() };
            let _ = wifi.read(Role::Sta, &mut buffer[..capacity]);
            assert!(frame_bit_matches_queue(&wifi, &group, Role::Sta));
            assert!(frame_bit_matches_queue(&wifi, &group, Role::Ap));
        }
    }

    #[test]
    fn frame_received_while_clearing_keeps_bit() {
        let group = EventGroup::new();
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.bind_notifier(&group, 0).unwrap();
        wifi.receive_frame(Role::Sta, test_frame(1, &[1]));

        // The consumer takes the last frame and finds the queue empty.
        let frame = wifi.sta_frames.dequeue().unwrap();
        wifi.transport().free_rx_buffer(frame.into_handle());
        assert!(wifi.sta_frames.is_empty());
        // Now the receive callback runs, before the bit is cleared.
        wifi.receive_frame(Role::Sta, test_frame(2, &[2]));
        wifi.clear_frame_bit_and_recheck(Role::Sta);
        assert!(check_bit!(group.bits(), STA_FRAME_RECEIVED));

        let mut buffer = [0u8; 1];
        assert_eq!(wifi.read(Role::Sta, &mut buffer), Ok(1));
        assert!(!check_bit!(group.bits(), STA_FRAME_RECEIVED));
    }

    #[test]
    fn sta_start_and_stop() {
        let group = EventGroup::new();
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.bind_notifier(&group, 4).unwrap();

        wifi.handle_event(LinkEvent::StaStart);
        assert!(wifi.get_status().sta_started());
        assert!(check_bit!(group.bits(), STA_STARTED << 4));
        assert!(!check_bit!(group.bits(), STA_STOPPED << 4));

        wifi.handle_event(LinkEvent::StaStop);
        assert!(!wifi.get_status().sta_started());
        assert!(!check_bit!(group.bits(), STA_STARTED << 4));
        assert!(check_bit!(group.bits(), STA_STOPPED << 4));
        assert_eq!(group.bits() & 0xf, 0);
    }

    #[test]
    fn status_without_notifier() {
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.handle_event(LinkEvent::StaStart);
        wifi.handle_event(LinkEvent::StaConnected);
        wifi.handle_event(LinkEvent::ApStart);
        let status = wifi.get_status();
        assert!(status.sta_started() && status.sta_connected() && status.ap_started());
        assert!(!status.wifi_inited());

        wifi.handle_event(LinkEvent::StaDisconnected);
        wifi.handle_event(LinkEvent::ApStop);
        let status = wifi.get_status();
        assert!(status.sta_started());
        assert!(!status.sta_connected() && !status.ap_started());
    }

    #[test]
    fn connect_and_disconnect_bits() {
        let group = EventGroup::new();
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.bind_notifier(&group, 0).unwrap();
        assert!(check_bit!(group.bits(), STA_DISCONNECTED));

        wifi.handle_event(LinkEvent::StaConnected);
        assert!(check_bit!(group.bits(), STA_CONNECTED));
        assert!(!check_bit!(group.bits(), STA_DISCONNECTED));
        wifi.handle_event(LinkEvent::StaDisconnected);
        assert!(!check_bit!(group.bits(), STA_CONNECTED));
        assert!(check_bit!(group.bits(), STA_DISCONNECTED));
    }

    #[test]
    fn rx_callback_is_registered_once() {
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.handle_event(LinkEvent::StaStart);
        wifi.handle_event(LinkEvent::StaStop);
        wifi.handle_event(LinkEvent::StaStart);
        wifi.handle_event(LinkEvent::ApStart);
        wifi.handle_event(LinkEvent::ApStart);
        assert_eq!(wifi.transport().registrations(), [Role::Sta, Role::Ap]);
    }

    #[test]
    fn failed_registration_is_retried() {
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.transport()
            .fail_registration
            .store(true, Ordering::Relaxed);
        wifi.handle_event(LinkEvent::ApStart);
        assert!(wifi.get_status().ap_started());
        assert!(wifi.transport().registrations().is_empty());

        wifi.transport()
            .fail_registration
            .store(false, Ordering::Relaxed);
        wifi.handle_event(LinkEvent::ApStart);
        assert_eq!(wifi.transport().registrations(), [Role::Ap]);
    }

    #[test]
    fn unhandled_events_are_ignored() {
        let group = EventGroup::new();
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.bind_notifier(&group, 0).unwrap();
        let (status, bits) = (wifi.get_status(), group.bits());
        wifi.handle_event(LinkEvent::Other(42));
        wifi.handle_event(LinkEvent::ApStaConnected);
        wifi.handle_event(LinkEvent::ApStaDisconnected);
        assert_eq!(wifi.get_status(), status);
        assert_eq!(group.bits(), bits);
    }

    #[test]
    fn binding_reflects_current_state() {
        let group = EventGroup::new();
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.handle_event(LinkEvent::ApStart);
        wifi.receive_frame(Role::Ap, test_frame(1, &[1]));
        // Bits of other users of the group aren't touched.
        group.set_bits(1 << 31);

        wifi.bind_notifier(&group, 8).unwrap();
        let bits = group.bits() >> 8;
        assert_eq!(
            bits & ALL_EVENTS,
            AP_STARTED | AP_FRAME_RECEIVED | STA_STOPPED | STA_DISCONNECTED
        );
        assert!(check_bit!(group.bits(), 1 << 31));
        assert_eq!(
            wifi.bind_notifier(&group, EventNotifier::MAX_OFFSET + 1),
            Err(WiFiError::InvalidArgument)
        );
    }

    #[test]
    fn write_maps_send_status() {
        let wifi = TestWiFi::new(MockTransport::new());
        for (code, expected) in [
            (ERR_OK, Ok(())),
            (ERR_ARG, Err(WiFiError::InvalidArgument)),
            (-1, Err(WiFiError::Unspecified)),
            (-12, Err(WiFiError::Unspecified)),
        ] {
            *wifi.transport().send_status.lock().unwrap() = SendStatus::from_code(code);
            assert_eq!(wifi.write(Role::Sta, &[1, 2, 3]), expected);
        }
        let sent = wifi.transport().sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0], (Role::Sta, std::vec![1, 2, 3]));
    }

    #[test]
    fn initialize_and_deinitialize() {
        let group = EventGroup::new();
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.bind_notifier(&group, 0).unwrap();
        wifi.initialize().unwrap();
        assert!(wifi.get_status().wifi_inited());

        wifi.handle_event(LinkEvent::StaStart);
        wifi.receive_frame(Role::Sta, test_frame(1, &[1]));
        wifi.receive_frame(Role::Ap, test_frame(2, &[2]));
        wifi.deinitialize().unwrap();
        assert!(!wifi.get_status().wifi_inited());
        assert_eq!(wifi.pending_frames(Role::Sta), 0);
        assert_eq!(wifi.pending_frames(Role::Ap), 0);
        assert_eq!(wifi.transport().freed(), [1, 2]);
        assert_eq!(group.bits() & (STA_FRAME_RECEIVED | AP_FRAME_RECEIVED), 0);

        // The next start registers the callback again.
        wifi.handle_event(LinkEvent::StaStart);
        assert_eq!(wifi.transport().registrations(), [Role::Sta, Role::Sta]);
    }

    /// Delivers one more STA frame while shutting down, like a receive callback racing the
    /// teardown.
    struct LateFrameTransport {
        inner: MockTransport,
        wifi: OnceLock<&'static WiFi<'static, &'static LateFrameTransport>>,
    }
    impl Transport for LateFrameTransport {
        fn init(&self) -> Result<(), TransportError> {
            self.inner.init()
        }
        fn deinit(&self) -> Result<(), TransportError> {
            if let Some(wifi) = self.wifi.get() {
                wifi.receive_frame(Role::Sta, test_frame(9, &[9]));
            }
            self.inner.deinit()
        }
        fn register_rx_callback(&self, role: Role) -> Result<(), TransportError> {
            self.inner.register_rx_callback(role)
        }
        fn send(&self, role: Role, buffer: &[u8]) -> SendStatus {
            self.inner.send(role, buffer)
        }
        fn free_rx_buffer(&self, handle: NativeHandle) {
            self.inner.free_rx_buffer(handle)
        }
    }

    #[test]
    fn frames_received_during_deinitialization_are_released() {
        let transport: &'static LateFrameTransport = Box::leak(Box::new(LateFrameTransport {
            inner: MockTransport::new(),
            wifi: OnceLock::new(),
        }));
        let wifi: &'static WiFi<'static, &'static LateFrameTransport> =
            Box::leak(Box::new(WiFi::new(transport)));
        let _ = transport.wifi.set(wifi);

        wifi.initialize().unwrap();
        wifi.handle_event(LinkEvent::StaStart);
        wifi.receive_frame(Role::Sta, test_frame(1, &[1]));
        wifi.deinitialize().unwrap();
        assert_eq!(wifi.pending_frames(Role::Sta), 0);
        assert_eq!(transport.inner.freed(), [1, 9]);
    }

    #[test]
    fn dropping_releases_pending_frames() {
        let transport = MockTransport::new();
        let wifi = WiFi::<'_, &MockTransport>::new(&transport);
        wifi.receive_frame(Role::Sta, test_frame(1, &[1]));
        wifi.receive_frame(Role::Ap, test_frame(2, &[2]));
        wifi.receive_frame(Role::Ap, test_frame(3, &[3]));
        drop(wifi);
        assert_eq!(transport.freed(), [1, 2, 3]);
    }

    #[test]
    fn lifecycle_failures_are_unspecified() {
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.transport()
            .fail_lifecycle
            .store(true, Ordering::Relaxed);
        assert_eq!(wifi.initialize(), Err(WiFiError::Unspecified));
        assert!(!wifi.get_status().wifi_inited());
        assert_eq!(wifi.deinitialize(), Err(WiFiError::Unspecified));
    }

    #[test]
    fn wait_returns_immediately_if_condition_holds() {
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.handle_event(LinkEvent::StaStart);
        wifi.receive_frame(Role::Ap, test_frame(1, &[1]));

        let start = Instant::now();
        block_on(wifi.wait_for_event(STA_STARTED, DEFAULT_WAIT_TIMEOUT));
        block_on(wifi.wait_for_event(AP_FRAME_RECEIVED, DEFAULT_WAIT_TIMEOUT));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!wifi.notifier.is_bound());
    }

    #[test]
    fn wait_without_notifier_times_out() {
        let wifi = TestWiFi::new(MockTransport::new());
        let start = Instant::now();
        block_on(wifi.wait_for_event(STA_CONNECTED, Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(!wifi.notifier.is_bound());
    }

    #[test]
    fn wait_without_notifier_wakes_on_event() {
        let wifi = TestWiFi::new(MockTransport::new());
        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(StdDuration::from_millis(20));
                wifi.handle_event(LinkEvent::StaConnected);
            });
            let start = Instant::now();
            block_on(wifi.wait_for_event(STA_CONNECTED, Duration::from_secs(10)));
            assert!(start.elapsed() < Duration::from_secs(5));
        });
        assert!(wifi.get_status().sta_connected());
        assert!(!wifi.notifier.is_bound());
    }

    #[test]
    fn wait_on_bound_group() {
        let group = EventGroup::new();
        let wifi = TestWiFi::new(MockTransport::new());
        wifi.bind_notifier(&group, 16).unwrap();
        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(StdDuration::from_millis(20));
                wifi.receive_frame(Role::Sta, test_frame(1, &[1]));
            });
            let start = Instant::now();
            block_on(wifi.wait_for_event(STA_FRAME_RECEIVED, Duration::from_secs(10)));
            assert!(start.elapsed() < Duration::from_secs(5));
        });
        assert!(check_bit!(group.bits(), STA_FRAME_RECEIVED << 16));
        let mut buffer = [0u8; 1];
        assert_eq!(wifi.read(Role::Sta, &mut buffer), Ok(1));
        assert!(!check_bit!(group.bits(), STA_FRAME_RECEIVED << 16));
    }
}
