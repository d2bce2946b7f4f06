//! Link events, the status record and the bits signalled through the [EventNotifier](crate::EventNotifier).

use bitfield_struct::bitfield;
use macro_bits::bit;

use crate::{WiFiError, WiFiResult};

/// The station interface was started.
pub const STA_STARTED: u32 = bit!(0);
/// The access point interface was started.
pub const AP_STARTED: u32 = bit!(1);
/// The station is connected to an access point.
pub const STA_CONNECTED: u32 = bit!(2);
/// At least one frame is waiting in the station queue.
pub const STA_FRAME_RECEIVED: u32 = bit!(3);
/// At least one frame is waiting in the access point queue.
pub const AP_FRAME_RECEIVED: u32 = bit!(4);
/// The station interface was stopped.
pub const STA_STOPPED: u32 = bit!(5);
/// The access point interface was stopped.
pub const AP_STOPPED: u32 = bit!(6);
/// The station isn't connected to an access point.
pub const STA_DISCONNECTED: u32 = bit!(7);

/// All bits used by the driver.
pub const ALL_EVENTS: u32 = 0xff;
/// The number of bits a notifier occupies in an [EventGroup](crate::EventGroup).
pub const EVENT_BIT_WIDTH: u32 = ALL_EVENTS.count_ones();

/// A logical network interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Station.
    Sta,
    /// Access point.
    Ap,
}
impl Role {
    /// Convert the interface index used by binding layers, where STA is zero and AP is one.
    pub const fn from_raw(raw: u8) -> WiFiResult<Self> {
        match raw {
            0 => Ok(Self::Sta),
            1 => Ok(Self::Ap),
            _ => Err(WiFiError::InvalidArgument),
        }
    }
    pub const fn into_raw(self) -> u8 {
        match self {
            Self::Sta => 0,
            Self::Ap => 1,
        }
    }
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sta => "STA",
            Self::Ap => "AP",
        }
    }
    /// The bit signalling, that a frame is waiting for this interface.
    pub const fn frame_received_bit(self) -> u32 {
        match self {
            Self::Sta => STA_FRAME_RECEIVED,
            Self::Ap => AP_FRAME_RECEIVED,
        }
    }
    pub const fn started_bit(self) -> u32 {
        match self {
            Self::Sta => STA_STARTED,
            Self::Ap => AP_STARTED,
        }
    }
    pub const fn stopped_bit(self) -> u32 {
        match self {
            Self::Sta => STA_STOPPED,
            Self::Ap => AP_STOPPED,
        }
    }
}

/// An event delivered by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    StaStart,
    StaStop,
    StaConnected,
    StaDisconnected,
    ApStart,
    ApStop,
    /// A station associated with our access point.
    ApStaConnected,
    /// A station left our access point.
    ApStaDisconnected,
    /// Any other event, identified by the transport's event ID.
    Other(u32),
}
impl LinkEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StaStart => "STA start",
            Self::StaStop => "STA stop",
            Self::StaConnected => "STA connected",
            Self::StaDisconnected => "STA disconnected",
            Self::ApStart => "AP start",
            Self::ApStop => "AP stop",
            Self::ApStaConnected => "AP station connected",
            Self::ApStaDisconnected => "AP station disconnected",
            Self::Other(_) => "other",
        }
    }
}

/// The state of the driver, as seen through the link events.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct WiFiStatus {
    pub wifi_inited: bool,
    pub ap_started: bool,
    pub sta_started: bool,
    pub sta_connected: bool,
    #[bits(4)]
    pub __: u8,
}
impl WiFiStatus {
    /// Check if the interface was started.
    pub const fn started(&self, role: Role) -> bool {
        match role {
            Role::Sta => self.sta_started(),
            Role::Ap => self.ap_started(),
        }
    }
    pub(crate) fn set_started(&mut self, role: Role, started: bool) {
        match role {
            Role::Sta => self.set_sta_started(started),
            Role::Ap => self.set_ap_started(started),
        }
    }
    /// Returns the bits matching this status, and the bits contradicting it.
    ///
    /// Frame bits aren't part of either, since they depend on the queues.
    pub(crate) const fn event_bits(&self) -> (u32, u32) {
        let mut set = 0;
        let mut clear = 0;
        if self.sta_started() {
            set |= STA_STARTED;
            clear |= STA_STOPPED;
        } else {
            set |= STA_STOPPED;
            clear |= STA_STARTED;
        }
        if self.ap_started() {
            set |= AP_STARTED;
            clear |= AP_STOPPED;
        } else {
            set |= AP_STOPPED;
            clear |= AP_STARTED;
        }
        if self.sta_connected() {
            set |= STA_CONNECTED;
            clear |= STA_DISCONNECTED;
        } else {
            set |= STA_DISCONNECTED;
            clear |= STA_CONNECTED;
        }
        (set, clear)
    }
}
