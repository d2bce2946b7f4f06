//! The interface to the radio subsystem, which actually moves frames over the air.

use crate::{event::Role, frame::NativeHandle};

/// lwIP status code for success.
pub const ERR_OK: i8 = 0;
/// lwIP status code for an illegal argument.
pub const ERR_ARG: i8 = -16;

/// The result of handing a frame to the transport for transmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendStatus {
    /// The frame was accepted. This doesn't say anything about delivery.
    Ok,
    /// The transport rejected the arguments.
    InvalidArgument,
    /// Any other status code.
    Other(i8),
}
impl SendStatus {
    /// Interpret an lwIP style status code.
    pub const fn from_code(code: i8) -> Self {
        match code {
            ERR_OK => Self::Ok,
            ERR_ARG => Self::InvalidArgument,
            code => Self::Other(code),
        }
    }
}

/// A lifecycle call of the transport failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportError;

/// The radio subsystem.
///
/// Everything besides frame ingress and the status bookkeeping, like selecting the mode, the
/// interface configuration or scanning, is left to the implementor and can be reached through
/// [WiFi::transport](crate::WiFi::transport).
pub trait Transport {
    /// Initialize the radio.
    fn init(&self) -> Result<(), TransportError>;
    /// Deinitialize the radio.
    fn deinit(&self) -> Result<(), TransportError>;
    /// Start delivering received frames for `role`.
    ///
    /// From now on every frame received on that interface has to be passed to
    /// [WiFi::receive_frame](crate::WiFi::receive_frame). Registering twice must not lead to
    /// frames being delivered twice.
    fn register_rx_callback(&self, role: Role) -> Result<(), TransportError>;
    /// Hand a frame to the radio for transmission.
    fn send(&self, role: Role, buffer: &[u8]) -> SendStatus;
    /// Release a receive buffer.
    ///
    /// This may be called from the receive callback.
    fn free_rx_buffer(&self, handle: NativeHandle);
}

impl<T: Transport + ?Sized> Transport for &T {
    fn init(&self) -> Result<(), TransportError> {
        (**self).init()
    }
    fn deinit(&self) -> Result<(), TransportError> {
        (**self).deinit()
    }
    fn register_rx_callback(&self, role: Role) -> Result<(), TransportError> {
        (**self).register_rx_callback(role)
    }
    fn send(&self, role: Role, buffer: &[u8]) -> SendStatus {
        (**self).send(role, buffer)
    }
    fn free_rx_buffer(&self, handle: NativeHandle) {
        (**self).free_rx_buffer(handle)
    }
}
