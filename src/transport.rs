use crate::endpoints::{EndpointDesc, InterfaceDesc};
use crate::Result;
use std::time::Duration;

/// Opaque identifier for an attached device (stable for the attachment's
/// lifetime, compared against detach events).
pub type DeviceId = u32;

/// Byte-level access to an opened device.
///
/// The session owns exactly one transport at a time and touches it only from
/// its I/O thread. Implementations: [`crate::usb::UsbTransport`] over rusb,
/// and scripted fakes in the test suite.
pub trait Transport: Send {
    /// Flattened interface/endpoint descriptors for endpoint selection.
    fn interfaces(&mut self) -> Result<Vec<InterfaceDesc>>;

    fn claim_interface(&mut self, number: u8) -> Result<()>;

    /// Best-effort; failures during teardown are ignored.
    fn release_interface(&mut self, number: u8);

    /// Read from an IN endpoint. A timeout with no data is `Ok(0)`, not an
    /// error; a vanished device is [`crate::RayNeoError::Disconnected`].
    fn read(&mut self, endpoint: &EndpointDesc, buf: &mut [u8], timeout: Duration)
        -> Result<usize>;

    /// Write to an OUT endpoint, returning the byte count actually sent.
    fn write(&mut self, endpoint: &EndpointDesc, buf: &[u8], timeout: Duration) -> Result<usize>;
}

/// Discovery and opening of the matching device.
///
/// Desktop hosts have no permission broker and report permission as always
/// granted; hosts that do broker permissions answer `false` from
/// [`has_permission`](Self::has_permission) and later inject
/// [`crate::DeviceEvent::PermissionGranted`].
pub trait DeviceHost: Send {
    /// Find an attached device matching the RayNeo vendor/product id.
    fn find_device(&mut self) -> Option<DeviceId>;

    fn has_permission(&mut self, device: DeviceId) -> bool;

    /// Ask the platform for permission; the answer arrives as a
    /// `DeviceEvent` later.
    fn request_permission(&mut self, device: DeviceId);

    fn open(&mut self, device: DeviceId) -> Result<Box<dyn Transport>>;
}
