/// Errors that can occur when talking to the RayNeo glasses.
///
/// None of these are fatal: every failure surfaces as a status message and
/// the session can be started again.
#[derive(Debug, thiserror::Error)]
pub enum RayNeoError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("RayNeo not found (VID=1BBB PID=AF50)")]
    DeviceNotFound,

    #[error("USB permission denied")]
    PermissionDenied,

    #[error("failed to open USB device: {0}")]
    OpenFailed(String),

    #[error("no usable IN/OUT endpoint pair")]
    EndpointsNotFound,

    #[error("failed to claim USB interface {0}")]
    ClaimInterface(u8),

    #[error("handshake timed out waiting for {0}")]
    HandshakeTimeout(&'static str),

    #[error("device disconnected")]
    Disconnected,
}
