/// One decoded IMU sample from the glasses.
#[derive(Debug, Clone, Copy)]
pub struct SensorSample {
    /// Accelerometer [x, y, z] in m/s².
    pub accel_mps2: [f32; 3],
    /// Gyroscope [x, y, z] in deg/s.
    pub gyro_dps: [f32; 3],
    /// IMU die temperature in °C.
    pub temperature_c: f32,
    /// Magnetometer [x, y, z] (device units).
    pub magnet: [f32; 3],
    /// Proximity sensor reading.
    pub proximity: f32,
    /// Ambient light sensor reading.
    pub light: f32,
    /// Device tick counter in 100 µs units. Wraps at u32::MAX.
    pub device_tick_100us: u32,
}

/// Device identification from the handshake response.
#[derive(Debug, Clone, Copy)]
pub struct DeviceInfo {
    pub board_id: u8,
    pub side_by_side_enabled: bool,
}

/// A classified frame extracted from the USB byte stream.
#[derive(Debug, Clone)]
pub enum Packet {
    Sensor(SensorSample),
    Response { cmd: u8, raw: Vec<u8> },
    Unknown,
}

/// Display mode commands the glasses accept.
///
/// The protocol defines them but the session never sends them on its own;
/// they are exposed for callers that know when a mode switch is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    ThreeD,
    TwoD,
}

/// Asynchronous updates delivered to the consumer thread.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Human-readable diagnostic for UI/logs.
    Status(String),
    /// Latest fused orientation as a unit quaternion [w, x, y, z].
    Orientation([f32; 4]),
}

/// Platform device-lifecycle events injected into the session.
///
/// The OS plumbing that raises these (broadcast receivers, udev, ...) lives
/// outside this crate; the session only reacts to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    PermissionGranted,
    PermissionDenied,
    /// A device matching the RayNeo VID/PID was attached.
    Attached,
    Detached { device_id: u32 },
}

/// Session lifecycle state, owned by the I/O thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingPermission,
    Opening,
    Handshaking,
    Streaming,
    Stopping,
}
