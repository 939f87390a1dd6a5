//! # rayneo-air - Rust driver for RayNeo Air AR glasses
//!
//! Talks to the glasses' IMU over USB bulk/interrupt endpoints:
//! - Device discovery by vendor/product id and a command/response handshake
//! - Resynchronizing reframing of the continuous byte stream into packets
//! - Binary sensor-sample decoding (accel, gyro, magnetometer, temperature,
//!   proximity, light, device tick)
//! - Complementary-filter sensor fusion into a smoothed orientation
//!   quaternion with gyro-bias tracking
//!
//! ## Quick Start
//! ```no_run
//! use rayneo_air::{Session, SessionConfig, SessionUpdate};
//!
//! let (mut session, updates) = Session::with_usb(SessionConfig::default());
//! session.start();
//! for update in updates.iter().take(100) {
//!     match update {
//!         SessionUpdate::Status(msg) => eprintln!("{}", msg),
//!         SessionUpdate::Orientation([w, x, y, z]) => {
//!             println!("q = ({w:+.3}, {x:+.3}, {y:+.3}, {z:+.3})")
//!         }
//!     }
//! }
//! session.stop();
//! ```

pub mod assembler;
pub mod endpoints;
pub mod error;
pub mod filter;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;
pub mod usb;

pub use assembler::PacketAssembler;
pub use error::RayNeoError;
pub use filter::OrientationFilter;
pub use session::{Session, SessionConfig};
pub use transport::{DeviceHost, DeviceId, Transport};
pub use types::*;

/// Result type alias for rayneo-air operations.
pub type Result<T> = std::result::Result<T, RayNeoError>;
