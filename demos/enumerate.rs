//! List attached RayNeo devices.

use rayneo_air::transport::DeviceHost;
use rayneo_air::usb::UsbHost;

fn main() {
    env_logger::init();

    let mut host = UsbHost::new();
    match host.find_device() {
        Some(id) => println!(
            "RayNeo found at bus {:03} address {:03}",
            id >> 8,
            id & 0xFF
        ),
        None => println!("No RayNeo attached (VID 0x1bbb / PID 0xaf50)"),
    }
}
