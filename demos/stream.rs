//! Stream fused orientation quaternions to stdout.
//!
//! Status messages go to stderr; one "w x y z" line per sample to stdout.

use rayneo_air::{Session, SessionConfig, SessionUpdate};

fn main() {
    env_logger::init();

    let (mut session, updates) = Session::with_usb(SessionConfig::default());
    session.start();

    for update in updates.iter() {
        match update {
            SessionUpdate::Status(msg) => eprintln!("[status] {}", msg),
            SessionUpdate::Orientation([w, x, y, z]) => {
                println!("{w:+.4} {x:+.4} {y:+.4} {z:+.4}");
            }
        }
    }
}
