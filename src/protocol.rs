use crate::types::{DeviceInfo, Packet, SensorSample};

// -- USB identifiers --
pub const VID: u16 = 0x1BBB;
pub const PID: u16 = 0xAF50;

// -- Board identifiers --
pub const BOARD_AIR_4_PRO: u8 = 0x3A;

// -- Wire framing --
/// Every frame starts with this sync byte; byte 1 is the type tag and byte 2
/// the total frame length.
pub const PKT_MAGIC: u8 = 0x99;
pub const PKT_SENSOR: u8 = 0x65;
pub const PKT_RESPONSE: u8 = 0xC8;

/// Smallest frame the assembler will accept: magic + tag + length + one byte.
pub const MIN_FRAME_LEN: usize = 4;

// -- Commands --
/// First byte of every host-to-device command packet.
pub const CMD_MAGIC: u8 = 0x66;
pub const CMD_ACQUIRE_DEVICE_INFO: u8 = 0;
pub const CMD_OPEN_IMU: u8 = 1;
pub const CMD_CLOSE_IMU: u8 = 2;
pub const CMD_SWITCH_TO_3D: u8 = 6;
pub const CMD_SWITCH_TO_2D: u8 = 7;

/// Command packets are zero-padded to at least this many bytes.
pub const MIN_COMMAND_LEN: usize = 64;

// -- Response frame offsets --
const RESPONSE_CMD_OFFSET: usize = 8;

// -- Sensor frame offsets (little-endian f32 unless noted) --
// The magnetometer Z axis lives apart from X/Y; that split is the device's
// wire format and must be preserved exactly.
const ACCEL_OFFSET: usize = 4;
const GYRO_OFFSET: usize = 16;
const TEMP_OFFSET: usize = 28;
const MAG_X_OFFSET: usize = 32;
const TICK_OFFSET: usize = 40; // u32 LE
const PSENSOR_OFFSET: usize = 44;
const LSENSOR_OFFSET: usize = 48;
const MAG_Z_OFFSET: usize = 52;

// -- Device-info response offsets --
const DEVINFO_BOARD_ID_OFFSET: usize = 21;
const DEVINFO_SIDE_BY_SIDE_OFFSET: usize = 43;

/// Build a command packet: [0x66, cmd, arg, 0x00 padding...].
///
/// The buffer is at least 64 bytes; `min_size` (typically the OUT endpoint's
/// max packet size) can grow it further.
pub fn build_command_packet(cmd: u8, arg: u8, min_size: usize) -> Vec<u8> {
    let len = min_size.max(MIN_COMMAND_LEN);
    let mut pkt = vec![0u8; len];
    pkt[0] = CMD_MAGIC;
    pkt[1] = cmd;
    pkt[2] = arg;
    pkt
}

/// Classify a framed byte slice by its type tag at offset 1.
///
/// Fails soft: anything too short or unrecognized is `Packet::Unknown`.
pub fn classify_packet(raw: &[u8]) -> Packet {
    if raw.len() < MIN_FRAME_LEN {
        return Packet::Unknown;
    }

    match raw[1] {
        PKT_SENSOR => match parse_sensor_sample(raw) {
            Some(sample) => Packet::Sensor(sample),
            None => Packet::Unknown,
        },
        PKT_RESPONSE => {
            if raw.len() <= RESPONSE_CMD_OFFSET {
                Packet::Unknown
            } else {
                Packet::Response {
                    cmd: raw[RESPONSE_CMD_OFFSET],
                    raw: raw.to_vec(),
                }
            }
        }
        _ => Packet::Unknown,
    }
}

/// Decode a sensor frame into a `SensorSample`.
///
/// Returns `None` if the frame is shorter than the highest field offset.
pub fn parse_sensor_sample(raw: &[u8]) -> Option<SensorSample> {
    if raw.len() < MAG_Z_OFFSET + 4 {
        return None;
    }

    Some(SensorSample {
        accel_mps2: [
            read_f32_le(raw, ACCEL_OFFSET),
            read_f32_le(raw, ACCEL_OFFSET + 4),
            read_f32_le(raw, ACCEL_OFFSET + 8),
        ],
        gyro_dps: [
            read_f32_le(raw, GYRO_OFFSET),
            read_f32_le(raw, GYRO_OFFSET + 4),
            read_f32_le(raw, GYRO_OFFSET + 8),
        ],
        temperature_c: read_f32_le(raw, TEMP_OFFSET),
        magnet: [
            read_f32_le(raw, MAG_X_OFFSET),
            read_f32_le(raw, MAG_X_OFFSET + 4),
            read_f32_le(raw, MAG_Z_OFFSET),
        ],
        proximity: read_f32_le(raw, PSENSOR_OFFSET),
        light: read_f32_le(raw, LSENSOR_OFFSET),
        device_tick_100us: read_u32_le(raw, TICK_OFFSET),
    })
}

/// Decode the acquire-device-info response payload.
pub fn parse_device_info(raw: &[u8]) -> Option<DeviceInfo> {
    if raw.len() <= DEVINFO_SIDE_BY_SIDE_OFFSET {
        return None;
    }

    Some(DeviceInfo {
        board_id: raw[DEVINFO_BOARD_ID_OFFSET],
        side_by_side_enabled: raw[DEVINFO_SIDE_BY_SIDE_OFFSET] != 0,
    })
}

fn read_u32_le(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

fn read_f32_le(raw: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32_le(raw, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_f32(buf: &mut [u8], offset: usize, value: f32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn make_sensor_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 56];
        frame[0] = PKT_MAGIC;
        frame[1] = PKT_SENSOR;
        frame[2] = 56;
        put_f32(&mut frame, ACCEL_OFFSET, 0.25);
        put_f32(&mut frame, ACCEL_OFFSET + 4, 9.81);
        put_f32(&mut frame, ACCEL_OFFSET + 8, -0.5);
        put_f32(&mut frame, GYRO_OFFSET, 1.5);
        put_f32(&mut frame, GYRO_OFFSET + 4, -2.5);
        put_f32(&mut frame, GYRO_OFFSET + 8, 3.5);
        put_f32(&mut frame, TEMP_OFFSET, 31.25);
        put_f32(&mut frame, MAG_X_OFFSET, 10.0);
        put_f32(&mut frame, MAG_X_OFFSET + 4, 20.0);
        frame[TICK_OFFSET..TICK_OFFSET + 4].copy_from_slice(&123_456u32.to_le_bytes());
        put_f32(&mut frame, PSENSOR_OFFSET, 1.0);
        put_f32(&mut frame, LSENSOR_OFFSET, 250.0);
        put_f32(&mut frame, MAG_Z_OFFSET, 30.0);
        frame
    }

    #[test]
    fn build_command_packet_layout() {
        let pkt = build_command_packet(CMD_OPEN_IMU, 0, 64);
        assert_eq!(pkt.len(), 64);
        assert_eq!(pkt[0], CMD_MAGIC);
        assert_eq!(pkt[1], 1);
        assert_eq!(pkt[2], 0);
        assert!(pkt[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn build_command_packet_grows_to_min_size() {
        let pkt = build_command_packet(CMD_SWITCH_TO_3D, 1, 512);
        assert_eq!(pkt.len(), 512);
        assert_eq!(pkt[1], CMD_SWITCH_TO_3D);
        assert_eq!(pkt[2], 1);
    }

    #[test]
    fn classify_sensor_frame_bit_exact() {
        let frame = make_sensor_frame();
        let sample = match classify_packet(&frame) {
            Packet::Sensor(s) => s,
            other => panic!("expected sensor packet, got {:?}", other),
        };
        assert_eq!(sample.accel_mps2, [0.25, 9.81, -0.5]);
        assert_eq!(sample.gyro_dps, [1.5, -2.5, 3.5]);
        assert_eq!(sample.temperature_c, 31.25);
        assert_eq!(sample.magnet, [10.0, 20.0, 30.0]);
        assert_eq!(sample.proximity, 1.0);
        assert_eq!(sample.light, 250.0);
        assert_eq!(sample.device_tick_100us, 123_456);
    }

    #[test]
    fn classify_response_frame() {
        let mut frame = vec![0u8; 16];
        frame[0] = PKT_MAGIC;
        frame[1] = PKT_RESPONSE;
        frame[2] = 16;
        frame[8] = CMD_OPEN_IMU;
        match classify_packet(&frame) {
            Packet::Response { cmd, raw } => {
                assert_eq!(cmd, 1);
                assert_eq!(raw.len(), 16);
            }
            other => panic!("expected response packet, got {:?}", other),
        }
    }

    #[test]
    fn classify_rejects_short_and_unknown() {
        assert!(matches!(classify_packet(&[0x99, 0x65, 56]), Packet::Unknown));
        assert!(matches!(
            classify_packet(&[0x99, 0x42, 8, 0, 0, 0, 0, 0]),
            Packet::Unknown
        ));
        // Sensor tag but frame too short for the payload.
        let mut short = vec![0u8; 40];
        short[0] = PKT_MAGIC;
        short[1] = PKT_SENSOR;
        short[2] = 40;
        assert!(matches!(classify_packet(&short), Packet::Unknown));
        // Response tag but no room for the command id.
        let mut short = vec![0u8; 8];
        short[0] = PKT_MAGIC;
        short[1] = PKT_RESPONSE;
        short[2] = 8;
        assert!(matches!(classify_packet(&short), Packet::Unknown));
    }

    #[test]
    fn parse_device_info_offsets() {
        let mut raw = vec![0u8; 44];
        raw[DEVINFO_BOARD_ID_OFFSET] = BOARD_AIR_4_PRO;
        raw[DEVINFO_SIDE_BY_SIDE_OFFSET] = 1;
        let info = parse_device_info(&raw).unwrap();
        assert_eq!(info.board_id, BOARD_AIR_4_PRO);
        assert!(info.side_by_side_enabled);

        // One byte short of the side-by-side flag.
        assert!(parse_device_info(&raw[..43]).is_none());
    }
}
