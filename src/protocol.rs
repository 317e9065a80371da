//! TC-200 USB wire protocol.
//!
//! Control commands travel over the HID interface as 63-byte reports
//! (prefix byte + command echo + payload). Video frames arrive on a bulk
//! endpoint as a 36-byte frame header followed by the pixel payload.
//! IMU samples arrive as HID interrupt reports.

use crate::types::{
    Capabilities, ColorFormat, ColorResolution, DepthMode, DeviceConfiguration, Fps, ImuSample,
    WiredSyncMode,
};

// -- USB identifiers --
pub const VID: u16 = 0x3DC4;
pub const PID: u16 = 0x00C2;
pub const HID_INTERFACE: u8 = 2;
/// USB interface exposing the bulk video endpoints.
pub const VIDEO_INTERFACE: u8 = 0;
/// Bulk IN endpoint carrying depth/IR frames.
pub const DEPTH_ENDPOINT: u8 = 0x81;
/// Bulk IN endpoint carrying color frames.
pub const COLOR_ENDPOINT: u8 = 0x82;

// -- Report geometry --
pub const REPORT_SIZE: usize = 63;
pub const FRAME_HEADER_SIZE: usize = 36;

// -- Command direction prefixes --
pub const PREFIX_HOST_TO_DEVICE: u8 = 0x02;
pub const PREFIX_DEVICE_TO_HOST: u8 = 0x01;

// -- Command bytes (after the 0x02 prefix) --
pub const CMD_SERIAL: &[u8] = &[0xC3, 0x10];
pub const CMD_VERSION: &[u8] = &[0xC3, 0x11];
pub const CMD_CAPABILITIES: &[u8] = &[0xC3, 0x12];
/// Chunked calibration blob read; payload: chunk index u16 LE.
pub const CMD_CALIBRATION: &[u8] = &[0xC3, 0x20];
pub const CMD_START_CAMERAS: &[u8] = &[0xC4, 0x01];
pub const CMD_STOP_CAMERAS: &[u8] = &[0xC4, 0x02];
pub const CMD_START_IMU: &[u8] = &[0xC4, 0x03];
pub const CMD_STOP_IMU: &[u8] = &[0xC4, 0x04];
pub const CMD_COLOR_CONTROL_GET: &[u8] = &[0xC5, 0x01];
pub const CMD_COLOR_CONTROL_SET: &[u8] = &[0xC5, 0x02];
pub const CMD_COLOR_CONTROL_CAPS: &[u8] = &[0xC5, 0x03];

// -- Stream packet headers --
/// "TCFR" little-endian.
pub const FRAME_MAGIC: u32 = 0x5246_4354;
/// IMU interrupt report echo after the 0x01 prefix.
pub const IMU_HEADER: [u8; 3] = [0x01, 0x4D, 0x11];

// -- IMU fixed-point scales --
/// Accelerometer LSB in g; 2^-11.
pub const ACCEL_SCALE_G: f32 = 4.8828125e-4;
pub const STANDARD_GRAVITY: f32 = 9.80665;
/// Gyroscope LSB in rad/s; 2^-12.
pub const GYRO_SCALE_RADS: f32 = 2.44140625e-4;
/// Temperature LSB in degrees Celsius.
pub const TEMP_SCALE_C: f32 = 0.01;

/// Build a 63-byte HID command buffer.
/// Format: [0x02, cmd_bytes..., 0x00 padding...]
pub fn build_command(cmd: &[u8]) -> [u8; REPORT_SIZE] {
    let mut buf = [0u8; REPORT_SIZE];
    buf[0] = PREFIX_HOST_TO_DEVICE;
    let len = cmd.len().min(REPORT_SIZE - 1);
    buf[1..1 + len].copy_from_slice(&cmd[..len]);
    buf
}

fn color_format_code(f: ColorFormat) -> u8 {
    match f {
        ColorFormat::Mjpg => 0,
        ColorFormat::Nv12 => 1,
        ColorFormat::Yuy2 => 2,
        ColorFormat::Bgra32 => 3,
    }
}

fn color_resolution_code(r: ColorResolution) -> u8 {
    match r {
        ColorResolution::Off => 0,
        ColorResolution::R720p => 1,
        ColorResolution::R1080p => 2,
        ColorResolution::R1440p => 3,
        ColorResolution::R1536p => 4,
        ColorResolution::R2160p => 5,
        ColorResolution::R3072p => 6,
    }
}

fn depth_mode_code(m: DepthMode) -> u8 {
    match m {
        DepthMode::Off => 0,
        DepthMode::NfovBinned => 1,
        DepthMode::NfovUnbinned => 2,
        DepthMode::WfovBinned => 3,
        DepthMode::WfovUnbinned => 4,
        DepthMode::PassiveIr => 5,
    }
}

fn fps_code(f: Fps) -> u8 {
    match f {
        Fps::F5 => 0,
        Fps::F15 => 1,
        Fps::F30 => 2,
    }
}

fn sync_mode_code(m: WiredSyncMode) -> u8 {
    match m {
        WiredSyncMode::Standalone => 0,
        WiredSyncMode::Master => 1,
        WiredSyncMode::Subordinate => 2,
    }
}

/// Build the start-cameras command from a configuration.
/// Payload: [format, resolution, depth_mode, fps, sync_mode, flags,
/// depth_delay i32 LE, subordinate_delay u32 LE].
pub fn build_start_cameras_cmd(config: &DeviceConfiguration) -> [u8; REPORT_SIZE] {
    let mut cmd_bytes = [0u8; 16];
    cmd_bytes[0..2].copy_from_slice(CMD_START_CAMERAS);
    cmd_bytes[2] = color_format_code(config.color_format);
    cmd_bytes[3] = color_resolution_code(config.color_resolution);
    cmd_bytes[4] = depth_mode_code(config.depth_mode);
    cmd_bytes[5] = fps_code(config.camera_fps);
    cmd_bytes[6] = sync_mode_code(config.wired_sync_mode);
    cmd_bytes[7] = u8::from(config.disable_streaming_indicator);
    cmd_bytes[8..12].copy_from_slice(&config.depth_delay_off_color_usec.to_le_bytes());
    cmd_bytes[12..16].copy_from_slice(&config.subordinate_delay_off_master_usec.to_le_bytes());
    build_command(&cmd_bytes)
}

/// Command payload for a chunked calibration read.
pub fn calibration_chunk_cmd(chunk: u16) -> [u8; 4] {
    let mut cmd_bytes = [0u8; 4];
    cmd_bytes[0..2].copy_from_slice(CMD_CALIBRATION);
    cmd_bytes[2..4].copy_from_slice(&chunk.to_le_bytes());
    cmd_bytes
}

/// Wire code for a color control command.
pub fn color_control_code(command: crate::types::ColorControlCommand) -> u8 {
    use crate::types::ColorControlCommand as Cmd;
    match command {
        Cmd::ExposureTimeAbsolute => 0,
        Cmd::WhiteBalance => 1,
        Cmd::Brightness => 2,
        Cmd::Contrast => 3,
        Cmd::Saturation => 4,
        Cmd::Sharpness => 5,
        Cmd::Gain => 6,
        Cmd::BacklightCompensation => 7,
        Cmd::PowerlineFrequency => 8,
    }
}

/// Extract the command echo from a response and return the payload start
/// offset. Response format: [0x01, cmd_echo..., payload...]
pub fn validate_response(response: &[u8], expected_cmd: &[u8]) -> crate::Result<usize> {
    if response.is_empty() || response[0] != PREFIX_DEVICE_TO_HOST {
        return Err(crate::TofcamError::InvalidResponse(
            response.first().copied().unwrap_or(0),
        ));
    }
    let cmd_len = expected_cmd.len();
    if response.len() < 1 + cmd_len {
        return Err(crate::TofcamError::CommandMismatch);
    }
    if &response[1..1 + cmd_len] != expected_cmd {
        return Err(crate::TofcamError::CommandMismatch);
    }
    Ok(1 + cmd_len)
}

/// Extract a null-terminated string from a byte slice.
pub fn extract_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).to_string()
}

/// Parse the capability bitmap from a response payload (LE u32).
pub fn parse_capabilities(payload: &[u8]) -> Capabilities {
    if payload.len() < 4 {
        return Capabilities::empty();
    }
    let bits = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Capabilities::from_bits_truncate(bits)
}

/// Which sensor a bulk frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Color,
    Depth,
    Ir,
}

/// Parsed bulk frame header. The payload follows immediately and is
/// `payload_len` bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHeader {
    pub kind: StreamKind,
    pub sequence: u32,
    pub device_timestamp_usec: u64,
    pub exposure_usec: u32,
    pub white_balance_k: u16,
    pub iso_speed: u16,
    pub width: u16,
    pub height: u16,
    /// Sensor temperature; only meaningful on depth/IR frames.
    pub temperature_c: f32,
    pub payload_len: u32,
}

/// Parse a 36-byte bulk frame header.
///
/// Layout (all LE):
/// - `[0..4)`: magic "TCFR"
/// - `[4]`: stream kind (1 = color, 2 = depth, 3 = IR)
/// - `[5]`: flags (reserved)
/// - `[6..8)`: sensor temperature, centidegrees Celsius (i16)
/// - `[8..12)`: sequence number
/// - `[12..20)`: device timestamp, microseconds
/// - `[20..24)`: exposure, microseconds
/// - `[24..26)`: white balance, Kelvin
/// - `[26..28)`: ISO speed
/// - `[28..30)`: width
/// - `[30..32)`: height
/// - `[32..36)`: payload length in bytes
pub fn parse_frame_header(data: &[u8]) -> Option<FrameHeader> {
    if data.len() < FRAME_HEADER_SIZE {
        return None;
    }
    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if magic != FRAME_MAGIC {
        return None;
    }
    let kind = match data[4] {
        1 => StreamKind::Color,
        2 => StreamKind::Depth,
        3 => StreamKind::Ir,
        _ => return None,
    };
    let temp_centi = i16::from_le_bytes([data[6], data[7]]);

    Some(FrameHeader {
        kind,
        sequence: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
        device_timestamp_usec: u64::from_le_bytes([
            data[12], data[13], data[14], data[15], data[16], data[17], data[18], data[19],
        ]),
        exposure_usec: u32::from_le_bytes([data[20], data[21], data[22], data[23]]),
        white_balance_k: u16::from_le_bytes([data[24], data[25]]),
        iso_speed: u16::from_le_bytes([data[26], data[27]]),
        width: u16::from_le_bytes([data[28], data[29]]),
        height: u16::from_le_bytes([data[30], data[31]]),
        temperature_c: temp_centi as f32 * TEMP_SCALE_C,
        payload_len: u32::from_le_bytes([data[32], data[33], data[34], data[35]]),
    })
}

/// Parse a 63-byte IMU interrupt report into an [`ImuSample`].
///
/// Layout:
/// - `[0..3)`: 0x01, 0x4D, 0x11 (prefix + command echo)
/// - `[3..11)`: accelerometer timestamp, microseconds (u64 LE)
/// - `[11..17)`: 3x i16 accelerometer, `ACCEL_SCALE_G` g per LSB
/// - `[17..19)`: temperature, centidegrees Celsius (i16)
/// - `[19..27)`: gyroscope timestamp, microseconds (u64 LE)
/// - `[27..33)`: 3x i16 gyroscope, `GYRO_SCALE_RADS` rad/s per LSB
pub fn parse_imu_packet(data: &[u8]) -> Option<ImuSample> {
    if data.len() < REPORT_SIZE {
        return None;
    }
    if data[0] != IMU_HEADER[0] || data[1] != IMU_HEADER[1] || data[2] != IMU_HEADER[2] {
        return None;
    }

    let acc_ts = u64::from_le_bytes([
        data[3], data[4], data[5], data[6], data[7], data[8], data[9], data[10],
    ]);
    let acc = |i: usize| {
        i16::from_le_bytes([data[11 + 2 * i], data[12 + 2 * i]]) as f32
            * ACCEL_SCALE_G
            * STANDARD_GRAVITY
    };
    let temp = i16::from_le_bytes([data[17], data[18]]) as f32 * TEMP_SCALE_C;
    let gyro_ts = u64::from_le_bytes([
        data[19], data[20], data[21], data[22], data[23], data[24], data[25], data[26],
    ]);
    let gyro =
        |i: usize| i16::from_le_bytes([data[27 + 2 * i], data[28 + 2 * i]]) as f32 * GYRO_SCALE_RADS;

    Some(ImuSample {
        acc: [acc(0), acc(1), acc(2)],
        acc_timestamp_usec: acc_ts,
        gyro: [gyro(0), gyro(1), gyro(2)],
        gyro_timestamp_usec: gyro_ts,
        temperature_c: temp,
    })
}

/// Encode a color-control set payload.
pub fn build_color_control_set_cmd(
    command: crate::types::ColorControlCommand,
    mode: crate::types::ColorControlMode,
    value: i32,
) -> [u8; REPORT_SIZE] {
    use crate::types::ColorControlMode;

    let mut cmd_bytes = [0u8; 8];
    cmd_bytes[0..2].copy_from_slice(CMD_COLOR_CONTROL_SET);
    cmd_bytes[2] = color_control_code(command);
    cmd_bytes[3] = match mode {
        ColorControlMode::Auto => 0,
        ColorControlMode::Manual => 1,
    };
    cmd_bytes[4..8].copy_from_slice(&value.to_le_bytes());
    build_command(&cmd_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColorControlCommand, ColorControlMode};

    #[test]
    fn test_build_command() {
        let buf = build_command(CMD_SERIAL);
        assert_eq!(buf[0], 0x02);
        assert_eq!(&buf[1..3], CMD_SERIAL);
        assert_eq!(buf[3], 0);
    }

    #[test]
    fn test_validate_response() {
        let mut resp = [0u8; 63];
        resp[0] = 0x01;
        resp[1..3].copy_from_slice(CMD_SERIAL);
        resp[3] = b'T';
        let offset = validate_response(&resp, CMD_SERIAL).unwrap();
        assert_eq!(offset, 3);
    }

    #[test]
    fn test_validate_response_rejects_wrong_echo() {
        let mut resp = [0u8; 63];
        resp[0] = 0x01;
        resp[1..3].copy_from_slice(CMD_VERSION);
        assert!(validate_response(&resp, CMD_SERIAL).is_err());
    }

    #[test]
    fn test_start_cameras_cmd_encoding() {
        let config = DeviceConfiguration {
            color_format: ColorFormat::Bgra32,
            color_resolution: ColorResolution::R720p,
            depth_mode: DepthMode::NfovUnbinned,
            camera_fps: Fps::F30,
            depth_delay_off_color_usec: -250,
            ..Default::default()
        };
        let buf = build_start_cameras_cmd(&config);
        assert_eq!(buf[0], 0x02);
        assert_eq!(&buf[1..3], CMD_START_CAMERAS);
        assert_eq!(buf[3], 3); // Bgra32
        assert_eq!(buf[4], 1); // 720p
        assert_eq!(buf[5], 2); // NfovUnbinned
        assert_eq!(buf[6], 2); // 30 fps
        assert_eq!(
            i32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]),
            -250
        );
    }

    #[test]
    fn test_parse_frame_header() {
        let mut data = [0u8; FRAME_HEADER_SIZE];
        data[0..4].copy_from_slice(&FRAME_MAGIC.to_le_bytes());
        data[4] = 2; // depth
        data[6..8].copy_from_slice(&2350i16.to_le_bytes()); // 23.5 C
        data[8..12].copy_from_slice(&7u32.to_le_bytes());
        data[12..20].copy_from_slice(&1_596_313_963u64.to_le_bytes());
        data[20..24].copy_from_slice(&8_000u32.to_le_bytes());
        data[28..30].copy_from_slice(&640u16.to_le_bytes());
        data[30..32].copy_from_slice(&576u16.to_le_bytes());
        data[32..36].copy_from_slice(&(640u32 * 576 * 2).to_le_bytes());

        let header = parse_frame_header(&data).unwrap();
        assert_eq!(header.kind, StreamKind::Depth);
        assert_eq!(header.sequence, 7);
        assert_eq!(header.device_timestamp_usec, 1_596_313_963);
        assert_eq!(header.width, 640);
        assert_eq!(header.height, 576);
        assert!((header.temperature_c - 23.5).abs() < 1e-3);
        assert_eq!(header.payload_len, 640 * 576 * 2);
    }

    #[test]
    fn test_parse_frame_header_rejects_bad_magic() {
        let data = [0u8; FRAME_HEADER_SIZE];
        assert!(parse_frame_header(&data).is_none());
    }

    #[test]
    fn test_parse_imu_packet() {
        let mut data = [0u8; REPORT_SIZE];
        data[0..3].copy_from_slice(&IMU_HEADER);
        data[3..11].copy_from_slice(&555_000u64.to_le_bytes());
        // 1 g on Z: 1/ACCEL_SCALE_G = 2048 LSB.
        data[11..13].copy_from_slice(&0i16.to_le_bytes());
        data[13..15].copy_from_slice(&0i16.to_le_bytes());
        data[15..17].copy_from_slice(&2048i16.to_le_bytes());
        data[17..19].copy_from_slice(&2410i16.to_le_bytes());
        data[19..27].copy_from_slice(&555_100u64.to_le_bytes());
        // 1 rad/s on X: 1/GYRO_SCALE_RADS = 4096 LSB.
        data[27..29].copy_from_slice(&4096i16.to_le_bytes());

        let sample = parse_imu_packet(&data).unwrap();
        assert_eq!(sample.acc_timestamp_usec, 555_000);
        assert_eq!(sample.gyro_timestamp_usec, 555_100);
        assert!((sample.acc[2] - STANDARD_GRAVITY).abs() < 1e-3);
        assert!((sample.gyro[0] - 1.0).abs() < 1e-4);
        assert!((sample.temperature_c - 24.1).abs() < 1e-3);
    }

    #[test]
    fn test_color_control_cmd_encoding() {
        let buf = build_color_control_set_cmd(
            ColorControlCommand::WhiteBalance,
            ColorControlMode::Manual,
            4500,
        );
        assert_eq!(&buf[1..3], CMD_COLOR_CONTROL_SET);
        assert_eq!(buf[3], 1); // WhiteBalance
        assert_eq!(buf[4], 1); // Manual
        assert_eq!(i32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]), 4500);
    }
}
