use crate::protocol::{self, PREFIX_DEVICE_TO_HOST, REPORT_SIZE};
use crate::types::{
    Capabilities, ColorControlCapabilities, ColorControlCommand, ColorControlMode,
    DeviceConfiguration,
};
use crate::{Result, TofcamError};
use hidapi::HidDevice;

/// HID control transport using hidapi for SET_REPORT / GET_REPORT.
///
/// On Windows, hidapi's `write()` uses byte[0] as the HID report ID.
/// The TC-200 protocol prefix 0x02 (host-to-device) doubles as the
/// output report ID, so `build_command()` output (63 bytes starting
/// with 0x02) can be passed directly to `write()`.
pub struct ControlTransport {
    device: HidDevice,
}

impl ControlTransport {
    pub fn new(device: HidDevice) -> Self {
        Self { device }
    }

    /// Send a HID command and receive the response.
    ///
    /// 1. Builds a 63-byte buffer: [0x02, cmd_bytes..., padding]
    /// 2. Sends via `write()` — byte[0]=0x02 serves as both report ID and protocol prefix
    /// 3. Reads via `get_input_report()` — report ID 0x01 = device-to-host prefix
    /// 4. Validates response prefix
    pub fn transaction(&self, cmd: &[u8]) -> Result<Vec<u8>> {
        let send_buf = protocol::build_command(cmd);

        self.device
            .write(&send_buf)
            .map_err(|e| TofcamError::Command(format!("write failed: {}", e)))?;

        // Small delay to let device process the command
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut recv_buf = [0u8; REPORT_SIZE + 1];
        recv_buf[0] = PREFIX_DEVICE_TO_HOST; // report ID = 0x01
        let len = self
            .device
            .get_input_report(&mut recv_buf)
            .map_err(|e| TofcamError::Command(format!("get_input_report failed: {}", e)))?;

        let response = recv_buf[..len].to_vec();

        if response.is_empty() || response[0] != PREFIX_DEVICE_TO_HOST {
            return Err(TofcamError::InvalidResponse(
                response.first().copied().unwrap_or(0),
            ));
        }

        Ok(response)
    }

    fn send_raw(&self, buf: &[u8; REPORT_SIZE], label: &str) -> Result<()> {
        self.device
            .write(buf)
            .map_err(|e| TofcamError::Command(format!("{} failed: {}", label, e)))?;

        std::thread::sleep(std::time::Duration::from_millis(20));

        // Drain the ack; an all-zero report is fine.
        let mut recv_buf = [0u8; REPORT_SIZE + 1];
        recv_buf[0] = PREFIX_DEVICE_TO_HOST;
        let _ = self.device.get_input_report(&mut recv_buf);

        Ok(())
    }

    /// Read the device serial string.
    pub fn read_serial(&self) -> Result<String> {
        let response = self.transaction(protocol::CMD_SERIAL)?;
        let offset = protocol::validate_response(&response, protocol::CMD_SERIAL)?;
        Ok(protocol::extract_string(&response[offset..]))
    }

    /// Read the firmware version string.
    pub fn read_version(&self) -> Result<String> {
        let response = self.transaction(protocol::CMD_VERSION)?;
        let offset = protocol::validate_response(&response, protocol::CMD_VERSION)?;
        Ok(protocol::extract_string(&response[offset..]))
    }

    /// Read the capability bitmap.
    pub fn read_capabilities(&self) -> Result<Capabilities> {
        let response = self.transaction(protocol::CMD_CAPABILITIES)?;
        let offset = protocol::validate_response(&response, protocol::CMD_CAPABILITIES)?;
        Ok(protocol::parse_capabilities(&response[offset..]))
    }

    /// Read the factory calibration blob via chunked transactions.
    ///
    /// Each response payload is [total_len u32 LE, chunk bytes...]; the
    /// host iterates chunk indices until `total_len` bytes are collected.
    pub fn read_calibration_blob(&self) -> Result<Vec<u8>> {
        let mut blob = Vec::new();
        let mut total: Option<usize> = None;
        let mut chunk_index: u16 = 0;

        loop {
            let cmd = protocol::calibration_chunk_cmd(chunk_index);
            let response = self.transaction(&cmd)?;
            let offset = protocol::validate_response(&response, protocol::CMD_CALIBRATION)?;
            let payload = &response[offset..];
            if payload.len() < 4 {
                return Err(TofcamError::Format("calibration chunk truncated".into()));
            }
            let declared =
                u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
            match total {
                None => total = Some(declared),
                Some(t) if t != declared => {
                    return Err(TofcamError::Format(
                        "calibration chunk size disagreement".into(),
                    ));
                }
                _ => {}
            }
            let total = total.unwrap();
            let remaining = total - blob.len();
            let take = remaining.min(payload.len() - 4);
            blob.extend_from_slice(&payload[4..4 + take]);
            if blob.len() >= total {
                return Ok(blob);
            }
            if take == 0 {
                return Err(TofcamError::Format("calibration chunk empty".into()));
            }
            chunk_index = chunk_index
                .checked_add(1)
                .ok_or_else(|| TofcamError::Format("calibration blob too large".into()))?;
        }
    }

    /// Start color/depth streaming with the given configuration.
    pub fn start_cameras(&self, config: &DeviceConfiguration) -> Result<()> {
        let cmd = protocol::build_start_cameras_cmd(config);
        self.send_raw(&cmd, "start cameras")
    }

    pub fn stop_cameras(&self) -> Result<()> {
        let cmd = protocol::build_command(protocol::CMD_STOP_CAMERAS);
        self.send_raw(&cmd, "stop cameras")
    }

    pub fn start_imu(&self) -> Result<()> {
        let cmd = protocol::build_command(protocol::CMD_START_IMU);
        self.send_raw(&cmd, "start imu")
    }

    pub fn stop_imu(&self) -> Result<()> {
        let cmd = protocol::build_command(protocol::CMD_STOP_IMU);
        self.send_raw(&cmd, "stop imu")
    }

    /// Read one color control's current mode and value.
    pub fn get_color_control(
        &self,
        command: ColorControlCommand,
    ) -> Result<(ColorControlMode, i32)> {
        let cmd = [
            protocol::CMD_COLOR_CONTROL_GET[0],
            protocol::CMD_COLOR_CONTROL_GET[1],
            protocol::color_control_code(command),
        ];
        let response = self.transaction(&cmd)?;
        let offset = protocol::validate_response(&response, protocol::CMD_COLOR_CONTROL_GET)?;
        let payload = &response[offset..];
        if payload.len() < 6 {
            return Err(TofcamError::Format("color control response truncated".into()));
        }
        // Payload echoes the command code first.
        let mode = match payload[1] {
            0 => ColorControlMode::Auto,
            _ => ColorControlMode::Manual,
        };
        let value = i32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]);
        Ok((mode, value))
    }

    pub fn set_color_control(
        &self,
        command: ColorControlCommand,
        mode: ColorControlMode,
        value: i32,
    ) -> Result<()> {
        let cmd = protocol::build_color_control_set_cmd(command, mode, value);
        self.send_raw(&cmd, "set color control")
    }

    /// Read the device-reported range for one color control.
    pub fn get_color_control_capabilities(
        &self,
        command: ColorControlCommand,
    ) -> Result<ColorControlCapabilities> {
        let cmd = [
            protocol::CMD_COLOR_CONTROL_CAPS[0],
            protocol::CMD_COLOR_CONTROL_CAPS[1],
            protocol::color_control_code(command),
        ];
        let response = self.transaction(&cmd)?;
        let offset = protocol::validate_response(&response, protocol::CMD_COLOR_CONTROL_CAPS)?;
        let payload = &response[offset..];
        if payload.len() < 19 {
            return Err(TofcamError::Format(
                "color control capability response truncated".into(),
            ));
        }
        let i32_at = |i: usize| {
            i32::from_le_bytes([payload[i], payload[i + 1], payload[i + 2], payload[i + 3]])
        };
        Ok(ColorControlCapabilities {
            supports_auto: payload[1] != 0,
            min: i32_at(2),
            max: i32_at(6),
            step: i32_at(10),
            default_value: i32_at(14),
            default_mode: if payload[18] == 0 {
                ColorControlMode::Auto
            } else {
                ColorControlMode::Manual
            },
        })
    }
}
