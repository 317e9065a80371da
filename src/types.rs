use serde::{Deserialize, Serialize};

/// Pixel layout of a color image.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFormat {
    /// Motion JPEG. Payload is an opaque compressed JPEG frame.
    Mjpg,
    /// NV12 4:2:0, luma plane followed by interleaved chroma.
    Nv12,
    /// YUY2 4:2:2 interleaved.
    Yuy2,
    /// 8-bit BGRA, 4 bytes per pixel.
    Bgra32,
}

impl ColorFormat {
    /// Bytes per pixel, 0 for compressed formats.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            ColorFormat::Mjpg => 0,
            ColorFormat::Nv12 => 1, // luma plane stride; total is 1.5x
            ColorFormat::Yuy2 => 2,
            ColorFormat::Bgra32 => 4,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, ColorFormat::Mjpg)
    }
}

/// Pixel layout of an image buffer, covering every track kind.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    ColorMjpg,
    ColorNv12,
    ColorYuy2,
    ColorBgra32,
    /// 16-bit little-endian depth in millimeters.
    Depth16,
    /// 16-bit little-endian IR intensity.
    Ir16,
    /// Interleaved i16 (X, Y, Z) millimeter triplets, 6 bytes per pixel.
    Custom,
}

impl ImageFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            ImageFormat::ColorMjpg => 0,
            ImageFormat::ColorNv12 => 1,
            ImageFormat::ColorYuy2 => 2,
            ImageFormat::ColorBgra32 => 4,
            ImageFormat::Depth16 | ImageFormat::Ir16 => 2,
            ImageFormat::Custom => 6,
        }
    }
}

impl From<ColorFormat> for ImageFormat {
    fn from(f: ColorFormat) -> Self {
        match f {
            ColorFormat::Mjpg => ImageFormat::ColorMjpg,
            ColorFormat::Nv12 => ImageFormat::ColorNv12,
            ColorFormat::Yuy2 => ImageFormat::ColorYuy2,
            ColorFormat::Bgra32 => ImageFormat::ColorBgra32,
        }
    }
}

/// Color sensor output resolution.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorResolution {
    Off,
    R720p,
    R1080p,
    R1440p,
    R1536p,
    R2160p,
    R3072p,
}

impl ColorResolution {
    /// (width, height) in pixels, (0, 0) when off.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            ColorResolution::Off => (0, 0),
            ColorResolution::R720p => (1280, 720),
            ColorResolution::R1080p => (1920, 1080),
            ColorResolution::R1440p => (2560, 1440),
            ColorResolution::R1536p => (2048, 1536),
            ColorResolution::R2160p => (3840, 2160),
            ColorResolution::R3072p => (4096, 3072),
        }
    }
}

/// Depth sensor operating mode.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthMode {
    Off,
    /// Narrow field of view, 2x2 binned.
    NfovBinned,
    NfovUnbinned,
    /// Wide field of view, 2x2 binned.
    WfovBinned,
    WfovUnbinned,
    /// IR only, no active illumination.
    PassiveIr,
}

impl DepthMode {
    /// (width, height) of the depth/IR image, (0, 0) when off.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            DepthMode::Off => (0, 0),
            DepthMode::NfovBinned => (320, 288),
            DepthMode::NfovUnbinned => (640, 576),
            DepthMode::WfovBinned => (512, 512),
            DepthMode::WfovUnbinned => (1024, 1024),
            DepthMode::PassiveIr => (1024, 1024),
        }
    }

    /// Whether the mode produces a ranged depth image (PassiveIr does not).
    pub fn has_depth(&self) -> bool {
        !matches!(self, DepthMode::Off | DepthMode::PassiveIr)
    }
}

/// Camera frame rate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fps {
    F5,
    F15,
    F30,
}

impl Fps {
    pub fn as_u32(&self) -> u32 {
        match self {
            Fps::F5 => 5,
            Fps::F15 => 15,
            Fps::F30 => 30,
        }
    }

    /// Frame period in microseconds.
    pub fn period_usec(&self) -> u64 {
        1_000_000 / self.as_u32() as u64
    }
}

/// Multi-device wired sync role.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WiredSyncMode {
    Standalone,
    Master,
    Subordinate,
}

/// Capture options for [`Device::start`](crate::Device::start).
///
/// Immutable once streaming has started; the device rejects mid-stream
/// reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub color_format: ColorFormat,
    pub color_resolution: ColorResolution,
    pub depth_mode: DepthMode,
    pub camera_fps: Fps,
    /// Only surface captures where color and depth share one exposure
    /// window. When false, single-modality captures may be surfaced to
    /// avoid stalling consumers (see `sync` module for the staleness
    /// bound).
    pub synchronized_images_only: bool,
    /// Depth capture delay relative to color capture, microseconds.
    pub depth_delay_off_color_usec: i32,
    pub wired_sync_mode: WiredSyncMode,
    /// Capture delay of this subordinate relative to the master,
    /// microseconds. Only meaningful in Subordinate mode.
    pub subordinate_delay_off_master_usec: u32,
    pub disable_streaming_indicator: bool,
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        Self {
            color_format: ColorFormat::Mjpg,
            color_resolution: ColorResolution::Off,
            depth_mode: DepthMode::Off,
            camera_fps: Fps::F30,
            synchronized_images_only: false,
            depth_delay_off_color_usec: 0,
            wired_sync_mode: WiredSyncMode::Standalone,
            subordinate_delay_off_master_usec: 0,
            disable_streaming_indicator: false,
        }
    }
}

impl DeviceConfiguration {
    /// Reject configurations the hardware cannot run.
    pub fn validate(&self) -> crate::Result<()> {
        if self.color_resolution == ColorResolution::Off && self.depth_mode == DepthMode::Off {
            return Err(crate::TofcamError::InvalidState(
                "at least one of color or depth must be enabled".into(),
            ));
        }
        if self.synchronized_images_only
            && (self.color_resolution == ColorResolution::Off
                || self.depth_mode == DepthMode::Off)
        {
            return Err(crate::TofcamError::InvalidState(
                "synchronized_images_only requires both color and depth".into(),
            ));
        }
        if self.subordinate_delay_off_master_usec != 0
            && self.wired_sync_mode != WiredSyncMode::Subordinate
        {
            return Err(crate::TofcamError::InvalidState(
                "subordinate delay requires Subordinate sync mode".into(),
            ));
        }
        Ok(())
    }
}

/// One inertial sample. Accelerometer and gyroscope are sampled on
/// independent clocks and carry their own timestamps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Accelerometer reading [x, y, z] in m/s^2.
    pub acc: [f32; 3],
    pub acc_timestamp_usec: u64,
    /// Gyroscope reading [x, y, z] in rad/s.
    pub gyro: [f32; 3],
    pub gyro_timestamp_usec: u64,
    /// Sensor temperature in degrees Celsius.
    pub temperature_c: f32,
}

/// Device identification and capabilities.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub serial: String,
    pub version: String,
    pub capabilities: Capabilities,
    pub bus_id: String,
}

bitflags::bitflags! {
    /// Capability bitmap reported by the TC-200.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(C)]
    pub struct Capabilities: u32 {
        const DEPTH_NFOV  = 1 << 0;
        const DEPTH_WFOV  = 1 << 1;
        const PASSIVE_IR  = 1 << 2;
        const COLOR       = 1 << 3;
        const COLOR_4K    = 1 << 4;
        const IMU         = 1 << 5;
        const SYNC_IN     = 1 << 8;
        const SYNC_OUT    = 1 << 9;
    }
}

/// Commands of the color sensor control surface.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorControlCommand {
    ExposureTimeAbsolute,
    WhiteBalance,
    Brightness,
    Contrast,
    Saturation,
    Sharpness,
    Gain,
    BacklightCompensation,
    PowerlineFrequency,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorControlMode {
    Auto,
    Manual,
}

/// Device-reported range for one color control command.
#[derive(Debug, Clone, Copy)]
pub struct ColorControlCapabilities {
    pub supports_auto: bool,
    pub min: i32,
    pub max: i32,
    pub step: i32,
    pub default_value: i32,
    pub default_mode: ColorControlMode,
}
