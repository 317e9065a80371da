//! # tofcam - Rust SDK for the ToFCam TC-200 RGBD+IMU depth camera
//!
//! Cross-platform driver using hidapi (control + IMU) and rusb (bulk
//! video). Provides:
//! - Device discovery and info queries (serial, firmware version, capabilities)
//! - Synchronized color/depth/IR capture streaming with IMU
//! - Calibration-driven coordinate transformations (pixels <-> metric 3D)
//! - Recording to and playback from the seekable TCRF container
//! - C FFI for integration with C/C++/Unity/Swift
//!
//! ## Quick Start
//! ```no_run
//! use tofcam::{ColorFormat, ColorResolution, DepthMode, Device, DeviceConfiguration};
//! use std::time::Duration;
//!
//! let device = Device::open_first().unwrap();
//! println!("serial: {}", device.serial());
//!
//! let config = DeviceConfiguration {
//!     color_format: ColorFormat::Bgra32,
//!     color_resolution: ColorResolution::R720p,
//!     depth_mode: DepthMode::NfovUnbinned,
//!     synchronized_images_only: true,
//!     ..Default::default()
//! };
//! device.start(&config, None).unwrap();
//! for _ in 0..100 {
//!     let capture = device.get_capture(Some(Duration::from_secs(1))).unwrap();
//!     if let Some(depth) = capture.depth_image().unwrap() {
//!         println!("depth {}x{}", depth.width().unwrap(), depth.height().unwrap());
//!         depth.release().unwrap();
//!     }
//!     capture.release().unwrap();
//! }
//! device.close().unwrap();
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod hid;
pub mod handle;
pub mod image;
pub mod calibration;
pub mod transform;
mod sync;
pub mod device;
pub mod record;
pub mod playback;
pub mod ffi;

pub use calibration::{Calibration, CameraCalibration, Extrinsics, Intrinsics, SensorFrame};
pub use device::{list_devices, Device};
pub use error::TofcamError;
pub use handle::Handle;
pub use image::{Capture, Image, ImageKind};
pub use playback::{DataBlock, Playback, SeekOrigin};
pub use record::Recorder;
pub use transform::Transformation;
pub use types::*;

/// Result type alias for tofcam operations.
pub type Result<T> = std::result::Result<T, TofcamError>;
