//! Record 5 seconds of synchronized captures and IMU to a TCRF file.
//!
//! Usage: cargo run --example record [output.tcrf]

use std::time::{Duration, Instant};
use tofcam::{
    ColorFormat, ColorResolution, DepthMode, Device, DeviceConfiguration, Recorder, TofcamError,
};

fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "capture.tcrf".into());

    let device = match Device::open_first() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to open device: {}", e);
            std::process::exit(1);
        }
    };

    let config = DeviceConfiguration {
        color_format: ColorFormat::Mjpg,
        color_resolution: ColorResolution::R1080p,
        depth_mode: DepthMode::NfovUnbinned,
        synchronized_images_only: true,
        ..Default::default()
    };

    // Embed the device calibration so playback can run transformations
    // without the hardware.
    let mut blob = vec![0u8; 64 * 1024];
    let blob = match device.raw_calibration(&mut blob) {
        Ok(n) => {
            blob.truncate(n);
            Some(blob)
        }
        Err(e) => {
            eprintln!("Calibration read failed: {} (recording without it)", e);
            None
        }
    };

    let mut recorder = match Recorder::create(&path, &config, blob.as_deref()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to create {}: {}", path, e);
            std::process::exit(1);
        }
    };
    recorder
        .add_tag("device_serial", device.serial())
        .expect("tags precede the header");

    if let Err(e) = device.start(&config, Some(recorder)) {
        eprintln!("Failed to start streaming: {}", e);
        std::process::exit(1);
    }

    println!("Recording to {} for 5 seconds...", path);

    let start = Instant::now();
    let mut count: u64 = 0;
    while start.elapsed() < Duration::from_secs(5) {
        match device.get_capture(Some(Duration::from_secs(2))) {
            Ok(capture) => {
                count += 1;
                let _ = capture.release();
            }
            Err(TofcamError::Timeout) => {
                eprintln!("Timeout waiting for captures");
                break;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    // stop() finalizes the recording before releasing the device.
    if let Err(e) = device.stop() {
        eprintln!("Stop failed: {}", e);
    }
    let _ = device.close();

    println!("Recorded {} captures to {}", count, path);
}
