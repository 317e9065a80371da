//! Stream synchronized color/depth captures and IMU samples to stdout.
//!
//! Usage: cargo run --example stream
//! Press Ctrl+C to stop.

use std::time::{Duration, Instant};
use tofcam::{ColorFormat, ColorResolution, DepthMode, Device, DeviceConfiguration, TofcamError};

fn main() {
    env_logger::init();

    let device = match Device::open_first() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to open device: {}", e);
            std::process::exit(1);
        }
    };

    println!("Serial:  {}", device.serial());
    println!("Version: {}", device.version());
    println!("Caps:    {:?}", device.capabilities());
    println!();

    let config = DeviceConfiguration {
        color_format: ColorFormat::Bgra32,
        color_resolution: ColorResolution::R720p,
        depth_mode: DepthMode::NfovUnbinned,
        synchronized_images_only: true,
        ..Default::default()
    };
    if let Err(e) = device.start(&config, None) {
        eprintln!("Failed to start streaming: {}", e);
        std::process::exit(1);
    }

    println!("Streaming captures (Ctrl+C to stop)...");

    let start = Instant::now();
    let mut count: u64 = 0;
    let mut last_report = Instant::now();

    loop {
        match device.get_capture(Some(Duration::from_secs(2))) {
            Ok(capture) => {
                count += 1;

                // Print every ~30th capture to avoid flooding the terminal
                if count % 30 == 1 {
                    let dims = |img: Option<tofcam::Image>| match img {
                        Some(img) => {
                            let s = format!(
                                "{}x{}",
                                img.width().unwrap_or(0),
                                img.height().unwrap_or(0)
                            );
                            let _ = img.release();
                            s
                        }
                        None => "-".into(),
                    };
                    println!(
                        "ts={:<12}  color={}  depth={}  temp={:.1}C",
                        capture.device_timestamp_usec().unwrap_or(None).unwrap_or(0),
                        dims(capture.color_image().unwrap_or(None)),
                        dims(capture.depth_image().unwrap_or(None)),
                        capture.temperature_c().unwrap_or(f32::NAN),
                    );
                    if let Ok(imu) = device.get_imu_sample(Some(Duration::ZERO)) {
                        println!(
                            "  imu: acc=[{:+.2}, {:+.2}, {:+.2}] gyro=[{:+.3}, {:+.3}, {:+.3}]",
                            imu.acc[0], imu.acc[1], imu.acc[2],
                            imu.gyro[0], imu.gyro[1], imu.gyro[2],
                        );
                    }
                }
                let _ = capture.release();

                // Report rate every 3 seconds
                let now = Instant::now();
                if now.duration_since(last_report) >= Duration::from_secs(3) {
                    let elapsed = start.elapsed().as_secs_f64();
                    println!(
                        "--- {} captures in {:.1}s ({:.1} fps) ---",
                        count,
                        elapsed,
                        count as f64 / elapsed
                    );
                    last_report = now;
                }
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

    let _ = device.close();
}
