//! Replay a TCRF recording: print its metadata, then walk the capture
//! and IMU streams.
//!
//! Usage: cargo run --example replay <recording.tcrf>

use tofcam::{Playback, SeekOrigin};

fn main() {
    env_logger::init();

    let path = match std::env::args().nth(1) {
        Some(p) => p,
        None => {
            eprintln!("Usage: replay <recording.tcrf>");
            std::process::exit(1);
        }
    };

    let mut playback = match Playback::open(&path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to open {}: {}", path, e);
            std::process::exit(1);
        }
    };

    let config = playback.record_configuration();
    println!("Recording:  {}", path);
    println!(
        "Config:     {:?} / {:?} @ {} fps",
        config.depth_mode,
        config.color_resolution,
        config.camera_fps.as_u32()
    );
    println!(
        "Length:     {:.3} s",
        playback.recording_length_usec() as f64 / 1e6
    );
    match playback.calibration() {
        Ok(cal) => println!(
            "Calibration: depth {}x{}, color {}x{}",
            cal.depth_camera.width,
            cal.depth_camera.height,
            cal.color_camera.width,
            cal.color_camera.height
        ),
        Err(e) => println!("Calibration: unavailable ({})", e),
    }
    println!();

    let mut captures: u64 = 0;
    loop {
        match playback.next_capture() {
            Ok(Some(capture)) => {
                captures += 1;
                if captures % 30 == 1 {
                    println!(
                        "capture {:>5}  ts={:?}",
                        captures,
                        capture.device_timestamp_usec().unwrap_or(None)
                    );
                }
                let _ = capture.release();
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("Read error: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut imu_samples: u64 = 0;
    while let Ok(Some(_)) = playback.next_imu_sample() {
        imu_samples += 1;
    }

    println!();
    println!("{} captures, {} IMU samples", captures, imu_samples);

    // Rewind and show the first capture again to demonstrate seeking.
    playback
        .seek_timestamp(0, SeekOrigin::Begin)
        .expect("seek to start");
    if let Ok(Some(first)) = playback.next_capture() {
        println!(
            "first capture after rewind: ts={:?}",
            first.device_timestamp_usec().unwrap_or(None)
        );
        let _ = first.release();
    }
}
