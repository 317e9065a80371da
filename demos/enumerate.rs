//! List all connected ToFCam TC-200 devices.

fn main() {
    env_logger::init();

    match tofcam::list_devices() {
        Ok(devices) => {
            println!("Found {} TC-200 device(s):", devices.len());
            for (i, dev) in devices.iter().enumerate() {
                println!(
                    "  [{}] Serial={}  FW={}  Caps={:?}  Bus={}",
                    i, dev.serial, dev.version, dev.capabilities, dev.bus_id
                );
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
