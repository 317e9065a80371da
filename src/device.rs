//! Device discovery, open/close and capture acquisition.
//!
//! One [`Device`] owns one open TC-200. Streaming runs on dedicated
//! reader threads: one bulk reader per enabled video endpoint, one
//! assembler grouping frames into captures, and one HID interrupt reader
//! for the IMU. Bounded crossbeam channels are the only cross-thread
//! queues; [`Device::get_capture`] and [`Device::get_imu_sample`] block
//! on them with an explicit timeout. A concurrent [`Device::stop`] or
//! [`Device::close`] disconnects the channels, which surfaces promptly
//! as `StreamFailure` in any blocked call.

use crate::handle::Slot;
use crate::hid::ControlTransport;
use crate::image::{Capture, CaptureInner};
use crate::protocol::{self, PID, VID};
use crate::record::Recorder;
use crate::sync::{
    enqueue_latest, CaptureAssembler, FrameAccumulator, RawFrame, IMU_SAMPLE_RATE_HZ,
};
use crate::types::{
    Capabilities, ColorControlCapabilities, ColorControlCommand, ColorControlMode,
    ColorResolution, DepthMode, DeviceConfiguration, DeviceInfo, ImuSample,
};
use crate::{Result, TofcamError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use hidapi::HidApi;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Check if a hidapi DeviceInfo matches the TC-200 control interface.
/// Interface 2 on Windows/Linux, -1 on macOS IOKit.
fn is_tc200_hid(d: &hidapi::DeviceInfo) -> bool {
    d.vendor_id() == VID
        && d.product_id() == PID
        && (d.interface_number() == protocol::HID_INTERFACE as i32 || d.interface_number() == -1)
}

fn create_hid_api() -> Result<HidApi> {
    let api = HidApi::new()?;
    #[cfg(target_os = "macos")]
    {
        // Keep HID opens shared on macOS to avoid seizing the interface.
        api.set_open_exclusive(false);
    }
    Ok(api)
}

/// List all connected TC-200 devices with their info.
///
/// Opens each device temporarily to read serial, version and
/// capabilities, then closes it.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let api = create_hid_api()?;
    let mut devices = Vec::new();

    for dev_info in api.device_list() {
        if !is_tc200_hid(dev_info) {
            continue;
        }

        match query_device_info(&api, dev_info) {
            Ok(info) => devices.push(info),
            Err(e) => {
                log::warn!("failed to query device at {:?}: {}", dev_info.path(), e);
            }
        }
    }

    Ok(devices)
}

fn query_device_info(api: &HidApi, hid_info: &hidapi::DeviceInfo) -> Result<DeviceInfo> {
    let device = api.open_path(hid_info.path())?;
    let hid = ControlTransport::new(device);
    Ok(DeviceInfo {
        serial: hid.read_serial()?,
        version: hid.read_version()?,
        capabilities: hid.read_capabilities()?,
        bus_id: hid_info.path().to_str().unwrap_or("").to_string(),
    })
}

struct ActiveStream {
    config: DeviceConfiguration,
    stop_flag: Arc<AtomicBool>,
    capture_rx: Receiver<Capture>,
    imu_rx: Option<Receiver<ImuSample>>,
    threads: Vec<std::thread::JoinHandle<()>>,
    recorder: Option<Arc<Mutex<Recorder>>>,
}

/// An opened TC-200 ready for queries, streaming and recording.
///
/// All methods take `&self`; the device can be shared behind an `Arc`
/// so one thread blocks in [`Self::get_capture`] while another issues
/// [`Self::stop`]. Acquisition itself is single-reader-per-stream: the
/// one long-lived capture wrapper is rebound on every read.
pub struct Device {
    api: Mutex<HidApi>,
    hid: Mutex<ControlTransport>,
    /// Path for opening a second handle for the IMU reader thread.
    device_path: std::ffi::CString,
    serial: String,
    version: String,
    capabilities: Capabilities,
    calibration_blob: Mutex<Option<Vec<u8>>>,
    stream: Mutex<Option<ActiveStream>>,
    capture_slot: Mutex<Slot<CaptureInner>>,
    closed: AtomicBool,
}

impl Device {
    /// Open the `index`-th connected TC-200 (enumeration order).
    pub fn open(index: usize) -> Result<Device> {
        let api = create_hid_api()?;

        let hid_info = api
            .device_list()
            .filter(|d| is_tc200_hid(d))
            .nth(index)
            .ok_or(TofcamError::DeviceNotFound)?;

        let device_path = hid_info.path().to_owned();
        let device = api
            .open_path(&device_path)
            .map_err(|_| TofcamError::DeviceBusy)?;
        let hid = ControlTransport::new(device);

        let serial = hid.read_serial()?;
        let version = hid.read_version()?;
        let capabilities = hid.read_capabilities()?;

        log::info!(
            "opened TC-200: serial={} version={} caps={:?}",
            serial,
            version,
            capabilities
        );

        Ok(Device {
            api: Mutex::new(api),
            hid: Mutex::new(hid),
            device_path,
            serial,
            version,
            capabilities,
            calibration_blob: Mutex::new(None),
            stream: Mutex::new(None),
            capture_slot: Mutex::new(Slot::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Open the first available TC-200.
    pub fn open_first() -> Result<Device> {
        Self::open(0)
    }

    /// Get the device serial string.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Get the firmware version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get the device capability flags.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Copy the raw factory calibration blob into `buf`, returning the
    /// blob size. Fails `BufferTooSmall` with the required size when
    /// `buf` cannot hold it.
    pub fn raw_calibration(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let blob = self.calibration_blob_bytes()?;
        if buf.len() < blob.len() {
            return Err(TofcamError::BufferTooSmall {
                required: blob.len(),
            });
        }
        buf[..blob.len()].copy_from_slice(&blob);
        Ok(blob.len())
    }

    /// Retrieve the calibration bound to one mode pair. The result is
    /// only meaningful for streams started with the same pair.
    pub fn calibration(
        &self,
        depth_mode: DepthMode,
        color_resolution: ColorResolution,
    ) -> Result<crate::Calibration> {
        self.check_open()?;
        let blob = self.calibration_blob_bytes()?;
        crate::Calibration::from_raw(&blob, depth_mode, color_resolution)
    }

    fn calibration_blob_bytes(&self) -> Result<Vec<u8>> {
        let mut cache = self
            .calibration_blob
            .lock()
            .expect("calibration cache poisoned");
        if cache.is_none() {
            let blob = self
                .hid
                .lock()
                .expect("hid transport poisoned")
                .read_calibration_blob()?;
            *cache = Some(blob);
        }
        Ok(cache.as_ref().expect("just filled").clone())
    }

    /// Start color/depth streaming per `config`, then the IMU.
    ///
    /// A `recorder` handed in here mirrors every assembled capture and
    /// IMU sample to disk until [`Self::stop`]; its header is written
    /// now if it has not been already. The configuration is immutable
    /// while streaming.
    pub fn start(&self, config: &DeviceConfiguration, recorder: Option<Recorder>) -> Result<()> {
        self.check_open()?;
        config.validate()?;

        let mut stream = self.stream.lock().expect("stream state poisoned");
        if stream.is_some() {
            return Err(TofcamError::InvalidState(
                "streaming already started".into(),
            ));
        }

        let recorder = match recorder {
            Some(mut rec) => {
                rec.ensure_header()?;
                Some(Arc::new(Mutex::new(rec)))
            }
            None => None,
        };

        let usb = open_usb_handle()?;
        self.hid
            .lock()
            .expect("hid transport poisoned")
            .start_cameras(config)?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<RawFrame>(8);
        let (capture_tx, capture_rx) = crossbeam_channel::bounded::<Capture>(4);

        let mut threads = Vec::new();
        if config.depth_mode != DepthMode::Off {
            threads.push(spawn_bulk_reader(
                "tofcam-depth",
                usb.clone(),
                protocol::DEPTH_ENDPOINT,
                frame_tx.clone(),
                stop_flag.clone(),
            )?);
        }
        if config.color_resolution != ColorResolution::Off {
            threads.push(spawn_bulk_reader(
                "tofcam-color",
                usb.clone(),
                protocol::COLOR_ENDPOINT,
                frame_tx.clone(),
                stop_flag.clone(),
            )?);
        }
        // The assembler holds the only remaining sender clone; when the
        // readers exit, its recv sees the disconnect.
        drop(frame_tx);

        let assembler_config = config.clone();
        let assembler_recorder = recorder.clone();
        let assembler_stop = stop_flag.clone();
        let assembler_rx = capture_rx.clone();
        threads.push(
            std::thread::Builder::new()
                .name("tofcam-assemble".into())
                .spawn(move || {
                    assemble_loop(
                        assembler_config,
                        frame_rx,
                        capture_tx,
                        assembler_rx,
                        assembler_recorder,
                        assembler_stop,
                    );
                })
                .map_err(|e| {
                    TofcamError::StreamFailure(format!("failed to spawn assembler thread: {}", e))
                })?,
        );

        *stream = Some(ActiveStream {
            config: config.clone(),
            stop_flag,
            capture_rx,
            imu_rx: None,
            threads,
            recorder,
        });
        drop(stream);

        // Cameras are running; bring up the inertial stream too.
        self.start_imu()
    }

    /// Start the IMU stream. Requires a running camera stream; fails
    /// `ImuRequiresCamera` otherwise. No-op when already running.
    pub fn start_imu(&self) -> Result<()> {
        self.check_open()?;
        let mut guard = self.stream.lock().expect("stream state poisoned");
        let stream = guard.as_mut().ok_or(TofcamError::ImuRequiresCamera)?;
        if stream.imu_rx.is_some() {
            return Ok(());
        }

        self.hid
            .lock()
            .expect("hid transport poisoned")
            .start_imu()?;

        // Second HID handle so the interrupt reader does not contend
        // with control transactions.
        let imu_device = {
            let api = self.api.lock().expect("hid api poisoned");
            api.open_path(&self.device_path)
                .map_err(|_| TofcamError::DeviceBusy)?
        };

        let capacity = imu_queue_capacity(&stream.config);
        let (imu_tx, imu_rx) = crossbeam_channel::bounded::<ImuSample>(capacity);
        let stop = stream.stop_flag.clone();
        let recorder = stream.recorder.clone();
        let rx_clone = imu_rx.clone();
        stream.threads.push(
            std::thread::Builder::new()
                .name("tofcam-imu".into())
                .spawn(move || {
                    imu_reader_loop(imu_device, imu_tx, rx_clone, recorder, stop);
                })
                .map_err(|e| {
                    TofcamError::StreamFailure(format!("failed to spawn IMU thread: {}", e))
                })?,
        );
        stream.imu_rx = Some(imu_rx);
        Ok(())
    }

    /// Wait up to `timeout` for the next capture. `Some(ZERO)` polls,
    /// `None` blocks until data arrives or the stream dies.
    ///
    /// `Timeout` is recoverable; `StreamFailure` means the stream is
    /// gone and the device must be stopped (or was stopped concurrently).
    pub fn get_capture(&self, timeout: Option<Duration>) -> Result<Capture> {
        self.check_open()?;
        let rx = {
            let guard = self.stream.lock().expect("stream state poisoned");
            let stream = guard
                .as_ref()
                .ok_or_else(|| TofcamError::InvalidState("streaming not started".into()))?;
            stream.capture_rx.clone()
        };
        let capture = recv_with_timeout(&rx, timeout)?;
        // Rebind the device's long-lived wrapper: the previous frame's
        // handle is released before the new one is installed.
        self.capture_slot
            .lock()
            .expect("capture slot poisoned")
            .rebind(capture.acquire()?.into_handle());
        Ok(capture)
    }

    /// Wait up to `timeout` for the next IMU sample. Same timeout and
    /// failure semantics as [`Self::get_capture`]. The device buffers at
    /// least two capture-intervals of samples; under backpressure the
    /// oldest is dropped first.
    pub fn get_imu_sample(&self, timeout: Option<Duration>) -> Result<ImuSample> {
        self.check_open()?;
        let rx = {
            let guard = self.stream.lock().expect("stream state poisoned");
            let stream = guard
                .as_ref()
                .ok_or_else(|| TofcamError::InvalidState("streaming not started".into()))?;
            stream
                .imu_rx
                .as_ref()
                .ok_or_else(|| TofcamError::InvalidState("IMU not started".into()))?
                .clone()
        };
        recv_with_timeout(&rx, timeout)
    }

    /// Read one color control's current mode and value.
    pub fn get_color_control(
        &self,
        command: ColorControlCommand,
    ) -> Result<(ColorControlMode, i32)> {
        self.check_open()?;
        self.hid
            .lock()
            .expect("hid transport poisoned")
            .get_color_control(command)
    }

    pub fn set_color_control(
        &self,
        command: ColorControlCommand,
        mode: ColorControlMode,
        value: i32,
    ) -> Result<()> {
        self.check_open()?;
        self.hid
            .lock()
            .expect("hid transport poisoned")
            .set_color_control(command, mode, value)
    }

    /// Read the device-reported range for one color control.
    pub fn get_color_control_capabilities(
        &self,
        command: ColorControlCommand,
    ) -> Result<ColorControlCapabilities> {
        self.check_open()?;
        self.hid
            .lock()
            .expect("hid transport poisoned")
            .get_color_control_capabilities(command)
    }

    /// Stop IMU and camera streaming and finalize any bound recording.
    /// Idempotent; safe to call from another thread while a blocking
    /// read is in flight.
    pub fn stop(&self) -> Result<()> {
        let stream = self.stream.lock().expect("stream state poisoned").take();
        let Some(mut stream) = stream else {
            return Ok(());
        };

        stream.stop_flag.store(true, Ordering::Relaxed);
        for thread in stream.threads.drain(..) {
            let _ = thread.join();
        }

        // IMU first, then cameras, mirroring the start order in reverse.
        let hid = self.hid.lock().expect("hid transport poisoned");
        if stream.imu_rx.is_some() {
            if let Err(e) = hid.stop_imu() {
                log::warn!("stop imu failed: {}", e);
            }
        }
        if let Err(e) = hid.stop_cameras() {
            log::warn!("stop cameras failed: {}", e);
        }
        drop(hid);

        if let Some(recorder) = stream.recorder {
            match Arc::try_unwrap(recorder) {
                Ok(mutex) => {
                    let rec = mutex.into_inner().unwrap_or_else(|p| p.into_inner());
                    if let Err(e) = rec.close() {
                        log::warn!("recording close failed: {}", e);
                    }
                }
                // Reader threads are joined, so this cannot happen; the
                // recorder's Drop still finalizes the file if it does.
                Err(_) => log::warn!("recorder still referenced at stop"),
            }
        }

        log::info!("stopped streaming on {}", self.serial);
        Ok(())
    }

    /// Stop all streams and release the device. Idempotent; any later
    /// call through this handle fails `UseAfterFree`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.stop();
        self.capture_slot
            .lock()
            .expect("capture slot poisoned")
            .clear();
        log::info!("closed TC-200 {}", self.serial);
        result
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TofcamError::UseAfterFree);
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("device close on drop failed: {}", e);
        }
    }
}

/// Receive from a stream channel with the shared timeout contract:
/// `Some(ZERO)` polls, `Some(d)` waits up to `d`, `None` blocks. A
/// disconnected channel means the reader threads are gone (stop, close
/// or a fatal stream error) and surfaces as `StreamFailure`.
fn recv_with_timeout<T>(rx: &Receiver<T>, timeout: Option<Duration>) -> Result<T> {
    fn stopped() -> TofcamError {
        TofcamError::StreamFailure("stream stopped".into())
    }
    match timeout {
        None => rx.recv().map_err(|_| stopped()),
        Some(t) if t.is_zero() => rx.try_recv().map_err(|e| match e {
            TryRecvError::Empty => TofcamError::Timeout,
            TryRecvError::Disconnected => stopped(),
        }),
        Some(t) => rx.recv_timeout(t).map_err(|e| match e {
            RecvTimeoutError::Timeout => TofcamError::Timeout,
            RecvTimeoutError::Disconnected => stopped(),
        }),
    }
}

/// IMU queue depth: at least two capture-intervals of samples.
fn imu_queue_capacity(config: &DeviceConfiguration) -> usize {
    let per_interval = IMU_SAMPLE_RATE_HZ * config.camera_fps.period_usec() / 1_000_000;
    (2 * per_interval).max(16) as usize
}

fn open_usb_handle() -> Result<Arc<rusb::DeviceHandle<rusb::GlobalContext>>> {
    let devices = rusb::devices()?;
    let device = devices
        .iter()
        .find(|d| {
            d.device_descriptor()
                .map(|desc| desc.vendor_id() == VID && desc.product_id() == PID)
                .unwrap_or(false)
        })
        .ok_or(TofcamError::DeviceNotFound)?;

    let handle = device.open().map_err(|e| match e {
        rusb::Error::Busy | rusb::Error::Access => TofcamError::DeviceBusy,
        e => TofcamError::Usb(e),
    })?;
    match handle.claim_interface(protocol::VIDEO_INTERFACE) {
        Ok(()) => {}
        Err(rusb::Error::Busy) => return Err(TofcamError::DeviceBusy),
        Err(e) => return Err(TofcamError::Usb(e)),
    }
    Ok(Arc::new(handle))
}

fn spawn_bulk_reader(
    name: &str,
    handle: Arc<rusb::DeviceHandle<rusb::GlobalContext>>,
    endpoint: u8,
    tx: Sender<RawFrame>,
    stop: Arc<AtomicBool>,
) -> Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            bulk_reader_loop(handle, endpoint, tx, stop);
        })
        .map_err(|e| TofcamError::StreamFailure(format!("failed to spawn bulk reader: {}", e)))
}

fn system_timestamp_nsec() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// One bulk reader per enabled video endpoint. Transfer chunks carry no
/// frame alignment; the accumulator restores it.
fn bulk_reader_loop(
    handle: Arc<rusb::DeviceHandle<rusb::GlobalContext>>,
    endpoint: u8,
    tx: Sender<RawFrame>,
    stop: Arc<AtomicBool>,
) {
    let mut accumulator = FrameAccumulator::new();
    let mut buf = vec![0u8; 256 * 1024];

    log::info!("bulk reader started (endpoint 0x{:02x})", endpoint);

    loop {
        if stop.load(Ordering::Relaxed) {
            log::info!("bulk reader 0x{:02x} stopping (stop flag set)", endpoint);
            break;
        }

        // 100ms transfer timeout to periodically check the stop flag.
        let len = match handle.read_bulk(endpoint, &mut buf, Duration::from_millis(100)) {
            Ok(n) => n,
            Err(rusb::Error::Timeout) => continue,
            Err(e) => {
                // Fatal transport error: exiting drops the sender, which
                // disconnects consumers into StreamFailure.
                log::warn!("bulk read failed on 0x{:02x}: {}", endpoint, e);
                break;
            }
        };

        let received_at = system_timestamp_nsec();
        for frame in accumulator.feed(&buf[..len], received_at) {
            if tx.send(frame).is_err() {
                log::info!("frame channel disconnected, stopping reader 0x{:02x}", endpoint);
                return;
            }
        }
    }
}

/// Groups raw frames into captures, mirrors them to a bound recording
/// and hands them to the consumer queue (newest-wins on backpressure).
fn assemble_loop(
    config: DeviceConfiguration,
    frame_rx: Receiver<RawFrame>,
    capture_tx: Sender<Capture>,
    capture_rx: Receiver<Capture>,
    recorder: Option<Arc<Mutex<Recorder>>>,
    stop: Arc<AtomicBool>,
) {
    let mut assembler = CaptureAssembler::new(&config);
    log::info!("capture assembler started");

    loop {
        if stop.load(Ordering::Relaxed) {
            log::info!("capture assembler stopping (stop flag set)");
            break;
        }

        let frame = match frame_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("frame readers gone, stopping assembler");
                break;
            }
        };

        for capture in assembler.push_frame(frame) {
            if let Some(rec) = &recorder {
                let mut rec = rec.lock().unwrap_or_else(|p| p.into_inner());
                if let Err(e) = rec.write_capture(&capture) {
                    log::warn!("recording capture failed: {}", e);
                }
            }
            if !enqueue_latest(&capture_tx, &capture_rx, capture) {
                log::info!("capture channel disconnected, stopping assembler");
                return;
            }
        }
    }
}

/// IMU interrupt reader on its own HID handle.
fn imu_reader_loop(
    device: hidapi::HidDevice,
    tx: Sender<ImuSample>,
    rx: Receiver<ImuSample>,
    recorder: Option<Arc<Mutex<Recorder>>>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 64];

    log::info!("IMU reader started");

    loop {
        if stop.load(Ordering::Relaxed) {
            log::info!("IMU reader stopping (stop flag set)");
            break;
        }

        // read_timeout: 100ms to periodically check the stop flag.
        let len = match device.read_timeout(&mut buf, 100) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) => {
                log::warn!("IMU read error: {}", e);
                break;
            }
        };

        // Control responses share the interrupt pipe; parse_imu_packet
        // rejects anything without the IMU echo.
        if let Some(sample) = protocol::parse_imu_packet(&buf[..len]) {
            if let Some(rec) = &recorder {
                let mut rec = rec.lock().unwrap_or_else(|p| p.into_inner());
                if let Err(e) = rec.write_imu_sample(&sample) {
                    log::warn!("recording IMU sample failed: {}", e);
                }
            }
            if !enqueue_latest(&tx, &rx, sample) {
                log::info!("IMU channel disconnected, stopping reader");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Fps;
    use std::time::Instant;

    #[test]
    fn poll_with_empty_queue_times_out_immediately() {
        let (_tx, rx) = crossbeam_channel::bounded::<u32>(1);
        let start = Instant::now();
        let err = recv_with_timeout(&rx, Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, TofcamError::Timeout));
        // Polling must not stall for anything near a frame period.
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[test]
    fn bounded_wait_reports_timeout() {
        let (_tx, rx) = crossbeam_channel::bounded::<u32>(1);
        let err = recv_with_timeout(&rx, Some(Duration::from_millis(5))).unwrap_err();
        assert!(matches!(err, TofcamError::Timeout));
    }

    #[test]
    fn disconnect_surfaces_as_stream_failure_not_deadlock() {
        let (tx, rx) = crossbeam_channel::bounded::<u32>(1);
        drop(tx);
        // Even an infinite wait returns promptly once the stream is gone.
        let err = recv_with_timeout(&rx, None).unwrap_err();
        assert!(matches!(err, TofcamError::StreamFailure(_)));
        let err = recv_with_timeout(&rx, Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, TofcamError::StreamFailure(_)));
    }

    #[test]
    fn delivered_values_pass_through() {
        let (tx, rx) = crossbeam_channel::bounded::<u32>(1);
        tx.send(42).unwrap();
        assert_eq!(recv_with_timeout(&rx, Some(Duration::ZERO)).unwrap(), 42);
    }

    #[test]
    fn imu_queue_spans_two_capture_intervals() {
        let config = DeviceConfiguration {
            camera_fps: Fps::F30,
            ..Default::default()
        };
        // 1600 Hz over two 33ms intervals.
        assert!(imu_queue_capacity(&config) >= 100);

        let config = DeviceConfiguration {
            camera_fps: Fps::F5,
            ..Default::default()
        };
        assert!(imu_queue_capacity(&config) >= 600);
    }
}
