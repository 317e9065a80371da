//! C FFI layer for tofcam.
//!
//! Provides opaque handle-based API for C/C++ consumers.
//! The generated C header is written to `include/tofcam.h` by cbindgen.

use crate::device::Device;
use crate::error::LastError;
use crate::image::{Capture, Image, ImageKind};
use crate::playback::{DataBlock, Playback, SeekOrigin};
use crate::record::Recorder;
use crate::types::{
    ColorFormat, ColorResolution, DepthMode, DeviceConfiguration, Fps, ImuSample, WiredSyncMode,
};
use crate::TofcamError;
use std::ffi::{c_char, c_int, CStr, CString};
use std::time::Duration;

/// Last error message storage for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Opaque device handle for C consumers.
pub struct TcDevice {
    inner: Device,
    serial: CString,
    version: CString,
}

/// Opaque capture handle for C consumers.
pub struct TcCapture(Capture);

/// Opaque image handle for C consumers.
pub struct TcImage(Image);

/// Opaque recording writer handle for C consumers.
pub struct TcRecorder(Recorder);

/// Opaque playback handle for C consumers.
pub struct TcPlayback(Playback);

/// Opaque custom-track payload handle for C consumers.
pub struct TcDataBlock(DataBlock);

/// Device info in C-compatible layout.
#[repr(C)]
pub struct TcDeviceInfo {
    /// Null-terminated serial string.
    pub serial: [c_char; 64],
    /// Null-terminated firmware version string.
    pub version: [c_char; 128],
    /// Capability bitmap.
    pub capabilities: u32,
    /// USB bus identifier (first 64 chars).
    pub bus_id: [c_char; 64],
}

/// Capture configuration in C-compatible layout.
///
/// Enum fields use the same codes as the wire protocol:
/// `color_format` 0=MJPG 1=NV12 2=YUY2 3=BGRA32; `color_resolution`
/// 0=off 1=720p 2=1080p 3=1440p 4=1536p 5=2160p 6=3072p; `depth_mode`
/// 0=off 1=NFOV binned 2=NFOV unbinned 3=WFOV binned 4=WFOV unbinned
/// 5=passive IR; `camera_fps` 0=5 1=15 2=30; `wired_sync_mode`
/// 0=standalone 1=master 2=subordinate.
#[repr(C)]
pub struct TcDeviceConfiguration {
    pub color_format: c_int,
    pub color_resolution: c_int,
    pub depth_mode: c_int,
    pub camera_fps: c_int,
    pub synchronized_images_only: bool,
    pub depth_delay_off_color_usec: i32,
    pub wired_sync_mode: c_int,
    pub subordinate_delay_off_master_usec: u32,
    pub disable_streaming_indicator: bool,
}

/// IMU sample in C-compatible layout.
#[repr(C)]
pub struct TcImuSample {
    /// Accelerometer [x, y, z] in m/s^2.
    pub acc: [f32; 3],
    pub acc_timestamp_usec: u64,
    /// Gyroscope [x, y, z] in rad/s.
    pub gyro: [f32; 3],
    pub gyro_timestamp_usec: u64,
    pub temperature_c: f32,
}

fn str_to_fixed<const N: usize>(s: &str) -> [c_char; N] {
    let mut buf = [0 as c_char; N];
    let bytes = s.as_bytes();
    let len = bytes.len().min(N - 1);
    for (i, &b) in bytes[..len].iter().enumerate() {
        buf[i] = b as c_char;
    }
    buf
}

fn config_from_c(c: &TcDeviceConfiguration) -> Option<DeviceConfiguration> {
    Some(DeviceConfiguration {
        color_format: match c.color_format {
            0 => ColorFormat::Mjpg,
            1 => ColorFormat::Nv12,
            2 => ColorFormat::Yuy2,
            3 => ColorFormat::Bgra32,
            _ => return None,
        },
        color_resolution: match c.color_resolution {
            0 => ColorResolution::Off,
            1 => ColorResolution::R720p,
            2 => ColorResolution::R1080p,
            3 => ColorResolution::R1440p,
            4 => ColorResolution::R1536p,
            5 => ColorResolution::R2160p,
            6 => ColorResolution::R3072p,
            _ => return None,
        },
        depth_mode: match c.depth_mode {
            0 => DepthMode::Off,
            1 => DepthMode::NfovBinned,
            2 => DepthMode::NfovUnbinned,
            3 => DepthMode::WfovBinned,
            4 => DepthMode::WfovUnbinned,
            5 => DepthMode::PassiveIr,
            _ => return None,
        },
        camera_fps: match c.camera_fps {
            0 => Fps::F5,
            1 => Fps::F15,
            2 => Fps::F30,
            _ => return None,
        },
        synchronized_images_only: c.synchronized_images_only,
        depth_delay_off_color_usec: c.depth_delay_off_color_usec,
        wired_sync_mode: match c.wired_sync_mode {
            0 => WiredSyncMode::Standalone,
            1 => WiredSyncMode::Master,
            2 => WiredSyncMode::Subordinate,
            _ => return None,
        },
        subordinate_delay_off_master_usec: c.subordinate_delay_off_master_usec,
        disable_streaming_indicator: c.disable_streaming_indicator,
    })
}

fn bad_config() -> TofcamError {
    TofcamError::InvalidState("unrecognized configuration code".into())
}

fn imu_to_c(sample: &ImuSample) -> TcImuSample {
    TcImuSample {
        acc: sample.acc,
        acc_timestamp_usec: sample.acc_timestamp_usec,
        gyro: sample.gyro,
        gyro_timestamp_usec: sample.gyro_timestamp_usec,
        temperature_c: sample.temperature_c,
    }
}

/// The blocking-call timeout convention shared by every `*_get_*`
/// entry point: 0 = poll without blocking, negative = block until data
/// or stream failure, positive = wait that many milliseconds.
fn timeout_from_ms(timeout_ms: c_int) -> Option<Duration> {
    if timeout_ms < 0 {
        None
    } else {
        Some(Duration::from_millis(timeout_ms as u64))
    }
}

unsafe fn cstr_to_str<'a>(path: *const c_char) -> Option<&'a str> {
    if path.is_null() {
        return None;
    }
    CStr::from_ptr(path).to_str().ok()
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next tofcam API call.
#[no_mangle]
pub extern "C" fn tc_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

/// List connected TC-200 devices.
///
/// Writes up to `max` entries into `out`. Returns the number of devices
/// found, or -1 on error.
///
/// # Safety
/// `out` must point to an array of at least `max` `TcDeviceInfo`
/// elements, or be null.
#[no_mangle]
pub unsafe extern "C" fn tc_list_devices(out: *mut TcDeviceInfo, max: c_int) -> c_int {
    match crate::device::list_devices() {
        Ok(devices) => {
            let count = devices.len().min(max.max(0) as usize);
            if !out.is_null() {
                for (i, dev) in devices.iter().take(count).enumerate() {
                    let info = TcDeviceInfo {
                        serial: str_to_fixed(&dev.serial),
                        version: str_to_fixed(&dev.version),
                        capabilities: dev.capabilities.bits(),
                        bus_id: str_to_fixed(&dev.bus_id),
                    };
                    out.add(i).write(info);
                }
            }
            devices.len() as c_int
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Open the `index`-th connected TC-200.
/// Returns NULL on error (check tc_last_error()).
#[no_mangle]
pub extern "C" fn tc_device_open(index: u32) -> *mut TcDevice {
    match Device::open(index as usize) {
        Ok(dev) => {
            let serial = CString::new(dev.serial()).unwrap_or_default();
            let version = CString::new(dev.version()).unwrap_or_default();
            Box::into_raw(Box::new(TcDevice {
                inner: dev,
                serial,
                version,
            }))
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Close a device and free its resources. Stops any active streams.
///
/// # Safety
/// `dev` must be a pointer returned by `tc_device_open`, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_device_close(dev: *mut TcDevice) {
    if !dev.is_null() {
        drop(Box::from_raw(dev));
    }
}

/// Get the device serial as a null-terminated string valid for the
/// lifetime of the device.
///
/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_device_serial(dev: *const TcDevice) -> *const c_char {
    if dev.is_null() {
        return std::ptr::null();
    }
    (*dev).serial.as_ptr()
}

/// Get the firmware version as a null-terminated string valid for the
/// lifetime of the device.
///
/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_device_version(dev: *const TcDevice) -> *const c_char {
    if dev.is_null() {
        return std::ptr::null();
    }
    (*dev).version.as_ptr()
}

/// Get the device capability bitmap.
///
/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_device_capabilities(dev: *const TcDevice) -> u32 {
    if dev.is_null() {
        return 0;
    }
    (*dev).inner.capabilities().bits()
}

/// Start camera and IMU streaming. Returns 0 on success, -1 on error.
///
/// # Safety
/// `dev` and `config` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_device_start(
    dev: *mut TcDevice,
    config: *const TcDeviceConfiguration,
) -> c_int {
    if dev.is_null() || config.is_null() {
        return -1;
    }
    let config = match config_from_c(&*config) {
        Some(c) => c,
        None => {
            LAST_ERROR.set(&bad_config());
            return -1;
        }
    };
    match (*dev).inner.start(&config, None) {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Start streaming while mirroring every capture and IMU sample into
/// `recorder`. Ownership of the recorder passes to the device: the
/// pointer is invalid after this call regardless of the result, and the
/// recording is finalized by `tc_device_stop`/`tc_device_close`.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `dev` and `config` must be valid pointers; `recorder` must be a
/// pointer returned by `tc_recorder_create` not yet closed or consumed.
#[no_mangle]
pub unsafe extern "C" fn tc_device_start_recording(
    dev: *mut TcDevice,
    config: *const TcDeviceConfiguration,
    recorder: *mut TcRecorder,
) -> c_int {
    if dev.is_null() || config.is_null() || recorder.is_null() {
        return -1;
    }
    let recorder = Box::from_raw(recorder).0;
    let config = match config_from_c(&*config) {
        Some(c) => c,
        None => {
            LAST_ERROR.set(&bad_config());
            return -1;
        }
    };
    match (*dev).inner.start(&config, Some(recorder)) {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Stop all streams and finalize any bound recording.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `dev` must be a valid device pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_device_stop(dev: *mut TcDevice) -> c_int {
    if dev.is_null() {
        return -1;
    }
    match (*dev).inner.stop() {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Wait for the next capture.
/// `timeout_ms`: 0 = poll, negative = block forever, positive = wait.
/// On success writes a capture handle to `out` and returns 0; returns
/// -1 on error or timeout (check tc_last_error()).
///
/// # Safety
/// `dev` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_device_get_capture(
    dev: *mut TcDevice,
    out: *mut *mut TcCapture,
    timeout_ms: c_int,
) -> c_int {
    if dev.is_null() || out.is_null() {
        return -1;
    }
    match (*dev).inner.get_capture(timeout_from_ms(timeout_ms)) {
        Ok(capture) => {
            out.write(Box::into_raw(Box::new(TcCapture(capture))));
            0
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Wait for the next IMU sample. Same timeout convention as
/// `tc_device_get_capture`. Returns 0 on success, -1 on error/timeout.
///
/// # Safety
/// `dev` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_device_get_imu_sample(
    dev: *mut TcDevice,
    out: *mut TcImuSample,
    timeout_ms: c_int,
) -> c_int {
    if dev.is_null() || out.is_null() {
        return -1;
    }
    match (*dev).inner.get_imu_sample(timeout_from_ms(timeout_ms)) {
        Ok(sample) => {
            out.write(imu_to_c(&sample));
            0
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Get an image from a capture slot. `kind`: 0 = color, 1 = depth,
/// 2 = IR. Returns NULL when the slot is unbound or on error; the
/// returned image must be freed with `tc_image_release`.
///
/// # Safety
/// `cap` must be a valid capture pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_capture_get_image(cap: *const TcCapture, kind: c_int) -> *mut TcImage {
    if cap.is_null() {
        return std::ptr::null_mut();
    }
    let kind = match kind {
        0 => ImageKind::Color,
        1 => ImageKind::Depth,
        2 => ImageKind::Ir,
        _ => return std::ptr::null_mut(),
    };
    match (*cap).0.image(kind) {
        Ok(Some(image)) => Box::into_raw(Box::new(TcImage(image))),
        Ok(None) => std::ptr::null_mut(),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Device temperature of a capture in degrees Celsius, NaN when unknown.
///
/// # Safety
/// `cap` must be a valid capture pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_capture_temperature_c(cap: *const TcCapture) -> f32 {
    if cap.is_null() {
        return f32::NAN;
    }
    (*cap).0.temperature_c().unwrap_or(f32::NAN)
}

/// Release a capture handle.
///
/// # Safety
/// `cap` must be a pointer from `tc_device_get_capture` or
/// `tc_playback_get_next_capture`/`_previous_capture`, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_capture_release(cap: *mut TcCapture) {
    if !cap.is_null() {
        drop(Box::from_raw(cap));
    }
}

/// # Safety
/// `img` must be a valid image pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_image_width(img: *const TcImage) -> c_int {
    if img.is_null() {
        return 0;
    }
    (*img).0.width().unwrap_or(0) as c_int
}

/// # Safety
/// `img` must be a valid image pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_image_height(img: *const TcImage) -> c_int {
    if img.is_null() {
        return 0;
    }
    (*img).0.height().unwrap_or(0) as c_int
}

/// # Safety
/// `img` must be a valid image pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_image_stride(img: *const TcImage) -> c_int {
    if img.is_null() {
        return 0;
    }
    (*img).0.stride().unwrap_or(0) as c_int
}

/// Image format code, matching the container encoding: 0=MJPG 1=NV12
/// 2=YUY2 3=BGRA32 4=Depth16 5=IR16 6=custom. Returns -1 on error.
///
/// # Safety
/// `img` must be a valid image pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_image_format(img: *const TcImage) -> c_int {
    if img.is_null() {
        return -1;
    }
    match (*img).0.format() {
        Ok(format) => crate::record::format_code(format) as c_int,
        Err(_) => -1,
    }
}

/// # Safety
/// `img` must be a valid image pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_image_device_timestamp_usec(img: *const TcImage) -> u64 {
    if img.is_null() {
        return 0;
    }
    (*img).0.device_timestamp_usec().unwrap_or(0)
}

/// Get a pointer to the pixel bytes and write their length to
/// `out_size`. The pointer stays valid until the image is released.
/// Returns NULL on error.
///
/// # Safety
/// `img` and `out_size` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_image_buffer(img: *const TcImage, out_size: *mut usize) -> *const u8 {
    if img.is_null() || out_size.is_null() {
        return std::ptr::null();
    }
    match (*img).0.with_buffer(|buf| (buf.as_ptr(), buf.len())) {
        Ok((ptr, len)) => {
            out_size.write(len);
            ptr
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null()
        }
    }
}

/// Release an image handle.
///
/// # Safety
/// `img` must be a pointer from `tc_capture_get_image`, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_image_release(img: *mut TcImage) {
    if !img.is_null() {
        drop(Box::from_raw(img));
    }
}

/// Create a recording file. When `dev` is non-null its calibration blob
/// is embedded so playback can run transformations without hardware.
/// Returns NULL on error.
///
/// # Safety
/// `path` and `config` must be valid pointers; `dev` may be null.
#[no_mangle]
pub unsafe extern "C" fn tc_recorder_create(
    path: *const c_char,
    config: *const TcDeviceConfiguration,
    dev: *const TcDevice,
) -> *mut TcRecorder {
    let Some(path) = cstr_to_str(path) else {
        return std::ptr::null_mut();
    };
    if config.is_null() {
        return std::ptr::null_mut();
    }
    let config = match config_from_c(&*config) {
        Some(c) => c,
        None => {
            LAST_ERROR.set(&bad_config());
            return std::ptr::null_mut();
        }
    };

    let blob = if dev.is_null() {
        None
    } else {
        let required = match (*dev).inner.raw_calibration(&mut []) {
            Ok(n) => n,
            Err(TofcamError::BufferTooSmall { required }) => required,
            Err(e) => {
                LAST_ERROR.set(&e);
                return std::ptr::null_mut();
            }
        };
        let mut blob = vec![0u8; required];
        match (*dev).inner.raw_calibration(&mut blob) {
            Ok(n) => {
                blob.truncate(n);
                Some(blob)
            }
            Err(e) => {
                LAST_ERROR.set(&e);
                return std::ptr::null_mut();
            }
        }
    };

    match Recorder::create(path, &config, blob.as_deref()) {
        Ok(rec) => Box::into_raw(Box::new(TcRecorder(rec))),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Attach a name/value tag. Valid only before the header is written.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `rec`, `name` and `value` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_recorder_add_tag(
    rec: *mut TcRecorder,
    name: *const c_char,
    value: *const c_char,
) -> c_int {
    if rec.is_null() {
        return -1;
    }
    let (Some(name), Some(value)) = (cstr_to_str(name), cstr_to_str(value)) else {
        return -1;
    };
    match (*rec).0.add_tag(name, value) {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Register a custom data track. Valid only before the header is
/// written. Returns the track id, or -1 on error.
///
/// # Safety
/// `rec` and `name` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_recorder_add_custom_track(
    rec: *mut TcRecorder,
    name: *const c_char,
) -> c_int {
    if rec.is_null() {
        return -1;
    }
    let Some(name) = cstr_to_str(name) else {
        return -1;
    };
    match (*rec).0.add_custom_track(name) {
        Ok(id) => id as c_int,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Write the container header, freezing tags and tracks.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `rec` must be a valid recorder pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_recorder_write_header(rec: *mut TcRecorder) -> c_int {
    if rec.is_null() {
        return -1;
    }
    match (*rec).0.write_header() {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Append a payload to a custom track. Returns 0 on success, -1 on
/// error.
///
/// # Safety
/// `rec` must be a valid recorder pointer; `data` must point to `len`
/// readable bytes.
#[no_mangle]
pub unsafe extern "C" fn tc_recorder_write_custom_track_data(
    rec: *mut TcRecorder,
    track_id: u16,
    device_timestamp_usec: u64,
    data: *const u8,
    len: usize,
) -> c_int {
    if rec.is_null() || (data.is_null() && len > 0) {
        return -1;
    }
    let bytes = if len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(data, len)
    };
    match (*rec)
        .0
        .write_custom_track_data(track_id, device_timestamp_usec, bytes)
    {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Force written data to durable storage. Returns 0 on success, -1 on
/// error.
///
/// # Safety
/// `rec` must be a valid recorder pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_recorder_flush(rec: *mut TcRecorder) -> c_int {
    if rec.is_null() {
        return -1;
    }
    match (*rec).0.flush() {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Finalize the recording and free the handle. The pointer is invalid
/// after this call. Returns 0 on success, -1 on error.
///
/// # Safety
/// `rec` must be a pointer from `tc_recorder_create` not yet closed or
/// consumed by `tc_device_start_recording`, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_recorder_close(rec: *mut TcRecorder) -> c_int {
    if rec.is_null() {
        return -1;
    }
    match Box::from_raw(rec).0.close() {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Open a recording for playback. Returns NULL on error.
///
/// # Safety
/// `path` must be a valid null-terminated string pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_playback_open(path: *const c_char) -> *mut TcPlayback {
    let Some(path) = cstr_to_str(path) else {
        return std::ptr::null_mut();
    };
    match Playback::open(path) {
        Ok(pb) => Box::into_raw(Box::new(TcPlayback(pb))),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Close a playback handle.
///
/// # Safety
/// `pb` must be a pointer from `tc_playback_open`, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_playback_close(pb: *mut TcPlayback) {
    if !pb.is_null() {
        drop(Box::from_raw(pb));
    }
}

/// Total recorded duration in microseconds.
///
/// # Safety
/// `pb` must be a valid playback pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_playback_get_recording_length_usec(pb: *const TcPlayback) -> u64 {
    if pb.is_null() {
        return 0;
    }
    (*pb).0.recording_length_usec()
}

/// Reposition the read cursor. `origin`: 0 = begin, 1 = end.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `pb` must be a valid playback pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_playback_seek_timestamp(
    pb: *mut TcPlayback,
    offset_usec: i64,
    origin: c_int,
) -> c_int {
    if pb.is_null() {
        return -1;
    }
    let origin = match origin {
        0 => SeekOrigin::Begin,
        1 => SeekOrigin::End,
        _ => return -1,
    };
    match (*pb).0.seek_timestamp(offset_usec, origin) {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

unsafe fn playback_capture_result(
    result: crate::Result<Option<Capture>>,
    out: *mut *mut TcCapture,
) -> c_int {
    match result {
        Ok(Some(capture)) => {
            out.write(Box::into_raw(Box::new(TcCapture(capture))));
            0
        }
        Ok(None) => 1,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Read the next capture, advancing the cursor. Returns 0 on success,
/// 1 at end of stream (not an error), -1 on error.
///
/// # Safety
/// `pb` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_playback_get_next_capture(
    pb: *mut TcPlayback,
    out: *mut *mut TcCapture,
) -> c_int {
    if pb.is_null() || out.is_null() {
        return -1;
    }
    playback_capture_result((*pb).0.next_capture(), out)
}

/// Read the capture before the cursor, retreating it. Returns 0 on
/// success, 1 at the beginning of the stream, -1 on error.
///
/// # Safety
/// `pb` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_playback_get_previous_capture(
    pb: *mut TcPlayback,
    out: *mut *mut TcCapture,
) -> c_int {
    if pb.is_null() || out.is_null() {
        return -1;
    }
    playback_capture_result((*pb).0.previous_capture(), out)
}

unsafe fn playback_imu_result(
    result: crate::Result<Option<ImuSample>>,
    out: *mut TcImuSample,
) -> c_int {
    match result {
        Ok(Some(sample)) => {
            out.write(imu_to_c(&sample));
            0
        }
        Ok(None) => 1,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Read the next IMU sample. Returns 0 on success, 1 at end of stream,
/// -1 on error.
///
/// # Safety
/// `pb` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_playback_get_next_imu_sample(
    pb: *mut TcPlayback,
    out: *mut TcImuSample,
) -> c_int {
    if pb.is_null() || out.is_null() {
        return -1;
    }
    playback_imu_result((*pb).0.next_imu_sample(), out)
}

/// Read the previous IMU sample. Returns 0 on success, 1 at the
/// beginning of the stream, -1 on error.
///
/// # Safety
/// `pb` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_playback_get_previous_imu_sample(
    pb: *mut TcPlayback,
    out: *mut TcImuSample,
) -> c_int {
    if pb.is_null() || out.is_null() {
        return -1;
    }
    playback_imu_result((*pb).0.previous_imu_sample(), out)
}

unsafe fn playback_data_result(
    result: crate::Result<Option<DataBlock>>,
    out: *mut *mut TcDataBlock,
) -> c_int {
    match result {
        Ok(Some(block)) => {
            out.write(Box::into_raw(Box::new(TcDataBlock(block))));
            0
        }
        Ok(None) => 1,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Read the next payload of a custom track by name. Returns 0 on
/// success, 1 at end of track, -1 on error (including unknown tracks).
///
/// # Safety
/// `pb`, `track` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_playback_get_next_data_block(
    pb: *mut TcPlayback,
    track: *const c_char,
    out: *mut *mut TcDataBlock,
) -> c_int {
    if pb.is_null() || out.is_null() {
        return -1;
    }
    let Some(track) = cstr_to_str(track) else {
        return -1;
    };
    playback_data_result((*pb).0.next_data_block(track), out)
}

/// Read the previous payload of a custom track by name. Returns 0 on
/// success, 1 at the beginning of the track, -1 on error.
///
/// # Safety
/// `pb`, `track` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_playback_get_previous_data_block(
    pb: *mut TcPlayback,
    track: *const c_char,
    out: *mut *mut TcDataBlock,
) -> c_int {
    if pb.is_null() || out.is_null() {
        return -1;
    }
    let Some(track) = cstr_to_str(track) else {
        return -1;
    };
    playback_data_result((*pb).0.previous_data_block(track), out)
}

/// # Safety
/// `blk` must be a valid data block pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_data_block_device_timestamp_usec(blk: *const TcDataBlock) -> u64 {
    if blk.is_null() {
        return 0;
    }
    (*blk).0.device_timestamp_usec().unwrap_or(0)
}

/// Get a pointer to the payload bytes and write their length to
/// `out_size`. The pointer stays valid until the block is released.
/// Returns NULL on error.
///
/// # Safety
/// `blk` and `out_size` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn tc_data_block_buffer(
    blk: *const TcDataBlock,
    out_size: *mut usize,
) -> *const u8 {
    if blk.is_null() || out_size.is_null() {
        return std::ptr::null();
    }
    match (*blk).0.with_buffer(|buf| (buf.as_ptr(), buf.len())) {
        Ok((ptr, len)) => {
            out_size.write(len);
            ptr
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null()
        }
    }
}

/// Release a data block handle.
///
/// # Safety
/// `blk` must be a pointer from a `tc_playback_get_*_data_block` call,
/// or null.
#[no_mangle]
pub unsafe extern "C" fn tc_data_block_release(blk: *mut TcDataBlock) {
    if !blk.is_null() {
        drop(Box::from_raw(blk));
    }
}
