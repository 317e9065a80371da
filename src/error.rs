use std::fmt;

/// Errors that can occur when interacting with the TC-200 device or its
/// recording files.
///
/// End-of-stream is not an error: playback read operations return
/// `Ok(None)` at either boundary. Likewise a geometrically out-of-range
/// transform result is a successful call returning `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum TofcamError {
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device not found (VID=3DC4 PID=00C2)")]
    DeviceNotFound,

    #[error("Device is already opened by another handle")]
    DeviceBusy,

    #[error("Recording file not found")]
    FileNotFound,

    #[error("Handle used after release")]
    UseAfterFree,

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("Stream failure: {0}")]
    StreamFailure(String),

    #[error("IMU requires at least one camera stream running")]
    ImuRequiresCamera,

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Device command failed: {0}")]
    Command(String),

    #[error("Invalid response: expected prefix 0x01, got 0x{0:02x}")]
    InvalidResponse(u8),

    #[error("Command echo mismatch")]
    CommandMismatch,
}

impl TofcamError {
    /// Whether the caller can retry the failed operation in place.
    /// `StreamFailure` is terminal for the session: stop and reopen.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TofcamError::Timeout | TofcamError::BufferTooSmall { .. }
        )
    }
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &TofcamError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
