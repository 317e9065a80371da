//! Capture assembly from per-stream frames.
//!
//! Reader threads feed raw frames into a [`CaptureAssembler`], which
//! groups color/depth/IR frames sharing one exposure window into
//! [`Capture`]s and enforces the delivery contract: captures surface in
//! monotonically non-decreasing device-timestamp order, and the
//! synchronization policy decides what happens when a modality is late.
//!
//! With `synchronized_images_only`, a capture is surfaced only once all
//! expected modalities from the same window arrived; windows whose
//! partner never shows are dropped. Without it, an incomplete capture is
//! surfaced once its partner is more than [`STALE_PARTNER_PERIODS`]
//! frame periods late, trading completeness for latency.

use crate::image::{Capture, Image, ImageKind};
use crate::protocol::{FrameHeader, StreamKind};
use crate::types::{DeviceConfiguration, ImageFormat};
use crossbeam_channel::{Receiver, Sender, TrySendError};

/// How many frame periods a window may wait for a missing modality
/// before it is retired (surfaced or dropped per the sync policy).
pub(crate) const STALE_PARTNER_PERIODS: u64 = 2;

/// Nominal IMU output rate, used to size sample buffering.
pub(crate) const IMU_SAMPLE_RATE_HZ: u64 = 1600;

/// A frame as read off a bulk endpoint.
pub(crate) struct RawFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
    pub system_timestamp_nsec: u64,
}

struct Window {
    timestamp_usec: u64,
    color: Option<Image>,
    depth: Option<Image>,
    ir: Option<Image>,
    temperature_c: f32,
}

impl Window {
    fn new(timestamp_usec: u64) -> Window {
        Window {
            timestamp_usec,
            color: None,
            depth: None,
            ir: None,
            temperature_c: f32::NAN,
        }
    }

    fn has_any(&self) -> bool {
        self.color.is_some() || self.depth.is_some() || self.ir.is_some()
    }
}

pub(crate) struct CaptureAssembler {
    synchronized_only: bool,
    expect_color: bool,
    expect_depth: bool,
    expect_ir: bool,
    period_usec: u64,
    pairing_tolerance_usec: u64,
    color_format: ImageFormat,
    /// Pending windows ordered by timestamp.
    windows: Vec<Window>,
    latest_seen_usec: u64,
    last_emitted_usec: u64,
}

impl CaptureAssembler {
    pub fn new(config: &DeviceConfiguration) -> CaptureAssembler {
        let period = config.camera_fps.period_usec();
        CaptureAssembler {
            synchronized_only: config.synchronized_images_only,
            expect_color: config.color_resolution != crate::types::ColorResolution::Off,
            expect_depth: config.depth_mode.has_depth(),
            expect_ir: config.depth_mode != crate::types::DepthMode::Off,
            period_usec: period,
            pairing_tolerance_usec: period / 2,
            color_format: config.color_format.into(),
            windows: Vec::new(),
            latest_seen_usec: 0,
            last_emitted_usec: 0,
        }
    }

    /// Feed one raw frame; returns any captures that became ready.
    pub fn push_frame(&mut self, frame: RawFrame) -> Vec<Capture> {
        let ts = frame.header.device_timestamp_usec;
        let kind = frame.header.kind;
        let temperature_c = frame.header.temperature_c;
        let image = image_from_frame(frame, self.color_format);

        let idx = match self
            .windows
            .iter()
            .position(|w| w.timestamp_usec.abs_diff(ts) <= self.pairing_tolerance_usec)
        {
            Some(idx) => idx,
            None => {
                let idx = self
                    .windows
                    .iter()
                    .position(|w| w.timestamp_usec > ts)
                    .unwrap_or(self.windows.len());
                self.windows.insert(idx, Window::new(ts));
                idx
            }
        };
        let window = &mut self.windows[idx];

        match kind {
            StreamKind::Color => window.color = Some(image),
            StreamKind::Depth => {
                window.temperature_c = temperature_c;
                window.depth = Some(image);
            }
            StreamKind::Ir => {
                if window.temperature_c.is_nan() {
                    window.temperature_c = temperature_c;
                }
                window.ir = Some(image);
            }
        }

        self.latest_seen_usec = self.latest_seen_usec.max(ts);
        self.drain_ready()
    }

    fn is_complete(&self, window: &Window) -> bool {
        (!self.expect_color || window.color.is_some())
            && (!self.expect_depth || window.depth.is_some())
            && (!self.expect_ir || window.ir.is_some())
    }

    /// Release windows in timestamp order. A window leaves the queue
    /// when complete, or when the stream has moved past the staleness
    /// bound; emission stops at the first window that is neither, so
    /// output order stays monotonic.
    fn drain_ready(&mut self) -> Vec<Capture> {
        let stale_cutoff = self
            .latest_seen_usec
            .saturating_sub(STALE_PARTNER_PERIODS * self.period_usec);

        let mut ready = Vec::new();
        while !self.windows.is_empty() {
            let complete = self.is_complete(&self.windows[0]);
            let stale = self.windows[0].timestamp_usec < stale_cutoff;
            if !complete && !stale {
                break;
            }
            let window = self.windows.remove(0);
            if !complete && self.synchronized_only {
                log::debug!(
                    "dropping unpaired capture window at {} us",
                    window.timestamp_usec
                );
                continue;
            }
            if !window.has_any() {
                continue;
            }
            // A frame that shows up after its window's successors were
            // already delivered would break ordering; drop it.
            if window.timestamp_usec < self.last_emitted_usec {
                log::debug!(
                    "dropping late capture window at {} us (already past {} us)",
                    window.timestamp_usec,
                    self.last_emitted_usec
                );
                continue;
            }
            self.last_emitted_usec = window.timestamp_usec;
            ready.push(build_capture(window));
        }
        ready
    }
}

fn image_from_frame(frame: RawFrame, color_format: ImageFormat) -> Image {
    let header = frame.header;
    let (format, stride) = match header.kind {
        StreamKind::Color => {
            let stride = if color_format == ImageFormat::ColorMjpg {
                0
            } else {
                header.width as u32 * color_format.bytes_per_pixel() as u32
            };
            (color_format, stride)
        }
        StreamKind::Depth => (ImageFormat::Depth16, header.width as u32 * 2),
        StreamKind::Ir => (ImageFormat::Ir16, header.width as u32 * 2),
    };

    let image = Image::from_buffer(
        format,
        header.width as u32,
        header.height as u32,
        stride,
        frame.payload,
    );
    // Freshly created images always accept metadata.
    let _ = image.set_device_timestamp_usec(header.device_timestamp_usec);
    let _ = image.set_system_timestamp_nsec(frame.system_timestamp_nsec);
    if header.kind == StreamKind::Color {
        let _ = image.set_exposure_usec(header.exposure_usec as u64);
        let _ = image.set_white_balance_k(header.white_balance_k as u32);
        let _ = image.set_iso_speed(header.iso_speed as u32);
    }
    image
}

fn build_capture(window: Window) -> Capture {
    let capture = Capture::new();
    if let Some(color) = window.color {
        let _ = capture.set_image(ImageKind::Color, color);
    }
    if let Some(depth) = window.depth {
        let _ = capture.set_image(ImageKind::Depth, depth);
    }
    if let Some(ir) = window.ir {
        let _ = capture.set_image(ImageKind::Ir, ir);
    }
    let _ = capture.set_temperature_c(window.temperature_c);
    capture
}

/// Reassembles frames from a bulk endpoint's transfer chunks. A frame
/// header and its payload may arrive split across any number of
/// transfers; chunk boundaries carry no meaning.
pub(crate) struct FrameAccumulator {
    buffer: Vec<u8>,
}

impl FrameAccumulator {
    pub fn new() -> FrameAccumulator {
        FrameAccumulator { buffer: Vec::new() }
    }

    /// Feed one transfer's bytes; returns every frame completed by it.
    pub fn feed(&mut self, chunk: &[u8], system_timestamp_nsec: u64) -> Vec<RawFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let header = match crate::protocol::parse_frame_header(&self.buffer) {
                Some(h) => h,
                None => {
                    if self.buffer.len() >= crate::protocol::FRAME_HEADER_SIZE {
                        // Lost sync with the stream; drop to the next
                        // plausible header start.
                        log::warn!("frame stream desync, dropping {} bytes", self.buffer.len());
                        self.buffer.clear();
                    }
                    break;
                }
            };
            let total = crate::protocol::FRAME_HEADER_SIZE + header.payload_len as usize;
            if self.buffer.len() < total {
                break;
            }
            let payload =
                self.buffer[crate::protocol::FRAME_HEADER_SIZE..total].to_vec();
            self.buffer.drain(..total);
            frames.push(RawFrame {
                header,
                payload,
                system_timestamp_nsec,
            });
        }
        frames
    }
}

/// Push into a bounded channel with a newest-wins drop policy: when the
/// queue is full, the oldest entry is discarded to make room. Returns
/// false when the channel is disconnected.
pub(crate) fn enqueue_latest<T>(tx: &Sender<T>, rx: &Receiver<T>, item: T) -> bool {
    match tx.try_send(item) {
        Ok(()) => true,
        Err(TrySendError::Full(item)) => {
            let _ = rx.try_recv();
            match tx.try_send(item) {
                Ok(()) => {
                    log::trace!("queue full, dropped oldest sample");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
                // Another producer refilled the slot; drop the new item
                // rather than block the reader loop.
                Err(TrySendError::Full(_)) => true,
            }
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FRAME_HEADER_SIZE;
    use crate::types::{ColorFormat, ColorResolution, DepthMode, Fps};

    fn config(synchronized: bool) -> DeviceConfiguration {
        DeviceConfiguration {
            color_format: ColorFormat::Bgra32,
            color_resolution: ColorResolution::R720p,
            depth_mode: DepthMode::NfovUnbinned,
            camera_fps: Fps::F30,
            synchronized_images_only: synchronized,
            ..Default::default()
        }
    }

    fn frame(kind: StreamKind, ts: u64) -> RawFrame {
        let (w, h): (u16, u16) = match kind {
            StreamKind::Color => (8, 4),
            _ => (4, 4),
        };
        let bpp = match kind {
            StreamKind::Color => 4,
            _ => 2,
        };
        RawFrame {
            header: FrameHeader {
                kind,
                sequence: 0,
                device_timestamp_usec: ts,
                exposure_usec: 8_000,
                white_balance_k: 4500,
                iso_speed: 100,
                width: w,
                height: h,
                temperature_c: 23.0,
                payload_len: (w as u32 * h as u32 * bpp) as u32,
            },
            payload: vec![1u8; (w as u32 * h as u32 * bpp) as usize],
            system_timestamp_nsec: ts * 1_000,
        }
    }

    const PERIOD: u64 = 33_333;

    #[test]
    fn synchronized_pair_surfaces_once_complete() {
        let mut asm = CaptureAssembler::new(&config(true));
        assert!(asm.push_frame(frame(StreamKind::Color, 1_000)).is_empty());
        assert!(asm.push_frame(frame(StreamKind::Depth, 1_200)).is_empty());
        let ready = asm.push_frame(frame(StreamKind::Ir, 1_200));
        assert_eq!(ready.len(), 1);

        let cap = &ready[0];
        let color = cap.color_image().unwrap().expect("color bound");
        let depth = cap.depth_image().unwrap().expect("depth bound");
        // Paired frames share one exposure window.
        let dt = color
            .device_timestamp_usec()
            .unwrap()
            .abs_diff(depth.device_timestamp_usec().unwrap());
        assert!(dt <= PERIOD);
        assert!((cap.temperature_c().unwrap() - 23.0).abs() < 1e-3);
        color.release().unwrap();
        depth.release().unwrap();
    }

    #[test]
    fn synchronized_drops_unpaired_window() {
        let mut asm = CaptureAssembler::new(&config(true));
        assert!(asm.push_frame(frame(StreamKind::Color, 1_000)).is_empty());
        // Color-only window goes stale as later complete windows arrive.
        let ts = 1_000 + 3 * PERIOD;
        assert!(asm.push_frame(frame(StreamKind::Color, ts)).is_empty());
        assert!(asm.push_frame(frame(StreamKind::Depth, ts)).is_empty());
        let ready = asm.push_frame(frame(StreamKind::Ir, ts));
        // Only the complete window surfaces; the stale one is dropped.
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].device_timestamp_usec().unwrap(), Some(ts));
    }

    #[test]
    fn unsynchronized_surfaces_stale_single_modality() {
        let mut asm = CaptureAssembler::new(&config(false));
        assert!(asm.push_frame(frame(StreamKind::Depth, 1_000)).is_empty());
        assert!(asm.push_frame(frame(StreamKind::Ir, 1_000)).is_empty());
        // Depth keeps flowing; color never arrives for the first window.
        assert!(asm.push_frame(frame(StreamKind::Depth, 1_000 + PERIOD)).is_empty());
        assert!(asm
            .push_frame(frame(StreamKind::Ir, 1_000 + PERIOD))
            .is_empty());
        let ready = asm.push_frame(frame(StreamKind::Depth, 1_000 + 3 * PERIOD));
        // First window is now beyond the staleness bound and surfaces
        // without color.
        assert_eq!(ready.len(), 1);
        assert!(ready[0].color_image().unwrap().is_none());
        assert!(ready[0].depth_image().unwrap().is_some());
    }

    #[test]
    fn output_is_monotonic_across_out_of_order_arrival() {
        let mut asm = CaptureAssembler::new(&config(false));
        // Second window completes before the first.
        assert!(asm.push_frame(frame(StreamKind::Color, 1_000 + PERIOD)).is_empty());
        assert!(asm.push_frame(frame(StreamKind::Depth, 1_000 + PERIOD)).is_empty());
        let ready = asm.push_frame(frame(StreamKind::Ir, 1_000 + PERIOD));
        // Nothing yet from window 1, but window 0 (color at 1_000) was
        // never opened, so window 1 may surface.
        assert_eq!(ready.len(), 1);

        let mut last = 0u64;
        let mut all = Vec::new();
        all.extend(asm.push_frame(frame(StreamKind::Color, 1_000 + 2 * PERIOD)));
        all.extend(asm.push_frame(frame(StreamKind::Depth, 1_000 + 2 * PERIOD)));
        all.extend(asm.push_frame(frame(StreamKind::Ir, 1_000 + 2 * PERIOD)));
        for cap in ready.iter().chain(all.iter()) {
            let ts = cap.device_timestamp_usec().unwrap().unwrap();
            assert!(ts >= last);
            last = ts;
        }
    }

    #[test]
    fn depth_only_config_needs_no_color() {
        let cfg = DeviceConfiguration {
            color_resolution: ColorResolution::Off,
            depth_mode: DepthMode::NfovUnbinned,
            ..config(false)
        };
        let mut asm = CaptureAssembler::new(&cfg);
        assert!(asm.push_frame(frame(StreamKind::Depth, 500)).is_empty());
        let ready = asm.push_frame(frame(StreamKind::Ir, 500));
        assert_eq!(ready.len(), 1);
        assert!(ready[0].color_image().unwrap().is_none());
    }

    #[test]
    fn passive_ir_expects_no_depth_image() {
        let cfg = DeviceConfiguration {
            color_resolution: ColorResolution::Off,
            depth_mode: DepthMode::PassiveIr,
            ..config(false)
        };
        let mut asm = CaptureAssembler::new(&cfg);
        let ready = asm.push_frame(frame(StreamKind::Ir, 500));
        assert_eq!(ready.len(), 1);
        assert!(ready[0].depth_image().unwrap().is_none());
        assert!(ready[0].ir_image().unwrap().is_some());
    }

    #[test]
    fn enqueue_latest_drops_oldest_when_full() {
        let (tx, rx) = crossbeam_channel::bounded(2);
        assert!(enqueue_latest(&tx, &rx, 1));
        assert!(enqueue_latest(&tx, &rx, 2));
        assert!(enqueue_latest(&tx, &rx, 3));
        // Oldest (1) was dropped; 2 and 3 remain.
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn frame_header_size_matches_parser() {
        // Keep the constant and the parser layout in lockstep.
        assert_eq!(FRAME_HEADER_SIZE, 36);
    }

    fn wire_frame(kind: u8, ts: u64, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; FRAME_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&crate::protocol::FRAME_MAGIC.to_le_bytes());
        bytes[4] = kind;
        bytes[12..20].copy_from_slice(&ts.to_le_bytes());
        bytes[28..30].copy_from_slice(&4u16.to_le_bytes());
        bytes[30..32].copy_from_slice(&1u16.to_le_bytes());
        bytes[32..36].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn accumulator_reassembles_split_frames() {
        let mut acc = FrameAccumulator::new();
        let wire = wire_frame(2, 777, &[9u8; 8]);
        let (a, b) = wire.split_at(10);
        assert!(acc.feed(a, 0).is_empty());
        let frames = acc.feed(b, 0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.device_timestamp_usec, 777);
        assert_eq!(frames[0].payload, vec![9u8; 8]);
    }

    #[test]
    fn accumulator_splits_coalesced_frames() {
        let mut acc = FrameAccumulator::new();
        let mut wire = wire_frame(2, 100, &[1u8; 8]);
        wire.extend(wire_frame(3, 101, &[2u8; 8]));
        let frames = acc.feed(&wire, 0);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].header.kind, StreamKind::Depth);
        assert_eq!(frames[1].header.kind, StreamKind::Ir);
    }

    #[test]
    fn accumulator_recovers_from_desync() {
        let mut acc = FrameAccumulator::new();
        assert!(acc.feed(&[0xFFu8; 64], 0).is_empty());
        let frames = acc.feed(&wire_frame(2, 5, &[0u8; 8]), 0);
        assert_eq!(frames.len(), 1);
    }
}
