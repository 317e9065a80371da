//! Playback reader for TCRF recordings.
//!
//! Symmetric to [`crate::record`]: reads the metadata header, recovers
//! the embedded calibration and configuration, and walks the block
//! stream through per-track cursors. All read operations return
//! `Ok(None)` as the end-of-stream sentinel at either boundary — EOF is
//! never an error. A file whose footer is missing (writer crashed before
//! close) is recovered by scanning the block stream.

use crate::calibration::Calibration;
use crate::handle::{Handle, Slot};
use crate::image::{Capture, CaptureInner, Image, ImageKind};
use crate::record::{
    format_from_code, ContainerHeader, IndexEntry, BLOCK_CAPTURE, BLOCK_DATA, BLOCK_HEADER_SIZE,
    BLOCK_IMU, CONTAINER_MAGIC, CONTAINER_VERSION, FOOTER_MAGIC, FOOTER_SIZE, IMU_BLOCK_SIZE,
    INDEX_ENTRY_SIZE,
};
use crate::types::{DeviceConfiguration, ImuSample};
use crate::{Result, TofcamError};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Reference point for [`Playback::seek_timestamp`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// Offset is relative to the start of the recording.
    Begin,
    /// Offset is relative to the end of the recording (typically
    /// negative).
    End,
}

pub(crate) struct DataBlockInner {
    device_timestamp_usec: u64,
    buffer: Vec<u8>,
}

/// A payload read from a custom track.
pub struct DataBlock {
    handle: Handle<DataBlockInner>,
}

impl DataBlock {
    pub fn acquire(&self) -> Result<DataBlock> {
        Ok(DataBlock {
            handle: self.handle.acquire()?,
        })
    }

    pub fn release(self) -> Result<()> {
        self.handle.release()
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn device_timestamp_usec(&self) -> Result<u64> {
        self.handle.with(|b| b.device_timestamp_usec)
    }

    pub fn buffer_size(&self) -> Result<usize> {
        self.handle.with(|b| b.buffer.len())
    }

    pub fn with_buffer<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.handle.with(|b| f(&b.buffer))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.handle.with(|b| b.buffer.clone())
    }
}

impl std::fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBlock")
            .field("valid", &self.is_valid())
            .finish()
    }
}

struct TrackCursor {
    entries: Vec<IndexEntry>,
    /// Index of the next entry a forward read returns.
    position: usize,
}

impl TrackCursor {
    fn new(entries: Vec<IndexEntry>) -> TrackCursor {
        TrackCursor {
            entries,
            position: 0,
        }
    }

    fn next(&mut self) -> Option<IndexEntry> {
        let entry = self.entries.get(self.position).copied()?;
        self.position += 1;
        Some(entry)
    }

    fn previous(&mut self) -> Option<IndexEntry> {
        if self.position == 0 {
            return None;
        }
        self.position -= 1;
        Some(self.entries[self.position])
    }

    fn seek(&mut self, target_usec: u64) {
        self.position = self
            .entries
            .partition_point(|e| e.timestamp_usec < target_usec);
    }
}

/// Read handle for one recording. Single-reader: one long-lived capture
/// wrapper and one data-block wrapper are rebound per read.
pub struct Playback {
    file: File,
    header: ContainerHeader,
    captures: TrackCursor,
    imu: TrackCursor,
    data_tracks: BTreeMap<u16, TrackCursor>,
    first_timestamp_usec: u64,
    last_timestamp_usec: u64,
    capture_slot: Slot<CaptureInner>,
    data_slot: Slot<DataBlockInner>,
}

impl Playback {
    /// Open a recording. Fails `FileNotFound` when the path does not
    /// exist and `Format` when the container is not valid TCRF.
    pub fn open(path: impl AsRef<Path>) -> Result<Playback> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TofcamError::FileNotFound
            } else {
                TofcamError::Io(e)
            }
        })?;

        let (header, data_start) = read_header(&mut file)?;
        let file_len = file.metadata()?.len();

        let entries = match read_footer_index(&mut file, data_start, file_len)? {
            Some(entries) => entries,
            None => {
                log::warn!(
                    "recording {} has no footer, rebuilding index by scan",
                    path.display()
                );
                scan_index(&mut file, data_start, file_len)?
            }
        };

        let first = entries.iter().map(|e| e.timestamp_usec).min().unwrap_or(0);
        let last = entries.iter().map(|e| e.timestamp_usec).max().unwrap_or(0);

        let mut captures = Vec::new();
        let mut imu = Vec::new();
        let mut data: BTreeMap<u16, Vec<IndexEntry>> = BTreeMap::new();
        // Pre-create cursors for declared tracks so empty tracks seek too.
        for track in &header.tracks {
            data.entry(track.id).or_default();
        }
        for entry in entries {
            match entry.kind {
                BLOCK_CAPTURE => captures.push(entry),
                BLOCK_IMU => imu.push(entry),
                BLOCK_DATA => data.entry(entry.track).or_default().push(entry),
                _ => {}
            }
        }

        Ok(Playback {
            file,
            header,
            captures: TrackCursor::new(captures),
            imu: TrackCursor::new(imu),
            data_tracks: data
                .into_iter()
                .map(|(id, entries)| (id, TrackCursor::new(entries)))
                .collect(),
            first_timestamp_usec: first,
            last_timestamp_usec: last,
            capture_slot: Slot::new(),
            data_slot: Slot::new(),
        })
    }

    /// The configuration the recording was captured with.
    pub fn record_configuration(&self) -> &DeviceConfiguration {
        &self.header.configuration
    }

    /// The embedded calibration, bound to the recorded mode pair.
    pub fn calibration(&self) -> Result<Calibration> {
        let blob = self.header.calibration_blob.as_ref().ok_or_else(|| {
            TofcamError::Format("recording carries no calibration blob".into())
        })?;
        Calibration::from_raw(
            blob.as_bytes(),
            self.header.configuration.depth_mode,
            self.header.configuration.color_resolution,
        )
    }

    /// Copy the embedded raw calibration blob into `buf`, returning the
    /// blob size. Fails `BufferTooSmall` with the required size when
    /// `buf` cannot hold it.
    pub fn raw_calibration(&self, buf: &mut [u8]) -> Result<usize> {
        let blob = self.header.calibration_blob.as_ref().ok_or_else(|| {
            TofcamError::Format("recording carries no calibration blob".into())
        })?;
        let bytes = blob.as_bytes();
        if buf.len() < bytes.len() {
            return Err(TofcamError::BufferTooSmall {
                required: bytes.len(),
            });
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Look up a metadata tag recorded with
    /// [`crate::Recorder::add_tag`].
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.header.tags.get(name).map(String::as_str)
    }

    /// Total recorded duration in microseconds.
    pub fn recording_length_usec(&self) -> u64 {
        self.last_timestamp_usec
            .saturating_sub(self.first_timestamp_usec)
    }

    /// Read the next capture, advancing the cursor. `Ok(None)` at EOF.
    pub fn next_capture(&mut self) -> Result<Option<Capture>> {
        match self.captures.next() {
            Some(entry) => Ok(Some(self.load_capture(entry)?)),
            None => Ok(None),
        }
    }

    /// Read the capture before the cursor, retreating it. `Ok(None)` at
    /// the beginning.
    pub fn previous_capture(&mut self) -> Result<Option<Capture>> {
        match self.captures.previous() {
            Some(entry) => Ok(Some(self.load_capture(entry)?)),
            None => Ok(None),
        }
    }

    pub fn next_imu_sample(&mut self) -> Result<Option<ImuSample>> {
        match self.imu.next() {
            Some(entry) => Ok(Some(self.load_imu(entry)?)),
            None => Ok(None),
        }
    }

    pub fn previous_imu_sample(&mut self) -> Result<Option<ImuSample>> {
        match self.imu.previous() {
            Some(entry) => Ok(Some(self.load_imu(entry)?)),
            None => Ok(None),
        }
    }

    /// Read the next payload of a custom track by name.
    pub fn next_data_block(&mut self, track: &str) -> Result<Option<DataBlock>> {
        let id = self.track_id(track)?;
        let entry = self.data_tracks.get_mut(&id).and_then(TrackCursor::next);
        match entry {
            Some(entry) => Ok(Some(self.load_data_block(entry)?)),
            None => Ok(None),
        }
    }

    pub fn previous_data_block(&mut self, track: &str) -> Result<Option<DataBlock>> {
        let id = self.track_id(track)?;
        let entry = self
            .data_tracks
            .get_mut(&id)
            .and_then(TrackCursor::previous);
        match entry {
            Some(entry) => Ok(Some(self.load_data_block(entry)?)),
            None => Ok(None),
        }
    }

    /// Reposition all track cursors to `offset_usec` relative to
    /// `origin`. The next forward read returns the first block at or
    /// after the target.
    pub fn seek_timestamp(&mut self, offset_usec: i64, origin: SeekOrigin) -> Result<()> {
        let base = match origin {
            SeekOrigin::Begin => self.first_timestamp_usec,
            SeekOrigin::End => self.last_timestamp_usec,
        };
        let target = base.saturating_add_signed(offset_usec);
        self.captures.seek(target);
        self.imu.seek(target);
        for cursor in self.data_tracks.values_mut() {
            cursor.seek(target);
        }
        Ok(())
    }

    fn track_id(&self, name: &str) -> Result<u16> {
        self.header
            .tracks
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.id)
            .ok_or_else(|| TofcamError::InvalidState(format!("unknown track {:?}", name)))
    }

    fn read_block_payload(&mut self, entry: IndexEntry) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(entry.offset))?;
        let mut head = [0u8; BLOCK_HEADER_SIZE];
        self.file.read_exact(&mut head)?;
        let kind = u16::from_le_bytes([head[0], head[1]]);
        if kind != entry.kind {
            return Err(TofcamError::Format("index points at wrong block kind".into()));
        }
        let len = u32::from_le_bytes([head[12], head[13], head[14], head[15]]) as usize;
        let mut payload = vec![0u8; len];
        self.file.read_exact(&mut payload)?;
        Ok(payload)
    }

    fn load_capture(&mut self, entry: IndexEntry) -> Result<Capture> {
        let payload = self.read_block_payload(entry)?;
        let capture = decode_capture(&payload)?;
        // Rebind the long-lived wrapper: the previous frame's handle is
        // released before the new one is installed.
        self.capture_slot.rebind(capture.acquire()?.into_handle());
        Ok(capture)
    }

    fn load_imu(&mut self, entry: IndexEntry) -> Result<ImuSample> {
        let payload = self.read_block_payload(entry)?;
        decode_imu(&payload)
    }

    fn load_data_block(&mut self, entry: IndexEntry) -> Result<DataBlock> {
        let payload = self.read_block_payload(entry)?;
        let block = DataBlock {
            handle: Handle::new(DataBlockInner {
                device_timestamp_usec: entry.timestamp_usec,
                buffer: payload,
            }),
        };
        self.data_slot.rebind(block.acquire()?.into_handle());
        Ok(block)
    }
}

impl DataBlock {
    pub(crate) fn into_handle(self) -> Handle<DataBlockInner> {
        self.handle
    }
}

fn read_header(file: &mut File) -> Result<(ContainerHeader, u64)> {
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)
        .map_err(|_| TofcamError::Format("file too short for TCRF header".into()))?;
    if &magic != CONTAINER_MAGIC {
        return Err(TofcamError::Format("bad container magic".into()));
    }
    let mut version = [0u8; 2];
    file.read_exact(&mut version)?;
    let version = u16::from_le_bytes(version);
    if version != CONTAINER_VERSION {
        return Err(TofcamError::Format(format!(
            "unsupported container version {}",
            version
        )));
    }
    let mut reserved = [0u8; 2];
    file.read_exact(&mut reserved)?;
    let mut len = [0u8; 4];
    file.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    if len > 64 * 1024 * 1024 {
        return Err(TofcamError::Format("header length implausible".into()));
    }
    let mut json = vec![0u8; len];
    file.read_exact(&mut json)
        .map_err(|_| TofcamError::Format("truncated header".into()))?;
    let header: ContainerHeader = serde_json::from_slice(&json)
        .map_err(|e| TofcamError::Format(format!("header decode: {}", e)))?;
    Ok((header, (4 + 2 + 2 + 4 + len) as u64))
}

/// Read the seek index through the footer. `Ok(None)` when the footer is
/// absent or inconsistent (unclosed file).
fn read_footer_index(
    file: &mut File,
    data_start: u64,
    file_len: u64,
) -> Result<Option<Vec<IndexEntry>>> {
    if file_len < data_start + FOOTER_SIZE as u64 {
        return Ok(None);
    }
    file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
    let mut footer = [0u8; FOOTER_SIZE];
    file.read_exact(&mut footer)?;
    if &footer[12..16] != FOOTER_MAGIC {
        return Ok(None);
    }
    let index_offset = u64::from_le_bytes(footer[0..8].try_into().unwrap());
    let count = u32::from_le_bytes(footer[8..12].try_into().unwrap()) as u64;
    let expected_end = index_offset + count * INDEX_ENTRY_SIZE as u64 + FOOTER_SIZE as u64;
    if index_offset < data_start || expected_end != file_len {
        return Ok(None);
    }

    file.seek(SeekFrom::Start(index_offset))?;
    let mut entries = Vec::with_capacity(count as usize);
    let mut buf = [0u8; INDEX_ENTRY_SIZE];
    for _ in 0..count {
        file.read_exact(&mut buf)?;
        entries.push(IndexEntry {
            kind: u16::from_le_bytes([buf[0], buf[1]]),
            track: u16::from_le_bytes([buf[2], buf[3]]),
            timestamp_usec: u64::from_le_bytes(buf[4..12].try_into().unwrap()),
            offset: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
        });
    }
    Ok(Some(entries))
}

/// Rebuild the index by scanning blocks from the start of the data
/// section. Stops at the first malformed or truncated block.
fn scan_index(file: &mut File, data_start: u64, file_len: u64) -> Result<Vec<IndexEntry>> {
    let mut entries = Vec::new();
    let mut offset = data_start;
    file.seek(SeekFrom::Start(offset))?;
    let mut head = [0u8; BLOCK_HEADER_SIZE];

    while offset + BLOCK_HEADER_SIZE as u64 <= file_len {
        if file.read_exact(&mut head).is_err() {
            break;
        }
        let kind = u16::from_le_bytes([head[0], head[1]]);
        let track = u16::from_le_bytes([head[2], head[3]]);
        let timestamp_usec = u64::from_le_bytes(head[4..12].try_into().unwrap());
        let len = u32::from_le_bytes(head[12..16].try_into().unwrap()) as u64;

        if !matches!(kind, BLOCK_CAPTURE | BLOCK_IMU | BLOCK_DATA)
            || offset + BLOCK_HEADER_SIZE as u64 + len > file_len
        {
            log::warn!("index scan stopped at malformed block, offset {}", offset);
            break;
        }

        entries.push(IndexEntry {
            kind,
            track,
            timestamp_usec,
            offset,
        });
        offset += BLOCK_HEADER_SIZE as u64 + len;
        file.seek(SeekFrom::Start(offset))?;
    }
    Ok(entries)
}

/// Reverse of the writer's capture block layout.
fn decode_capture(payload: &[u8]) -> Result<Capture> {
    if payload.len() < 3 {
        return Err(TofcamError::Format("capture block truncated".into()));
    }
    let temp_centi = i16::from_le_bytes([payload[1], payload[2]]);
    let capture = Capture::new();
    if temp_centi != i16::MIN {
        capture.set_temperature_c(temp_centi as f32 * 0.01)?;
    }

    let mut cursor = 3usize;
    while cursor < payload.len() {
        let need = |n: usize, cursor: usize| -> Result<()> {
            if cursor + n > payload.len() {
                Err(TofcamError::Format("image record truncated".into()))
            } else {
                Ok(())
            }
        };
        need(50, cursor)?;
        let slot = payload[cursor];
        let format = format_from_code(payload[cursor + 1])
            .ok_or_else(|| TofcamError::Format("unknown image format code".into()))?;
        let u32_at = |i: usize| {
            u32::from_le_bytes(payload[i..i + 4].try_into().unwrap())
        };
        let u64_at = |i: usize| {
            u64::from_le_bytes(payload[i..i + 8].try_into().unwrap())
        };
        let width = u32_at(cursor + 2);
        let height = u32_at(cursor + 6);
        let stride = u32_at(cursor + 10);
        let device_ts = u64_at(cursor + 14);
        let system_ts = u64_at(cursor + 22);
        let exposure = u64_at(cursor + 30);
        let wb = u32_at(cursor + 38);
        let iso = u32_at(cursor + 42);
        let len = u32_at(cursor + 46) as usize;
        need(50 + len, cursor)?;
        let data = payload[cursor + 50..cursor + 50 + len].to_vec();
        cursor += 50 + len;

        let image = Image::from_buffer(format, width, height, stride, data);
        image.set_device_timestamp_usec(device_ts)?;
        image.set_system_timestamp_nsec(system_ts)?;
        image.set_exposure_usec(exposure)?;
        image.set_white_balance_k(wb)?;
        image.set_iso_speed(iso)?;

        let kind = match slot {
            0 => ImageKind::Color,
            1 => ImageKind::Depth,
            2 => ImageKind::Ir,
            _ => return Err(TofcamError::Format("unknown image slot code".into())),
        };
        capture.set_image(kind, image)?;
    }
    Ok(capture)
}

fn decode_imu(payload: &[u8]) -> Result<ImuSample> {
    if payload.len() < IMU_BLOCK_SIZE {
        return Err(TofcamError::Format("imu block truncated".into()));
    }
    let f32_at = |i: usize| f32::from_le_bytes(payload[i..i + 4].try_into().unwrap());
    Ok(ImuSample {
        acc_timestamp_usec: u64::from_le_bytes(payload[0..8].try_into().unwrap()),
        acc: [f32_at(8), f32_at(12), f32_at(16)],
        gyro_timestamp_usec: u64::from_le_bytes(payload[20..28].try_into().unwrap()),
        gyro: [f32_at(28), f32_at(32), f32_at(36)],
        temperature_c: f32_at(40),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::test_fixtures;
    use crate::record::Recorder;
    use crate::types::{ColorFormat, ColorResolution, DepthMode, Fps, ImageFormat};

    fn test_config() -> DeviceConfiguration {
        DeviceConfiguration {
            color_format: ColorFormat::Bgra32,
            color_resolution: ColorResolution::R720p,
            depth_mode: DepthMode::NfovUnbinned,
            camera_fps: Fps::F30,
            synchronized_images_only: true,
            ..Default::default()
        }
    }

    fn make_capture(ts: u64) -> Capture {
        let capture = Capture::new();
        let color = Image::from_buffer(
            ImageFormat::ColorBgra32,
            8,
            4,
            32,
            (0..128u32).map(|v| v as u8).collect(),
        );
        color.set_device_timestamp_usec(ts).unwrap();
        color.set_exposure_usec(8_000).unwrap();
        let depth = Image::from_buffer(ImageFormat::Depth16, 4, 4, 8, vec![7u8; 32]);
        depth.set_device_timestamp_usec(ts + 40).unwrap();
        capture.set_image(ImageKind::Color, color).unwrap();
        capture.set_image(ImageKind::Depth, depth).unwrap();
        capture.set_temperature_c(23.5).unwrap();
        capture
    }

    fn record_n(path: &std::path::Path, n: usize, period: u64) {
        let mut rec = Recorder::create(
            path,
            &test_config(),
            Some(&test_fixtures::raw_blob()),
        )
        .unwrap();
        rec.add_tag("rig", "bench-3").unwrap();
        let track = rec.add_custom_track("events").unwrap();
        rec.write_header().unwrap();
        for i in 0..n {
            let ts = 1_000 + i as u64 * period;
            let cap = make_capture(ts);
            rec.write_capture(&cap).unwrap();
            cap.release().unwrap();
            rec.write_imu_sample(&ImuSample {
                acc: [0.0, 0.0, 9.8],
                acc_timestamp_usec: ts + 5,
                gyro: [0.1, 0.0, 0.0],
                gyro_timestamp_usec: ts + 6,
                temperature_c: 24.0,
            })
            .unwrap();
            rec.write_custom_track_data(track, ts + 7, format!("evt{}", i).as_bytes())
                .unwrap();
        }
        rec.close().unwrap();
    }

    #[test]
    fn round_trip_preserves_count_order_and_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.tcrf");
        record_n(&path, 10, 33_333);

        let mut pb = Playback::open(&path).unwrap();
        let mut last_ts = 0u64;
        let mut count = 0;
        while let Some(cap) = pb.next_capture().unwrap() {
            let color = cap.color_image().unwrap().expect("color");
            let depth = cap.depth_image().unwrap().expect("depth");
            assert_eq!(color.format().unwrap(), ImageFormat::ColorBgra32);
            assert_eq!((color.width().unwrap(), color.height().unwrap()), (8, 4));
            assert_eq!(depth.format().unwrap(), ImageFormat::Depth16);
            let ts = cap.device_timestamp_usec().unwrap().unwrap();
            assert!(ts >= last_ts);
            last_ts = ts;
            assert!((cap.temperature_c().unwrap() - 23.5).abs() < 0.01);
            color.release().unwrap();
            depth.release().unwrap();
            count += 1;
        }
        assert_eq!(count, 10);
        // A second read past the end stays EOF.
        assert!(pb.next_capture().unwrap().is_none());
    }

    #[test]
    fn pixel_payloads_survive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("px.tcrf");
        record_n(&path, 1, 33_333);

        let mut pb = Playback::open(&path).unwrap();
        let cap = pb.next_capture().unwrap().unwrap();
        let color = cap.color_image().unwrap().unwrap();
        let expected: Vec<u8> = (0..128u32).map(|v| v as u8).collect();
        assert_eq!(color.to_vec().unwrap(), expected);
        assert_eq!(color.exposure_usec().unwrap(), 8_000);
    }

    #[test]
    fn seek_begin_returns_first_and_past_end_is_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seek.tcrf");
        record_n(&path, 5, 33_333);

        let mut pb = Playback::open(&path).unwrap();
        // Drain a couple, then rewind.
        pb.next_capture().unwrap();
        pb.next_capture().unwrap();
        pb.seek_timestamp(0, SeekOrigin::Begin).unwrap();
        let first = pb.next_capture().unwrap().unwrap();
        assert_eq!(first.device_timestamp_usec().unwrap().unwrap(), 1_000);

        let len = pb.recording_length_usec();
        pb.seek_timestamp(len as i64 + 1, SeekOrigin::Begin).unwrap();
        assert!(pb.next_capture().unwrap().is_none());
    }

    #[test]
    fn seek_from_end_lands_on_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.tcrf");
        record_n(&path, 5, 33_333);

        let mut pb = Playback::open(&path).unwrap();
        pb.seek_timestamp(0, SeekOrigin::End).unwrap();
        // The only blocks at the very last timestamp are non-capture;
        // the final capture is just before it.
        let prev = pb.previous_capture().unwrap().unwrap();
        assert_eq!(
            prev.device_timestamp_usec().unwrap().unwrap(),
            1_000 + 4 * 33_333
        );
    }

    #[test]
    fn recording_length_spans_written_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("len.tcrf");
        // 150 captures at 30 fps ≈ 5 s.
        record_n(&path, 150, 33_333);

        let mut pb = Playback::open(&path).unwrap();
        let len = pb.recording_length_usec();
        assert!(
            (len as i64 - 5_000_000).unsigned_abs() <= 40_000,
            "length {} us",
            len
        );

        let mut count = 0;
        while pb.next_capture().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 150);
    }

    #[test]
    fn previous_at_beginning_is_eof_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prev.tcrf");
        record_n(&path, 3, 33_333);

        let mut pb = Playback::open(&path).unwrap();
        assert!(pb.previous_capture().unwrap().is_none());
        assert!(pb.previous_imu_sample().unwrap().is_none());
        // next then previous return the same block.
        let a = pb.next_capture().unwrap().unwrap();
        let b = pb.previous_capture().unwrap().unwrap();
        assert_eq!(
            a.device_timestamp_usec().unwrap(),
            b.device_timestamp_usec().unwrap()
        );
    }

    #[test]
    fn imu_samples_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imu.tcrf");
        record_n(&path, 4, 33_333);

        let mut pb = Playback::open(&path).unwrap();
        let mut count = 0;
        while let Some(sample) = pb.next_imu_sample().unwrap() {
            assert!((sample.acc[2] - 9.8).abs() < 1e-5);
            assert!((sample.gyro[0] - 0.1).abs() < 1e-6);
            assert_eq!(sample.gyro_timestamp_usec, sample.acc_timestamp_usec + 1);
            count += 1;
        }
        assert_eq!(count, 4);
    }

    #[test]
    fn custom_track_data_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.tcrf");
        record_n(&path, 3, 33_333);

        let mut pb = Playback::open(&path).unwrap();
        let block = pb.next_data_block("events").unwrap().unwrap();
        assert_eq!(block.to_vec().unwrap(), b"evt0");
        let block = pb.next_data_block("events").unwrap().unwrap();
        assert_eq!(block.to_vec().unwrap(), b"evt1");
        // Unknown tracks are a hard error, not EOF.
        assert!(matches!(
            pb.next_data_block("nope"),
            Err(TofcamError::InvalidState(_))
        ));
    }

    #[test]
    fn configuration_tags_and_calibration_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.tcrf");
        record_n(&path, 1, 33_333);

        let pb = Playback::open(&path).unwrap();
        assert_eq!(
            pb.record_configuration().depth_mode,
            DepthMode::NfovUnbinned
        );
        assert_eq!(pb.tag("rig"), Some("bench-3"));
        assert_eq!(pb.tag("missing"), None);

        let cal = pb.calibration().unwrap();
        assert_eq!(cal.depth_camera.width, 640);
        assert_eq!(cal.color_camera.width, 1280);

        let mut small = [0u8; 4];
        assert!(matches!(
            pb.raw_calibration(&mut small),
            Err(TofcamError::BufferTooSmall { .. })
        ));
        let mut big = vec![0u8; 64 * 1024];
        let n = pb.raw_calibration(&mut big).unwrap();
        assert!(n > 0);
    }

    #[test]
    fn missing_footer_recovers_by_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crash.tcrf");
        let snapshot = dir.path().join("crash-snapshot.tcrf");
        {
            let mut rec = Recorder::create(&path, &test_config(), None).unwrap();
            rec.write_header().unwrap();
            for i in 0..3 {
                let cap = make_capture(1_000 + i * 10_000);
                rec.write_capture(&cap).unwrap();
                cap.release().unwrap();
            }
            rec.flush().unwrap();
            // Snapshot the flushed-but-unclosed state, as a crash would
            // leave it.
            std::fs::copy(&path, &snapshot).unwrap();
            rec.close().unwrap();
        }

        let mut pb = Playback::open(&snapshot).unwrap();
        let mut count = 0;
        while pb.next_capture().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn garbage_file_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, b"definitely not a recording").unwrap();
        assert!(matches!(
            Playback::open(&path),
            Err(TofcamError::Format(_))
        ));
    }

    #[test]
    fn missing_file_is_file_not_found() {
        assert!(matches!(
            Playback::open("/nonexistent/nowhere.tcrf"),
            Err(TofcamError::FileNotFound)
        ));
    }
}
