//! Recording writer for the TCRF container format.
//!
//! TCRF is a seekable multi-track container: a JSON metadata header
//! (configuration, embedded calibration blob, tags, custom track table),
//! followed by length-prefixed timestamped blocks (captures, IMU
//! samples, custom track payloads), and a seek index + footer written at
//! close. A file that was never closed cleanly has no footer; the reader
//! rebuilds the index by scanning (see [`crate::playback`]).
//!
//! Writer lifecycle: `Created -> HeaderWritten -> Flushed -> Closed`.
//! Tags and tracks can only be added before the header is written;
//! captures and samples can only be written after.

use crate::image::{Capture, Image, ImageKind};
use crate::types::{DeviceConfiguration, ImageFormat, ImuSample};
use crate::{Result, TofcamError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub(crate) const CONTAINER_MAGIC: &[u8; 4] = b"TCRF";
pub(crate) const FOOTER_MAGIC: &[u8; 4] = b"TCRX";
pub(crate) const CONTAINER_VERSION: u16 = 1;

pub(crate) const BLOCK_HEADER_SIZE: usize = 16;
pub(crate) const FOOTER_SIZE: usize = 16;
pub(crate) const INDEX_ENTRY_SIZE: usize = 20;

pub(crate) const BLOCK_CAPTURE: u16 = 1;
pub(crate) const BLOCK_IMU: u16 = 2;
pub(crate) const BLOCK_DATA: u16 = 3;

/// First id handed out by [`Recorder::add_custom_track`].
pub(crate) const FIRST_CUSTOM_TRACK_ID: u16 = 0x0100;

/// IMU block payload: two u64 timestamps, two f32 vectors, temperature.
pub(crate) const IMU_BLOCK_SIZE: usize = 44;

/// JSON metadata stored after the container magic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ContainerHeader {
    pub configuration: DeviceConfiguration,
    /// The device calibration blob (itself JSON text), when recorded.
    pub calibration_blob: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub tracks: Vec<TrackInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TrackInfo {
    pub id: u16,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub kind: u16,
    pub track: u16,
    pub timestamp_usec: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderState {
    Created,
    HeaderWritten,
    Flushed,
    Closed,
}

/// Write handle for one recording, bound to the configuration it was
/// created with. Single-writer: not safe for concurrent use without
/// external serialization.
pub struct Recorder {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    state: RecorderState,
    header: ContainerHeader,
    next_track_id: u16,
    index: Vec<IndexEntry>,
    bytes_written: u64,
}

impl Recorder {
    /// Create a recording file. `calibration_blob` is the raw device
    /// blob to embed so playback can run the transformation engine
    /// without the hardware.
    pub fn create(
        path: impl AsRef<Path>,
        config: &DeviceConfiguration,
        calibration_blob: Option<&[u8]>,
    ) -> Result<Recorder> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let blob = match calibration_blob {
            Some(bytes) => Some(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| TofcamError::Format("calibration blob is not UTF-8".into()))?,
            ),
            None => None,
        };
        log::info!("recording to {}", path.display());
        Ok(Recorder {
            path,
            file: Some(BufWriter::new(file)),
            state: RecorderState::Created,
            header: ContainerHeader {
                configuration: config.clone(),
                calibration_blob: blob,
                tags: BTreeMap::new(),
                tracks: Vec::new(),
            },
            next_track_id: FIRST_CUSTOM_TRACK_ID,
            index: Vec::new(),
            bytes_written: 0,
        })
    }

    /// Attach a name/value tag to the recording metadata.
    pub fn add_tag(&mut self, name: &str, value: &str) -> Result<()> {
        if self.state != RecorderState::Created {
            return Err(TofcamError::InvalidState(
                "tags must be added before write_header".into(),
            ));
        }
        self.header.tags.insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// Register a custom data track and return its id.
    pub fn add_custom_track(&mut self, name: &str) -> Result<u16> {
        if self.state != RecorderState::Created {
            return Err(TofcamError::InvalidState(
                "tracks must be added before write_header".into(),
            ));
        }
        if self.header.tracks.iter().any(|t| t.name == name) {
            return Err(TofcamError::InvalidState(format!(
                "track {:?} already exists",
                name
            )));
        }
        let id = self.next_track_id;
        self.next_track_id += 1;
        self.header.tracks.push(TrackInfo {
            id,
            name: name.to_string(),
        });
        Ok(id)
    }

    /// Write the container header. Required before any capture/IMU/data
    /// write; freezes tags and tracks.
    pub fn write_header(&mut self) -> Result<()> {
        if self.state != RecorderState::Created {
            return Err(TofcamError::InvalidState("header already written".into()));
        }
        let json = serde_json::to_vec(&self.header)
            .map_err(|e| TofcamError::Format(format!("header encode: {}", e)))?;

        let file = self.file_mut()?;
        file.write_all(CONTAINER_MAGIC)?;
        file.write_all(&CONTAINER_VERSION.to_le_bytes())?;
        file.write_all(&[0u8; 2])?;
        file.write_all(&(json.len() as u32).to_le_bytes())?;
        file.write_all(&json)?;
        self.bytes_written = (4 + 2 + 2 + 4 + json.len()) as u64;
        self.state = RecorderState::HeaderWritten;
        Ok(())
    }

    /// Write the header if it has not been written yet. Used when a
    /// recorder is handed to [`crate::Device::start`], which begins
    /// writing immediately.
    pub fn ensure_header(&mut self) -> Result<()> {
        if self.state == RecorderState::Created {
            self.write_header()
        } else {
            Ok(())
        }
    }

    /// Append one capture. Valid only after [`Self::write_header`].
    pub fn write_capture(&mut self, capture: &Capture) -> Result<()> {
        self.check_writable()?;
        let timestamp = capture
            .device_timestamp_usec()?
            .ok_or_else(|| TofcamError::InvalidState("capture holds no images".into()))?;

        let mut payload = Vec::new();
        let mut flags = 0u8;
        let temp = capture.temperature_c()?;
        let images = [
            (ImageKind::Color, capture.color_image()?),
            (ImageKind::Depth, capture.depth_image()?),
            (ImageKind::Ir, capture.ir_image()?),
        ];
        for (kind, image) in &images {
            if image.is_some() {
                flags |= 1 << slot_code(*kind);
            }
        }
        payload.push(flags);
        let temp_centi = if temp.is_nan() {
            i16::MIN
        } else {
            (temp * 100.0).round() as i16
        };
        payload.extend_from_slice(&temp_centi.to_le_bytes());

        for (kind, image) in images {
            if let Some(image) = image {
                encode_image(&mut payload, kind, &image)?;
                image.release()?;
            }
        }

        self.write_block(BLOCK_CAPTURE, 0, timestamp, &payload)
    }

    /// Append one IMU sample. Valid only after [`Self::write_header`].
    pub fn write_imu_sample(&mut self, sample: &ImuSample) -> Result<()> {
        self.check_writable()?;
        let mut payload = Vec::with_capacity(IMU_BLOCK_SIZE);
        payload.extend_from_slice(&sample.acc_timestamp_usec.to_le_bytes());
        for v in sample.acc {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload.extend_from_slice(&sample.gyro_timestamp_usec.to_le_bytes());
        for v in sample.gyro {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload.extend_from_slice(&sample.temperature_c.to_le_bytes());
        self.write_block(BLOCK_IMU, 0, sample.acc_timestamp_usec, &payload)
    }

    /// Append a payload to a custom track registered with
    /// [`Self::add_custom_track`].
    pub fn write_custom_track_data(
        &mut self,
        track_id: u16,
        device_timestamp_usec: u64,
        data: &[u8],
    ) -> Result<()> {
        self.check_writable()?;
        if !self.header.tracks.iter().any(|t| t.id == track_id) {
            return Err(TofcamError::InvalidState(format!(
                "unknown track id {}",
                track_id
            )));
        }
        self.write_block(BLOCK_DATA, track_id, device_timestamp_usec, data)
    }

    /// Force written data to durable storage. Blocks already written
    /// survive a crash even though the footer is missing; playback will
    /// rebuild the index by scanning.
    pub fn flush(&mut self) -> Result<()> {
        self.check_writable()?;
        let file = self.file_mut()?;
        file.flush()?;
        file.get_ref().sync_data()?;
        self.state = RecorderState::Flushed;
        Ok(())
    }

    /// Finalize the file: write the seek index and footer, then
    /// invalidate the handle.
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.state == RecorderState::Closed {
            return Ok(());
        }
        if self.state == RecorderState::Created {
            // Nothing recorded; leave a valid, empty container behind.
            self.write_header()?;
        }

        let index_offset = self.bytes_written;
        let count = self.index.len() as u32;
        // Move the index out so the borrow of `self.file` stays clean.
        let entries = std::mem::take(&mut self.index);
        let file = self.file_mut()?;
        for entry in &entries {
            file.write_all(&entry.kind.to_le_bytes())?;
            file.write_all(&entry.track.to_le_bytes())?;
            file.write_all(&entry.timestamp_usec.to_le_bytes())?;
            file.write_all(&entry.offset.to_le_bytes())?;
        }
        file.write_all(&index_offset.to_le_bytes())?;
        file.write_all(&count.to_le_bytes())?;
        file.write_all(FOOTER_MAGIC)?;
        file.flush()?;
        file.get_ref().sync_all()?;

        self.file = None;
        self.state = RecorderState::Closed;
        log::info!(
            "closed recording {} ({} blocks)",
            self.path.display(),
            count
        );
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        match self.state {
            RecorderState::HeaderWritten | RecorderState::Flushed => Ok(()),
            RecorderState::Created => Err(TofcamError::InvalidState(
                "write_header required before writing".into(),
            )),
            RecorderState::Closed => Err(TofcamError::InvalidState(
                "recording not found (handle closed)".into(),
            )),
        }
    }

    fn file_mut(&mut self) -> Result<&mut BufWriter<File>> {
        self.file.as_mut().ok_or_else(|| {
            TofcamError::InvalidState("recording not found (handle closed)".into())
        })
    }

    fn write_block(&mut self, kind: u16, track: u16, timestamp: u64, payload: &[u8]) -> Result<()> {
        let offset = self.bytes_written;
        let len = payload.len() as u32;
        let file = self.file_mut()?;
        file.write_all(&kind.to_le_bytes())?;
        file.write_all(&track.to_le_bytes())?;
        file.write_all(&timestamp.to_le_bytes())?;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(payload)?;

        // Only index the block once it is fully on its way to disk; a
        // failed in-flight write aborts just that block.
        self.bytes_written += (BLOCK_HEADER_SIZE + payload.len()) as u64;
        self.index.push(IndexEntry {
            kind,
            track,
            timestamp_usec: timestamp,
            offset,
        });
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.state != RecorderState::Closed {
            if let Err(e) = self.close_inner() {
                log::warn!("recording close on drop failed: {}", e);
            }
        }
    }
}

pub(crate) fn slot_code(kind: ImageKind) -> u8 {
    match kind {
        ImageKind::Color => 0,
        ImageKind::Depth => 1,
        ImageKind::Ir => 2,
    }
}

pub(crate) fn format_code(format: ImageFormat) -> u8 {
    match format {
        ImageFormat::ColorMjpg => 0,
        ImageFormat::ColorNv12 => 1,
        ImageFormat::ColorYuy2 => 2,
        ImageFormat::ColorBgra32 => 3,
        ImageFormat::Depth16 => 4,
        ImageFormat::Ir16 => 5,
        ImageFormat::Custom => 6,
    }
}

pub(crate) fn format_from_code(code: u8) -> Option<ImageFormat> {
    Some(match code {
        0 => ImageFormat::ColorMjpg,
        1 => ImageFormat::ColorNv12,
        2 => ImageFormat::ColorYuy2,
        3 => ImageFormat::ColorBgra32,
        4 => ImageFormat::Depth16,
        5 => ImageFormat::Ir16,
        6 => ImageFormat::Custom,
        _ => return None,
    })
}

/// Image record inside a capture block:
/// [slot u8, format u8, width u32, height u32, stride u32,
///  device_ts u64, system_ts u64, exposure u64, wb u32, iso u32,
///  len u32, bytes...]
fn encode_image(out: &mut Vec<u8>, kind: ImageKind, image: &Image) -> Result<()> {
    out.push(slot_code(kind));
    out.push(format_code(image.format()?));
    out.extend_from_slice(&image.width()?.to_le_bytes());
    out.extend_from_slice(&image.height()?.to_le_bytes());
    out.extend_from_slice(&image.stride()?.to_le_bytes());
    out.extend_from_slice(&image.device_timestamp_usec()?.to_le_bytes());
    out.extend_from_slice(&image.system_timestamp_nsec()?.to_le_bytes());
    out.extend_from_slice(&image.exposure_usec()?.to_le_bytes());
    out.extend_from_slice(&image.white_balance_k()?.to_le_bytes());
    out.extend_from_slice(&image.iso_speed()?.to_le_bytes());
    image.with_buffer(|buf| {
        out.extend_from_slice(&(buf.len() as u32).to_le_bytes());
        out.extend_from_slice(buf);
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColorFormat, ColorResolution, DepthMode};

    fn test_config() -> DeviceConfiguration {
        DeviceConfiguration {
            color_format: ColorFormat::Bgra32,
            color_resolution: ColorResolution::R720p,
            depth_mode: DepthMode::NfovUnbinned,
            synchronized_images_only: true,
            ..Default::default()
        }
    }

    #[test]
    fn track_and_tag_additions_freeze_at_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec =
            Recorder::create(dir.path().join("a.tcrf"), &test_config(), None).unwrap();
        rec.add_tag("rig", "bench-3").unwrap();
        let track = rec.add_custom_track("gaze").unwrap();
        assert!(track >= FIRST_CUSTOM_TRACK_ID);
        rec.write_header().unwrap();

        assert!(matches!(
            rec.add_tag("late", "x"),
            Err(TofcamError::InvalidState(_))
        ));
        assert!(matches!(
            rec.add_custom_track("late"),
            Err(TofcamError::InvalidState(_))
        ));
        rec.close().unwrap();
    }

    #[test]
    fn writes_require_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec =
            Recorder::create(dir.path().join("b.tcrf"), &test_config(), None).unwrap();
        let sample = ImuSample {
            acc: [0.0, 0.0, 9.8],
            acc_timestamp_usec: 10,
            gyro: [0.0; 3],
            gyro_timestamp_usec: 12,
            temperature_c: 22.0,
        };
        assert!(matches!(
            rec.write_imu_sample(&sample),
            Err(TofcamError::InvalidState(_))
        ));
        rec.write_header().unwrap();
        rec.write_imu_sample(&sample).unwrap();
        rec.close().unwrap();
    }

    #[test]
    fn empty_capture_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec =
            Recorder::create(dir.path().join("c.tcrf"), &test_config(), None).unwrap();
        rec.write_header().unwrap();
        let empty = Capture::new();
        assert!(matches!(
            rec.write_capture(&empty),
            Err(TofcamError::InvalidState(_))
        ));
        rec.close().unwrap();
    }

    #[test]
    fn unknown_custom_track_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec =
            Recorder::create(dir.path().join("d.tcrf"), &test_config(), None).unwrap();
        rec.write_header().unwrap();
        assert!(matches!(
            rec.write_custom_track_data(0x0100, 5, b"x"),
            Err(TofcamError::InvalidState(_))
        ));
        rec.close().unwrap();
    }
}
