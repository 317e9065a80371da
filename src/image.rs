//! Image buffers and captures.
//!
//! An [`Image`] is a typed pixel buffer plus timing and exposure
//! metadata. A [`Capture`] bundles up to one color, depth and IR image
//! from a single trigger together with the device temperature. Both are
//! refcounted wrappers (see [`crate::handle`]): cloning is an explicit
//! `acquire`, and a released wrapper errors on further use.

use crate::handle::{Handle, Slot};
use crate::types::ImageFormat;
use crate::Result;

/// Backing storage for an image buffer.
enum PixelStore {
    Owned(Vec<u8>),
    External {
        data: Box<dyn AsRef<[u8]> + Send + Sync>,
        on_release: Option<Box<dyn FnOnce() + Send + Sync>>,
    },
}

impl PixelStore {
    fn bytes(&self) -> &[u8] {
        match self {
            PixelStore::Owned(v) => v,
            PixelStore::External { data, .. } => (**data).as_ref(),
        }
    }
}

impl Drop for PixelStore {
    fn drop(&mut self) {
        if let PixelStore::External { on_release, .. } = self {
            if let Some(cb) = on_release.take() {
                cb();
            }
        }
    }
}

pub(crate) struct ImageInner {
    format: ImageFormat,
    width: u32,
    height: u32,
    stride: u32,
    store: PixelStore,
    device_timestamp_usec: u64,
    system_timestamp_nsec: u64,
    exposure_usec: u64,
    white_balance_k: u32,
    iso_speed: u32,
}

/// A typed pixel buffer with metadata.
pub struct Image {
    handle: Handle<ImageInner>,
}

impl Image {
    /// Allocate a zero-filled image. `stride` of 0 picks the tight
    /// stride for the format.
    pub fn create(format: ImageFormat, width: u32, height: u32, stride: u32) -> Image {
        let stride = if stride == 0 {
            width * format.bytes_per_pixel() as u32
        } else {
            stride
        };
        Self::from_buffer(format, width, height, stride, vec![0; (stride * height) as usize])
    }

    /// Wrap an owned buffer.
    pub fn from_buffer(
        format: ImageFormat,
        width: u32,
        height: u32,
        stride: u32,
        buffer: Vec<u8>,
    ) -> Image {
        Image {
            handle: Handle::new(ImageInner {
                format,
                width,
                height,
                stride,
                store: PixelStore::Owned(buffer),
                device_timestamp_usec: 0,
                system_timestamp_nsec: 0,
                exposure_usec: 0,
                white_balance_k: 0,
                iso_speed: 0,
            }),
        }
    }

    /// Wrap a caller-supplied buffer. `on_release` runs exactly once
    /// when the last handle to this image is released.
    pub fn from_external(
        format: ImageFormat,
        width: u32,
        height: u32,
        stride: u32,
        data: Box<dyn AsRef<[u8]> + Send + Sync>,
        on_release: impl FnOnce() + Send + Sync + 'static,
    ) -> Image {
        Image {
            handle: Handle::new(ImageInner {
                format,
                width,
                height,
                stride,
                store: PixelStore::External {
                    data,
                    on_release: Some(Box::new(on_release)),
                },
                device_timestamp_usec: 0,
                system_timestamp_nsec: 0,
                exposure_usec: 0,
                white_balance_k: 0,
                iso_speed: 0,
            }),
        }
    }

    /// Increment the refcount and return a second wrapper.
    pub fn acquire(&self) -> Result<Image> {
        Ok(Image {
            handle: self.handle.acquire()?,
        })
    }

    /// Give up this wrapper's reference.
    pub fn release(self) -> Result<()> {
        self.handle.release()
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn format(&self) -> Result<ImageFormat> {
        self.handle.with(|i| i.format)
    }

    pub fn width(&self) -> Result<u32> {
        self.handle.with(|i| i.width)
    }

    pub fn height(&self) -> Result<u32> {
        self.handle.with(|i| i.height)
    }

    pub fn stride(&self) -> Result<u32> {
        self.handle.with(|i| i.stride)
    }

    pub fn device_timestamp_usec(&self) -> Result<u64> {
        self.handle.with(|i| i.device_timestamp_usec)
    }

    pub fn system_timestamp_nsec(&self) -> Result<u64> {
        self.handle.with(|i| i.system_timestamp_nsec)
    }

    /// Exposure time in microseconds. Zero on non-color images.
    pub fn exposure_usec(&self) -> Result<u64> {
        self.handle.with(|i| i.exposure_usec)
    }

    pub fn white_balance_k(&self) -> Result<u32> {
        self.handle.with(|i| i.white_balance_k)
    }

    pub fn iso_speed(&self) -> Result<u32> {
        self.handle.with(|i| i.iso_speed)
    }

    pub fn buffer_size(&self) -> Result<usize> {
        self.handle.with(|i| i.store.bytes().len())
    }

    /// Scoped read access to the pixel bytes.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.handle.with(|i| f(i.store.bytes()))
    }

    /// Copy the pixel bytes out.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.handle.with(|i| i.store.bytes().to_vec())
    }

    pub fn set_device_timestamp_usec(&self, ts: u64) -> Result<()> {
        self.handle.with_mut(|i| i.device_timestamp_usec = ts)
    }

    pub fn set_system_timestamp_nsec(&self, ts: u64) -> Result<()> {
        self.handle.with_mut(|i| i.system_timestamp_nsec = ts)
    }

    pub fn set_exposure_usec(&self, exposure: u64) -> Result<()> {
        self.handle.with_mut(|i| i.exposure_usec = exposure)
    }

    pub fn set_white_balance_k(&self, wb: u32) -> Result<()> {
        self.handle.with_mut(|i| i.white_balance_k = wb)
    }

    pub fn set_iso_speed(&self, iso: u32) -> Result<()> {
        self.handle.with_mut(|i| i.iso_speed = iso)
    }

    pub(crate) fn into_handle(self) -> Handle<ImageInner> {
        self.handle
    }

    pub(crate) fn from_handle(handle: Handle<ImageInner>) -> Image {
        Image { handle }
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Which image slot of a capture.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Color,
    Depth,
    Ir,
}

pub(crate) struct CaptureInner {
    color: Slot<ImageInner>,
    depth: Slot<ImageInner>,
    ir: Slot<ImageInner>,
    temperature_c: f32,
}

/// A bundle of time-aligned sensor images from one trigger.
pub struct Capture {
    handle: Handle<CaptureInner>,
}

impl Capture {
    /// Create an empty capture with no images bound.
    pub fn new() -> Capture {
        Capture {
            handle: Handle::new(CaptureInner {
                color: Slot::new(),
                depth: Slot::new(),
                ir: Slot::new(),
                temperature_c: f32::NAN,
            }),
        }
    }

    pub fn acquire(&self) -> Result<Capture> {
        Ok(Capture {
            handle: self.handle.acquire()?,
        })
    }

    pub fn release(self) -> Result<()> {
        self.handle.release()
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    /// Bind `image` to a slot, releasing any previously bound image
    /// first. The capture takes over the caller's reference.
    pub fn set_image(&self, kind: ImageKind, image: Image) -> Result<()> {
        let handle = image.into_handle();
        self.handle.with_mut(|c| match kind {
            ImageKind::Color => c.color.rebind(handle),
            ImageKind::Depth => c.depth.rebind(handle),
            ImageKind::Ir => c.ir.rebind(handle),
        })
    }

    /// Get an acquired wrapper for a slot's image, or `None` if the slot
    /// is unbound.
    pub fn image(&self, kind: ImageKind) -> Result<Option<Image>> {
        let acquired = self.handle.with(|c| {
            let slot = match kind {
                ImageKind::Color => &c.color,
                ImageKind::Depth => &c.depth,
                ImageKind::Ir => &c.ir,
            };
            slot.get().map(|h| h.acquire())
        })?;
        match acquired {
            Some(Ok(handle)) => Ok(Some(Image::from_handle(handle))),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    pub fn color_image(&self) -> Result<Option<Image>> {
        self.image(ImageKind::Color)
    }

    pub fn depth_image(&self) -> Result<Option<Image>> {
        self.image(ImageKind::Depth)
    }

    pub fn ir_image(&self) -> Result<Option<Image>> {
        self.image(ImageKind::Ir)
    }

    /// Device temperature in degrees Celsius, NaN when unknown.
    pub fn temperature_c(&self) -> Result<f32> {
        self.handle.with(|c| c.temperature_c)
    }

    pub fn set_temperature_c(&self, temp: f32) -> Result<()> {
        self.handle.with_mut(|c| c.temperature_c = temp)
    }

    /// Device timestamp of the capture: the earliest bound image's
    /// timestamp, or `None` when no image is bound.
    pub fn device_timestamp_usec(&self) -> Result<Option<u64>> {
        self.handle.with(|c| {
            [&c.color, &c.depth, &c.ir]
                .iter()
                .filter_map(|slot| slot.get())
                .filter_map(|h| h.with(|i| i.device_timestamp_usec).ok())
                .min()
        })
    }

    pub(crate) fn into_handle(self) -> Handle<CaptureInner> {
        self.handle
    }

    pub(crate) fn from_handle(handle: Handle<CaptureInner>) -> Capture {
        Capture { handle }
    }
}

impl Default for Capture {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn image_metadata_round_trip() {
        let img = Image::create(ImageFormat::Depth16, 320, 288, 0);
        assert_eq!(img.stride().unwrap(), 640);
        assert_eq!(img.buffer_size().unwrap(), 640 * 288);

        img.set_device_timestamp_usec(123_456).unwrap();
        img.set_exposure_usec(8_000).unwrap();
        assert_eq!(img.device_timestamp_usec().unwrap(), 123_456);
        assert_eq!(img.exposure_usec().unwrap(), 8_000);
    }

    #[test]
    fn image_survives_sibling_release() {
        let img = Image::create(ImageFormat::Ir16, 4, 4, 0);
        let img2 = img.acquire().unwrap();
        img2.release().unwrap();
        assert!(img.is_valid());
        assert_eq!(img.width().unwrap(), 4);
        img.release().unwrap();
    }

    #[test]
    fn external_buffer_release_callback_runs_once() {
        let released = Arc::new(AtomicU32::new(0));
        let released2 = released.clone();
        let data: Box<dyn AsRef<[u8]> + Send + Sync> = Box::new(vec![1u8, 2, 3, 4]);
        let img = Image::from_external(ImageFormat::ColorBgra32, 1, 1, 4, data, move || {
            released2.fetch_add(1, Ordering::SeqCst);
        });

        let img2 = img.acquire().unwrap();
        img.release().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 0);
        img2.release().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn capture_slot_rebind_releases_previous() {
        let cap = Capture::new();
        let first = Image::create(ImageFormat::Depth16, 2, 2, 0);
        let keep = first.acquire().unwrap();
        cap.set_image(ImageKind::Depth, first).unwrap();

        // Rebinding drops the capture's reference to `first`; our extra
        // acquire keeps it alive until released below.
        let second = Image::create(ImageFormat::Depth16, 4, 4, 0);
        cap.set_image(ImageKind::Depth, second).unwrap();

        let bound = cap.depth_image().unwrap().unwrap();
        assert_eq!(bound.width().unwrap(), 4);
        bound.release().unwrap();
        keep.release().unwrap();
    }

    #[test]
    fn capture_timestamp_is_earliest_image() {
        let cap = Capture::new();
        assert_eq!(cap.device_timestamp_usec().unwrap(), None);

        let color = Image::create(ImageFormat::ColorBgra32, 2, 2, 0);
        color.set_device_timestamp_usec(2_000).unwrap();
        let depth = Image::create(ImageFormat::Depth16, 2, 2, 0);
        depth.set_device_timestamp_usec(1_500).unwrap();
        cap.set_image(ImageKind::Color, color).unwrap();
        cap.set_image(ImageKind::Depth, depth).unwrap();

        assert_eq!(cap.device_timestamp_usec().unwrap(), Some(1_500));
    }
}
