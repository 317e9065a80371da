//! Coordinate transformations between sensor frames.
//!
//! Built on the Brown-Conrady rational distortion model (6 radial +
//! 2 tangential + center-of-distortion terms). Forward projection is
//! closed-form; unprojection inverts the distortion iteratively. Both
//! legs use the same model so results stay compatible with calibration
//! blobs captured from real hardware.
//!
//! Every 2D-producing operation distinguishes "geometrically out of the
//! modeled field of view" (`Ok(None)`) from a hard failure (`Err`): the
//! former is a successful call.

use crate::calibration::{Calibration, Intrinsics, SensorFrame};
use crate::image::Image;
use crate::types::ImageFormat;
use crate::{Result, TofcamError};

/// Iteration cap for the inverse distortion solve.
const UNPROJECT_ITERATIONS: usize = 20;
/// Convergence threshold on the reprojected normalized coordinates.
const UNPROJECT_EPSILON: f32 = 1e-6;

/// Default max reprojection distance, in depth-image pixels, for the
/// epipolar search of [`Transformation::color_pixel_to_depth_pixel`].
pub const DEFAULT_EPIPOLAR_TOLERANCE_PX: f32 = 1.0;

/// Depth range walked by the epipolar search, millimeters.
const EPIPOLAR_DEPTH_MIN_MM: f32 = 250.0;
const EPIPOLAR_DEPTH_MAX_MM: f32 = 5460.0;

/// Transformation engine bound to one calibration (and therefore one
/// `(depth_mode, color_resolution)` pair).
pub struct Transformation {
    calibration: Calibration,
    epipolar_tolerance_px: f32,
    /// Per-pixel undistorted ray table for the depth camera; NaN marks
    /// pixels where the inverse distortion solve did not converge.
    depth_rays: Option<Vec<[f32; 2]>>,
}

impl Transformation {
    pub fn new(calibration: &Calibration) -> Transformation {
        let depth_rays = if calibration.depth_camera.is_enabled() {
            Some(build_ray_table(
                &calibration.depth_camera.intrinsics,
                calibration.depth_camera.width,
                calibration.depth_camera.height,
            ))
        } else {
            None
        };
        Transformation {
            calibration: calibration.clone(),
            epipolar_tolerance_px: DEFAULT_EPIPOLAR_TOLERANCE_PX,
            depth_rays,
        }
    }

    /// Override the epipolar search tolerance (pixels).
    pub fn set_epipolar_tolerance(&mut self, tolerance_px: f32) {
        self.epipolar_tolerance_px = tolerance_px;
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Transform a 3D point between sensor frames. Identity when
    /// `from == to`.
    pub fn point_3d_to_point_3d(
        &self,
        point_mm: [f32; 3],
        from: SensorFrame,
        to: SensorFrame,
    ) -> [f32; 3] {
        if from == to {
            return point_mm;
        }
        self.calibration.extrinsics(from, to).apply(point_mm)
    }

    /// Back-project a pixel of `from`'s image through its distortion
    /// model, scale to `depth_mm`, and express the point in `to`'s frame.
    pub fn pixel_2d_to_point_3d(
        &self,
        pixel: [f32; 2],
        depth_mm: f32,
        from: SensorFrame,
        to: SensorFrame,
    ) -> Result<Option<[f32; 3]>> {
        let camera = self.camera_intrinsics(from)?;
        let ray = match unproject(camera, pixel) {
            Some(r) => r,
            None => return Ok(None),
        };
        let point = [ray[0] * depth_mm, ray[1] * depth_mm, depth_mm];
        Ok(Some(self.point_3d_to_point_3d(point, from, to)))
    }

    /// Express `point_mm` in `to`'s frame and forward-project through
    /// `to`'s distortion model.
    pub fn point_3d_to_pixel_2d(
        &self,
        point_mm: [f32; 3],
        from: SensorFrame,
        to: SensorFrame,
    ) -> Result<Option<[f32; 2]>> {
        let camera = self.camera_intrinsics(to)?;
        let point = self.point_3d_to_point_3d(point_mm, from, to);
        Ok(project(camera, point))
    }

    /// Map a pixel (with known depth) from one camera's image geometry
    /// into another's. Identity when `from == to`.
    pub fn pixel_2d_to_pixel_2d(
        &self,
        pixel: [f32; 2],
        depth_mm: f32,
        from: SensorFrame,
        to: SensorFrame,
    ) -> Result<Option<[f32; 2]>> {
        if from == to {
            return Ok(Some(pixel));
        }
        match self.pixel_2d_to_point_3d(pixel, depth_mm, from, to)? {
            Some(point) => Ok(project(self.camera_intrinsics(to)?, point)),
            None => Ok(None),
        }
    }

    /// Find the depth sample matching a color pixel by searching along
    /// the epipolar line in the depth image. Sparse alternative to
    /// [`Self::depth_image_to_color_camera`] when only a few pixels need
    /// mapping. Returns `Ok(None)` when no sample reprojects within the
    /// configured tolerance.
    pub fn color_pixel_to_depth_pixel(
        &self,
        pixel: [f32; 2],
        depth_image: &Image,
    ) -> Result<Option<[f32; 2]>> {
        let (width, height) = self.check_depth_image(depth_image)?;

        // Project the color ray at the near and far depth bounds into
        // the depth image; the match lies on the segment between them.
        let near =
            self.pixel_2d_to_pixel_2d(pixel, EPIPOLAR_DEPTH_MIN_MM, SensorFrame::Color, SensorFrame::Depth)?;
        let far =
            self.pixel_2d_to_pixel_2d(pixel, EPIPOLAR_DEPTH_MAX_MM, SensorFrame::Color, SensorFrame::Depth)?;
        let (near, far) = match (near, far) {
            (Some(n), Some(f)) => (n, f),
            _ => return Ok(None),
        };

        let steps = {
            let dx = far[0] - near[0];
            let dy = far[1] - near[1];
            (dx.abs().max(dy.abs()).ceil() as usize).max(1)
        };

        let mut best: Option<([f32; 2], f32)> = None;
        depth_image.with_buffer(|buf| -> Result<()> {
            for i in 0..=steps {
                let t = i as f32 / steps as f32;
                let du = near[0] + (far[0] - near[0]) * t;
                let dv = near[1] + (far[1] - near[1]) * t;
                let (ui, vi) = (du.round() as i64, dv.round() as i64);
                if ui < 0 || vi < 0 || ui >= width as i64 || vi >= height as i64 {
                    continue;
                }
                let depth = depth_at(buf, width, ui as u32, vi as u32);
                if depth == 0 {
                    continue;
                }
                let candidate = [ui as f32, vi as f32];
                let back = self.pixel_2d_to_pixel_2d(
                    candidate,
                    depth as f32,
                    SensorFrame::Depth,
                    SensorFrame::Color,
                )?;
                if let Some(back) = back {
                    let err = ((back[0] - pixel[0]).powi(2) + (back[1] - pixel[1]).powi(2)).sqrt();
                    if err <= self.epipolar_tolerance_px
                        && best.map_or(true, |(_, prev)| err < prev)
                    {
                        best = Some((candidate, err));
                    }
                }
            }
            Ok(())
        })??;

        Ok(best.map(|(px, _)| px))
    }

    /// Dense remap of a depth image into the color camera's pixel
    /// geometry. The output has the color sensor's dimensions; pixels no
    /// depth sample lands on are zero. Preferred over the sparse search
    /// when most pixels need conversion.
    pub fn depth_image_to_color_camera(&self, depth_image: &Image) -> Result<Image> {
        let (dwidth, dheight) = self.check_depth_image(depth_image)?;
        let color = &self.calibration.color_camera;
        if !color.is_enabled() {
            return Err(TofcamError::InvalidState(
                "color camera disabled in bound calibration".into(),
            ));
        }
        let rays = self.depth_rays.as_ref().expect("depth enabled implies ray table");
        let extr = self.calibration.extrinsics(SensorFrame::Depth, SensorFrame::Color);

        let (cwidth, cheight) = (color.width, color.height);
        let mut out = vec![0u16; (cwidth * cheight) as usize];
        depth_image.with_buffer(|buf| {
            for v in 0..dheight {
                for u in 0..dwidth {
                    let depth = depth_at(buf, dwidth, u, v) as f32;
                    if depth == 0.0 {
                        continue;
                    }
                    let ray = rays[(v * dwidth + u) as usize];
                    if ray[0].is_nan() {
                        continue;
                    }
                    let point = extr.apply([ray[0] * depth, ray[1] * depth, depth]);
                    let projected = match project(&color.intrinsics, point) {
                        Some(p) => p,
                        None => continue,
                    };
                    let (cu, cv) = (projected[0].round() as i64, projected[1].round() as i64);
                    if cu < 0 || cv < 0 || cu >= cwidth as i64 || cv >= cheight as i64 {
                        continue;
                    }
                    let z = point[2].round().clamp(0.0, u16::MAX as f32) as u16;
                    // Z-test: keep the nearest surface on collisions.
                    let cell = &mut out[(cv as u32 * cwidth + cu as u32) as usize];
                    if *cell == 0 || z < *cell {
                        *cell = z;
                    }
                }
            }
        })?;

        let mut bytes = Vec::with_capacity(out.len() * 2);
        for z in out {
            bytes.extend_from_slice(&z.to_le_bytes());
        }
        let remapped = Image::from_buffer(ImageFormat::Depth16, cwidth, cheight, cwidth * 2, bytes);
        remapped.set_device_timestamp_usec(depth_image.device_timestamp_usec()?)?;
        remapped.set_system_timestamp_nsec(depth_image.system_timestamp_nsec()?)?;
        Ok(remapped)
    }

    /// Produce one (X, Y, Z) millimeter triplet per depth pixel,
    /// expressed in `camera`'s frame. `camera` selects the geometry the
    /// input depth image is in: `Depth` for a raw depth image, `Color`
    /// for the output of [`Self::depth_image_to_color_camera`].
    pub fn depth_image_to_point_cloud(
        &self,
        depth_image: &Image,
        camera: SensorFrame,
    ) -> Result<Image> {
        let intr = self.camera_intrinsics(camera)?;
        let (cam_w, cam_h) = match camera {
            SensorFrame::Depth => (
                self.calibration.depth_camera.width,
                self.calibration.depth_camera.height,
            ),
            SensorFrame::Color => (
                self.calibration.color_camera.width,
                self.calibration.color_camera.height,
            ),
            _ => unreachable!("camera_intrinsics rejects non-camera frames"),
        };
        let (width, height) = (depth_image.width()?, depth_image.height()?);
        if depth_image.format()? != ImageFormat::Depth16 || (width, height) != (cam_w, cam_h) {
            return Err(TofcamError::InvalidState(
                "depth image does not match the bound camera geometry".into(),
            ));
        }

        let mut bytes = Vec::with_capacity((width * height) as usize * 6);
        depth_image.with_buffer(|buf| {
            for v in 0..height {
                for u in 0..width {
                    let depth = depth_at(buf, width, u, v) as f32;
                    let ray = if depth == 0.0 {
                        None
                    } else if camera == SensorFrame::Depth {
                        let r = self.depth_rays.as_ref().expect("ray table")[(v * width + u) as usize];
                        if r[0].is_nan() {
                            None
                        } else {
                            Some(r)
                        }
                    } else {
                        unproject(intr, [u as f32, v as f32])
                    };
                    let (x, y, z) = match ray {
                        Some(r) => (
                            clamp_mm(r[0] * depth),
                            clamp_mm(r[1] * depth),
                            clamp_mm(depth),
                        ),
                        None => (0, 0, 0),
                    };
                    bytes.extend_from_slice(&x.to_le_bytes());
                    bytes.extend_from_slice(&y.to_le_bytes());
                    bytes.extend_from_slice(&z.to_le_bytes());
                }
            }
        })?;

        let cloud = Image::from_buffer(ImageFormat::Custom, width, height, width * 6, bytes);
        cloud.set_device_timestamp_usec(depth_image.device_timestamp_usec()?)?;
        cloud.set_system_timestamp_nsec(depth_image.system_timestamp_nsec()?)?;
        Ok(cloud)
    }

    fn camera_intrinsics(&self, frame: SensorFrame) -> Result<&Intrinsics> {
        let camera = self.calibration.camera(frame).ok_or_else(|| {
            TofcamError::InvalidState(format!("frame {:?} has no intrinsics", frame))
        })?;
        if !camera.is_enabled() {
            return Err(TofcamError::InvalidState(format!(
                "camera {:?} disabled in bound calibration",
                frame
            )));
        }
        if camera.intrinsics.fx == 0.0 || camera.intrinsics.fy == 0.0 {
            return Err(TofcamError::Format("degenerate focal length".into()));
        }
        Ok(&camera.intrinsics)
    }

    fn check_depth_image(&self, depth_image: &Image) -> Result<(u32, u32)> {
        let depth = &self.calibration.depth_camera;
        if !depth.is_enabled() {
            return Err(TofcamError::InvalidState(
                "depth camera disabled in bound calibration".into(),
            ));
        }
        let (width, height) = (depth_image.width()?, depth_image.height()?);
        if depth_image.format()? != ImageFormat::Depth16
            || (width, height) != (depth.width, depth.height)
        {
            return Err(TofcamError::InvalidState(
                "depth image does not match the bound calibration geometry".into(),
            ));
        }
        Ok((width, height))
    }
}

#[inline]
fn depth_at(buf: &[u8], width: u32, u: u32, v: u32) -> u16 {
    let idx = ((v * width + u) * 2) as usize;
    u16::from_le_bytes([buf[idx], buf[idx + 1]])
}

#[inline]
fn clamp_mm(v: f32) -> i16 {
    v.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Forward Brown-Conrady rational projection of a camera-frame point.
/// `None` when the point is behind the image plane or beyond the
/// metric validity radius.
fn project(intr: &Intrinsics, point_mm: [f32; 3]) -> Option<[f32; 2]> {
    if point_mm[2] <= 0.0 {
        return None;
    }
    let xp = point_mm[0] / point_mm[2] - intr.codx;
    let yp = point_mm[1] / point_mm[2] - intr.cody;

    let r2 = xp * xp + yp * yp;
    if intr.metric_radius > 0.0 && r2 > intr.metric_radius * intr.metric_radius {
        return None;
    }

    let num = 1.0 + r2 * (intr.k1 + r2 * (intr.k2 + r2 * intr.k3));
    let den = 1.0 + r2 * (intr.k4 + r2 * (intr.k5 + r2 * intr.k6));
    if den == 0.0 {
        return None;
    }
    let d = num / den;

    let xd = xp * d + 2.0 * intr.p1 * xp * yp + intr.p2 * (r2 + 2.0 * xp * xp);
    let yd = yp * d + intr.p1 * (r2 + 2.0 * yp * yp) + 2.0 * intr.p2 * xp * yp;

    Some([
        (xd + intr.codx) * intr.fx + intr.cx,
        (yd + intr.cody) * intr.fy + intr.cy,
    ])
}

/// Inverse projection: pixel to unit-depth ray (x/z, y/z). Iteratively
/// inverts the distortion; `None` when the solve does not converge or
/// lands outside the validity radius.
fn unproject(intr: &Intrinsics, pixel: [f32; 2]) -> Option<[f32; 2]> {
    let xd = (pixel[0] - intr.cx) / intr.fx - intr.codx;
    let yd = (pixel[1] - intr.cy) / intr.fy - intr.cody;

    let mut x = xd;
    let mut y = yd;
    let mut converged = false;
    for _ in 0..UNPROJECT_ITERATIONS {
        let r2 = x * x + y * y;
        let num = 1.0 + r2 * (intr.k1 + r2 * (intr.k2 + r2 * intr.k3));
        let den = 1.0 + r2 * (intr.k4 + r2 * (intr.k5 + r2 * intr.k6));
        if num == 0.0 || den == 0.0 {
            return None;
        }
        let inv_d = den / num;
        let dx = 2.0 * intr.p1 * x * y + intr.p2 * (r2 + 2.0 * x * x);
        let dy = intr.p1 * (r2 + 2.0 * y * y) + 2.0 * intr.p2 * x * y;
        let xn = (xd - dx) * inv_d;
        let yn = (yd - dy) * inv_d;
        if (xn - x).abs() < UNPROJECT_EPSILON && (yn - y).abs() < UNPROJECT_EPSILON {
            x = xn;
            y = yn;
            converged = true;
            break;
        }
        x = xn;
        y = yn;
    }
    if !converged {
        return None;
    }

    let r2 = x * x + y * y;
    if intr.metric_radius > 0.0 && r2 > intr.metric_radius * intr.metric_radius {
        return None;
    }
    Some([x + intr.codx, y + intr.cody])
}

/// Precompute the unprojected ray per pixel; NaN marks invalid pixels.
fn build_ray_table(intr: &Intrinsics, width: u32, height: u32) -> Vec<[f32; 2]> {
    let mut table = Vec::with_capacity((width * height) as usize);
    for v in 0..height {
        for u in 0..width {
            table.push(
                unproject(intr, [u as f32, v as f32]).unwrap_or([f32::NAN, f32::NAN]),
            );
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::test_fixtures::bound_calibration;

    fn engine() -> Transformation {
        Transformation::new(&bound_calibration())
    }

    /// Synthetic depth image in the bound NFOV-unbinned geometry with a
    /// constant depth plane.
    fn flat_depth_image(depth_mm: u16) -> Image {
        let cal = bound_calibration();
        let (w, h) = (cal.depth_camera.width, cal.depth_camera.height);
        let mut bytes = Vec::with_capacity((w * h) as usize * 2);
        for _ in 0..w * h {
            bytes.extend_from_slice(&depth_mm.to_le_bytes());
        }
        let img = Image::from_buffer(ImageFormat::Depth16, w, h, w * 2, bytes);
        img.set_device_timestamp_usec(1_000).unwrap();
        img
    }

    #[test]
    fn point_3d_identity_when_frames_equal() {
        let t = engine();
        let p = [12.5f32, -7.0, 430.0];
        assert_eq!(t.point_3d_to_point_3d(p, SensorFrame::Gyro, SensorFrame::Gyro), p);
    }

    #[test]
    fn project_unproject_round_trip() {
        let t = engine();
        // Pixels spread over the central region of the depth image.
        for &pixel in &[[320.0f32, 288.0], [200.0, 150.0], [450.0, 400.0], [100.0, 288.0]] {
            let point = t
                .pixel_2d_to_point_3d(pixel, 1000.0, SensorFrame::Depth, SensorFrame::Depth)
                .unwrap()
                .expect("pixel should unproject");
            let back = t
                .point_3d_to_pixel_2d(point, SensorFrame::Depth, SensorFrame::Depth)
                .unwrap()
                .expect("point should project");
            assert!(
                (back[0] - pixel[0]).abs() < 1e-2 && (back[1] - pixel[1]).abs() < 1e-2,
                "{:?} -> {:?}",
                pixel,
                back
            );
        }
    }

    #[test]
    fn behind_image_plane_is_invalid_not_error() {
        let t = engine();
        let behind = [0.0f32, 0.0, -500.0];
        let result = t
            .point_3d_to_pixel_2d(behind, SensorFrame::Depth, SensorFrame::Depth)
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn pixel_2d_to_2d_identity_short_circuit() {
        let t = engine();
        let px = [17.25f32, 93.5];
        let out = t
            .pixel_2d_to_pixel_2d(px, 789.0, SensorFrame::Color, SensorFrame::Color)
            .unwrap();
        assert_eq!(out, Some(px));
    }

    #[test]
    fn depth_to_color_pixel_mapping_consistency() {
        let t = engine();
        // Center depth pixel at 1 m maps into the color image; mapping
        // back lands on the original within tolerance.
        let dpx = [320.0f32, 288.0];
        let cpx = t
            .pixel_2d_to_pixel_2d(dpx, 1000.0, SensorFrame::Depth, SensorFrame::Color)
            .unwrap()
            .expect("center should stay in view");
        // The color camera sits 32 mm to the side; expect a bounded,
        // nonzero disparity.
        assert!((cpx[0] - dpx[0]).abs() < 200.0);
        let back = t
            .pixel_2d_to_pixel_2d(cpx, 1000.0, SensorFrame::Color, SensorFrame::Depth)
            .unwrap()
            .expect("should map back");
        // Depth changes slightly across frames; allow a couple pixels.
        assert!((back[0] - dpx[0]).abs() < 3.0 && (back[1] - dpx[1]).abs() < 3.0);
    }

    #[test]
    fn point_cloud_center_pixel_points_forward() {
        let t = engine();
        let depth = flat_depth_image(1200);
        let cloud = t
            .depth_image_to_point_cloud(&depth, SensorFrame::Depth)
            .unwrap();
        assert_eq!(cloud.format().unwrap(), ImageFormat::Custom);
        assert_eq!(cloud.width().unwrap(), 640);

        // Principal point: X and Y near zero, Z = depth.
        let (cx, cy) = (320u32, 288u32);
        cloud
            .with_buffer(|buf| {
                let idx = ((cy * 640 + cx) * 6) as usize;
                let x = i16::from_le_bytes([buf[idx], buf[idx + 1]]);
                let y = i16::from_le_bytes([buf[idx + 2], buf[idx + 3]]);
                let z = i16::from_le_bytes([buf[idx + 4], buf[idx + 5]]);
                assert!(x.abs() < 10, "x={}", x);
                assert!(y.abs() < 10, "y={}", y);
                assert_eq!(z, 1200);
            })
            .unwrap();
    }

    #[test]
    fn dense_remap_into_color_geometry() {
        let t = engine();
        let depth = flat_depth_image(1500);
        let remapped = t.depth_image_to_color_camera(&depth).unwrap();
        assert_eq!(remapped.width().unwrap(), 1280);
        assert_eq!(remapped.height().unwrap(), 720);
        assert_eq!(remapped.device_timestamp_usec().unwrap(), 1_000);

        // The center of the color image looks at the flat plane; its
        // remapped depth must be close to the plane distance.
        remapped
            .with_buffer(|buf| {
                let (u, v) = (640u32, 360u32);
                let idx = ((v * 1280 + u) * 2) as usize;
                let z = u16::from_le_bytes([buf[idx], buf[idx + 1]]);
                assert!(z > 0, "center pixel not covered by remap");
                assert!((z as i32 - 1500).abs() < 30, "z={}", z);
            })
            .unwrap();
    }

    #[test]
    fn epipolar_search_finds_flat_plane_sample() {
        let mut t = engine();
        // The color camera's focal length is ~2.5x the depth camera's in
        // pixels, so one depth pixel of slack is ~2.5 color pixels.
        t.set_epipolar_tolerance(3.0);
        let depth = flat_depth_image(1000);
        // Map the depth center into color, then search back for it.
        let cpx = t
            .pixel_2d_to_pixel_2d([320.0, 288.0], 1000.0, SensorFrame::Depth, SensorFrame::Color)
            .unwrap()
            .unwrap();
        let found = t
            .color_pixel_to_depth_pixel(cpx, &depth)
            .unwrap()
            .expect("plane sample should be found");
        assert!((found[0] - 320.0).abs() <= 2.0 && (found[1] - 288.0).abs() <= 2.0);
    }

    #[test]
    fn epipolar_search_misses_empty_depth() {
        let t = engine();
        let cal = bound_calibration();
        let (w, h) = (cal.depth_camera.width, cal.depth_camera.height);
        let empty = Image::from_buffer(
            ImageFormat::Depth16,
            w,
            h,
            w * 2,
            vec![0u8; (w * h) as usize * 2],
        );
        let found = t.color_pixel_to_depth_pixel([640.0, 360.0], &empty).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn wrong_geometry_is_invalid_state() {
        let t = engine();
        let tiny = Image::from_buffer(ImageFormat::Depth16, 4, 4, 8, vec![0u8; 32]);
        assert!(matches!(
            t.depth_image_to_color_camera(&tiny),
            Err(TofcamError::InvalidState(_))
        ));
    }
}
