//! Camera calibration model.
//!
//! The TC-200 ships a factory calibration blob (JSON) holding
//! resolution-normalized intrinsics per camera and the extrinsic chain
//! between sensor frames. [`Calibration::from_raw`] binds the blob to one
//! `(depth_mode, color_resolution)` pair, denormalizing intrinsics to
//! that pixel geometry and densifying the extrinsic chain into a full
//! ordered-pair table. A bound calibration is only meaningful for the
//! mode pair it was retrieved with.

use crate::types::{ColorResolution, DepthMode};
use crate::{Result, TofcamError};
use serde::{Deserialize, Serialize};

/// Sensor coordinate frames with extrinsics between every ordered pair.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorFrame {
    Depth = 0,
    Color = 1,
    Gyro = 2,
    Accel = 3,
}

impl SensorFrame {
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Brown-Conrady rational intrinsic model.
///
/// In the raw blob, `cx`/`cy`/`fx`/`fy` are normalized to the sensor
/// dimensions; after binding they are in pixels. Distortion coefficients
/// operate on normalized ray coordinates and are resolution-invariant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub cx: f32,
    pub cy: f32,
    pub fx: f32,
    pub fy: f32,
    /// Radial distortion numerator terms.
    pub k1: f32,
    pub k2: f32,
    pub k3: f32,
    /// Radial distortion denominator terms.
    pub k4: f32,
    pub k5: f32,
    pub k6: f32,
    /// Center of distortion offset, normalized units.
    pub codx: f32,
    pub cody: f32,
    /// Tangential distortion.
    pub p1: f32,
    pub p2: f32,
    /// Maximum radius (normalized units) within which the distortion
    /// model is metrically valid.
    pub metric_radius: f32,
}

/// Rigid transform between two sensor frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    /// 3x3 row-major rotation matrix.
    pub rotation: [[f32; 3]; 3],
    /// Translation in millimeters.
    pub translation_mm: [f32; 3],
}

impl Extrinsics {
    pub fn identity() -> Extrinsics {
        Extrinsics {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation_mm: [0.0, 0.0, 0.0],
        }
    }

    /// Apply to a point: `R * p + t`.
    pub fn apply(&self, p: [f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + self.translation_mm[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + self.translation_mm[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + self.translation_mm[2],
        ]
    }

    /// Inverse transform: `R^T * (p - t)`.
    pub fn invert(&self) -> Extrinsics {
        let r = &self.rotation;
        let rt = [
            [r[0][0], r[1][0], r[2][0]],
            [r[0][1], r[1][1], r[2][1]],
            [r[0][2], r[1][2], r[2][2]],
        ];
        let t = self.translation_mm;
        let neg = [
            -(rt[0][0] * t[0] + rt[0][1] * t[1] + rt[0][2] * t[2]),
            -(rt[1][0] * t[0] + rt[1][1] * t[1] + rt[1][2] * t[2]),
            -(rt[2][0] * t[0] + rt[2][1] * t[1] + rt[2][2] * t[2]),
        ];
        Extrinsics {
            rotation: rt,
            translation_mm: neg,
        }
    }

    /// Composition `self ∘ other`: applies `other` first.
    pub fn compose(&self, other: &Extrinsics) -> Extrinsics {
        let a = &self.rotation;
        let b = &other.rotation;
        let mut rotation = [[0.0f32; 3]; 3];
        for (i, row) in rotation.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
            }
        }
        let translation_mm = self.apply(other.translation_mm);
        Extrinsics {
            rotation,
            translation_mm,
        }
    }
}

/// One camera's bound calibration: pixel-space intrinsics plus output
/// geometry. `width == 0` means the camera is disabled in the bound mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub intrinsics: Intrinsics,
    pub width: u32,
    pub height: u32,
}

impl CameraCalibration {
    pub fn is_enabled(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

// -- Raw factory blob layout --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RawCamera {
    pub intrinsics: Intrinsics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RawExtrinsic {
    pub from: SensorFrame,
    pub to: SensorFrame,
    pub rotation: [[f32; 3]; 3],
    pub translation_mm: [f32; 3],
}

/// The factory blob as stored on the device and embedded in recordings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RawCalibration {
    pub serial: String,
    pub depth_camera: RawCamera,
    pub color_camera: RawCamera,
    /// Extrinsic chain, conventionally anchored at the depth frame.
    pub extrinsics: Vec<RawExtrinsic>,
}

/// Calibration bound to one `(depth_mode, color_resolution)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub depth_camera: CameraCalibration,
    pub color_camera: CameraCalibration,
    /// Dense table over ordered `(from, to)` frame pairs.
    extrinsics: [[Extrinsics; 4]; 4],
    pub depth_mode: DepthMode,
    pub color_resolution: ColorResolution,
}

impl Calibration {
    /// Parse a raw calibration blob and bind it to a mode pair.
    pub fn from_raw(
        blob: &[u8],
        depth_mode: DepthMode,
        color_resolution: ColorResolution,
    ) -> Result<Calibration> {
        let raw: RawCalibration = serde_json::from_slice(blob)
            .map_err(|e| TofcamError::Format(format!("calibration blob: {}", e)))?;
        Self::from_parsed(&raw, depth_mode, color_resolution)
    }

    pub(crate) fn from_parsed(
        raw: &RawCalibration,
        depth_mode: DepthMode,
        color_resolution: ColorResolution,
    ) -> Result<Calibration> {
        if depth_mode == DepthMode::Off && color_resolution == ColorResolution::Off {
            return Err(TofcamError::InvalidState(
                "calibration requires at least one enabled camera".into(),
            ));
        }

        let (dw, dh) = depth_mode.dimensions();
        let (cw, ch) = color_resolution.dimensions();

        let depth_camera = CameraCalibration {
            intrinsics: denormalize(&raw.depth_camera.intrinsics, dw, dh),
            width: dw,
            height: dh,
        };
        let color_camera = CameraCalibration {
            intrinsics: denormalize(&raw.color_camera.intrinsics, cw, ch),
            width: cw,
            height: ch,
        };

        let extrinsics = densify(&raw.extrinsics)?;

        Ok(Calibration {
            depth_camera,
            color_camera,
            extrinsics,
            depth_mode,
            color_resolution,
        })
    }

    /// Extrinsic transform from one sensor frame to another.
    pub fn extrinsics(&self, from: SensorFrame, to: SensorFrame) -> &Extrinsics {
        &self.extrinsics[from.index()][to.index()]
    }

    pub fn camera(&self, frame: SensorFrame) -> Option<&CameraCalibration> {
        match frame {
            SensorFrame::Depth => Some(&self.depth_camera),
            SensorFrame::Color => Some(&self.color_camera),
            _ => None,
        }
    }
}

/// Scale normalized intrinsics to pixel geometry. Distortion terms are
/// left untouched; they act on normalized coordinates.
fn denormalize(norm: &Intrinsics, width: u32, height: u32) -> Intrinsics {
    Intrinsics {
        cx: norm.cx * width as f32,
        cy: norm.cy * height as f32,
        fx: norm.fx * width as f32,
        fy: norm.fy * height as f32,
        ..*norm
    }
}

/// Expand the depth-anchored extrinsic chain into all 16 ordered pairs:
/// `T(a->b) = T(depth->b) ∘ T(depth->a)^-1`.
fn densify(chain: &[RawExtrinsic]) -> Result<[[Extrinsics; 4]; 4]> {
    let mut from_depth = [Extrinsics::identity(); 4];
    let mut seen = [false; 4];
    seen[SensorFrame::Depth.index()] = true;

    for link in chain {
        let ext = Extrinsics {
            rotation: link.rotation,
            translation_mm: link.translation_mm,
        };
        match (link.from, link.to) {
            (SensorFrame::Depth, to) => {
                from_depth[to.index()] = ext;
                seen[to.index()] = true;
            }
            (from, SensorFrame::Depth) => {
                from_depth[from.index()] = ext.invert();
                seen[from.index()] = true;
            }
            (from, to) => {
                return Err(TofcamError::Format(format!(
                    "extrinsic chain not anchored at depth: {:?} -> {:?}",
                    from, to
                )));
            }
        }
    }

    if !seen.iter().all(|&s| s) {
        return Err(TofcamError::Format(
            "extrinsic chain missing a sensor frame".into(),
        ));
    }

    let mut table = [[Extrinsics::identity(); 4]; 4];
    for a in 0..4 {
        let depth_from_a = from_depth[a].invert();
        for b in 0..4 {
            if a == b {
                continue;
            }
            table[a][b] = from_depth[b].compose(&depth_from_a);
        }
    }
    Ok(table)
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    /// A plausible factory blob: depth camera centered, color camera
    /// offset 32 mm along X with a slight rotation about Y.
    pub fn raw_calibration() -> RawCalibration {
        let ang: f32 = 0.02;
        let (s, c) = ang.sin_cos();
        RawCalibration {
            serial: "TC2-00042".into(),
            depth_camera: RawCamera {
                intrinsics: Intrinsics {
                    cx: 0.5,
                    cy: 0.5,
                    fx: 0.49,
                    fy: 0.49,
                    k1: 0.7,
                    k2: -0.1,
                    k3: 0.01,
                    k4: 0.65,
                    k5: -0.08,
                    k6: 0.008,
                    codx: 0.0,
                    cody: 0.0,
                    p1: 1.2e-4,
                    p2: -8.0e-5,
                    metric_radius: 1.74,
                },
            },
            color_camera: RawCamera {
                intrinsics: Intrinsics {
                    cx: 0.5,
                    cy: 0.5,
                    fx: 0.61,
                    fy: 0.81,
                    k1: 0.5,
                    k2: -0.06,
                    k3: 0.005,
                    k4: 0.46,
                    k5: -0.05,
                    k6: 0.004,
                    codx: 0.0,
                    cody: 0.0,
                    p1: 9.0e-5,
                    p2: 4.0e-5,
                    metric_radius: 1.2,
                },
            },
            extrinsics: vec![
                RawExtrinsic {
                    from: SensorFrame::Depth,
                    to: SensorFrame::Color,
                    rotation: [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]],
                    translation_mm: [-32.0, 0.0, 0.0],
                },
                RawExtrinsic {
                    from: SensorFrame::Depth,
                    to: SensorFrame::Gyro,
                    rotation: Extrinsics::identity().rotation,
                    translation_mm: [-50.0, 2.0, 1.0],
                },
                RawExtrinsic {
                    from: SensorFrame::Depth,
                    to: SensorFrame::Accel,
                    rotation: Extrinsics::identity().rotation,
                    translation_mm: [-50.0, 2.0, 4.0],
                },
            ],
        }
    }

    pub fn raw_blob() -> Vec<u8> {
        serde_json::to_vec(&raw_calibration()).unwrap()
    }

    pub fn bound_calibration() -> Calibration {
        Calibration::from_raw(
            &raw_blob(),
            DepthMode::NfovUnbinned,
            ColorResolution::R720p,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::*;
    use super::*;

    #[test]
    fn blob_parse_and_bind() {
        let cal = bound_calibration();
        assert_eq!(cal.depth_camera.width, 640);
        assert_eq!(cal.depth_camera.height, 576);
        assert_eq!(cal.color_camera.width, 1280);
        // Normalized cx=0.5 lands on the image center.
        assert!((cal.depth_camera.intrinsics.cx - 320.0).abs() < 1e-3);
        assert!((cal.color_camera.intrinsics.cy - 360.0).abs() < 1e-3);
    }

    #[test]
    fn corrupt_blob_is_format_error() {
        let err = Calibration::from_raw(b"not json", DepthMode::NfovUnbinned, ColorResolution::Off)
            .unwrap_err();
        assert!(matches!(err, TofcamError::Format(_)));
    }

    #[test]
    fn both_cameras_off_rejected() {
        let err =
            Calibration::from_raw(&raw_blob(), DepthMode::Off, ColorResolution::Off).unwrap_err();
        assert!(matches!(err, TofcamError::InvalidState(_)));
    }

    #[test]
    fn extrinsics_table_identity_on_diagonal() {
        let cal = bound_calibration();
        let same = cal.extrinsics(SensorFrame::Color, SensorFrame::Color);
        assert_eq!(same, &Extrinsics::identity());
    }

    #[test]
    fn extrinsics_round_trip_through_inverse_pair() {
        let cal = bound_calibration();
        let fwd = cal.extrinsics(SensorFrame::Depth, SensorFrame::Color);
        let back = cal.extrinsics(SensorFrame::Color, SensorFrame::Depth);
        let p = [120.0f32, -40.0, 800.0];
        let round = back.apply(fwd.apply(p));
        for i in 0..3 {
            assert!((round[i] - p[i]).abs() < 1e-2, "axis {}: {} vs {}", i, round[i], p[i]);
        }
    }

    #[test]
    fn composed_pair_matches_chain() {
        let cal = bound_calibration();
        // gyro->color must equal depth->color ∘ gyro->depth.
        let via = cal
            .extrinsics(SensorFrame::Depth, SensorFrame::Color)
            .compose(cal.extrinsics(SensorFrame::Gyro, SensorFrame::Depth));
        let direct = cal.extrinsics(SensorFrame::Gyro, SensorFrame::Color);
        let p = [10.0f32, 20.0, 30.0];
        let a = via.apply(p);
        let b = direct.apply(p);
        for i in 0..3 {
            assert!((a[i] - b[i]).abs() < 1e-3);
        }
    }

    #[test]
    fn extrinsic_invert_is_inverse() {
        let cal = bound_calibration();
        let e = cal.extrinsics(SensorFrame::Depth, SensorFrame::Color);
        let p = [5.0f32, 6.0, 7.0];
        let round = e.invert().apply(e.apply(p));
        for i in 0..3 {
            assert!((round[i] - p[i]).abs() < 1e-3);
        }
    }
}
