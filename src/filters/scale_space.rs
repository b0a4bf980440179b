//! Scale-space structure detectors: Spot (blob) and Filament (ridge).
//!
//! Both detectors share one skeleton: for every `(scale, cutoff)` pair compute a
//! scale-normalized second-derivative response, threshold it with `> cutoff`,
//! and OR the per-scale masks together. Scales are processed in parallel and
//! reduced with a commutative OR, so the order of the list never changes the
//! result.
//!
//! ## Responses
//!
//! - **Spot**: `R = -sigma^2 * (Hzz + Hyy + Hxx)`, the negative scale-normalized
//!   Hessian trace (Laplacian of Gaussian). Bright isotropic peaks give large
//!   positive values. `SliceWise2D` drops the `Hzz` term and never mixes planes.
//! - **Filament**: per z-plane, the in-plane Hessian eigenvalue of largest
//!   magnitude is negated (`nu`, positive on bright ridges) and mapped through
//!   a bounded enhancement relative to the plane's strongest ridge
//!   `rho = max(nu)`:
//!
//!   | condition | response |
//!   |-----------|----------|
//!   | `nu <= 0` (or the plane has no ridge) | 0 |
//!   | `nu >= rho / 2` | 1 |
//!   | otherwise | `27 * nu^2 * (rho - nu) / (nu + rho)^3` |

use log::{debug, trace};
use ndarray::{Array3, ArrayView3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::core::{gaussian_derivative_kernel_1d, separable_filter_flat, DERIVATIVE_TRUNCATE};
use crate::error::{Result, SegmentationError};
use crate::volume::{flatten, Grid, Mask, PlaneMode};

/// One detection scale and the response threshold used at that scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleCutoff {
    pub scale: f32,
    pub cutoff: f32,
}

impl ScaleCutoff {
    pub fn new(scale: f32, cutoff: f32) -> Self {
        Self { scale, cutoff }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.scale > 0.0) || !self.scale.is_finite() {
            return Err(SegmentationError::invalid(format!(
                "detector scale must be > 0, got {}",
                self.scale
            )));
        }
        if !(self.cutoff >= 0.0) || !self.cutoff.is_finite() {
            return Err(SegmentationError::invalid(format!(
                "detector cutoff must be >= 0, got {}",
                self.cutoff
            )));
        }
        Ok(())
    }
}

/// Which eigenstructure test the detector applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScaleSpaceDetector {
    /// Compact bright blobs, per plane or fully 3D.
    Spot { mode: PlaneMode },
    /// Thin bright curvilinear ridges, always per plane.
    Filament,
}

impl ScaleSpaceDetector {
    pub fn spot_2d() -> Self {
        ScaleSpaceDetector::Spot {
            mode: PlaneMode::SliceWise2D,
        }
    }

    pub fn spot_3d() -> Self {
        ScaleSpaceDetector::Spot {
            mode: PlaneMode::Volumetric3D,
        }
    }

    /// Continuous filter response at one scale.
    pub fn response(&self, input: ArrayView3<f32>, sigma: f32) -> Result<Array3<f32>> {
        ScaleCutoff::new(sigma, 0.0).validate()?;
        let grid = Grid::new(input.dim());
        let data = flatten(&input);
        Ok(grid.to_array(self.response_flat(&data, grid, sigma)))
    }

    fn response_flat(&self, data: &[f32], grid: Grid, sigma: f32) -> Vec<f32> {
        match *self {
            ScaleSpaceDetector::Spot { mode } => spot_response(data, grid, sigma, mode),
            ScaleSpaceDetector::Filament => filament_response(data, grid, sigma),
        }
    }

    /// Threshold the response at every scale and OR the results.
    ///
    /// # Arguments
    /// * `input` - Smoothed volume (z, y, x)
    /// * `scales` - `(scale, cutoff)` pairs; voxels with `response > cutoff` are foreground
    ///
    /// # Returns
    /// Union mask over all scales
    pub fn detect(&self, input: ArrayView3<f32>, scales: &[ScaleCutoff]) -> Result<Mask> {
        if scales.is_empty() {
            return Err(SegmentationError::invalid("scale-cutoff list is empty"));
        }
        for sc in scales {
            sc.validate()?;
        }

        let grid = Grid::new(input.dim());
        let data = flatten(&input);
        debug!(
            "detect: {:?} shape={:?} scales={}",
            self,
            grid.shape(),
            scales.len()
        );

        let union = scales
            .par_iter()
            .map(|sc| {
                let response = self.response_flat(&data, grid, sc.scale);
                let bw: Vec<bool> = response.iter().map(|&r| r > sc.cutoff).collect();
                trace!(
                    "detect: scale={} cutoff={} foreground={}",
                    sc.scale,
                    sc.cutoff,
                    bw.iter().filter(|&&v| v).count()
                );
                bw
            })
            .reduce(|| vec![false; grid.len()], or_masks);

        Ok(grid.to_array(union))
    }
}

fn or_masks(mut a: Vec<bool>, b: Vec<bool>) -> Vec<bool> {
    for (x, y) in a.iter_mut().zip(b) {
        *x |= y;
    }
    a
}

/// A detector together with the scales it runs at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPass {
    pub detector: ScaleSpaceDetector,
    pub scales: Vec<ScaleCutoff>,
}

impl DetectionPass {
    pub fn new(detector: ScaleSpaceDetector, scales: Vec<ScaleCutoff>) -> Self {
        Self { detector, scales }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scales.is_empty() {
            return Err(SegmentationError::invalid("scale-cutoff list is empty"));
        }
        self.scales.iter().try_for_each(ScaleCutoff::validate)
    }
}

/// Run several detection passes and OR their masks.
pub fn detect_union(input: ArrayView3<f32>, passes: &[DetectionPass]) -> Result<Mask> {
    if passes.is_empty() {
        return Err(SegmentationError::invalid("no detection passes configured"));
    }
    passes.iter().try_for_each(DetectionPass::validate)?;

    let mut union = Mask::from_elem(input.dim(), false);
    for pass in passes {
        let bw = pass.detector.detect(input, &pass.scales)?;
        union.zip_mut_with(&bw, |u, &b| *u |= b);
    }
    Ok(union)
}

/// `-sigma^2 * trace(H)` over the axes selected by `mode`.
fn spot_response(data: &[f32], grid: Grid, sigma: f32, mode: PlaneMode) -> Vec<f32> {
    let k0 = gaussian_derivative_kernel_1d(sigma, 0, DERIVATIVE_TRUNCATE);
    let k2 = gaussian_derivative_kernel_1d(sigma, 2, DERIVATIVE_TRUNCATE);
    let (k0, k2) = (k0.as_slice(), k2.as_slice());

    let z_smooth = match mode {
        PlaneMode::Volumetric3D => Some(k0),
        PlaneMode::SliceWise2D => None,
    };

    let hyy = separable_filter_flat(data, grid, [z_smooth, Some(k2), Some(k0)]);
    let hxx = separable_filter_flat(data, grid, [z_smooth, Some(k0), Some(k2)]);
    let hzz = match mode {
        PlaneMode::Volumetric3D => Some(separable_filter_flat(data, grid, [Some(k2), Some(k0), Some(k0)])),
        PlaneMode::SliceWise2D => None,
    };

    let scale = sigma * sigma;
    let mut response: Vec<f32> = hyy.iter().zip(&hxx).map(|(a, b)| -scale * (a + b)).collect();
    if let Some(hzz) = hzz {
        for (r, d) in response.iter_mut().zip(&hzz) {
            *r -= scale * d;
        }
    }
    response
}

/// Eigenvalue of a symmetric 2x2 matrix with the largest magnitude.
#[inline]
fn dominant_eigenvalue(a: f32, b: f32, c: f32) -> f32 {
    let mean = 0.5 * (a + c);
    let dev = (0.25 * (a - c) * (a - c) + b * b).sqrt();
    let (l1, l2) = (mean + dev, mean - dev);
    if l1.abs() >= l2.abs() {
        l1
    } else {
        l2
    }
}

/// Curvatures at or below this are treated as flat.
const MIN_RIDGE_STRENGTH: f32 = 1e-6;

#[inline]
fn ridge_enhancement(nu: f32, rho: f32) -> f32 {
    if nu <= MIN_RIDGE_STRENGTH || rho <= MIN_RIDGE_STRENGTH {
        0.0
    } else if nu >= 0.5 * rho {
        1.0
    } else {
        let denom = (nu + rho).powi(3);
        (27.0 * nu * nu * (rho - nu) / denom).clamp(0.0, 1.0)
    }
}

/// Per-plane bounded ridge response.
fn filament_response(data: &[f32], grid: Grid, sigma: f32) -> Vec<f32> {
    let k0 = gaussian_derivative_kernel_1d(sigma, 0, DERIVATIVE_TRUNCATE);
    let k1 = gaussian_derivative_kernel_1d(sigma, 1, DERIVATIVE_TRUNCATE);
    let k2 = gaussian_derivative_kernel_1d(sigma, 2, DERIVATIVE_TRUNCATE);
    let (k0, k1, k2) = (k0.as_slice(), k1.as_slice(), k2.as_slice());

    let hyy = separable_filter_flat(data, grid, [None, Some(k2), Some(k0)]);
    let hxx = separable_filter_flat(data, grid, [None, Some(k0), Some(k2)]);
    let hxy = separable_filter_flat(data, grid, [None, Some(k1), Some(k1)]);

    let scale = sigma * sigma;
    let mut nu: Vec<f32> = (0..grid.len())
        .map(|i| -scale * dominant_eigenvalue(hyy[i], hxy[i], hxx[i]))
        .collect();

    if grid.plane_len() == 0 {
        return nu;
    }
    nu.par_chunks_mut(grid.plane_len()).for_each(|plane| {
        let rho = plane.iter().cloned().fold(0.0f32, f32::max);
        for v in plane.iter_mut() {
            *v = ridge_enhancement(*v, rho);
        }
    });
    nu
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Isotropic Gaussian blob of unit amplitude.
    fn blob(shape: (usize, usize, usize), center: (f32, f32, f32), width: f32) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(z, y, x)| {
            let d2 = (z as f32 - center.0).powi(2)
                + (y as f32 - center.1).powi(2)
                + (x as f32 - center.2).powi(2);
            (-d2 / (2.0 * width * width)).exp()
        })
    }

    /// Bright vertical line at column `x0` in every plane.
    fn line(shape: (usize, usize, usize), x0: usize) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(_, _, x)| {
            let d = x as f32 - x0 as f32;
            (-d * d / 2.0).exp()
        })
    }

    #[test]
    fn test_spot_response_peaks_at_blob_center() {
        let vol = blob((7, 15, 15), (3.0, 7.0, 7.0), 1.5);
        for detector in [ScaleSpaceDetector::spot_2d(), ScaleSpaceDetector::spot_3d()] {
            let r = detector.response(vol.view(), 1.5).unwrap();
            let center = r[[3, 7, 7]];
            assert!(center > 0.1, "{detector:?} center {center}");
            assert!(r.iter().all(|&v| v <= center + 1e-6));
            assert!(r[[3, 0, 0]].abs() < 1e-3);
        }
    }

    #[test]
    fn test_spot_detect_marks_blob_only() {
        let vol = blob((5, 21, 21), (2.0, 10.0, 10.0), 1.5);
        let bw = ScaleSpaceDetector::spot_3d()
            .detect(vol.view(), &[ScaleCutoff::new(1.5, 0.05)])
            .unwrap();
        assert!(bw[[2, 10, 10]]);
        assert!(!bw[[2, 0, 0]]);
        assert!(!bw[[2, 10, 20]]);
        assert_eq!(bw.dim(), vol.dim());
    }

    #[test]
    fn test_scale_order_does_not_matter() {
        let mut vol = blob((5, 24, 24), (2.0, 6.0, 6.0), 1.0);
        vol += &blob((5, 24, 24), (2.0, 16.0, 16.0), 3.0);
        let p1 = ScaleCutoff::new(1.0, 0.02);
        let p2 = ScaleCutoff::new(3.0, 0.05);
        let detector = ScaleSpaceDetector::spot_2d();
        let a = detector.detect(vol.view(), &[p1, p2]).unwrap();
        let b = detector.detect(vol.view(), &[p2, p1]).unwrap();
        assert_eq!(a, b);

        // Union covers each single-scale result
        let only1 = detector.detect(vol.view(), &[p1]).unwrap();
        assert!(only1.iter().zip(a.iter()).all(|(&s, &u)| !s || u));
    }

    #[test]
    fn test_slice_wise_spot_ignores_other_planes() {
        let mut vol = Array3::<f32>::zeros((3, 11, 11));
        vol.index_axis_mut(ndarray::Axis(0), 1)
            .assign(&blob((1, 11, 11), (0.0, 5.0, 5.0), 1.0).index_axis(ndarray::Axis(0), 0));
        let bw = ScaleSpaceDetector::spot_2d()
            .detect(vol.view(), &[ScaleCutoff::new(1.0, 0.01)])
            .unwrap();
        assert!(bw[[1, 5, 5]]);
        assert!(!bw[[0, 5, 5]]);
        assert!(!bw[[2, 5, 5]]);
    }

    #[test]
    fn test_filament_detects_line_not_background() {
        let vol = line((2, 20, 20), 10);
        let r = ScaleSpaceDetector::Filament.response(vol.view(), 1.0).unwrap();
        assert_eq!(r[[0, 10, 10]], 1.0);
        assert!(r.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(r[[1, 10, 0]] < 1e-6);

        let bw = ScaleSpaceDetector::Filament
            .detect(vol.view(), &[ScaleCutoff::new(1.0, 0.2)])
            .unwrap();
        assert!(bw[[0, 5, 10]]);
        assert!(bw[[1, 15, 10]]);
        assert!(!bw[[0, 5, 2]]);
        assert!(!bw[[0, 5, 18]]);
    }

    #[test]
    fn test_flat_volume_has_no_response() {
        let vol = Array3::<f32>::from_elem((3, 8, 8), 0.5);
        for detector in [ScaleSpaceDetector::spot_3d(), ScaleSpaceDetector::Filament] {
            let bw = detector.detect(vol.view(), &[ScaleCutoff::new(1.0, 1e-3)]).unwrap();
            assert!(bw.iter().all(|&v| !v));
        }
    }

    #[test]
    fn test_invalid_scales_rejected() {
        let vol = Array3::<f32>::zeros((1, 4, 4));
        let detector = ScaleSpaceDetector::spot_2d();
        for bad in [ScaleCutoff::new(0.0, 0.1), ScaleCutoff::new(1.0, -0.1)] {
            assert!(matches!(
                detector.detect(vol.view(), &[bad]),
                Err(SegmentationError::InvalidParameter(_))
            ));
        }
        assert!(detector.detect(vol.view(), &[]).is_err());
    }

    #[test]
    fn test_detect_union_combines_detectors() {
        let mut vol = line((1, 30, 30), 22);
        vol += &blob((1, 30, 30), (0.0, 8.0, 8.0), 1.5);
        let passes = vec![
            DetectionPass::new(ScaleSpaceDetector::spot_2d(), vec![ScaleCutoff::new(1.5, 0.1)]),
            DetectionPass::new(ScaleSpaceDetector::Filament, vec![ScaleCutoff::new(1.0, 0.3)]),
        ];
        let union = detect_union(vol.view(), &passes).unwrap();
        let mut reversed = passes.clone();
        reversed.reverse();
        assert_eq!(union, detect_union(vol.view(), &reversed).unwrap());
        assert!(union[[0, 8, 8]]);
        assert!(union[[0, 25, 22]]);
    }
}
