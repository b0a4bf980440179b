//! Gaussian denoising of volumes.
//!
//! Uses separable convolution for efficiency:
//! - `Volumetric3D` runs the x, y and z passes
//! - `SliceWise2D` runs only the in-plane x and y passes, so no intensity
//!   crosses z-planes (consecutive planes may be offset in time)
//!
//! Borders replicate the nearest edge voxel.

use log::debug;
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use super::core::{gaussian_kernel_1d, separable_filter_flat, SMOOTHING_TRUNCATE};
use crate::error::{Result, SegmentationError};
use crate::volume::{flatten, Grid, PlaneMode};

/// Smoothing stage parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingParams {
    pub sigma: f32,
    pub mode: PlaneMode,
    /// Kernel half-width in standard deviations.
    pub truncate: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            mode: PlaneMode::SliceWise2D,
            truncate: SMOOTHING_TRUNCATE,
        }
    }
}

impl SmoothingParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.sigma > 0.0) || !self.sigma.is_finite() {
            return Err(SegmentationError::invalid(format!(
                "smoothing sigma must be > 0, got {}",
                self.sigma
            )));
        }
        if !(self.truncate > 0.0) || !self.truncate.is_finite() {
            return Err(SegmentationError::invalid(format!(
                "smoothing truncate must be > 0, got {}",
                self.truncate
            )));
        }
        Ok(())
    }
}

/// Apply Gaussian smoothing with the default truncation.
///
/// # Arguments
/// * `input` - Volume (z, y, x)
/// * `sigma` - Standard deviation of the Gaussian, in voxels
/// * `mode` - Whether to blur across z-planes
///
/// # Returns
/// Smoothed volume with the same shape
pub fn smooth(input: ArrayView3<f32>, sigma: f32, mode: PlaneMode) -> Result<Array3<f32>> {
    smooth_with(
        input,
        &SmoothingParams {
            sigma,
            mode,
            ..SmoothingParams::default()
        },
    )
}

/// Apply Gaussian smoothing with explicit parameters.
pub fn smooth_with(input: ArrayView3<f32>, params: &SmoothingParams) -> Result<Array3<f32>> {
    params.validate()?;

    let grid = Grid::new(input.dim());
    let kernel = gaussian_kernel_1d(params.sigma, params.truncate);
    debug!(
        "smooth: shape={:?} sigma={} mode={:?} kernel_len={}",
        grid.shape(),
        params.sigma,
        params.mode,
        kernel.len()
    );

    let z_kernel = match params.mode {
        PlaneMode::Volumetric3D => Some(kernel.as_slice()),
        PlaneMode::SliceWise2D => None,
    };

    let data = flatten(&input);
    let out = separable_filter_flat(
        &data,
        grid,
        [z_kernel, Some(kernel.as_slice()), Some(kernel.as_slice())],
    );
    Ok(grid.to_array(out))
}
