//! Intensity normalization: outlier-robust rescaling into 0.0-1.0.
//!
//! Two policies are supported:
//! - **TwoSidedStdBound**: clip to `[mean - A*std, mean + B*std]`, then min-max stretch
//! - **UpperBoundedMinMax**: replace voxels above `K` with the volume minimum
//!   (skipped when `K == 0`), then min-max stretch
//!
//! A volume whose stretch range collapses to a single value maps to all zeros.

use log::{debug, warn};
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentationError};

/// How raw intensities are bounded before the min-max stretch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizationPolicy {
    /// Clip to `[mean - lower_factor*std, mean + upper_factor*std]`.
    TwoSidedStdBound { lower_factor: f32, upper_factor: f32 },
    /// `bound == 0` disables the upper clip.
    UpperBoundedMinMax { bound: f32 },
}

impl Default for NormalizationPolicy {
    fn default() -> Self {
        NormalizationPolicy::UpperBoundedMinMax { bound: 0.0 }
    }
}

impl NormalizationPolicy {
    pub fn validate(&self) -> Result<()> {
        let check = |name: &str, v: f32| {
            if !v.is_finite() || v < 0.0 {
                Err(SegmentationError::invalid(format!(
                    "{name} must be a finite value >= 0, got {v}"
                )))
            } else {
                Ok(())
            }
        };
        match *self {
            NormalizationPolicy::TwoSidedStdBound {
                lower_factor,
                upper_factor,
            } => {
                check("lower_factor", lower_factor)?;
                check("upper_factor", upper_factor)
            }
            NormalizationPolicy::UpperBoundedMinMax { bound } => check("bound", bound),
        }
    }
}

/// Population mean and standard deviation, accumulated in f64.
fn mean_std(input: &ArrayView3<f32>) -> (f64, f64) {
    let n = input.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = input.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let var = input
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;
    (mean, var.sqrt())
}

fn min_max(values: impl Iterator<Item = f32>) -> Option<(f32, f32)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Stretch `[lo, hi]` onto `[0, 1]`; a collapsed range gives zeros.
fn stretch(volume: Array3<f32>, lo: f32, hi: f32) -> Array3<f32> {
    let range = hi - lo;
    if !(range > 0.0) || !range.is_finite() {
        warn!("normalize: degenerate intensity range [{lo}, {hi}], returning zeros");
        return Array3::zeros(volume.dim());
    }
    volume.mapv_into(|v| ((v - lo) / range).clamp(0.0, 1.0))
}

/// Normalize a raw volume into 0.0-1.0.
///
/// # Arguments
/// * `input` - Raw intensities (z, y, x)
/// * `policy` - Clipping policy applied before the min-max stretch
///
/// # Returns
/// Normalized volume with the same shape, or `InvalidParameter` for negative factors.
pub fn normalize(input: ArrayView3<f32>, policy: &NormalizationPolicy) -> Result<Array3<f32>> {
    policy.validate()?;

    let Some((raw_min, raw_max)) = min_max(input.iter().copied()) else {
        return Ok(Array3::zeros(input.dim()));
    };

    let output = match *policy {
        NormalizationPolicy::TwoSidedStdBound {
            lower_factor,
            upper_factor,
        } => {
            let (mean, std) = mean_std(&input);
            let lo = ((mean - lower_factor as f64 * std) as f32).max(raw_min);
            let hi = ((mean + upper_factor as f64 * std) as f32).min(raw_max);
            debug!(
                "normalize: two-sided std bound mean={mean:.4} std={std:.4} clip=[{lo}, {hi}]"
            );
            let clipped = input.mapv(|v| v.clamp(lo, hi.max(lo)));
            stretch(clipped, lo, hi.max(lo))
        }
        NormalizationPolicy::UpperBoundedMinMax { bound } => {
            let mut volume = input.to_owned();
            if bound > 0.0 {
                volume.mapv_inplace(|v| if v > bound { raw_min } else { v });
            }
            let (lo, hi) = min_max(volume.iter().copied()).unwrap_or((raw_min, raw_max));
            debug!("normalize: min-max bound={bound} range=[{lo}, {hi}]");
            stretch(volume, lo, hi)
        }
    };

    Ok(output)
}
