//! Exact Euclidean distance transform.
//!
//! Every foreground voxel receives its distance to the nearest background
//! voxel; background voxels are 0. The transform is separable: a 1D squared
//! distance pass (lower envelope of parabolas) runs along x, then y, then z,
//! each pass feeding the next. Lines are independent, so each pass is split
//! across rayon workers.
//!
//! Voxels outside the volume are not background. A mask with no background
//! at all has infinite distance everywhere.

use log::debug;
use ndarray::ArrayView3;
use rayon::prelude::*;

use crate::error::{Result, SegmentationError};
use crate::volume::{flatten, Grid, Volume};

/// Isotropic unit voxel spacing `[z, y, x]`.
pub const UNIT_SPACING: [f32; 3] = [1.0, 1.0, 1.0];

/// Euclidean distance to the nearest background voxel with unit spacing.
pub fn euclidean_distance(mask: ArrayView3<bool>) -> Volume {
    let grid = Grid::new(mask.dim());
    let data = flatten(&mask);
    grid.to_array(distance_flat(&data, grid, UNIT_SPACING))
}

/// Euclidean distance with per-axis sampling `[z, y, x]`.
///
/// # Arguments
/// * `mask` - Foreground mask (z, y, x)
/// * `spacing` - Physical voxel size along each axis; all must be > 0
pub fn distance_transform(mask: ArrayView3<bool>, spacing: [f32; 3]) -> Result<Volume> {
    if let Some(bad) = spacing.iter().find(|s| !(**s > 0.0) || !s.is_finite()) {
        return Err(SegmentationError::invalid(format!(
            "voxel spacing must be > 0, got {bad}"
        )));
    }
    let grid = Grid::new(mask.dim());
    let data = flatten(&mask);
    debug!("distance_transform: shape={:?} spacing={spacing:?}", grid.shape());
    Ok(grid.to_array(distance_flat(&data, grid, spacing)))
}

pub(crate) fn distance_flat(mask: &[bool], grid: Grid, spacing: [f32; 3]) -> Vec<f32> {
    let mut sq: Vec<f64> = mask
        .iter()
        .map(|&fg| if fg { f64::INFINITY } else { 0.0 })
        .collect();
    if grid.len() == 0 {
        return Vec::new();
    }

    let (depth, height, width) = grid.shape();
    let plane = grid.plane_len();

    // x lines are contiguous rows
    sq.par_chunks_mut(width).for_each(|row| {
        let line = row.to_vec();
        envelope_1d(&line, spacing[2] as f64, row);
    });

    // y lines are strided within each plane
    sq.par_chunks_mut(plane).for_each(|slab| {
        let mut line = vec![0.0f64; height];
        let mut out = vec![0.0f64; height];
        for x in 0..width {
            for y in 0..height {
                line[y] = slab[y * width + x];
            }
            envelope_1d(&line, spacing[1] as f64, &mut out);
            for y in 0..height {
                slab[y * width + x] = out[y];
            }
        }
    });

    // z lines span planes: compute columns in parallel, then scatter
    if depth > 1 {
        let columns: Vec<Vec<f64>> = (0..plane)
            .into_par_iter()
            .map(|j| {
                let line: Vec<f64> = (0..depth).map(|z| sq[z * plane + j]).collect();
                let mut out = vec![0.0f64; depth];
                envelope_1d(&line, spacing[0] as f64, &mut out);
                out
            })
            .collect();
        for (j, column) in columns.iter().enumerate() {
            for (z, &v) in column.iter().enumerate() {
                sq[z * plane + j] = v;
            }
        }
    }

    sq.into_iter().map(|d| d.sqrt() as f32).collect()
}

/// 1D squared distance transform: `out[q] = min_p (s*(q-p))^2 + f[p]`.
///
/// Infinite samples never enter the envelope; a line with no finite sample
/// stays infinite.
fn envelope_1d(f: &[f64], spacing: f64, out: &mut [f64]) {
    let n = f.len();
    // Parabola apexes and the left boundary of each one's region
    let mut apex: Vec<usize> = Vec::with_capacity(n);
    let mut start: Vec<f64> = Vec::with_capacity(n);

    for q in 0..n {
        if !f[q].is_finite() {
            continue;
        }
        let qs = q as f64 * spacing;
        let mut boundary = f64::NEG_INFINITY;
        while let Some(&p) = apex.last() {
            let ps = p as f64 * spacing;
            let s = ((f[q] + qs * qs) - (f[p] + ps * ps)) / (2.0 * (qs - ps));
            let left = start.last().copied().unwrap_or(f64::NEG_INFINITY);
            if s <= left {
                apex.pop();
                start.pop();
            } else {
                boundary = s;
                break;
            }
        }
        apex.push(q);
        start.push(boundary);
    }

    if apex.is_empty() {
        out.iter_mut().for_each(|v| *v = f64::INFINITY);
        return;
    }

    let mut k = 0;
    for (q, o) in out.iter_mut().enumerate() {
        let qs = q as f64 * spacing;
        while k + 1 < apex.len() && start[k + 1] < qs {
            k += 1;
        }
        let d = qs - apex[k] as f64 * spacing;
        *o = d * d + f[apex[k]];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Mask;

    #[test]
    fn test_envelope_matches_brute_force() {
        let f = [f64::INFINITY, 0.0, f64::INFINITY, f64::INFINITY, 4.0, f64::INFINITY, 0.0];
        let mut out = [0.0; 7];
        envelope_1d(&f, 1.0, &mut out);
        for q in 0..7 {
            let brute = (0..7)
                .filter(|&p| f[p].is_finite())
                .map(|p| (q as f64 - p as f64).powi(2) + f[p])
                .fold(f64::INFINITY, f64::min);
            assert_eq!(out[q], brute, "q={q}");
        }
    }

    #[test]
    fn test_distance_in_block() {
        let mut m = Mask::from_elem((1, 7, 7), false);
        m.slice_mut(ndarray::s![.., 1..6, 1..6]).fill(true);
        let d = euclidean_distance(m.view());
        assert_eq!(d[[0, 0, 0]], 0.0);
        assert_eq!(d[[0, 1, 1]], 1.0);
        assert_eq!(d[[0, 3, 3]], 3.0);
        assert_eq!(d[[0, 2, 3]], 2.0);
    }

    #[test]
    fn test_distance_is_euclidean_not_city_block() {
        let mut m = Mask::from_elem((1, 5, 5), true);
        m[[0, 0, 0]] = false;
        let d = euclidean_distance(m.view());
        assert!((d[[0, 3, 4]] - 5.0).abs() < 1e-6);
        assert!((d[[0, 1, 1]] - 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_distance_across_planes_with_spacing() {
        let mut m = Mask::from_elem((4, 1, 1), true);
        m[[0, 0, 0]] = false;
        let d = distance_transform(m.view(), [2.0, 1.0, 1.0]).unwrap();
        assert_eq!(d[[3, 0, 0]], 6.0);
        assert_eq!(d[[1, 0, 0]], 2.0);
    }

    #[test]
    fn test_no_background_is_infinite() {
        let m = Mask::from_elem((2, 2, 2), true);
        let d = euclidean_distance(m.view());
        assert!(d.iter().all(|v| v.is_infinite()));
    }

    #[test]
    fn test_invalid_spacing_rejected() {
        let m = Mask::from_elem((1, 2, 2), true);
        assert!(matches!(
            distance_transform(m.view(), [1.0, 0.0, 1.0]),
            Err(SegmentationError::InvalidParameter(_))
        ));
    }
}
