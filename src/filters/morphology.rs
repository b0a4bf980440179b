//! Binary morphology: Dilate, Erode, component labelling, hole filling,
//! size filtering and contours.
//!
//! All operations take a `Mask` view and return a new mask of the same shape.
//!
//! ## Structuring elements
//!
//! Dilate/erode use a discrete ball: every offset with
//! `dz^2 + dy^2 + dx^2 <= radius^2` (only `dz == 0` offsets in slice-wise
//! mode). Radius 1 is the face-connected cross.
//!
//! ## Connected components
//!
//! Components are grown breadth-first and numbered in raster order of their
//! first voxel, so labels are dense and reproducible for a given mask.

use std::collections::VecDeque;

use log::debug;
use ndarray::{ArrayView3, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentationError};
use crate::volume::{flatten, Connectivity, Grid, LabelVolume, Mask, PlaneMode};

// ============================================================================
// Dilate / Erode
// ============================================================================

fn ball_offsets(radius: usize, mode: PlaneMode) -> Vec<[isize; 3]> {
    let r = radius as isize;
    let rz = match mode {
        PlaneMode::SliceWise2D => 0,
        PlaneMode::Volumetric3D => r,
    };
    let r_sq = r * r;

    let mut offsets = Vec::new();
    for dz in -rz..=rz {
        for dy in -r..=r {
            for dx in -r..=r {
                if dz * dz + dy * dy + dx * dx <= r_sq {
                    offsets.push([dz, dy, dx]);
                }
            }
        }
    }
    offsets
}

/// Shared body of dilate/erode: `any` neighbour set (dilate) or `all` set (erode).
fn ball_filter(input: ArrayView3<bool>, radius: usize, mode: PlaneMode, dilate: bool) -> Mask {
    let grid = Grid::new(input.dim());
    let data = flatten(&input);
    let offsets = ball_offsets(radius, mode);
    let mut out = vec![false; grid.len()];
    if grid.len() == 0 {
        return grid.to_array(out);
    }

    let plane = grid.plane_len();
    out.par_chunks_mut(plane).enumerate().for_each(|(z, row)| {
        for (j, o) in row.iter_mut().enumerate() {
            let i = z * plane + j;
            if dilate {
                *o = grid.neighbours(i, &offsets).any(|n| data[n]);
            } else {
                // Out-of-bounds counts as background
                let inside = grid.neighbours(i, &offsets).count() == offsets.len();
                *o = inside && grid.neighbours(i, &offsets).all(|n| data[n]);
            }
        }
    });

    grid.to_array(out)
}

/// Binary dilation with a ball of the given radius.
///
/// # Arguments
/// * `input` - Mask (z, y, x)
/// * `radius` - Ball radius in voxels (0 = identity)
/// * `mode` - Whether the ball extends across z-planes
pub fn dilate(input: ArrayView3<bool>, radius: usize, mode: PlaneMode) -> Mask {
    ball_filter(input, radius, mode, true)
}

/// Binary erosion with a ball of the given radius; voxels outside the volume
/// count as background.
pub fn erode(input: ArrayView3<bool>, radius: usize, mode: PlaneMode) -> Mask {
    ball_filter(input, radius, mode, false)
}

// ============================================================================
// Connected components
// ============================================================================

/// Result of connected-component labelling.
#[derive(Debug, Clone)]
pub struct Components {
    /// 0 = background, 1..=count = components
    pub labels: LabelVolume,
    /// `sizes[l]` is the voxel count of label `l` (`sizes[0]` is unused and 0)
    pub sizes: Vec<usize>,
}

impl Components {
    pub fn count(&self) -> usize {
        self.sizes.len() - 1
    }
}

/// Flat breadth-first labelling of voxels where `data[i] == target`.
fn label_flat(
    data: &[bool],
    grid: Grid,
    target: bool,
    offsets: &[[isize; 3]],
) -> (Vec<u32>, Vec<usize>) {
    let mut labels = vec![0u32; grid.len()];
    let mut sizes = vec![0usize];
    let mut queue = VecDeque::new();

    for start in 0..grid.len() {
        if data[start] != target || labels[start] != 0 {
            continue;
        }
        let label = sizes.len() as u32;
        let mut size = 0usize;
        labels[start] = label;
        queue.push_back(start);

        while let Some(i) = queue.pop_front() {
            size += 1;
            for n in grid.neighbours(i, offsets) {
                if data[n] == target && labels[n] == 0 {
                    labels[n] = label;
                    queue.push_back(n);
                }
            }
        }
        sizes.push(size);
    }

    (labels, sizes)
}

/// Label connected foreground components.
///
/// In `SliceWise2D` mode components never cross z-planes.
pub fn label_components(input: ArrayView3<bool>, connectivity: Connectivity, mode: PlaneMode) -> Components {
    let grid = Grid::new(input.dim());
    let data = flatten(&input);
    let offsets = connectivity.offsets(mode);
    let (labels, sizes) = label_flat(&data, grid, true, &offsets);
    Components {
        labels: grid.to_array(labels),
        sizes,
    }
}

// ============================================================================
// Hole filling
// ============================================================================

/// Hole-filling bounds. Sizes are voxel counts (pixel counts per plane in
/// slice-wise mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoleFillParams {
    pub min_size: usize,
    pub max_size: usize,
    pub mode: PlaneMode,
}

impl Default for HoleFillParams {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 100,
            mode: PlaneMode::SliceWise2D,
        }
    }
}

impl HoleFillParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_size > self.max_size {
            return Err(SegmentationError::invalid(format!(
                "hole size bounds inverted: min {} > max {}",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Fill enclosed background regions whose size lies in `[min_size, max_size]`.
///
/// Background is grouped with face connectivity. Regions touching the
/// volume boundary (the in-plane edges in slice-wise mode) are never filled.
///
/// # Returns
/// Mask with the qualifying holes set to foreground
pub fn fill_holes(input: ArrayView3<bool>, params: &HoleFillParams) -> Result<Mask> {
    params.validate()?;

    let grid = Grid::new(input.dim());
    let data = flatten(&input);
    let offsets = Connectivity::Face.offsets(params.mode);
    let (labels, sizes) = label_flat(&data, grid, false, &offsets);

    let mut enclosed = vec![true; sizes.len()];
    enclosed[0] = false;
    for (i, &l) in labels.iter().enumerate() {
        if l != 0 && enclosed[l as usize] && grid.on_border(i, params.mode) {
            enclosed[l as usize] = false;
        }
    }

    let fill: Vec<bool> = sizes
        .iter()
        .zip(&enclosed)
        .map(|(&size, &e)| e && size >= params.min_size && size <= params.max_size)
        .collect();

    debug!(
        "fill_holes: {} background regions, {} filled",
        sizes.len() - 1,
        fill.iter().filter(|&&f| f).count()
    );

    let out: Vec<bool> = data
        .iter()
        .zip(&labels)
        .map(|(&v, &l)| v || fill[l as usize])
        .collect();
    Ok(grid.to_array(out))
}

// ============================================================================
// Size filtering
// ============================================================================

/// Remove connected components with fewer than `min_size` voxels.
///
/// # Arguments
/// * `input` - Mask (z, y, x), components are evaluated in 3D
/// * `min_size` - Components strictly smaller than this are removed
/// * `connectivity` - Adjacency used to define components
pub fn filter_by_size(input: ArrayView3<bool>, min_size: usize, connectivity: Connectivity) -> Result<Mask> {
    let comps = label_components(input, connectivity, PlaneMode::Volumetric3D);
    let removed = comps.sizes.iter().skip(1).filter(|&&s| s < min_size).count();
    debug!(
        "filter_by_size: {} components, {} removed (min_size={min_size})",
        comps.count(),
        removed
    );

    let mut out = Mask::from_elem(input.dim(), false);
    Zip::from(&mut out)
        .and(&comps.labels)
        .for_each(|o, &l| *o = l != 0 && comps.sizes[l as usize] >= min_size);
    Ok(out)
}

/// Zero every label whose voxel count is below `min_size`. Surviving labels keep their ids.
pub fn filter_labels_by_size(labels: ArrayView3<u32>, min_size: usize) -> LabelVolume {
    let max_label = labels.iter().copied().max().unwrap_or(0) as usize;
    let mut counts = vec![0usize; max_label + 1];
    for &l in labels.iter() {
        counts[l as usize] += 1;
    }
    labels.mapv(|l| if l != 0 && counts[l as usize] < min_size { 0 } else { l })
}

/// Per-plane outline of a mask: foreground voxels with a background 4-neighbour
/// (or on the plane edge).
pub fn segmentation_contour(input: ArrayView3<bool>) -> Mask {
    let inner = erode(input, 1, PlaneMode::SliceWise2D);
    let mut out = input.to_owned();
    out.zip_mut_with(&inner, |o, &i| *o = *o && !i);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1 x 7 x 7 ring with a 3x3 hole in the middle.
    fn ring() -> Mask {
        let mut m = Mask::from_elem((1, 7, 7), false);
        for y in 1..6 {
            for x in 1..6 {
                m[[0, y, x]] = true;
            }
        }
        for y in 2..5 {
            for x in 2..5 {
                m[[0, y, x]] = false;
            }
        }
        m
    }

    #[test]
    fn test_dilate_grows_cross() {
        let mut m = Mask::from_elem((3, 3, 3), false);
        m[[1, 1, 1]] = true;
        let out = dilate(m.view(), 1, PlaneMode::Volumetric3D);
        assert_eq!(out.iter().filter(|&&v| v).count(), 7);
        assert!(out[[0, 1, 1]] && out[[2, 1, 1]] && out[[1, 0, 1]]);
        assert!(!out[[0, 0, 0]]);

        let flat = dilate(m.view(), 1, PlaneMode::SliceWise2D);
        assert_eq!(flat.iter().filter(|&&v| v).count(), 5);
        assert!(!flat[[0, 1, 1]]);
    }

    #[test]
    fn test_erode_shrinks_block() {
        let m = Mask::from_elem((3, 5, 5), true);
        let out = erode(m.view(), 1, PlaneMode::SliceWise2D);
        assert!(out[[0, 2, 2]]);
        assert!(!out[[0, 0, 2]]);
        assert_eq!(out.iter().filter(|&&v| v).count(), 3 * 9);
    }

    #[test]
    fn test_label_components_face_vs_full() {
        let mut m = Mask::from_elem((1, 3, 3), false);
        m[[0, 0, 0]] = true;
        m[[0, 1, 1]] = true;
        let face = label_components(m.view(), Connectivity::Face, PlaneMode::Volumetric3D);
        assert_eq!(face.count(), 2);
        assert_eq!(face.labels[[0, 0, 0]], 1);
        assert_eq!(face.labels[[0, 1, 1]], 2);
        let full = label_components(m.view(), Connectivity::Full, PlaneMode::Volumetric3D);
        assert_eq!(full.count(), 1);
        assert_eq!(full.sizes, vec![0, 2]);
    }

    #[test]
    fn test_fill_holes_within_bounds() {
        let m = ring();
        let params = HoleFillParams {
            min_size: 1,
            max_size: 9,
            mode: PlaneMode::SliceWise2D,
        };
        let out = fill_holes(m.view(), &params).unwrap();
        assert!(out[[0, 3, 3]]);
        // Outside background touches the border and stays empty
        assert!(!out[[0, 0, 0]]);

        let too_small = HoleFillParams {
            max_size: 8,
            ..params
        };
        let out = fill_holes(m.view(), &too_small).unwrap();
        assert!(!out[[0, 3, 3]]);
    }

    #[test]
    fn test_fill_holes_idempotent() {
        let mut m = Mask::from_elem((2, 12, 12), false);
        m.slice_mut(ndarray::s![.., 1..11, 1..11]).fill(true);
        m[[0, 3, 3]] = false; // 1-voxel hole
        m.slice_mut(ndarray::s![.., 5..9, 5..9]).fill(false); // 16-voxel hole per plane
        let params = HoleFillParams {
            min_size: 1,
            max_size: 4,
            mode: PlaneMode::SliceWise2D,
        };
        let once = fill_holes(m.view(), &params).unwrap();
        let twice = fill_holes(once.view(), &params).unwrap();
        assert_eq!(once, twice);
        assert!(once[[0, 3, 3]]);
        assert!(!once[[0, 6, 6]]);
    }

    #[test]
    fn test_fill_holes_3d_needs_full_enclosure() {
        // Tube open at both z ends: each plane has a hole, the volume does not
        let mut m = Mask::from_elem((3, 5, 5), true);
        for z in 0..3 {
            m[[z, 2, 2]] = false;
        }
        let params = HoleFillParams {
            min_size: 0,
            max_size: 10,
            mode: PlaneMode::Volumetric3D,
        };
        let out = fill_holes(m.view(), &params).unwrap();
        assert!(!out[[1, 2, 2]]);

        let params = HoleFillParams {
            mode: PlaneMode::SliceWise2D,
            ..params
        };
        let out = fill_holes(m.view(), &params).unwrap();
        assert!(out[[1, 2, 2]]);
    }

    #[test]
    fn test_fill_holes_rejects_inverted_bounds() {
        let params = HoleFillParams {
            min_size: 10,
            max_size: 2,
            mode: PlaneMode::SliceWise2D,
        };
        assert!(matches!(
            fill_holes(ring().view(), &params),
            Err(SegmentationError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_filter_by_size_removes_small() {
        let mut m = Mask::from_elem((2, 8, 8), false);
        m.slice_mut(ndarray::s![.., 0..3, 0..3]).fill(true); // 18 voxels
        m[[0, 6, 6]] = true;
        m[[0, 6, 7]] = true; // 2 voxels
        let out = filter_by_size(m.view(), 3, Connectivity::Face).unwrap();
        assert!(out[[1, 2, 2]]);
        assert!(!out[[0, 6, 6]]);

        let comps = label_components(out.view(), Connectivity::Face, PlaneMode::Volumetric3D);
        assert!(comps.sizes.iter().skip(1).all(|&s| s >= 3));
    }

    #[test]
    fn test_filter_by_size_idempotent() {
        let mut m = Mask::from_elem((3, 10, 10), false);
        m.slice_mut(ndarray::s![0..2, 1..4, 1..4]).fill(true);
        m.slice_mut(ndarray::s![1, 6..8, 6]).fill(true);
        m[[2, 9, 0]] = true;
        m[[2, 8, 1]] = true; // diagonal pair
        for connectivity in [Connectivity::Face, Connectivity::Full] {
            let once = filter_by_size(m.view(), 2, connectivity).unwrap();
            let twice = filter_by_size(once.view(), 2, connectivity).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_filter_by_size_diagonal_connectivity() {
        let mut m = Mask::from_elem((1, 4, 4), false);
        m[[0, 0, 0]] = true;
        m[[0, 1, 1]] = true;
        m[[0, 2, 2]] = true;
        let face = filter_by_size(m.view(), 2, Connectivity::Face).unwrap();
        assert!(face.iter().all(|&v| !v));
        let full = filter_by_size(m.view(), 2, Connectivity::Full).unwrap();
        assert_eq!(full, m);
    }

    #[test]
    fn test_filter_labels_by_size() {
        let mut labels = LabelVolume::zeros((1, 3, 3));
        labels[[0, 0, 0]] = 1;
        labels[[0, 1, 0]] = 2;
        labels[[0, 1, 1]] = 2;
        let out = filter_labels_by_size(labels.view(), 2);
        assert_eq!(out[[0, 0, 0]], 0);
        assert_eq!(out[[0, 1, 1]], 2);
    }

    #[test]
    fn test_contour_is_outline() {
        let m = Mask::from_elem((1, 5, 5), true);
        let c = segmentation_contour(m.view());
        assert!(c[[0, 0, 2]]);
        assert!(!c[[0, 2, 2]]);
        assert_eq!(c.iter().filter(|&&v| v).count(), 16);
    }
}
