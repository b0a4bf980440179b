//! Seeded watershed separation.
//!
//! Two front doors share the watershed core:
//!
//! - [`separate_touching`] splits merged compact objects. Peaks of the
//!   structure channel inside the mask become seeds, and the negated distance
//!   transform of the mask is flooded with watershed lines, constrained to
//!   the mask.
//! - [`extract_shell`] turns a shell-like structure into a one-voxel boundary.
//!   Seeds come from the ridge outline on one representative plane, the
//!   normalized volume is flooded without a mask, and the filled interior is
//!   subtracted from its one-voxel dilation.

pub mod distance;
pub mod seeds;
pub mod watershed;

use log::debug;
use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentationError};
use crate::filters::morphology::dilate;
use crate::volume::{ensure_same_shape, flatten, foreground_count, Connectivity, Grid, LabelVolume, Mask, PlaneMode};

pub use distance::{distance_transform, euclidean_distance};
pub use seeds::{
    find_local_maxima, markers_from_peaks, seeds_from_mid_frame, LocalMaximaParams, MidFrameSeedParams, MiddleFrame,
};
pub use watershed::watershed;

/// Flood `elevation` from a seed set, optionally keeping watershed lines.
///
/// Face connectivity, no mask. Fails with `EmptySeedSet` when `seeds` has no
/// nonzero label.
pub fn separate(elevation: ArrayView3<f32>, seeds: ArrayView3<u32>, watershed_line: bool) -> Result<LabelVolume> {
    watershed(elevation, seeds, None, Connectivity::Face, watershed_line)
}

// ============================================================================
// Touching objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationParams {
    pub peaks: LocalMaximaParams,
    pub connectivity: Connectivity,
    pub watershed_line: bool,
    /// Voxel size `[z, y, x]` for the distance transform.
    pub spacing: [f32; 3],
}

impl Default for SeparationParams {
    fn default() -> Self {
        Self {
            peaks: LocalMaximaParams::default(),
            connectivity: Connectivity::Face,
            watershed_line: true,
            spacing: distance::UNIT_SPACING,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Separation {
    pub labels: LabelVolume,
    /// Peaks used as seeds, before growing.
    pub peaks: Mask,
}

/// Split touching objects in `mask` using peaks of `intensity` as seeds.
///
/// An empty mask yields an all-background result. Every component receives
/// at least one seed, flat ones across their plateau, so `EmptySeedSet` only
/// comes back when `exclude_border` removes every peak.
pub fn separate_touching(
    intensity: ArrayView3<f32>,
    mask: ArrayView3<bool>,
    params: &SeparationParams,
) -> Result<Separation> {
    ensure_same_shape(intensity.dim(), mask.dim())?;

    if foreground_count(mask) == 0 {
        debug!("separate_touching: empty mask, nothing to split");
        return Ok(Separation {
            labels: LabelVolume::zeros(mask.dim()),
            peaks: Mask::from_elem(mask.dim(), false),
        });
    }

    let peaks = find_local_maxima(intensity, mask, &params.peaks)?;
    let markers = markers_from_peaks(peaks.view());
    let basins = distance_transform(mask, params.spacing)?.mapv_into(|d| -d);
    let labels = watershed(
        basins.view(),
        markers.view(),
        Some(mask),
        params.connectivity,
        params.watershed_line,
    )?;

    debug!(
        "separate_touching: objects={}",
        labels.iter().copied().max().unwrap_or(0)
    );
    Ok(Separation { labels, peaks })
}

// ============================================================================
// Shells
// ============================================================================

#[derive(Debug, Clone)]
pub struct Shell {
    pub shell: Mask,
    /// Everything the object seeds flooded.
    pub filled: Mask,
    pub plane: usize,
}

/// Derive a one-voxel shell around the region grown from mid-frame seeds.
///
/// # Arguments
/// * `normalized` - Volume flooded by the watershed
/// * `smoothed` - Volume the representative plane is taken from
/// * `params` - Plane selection, ridge scales and interior bounds
pub fn extract_shell(
    normalized: ArrayView3<f32>,
    smoothed: ArrayView3<f32>,
    params: &MidFrameSeedParams,
) -> Result<Shell> {
    ensure_same_shape(normalized.dim(), smoothed.dim())?;

    let seeds = seeds_from_mid_frame(smoothed, params)?;
    let labels = separate(normalized, seeds.markers.view(), true)?;

    // Label 1 is the outside basin when it was seeded
    let first_object = if params.background_seed { 2 } else { 1 };
    let filled = labels.mapv(|l| l >= first_object);
    let shell = shell_of(filled.view());

    debug!(
        "extract_shell: plane={} filled={} shell={}",
        seeds.plane,
        foreground_count(filled.view()),
        foreground_count(shell.view())
    );
    Ok(Shell {
        shell,
        filled,
        plane: seeds.plane,
    })
}

/// Voxels added by a one-voxel 3D dilation: `filled XOR dilate(filled)`.
pub fn shell_of(filled: ArrayView3<bool>) -> Mask {
    let mut shell = dilate(filled, 1, PlaneMode::Volumetric3D);
    shell.zip_mut_with(&filled, |s, &f| *s ^= f);
    shell
}

/// Whether two differently labelled voxels touch under `connectivity`.
pub fn labels_touch(labels: ArrayView3<u32>, connectivity: Connectivity) -> bool {
    let grid = Grid::new(labels.dim());
    let flat = flatten(&labels);
    let offsets = connectivity.offsets(PlaneMode::Volumetric3D);
    (0..grid.len()).any(|i| {
        flat[i] != 0
            && grid
                .neighbours(i, &offsets)
                .any(|n| flat[n] != 0 && flat[n] != flat[i])
    })
}

/// Fail with `InvalidParameter` unless the label volume is separated.
pub fn ensure_separated(labels: ArrayView3<u32>, connectivity: Connectivity) -> Result<()> {
    if labels_touch(labels, connectivity) {
        return Err(SegmentationError::invalid("adjacent voxels carry different labels"));
    }
    Ok(())
}
