//! Watershed seeding: local intensity maxima inside a mask, and seeds
//! propagated from a single representative z-plane.

use log::{debug, trace};
use ndarray::{s, ArrayView3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentationError};
use crate::filters::morphology::{fill_holes, filter_by_size, label_components, HoleFillParams};
use crate::filters::scale_space::{ScaleCutoff, ScaleSpaceDetector};
use crate::volume::{ensure_same_shape, flatten, Connectivity, Grid, LabelVolume, Mask, PlaneMode};

// ============================================================================
// Local maxima
// ============================================================================

/// Peak search settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalMaximaParams {
    /// Half-width of the cubic search window, in voxels.
    pub min_distance: usize,
    /// Drop peaks closer than `min_distance` to the volume boundary.
    pub exclude_border: bool,
}

impl Default for LocalMaximaParams {
    fn default() -> Self {
        Self {
            min_distance: 2,
            exclude_border: false,
        }
    }
}

/// Local intensity maxima inside each connected component of `mask`.
///
/// A foreground voxel is a peak when it equals the maximum of `intensity`
/// over the `(2*min_distance+1)^3` window restricted to its own component,
/// and is strictly brighter than that component's dimmest voxel. A component
/// of uniform intensity has no such voxel, so its whole plateau is returned
/// and later forms a single marker.
///
/// # Arguments
/// * `intensity` - Structure channel (z, y, x)
/// * `mask` - Foreground mask, components are taken with full connectivity
/// * `params` - Window size and border handling
pub fn find_local_maxima(
    intensity: ArrayView3<f32>,
    mask: ArrayView3<bool>,
    params: &LocalMaximaParams,
) -> Result<Mask> {
    ensure_same_shape(intensity.dim(), mask.dim())?;

    let grid = Grid::new(intensity.dim());
    let comps = label_components(mask, Connectivity::Full, PlaneMode::Volumetric3D);
    let labels = flatten(&comps.labels.view());
    let values = flatten(&intensity);

    let mut floor = vec![f32::INFINITY; comps.sizes.len()];
    let mut ceiling = vec![f32::NEG_INFINITY; comps.sizes.len()];
    for (&l, &v) in labels.iter().zip(&values) {
        if l != 0 {
            floor[l as usize] = floor[l as usize].min(v);
            ceiling[l as usize] = ceiling[l as usize].max(v);
        }
    }

    let d = params.min_distance;
    let (depth, height, width) = grid.shape();
    let inside = |c: usize, n: usize| !params.exclude_border || (c >= d && c + d < n);

    let mut peaks = vec![false; grid.len()];
    if grid.len() == 0 {
        return Ok(grid.to_array(peaks));
    }
    let plane = grid.plane_len();
    peaks.par_chunks_mut(plane).enumerate().for_each(|(z, row)| {
        for (j, out) in row.iter_mut().enumerate() {
            let i = z * plane + j;
            let label = labels[i];
            if label == 0 {
                continue;
            }
            let (_, y, x) = grid.coords(i);
            if !(inside(z, depth) && inside(y, height) && inside(x, width)) {
                continue;
            }
            let v = values[i];
            let flat = floor[label as usize] >= ceiling[label as usize];
            if !flat && !(v > floor[label as usize]) {
                continue;
            }

            let mut is_peak = true;
            'window: for nz in z.saturating_sub(d)..(z + d + 1).min(depth) {
                for ny in y.saturating_sub(d)..(y + d + 1).min(height) {
                    for nx in x.saturating_sub(d)..(x + d + 1).min(width) {
                        let n = grid.linear(nz, ny, nx);
                        if labels[n] == label && values[n] > v {
                            is_peak = false;
                            break 'window;
                        }
                    }
                }
            }
            *out = is_peak;
        }
    });

    debug!(
        "find_local_maxima: components={} peaks={} min_distance={}",
        comps.count(),
        peaks.iter().filter(|&&p| p).count(),
        d
    );
    Ok(grid.to_array(peaks))
}

/// Label peaks with full connectivity, then grow every label by a one-voxel
/// cross.
///
/// Growth only claims unlabelled voxels; a voxel reached by two labels takes
/// the smaller one. Peaks two voxels apart keep distinct labels.
pub fn markers_from_peaks(peaks: ArrayView3<bool>) -> LabelVolume {
    let grid = Grid::new(peaks.dim());
    let peak_labels = label_components(peaks, Connectivity::Full, PlaneMode::Volumetric3D);
    let seeds = flatten(&peak_labels.labels.view());
    let cross = Connectivity::Face.offsets(PlaneMode::Volumetric3D);

    let grown: Vec<u32> = (0..grid.len())
        .map(|i| {
            if seeds[i] != 0 {
                return seeds[i];
            }
            grid.neighbours(i, &cross)
                .map(|n| seeds[n])
                .filter(|&l| l != 0)
                .min()
                .unwrap_or(0)
        })
        .collect();
    grid.to_array(grown)
}

// ============================================================================
// Middle frame
// ============================================================================

/// How the representative z-plane is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiddleFrame {
    /// `depth / 2`
    FixedMiddle,
    /// Plane with the most voxels above the volume mean (lowest z on ties).
    #[default]
    IntensityPeak,
}

impl MiddleFrame {
    pub fn select(&self, volume: ArrayView3<f32>) -> usize {
        let depth = volume.len_of(Axis(0));
        match self {
            MiddleFrame::FixedMiddle => depth / 2,
            MiddleFrame::IntensityPeak => {
                if volume.is_empty() {
                    return depth / 2;
                }
                let mean = volume.iter().map(|&v| v as f64).sum::<f64>() / volume.len() as f64;
                let counts: Vec<usize> = volume
                    .axis_iter(Axis(0))
                    .map(|plane| plane.iter().filter(|&&v| v as f64 > mean).count())
                    .collect();
                trace!("MiddleFrame::IntensityPeak counts={counts:?}");
                let mut best = 0;
                for (z, &c) in counts.iter().enumerate() {
                    if c > counts[best] {
                        best = z;
                    }
                }
                best
            }
        }
    }
}

// ============================================================================
// Mid-frame seeds
// ============================================================================

/// Settings for seeds derived from one z-plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidFrameSeedParams {
    pub frame: MiddleFrame,
    /// Filament scales run on the selected plane.
    pub scales: Vec<ScaleCutoff>,
    /// Interior regions smaller than this are ignored.
    pub hole_min: usize,
    pub hole_max: usize,
    /// Seeds also cover this many planes above and below the selected one.
    pub z_extent: usize,
    /// Seed the whole first plane with label 1 as the outside basin.
    pub background_seed: bool,
}

impl Default for MidFrameSeedParams {
    fn default() -> Self {
        Self {
            frame: MiddleFrame::IntensityPeak,
            scales: vec![ScaleCutoff::new(1.0, 0.01), ScaleCutoff::new(2.0, 0.01)],
            hole_min: 40,
            hole_max: 40_000,
            z_extent: 0,
            background_seed: true,
        }
    }
}

impl MidFrameSeedParams {
    pub fn validate(&self) -> Result<()> {
        if self.scales.is_empty() {
            return Err(SegmentationError::invalid("scale-cutoff list is empty"));
        }
        self.scales.iter().try_for_each(ScaleCutoff::validate)?;
        self.hole_fill().validate()
    }

    fn hole_fill(&self) -> HoleFillParams {
        HoleFillParams {
            min_size: self.hole_min,
            max_size: self.hole_max,
            mode: PlaneMode::SliceWise2D,
        }
    }
}

/// Seeds from the enclosed interior of the ridge outline on one plane.
#[derive(Debug, Clone)]
pub struct MidFrameSeeds {
    pub markers: LabelVolume,
    pub plane: usize,
    /// Number of interior regions that became seeds.
    pub regions: usize,
}

/// Detect ridges on the representative plane, fill their enclosed holes and
/// turn every interior region into its own seed label.
///
/// Interior labels start at 2 when `background_seed` is set (label 1 is the
/// outside) and at 1 otherwise. Fails with `EmptySeedSet` when the plane has
/// no enclosed interior.
pub fn seeds_from_mid_frame(smoothed: ArrayView3<f32>, params: &MidFrameSeedParams) -> Result<MidFrameSeeds> {
    params.validate()?;
    let (depth, height, width) = smoothed.dim();
    if depth == 0 {
        return Err(SegmentationError::invalid("volume has no z-planes"));
    }

    let z = params.frame.select(smoothed);
    let plane = smoothed.slice(s![z..z + 1, .., ..]);

    let outline = ScaleSpaceDetector::Filament.detect(plane, &params.scales)?;
    let filled = fill_holes(outline.view(), &params.hole_fill())?;
    let mut interior = filled.clone();
    interior.zip_mut_with(&outline, |f, &o| *f ^= o);
    let interior = filter_by_size(interior.view(), params.hole_min, Connectivity::Face)?;

    let regions = label_components(interior.view(), Connectivity::Face, PlaneMode::SliceWise2D);
    if regions.count() == 0 {
        return Err(SegmentationError::EmptySeedSet);
    }

    let offset = u32::from(params.background_seed);
    let mut markers = LabelVolume::zeros((depth, height, width));
    if params.background_seed {
        markers.index_axis_mut(Axis(0), 0).fill(1);
    }
    let lo = z.saturating_sub(params.z_extent);
    let hi = (z + params.z_extent).min(depth - 1);
    let region_plane = regions.labels.index_axis(Axis(0), 0);
    for mut target in markers.slice_mut(s![lo..=hi, .., ..]).axis_iter_mut(Axis(0)) {
        target.zip_mut_with(&region_plane, |m, &r| {
            if r != 0 {
                *m = r + offset;
            }
        });
    }

    debug!(
        "seeds_from_mid_frame: plane={z} regions={} planes={}..={}",
        regions.count(),
        lo,
        hi
    );
    Ok(MidFrameSeeds {
        markers,
        plane: z,
        regions: regions.count(),
    })
}
