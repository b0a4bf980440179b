//! Volume, mask and label containers plus the neighbourhood helpers
//! shared by the morphology and watershed code.
//!
//! ## Layout
//!
//! Every array is an `ndarray::Array3` indexed `[z, y, x]`:
//!
//! | Alias | Element | Meaning |
//! |-------|---------|---------|
//! | `Volume` | f32 | intensities (normalized stages live in 0.0-1.0) |
//! | `Mask` | bool | `true` = foreground |
//! | `LabelVolume` | u32 | 0 = background / watershed line, 1.. = regions |
//!
//! Anisotropic voxel spacing is tracked by the caller; the stages here only
//! care about the (z, y, x) extent.

use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentationError};

pub type Volume = Array3<f32>;
pub type Mask = Array3<bool>;
pub type LabelVolume = Array3<u32>;

/// (depth, height, width)
pub type Shape3 = (usize, usize, usize);

/// Whether an operation runs independently per z-plane or over the whole volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaneMode {
    #[default]
    #[serde(rename = "slice_wise_2d")]
    SliceWise2D,
    #[serde(rename = "volumetric_3d")]
    Volumetric3D,
}

/// Adjacency rule for connected components and flooding.
///
/// | Variant | 3D neighbours | 2D neighbours |
/// |---------|---------------|---------------|
/// | `Face` | 6 | 4 |
/// | `Edge` | 18 | 8 |
/// | `Full` | 26 | 8 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    #[default]
    Face,
    Edge,
    Full,
}

impl Connectivity {
    fn max_nonzero(self) -> usize {
        match self {
            Connectivity::Face => 1,
            Connectivity::Edge => 2,
            Connectivity::Full => 3,
        }
    }

    /// Neighbour offsets `[dz, dy, dx]`, centre excluded.
    ///
    /// In `SliceWise2D` mode only offsets with `dz == 0` are produced.
    pub fn offsets(self, mode: PlaneMode) -> Vec<[isize; 3]> {
        let z_range = match mode {
            PlaneMode::SliceWise2D => 0..=0,
            PlaneMode::Volumetric3D => -1..=1,
        };
        let limit = self.max_nonzero();

        let mut offsets = Vec::with_capacity(26);
        for dz in z_range {
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    let nonzero = [dz, dy, dx].iter().filter(|&&d| d != 0).count();
                    if nonzero > 0 && nonzero <= limit {
                        offsets.push([dz, dy, dx]);
                    }
                }
            }
        }
        offsets
    }
}

/// Flat-index geometry of a (z, y, x) volume in standard layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Grid {
    pub depth: usize,
    pub height: usize,
    pub width: usize,
}

impl Grid {
    pub fn new((depth, height, width): Shape3) -> Self {
        Grid { depth, height, width }
    }

    pub fn shape(&self) -> Shape3 {
        (self.depth, self.height, self.width)
    }

    pub fn len(&self) -> usize {
        self.depth * self.height * self.width
    }

    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    #[inline]
    pub fn linear(&self, z: usize, y: usize, x: usize) -> usize {
        (z * self.height + y) * self.width + x
    }

    #[inline]
    pub fn coords(&self, i: usize) -> (usize, usize, usize) {
        let plane = self.plane_len();
        (i / plane, (i % plane) / self.width, i % self.width)
    }

    /// In-bounds neighbours of `i` under the given offsets.
    #[inline]
    pub fn neighbours<'a>(
        &'a self,
        i: usize,
        offsets: &'a [[isize; 3]],
    ) -> impl Iterator<Item = usize> + 'a {
        let (z, y, x) = self.coords(i);
        offsets.iter().filter_map(move |o| {
            let nz = z as isize + o[0];
            let ny = y as isize + o[1];
            let nx = x as isize + o[2];
            if nz < 0
                || ny < 0
                || nx < 0
                || nz >= self.depth as isize
                || ny >= self.height as isize
                || nx >= self.width as isize
            {
                return None;
            }
            Some(self.linear(nz as usize, ny as usize, nx as usize))
        })
    }

    /// Whether `i` touches the volume boundary. In slice-wise mode the
    /// first and last planes do not count as boundary.
    pub fn on_border(&self, i: usize, mode: PlaneMode) -> bool {
        let (z, y, x) = self.coords(i);
        let in_plane = y == 0 || x == 0 || y + 1 == self.height || x + 1 == self.width;
        match mode {
            PlaneMode::SliceWise2D => in_plane,
            PlaneMode::Volumetric3D => in_plane || z == 0 || z + 1 == self.depth,
        }
    }

    /// Rebuild an owned array from flat standard-layout data.
    pub fn to_array<T>(&self, data: Vec<T>) -> Array3<T> {
        Array3::from_shape_vec(self.shape(), data).expect("flat buffer matches grid shape")
    }
}

/// Copy any view into a flat standard-layout buffer.
pub(crate) fn flatten<T: Copy>(input: &ArrayView3<T>) -> Vec<T> {
    input.iter().copied().collect()
}

/// Fail with `ShapeMismatch` unless both extents agree.
pub fn ensure_same_shape(expected: Shape3, found: Shape3) -> Result<()> {
    if expected != found {
        return Err(SegmentationError::ShapeMismatch { expected, found });
    }
    Ok(())
}

/// Number of foreground voxels.
pub fn foreground_count(mask: ArrayView3<bool>) -> usize {
    mask.iter().filter(|&&v| v).count()
}

/// Encode a mask as 8-bit intensities (0 / 255) for image writers.
pub fn mask_to_u8(mask: ArrayView3<bool>) -> Array3<u8> {
    mask.mapv(|v| if v { 255 } else { 0 })
}

/// Collapse labels to a mask (`label > 0`).
pub fn labels_to_mask(labels: ArrayView3<u32>) -> Mask {
    labels.mapv(|l| l > 0)
}
