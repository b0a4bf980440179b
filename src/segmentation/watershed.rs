//! Seeded watershed by priority flooding.
//!
//! Every seed voxel starts a basin. Unlabelled neighbours of labelled voxels
//! enter a min-priority queue keyed by elevation; the lowest queued voxel is
//! popped and joins the basin that queued it. Ties pop in insertion order
//! (then by linear index), and seeds are enqueued in linear index order, so a
//! given elevation and seed placement always floods the same way.
//!
//! ## Watershed lines
//!
//! With lines enabled, a popped voxel that already touches a different basin
//! is labelled 0 and does not spread. Two differently labelled voxels are
//! therefore never neighbours under the flooding connectivity. Adjacent seeds
//! with different labels are turned into line voxels before flooding starts.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use log::debug;
use ndarray::ArrayView3;

use crate::error::{Result, SegmentationError};
use crate::volume::{ensure_same_shape, flatten, Connectivity, Grid, LabelVolume, PlaneMode};

/// Queue entry; `Ord` is reversed so `BinaryHeap` pops the lowest elevation first.
#[derive(Debug, Clone, Copy)]
struct Flood {
    elevation: f32,
    age: u64,
    index: usize,
    label: u32,
}

impl PartialEq for Flood {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Flood {}

impl PartialOrd for Flood {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Flood {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .elevation
            .total_cmp(&self.elevation)
            .then_with(|| other.age.cmp(&self.age))
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Flood `elevation` from `markers`.
///
/// # Arguments
/// * `elevation` - Surface to flood, low values first (z, y, x)
/// * `markers` - Seed labels, 0 = unseeded
/// * `mask` - Voxels allowed to be labelled; `None` floods the whole volume
/// * `connectivity` - Flooding neighbourhood
/// * `watershed_line` - Keep a 0-labelled separation between basins
///
/// # Returns
/// Label volume; voxels outside the mask, on lines, or unreachable from any
/// seed are 0. Fails with `EmptySeedSet` if no marker lies inside the mask.
pub fn watershed(
    elevation: ArrayView3<f32>,
    markers: ArrayView3<u32>,
    mask: Option<ArrayView3<bool>>,
    connectivity: Connectivity,
    watershed_line: bool,
) -> Result<LabelVolume> {
    let grid = Grid::new(elevation.dim());
    ensure_same_shape(grid.shape(), markers.dim())?;
    if let Some(mask) = &mask {
        ensure_same_shape(grid.shape(), mask.dim())?;
    }

    let elev = flatten(&elevation);
    let allowed = match &mask {
        Some(mask) => flatten(mask),
        None => vec![true; grid.len()],
    };
    let mut labels: Vec<u32> = flatten(&markers)
        .into_iter()
        .zip(&allowed)
        .map(|(l, &a)| if a { l } else { 0 })
        .collect();

    let seed_count = labels.iter().filter(|&&l| l != 0).count();
    if seed_count == 0 {
        return Err(SegmentationError::EmptySeedSet);
    }

    let offsets = connectivity.offsets(PlaneMode::Volumetric3D);
    let mut done = vec![false; grid.len()];

    if watershed_line {
        let conflicts: Vec<usize> = (0..grid.len())
            .filter(|&i| {
                labels[i] != 0
                    && grid
                        .neighbours(i, &offsets)
                        .any(|n| labels[n] != 0 && labels[n] != labels[i])
            })
            .collect();
        for i in conflicts {
            labels[i] = 0;
            done[i] = true;
        }
    }

    debug!(
        "watershed: shape={:?} seeds={} connectivity={:?} lines={}",
        grid.shape(),
        seed_count,
        connectivity,
        watershed_line
    );

    let mut heap = BinaryHeap::new();
    let mut age = 0u64;
    let mut push = |heap: &mut BinaryHeap<Flood>, index: usize, label: u32| {
        heap.push(Flood {
            elevation: elev[index],
            age,
            index,
            label,
        });
        age += 1;
    };

    for i in 0..grid.len() {
        if labels[i] != 0 {
            push(&mut heap, i, labels[i]);
        }
    }

    while let Some(entry) = heap.pop() {
        let i = entry.index;
        if done[i] {
            continue;
        }
        if labels[i] == 0 {
            // Nonzero labels belong to seeds or finished voxels
            if watershed_line
                && grid
                    .neighbours(i, &offsets)
                    .any(|n| labels[n] != 0 && labels[n] != entry.label)
            {
                done[i] = true;
                continue;
            }
            labels[i] = entry.label;
        }
        done[i] = true;

        for n in grid.neighbours(i, &offsets) {
            if allowed[n] && !done[n] && labels[n] == 0 {
                push(&mut heap, n, entry.label);
            }
        }
    }

    Ok(grid.to_array(labels))
}
