//! Core utilities for volume filters.
//!
//! This module provides shared functionality used by the smoother and the
//! scale-space detectors:
//! - Gaussian and Gaussian-derivative kernel generation
//! - Separable convolution along a single axis with nearest-edge borders
//!
//! Convolutions run plane-parallel with rayon: each output z-plane is an
//! independent chunk.

use ndarray::{Array3, ArrayView3, Axis};
use rayon::prelude::*;

use crate::volume::{flatten, Grid};

/// Kernel half-width used for smoothing, in standard deviations.
pub const SMOOTHING_TRUNCATE: f32 = 3.0;

/// Kernel half-width used for scale-space derivatives, in standard deviations.
pub const DERIVATIVE_TRUNCATE: f32 = 4.0;

/// Generate a normalized 1D Gaussian kernel.
///
/// # Arguments
/// * `sigma` - Standard deviation of the Gaussian
/// * `truncate` - Half-width of the kernel in standard deviations
///
/// # Returns
/// Odd-length kernel summing to 1. A non-positive sigma yields the identity kernel.
pub fn gaussian_kernel_1d(sigma: f32, truncate: f32) -> Vec<f32> {
    gaussian_derivative_kernel_1d(sigma, 0, truncate)
}

/// Generate a 1D Gaussian derivative kernel of order 0, 1 or 2.
///
/// Kernels are meant for convolution (not correlation): applying the order-1
/// kernel to a unit ramp gives +1. Order-1 and order-2 kernels sum to zero, so
/// constant regions have no derivative response.
pub fn gaussian_derivative_kernel_1d(sigma: f32, order: u8, truncate: f32) -> Vec<f32> {
    if sigma <= 0.0 {
        return match order {
            0 => vec![1.0],
            1 => vec![0.5, 0.0, -0.5],
            _ => vec![1.0, -2.0, 1.0],
        };
    }

    let radius = ((truncate * sigma + 0.5) as usize).max(1);
    let sigma2 = sigma * sigma;

    let phi: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / (2.0 * sigma2)).exp()
        })
        .collect();
    let norm: f32 = phi.iter().sum();

    let mut kernel: Vec<f32> = phi
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let x = i as f32 - radius as f32;
            let p = p / norm;
            match order {
                0 => p,
                1 => -x / sigma2 * p,
                _ => (x * x / (sigma2 * sigma2) - 1.0 / sigma2) * p,
            }
        })
        .collect();

    if order == 2 {
        // Remove truncation bias
        let mean = kernel.iter().sum::<f32>() / kernel.len() as f32;
        for v in kernel.iter_mut() {
            *v -= mean;
        }
    }

    kernel
}

/// Convolve a flat volume along one axis, replicating edge voxels.
pub(crate) fn convolve_axis_flat(data: &[f32], grid: Grid, kernel: &[f32], axis: Axis) -> Vec<f32> {
    let mut out = vec![0.0f32; grid.len()];
    if grid.len() == 0 {
        return out;
    }

    let half = (kernel.len() / 2) as isize;
    let (depth, height, width) = grid.shape();
    let clamp = |v: isize, n: usize| v.clamp(0, n as isize - 1) as usize;

    out.par_chunks_mut(grid.plane_len())
        .enumerate()
        .for_each(|(z, plane)| {
            for y in 0..height {
                for x in 0..width {
                    let mut sum = 0.0f32;
                    for (ki, &kv) in kernel.iter().enumerate() {
                        let offset = half - ki as isize;
                        let idx = match axis.index() {
                            0 => grid.linear(clamp(z as isize + offset, depth), y, x),
                            1 => grid.linear(z, clamp(y as isize + offset, height), x),
                            _ => grid.linear(z, y, clamp(x as isize + offset, width)),
                        };
                        sum += data[idx] * kv;
                    }
                    plane[y * width + x] = sum;
                }
            }
        });

    out
}

/// Apply one kernel per axis (`None` leaves that axis untouched).
pub(crate) fn separable_filter_flat(
    data: &[f32],
    grid: Grid,
    kernels: [Option<&[f32]>; 3],
) -> Vec<f32> {
    let mut current = data.to_vec();
    for (axis, kernel) in kernels.iter().enumerate() {
        if let Some(kernel) = kernel {
            current = convolve_axis_flat(&current, grid, kernel, Axis(axis));
        }
    }
    current
}

/// Convolve a volume along one axis, replicating edge voxels.
pub fn convolve_axis(input: ArrayView3<f32>, kernel: &[f32], axis: Axis) -> Array3<f32> {
    let grid = Grid::new(input.dim());
    let data = flatten(&input);
    grid.to_array(convolve_axis_flat(&data, grid, kernel, axis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_kernel_normalized_and_odd() {
        let k = gaussian_kernel_1d(1.0, SMOOTHING_TRUNCATE);
        assert_eq!(k.len(), 7);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(k[3] > k[2] && k[2] > k[1]);
    }

    #[test]
    fn test_derivative_kernels_sum_to_zero() {
        for order in [1u8, 2] {
            let k = gaussian_derivative_kernel_1d(1.5, order, DERIVATIVE_TRUNCATE);
            let sum: f32 = k.iter().sum();
            assert!(sum.abs() < 1e-5, "order {order} sums to {sum}");
        }
    }

    #[test]
    fn test_first_derivative_of_ramp_is_one() {
        let mut vol = Array3::<f32>::zeros((1, 1, 21));
        for x in 0..21 {
            vol[[0, 0, x]] = x as f32;
        }
        let k = gaussian_derivative_kernel_1d(1.0, 1, DERIVATIVE_TRUNCATE);
        let out = convolve_axis(vol.view(), &k, Axis(2));
        assert!((out[[0, 0, 10]] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_second_derivative_of_parabola_is_two() {
        let mut vol = Array3::<f32>::zeros((1, 21, 1));
        for y in 0..21 {
            let t = y as f32 - 10.0;
            vol[[0, y, 0]] = t * t;
        }
        let k = gaussian_derivative_kernel_1d(1.0, 2, DERIVATIVE_TRUNCATE);
        let out = convolve_axis(vol.view(), &k, Axis(1));
        assert!((out[[0, 10, 0]] - 2.0).abs() < 0.05);
    }

    #[test]
    fn test_convolve_axis_keeps_constant() {
        let vol = Array3::<f32>::from_elem((3, 4, 5), 0.25);
        let k = gaussian_kernel_1d(2.0, SMOOTHING_TRUNCATE);
        for axis in 0..3 {
            let out = convolve_axis(vol.view(), &k, Axis(axis));
            assert_eq!(out.dim(), (3, 4, 5));
            assert!(out.iter().all(|&v| (v - 0.25).abs() < 1e-5));
        }
    }
}
