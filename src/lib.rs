//! structseg: structure segmentation for 3D fluorescence microscopy.
//!
//! Converts a single-channel intensity volume into a binary mask (or object
//! labels) for one subcellular structure class, with Python bindings via
//! PyO3 and WASM bindings for JavaScript.
//!
//! ## Volume Format
//! Every array is 3D and indexed `(z, y, x)`:
//! - **Intensities**: `f32`, raw or normalized to 0.0-1.0
//! - **Masks**: `bool`, exported as `u8` 0 / 255
//! - **Labels**: `u32`, 0 = background or watershed line
//!
//! Voxel spacing is tracked by the caller. Planes may be processed
//! independently (`PlaneMode::SliceWise2D`) when consecutive z-slices are
//! offset in time.
//!
//! ## Pipeline
//! normalize -> smooth -> scale-space detection (spot / filament, unioned) ->
//! hole filling -> optional seeded watershed -> size filtering.
//! The [`workflow::Recipe`] variants fix the stage order for dots, granules
//! and shells.

pub mod config;
pub mod error;
pub mod filters;
pub mod segmentation;
pub mod volume;
pub mod workflow;

#[cfg(feature = "wasm")]
pub mod wasm;

pub use config::WorkflowConfig;
pub use error::{Result, SegmentationError};
pub use volume::{Connectivity, LabelVolume, Mask, PlaneMode, Volume};
pub use workflow::{run, Recipe, WorkflowOutput};

// Python bindings (only when python feature is enabled)
#[cfg(feature = "python")]
mod python {
    use numpy::{IntoPyArray, PyArray3, PyReadonlyArray3};
    use pyo3::exceptions::PyValueError;
    use pyo3::prelude::*;

    use crate::config::WorkflowConfig;
    use crate::error::SegmentationError;
    use crate::filters::morphology::{self, HoleFillParams};
    use crate::filters::normalize::{self as normalize_mod, NormalizationPolicy};
    use crate::filters::scale_space::{ScaleCutoff, ScaleSpaceDetector};
    use crate::filters::smooth as smooth_mod;
    use crate::segmentation::{self, SeparationParams};
    use crate::volume::{mask_to_u8, Connectivity, PlaneMode};
    use crate::workflow;

    fn value_error(e: SegmentationError) -> PyErr {
        PyValueError::new_err(e.to_string())
    }

    fn plane_mode(volumetric: bool) -> PlaneMode {
        if volumetric {
            PlaneMode::Volumetric3D
        } else {
            PlaneMode::SliceWise2D
        }
    }

    fn scale_list(scales: Vec<(f32, f32)>) -> Vec<ScaleCutoff> {
        scales.into_iter().map(|(s, c)| ScaleCutoff::new(s, c)).collect()
    }

    // ========================================================================
    // Pre-processing
    // ========================================================================

    /// Normalize a raw volume into 0.0-1.0.
    ///
    /// Passing both `lower_factor` and `upper_factor` selects the
    /// mean +/- std clip; otherwise `bound` is the upper min-max clip
    /// (0 disables it).
    #[pyfunction]
    #[pyo3(signature = (volume, lower_factor=None, upper_factor=None, bound=0.0))]
    pub fn normalize<'py>(
        py: Python<'py>,
        volume: PyReadonlyArray3<'py, f32>,
        lower_factor: Option<f32>,
        upper_factor: Option<f32>,
        bound: f32,
    ) -> PyResult<Bound<'py, PyArray3<f32>>> {
        let policy = match (lower_factor, upper_factor) {
            (Some(lower_factor), Some(upper_factor)) => NormalizationPolicy::TwoSidedStdBound {
                lower_factor,
                upper_factor,
            },
            (None, None) => NormalizationPolicy::UpperBoundedMinMax { bound },
            _ => {
                return Err(PyValueError::new_err(
                    "lower_factor and upper_factor must be given together",
                ))
            }
        };
        let result = normalize_mod::normalize(volume.as_array(), &policy).map_err(value_error)?;
        Ok(result.into_pyarray(py))
    }

    /// Gaussian smoothing, per plane unless `volumetric` is set.
    #[pyfunction]
    #[pyo3(signature = (volume, sigma=1.0, volumetric=false))]
    pub fn smooth<'py>(
        py: Python<'py>,
        volume: PyReadonlyArray3<'py, f32>,
        sigma: f32,
        volumetric: bool,
    ) -> PyResult<Bound<'py, PyArray3<f32>>> {
        let result = smooth_mod::smooth(volume.as_array(), sigma, plane_mode(volumetric)).map_err(value_error)?;
        Ok(result.into_pyarray(py))
    }

    // ========================================================================
    // Detection
    // ========================================================================

    /// Spot detection over a list of `(scale, cutoff)` pairs.
    #[pyfunction]
    #[pyo3(signature = (volume, scales, volumetric=false))]
    pub fn detect_spots<'py>(
        py: Python<'py>,
        volume: PyReadonlyArray3<'py, f32>,
        scales: Vec<(f32, f32)>,
        volumetric: bool,
    ) -> PyResult<Bound<'py, PyArray3<bool>>> {
        let detector = ScaleSpaceDetector::Spot {
            mode: plane_mode(volumetric),
        };
        let result = detector
            .detect(volume.as_array(), &scale_list(scales))
            .map_err(value_error)?;
        Ok(result.into_pyarray(py))
    }

    /// Per-plane filament detection over a list of `(scale, cutoff)` pairs.
    #[pyfunction]
    pub fn detect_filaments<'py>(
        py: Python<'py>,
        volume: PyReadonlyArray3<'py, f32>,
        scales: Vec<(f32, f32)>,
    ) -> PyResult<Bound<'py, PyArray3<bool>>> {
        let result = ScaleSpaceDetector::Filament
            .detect(volume.as_array(), &scale_list(scales))
            .map_err(value_error)?;
        Ok(result.into_pyarray(py))
    }

    // ========================================================================
    // Morphology
    // ========================================================================

    #[pyfunction]
    #[pyo3(signature = (mask, min_size, max_size, volumetric=false))]
    pub fn fill_holes<'py>(
        py: Python<'py>,
        mask: PyReadonlyArray3<'py, bool>,
        min_size: usize,
        max_size: usize,
        volumetric: bool,
    ) -> PyResult<Bound<'py, PyArray3<bool>>> {
        let params = HoleFillParams {
            min_size,
            max_size,
            mode: plane_mode(volumetric),
        };
        let result = morphology::fill_holes(mask.as_array(), &params).map_err(value_error)?;
        Ok(result.into_pyarray(py))
    }

    /// Remove components smaller than `min_size`; `full_connectivity`
    /// includes diagonal neighbours.
    #[pyfunction]
    #[pyo3(signature = (mask, min_size, full_connectivity=false))]
    pub fn filter_by_size<'py>(
        py: Python<'py>,
        mask: PyReadonlyArray3<'py, bool>,
        min_size: usize,
        full_connectivity: bool,
    ) -> PyResult<Bound<'py, PyArray3<bool>>> {
        let connectivity = if full_connectivity {
            Connectivity::Full
        } else {
            Connectivity::Face
        };
        let result = morphology::filter_by_size(mask.as_array(), min_size, connectivity).map_err(value_error)?;
        Ok(result.into_pyarray(py))
    }

    // ========================================================================
    // Separation & workflows
    // ========================================================================

    /// Split touching objects; returns `uint32` labels.
    #[pyfunction]
    #[pyo3(signature = (intensity, mask, min_distance=2))]
    pub fn separate_touching<'py>(
        py: Python<'py>,
        intensity: PyReadonlyArray3<'py, f32>,
        mask: PyReadonlyArray3<'py, bool>,
        min_distance: usize,
    ) -> PyResult<Bound<'py, PyArray3<u32>>> {
        let mut params = SeparationParams::default();
        params.peaks.min_distance = min_distance;
        let result = segmentation::separate_touching(intensity.as_array(), mask.as_array(), &params)
            .map_err(value_error)?;
        Ok(result.labels.into_pyarray(py))
    }

    /// Run a JSON-configured workflow; returns the `uint8` 0/255 mask.
    #[pyfunction]
    pub fn run_workflow_json<'py>(
        py: Python<'py>,
        volume: PyReadonlyArray3<'py, f32>,
        config_json: &str,
    ) -> PyResult<Bound<'py, PyArray3<u8>>> {
        let config = WorkflowConfig::from_json_str(config_json).map_err(value_error)?;
        let output = workflow::run(volume.as_array(), &config).map_err(value_error)?;
        Ok(mask_to_u8(output.mask.view()).into_pyarray(py))
    }

    /// structseg extension module
    #[pymodule]
    pub fn structseg(m: &Bound<'_, PyModule>) -> PyResult<()> {
        // Pre-processing
        m.add_function(wrap_pyfunction!(normalize, m)?)?;
        m.add_function(wrap_pyfunction!(smooth, m)?)?;

        // Detection
        m.add_function(wrap_pyfunction!(detect_spots, m)?)?;
        m.add_function(wrap_pyfunction!(detect_filaments, m)?)?;

        // Morphology
        m.add_function(wrap_pyfunction!(fill_holes, m)?)?;
        m.add_function(wrap_pyfunction!(filter_by_size, m)?)?;

        // Separation & workflows
        m.add_function(wrap_pyfunction!(separate_touching, m)?)?;
        m.add_function(wrap_pyfunction!(run_workflow_json, m)?)?;

        Ok(())
    }
}

#[cfg(feature = "python")]
pub use python::structseg;
