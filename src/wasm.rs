//! WebAssembly exports for structseg.
//!
//! These functions are exposed to JavaScript via wasm-bindgen.
//!
//! ## Buffer Layout
//!
//! Volumes cross the boundary as flat arrays in `(z, y, x)` order
//! (length = depth * height * width):
//! - **f32**: intensities
//! - **u8**: masks, 0 = background, 255 = foreground
//!
//! Errors are returned to JavaScript as string exceptions.

use ndarray::Array3;
use wasm_bindgen::prelude::*;

use crate::config::WorkflowConfig;
use crate::filters::morphology::segmentation_contour;
use crate::filters::normalize::{normalize, NormalizationPolicy};
use crate::filters::smooth::smooth;
use crate::volume::{mask_to_u8, PlaneMode};
use crate::workflow::run;

fn volume_from(data: &[f32], depth: usize, height: usize, width: usize) -> Result<Array3<f32>, JsValue> {
    Array3::from_shape_vec((depth, height, width), data.to_vec())
        .map_err(|_| JsValue::from_str("Invalid dimensions"))
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

// ============================================================================
// Workflow
// ============================================================================

/// Run a JSON-configured workflow.
///
/// # Arguments
/// * `data` - Flat array of raw intensities
/// * `depth` - Number of z-planes
/// * `height` - Plane height in voxels
/// * `width` - Plane width in voxels
/// * `config_json` - Workflow configuration document
///
/// # Returns
/// Flat 0/255 mask
#[wasm_bindgen]
pub fn run_workflow_wasm(
    data: &[f32],
    depth: usize,
    height: usize,
    width: usize,
    config_json: &str,
) -> Result<Vec<u8>, JsValue> {
    let input = volume_from(data, depth, height, width)?;
    let config = WorkflowConfig::from_json_str(config_json).map_err(js_error)?;
    let output = run(input.view(), &config).map_err(js_error)?;
    Ok(mask_to_u8(output.mask.view()).into_raw_vec_and_offset().0)
}

// ============================================================================
// Pre-processing
// ============================================================================

/// Min-max normalization with an optional upper clip (`bound` 0 disables it).
#[wasm_bindgen]
pub fn normalize_wasm(
    data: &[f32],
    depth: usize,
    height: usize,
    width: usize,
    bound: f32,
) -> Result<Vec<f32>, JsValue> {
    let input = volume_from(data, depth, height, width)?;
    let policy = NormalizationPolicy::UpperBoundedMinMax { bound };
    let result = normalize(input.view(), &policy).map_err(js_error)?;
    Ok(result.into_raw_vec_and_offset().0)
}

/// Per-plane Gaussian smoothing.
#[wasm_bindgen]
pub fn smooth_wasm(
    data: &[f32],
    depth: usize,
    height: usize,
    width: usize,
    sigma: f32,
) -> Result<Vec<f32>, JsValue> {
    let input = volume_from(data, depth, height, width)?;
    let result = smooth(input.view(), sigma, PlaneMode::SliceWise2D).map_err(js_error)?;
    Ok(result.into_raw_vec_and_offset().0)
}

// ============================================================================
// Display
// ============================================================================

/// Per-plane outline of a 0/255 mask, for overlays.
#[wasm_bindgen]
pub fn segmentation_contour_wasm(
    mask: &[u8],
    depth: usize,
    height: usize,
    width: usize,
) -> Result<Vec<u8>, JsValue> {
    let input = Array3::from_shape_vec((depth, height, width), mask.iter().map(|&v| v > 0).collect())
        .map_err(|_| JsValue::from_str("Invalid dimensions"))?;
    let contour = segmentation_contour(input.view());
    Ok(mask_to_u8(contour.view()).into_raw_vec_and_offset().0)
}
