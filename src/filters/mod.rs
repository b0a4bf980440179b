//! Per-voxel and neighbourhood filters over (z, y, x) volumes.
//!
//! ## Stage Formats
//!
//! | Stage | Input | Output |
//! |-------|-------|--------|
//! | normalize | raw f32 | f32, 0.0-1.0 |
//! | smooth | f32 | f32 |
//! | scale_space | smoothed f32 | bool mask |
//! | morphology | bool mask | bool mask / u32 labels |
//!
//! ## Architecture
//!
//! All filters follow these principles:
//! - **Shape preserving** - output extent always equals input extent
//! - **Pure** - inputs are borrowed views, results are new arrays
//! - **Eager validation** - parameters are checked before any data is touched
//! - **Plane parallel** - rayon splits work by z-plane where planes are independent

pub mod core;
pub mod morphology;
pub mod normalize;
pub mod scale_space;
pub mod smooth;

pub use morphology::{fill_holes, filter_by_size, HoleFillParams};
pub use normalize::{normalize, NormalizationPolicy};
pub use scale_space::{detect_union, DetectionPass, ScaleCutoff, ScaleSpaceDetector};
pub use smooth::{smooth, smooth_with, SmoothingParams};
