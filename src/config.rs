//! Workflow configuration: per-stage parameters, presets and JSON loading.
//!
//! A config file is a single JSON object. Omitted stage sections fall back
//! to their defaults; the recipe is required and selected by its `kind` tag:
//!
//! ```json
//! {
//!   "normalization": { "kind": "two_sided_std_bound", "lower_factor": 2.0, "upper_factor": 36.0 },
//!   "smoothing": { "sigma": 1.0, "mode": "slice_wise_2d" },
//!   "recipe": {
//!     "kind": "blob_with_separation",
//!     "detection": [ { "detector": { "kind": "spot", "mode": "volumetric_3d" },
//!                      "scales": [ { "scale": 1.0, "cutoff": 0.045 } ] } ],
//!     "min_size": 3
//!   }
//! }
//! ```

use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentationError};
use crate::filters::morphology::HoleFillParams;
use crate::filters::normalize::NormalizationPolicy;
use crate::filters::scale_space::{DetectionPass, ScaleCutoff, ScaleSpaceDetector};
use crate::filters::smooth::SmoothingParams;
use crate::segmentation::{MidFrameSeedParams, MiddleFrame, SeparationParams};
use crate::volume::{Connectivity, PlaneMode};
use crate::workflow::Recipe;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub normalization: NormalizationPolicy,
    #[serde(default)]
    pub smoothing: SmoothingParams,
    pub recipe: Recipe,
    /// Log a QC warning when the final mask has fewer foreground voxels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qc_min_foreground: Option<usize>,
    #[serde(default)]
    pub capture_intermediates: bool,
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<()> {
        self.normalization.validate()?;
        self.smoothing.validate()?;
        self.recipe.validate()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: WorkflowConfig =
            serde_json::from_str(json).map_err(|e| SegmentationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| SegmentationError::Config(format!("read {}: {e}", path.display())))?;
        debug!("config: loaded {}", path.display());
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SegmentationError::Config(e.to_string()))
    }

    /// Clustered dots split by watershed.
    pub fn dot_cluster() -> Self {
        Self {
            normalization: NormalizationPolicy::TwoSidedStdBound {
                lower_factor: 2.0,
                upper_factor: 36.0,
            },
            smoothing: SmoothingParams::default(),
            recipe: Recipe::BlobWithSeparation {
                detection: vec![DetectionPass::new(
                    ScaleSpaceDetector::spot_3d(),
                    vec![ScaleCutoff::new(1.0, 0.045)],
                )],
                min_size: 3,
                connectivity: Connectivity::Face,
                separation: SeparationParams::default(),
            },
            qc_min_foreground: Some(50_000),
            capture_intermediates: false,
        }
    }

    /// Granules and short filaments, spot and ridge union.
    pub fn granular() -> Self {
        Self {
            normalization: NormalizationPolicy::TwoSidedStdBound {
                lower_factor: 1.0,
                upper_factor: 40.0,
            },
            smoothing: SmoothingParams::default(),
            recipe: Recipe::BlobUnion {
                detection: vec![
                    DetectionPass::new(
                        ScaleSpaceDetector::spot_2d(),
                        vec![ScaleCutoff::new(1.0, 0.04), ScaleCutoff::new(2.0, 0.04)],
                    ),
                    DetectionPass::new(ScaleSpaceDetector::Filament, vec![ScaleCutoff::new(1.0, 0.3)]),
                ],
                hole_fill: HoleFillParams {
                    min_size: 0,
                    max_size: 30,
                    mode: PlaneMode::SliceWise2D,
                },
                min_size: 5,
                connectivity: Connectivity::Face,
            },
            qc_min_foreground: None,
            capture_intermediates: false,
        }
    }

    /// Nuclear envelope style shells.
    pub fn shell() -> Self {
        Self {
            normalization: NormalizationPolicy::UpperBoundedMinMax { bound: 4000.0 },
            smoothing: SmoothingParams::default(),
            recipe: Recipe::ShellFromMidFrame {
                seeds: MidFrameSeedParams {
                    frame: MiddleFrame::IntensityPeak,
                    scales: vec![
                        ScaleCutoff::new(0.5, 0.01),
                        ScaleCutoff::new(1.0, 0.01),
                        ScaleCutoff::new(2.0, 0.01),
                        ScaleCutoff::new(3.0, 0.01),
                    ],
                    hole_min: 400,
                    hole_max: 40_000,
                    z_extent: 0,
                    background_seed: true,
                },
                min_size: 5,
                connectivity: Connectivity::Face,
            },
            qc_min_foreground: None,
            capture_intermediates: false,
        }
    }
}
