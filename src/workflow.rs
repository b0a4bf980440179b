//! End-to-end segmentation recipes.
//!
//! Every recipe starts with normalize and smooth, then composes the shared
//! stages in a fixed order:
//!
//! | Recipe | Stages after smoothing |
//! |--------|------------------------|
//! | `BlobUnion` | detect (union of passes) -> fill holes -> size filter |
//! | `BlobWithSeparation` | detect -> size filter -> peaks + watershed -> label size filter |
//! | `ShellFromMidFrame` | mid-plane ridges -> seeds -> watershed -> shell -> size filter |
//!
//! Stage snapshots are kept in order when `capture_intermediates` is set.

use log::{debug, info, warn};
use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

use crate::config::WorkflowConfig;
use crate::error::{Result, SegmentationError};
use crate::filters::morphology::{fill_holes, filter_by_size, filter_labels_by_size, HoleFillParams};
use crate::filters::normalize::normalize;
use crate::filters::scale_space::{detect_union, DetectionPass};
use crate::filters::smooth::smooth_with;
use crate::segmentation::{extract_shell, separate_touching, MidFrameSeedParams, SeparationParams};
use crate::volume::{foreground_count, labels_to_mask, Connectivity, LabelVolume, Mask, Volume};

/// Recipe-specific stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipe {
    /// Granular and filamentous structures.
    BlobUnion {
        detection: Vec<DetectionPass>,
        #[serde(default)]
        hole_fill: HoleFillParams,
        min_size: usize,
        #[serde(default)]
        connectivity: Connectivity,
    },
    /// Clustered dots that touch after detection.
    BlobWithSeparation {
        detection: Vec<DetectionPass>,
        min_size: usize,
        #[serde(default)]
        connectivity: Connectivity,
        #[serde(default)]
        separation: SeparationParams,
    },
    /// Membranes around a filled interior.
    ShellFromMidFrame {
        #[serde(default)]
        seeds: MidFrameSeedParams,
        min_size: usize,
        #[serde(default)]
        connectivity: Connectivity,
    },
}

impl Recipe {
    pub fn validate(&self) -> Result<()> {
        match self {
            Recipe::BlobUnion {
                detection, hole_fill, ..
            } => {
                validate_passes(detection)?;
                hole_fill.validate()
            }
            Recipe::BlobWithSeparation { detection, .. } => validate_passes(detection),
            Recipe::ShellFromMidFrame { seeds, .. } => seeds.validate(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Recipe::BlobUnion { .. } => "blob_union",
            Recipe::BlobWithSeparation { .. } => "blob_with_separation",
            Recipe::ShellFromMidFrame { .. } => "shell_from_mid_frame",
        }
    }
}

fn validate_passes(passes: &[DetectionPass]) -> Result<()> {
    if passes.is_empty() {
        return Err(SegmentationError::invalid("no detection passes configured"));
    }
    passes.iter().try_for_each(DetectionPass::validate)
}

/// Snapshot of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageData {
    Intensity(Volume),
    Mask(Mask),
    Labels(LabelVolume),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Intermediate {
    pub name: &'static str,
    pub data: StageData,
}

/// Result of a full run.
#[derive(Debug, Clone)]
pub struct WorkflowOutput {
    pub mask: Mask,
    /// Object labels, for recipes that separate objects.
    pub labels: Option<LabelVolume>,
    pub intermediates: Vec<Intermediate>,
}

impl WorkflowOutput {
    pub fn intermediate(&self, name: &str) -> Option<&StageData> {
        self.intermediates
            .iter()
            .find(|i| i.name == name)
            .map(|i| &i.data)
    }
}

struct Capture {
    enabled: bool,
    stages: Vec<Intermediate>,
}

impl Capture {
    fn push(&mut self, name: &'static str, data: impl FnOnce() -> StageData) {
        if self.enabled {
            self.stages.push(Intermediate { name, data: data() });
        }
    }
}

/// Run a configured workflow on one raw volume.
///
/// # Arguments
/// * `volume` - Raw structure channel (z, y, x)
/// * `config` - Normalization, smoothing and recipe settings
///
/// # Returns
/// Final mask (same shape as `volume`), labels when the recipe separates
/// objects, and the captured stages.
pub fn run(volume: ArrayView3<f32>, config: &WorkflowConfig) -> Result<WorkflowOutput> {
    config.validate()?;
    info!(
        "workflow: recipe={} shape={:?}",
        config.recipe.name(),
        volume.dim()
    );

    let mut capture = Capture {
        enabled: config.capture_intermediates,
        stages: Vec::new(),
    };

    let norm = normalize(volume, &config.normalization)?;
    capture.push("im_norm", || StageData::Intensity(norm.clone()));

    let smoothed = smooth_with(norm.view(), &config.smoothing)?;
    capture.push("im_smooth", || StageData::Intensity(smoothed.clone()));

    let (mask, labels) = match &config.recipe {
        Recipe::BlobUnion {
            detection,
            hole_fill,
            min_size,
            connectivity,
        } => {
            let bw = detect_union(smoothed.view(), detection)?;
            capture.push("interm_mask", || StageData::Mask(bw.clone()));
            let filled = fill_holes(bw.view(), hole_fill)?;
            (filter_by_size(filled.view(), *min_size, *connectivity)?, None)
        }
        Recipe::BlobWithSeparation {
            detection,
            min_size,
            connectivity,
            separation,
        } => {
            let bw = detect_union(smoothed.view(), detection)?;
            let bw = filter_by_size(bw.view(), *min_size, *connectivity)?;
            capture.push("interm_mask", || StageData::Mask(bw.clone()));
            let split = separate_touching(norm.view(), bw.view(), separation)?;
            capture.push("interm_local_max", || StageData::Mask(split.peaks.clone()));
            capture.push("interm_watershed", || StageData::Labels(split.labels.clone()));
            let labels = filter_labels_by_size(split.labels.view(), *min_size);
            (labels_to_mask(labels.view()), Some(labels))
        }
        Recipe::ShellFromMidFrame {
            seeds,
            min_size,
            connectivity,
        } => {
            let shell = extract_shell(norm.view(), smoothed.view(), seeds)?;
            capture.push("interm_filled", || StageData::Mask(shell.filled.clone()));
            (filter_by_size(shell.shell.view(), *min_size, *connectivity)?, None)
        }
    };
    capture.push("bw_final", || StageData::Mask(mask.clone()));

    let count = foreground_count(mask.view());
    debug!("workflow: final foreground={count}");
    if let Some(min) = config.qc_min_foreground {
        if count < min {
            warn!("workflow: QC flag, foreground {count} below {min}; check acquisition metadata");
        }
    }

    Ok(WorkflowOutput {
        mask,
        labels,
        intermediates: capture.stages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::morphology::label_components;
    use crate::filters::normalize::NormalizationPolicy;
    use crate::filters::scale_space::{ScaleCutoff, ScaleSpaceDetector};
    use crate::filters::smooth::SmoothingParams;
    use crate::segmentation::labels_touch;
    use crate::volume::PlaneMode;
    use ndarray::Array3;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Deterministic uniform noise in `[-amplitude, amplitude]`.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, amplitude: f32) -> f32 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let unit = (self.0 >> 40) as f32 / (1u64 << 24) as f32;
            (unit * 2.0 - 1.0) * amplitude
        }
    }

    fn blobs(shape: (usize, usize, usize), centers: &[(f32, f32, f32)], width: f32, noise: f32) -> Array3<f32> {
        let mut rng = Lcg(7);
        let mut vol = Array3::from_shape_fn(shape, |(z, y, x)| {
            centers
                .iter()
                .map(|c| {
                    let d2 = (z as f32 - c.0).powi(2) + (y as f32 - c.1).powi(2) + (x as f32 - c.2).powi(2);
                    (-d2 / (2.0 * width * width)).exp()
                })
                .sum::<f32>()
        });
        vol.iter_mut().for_each(|v| *v += rng.next(noise));
        vol
    }

    fn blob_union_config() -> WorkflowConfig {
        WorkflowConfig {
            normalization: NormalizationPolicy::UpperBoundedMinMax { bound: 0.0 },
            smoothing: SmoothingParams {
                sigma: 1.0,
                mode: PlaneMode::SliceWise2D,
                ..SmoothingParams::default()
            },
            recipe: Recipe::BlobUnion {
                detection: vec![DetectionPass::new(
                    ScaleSpaceDetector::spot_3d(),
                    vec![ScaleCutoff::new(1.0, 0.01)],
                )],
                hole_fill: HoleFillParams::default(),
                min_size: 4,
                connectivity: Connectivity::Face,
            },
            qc_min_foreground: None,
            capture_intermediates: true,
        }
    }

    #[test]
    fn test_blob_recipe_finds_two_components() {
        init_logging();
        let vol = blobs((9, 32, 32), &[(4.0, 16.0, 11.0), (4.0, 16.0, 21.0)], 2.0, 0.01);
        let out = run(vol.view(), &blob_union_config()).unwrap();
        assert_eq!(out.mask.dim(), vol.dim());

        let comps = label_components(out.mask.view(), Connectivity::Face, PlaneMode::Volumetric3D);
        assert_eq!(comps.count(), 2);
        let a = comps.labels[[4, 16, 11]];
        let b = comps.labels[[4, 16, 21]];
        assert!(a != 0 && b != 0 && a != b);
        assert!(out.labels.is_none());
    }

    #[test]
    fn test_intermediates_in_order() {
        let vol = blobs((5, 16, 16), &[(2.0, 8.0, 8.0)], 1.5, 0.0);
        let out = run(vol.view(), &blob_union_config()).unwrap();
        let names: Vec<&str> = out.intermediates.iter().map(|i| i.name).collect();
        assert_eq!(names, ["im_norm", "im_smooth", "interm_mask", "bw_final"]);
        match out.intermediate("bw_final") {
            Some(StageData::Mask(m)) => assert_eq!(m, &out.mask),
            other => panic!("unexpected stage {other:?}"),
        }

        let mut config = blob_union_config();
        config.capture_intermediates = false;
        let out = run(vol.view(), &config).unwrap();
        assert!(out.intermediates.is_empty());
    }

    #[test]
    fn test_separation_recipe_splits_touching_blobs() {
        init_logging();
        let vol = blobs((7, 16, 20), &[(3.0, 8.0, 8.0), (3.0, 8.0, 11.0)], 1.0, 0.0);
        let config = WorkflowConfig {
            recipe: Recipe::BlobWithSeparation {
                detection: vec![DetectionPass::new(
                    ScaleSpaceDetector::spot_3d(),
                    vec![ScaleCutoff::new(1.0, 0.02)],
                )],
                min_size: 3,
                connectivity: Connectivity::Face,
                separation: SeparationParams::default(),
            },
            ..blob_union_config()
        };
        let out = run(vol.view(), &config).unwrap();
        let labels = out.labels.clone().expect("separation recipe returns labels");

        let merged = match out.intermediate("interm_mask") {
            Some(StageData::Mask(m)) => m.clone(),
            other => panic!("unexpected stage {other:?}"),
        };
        let before = label_components(merged.view(), Connectivity::Face, PlaneMode::Volumetric3D);
        assert_eq!(before.count(), 1);

        let mut ids: Vec<u32> = labels.iter().copied().filter(|&l| l != 0).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 2);
        assert_ne!(labels[[3, 8, 8]], labels[[3, 8, 11]]);
        assert!(!labels_touch(labels.view(), Connectivity::Face));
        assert_eq!(out.mask, labels.mapv(|l| l > 0));
    }

    #[test]
    fn test_zero_volume_yields_empty_mask() {
        let vol = Array3::<f32>::zeros((4, 12, 12));
        for policy in [
            NormalizationPolicy::UpperBoundedMinMax { bound: 0.0 },
            NormalizationPolicy::TwoSidedStdBound {
                lower_factor: 2.0,
                upper_factor: 36.0,
            },
        ] {
            let config = WorkflowConfig {
                normalization: policy,
                ..blob_union_config()
            };
            let out = run(vol.view(), &config).unwrap();
            assert!(out.mask.iter().all(|&v| !v));
            match out.intermediate("im_norm") {
                Some(StageData::Intensity(v)) => assert!(v.iter().all(|x| *x == 0.0)),
                other => panic!("unexpected stage {other:?}"),
            }
        }
    }

    #[test]
    fn test_empty_detection_skips_separation() {
        init_logging();
        let vol = Array3::<f32>::zeros((4, 12, 12));
        let out = run(vol.view(), &WorkflowConfig::dot_cluster()).unwrap();
        assert!(out.mask.iter().all(|&v| !v));
        assert!(out.labels.is_some());
    }

    #[test]
    fn test_shell_recipe() {
        init_logging();
        let vol = Array3::from_shape_fn((15, 24, 24), |(z, y, x)| {
            let r = ((z as f32 - 7.0).powi(2) + (y as f32 - 12.0).powi(2) + (x as f32 - 12.0).powi(2)).sqrt();
            (-(r - 6.0).powi(2) / 2.0).exp()
        });
        let config = WorkflowConfig {
            recipe: Recipe::ShellFromMidFrame {
                seeds: MidFrameSeedParams {
                    frame: crate::segmentation::MiddleFrame::FixedMiddle,
                    scales: vec![ScaleCutoff::new(1.0, 0.1)],
                    hole_min: 5,
                    hole_max: 1000,
                    z_extent: 0,
                    background_seed: true,
                },
                min_size: 5,
                connectivity: Connectivity::Face,
            },
            ..blob_union_config()
        };
        let out = run(vol.view(), &config).unwrap();
        assert!(foreground_count(out.mask.view()) > 0);
        let filled = match out.intermediate("interm_filled") {
            Some(StageData::Mask(m)) => m.clone(),
            other => panic!("unexpected stage {other:?}"),
        };
        assert!(filled[[7, 12, 12]]);
        assert!(out.mask.iter().zip(filled.iter()).all(|(&s, &f)| !(s && f)));
    }

    #[test]
    fn test_invalid_config_fails_before_running() {
        let mut config = blob_union_config();
        config.smoothing.sigma = 0.0;
        let vol = Array3::<f32>::zeros((2, 4, 4));
        assert!(matches!(
            run(vol.view(), &config),
            Err(SegmentationError::InvalidParameter(_))
        ));
    }
}
