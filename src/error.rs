//! Error taxonomy shared by every pipeline stage.

/// Errors that can occur while segmenting a volume.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SegmentationError {
    /// A numeric argument is out of its domain (negative sigma, inverted bounds, ...).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Two arrays that must share a (z, y, x) extent do not.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    /// Watershed seeding found no markers.
    #[error("no seeds found for watershed separation")]
    EmptySeedSet,

    /// Configuration could not be read or decoded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SegmentationError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SegmentationError::InvalidParameter(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SegmentationError>;
