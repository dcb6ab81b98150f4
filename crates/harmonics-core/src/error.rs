//! Error taxonomy for the harmonic regression engine.
//!
//! Only structural and configuration problems are errors. Per-pixel numerical
//! degeneracy (too few observations, rank-deficient design) is reported as a
//! masked pixel and never reaches this type.

use thiserror::Error;

/// Errors raised by the harmonic regression engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HarmonicError {
    /// The harmonic configuration is invalid.
    ///
    /// Raised at construction: non-positive harmonic order, non-positive or
    /// non-finite omega, empty or duplicate names, or a base independent that
    /// collides with a generated harmonic name or the dependent band.
    #[error("invalid harmonic configuration: {0}")]
    Config(String),

    /// A requested band is absent from a frame, series or stack.
    #[error("band `{band}` not found")]
    BandNotFound {
        /// Name that was looked up.
        band: String,
    },

    /// Two stacks handed to the assembler share a band name.
    #[error("band name `{band}` appears in more than one input stack")]
    NameCollision {
        /// The conflicting band name.
        band: String,
    },

    /// A frame does not share the spatial grid of the series it was added to.
    #[error("frame {index} (t = {t}) does not share the series grid")]
    GridMismatch {
        /// Position of the offending frame.
        index: usize,
        /// Timestamp of the offending frame, in decimal years.
        t: f64,
    },

    /// An array's length does not match the expected cell or value count.
    #[error("{what}: expected {expected} values, got {actual}")]
    ShapeMismatch {
        /// What was being checked (band name or vector role).
        what: String,
        expected: usize,
        actual: usize,
    },

    /// A band name was inserted twice into the same frame.
    #[error("band `{band}` is already present in the frame")]
    DuplicateBand { band: String },

    /// A time series was constructed without frames.
    #[error("time series has no frames")]
    EmptySeries,

    /// The run was aborted between tile dispatches; finished tiles were discarded.
    #[error("computation cancelled ({completed} of {total} tiles finished)")]
    Cancelled { completed: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, HarmonicError>;

impl HarmonicError {
    pub(crate) fn band_not_found(band: impl Into<String>) -> Self {
        Self::BandNotFound { band: band.into() }
    }

    pub(crate) fn shape(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}
