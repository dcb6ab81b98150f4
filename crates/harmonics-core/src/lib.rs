//! Per-pixel harmonic regression for satellite time series.
//!
//! Fits `y(t) = Σ base_k·x_k(t) + Σᵢ [aᵢ·cos(2ωπ·i·t) + bᵢ·sin(2ωπ·i·t)]` at
//! every pixel of a [`TimeSeriesRaster`] and derives amplitude, phase, mean
//! and fitted-series products. Pixels without enough valid observations are
//! masked rather than failing the run.

pub mod assemble;
pub mod coefficients;
pub mod config;
pub mod design;
pub mod error;
pub mod grid;
mod parallel;
pub mod pipeline;
pub mod products;
pub mod raster;
pub mod solver;
pub mod synthetic;
pub mod tiling;
pub mod time;

pub use assemble::{BandSet, BandSummary, ProductStack};
pub use coefficients::CoefficientRaster;
pub use config::{HarmonicConfig, HarmonicSettings, PipelineOptions};
pub use design::DesignMatrix;
pub use error::{HarmonicError, Result};
pub use grid::{GridSpec, MaskedGrid};
pub use pipeline::{HarmonicPipeline, PipelineResult};
pub use products::DerivedProducts;
pub use raster::{RasterFrame, TimeSeriesRaster};
pub use solver::LeastSquaresSolver;
pub use tiling::CancelToken;
