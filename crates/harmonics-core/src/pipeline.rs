//! Pipeline orchestrator: runs every stage in order.
//!
//! Stage order:
//!   1. Per-pixel least-squares solve (tiled)
//!   2. Coefficient raster
//!   3. Derived products (amplitude, phase, mean, fitted)
//!   4. Product stack assembly

use std::time::Instant;

use tracing::{info, instrument, warn};

use crate::assemble::ProductStack;
use crate::coefficients::CoefficientRaster;
use crate::config::{HarmonicConfig, HarmonicSettings, PipelineOptions};
use crate::error::{HarmonicError, Result};
use crate::products::DerivedProducts;
use crate::raster::TimeSeriesRaster;
use crate::solver::LeastSquaresSolver;
use crate::tiling::CancelToken;

/// Share of masked pixels above which a run logs a warning.
const MASKED_WARN_FRACTION: f64 = 0.5;

/// Solve, derived products, assembly.
const STAGES: usize = 3;

/// `Cancelled` once the token fires, counting the stages already finished.
fn checkpoint(cancel: &CancelToken, completed: usize) -> Result<()> {
    if cancel.is_cancelled() {
        warn!(completed, total = STAGES, "harmonic regression cancelled between stages");
        return Err(HarmonicError::Cancelled {
            completed,
            total: STAGES,
        });
    }
    Ok(())
}

/// Full output of one regression run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub coefficients: CoefficientRaster,
    pub stack: ProductStack,
    /// Reconstructed series, present when `include_fitted` is set.
    pub fitted: Option<TimeSeriesRaster>,
    /// Share of pixels without a usable fit.
    pub masked_fraction: f64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct HarmonicPipeline {
    config: HarmonicConfig,
    options: PipelineOptions,
}

impl HarmonicPipeline {
    pub fn new(config: HarmonicConfig, options: PipelineOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { config, options })
    }

    pub fn from_settings(settings: HarmonicSettings) -> Result<Self> {
        let options = settings.options();
        Self::new(HarmonicConfig::try_from(settings)?, options)
    }

    pub fn config(&self) -> &HarmonicConfig {
        &self.config
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn run(&self, series: &TimeSeriesRaster) -> Result<PipelineResult> {
        self.run_with_cancel(series, &CancelToken::new())
    }

    /// Run every stage. Cancellation is honoured between solver tiles,
    /// between stages and between fitted frames.
    #[instrument(
        skip(self, series, cancel),
        fields(
            frames = series.len(),
            width = series.grid().width,
            height = series.grid().height
        )
    )]
    pub fn run_with_cancel(
        &self,
        series: &TimeSeriesRaster,
        cancel: &CancelToken,
    ) -> Result<PipelineResult> {
        let start = Instant::now();

        // ── 1–2. Solve ──────────────────────────────────────────────────────
        let coefficients = LeastSquaresSolver::new(&self.config, self.options.tile_size)
            .solve_with_cancel(series, cancel)?;
        let masked_fraction = coefficients.masked_fraction();
        if masked_fraction > MASKED_WARN_FRACTION {
            warn!(
                masked_fraction,
                "most pixels lack enough valid observations for the harmonic model"
            );
        }

        self.finish(series, coefficients, masked_fraction, cancel, start)
    }

    /// Stages 3 and 4. Cancellation is checked on entry to each stage and,
    /// inside the fitted series, before every frame.
    fn finish(
        &self,
        series: &TimeSeriesRaster,
        coefficients: CoefficientRaster,
        masked_fraction: f64,
        cancel: &CancelToken,
        start: Instant,
    ) -> Result<PipelineResult> {
        // ── 3. Derived products ─────────────────────────────────────────────
        checkpoint(cancel, 1)?;
        let products = DerivedProducts::compute_with_cancel(
            series,
            &coefficients,
            &self.config,
            self.options.include_fitted,
            cancel,
        )?;

        // ── 4. Assembly ─────────────────────────────────────────────────────
        checkpoint(cancel, 2)?;
        let stack = ProductStack::assemble(&coefficients, &products)?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            bands = stack.len(),
            masked_fraction,
            elapsed_ms,
            "harmonic regression finished"
        );

        Ok(PipelineResult {
            coefficients,
            stack,
            fitted: products.fitted,
            masked_fraction,
            elapsed_ms,
        })
    }
}
