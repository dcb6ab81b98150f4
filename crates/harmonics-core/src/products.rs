//! Interpretable products derived from the coefficient raster.
//!
//! For harmonic `i`:
//! ```text
//! amp_i   = hypot(sin_i, cos_i)
//! phase_i = atan2(sin_i, cos_i) / π        ∈ [-1, 1]
//! ```
//! plus the temporal mean of the dependent band and, optionally, the fitted
//! series `Σ_k c_k · x_k(t)` evaluated on each frame's own covariate bands.
//! A pixel whose coefficients are masked is masked in every product.

use std::f64::consts::PI;

#[cfg(feature = "threading")]
use rayon::iter::ParallelIterator;

use crate::coefficients::CoefficientRaster;
use crate::config::{HarmonicConfig, FITTED_BAND};
use crate::error::{HarmonicError, Result};
use crate::grid::MaskedGrid;
use crate::parallel::iter_maybe_parallel;
use crate::raster::{RasterFrame, TimeSeriesRaster};
use crate::tiling::CancelToken;

/// Amplitude band per harmonic, in frequency order.
pub fn amplitude(
    coeffs: &CoefficientRaster,
    config: &HarmonicConfig,
) -> Result<Vec<MaskedGrid<f64>>> {
    harmonic_pairs(coeffs, config)
        .map(|pair| {
            let (sin, cos) = pair?;
            sin.zip_map(cos, f64::hypot)
        })
        .collect()
}

/// Phase band per harmonic, the quadrant-aware angle rescaled from
/// `[-π, π]` to `[-1, 1]`.
pub fn phase(
    coeffs: &CoefficientRaster,
    config: &HarmonicConfig,
) -> Result<Vec<MaskedGrid<f64>>> {
    harmonic_pairs(coeffs, config)
        .map(|pair| {
            let (sin, cos) = pair?;
            sin.zip_map(cos, |s, c| s.atan2(c) / PI)
        })
        .collect()
}

fn harmonic_pairs<'a>(
    coeffs: &'a CoefficientRaster,
    config: &'a HarmonicConfig,
) -> impl Iterator<Item = Result<(&'a MaskedGrid<f64>, &'a MaskedGrid<f64>)>> + 'a {
    config
        .sin_names()
        .iter()
        .zip(config.cos_names())
        .map(move |(s, c)| -> Result<_> { Ok((coeffs.band(s)?, coeffs.band(c)?)) })
}

/// Mean of the dependent band over the frames where it is valid.
///
/// Masked where no frame is valid or where the coefficient fit is masked,
/// so every derived band shares the coefficient mask.
pub fn mean_dependent(
    series: &TimeSeriesRaster,
    coeffs: &CoefficientRaster,
    config: &HarmonicConfig,
) -> Result<MaskedGrid<f64>> {
    let stack = series.band_stack(config.dependent())?;
    let grid = series.grid();
    let cells: Vec<Option<f64>> = iter_maybe_parallel!(0..grid.len())
        .map(|idx| {
            if !coeffs.is_fitted(idx) {
                return None;
            }
            let (sum, n) = stack
                .iter()
                .filter_map(|band| band.at(idx))
                .fold((0.0f64, 0usize), |(s, n), v| (s + v as f64, n + 1));
            (n > 0).then(|| sum / n as f64)
        })
        .collect();
    MaskedGrid::from_options(grid.width, grid.height, cells)
}

/// Reconstructed series: one frame per input frame, same timestamps, holding
/// a single `fitted` band.
pub fn fitted_series(
    series: &TimeSeriesRaster,
    coeffs: &CoefficientRaster,
    config: &HarmonicConfig,
) -> Result<TimeSeriesRaster> {
    fitted_series_with_cancel(series, coeffs, config, &CancelToken::new())
}

/// [`fitted_series`] that polls `cancel` before each frame. Frames already
/// reconstructed are dropped on cancellation.
pub fn fitted_series_with_cancel(
    series: &TimeSeriesRaster,
    coeffs: &CoefficientRaster,
    config: &HarmonicConfig,
    cancel: &CancelToken,
) -> Result<TimeSeriesRaster> {
    series.require_bands(config.independents())?;
    let bands: Vec<&MaskedGrid<f64>> = config
        .independents()
        .iter()
        .map(|n| coeffs.band(n))
        .collect::<Result<_>>()?;

    let total = series.len();
    let mut frames = Vec::with_capacity(total);
    for (completed, frame) in series.frames().iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(HarmonicError::Cancelled { completed, total });
        }
        let covariates = config
            .independents()
            .iter()
            .map(|n| frame.band(n))
            .collect::<Result<Vec<_>>>()?;
        let grid = frame.grid();
        let cells: Vec<Option<f32>> = iter_maybe_parallel!(0..grid.len())
            .map(|idx| {
                bands
                    .iter()
                    .zip(&covariates)
                    .map(|(c, x)| Some(c.at(idx)? * x.at(idx)? as f64))
                    .sum::<Option<f64>>()
                    .map(|v| v as f32)
            })
            .collect();
        let fitted = MaskedGrid::from_options(grid.width, grid.height, cells)?;
        frames.push(RasterFrame::new(frame.t(), grid.clone()).with_band(FITTED_BAND, fitted)?);
    }
    TimeSeriesRaster::new(frames)
}

/// Everything derived from one regression run.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedProducts {
    /// `amp_1..amp_H`.
    pub amplitude: Vec<MaskedGrid<f64>>,
    /// `phase_1..phase_H`, normalised to `[-1, 1]`.
    pub phase: Vec<MaskedGrid<f64>>,
    /// Temporal mean of the dependent band.
    pub mean: MaskedGrid<f64>,
    /// Name of the mean band, `<dependent>_mean`.
    pub mean_name: String,
    pub fitted: Option<TimeSeriesRaster>,
}

impl DerivedProducts {
    pub fn compute(
        series: &TimeSeriesRaster,
        coeffs: &CoefficientRaster,
        config: &HarmonicConfig,
        include_fitted: bool,
    ) -> Result<Self> {
        Self::compute_with_cancel(series, coeffs, config, include_fitted, &CancelToken::new())
    }

    /// Like [`DerivedProducts::compute`], giving up with `Cancelled` once
    /// `cancel` fires. The fitted series checks it frame by frame.
    pub fn compute_with_cancel(
        series: &TimeSeriesRaster,
        coeffs: &CoefficientRaster,
        config: &HarmonicConfig,
        include_fitted: bool,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let fitted = if include_fitted {
            Some(fitted_series_with_cancel(series, coeffs, config, cancel)?)
        } else {
            None
        };
        Ok(Self {
            amplitude: amplitude(coeffs, config)?,
            phase: phase(coeffs, config)?,
            mean: mean_dependent(series, coeffs, config)?,
            mean_name: config.mean_name(),
            fitted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::DesignMatrix;
    use crate::grid::GridSpec;
    use crate::solver::LeastSquaresSolver;
    use approx::assert_abs_diff_eq;

    fn config() -> HarmonicConfig {
        HarmonicConfig::new("NDVI", &["constant", "t"], 1, 1.0).unwrap()
    }

    /// Two-pixel series: pixel 0 follows `truth`, pixel 1 is observed twice.
    fn series(cfg: &HarmonicConfig, truth: [f64; 4]) -> TimeSeriesRaster {
        let grid = GridSpec::global(2, 1);
        let dm = DesignMatrix::new(cfg);
        let frames = (0..16)
            .map(|k| {
                let t = k as f64 / 8.0;
                let row = dm.standard_row(t).unwrap();
                let y: f64 = row.iter().zip(truth).map(|(a, b)| a * b).sum();
                let mut dep = MaskedGrid::filled(2, 1, y as f32);
                if k >= 2 {
                    dep.mask(0, 1);
                }
                let frame = RasterFrame::new(t, grid.clone()).with_band("NDVI", dep).unwrap();
                dm.attach_covariates(&frame).unwrap()
            })
            .collect();
        TimeSeriesRaster::new(frames).unwrap()
    }

    fn products(truth: [f64; 4]) -> (TimeSeriesRaster, CoefficientRaster, DerivedProducts) {
        let cfg = config();
        let s = series(&cfg, truth);
        let coeffs = LeastSquaresSolver::new(&cfg, 4).solve(&s).unwrap();
        let p = DerivedProducts::compute(&s, &coeffs, &cfg, true).unwrap();
        (s, coeffs, p)
    }

    #[test]
    fn amplitude_and_phase_of_known_pair() {
        // cos = 3, sin = 4 → amp 5, phase atan2(4, 3)/π.
        let (_, _, p) = products([1.0, 0.0, 3.0, 4.0]);
        assert_abs_diff_eq!(p.amplitude[0].get(0, 0).unwrap(), 5.0, epsilon = 1e-4);
        assert_abs_diff_eq!(
            p.phase[0].get(0, 0).unwrap(),
            4.0f64.atan2(3.0) / PI,
            epsilon = 1e-5
        );
    }

    #[test]
    fn phase_distinguishes_opposite_quadrants() {
        let (_, _, a) = products([0.0, 0.0, 1.0, 1.0]);
        let (_, _, b) = products([0.0, 0.0, -1.0, -1.0]);
        let pa = a.phase[0].get(0, 0).unwrap();
        let pb = b.phase[0].get(0, 0).unwrap();
        assert_abs_diff_eq!(pa, 0.25, epsilon = 1e-5);
        assert_abs_diff_eq!(pb, -0.75, epsilon = 1e-5);
        // Sign flip leaves amplitude unchanged and shifts phase by π (1.0 here).
        assert_abs_diff_eq!(
            a.amplitude[0].get(0, 0).unwrap(),
            b.amplitude[0].get(0, 0).unwrap(),
            epsilon = 1e-5
        );
        assert_abs_diff_eq!((pa - pb).abs(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn phase_stays_in_unit_range() {
        for (c, s) in [(1.0, 0.0), (-1.0, 1e-9), (-1.0, -1e-9), (0.0, -1.0)] {
            let (_, _, p) = products([0.0, 0.0, c, s]);
            let v = p.phase[0].get(0, 0).unwrap();
            assert!((-1.0..=1.0).contains(&v), "phase {v} out of range");
        }
    }

    #[test]
    fn zero_harmonic_gives_zero_amplitude() {
        let (_, _, p) = products([2.0, 0.5, 0.0, 0.0]);
        assert_abs_diff_eq!(p.amplitude[0].get(0, 0).unwrap(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn masked_fit_masks_every_product() {
        let (_, coeffs, p) = products([1.0, 0.1, 0.5, 0.5]);
        assert_eq!(coeffs.pixel(0, 1), None);
        assert_eq!(p.amplitude[0].get(0, 1), None);
        assert_eq!(p.phase[0].get(0, 1), None);
        assert_eq!(p.mean.get(0, 1), None);
        for frame in p.fitted.as_ref().unwrap().frames() {
            assert_eq!(frame.band(FITTED_BAND).unwrap().get(0, 1), None);
        }
    }

    #[test]
    fn mean_matches_arithmetic_mean_of_valid_frames() {
        let (s, _, p) = products([1.0, 0.2, 0.5, -0.5]);
        let values: Vec<f64> = s
            .frames()
            .iter()
            .map(|f| f.band("NDVI").unwrap().get(0, 0).unwrap() as f64)
            .collect();
        let expected = values.iter().sum::<f64>() / values.len() as f64;
        assert_abs_diff_eq!(p.mean.get(0, 0).unwrap(), expected, epsilon = 1e-12);
        assert_eq!(p.mean_name, "NDVI_mean");
    }

    #[test]
    fn fitted_series_reproduces_noiseless_input() {
        let (s, _, p) = products([1.0, 0.2, 0.5, -0.5]);
        let fitted = p.fitted.unwrap();
        assert_eq!(fitted.timestamps(), s.timestamps());
        for (orig, fit) in s.frames().iter().zip(fitted.frames()) {
            let y = orig.band("NDVI").unwrap().get(0, 0).unwrap();
            let yhat = fit.band(FITTED_BAND).unwrap().get(0, 0).unwrap();
            assert_abs_diff_eq!(y, yhat, epsilon = 1e-4);
        }
    }

    #[test]
    fn cancelled_fitted_series_is_discarded() {
        let cfg = config();
        let s = series(&cfg, [1.0, 0.0, 0.5, 0.5]);
        let coeffs = LeastSquaresSolver::new(&cfg, 4).solve(&s).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let err =
            DerivedProducts::compute_with_cancel(&s, &coeffs, &cfg, true, &token).unwrap_err();
        assert_eq!(err, HarmonicError::Cancelled { completed: 0, total: 16 });
        // Without the fitted series there is nothing frame-wise to poll.
        assert!(DerivedProducts::compute_with_cancel(&s, &coeffs, &cfg, false, &token).is_ok());
    }

    #[test]
    fn fitted_is_optional() {
        let cfg = config();
        let s = series(&cfg, [1.0, 0.0, 0.0, 0.0]);
        let coeffs = LeastSquaresSolver::new(&cfg, 4).solve(&s).unwrap();
        let p = DerivedProducts::compute(&s, &coeffs, &cfg, false).unwrap();
        assert!(p.fitted.is_none());
    }
}
