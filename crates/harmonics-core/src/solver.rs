//! Per-pixel ordinary least squares over the time axis.
//!
//! For every pixel the design matrix `X` (frames × independents) and target
//! `y` are assembled from the frames where the dependent and all independent
//! bands are valid at that pixel. The system is solved through an SVD of `X`
//! rather than the normal equations, which squares the condition number.
//!
//! Degenerate pixels (fewer observations than unknowns, rank-deficient or
//! ill-conditioned `X`) come back masked. They never raise an error.

use nalgebra::{DMatrix, DVector, SVD};
use tracing::debug;

use crate::coefficients::CoefficientRaster;
use crate::config::HarmonicConfig;
use crate::error::Result;
use crate::grid::MaskedGrid;
use crate::raster::TimeSeriesRaster;
use crate::tiling::{dispatch, merge_tiles, CancelToken, Tile, TileLayout};

/// Relative precision of the stored samples. Bands are f32, so singular
/// directions weaker than this (scaled by the system size) carry no signal.
pub const SAMPLE_EPSILON: f64 = f32::EPSILON as f64;

/// Singular values below this fraction of the largest count as zero for an
/// `n × n_vars` system. A pixel with any such direction is masked.
pub fn rank_tolerance(n: usize, n_vars: usize) -> f64 {
    SAMPLE_EPSILON * n.max(n_vars) as f64
}

/// Iteration cap for the SVD; a pixel that does not converge is masked.
const MAX_SVD_ITERATIONS: usize = 500;

/// Outcome of one pixel's regression.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelFit {
    /// Coefficients in independent order, `None` when the fit is degenerate.
    pub coefficients: Option<Vec<f64>>,
    /// Number of frames that entered the system.
    pub n_obs: usize,
    /// Root-mean-square residual, present with the coefficients.
    pub rmse: Option<f64>,
}

impl PixelFit {
    fn degenerate(n_obs: usize) -> Self {
        Self {
            coefficients: None,
            n_obs,
            rmse: None,
        }
    }
}

/// Least-squares fit of `y ≈ X·c` with `X` given row-major (`y.len()` rows,
/// `n_vars` columns).
pub fn fit_observations(rows: &[f64], y: &[f64], n_vars: usize) -> PixelFit {
    let n = y.len();
    if n_vars == 0 || n < n_vars || rows.len() != n * n_vars {
        return PixelFit::degenerate(n);
    }

    let x = DMatrix::from_row_slice(n, n_vars, rows);
    let b = DVector::from_column_slice(y);

    let Some(svd) = SVD::try_new(x.clone(), true, true, f64::EPSILON, MAX_SVD_ITERATIONS) else {
        return PixelFit::degenerate(n);
    };
    let max_sv = svd.singular_values.iter().cloned().fold(0.0_f64, f64::max);
    if !(max_sv.is_finite() && max_sv > 0.0) {
        return PixelFit::degenerate(n);
    }
    let eps = rank_tolerance(n, n_vars) * max_sv;
    if svd.rank(eps) < n_vars {
        return PixelFit::degenerate(n);
    }
    let Ok(c) = svd.solve(&b, eps) else {
        return PixelFit::degenerate(n);
    };
    if c.iter().any(|v| !v.is_finite()) {
        return PixelFit::degenerate(n);
    }

    let residual = &x * &c - &b;
    let rmse = (residual.norm_squared() / n as f64).sqrt();

    PixelFit {
        coefficients: Some(c.iter().copied().collect()),
        n_obs: n,
        rmse: Some(rmse),
    }
}

/// Per-tile solver output, in tile-local coordinates.
struct TileFit {
    coefficients: Vec<MaskedGrid<f64>>,
    n_obs: MaskedGrid<f64>,
    rmse: MaskedGrid<f64>,
}

/// Tiled, per-pixel harmonic regression over a [`TimeSeriesRaster`].
#[derive(Debug, Clone)]
pub struct LeastSquaresSolver<'a> {
    config: &'a HarmonicConfig,
    tile_size: usize,
}

impl<'a> LeastSquaresSolver<'a> {
    pub fn new(config: &'a HarmonicConfig, tile_size: usize) -> Self {
        Self { config, tile_size }
    }

    pub fn solve(&self, series: &TimeSeriesRaster) -> Result<CoefficientRaster> {
        self.solve_with_cancel(series, &CancelToken::new())
    }

    /// Fit every pixel. Every frame must carry the dependent and all
    /// independent bands, else `BandNotFound`.
    pub fn solve_with_cancel(
        &self,
        series: &TimeSeriesRaster,
        cancel: &CancelToken,
    ) -> Result<CoefficientRaster> {
        let independents = self.config.independents();
        series.require_bands(independents)?;
        series.require_bands(&[self.config.dependent()])?;

        // columns[var][frame]
        let columns = independents
            .iter()
            .map(|name| series.band_stack(name))
            .collect::<Result<Vec<_>>>()?;
        let target = series.band_stack(self.config.dependent())?;

        let grid = series.grid();
        let layout = TileLayout::new(grid.width, grid.height, self.tile_size)?;
        debug!(
            frames = series.len(),
            unknowns = independents.len(),
            tiles = layout.len(),
            "solving per-pixel regression"
        );

        let parts = dispatch(&layout, cancel, |tile| {
            solve_tile(tile, grid.width, &columns, &target)
        })?;

        let (w, h) = (grid.width, grid.height);
        let mut coeff_parts: Vec<Vec<(Tile, MaskedGrid<f64>)>> =
            (0..independents.len()).map(|_| Vec::with_capacity(parts.len())).collect();
        let mut n_obs_parts = Vec::with_capacity(parts.len());
        let mut rmse_parts = Vec::with_capacity(parts.len());
        for (tile, fit) in parts {
            for (k, band) in fit.coefficients.into_iter().enumerate() {
                coeff_parts[k].push((tile, band));
            }
            n_obs_parts.push((tile, fit.n_obs));
            rmse_parts.push((tile, fit.rmse));
        }

        let bands = coeff_parts
            .into_iter()
            .map(|p| merge_tiles(w, h, p))
            .collect();
        CoefficientRaster::new(
            grid.clone(),
            self.config,
            bands,
            merge_tiles(w, h, n_obs_parts),
            merge_tiles(w, h, rmse_parts),
        )
    }
}

fn solve_tile(
    tile: &Tile,
    grid_width: usize,
    columns: &[Vec<&MaskedGrid<f32>>],
    target: &[&MaskedGrid<f32>],
) -> TileFit {
    let n_vars = columns.len();
    let mut coefficients = vec![MaskedGrid::masked(tile.cols, tile.rows); n_vars];
    let mut n_obs = MaskedGrid::masked(tile.cols, tile.rows);
    let mut rmse = MaskedGrid::masked(tile.cols, tile.rows);

    let mut rows: Vec<f64> = Vec::with_capacity(target.len() * n_vars);
    let mut ys: Vec<f64> = Vec::with_capacity(target.len());

    for (local, idx) in tile.grid_indices(grid_width).enumerate() {
        rows.clear();
        ys.clear();
        'frames: for (f, dep) in target.iter().enumerate() {
            let Some(y) = dep.at(idx) else { continue };
            let start = rows.len();
            for column in columns {
                match column[f].at(idx) {
                    Some(v) => rows.push(v as f64),
                    None => {
                        rows.truncate(start);
                        continue 'frames;
                    }
                }
            }
            ys.push(y as f64);
        }

        let fit = fit_observations(&rows, &ys, n_vars);
        n_obs.put(local, Some(fit.n_obs as f64));
        rmse.put(local, fit.rmse);
        match fit.coefficients {
            Some(c) => {
                for (band, v) in coefficients.iter_mut().zip(c) {
                    band.put(local, Some(v));
                }
            }
            None => {
                for band in &mut coefficients {
                    band.put(local, None);
                }
            }
        }
    }

    TileFit {
        coefficients,
        n_obs,
        rmse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::DesignMatrix;
    use crate::grid::GridSpec;
    use crate::raster::RasterFrame;
    use approx::assert_abs_diff_eq;

    #[test]
    fn exact_line_is_recovered() {
        // y = 2 + 3x
        let xs = [0.0, 1.0, 2.0, 3.0];
        let rows: Vec<f64> = xs.iter().flat_map(|&x| [1.0, x]).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| 2.0 + 3.0 * x).collect();
        let fit = fit_observations(&rows, &ys, 2);
        let c = fit.coefficients.unwrap();
        assert_abs_diff_eq!(c[0], 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(c[1], 3.0, epsilon = 1e-10);
        assert_abs_diff_eq!(fit.rmse.unwrap(), 0.0, epsilon = 1e-10);
        assert_eq!(fit.n_obs, 4);
    }

    #[test]
    fn noisy_line_minimises_squared_residuals() {
        // Symmetric noise around y = x gives slope 1, intercept 0.
        let rows = [1.0, -1.0, 1.0, 0.0, 1.0, 1.0];
        let ys = [-1.5, 0.5, 1.0];
        let fit = fit_observations(&rows, &ys, 2);
        let c = fit.coefficients.unwrap();
        assert_abs_diff_eq!(c[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c[1], 1.25, epsilon = 1e-12);
    }

    #[test]
    fn too_few_observations_is_degenerate() {
        let fit = fit_observations(&[1.0, 0.0], &[1.0], 2);
        assert_eq!(fit, PixelFit::degenerate(1));
    }

    #[test]
    fn rank_deficient_design_is_degenerate() {
        // Second column duplicates the first.
        let rows = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let fit = fit_observations(&rows, &[1.0, 2.0, 3.0], 2);
        assert!(fit.coefficients.is_none());
        assert_eq!(fit.n_obs, 3);
    }

    #[test]
    fn all_zero_design_is_degenerate() {
        let fit = fit_observations(&[0.0; 6], &[1.0, 2.0, 3.0], 2);
        assert!(fit.coefficients.is_none());
    }

    #[test]
    fn clustered_timestamps_are_ill_conditioned() {
        // Eight frames one day apart: every column is nearly constant.
        let cfg = HarmonicConfig::new("NDVI", &["constant", "t"], 2, 1.5).unwrap();
        let dm = DesignMatrix::new(&cfg);
        let truth = [0.3, 0.002, 0.15, -0.05, 0.04, 0.02];
        let mut rows = Vec::new();
        let mut ys = Vec::new();
        for k in 0..8 {
            let t = 48.0 + k as f64 / 365.25;
            let row = dm.standard_row(t).unwrap();
            let y: f64 = row.iter().zip(truth).map(|(a, b)| a * b).sum();
            rows.extend(row.iter().map(|&v| v as f32 as f64));
            ys.push(y as f32 as f64);
        }
        let fit = fit_observations(&rows, &ys, cfg.n_unknowns());
        assert_eq!(fit.coefficients, None);
        assert_eq!(fit.rmse, None);
        assert_eq!(fit.n_obs, 8);
    }

    #[test]
    fn well_spread_timestamps_pass_the_rank_test() {
        let cfg = HarmonicConfig::new("NDVI", &["constant", "t"], 2, 1.5).unwrap();
        let dm = DesignMatrix::new(&cfg);
        let rows: Vec<f64> = (0..24)
            .flat_map(|k| dm.standard_row(48.0 + k as f64 / 12.0).unwrap())
            .collect();
        let ys = vec![0.5; 24];
        let c = fit_observations(&rows, &ys, cfg.n_unknowns()).coefficients.unwrap();
        assert_abs_diff_eq!(c[0] + 48.0 * c[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn frames_with_a_masked_covariate_are_left_out() {
        let cfg = HarmonicConfig::new("NDVI", &["constant", "t"], 1, 1.0).unwrap();
        let dm = DesignMatrix::new(&cfg);
        let grid = GridSpec::global(2, 1);
        let truth = [0.4, 0.05, 0.2, -0.3];
        let dropped = [3, 7, 11];
        let frames = (0..24)
            .map(|k| {
                let t = k as f64 / 12.0;
                let row = dm.standard_row(t).unwrap();
                let y: f64 = row.iter().zip(truth).map(|(a, b)| a * b).sum();
                let mut dep = MaskedGrid::filled(2, 1, y as f32);
                let mut sin_1 = MaskedGrid::filled(2, 1, row[3] as f32);
                if dropped.contains(&k) {
                    // Garbage target that would wreck the fit if it were used.
                    dep.set(0, 1, 999.0);
                    sin_1.mask(0, 1);
                }
                let frame = RasterFrame::new(t, grid.clone())
                    .with_band("NDVI", dep)
                    .unwrap()
                    .with_band("sin_1", sin_1)
                    .unwrap();
                dm.attach_covariates(&frame).unwrap()
            })
            .collect();
        let series = TimeSeriesRaster::new(frames).unwrap();
        let coeffs = LeastSquaresSolver::new(&cfg, 1).solve(&series).unwrap();

        assert_eq!(coeffs.n_obs().get(0, 0), Some(24.0));
        assert_eq!(coeffs.n_obs().get(0, 1), Some(21.0));
        for col in 0..2 {
            let c = coeffs.pixel(0, col).unwrap();
            for (got, want) in c.iter().zip(truth) {
                assert_abs_diff_eq!(*got, want, epsilon = 1e-4);
            }
        }
    }

    fn series_with_masked_pixel(cfg: &HarmonicConfig) -> TimeSeriesRaster {
        let grid = GridSpec::global(3, 2);
        let dm = DesignMatrix::new(cfg);
        let truth = [0.2, 0.01, 0.3, -0.1];
        let frames = (0..20)
            .map(|k| {
                let t = k as f64 / 10.0;
                let row = dm.standard_row(t).unwrap();
                let y: f64 = row.iter().zip(truth).map(|(a, b)| a * b).sum();
                let mut dep = MaskedGrid::filled(3, 2, y as f32);
                if k >= 2 {
                    dep.mask(1, 2);
                }
                let frame = RasterFrame::new(t, grid.clone()).with_band("NDVI", dep).unwrap();
                dm.attach_covariates(&frame).unwrap()
            })
            .collect();
        TimeSeriesRaster::new(frames).unwrap()
    }

    #[test]
    fn solver_masks_starved_pixel_only() {
        let cfg = HarmonicConfig::new("NDVI", &["constant", "t"], 1, 1.0).unwrap();
        let series = series_with_masked_pixel(&cfg);
        let coeffs = LeastSquaresSolver::new(&cfg, 2).solve(&series).unwrap();

        assert_eq!(coeffs.pixel(1, 2), None);
        assert_eq!(coeffs.n_obs().get(1, 2), Some(2.0));
        assert_eq!(coeffs.rmse().get(1, 2), None);

        let c = coeffs.pixel(0, 0).unwrap();
        assert_abs_diff_eq!(c[2], 0.3, epsilon = 1e-4);
        assert_abs_diff_eq!(c[3], -0.1, epsilon = 1e-4);
        assert_eq!(coeffs.n_obs().get(0, 0), Some(20.0));
    }

    #[test]
    fn tile_size_does_not_change_result() {
        let cfg = HarmonicConfig::new("NDVI", &["constant", "t"], 1, 1.0).unwrap();
        let series = series_with_masked_pixel(&cfg);
        let a = LeastSquaresSolver::new(&cfg, 1).solve(&series).unwrap();
        let b = LeastSquaresSolver::new(&cfg, 64).solve(&series).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_covariate_band_is_an_error() {
        let cfg = HarmonicConfig::new("NDVI", &["constant", "t"], 1, 1.0).unwrap();
        let grid = GridSpec::global(1, 1);
        let frame = RasterFrame::new(0.0, grid)
            .with_band("NDVI", MaskedGrid::filled(1, 1, 0.5))
            .unwrap();
        let series = TimeSeriesRaster::new(vec![frame]).unwrap();
        let err = LeastSquaresSolver::new(&cfg, 8).solve(&series).unwrap_err();
        assert!(matches!(err, crate::error::HarmonicError::BandNotFound { .. }));
    }
}
