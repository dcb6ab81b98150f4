//! Synthetic scenes with known coefficients.
//!
//! Every pixel follows the same coefficient vector; noise and cloud masking
//! are drawn per frame and pixel from a seeded `StdRng`, so a scene is fully
//! reproducible from its parameters.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::HarmonicConfig;
use crate::design::DesignMatrix;
use crate::error::{HarmonicError, Result};
use crate::grid::{GridSpec, MaskedGrid};
use crate::raster::{RasterFrame, TimeSeriesRaster};

#[derive(Debug, Clone)]
pub struct SyntheticScene<'a> {
    config: &'a HarmonicConfig,
    grid: GridSpec,
    times: Vec<f64>,
    coefficients: Vec<f64>,
    /// Half-width of the uniform noise added to the dependent band.
    noise_amplitude: f64,
    /// Probability that a frame/pixel sample is masked.
    cloud_fraction: f64,
    /// Pixels that keep only their first `n` observations.
    sparse_pixels: Vec<(usize, usize, usize)>,
    seed: u64,
}

impl<'a> SyntheticScene<'a> {
    /// Scene at explicit timestamps. `coefficients` follow the config's
    /// independent order; base independents must be `constant` and/or `t`.
    pub fn new(
        config: &'a HarmonicConfig,
        grid: GridSpec,
        times: Vec<f64>,
        coefficients: Vec<f64>,
    ) -> Result<Self> {
        if coefficients.len() != config.n_unknowns() {
            return Err(HarmonicError::shape(
                "synthetic coefficients",
                config.n_unknowns(),
                coefficients.len(),
            ));
        }
        Ok(Self {
            config,
            grid,
            times,
            coefficients,
            noise_amplitude: 0.0,
            cloud_fraction: 0.0,
            sparse_pixels: Vec::new(),
            seed: 42,
        })
    }

    /// `months` frames spaced one twelfth of a year apart from `start_year`.
    pub fn monthly(
        config: &'a HarmonicConfig,
        grid: GridSpec,
        start_year: f64,
        months: usize,
        coefficients: Vec<f64>,
    ) -> Result<Self> {
        let times = (0..months).map(|m| start_year + m as f64 / 12.0).collect();
        Self::new(config, grid, times, coefficients)
    }

    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude.abs();
        self
    }

    pub fn with_cloud_fraction(mut self, fraction: f64) -> Self {
        self.cloud_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Mask every observation of `(row, col)` after the first `keep`.
    pub fn with_sparse_pixel(mut self, row: usize, col: usize, keep: usize) -> Self {
        self.sparse_pixels.push((row, col, keep));
        self
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Noise-free dependent value at `t`.
    pub fn signal(&self, t: f64) -> Result<f64> {
        let row = DesignMatrix::new(self.config).standard_row(t)?;
        Ok(row.iter().zip(&self.coefficients).map(|(x, c)| x * c).sum())
    }

    /// Materialise the scene with all covariate bands attached.
    pub fn build(&self) -> Result<TimeSeriesRaster> {
        let dm = DesignMatrix::new(self.config);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let (w, h) = (self.grid.width, self.grid.height);

        let mut frames = Vec::with_capacity(self.times.len());
        for (k, &t) in self.times.iter().enumerate() {
            let clean = self.signal(t)?;
            let mut dep = MaskedGrid::masked(w, h);
            for r in 0..h {
                for c in 0..w {
                    let noise = if self.noise_amplitude > 0.0 {
                        rng.gen_range(-self.noise_amplitude..=self.noise_amplitude)
                    } else {
                        0.0
                    };
                    let cloudy = self.cloud_fraction > 0.0 && rng.gen_bool(self.cloud_fraction);
                    let starved = self
                        .sparse_pixels
                        .iter()
                        .any(|&(sr, sc, keep)| sr == r && sc == c && k >= keep);
                    if !(cloudy || starved) {
                        dep.set(r, c, (clean + noise) as f32);
                    }
                }
            }
            let frame = RasterFrame::new(t, self.grid.clone())
                .with_band(self.config.dependent().to_string(), dep)?;
            frames.push(dm.attach_covariates(&frame)?);
        }
        TimeSeriesRaster::new(frames)
    }
}
