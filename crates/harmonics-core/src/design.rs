//! Design matrix construction for the harmonic basis.
//!
//! Row layout for a timestamp `t` (decimal years):
//! ```text
//! [ base_0(t), …, base_k(t), cos(θ₁), sin(θ₁), …, cos(θ_H), sin(θ_H) ]
//! θᵢ = 2·ω·π·i·t
//! ```
//! Base covariate values come from the caller; `constant` (1.0) and `t`
//! (the timestamp itself) are understood natively.

use std::f64::consts::PI;

use crate::config::HarmonicConfig;
use crate::error::{HarmonicError, Result};
use crate::grid::MaskedGrid;
use crate::raster::{RasterFrame, TimeSeriesRaster};

pub const CONSTANT: &str = "constant";
pub const TIME: &str = "t";

/// Ordered independent names and harmonic frequencies for order `harmonics`.
///
/// Returns `(base ++ [cos_1, sin_1, …, cos_H, sin_H], [1, …, H])`.
pub fn harmonic_terms(
    harmonics: usize,
    omega: f64,
    base_independents: &[String],
) -> Result<(Vec<String>, Vec<u32>)> {
    if harmonics < 1 {
        return Err(HarmonicError::Config(
            "harmonic order must be at least 1".into(),
        ));
    }
    if !(omega.is_finite() && omega > 0.0) {
        return Err(HarmonicError::Config(format!(
            "omega must be a positive finite number, got {omega}"
        )));
    }
    let max = u32::try_from(harmonics)
        .map_err(|_| HarmonicError::Config(format!("harmonic order {harmonics} is too large")))?;

    let frequencies: Vec<u32> = (1..=max).collect();
    let mut names = base_independents.to_vec();
    for f in &frequencies {
        for term in [format!("cos_{f}"), format!("sin_{f}")] {
            if base_independents.contains(&term) {
                return Err(HarmonicError::Config(format!(
                    "base independent `{term}` collides with a generated harmonic term"
                )));
            }
            names.push(term);
        }
    }
    Ok((names, frequencies))
}

/// Value of a natively understood base covariate at `t`.
pub fn standard_covariate(name: &str, t: f64) -> Option<f64> {
    match name {
        CONSTANT => Some(1.0),
        TIME => Some(t),
        _ => None,
    }
}

/// Builds design rows and covariate bands for one [`HarmonicConfig`].
#[derive(Debug, Clone)]
pub struct DesignMatrix<'a> {
    config: &'a HarmonicConfig,
}

impl<'a> DesignMatrix<'a> {
    pub fn new(config: &'a HarmonicConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarmonicConfig {
        self.config
    }

    /// Angular frequency of harmonic `freq` in radians per year.
    #[inline]
    pub fn angular(&self, freq: u32) -> f64 {
        2.0 * self.config.omega() * PI * freq as f64
    }

    /// Write the `2H` harmonic terms for `t` into `out` as `cos, sin` pairs.
    pub fn harmonic_values(&self, t: f64, out: &mut [f64]) {
        for (pair, &f) in out.chunks_exact_mut(2).zip(self.config.frequencies()) {
            let (s, c) = (self.angular(f) * t).sin_cos();
            pair[0] = c;
            pair[1] = s;
        }
    }

    /// Full covariate row for `t` given caller-supplied base covariate values.
    pub fn row(&self, t: f64, base_values: &[f64]) -> Result<Vec<f64>> {
        let n_base = self.config.base_independents().len();
        if base_values.len() != n_base {
            return Err(HarmonicError::shape("base covariates", n_base, base_values.len()));
        }
        let mut row = vec![0.0; self.config.n_unknowns()];
        row[..n_base].copy_from_slice(base_values);
        self.harmonic_values(t, &mut row[n_base..]);
        Ok(row)
    }

    /// Row for `t` using the built-in values of `constant` and `t`.
    /// Fails with `BandNotFound` for any other base independent.
    pub fn standard_row(&self, t: f64) -> Result<Vec<f64>> {
        let base = self
            .config
            .base_independents()
            .iter()
            .map(|n| standard_covariate(n, t).ok_or_else(|| HarmonicError::band_not_found(n)))
            .collect::<Result<Vec<_>>>()?;
        self.row(t, &base)
    }

    /// Copy of `frame` carrying every independent band.
    ///
    /// `constant`, `t` and the harmonic terms are generated when absent; any
    /// other base independent must already be on the frame. Generated bands
    /// are fully valid; existing bands (and their masks) are kept untouched.
    pub fn attach_covariates(&self, frame: &RasterFrame) -> Result<RasterFrame> {
        let grid = frame.grid();
        let (w, h) = (grid.width, grid.height);
        let t = frame.t();
        let mut out = frame.clone();

        for name in self.config.base_independents() {
            if out.has_band(name) {
                continue;
            }
            let value = standard_covariate(name, t)
                .ok_or_else(|| HarmonicError::band_not_found(name))?;
            out.insert_band(name.clone(), MaskedGrid::filled(w, h, value as f32))?;
        }

        let mut terms = vec![0.0; 2 * self.config.harmonics()];
        self.harmonic_values(t, &mut terms);
        let names = self
            .config
            .cos_names()
            .iter()
            .zip(self.config.sin_names())
            .flat_map(|(c, s)| [c, s]);
        for (name, value) in names.zip(terms) {
            if !out.has_band(name) {
                out.insert_band(name.clone(), MaskedGrid::filled(w, h, value as f32))?;
            }
        }
        Ok(out)
    }

    /// [`DesignMatrix::attach_covariates`] over every frame of `series`.
    pub fn attach_to_series(&self, series: &TimeSeriesRaster) -> Result<TimeSeriesRaster> {
        series.map_frames(|f| self.attach_covariates(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridSpec;
    use approx::assert_abs_diff_eq;

    fn config(h: usize, omega: f64) -> HarmonicConfig {
        HarmonicConfig::new("NDVI", &["constant", "t"], h, omega).unwrap()
    }

    #[test]
    fn terms_list_frequencies_one_to_h() {
        let base = vec!["constant".to_string()];
        let (names, freqs) = harmonic_terms(3, 1.0, &base).unwrap();
        assert_eq!(freqs, vec![1, 2, 3]);
        assert_eq!(names.len(), 1 + 6);
        assert_eq!(names[5], "cos_3");
        assert_eq!(names[6], "sin_3");
    }

    #[test]
    fn terms_reject_zero_order_and_collisions() {
        let base = vec!["cos_1".to_string()];
        assert!(harmonic_terms(0, 1.0, &[]).is_err());
        assert!(harmonic_terms(1, 1.0, &base).is_err());
    }

    #[test]
    fn row_matches_closed_form() {
        let cfg = config(2, 1.5);
        let dm = DesignMatrix::new(&cfg);
        let t = 0.3;
        let row = dm.standard_row(t).unwrap();
        let w = 2.0 * 1.5 * PI;
        let expected = [
            1.0,
            t,
            (w * t).cos(),
            (w * t).sin(),
            (2.0 * w * t).cos(),
            (2.0 * w * t).sin(),
        ];
        assert_eq!(row.len(), expected.len());
        for (a, b) in row.iter().zip(expected) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn row_rejects_wrong_base_length() {
        let cfg = config(1, 1.0);
        let dm = DesignMatrix::new(&cfg);
        assert!(matches!(
            dm.row(0.0, &[1.0]),
            Err(HarmonicError::ShapeMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn standard_row_needs_known_base_names() {
        let cfg = HarmonicConfig::new("NDVI", &["constant", "elevation"], 1, 1.0).unwrap();
        let err = DesignMatrix::new(&cfg).standard_row(0.0).unwrap_err();
        assert_eq!(err, HarmonicError::BandNotFound { band: "elevation".into() });
    }

    #[test]
    fn attach_adds_every_independent_band() {
        let cfg = config(2, 1.0);
        let grid = GridSpec::global(3, 2);
        let frame = RasterFrame::new(0.125, grid.clone())
            .with_band("NDVI", MaskedGrid::filled(3, 2, 0.4))
            .unwrap();
        let out = DesignMatrix::new(&cfg).attach_covariates(&frame).unwrap();

        for name in cfg.independents() {
            assert!(out.has_band(name), "missing {name}");
        }
        assert_eq!(out.band("constant").unwrap().get(1, 2), Some(1.0));
        assert_eq!(out.band("t").unwrap().get(0, 0), Some(0.125));
        // θ₁ = 2π·0.125 = π/4.
        let c1 = out.band("cos_1").unwrap().get(0, 1).unwrap();
        assert_abs_diff_eq!(c1 as f64, (PI / 4.0).cos(), epsilon = 1e-6);
        // θ₂ = π/2.
        let s2 = out.band("sin_2").unwrap().get(1, 1).unwrap();
        assert_abs_diff_eq!(s2 as f64, 1.0, epsilon = 1e-6);
        // Source frame untouched.
        assert!(!frame.has_band("cos_1"));
    }

    #[test]
    fn attach_requires_custom_base_band() {
        let cfg = HarmonicConfig::new("NDVI", &["constant", "slope"], 1, 1.0).unwrap();
        let frame = RasterFrame::new(0.0, GridSpec::global(1, 1));
        let err = DesignMatrix::new(&cfg).attach_covariates(&frame).unwrap_err();
        assert_eq!(err, HarmonicError::BandNotFound { band: "slope".into() });
    }
}
