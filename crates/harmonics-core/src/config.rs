//! Model configuration.
//!
//! [`HarmonicSettings`] is the loose, serde-friendly form (every field has a
//! default, suitable for JSON files). [`HarmonicConfig`] is the validated,
//! immutable model definition derived from it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::design::harmonic_terms;
use crate::error::{HarmonicError, Result};

pub const DEFAULT_DEPENDENT: &str = "NDVI";
pub const DEFAULT_HARMONICS: usize = 2;
/// Base angular frequency: 1.5 cycles per year for the fundamental.
pub const DEFAULT_OMEGA: f64 = 1.5;
pub const DEFAULT_TILE_SIZE: usize = 256;

/// Name of the band that holds the reconstructed series in fitted frames.
pub const FITTED_BAND: &str = "fitted";

/// Raw settings, as read from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonicSettings {
    /// Dependent band, usually a vegetation index.
    pub dependent: String,
    /// Independent variables other than the harmonic terms.
    pub independents: Vec<String>,
    /// Number of sine/cosine pairs.
    pub harmonics: usize,
    /// Base angular frequency in cycles per year.
    pub omega: f64,
    /// Edge length of the square tiles dispatched to workers.
    pub tile_size: usize,
    /// Whether to reconstruct the fitted time series.
    pub include_fitted: bool,
}

impl Default for HarmonicSettings {
    fn default() -> Self {
        Self {
            dependent: DEFAULT_DEPENDENT.to_string(),
            independents: vec!["constant".to_string(), "t".to_string()],
            harmonics: DEFAULT_HARMONICS,
            omega: DEFAULT_OMEGA,
            tile_size: DEFAULT_TILE_SIZE,
            include_fitted: true,
        }
    }
}

impl HarmonicSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| HarmonicError::Config(format!("unreadable settings: {e}")))
    }

    pub fn options(&self) -> PipelineOptions {
        PipelineOptions {
            tile_size: self.tile_size,
            include_fitted: self.include_fitted,
        }
    }
}

/// Execution knobs, kept apart from the model definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub tile_size: usize,
    pub include_fitted: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            include_fitted: true,
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(HarmonicError::Config("tile_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Validated harmonic model definition.
///
/// The independent list is the base independents followed by `cos_i, sin_i`
/// for `i` in `1..=H`, interleaved per harmonic. Coefficient bands, design
/// rows and fitted reconstruction all use this order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarmonicConfig {
    dependent: String,
    base_independents: Vec<String>,
    harmonics: usize,
    omega: f64,
    frequencies: Vec<u32>,
    cos_names: Vec<String>,
    sin_names: Vec<String>,
    independents: Vec<String>,
}

impl HarmonicConfig {
    pub fn new<S: AsRef<str>>(
        dependent: impl Into<String>,
        base_independents: &[S],
        harmonics: usize,
        omega: f64,
    ) -> Result<Self> {
        let dependent = dependent.into();
        let base: Vec<String> = base_independents
            .iter()
            .map(|s| s.as_ref().to_string())
            .collect();

        if dependent.trim().is_empty() {
            return Err(HarmonicError::Config("dependent band name is empty".into()));
        }
        if !(omega.is_finite() && omega > 0.0) {
            return Err(HarmonicError::Config(format!(
                "omega must be a positive finite number, got {omega}"
            )));
        }

        let mut seen = HashSet::new();
        for name in &base {
            if name.trim().is_empty() {
                return Err(HarmonicError::Config("empty independent name".into()));
            }
            if !seen.insert(name.as_str()) {
                return Err(HarmonicError::Config(format!(
                    "independent `{name}` listed twice"
                )));
            }
        }

        let (independents, frequencies) = harmonic_terms(harmonics, omega, &base)?;

        if independents.contains(&dependent) {
            return Err(HarmonicError::Config(format!(
                "dependent `{dependent}` is also an independent variable"
            )));
        }

        let cos_names = frequencies.iter().map(|f| format!("cos_{f}")).collect();
        let sin_names = frequencies.iter().map(|f| format!("sin_{f}")).collect();

        Ok(Self {
            dependent,
            base_independents: base,
            harmonics,
            omega,
            frequencies,
            cos_names,
            sin_names,
            independents,
        })
    }

    pub fn dependent(&self) -> &str {
        &self.dependent
    }

    pub fn base_independents(&self) -> &[String] {
        &self.base_independents
    }

    /// Full ordered independent list (base + interleaved harmonic terms).
    pub fn independents(&self) -> &[String] {
        &self.independents
    }

    pub fn harmonics(&self) -> usize {
        self.harmonics
    }

    pub fn omega(&self) -> f64 {
        self.omega
    }

    /// Harmonic frequency multipliers `1..=H`.
    pub fn frequencies(&self) -> &[u32] {
        &self.frequencies
    }

    pub fn cos_names(&self) -> &[String] {
        &self.cos_names
    }

    pub fn sin_names(&self) -> &[String] {
        &self.sin_names
    }

    /// Number of regression unknowns per pixel.
    pub fn n_unknowns(&self) -> usize {
        self.independents.len()
    }

    /// Column of `name` in the independent list.
    pub fn position(&self, name: &str) -> Result<usize> {
        self.independents
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| HarmonicError::band_not_found(name))
    }

    /// Name of the temporal-mean band, `<dependent>_mean`.
    pub fn mean_name(&self) -> String {
        format!("{}_mean", self.dependent)
    }
}

impl TryFrom<HarmonicSettings> for HarmonicConfig {
    type Error = HarmonicError;

    fn try_from(s: HarmonicSettings) -> Result<Self> {
        s.options().validate()?;
        Self::new(s.dependent, &s.independents, s.harmonics, s.omega)
    }
}
