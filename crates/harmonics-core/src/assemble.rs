//! Product stack assembly.
//!
//! Input stacks are concatenated in order into one named multi-band raster.
//! Harmonic-indexed stacks are renamed `<prefix>_1 … <prefix>_n` in the order
//! given. Values are narrowed to f32 here and nowhere earlier.

use std::collections::HashSet;

use serde::Serialize;

use crate::coefficients::CoefficientRaster;
use crate::error::{HarmonicError, Result};
use crate::grid::{GridSpec, MaskedGrid};
use crate::products::DerivedProducts;

pub const N_OBS_BAND: &str = "n_obs";
pub const RMSE_BAND: &str = "rmse";

/// One input to the assembler: named bands plus an optional rename prefix.
#[derive(Debug, Clone)]
pub struct BandSet<'a> {
    bands: Vec<(String, &'a MaskedGrid<f64>)>,
    harmonic_prefix: Option<String>,
}

impl<'a> BandSet<'a> {
    /// Bands kept under their own names.
    pub fn named(bands: Vec<(String, &'a MaskedGrid<f64>)>) -> Self {
        Self {
            bands,
            harmonic_prefix: None,
        }
    }

    /// Bands renamed to `<prefix>_1, <prefix>_2, …` in the given order.
    pub fn harmonic(prefix: impl Into<String>, bands: Vec<(String, &'a MaskedGrid<f64>)>) -> Self {
        Self {
            bands,
            harmonic_prefix: Some(prefix.into()),
        }
    }

    fn output_names(&self) -> Vec<String> {
        match &self.harmonic_prefix {
            Some(prefix) => (1..=self.bands.len()).map(|i| format!("{prefix}_{i}")).collect(),
            None => self.bands.iter().map(|(n, _)| n.clone()).collect(),
        }
    }
}

/// Final multi-band deliverable.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductStack {
    grid: GridSpec,
    bands: Vec<(String, MaskedGrid<f32>)>,
}

/// Per-band summary used in reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandSummary {
    pub name: String,
    pub valid: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ProductStack {
    /// Concatenate `sets` on `grid`.
    ///
    /// Fails with `NameCollision` if two sets share a band name before
    /// renaming, or if renaming produces a duplicate.
    pub fn concat(grid: &GridSpec, sets: &[BandSet<'_>]) -> Result<Self> {
        let mut seen = HashSet::new();
        for set in sets {
            let mut local = HashSet::new();
            for (name, _) in &set.bands {
                if seen.contains(name.as_str()) {
                    return Err(HarmonicError::NameCollision { band: name.clone() });
                }
                local.insert(name.as_str());
            }
            seen.extend(local);
        }

        let mut out_names = HashSet::new();
        let mut bands = Vec::new();
        for set in sets {
            for ((_, grid_band), name) in set.bands.iter().zip(set.output_names()) {
                if !grid_band.fits(grid) {
                    return Err(HarmonicError::shape(name, grid.len(), grid_band.len()));
                }
                if !out_names.insert(name.clone()) {
                    return Err(HarmonicError::NameCollision { band: name });
                }
                bands.push((name, grid_band.cast::<f32>()));
            }
        }
        Ok(Self {
            grid: grid.clone(),
            bands,
        })
    }

    /// Coefficients, then `amp_*`, `phase_*` and the mean band.
    pub fn assemble(coeffs: &CoefficientRaster, products: &DerivedProducts) -> Result<Self> {
        let coefficient_set = BandSet::named(
            coeffs.iter().map(|(n, b)| (n.to_string(), b)).collect(),
        );
        let amplitude_set = BandSet::harmonic("amp", indexed("amp", &products.amplitude));
        let phase_set = BandSet::harmonic("phase", indexed("phase", &products.phase));
        let mean_set = BandSet::named(vec![(products.mean_name.clone(), &products.mean)]);
        Self::concat(
            coeffs.grid(),
            &[coefficient_set, amplitude_set, phase_set, mean_set],
        )
    }

    /// Append the `n_obs` and `rmse` fit diagnostics.
    pub fn with_diagnostics(self, coeffs: &CoefficientRaster) -> Result<Self> {
        let existing: Vec<(String, MaskedGrid<f64>)> = self
            .bands
            .iter()
            .map(|(n, b)| (n.clone(), b.cast::<f64>()))
            .collect();
        let current = BandSet::named(existing.iter().map(|(n, b)| (n.clone(), b)).collect());
        let diagnostics = BandSet::named(vec![
            (N_OBS_BAND.to_string(), coeffs.n_obs()),
            (RMSE_BAND.to_string(), coeffs.rmse()),
        ]);
        Self::concat(&self.grid, &[current, diagnostics])
    }

    pub fn band(&self, name: &str) -> Result<&MaskedGrid<f32>> {
        self.bands
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
            .ok_or_else(|| HarmonicError::band_not_found(name))
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MaskedGrid<f32>)> {
        self.bands.iter().map(|(n, b)| (n.as_str(), b))
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn summary(&self) -> Vec<BandSummary> {
        self.iter()
            .map(|(name, band)| BandSummary {
                name: name.to_string(),
                valid: band.valid_count(),
                mean: band.mean(),
                min: band.min(),
                max: band.max(),
            })
            .collect()
    }
}

fn indexed<'a>(prefix: &str, bands: &'a [MaskedGrid<f64>]) -> Vec<(String, &'a MaskedGrid<f64>)> {
    bands
        .iter()
        .enumerate()
        .map(|(i, b)| (format!("{prefix}_{}", i + 1), b))
        .collect()
}
