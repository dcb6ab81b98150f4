use crate::config::HarmonicConfig;
use crate::error::{HarmonicError, Result};
use crate::grid::{GridSpec, MaskedGrid};

/// Per-pixel regression coefficients, one band per independent variable.
///
/// Band order follows [`HarmonicConfig::independents`]. A pixel whose fit was
/// degenerate is masked in every band. Coefficients stay in f64 until the
/// product stack is assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientRaster {
    grid: GridSpec,
    names: Vec<String>,
    bands: Vec<MaskedGrid<f64>>,
    /// Observations used per pixel (valid everywhere, masked fits included).
    n_obs: MaskedGrid<f64>,
    /// Root-mean-square residual of the fit, masked with the coefficients.
    rmse: MaskedGrid<f64>,
}

impl CoefficientRaster {
    pub(crate) fn new(
        grid: GridSpec,
        config: &HarmonicConfig,
        bands: Vec<MaskedGrid<f64>>,
        n_obs: MaskedGrid<f64>,
        rmse: MaskedGrid<f64>,
    ) -> Result<Self> {
        let names = config.independents().to_vec();
        if bands.len() != names.len() {
            return Err(HarmonicError::shape("coefficient bands", names.len(), bands.len()));
        }
        for (name, band) in names.iter().zip(&bands) {
            if !band.fits(&grid) {
                return Err(HarmonicError::shape(name.clone(), grid.len(), band.len()));
            }
        }
        Ok(Self {
            grid,
            names,
            bands,
            n_obs,
            rmse,
        })
    }

    /// Coefficient band for an independent variable.
    pub fn band(&self, name: &str) -> Result<&MaskedGrid<f64>> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.bands[i])
            .ok_or_else(|| HarmonicError::band_not_found(name))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// `(name, band)` pairs in independent order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MaskedGrid<f64>)> {
        self.names.iter().map(String::as_str).zip(&self.bands)
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn n_obs(&self) -> &MaskedGrid<f64> {
        &self.n_obs
    }

    pub fn rmse(&self) -> &MaskedGrid<f64> {
        &self.rmse
    }

    /// Coefficient vector at a pixel, `None` where the fit is masked.
    pub fn pixel(&self, row: usize, col: usize) -> Option<Vec<f64>> {
        self.bands.iter().map(|b| b.get(row, col)).collect()
    }

    /// Whether the fit at flat index `idx` produced coefficients.
    #[inline]
    pub fn is_fitted(&self, idx: usize) -> bool {
        self.bands.first().is_some_and(|b| b.validity()[idx])
    }

    /// Share of pixels without a usable fit.
    pub fn masked_fraction(&self) -> f64 {
        let n = self.grid.len();
        if n == 0 {
            return 0.0;
        }
        let fitted = (0..n).filter(|&i| self.is_fitted(i)).count();
        (n - fitted) as f64 / n as f64
    }
}
