//! Time-indexed raster stacks.
//!
//! A [`TimeSeriesRaster`] is an ordered list of [`RasterFrame`]s sharing one
//! [`GridSpec`]. Frames are immutable once part of a series; every
//! transformation builds new frames.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{HarmonicError, Result};
use crate::grid::{GridSpec, MaskedGrid};
use crate::time::{decimal_years_since_epoch, from_decimal_years};

/// One acquisition: a timestamp plus named bands on a common grid.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterFrame {
    /// Decimal years since 1970-01-01.
    t: f64,
    grid: GridSpec,
    bands: BTreeMap<String, MaskedGrid<f32>>,
}

impl RasterFrame {
    /// Empty frame at `t` decimal years since the epoch.
    pub fn new(t: f64, grid: GridSpec) -> Self {
        Self {
            t,
            grid,
            bands: BTreeMap::new(),
        }
    }

    /// Empty frame at a calendar timestamp.
    pub fn at(ts: DateTime<Utc>, grid: GridSpec) -> Self {
        Self::new(decimal_years_since_epoch(ts), grid)
    }

    /// Builder form of [`RasterFrame::insert_band`].
    pub fn with_band(mut self, name: impl Into<String>, band: MaskedGrid<f32>) -> Result<Self> {
        self.insert_band(name, band)?;
        Ok(self)
    }

    /// Add a band. Fails if the name is taken or the band does not fit the grid.
    pub fn insert_band(&mut self, name: impl Into<String>, band: MaskedGrid<f32>) -> Result<()> {
        let name = name.into();
        if !band.fits(&self.grid) {
            return Err(HarmonicError::shape(name, self.grid.len(), band.len()));
        }
        if self.bands.contains_key(&name) {
            return Err(HarmonicError::DuplicateBand { band: name });
        }
        self.bands.insert(name, band);
        Ok(())
    }

    pub fn band(&self, name: &str) -> Result<&MaskedGrid<f32>> {
        self.bands
            .get(name)
            .ok_or_else(|| HarmonicError::band_not_found(name))
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.contains_key(name)
    }

    /// Band names in lexical order.
    pub fn band_names(&self) -> impl Iterator<Item = &str> {
        self.bands.keys().map(String::as_str)
    }

    #[inline]
    pub fn t(&self) -> f64 {
        self.t
    }

    /// Calendar timestamp of this frame, when representable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        from_decimal_years(self.t)
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }
}

/// Ordered frames on one shared grid.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesRaster {
    grid: GridSpec,
    frames: Vec<RasterFrame>,
}

impl TimeSeriesRaster {
    /// Build a series, checking that every frame shares the first frame's grid.
    pub fn new(frames: Vec<RasterFrame>) -> Result<Self> {
        let grid = frames.first().ok_or(HarmonicError::EmptySeries)?.grid.clone();
        for (index, frame) in frames.iter().enumerate() {
            if frame.grid != grid {
                return Err(HarmonicError::GridMismatch { index, t: frame.t });
            }
        }
        Ok(Self { grid, frames })
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn frames(&self) -> &[RasterFrame] {
        &self.frames
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame timestamps in series order.
    pub fn timestamps(&self) -> Vec<f64> {
        self.frames.iter().map(RasterFrame::t).collect()
    }

    /// Fail with `BandNotFound` unless every frame carries every named band.
    pub fn require_bands<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        for frame in &self.frames {
            for name in names {
                let name = name.as_ref();
                if !frame.has_band(name) {
                    return Err(HarmonicError::band_not_found(name));
                }
            }
        }
        Ok(())
    }

    /// Per-frame references to one band, in series order.
    pub fn band_stack(&self, name: &str) -> Result<Vec<&MaskedGrid<f32>>> {
        self.frames.iter().map(|f| f.band(name)).collect()
    }

    /// Build a new series by transforming every frame.
    pub fn map_frames<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(&RasterFrame) -> Result<RasterFrame>,
    {
        let frames = self.frames.iter().map(f).collect::<Result<Vec<_>>>()?;
        Self::new(frames)
    }
}
