use serde::{Deserialize, Serialize};

use crate::error::{HarmonicError, Result};

/// Spatial grid shared by every frame of a series: size, CRS and bounds.
/// Two frames are compatible exactly when their `GridSpec`s compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    /// Coordinate reference system identifier, e.g. `EPSG:4326`.
    pub crs: String,
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl GridSpec {
    pub fn new(
        width: usize,
        height: usize,
        crs: impl Into<String>,
        min_lon: f64,
        max_lon: f64,
        min_lat: f64,
        max_lat: f64,
    ) -> Self {
        Self {
            width,
            height,
            crs: crs.into(),
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        }
    }

    /// Global EPSG:4326 grid of the given size.
    pub fn global(width: usize, height: usize) -> Self {
        Self::new(width, height, "EPSG:4326", -180.0, 180.0, -90.0, 90.0)
    }

    /// Number of cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Centre of cell `(row, col)` as `(lon, lat)`. Row 0 is the northern edge.
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let dx = (self.max_lon - self.min_lon) / self.width.max(1) as f64;
        let dy = (self.max_lat - self.min_lat) / self.height.max(1) as f64;
        (
            self.min_lon + (col as f64 + 0.5) * dx,
            self.max_lat - (row as f64 + 0.5) * dy,
        )
    }
}

/// Scalar types a masked grid can hold.
///
/// Output cells whose value is not finite are masked, so NaN and infinities
/// never escape as valid data.
pub trait Sample: Copy + Default + PartialEq + Send + Sync + 'static {
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
    fn is_finite_sample(self) -> bool;
}

impl Sample for f32 {
    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }
    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    #[inline]
    fn is_finite_sample(self) -> bool {
        self.is_finite()
    }
}

impl Sample for f64 {
    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }
    #[inline]
    fn is_finite_sample(self) -> bool {
        self.is_finite()
    }
}

/// Row-major 2-D array with a per-cell validity mask.
///
/// Masked cells always store `T::default()`, so two grids with the same valid
/// cells compare equal regardless of how they were produced. Every element-wise
/// operation masks its output where any input is masked or the result is not
/// finite; the rest of the crate builds on `map` and `zip_map` only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaskedGrid<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
    valid: Vec<bool>,
}

impl<T: Sample> MaskedGrid<T> {
    /// Grid with every cell valid and set to `fill`.
    pub fn filled(width: usize, height: usize, fill: T) -> Self {
        let n = width * height;
        let ok = fill.is_finite_sample();
        Self {
            width,
            height,
            data: vec![if ok { fill } else { T::default() }; n],
            valid: vec![ok; n],
        }
    }

    /// Grid with every cell masked.
    pub fn masked(width: usize, height: usize) -> Self {
        let n = width * height;
        Self {
            width,
            height,
            data: vec![T::default(); n],
            valid: vec![false; n],
        }
    }

    /// Build from row-major values; non-finite values become masked cells.
    pub fn from_values(width: usize, height: usize, data: Vec<T>) -> Result<Self> {
        Self::from_options(width, height, data.into_iter().map(Some).collect())
    }

    /// Build from row-major optional values; `None` is a masked cell.
    pub fn from_options(width: usize, height: usize, cells: Vec<Option<T>>) -> Result<Self> {
        if cells.len() != width * height {
            return Err(HarmonicError::shape("grid cells", width * height, cells.len()));
        }
        let mut grid = Self::masked(width, height);
        for (i, cell) in cells.into_iter().enumerate() {
            grid.put(i, cell);
        }
        Ok(grid)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this grid has the size of `grid`.
    pub fn fits(&self, grid: &GridSpec) -> bool {
        self.width == grid.width && self.height == grid.height
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        self.at(row * self.width + col)
    }

    /// Value at a flat row-major index, `None` when masked.
    #[inline]
    pub fn at(&self, idx: usize) -> Option<T> {
        if self.valid[idx] {
            Some(self.data[idx])
        } else {
            None
        }
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: T) {
        let idx = row * self.width + col;
        self.put(idx, Some(val));
    }

    #[inline]
    pub fn mask(&mut self, row: usize, col: usize) {
        let idx = row * self.width + col;
        self.put(idx, None);
    }

    /// Write a cell at a flat index; `None` or a non-finite value masks it.
    #[inline]
    pub fn put(&mut self, idx: usize, cell: Option<T>) {
        match cell {
            Some(v) if v.is_finite_sample() => {
                self.data[idx] = v;
                self.valid[idx] = true;
            }
            _ => {
                self.data[idx] = T::default();
                self.valid[idx] = false;
            }
        }
    }

    #[inline]
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.valid[row * self.width + col]
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Raw row-major values; masked cells hold `T::default()`.
    pub fn values(&self) -> &[T] {
        &self.data
    }

    /// Row-major validity flags.
    pub fn validity(&self) -> &[bool] {
        &self.valid
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<T>> + '_ {
        (0..self.len()).map(move |i| self.at(i))
    }

    pub fn map<U: Sample>(&self, f: impl Fn(T) -> U) -> MaskedGrid<U> {
        let mut out = MaskedGrid::masked(self.width, self.height);
        for i in 0..self.len() {
            out.put(i, self.at(i).map(&f));
        }
        out
    }

    /// Combine two grids cell by cell; masked where either input is masked.
    pub fn zip_map<U: Sample, V: Sample>(
        &self,
        other: &MaskedGrid<U>,
        f: impl Fn(T, U) -> V,
    ) -> Result<MaskedGrid<V>> {
        if self.width != other.width || self.height != other.height {
            return Err(HarmonicError::shape("paired grid", self.len(), other.len()));
        }
        let mut out = MaskedGrid::masked(self.width, self.height);
        for i in 0..self.len() {
            let cell = match (self.at(i), other.at(i)) {
                (Some(a), Some(b)) => Some(f(a, b)),
                _ => None,
            };
            out.put(i, cell);
        }
        Ok(out)
    }

    /// Convert precision; values that overflow the target type become masked.
    pub fn cast<U: Sample>(&self) -> MaskedGrid<U> {
        self.map(|v| U::from_f64(v.to_f64()))
    }

    /// Copy `src` into this grid with its top-left corner at `(row0, col0)`.
    pub fn blit(&mut self, row0: usize, col0: usize, src: &MaskedGrid<T>) {
        for r in 0..src.height {
            let dst = (row0 + r) * self.width + col0;
            let from = r * src.width;
            self.data[dst..dst + src.width].copy_from_slice(&src.data[from..from + src.width]);
            self.valid[dst..dst + src.width].copy_from_slice(&src.valid[from..from + src.width]);
        }
    }

    /// Mean of the valid cells, `None` when every cell is masked.
    pub fn mean(&self) -> Option<f64> {
        let (sum, n) = self
            .iter()
            .flatten()
            .fold((0.0f64, 0usize), |(s, n), v| (s + v.to_f64(), n + 1));
        (n > 0).then(|| sum / n as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.iter().flatten().map(Sample::to_f64).reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.iter().flatten().map(Sample::to_f64).reduce(f64::max)
    }
}
