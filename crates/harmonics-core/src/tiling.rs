//! Spatial tiling, dispatch and cancellation.
//!
//! The grid is cut into square tiles (edge tiles clipped). Each tile is an
//! independent unit of work; results are merged back by position, so the
//! dispatch order never affects the output.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "threading")]
use rayon::iter::ParallelIterator;
use tracing::debug;

use crate::error::{HarmonicError, Result};
use crate::grid::{MaskedGrid, Sample};
use crate::parallel::iter_maybe_parallel;

/// A rectangular window of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    /// Position in the layout's row-major tile order.
    pub index: usize,
    pub row0: usize,
    pub col0: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Tile {
    /// Number of cells covered.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat indices into the full grid, row-major within the tile.
    pub fn grid_indices(&self, grid_width: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.rows).flat_map(move |r| {
            let start = (self.row0 + r) * grid_width + self.col0;
            start..start + self.cols
        })
    }
}

/// Row-major partition of a `width × height` grid into tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLayout {
    pub width: usize,
    pub height: usize,
    pub tile_size: usize,
    tiles: Vec<Tile>,
}

impl TileLayout {
    pub fn new(width: usize, height: usize, tile_size: usize) -> Result<Self> {
        if tile_size == 0 {
            return Err(HarmonicError::Config("tile_size must be at least 1".into()));
        }
        let mut tiles = Vec::new();
        for row0 in (0..height).step_by(tile_size) {
            for col0 in (0..width).step_by(tile_size) {
                tiles.push(Tile {
                    index: tiles.len(),
                    row0,
                    col0,
                    rows: tile_size.min(height - row0),
                    cols: tile_size.min(width - col0),
                });
            }
        }
        Ok(Self {
            width,
            height,
            tile_size,
            tiles,
        })
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Shared abort flag, polled before each tile is dispatched.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run `work` on every tile of `layout`.
///
/// Results come back in tile order. If `cancel` fires, tiles not yet started
/// are skipped and everything already computed is dropped.
pub fn dispatch<R, F>(layout: &TileLayout, cancel: &CancelToken, work: F) -> Result<Vec<(Tile, R)>>
where
    R: Send,
    F: Fn(&Tile) -> R + Sync + Send,
{
    let total = layout.len();
    let results: Vec<Option<(Tile, R)>> = iter_maybe_parallel!(layout.tiles().to_vec())
        .map(|tile| {
            if cancel.is_cancelled() {
                None
            } else {
                Some((tile, work(&tile)))
            }
        })
        .collect();

    let completed = results.iter().filter(|r| r.is_some()).count();
    if completed < total {
        debug!(completed, total, "tile dispatch cancelled");
        return Err(HarmonicError::Cancelled { completed, total });
    }
    Ok(results.into_iter().flatten().collect())
}

/// Paste per-tile grids into one `width × height` grid.
///
/// Each cell is written by exactly one tile, so any ordering of `parts`
/// produces the same grid. Cells covered by no part stay masked.
pub fn merge_tiles<T: Sample>(
    width: usize,
    height: usize,
    parts: impl IntoIterator<Item = (Tile, MaskedGrid<T>)>,
) -> MaskedGrid<T> {
    let mut out = MaskedGrid::masked(width, height);
    for (tile, grid) in parts {
        out.blit(tile.row0, tile.col0, &grid);
    }
    out
}
