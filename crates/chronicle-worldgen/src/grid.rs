//! Fixed-size row-major 2-D grid.
//!
//! All access goes through bounds-checked accessors; out-of-range
//! coordinates yield `None` (or `false` for writes) rather than panicking.

use serde::{Deserialize, Serialize};

/// A `width x height` grid of cells stored in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

impl<T: Clone> Grid<T> {
    /// Create a grid with every cell set to `fill`.
    pub fn new(width: usize, height: usize, fill: T) -> Self {
        Self {
            width,
            height,
            cells: vec![fill; width.saturating_mul(height)],
        }
    }
}

impl<T> Grid<T> {
    /// Build a grid by evaluating `f(x, y)` for every cell.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut cells = Vec::with_capacity(width.saturating_mul(height));
        for y in 0..height {
            for x in 0..width {
                cells.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            cells,
        }
    }

    /// Number of columns.
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the grid has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Row-major index of `(x, y)`, or `None` when out of bounds.
    pub fn index_of(&self, x: usize, y: usize) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        y.checked_mul(self.width)?.checked_add(x)
    }

    /// Borrow the cell at `(x, y)`.
    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        self.cells.get(self.index_of(x, y)?)
    }

    /// Mutably borrow the cell at `(x, y)`.
    pub fn get_mut(&mut self, x: usize, y: usize) -> Option<&mut T> {
        let index = self.index_of(x, y)?;
        self.cells.get_mut(index)
    }

    /// Overwrite the cell at `(x, y)`. Returns `false` when out of bounds.
    pub fn set(&mut self, x: usize, y: usize, value: T) -> bool {
        self.get_mut(x, y).map(|cell| *cell = value).is_some()
    }

    /// Iterate over `(x, y, &cell)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> + '_ {
        let width = self.width.max(1);
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, cell)| {
                (
                    i.checked_rem(width).unwrap_or(0),
                    i.checked_div(width).unwrap_or(0),
                    cell,
                )
            })
    }

    /// Borrow the raw row-major cell slice.
    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    /// Produce a new grid of the same shape by mapping each cell.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Grid<U> {
        Grid {
            width: self.width,
            height: self.height,
            cells: self.cells.iter().map(f).collect(),
        }
    }

    /// In-bounds neighbours of `(x, y)`; see [`neighbors_within`].
    pub fn neighbors(&self, x: usize, y: usize, diagonal: bool) -> Vec<(usize, usize)> {
        neighbors_within(self.width, self.height, x, y, diagonal)
    }
}

/// Neighbour offsets: the four orthogonal directions, then the diagonals.
pub const NEIGHBOR_OFFSETS: [(isize, isize); 8] = [
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (-1, -1),
    (-1, 1),
    (1, -1),
    (1, 1),
];

/// In-bounds neighbours of `(x, y)` on a `width x height` lattice, in
/// [`NEIGHBOR_OFFSETS`] order. `diagonal = false` keeps only the four
/// orthogonal neighbours.
pub fn neighbors_within(
    width: usize,
    height: usize,
    x: usize,
    y: usize,
    diagonal: bool,
) -> Vec<(usize, usize)> {
    let count = if diagonal { 8 } else { 4 };
    NEIGHBOR_OFFSETS
        .iter()
        .take(count)
        .filter_map(|&(dx, dy)| {
            let nx = x.checked_add_signed(dx)?;
            let ny = y.checked_add_signed(dy)?;
            (nx < width && ny < height).then_some((nx, ny))
        })
        .collect()
}
