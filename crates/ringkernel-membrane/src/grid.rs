//! Dense 2D grid storage.
//!
//! Cells are stored row-major in a single owned vector, so a grid can be
//! uploaded to the device as one contiguous slice.

use std::ops::{Index, IndexMut};

/// Fixed-size 2D array with row-major flattened indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    width: u32,
    height: u32,
    cells: Vec<T>,
}

impl<T: Clone + Default> Grid<T> {
    /// Create a grid filled with `T::default()`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![T::default(); width as usize * height as usize],
        }
    }

    /// Set every cell to `T::default()`.
    pub fn clear(&mut self) {
        self.fill(T::default());
    }
}

impl<T: Clone> Grid<T> {
    /// Set every cell to `value`.
    pub fn fill(&mut self, value: T) {
        self.cells.fill(value);
    }
}

impl<T> Grid<T> {
    /// Wrap existing row-major data. Returns `None` if the length does not
    /// match `width * height`.
    pub fn from_vec(width: u32, height: u32, cells: Vec<T>) -> Option<Self> {
        if cells.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            cells,
        })
    }

    /// Grid width in cells.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in cells.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Total cell count.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the grid has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Flattened index of `(x, y)`. No range check.
    #[inline]
    pub fn index_at(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Whether `(x, y)` lies inside the grid.
    #[inline]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    /// Bounds-checked cell access.
    pub fn get(&self, x: u32, y: u32) -> Option<&T> {
        if self.contains(x, y) {
            self.cells.get(self.index_at(x, y))
        } else {
            None
        }
    }

    /// Bounds-checked mutable cell access.
    pub fn get_mut(&mut self, x: u32, y: u32) -> Option<&mut T> {
        if self.contains(x, y) {
            let idx = self.index_at(x, y);
            self.cells.get_mut(idx)
        } else {
            None
        }
    }

    /// Row-major cell storage.
    pub fn as_slice(&self) -> &[T] {
        &self.cells
    }

    /// Mutable row-major cell storage.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.cells
    }

    /// Iterate over `(x, y, &cell)`.
    pub fn iter_cells(&self) -> impl Iterator<Item = (u32, u32, &T)> {
        let width = self.width.max(1);
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, cell)| ((i as u32) % width, (i as u32) / width, cell))
    }
}

impl<T> Index<usize> for Grid<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.cells[index]
    }
}

impl<T> IndexMut<usize> for Grid<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.cells[index]
    }
}

impl<T> Index<(u32, u32)> for Grid<T> {
    type Output = T;

    fn index(&self, (x, y): (u32, u32)) -> &T {
        &self.cells[self.index_at(x, y)]
    }
}

impl<T> IndexMut<(u32, u32)> for Grid<T> {
    fn index_mut(&mut self, (x, y): (u32, u32)) -> &mut T {
        let idx = self.index_at(x, y);
        &mut self.cells[idx]
    }
}
