//! Host-side membrane model: three pressure generations and a boundary grid.
//!
//! The three generation grids never move. Their roles are derived from a
//! rotation index `r`: previous = `r`, current = `(r + 1) % 3`,
//! next = `(r + 2) % 3`. The device generation buffer uses the same
//! labelling, so the engine's rotation index and [`Model::rotation`] agree
//! after every step.

use crate::error::{EngineError, Result};
use crate::grid::Grid;

/// Role a generation plays at the current rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationRole {
    /// Read-only input from two steps back.
    Previous,
    /// The latest computed field.
    Current,
    /// Write target of the next update.
    Next,
}

/// Generation index holding `role` at rotation `rotation`.
#[inline]
pub fn generation_for(role: GenerationRole, rotation: u32) -> usize {
    let offset = match role {
        GenerationRole::Previous => 0,
        GenerationRole::Current => 1,
        GenerationRole::Next => 2,
    };
    ((rotation + offset) % 3) as usize
}

/// Triple-buffered pressure field with boundary gains, one excitation cell and
/// one or more listener cells.
#[derive(Debug, Clone)]
pub struct Model {
    width: u32,
    height: u32,
    generations: [Grid<f32>; 3],
    boundary: Grid<f32>,
    rotation: u32,
    input_position: usize,
    output_positions: Vec<usize>,
}

impl Model {
    /// Create a zeroed model whose boundary grid marks the outer ring of the
    /// rectangle with `boundary_gain`.
    pub fn new(width: u32, height: u32, boundary_gain: f32) -> Self {
        let mut boundary = Grid::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if is_edge_cell(x, y, width, height) {
                    boundary[(x, y)] = boundary_gain;
                }
            }
        }

        Self {
            width,
            height,
            generations: [
                Grid::new(width, height),
                Grid::new(width, height),
                Grid::new(width, height),
            ],
            boundary,
            rotation: 0,
            input_position: 0,
            output_positions: vec![0],
        }
    }

    /// Create a model sized to `ids` and classify its boundary from the
    /// region grid.
    pub fn from_region_grid(ids: &Grid<i32>, boundary_gain: f32) -> Self {
        let mut model = Self::new(ids.width(), ids.height(), boundary_gain);
        model.build_boundary(ids, boundary_gain);
        model
    }

    /// Reclassify the boundary grid from a region grid.
    ///
    /// Interior cells are boundary when their id is positive and any
    /// 4-connected neighbour has id 0. Cells on the outer ring have no full
    /// neighbourhood and are boundary whenever their id is positive. Cells
    /// with id 0 are never boundary.
    ///
    /// `ids` must have the model's dimensions; a mismatched grid leaves the
    /// boundary untouched.
    pub fn build_boundary(&mut self, ids: &Grid<i32>, boundary_gain: f32) {
        if ids.width() != self.width || ids.height() != self.height {
            return;
        }

        for y in 0..self.height {
            for x in 0..self.width {
                let id = ids[(x, y)];
                let marked = if id <= 0 {
                    false
                } else if is_edge_cell(x, y, self.width, self.height) {
                    true
                } else {
                    ids[(x - 1, y)] == 0
                        || ids[(x + 1, y)] == 0
                        || ids[(x, y - 1)] == 0
                        || ids[(x, y + 1)] == 0
                };
                self.boundary[(x, y)] = if marked { boundary_gain } else { 0.0 };
            }
        }
    }

    /// Model width in cells.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Model height in cells.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Cells per generation.
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Current rotation index in `0..3`.
    pub fn rotation(&self) -> u32 {
        self.rotation
    }

    /// Generation index currently holding `role`.
    pub fn generation_index(&self, role: GenerationRole) -> usize {
        generation_for(role, self.rotation)
    }

    fn position_index(&self, x: u32, y: u32) -> Result<usize> {
        if x >= self.width || y >= self.height {
            return Err(EngineError::PositionOutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        Ok(y as usize * self.width as usize + x as usize)
    }

    /// Set the excitation cell. Out-of-range coordinates are rejected and the
    /// previous position is kept.
    pub fn set_input_position(&mut self, x: u32, y: u32) -> Result<()> {
        self.input_position = self.position_index(x, y)?;
        Ok(())
    }

    /// Replace every listener with a single cell. Out-of-range coordinates
    /// are rejected and the previous listeners are kept.
    pub fn set_output_position(&mut self, x: u32, y: u32) -> Result<()> {
        let idx = self.position_index(x, y)?;
        self.output_positions.clear();
        self.output_positions.push(idx);
        Ok(())
    }

    /// Add a listener cell. Listener samples are summed; adding a cell that
    /// already listens has no effect.
    pub fn add_output_position(&mut self, x: u32, y: u32) -> Result<()> {
        let idx = self.position_index(x, y)?;
        if !self.output_positions.contains(&idx) {
            self.output_positions.push(idx);
        }
        Ok(())
    }

    /// Replace every listener with `positions`. The whole list is validated
    /// before anything changes; an empty list is rejected.
    pub fn set_output_positions(&mut self, positions: &[(u32, u32)]) -> Result<()> {
        if positions.is_empty() {
            return Err(EngineError::model("at least one listener position is required"));
        }
        let mut indices = Vec::with_capacity(positions.len());
        for &(x, y) in positions {
            let idx = self.position_index(x, y)?;
            if !indices.contains(&idx) {
                indices.push(idx);
            }
        }
        self.output_positions = indices;
        Ok(())
    }

    /// Flattened excitation cell index.
    pub fn input_position(&self) -> usize {
        self.input_position
    }

    /// Flattened index of the first listener cell.
    pub fn output_position(&self) -> usize {
        self.output_positions[0]
    }

    /// Flattened indices of every listener cell, in insertion order.
    pub fn output_positions(&self) -> &[usize] {
        &self.output_positions
    }

    /// Listener mask as uploaded to the device: 1 at listener cells, 0
    /// elsewhere.
    pub fn output_mask(&self) -> Vec<i32> {
        let mut mask = vec![0; self.cell_count()];
        for &idx in &self.output_positions {
            mask[idx] = 1;
        }
        mask
    }

    /// Sum of the current generation over the listener cells.
    pub fn get_sample(&self) -> f32 {
        let current = self.current();
        self.output_positions.iter().map(|&idx| current[idx]).sum()
    }

    /// Add `value` to the current generation at the excitation cell.
    /// Repeated calls within one step accumulate.
    pub fn input_excitation(&mut self, value: f32) {
        let idx = self.input_position;
        self.current_mut()[idx] += value;
    }

    /// Advance roles: previous becomes next, current becomes previous, next
    /// becomes current. No data moves.
    pub fn rotate_generations(&mut self) {
        self.rotation = (self.rotation + 1) % 3;
    }

    /// Generation read as the field two steps back.
    pub fn previous(&self) -> &Grid<f32> {
        &self.generations[self.generation_index(GenerationRole::Previous)]
    }

    /// Latest computed field.
    pub fn current(&self) -> &Grid<f32> {
        &self.generations[self.generation_index(GenerationRole::Current)]
    }

    /// Write target of the next update.
    pub fn next(&self) -> &Grid<f32> {
        &self.generations[self.generation_index(GenerationRole::Next)]
    }

    /// Mutable previous generation.
    pub fn previous_mut(&mut self) -> &mut Grid<f32> {
        let idx = self.generation_index(GenerationRole::Previous);
        &mut self.generations[idx]
    }

    /// Mutable current generation.
    pub fn current_mut(&mut self) -> &mut Grid<f32> {
        let idx = self.generation_index(GenerationRole::Current);
        &mut self.generations[idx]
    }

    /// Mutable next generation.
    pub fn next_mut(&mut self) -> &mut Grid<f32> {
        let idx = self.generation_index(GenerationRole::Next);
        &mut self.generations[idx]
    }

    /// Borrow all three generations split by role: `(previous, current, next)`.
    pub fn split_generations(&mut self) -> (&Grid<f32>, &Grid<f32>, &mut Grid<f32>) {
        let [g0, g1, g2] = &mut self.generations;
        let mut slots: [Option<&mut Grid<f32>>; 3] = [Some(g0), Some(g1), Some(g2)];
        let prev_idx = generation_for(GenerationRole::Previous, self.rotation);
        let cur_idx = generation_for(GenerationRole::Current, self.rotation);
        let next_idx = generation_for(GenerationRole::Next, self.rotation);
        // The three indices are a permutation of 0..3, so each slot is taken once.
        match (
            slots[prev_idx].take(),
            slots[cur_idx].take(),
            slots[next_idx].take(),
        ) {
            (Some(prev), Some(cur), Some(next)) => (&*prev, &*cur, next),
            _ => unreachable!("generation roles are a permutation"),
        }
    }

    /// Boundary gain per cell.
    pub fn boundary(&self) -> &Grid<f32> {
        &self.boundary
    }

    /// Zero all three generations and the rotation. Boundary and positions
    /// are kept.
    pub fn reset(&mut self) {
        for generation in &mut self.generations {
            generation.clear();
        }
        self.rotation = 0;
    }
}

fn is_edge_cell(x: u32, y: u32, width: u32, height: u32) -> bool {
    x == 0 || y == 0 || x + 1 == width || y + 1 == height
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids_from_rows(rows: &[&[i32]]) -> Grid<i32> {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        let cells = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Grid::from_vec(width, height, cells).unwrap()
    }

    #[test]
    fn test_rectangular_edge_ring() {
        let model = Model::new(4, 3, 1.0);
        let b = model.boundary();
        assert_eq!(b[(0, 0)], 1.0);
        assert_eq!(b[(3, 2)], 1.0);
        assert_eq!(b[(0, 1)], 1.0);
        assert_eq!(b[(1, 1)], 0.0);
        assert_eq!(b[(2, 1)], 0.0);
    }

    #[test]
    fn test_single_cell_region_boundary() {
        let ids = ids_from_rows(&[&[0, 0, 0], &[0, 1, 0], &[0, 0, 0]]);
        let model = Model::from_region_grid(&ids, 0.5);

        let expected = [0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(model.boundary().as_slice(), &expected);
    }

    #[test]
    fn test_region_interior_not_boundary() {
        let ids = ids_from_rows(&[
            &[0, 0, 0, 0, 0],
            &[0, 1, 1, 1, 0],
            &[0, 1, 1, 1, 0],
            &[0, 1, 1, 1, 0],
            &[0, 0, 0, 0, 0],
        ]);
        let model = Model::from_region_grid(&ids, 1.0);
        let b = model.boundary();

        assert_eq!(b[(2, 2)], 0.0);
        assert_eq!(b[(1, 1)], 1.0);
        assert_eq!(b[(2, 1)], 1.0);
        assert_eq!(b[(3, 3)], 1.0);
        assert_eq!(b[(0, 0)], 0.0);
    }

    #[test]
    fn test_region_touching_array_edge() {
        let ids = ids_from_rows(&[&[1, 1, 1], &[1, 1, 1], &[1, 1, 1]]);
        let model = Model::from_region_grid(&ids, 0.25);
        let b = model.boundary();

        assert_eq!(b[(1, 1)], 0.0);
        assert_eq!(b[(0, 1)], 0.25);
        assert_eq!(b[(2, 2)], 0.25);
    }

    #[test]
    fn test_three_rotations_restore_roles() {
        let mut model = Model::new(3, 3, 0.0);
        let before = (
            model.generation_index(GenerationRole::Previous),
            model.generation_index(GenerationRole::Current),
            model.generation_index(GenerationRole::Next),
        );
        for _ in 0..3 {
            model.rotate_generations();
        }
        let after = (
            model.generation_index(GenerationRole::Previous),
            model.generation_index(GenerationRole::Current),
            model.generation_index(GenerationRole::Next),
        );
        assert_eq!(before, after);
        assert_eq!(model.rotation(), 0);
    }

    #[test]
    fn test_rotation_moves_labels() {
        let mut model = Model::new(2, 2, 0.0);
        model.next_mut()[0] = 3.0;
        model.current_mut()[0] = 2.0;
        model.previous_mut()[0] = 1.0;

        model.rotate_generations();

        assert_eq!(model.current()[0], 3.0);
        assert_eq!(model.previous()[0], 2.0);
        assert_eq!(model.next()[0], 1.0);
    }

    #[test]
    fn test_excitation_accumulates() {
        let mut model = Model::new(4, 4, 0.0);
        model.set_input_position(2, 1).unwrap();
        model.set_output_position(2, 1).unwrap();

        model.input_excitation(0.25);
        model.input_excitation(0.5);

        assert_eq!(model.get_sample(), 0.75);
        assert_eq!(model.current()[(2, 1)], 0.75);
    }

    #[test]
    fn test_out_of_range_position_rejected() {
        let mut model = Model::new(4, 4, 0.0);
        model.set_output_position(3, 3).unwrap();

        let err = model.set_output_position(4, 0).unwrap_err();
        assert!(matches!(
            err,
            EngineError::PositionOutOfBounds { x: 4, y: 0, width: 4, height: 4 }
        ));
        assert_eq!(model.output_position(), 15);
        assert!(model.set_input_position(0, 9).is_err());
        assert_eq!(model.input_position(), 0);
    }

    #[test]
    fn test_split_generations_matches_roles() {
        let mut model = Model::new(2, 1, 0.0);
        model.rotate_generations();
        model.previous_mut()[0] = 1.0;
        model.current_mut()[0] = 2.0;

        let (prev, cur, next) = model.split_generations();
        assert_eq!(prev[0], 1.0);
        assert_eq!(cur[0], 2.0);
        next[0] = 9.0;

        assert_eq!(model.next()[0], 9.0);
    }

    #[test]
    fn test_reset_keeps_boundary_and_positions() {
        let mut model = Model::new(3, 3, 1.0);
        model.set_input_position(1, 1).unwrap();
        model.input_excitation(1.0);
        model.rotate_generations();

        model.reset();

        assert_eq!(model.rotation(), 0);
        assert!(model.current().as_slice().iter().all(|&v| v == 0.0));
        assert_eq!(model.input_position(), 4);
        assert_eq!(model.boundary()[(0, 0)], 1.0);
    }

    #[test]
    fn test_listeners_sum() {
        let mut model = Model::new(4, 4, 0.0);
        model.current_mut()[(1, 1)] = 0.25;
        model.current_mut()[(2, 2)] = 0.5;

        model.set_output_position(1, 1).unwrap();
        model.add_output_position(2, 2).unwrap();
        model.add_output_position(2, 2).unwrap();

        assert_eq!(model.output_positions(), &[5, 10]);
        assert_eq!(model.output_position(), 5);
        assert_eq!(model.get_sample(), 0.75);

        let mask = model.output_mask();
        assert_eq!(mask.iter().sum::<i32>(), 2);
        assert_eq!(mask[5], 1);
        assert_eq!(mask[10], 1);

        model.set_output_position(2, 2).unwrap();
        assert_eq!(model.output_positions(), &[10]);
        assert_eq!(model.get_sample(), 0.5);
    }

    #[test]
    fn test_listener_list_validated_first() {
        let mut model = Model::new(4, 4, 0.0);
        model.set_output_positions(&[(0, 1), (3, 3)]).unwrap();
        assert_eq!(model.output_positions(), &[4, 15]);

        assert!(matches!(
            model.set_output_positions(&[(1, 1), (4, 0)]),
            Err(EngineError::PositionOutOfBounds { x: 4, .. })
        ));
        assert!(matches!(
            model.set_output_positions(&[]),
            Err(EngineError::ModelLoad(_))
        ));
        assert!(model.add_output_position(0, 9).is_err());
        assert_eq!(model.output_positions(), &[4, 15]);
    }
}
