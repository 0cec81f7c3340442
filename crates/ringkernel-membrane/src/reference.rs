//! Host reference implementation of the default membrane kernel.
//!
//! [`ReferenceStepper`] runs the same update as
//! [`DEFAULT_MEMBRANE_KERNEL`](crate::kernel::DEFAULT_MEMBRANE_KERNEL) on the
//! CPU. Excitation enters through [`Model::input_excitation`] after each
//! rotation, which lands on the same cell and step as the kernel's
//! excitation-buffer path, so both produce the same samples.

use crate::grid::Grid;
use crate::model::Model;
use crate::physics::MembraneCoefficients;

/// CPU stepper over a [`Model`] and its region grid.
#[derive(Debug, Clone)]
pub struct ReferenceStepper {
    model: Model,
    ids: Grid<i32>,
    boundary: Grid<f32>,
    coefficients: MembraneCoefficients,
}

impl ReferenceStepper {
    /// Create a stepper over a region grid.
    pub fn new(ids: Grid<i32>, boundary_gain: f32, coefficients: MembraneCoefficients) -> Self {
        let model = Model::from_region_grid(&ids, boundary_gain);
        let boundary = model.boundary().clone();
        Self {
            model,
            ids,
            boundary,
            coefficients,
        }
    }

    /// The simulated model.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Mutable model, for positions.
    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    /// Active coefficients.
    pub fn coefficients(&self) -> &MembraneCoefficients {
        &self.coefficients
    }

    /// Replace the coefficients. Applies from the next step.
    pub fn set_coefficients(&mut self, coefficients: MembraneCoefficients) {
        self.coefficients = coefficients;
    }

    /// Zero the field.
    pub fn reset(&mut self) {
        self.model.reset();
    }

    /// Advance one sample and return the listener value.
    pub fn step(&mut self, excitation: f32) -> f32 {
        let width = self.model.width();
        let height = self.model.height();
        let coefficients = self.coefficients;
        let ids = &self.ids;
        let boundary = &self.boundary;

        {
            let (prev, cur, next) = self.model.split_generations();
            for y in 0..height {
                for x in 0..width {
                    let interior = x > 0 && y > 0 && x + 1 < width && y + 1 < height;
                    let params = coefficients.for_region(ids[(x, y)]);

                    next[(x, y)] = match params {
                        Some((lambda, mu)) if interior => {
                            let p_curr = cur[(x, y)];
                            let p_prev = prev[(x, y)];
                            let laplacian = cur[(x, y - 1)]
                                + cur[(x, y + 1)]
                                + cur[(x - 1, y)]
                                + cur[(x + 1, y)]
                                - 4.0 * p_curr;
                            let value = (2.0 * p_curr - (1.0 - mu) * p_prev
                                + lambda * laplacian)
                                / (1.0 + mu);
                            value * (1.0 - boundary[(x, y)])
                        }
                        _ => 0.0,
                    };
                }
            }
        }

        self.model.rotate_generations();
        self.model.input_excitation(excitation);
        self.model.get_sample()
    }

    /// Render a block. `output` receives `excitation.len()` samples; any
    /// extra output slots are left untouched.
    pub fn render(&mut self, excitation: &[f32], output: &mut [f32]) {
        for (sample, &input) in output.iter_mut().zip(excitation) {
            *sample = self.step(input);
        }
    }

    /// Sum of squared pressures in the current generation.
    pub fn energy(&self) -> f32 {
        self.model.current().as_slice().iter().map(|p| p * p).sum()
    }
}
