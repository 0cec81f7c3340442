//! # RingKernel Membrane
//!
//! GPU-resident FDTD membrane synthesizer.
//!
//! A 2D region grid describes a vibrating surface. The pressure field lives
//! on the compute device as three generations (previous, current, next) that
//! rotate every sample. A user-supplied WGSL kernel advances the field by one
//! step per dispatch and writes the listener cell into a block-sized output
//! buffer, which is read back once per audio block.
//!
//! ```text
//! excitation block -> [kernel x N samples, generations rotate] -> output block
//!                            |
//!                     named coefficients (uniforms, updatable per step)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use ringkernel_membrane::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut engine = Engine::initialize(EngineConfig::default()).await?;
//!     engine.create_model("models/plate.json", 1.0, (8, 16), (40, 20)).await?;
//!
//!     let mut exciter = WavetableExciter::sine(44_100);
//!     exciter.trigger();
//!
//!     let mut excitation = vec![0.0; 512];
//!     let mut output = vec![0.0; 512];
//!     exciter.fill(&mut excitation);
//!     engine.fill_block(&excitation, &mut output)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod config;
pub mod description;
pub mod device;
pub mod engine;
pub mod error;
pub mod exciter;
pub mod grid;
pub mod kernel;
pub mod model;
pub mod physics;
pub mod playback;
pub mod reference;
pub mod stats;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::buffer::StreamingBuffer;
    pub use crate::config::EngineConfig;
    pub use crate::description::{Controller, ModelDescription};
    pub use crate::device::{DeviceClass, DevicePreference, GpuVendor};
    pub use crate::engine::{Engine, EngineState, FieldRenderer, FieldSnapshot};
    pub use crate::error::{EngineError, Result};
    pub use crate::exciter::{WavetableExciter, WavetableOscillator};
    pub use crate::grid::Grid;
    pub use crate::kernel::{KernelLayout, DEFAULT_MEMBRANE_KERNEL};
    pub use crate::model::Model;
    pub use crate::physics::MembraneCoefficients;
    pub use crate::playback::Playback;
    pub use crate::reference::ReferenceStepper;
    pub use crate::stats::BlockStats;
}

// Re-exports
pub use buffer::StreamingBuffer;
pub use config::EngineConfig;
pub use description::ModelDescription;
pub use device::{DeviceClass, DevicePreference, GpuVendor};
pub use engine::{Engine, EngineState, FieldRenderer, FieldSnapshot};
pub use error::{EngineError, Result};
pub use exciter::WavetableExciter;
pub use grid::Grid;
pub use kernel::DEFAULT_MEMBRANE_KERNEL;
pub use model::Model;
pub use physics::MembraneCoefficients;
pub use reference::ReferenceStepper;
pub use stats::BlockStats;
