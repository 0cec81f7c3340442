//! Error types for the membrane engine.

use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineState;

/// Result type for membrane engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while building or driving the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No compute device matched the preference, or the device request failed.
    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    /// Kernel compilation or validation failed.
    #[error("Kernel build failed:\n{diagnostics}")]
    KernelBuild {
        /// Full compiler output.
        diagnostics: String,
    },

    /// The model description is missing or malformed.
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// A dispatch or transfer reported an error at run time.
    #[error("Device runtime error: {0}")]
    DeviceRuntime(String),

    /// A blocking device wait exceeded the configured bound.
    #[error("Device did not complete within {0:?}")]
    DeviceTimeout(Duration),

    /// Operation called in the wrong lifecycle state.
    #[error("Invalid engine state: expected {expected:?}, engine is {actual:?}")]
    InvalidState {
        /// Minimum state the operation needs.
        expected: EngineState,
        /// State the engine is in.
        actual: EngineState,
    },

    /// Grid coordinates outside the model.
    #[error("Position ({x}, {y}) is outside the {width}x{height} model")]
    PositionOutOfBounds {
        /// Requested column.
        x: u32,
        /// Requested row.
        y: u32,
        /// Model width.
        width: u32,
        /// Model height.
        height: u32,
    },

    /// Block larger than the configured capacity.
    #[error("Block of {requested} samples exceeds capacity {capacity}")]
    BlockTooLarge {
        /// Requested block length.
        requested: usize,
        /// Configured block capacity.
        capacity: usize,
    },

    /// Excitation and output block lengths disagree.
    #[error("Block length mismatch: {excitation} excitation samples, {output} output samples")]
    BlockLengthMismatch {
        /// Excitation block length.
        excitation: usize,
        /// Output block length.
        output: usize,
    },

    /// `step()` called with the block cursor already at capacity.
    #[error("Block cursor overrun (capacity {capacity})")]
    BlockOverrun {
        /// Configured block capacity.
        capacity: usize,
    },

    /// Coefficient name not declared by the compiled kernel.
    #[error("Unknown coefficient: {0}")]
    UnknownCoefficient(String),

    /// Coefficient slot not declared by the compiled kernel.
    #[error("Kernel declares no coefficient at slot {0}")]
    UnknownSlot(u32),

    /// Slot belongs to the fixed kernel arguments.
    #[error("Slot {0} is reserved for a fixed kernel argument")]
    ReservedSlot(u32),

    /// WAV encoding error.
    #[error("WAV error: {0}")]
    Wav(String),

    /// Audio output device error.
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create an initialization error.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::EngineInit(msg.into())
    }

    /// Create a kernel build error carrying compiler diagnostics.
    pub fn kernel(diagnostics: impl Into<String>) -> Self {
        Self::KernelBuild {
            diagnostics: diagnostics.into(),
        }
    }

    /// Create a model load error.
    pub fn model(msg: impl Into<String>) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a device runtime error.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::DeviceRuntime(msg.into())
    }

    /// Create a WAV error.
    pub fn wav(msg: impl Into<String>) -> Self {
        Self::Wav(msg.into())
    }

    /// Create an audio device error.
    pub fn audio_device(msg: impl Into<String>) -> Self {
        Self::AudioDevice(msg.into())
    }

    /// Whether the audio path may keep running after this error by
    /// substituting silence for the failed block.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DeviceRuntime(_) | Self::DeviceTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_error_carries_diagnostics() {
        let err = EngineError::kernel("error: expected ';'\n  --> 3:14");
        let text = err.to_string();
        assert!(text.contains("expected ';'"));
        assert!(text.contains("3:14"));
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(EngineError::device("lost").is_recoverable());
        assert!(EngineError::DeviceTimeout(Duration::from_millis(5)).is_recoverable());
        assert!(!EngineError::model("bad").is_recoverable());
        assert!(!EngineError::kernel("bad").is_recoverable());
    }
}
