//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DevicePreference;

/// Default number of samples per audio block.
pub const DEFAULT_BLOCK_CAPACITY: usize = 1024;

/// Default output sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default entry point looked up in compiled kernels.
pub const DEFAULT_ENTRY_POINT: &str = "fdtd_kernel";

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum samples per `fill_block` call. Sizes the excitation and
    /// output staging buffers.
    pub block_capacity: usize,
    /// Output sample rate, used for the real-time budget of a block.
    pub sample_rate: u32,
    /// Upper bound on any blocking device wait, in milliseconds.
    pub device_timeout_ms: u64,
    /// Kernel entry point name.
    pub entry_point: String,
    /// Adapter classes to try, in order.
    pub device_preference: DevicePreference,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            sample_rate: DEFAULT_SAMPLE_RATE,
            device_timeout_ms: 1000,
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            device_preference: DevicePreference::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the block capacity.
    pub fn with_block_capacity(mut self, capacity: usize) -> Self {
        self.block_capacity = capacity.max(1);
        self
    }

    /// Set the sample rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the device wait bound.
    pub fn with_device_timeout(mut self, timeout: Duration) -> Self {
        self.device_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    /// Set the kernel entry point.
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    /// Set the adapter preference.
    pub fn with_device_preference(mut self, preference: DevicePreference) -> Self {
        self.device_preference = preference;
        self
    }

    /// Bound on blocking device waits.
    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    /// Wall-clock budget for a block of `samples` at the configured rate.
    pub fn block_budget(&self, samples: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(samples as f64 / self.sample_rate as f64)
    }
}
