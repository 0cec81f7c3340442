//! Wavetable excitation source.
//!
//! A table oscillator with linear interpolation, gated to a fixed burst
//! length after each trigger.

use std::f32::consts::TAU;

/// Default burst frequency in Hz.
pub const DEFAULT_FREQUENCY: f32 = 1440.0;

/// Default burst length in milliseconds.
pub const DEFAULT_DURATION_MS: u32 = 10;

/// Table oscillator with linear interpolation between entries.
#[derive(Debug, Clone)]
pub struct WavetableOscillator {
    table: Vec<f32>,
    phase: f32,
    delta: f32,
}

impl WavetableOscillator {
    /// Create an oscillator over `table`. An empty table yields silence.
    pub fn new(table: Vec<f32>) -> Self {
        Self {
            table,
            phase: 0.0,
            delta: 0.0,
        }
    }

    /// One cycle of a sine wave sampled at `size` points.
    pub fn sine(size: usize) -> Self {
        let table = (0..size)
            .map(|i| (TAU * i as f32 / size as f32).sin())
            .collect();
        Self::new(table)
    }

    /// Set the playback frequency.
    pub fn set_frequency(&mut self, frequency: f32, sample_rate: f32) {
        if sample_rate > 0.0 {
            self.delta = frequency * self.table.len() as f32 / sample_rate;
        }
    }

    /// Table entries.
    pub fn table(&self) -> &[f32] {
        &self.table
    }

    /// Set the read position in table entries.
    pub fn set_phase(&mut self, phase: f32) {
        self.phase = phase;
    }

    /// Next interpolated sample.
    pub fn next_sample(&mut self) -> f32 {
        let len = self.table.len();
        if len == 0 {
            return 0.0;
        }

        let i0 = (self.phase as usize).min(len - 1);
        let i1 = if i0 + 1 == len { 0 } else { i0 + 1 };
        let frac = self.phase - i0 as f32;
        let sample = self.table[i0] + frac * (self.table[i1] - self.table[i0]);

        self.phase += self.delta;
        while self.phase >= len as f32 {
            self.phase -= len as f32;
        }
        sample
    }
}

/// Gated wavetable burst used to strike the membrane.
#[derive(Debug, Clone)]
pub struct WavetableExciter {
    oscillator: WavetableOscillator,
    sample_rate: u32,
    burst_samples: usize,
    position: usize,
}

impl WavetableExciter {
    /// Create an exciter over `table` that starts idle.
    pub fn new(table: Vec<f32>, frequency: f32, duration_ms: u32, sample_rate: u32) -> Self {
        let mut oscillator = WavetableOscillator::new(table);
        oscillator.set_frequency(frequency, sample_rate as f32);
        let burst_samples = burst_len(duration_ms, sample_rate);
        Self {
            oscillator,
            sample_rate,
            burst_samples,
            position: burst_samples,
        }
    }

    /// Sine-table exciter with the default frequency and burst length.
    pub fn sine(sample_rate: u32) -> Self {
        Self::new(
            WavetableOscillator::sine(128).table,
            DEFAULT_FREQUENCY,
            DEFAULT_DURATION_MS,
            sample_rate,
        )
    }

    /// Set the burst frequency.
    pub fn set_frequency(&mut self, frequency: f32) {
        self.oscillator
            .set_frequency(frequency, self.sample_rate as f32);
    }

    /// Set the burst length.
    pub fn set_duration(&mut self, duration_ms: u32) {
        let idle = !self.is_active();
        self.burst_samples = burst_len(duration_ms, self.sample_rate);
        if idle {
            self.position = self.burst_samples;
        }
    }

    /// Burst length in samples.
    pub fn burst_samples(&self) -> usize {
        self.burst_samples
    }

    /// Restart the burst from phase 0.
    pub fn trigger(&mut self) {
        self.position = 0;
        self.oscillator.set_phase(0.0);
    }

    /// Whether the burst is still sounding.
    pub fn is_active(&self) -> bool {
        self.position < self.burst_samples
    }

    /// Next excitation sample, 0 once the burst has ended.
    pub fn next_sample(&mut self) -> f32 {
        if !self.is_active() {
            return 0.0;
        }
        self.position += 1;
        self.oscillator.next_sample()
    }

    /// Fill `block` with excitation samples.
    pub fn fill(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            *sample = self.next_sample();
        }
    }
}

fn burst_len(duration_ms: u32, sample_rate: u32) -> usize {
    (duration_ms as u64 * sample_rate as u64 / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation() {
        let mut osc = WavetableOscillator::new(vec![0.0, 1.0]);
        // Half a table entry per sample.
        osc.set_frequency(1.0, 4.0);
        assert_eq!(osc.next_sample(), 0.0);
        assert!((osc.next_sample() - 0.5).abs() < 1e-6);
        assert!((osc.next_sample() - 1.0).abs() < 1e-6);
        // Wraps back toward entry 0.
        assert!((osc.next_sample() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_sine_table_bounded() {
        let mut osc = WavetableOscillator::sine(64);
        osc.set_frequency(440.0, 44_100.0);
        for _ in 0..1000 {
            assert!(osc.next_sample().abs() <= 1.0);
        }
    }

    #[test]
    fn test_burst_gating() {
        let mut exciter = WavetableExciter::sine(1000);
        exciter.set_duration(5);
        assert_eq!(exciter.burst_samples(), 5);
        assert!(!exciter.is_active());
        assert_eq!(exciter.next_sample(), 0.0);

        exciter.trigger();
        let mut block = [1.0f32; 8];
        exciter.fill(&mut block);
        assert!(block[..5].iter().any(|&s| s != 0.0));
        assert!(block[5..].iter().all(|&s| s == 0.0));
        assert!(!exciter.is_active());
    }

    #[test]
    fn test_empty_table_is_silent() {
        let mut osc = WavetableOscillator::new(Vec::new());
        osc.set_frequency(100.0, 1000.0);
        assert_eq!(osc.next_sample(), 0.0);
    }
}
