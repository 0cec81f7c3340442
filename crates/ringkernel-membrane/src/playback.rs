//! Real-time playback through the default audio output device.
//!
//! The output callback and any snapshot loop share the engine through a
//! mutex and take turns between blocks. A block that fails on the device is
//! replaced by silence.

use std::sync::Arc;

use parking_lot::Mutex;
#[cfg(feature = "device-output")]
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::exciter::WavetableExciter;

/// Render one interleaved output buffer from the engine.
///
/// Frames are rendered in chunks of at most the block capacity and copied to
/// every channel. Recoverable device errors produce silence for the chunk;
/// other errors are returned.
pub fn render_interleaved(
    engine: &mut Engine,
    exciter: &mut WavetableExciter,
    data: &mut [f32],
    channels: usize,
    scratch: &mut Scratch,
) -> Result<()> {
    let channels = channels.max(1);
    let frames = data.len() / channels;
    let capacity = engine.block_capacity();
    let mut frame = 0;

    while frame < frames {
        let n = (frames - frame).min(capacity);
        scratch.resize(n);
        exciter.fill(&mut scratch.excitation[..n]);

        if let Err(e) = engine.fill_block(&scratch.excitation[..n], &mut scratch.output[..n]) {
            if !e.is_recoverable() {
                return Err(e);
            }
            scratch.output[..n].fill(0.0);
        }

        for (i, &sample) in scratch.output[..n].iter().enumerate() {
            let start = (frame + i) * channels;
            data[start..start + channels].fill(sample);
        }
        frame += n;
    }

    data[frames * channels..].fill(0.0);
    Ok(())
}

/// Reusable excitation and output blocks for the audio callback.
#[derive(Debug, Default)]
pub struct Scratch {
    excitation: Vec<f32>,
    output: Vec<f32>,
}

impl Scratch {
    /// Preallocate room for `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            excitation: vec![0.0; capacity],
            output: vec![0.0; capacity],
        }
    }

    fn resize(&mut self, len: usize) {
        if self.excitation.len() < len {
            self.excitation.resize(len, 0.0);
            self.output.resize(len, 0.0);
        }
    }
}

/// A running output stream.
pub struct Playback {
    engine: Arc<Mutex<Engine>>,
    exciter: Arc<Mutex<WavetableExciter>>,
    sample_rate: u32,
    channels: u16,
    #[cfg(feature = "device-output")]
    _stream: cpal::Stream,
}

impl Playback {
    /// Start playback on the default output device.
    #[cfg(feature = "device-output")]
    pub fn start(
        engine: Arc<Mutex<Engine>>,
        exciter: Arc<Mutex<WavetableExciter>>,
    ) -> Result<Self> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::audio_device("No default output device"))?;

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!("Using output device: {}", device_name);

        let (sample_rate, capacity) = {
            let engine = engine.lock();
            (engine.config().sample_rate, engine.block_capacity())
        };

        let supported = device
            .default_output_config()
            .map_err(|e| EngineError::audio_device(format!("Failed to get device config: {}", e)))?;
        let channels = supported.channels();

        if supported.sample_rate().0 != sample_rate {
            warn!(
                "Device default rate is {} Hz, requesting {} Hz",
                supported.sample_rate().0,
                sample_rate
            );
        }

        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        debug!("Stream config: {} Hz, {} channels", sample_rate, channels);

        let callback_engine = engine.clone();
        let callback_exciter = exciter.clone();
        let mut scratch = Scratch::with_capacity(capacity);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut engine = callback_engine.lock();
                    let mut exciter = callback_exciter.lock();
                    if let Err(e) = render_interleaved(
                        &mut engine,
                        &mut exciter,
                        data,
                        channels as usize,
                        &mut scratch,
                    ) {
                        error!("Playback render failed: {}", e);
                        data.fill(0.0);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| EngineError::audio_device(format!("Failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| EngineError::audio_device(format!("Failed to start stream: {}", e)))?;

        info!("Audio output stream started");

        Ok(Self {
            engine,
            exciter,
            sample_rate,
            channels,
            _stream: stream,
        })
    }

    /// Playback requires the `device-output` feature.
    #[cfg(not(feature = "device-output"))]
    pub fn start(
        _engine: Arc<Mutex<Engine>>,
        _exciter: Arc<Mutex<WavetableExciter>>,
    ) -> Result<Self> {
        Err(EngineError::audio_device(
            "Device output not enabled. Compile with --features device-output",
        ))
    }

    /// Shared engine.
    pub fn engine(&self) -> &Arc<Mutex<Engine>> {
        &self.engine
    }

    /// Restart the excitation burst.
    pub fn trigger(&self) {
        self.exciter.lock().trigger();
    }

    /// Stream sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Stream channel count.
    pub fn channels(&self) -> u16 {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_render_without_model_fails() {
        let mut engine = Engine::new(EngineConfig::default());
        let mut exciter = WavetableExciter::sine(44_100);
        let mut data = vec![1.0f32; 8];
        let mut scratch = Scratch::default();

        let err = render_interleaved(&mut engine, &mut exciter, &mut data, 2, &mut scratch)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[test]
    fn test_empty_buffer_is_noop() {
        let mut engine = Engine::new(EngineConfig::default());
        let mut exciter = WavetableExciter::sine(44_100);
        let mut data: Vec<f32> = Vec::new();
        let mut scratch = Scratch::default();

        render_interleaved(&mut engine, &mut exciter, &mut data, 2, &mut scratch).unwrap();
    }

    #[cfg(not(feature = "device-output"))]
    #[test]
    fn test_start_without_feature() {
        let engine = Arc::new(Mutex::new(Engine::new(EngineConfig::default())));
        let exciter = Arc::new(Mutex::new(WavetableExciter::sine(44_100)));
        assert!(matches!(
            Playback::start(engine, exciter),
            Err(EngineError::AudioDevice(_))
        ));
    }
}
