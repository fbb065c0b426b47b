//! Owning handle around one stretch engine.
//!
//! The handle validates every call at the boundary and only then delegates to
//! the engine. Lifecycle: `create` → (`process`)* → `dispose`. A disposed
//! handle rejects every further call, including a second `dispose`, with
//! [`StretchError::InvalidHandle`]. Dropping a handle without disposing it
//! releases the engine as well.

use crate::error::StretchError;
use tempus_engine::{Preset, SpectralStretch, StretchEngine};
use tracing::{debug, warn};

/// Exclusively owned stretch engine with fixed channel count and sample rate
pub struct StretchHandle<E: StretchEngine = SpectralStretch> {
    /// `None` once disposed
    engine: Option<Box<E>>,
    channels: usize,
    sample_rate: f32,
    preset: Preset,
}

/// Check construction arguments, returning the channel count as `usize`
fn validate_parameters(channel_count: i32, sample_rate: f32) -> Result<usize, StretchError> {
    if channel_count <= 0 {
        return Err(StretchError::InvalidParameter(format!(
            "channel count must be positive, got {}",
            channel_count
        )));
    }
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(StretchError::InvalidParameter(format!(
            "sample rate must be positive and finite, got {}",
            sample_rate
        )));
    }
    Ok(channel_count as usize)
}

/// Check channel counts and buffer capacities of a process call
fn validate_buffers(
    channels: usize,
    inputs: &[&[f32]],
    input_samples: usize,
    outputs: &[&mut [f32]],
    output_samples: usize,
) -> Result<(), StretchError> {
    for actual in [inputs.len(), outputs.len()] {
        if actual != channels {
            return Err(StretchError::ChannelMismatch {
                expected: channels,
                actual,
            });
        }
    }

    for (channel, input) in inputs.iter().enumerate() {
        if input.len() < input_samples {
            return Err(StretchError::BufferTooSmall {
                channel,
                required: input_samples,
                actual: input.len(),
            });
        }
    }
    for (channel, output) in outputs.iter().enumerate() {
        if output.len() < output_samples {
            return Err(StretchError::BufferTooSmall {
                channel,
                required: output_samples,
                actual: output.len(),
            });
        }
    }
    Ok(())
}

impl StretchHandle<SpectralStretch> {
    /// Create a handle using the low-latency [`Preset::Cheaper`] preset.
    pub fn create(channel_count: i32, sample_rate: f32) -> Result<Self, StretchError> {
        Self::create_with_preset(channel_count, sample_rate, Preset::Cheaper)
    }

    /// Create a handle with an explicit preset
    pub fn create_with_preset(
        channel_count: i32,
        sample_rate: f32,
        preset: Preset,
    ) -> Result<Self, StretchError> {
        // Reject before anything is allocated
        validate_parameters(channel_count, sample_rate)?;
        Self::with_engine(SpectralStretch::default(), channel_count, sample_rate, preset)
    }
}

impl<E: StretchEngine> StretchHandle<E> {
    /// Wrap a caller-supplied engine: apply `preset`, then reset it.
    pub fn with_engine(
        mut engine: E,
        channel_count: i32,
        sample_rate: f32,
        preset: Preset,
    ) -> Result<Self, StretchError> {
        let channels = validate_parameters(channel_count, sample_rate)?;

        engine.apply_preset(preset, channels, sample_rate)?;
        engine.reset();

        debug!(
            channels,
            sample_rate,
            block = engine.block_samples(),
            interval = engine.interval_samples(),
            "Created stretch handle"
        );

        Ok(Self {
            engine: Some(Box::new(engine)),
            channels,
            sample_rate,
            preset,
        })
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    #[inline]
    pub fn preset(&self) -> Preset {
        self.preset
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.engine.is_none()
    }

    fn engine(&self) -> Result<&E, StretchError> {
        self.engine.as_deref().ok_or(StretchError::InvalidHandle)
    }

    fn engine_mut(&mut self) -> Result<&mut E, StretchError> {
        self.engine.as_deref_mut().ok_or(StretchError::InvalidHandle)
    }

    /// Consume `input_samples` per channel and write exactly `output_samples`
    /// per channel into `outputs[c][..output_samples]`.
    ///
    /// The stretch ratio is `output_samples / input_samples`. Calls must be
    /// made in stream order. Nothing reaches the engine if validation fails.
    pub fn process(
        &mut self,
        inputs: &[&[f32]],
        input_samples: usize,
        outputs: &mut [&mut [f32]],
        output_samples: usize,
    ) -> Result<(), StretchError> {
        let channels = self.channels;
        let engine = self.engine.as_deref_mut().ok_or_else(|| {
            warn!("Process called on a disposed stretch handle");
            StretchError::InvalidHandle
        })?;

        validate_buffers(channels, inputs, input_samples, outputs, output_samples).map_err(
            |err| {
                warn!(%err, "Rejected stretch process call");
                err
            },
        )?;

        engine.process(inputs, input_samples, outputs, output_samples);
        Ok(())
    }

    /// Clear all streaming state back to silence
    pub fn reset(&mut self) -> Result<(), StretchError> {
        self.engine_mut()?.reset();
        debug!("Reset stretch handle");
        Ok(())
    }

    /// Release the engine. A second call fails with [`StretchError::InvalidHandle`].
    pub fn dispose(&mut self) -> Result<(), StretchError> {
        match self.engine.take() {
            Some(engine) => {
                drop(engine);
                debug!(channels = self.channels, "Disposed stretch handle");
                Ok(())
            }
            None => {
                warn!("Stretch handle disposed twice");
                Err(StretchError::InvalidHandle)
            }
        }
    }

    pub fn input_latency(&self) -> Result<usize, StretchError> {
        Ok(self.engine()?.input_latency())
    }

    pub fn output_latency(&self) -> Result<usize, StretchError> {
        Ok(self.engine()?.output_latency())
    }

    pub fn block_samples(&self) -> Result<usize, StretchError> {
        Ok(self.engine()?.block_samples())
    }

    pub fn interval_samples(&self) -> Result<usize, StretchError> {
        Ok(self.engine()?.interval_samples())
    }

    /// Set pitch transposition as a frequency multiplier (clamped to 0.25..=4.0)
    pub fn set_transpose_factor(&mut self, factor: f32) -> Result<(), StretchError> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(StretchError::InvalidParameter(format!(
                "transpose factor must be positive and finite, got {}",
                factor
            )));
        }
        self.engine_mut()?.set_transpose_factor(factor);
        Ok(())
    }

    /// Set pitch transposition in semitones
    pub fn set_transpose_semitones(&mut self, semitones: f32) -> Result<(), StretchError> {
        if !semitones.is_finite() {
            return Err(StretchError::InvalidParameter(format!(
                "transpose semitones must be finite, got {}",
                semitones
            )));
        }
        self.set_transpose_factor(2.0f32.powf(semitones / 12.0))
    }
}
