//! Streaming time-stretch and pitch-shift engine for Tempus.
//!
//! The engine consumes an arbitrary number of input samples and produces an
//! arbitrary number of output samples per call. The ratio between the two
//! counts is the stretch ratio; there is no separate ratio parameter.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tempus_engine::{Preset, SpectralStretch, StretchEngine};
//!
//! let mut engine = SpectralStretch::default();
//! engine.apply_preset(Preset::Cheaper, 2, 48000.0)?;
//!
//! // In audio callback: 1024 samples in, 512 out (2:1 compression)
//! engine.process(&[&left_in, &right_in], 1024, &mut [&mut left_out, &mut right_out], 512);
//! ```
//!
//! # Algorithm Details
//!
//! The phase vocoder works by:
//! 1. Windowing the input history into two frames one interval apart
//! 2. Converting both to frequency domain via FFT
//! 3. Measuring each bin's true frequency from their phase difference
//! 4. Accumulating that frequency over the synthesis hop at spectral peaks,
//!    with the surrounding bins locked to their peak
//! 5. Converting back via IFFT and overlap-adding into an output ring

mod phase;
mod preset;
mod spectral;
mod stft;

pub use preset::{Preset, MAX_BLOCK_SAMPLES, MIN_BLOCK_SAMPLES};
pub use spectral::{SpectralStretch, MAX_TRANSPOSE, MIN_TRANSPOSE};

use std::collections::TryReserveError;
use thiserror::Error;

/// Errors raised while configuring an engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Allocation failed: {0}")]
    Allocation(#[from] TryReserveError),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Streaming transform behind a stretch handle.
///
/// Calls advance hidden state and must follow the order of the audio stream.
pub trait StretchEngine: Send {
    /// Configure for `channels` channels at `sample_rate` Hz. Leaves the engine reset.
    fn apply_preset(
        &mut self,
        preset: Preset,
        channels: usize,
        sample_rate: f32,
    ) -> Result<(), EngineError>;

    /// Clear all streaming state back to silence
    fn reset(&mut self);

    /// Consume `input_samples` from each input and write `output_samples`
    /// to each output.
    ///
    /// The caller guarantees one slice per configured channel and slice
    /// lengths of at least the requested counts.
    fn process(
        &mut self,
        inputs: &[&[f32]],
        input_samples: usize,
        outputs: &mut [&mut [f32]],
        output_samples: usize,
    );

    /// Delay (in input samples) between the input and its analysis centre
    fn input_latency(&self) -> usize;

    /// Delay (in output samples) between synthesis and emitted output
    fn output_latency(&self) -> usize;

    fn block_samples(&self) -> usize;

    fn interval_samples(&self) -> usize;

    /// Pitch transposition as a frequency multiplier (1.0 = unchanged)
    fn set_transpose_factor(&mut self, factor: f32);
}
