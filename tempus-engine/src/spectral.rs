//! Streaming spectral stretch engine.

use crate::phase::{ChannelSpectrum, PhaseProcessor};
use crate::preset::Preset;
use crate::stft::{try_filled, Stft};
use crate::{EngineError, StretchEngine};
use tracing::{debug, trace};

/// Lowest and highest transposition factors accepted
pub const MIN_TRANSPOSE: f32 = 0.25;
pub const MAX_TRANSPOSE: f32 = 4.0;

/// Sample buffers owned by one channel
struct ChannelBuffers {
    /// Input history: `block + interval` samples of context plus the current call's input
    history: Vec<f32>,
    /// Overlap-add output ring (2 * block)
    ring: Vec<f32>,
    /// Frame extraction scratch
    frame: Vec<f32>,
}

/// Phase vocoder engine for streaming time-stretching and transposition.
///
/// Create with [`Default::default`], then configure via
/// [`StretchEngine::apply_preset`]. Until configured the engine has zero
/// channels and only writes silence.
pub struct SpectralStretch {
    sample_rate: f32,
    block: usize,
    interval: usize,
    transpose: f32,
    stft: Option<Stft>,
    phase: Option<PhaseProcessor>,
    buffers: Vec<ChannelBuffers>,
    spectra: Vec<ChannelSpectrum>,
    /// Read position in every output ring
    ring_pos: usize,
    /// Output samples until the next synthesis frame
    countdown: usize,
}

impl Default for SpectralStretch {
    fn default() -> Self {
        Self {
            sample_rate: 0.0,
            block: 0,
            interval: 0,
            transpose: 1.0,
            stft: None,
            phase: None,
            buffers: Vec::new(),
            spectra: Vec::new(),
            ring_pos: 0,
            countdown: 0,
        }
    }
}

impl SpectralStretch {
    /// Number of configured channels (0 when unconfigured)
    #[inline]
    pub fn channels(&self) -> usize {
        self.buffers.len()
    }

    /// Sample rate the engine was configured for
    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    #[inline]
    pub fn is_configured(&self) -> bool {
        self.stft.is_some()
    }

    /// Current transposition factor
    #[inline]
    pub fn transpose_factor(&self) -> f32 {
        self.transpose
    }

    /// Samples of input context kept between calls
    #[inline]
    fn context_len(&self) -> usize {
        self.block + self.interval
    }

    /// Analyse the frames ending at `end` (and `end - interval`) in every
    /// channel's history and overlap-add one synthesis frame at the ring position.
    fn synthesize_frame(&mut self, end: usize) {
        let (Some(stft), Some(phase)) = (self.stft.as_mut(), self.phase.as_mut()) else {
            return;
        };
        let block = self.block;
        let interval = self.interval;

        for (buffers, spectrum) in self.buffers.iter_mut().zip(self.spectra.iter_mut()) {
            buffers
                .frame
                .copy_from_slice(&buffers.history[end - block..end]);
            stft.analyze(&buffers.frame, &mut spectrum.current);

            let prev_end = end - interval;
            buffers
                .frame
                .copy_from_slice(&buffers.history[prev_end - block..prev_end]);
            stft.analyze(&buffers.frame, &mut spectrum.previous);
        }

        phase.process(&mut self.spectra);
        if phase.transient_detected() {
            trace!(end, "Transient, phase reset");
        }

        for (buffers, spectrum) in self.buffers.iter_mut().zip(&self.spectra) {
            stft.synthesize(&spectrum.output, &mut buffers.ring, self.ring_pos);
        }
    }
}

impl StretchEngine for SpectralStretch {
    fn apply_preset(
        &mut self,
        preset: Preset,
        channels: usize,
        sample_rate: f32,
    ) -> Result<(), EngineError> {
        if channels == 0 {
            return Err(EngineError::InvalidConfiguration(
                "channel count must be positive".to_string(),
            ));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(EngineError::InvalidConfiguration(format!(
                "sample rate must be positive and finite, got {}",
                sample_rate
            )));
        }

        let (block, interval) = preset.resolve(sample_rate);
        let stft = Stft::new(block, interval)?;
        let mut phase = PhaseProcessor::new(block, interval)?;
        phase.set_transpose(self.transpose);

        let mut buffers = Vec::new();
        buffers.try_reserve_exact(channels)?;
        let mut spectra = Vec::new();
        spectra.try_reserve_exact(channels)?;
        for _ in 0..channels {
            buffers.push(ChannelBuffers {
                history: try_filled(block + interval, 0.0)?,
                ring: try_filled(block * 2, 0.0)?,
                frame: try_filled(block, 0.0)?,
            });
            spectra.push(ChannelSpectrum::new(stft.num_bins())?);
        }

        self.sample_rate = sample_rate;
        self.block = block;
        self.interval = interval;
        self.stft = Some(stft);
        self.phase = Some(phase);
        self.buffers = buffers;
        self.spectra = spectra;
        self.reset();

        debug!(
            channels,
            sample_rate,
            block,
            interval,
            ?preset,
            "Configured spectral stretch"
        );
        Ok(())
    }

    fn reset(&mut self) {
        let context = self.context_len();
        for buffers in &mut self.buffers {
            buffers.history.clear();
            buffers.history.resize(context, 0.0);
            buffers.ring.fill(0.0);
            buffers.frame.fill(0.0);
        }
        for spectrum in &mut self.spectra {
            spectrum.reset();
        }
        if let Some(phase) = self.phase.as_mut() {
            phase.reset();
        }
        self.ring_pos = 0;
        self.countdown = 0;
    }

    fn process(
        &mut self,
        inputs: &[&[f32]],
        input_samples: usize,
        outputs: &mut [&mut [f32]],
        output_samples: usize,
    ) {
        if !self.is_configured() {
            for output in outputs.iter_mut() {
                output[..output_samples].fill(0.0);
            }
            return;
        }

        debug_assert_eq!(inputs.len(), self.channels());
        debug_assert_eq!(outputs.len(), self.channels());

        trace!(input_samples, output_samples, "Stretch process");

        for (buffers, input) in self.buffers.iter_mut().zip(inputs) {
            buffers.history.extend_from_slice(&input[..input_samples]);
        }

        let context = self.context_len();
        let ratio = if output_samples > 0 {
            input_samples as f64 / output_samples as f64
        } else {
            0.0
        };

        for j in 0..output_samples {
            if self.countdown == 0 {
                let offset = ((j as f64 * ratio).round() as usize).min(input_samples);
                self.synthesize_frame(context + offset);
                self.countdown = self.interval;
            }

            let pos = self.ring_pos;
            for (buffers, output) in self.buffers.iter_mut().zip(outputs.iter_mut()) {
                output[j] = buffers.ring[pos];
                buffers.ring[pos] = 0.0;
            }

            self.ring_pos = (pos + 1) % (self.block * 2);
            self.countdown -= 1;
        }

        for buffers in &mut self.buffers {
            buffers.history.drain(..input_samples);
        }
    }

    fn input_latency(&self) -> usize {
        self.block / 2
    }

    fn output_latency(&self) -> usize {
        self.block / 2
    }

    fn block_samples(&self) -> usize {
        self.block
    }

    fn interval_samples(&self) -> usize {
        self.interval
    }

    fn set_transpose_factor(&mut self, factor: f32) {
        if !factor.is_finite() {
            return;
        }
        self.transpose = factor.clamp(MIN_TRANSPOSE, MAX_TRANSPOSE);
        if let Some(phase) = self.phase.as_mut() {
            phase.set_transpose(self.transpose);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(len: usize, start: usize, freq: f32, sample_rate: f32) -> Vec<f32> {
        (start..start + len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin() * 0.5)
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    /// Feed `calls` chunks of a 0.5 sine and return everything produced
    fn render(
        engine: &mut SpectralStretch,
        freq: f32,
        input_len: usize,
        output_len: usize,
        calls: usize,
    ) -> Vec<f32> {
        let mut collected = Vec::new();
        for n in 0..calls {
            let input = sine(input_len, n * input_len, freq, 48000.0);
            let mut output = vec![0.0f32; output_len];
            engine.process(&[&input[..]], input_len, &mut [&mut output[..]], output_len);
            collected.extend(output);
        }
        collected
    }

    fn assert_sine_level(samples: &[f32]) {
        let level = rms(samples);
        let expected = 0.5 / 2.0f32.sqrt();
        assert!(
            (level - expected).abs() < expected * 0.1,
            "rms {} vs {}",
            level,
            expected
        );
    }

    fn configured(channels: usize) -> SpectralStretch {
        let mut engine = SpectralStretch::default();
        engine
            .apply_preset(Preset::Cheaper, channels, 48000.0)
            .unwrap();
        engine
    }

    #[test]
    fn test_unconfigured_writes_silence() {
        let mut engine = SpectralStretch::default();
        let mut out = vec![1.0f32; 16];
        engine.process(&[], 0, &mut [&mut out[..]], 16);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(!engine.is_configured());
        assert_eq!(engine.channels(), 0);
    }

    #[test]
    fn test_rejects_bad_configuration() {
        let mut engine = SpectralStretch::default();
        assert!(matches!(
            engine.apply_preset(Preset::Cheaper, 0, 48000.0),
            Err(EngineError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            engine.apply_preset(Preset::Cheaper, 2, f32::NAN),
            Err(EngineError::InvalidConfiguration(_))
        ));
        assert!(!engine.is_configured());
    }

    #[test]
    fn test_latency_reports_half_block() {
        let engine = configured(1);
        assert_eq!(engine.block_samples(), 4800);
        assert_eq!(engine.interval_samples(), 1920);
        assert_eq!(engine.input_latency(), 2400);
        assert_eq!(engine.output_latency(), 2400);
    }

    #[test]
    fn test_unity_ratio_preserves_level() {
        let mut engine = configured(1);
        let chunk = 1024;
        let mut last = Vec::new();

        for n in 0..40 {
            let input = sine(chunk, n * chunk, 440.0, 48000.0);
            let mut output = vec![0.0f32; chunk];
            engine.process(&[&input[..]], chunk, &mut [&mut output[..]], chunk);
            last = output;
        }

        let level = rms(&last);
        let expected = 0.5 / 2.0f32.sqrt();
        assert!(
            (level - expected).abs() < expected * 0.1,
            "rms {} vs {}",
            level,
            expected
        );
    }

    #[test]
    fn test_default_preset_unity_ratio_preserves_level() {
        let mut engine = SpectralStretch::default();
        engine.apply_preset(Preset::Default, 1, 48000.0).unwrap();

        let out = render(&mut engine, 440.0, 1024, 1024, 40);
        assert_sine_level(&out[out.len() - 4096..]);
    }

    #[test]
    fn test_octave_transpose_is_a_clean_sine() {
        let mut engine = configured(1);
        engine.set_transpose_factor(2.0);

        let out = render(&mut engine, 440.0, 1024, 1024, 40);
        let tail = &out[out.len() - 4800..];
        assert_sine_level(tail);

        // A steady sine has crest factor sqrt(2); beating pushes it up
        let peak = tail.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        let crest = peak / rms(tail);
        assert!(crest < 1.6, "crest factor {}", crest);

        // 880 Hz over 0.1 s crosses zero 176 times
        let crossings = tail
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count();
        assert!((170..=182).contains(&crossings), "crossings {}", crossings);
    }

    #[test]
    fn test_history_length_is_stable() {
        let mut engine = configured(2);
        let input = vec![0.1f32; 700];
        let mut left = vec![0.0f32; 300];
        let mut right = vec![0.0f32; 300];

        for _ in 0..5 {
            engine.process(
                &[&input[..], &input[..]],
                700,
                &mut [&mut left[..], &mut right[..]],
                300,
            );
        }

        for buffers in &engine.buffers {
            assert_eq!(buffers.history.len(), engine.context_len());
        }
    }

    #[test]
    fn test_reset_clears_output() {
        let mut engine = configured(1);
        let input = sine(4096, 0, 440.0, 48000.0);
        let mut output = vec![0.0f32; 4096];
        engine.process(&[&input[..]], 4096, &mut [&mut output[..]], 4096);

        engine.reset();

        let silence = vec![0.0f32; 4096];
        engine.process(&[&silence[..]], 4096, &mut [&mut output[..]], 4096);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_transpose_is_clamped() {
        let mut engine = configured(1);
        engine.set_transpose_factor(10.0);
        assert_eq!(engine.transpose_factor(), MAX_TRANSPOSE);
        engine.set_transpose_factor(0.01);
        assert_eq!(engine.transpose_factor(), MIN_TRANSPOSE);
        engine.set_transpose_factor(f32::NAN);
        assert_eq!(engine.transpose_factor(), MIN_TRANSPOSE);
    }

    #[test]
    fn test_zero_output_consumes_input() {
        let mut engine = configured(1);
        let input = vec![0.25f32; 512];
        let mut output: Vec<f32> = Vec::new();
        engine.process(&[&input[..]], 512, &mut [&mut output[..]], 0);
        assert_eq!(engine.buffers[0].history.len(), engine.context_len());
    }
}
