//! Phase processing for the streaming stretch engine.
//!
//! Every synthesis frame the engine hands over two analysis spectra per
//! channel: the frame at the current input position and the frame one
//! interval earlier. Their phase difference gives each bin's true frequency,
//! which is then accumulated over the synthesis hop. This makes the phase
//! advance independent of how far the input actually moved, so any ratio
//! (including a frozen input) is handled the same way.
//!
//! Only spectral peaks are propagated that way. Every other bin belongs to
//! the region of its nearest peak and keeps the phase offset to that peak
//! measured in the analysis frame (identity phase locking), so a partial's
//! main lobe stays one coherent sinusoid regardless of the ratio.
//!
//! Additions on top of the classic vocoder:
//! - Transient detection with phase reset (preserves attack clarity)
//! - Region shifting for pitch transposition

use crate::stft::try_filled;
use rustfft::num_complex::Complex;
use std::collections::TryReserveError;
use std::f32::consts::PI;

const TWO_PI: f32 = 2.0 * PI;

/// Spectral-flux ratio above which a frame counts as a transient
const TRANSIENT_THRESHOLD: f32 = 0.5;

/// Bins on each side a peak must dominate
const PEAK_NEIGHBOURS: usize = 2;

/// Per-channel spectral state
pub struct ChannelSpectrum {
    /// Analysis bins at the current input position
    pub(crate) current: Vec<Complex<f32>>,
    /// Analysis bins one interval earlier
    pub(crate) previous: Vec<Complex<f32>>,
    /// Synthesis bins
    pub(crate) output: Vec<Complex<f32>>,
    /// Synthesis phase of every output bin in the last frame
    accum: Vec<f32>,
    /// Magnitudes of the last analysed frame, for transient detection
    prev_mag: Vec<f32>,
}

impl ChannelSpectrum {
    pub fn new(num_bins: usize) -> Result<Self, TryReserveError> {
        let zero = Complex::new(0.0, 0.0);
        Ok(Self {
            current: try_filled(num_bins, zero)?,
            previous: try_filled(num_bins, zero)?,
            output: try_filled(num_bins, zero)?,
            accum: try_filled(num_bins, 0.0)?,
            prev_mag: try_filled(num_bins, 0.0)?,
        })
    }

    pub fn reset(&mut self) {
        let zero = Complex::new(0.0, 0.0);
        self.current.fill(zero);
        self.previous.fill(zero);
        self.output.fill(zero);
        self.accum.fill(0.0);
        self.prev_mag.fill(0.0);
    }
}

/// Shared phase processor (one per engine)
pub struct PhaseProcessor {
    num_bins: usize,
    /// Expected phase advance per bin over one interval
    omega: Vec<f32>,
    /// Pitch transposition factor (1.0 = unchanged)
    transpose: f32,
    /// Whether a transient was detected in the last frame
    transient_detected: bool,
    /// Peak bins of the channel being processed, ascending
    peaks: Vec<usize>,
    mag: Vec<f32>,
    /// Analysis phase per bin
    phase: Vec<f32>,
    /// Measured phase advance per bin over one interval
    advance: Vec<f32>,
    target_mag: Vec<f32>,
    target_strongest: Vec<f32>,
    target_phase: Vec<f32>,
}

impl PhaseProcessor {
    /// Create a processor for `block`-sample frames spaced `interval` apart.
    pub fn new(block: usize, interval: usize) -> Result<Self, TryReserveError> {
        let num_bins = block / 2 + 1;

        // omega[k] = 2 * pi * k * interval / block
        let mut omega = try_filled(num_bins, 0.0f32)?;
        for (k, w) in omega.iter_mut().enumerate() {
            *w = (2.0 * std::f64::consts::PI * k as f64 * interval as f64 / block as f64) as f32;
        }

        let mut peaks = Vec::new();
        peaks.try_reserve_exact(num_bins / 2 + 1)?;

        Ok(Self {
            num_bins,
            omega,
            transpose: 1.0,
            transient_detected: false,
            peaks,
            mag: try_filled(num_bins, 0.0)?,
            phase: try_filled(num_bins, 0.0)?,
            advance: try_filled(num_bins, 0.0)?,
            target_mag: try_filled(num_bins, 0.0)?,
            target_strongest: try_filled(num_bins, 0.0)?,
            target_phase: try_filled(num_bins, 0.0)?,
        })
    }

    #[inline]
    pub fn set_transpose(&mut self, factor: f32) {
        self.transpose = factor;
    }

    #[inline]
    pub fn transient_detected(&self) -> bool {
        self.transient_detected
    }

    pub fn reset(&mut self) {
        self.peaks.clear();
        self.transient_detected = false;
    }

    /// Turn the analysis bins of every channel into synthesis bins.
    pub fn process(&mut self, spectra: &mut [ChannelSpectrum]) {
        self.detect_transients(spectra);

        for spectrum in spectra.iter_mut() {
            self.process_channel(spectrum);
        }

        for spectrum in spectra.iter_mut() {
            for (prev, bin) in spectrum.prev_mag.iter_mut().zip(&spectrum.current) {
                *prev = bin.norm();
            }
        }
    }

    /// Peak-locked phase propagation for one channel
    fn process_channel(&mut self, spectrum: &mut ChannelSpectrum) {
        for k in 0..self.num_bins {
            let current = spectrum.current[k];
            self.mag[k] = current.norm();
            self.phase[k] = current.arg();
            let measured = self.phase[k] - spectrum.previous[k].arg();
            self.advance[k] = self.omega[k] + wrap_phase(measured - self.omega[k]);
        }

        self.find_peaks();

        self.target_mag.fill(0.0);
        self.target_strongest.fill(0.0);

        let transpose = self.transpose;
        let mut start = 0;
        for (i, &peak) in self.peaks.iter().enumerate() {
            let end = match self.peaks.get(i + 1) {
                Some(&next) => self.lowest_bin_between(peak, next),
                None => self.num_bins,
            };

            let target = if transpose == 1.0 {
                peak
            } else {
                (peak as f32 * transpose).round() as usize
            };
            let shift = target as isize - peak as isize;

            let peak_phase = if self.transient_detected || target >= self.num_bins {
                self.phase[peak]
            } else {
                spectrum.accum[target] + self.advance[peak] * transpose
            };

            // Shift the whole region, keeping each bin's offset to the peak
            for j in start..end {
                let mag = self.mag[j];
                if mag == 0.0 {
                    continue;
                }
                let Some(k) = j.checked_add_signed(shift).filter(|&k| k < self.num_bins) else {
                    continue;
                };

                self.target_mag[k] += mag;
                if mag > self.target_strongest[k] {
                    self.target_strongest[k] = mag;
                    self.target_phase[k] = peak_phase + self.phase[j] - self.phase[peak];
                }
            }

            start = end;
        }

        for k in 0..self.num_bins {
            if self.target_strongest[k] > 0.0 {
                let phase = wrap_phase(self.target_phase[k]);
                spectrum.accum[k] = phase;
                spectrum.output[k] = Complex::from_polar(self.target_mag[k], phase);
            } else {
                spectrum.output[k] = Complex::new(0.0, 0.0);
            }
        }
    }

    /// Detect transients using spectral flux across all channels
    fn detect_transients(&mut self, spectra: &[ChannelSpectrum]) {
        let mut flux = 0.0f32;
        let mut total = 0.0f32;

        for spectrum in spectra {
            for (bin, &prev) in spectrum.current.iter().zip(&spectrum.prev_mag) {
                let mag = bin.norm();
                let diff = mag - prev;

                // Only count increases (onset detection)
                if diff > 0.0 {
                    flux += diff * diff;
                }
                total += mag * mag;
            }
        }

        let total = total.sqrt();
        let flux = flux.sqrt();

        self.transient_detected = total > f32::EPSILON && flux / total > TRANSIENT_THRESHOLD;
    }

    /// Find spectral peaks of the current analysis magnitudes
    ///
    /// A bin is a peak if it is louder than the bins to its left and at least
    /// as loud as the bins to its right, so a flat top yields one peak.
    fn find_peaks(&mut self) {
        self.peaks.clear();
        let n = self.num_bins;

        for k in 0..n {
            let mag = self.mag[k];
            if mag == 0.0 {
                continue;
            }
            let left = k.saturating_sub(PEAK_NEIGHBOURS)..k;
            let right = k + 1..(k + 1 + PEAK_NEIGHBOURS).min(n);
            if self.mag[left].iter().all(|&m| mag > m) && self.mag[right].iter().all(|&m| mag >= m) {
                self.peaks.push(k);
            }
        }
    }

    /// Quietest bin strictly between two peaks; it starts the upper region
    fn lowest_bin_between(&self, low: usize, high: usize) -> usize {
        let mut lowest = low + 1;
        for k in low + 2..high {
            if self.mag[k] < self.mag[lowest] {
                lowest = k;
            }
        }
        lowest
    }
}

/// Wrap phase to [-π, π]
#[inline(always)]
pub(crate) fn wrap_phase(phase: f32) -> f32 {
    phase - TWO_PI * (phase / TWO_PI).round()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_spectrum(num_bins: usize, bin: usize, mag: f32, phase: f32) -> Vec<Complex<f32>> {
        let mut bins = vec![Complex::new(0.0, 0.0); num_bins];
        bins[bin] = Complex::from_polar(mag, phase);
        bins
    }

    /// Three-bin lobe around bin 10 with the given phases
    fn lobe(phases: [f32; 3]) -> Vec<Complex<f32>> {
        let mut bins = vec![Complex::new(0.0, 0.0); 33];
        bins[9] = Complex::from_polar(1.0, phases[0]);
        bins[10] = Complex::from_polar(5.0, phases[1]);
        bins[11] = Complex::from_polar(1.0, phases[2]);
        bins
    }

    fn same_phase(a: f32, b: f32) -> bool {
        wrap_phase(a - b).abs() < 1e-3
    }

    #[test]
    fn test_phase_wrap() {
        assert!(wrap_phase(0.0).abs() < 0.001);
        assert!((wrap_phase(PI + 0.1) - (-PI + 0.1)).abs() < 0.001);
        assert!((wrap_phase(-PI - 0.1) - (PI - 0.1)).abs() < 0.001);
        assert!((wrap_phase(40.0 * PI + 0.25) - 0.25).abs() < 0.001);
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut processor = PhaseProcessor::new(64, 16).unwrap();
        let mut spectra = vec![ChannelSpectrum::new(33).unwrap()];

        for _ in 0..10 {
            processor.process(&mut spectra);
        }

        assert!(!processor.transient_detected());
        assert!(spectra[0].output.iter().all(|b| b.norm() == 0.0));
    }

    #[test]
    fn test_onset_resets_phase() {
        let mut processor = PhaseProcessor::new(64, 16).unwrap();
        let mut spectra = vec![ChannelSpectrum::new(33).unwrap()];
        spectra[0].current = tone_spectrum(33, 4, 10.0, 1.0);

        processor.process(&mut spectra);

        assert!(processor.transient_detected());
        assert!((spectra[0].output[4].arg() - 1.0).abs() < 1e-5);
        assert!((spectra[0].output[4].norm() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_steady_tone_accumulates_measured_advance() {
        let mut processor = PhaseProcessor::new(64, 16).unwrap();
        let mut spectra = vec![ChannelSpectrum::new(33).unwrap()];

        spectra[0].current = tone_spectrum(33, 4, 10.0, 0.5);
        processor.process(&mut spectra);

        // Same magnitude, phase moved by 0.3 rad over one interval
        spectra[0].previous = tone_spectrum(33, 4, 10.0, 0.5);
        spectra[0].current = tone_spectrum(33, 4, 10.0, 0.8);
        processor.process(&mut spectra);

        assert!(!processor.transient_detected());
        assert!((spectra[0].output[4].arg() - 0.8).abs() < 1e-4);
    }

    #[test]
    fn test_transpose_moves_bins() {
        let mut processor = PhaseProcessor::new(64, 16).unwrap();
        processor.set_transpose(2.0);
        let mut spectra = vec![ChannelSpectrum::new(33).unwrap()];
        spectra[0].current = tone_spectrum(33, 5, 3.0, 0.0);

        processor.process(&mut spectra);

        assert!(spectra[0].output[5].norm() < 1e-6);
        assert!((spectra[0].output[10].norm() - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_transpose_keeps_lobe_shape() {
        let mut processor = PhaseProcessor::new(64, 16).unwrap();
        processor.set_transpose(1.5);
        let mut spectra = vec![ChannelSpectrum::new(33).unwrap()];
        spectra[0].current = lobe([-1.0, 1.0, 2.0]);

        processor.process(&mut spectra);

        // Peak 10 lands on 15, neighbours move with it instead of scattering
        let output = &spectra[0].output;
        assert!((output[14].norm() - 1.0).abs() < 1e-4);
        assert!((output[15].norm() - 5.0).abs() < 1e-4);
        assert!((output[16].norm() - 1.0).abs() < 1e-4);
        assert!(same_phase(output[14].arg() - output[15].arg(), -2.0));
        assert!(same_phase(output[16].arg() - output[15].arg(), 1.0));
        let rest: f32 = output.iter().map(|b| b.norm()).sum::<f32>() - 7.0;
        assert!(rest.abs() < 1e-3);
    }

    #[test]
    fn test_identity_lock_keeps_relative_phases() {
        let mut processor = PhaseProcessor::new(64, 16).unwrap();
        let mut spectra = vec![ChannelSpectrum::new(33).unwrap()];

        spectra[0].current = lobe([-1.0, 1.0, 2.0]);
        processor.process(&mut spectra);
        assert!(processor.transient_detected());

        // Neighbours drift differently from the peak between frames
        let expected = [-0.3, 1.3, 1.8];
        spectra[0].previous = lobe([-1.0, 1.0, 2.0]);
        spectra[0].current = lobe(expected);
        processor.process(&mut spectra);
        assert!(!processor.transient_detected());

        let output = &spectra[0].output;
        assert!((output[9].norm() - 1.0).abs() < 1e-4);
        assert!((output[10].norm() - 5.0).abs() < 1e-4);
        assert!((output[11].norm() - 1.0).abs() < 1e-4);
        for (bin, phase) in (9..12).zip(expected) {
            assert!(same_phase(output[bin].arg(), phase), "bin {}", bin);
        }
    }

    #[test]
    fn test_regions_split_at_quietest_bin() {
        let mut processor = PhaseProcessor::new(64, 16).unwrap();
        let mut spectra = vec![ChannelSpectrum::new(33).unwrap()];
        let mut bins = vec![Complex::new(0.0, 0.0); 33];
        for (k, mag) in [(4, 1.0), (5, 6.0), (6, 2.0), (7, 0.5), (8, 3.0), (9, 7.0), (10, 1.0)] {
            bins[k] = Complex::from_polar(mag, k as f32 * 0.1);
        }
        spectra[0].current = bins;

        processor.process(&mut spectra);
        assert_eq!(processor.peaks, vec![5, 9]);
        assert_eq!(processor.lowest_bin_between(5, 9), 7);
    }
}
