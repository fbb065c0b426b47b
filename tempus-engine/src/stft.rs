//! Short-Time Fourier Transform for the streaming stretch engine.
//!
//! Features:
//! - Planned forward/inverse transforms (`rustfft`, any block length)
//! - Pre-computed Hann analysis window
//! - Dual synthesis window normalised by the overlap sum, so a 1:1 ratio
//!   reconstructs the input exactly (after latency)
//! - Zero-allocation processing once constructed

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::TryReserveError;
use std::f32::consts::PI;
use std::sync::Arc;

/// Allocate a vector of `len` copies of `value`, reporting allocation failure
/// instead of aborting.
pub(crate) fn try_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>, TryReserveError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize(len, value);
    Ok(v)
}

/// Short-Time Fourier Transform processor shared by all channels
pub struct Stft {
    /// Block (FFT) size
    size: usize,
    /// Hann analysis window
    window: Vec<f32>,
    /// Synthesis window, already scaled by 1/size for the inverse FFT
    synthesis_window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    /// Working buffer for FFT (avoid allocation)
    work: Vec<Complex<f32>>,
    /// Scratch space required by the planned transforms
    scratch: Vec<Complex<f32>>,
}

impl Stft {
    /// Create new STFT processor for `size`-sample blocks advancing by `hop_size`.
    ///
    /// `size` must be even and `hop_size` in `1..=size / 2`.
    pub fn new(size: usize, hop_size: usize) -> Result<Self, TryReserveError> {
        debug_assert!(size >= 2 && size % 2 == 0);
        debug_assert!(hop_size >= 1 && hop_size <= size / 2);

        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        // Periodic Hann window (raised cosine, optimal for overlap-add)
        let mut window = try_filled(size, 0.0f32)?;
        for (i, w) in window.iter_mut().enumerate() {
            let x = 2.0 * PI * i as f32 / size as f32;
            *w = 0.5 * (1.0 - x.cos());
        }

        // Sum of squared windows landing on each phase of the hop
        let mut overlap = try_filled(hop_size, 0.0f32)?;
        for (i, w) in window.iter().enumerate() {
            overlap[i % hop_size] += w * w;
        }

        let norm = 1.0 / size as f32;
        let mut synthesis_window = try_filled(size, 0.0f32)?;
        for (i, s) in synthesis_window.iter_mut().enumerate() {
            let sum = overlap[i % hop_size];
            *s = if sum > f32::EPSILON {
                window[i] * norm / sum
            } else {
                0.0
            };
        }

        Ok(Self {
            size,
            window,
            synthesis_window,
            forward,
            inverse,
            work: try_filled(size, Complex::new(0.0, 0.0))?,
            scratch: try_filled(scratch_len, Complex::new(0.0, 0.0))?,
        })
    }

    /// Get number of positive frequency bins (size/2 + 1)
    #[inline]
    pub fn num_bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Window `frame` and write its positive-frequency bins to `output`.
    pub fn analyze(&mut self, frame: &[f32], output: &mut [Complex<f32>]) {
        debug_assert_eq!(frame.len(), self.size);
        debug_assert!(output.len() >= self.num_bins());

        for ((w, &x), &win) in self.work.iter_mut().zip(frame).zip(&self.window) {
            *w = Complex::new(x * win, 0.0);
        }

        self.forward
            .process_with_scratch(&mut self.work, &mut self.scratch);

        let bins = self.num_bins();
        output[..bins].copy_from_slice(&self.work[..bins]);
    }

    /// Inverse-transform `input` bins and overlap-add them into `ring`
    /// starting at `start` (wrapping around the ring).
    pub fn synthesize(&mut self, input: &[Complex<f32>], ring: &mut [f32], start: usize) {
        debug_assert!(input.len() >= self.num_bins());
        debug_assert!(ring.len() >= self.size);

        // Reconstruct full spectrum from positive frequencies (Hermitian symmetry)
        let bins = self.num_bins();
        self.work[..bins].copy_from_slice(&input[..bins]);
        self.work[0].im = 0.0;
        self.work[self.size / 2].im = 0.0;
        for i in 1..self.size / 2 {
            self.work[self.size - i] = input[i].conj();
        }

        self.inverse
            .process_with_scratch(&mut self.work, &mut self.scratch);

        let ring_len = ring.len();
        for (i, (w, &win)) in self.work.iter().zip(&self.synthesis_window).enumerate() {
            ring[(start + i) % ring_len] += w.re * win;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stft_identity_reconstruction() {
        let size = 64;
        let hop = 16;
        let mut stft = Stft::new(size, hop).unwrap();
        let mut bins = vec![Complex::new(0.0, 0.0); stft.num_bins()];

        let signal: Vec<f32> = (0..size * 4)
            .map(|i| (2.0 * PI * 3.0 * i as f32 / size as f32).sin() * 0.5)
            .collect();
        let mut ring = vec![0.0f32; signal.len() + size];

        let mut start = 0;
        while start + size <= signal.len() {
            stft.analyze(&signal[start..start + size], &mut bins);
            stft.synthesize(&bins, &mut ring, start);
            start += hop;
        }

        // Fully overlapped region must match the input
        for i in size..signal.len() - size {
            assert!(
                (ring[i] - signal[i]).abs() < 1e-4,
                "sample {} differs: {} vs {}",
                i,
                ring[i],
                signal[i]
            );
        }
    }

    #[test]
    fn test_non_power_of_two_size() {
        let mut stft = Stft::new(4800, 1920).unwrap();
        assert_eq!(stft.num_bins(), 2401);

        let frame = vec![0.0f32; 4800];
        let mut bins = vec![Complex::new(1.0, 1.0); stft.num_bins()];
        stft.analyze(&frame, &mut bins);
        assert!(bins.iter().all(|b| b.norm() == 0.0));
    }

    #[test]
    fn test_synthesize_wraps_ring() {
        let mut stft = Stft::new(8, 2).unwrap();
        let bins = vec![Complex::new(0.0, 0.0); stft.num_bins()];
        let mut ring = vec![0.0f32; 8];
        stft.synthesize(&bins, &mut ring, 6);
        assert!(ring.iter().all(|&s| s == 0.0));
    }
}
