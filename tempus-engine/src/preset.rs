//! Engine presets: block and interval sizes derived from the sample rate.

/// Smallest block the engine will run with
pub const MIN_BLOCK_SAMPLES: usize = 32;
/// Largest block the engine will run with
pub const MAX_BLOCK_SAMPLES: usize = 65536;

/// Tuning bundle selected at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Preset {
    /// 120 ms blocks, 30 ms interval (4x overlap)
    Default,
    /// 100 ms blocks, 40 ms interval (fewer frames, lower CPU)
    #[default]
    Cheaper,
    /// Explicit sizes in samples
    Custom {
        block_samples: usize,
        interval_samples: usize,
    },
}

impl Preset {
    /// Resolve to `(block, interval)` in samples for `sample_rate`.
    ///
    /// The block is rounded up to an even length and clamped to
    /// [`MIN_BLOCK_SAMPLES`]..=[`MAX_BLOCK_SAMPLES`]; the interval is clamped to
    /// `1..=block / 2`.
    pub fn resolve(self, sample_rate: f32) -> (usize, usize) {
        let sr = sample_rate as f64;
        let (block, interval) = match self {
            Preset::Default => ((sr * 0.12).round() as usize, (sr * 0.03).round() as usize),
            Preset::Cheaper => ((sr * 0.1).round() as usize, (sr * 0.04).round() as usize),
            Preset::Custom {
                block_samples,
                interval_samples,
            } => (block_samples, interval_samples),
        };

        let block = block.clamp(MIN_BLOCK_SAMPLES, MAX_BLOCK_SAMPLES);
        let block = block + block % 2;
        let interval = interval.clamp(1, block / 2);
        (block, interval)
    }
}
