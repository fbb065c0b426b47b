//! Tempus - render a test tone through a stretch handle
//!
//! Usage: `tempus [ratio] [seconds]`
//!
//! Streams a synthetic two-tone signal through a handle built from the saved
//! settings, `ratio` output seconds per input second, and reports the level
//! of what came out. Set `RUST_LOG=debug` to see engine configuration.

use std::f32::consts::PI;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tempus_stretch::{Settings, StretchHandle};

/// Input samples per channel handed to each process call
const CHUNK: usize = 1024;

/// Two sines per channel, detuned across channels
struct ToneGenerator {
    sample_rate: f32,
    position: u64,
}

impl ToneGenerator {
    fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            position: 0,
        }
    }

    fn fill(&mut self, channels: &mut [Vec<f32>]) {
        let len = channels.first().map_or(0, Vec::len);
        for (c, channel) in channels.iter_mut().enumerate() {
            let base = 220.0 * (1.0 + c as f32 * 0.5);
            for (i, sample) in channel.iter_mut().enumerate() {
                let t = (self.position + i as u64) as f32 / self.sample_rate;
                *sample = 0.3 * (2.0 * PI * base * t).sin() + 0.2 * (2.0 * PI * base * 1.5 * t).sin();
            }
        }
        self.position += len as u64;
    }
}

/// Running output statistics
#[derive(Default)]
struct Levels {
    peak: f32,
    sum_sq: f64,
    samples: u64,
    non_finite: u64,
}

impl Levels {
    fn add(&mut self, samples: &[f32]) {
        for &s in samples {
            if !s.is_finite() {
                self.non_finite += 1;
                continue;
            }
            self.peak = self.peak.max(s.abs());
            self.sum_sq += (s as f64) * (s as f64);
            self.samples += 1;
        }
    }

    fn rms(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            (self.sum_sq / self.samples as f64).sqrt()
        }
    }
}

fn parse_arg(arg: Option<String>, name: &str, default: f64) -> anyhow::Result<f64> {
    let Some(arg) = arg else {
        return Ok(default);
    };
    let value: f64 = arg
        .parse()
        .with_context(|| format!("invalid {}: {:?}", name, arg))?;
    if !(value.is_finite() && value > 0.0) {
        bail!("{} must be positive, got {}", name, value);
    }
    Ok(value)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let ratio = parse_arg(args.next(), "ratio", 1.0)?;
    let seconds = parse_arg(args.next(), "seconds", 2.0)?;

    let settings = Settings::load();
    info!(path = %Settings::config_path().display(), ?settings, "Loaded settings");

    let mut handle = StretchHandle::create_with_preset(
        i32::from(settings.channels),
        settings.sample_rate,
        settings.preset(),
    )
    .context("failed to create stretch handle")?;

    if settings.transpose_semitones != 0.0 {
        handle.set_transpose_semitones(settings.transpose_semitones)?;
    }

    let channels = handle.channel_count();
    let latency = handle.input_latency()? + handle.output_latency()?;
    info!(
        channels,
        block = handle.block_samples()?,
        interval = handle.interval_samples()?,
        latency,
        ratio,
        "Rendering test tone"
    );

    let total_input = (seconds * settings.sample_rate as f64) as u64;
    let mut generator = ToneGenerator::new(settings.sample_rate);
    let mut input = vec![vec![0.0f32; CHUNK]; channels];
    let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
    let mut levels = Levels::default();

    let mut consumed = 0u64;
    let mut produced = 0u64;
    let mut frac = 0.0f64;
    let mut calls = 0usize;

    while consumed < total_input {
        generator.fill(&mut input);

        // Carry the fractional part so long runs hit the exact ratio
        let want = CHUNK as f64 * ratio + frac;
        let output_len = want.floor() as usize;
        frac = want - output_len as f64;

        for channel in &mut output {
            channel.resize(output_len, 0.0);
        }

        let ins: Vec<&[f32]> = input.iter().map(Vec::as_slice).collect();
        let mut outs: Vec<&mut [f32]> = output.iter_mut().map(Vec::as_mut_slice).collect();
        handle.process(&ins, CHUNK, &mut outs, output_len)?;

        // Skip the start-up latency when measuring
        if produced >= latency as u64 {
            for channel in &output {
                levels.add(channel);
            }
        }

        consumed += CHUNK as u64;
        produced += output_len as u64;
        calls += 1;
    }

    handle.dispose()?;

    if levels.non_finite > 0 {
        warn!(count = levels.non_finite, "Output contained non-finite samples");
    }
    info!(calls, consumed, produced, "Finished rendering");

    println!(
        "in: {} samples  out: {} samples  peak: {:.3}  rms: {:.3}",
        consumed,
        produced,
        levels.peak,
        levels.rms()
    );

    Ok(())
}
