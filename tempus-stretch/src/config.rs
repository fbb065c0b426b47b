//! Simple settings persistence for Tempus
//!
//! Stores the preset, transposition and stream format used to build handles.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempus_engine::Preset;

/// Which preset the settings select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresetKind {
    Default,
    #[default]
    Cheaper,
    Custom,
}

impl PresetKind {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "default" => Some(PresetKind::Default),
            "cheaper" => Some(PresetKind::Cheaper),
            "custom" => Some(PresetKind::Custom),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            PresetKind::Default => "default",
            PresetKind::Cheaper => "cheaper",
            PresetKind::Custom => "custom",
        }
    }
}

/// Stretch settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub preset: PresetKind,
    /// Block size for the custom preset
    pub block_samples: usize,
    /// Interval size for the custom preset
    pub interval_samples: usize,
    pub transpose_semitones: f32,
    pub channels: u16,
    pub sample_rate: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            preset: PresetKind::Cheaper,
            block_samples: 4096,
            interval_samples: 1024,
            transpose_semitones: 0.0,
            channels: 2,
            sample_rate: 48000.0,
        }
    }
}

impl Settings {
    /// Load settings from the default location
    ///
    /// Returns default settings if the file doesn't exist or can't be read.
    pub fn load() -> Self {
        let path = Self::config_path();
        Self::load_from(&path).unwrap_or_default()
    }

    /// Load settings from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save settings to the default location
    pub fn save(&self) -> io::Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, self.serialize())
    }

    /// Get the default settings file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tempus")
            .join("config.txt")
    }

    /// Engine preset described by these settings
    pub fn preset(&self) -> Preset {
        match self.preset {
            PresetKind::Default => Preset::Default,
            PresetKind::Cheaper => Preset::Cheaper,
            PresetKind::Custom => Preset::Custom {
                block_samples: self.block_samples,
                interval_samples: self.interval_samples,
            },
        }
    }

    /// Parse settings from simple key=value format
    ///
    /// Unknown keys and unparsable values leave the defaults in place.
    fn parse(content: &str) -> Self {
        let mut settings = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "preset" => {
                    if let Some(kind) = PresetKind::parse(value) {
                        settings.preset = kind;
                    }
                }
                "block_samples" => {
                    if let Ok(v) = value.parse() {
                        settings.block_samples = v;
                    }
                }
                "interval_samples" => {
                    if let Ok(v) = value.parse() {
                        settings.interval_samples = v;
                    }
                }
                "transpose_semitones" => {
                    if let Ok(v) = value.parse::<f32>() {
                        if v.is_finite() {
                            settings.transpose_semitones = v;
                        }
                    }
                }
                "channels" => {
                    if let Ok(v) = value.parse::<u16>() {
                        if v > 0 {
                            settings.channels = v;
                        }
                    }
                }
                "sample_rate" => {
                    if let Ok(v) = value.parse::<f32>() {
                        if v.is_finite() && v > 0.0 {
                            settings.sample_rate = v;
                        }
                    }
                }
                _ => {} // Ignore unknown keys
            }
        }

        settings
    }

    /// Serialize settings to simple key=value format
    fn serialize(&self) -> String {
        let lines = [
            "# Tempus Configuration".to_string(),
            format!("preset={}", self.preset.as_str()),
            format!("block_samples={}", self.block_samples),
            format!("interval_samples={}", self.interval_samples),
            format!("transpose_semitones={}", self.transpose_semitones),
            format!("channels={}", self.channels),
            format!("sample_rate={}", self.sample_rate),
        ];
        lines.join("\n")
    }
}
