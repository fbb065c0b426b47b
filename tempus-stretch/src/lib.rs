//! Stretch handles for Tempus - ownership, validation, and handle tables
//!
//! This crate is the host-facing surface around the streaming engine:
//! - Handle: exclusively owned engine with fixed channel count and sample rate
//! - Registry: id-addressed handles for callers that cannot hold Rust ownership
//! - Config: persisted preset and transposition settings

mod config;
mod error;
mod handle;
mod registry;

pub use config::{PresetKind, Settings};
pub use error::StretchError;
pub use handle::StretchHandle;
pub use registry::{HandleId, HandleRegistry};

pub use tempus_engine::{EngineError, Preset, SpectralStretch, StretchEngine};
