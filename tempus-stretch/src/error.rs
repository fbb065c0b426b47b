//! Errors reported at the handle boundary

use std::collections::TryReserveError;
use tempus_engine::EngineError;
use thiserror::Error;

/// Contract violations and resource failures of a stretch handle
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StretchError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Failed to allocate stretch engine: {0}")]
    AllocationFailure(TryReserveError),
    #[error("Handle is disposed or unknown")]
    InvalidHandle,
    #[error("Buffer for channel {channel} holds {actual} samples, {required} requested")]
    BufferTooSmall {
        channel: usize,
        required: usize,
        actual: usize,
    },
    #[error("Expected {expected} channel buffers, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
}

impl From<EngineError> for StretchError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Allocation(e) => StretchError::AllocationFailure(e),
            EngineError::InvalidConfiguration(msg) => StretchError::InvalidParameter(msg),
        }
    }
}
