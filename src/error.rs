//! Error types for spatialmix

use crate::effects::EffectType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpatialMixError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Effect state construction or device update failed. The slot keeps
    /// whatever state it had before the request.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("No effect kernel registered for {0:?}")]
    UnsupportedEffect(EffectType),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type Result<T> = std::result::Result<T, SpatialMixError>;
