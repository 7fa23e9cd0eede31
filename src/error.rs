// src/error.rs — paged-buffer error taxonomy
// Mirrors the five error kinds the engine distinguishes: bounds, state,
// I/O, storage, and integrity (assertion-class) failures.

use thiserror::Error;

/// The single error type returned by every fallible public operation.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("position {pos} out of bounds (0..={max})")]
    OutOfBounds { pos: u64, max: u64 },

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("buffer is detached: {0}")]
    Detached(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("integrity violation: {0}")]
    Integrity(String),
}

pub type Result<T> = std::result::Result<T, BufferError>;
