//! Crate-wide error type.
//!
//! Drop/recovery conditions that are part of normal receive-pipeline control
//! flow (fill frames, CRC failures, sequence gaps, uncorrectable
//! Reed-Solomon codewords) are never represented here: they are logged and
//! counted, not propagated as errors. This type is for conditions outside
//! that normal flow: malformed configuration, I/O failure, and a queue
//! being poisoned by a panicked stage.

use thiserror::Error;

/// Errors that can occur while configuring or running the receive pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// A stage's input or output queue was closed while this stage still
    /// expected to use it.
    #[error("queue closed")]
    QueueClosed,

    /// A mutex guarding shared queue state was poisoned by a panicking
    /// thread.
    #[error("queue lock poisoned")]
    LockPoisoned,

    /// I/O failure reading from a [`crate::source::Source`].
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration value was out of the range the component requires.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A stage thread panicked or could not be joined.
    #[error("stage {0} failed: {1}")]
    Stage(String, String),
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
