//! Error types for btuart.

use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// Result type for btuart operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for btuart operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Device construction was attempted without a transport.
    #[error("No transport provided")]
    NoTransport,

    /// A firmware image is absent or only a placeholder.
    #[error("Firmware image '{name}' not present ({len} bytes, need at least {min})")]
    FirmwareMissing {
        /// Image name.
        name: String,
        /// Actual image length.
        len: usize,
        /// Minimum accepted length.
        min: usize,
    },

    /// Driver state could not be allocated.
    #[error("Allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    /// Device answered with something other than the expected frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Device-reported response length does not fit the response buffer.
    #[error("Response overflow: need {needed} bytes, buffer holds {capacity}")]
    ResponseOverflow {
        /// Bytes the response would occupy.
        needed: usize,
        /// Buffer capacity.
        capacity: usize,
    },

    /// Transport stopped making progress.
    #[error("Transport stalled after {stalls} attempts without progress ({done}/{total} bytes)")]
    TransportStalled {
        /// Consecutive attempts that transferred nothing.
        stalls: u32,
        /// Bytes transferred before the stall.
        done: usize,
        /// Bytes requested.
        total: usize,
    },

    /// Malformed packed firmware image.
    #[error("Invalid firmware image: {0}")]
    InvalidImage(String),

    /// Malformed TI BTS script.
    #[error("Invalid BTS script: {0}")]
    InvalidBts(String),

    /// Operation was cancelled by the embedding application.
    #[error("Interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse error classes reported to device-construction callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing transport or firmware, bad image, bad settings. Detected before I/O.
    Configuration,
    /// Device response did not follow the H4 event framing.
    Protocol,
    /// Driver state could not be allocated.
    Allocation,
    /// Underlying read/write failed or stalled.
    Transport,
    /// Stopped on request.
    Interrupted,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoTransport
            | Self::FirmwareMissing { .. }
            | Self::InvalidImage(_)
            | Self::InvalidBts(_)
            | Self::Config(_) => ErrorKind::Configuration,
            Self::Protocol(_) | Self::ResponseOverflow { .. } => ErrorKind::Protocol,
            Self::Allocation(_) => ErrorKind::Allocation,
            Self::Io(_) | Self::TransportStalled { .. } => ErrorKind::Transport,
            #[cfg(feature = "native")]
            Self::Serial(_) => ErrorKind::Transport,
            Self::Interrupted => ErrorKind::Interrupted,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub(crate) fn invalid_image(msg: impl Into<String>) -> Self {
        Self::InvalidImage(msg.into())
    }

    pub(crate) fn invalid_bts(msg: impl Into<String>) -> Self {
        Self::InvalidBts(msg.into())
    }
}
