//! Error types shared by the scan engine and the device backends.

use thiserror::Error;

use crate::device::Control;

/// Errors raised by device collaborators and the scan engine.
///
/// Table timeouts and lock failures are not errors: they are
/// [`Fetch::Unavailable`](crate::tables::Fetch) and
/// [`LockOutcome::Failed`](crate::lock::LockOutcome) respectively.
#[derive(Error, Debug)]
pub enum Error {
    /// Frequency or bandwidth is not a positive value.
    #[error("Invalid tune parameters: frequency={frequency} kHz, bandwidth={bandwidth} MHz")]
    InvalidTuneParameters { frequency: u32, bandwidth: u32 },

    /// The device or driver could not answer a query.
    #[error("Device query failed: {0}")]
    DeviceQueryFailed(String),

    /// The device does not implement the requested control.
    #[error("Control {0:?} is not supported by this device")]
    Unsupported(Control),

    /// A device node could not be opened.
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The scan was cancelled at a poll boundary.
    #[error("Scan cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
