//! Error types for the trigger harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Requested bandwidth lies outside what the DAC can be interpolated to
    #[error("bandwidth {requested} Hz out of range [{min}, {max}] Hz")]
    BandwidthOutOfRange { requested: f64, min: f64, max: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The frame builder could not produce a frame
    #[error("frame construction failed: {0}")]
    FrameBuild(String),

    /// Output device setup or streaming failure
    #[error("radio error: {0}")]
    Radio(String),

    /// The transmit worker thread is no longer accepting requests
    #[error("transmit worker has shut down")]
    TransmitterGone,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Configuration errors are detected before any device is touched
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::BandwidthOutOfRange { .. } | Error::InvalidConfig(_)
        )
    }
}
