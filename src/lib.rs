pub mod burst;
pub mod capture;
pub mod complex;
pub mod error;
pub mod experiment;
pub mod frame;
pub mod radio;
pub mod transmit;
pub mod trigger;

pub use error::{Error, Result};

/// Samples pulled from the capture device per read
pub const READ_SAMPLES: usize = 256;
/// Transmit block size in samples
pub const BLOCK_SIZE: usize = 256;
/// Capture samples per second (2.4 GS/s, decimated by 32)
pub const CAPTURE_RATE: u64 = 2_400_000_000 / 32;
/// Default first-trigger threshold and settle gap, one second of capture
pub const DEFAULT_DELTA: u64 = CAPTURE_RATE;
