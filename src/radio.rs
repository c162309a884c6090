//! Output (radio) device contract and the rate math around it.
//!
//! Real hardware lives behind [`Radio`] / [`TxStreamer`]. [`FileRadio`] is a
//! stand-in that writes cf32 to a file, paced to the achieved sample rate.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use byte_slice_cast::AsByteSlice;
use tracing::{debug, info};

use crate::{
    complex::{interleave, Sample},
    error::{Error, Result},
};

/// DAC clock of the transmitter
pub const DAC_RATE: f64 = 64e6;
/// Transmit sample rate per Hz of requested bandwidth
const OVERSAMPLE: f64 = 4.0;

/// Bandwidths the interpolation chain can reach for a given DAC clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthRange {
    pub min: f64,
    pub max: f64,
}

impl BandwidthRange {
    pub fn for_dac(dac_rate: f64) -> Self {
        Self {
            min: 0.25 * (dac_rate / 512.0),
            max: 0.25 * (dac_rate / 4.0),
        }
    }

    pub fn check(&self, bandwidth: f64) -> Result<()> {
        if !(self.min..=self.max).contains(&bandwidth) {
            return Err(Error::BandwidthOutOfRange {
                requested: bandwidth,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Interpolation for a target rate: a multiple of 4, avoiding 240 and 244
/// which the hardware refuses.
pub fn interpolation(dac_rate: f64, tx_rate: f64) -> u32 {
    let mut interp = (dac_rate / tx_rate) as u32;
    interp = (interp >> 2) << 2;
    while interp == 240 || interp == 244 {
        interp -= 4;
    }
    interp.max(4)
}

/// What the experiment asks the radio for
#[derive(Debug, Clone, Copy)]
pub struct TxRequest {
    /// Center frequency [Hz]
    pub frequency: f64,
    /// Bandwidth [Hz]
    pub bandwidth: f64,
    /// Hardware gain [dB]
    pub gain_db: f64,
}

impl TxRequest {
    pub fn tx_rate(&self) -> f64 {
        OVERSAMPLE * self.bandwidth
    }
}

/// What the radio actually achieved. Downstream rate math must use these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxTuning {
    pub frequency: f64,
    pub rate: f64,
    pub interp: u32,
    pub gain_db: f64,
}

/// Per-send burst flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxMetadata {
    pub end_of_burst: bool,
}

impl TxMetadata {
    /// Mid-burst data
    pub const CONTINUOUS: Self = Self { end_of_burst: false };
    pub const END_OF_BURST: Self = Self { end_of_burst: true };
}

pub trait TxStreamer: Send {
    /// Send one block on every channel. All slices share a length; an empty
    /// block with `end_of_burst` set closes the burst. Returns the number of
    /// samples per channel the device accepted.
    fn send(&mut self, buffs: &[&[Sample]], md: &TxMetadata, timeout: Duration) -> Result<usize>;
}

pub trait Radio {
    type Streamer: TxStreamer + 'static;

    fn setup(&mut self, request: &TxRequest) -> Result<TxTuning>;

    fn num_channels(&self) -> usize;

    fn tx_stream(&mut self) -> Result<Self::Streamer>;
}

/// Radio that writes every sent block as interleaved little-endian cf32
#[derive(Debug)]
pub struct FileRadio {
    path: PathBuf,
    dac_rate: f64,
    tuning: Option<TxTuning>,
    pace: bool,
}

impl FileRadio {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            dac_rate: DAC_RATE,
            tuning: None,
            pace: true,
        }
    }

    /// Write as fast as the disk allows instead of at the tuned rate
    pub fn unpaced(mut self) -> Self {
        self.pace = false;
        self
    }
}

impl Radio for FileRadio {
    type Streamer = FileStreamer;

    fn setup(&mut self, request: &TxRequest) -> Result<TxTuning> {
        let interp = interpolation(self.dac_rate, request.tx_rate());
        let tuning = TxTuning {
            frequency: request.frequency,
            rate: self.dac_rate / interp as f64,
            interp,
            gain_db: request.gain_db,
        };
        info!(
            frequency_mhz = tuning.frequency * 1e-6,
            bandwidth_khz = request.bandwidth * 1e-3,
            rate_khz = tuning.rate * 1e-3,
            resamp = request.tx_rate() / tuning.rate,
            interp,
            "Configured file radio"
        );
        self.tuning = Some(tuning);
        Ok(tuning)
    }

    fn num_channels(&self) -> usize {
        1
    }

    fn tx_stream(&mut self) -> Result<FileStreamer> {
        let tuning = self
            .tuning
            .ok_or_else(|| Error::Radio("tx stream requested before setup".to_owned()))?;
        let file = File::create(&self.path)?;
        Ok(FileStreamer {
            writer: BufWriter::new(file),
            rate: if self.pace { Some(tuning.rate) } else { None },
            scratch: Vec::new(),
            burst: None,
        })
    }
}

pub struct FileStreamer {
    writer: BufWriter<File>,
    rate: Option<f64>,
    scratch: Vec<f32>,
    // Start time and samples written so far in the current burst
    burst: Option<(Instant, u64)>,
}

impl FileStreamer {
    fn pace(&mut self, n: usize) {
        let rate = match self.rate {
            Some(r) => r,
            None => return,
        };
        let (start, sent) = self.burst.get_or_insert_with(|| (Instant::now(), 0));
        *sent += n as u64;
        let due = Duration::from_secs_f64(*sent as f64 / rate);
        let elapsed = start.elapsed();
        if due > elapsed {
            thread::sleep(due - elapsed);
        }
    }
}

impl TxStreamer for FileStreamer {
    fn send(&mut self, buffs: &[&[Sample]], md: &TxMetadata, _timeout: Duration) -> Result<usize> {
        let n = buffs.first().map_or(0, |b| b.len());
        if buffs.iter().any(|b| b.len() != n) {
            return Err(Error::Radio("channel buffers differ in length".to_owned()));
        }
        if n > 0 {
            // Single channel device, the rest are replicas
            interleave(buffs[0], &mut self.scratch);
            // cf32 files are little-endian whatever the host order
            for x in &mut self.scratch {
                *x = f32::from_bits(x.to_bits().to_le());
            }
            self.writer.write_all(self.scratch.as_byte_slice())?;
            self.pace(n);
        }
        if md.end_of_burst {
            self.writer.flush()?;
            self.burst = None;
            debug!("End of burst");
        }
        Ok(n)
    }
}
