//! Argument parsing for running from the command line

use std::path::PathBuf;

use burst_trigger::{
    radio::{BandwidthRange, TxRequest, DAC_RATE},
    trigger::TriggerConfig,
    Error, Result, BLOCK_SIZE, DEFAULT_DELTA, READ_SAMPLES,
};
use chrono::{DateTime, Datelike, Timelike, Utc};
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Center frequency [Hz]
    #[clap(short, long, default_value_t = 462e6)]
    pub frequency: f64,
    /// Bandwidth [Hz]
    #[clap(short, long, default_value_t = 250e3)]
    pub bandwidth: f64,
    /// Software tx gain [dB]
    #[clap(short, long, default_value_t = -12.0, allow_hyphen_values = true)]
    pub gain: f32,
    /// Hardware tx gain [dB]
    #[clap(short = 'G', long, default_value_t = 40.0)]
    pub hw_gain: f64,
    /// Frame repetitions per burst
    #[clap(short = 'N', long, default_value_t = 2000)]
    pub repetitions: u32,
    /// Capture device to read samples from
    #[clap(long, default_value = "/dev/langford")]
    pub capture: PathBuf,
    /// File the raw captured bytes are appended to
    #[clap(short, long, default_value = "noctar_samples")]
    pub output: PathBuf,
    /// Lifecycle report [default: <output>.log]
    #[clap(long)]
    pub log_file: Option<PathBuf>,
    /// File backing the transmitter
    #[clap(long, default_value = "tx_samples.cf32")]
    pub tx_sink: PathBuf,
    /// Sample count at which the first burst starts
    #[clap(long, default_value_t = DEFAULT_DELTA)]
    pub threshold: u64,
    /// Samples between bursts, and after the last one before exiting
    #[clap(long, default_value_t = DEFAULT_DELTA)]
    pub gap: u64,
    /// Number of bursts
    #[clap(long, default_value_t = 1)]
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub bursts: u16,
    /// Samples per capture read
    #[clap(long, default_value_t = READ_SAMPLES)]
    pub read_samples: usize,
    /// Transmit block size in samples
    #[clap(long, default_value_t = BLOCK_SIZE)]
    pub block_size: usize,
    /// Packet id written into the frame header
    #[clap(long, default_value_t = 0)]
    pub pid: u16,
    /// Append a UTC timestamp to output file names
    #[clap(long)]
    pub timestamp: bool,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

/// Output files of one run
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub samples: PathBuf,
    pub log: PathBuf,
    pub tx: PathBuf,
}

impl Args {
    /// Everything that can be checked before touching a device
    pub fn validate(&self) -> Result<()> {
        BandwidthRange::for_dac(DAC_RATE).check(self.bandwidth)?;
        if self.read_samples == 0 {
            return Err(Error::InvalidConfig("read size must be non-zero".to_owned()));
        }
        if self.block_size == 0 {
            return Err(Error::InvalidConfig("block size must be non-zero".to_owned()));
        }
        self.trigger_config().validate()
    }

    pub fn tx_request(&self) -> TxRequest {
        TxRequest {
            frequency: self.frequency,
            bandwidth: self.bandwidth,
            gain_db: self.hw_gain,
        }
    }

    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            threshold: self.threshold,
            gap: self.gap,
            bursts: self.bursts as usize,
        }
    }

    pub fn output_paths(&self, now: &DateTime<Utc>) -> OutputPaths {
        let stamp = |p: &PathBuf| {
            if self.timestamp {
                let mut s = p.clone().into_os_string();
                s.push("-");
                s.push(file_timestamp(now));
                PathBuf::from(s)
            } else {
                p.clone()
            }
        };
        let samples = stamp(&self.output);
        let log = match &self.log_file {
            Some(p) => stamp(p),
            None => {
                let mut s = samples.clone().into_os_string();
                s.push(".log");
                PathBuf::from(s)
            }
        };
        OutputPaths {
            samples,
            log,
            tx: stamp(&self.tx_sink),
        }
    }
}

/// Filename-safe UTC timestamp
fn file_timestamp(time: &DateTime<Utc>) -> String {
    format!(
        "{}-{:02}-{:02}T{:02}{:02}{:02}",
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    )
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}
