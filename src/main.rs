use std::{
    fs::File,
    io::BufWriter,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use burst_trigger::{
    burst::{BurstBuffer, BurstParams},
    capture::CaptureReader,
    experiment,
    frame::Frame64,
    radio::{FileRadio, Radio},
    transmit::{Transmitter, FLUSH_DELAY},
    trigger::TriggerEvaluator,
};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

mod args;

fn main() -> anyhow::Result<()> {
    let args = args::Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args::convert_filter(args.verbose.log_level_filter()))
        .init();

    // Bad configuration never gets as far as opening a device
    args.validate().context("invalid configuration")?;

    let paths = args.output_paths(&Utc::now());

    // Set up the radio and prepare the burst
    let mut radio = FileRadio::new(&paths.tx);
    let tuning = radio.setup(&args.tx_request())?;
    let buffer = BurstBuffer::prepare(
        &mut Frame64::new(),
        &mut rand::thread_rng(),
        &BurstParams {
            pid: args.pid,
            gain_db: args.gain,
            block_size: args.block_size,
            channels: radio.num_channels(),
        },
    )
    .context("failed to prepare burst buffer")?;
    info!(
        seconds = args.repetitions as f64 * buffer.len() as f64 / tuning.rate,
        repetitions = args.repetitions,
        "Expected burst duration"
    );
    let streamer = radio.tx_stream().context("failed to open tx stream")?;
    let mut transmitter =
        Transmitter::spawn(streamer, Arc::new(buffer), args.repetitions, FLUSH_DELAY)?;

    // Open the capture device and the sample sink
    let device = File::open(&args.capture)
        .with_context(|| format!("failed to open capture device {}", args.capture.display()))?;
    let sink = File::create(&paths.samples)
        .with_context(|| format!("failed to create {}", paths.samples.display()))?;
    let mut capture = CaptureReader::new(device, BufWriter::new(sink), args.read_samples);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupted, stopping capture");
        r.store(false, Ordering::SeqCst);
    })?;

    let mut evaluator = TriggerEvaluator::new(args.trigger_config())?;
    info!(
        threshold = args.threshold,
        gap = args.gap,
        bursts = args.bursts,
        "Starting capture"
    );
    let outcome = experiment::run(&mut capture, &mut evaluator, &mut transmitter, &running);

    // Close out the capture even if the loop failed
    capture.finish()?;
    transmitter.shutdown()?;
    let log = outcome?;
    log.write_to(&paths.log)
        .with_context(|| format!("failed to write {}", paths.log.display()))?;
    info!(path = %paths.log.display(), "{}", log.to_string().trim_end());
    Ok(())
}
