//! Transmission executor.
//!
//! A single worker thread owns the tx streamer and a shared view of the
//! prepared burst. The capture loop hands it requests over a channel and
//! never waits on it; completion is reported through the request's
//! [`CompletionFlag`].

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, info, warn};

use crate::{
    burst::BurstBuffer,
    complex::Sample,
    error::{Error, Result},
    radio::{TxMetadata, TxStreamer},
    trigger::CompletionFlag,
};

pub const SEND_TIMEOUT: Duration = Duration::from_millis(100);
/// Time the device gets to drain its buffers after the end-of-burst send
pub const FLUSH_DELAY: Duration = Duration::from_millis(100);

/// What happened during one burst. Purely informational, nothing is retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxReport {
    pub repetitions: u32,
    /// Samples per channel the device accepted
    pub samples_sent: u64,
    /// Sends that were accepted only in part
    pub short_sends: u64,
    /// Sends that failed outright
    pub errors: u64,
}

/// Send every block once per repetition, then the end-of-burst marker
pub fn transmit_burst<S>(streamer: &mut S, buffer: &BurstBuffer, repetitions: u32) -> TxReport
where
    S: TxStreamer + ?Sized,
{
    let mut report = TxReport {
        repetitions,
        ..Default::default()
    };
    let views = buffer.channel_views();
    for rep in 0..repetitions {
        debug!(rep, "tx packet id");
        for view in &views {
            let expected = view.first().map_or(0, |b| b.len());
            match streamer.send(view, &TxMetadata::CONTINUOUS, SEND_TIMEOUT) {
                Ok(n) => {
                    report.samples_sent += n as u64;
                    if n < expected {
                        report.short_sends += 1;
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    debug!(%e, rep, "send failed");
                }
            }
        }
    }
    // The device stays in a burst until it sees an explicit empty EOB send
    let eob: Vec<&[Sample]> = vec![&[][..]; buffer.channels()];
    if let Err(e) = streamer.send(&eob, &TxMetadata::END_OF_BURST, SEND_TIMEOUT) {
        report.errors += 1;
        warn!(%e, "end-of-burst send failed");
    }
    report
}

struct Request {
    burst: usize,
    done: CompletionFlag,
}

/// Anything that can run a burst in the background and mark it done
pub trait Dispatch {
    fn dispatch(&mut self, burst: usize, done: CompletionFlag) -> Result<()>;
}

pub struct Transmitter {
    sender: Option<Sender<Request>>,
    worker: Option<JoinHandle<()>>,
}

impl Transmitter {
    /// Start the worker. Each burst is reported done `flush_delay` after its
    /// end-of-burst send.
    pub fn spawn<S>(
        streamer: S,
        buffer: Arc<BurstBuffer>,
        repetitions: u32,
        flush_delay: Duration,
    ) -> Result<Self>
    where
        S: TxStreamer + 'static,
    {
        // The evaluator never has more than one burst in flight
        let (sender, receiver) = bounded::<Request>(1);
        let worker = thread::Builder::new()
            .name("transmit".to_owned())
            .spawn(move || {
                let mut streamer = streamer;
                for req in receiver {
                    let report = transmit_burst(&mut streamer, &buffer, repetitions);
                    if report.short_sends > 0 || report.errors > 0 {
                        warn!(
                            burst = req.burst,
                            short_sends = report.short_sends,
                            errors = report.errors,
                            "Burst had incomplete sends"
                        );
                    }
                    info!(
                        burst = req.burst,
                        samples = report.samples_sent,
                        "Data transfer complete"
                    );
                    thread::sleep(flush_delay);
                    req.done.mark_complete();
                }
            })?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn submit(&self, burst: usize, done: CompletionFlag) -> Result<()> {
        self.sender
            .as_ref()
            .ok_or(Error::TransmitterGone)?
            .send(Request { burst, done })
            .map_err(|_| Error::TransmitterGone)
    }

    /// Wait for any in-flight burst to finish and stop the worker
    pub fn shutdown(mut self) -> Result<()> {
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        self.sender.take();
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| Error::TransmitterGone),
            None => Ok(()),
        }
    }
}

impl Dispatch for Transmitter {
    fn dispatch(&mut self, burst: usize, done: CompletionFlag) -> Result<()> {
        self.submit(burst, done)
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        let _ = self.join();
    }
}
