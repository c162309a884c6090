//! Sample-count driven trigger state machine.
//!
//! The capture loop feeds the running sample count into
//! [`TriggerEvaluator::advance`] after every read. The evaluator decides when
//! to launch a burst, notices when the transmit worker has finished it (by
//! polling a [`CompletionFlag`], never waiting on it) and, after a settle gap,
//! tells the loop to stop.
//!
//! ```text
//! Idle -> Armed(0) -> Transmitting(0) -> WaitingGap(1) -> Armed(1) -> Transmitting(1)
//!      -> ... -> Cooldown -> Done
//! ```
//!
//! Every transition is taken at most once per burst, so a burst can never be
//! relaunched no matter how long the count sits on a threshold.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::{Error, Result};

/// Set once by the transmit worker when a burst (including its end-of-burst
/// marker) has gone out. Cheap to clone; all clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CompletionFlag(Arc<AtomicBool>);

impl CompletionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_complete(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerConfig {
    /// Sample count (from program start) at which the first burst launches
    pub threshold: u64,
    /// Samples between a burst finishing and the next one starting, and
    /// between the last one finishing and the end of the program
    pub gap: u64,
    /// Bursts per run
    pub bursts: usize,
}

impl TriggerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bursts == 0 {
            return Err(Error::InvalidConfig("at least one burst is required".to_owned()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Launches `burst` once the count reaches `at`
    Armed { burst: usize, at: u64 },
    Transmitting { burst: usize },
    /// Waiting for the count to pass `finished_at + gap` before arming `next`
    WaitingGap { next: usize, finished_at: u64 },
    Cooldown { finished_at: u64 },
    Done,
}

/// What the capture loop has to do after an `advance`
#[derive(Debug, Clone)]
pub enum Action {
    /// Start transmitting `burst`; whoever runs it marks `done` afterwards
    Launch { burst: usize, done: CompletionFlag },
    /// Completion of `burst` has been observed
    Finished { burst: usize },
    /// The settle gap after the last burst has elapsed
    Terminate,
}

/// Sample counts at which a burst started and was seen finished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BurstRecord {
    pub start: u64,
    pub finished: Option<u64>,
}

#[derive(Debug)]
pub struct TriggerEvaluator {
    config: TriggerConfig,
    phase: Phase,
    in_flight: Option<CompletionFlag>,
    records: Vec<BurstRecord>,
    end: Option<u64>,
}

impl TriggerEvaluator {
    pub fn new(config: TriggerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            phase: Phase::Idle,
            in_flight: None,
            records: Vec::with_capacity(config.bursts),
            end: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn records(&self) -> &[BurstRecord] {
        &self.records
    }

    /// Sample count at which termination was signalled
    pub fn end(&self) -> Option<u64> {
        self.end
    }

    /// Feed the current sample count. Returns at most one action.
    pub fn advance(&mut self, count: u64) -> Option<Action> {
        loop {
            match self.phase {
                Phase::Idle => {
                    self.phase = Phase::Armed {
                        burst: 0,
                        at: self.config.threshold,
                    };
                }
                Phase::Armed { burst, at } => {
                    if count < at {
                        return None;
                    }
                    let done = CompletionFlag::new();
                    self.in_flight = Some(done.clone());
                    self.records.push(BurstRecord {
                        start: count,
                        finished: None,
                    });
                    self.phase = Phase::Transmitting { burst };
                    return Some(Action::Launch { burst, done });
                }
                Phase::Transmitting { burst } => {
                    let complete = self
                        .in_flight
                        .as_ref()
                        .map_or(false, CompletionFlag::is_complete);
                    if !complete {
                        return None;
                    }
                    self.in_flight = None;
                    self.records[burst].finished = Some(count);
                    self.phase = if burst + 1 < self.config.bursts {
                        Phase::WaitingGap {
                            next: burst + 1,
                            finished_at: count,
                        }
                    } else {
                        Phase::Cooldown { finished_at: count }
                    };
                    return Some(Action::Finished { burst });
                }
                Phase::WaitingGap { next, finished_at } => {
                    if count <= finished_at.saturating_add(self.config.gap) {
                        return None;
                    }
                    // Armed right now, so the launch happens on this same count
                    self.phase = Phase::Armed {
                        burst: next,
                        at: count,
                    };
                }
                Phase::Cooldown { finished_at } => {
                    if count <= finished_at.saturating_add(self.config.gap) {
                        return None;
                    }
                    self.end = Some(count);
                    self.phase = Phase::Done;
                    return Some(Action::Terminate);
                }
                Phase::Done => return None,
            }
        }
    }
}
