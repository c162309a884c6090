//! The measurement run: capture, trigger, dispatch, and the lifecycle report.

use std::{
    fmt,
    fs::File,
    io::{Read, Write},
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use tracing::{info, warn};

use crate::{
    capture::CaptureReader,
    error::Result,
    transmit::Dispatch,
    trigger::{Action, BurstRecord, TriggerEvaluator},
};

/// Sample-count timestamps of a run, written once at shutdown.
///
/// The first line is always the three-field report for the first burst;
/// unreached events read as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentLog {
    pub bursts: Vec<BurstRecord>,
    pub end_program: u64,
    /// False when the run was stopped before the evaluator finished
    pub completed: bool,
}

impl ExperimentLog {
    pub fn start_transmission(&self) -> u64 {
        self.bursts.first().map_or(0, |b| b.start)
    }

    pub fn finished_transmitting(&self) -> u64 {
        self.bursts.first().and_then(|b| b.finished).unwrap_or(0)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        write!(file, "{}", self)?;
        file.flush()?;
        Ok(())
    }
}

impl fmt::Display for ExperimentLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "start transmission: {} finished transmitting: {} end program: {}",
            self.start_transmission(),
            self.finished_transmitting(),
            self.end_program
        )?;
        for (i, burst) in self.bursts.iter().enumerate().skip(1) {
            writeln!(
                f,
                "burst {} start transmission: {} finished transmitting: {}",
                i + 1,
                burst.start,
                burst.finished.unwrap_or(0)
            )?;
        }
        Ok(())
    }
}

/// Run the capture loop until the evaluator terminates or `running` is cleared.
/// Every chunk is persisted before the evaluator sees the new count.
pub fn run<R, W, D>(
    capture: &mut CaptureReader<R, W>,
    evaluator: &mut TriggerEvaluator,
    dispatch: &mut D,
    running: &AtomicBool,
) -> Result<ExperimentLog>
where
    R: Read,
    W: Write,
    D: Dispatch + ?Sized,
{
    let mut completed = false;
    'capture: while running.load(Ordering::Relaxed) {
        capture.step()?;
        let count = capture.sample_count();
        let mut action = evaluator.advance(count);
        while let Some(next) = action.take() {
            match next {
                Action::Launch { burst, done } => {
                    info!(burst, count, "Start transmission");
                    dispatch.dispatch(burst, done)?;
                    // A burst that is already done is finished at this same count
                    action = evaluator.advance(count);
                }
                Action::Finished { burst } => info!(burst, count, "Finished transmitting"),
                Action::Terminate => {
                    info!(count, "End program");
                    completed = true;
                    break 'capture;
                }
            }
        }
    }
    if !completed {
        warn!(
            count = capture.sample_count(),
            phase = ?evaluator.phase(),
            "Capture stopped before the experiment finished"
        );
    }
    Ok(ExperimentLog {
        bursts: evaluator.records().to_vec(),
        end_program: capture.sample_count(),
        completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use crate::{
        capture::tests::ScriptedDevice,
        error::Error,
        transmit::{tests::ramp_buffer, tests::Recorder, transmit_burst},
        trigger::{CompletionFlag, TriggerConfig},
    };

    /// Runs the burst synchronously and marks it done before returning
    struct Immediate {
        launched: Vec<usize>,
        recorder: Recorder,
    }

    impl Dispatch for Immediate {
        fn dispatch(&mut self, burst: usize, done: CompletionFlag) -> Result<()> {
            let buffer = ramp_buffer(300, 256, 1);
            transmit_burst(&mut self.recorder, &buffer, 3);
            self.launched.push(burst);
            done.mark_complete();
            Ok(())
        }
    }

    /// Never completes anything
    struct Stuck(usize);

    impl Dispatch for Stuck {
        fn dispatch(&mut self, _: usize, _: CompletionFlag) -> Result<()> {
            self.0 += 1;
            Ok(())
        }
    }

    struct Refusing;

    impl Dispatch for Refusing {
        fn dispatch(&mut self, _: usize, _: CompletionFlag) -> Result<()> {
            Err(Error::TransmitterGone)
        }
    }

    fn evaluator(threshold: u64, gap: u64, bursts: usize) -> TriggerEvaluator {
        TriggerEvaluator::new(TriggerConfig {
            threshold,
            gap,
            bursts,
        })
        .unwrap()
    }

    #[test]
    fn test_single_burst_scenario() {
        // 10 samples per read, launch after 1000 reads
        let mut capture = CaptureReader::new(ScriptedDevice::forever(40), Vec::new(), 10);
        let mut ev = evaluator(10_000, 300_000, 1);
        let mut tx = Immediate {
            launched: Vec::new(),
            recorder: Recorder::default(),
        };
        let running = AtomicBool::new(true);
        let log = run(&mut capture, &mut ev, &mut tx, &running).unwrap();

        assert!(log.completed);
        assert_eq!(tx.launched, vec![0]);
        assert_eq!(log.start_transmission(), 10_000);
        // Completion is seen in the iteration that launched the burst
        assert_eq!(log.finished_transmitting(), 10_000);
        // First count strictly past finished + gap, within one read of 310000
        assert_eq!(log.end_program, 310_010);
        assert!(log.end_program.abs_diff(10_000 + 300_000) <= 10);
        assert_eq!(
            log.to_string(),
            "start transmission: 10000 finished transmitting: 10000 end program: 310010\n"
        );

        let (dev, sink) = capture.finish().unwrap();
        assert_eq!(sink.len(), 310_010 * 4);
        assert_eq!(sink, dev.produced);
        // 2 blocks x 3 repetitions + end of burst
        assert_eq!(tx.recorder.log.lock().unwrap().len(), 7);
    }

    #[test]
    fn test_dual_burst_timeline() {
        let mut capture = CaptureReader::new(ScriptedDevice::forever(40), Vec::new(), 10);
        let mut ev = evaluator(100, 1_000, 2);
        let mut tx = Immediate {
            launched: Vec::new(),
            recorder: Recorder::default(),
        };
        let running = AtomicBool::new(true);
        let log = run(&mut capture, &mut ev, &mut tx, &running).unwrap();

        assert_eq!(tx.launched, vec![0, 1]);
        assert_eq!(
            log.bursts,
            vec![
                BurstRecord {
                    start: 100,
                    finished: Some(100)
                },
                BurstRecord {
                    start: 1_110,
                    finished: Some(1_110)
                },
            ]
        );
        assert_eq!(log.end_program, 2_120);
        assert_eq!(
            log.to_string(),
            "start transmission: 100 finished transmitting: 100 end program: 2120\n\
             burst 2 start transmission: 1110 finished transmitting: 1110\n"
        );
    }

    /// Marks the pending burst done from inside the capture read
    struct CompletingDevice {
        inner: ScriptedDevice,
        pending: Arc<Mutex<Option<CompletionFlag>>>,
    }

    impl Read for CompletingDevice {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(done) = self.pending.lock().unwrap().take() {
                done.mark_complete();
            }
            self.inner.read(buf)
        }
    }

    struct Handoff(Arc<Mutex<Option<CompletionFlag>>>);

    impl Dispatch for Handoff {
        fn dispatch(&mut self, _: usize, done: CompletionFlag) -> Result<()> {
            *self.0.lock().unwrap() = Some(done);
            Ok(())
        }
    }

    #[test]
    fn test_instant_completion_ends_within_one_read_of_gap() {
        for read_samples in [1usize, 10, 64] {
            let chunk = read_samples as u64;
            let device = ScriptedDevice::forever(read_samples * 4);
            let mut capture = CaptureReader::new(device, Vec::new(), read_samples);
            let mut ev = evaluator(10_000, 300_000, 1);
            let mut tx = Immediate {
                launched: Vec::new(),
                recorder: Recorder::default(),
            };
            let running = AtomicBool::new(true);
            let log = run(&mut capture, &mut ev, &mut tx, &running).unwrap();

            assert_eq!(tx.launched, vec![0]);
            assert_eq!(log.finished_transmitting(), log.start_transmission());
            assert!(log.start_transmission() - 10_000 < chunk);
            let settled = log.finished_transmitting() + 300_000;
            assert!(log.end_program > settled);
            assert!(log.end_program - settled <= chunk);
        }
    }

    #[test]
    fn test_completion_after_launch_read_is_seen_next_read() {
        let pending = Arc::new(Mutex::new(None));
        let device = CompletingDevice {
            inner: ScriptedDevice::forever(40),
            pending: pending.clone(),
        };
        let mut capture = CaptureReader::new(device, Vec::new(), 10);
        let mut ev = evaluator(100, 50, 1);
        let running = AtomicBool::new(true);
        let log = run(&mut capture, &mut ev, &mut Handoff(pending), &running).unwrap();

        assert_eq!(log.start_transmission(), 100);
        assert_eq!(log.finished_transmitting(), 110);
        assert_eq!(log.end_program, 170);
        // No second launch for a single burst
        assert_eq!(log.bursts.len(), 1);
    }

    /// Clears the run flag on its `stop_after`th read, like a Ctrl-C would
    struct Interrupted {
        inner: ScriptedDevice,
        reads: usize,
        stop_after: usize,
        running: Arc<AtomicBool>,
    }

    impl Read for Interrupted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.reads += 1;
            if self.reads == self.stop_after {
                self.running.store(false, Ordering::Relaxed);
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn test_stopped_run_keeps_partial_timeline() {
        let running = Arc::new(AtomicBool::new(true));
        let device = Interrupted {
            inner: ScriptedDevice::forever(40),
            reads: 0,
            stop_after: 50,
            running: running.clone(),
        };
        let mut capture = CaptureReader::new(device, Vec::new(), 10);
        let mut ev = evaluator(100, 10, 1);
        let mut tx = Stuck(0);
        let log = run(&mut capture, &mut ev, &mut tx, &running).unwrap();

        assert_eq!(tx.0, 1);
        assert!(!log.completed);
        assert_eq!(log.start_transmission(), 100);
        assert_eq!(log.finished_transmitting(), 0);
        assert_eq!(log.end_program, 500);
        assert_eq!(
            log.to_string(),
            "start transmission: 100 finished transmitting: 0 end program: 500\n"
        );
        // The last chunk read before stopping is still persisted
        let (_, sink) = capture.finish().unwrap();
        assert_eq!(sink.len(), 2_000);
    }

    #[test]
    fn test_dispatch_failure_propagates() {
        let mut capture = CaptureReader::new(ScriptedDevice::forever(40), Vec::new(), 10);
        let mut ev = evaluator(100, 10, 1);
        let running = AtomicBool::new(true);
        let err = run(&mut capture, &mut ev, &mut Refusing, &running).unwrap_err();
        assert!(matches!(err, Error::TransmitterGone));
    }

    #[test]
    fn test_log_file_format() {
        let path =
            std::env::temp_dir().join(format!("burst_trigger_log_{}.log", std::process::id()));
        let log = ExperimentLog {
            bursts: vec![BurstRecord {
                start: 75_000_000,
                finished: Some(75_800_000),
            }],
            end_program: 150_800_256,
            completed: true,
        };
        log.write_to(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "start transmission: 75000000 finished transmitting: 75800000 end program: 150800256\n"
        );
        std::fs::remove_file(&path).unwrap();
    }
}
