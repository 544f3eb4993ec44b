//! Acquisition loop
//!
//! Waits on a sample source, reads one fixed-size record per wake-up, runs
//! the transform and emits throttled JSON lines to the output channel. The
//! same loop serves poll-driven and signal-driven sources; only the wait
//! bound differs.

use std::time::{Duration, Instant};

use sensord_core::{FixedRecord, Outcome, RecordFrame, Transform};
use sensord_system::{DeviceError, OutputChannel, SampleSource, ShutdownToken, Wakeup};
use tracing::{debug, info, warn};

use crate::metrics::AcquisitionMetrics;

/// Emission throttle: at most one record per `interval`
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// True if a record may be emitted at `now`; the first one always may
    pub fn ready(&mut self, now: Instant) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last = Some(now);
        }
        due
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// `None` blocks until the source delivers
    pub poll_timeout: Option<Duration>,
    pub interval: Duration,
    pub max_consecutive_errors: u32,
}

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    SourceGone,
    UnexpectedSignal(i32),
    TooManyErrors,
}

/// Read one record from a source that reported `Readable`.
///
/// `Ok(None)` is a short read, discarded without counting as an error. A
/// zero-byte read after a wake-up is reported as `EIO`.
pub fn read_sample<R: FixedRecord, S: SampleSource>(source: &mut S, buf: &mut [u8]) -> Result<Option<R>, DeviceError> {
    let n = source.read_one(buf)?;
    if n == 0 {
        return Err(DeviceError::Read(nix::errno::Errno::EIO));
    }
    if n < R::SIZE {
        debug!("Discarding short read of {} bytes", n);
        return Ok(None);
    }
    match R::decode(&buf[..n]) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!("Discarding undecodable record: {}", e);
            Ok(None)
        }
    }
}

/// Discard `count` records after enabling; failures are ignored
pub fn discard_warmup<S: SampleSource>(
    source: &mut S,
    count: usize,
    wait: Duration,
    shutdown: &ShutdownToken,
    metrics: &AcquisitionMetrics,
) -> usize {
    let mut buf = vec![0u8; source.record_size()];
    let mut discarded = 0;

    for _ in 0..count {
        if shutdown.is_cancelled() {
            break;
        }
        if let Ok(Wakeup::Readable) = source.wait(Some(wait)) {
            if let Ok(n) = source.read_one(&mut buf) {
                if n > 0 {
                    discarded += 1;
                    metrics.record_warmup_discard();
                }
            }
        }
    }

    debug!("Discarded {} of {} warm-up records", discarded, count);
    discarded
}

/// Run until shutdown, an unexpected signal or an unrecoverable source error
pub fn run<S, O, T>(
    source: &mut S,
    output: &mut O,
    transform: &mut T,
    frame: &RecordFrame,
    settings: LoopSettings,
    shutdown: &ShutdownToken,
    metrics: &AcquisitionMetrics,
) -> LoopExit
where
    S: SampleSource,
    O: OutputChannel,
    T: Transform,
{
    let mut buf = vec![0u8; source.record_size()];
    let mut state = transform.initial_state();
    let mut throttle = Throttle::new(settings.interval);
    let mut consecutive_errors: u32 = 0;

    info!(cmd = frame.cmd(), "Acquisition loop running");

    loop {
        if shutdown.is_cancelled() {
            info!(cmd = frame.cmd(), "Shutdown requested");
            return LoopExit::Cancelled;
        }

        let read = match source.wait(settings.poll_timeout) {
            Ok(Wakeup::Readable) => read_sample::<T::Sample, S>(source, &mut buf),
            Ok(Wakeup::Timeout) | Ok(Wakeup::Interrupted) => continue,
            Ok(Wakeup::Unexpected(signo)) => {
                warn!(cmd = frame.cmd(), "Unexpected signal {}", signo);
                return LoopExit::UnexpectedSignal(signo);
            }
            Err(e) => Err(e),
        };

        let sample = match read {
            Ok(Some(sample)) => {
                consecutive_errors = 0;
                sample
            }
            Ok(None) => continue,
            Err(e) if e.is_source_gone() => {
                warn!(cmd = frame.cmd(), "Sample source gone: {}", e);
                return LoopExit::SourceGone;
            }
            Err(e) if e.is_transient() => continue,
            Err(e) => {
                consecutive_errors += 1;
                metrics.record_read_error(consecutive_errors);
                warn!(cmd = frame.cmd(), consecutive = consecutive_errors, "Failed to read data: {}", e);
                if consecutive_errors > settings.max_consecutive_errors {
                    return LoopExit::TooManyErrors;
                }
                continue;
            }
        };

        metrics.record_sample();
        let snapshot = state.clone();

        let line = match transform.apply(&sample, &mut state) {
            Outcome::Ready(value) => {
                if !throttle.ready(Instant::now()) {
                    continue;
                }
                frame.data(&value)
            }
            Outcome::Pending => continue,
            Outcome::Invalid(invalid) => {
                state = snapshot;
                metrics.record_invalid();
                debug!(cmd = frame.cmd(), code = invalid.code, "Transform rejected sample: {}", invalid);
                frame.diagnostic(&invalid)
            }
        };

        match line {
            Ok(line) => match output.emit(&line) {
                Ok(()) => metrics.record_emitted(),
                Err(e) => {
                    metrics.record_write_failure();
                    warn!(cmd = frame.cmd(), "Failed to write record: {}", e);
                }
            },
            Err(e) => warn!(cmd = frame.cmd(), "Failed to serialize record: {}", e),
        }
    }
}
