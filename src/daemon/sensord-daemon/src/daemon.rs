//! Sensor daemon commands
//! Orchestrates the registry, the devices and the acquisition loop for one
//! `start`, `stop`, `status` or one-shot read

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{fork, getpid, setsid, ForkResult};
use sensord_core::gyrocompass::insufficient_postures;
use sensord_core::record::to_line;
use sensord_core::{
    CommandStatus, FixedRecord, GnssFix, GnssFormat, GnssReport, Gyrocompass, ImuSample, Invalid, Madgwick, Outcome,
    Passthrough, ReadResult, RecordFrame, Report, SampleRate, SensorKind, Status, Transform,
};
use sensord_system::{
    CharDevice, DeviceError, GnssDevice, InstanceRegistry, InstanceStatus, OutputChannel, RegistryError,
    SampleSource, ShutdownToken, StopOutcome, TtyOutput, Wakeup,
};
use tracing::{debug, error, info, warn};

use crate::acquisition::{self, LoopExit, LoopSettings};
use crate::config::DaemonConfig;
use crate::metrics::{AcquisitionMetrics, AcquisitionStats};
use crate::sensors::{Model, SensorProfile};
use crate::session::Session;

const NOT_RUNNING: &str = "Sensor daemon not running";
const READ_FAILED: &str = "Failed to read data";
const TIMEOUT: &str = "Timeout waiting for sensor data";
const NO_IMU_SETTINGS: &str = "IMU model without IMU settings";

/// Exit status of a daemon whose output kept failing
pub const EXIT_WRITE_FAILURES: i32 = 3;

/// What a command prints on stdout
#[derive(Debug)]
pub enum Reply {
    Status(CommandStatus),
    /// A one-shot read result, already serialized
    Data(Vec<u8>),
}

impl Reply {
    pub fn ok(msg: impl Into<String>) -> Self {
        Reply::Status(CommandStatus::new(0, msg))
    }

    pub fn fail(code: i32, msg: impl Into<String>) -> Self {
        Reply::Status(CommandStatus::new(code, msg))
    }

    pub fn is_ok(&self) -> bool {
        match self {
            Reply::Status(reply) => reply.status.is_ok(),
            Reply::Data(_) => true,
        }
    }

    pub fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Reply::Status(reply) => to_line(reply),
            Reply::Data(line) => Ok(line.clone()),
        }
    }
}

impl From<&Invalid> for Reply {
    fn from(invalid: &Invalid) -> Self {
        Reply::fail(invalid.code, invalid.msg.as_str())
    }
}

/// Exit status for a finished run
pub fn exit_status(stats: &AcquisitionStats, failure_threshold: u64) -> i32 {
    if stats.write_failures >= failure_threshold {
        EXIT_WRITE_FAILURES
    } else {
        0
    }
}

pub struct Daemon {
    config: DaemonConfig,
    registry: InstanceRegistry,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Self {
        let registry = InstanceRegistry::new(config.paths.state_dir.clone());
        Self { config, registry }
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Replace any running instance with a new background process.
    ///
    /// Only the parent returns; the child exits when its loop ends.
    pub fn start(&self, profile: &SensorProfile) -> Reply {
        let kind = profile.kind;

        match self.registry.takeover(kind, self.config.acquisition.takeover_grace()) {
            Ok(Some(pid)) => info!(sensor = %kind, pid, "Previous instance replaced"),
            Ok(None) => {}
            Err(e) => return Reply::fail(e.status_code(), e.to_string()),
        }

        // The child claims only after the parent has recorded it, so the
        // parent never writes a record the child has already released
        let (mut to_child, from_parent) = match UnixStream::pair() {
            Ok(pair) => pair,
            Err(e) => {
                let code = e.raw_os_error().map_or(-1, |errno| -errno);
                return Reply::fail(code, "Failed to create daemon process");
            }
        };

        // Single-threaded at this point
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                drop(from_parent);
                let pid = child.as_raw();
                if let Err(e) = self.registry.record(kind, pid) {
                    warn!(sensor = %kind, pid, "Failed to record daemon: {}", e);
                    if let Err(errno) = kill(child, Signal::SIGTERM) {
                        warn!(sensor = %kind, pid, "Failed to terminate unrecorded daemon: {}", errno);
                    }
                    return Reply::fail(e.status_code(), e.to_string());
                }
                if let Err(e) = to_child.write_all(&[1]) {
                    warn!(sensor = %kind, pid, "Daemon exited during startup: {}", e);
                    if let Err(e) = self.registry.discard(kind, pid) {
                        warn!(sensor = %kind, pid, "Failed to remove instance record: {}", e);
                    }
                    return Reply::fail(-1, "Failed to create daemon process");
                }
                info!(sensor = %kind, pid, "Daemon started");
                Reply::ok("Sensor polling started successfully")
            }
            Ok(ForkResult::Child) => {
                drop(to_child);
                if let Err(e) = setsid() {
                    debug!("setsid failed: {}", e);
                }
                let code = match wait_for_parent(from_parent) {
                    Ok(()) => self.run_child(profile),
                    Err(e) => {
                        debug!(sensor = %kind, "Parent did not record this daemon: {}", e);
                        1
                    }
                };
                std::process::exit(code);
            }
            Err(errno) => Reply::fail(-(errno as i32), "Failed to create daemon process"),
        }
    }

    pub fn stop(&self, kind: SensorKind) -> Reply {
        match self.registry.stop(kind, self.config.acquisition.stop_grace()) {
            Ok(StopOutcome::Stopped(pid)) => {
                debug!(sensor = %kind, pid, "Termination requested");
                Reply::ok("Sensor polling stopped successfully")
            }
            Ok(StopOutcome::AlreadyGone(pid)) => {
                debug!(sensor = %kind, pid, "Recorded process had already exited");
                Reply::ok("Sensor polling stopped successfully")
            }
            Err(RegistryError::NotRunning) => Reply::fail(-1, NOT_RUNNING),
            Err(e @ RegistryError::SignalFailed { .. }) => {
                warn!(sensor = %kind, "{}", e);
                Reply::fail(e.status_code(), "Failed to stop sensor daemon")
            }
            Err(e) => Reply::fail(e.status_code(), e.to_string()),
        }
    }

    pub fn status(&self, kind: SensorKind) -> Reply {
        match self.registry.status(kind) {
            Ok(InstanceStatus::Running(pid)) => Reply::ok(format!("Sensor daemon running (PID {pid})")),
            Ok(InstanceStatus::Stale(pid)) => {
                Reply::fail(-1, format!("{NOT_RUNNING}, stale record for PID {pid} removed"))
            }
            Ok(InstanceStatus::NotRunning) => Reply::fail(-1, NOT_RUNNING),
            Err(e) => Reply::fail(e.status_code(), e.to_string()),
        }
    }

    /// Read one result in the foreground; no registry, no fork
    pub fn read_once(&self, profile: &SensorProfile) -> Reply {
        let opened = match profile.kind {
            SensorKind::Gnss => GnssDevice::open(
                &self.config.devices.gnss,
                GnssFix::SIZE,
                self.config.gnss.notify_signal_offset,
            )
            .map(|device| self.read_with(profile, &mut self.one_shot_session(profile, device))),
            _ => CharDevice::open(&self.config.devices.imu, ImuSample::SIZE)
                .map(|device| self.read_with(profile, &mut self.one_shot_session(profile, device))),
        };

        opened.unwrap_or_else(|e| {
            debug!(sensor = %profile.kind, "{}", e);
            Reply::fail(e.status_code(), "Failed to open device")
        })
    }

    fn one_shot_session<S: SampleSource>(&self, profile: &SensorProfile, source: S) -> Session<S, TtyOutput> {
        let mut session = Session::new(profile.kind);
        session.attach_source(source);
        session
    }

    pub(crate) fn read_with<S: SampleSource, O: OutputChannel>(
        &self,
        profile: &SensorProfile,
        session: &mut Session<S, O>,
    ) -> Reply {
        let kind = profile.kind;
        let wait = self.config.acquisition.warmup_wait();

        let Some(source) = session.source_mut() else {
            return Reply::fail(-1, "Failed to open device");
        };
        if let Err(e) = source.configure(&profile.device) {
            return Reply::fail(e.status_code(), e.to_string());
        }
        if let Err(e) = session.enable() {
            return Reply::fail(e.status_code(), e.to_string());
        }
        let Some(source) = session.source_mut() else {
            return Reply::fail(-1, "Failed to open device");
        };

        let metrics = AcquisitionMetrics::new(kind);
        if let Some(count) = profile.warmup_records() {
            acquisition::discard_warmup(source, count, wait, &ShutdownToken::new(), &metrics);
        }

        let echo = profile.config_echo();
        let finish = |result: Result<Vec<u8>, serde_json::Error>| match result {
            Ok(line) => Reply::Data(line),
            Err(e) => Reply::fail(-1, format!("Failed to format record: {e}")),
        };

        match profile.model {
            Model::Raw => match first_ready(source, &mut Passthrough, 1, wait) {
                Ok(reading) => finish(read_result(&reading, profile, &echo)),
                Err(reply) => reply,
            },
            Model::Ahrs(params) => {
                let Some(rate) = imu_rate(profile) else {
                    return Reply::fail(-1, NO_IMU_SETTINGS);
                };
                match first_ready(source, &mut Madgwick::new(params, rate), 1, wait) {
                    Ok(orientation) => finish(read_result(&orientation, profile, &echo)),
                    Err(reply) => reply,
                }
            }
            Model::Gyrocompass(params) => {
                let Some(rate) = imu_rate(profile) else {
                    return Reply::fail(-1, NO_IMU_SETTINGS);
                };
                let mut compass = Gyrocompass::new(params, rate);
                let window = compass.window_len();
                match first_ready(source, &mut compass, window, wait) {
                    Ok(heading) => finish(read_result(&heading, profile, &echo)),
                    Err(reply) => reply,
                }
            }
            Model::Gnss => {
                let cycle = Duration::from_millis(profile.reported_interval_ms());
                match self.first_fix(source, cycle + wait) {
                    Ok(report) => finish(read_result(&report, profile, &echo)),
                    Err(reply) => reply,
                }
            }
        }
    }

    /// Wait for a position fix, returning the last report seen
    fn first_fix<S: SampleSource>(&self, source: &mut S, wait: Duration) -> Result<GnssReport, Reply> {
        let mut buf = vec![0u8; source.record_size()];
        let mut format = GnssFormat;
        let mut state = format.initial_state();
        let mut last = None;

        for _ in 0..self.config.gnss.oneshot_max_fixes {
            let fix = match next_record::<GnssFix, S>(source, &mut buf, wait) {
                Ok(fix) => fix,
                Err(reply) => match last {
                    Some(report) => return Ok(report),
                    None => return Err(reply),
                },
            };
            if let Outcome::Ready(report) = format.apply(&fix, &mut state) {
                if report.has_position() {
                    return Ok(report);
                }
                last = Some(report);
            }
        }

        last.ok_or_else(|| Reply::fail(-1, TIMEOUT))
    }

    fn run_child(&self, profile: &SensorProfile) -> i32 {
        let kind = profile.kind;
        let shutdown = match ShutdownToken::install() {
            Ok(token) => token,
            Err(e) => {
                error!(sensor = %kind, "Failed to install signal handlers: {}", e);
                return 1;
            }
        };

        let pid = getpid().as_raw();
        let result = match kind {
            SensorKind::Gnss => self.acquire(profile, pid, &shutdown, || {
                GnssDevice::open(
                    &self.config.devices.gnss,
                    GnssFix::SIZE,
                    self.config.gnss.notify_signal_offset,
                )
            }),
            _ => self.acquire(profile, pid, &shutdown, || {
                CharDevice::open(&self.config.devices.imu, ImuSample::SIZE)
            }),
        };

        match result {
            Ok(stats) => {
                info!(
                    sensor = %kind,
                    samples = stats.samples,
                    emitted = stats.records_emitted,
                    write_failures = stats.write_failures,
                    "Daemon exiting"
                );
                exit_status(&stats, self.config.acquisition.failure_threshold)
            }
            Err(e) => {
                error!(sensor = %kind, "{:#}", e);
                1
            }
        }
    }

    fn acquire<S, F>(&self, profile: &SensorProfile, pid: i32, shutdown: &ShutdownToken, open: F) -> Result<AcquisitionStats>
    where
        S: SampleSource,
        F: FnOnce() -> Result<S, DeviceError>,
    {
        let kind = profile.kind;
        let mut session: Session<S, TtyOutput> = Session::new(kind);

        let claim = self.registry.claim(kind, pid).context("Failed to claim instance record")?;
        session.attach_claim(claim);
        session.attach_source(open().context("Failed to open device")?);
        let output = TtyOutput::open(&self.config.paths.output).context("Failed to open TTY device")?;
        session.attach_output(output);

        self.serve(profile, &mut session, shutdown)
    }

    /// Configure, enable and run the loop over an assembled session
    pub(crate) fn serve<S: SampleSource, O: OutputChannel>(
        &self,
        profile: &SensorProfile,
        session: &mut Session<S, O>,
        shutdown: &ShutdownToken,
    ) -> Result<AcquisitionStats> {
        let kind = profile.kind;
        let acq = &self.config.acquisition;

        session
            .source_mut()
            .ok_or_else(|| anyhow!("No sample source attached"))?
            .configure(&profile.device)
            .context("Failed to configure sensor")?;
        session.enable().context("Failed to enable sensor")?;

        let (source, output) = session.parts().ok_or_else(|| anyhow!("Session is incomplete"))?;
        let metrics = AcquisitionMetrics::new(kind);

        if let Some(count) = profile.warmup_records() {
            acquisition::discard_warmup(source, count, acq.warmup_wait(), shutdown, &metrics);
        }

        let frame = RecordFrame::new(
            kind.cmd_tag(),
            profile.reported_interval_ms(),
            profile.request_id,
            &profile.config_echo(),
        )?;
        match output.emit(&frame.started(profile.started_msg())?) {
            Ok(()) => metrics.record_emitted(),
            Err(e) => {
                metrics.record_write_failure();
                warn!(sensor = %kind, "Failed to write started record: {}", e);
            }
        }
        info!(sensor = %kind, interval_ms = profile.interval.as_millis() as u64, "Polling started");

        let settings = LoopSettings {
            poll_timeout: kind.is_imu_family().then(|| acq.poll_timeout()),
            interval: profile.interval,
            max_consecutive_errors: acq.max_consecutive_errors,
        };
        let rate = || imu_rate(profile).ok_or_else(|| anyhow!(NO_IMU_SETTINGS));

        let exit = match profile.model {
            Model::Raw => acquisition::run(source, output, &mut Passthrough, &frame, settings, shutdown, &metrics),
            Model::Ahrs(params) => acquisition::run(
                source,
                output,
                &mut Madgwick::new(params, rate()?),
                &frame,
                settings,
                shutdown,
                &metrics,
            ),
            Model::Gyrocompass(params) => acquisition::run(
                source,
                output,
                &mut Gyrocompass::new(params, rate()?),
                &frame,
                settings,
                shutdown,
                &metrics,
            ),
            Model::Gnss => acquisition::run(source, output, &mut GnssFormat, &frame, settings, shutdown, &metrics),
        };

        match exit {
            LoopExit::Cancelled => info!(sensor = %kind, "Acquisition stopped"),
            other => warn!(sensor = %kind, reason = ?other, "Acquisition ended"),
        }

        session.release();
        Ok(metrics.get_stats())
    }
}

/// Block until the parent signals that the record names this process
fn wait_for_parent(mut from_parent: UnixStream) -> std::io::Result<()> {
    let mut ack = [0u8; 1];
    from_parent.read_exact(&mut ack)
}

fn imu_rate(profile: &SensorProfile) -> Option<SampleRate> {
    profile.imu().map(|imu| imu.rate)
}

fn read_result<D: Report>(
    data: &D,
    profile: &SensorProfile,
    echo: &serde_json::Value,
) -> Result<Vec<u8>, serde_json::Error> {
    to_line(&ReadResult {
        data,
        status: Status::ok(profile.read_ok_msg()),
        config: echo,
    })
}

/// Wait once and decode one record
fn next_record<R: FixedRecord, S: SampleSource>(source: &mut S, buf: &mut [u8], wait: Duration) -> Result<R, Reply> {
    match source.wait(Some(wait)) {
        Ok(Wakeup::Readable) => match acquisition::read_sample::<R, S>(source, buf) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(Reply::fail(-1, READ_FAILED)),
            Err(e) => Err(Reply::fail(e.status_code(), READ_FAILED)),
        },
        Ok(Wakeup::Timeout) => Err(Reply::fail(-1, TIMEOUT)),
        Ok(Wakeup::Interrupted) | Ok(Wakeup::Unexpected(_)) => Err(Reply::fail(-1, READ_FAILED)),
        Err(e) => Err(Reply::fail(e.status_code(), READ_FAILED)),
    }
}

/// Feed up to `limit` records until the transform produces a value
fn first_ready<S: SampleSource, T: Transform>(
    source: &mut S,
    transform: &mut T,
    limit: usize,
    wait: Duration,
) -> Result<T::Output, Reply> {
    let mut buf = vec![0u8; source.record_size()];
    let mut state = transform.initial_state();

    for _ in 0..limit {
        let sample = next_record::<T::Sample, S>(source, &mut buf, wait)?;
        match transform.apply(&sample, &mut state) {
            Outcome::Ready(value) => return Ok(value),
            Outcome::Pending => continue,
            Outcome::Invalid(invalid) => return Err(Reply::from(&invalid)),
        }
    }

    // Only a windowed transform runs out of records
    Err(Reply::from(&insufficient_postures()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorOptions;
    use crate::testing::{call_log, MockOutput, MockSource, Step};
    use nix::errno::Errno;
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid;
    use sensord_core::sample::{FixMode, FixTime};
    use tempfile::tempdir;

    fn daemon(state_dir: &std::path::Path) -> Daemon {
        let mut config = DaemonConfig::default();
        config.paths.state_dir = state_dir.to_path_buf();
        config.gnss.oneshot_max_fixes = 3;
        Daemon::new(config)
    }

    fn profile(kind: SensorKind, options: SensorOptions) -> SensorProfile {
        SensorProfile::from_options(kind, &options).unwrap()
    }

    fn imu_record(ax: f32) -> Step {
        Step::Record(
            ImuSample {
                ax,
                az: 1.0,
                ..ImuSample::default()
            }
            .encode()
            .to_vec(),
        )
    }

    fn gnss_record(mode: FixMode) -> Step {
        Step::Record(
            GnssFix {
                time: FixTime {
                    hour: 1,
                    minute: 2,
                    sec: 3,
                    usec: 0,
                },
                fix_mode: mode,
                visible_sats: 9,
                tracking_sats: 7,
                positioning_sats: 5,
                sat_systems: 3,
                latitude: 35.5,
                longitude: 139.75,
                altitude: 10.0,
                geoid: 30.0,
                h_accuracy: 2.0,
                v_accuracy: 3.0,
                pdop: 1.0,
                hdop: 1.0,
                vdop: 1.0,
                tdop: 1.0,
            }
            .encode()
            .to_vec(),
        )
    }

    fn parse(reply: &Reply) -> serde_json::Value {
        serde_json::from_slice(&reply.to_line().unwrap()).unwrap()
    }

    #[test]
    fn test_serve_emits_started_record_first() {
        let dir = tempdir().unwrap();
        let daemon = daemon(dir.path());
        let options = SensorOptions {
            interval_ms: Some(0),
            request_id: 5,
            ..SensorOptions::default()
        };
        let profile = profile(SensorKind::Imu, options);
        let log = call_log();

        // One warm-up record, then two data records
        let source = MockSource::new(
            &log,
            ImuSample::SIZE,
            vec![imu_record(9.0), imu_record(0.5), imu_record(0.25)],
        );
        let output = MockOutput::new(&log);
        let lines = std::rc::Rc::clone(&output.lines);

        let mut session = Session::new(SensorKind::Imu);
        session.attach_claim(daemon.registry().claim(SensorKind::Imu, 77).unwrap());
        session.attach_source(source);
        session.attach_output(output);

        let stats = daemon.serve(&profile, &mut session, &ShutdownToken::new()).unwrap();
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.warmup_discarded, 1);
        assert_eq!(exit_status(&stats, 3), 0);

        let records: Vec<serde_json::Value> = lines
            .borrow()
            .iter()
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["type"], "res");
        assert_eq!(records[0]["id"], 5);
        assert_eq!(records[0]["status"]["msg"], "Polling started");
        assert_eq!(records[1]["data"]["x"], 0.5);
        assert_eq!(records[2]["config"]["samplerate"], 60);

        assert_eq!(
            *log.borrow(),
            vec!["configure", "enable", "disable", "close_source", "close_output"]
        );
        assert_eq!(daemon.registry().lookup(SensorKind::Imu).unwrap(), None);
    }

    #[test]
    fn test_serve_configure_failure_never_enables() {
        let dir = tempdir().unwrap();
        let daemon = daemon(dir.path());
        let profile = profile(SensorKind::Ahrs, SensorOptions::default());
        let log = call_log();

        let mut source = MockSource::new(&log, ImuSample::SIZE, vec![]);
        source.fail_configure = true;
        let mut session = Session::new(SensorKind::Ahrs);
        session.attach_claim(daemon.registry().claim(SensorKind::Ahrs, 78).unwrap());
        session.attach_source(source);
        session.attach_output(MockOutput::new(&log));

        assert!(daemon.serve(&profile, &mut session, &ShutdownToken::new()).is_err());
        drop(session);
        assert_eq!(*log.borrow(), vec!["configure", "close_source", "close_output"]);
        assert!(!daemon.registry().path(SensorKind::Ahrs).exists());
    }

    #[test]
    fn test_repeated_write_failures_set_exit_status() {
        let dir = tempdir().unwrap();
        let daemon = daemon(dir.path());
        let options = SensorOptions {
            interval_ms: Some(0),
            ..SensorOptions::default()
        };
        let profile = profile(SensorKind::Imu, options);
        let log = call_log();

        let mut output = MockOutput::new(&log);
        output.failures = 3;
        let mut session = Session::new(SensorKind::Imu);
        session.attach_source(MockSource::new(
            &log,
            ImuSample::SIZE,
            vec![imu_record(0.0), imu_record(0.0), imu_record(0.0)],
        ));
        session.attach_output(output);

        let stats = daemon.serve(&profile, &mut session, &ShutdownToken::new()).unwrap();
        assert_eq!(stats.write_failures, 3);
        assert_eq!(exit_status(&stats, 3), EXIT_WRITE_FAILURES);
    }

    #[test]
    fn test_one_shot_imu_read() {
        let dir = tempdir().unwrap();
        let daemon = daemon(dir.path());
        let profile = profile(SensorKind::Imu, SensorOptions::default());
        let log = call_log();

        let mut session: Session<MockSource, MockOutput> = Session::new(SensorKind::Imu);
        session.attach_source(MockSource::new(
            &log,
            ImuSample::SIZE,
            vec![imu_record(9.0), imu_record(0.5)],
        ));

        let reply = daemon.read_with(&profile, &mut session);
        assert!(reply.is_ok());
        let json = parse(&reply);
        assert_eq!(json["data"]["x"], 0.5);
        assert_eq!(json["status"]["msg"], "Sensor data read successfully");
        assert_eq!(json["config"]["fifo"], 1);

        drop(session);
        assert_eq!(*log.borrow(), vec!["configure", "enable", "disable", "close_source"]);
    }

    #[test]
    fn test_one_shot_timeout() {
        let dir = tempdir().unwrap();
        let daemon = daemon(dir.path());
        let profile = profile(SensorKind::Imu, SensorOptions::default());
        let log = call_log();

        let mut session: Session<MockSource, MockOutput> = Session::new(SensorKind::Imu);
        session.attach_source(MockSource::new(&log, ImuSample::SIZE, vec![Step::Timeout, Step::Timeout]));

        let reply = daemon.read_with(&profile, &mut session);
        assert!(!reply.is_ok());
        assert_eq!(
            parse(&reply),
            serde_json::json!({"status": {"code": -1, "msg": "Timeout waiting for sensor data"}})
        );
    }

    #[test]
    fn test_one_shot_read_error_carries_errno() {
        let dir = tempdir().unwrap();
        let daemon = daemon(dir.path());
        let profile = profile(SensorKind::Imu, SensorOptions::default());
        let log = call_log();

        let mut session: Session<MockSource, MockOutput> = Session::new(SensorKind::Imu);
        session.attach_source(MockSource::new(
            &log,
            ImuSample::SIZE,
            vec![imu_record(0.0), Step::ReadError(Errno::EIO)],
        ));

        let json = parse(&daemon.read_with(&profile, &mut session));
        assert_eq!(json["status"]["code"], -(Errno::EIO as i32));
        assert_eq!(json["status"]["msg"], "Failed to read data");
    }

    #[test]
    fn test_one_shot_gyrocompass_reports_solver_diagnostic() {
        let dir = tempdir().unwrap();
        let daemon = daemon(dir.path());
        let options = SensorOptions {
            rate: Some(15),
            collect_ms: Some(200),
            discard_ms: Some(0),
            ..SensorOptions::default()
        };
        let profile = profile(SensorKind::Gyrocompass, options);
        let log = call_log();

        // One discarded record, then a 3-record window
        let steps = (0..4).map(|_| imu_record(0.0)).collect();
        let mut session: Session<MockSource, MockOutput> = Session::new(SensorKind::Gyrocompass);
        session.attach_source(MockSource::new(&log, ImuSample::SIZE, steps));

        let reply = daemon.read_with(&profile, &mut session);
        assert!(!reply.is_ok());
        let json = parse(&reply);
        assert_eq!(json["status"]["msg"], "Failed to calculate bias");
    }

    #[test]
    fn test_one_shot_gnss_waits_for_fix() {
        let dir = tempdir().unwrap();
        let daemon = daemon(dir.path());
        let profile = profile(SensorKind::Gnss, SensorOptions::default());
        let log = call_log();

        let mut session: Session<MockSource, MockOutput> = Session::new(SensorKind::Gnss);
        session.attach_source(MockSource::new(
            &log,
            GnssFix::SIZE,
            vec![gnss_record(FixMode::Invalid), gnss_record(FixMode::ThreeD)],
        ));

        let json = parse(&daemon.read_with(&profile, &mut session));
        assert_eq!(json["status"]["msg"], "GNSS data read successfully");
        assert_eq!(json["data"]["fix"], 3);
        assert_eq!(json["data"]["lat"], "35.30.0000");
        assert_eq!(json["config"]["cycle"], 1000);
    }

    #[test]
    fn test_one_shot_gnss_without_fix_returns_last() {
        let dir = tempdir().unwrap();
        let daemon = daemon(dir.path());
        let profile = profile(SensorKind::Gnss, SensorOptions::default());
        let log = call_log();

        let steps = (0..5).map(|_| gnss_record(FixMode::Invalid)).collect();
        let mut session: Session<MockSource, MockOutput> = Session::new(SensorKind::Gnss);
        session.attach_source(MockSource::new(&log, GnssFix::SIZE, steps));

        let json = parse(&daemon.read_with(&profile, &mut session));
        assert_eq!(json["data"]["fix"], 0);
        assert_eq!(json["data"]["visible_sats"], 9);
    }

    #[test]
    fn test_stop_without_record() {
        let dir = tempdir().unwrap();
        let daemon = daemon(dir.path());
        let reply = daemon.stop(SensorKind::Imu);
        assert!(!reply.is_ok());
        assert_eq!(
            parse(&reply),
            serde_json::json!({"status": {"code": -1, "msg": "Sensor daemon not running"}})
        );
    }

    #[test]
    fn test_stop_running_instance() {
        let dir = tempdir().unwrap();
        let daemon = daemon(dir.path());
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        daemon.registry().record(SensorKind::Gnss, child.id() as i32).unwrap();

        let reply = daemon.stop(SensorKind::Gnss);
        child.wait().unwrap();
        assert!(reply.is_ok());
        assert_eq!(parse(&reply)["status"]["msg"], "Sensor polling stopped successfully");
        assert!(!daemon.registry().path(SensorKind::Gnss).exists());
    }

    #[test]
    fn test_status_reports_running_and_stale() {
        let dir = tempdir().unwrap();
        let daemon = daemon(dir.path());
        assert!(!daemon.status(SensorKind::Ahrs).is_ok());

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as i32;
        daemon.registry().record(SensorKind::Ahrs, pid).unwrap();
        let reply = daemon.status(SensorKind::Ahrs);
        assert!(reply.is_ok());
        assert!(parse(&reply)["status"]["msg"].as_str().unwrap().contains(&pid.to_string()));

        child.kill().unwrap();
        child.wait().unwrap();
        let reply = daemon.status(SensorKind::Ahrs);
        assert!(!reply.is_ok());
        assert!(!daemon.registry().path(SensorKind::Ahrs).exists());
    }

    fn reap(pid: i32, within: Duration) -> Option<WaitStatus> {
        let deadline = std::time::Instant::now() + within;
        while std::time::Instant::now() < deadline {
            match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)).unwrap() {
                WaitStatus::StillAlive => std::thread::sleep(Duration::from_millis(10)),
                status => return Some(status),
            }
        }
        None
    }

    #[test]
    fn test_start_child_fails_fast_on_missing_device() {
        let dir = tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.paths.state_dir = dir.path().to_path_buf();
        config.devices.imu = dir.path().join("missing-imu");
        let daemon = Daemon::new(config);

        let reply = daemon.start(&profile(SensorKind::Imu, SensorOptions::default()));
        assert!(reply.is_ok());
        assert_eq!(parse(&reply)["status"]["msg"], "Sensor polling started successfully");

        // The parent records the child before replying
        let pid = daemon.registry().lookup(SensorKind::Imu).unwrap().unwrap();
        assert_ne!(pid, std::process::id() as i32);

        let status = reap(pid, Duration::from_secs(5)).unwrap();
        assert_eq!(status, WaitStatus::Exited(Pid::from_raw(pid), 1));
        // The failed child released its own record
        assert_eq!(daemon.registry().lookup(SensorKind::Imu).unwrap(), None);
    }

    #[test]
    fn test_start_records_live_child_until_stopped() {
        let dir = tempdir().unwrap();
        let fifo = dir.path().join("imu0");
        assert!(std::process::Command::new("mkfifo").arg(&fifo).status().unwrap().success());

        let mut config = DaemonConfig::default();
        config.paths.state_dir = dir.path().join("state");
        // Opening a FIFO with no writer blocks, so the child stays up
        config.devices.imu = fifo;
        let daemon = Daemon::new(config);

        assert!(daemon.start(&profile(SensorKind::Ahrs, SensorOptions::default())).is_ok());
        let pid = daemon.registry().lookup(SensorKind::Ahrs).unwrap().unwrap();
        assert!(sensord_system::is_alive(pid));
        assert_eq!(daemon.registry().claim(SensorKind::Ahrs, 999_999).unwrap_err().status_code(), -1);

        assert!(daemon.stop(SensorKind::Ahrs).is_ok());
        assert_eq!(daemon.registry().lookup(SensorKind::Ahrs).unwrap(), None);

        if reap(pid, Duration::from_secs(5)).is_none() {
            kill(Pid::from_raw(pid), Signal::SIGKILL).unwrap();
            waitpid(Pid::from_raw(pid), None).unwrap();
        }
    }
}
