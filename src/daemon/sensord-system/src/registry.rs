//! Single-instance registry backed by PID files
//!
//! Each sensor kind owns one record in the state directory holding the
//! decimal PID of the running daemon. Liveness is probed with `kill(pid, 0)`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use sensord_core::SensorKind;
use thiserror::Error;
use tracing::{debug, info, warn};

const CLAIM_ATTEMPTS: usize = 3;
const LIVENESS_POLL: Duration = Duration::from_millis(10);
const WRITE_GRACE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry storage unavailable at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Already running (PID {0})")]
    AlreadyRunning(i32),
    #[error("Not running")]
    NotRunning,
    #[error("Failed to send signal to PID {pid}: {errno}")]
    SignalFailed { pid: i32, errno: Errno },
    #[error("Corrupt instance record at {}", path.display())]
    Corrupt { path: PathBuf },
    #[error("Instance record at {} is being written", path.display())]
    Busy { path: PathBuf },
}

impl RegistryError {
    pub fn status_code(&self) -> i32 {
        match self {
            RegistryError::Io { source, .. } => source.raw_os_error().map_or(-1, |e| -e),
            RegistryError::SignalFailed { errno, .. } => -(*errno as i32),
            _ => -1,
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        RegistryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of a successful `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// SIGTERM was delivered to the recorded process
    Stopped(i32),
    /// The recorded process no longer existed
    AlreadyGone(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Running(i32),
    /// A record named a dead process; it has been cleared
    Stale(i32),
    NotRunning,
}

/// Whether `pid` names an existing process
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None::<Signal>) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[derive(Debug, Clone)]
pub struct InstanceRegistry {
    dir: PathBuf,
}

impl InstanceRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: SensorKind) -> PathBuf {
        self.dir.join(kind.record_name())
    }

    /// PID recorded for `kind`, if any
    pub fn lookup(&self, kind: SensorKind) -> Result<Option<i32>, RegistryError> {
        let path = self.path(kind);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RegistryError::io(&path, e)),
        };
        match contents.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => Ok(Some(pid)),
            _ => Err(RegistryError::Corrupt { path }),
        }
    }

    /// Atomically create the record for `pid`.
    ///
    /// The PID is written to a private file first and then hard-linked into
    /// place, so a visible record is always complete. A record naming a dead
    /// process is discarded, as is an unreadable one older than
    /// `WRITE_GRACE`. A record already naming `pid` is accepted as ours.
    pub fn claim(&self, kind: SensorKind, pid: i32) -> Result<Claim, RegistryError> {
        fs::create_dir_all(&self.dir).map_err(|e| RegistryError::io(&self.dir, e))?;
        let path = self.path(kind);
        let staged = self.dir.join(format!(".{}.{}.claim", kind.record_name(), pid));
        fs::write(&staged, format!("{}\n", pid)).map_err(|e| RegistryError::io(&staged, e))?;

        let claimed = self.publish(kind, pid, &staged, &path);
        if let Err(e) = fs::remove_file(&staged) {
            debug!(sensor = %kind, "Failed to remove staged record: {}", e);
        }
        claimed
    }

    fn publish(&self, kind: SensorKind, pid: i32, staged: &Path, path: &Path) -> Result<Claim, RegistryError> {
        for attempt in 0..CLAIM_ATTEMPTS {
            match fs::hard_link(staged, path) {
                Ok(()) => {
                    debug!(sensor = %kind, pid, "Claimed instance record");
                    return Ok(Claim::new(path.to_path_buf(), pid));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(RegistryError::io(path, e)),
            }

            match self.lookup(kind) {
                Ok(Some(owner)) if owner == pid => {
                    debug!(sensor = %kind, pid, "Instance record pre-written by parent");
                    return Ok(Claim::new(path.to_path_buf(), pid));
                }
                Ok(Some(owner)) if is_alive(owner) => return Err(RegistryError::AlreadyRunning(owner)),
                Ok(Some(owner)) => {
                    info!(sensor = %kind, stale_pid = owner, "Removing stale instance record");
                    remove_record(path)?;
                }
                Ok(None) => {}
                Err(RegistryError::Corrupt { .. }) if record_age(path) < WRITE_GRACE => {
                    // Another writer may not have finished yet
                    if attempt + 1 == CLAIM_ATTEMPTS {
                        return Err(RegistryError::Busy { path: path.to_path_buf() });
                    }
                    thread::sleep(LIVENESS_POLL);
                }
                Err(RegistryError::Corrupt { .. }) => {
                    warn!(sensor = %kind, "Removing corrupt instance record");
                    remove_record(path)?;
                }
                Err(e) => return Err(e),
            }
        }

        Err(RegistryError::io(
            path,
            io::Error::new(io::ErrorKind::AlreadyExists, "instance record keeps reappearing"),
        ))
    }

    /// Write `pid` as the owner of `kind`, replacing any previous record
    pub fn record(&self, kind: SensorKind, pid: i32) -> Result<(), RegistryError> {
        fs::create_dir_all(&self.dir).map_err(|e| RegistryError::io(&self.dir, e))?;
        let path = self.path(kind);
        let tmp = self.dir.join(format!(".{}.tmp", kind.record_name()));
        fs::write(&tmp, format!("{}\n", pid)).map_err(|e| RegistryError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| RegistryError::io(&path, e))?;
        debug!(sensor = %kind, pid, "Recorded instance");
        Ok(())
    }

    /// Terminate a live previous owner and clear its record.
    ///
    /// Returns the PID that was signalled, if any. An owner still alive after
    /// `grace` is logged and its record removed anyway.
    pub fn takeover(&self, kind: SensorKind, grace: Duration) -> Result<Option<i32>, RegistryError> {
        let path = self.path(kind);
        let owner = match self.lookup(kind) {
            Ok(Some(owner)) => owner,
            Ok(None) => return Ok(None),
            Err(RegistryError::Corrupt { .. }) => {
                remove_record(&path)?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if owner == std::process::id() as i32 || !is_alive(owner) {
            remove_record(&path)?;
            return Ok(None);
        }

        info!(sensor = %kind, pid = owner, "Stopping previous instance");
        match kill(Pid::from_raw(owner), Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                remove_record(&path)?;
                return Ok(None);
            }
            Err(errno) => return Err(RegistryError::SignalFailed { pid: owner, errno }),
        }

        let deadline = Instant::now() + grace;
        while is_alive(owner) && Instant::now() < deadline {
            thread::sleep(LIVENESS_POLL);
        }
        if is_alive(owner) {
            warn!(sensor = %kind, pid = owner, "Previous instance still alive after grace period");
        }

        // The old owner may already have removed its own record
        if self.lookup(kind).ok().flatten() == Some(owner) {
            remove_record(&path)?;
        }
        Ok(Some(owner))
    }

    /// Signal the recorded owner and clear the record
    pub fn stop(&self, kind: SensorKind, grace: Duration) -> Result<StopOutcome, RegistryError> {
        let path = self.path(kind);
        let owner = match self.lookup(kind) {
            Ok(Some(owner)) => owner,
            Ok(None) => return Err(RegistryError::NotRunning),
            Err(RegistryError::Corrupt { .. }) => {
                remove_record(&path)?;
                return Err(RegistryError::NotRunning);
            }
            Err(e) => return Err(e),
        };

        let outcome = match kill(Pid::from_raw(owner), Signal::SIGTERM) {
            Ok(()) => {
                thread::sleep(grace);
                StopOutcome::Stopped(owner)
            }
            Err(Errno::ESRCH) => StopOutcome::AlreadyGone(owner),
            Err(errno) => return Err(RegistryError::SignalFailed { pid: owner, errno }),
        };

        remove_record(&path)?;
        info!(sensor = %kind, pid = owner, ?outcome, "Stopped instance");
        Ok(outcome)
    }

    /// Remove the record for `kind` if it names `pid`
    pub fn discard(&self, kind: SensorKind, pid: i32) -> Result<bool, RegistryError> {
        remove_if_owned(&self.path(kind), pid)
    }

    /// Report whether `kind` is running; a stale record is cleared
    pub fn status(&self, kind: SensorKind) -> Result<InstanceStatus, RegistryError> {
        let path = self.path(kind);
        match self.lookup(kind) {
            Ok(Some(pid)) if is_alive(pid) => Ok(InstanceStatus::Running(pid)),
            Ok(Some(pid)) => {
                remove_record(&path)?;
                Ok(InstanceStatus::Stale(pid))
            }
            Ok(None) => Ok(InstanceStatus::NotRunning),
            Err(RegistryError::Corrupt { .. }) => {
                remove_record(&path)?;
                Ok(InstanceStatus::NotRunning)
            }
            Err(e) => Err(e),
        }
    }
}

/// Time since `path` was last modified; unknown ages count as fresh
fn record_age(path: &Path) -> Duration {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::ZERO)
}

fn remove_if_owned(path: &Path, pid: i32) -> Result<bool, RegistryError> {
    let owned = match fs::read_to_string(path) {
        Ok(contents) => contents.trim().parse::<i32>().ok() == Some(pid),
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(RegistryError::io(path, e)),
    };
    if owned {
        remove_record(path)?;
    }
    Ok(owned)
}

fn remove_record(path: &Path) -> Result<(), RegistryError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RegistryError::io(path, e)),
    }
}

/// Ownership of an instance record; dropping it releases the record
#[derive(Debug)]
pub struct Claim {
    path: PathBuf,
    pid: i32,
    released: bool,
}

impl Claim {
    fn new(path: PathBuf, pid: i32) -> Self {
        Self {
            path,
            pid,
            released: false,
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the record if it still names this claim's PID.
    ///
    /// Returns whether a record was removed.
    pub fn release(mut self) -> Result<bool, RegistryError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<bool, RegistryError> {
        if self.released {
            return Ok(false);
        }
        self.released = true;

        let removed = remove_if_owned(&self.path, self.pid)?;
        if removed {
            debug!(pid = self.pid, "Released instance record");
        } else {
            debug!(pid = self.pid, "Instance record no longer ours, leaving it");
        }
        Ok(removed)
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!("Failed to release instance record: {}", e);
        }
    }
}
