//! Sensor device handles
//!
//! Two notification models are supported. IMU character devices are waited
//! on with a bounded `poll`; the GNSS receiver delivers a realtime signal per
//! position fix which is consumed with `sigwaitinfo`.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use libc::{c_int, c_ulong, c_void};
use nix::errno::Errno;
use sensord_core::{GnssConfig, ImuConfig, SensorConfig};
use thiserror::Error;
use tracing::{debug, warn};

/// Driver ioctl requests; values are the drivers' ABI
pub mod ioctl {
    use libc::c_ulong;

    const SNIOC_BASE: c_ulong = 0x2600;
    const GNSS_BASE: c_ulong = 0x2a00;

    pub const SNIOC_ENABLE: c_ulong = SNIOC_BASE | 0x01;
    pub const SNIOC_SSAMPRATE: c_ulong = SNIOC_BASE | 0x8b;
    pub const SNIOC_SDRANGE: c_ulong = SNIOC_BASE | 0x8c;
    pub const SNIOC_SFIFOTHRESH: c_ulong = SNIOC_BASE | 0x8d;

    pub const GNSS_START: c_ulong = GNSS_BASE | 0x01;
    pub const GNSS_STOP: c_ulong = GNSS_BASE | 0x02;
    pub const GNSS_SELECT_SATELLITE_SYSTEM: c_ulong = GNSS_BASE | 0x03;
    pub const GNSS_SET_OPE_MODE: c_ulong = GNSS_BASE | 0x05;
    pub const GNSS_SIGNAL_SET: c_ulong = GNSS_BASE | 0x23;

    /// Hot start
    pub const GNSS_STMOD_HOT: c_ulong = 2;
    /// Position fix notification
    pub const GNSS_SIG_GNSS: u8 = 0;
    /// Normal operation mode
    pub const GNSS_OPE_MODE_NORMAL: i32 = 1;
}

#[repr(C)]
struct DynamicRange {
    accel: c_int,
    gyro: c_int,
}

#[repr(C)]
struct OpeModeParam {
    mode: i32,
    cycle: u32,
}

#[repr(C)]
struct SignalSetting {
    fd: c_int,
    enable: u8,
    gnsssig: u8,
    signo: u8,
    data: *mut c_void,
}

/// Device operation failures
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{op}: {errno}")]
    Ioctl { op: &'static str, errno: Errno },
    #[error("Read error: {0}")]
    Read(Errno),
    #[error("Wait failed: {0}")]
    Wait(Errno),
    #[error("Settings do not apply to {0}")]
    Unsupported(&'static str),
    #[error("Device already closed")]
    Closed,
}

impl DeviceError {
    pub fn errno(&self) -> Option<Errno> {
        match self {
            DeviceError::Open { source, .. } => source.raw_os_error().map(Errno::from_raw),
            DeviceError::Ioctl { errno, .. } | DeviceError::Read(errno) | DeviceError::Wait(errno) => Some(*errno),
            DeviceError::Closed => Some(Errno::EBADF),
            DeviceError::Unsupported(_) => None,
        }
    }

    pub fn status_code(&self) -> i32 {
        match self.errno() {
            Some(errno) if errno != Errno::UnknownErrno => -(errno as i32),
            _ => -1,
        }
    }

    /// The device disappeared or the descriptor is no longer usable
    pub fn is_source_gone(&self) -> bool {
        matches!(self.errno(), Some(Errno::ENODEV | Errno::EBADF | Errno::ENXIO))
    }

    /// Retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self.errno(), Some(Errno::EINTR | Errno::EAGAIN))
    }
}

/// Why a wait on a source returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// One record can be read
    Readable,
    /// The bounded wait elapsed with nothing to read
    Timeout,
    /// A signal handler ran; check the shutdown flag
    Interrupted,
    /// A signal other than the registered notification was taken
    Unexpected(i32),
}

/// A device delivering fixed-size records
pub trait SampleSource {
    fn record_size(&self) -> usize;

    /// Apply validated settings; fails on the first rejected step
    fn configure(&mut self, config: &SensorConfig) -> Result<(), DeviceError>;

    fn enable(&mut self) -> Result<(), DeviceError>;

    fn disable(&mut self) -> Result<(), DeviceError>;

    /// Block until a record is available; `None` waits without bound
    fn wait(&mut self, timeout: Option<Duration>) -> Result<Wakeup, DeviceError>;

    /// Read at most one record into `buf`, returning the byte count
    fn read_one(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError>;

    /// Release the descriptor; a second call is a no-op
    fn close(&mut self) -> Result<(), DeviceError>;
}

fn open_device(path: &Path) -> Result<File, DeviceError> {
    OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|source| DeviceError::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn raw_fd(file: &Option<File>) -> Result<RawFd, DeviceError> {
    file.as_ref().map(AsRawFd::as_raw_fd).ok_or(DeviceError::Closed)
}

fn ioctl_call(fd: RawFd, op: &'static str, request: c_ulong, arg: c_ulong) -> Result<(), DeviceError> {
    let ret = unsafe { libc::ioctl(fd, request as _, arg) };
    if ret < 0 {
        return Err(DeviceError::Ioctl {
            op,
            errno: Errno::last(),
        });
    }
    Ok(())
}

fn read_record(fd: RawFd, buf: &mut [u8], record_size: usize) -> Result<usize, DeviceError> {
    let len = buf.len().min(record_size);
    let ret = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, len) };
    if ret < 0 {
        return Err(DeviceError::Read(Errno::last()));
    }
    Ok(ret as usize)
}

fn timeout_ms(timeout: Option<Duration>) -> c_int {
    match timeout {
        Some(t) => t.as_millis().min(c_int::MAX as u128) as c_int,
        None => -1,
    }
}

/// Character device waited on with `poll`
pub struct CharDevice {
    file: Option<File>,
    path: PathBuf,
    record_size: usize,
}

impl CharDevice {
    pub fn open(path: impl AsRef<Path>, record_size: usize) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let file = open_device(path)?;
        debug!(device = %path.display(), "Opened sensor device");
        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            record_size,
        })
    }

    fn configure_imu(&self, config: &ImuConfig) -> Result<(), DeviceError> {
        let fd = raw_fd(&self.file)?;
        ioctl_call(
            fd,
            "Failed to set sampling rate",
            ioctl::SNIOC_SSAMPRATE,
            c_ulong::from(config.rate.hz()),
        )?;
        let range = DynamicRange {
            accel: config.accel_range.g() as c_int,
            gyro: config.gyro_range.dps() as c_int,
        };
        ioctl_call(
            fd,
            "Failed to set dynamic range",
            ioctl::SNIOC_SDRANGE,
            &range as *const DynamicRange as c_ulong,
        )?;
        ioctl_call(
            fd,
            "Failed to set FIFO number",
            ioctl::SNIOC_SFIFOTHRESH,
            c_ulong::from(config.fifo.get()),
        )
    }
}

impl SampleSource for CharDevice {
    fn record_size(&self) -> usize {
        self.record_size
    }

    fn configure(&mut self, config: &SensorConfig) -> Result<(), DeviceError> {
        match config {
            SensorConfig::Imu(imu) => self.configure_imu(imu),
            SensorConfig::Gnss(_) => Err(DeviceError::Unsupported("an IMU device")),
        }
    }

    fn enable(&mut self) -> Result<(), DeviceError> {
        ioctl_call(raw_fd(&self.file)?, "Failed to enable sensor", ioctl::SNIOC_ENABLE, 1)
    }

    fn disable(&mut self) -> Result<(), DeviceError> {
        ioctl_call(raw_fd(&self.file)?, "Failed to disable sensor", ioctl::SNIOC_ENABLE, 0)
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<Wakeup, DeviceError> {
        let mut fds = [libc::pollfd {
            fd: raw_fd(&self.file)?,
            events: libc::POLLIN,
            revents: 0,
        }];

        let ret = unsafe { libc::poll(fds.as_mut_ptr(), 1, timeout_ms(timeout)) };
        if ret < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                return Ok(Wakeup::Interrupted);
            }
            return Err(DeviceError::Wait(errno));
        }
        if ret == 0 {
            return Ok(Wakeup::Timeout);
        }

        let revents = fds[0].revents;
        if revents & libc::POLLNVAL != 0 {
            return Err(DeviceError::Wait(Errno::EBADF));
        }
        if revents & libc::POLLIN != 0 {
            return Ok(Wakeup::Readable);
        }
        Err(DeviceError::Wait(Errno::ENODEV))
    }

    fn read_one(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        read_record(raw_fd(&self.file)?, buf, self.record_size)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.file.take().is_some() {
            debug!(device = %self.path.display(), "Closed sensor device");
        }
        Ok(())
    }
}

/// GNSS receiver notifying each fix with a realtime signal
pub struct GnssDevice {
    file: Option<File>,
    path: PathBuf,
    record_size: usize,
    signo: c_int,
    mask: libc::sigset_t,
    registered: bool,
}

impl GnssDevice {
    /// Open the receiver; notifications use `SIGRTMIN + signal_offset`
    pub fn open(path: impl AsRef<Path>, record_size: usize, signal_offset: u8) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let file = open_device(path)?;

        let signo = libc::SIGRTMIN() + c_int::from(signal_offset);
        let mut mask: libc::sigset_t = unsafe { std::mem::zeroed() };
        unsafe {
            libc::sigemptyset(&mut mask);
            libc::sigaddset(&mut mask, signo);
        }

        debug!(device = %path.display(), signo, "Opened GNSS device");
        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            record_size,
            signo,
            mask,
            registered: false,
        })
    }

    pub fn signo(&self) -> c_int {
        self.signo
    }

    fn signal_set(&self, fd: RawFd, enable: bool) -> Result<(), DeviceError> {
        let setting = SignalSetting {
            fd,
            enable: u8::from(enable),
            gnsssig: ioctl::GNSS_SIG_GNSS,
            signo: self.signo as u8,
            data: std::ptr::null_mut(),
        };
        ioctl_call(
            fd,
            "Failed to set GNSS signal",
            ioctl::GNSS_SIGNAL_SET,
            &setting as *const SignalSetting as c_ulong,
        )
    }

    /// Block the notification signal and ask the driver to raise it
    fn register(&mut self) -> Result<(), DeviceError> {
        if self.registered {
            return Ok(());
        }
        let fd = raw_fd(&self.file)?;

        let ret = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &self.mask, std::ptr::null_mut()) };
        if ret != 0 {
            return Err(DeviceError::Ioctl {
                op: "sigprocmask failed",
                errno: Errno::from_raw(ret),
            });
        }
        if let Err(e) = self.signal_set(fd, true) {
            unsafe { libc::pthread_sigmask(libc::SIG_UNBLOCK, &self.mask, std::ptr::null_mut()) };
            return Err(e);
        }
        self.registered = true;
        Ok(())
    }

    fn unregister(&mut self) -> Result<(), DeviceError> {
        if !self.registered {
            return Ok(());
        }
        self.registered = false;
        let result = raw_fd(&self.file).and_then(|fd| self.signal_set(fd, false));
        unsafe { libc::pthread_sigmask(libc::SIG_UNBLOCK, &self.mask, std::ptr::null_mut()) };
        result
    }

    fn configure_gnss(&mut self, config: &GnssConfig) -> Result<(), DeviceError> {
        self.register()?;
        let fd = raw_fd(&self.file)?;
        let mode = OpeModeParam {
            mode: ioctl::GNSS_OPE_MODE_NORMAL,
            cycle: config.cycle_ms,
        };
        ioctl_call(
            fd,
            "Failed to set GNSS operation mode",
            ioctl::GNSS_SET_OPE_MODE,
            &mode as *const OpeModeParam as c_ulong,
        )?;
        ioctl_call(
            fd,
            "Failed to select satellite system",
            ioctl::GNSS_SELECT_SATELLITE_SYSTEM,
            c_ulong::from(config.satellite_system),
        )
    }
}

impl SampleSource for GnssDevice {
    fn record_size(&self) -> usize {
        self.record_size
    }

    fn configure(&mut self, config: &SensorConfig) -> Result<(), DeviceError> {
        match config {
            SensorConfig::Gnss(gnss) => self.configure_gnss(gnss),
            SensorConfig::Imu(_) => Err(DeviceError::Unsupported("a GNSS receiver")),
        }
    }

    fn enable(&mut self) -> Result<(), DeviceError> {
        ioctl_call(
            raw_fd(&self.file)?,
            "Failed to start GNSS",
            ioctl::GNSS_START,
            ioctl::GNSS_STMOD_HOT,
        )
    }

    fn disable(&mut self) -> Result<(), DeviceError> {
        ioctl_call(raw_fd(&self.file)?, "Failed to stop GNSS", ioctl::GNSS_STOP, 0)
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<Wakeup, DeviceError> {
        raw_fd(&self.file)?;
        let ret = match timeout {
            None => unsafe { libc::sigwaitinfo(&self.mask, std::ptr::null_mut()) },
            Some(t) => {
                let ts = libc::timespec {
                    tv_sec: t.as_secs() as libc::time_t,
                    tv_nsec: t.subsec_nanos() as _,
                };
                unsafe { libc::sigtimedwait(&self.mask, std::ptr::null_mut(), &ts) }
            }
        };

        if ret < 0 {
            return match Errno::last() {
                Errno::EINTR => Ok(Wakeup::Interrupted),
                Errno::EAGAIN => Ok(Wakeup::Timeout),
                errno => Err(DeviceError::Wait(errno)),
            };
        }
        if ret == self.signo {
            Ok(Wakeup::Readable)
        } else {
            Ok(Wakeup::Unexpected(ret))
        }
    }

    fn read_one(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        read_record(raw_fd(&self.file)?, buf, self.record_size)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        let result = self.unregister();
        if self.file.take().is_some() {
            debug!(device = %self.path.display(), "Closed GNSS device");
        }
        result
    }
}

impl Drop for CharDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close sensor device: {}", e);
        }
    }
}

impl Drop for GnssDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close GNSS device: {}", e);
        }
    }
}
