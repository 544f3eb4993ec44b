//! In-memory sample source and output channel for tests

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use nix::errno::Errno;
use sensord_core::SensorConfig;
use sensord_system::{DeviceError, OutputChannel, OutputError, SampleSource, ShutdownToken, Wakeup};

pub type CallLog = Rc<RefCell<Vec<String>>>;

pub fn call_log() -> CallLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// One scripted wake-up of the mock source
#[derive(Debug, Clone)]
pub enum Step {
    Record(Vec<u8>),
    Timeout,
    Interrupted,
    Signal(i32),
    WaitError(Errno),
    ReadError(Errno),
}

pub struct MockSource {
    pub log: CallLog,
    pub record_size: usize,
    pub steps: VecDeque<Step>,
    pending: Option<Result<Vec<u8>, Errno>>,
    pub fail_configure: bool,
    pub fail_enable: bool,
    /// Returned once the script runs out
    pub exhausted: Errno,
    /// Cancelled on `Step::Interrupted`, standing in for the signal handler
    pub cancel_on_interrupt: Option<ShutdownToken>,
    pub waits: usize,
}

impl MockSource {
    pub fn new(log: &CallLog, record_size: usize, steps: Vec<Step>) -> Self {
        Self {
            log: Rc::clone(log),
            record_size,
            steps: steps.into(),
            pending: None,
            fail_configure: false,
            fail_enable: false,
            exhausted: Errno::ENODEV,
            cancel_on_interrupt: None,
            waits: 0,
        }
    }

    fn push(&self, call: &str) {
        self.log.borrow_mut().push(call.to_string());
    }
}

impl SampleSource for MockSource {
    fn record_size(&self) -> usize {
        self.record_size
    }

    fn configure(&mut self, _config: &SensorConfig) -> Result<(), DeviceError> {
        self.push("configure");
        if self.fail_configure {
            return Err(DeviceError::Ioctl {
                op: "Failed to set sampling rate",
                errno: Errno::EINVAL,
            });
        }
        Ok(())
    }

    fn enable(&mut self) -> Result<(), DeviceError> {
        self.push("enable");
        if self.fail_enable {
            return Err(DeviceError::Ioctl {
                op: "Failed to enable sensor",
                errno: Errno::EIO,
            });
        }
        Ok(())
    }

    fn disable(&mut self) -> Result<(), DeviceError> {
        self.push("disable");
        Ok(())
    }

    fn wait(&mut self, _timeout: Option<Duration>) -> Result<Wakeup, DeviceError> {
        self.waits += 1;
        match self.steps.pop_front() {
            Some(Step::Record(bytes)) => {
                self.pending = Some(Ok(bytes));
                Ok(Wakeup::Readable)
            }
            Some(Step::ReadError(errno)) => {
                self.pending = Some(Err(errno));
                Ok(Wakeup::Readable)
            }
            Some(Step::Timeout) => Ok(Wakeup::Timeout),
            Some(Step::Interrupted) => {
                if let Some(token) = &self.cancel_on_interrupt {
                    token.cancel();
                }
                Ok(Wakeup::Interrupted)
            }
            Some(Step::Signal(signo)) => Ok(Wakeup::Unexpected(signo)),
            Some(Step::WaitError(errno)) => Err(DeviceError::Wait(errno)),
            None => Err(DeviceError::Wait(self.exhausted)),
        }
    }

    fn read_one(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        match self.pending.take() {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Err(errno)) => Err(DeviceError::Read(errno)),
            None => Err(DeviceError::Read(Errno::EAGAIN)),
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.push("close_source");
        Ok(())
    }
}

pub struct MockOutput {
    pub log: CallLog,
    pub lines: Rc<RefCell<Vec<Vec<u8>>>>,
    /// Number of upcoming emits that fail
    pub failures: usize,
}

impl MockOutput {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: Rc::clone(log),
            lines: Rc::new(RefCell::new(Vec::new())),
            failures: 0,
        }
    }

    pub fn json_lines(&self) -> Vec<serde_json::Value> {
        self.lines
            .borrow()
            .iter()
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect()
    }
}

impl OutputChannel for MockOutput {
    fn emit(&mut self, record: &[u8]) -> Result<(), OutputError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(OutputError::WriteFailed(std::io::Error::from_raw_os_error(Errno::EIO as i32)));
        }
        self.lines.borrow_mut().push(record.to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        self.log.borrow_mut().push("close_output".to_string());
        Ok(())
    }
}
