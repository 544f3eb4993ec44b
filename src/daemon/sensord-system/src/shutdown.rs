//! Cooperative shutdown on SIGINT/SIGTERM
//!
//! The handler only stores into an atomic flag. It is installed without
//! `SA_RESTART` so a blocking `poll` or `sigwaitinfo` returns `EINTR` and the
//! loop gets to observe the flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

static SIGNAL_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_terminate(_signo: libc::c_int) {
    if let Some(flag) = SIGNAL_FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    /// A token not connected to any signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the SIGINT/SIGTERM handlers and return the token they set
    pub fn install() -> Result<Self, nix::Error> {
        let flag = SIGNAL_FLAG
            .get_or_init(|| Arc::new(AtomicBool::new(false)))
            .clone();

        let action = SigAction::new(SigHandler::Handler(on_terminate), SaFlags::empty(), SigSet::empty());
        unsafe {
            sigaction(Signal::SIGINT, &action)?;
            sigaction(Signal::SIGTERM, &action)?;
        }
        Ok(Self { flag })
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
