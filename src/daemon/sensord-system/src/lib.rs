//! Sensord System Integration
//!
//! Everything that talks to the operating system: sensor device handles and
//! their notification models, the PID-file instance registry, the record
//! output channel and the shutdown signal handler.

pub mod device;
pub mod output;
pub mod registry;
pub mod shutdown;

pub use device::{CharDevice, DeviceError, GnssDevice, SampleSource, Wakeup};
pub use output::{OutputChannel, OutputError, TtyOutput};
pub use registry::{is_alive, Claim, InstanceRegistry, InstanceStatus, RegistryError, StopOutcome};
pub use shutdown::ShutdownToken;
