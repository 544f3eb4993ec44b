//! Lifecycle guard for one acquisition run
//!
//! Owns the sample source, the output channel and the instance claim. On
//! every exit path they are released in a fixed order: disable the source,
//! close the source, close the output, release the claim. Only what was
//! actually acquired is released, and each resource exactly once.

use sensord_core::SensorKind;
use sensord_system::{Claim, DeviceError, OutputChannel, SampleSource};
use tracing::{debug, info, warn};

pub struct Session<S: SampleSource, O: OutputChannel> {
    kind: SensorKind,
    source: Option<S>,
    enabled: bool,
    output: Option<O>,
    claim: Option<Claim>,
}

impl<S: SampleSource, O: OutputChannel> Session<S, O> {
    pub fn new(kind: SensorKind) -> Self {
        Self {
            kind,
            source: None,
            enabled: false,
            output: None,
            claim: None,
        }
    }

    pub fn attach_claim(&mut self, claim: Claim) {
        debug!(sensor = %self.kind, pid = claim.pid(), "Session holds instance claim");
        self.claim = Some(claim);
    }

    pub fn attach_source(&mut self, source: S) {
        self.source = Some(source);
    }

    pub fn attach_output(&mut self, output: O) {
        self.output = Some(output);
    }

    /// Enable the attached source; disabling then happens on release
    pub fn enable(&mut self) -> Result<(), DeviceError> {
        let source = self.source.as_mut().ok_or(DeviceError::Closed)?;
        source.enable()?;
        self.enabled = true;
        info!(sensor = %self.kind, "Sensor enabled");
        Ok(())
    }

    pub fn source_mut(&mut self) -> Option<&mut S> {
        self.source.as_mut()
    }

    /// Source and output together, for the acquisition loop
    pub fn parts(&mut self) -> Option<(&mut S, &mut O)> {
        match (self.source.as_mut(), self.output.as_mut()) {
            (Some(source), Some(output)) => Some((source, output)),
            _ => None,
        }
    }

    /// Release everything acquired so far. Calling it again does nothing.
    pub fn release(&mut self) {
        if let Some(source) = self.source.as_mut() {
            if self.enabled {
                self.enabled = false;
                if let Err(e) = source.disable() {
                    warn!(sensor = %self.kind, "Failed to disable sensor: {}", e);
                }
            }
        }

        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.close() {
                warn!(sensor = %self.kind, "Failed to close sensor device: {}", e);
            }
        }

        if let Some(mut output) = self.output.take() {
            if let Err(e) = output.close() {
                warn!(sensor = %self.kind, "Failed to close output: {}", e);
            }
        }

        if let Some(claim) = self.claim.take() {
            match claim.release() {
                Ok(true) => debug!(sensor = %self.kind, "Instance record removed"),
                Ok(false) => debug!(sensor = %self.kind, "Instance record already replaced"),
                Err(e) => warn!(sensor = %self.kind, "Failed to release instance record: {}", e),
            }
        }
    }
}

impl<S: SampleSource, O: OutputChannel> Drop for Session<S, O> {
    fn drop(&mut self) {
        self.release();
    }
}
