//! Acquisition metrics
//! Only responsible for counting; no exporter is installed

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use metrics::{counter, gauge};
use sensord_core::SensorKind;

/// Counters for one acquisition run
pub struct AcquisitionMetrics {
    sensor: &'static str,
    start_time: Instant,
    samples: AtomicU64,
    records_emitted: AtomicU64,
    write_failures: AtomicU64,
    read_errors: AtomicU64,
    invalid: AtomicU64,
    warmup_discarded: AtomicU64,
}

impl AcquisitionMetrics {
    pub fn new(kind: SensorKind) -> Self {
        Self {
            sensor: kind.cmd_tag(),
            start_time: Instant::now(),
            samples: AtomicU64::new(0),
            records_emitted: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            warmup_discarded: AtomicU64::new(0),
        }
    }

    /// A full record was read and handed to the transform
    pub fn record_sample(&self) {
        counter!("sensord_samples_total", "sensor" => self.sensor).increment(1);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        counter!("sensord_records_emitted_total", "sensor" => self.sensor).increment(1);
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        counter!("sensord_write_failures_total", "sensor" => self.sensor).increment(1);
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Read error; `consecutive` is the current run of failures
    pub fn record_read_error(&self, consecutive: u32) {
        counter!("sensord_read_errors_total", "sensor" => self.sensor).increment(1);
        gauge!("sensord_consecutive_read_errors", "sensor" => self.sensor).set(f64::from(consecutive));
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        counter!("sensord_invalid_total", "sensor" => self.sensor).increment(1);
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warmup_discard(&self) {
        counter!("sensord_warmup_discarded_total", "sensor" => self.sensor).increment(1);
        self.warmup_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            samples: self.samples.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            warmup_discarded: self.warmup_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the acquisition counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub uptime_seconds: u64,
    pub samples: u64,
    pub records_emitted: u64,
    pub write_failures: u64,
    pub read_errors: u64,
    pub invalid: u64,
    pub warmup_discarded: u64,
}
