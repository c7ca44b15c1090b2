//! Resident-memory ceiling checks for streaming passes.
//!
//! Sampling process memory is far more expensive than handling one CSV
//! record, so [`MemoryGuard`] only asks its [`MemoryProbe`] once every
//! `memory_check_interval` records.

use std::sync::{Arc, Mutex, PoisonError};

use incident_hub_gtfs_models::LoaderConfig;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Reports the resident memory of the current process.
pub trait MemoryProbe: Send + Sync {
    /// Resident set size in bytes, or `None` when it cannot be measured.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Measures the real process through `sysinfo`.
pub struct ProcessMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessMemoryProbe {
    /// Creates a probe for the current process.
    #[must_use]
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| log::warn!("Cannot determine own pid, memory checks disabled: {e}"))
            .ok();
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(sysinfo::Process::memory)
    }
}

/// Outcome of counting one record against the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryState {
    /// No check was due, or usage is under the ceiling.
    Normal,
    /// A check found usage above the ceiling.
    OverCeiling {
        /// Measured resident bytes.
        resident_bytes: u64,
    },
}

/// Counts records and samples memory at a fixed interval.
pub struct MemoryGuard {
    probe: Arc<dyn MemoryProbe>,
    ceiling_bytes: u64,
    interval: u64,
    since_check: u64,
    checks: u64,
    pressure_events: u64,
}

impl MemoryGuard {
    /// Creates a guard with the ceiling and interval from `config`.
    #[must_use]
    pub fn new(probe: Arc<dyn MemoryProbe>, config: &LoaderConfig) -> Self {
        Self {
            probe,
            ceiling_bytes: config.max_memory_bytes(),
            interval: config.memory_check_interval.max(1),
            since_check: 0,
            checks: 0,
            pressure_events: 0,
        }
    }

    /// Counts one processed record, sampling memory when a check is due.
    pub fn record(&mut self) -> MemoryState {
        self.since_check += 1;
        if self.since_check < self.interval {
            return MemoryState::Normal;
        }
        self.since_check = 0;
        self.check()
    }

    /// Samples memory now.
    pub fn check(&mut self) -> MemoryState {
        self.checks += 1;
        match self.probe.resident_bytes() {
            Some(resident_bytes) if resident_bytes > self.ceiling_bytes => {
                self.pressure_events += 1;
                MemoryState::OverCeiling { resident_bytes }
            }
            _ => MemoryState::Normal,
        }
    }

    /// Number of samples taken.
    #[must_use]
    pub const fn checks(&self) -> u64 {
        self.checks
    }

    /// Number of samples that found usage above the ceiling.
    #[must_use]
    pub const fn pressure_events(&self) -> u64 {
        self.pressure_events
    }

    /// The ceiling in bytes.
    #[must_use]
    pub const fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }
}
