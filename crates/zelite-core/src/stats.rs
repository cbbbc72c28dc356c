use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of [`RuntimeStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeStatsSnapshot {
    pub submissions: u64,
    pub command_lists_executed: u64,
    pub commands_executed: u64,
    pub barriers: u64,
    pub device_signals: u64,
    pub host_signals: u64,
    pub host_waits: u64,
    pub faults: u64,
    pub immediate_appends: u64,
}

/// Per-driver execution counters.
///
/// Updated from queue worker threads and read from anywhere.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    submissions: AtomicU64,
    command_lists_executed: AtomicU64,
    commands_executed: AtomicU64,
    barriers: AtomicU64,
    device_signals: AtomicU64,
    host_signals: AtomicU64,
    host_waits: AtomicU64,
    faults: AtomicU64,
    immediate_appends: AtomicU64,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_submissions(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_command_lists_executed(&self) {
        self.command_lists_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_commands_executed(&self) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_barriers(&self) {
        self.barriers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_device_signals(&self) {
        self.device_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_host_signals(&self) {
        self.host_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_host_waits(&self) {
        self.host_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_faults(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_immediate_appends(&self) {
        self.immediate_appends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RuntimeStatsSnapshot {
        RuntimeStatsSnapshot {
            submissions: self.submissions.load(Ordering::Relaxed),
            command_lists_executed: self.command_lists_executed.load(Ordering::Relaxed),
            commands_executed: self.commands_executed.load(Ordering::Relaxed),
            barriers: self.barriers.load(Ordering::Relaxed),
            device_signals: self.device_signals.load(Ordering::Relaxed),
            host_signals: self.host_signals.load(Ordering::Relaxed),
            host_waits: self.host_waits.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            immediate_appends: self.immediate_appends.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}
