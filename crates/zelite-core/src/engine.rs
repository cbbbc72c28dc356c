//! Execution engine behind command queues and immediate command lists.
//!
//! Each engine owns one worker thread that drains a FIFO of jobs. A job is a
//! batch of recordings from one submission; recordings run in order and the
//! commands inside each run in program order, so every barrier is satisfied
//! by construction. A faulting command abandons the rest of its recording;
//! later recordings in the same job and later jobs still run.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};
use zelite_ipc::SlotTimestamps;

use crate::command::{Command, Operation};
use crate::driver::{next_object_id, DeviceId, DriverShared};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::memory::MemoryManager;
use crate::wait::Timeout;

/// Commands frozen at close time and shared by every submission of a list.
#[derive(Debug)]
pub(crate) struct Recording {
    pub(crate) list_id: u64,
    pub(crate) commands: Vec<Command>,
}

/// Completion slot of one submission.
#[derive(Debug, Default)]
pub(crate) struct SubmissionState {
    result: Mutex<Option<Result<()>>>,
    done: Condvar,
}

impl SubmissionState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Result<()>>> {
        self.result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn complete(&self, result: Result<()>) {
        *self.lock() = Some(result);
        self.done.notify_all();
    }

    pub(crate) fn is_done(&self) -> bool {
        self.lock().is_some()
    }

    pub(crate) fn poll(&self) -> Option<Result<()>> {
        self.lock().clone()
    }

    /// `None` if the deadline passed first.
    pub(crate) fn wait(&self, timeout: Timeout) -> Option<Result<()>> {
        let deadline = timeout.deadline();
        let mut guard = self.lock();
        loop {
            if let Some(result) = guard.as_ref() {
                return Some(result.clone());
            }
            guard = match deadline.remaining() {
                None => self
                    .done
                    .wait(guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(left) if left.is_zero() => return None,
                Some(left) => match self.done.wait_timeout(guard, left) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                },
            };
        }
    }
}

pub(crate) struct Job {
    pub(crate) recordings: Vec<Arc<Recording>>,
    pub(crate) state: Arc<SubmissionState>,
}

#[derive(Default)]
struct EngineState {
    jobs: VecDeque<Job>,
    busy: bool,
    pending_fault: Option<Error>,
    // Faulting jobs after `pending_fault`, reported along with it.
    later_faults: u64,
}

pub(crate) struct EngineShared {
    pub(crate) id: u64,
    pub(crate) device: DeviceId,
    driver: Arc<DriverShared>,
    memory: Arc<MemoryManager>,
    context_epoch_ns: u64,
    state: Mutex<EngineState>,
    work: Condvar,
    idle: Condvar,
    shutdown: AtomicBool,
}

impl EngineShared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocks until no job is queued or running. Returns `false` on timeout.
    pub(crate) fn wait_idle(&self, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();
        let mut state = self.lock();
        loop {
            if state.jobs.is_empty() && !state.busy {
                return true;
            }
            state = match deadline.remaining() {
                None => self
                    .idle
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(left) if left.is_zero() => return false,
                Some(left) => match self.idle.wait_timeout(state, left) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                },
            };
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.driver.config.wait_poll_interval_us)
    }

    fn run(self: Arc<Self>) {
        loop {
            let job = {
                let mut state = self.lock();
                loop {
                    if let Some(job) = state.jobs.pop_front() {
                        state.busy = true;
                        break Some(job);
                    }
                    if self.shutdown.load(Ordering::Acquire) {
                        break None;
                    }
                    state = self
                        .work
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            };
            let Some(job) = job else {
                trace!(engine = self.id, "worker exiting");
                return;
            };

            let result = self.execute_job(&job);
            if let Err(err) = &result {
                let mut state = self.lock();
                if state.pending_fault.is_none() {
                    state.pending_fault = Some(err.clone());
                } else {
                    state.later_faults += 1;
                }
            }
            // Complete before going idle so an idle engine never has an
            // unfinished submission.
            job.state.complete(result);
            self.lock().busy = false;
            self.idle.notify_all();
        }
    }

    fn execute_job(&self, job: &Job) -> Result<()> {
        let mut first_fault = None;
        for recording in &job.recordings {
            if let Err(err) = self.execute_recording(recording) {
                self.driver.stats.inc_faults();
                warn!(
                    engine = self.id,
                    list = recording.list_id,
                    error = %err,
                    "command list faulted"
                );
                first_fault.get_or_insert(err);
            }
            self.driver.stats.inc_command_lists_executed();
        }
        match first_fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn execute_recording(&self, recording: &Recording) -> Result<()> {
        for (position, cmd) in recording.commands.iter().enumerate() {
            for event in &cmd.waits {
                self.wait_event(event)?;
            }

            let start = self.driver.now_ns();
            self.execute_op(&cmd.op).map_err(|err| {
                Error::DeviceFault(format!(
                    "{} at position {position} of list {}: {}",
                    cmd.op.name(),
                    recording.list_id,
                    err
                ))
            })?;
            let end = self.driver.now_ns().max(start + 1);

            if let Some(event) = &cmd.signal {
                if !event.is_live() {
                    return Err(Error::DeviceFault(format!(
                        "signal event of {} at position {position} was destroyed",
                        cmd.op.name()
                    )));
                }
                event.device_signal(Some(self.timestamps(start, end)));
            }
            self.driver.stats.inc_commands_executed();
        }
        Ok(())
    }

    fn timestamps(&self, start: u64, end: u64) -> SlotTimestamps {
        // Context ticks count from context creation and start at 1.
        let base = self.context_epoch_ns;
        SlotTimestamps {
            global_start: start,
            global_end: end,
            context_start: start.saturating_sub(base) + 1,
            context_end: end.saturating_sub(base) + 1,
        }
    }

    fn wait_event(&self, event: &Event) -> Result<()> {
        let slice = self.poll_interval();
        loop {
            if !event.is_live() {
                return Err(Error::DeviceFault(format!(
                    "waited-on event {} of pool {} was destroyed",
                    event.index(),
                    event.pool_id()
                )));
            }
            if event.wait_slice(slice) {
                return Ok(());
            }
            if self.shutdown.load(Ordering::Acquire) {
                return Err(Error::DeviceFault(
                    "engine shut down while waiting on an event".to_string(),
                ));
            }
        }
    }

    fn execute_op(&self, op: &Operation) -> Result<()> {
        let memory = &self.memory;
        match op {
            Operation::MemoryCopy { dst, src, size } => memory.copy(*dst, *src, *size),
            Operation::MemoryCopyRegion {
                dst,
                src,
                width,
                height,
            } => {
                for row in 0..*height {
                    let overflow = || Error::invalid_argument("region address overflows");
                    let d = dst.row(row).ok_or_else(overflow)?;
                    let s = src.row(row).ok_or_else(overflow)?;
                    memory.copy(d, s, *width)?;
                }
                Ok(())
            }
            Operation::MemoryFill { dst, pattern, size } => memory.fill(*dst, pattern, *size),
            Operation::Barrier => {
                self.driver.stats.inc_barriers();
                Ok(())
            }
            Operation::MemoryRangesBarrier { ranges } => {
                for (ptr, size) in ranges {
                    memory.check_range(*ptr, *size)?;
                }
                self.driver.stats.inc_barriers();
                Ok(())
            }
            Operation::SignalEvent | Operation::WaitEvents => Ok(()),
            Operation::EventReset { event } => {
                if !event.is_live() {
                    return Err(Error::InvalidHandle("event has been destroyed"));
                }
                event.device_reset();
                Ok(())
            }
            Operation::LaunchKernel(dispatch) => dispatch.run(memory).map_err(|msg| {
                Error::invalid_argument(format!("kernel `{}`: {msg}", dispatch.kernel_name()))
            }),
            Operation::WriteGlobalTimestamp { dst } => {
                memory.write(*dst, &self.driver.now_ns().to_le_bytes())
            }
            Operation::MemoryPrefetch { ptr, size } | Operation::MemAdvise { ptr, size, .. } => {
                memory.check_range(*ptr, *size)
            }
        }
    }
}

/// Owns the worker thread. Dropping the engine finishes queued jobs, aborts
/// any event wait, and joins the worker.
pub(crate) struct Engine {
    shared: Arc<EngineShared>,
    worker: Option<JoinHandle<()>>,
}

impl Engine {
    pub(crate) fn spawn(
        driver: Arc<DriverShared>,
        memory: Arc<MemoryManager>,
        device: DeviceId,
        context_epoch_ns: u64,
        label: &str,
    ) -> Result<Self> {
        let shared = Arc::new(EngineShared {
            id: next_object_id(),
            device,
            driver,
            memory,
            context_epoch_ns,
            state: Mutex::new(EngineState::default()),
            work: Condvar::new(),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("zelite-{label}-{}", shared.id))
                .spawn(move || shared.run())
                .map_err(|e| Error::DeviceFault(format!("failed to start worker: {e}")))?
        };
        debug!(engine = shared.id, %device, label, "engine started");
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    pub(crate) fn id(&self) -> u64 {
        self.shared.id
    }

    pub(crate) fn submit(&self, job: Job) {
        self.shared.lock().jobs.push_back(job);
        self.shared.work.notify_one();
    }

    pub(crate) fn wait_idle(&self, timeout: Timeout) -> bool {
        self.shared.wait_idle(timeout)
    }

    /// Takes the first unreported fault. Faults of later jobs are folded into
    /// its message.
    pub(crate) fn take_fault(&self) -> Option<Error> {
        let mut state = self.shared.lock();
        let later = std::mem::take(&mut state.later_faults);
        match state.pending_fault.take()? {
            Error::DeviceFault(msg) if later > 0 => Some(Error::DeviceFault(format!(
                "{msg} (and {later} later faulting submissions)"
            ))),
            err => Some(err),
        }
    }

    /// Waits for idle, then reports and clears the unreported faults.
    pub(crate) fn synchronize(&self, timeout: Timeout) -> Result<bool> {
        if !self.wait_idle(timeout) {
            return Ok(false);
        }
        match self.take_fault() {
            Some(err) => Err(err),
            None => Ok(true),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        // Take the lock so the worker is either waiting or will see the flag.
        drop(self.shared.lock());
        self.shared.work.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(engine = self.shared.id, "worker thread panicked");
            }
        }
        debug!(engine = self.shared.id, "engine stopped");
    }
}
