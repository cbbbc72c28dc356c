use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cmdlist::CommandList;
use crate::context::Context;
use crate::driver::{next_object_id, Device, QueueGroupFlags};
use crate::engine::{Engine, Job, SubmissionState};
use crate::error::{Error, Result};
use crate::fence::Fence;
use crate::wait::{SyncStatus, Timeout};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CommandQueueMode {
    /// Asynchronous.
    #[default]
    Default,
    /// Submission and immediate appends block until the work completes.
    Synchronous,
    Asynchronous,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CommandQueuePriority {
    #[default]
    Normal,
    Low,
    High,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandQueueDesc {
    pub ordinal: u32,
    pub index: u32,
    pub mode: CommandQueueMode,
    pub priority: CommandQueuePriority,
}

impl CommandQueueDesc {
    pub fn synchronous() -> Self {
        Self {
            mode: CommandQueueMode::Synchronous,
            ..Self::default()
        }
    }

    pub fn with_ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Returns whether the queue group is compute-capable.
    pub(crate) fn validate(&self, device: &Device) -> Result<bool> {
        let group = device.queue_group(self.ordinal)?;
        if self.index >= group.num_queues {
            return Err(Error::invalid_argument(format!(
                "queue index {} out of range for ordinal {} ({} queues)",
                self.index, self.ordinal, group.num_queues
            )));
        }
        Ok(group.flags.contains(QueueGroupFlags::COMPUTE))
    }
}

/// Completion token for one `execute_command_lists` call.
#[derive(Clone)]
pub struct Submission {
    id: u64,
    state: Arc<SubmissionState>,
}

impl Submission {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Never blocks. A fault in any list of the submission is the error.
    pub fn poll(&self) -> Result<SyncStatus> {
        match self.state.poll() {
            None => Ok(SyncStatus::NotReady),
            Some(Ok(())) => Ok(SyncStatus::Ready),
            Some(Err(err)) => Err(err),
        }
    }

    pub fn wait(&self, timeout: Timeout) -> Result<SyncStatus> {
        match self.state.wait(timeout) {
            None => Ok(SyncStatus::NotReady),
            Some(Ok(())) => Ok(SyncStatus::Ready),
            Some(Err(err)) => Err(err),
        }
    }
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("id", &self.id)
            .field("done", &self.state.is_done())
            .finish()
    }
}

/// Executes closed command lists on a worker thread, in submission order.
pub struct CommandQueue {
    ctx: Context,
    device: Device,
    desc: CommandQueueDesc,
    engine: Engine,
}

impl CommandQueue {
    pub(crate) fn new(ctx: &Context, device: Device, desc: CommandQueueDesc) -> Result<Self> {
        desc.validate(&device)?;
        let engine = ctx.spawn_engine(&device, "queue")?;
        debug!(
            queue = engine.id(),
            device = %device.id(),
            ordinal = desc.ordinal,
            index = desc.index,
            mode = ?desc.mode,
            "created command queue"
        );
        Ok(Self {
            ctx: ctx.clone(),
            device,
            desc,
            engine,
        })
    }

    pub fn id(&self) -> u64 {
        self.engine.id()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn desc(&self) -> CommandQueueDesc {
        self.desc
    }

    pub fn create_fence(&self) -> Fence {
        Fence::new(self.id())
    }

    fn check_list(&self, list: &CommandList) -> Result<()> {
        if !self.ctx.same_as(&list.ctx) {
            return Err(Error::invalid_argument(format!(
                "command list {} belongs to another context",
                list.id()
            )));
        }
        if list.device() != &self.device {
            return Err(Error::invalid_argument(format!(
                "command list {} targets {}, queue runs on {}",
                list.id(),
                list.device().id(),
                self.device.id()
            )));
        }
        if list.ordinal() != self.desc.ordinal {
            return Err(Error::invalid_argument(format!(
                "command list {} was created for ordinal {}, queue uses {}",
                list.id(),
                list.ordinal(),
                self.desc.ordinal
            )));
        }
        Ok(())
    }

    /// Queues closed lists for execution in array order. If `fence` is given
    /// it becomes ready once all of them finish.
    pub fn execute_command_lists(
        &self,
        lists: &[&CommandList],
        fence: Option<&Fence>,
    ) -> Result<Submission> {
        if lists.is_empty() {
            return Err(Error::invalid_argument("no command lists to execute"));
        }
        let mut recordings = Vec::with_capacity(lists.len());
        for list in lists {
            self.check_list(list)?;
            recordings.push(list.recording()?);
        }
        if let Some(fence) = fence {
            fence.check_bindable(self.id())?;
        }

        let state = SubmissionState::new();
        if let Some(fence) = fence {
            fence.bind(self.id(), state.clone())?;
        }
        for list in lists {
            list.track(state.clone());
        }
        let submission = Submission {
            id: next_object_id(),
            state: state.clone(),
        };
        self.ctx.driver().stats().inc_submissions();
        trace!(
            queue = self.id(),
            submission = submission.id,
            lists = lists.len(),
            "submitted"
        );
        self.engine.submit(Job { recordings, state });

        if self.desc.mode == CommandQueueMode::Synchronous {
            // The outcome stays on the submission and the queue's pending fault.
            let _ = submission.wait(Timeout::INFINITE);
        }
        Ok(submission)
    }

    /// Waits for all submitted work. The first fault since the previous
    /// synchronize is returned once, as the error; faults of later
    /// submissions are counted in its message. Each [`Submission`] and
    /// [`Fence`] still reports its own fault.
    pub fn synchronize(&self, timeout: Timeout) -> Result<SyncStatus> {
        self.ctx.driver().stats().inc_host_waits();
        self.engine.synchronize(timeout).map(SyncStatus::from)
    }

    /// Waits for in-flight work, then stops the worker.
    pub fn destroy(self) -> Result<()> {
        self.engine.wait_idle(Timeout::INFINITE);
        debug!(queue = self.id(), "destroyed command queue");
        Ok(())
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("id", &self.id())
            .field("device", &self.device.id())
            .field("desc", &self.desc)
            .finish()
    }
}
