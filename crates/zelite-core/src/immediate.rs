use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::command::{sealed, AppendTarget, Command};
use crate::context::Context;
use crate::driver::{next_object_id, Device};
use crate::engine::{Engine, Job, Recording, SubmissionState};
use crate::error::Result;
use crate::queue::{CommandQueueDesc, CommandQueueMode};
use crate::wait::{SyncStatus, Timeout};

/// A command list that runs each operation as it is appended, on its own
/// implicit queue.
///
/// In synchronous mode every append blocks until the operation finishes and
/// returns its fault directly. Otherwise faults surface on the next
/// [`ImmediateCommandList::host_synchronize`].
pub struct ImmediateCommandList {
    id: u64,
    ctx: Context,
    device: Device,
    desc: CommandQueueDesc,
    copy_only: bool,
    engine: Engine,
}

impl ImmediateCommandList {
    pub(crate) fn new(ctx: &Context, device: Device, desc: CommandQueueDesc) -> Result<Self> {
        let compute = desc.validate(&device)?;
        let engine = ctx.spawn_engine(&device, "immediate")?;
        let id = next_object_id();
        debug!(
            list = id,
            device = %device.id(),
            mode = ?desc.mode,
            "created immediate command list"
        );
        Ok(Self {
            id,
            ctx: ctx.clone(),
            device,
            desc,
            copy_only: !compute,
            engine,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn mode(&self) -> CommandQueueMode {
        self.desc.mode
    }

    /// Immediate lists have nothing to freeze.
    pub fn close(&mut self) -> Result<()> {
        Ok(())
    }

    pub fn host_synchronize(&self, timeout: Timeout) -> Result<SyncStatus> {
        self.ctx.driver().stats().inc_host_waits();
        self.engine.synchronize(timeout).map(SyncStatus::from)
    }

    /// Waits for outstanding work and discards any unreported fault.
    pub fn reset(&mut self) -> Result<()> {
        self.engine.wait_idle(Timeout::INFINITE);
        self.engine.take_fault();
        Ok(())
    }
}

impl sealed::Recorder for ImmediateCommandList {
    fn append_target(&self) -> AppendTarget {
        AppendTarget {
            driver_id: self.ctx.driver().id(),
            device: self.device.id(),
            copy_only: self.copy_only,
        }
    }

    fn record(&mut self, command: Command) -> Result<()> {
        let state = SubmissionState::new();
        self.engine.submit(Job {
            recordings: vec![Arc::new(Recording {
                list_id: self.id,
                commands: vec![command],
            })],
            state: state.clone(),
        });
        self.ctx.driver().stats().inc_immediate_appends();

        if self.desc.mode != CommandQueueMode::Synchronous {
            return Ok(());
        }
        match state.wait(Timeout::INFINITE) {
            Some(Err(err)) => {
                // Already reported to the caller.
                self.engine.take_fault();
                Err(err)
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for ImmediateCommandList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImmediateCommandList")
            .field("id", &self.id)
            .field("device", &self.device.id())
            .field("mode", &self.desc.mode)
            .finish()
    }
}
