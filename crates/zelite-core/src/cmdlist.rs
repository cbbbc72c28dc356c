use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::command::{sealed, AppendTarget, Command, Operation};
use crate::context::ContextShared;
use crate::driver::{next_object_id, Device, QueueGroupFlags};
use crate::engine::{Recording, SubmissionState};
use crate::error::{Error, Result};
use crate::wait::Timeout;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandListDesc {
    /// Queue group the list will be submitted to.
    pub ordinal: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandListState {
    Open,
    Closed,
    /// Closed, with at least one submission still executing.
    Submitted,
}

/// A recorded, replayable sequence of operations.
///
/// Recording is only legal while open. [`CommandList::close`] freezes the
/// commands; the frozen recording is shared by every submission, so the list
/// may be submitted any number of times and to several queues.
pub struct CommandList {
    id: u64,
    pub(crate) ctx: Arc<ContextShared>,
    device: Device,
    ordinal: u32,
    copy_only: bool,
    commands: Vec<Command>,
    frozen: Option<Arc<Recording>>,
    in_flight: Mutex<Vec<Arc<SubmissionState>>>,
}

impl CommandList {
    pub(crate) fn new(
        ctx: Arc<ContextShared>,
        device: Device,
        desc: CommandListDesc,
    ) -> Result<Self> {
        let group = device.queue_group(desc.ordinal)?;
        let list = Self {
            id: next_object_id(),
            ctx,
            device,
            ordinal: desc.ordinal,
            copy_only: !group.flags.contains(QueueGroupFlags::COMPUTE),
            commands: Vec::new(),
            frozen: None,
            in_flight: Mutex::new(Vec::new()),
        };
        trace!(list = list.id, ordinal = list.ordinal, "created command list");
        Ok(list)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Vec<Arc<SubmissionState>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CommandListState {
        if self.frozen.is_none() {
            return CommandListState::Open;
        }
        let mut in_flight = self.lock_in_flight();
        in_flight.retain(|s| !s.is_done());
        if in_flight.is_empty() {
            CommandListState::Closed
        } else {
            CommandListState::Submitted
        }
    }

    pub fn len(&self) -> usize {
        match &self.frozen {
            Some(recording) => recording.commands.len(),
            None => self.commands.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> + '_ {
        let commands = match &self.frozen {
            Some(recording) => recording.commands.as_slice(),
            None => self.commands.as_slice(),
        };
        commands.iter().map(Command::operation)
    }

    pub fn close(&mut self) -> Result<()> {
        if self.frozen.is_some() {
            return Err(Error::InvalidState("command list is already closed"));
        }
        let commands = std::mem::take(&mut self.commands);
        trace!(list = self.id, commands = commands.len(), "closed command list");
        self.frozen = Some(Arc::new(Recording {
            list_id: self.id,
            commands,
        }));
        Ok(())
    }

    /// Discards all commands and reopens the list, first waiting for every
    /// submission of it to finish.
    pub fn reset(&mut self) -> Result<()> {
        let pending: Vec<_> = self.lock_in_flight().drain(..).collect();
        for state in &pending {
            // Faults belong to the submission; reset only waits.
            let _ = state.wait(Timeout::INFINITE);
        }
        self.frozen = None;
        self.commands.clear();
        debug!(list = self.id, waited = pending.len(), "reset command list");
        Ok(())
    }

    pub(crate) fn recording(&self) -> Result<Arc<Recording>> {
        self.frozen
            .clone()
            .ok_or(Error::InvalidState("command list is not closed"))
    }

    pub(crate) fn track(&self, state: Arc<SubmissionState>) {
        let mut in_flight = self.lock_in_flight();
        in_flight.retain(|s| !s.is_done());
        in_flight.push(state);
    }
}

impl sealed::Recorder for CommandList {
    fn append_target(&self) -> AppendTarget {
        AppendTarget {
            driver_id: self.ctx.driver.id(),
            device: self.device.id(),
            copy_only: self.copy_only,
        }
    }

    fn record(&mut self, command: Command) -> Result<()> {
        if self.frozen.is_some() {
            return Err(Error::InvalidState("command list is closed"));
        }
        self.commands.push(command);
        Ok(())
    }
}

impl fmt::Debug for CommandList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandList")
            .field("id", &self.id)
            .field("device", &self.device.id())
            .field("ordinal", &self.ordinal)
            .field("state", &self.state())
            .field("len", &self.len())
            .finish()
    }
}
