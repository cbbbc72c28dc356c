//! Host-side command submission and event synchronization runtime.
//!
//! A [`Driver`] exposes simulated devices. A [`Context`] owns memory and
//! creates event pools, command lists, queues, and modules. Work is recorded
//! into a [`CommandList`], closed, and executed on a [`CommandQueue`]; an
//! [`ImmediateCommandList`] runs each operation as it is appended. Events,
//! fences, and submission tokens are the synchronization points.
//!
//! ```no_run
//! use zelite_core::{
//!     CommandAppend, CommandListDesc, CommandQueueDesc, Context, Driver, DriverConfig,
//!     EventDesc, EventPoolDesc, Timeout,
//! };
//!
//! # fn main() -> zelite_core::Result<()> {
//! let driver = Driver::new(DriverConfig::default())?;
//! let device = driver.devices()[0].clone();
//! let ctx = Context::new(&driver);
//!
//! let pool = ctx.create_event_pool(EventPoolDesc::new(1), &[device.clone()])?;
//! let done = pool.create_event(EventDesc::new(0))?;
//!
//! let mut list = ctx.create_command_list(&device, CommandListDesc::default())?;
//! list.append_barrier(Some(&done), &[])?;
//! list.close()?;
//!
//! let queue = ctx.create_command_queue(&device, CommandQueueDesc::default())?;
//! queue.execute_command_lists(&[&list], None)?;
//! queue.synchronize(Timeout::INFINITE)?;
//! assert!(done.query_status()?.is_ready());
//! # Ok(())
//! # }
//! ```

mod cmdlist;
mod command;
mod config;
mod context;
mod driver;
mod engine;
mod error;
mod event;
mod fence;
mod immediate;
mod kernel;
mod memory;
mod queue;
mod stats;
mod wait;

pub use cmdlist::{CommandList, CommandListDesc, CommandListState};
pub use command::{CommandAppend, CopyRegion, MemAdvice, Operation, MAX_FILL_PATTERN_BYTES};
pub use config::{ConfigError, DriverConfig};
pub use context::Context;
pub use driver::{
    Device, DeviceId, DeviceProperties, Driver, QueueGroupFlags, QueueGroupProperties,
};
pub use error::{Error, Result};
pub use event::{
    Event, EventDesc, EventPool, EventPoolDesc, EventPoolFlags, EventScope, KernelTimestampResult,
    TimestampPair,
};
pub use fence::Fence;
pub use immediate::ImmediateCommandList;
pub use kernel::{
    GroupCount, Kernel, KernelArg, KernelBody, KernelDispatch, KernelLaunch, KernelProperties,
    Module, ModuleDesc,
};
pub use memory::{AllocationProperties, DevicePtr, MemoryKind};
pub use queue::{CommandQueue, CommandQueueDesc, CommandQueueMode, CommandQueuePriority, Submission};
pub use stats::{RuntimeStats, RuntimeStatsSnapshot};
pub use wait::{SyncStatus, Timeout};
pub use zelite_ipc::{IpcError, IpcEventPoolHandle, IpcMemHandle, IpcTransport};
