use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use zelite_core::{
    CommandList, CommandListDesc, CommandQueue, CommandQueueDesc, Context, Device, DevicePtr,
    Driver, DriverConfig, Error, EventPool, EventPoolDesc, EventPoolFlags, IpcTransport,
};

use crate::Scenario;

mod barriers;
mod events;
mod fences;
mod ipc;
mod lists;
mod memory;
mod queues;

macro_rules! scenario {
    ($area:literal, $min:literal, $module:ident :: $name:ident) => {
        Scenario {
            name: stringify!($name),
            area: $area,
            min_devices: $min,
            run: $module::$name,
        }
    };
}

pub(crate) static CATALOG: &[Scenario] = &[
    scenario!("events", 1, events::event_host_signal_and_reset),
    scenario!("events", 1, events::event_synchronize_timeouts),
    scenario!("events", 1, events::event_index_bounds),
    scenario!("events", 1, events::event_duplicate_index),
    scenario!("events", 1, events::event_pool_destroy_with_live_events),
    scenario!("events", 1, events::event_kernel_timestamps),
    scenario!("events", 2, events::event_device_binding),
    scenario!("barrier", 1, barriers::barrier_signal_on_empty_list),
    scenario!("barrier", 1, barriers::barrier_orders_copies),
    scenario!("barrier", 1, barriers::barrier_memory_ranges),
    scenario!("barrier", 1, barriers::barrier_system),
    scenario!("cmdlist", 1, lists::cmdlist_close_twice),
    scenario!("cmdlist", 1, lists::cmdlist_append_after_close),
    scenario!("cmdlist", 1, lists::cmdlist_reset_and_resubmit),
    scenario!("cmdlist", 1, lists::cmdlist_fill_and_copy_region),
    scenario!("cmdlist", 1, lists::cmdlist_kernel_launch),
    scenario!("immediate", 1, lists::immediate_synchronous_append),
    scenario!("immediate", 1, lists::immediate_deferred_fault),
    scenario!("queue", 1, queues::queue_waits_on_host_signal),
    scenario!("queue", 1, queues::queue_deferred_fault),
    scenario!("queue", 1, queues::queue_ordinal_validation),
    scenario!("queue", 1, queues::queue_synchronous_mode),
    scenario!("queue", 2, queues::queue_cross_device_handoff),
    scenario!("fence", 1, fences::fence_lifecycle),
    scenario!("fence", 1, fences::fence_wrong_queue),
    scenario!("fence", 1, fences::fence_observes_fault),
    scenario!("ipc", 1, ipc::ipc_event_pool_roundtrip),
    scenario!("ipc", 1, ipc::ipc_memory_shared),
    scenario!("ipc", 1, ipc::ipc_closed_export),
    scenario!("memory", 1, memory::memory_alloc_validation),
    scenario!("memory", 1, memory::memory_out_of_device_memory),
];

/// One driver, one context, and its first device.
pub(crate) struct Harness {
    pub driver: Driver,
    pub ctx: Context,
    pub device: Device,
}

impl Harness {
    pub fn new(config: &DriverConfig) -> anyhow::Result<Self> {
        Self::with_transport(config, Arc::new(IpcTransport::new()))
    }

    pub fn with_transport(
        config: &DriverConfig,
        transport: Arc<IpcTransport>,
    ) -> anyhow::Result<Self> {
        let driver = Driver::with_transport(config.clone(), transport)
            .context("failed to create driver")?;
        let ctx = Context::new(&driver);
        let device = driver
            .devices()
            .into_iter()
            .next()
            .context("driver exposes no devices")?;
        Ok(Self {
            driver,
            ctx,
            device,
        })
    }

    pub fn device(&self, ordinal: usize) -> anyhow::Result<Device> {
        self.driver
            .devices()
            .into_iter()
            .nth(ordinal)
            .with_context(|| format!("device {ordinal} is not present"))
    }

    pub fn pool(&self, capacity: u32, flags: EventPoolFlags) -> anyhow::Result<EventPool> {
        Ok(self.ctx.create_event_pool(
            EventPoolDesc::new(capacity).with_flags(flags),
            &[self.device.clone()],
        )?)
    }

    pub fn list(&self) -> anyhow::Result<CommandList> {
        Ok(self
            .ctx
            .create_command_list(&self.device, CommandListDesc::default())?)
    }

    pub fn queue(&self) -> anyhow::Result<CommandQueue> {
        Ok(self
            .ctx
            .create_command_queue(&self.device, CommandQueueDesc::default())?)
    }

    /// Shared allocation initialized with `bytes`.
    pub fn buffer(&self, bytes: &[u8]) -> anyhow::Result<DevicePtr> {
        let ptr = self.ctx.alloc_shared(&self.device, bytes.len() as u64, 64)?;
        self.ctx.write(ptr, bytes)?;
        Ok(ptr)
    }

    pub fn expect_bytes(&self, ptr: DevicePtr, expected: &[u8]) -> anyhow::Result<()> {
        let actual = self.ctx.read(ptr, expected.len() as u64)?;
        if actual != expected {
            bail!("memory at {ptr:?} is {actual:02x?}, expected {expected:02x?}");
        }
        Ok(())
    }
}

/// Fails unless `result` is an error accepted by `expected`.
pub(crate) fn expect_err<T: Debug>(
    result: zelite_core::Result<T>,
    expected: fn(&Error) -> bool,
    what: &str,
) -> anyhow::Result<()> {
    match result {
        Ok(value) => bail!("{what}: expected an error, got {value:?}"),
        Err(err) if expected(&err) => Ok(()),
        Err(err) => bail!("{what}: unexpected error kind: {err}"),
    }
}

pub(crate) fn expect_eq<T: PartialEq + Debug>(
    actual: T,
    expected: T,
    what: &str,
) -> anyhow::Result<()> {
    if actual != expected {
        bail!("{what}: got {actual:?}, expected {expected:?}");
    }
    Ok(())
}
