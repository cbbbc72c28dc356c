//! Shared helpers for `zelite-core` integration tests.

#![allow(dead_code)]

use zelite_core::{
    CommandList, CommandListDesc, CommandQueue, CommandQueueDesc, Context, Device, Driver,
    DriverConfig, Event, EventDesc, EventPool, EventPoolDesc, EventPoolFlags,
};

pub struct Rig {
    pub driver: Driver,
    pub ctx: Context,
    pub device: Device,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(DriverConfig::default())
    }

    pub fn with_config(config: DriverConfig) -> Self {
        let driver = Driver::new(config).unwrap();
        let ctx = Context::new(&driver);
        let device = driver.devices()[0].clone();
        Self {
            driver,
            ctx,
            device,
        }
    }

    pub fn pool(&self, capacity: u32) -> EventPool {
        self.pool_with_flags(capacity, EventPoolFlags::HOST_VISIBLE)
    }

    pub fn pool_with_flags(&self, capacity: u32, flags: EventPoolFlags) -> EventPool {
        self.ctx
            .create_event_pool(
                EventPoolDesc::new(capacity).with_flags(flags),
                &[self.device.clone()],
            )
            .unwrap()
    }

    pub fn events(&self, pool: &EventPool, count: u32) -> Vec<Event> {
        (0..count)
            .map(|i| pool.create_event(EventDesc::new(i)).unwrap())
            .collect()
    }

    pub fn list(&self) -> CommandList {
        self.ctx
            .create_command_list(&self.device, CommandListDesc::default())
            .unwrap()
    }

    pub fn queue(&self) -> CommandQueue {
        self.ctx
            .create_command_queue(&self.device, CommandQueueDesc::default())
            .unwrap()
    }

    pub fn buffer(&self, bytes: &[u8]) -> zelite_core::DevicePtr {
        let ptr = self
            .ctx
            .alloc_shared(&self.device, bytes.len() as u64, 64)
            .unwrap();
        self.ctx.write(ptr, bytes).unwrap();
        ptr
    }
}
