use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;
use zelite_ipc::{IpcEventPoolHandle, IpcMemHandle};

use crate::cmdlist::{CommandList, CommandListDesc};
use crate::driver::{next_object_id, Device, DeviceId, Driver};
use crate::engine::{Engine, EngineShared};
use crate::error::Result;
use crate::event::{EventPool, EventPoolDesc};
use crate::immediate::ImmediateCommandList;
use crate::kernel::{Module, ModuleDesc};
use crate::memory::{AllocationProperties, DevicePtr, MemoryKind, MemoryManager};
use crate::queue::{CommandQueue, CommandQueueDesc};
use crate::wait::Timeout;

pub(crate) struct ContextShared {
    pub(crate) id: u64,
    pub(crate) driver: Driver,
    pub(crate) memory: Arc<MemoryManager>,
    epoch_ns: u64,
    engines: Mutex<Vec<Weak<EngineShared>>>,
}

/// Owner of memory and the factory for pools, lists, queues, and modules.
///
/// Cloning is cheap and yields another handle to the same context.
#[derive(Clone)]
pub struct Context {
    pub(crate) shared: Arc<ContextShared>,
}

impl Context {
    pub fn new(driver: &Driver) -> Self {
        let shared = Arc::new(ContextShared {
            id: next_object_id(),
            driver: driver.clone(),
            memory: Arc::new(MemoryManager::new(driver.clone())),
            epoch_ns: driver.shared.now_ns(),
            engines: Mutex::new(Vec::new()),
        });
        debug!(context = shared.id, driver = driver.id(), "created context");
        Self { shared }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn driver(&self) -> &Driver {
        &self.shared.driver
    }

    pub fn alloc_host(&self, size: u64, alignment: u64) -> Result<DevicePtr> {
        self.shared
            .memory
            .allocate(MemoryKind::Host, None, size, alignment)
    }

    pub fn alloc_device(&self, device: &Device, size: u64, alignment: u64) -> Result<DevicePtr> {
        self.shared.driver.owns(device)?;
        self.shared
            .memory
            .allocate(MemoryKind::Device, Some(device.id()), size, alignment)
    }

    pub fn alloc_shared(&self, device: &Device, size: u64, alignment: u64) -> Result<DevicePtr> {
        self.shared.driver.owns(device)?;
        self.shared
            .memory
            .allocate(MemoryKind::Shared, Some(device.id()), size, alignment)
    }

    pub fn free(&self, ptr: DevicePtr) -> Result<()> {
        self.shared.memory.free(ptr)
    }

    /// Host read of `len` bytes at `ptr`.
    pub fn read(&self, ptr: DevicePtr, len: u64) -> Result<Vec<u8>> {
        self.shared.memory.read(ptr, len)
    }

    pub fn write(&self, ptr: DevicePtr, bytes: &[u8]) -> Result<()> {
        self.shared.memory.write(ptr, bytes)
    }

    pub fn allocation_properties(&self, ptr: DevicePtr) -> Result<AllocationProperties> {
        self.shared.memory.properties(ptr)
    }

    pub fn get_ipc_mem_handle(&self, ptr: DevicePtr) -> Result<IpcMemHandle> {
        self.shared.memory.export(ptr)
    }

    /// Maps memory exported by another driver instance into this context.
    pub fn open_ipc_mem_handle(&self, handle: &IpcMemHandle) -> Result<DevicePtr> {
        self.shared.memory.import(handle)
    }

    pub fn close_ipc_mem_handle(&self, ptr: DevicePtr) -> Result<()> {
        self.shared.memory.close_import(ptr)
    }

    pub fn create_event_pool(&self, desc: EventPoolDesc, devices: &[Device]) -> Result<EventPool> {
        let mut ids: Vec<DeviceId> = Vec::with_capacity(devices.len());
        for device in devices {
            self.shared.driver.owns(device)?;
            if !ids.contains(&device.id()) {
                ids.push(device.id());
            }
        }
        EventPool::create(self.shared.driver.shared.clone(), desc, ids)
    }

    /// The imported pool is usable on every device of this driver.
    pub fn open_ipc_event_pool(&self, handle: &IpcEventPoolHandle) -> Result<EventPool> {
        let devices = self
            .shared
            .driver
            .devices()
            .iter()
            .map(Device::id)
            .collect();
        EventPool::open_ipc(self.shared.driver.shared.clone(), handle, devices)
    }

    pub fn create_module(&self, device: &Device, desc: ModuleDesc) -> Result<Module> {
        self.shared.driver.owns(device)?;
        Module::new(device.id(), desc)
    }

    pub fn create_command_list(
        &self,
        device: &Device,
        desc: CommandListDesc,
    ) -> Result<CommandList> {
        self.shared.driver.owns(device)?;
        CommandList::new(self.shared.clone(), device.clone(), desc)
    }

    pub fn create_command_queue(
        &self,
        device: &Device,
        desc: CommandQueueDesc,
    ) -> Result<CommandQueue> {
        self.shared.driver.owns(device)?;
        CommandQueue::new(self, device.clone(), desc)
    }

    pub fn create_immediate_command_list(
        &self,
        device: &Device,
        desc: CommandQueueDesc,
    ) -> Result<ImmediateCommandList> {
        self.shared.driver.owns(device)?;
        ImmediateCommandList::new(self, device.clone(), desc)
    }

    /// Blocks until every queue and immediate list of this context on
    /// `device` (or its subdevices) is idle.
    pub fn system_barrier(&self, device: &Device) -> Result<()> {
        self.shared.driver.owns(device)?;
        let engines: Vec<Arc<EngineShared>> = {
            let mut engines = self
                .shared
                .engines
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            engines.retain(|e| e.strong_count() > 0);
            engines.iter().filter_map(Weak::upgrade).collect()
        };
        for engine in engines
            .iter()
            .filter(|e| device.id().covers(e.device))
        {
            engine.wait_idle(Timeout::INFINITE);
        }
        Ok(())
    }

    pub(crate) fn spawn_engine(&self, device: &Device, label: &str) -> Result<Engine> {
        let engine = Engine::spawn(
            self.shared.driver.shared.clone(),
            self.shared.memory.clone(),
            device.id(),
            self.shared.epoch_ns,
            label,
        )?;
        self.shared
            .engines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::downgrade(engine.shared()));
        Ok(engine)
    }

    pub(crate) fn same_as(&self, other: &Arc<ContextShared>) -> bool {
        Arc::ptr_eq(&self.shared, other)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.shared.id)
            .field("driver", &self.shared.driver.id())
            .field("allocations", &self.shared.memory.live_allocations())
            .finish()
    }
}
