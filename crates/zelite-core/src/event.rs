//! Events and event pools.
//!
//! Event state lives in a [`zelite_ipc::EventSlotPage`] owned by the pool.
//! Every handle to the same `(pool, index)` pair observes the same slot: other
//! devices sharing the pool, and other driver instances that imported it.
//!
//! Liveness is tracked per pool handle with a tag word per slot,
//! `(generation << 1) | live`. An [`Event`] remembers the tag it was created
//! with, so a destroyed or recreated slot is detected without locking.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bitflags::bitflags;
use tracing::{debug, trace};
use zelite_ipc::{EventSlotPage, IpcEventPoolHandle, SlotTimestamps};

use crate::driver::{next_object_id, DeviceId, DriverShared};
use crate::error::{Error, Result};
use crate::wait::{SyncStatus, Timeout};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EventPoolFlags: u32 {
        /// Events may be queried and synchronized from the host.
        const HOST_VISIBLE = 1 << 0;
        /// The pool may be exported with [`EventPool::get_ipc_handle`].
        const IPC = 1 << 1;
        /// Device signals record kernel start/end timestamps.
        const KERNEL_TIMESTAMP = 1 << 2;
    }
}

bitflags! {
    /// Cache coherency scope of a signal or wait.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EventScope: u32 {
        const SUBDEVICE = 1 << 0;
        const DEVICE = 1 << 1;
        const HOST = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventPoolDesc {
    pub flags: EventPoolFlags,
    pub capacity: u32,
}

impl EventPoolDesc {
    pub fn new(capacity: u32) -> Self {
        Self {
            flags: EventPoolFlags::HOST_VISIBLE,
            capacity,
        }
    }

    pub fn with_flags(mut self, flags: EventPoolFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventDesc {
    pub index: u32,
    pub signal: EventScope,
    pub wait: EventScope,
}

impl EventDesc {
    /// Host-scoped signal and wait.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            signal: EventScope::HOST,
            wait: EventScope::HOST,
        }
    }

    pub fn with_scopes(mut self, signal: EventScope, wait: EventScope) -> Self {
        self.signal = signal;
        self.wait = wait;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimestampPair {
    pub start: u64,
    pub end: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KernelTimestampResult {
    pub global: TimestampPair,
    pub context: TimestampPair,
}

const TAG_LIVE: u32 = 1;

fn tag_generation(tag: u32) -> u32 {
    tag >> 1
}

struct PoolTable {
    destroyed: bool,
    live: u32,
    export: Option<IpcEventPoolHandle>,
}

pub(crate) struct PoolShared {
    id: u64,
    pub(crate) driver: Arc<DriverShared>,
    devices: Vec<DeviceId>,
    flags: EventPoolFlags,
    page: Arc<EventSlotPage>,
    imported_token: Option<u64>,
    tags: Box<[AtomicU32]>,
    table: Mutex<PoolTable>,
}

impl PoolShared {
    fn lock_table(&self) -> MutexGuard<'_, PoolTable> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn accepts(&self, device: DeviceId) -> bool {
        self.devices.iter().any(|d| d.covers(device))
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.page.capacity()
    }
}

pub struct EventPool {
    shared: Arc<PoolShared>,
}

impl EventPool {
    pub(crate) fn create(
        driver: Arc<DriverShared>,
        desc: EventPoolDesc,
        devices: Vec<DeviceId>,
    ) -> Result<Self> {
        if desc.capacity == 0 {
            return Err(Error::invalid_argument("event pool capacity must be non-zero"));
        }
        if devices.is_empty() {
            return Err(Error::invalid_argument("event pool device set is empty"));
        }
        let page = Arc::new(EventSlotPage::new(desc.capacity));
        let pool = Self::from_page(driver, desc.flags, devices, page, None);
        debug!(
            pool = pool.shared.id,
            capacity = desc.capacity,
            flags = ?desc.flags,
            "created event pool"
        );
        Ok(pool)
    }

    pub(crate) fn open_ipc(
        driver: Arc<DriverShared>,
        handle: &IpcEventPoolHandle,
        devices: Vec<DeviceId>,
    ) -> Result<Self> {
        let page = driver.transport.import_event_pool(handle)?;
        let fields = handle.fields();
        let flags = EventPoolFlags::from_bits_truncate(fields.flags);
        let pool = Self::from_page(driver, flags, devices, page, Some(fields.token));
        debug!(
            pool = pool.shared.id,
            token = fields.token,
            "opened IPC event pool"
        );
        Ok(pool)
    }

    fn from_page(
        driver: Arc<DriverShared>,
        flags: EventPoolFlags,
        devices: Vec<DeviceId>,
        page: Arc<EventSlotPage>,
        imported_token: Option<u64>,
    ) -> Self {
        let tags = (0..page.capacity()).map(|_| AtomicU32::new(0)).collect();
        Self {
            shared: Arc::new(PoolShared {
                id: next_object_id(),
                driver,
                devices,
                flags,
                page,
                imported_token,
                tags,
                table: Mutex::new(PoolTable {
                    destroyed: false,
                    live: 0,
                    export: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn capacity(&self) -> u32 {
        self.shared.capacity()
    }

    pub fn flags(&self) -> EventPoolFlags {
        self.shared.flags
    }

    pub fn is_imported(&self) -> bool {
        self.shared.imported_token.is_some()
    }

    /// Number of events created from this handle and not yet destroyed.
    pub fn live_events(&self) -> u32 {
        self.shared.lock_table().live
    }

    pub fn create_event(&self, desc: EventDesc) -> Result<Event> {
        let shared = &self.shared;
        let mut table = shared.lock_table();
        if table.destroyed {
            return Err(Error::InvalidHandle("event pool has been destroyed"));
        }
        let capacity = shared.capacity();
        if desc.index >= capacity {
            return Err(Error::OutOfBounds {
                index: desc.index,
                capacity,
            });
        }

        let slot = &shared.tags[desc.index as usize];
        let current = slot.load(Ordering::Acquire);
        if current & TAG_LIVE != 0 {
            return Err(Error::InvalidState("event index is already in use"));
        }
        let tag = (tag_generation(current) << 1) | TAG_LIVE;
        // Importers observe whatever the exporter left in the slot.
        if shared.imported_token.is_none() {
            shared.page.reset(desc.index);
        }
        slot.store(tag, Ordering::Release);
        table.live += 1;

        trace!(pool = shared.id, index = desc.index, "created event");
        Ok(Event {
            pool: self.shared.clone(),
            index: desc.index,
            tag,
            signal_scope: desc.signal,
            wait_scope: desc.wait,
        })
    }

    /// Exports the pool. Repeated calls return the same handle.
    pub fn get_ipc_handle(&self) -> Result<IpcEventPoolHandle> {
        let shared = &self.shared;
        if !shared.flags.contains(EventPoolFlags::IPC) {
            return Err(Error::UnsupportedFeature(
                "event pool was not created with the IPC flag",
            ));
        }
        if shared.imported_token.is_some() {
            return Err(Error::InvalidState("imported event pools cannot be re-exported"));
        }
        let mut table = shared.lock_table();
        if table.destroyed {
            return Err(Error::InvalidHandle("event pool has been destroyed"));
        }
        if let Some(handle) = table.export {
            return Ok(handle);
        }
        let handle = shared
            .driver
            .transport
            .export_event_pool(shared.page.clone(), shared.flags.bits());
        table.export = Some(handle);
        Ok(handle)
    }

    fn teardown(&self) -> Result<()> {
        let mut table = self.shared.lock_table();
        if table.destroyed {
            return Err(Error::InvalidHandle("event pool has been destroyed"));
        }
        if table.live > 0 {
            return Err(Error::InvalidState("event pool still has live events"));
        }
        table.destroyed = true;
        if let Some(handle) = table.export.take() {
            self.shared.driver.transport.revoke(handle.token());
        }
        Ok(())
    }

    /// Fails with `InvalidState` while events created from this pool are live.
    pub fn destroy(&self) -> Result<()> {
        if self.is_imported() {
            return Err(Error::InvalidState(
                "imported event pools are released with close_ipc_handle",
            ));
        }
        self.teardown()?;
        debug!(pool = self.shared.id, "destroyed event pool");
        Ok(())
    }

    /// Releases a pool opened from an IPC handle.
    pub fn close_ipc_handle(&self) -> Result<()> {
        if !self.is_imported() {
            return Err(Error::InvalidState("event pool was not opened from an IPC handle"));
        }
        self.teardown()?;
        debug!(pool = self.shared.id, "closed IPC event pool");
        Ok(())
    }
}

impl fmt::Debug for EventPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPool")
            .field("id", &self.shared.id)
            .field("capacity", &self.capacity())
            .field("flags", &self.shared.flags)
            .field("imported", &self.is_imported())
            .finish()
    }
}

/// Handle to one slot of an [`EventPool`]. Clones refer to the same event;
/// destroying through any clone invalidates all of them.
#[derive(Clone)]
pub struct Event {
    pool: Arc<PoolShared>,
    index: u32,
    tag: u32,
    signal_scope: EventScope,
    wait_scope: EventScope,
}

impl Event {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn pool_id(&self) -> u64 {
        self.pool.id
    }

    pub fn signal_scope(&self) -> EventScope {
        self.signal_scope
    }

    pub fn wait_scope(&self) -> EventScope {
        self.wait_scope
    }

    pub fn is_live(&self) -> bool {
        self.pool.tags[self.index as usize].load(Ordering::Acquire) == self.tag
    }

    fn check_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(Error::InvalidHandle("event has been destroyed"))
        }
    }

    pub(crate) fn pool(&self) -> &PoolShared {
        &self.pool
    }

    /// Sets the event to signaled. Signaling a signaled event is a no-op.
    pub fn host_signal(&self) -> Result<()> {
        self.check_live()?;
        self.pool.page.signal(self.index);
        self.pool.driver.stats.inc_host_signals();
        Ok(())
    }

    pub fn host_reset(&self) -> Result<()> {
        self.check_live()?;
        self.pool.page.reset(self.index);
        Ok(())
    }

    /// Never blocks.
    pub fn query_status(&self) -> Result<SyncStatus> {
        self.check_live()?;
        Ok(self.pool.page.is_signaled(self.index).into())
    }

    pub fn host_synchronize(&self, timeout: Timeout) -> Result<SyncStatus> {
        self.check_live()?;
        self.pool.driver.stats.inc_host_waits();
        let signaled = self
            .pool
            .page
            .wait_signaled(self.index, timeout.as_duration());
        Ok(signaled.into())
    }

    /// Returns `None` until the event has been signaled.
    pub fn query_kernel_timestamp(&self) -> Result<Option<KernelTimestampResult>> {
        self.check_live()?;
        if !self.pool.flags.contains(EventPoolFlags::KERNEL_TIMESTAMP) {
            return Err(Error::UnsupportedFeature(
                "event pool was not created with the KERNEL_TIMESTAMP flag",
            ));
        }
        if !self.pool.page.is_signaled(self.index) {
            return Ok(None);
        }
        Ok(self.pool.page.timestamps(self.index).map(|ts| KernelTimestampResult {
            global: TimestampPair {
                start: ts.global_start,
                end: ts.global_end,
            },
            context: TimestampPair {
                start: ts.context_start,
                end: ts.context_end,
            },
        }))
    }

    /// Frees the index for reuse. Every clone of this handle becomes invalid.
    pub fn destroy(&self) -> Result<()> {
        let mut table = self.pool.lock_table();
        let slot = &self.pool.tags[self.index as usize];
        if slot.load(Ordering::Acquire) != self.tag {
            return Err(Error::InvalidHandle("event has been destroyed"));
        }
        let next_generation = tag_generation(self.tag).wrapping_add(1) & (u32::MAX >> 1);
        slot.store(next_generation << 1, Ordering::Release);
        table.live -= 1;
        trace!(pool = self.pool.id, index = self.index, "destroyed event");
        Ok(())
    }

    /// Signal issued by device work. Timestamps are recorded first so a
    /// host that observes the signal also observes them.
    pub(crate) fn device_signal(&self, ts: Option<SlotTimestamps>) {
        if let Some(ts) = ts {
            if self.pool.flags.contains(EventPoolFlags::KERNEL_TIMESTAMP) {
                self.pool.page.record_timestamps(self.index, ts);
            }
        }
        self.pool.page.signal(self.index);
        self.pool.driver.stats.inc_device_signals();
    }

    pub(crate) fn device_reset(&self) {
        self.pool.page.reset(self.index);
    }

    /// Blocks until signaled or the slice elapses; the caller loops.
    pub(crate) fn wait_slice(&self, slice: std::time::Duration) -> bool {
        self.pool.page.wait_signaled(self.index, Some(slice))
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("pool", &self.pool.id)
            .field("index", &self.index)
            .field("live", &self.is_live())
            .finish()
    }
}
