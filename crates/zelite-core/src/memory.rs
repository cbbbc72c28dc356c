//! Context-local memory: a virtual address space handing out [`DevicePtr`]s
//! backed by host byte buffers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, trace};
use zelite_ipc::IpcMemHandle;

use crate::driver::{DeviceId, Driver};
use crate::error::{Error, Result};

/// Address of a byte inside a context's address space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevicePtr(u64);

impl DevicePtr {
    pub const NULL: Self = Self(0);

    pub const fn from_addr(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl fmt::Debug for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePtr({:#x})", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Host,
    Device,
    Shared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationProperties {
    pub kind: MemoryKind,
    pub base: DevicePtr,
    pub size: u64,
    /// `None` for host memory and for imported allocations.
    pub device: Option<DeviceId>,
    pub imported: bool,
}

/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be a power of two.
pub(crate) fn align_up(value: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment.is_power_of_two());
    value
        .checked_add(alignment - 1)
        .map(|v| v & !(alignment - 1))
}

/// Bump allocator over the address space. Addresses are never reused, so a
/// stale pointer faults instead of aliasing a newer allocation.
struct AddressSpace {
    cursor: u64,
    end: u64,
}

impl AddressSpace {
    const BASE: u64 = 0x0000_1000_0000_0000;
    // Unmapped gap after every allocation so overruns fault.
    const GUARD: u64 = 0x1000;

    fn new() -> Self {
        Self {
            cursor: Self::BASE,
            end: u64::MAX - Self::GUARD,
        }
    }

    fn alloc(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let start = align_up(self.cursor, alignment)?;
        let end = start.checked_add(size)?;
        if end > self.end {
            return None;
        }
        self.cursor = end + Self::GUARD;
        Some(start)
    }
}

/// Storage shared by every mapping of an allocation, including IPC imports.
pub(crate) struct Backing {
    bytes: Mutex<Vec<u8>>,
}

impl Backing {
    fn new(size: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0; size]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn len(&self) -> u64 {
        self.lock().len() as u64
    }
}

struct Allocation {
    kind: MemoryKind,
    size: u64,
    device: Option<DeviceId>,
    backing: Arc<Backing>,
    imported: bool,
    export_token: Option<u64>,
}

/// A resolved byte range inside one allocation.
struct Span {
    backing: Arc<Backing>,
    offset: usize,
    len: usize,
}

pub(crate) struct MemoryManager {
    driver: Driver,
    space: Mutex<AddressSpace>,
    allocations: RwLock<BTreeMap<u64, Allocation>>,
}

const IPC_FLAG_SHARED: u32 = 1;

impl MemoryManager {
    pub(crate) fn new(driver: Driver) -> Self {
        Self {
            driver,
            space: Mutex::new(AddressSpace::new()),
            allocations: RwLock::new(BTreeMap::new()),
        }
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<u64, Allocation>> {
        self.allocations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<u64, Allocation>> {
        self.allocations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn map(&self, size: u64, alignment: u64, alloc: Allocation) -> Result<DevicePtr> {
        let base = self
            .space
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .alloc(size, alignment)
            .ok_or(Error::OutOfDeviceMemory {
                requested: size,
                available: 0,
            })?;
        self.write_table().insert(base, alloc);
        Ok(DevicePtr(base))
    }

    pub(crate) fn allocate(
        &self,
        kind: MemoryKind,
        device: Option<DeviceId>,
        size: u64,
        alignment: u64,
    ) -> Result<DevicePtr> {
        if size == 0 {
            return Err(Error::invalid_argument("allocation size must be non-zero"));
        }
        let alignment = alignment.max(1);
        if !alignment.is_power_of_two() {
            return Err(Error::invalid_argument(format!(
                "alignment {alignment} is not a power of two"
            )));
        }
        let len = usize::try_from(size).map_err(|_| Error::OutOfDeviceMemory {
            requested: size,
            available: 0,
        })?;

        let budget = device.map(DeviceId::root);
        self.driver.shared.reserve_memory(budget, size)?;
        let alloc = Allocation {
            kind,
            size,
            device,
            backing: Arc::new(Backing::new(len)),
            imported: false,
            export_token: None,
        };
        let ptr = match self.map(size, alignment, alloc) {
            Ok(ptr) => ptr,
            Err(err) => {
                self.driver.shared.release_memory(budget, size);
                return Err(err);
            }
        };
        trace!(?ptr, size, ?kind, "allocated");
        Ok(ptr)
    }

    pub(crate) fn free(&self, ptr: DevicePtr) -> Result<()> {
        let alloc = {
            let mut table = self.write_table();
            match table.remove(&ptr.0) {
                None => {
                    return Err(Error::invalid_argument(format!(
                        "{ptr:?} is not the base of a live allocation"
                    )))
                }
                Some(alloc) if alloc.imported => {
                    table.insert(ptr.0, alloc);
                    return Err(Error::invalid_argument(
                        "imported allocations are released with close_ipc_mem_handle",
                    ));
                }
                Some(alloc) => alloc,
            }
        };

        if let Some(token) = alloc.export_token {
            self.driver.shared.transport.revoke(token);
        }
        self.driver
            .shared
            .release_memory(alloc.device.map(DeviceId::root), alloc.size);
        trace!(?ptr, "freed");
        Ok(())
    }

    pub(crate) fn properties(&self, ptr: DevicePtr) -> Result<AllocationProperties> {
        let table = self.read_table();
        let (&base, alloc) = table
            .range(..=ptr.0)
            .next_back()
            .filter(|(&base, alloc)| ptr.0 - base < alloc.size)
            .ok_or_else(|| Error::invalid_argument(format!("{ptr:?} is not mapped")))?;
        Ok(AllocationProperties {
            kind: alloc.kind,
            base: DevicePtr(base),
            size: alloc.size,
            device: alloc.device,
            imported: alloc.imported,
        })
    }

    fn span(&self, ptr: DevicePtr, len: u64) -> Result<Span> {
        let table = self.read_table();
        let unmapped = || Error::invalid_argument(format!("{ptr:?}+{len:#x} is not mapped"));
        let (&base, alloc) = table.range(..=ptr.0).next_back().ok_or_else(unmapped)?;
        let offset = ptr.0 - base;
        let end = offset.checked_add(len).ok_or_else(unmapped)?;
        if end > alloc.size {
            return Err(unmapped());
        }
        Ok(Span {
            backing: alloc.backing.clone(),
            offset: offset as usize,
            len: len as usize,
        })
    }

    /// Fails if any byte of `[ptr, ptr + len)` is unmapped.
    pub(crate) fn check_range(&self, ptr: DevicePtr, len: u64) -> Result<()> {
        self.span(ptr, len).map(|_| ())
    }

    pub(crate) fn read(&self, ptr: DevicePtr, len: u64) -> Result<Vec<u8>> {
        let span = self.span(ptr, len)?;
        let bytes = span.backing.lock();
        Ok(bytes[span.offset..span.offset + span.len].to_vec())
    }

    pub(crate) fn write(&self, ptr: DevicePtr, data: &[u8]) -> Result<()> {
        let span = self.span(ptr, data.len() as u64)?;
        let mut bytes = span.backing.lock();
        bytes[span.offset..span.offset + span.len].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn copy(&self, dst: DevicePtr, src: DevicePtr, size: u64) -> Result<()> {
        let s = self.span(src, size)?;
        let d = self.span(dst, size)?;
        if Arc::ptr_eq(&s.backing, &d.backing) {
            let mut bytes = s.backing.lock();
            bytes.copy_within(s.offset..s.offset + s.len, d.offset);
            return Ok(());
        }
        // Never hold two backing locks at once.
        let tmp = s.backing.lock()[s.offset..s.offset + s.len].to_vec();
        d.backing.lock()[d.offset..d.offset + d.len].copy_from_slice(&tmp);
        Ok(())
    }

    pub(crate) fn fill(&self, dst: DevicePtr, pattern: &[u8], size: u64) -> Result<()> {
        if pattern.is_empty() {
            return Err(Error::invalid_argument("fill pattern is empty"));
        }
        let d = self.span(dst, size)?;
        let mut bytes = d.backing.lock();
        for (i, b) in bytes[d.offset..d.offset + d.len].iter_mut().enumerate() {
            *b = pattern[i % pattern.len()];
        }
        Ok(())
    }

    pub(crate) fn export(&self, ptr: DevicePtr) -> Result<IpcMemHandle> {
        let mut table = self.write_table();
        let alloc = table.get_mut(&ptr.0).ok_or_else(|| {
            Error::invalid_argument(format!("{ptr:?} is not the base of a live allocation"))
        })?;
        if alloc.kind == MemoryKind::Host {
            return Err(Error::UnsupportedFeature(
                "host allocations cannot be exported",
            ));
        }
        if alloc.imported {
            return Err(Error::InvalidState("imported allocations cannot be re-exported"));
        }
        let transport = &self.driver.shared.transport;
        let flags = if alloc.kind == MemoryKind::Shared {
            IPC_FLAG_SHARED
        } else {
            0
        };
        let handle = transport.export_memory(alloc.backing.clone(), alloc.size, flags);
        if let Some(previous) = alloc.export_token.replace(handle.token()) {
            transport.revoke(previous);
        }
        Ok(handle)
    }

    pub(crate) fn import(&self, handle: &IpcMemHandle) -> Result<DevicePtr> {
        let backing: Arc<Backing> = self.driver.shared.transport.import_memory(handle)?;
        let fields = handle.fields();
        let size = backing.len();
        let kind = if fields.flags & IPC_FLAG_SHARED != 0 {
            MemoryKind::Shared
        } else {
            MemoryKind::Device
        };
        let ptr = self.map(
            size,
            1,
            Allocation {
                kind,
                size,
                device: None,
                backing,
                imported: true,
                export_token: None,
            },
        )?;
        debug!(?ptr, size, token = fields.token, "opened IPC memory handle");
        Ok(ptr)
    }

    pub(crate) fn close_import(&self, ptr: DevicePtr) -> Result<()> {
        let mut table = self.write_table();
        match table.get(&ptr.0) {
            Some(alloc) if alloc.imported => {
                table.remove(&ptr.0);
                Ok(())
            }
            _ => Err(Error::invalid_argument(format!(
                "{ptr:?} is not an imported allocation"
            ))),
        }
    }

    pub(crate) fn live_allocations(&self) -> usize {
        self.read_table().len()
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        let table = std::mem::take(
            self.allocations
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for alloc in table.into_values().filter(|a| !a.imported) {
            if let Some(token) = alloc.export_token {
                self.driver.shared.transport.revoke(token);
            }
            self.driver
                .shared
                .release_memory(alloc.device.map(DeviceId::root), alloc.size);
        }
    }
}
