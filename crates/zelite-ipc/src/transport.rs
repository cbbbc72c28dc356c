use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::error::IpcError;
use crate::handle::{HandleFields, IpcEventPoolHandle, IpcMemHandle};
use crate::layout::handle_kind;
use crate::slots::EventSlotPage;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

struct Export {
    kind: u32,
    object: Arc<dyn Any + Send + Sync>,
}

/// In-memory stand-in for the OS mechanism that moves shared objects between
/// processes.
///
/// Each driver instance stands for one process. Drivers that share an
/// `Arc<IpcTransport>` can exchange handles; a handle minted by a different
/// transport is rejected with [`IpcError::ForeignTransport`].
pub struct IpcTransport {
    id: u64,
    next_token: AtomicU64,
    exports: Mutex<HashMap<u64, Export>>,
}

impl IpcTransport {
    pub fn new() -> Self {
        let seq = NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id: (u64::from(std::process::id()) << 32) | (seq & 0xFFFF_FFFF),
            next_token: AtomicU64::new(1),
            exports: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Export>> {
        self.exports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, kind: u32, object: Arc<dyn Any + Send + Sync>) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(token, Export { kind, object });
        token
    }

    fn resolve(&self, fields: HandleFields) -> Result<Arc<dyn Any + Send + Sync>, IpcError> {
        if fields.transport_id != self.id {
            return Err(IpcError::ForeignTransport {
                expected: self.id,
                found: fields.transport_id,
            });
        }
        let exports = self.lock();
        let export = exports
            .get(&fields.token)
            .ok_or(IpcError::UnknownToken(fields.token))?;
        if export.kind != fields.kind {
            return Err(IpcError::WrongKind {
                expected: fields.kind,
                found: export.kind,
            });
        }
        Ok(export.object.clone())
    }

    pub fn export_event_pool(&self, page: Arc<EventSlotPage>, flags: u32) -> IpcEventPoolHandle {
        let extent = u64::from(page.capacity());
        let token = self.publish(handle_kind::EVENT_POOL, page);
        debug!(token, extent, "exported event pool");
        IpcEventPoolHandle::from_fields(HandleFields {
            kind: handle_kind::EVENT_POOL,
            flags,
            token,
            extent,
            transport_id: self.id,
        })
    }

    pub fn import_event_pool(
        &self,
        handle: &IpcEventPoolHandle,
    ) -> Result<Arc<EventSlotPage>, IpcError> {
        let fields = handle.fields();
        let object = self.resolve(fields)?;
        let page = object
            .downcast::<EventSlotPage>()
            .map_err(|_| IpcError::UnknownToken(fields.token))?;
        trace!(token = fields.token, "imported event pool");
        Ok(page)
    }

    /// Publishes an allocation's backing storage. `T` is whatever the memory
    /// manager uses to share bytes between mappings.
    pub fn export_memory<T: Any + Send + Sync>(
        &self,
        backing: Arc<T>,
        size: u64,
        flags: u32,
    ) -> IpcMemHandle {
        let token = self.publish(handle_kind::MEMORY, backing);
        debug!(token, size, "exported memory");
        IpcMemHandle::from_fields(HandleFields {
            kind: handle_kind::MEMORY,
            flags,
            token,
            extent: size,
            transport_id: self.id,
        })
    }

    pub fn import_memory<T: Any + Send + Sync>(
        &self,
        handle: &IpcMemHandle,
    ) -> Result<Arc<T>, IpcError> {
        let fields = handle.fields();
        let object = self.resolve(fields)?;
        object
            .downcast::<T>()
            .map_err(|_| IpcError::UnknownToken(fields.token))
    }

    /// Withdraws an export. Objects already imported stay alive.
    pub fn revoke(&self, token: u64) -> bool {
        let removed = self.lock().remove(&token).is_some();
        if removed {
            debug!(token, "revoked IPC export");
        }
        removed
    }

    pub fn live_exports(&self) -> usize {
        self.lock().len()
    }
}

impl Default for IpcTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcTransport")
            .field("id", &format_args!("{:#x}", self.id))
            .field("live_exports", &self.live_exports())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn imported_page_is_the_exported_page() {
        let transport = IpcTransport::new();
        let page = Arc::new(EventSlotPage::new(4));
        let handle = transport.export_event_pool(page.clone(), 0);
        let imported = transport.import_event_pool(&handle).unwrap();
        assert!(Arc::ptr_eq(&page, &imported));
        assert_eq!(handle.fields().extent, 4);
    }

    #[test]
    fn revoked_token_is_unknown() {
        let transport = IpcTransport::new();
        let handle = transport.export_event_pool(Arc::new(EventSlotPage::new(1)), 0);
        assert!(transport.revoke(handle.token()));
        assert!(!transport.revoke(handle.token()));
        assert_eq!(
            transport.import_event_pool(&handle).unwrap_err(),
            IpcError::UnknownToken(handle.token())
        );
        assert_eq!(transport.live_exports(), 0);
    }

    #[test]
    fn handles_from_another_transport_are_rejected() {
        let a = IpcTransport::new();
        let b = IpcTransport::new();
        let handle = a.export_event_pool(Arc::new(EventSlotPage::new(1)), 0);
        assert!(matches!(
            b.import_event_pool(&handle),
            Err(IpcError::ForeignTransport { .. })
        ));
    }

    #[test]
    fn memory_import_requires_matching_backing_type() {
        let transport = IpcTransport::new();
        let handle = transport.export_memory(Arc::new(Mutex::new(vec![1u8, 2, 3])), 3, 0);
        let backing = transport.import_memory::<Mutex<Vec<u8>>>(&handle).unwrap();
        assert_eq!(*backing.lock().unwrap(), vec![1, 2, 3]);
        assert!(transport.import_memory::<String>(&handle).is_err());
    }
}
