//! Driver instance and simulated device enumeration.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bitflags::bitflags;
use tracing::debug;
use zelite_ipc::IpcTransport;

use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::stats::RuntimeStats;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity for runtime objects (drivers, pools, queues, lists).
pub(crate) fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) struct DriverShared {
    pub(crate) id: u64,
    pub(crate) config: DriverConfig,
    pub(crate) transport: Arc<IpcTransport>,
    pub(crate) stats: RuntimeStats,
    epoch: Instant,
    // Indexed by root device ordinal; the last entry is host memory.
    memory_used: Box<[AtomicU64]>,
}

impl DriverShared {
    /// Device clock in nanoseconds, quantized to the timer resolution and
    /// never zero.
    pub(crate) fn now_ns(&self) -> u64 {
        let res = self.config.timer_resolution_ns.max(1);
        let elapsed = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        (elapsed / res * res).max(res)
    }

    fn budget_slot(&self, device: Option<DeviceId>) -> (&AtomicU64, u64) {
        match device {
            Some(id) => (
                &self.memory_used[id.ordinal as usize],
                self.config.device_memory_bytes,
            ),
            None => (
                &self.memory_used[self.memory_used.len() - 1],
                self.config.host_memory_bytes,
            ),
        }
    }

    /// Charges `bytes` against a device budget, or host memory for `None`.
    pub(crate) fn reserve_memory(&self, device: Option<DeviceId>, bytes: u64) -> Result<()> {
        let (used, limit) = self.budget_slot(device);
        let mut cur = used.load(Ordering::Relaxed);
        loop {
            let available = limit.saturating_sub(cur);
            if bytes > available {
                return Err(Error::OutOfDeviceMemory {
                    requested: bytes,
                    available,
                });
            }
            match used.compare_exchange_weak(cur, cur + bytes, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Ok(()),
                Err(actual) => cur = actual,
            }
        }
    }

    pub(crate) fn release_memory(&self, device: Option<DeviceId>, bytes: u64) {
        let (used, _) = self.budget_slot(device);
        let _ = used.fetch_update(Ordering::AcqRel, Ordering::Relaxed, |cur| {
            Some(cur.saturating_sub(bytes))
        });
    }

    pub(crate) fn memory_in_use(&self, device: Option<DeviceId>) -> u64 {
        self.budget_slot(device).0.load(Ordering::Relaxed)
    }
}

/// Entry point of the runtime. Each instance stands for one process's view of
/// the driver; instances sharing an [`IpcTransport`] can exchange IPC handles.
#[derive(Clone)]
pub struct Driver {
    pub(crate) shared: Arc<DriverShared>,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(IpcTransport::new()))
    }

    pub fn with_transport(config: DriverConfig, transport: Arc<IpcTransport>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::invalid_argument(e.to_string()))?;
        let memory_used = (0..=config.device_count)
            .map(|_| AtomicU64::new(0))
            .collect();
        let shared = Arc::new(DriverShared {
            id: next_object_id(),
            config,
            transport,
            stats: RuntimeStats::new(),
            epoch: Instant::now(),
            memory_used,
        });
        debug!(
            driver = shared.id,
            devices = shared.config.device_count,
            "driver initialized"
        );
        Ok(Self { shared })
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    pub fn transport(&self) -> &Arc<IpcTransport> {
        &self.shared.transport
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.shared.stats
    }

    /// Root devices in ordinal order.
    pub fn devices(&self) -> Vec<Device> {
        (0..self.shared.config.device_count)
            .map(|ordinal| Device {
                driver: self.clone(),
                id: DeviceId {
                    ordinal,
                    subdevice: None,
                },
            })
            .collect()
    }

    pub(crate) fn owns(&self, device: &Device) -> Result<()> {
        if device.driver.shared.id != self.shared.id {
            return Err(Error::InvalidHandle("device belongs to another driver"));
        }
        Ok(())
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("id", &self.shared.id)
            .field("devices", &self.shared.config.device_count)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    pub ordinal: u32,
    pub subdevice: Option<u32>,
}

impl DeviceId {
    pub fn root(self) -> Self {
        Self {
            ordinal: self.ordinal,
            subdevice: None,
        }
    }

    /// Whether work targeting `other` may use resources bound to `self`.
    pub(crate) fn covers(self, other: DeviceId) -> bool {
        self == other || (self.subdevice.is_none() && self.ordinal == other.ordinal)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subdevice {
            Some(sub) => write!(f, "device {}.{}", self.ordinal, sub),
            None => write!(f, "device {}", self.ordinal),
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct QueueGroupFlags: u32 {
        const COMPUTE = 1 << 0;
        const COPY = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueGroupProperties {
    pub ordinal: u32,
    pub flags: QueueGroupFlags,
    pub num_queues: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceProperties {
    pub name: String,
    pub id: DeviceId,
    pub uuid: [u8; 16],
    pub timer_resolution_ns: u64,
    pub memory_bytes: u64,
    pub subdevice_count: u32,
}

#[derive(Clone)]
pub struct Device {
    pub(crate) driver: Driver,
    pub(crate) id: DeviceId,
}

impl Device {
    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub fn is_subdevice(&self) -> bool {
        self.id.subdevice.is_some()
    }

    pub fn properties(&self) -> DeviceProperties {
        let config = &self.driver.shared.config;
        let subdevice_count = if self.is_subdevice() {
            0
        } else {
            config.subdevices_per_device
        };
        let memory_bytes = match self.id.subdevice {
            Some(_) => config.device_memory_bytes / u64::from(config.subdevices_per_device.max(1)),
            None => config.device_memory_bytes,
        };

        let mut uuid = [0u8; 16];
        uuid[..8].copy_from_slice(&self.driver.shared.id.to_le_bytes());
        uuid[8..12].copy_from_slice(&self.id.ordinal.to_le_bytes());
        uuid[12..].copy_from_slice(&self.id.subdevice.unwrap_or(u32::MAX).to_le_bytes());

        DeviceProperties {
            name: config.device_name.clone(),
            id: self.id,
            uuid,
            timer_resolution_ns: config.timer_resolution_ns,
            memory_bytes,
            subdevice_count,
        }
    }

    pub fn subdevices(&self) -> Vec<Device> {
        if self.is_subdevice() {
            return Vec::new();
        }
        (0..self.driver.shared.config.subdevices_per_device)
            .map(|sub| Device {
                driver: self.driver.clone(),
                id: DeviceId {
                    ordinal: self.id.ordinal,
                    subdevice: Some(sub),
                },
            })
            .collect()
    }

    /// Ordinal 0 is the compute engine group; ordinal 1, when configured,
    /// is copy-only.
    pub fn command_queue_group_properties(&self) -> Vec<QueueGroupProperties> {
        let config = &self.driver.shared.config;
        let mut groups = vec![QueueGroupProperties {
            ordinal: 0,
            flags: QueueGroupFlags::COMPUTE | QueueGroupFlags::COPY,
            num_queues: config.compute_queues,
        }];
        if config.copy_queues > 0 {
            groups.push(QueueGroupProperties {
                ordinal: 1,
                flags: QueueGroupFlags::COPY,
                num_queues: config.copy_queues,
            });
        }
        groups
    }

    pub(crate) fn queue_group(&self, ordinal: u32) -> Result<QueueGroupProperties> {
        self.command_queue_group_properties()
            .into_iter()
            .find(|g| g.ordinal == ordinal)
            .ok_or_else(|| {
                Error::invalid_argument(format!("no queue group with ordinal {ordinal}"))
            })
    }

    /// Returns `(host, device)` timestamps in nanoseconds.
    pub fn global_timestamps(&self) -> (u64, u64) {
        let host = self.driver.shared.now_ns();
        let device = self.driver.shared.now_ns();
        (host, device)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.driver.shared.id == other.driver.shared.id && self.id == other.id
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("driver", &self.driver.shared.id)
            .field("id", &self.id)
            .finish()
    }
}
