//! Modules and kernels.
//!
//! There is no compiler behind this: a module is a table of host closures,
//! and a launch runs the closure once on the queue's worker thread with the
//! bound arguments and the dispatch dimensions.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::driver::{next_object_id, DeviceId};
use crate::error::{Error, Result};
use crate::memory::{DevicePtr, MemoryManager};

/// Body of a kernel. Returning `Err` faults the launch.
pub type KernelBody =
    dyn Fn(&mut KernelLaunch<'_>) -> std::result::Result<(), String> + Send + Sync;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupCount {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GroupCount {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// `None` if the product does not fit in a `u64`.
    pub fn total(&self) -> Option<u64> {
        u64::from(self.x)
            .checked_mul(u64::from(self.y))?
            .checked_mul(u64::from(self.z))
    }

    pub(crate) fn validate(&self, what: &str) -> Result<()> {
        if self.x == 0 || self.y == 0 || self.z == 0 {
            return Err(Error::invalid_argument(format!(
                "{what} dimensions must be non-zero, got {}x{}x{}",
                self.x, self.y, self.z
            )));
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum KernelArg {
    Pointer(DevicePtr),
    Value(Vec<u8>),
}

impl fmt::Debug for KernelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pointer(ptr) => write!(f, "Pointer({ptr:?})"),
            Self::Value(bytes) => write!(f, "Value({} bytes)", bytes.len()),
        }
    }
}

impl From<DevicePtr> for KernelArg {
    fn from(ptr: DevicePtr) -> Self {
        Self::Pointer(ptr)
    }
}

impl From<u32> for KernelArg {
    fn from(v: u32) -> Self {
        Self::Value(v.to_le_bytes().to_vec())
    }
}

impl From<u64> for KernelArg {
    fn from(v: u64) -> Self {
        Self::Value(v.to_le_bytes().to_vec())
    }
}

pub(crate) struct KernelDef {
    name: String,
    num_args: u32,
    body: Box<KernelBody>,
}

/// Kernels to register when creating a [`Module`].
#[derive(Default)]
pub struct ModuleDesc {
    kernels: Vec<KernelDef>,
}

impl ModuleDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kernel<F>(mut self, name: impl Into<String>, num_args: u32, body: F) -> Self
    where
        F: Fn(&mut KernelLaunch<'_>) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.kernels.push(KernelDef {
            name: name.into(),
            num_args,
            body: Box::new(body),
        });
        self
    }
}

struct ModuleShared {
    id: u64,
    device: DeviceId,
    kernels: BTreeMap<String, Arc<KernelDef>>,
}

#[derive(Clone)]
pub struct Module {
    shared: Arc<ModuleShared>,
}

impl Module {
    pub(crate) fn new(device: DeviceId, desc: ModuleDesc) -> Result<Self> {
        if desc.kernels.is_empty() {
            return Err(Error::invalid_argument("module has no kernels"));
        }
        let mut kernels = BTreeMap::new();
        for def in desc.kernels {
            let name = def.name.clone();
            if kernels.insert(name.clone(), Arc::new(def)).is_some() {
                return Err(Error::invalid_argument(format!(
                    "kernel `{name}` is defined twice"
                )));
            }
        }
        Ok(Self {
            shared: Arc::new(ModuleShared {
                id: next_object_id(),
                device,
                kernels,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn kernel_names(&self) -> Vec<&str> {
        self.shared.kernels.keys().map(String::as_str).collect()
    }

    pub fn create_kernel(&self, name: &str) -> Result<Kernel> {
        let def = self
            .shared
            .kernels
            .get(name)
            .ok_or_else(|| Error::invalid_argument(format!("no kernel named `{name}`")))?;
        Ok(Kernel {
            def: def.clone(),
            device: self.shared.device,
            group_size: GroupCount::new(1, 1, 1),
            args: vec![None; def.num_args as usize],
        })
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.shared.id)
            .field("kernels", &self.kernel_names())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelProperties {
    pub name: String,
    pub num_args: u32,
    pub group_size: GroupCount,
}

pub struct Kernel {
    def: Arc<KernelDef>,
    device: DeviceId,
    group_size: GroupCount,
    args: Vec<Option<KernelArg>>,
}

impl Kernel {
    pub fn set_group_size(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        let size = GroupCount::new(x, y, z);
        size.validate("group size")?;
        self.group_size = size;
        Ok(())
    }

    pub fn set_argument(&mut self, index: u32, arg: impl Into<KernelArg>) -> Result<()> {
        let slot = self.args.get_mut(index as usize).ok_or_else(|| {
            Error::invalid_argument(format!(
                "kernel `{}` has {} arguments, index {index} is invalid",
                self.def.name, self.def.num_args
            ))
        })?;
        *slot = Some(arg.into());
        Ok(())
    }

    pub fn properties(&self) -> KernelProperties {
        KernelProperties {
            name: self.def.name.clone(),
            num_args: self.def.num_args,
            group_size: self.group_size,
        }
    }

    pub(crate) fn device(&self) -> DeviceId {
        self.device
    }

    /// Freezes the current arguments into a dispatch record; later
    /// `set_argument` calls do not affect it.
    pub(crate) fn dispatch(&self, groups: GroupCount) -> Result<KernelDispatch> {
        groups.validate("group count")?;
        let args = self
            .args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                arg.clone().ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "argument {i} of kernel `{}` is not set",
                        self.def.name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(KernelDispatch {
            def: self.def.clone(),
            groups,
            group_size: self.group_size,
            args,
        })
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.def.name)
            .field("group_size", &self.group_size)
            .finish()
    }
}

/// A recorded kernel launch.
#[derive(Clone)]
pub struct KernelDispatch {
    def: Arc<KernelDef>,
    groups: GroupCount,
    group_size: GroupCount,
    args: Vec<KernelArg>,
}

impl KernelDispatch {
    pub fn kernel_name(&self) -> &str {
        &self.def.name
    }

    pub fn groups(&self) -> GroupCount {
        self.groups
    }

    /// Runs the body. A panicking body faults the launch like an `Err` does.
    pub(crate) fn run(&self, memory: &MemoryManager) -> std::result::Result<(), String> {
        let mut launch = KernelLaunch {
            memory,
            groups: self.groups,
            group_size: self.group_size,
            args: &self.args,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| (self.def.body)(&mut launch))) {
            Ok(result) => result,
            Err(payload) => Err(format!("kernel panicked: {}", panic_message(&*payload))),
        }
    }
}

impl fmt::Debug for KernelDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelDispatch")
            .field("kernel", &self.def.name)
            .field("groups", &self.groups)
            .field("args", &self.args)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

/// What a kernel body sees while it runs.
pub struct KernelLaunch<'a> {
    memory: &'a MemoryManager,
    groups: GroupCount,
    group_size: GroupCount,
    args: &'a [KernelArg],
}

impl KernelLaunch<'_> {
    pub fn groups(&self) -> GroupCount {
        self.groups
    }

    pub fn group_size(&self) -> GroupCount {
        self.group_size
    }

    /// Total number of work items. Fails when the count overflows a `u64`.
    pub fn global_size(&self) -> std::result::Result<u64, String> {
        self.groups
            .total()
            .and_then(|groups| groups.checked_mul(self.group_size.total()?))
            .ok_or_else(|| {
                format!(
                    "global size of {:?} groups of {:?} overflows",
                    self.groups, self.group_size
                )
            })
    }

    pub fn arg(&self, index: usize) -> Option<&KernelArg> {
        self.args.get(index)
    }

    pub fn pointer_arg(&self, index: usize) -> std::result::Result<DevicePtr, String> {
        match self.args.get(index) {
            Some(KernelArg::Pointer(ptr)) => Ok(*ptr),
            _ => Err(format!("argument {index} is not a pointer")),
        }
    }

    pub fn u32_arg(&self, index: usize) -> std::result::Result<u32, String> {
        match self.args.get(index) {
            Some(KernelArg::Value(bytes)) if bytes.len() == 4 => {
                Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            _ => Err(format!("argument {index} is not a u32 value")),
        }
    }

    pub fn read(&self, ptr: DevicePtr, len: u64) -> std::result::Result<Vec<u8>, String> {
        self.memory.read(ptr, len).map_err(|e| e.to_string())
    }

    pub fn write(&self, ptr: DevicePtr, bytes: &[u8]) -> std::result::Result<(), String> {
        self.memory.write(ptr, bytes).map_err(|e| e.to_string())
    }
}
