//! Recorded operations and the append surface shared by regular and
//! immediate command lists.

use std::fmt;

use crate::driver::DeviceId;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::kernel::{GroupCount, Kernel, KernelDispatch};
use crate::memory::DevicePtr;

/// Largest fill pattern accepted by [`CommandAppend::append_memory_fill`].
pub const MAX_FILL_PATTERN_BYTES: usize = 128;

/// One side of a 2-D strided copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyRegion {
    pub ptr: DevicePtr,
    /// Bytes between the starts of consecutive rows.
    pub pitch: u64,
    /// Byte offset into each row.
    pub origin_x: u64,
    /// First row.
    pub origin_y: u64,
}

impl CopyRegion {
    pub fn row(&self, row: u64) -> Option<DevicePtr> {
        let offset = self
            .origin_y
            .checked_add(row)?
            .checked_mul(self.pitch)?
            .checked_add(self.origin_x)?;
        Some(self.ptr.offset(offset))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemAdvice {
    SetReadMostly,
    ClearReadMostly,
    SetPreferredLocation,
    ClearPreferredLocation,
    BiasCached,
    BiasUncached,
}

#[derive(Clone)]
pub enum Operation {
    MemoryCopy {
        dst: DevicePtr,
        src: DevicePtr,
        size: u64,
    },
    MemoryCopyRegion {
        dst: CopyRegion,
        src: CopyRegion,
        width: u64,
        height: u64,
    },
    MemoryFill {
        dst: DevicePtr,
        pattern: Vec<u8>,
        size: u64,
    },
    Barrier,
    MemoryRangesBarrier {
        ranges: Vec<(DevicePtr, u64)>,
    },
    /// The event to signal is carried by the command.
    SignalEvent,
    /// The events to wait on are carried by the command.
    WaitEvents,
    EventReset {
        event: Event,
    },
    LaunchKernel(KernelDispatch),
    WriteGlobalTimestamp {
        dst: DevicePtr,
    },
    MemoryPrefetch {
        ptr: DevicePtr,
        size: u64,
    },
    MemAdvise {
        ptr: DevicePtr,
        size: u64,
        advice: MemAdvice,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MemoryCopy { .. } => "memory_copy",
            Self::MemoryCopyRegion { .. } => "memory_copy_region",
            Self::MemoryFill { .. } => "memory_fill",
            Self::Barrier => "barrier",
            Self::MemoryRangesBarrier { .. } => "memory_ranges_barrier",
            Self::SignalEvent => "signal_event",
            Self::WaitEvents => "wait_events",
            Self::EventReset { .. } => "event_reset",
            Self::LaunchKernel(_) => "launch_kernel",
            Self::WriteGlobalTimestamp { .. } => "write_global_timestamp",
            Self::MemoryPrefetch { .. } => "memory_prefetch",
            Self::MemAdvise { .. } => "mem_advise",
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemoryCopy { dst, src, size } => f
                .debug_struct("MemoryCopy")
                .field("dst", dst)
                .field("src", src)
                .field("size", size)
                .finish(),
            Self::MemoryFill { dst, pattern, size } => f
                .debug_struct("MemoryFill")
                .field("dst", dst)
                .field("pattern_len", &pattern.len())
                .field("size", size)
                .finish(),
            Self::LaunchKernel(dispatch) => f.debug_tuple("LaunchKernel").field(dispatch).finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// A recorded operation with its event dependencies.
#[derive(Clone, Debug)]
pub struct Command {
    pub(crate) op: Operation,
    pub(crate) signal: Option<Event>,
    pub(crate) waits: Vec<Event>,
}

impl Command {
    pub fn operation(&self) -> &Operation {
        &self.op
    }
}

/// Where appended commands will run.
#[derive(Clone, Copy, Debug)]
pub struct AppendTarget {
    pub(crate) driver_id: u64,
    pub(crate) device: DeviceId,
    pub(crate) copy_only: bool,
}

pub(crate) mod sealed {
    pub trait Recorder {
        fn append_target(&self) -> super::AppendTarget;
        fn record(&mut self, command: super::Command) -> crate::Result<()>;
    }
}

fn check_event(target: &AppendTarget, event: &Event) -> Result<()> {
    if !event.is_live() {
        return Err(Error::InvalidHandle("event has been destroyed"));
    }
    let pool = event.pool();
    if pool.driver.id != target.driver_id {
        return Err(Error::InvalidHandle("event belongs to another driver"));
    }
    if !pool.accepts(target.device) {
        return Err(Error::invalid_argument(format!(
            "event pool {} is not usable on {}",
            event.pool_id(),
            target.device
        )));
    }
    Ok(())
}

fn build(
    target: &AppendTarget,
    op: Operation,
    signal: Option<&Event>,
    waits: &[Event],
) -> Result<Command> {
    if let Some(event) = signal {
        check_event(target, event)?;
    }
    for event in waits {
        check_event(target, event)?;
    }
    Ok(Command {
        op,
        signal: signal.cloned(),
        waits: waits.to_vec(),
    })
}

/// Recording operations into a command list.
///
/// Every append takes an optional event signaled once the operation
/// completes, and a set of events that must be signaled before it starts.
/// Pointers are not checked when recording; an unmapped pointer faults the
/// list when it executes.
pub trait CommandAppend: sealed::Recorder {
    fn append_barrier(&mut self, signal: Option<&Event>, waits: &[Event]) -> Result<()> {
        let cmd = build(&self.append_target(), Operation::Barrier, signal, waits)?;
        self.record(cmd)
    }

    /// Orders only the listed byte ranges. `ranges[i]` spans `sizes[i]` bytes.
    fn append_memory_ranges_barrier(
        &mut self,
        ranges: &[DevicePtr],
        sizes: &[u64],
        signal: Option<&Event>,
        waits: &[Event],
    ) -> Result<()> {
        if ranges.len() != sizes.len() {
            return Err(Error::invalid_argument(format!(
                "{} ranges but {} sizes",
                ranges.len(),
                sizes.len()
            )));
        }
        let ranges = ranges.iter().copied().zip(sizes.iter().copied()).collect();
        let op = Operation::MemoryRangesBarrier { ranges };
        let cmd = build(&self.append_target(), op, signal, waits)?;
        self.record(cmd)
    }

    fn append_memory_copy(
        &mut self,
        dst: DevicePtr,
        src: DevicePtr,
        size: u64,
        signal: Option<&Event>,
        waits: &[Event],
    ) -> Result<()> {
        let op = Operation::MemoryCopy { dst, src, size };
        let cmd = build(&self.append_target(), op, signal, waits)?;
        self.record(cmd)
    }

    /// Copies `height` rows of `width` bytes between strided regions.
    #[allow(clippy::too_many_arguments)]
    fn append_memory_copy_region(
        &mut self,
        dst: CopyRegion,
        src: CopyRegion,
        width: u64,
        height: u64,
        signal: Option<&Event>,
        waits: &[Event],
    ) -> Result<()> {
        if width > dst.pitch || width > src.pitch {
            return Err(Error::invalid_argument(format!(
                "region width {width} exceeds pitch (dst {}, src {})",
                dst.pitch, src.pitch
            )));
        }
        let op = Operation::MemoryCopyRegion {
            dst,
            src,
            width,
            height,
        };
        let cmd = build(&self.append_target(), op, signal, waits)?;
        self.record(cmd)
    }

    /// `pattern` must be a power of two no larger than
    /// [`MAX_FILL_PATTERN_BYTES`], and `size` a multiple of it.
    fn append_memory_fill(
        &mut self,
        dst: DevicePtr,
        pattern: &[u8],
        size: u64,
        signal: Option<&Event>,
        waits: &[Event],
    ) -> Result<()> {
        validate_fill_pattern(pattern, size)?;
        let op = Operation::MemoryFill {
            dst,
            pattern: pattern.to_vec(),
            size,
        };
        let cmd = build(&self.append_target(), op, signal, waits)?;
        self.record(cmd)
    }

    fn append_signal_event(&mut self, event: &Event) -> Result<()> {
        let cmd = build(&self.append_target(), Operation::SignalEvent, Some(event), &[])?;
        self.record(cmd)
    }

    fn append_wait_on_events(&mut self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Err(Error::invalid_argument("no events to wait on"));
        }
        let cmd = build(&self.append_target(), Operation::WaitEvents, None, events)?;
        self.record(cmd)
    }

    fn append_event_reset(&mut self, event: &Event) -> Result<()> {
        let target = self.append_target();
        check_event(&target, event)?;
        let op = Operation::EventReset {
            event: event.clone(),
        };
        let cmd = build(&target, op, None, &[])?;
        self.record(cmd)
    }

    /// Arguments are captured now; changing them afterwards does not affect
    /// this launch.
    fn append_launch_kernel(
        &mut self,
        kernel: &Kernel,
        groups: GroupCount,
        signal: Option<&Event>,
        waits: &[Event],
    ) -> Result<()> {
        let target = self.append_target();
        if target.copy_only {
            return Err(Error::UnsupportedFeature(
                "kernel launches need a compute queue group",
            ));
        }
        if !kernel.device().covers(target.device) {
            return Err(Error::invalid_argument(format!(
                "kernel was built for {}, list targets {}",
                kernel.device(),
                target.device
            )));
        }
        let op = Operation::LaunchKernel(kernel.dispatch(groups)?);
        let cmd = build(&target, op, signal, waits)?;
        self.record(cmd)
    }

    /// Writes the device clock as a little-endian `u64` at `dst`.
    fn append_write_global_timestamp(
        &mut self,
        dst: DevicePtr,
        signal: Option<&Event>,
        waits: &[Event],
    ) -> Result<()> {
        let op = Operation::WriteGlobalTimestamp { dst };
        let cmd = build(&self.append_target(), op, signal, waits)?;
        self.record(cmd)
    }

    fn append_memory_prefetch(&mut self, ptr: DevicePtr, size: u64) -> Result<()> {
        let op = Operation::MemoryPrefetch { ptr, size };
        let cmd = build(&self.append_target(), op, None, &[])?;
        self.record(cmd)
    }

    fn append_mem_advise(&mut self, ptr: DevicePtr, size: u64, advice: MemAdvice) -> Result<()> {
        let op = Operation::MemAdvise { ptr, size, advice };
        let cmd = build(&self.append_target(), op, None, &[])?;
        self.record(cmd)
    }
}

impl<T: sealed::Recorder> CommandAppend for T {}

pub(crate) fn validate_fill_pattern(pattern: &[u8], size: u64) -> Result<()> {
    let len = pattern.len();
    if len == 0 || !len.is_power_of_two() || len > MAX_FILL_PATTERN_BYTES {
        return Err(Error::invalid_argument(format!(
            "fill pattern size {len} must be a power of two no larger than {MAX_FILL_PATTERN_BYTES}"
        )));
    }
    if size % len as u64 != 0 {
        return Err(Error::invalid_argument(format!(
            "fill size {size} is not a multiple of the pattern size {len}"
        )));
    }
    Ok(())
}
