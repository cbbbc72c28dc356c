use anyhow::ensure;
use zelite_core::{
    CommandAppend, CommandListState, CommandQueueDesc, CopyRegion, DevicePtr, DriverConfig, Error,
    GroupCount, ModuleDesc, SyncStatus, Timeout,
};

use super::{expect_eq, expect_err, Harness};

/// Address that no allocation ever starts at.
const UNMAPPED: DevicePtr = DevicePtr::from_addr(0x40);

pub(crate) fn cmdlist_close_twice(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let mut list = h.list()?;
    list.close()?;
    expect_eq(list.state(), CommandListState::Closed, "state after close")?;
    expect_err(
        list.close(),
        |e| matches!(e, Error::InvalidState(_)),
        "closing twice",
    )
}

pub(crate) fn cmdlist_append_after_close(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let mut list = h.list()?;
    list.append_barrier(None, &[])?;
    list.close()?;
    expect_err(
        list.append_barrier(None, &[]),
        |e| matches!(e, Error::InvalidState(_)),
        "append to a closed list",
    )?;
    expect_eq(list.len(), 1, "commands after rejected append")?;
    list.reset()?;
    expect_eq(list.state(), CommandListState::Open, "state after reset")?;
    ensure!(list.is_empty(), "reset list still holds commands");
    Ok(())
}

pub(crate) fn cmdlist_reset_and_resubmit(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let dst = h.buffer(&[0; 32])?;
    let queue = h.queue()?;
    let mut list = h.list()?;
    for round in 0..2u8 {
        list.reset()?;
        list.append_memory_fill(dst, &[round, 0xF0], 32, None, &[])?;
        list.close()?;
        queue.execute_command_lists(&[&list], None)?;
        queue.synchronize(Timeout::INFINITE)?;
        let expected: Vec<u8> = [round, 0xF0].repeat(16);
        h.expect_bytes(dst, &expected)?;
    }
    Ok(())
}

pub(crate) fn cmdlist_fill_and_copy_region(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let src: Vec<u8> = (0..64).collect();
    let src_ptr = h.buffer(&src)?;
    let dst = h.buffer(&[0; 64])?;
    let mut list = h.list()?;
    expect_err(
        list.append_memory_fill(dst, &[1, 2, 3], 48, None, &[]),
        |e| matches!(e, Error::InvalidArgument(_)),
        "fill pattern of three bytes",
    )?;
    list.append_memory_fill(dst, &[0xCC, 0xDD], 64, None, &[])?;
    list.append_barrier(None, &[])?;
    // 8x8 source, copy the 4x2 block at (2, 3) to (0, 0) of the destination.
    list.append_memory_copy_region(
        CopyRegion {
            ptr: dst,
            pitch: 8,
            origin_x: 0,
            origin_y: 0,
        },
        CopyRegion {
            ptr: src_ptr,
            pitch: 8,
            origin_x: 2,
            origin_y: 3,
        },
        4,
        2,
        None,
        &[],
    )?;
    list.close()?;
    let queue = h.queue()?;
    queue.execute_command_lists(&[&list], None)?;
    queue.synchronize(Timeout::INFINITE)?;

    h.expect_bytes(dst, &[26, 27, 28, 29, 0xCC, 0xDD, 0xCC, 0xDD])?;
    h.expect_bytes(dst.offset(8), &[34, 35, 36, 37, 0xCC, 0xDD, 0xCC, 0xDD])?;
    h.expect_bytes(dst.offset(16), &[0xCC, 0xDD])
}

pub(crate) fn cmdlist_kernel_launch(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let out = h.buffer(&[0; 256])?;
    let module = h.ctx.create_module(
        &h.device,
        ModuleDesc::new().kernel("iota", 1, |launch| {
            let ptr = launch.pointer_arg(0)?;
            let bytes: Vec<u8> = (0..launch.global_size()?).map(|i| i as u8).collect();
            launch.write(ptr, &bytes)
        }),
    )?;
    let mut kernel = module.create_kernel("iota")?;
    kernel.set_group_size(16, 1, 1)?;
    kernel.set_argument(0, out)?;
    expect_err(
        kernel.set_argument(1, 0u32),
        |e| matches!(e, Error::InvalidArgument(_)),
        "argument index past the kernel signature",
    )?;

    let mut list = h.list()?;
    expect_err(
        list.append_launch_kernel(&kernel, GroupCount::new(0, 1, 1), None, &[]),
        |e| matches!(e, Error::InvalidArgument(_)),
        "zero group count",
    )?;
    list.append_launch_kernel(&kernel, GroupCount::new(16, 1, 1), None, &[])?;
    list.close()?;
    let queue = h.queue()?;
    queue.execute_command_lists(&[&list], None)?;
    queue.synchronize(Timeout::INFINITE)?;

    let expected: Vec<u8> = (0..=255).collect();
    h.expect_bytes(out, &expected)
}

pub(crate) fn immediate_synchronous_append(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let mut imm = h
        .ctx
        .create_immediate_command_list(&h.device, CommandQueueDesc::synchronous())?;
    let dst = h.buffer(&[0; 8])?;
    imm.append_memory_fill(dst, &[0x77], 8, None, &[])?;
    // Synchronous appends are complete on return.
    h.expect_bytes(dst, &[0x77; 8])?;
    expect_err(
        imm.append_memory_fill(UNMAPPED, &[1], 8, None, &[]),
        |e| matches!(e, Error::DeviceFault(_)),
        "synchronous append to unmapped memory",
    )?;
    expect_eq(
        imm.host_synchronize(Timeout::INFINITE)?,
        SyncStatus::Ready,
        "fault already reported by append",
    )
}

pub(crate) fn immediate_deferred_fault(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let mut imm = h
        .ctx
        .create_immediate_command_list(&h.device, CommandQueueDesc::default())?;
    imm.append_memory_fill(UNMAPPED, &[1], 8, None, &[])?;
    expect_err(
        imm.host_synchronize(Timeout::INFINITE),
        |e| matches!(e, Error::DeviceFault(_)),
        "deferred fault on synchronize",
    )?;
    expect_eq(
        imm.host_synchronize(Timeout::INFINITE)?,
        SyncStatus::Ready,
        "fault is reported once",
    )
}
