use std::thread;
use std::time::Duration;

use zelite_core::{
    CommandAppend, CommandListDesc, CommandQueueDesc, DevicePtr, DriverConfig, Error, EventDesc,
    EventPoolDesc, EventPoolFlags, QueueGroupFlags, SyncStatus, Timeout,
};

use super::{expect_eq, expect_err, Harness};

pub(crate) fn queue_waits_on_host_signal(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let pool = h.pool(1, EventPoolFlags::HOST_VISIBLE)?;
    let gate = pool.create_event(EventDesc::new(0))?;
    let dst = h.buffer(&[0; 4])?;

    let mut list = h.list()?;
    list.append_wait_on_events(&[gate.clone()])?;
    list.append_memory_fill(dst, &[0x61], 4, None, &[])?;
    list.close()?;
    let queue = h.queue()?;
    let submission = queue.execute_command_lists(&[&list], None)?;

    expect_eq(
        queue.synchronize(Timeout::from_millis(10))?,
        SyncStatus::NotReady,
        "queue blocked on an unsignaled event",
    )?;
    expect_eq(submission.poll()?, SyncStatus::NotReady, "submission while blocked")?;
    h.expect_bytes(dst, &[0; 4])?;

    gate.host_signal()?;
    expect_eq(
        queue.synchronize(Timeout::INFINITE)?,
        SyncStatus::Ready,
        "queue after host signal",
    )?;
    h.expect_bytes(dst, &[0x61; 4])
}

pub(crate) fn queue_deferred_fault(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let dst = h.buffer(&[0; 4])?;
    let mut bad = h.list()?;
    bad.append_memory_copy(dst, DevicePtr::from_addr(0x80), 4, None, &[])?;
    bad.close()?;
    let mut good = h.list()?;
    good.append_memory_fill(dst, &[0x19], 4, None, &[])?;
    good.close()?;

    let queue = h.queue()?;
    queue.execute_command_lists(&[&bad, &good], None)?;
    expect_err(
        queue.synchronize(Timeout::INFINITE),
        |e| matches!(e, Error::DeviceFault(_)),
        "first synchronize after a faulting list",
    )?;
    expect_eq(
        queue.synchronize(Timeout::INFINITE)?,
        SyncStatus::Ready,
        "second synchronize",
    )?;
    h.expect_bytes(dst, &[0x19; 4])
}

pub(crate) fn queue_ordinal_validation(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let groups = h.device.command_queue_group_properties();
    let missing = u32::try_from(groups.len())?;
    expect_err(
        h.ctx
            .create_command_queue(&h.device, CommandQueueDesc::default().with_ordinal(missing)),
        |e| matches!(e, Error::InvalidArgument(_)),
        "ordinal past the last queue group",
    )?;
    let too_far = CommandQueueDesc {
        index: groups[0].num_queues,
        ..CommandQueueDesc::default()
    };
    expect_err(
        h.ctx.create_command_queue(&h.device, too_far),
        |e| matches!(e, Error::InvalidArgument(_)),
        "queue index past the group size",
    )?;

    let Some(copy) = groups
        .iter()
        .find(|g| !g.flags.contains(QueueGroupFlags::COMPUTE))
    else {
        return Ok(());
    };
    let copy_queue = h
        .ctx
        .create_command_queue(&h.device, CommandQueueDesc::default().with_ordinal(copy.ordinal))?;
    let mut compute_list = h.list()?;
    compute_list.close()?;
    expect_err(
        copy_queue.execute_command_lists(&[&compute_list], None),
        |e| matches!(e, Error::InvalidArgument(_)),
        "compute list on a copy queue",
    )
}

pub(crate) fn queue_synchronous_mode(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let queue = h
        .ctx
        .create_command_queue(&h.device, CommandQueueDesc::synchronous())?;
    let dst = h.buffer(&[0; 16])?;
    let mut list = h.list()?;
    list.append_memory_fill(dst, &[0x2B], 16, None, &[])?;
    list.close()?;
    let submission = queue.execute_command_lists(&[&list], None)?;
    expect_eq(submission.poll()?, SyncStatus::Ready, "synchronous submission")?;
    h.expect_bytes(dst, &[0x2B; 16])
}

pub(crate) fn queue_cross_device_handoff(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let second = h.device(1)?;
    let pool = h.ctx.create_event_pool(
        EventPoolDesc::new(1),
        &[h.device.clone(), second.clone()],
    )?;
    let handoff = pool.create_event(EventDesc::new(0))?;
    let buf = h.buffer(&[0; 8])?;

    let mut consumer = h
        .ctx
        .create_command_list(&second, CommandListDesc::default())?;
    consumer.append_memory_copy(buf.offset(4), buf, 4, None, &[handoff.clone()])?;
    consumer.close()?;
    let consumer_queue = h
        .ctx
        .create_command_queue(&second, CommandQueueDesc::default())?;
    consumer_queue.execute_command_lists(&[&consumer], None)?;

    let producer_queue = h.queue()?;
    let producer = {
        let mut list = h.list()?;
        list.append_memory_fill(buf, &[0x4D], 4, Some(&handoff), &[])?;
        list.close()?;
        list
    };
    // Give the consumer a chance to block first.
    thread::sleep(Duration::from_millis(2));
    producer_queue.execute_command_lists(&[&producer], None)?;

    consumer_queue.synchronize(Timeout::INFINITE)?;
    h.expect_bytes(buf, &[0x4D; 8])
}
