use zelite_core::{CommandAppend, DevicePtr, DriverConfig, Error, SyncStatus, Timeout};

use super::{expect_eq, expect_err, Harness};

pub(crate) fn fence_lifecycle(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let queue = h.queue()?;
    let fence = queue.create_fence();
    expect_eq(fence.query_status()?, SyncStatus::NotReady, "new fence")?;
    expect_err(
        fence.host_synchronize(Timeout::INFINITE),
        |e| matches!(e, Error::InvalidState(_)),
        "infinite wait on a fence with no submission",
    )?;

    let mut list = h.list()?;
    list.append_barrier(None, &[])?;
    list.close()?;
    for round in 0..2 {
        queue.execute_command_lists(&[&list], Some(&fence))?;
        expect_eq(
            fence.host_synchronize(Timeout::INFINITE)?,
            SyncStatus::Ready,
            &format!("fence after submission {round}"),
        )?;
        fence.reset()?;
        expect_eq(fence.query_status()?, SyncStatus::NotReady, "fence after reset")?;
    }
    fence.destroy()?;
    expect_err(
        fence.query_status(),
        |e| matches!(e, Error::InvalidHandle(_)),
        "query on a destroyed fence",
    )
}

pub(crate) fn fence_wrong_queue(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let owner = h.queue()?;
    let other = h.queue()?;
    let fence = owner.create_fence();
    let mut list = h.list()?;
    list.close()?;
    expect_err(
        other.execute_command_lists(&[&list], Some(&fence)),
        |e| matches!(e, Error::InvalidHandle(_)),
        "fence from another queue",
    )
}

pub(crate) fn fence_observes_fault(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let queue = h.queue()?;
    let fence = queue.create_fence();
    let dst = h.buffer(&[0; 4])?;
    let mut list = h.list()?;
    list.append_memory_copy(dst, DevicePtr::from_addr(0x100), 4, None, &[])?;
    list.close()?;
    queue.execute_command_lists(&[&list], Some(&fence))?;
    expect_err(
        fence.host_synchronize(Timeout::INFINITE),
        |e| matches!(e, Error::DeviceFault(_)),
        "fence of a faulting submission",
    )?;
    // The fence keeps its result; the queue reports the same fault once.
    expect_err(
        fence.query_status(),
        |e| matches!(e, Error::DeviceFault(_)),
        "fence query after the fault",
    )?;
    expect_err(
        queue.synchronize(Timeout::INFINITE),
        |e| matches!(e, Error::DeviceFault(_)),
        "queue synchronize after the fault",
    )
}
