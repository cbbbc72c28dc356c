use std::thread;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context as _};
use zelite_core::{
    CommandAppend, CommandListDesc, DriverConfig, Error, EventDesc, EventPoolFlags, SyncStatus,
    Timeout,
};

use super::{expect_eq, expect_err, Harness};

pub(crate) fn event_host_signal_and_reset(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let pool = h.pool(4, EventPoolFlags::HOST_VISIBLE)?;
    let event = pool.create_event(EventDesc::new(2))?;

    expect_eq(event.query_status()?, SyncStatus::NotReady, "fresh event")?;
    event.host_signal()?;
    expect_eq(event.query_status()?, SyncStatus::Ready, "after host signal")?;
    event.host_signal()?;
    expect_eq(event.query_status()?, SyncStatus::Ready, "after second signal")?;
    event.host_reset()?;
    expect_eq(event.query_status()?, SyncStatus::NotReady, "after host reset")?;
    Ok(())
}

pub(crate) fn event_synchronize_timeouts(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let pool = h.pool(1, EventPoolFlags::HOST_VISIBLE)?;
    let event = pool.create_event(EventDesc::new(0))?;

    expect_eq(
        event.host_synchronize(Timeout::ZERO)?,
        SyncStatus::NotReady,
        "zero timeout",
    )?;
    let start = Instant::now();
    expect_eq(
        event.host_synchronize(Timeout::from_millis(10))?,
        SyncStatus::NotReady,
        "finite timeout",
    )?;
    ensure!(
        start.elapsed() >= Duration::from_millis(10),
        "finite wait returned after {:?}",
        start.elapsed()
    );

    let signaler = {
        let event = event.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            event.host_signal()
        })
    };
    expect_eq(
        event.host_synchronize(Timeout::INFINITE)?,
        SyncStatus::Ready,
        "infinite wait",
    )?;
    signaler
        .join()
        .map_err(|_| anyhow::anyhow!("signaling thread panicked"))??;
    Ok(())
}

pub(crate) fn event_index_bounds(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let pool = h.pool(8, EventPoolFlags::HOST_VISIBLE)?;
    pool.create_event(EventDesc::new(7))
        .context("last index should be valid")?;
    expect_err(
        pool.create_event(EventDesc::new(8)),
        |e| matches!(e, Error::OutOfBounds { index: 8, capacity: 8 }),
        "index equal to capacity",
    )
}

pub(crate) fn event_duplicate_index(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let pool = h.pool(2, EventPoolFlags::HOST_VISIBLE)?;
    let first = pool.create_event(EventDesc::new(0))?;
    expect_err(
        pool.create_event(EventDesc::new(0)),
        |e| matches!(e, Error::InvalidState(_)),
        "second live event at one index",
    )?;
    first.destroy()?;
    let again = pool.create_event(EventDesc::new(0))?;
    expect_err(
        first.host_signal(),
        |e| matches!(e, Error::InvalidHandle(_)),
        "signal through a destroyed handle",
    )?;
    expect_eq(again.query_status()?, SyncStatus::NotReady, "recreated event")
}

pub(crate) fn event_pool_destroy_with_live_events(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let pool = h.pool(2, EventPoolFlags::HOST_VISIBLE)?;
    let event = pool.create_event(EventDesc::new(1))?;
    expect_err(
        pool.destroy(),
        |e| matches!(e, Error::InvalidState(_)),
        "destroying a pool with a live event",
    )?;
    event.destroy()?;
    pool.destroy()?;
    expect_err(
        pool.create_event(EventDesc::new(0)),
        |e| matches!(e, Error::InvalidHandle(_)),
        "creating from a destroyed pool",
    )
}

pub(crate) fn event_kernel_timestamps(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let pool = h.pool(
        1,
        EventPoolFlags::HOST_VISIBLE | EventPoolFlags::KERNEL_TIMESTAMP,
    )?;
    let event = pool.create_event(EventDesc::new(0))?;
    expect_eq(event.query_kernel_timestamp()?, None, "unsignaled timestamp")?;

    let src = h.buffer(&[1; 128])?;
    let dst = h.buffer(&[0; 128])?;
    let mut list = h.list()?;
    list.append_memory_copy(dst, src, 128, Some(&event), &[])?;
    list.close()?;
    let queue = h.queue()?;
    queue.execute_command_lists(&[&list], None)?;
    queue.synchronize(Timeout::INFINITE)?;

    let ts = event
        .query_kernel_timestamp()?
        .context("signaled event has no timestamp")?;
    ensure!(
        ts.global.start > 0 && ts.global.end > ts.global.start,
        "global ticks out of order: {:?}",
        ts.global
    );
    ensure!(
        ts.context.start > 0 && ts.context.end > ts.context.start,
        "context ticks out of order: {:?}",
        ts.context
    );

    let plain = h.pool(1, EventPoolFlags::HOST_VISIBLE)?;
    expect_err(
        plain.create_event(EventDesc::new(0))?.query_kernel_timestamp(),
        |e| matches!(e, Error::UnsupportedFeature(_)),
        "timestamp query on a plain pool",
    )
}

pub(crate) fn event_device_binding(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let other = h.device(1)?;
    let pool = h.pool(1, EventPoolFlags::HOST_VISIBLE)?;
    let event = pool.create_event(EventDesc::new(0))?;
    let mut list = h
        .ctx
        .create_command_list(&other, CommandListDesc::default())?;
    expect_err(
        list.append_signal_event(&event),
        |e| matches!(e, Error::InvalidArgument(_)),
        "event from a pool bound to another device",
    )
}
