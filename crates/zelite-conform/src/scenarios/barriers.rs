use std::thread;
use std::time::Duration;

use zelite_core::{
    CommandAppend, DriverConfig, Error, EventDesc, EventPoolFlags, SyncStatus, Timeout,
};

use super::{expect_eq, expect_err, Harness};

pub(crate) fn barrier_signal_on_empty_list(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let pool = h.pool(1, EventPoolFlags::HOST_VISIBLE)?;
    let e0 = pool.create_event(EventDesc::new(0))?;
    let mut list = h.list()?;
    list.append_barrier(Some(&e0), &[])?;
    list.close()?;
    let queue = h.queue()?;
    queue.execute_command_lists(&[&list], None)?;
    expect_eq(
        e0.host_synchronize(Timeout::INFINITE)?,
        SyncStatus::Ready,
        "barrier signal event",
    )
}

pub(crate) fn barrier_orders_copies(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let pool = h.pool(2, EventPoolFlags::HOST_VISIBLE)?;
    let e0 = pool.create_event(EventDesc::new(0))?;
    let e1 = pool.create_event(EventDesc::new(1))?;

    let a = h.buffer(&[0x5C; 256])?;
    let b = h.buffer(&[0; 256])?;
    let c = h.buffer(&[0; 256])?;
    let mut list = h.list()?;
    list.append_memory_copy(b, a, 128, Some(&e0), &[])?;
    list.append_memory_copy(b.offset(128), a.offset(128), 128, Some(&e1), &[])?;
    list.append_barrier(None, &[e0.clone(), e1.clone()])?;
    list.append_memory_copy(c, b, 256, None, &[])?;
    list.close()?;

    let queue = h.queue()?;
    queue.execute_command_lists(&[&list], None)?;
    queue.synchronize(Timeout::INFINITE)?;
    h.expect_bytes(c, &[0x5C; 256])
}

pub(crate) fn barrier_memory_ranges(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let buf = h.buffer(&[0; 64])?;
    let mut list = h.list()?;
    expect_err(
        list.append_memory_ranges_barrier(&[buf, buf.offset(32)], &[32], None, &[]),
        |e| matches!(e, Error::InvalidArgument(_)),
        "ranges and sizes of different lengths",
    )?;
    list.append_memory_ranges_barrier(&[buf, buf.offset(32)], &[32, 32], None, &[])?;
    list.append_memory_fill(buf, &[0xA1], 64, None, &[])?;
    list.close()?;
    let queue = h.queue()?;
    queue.execute_command_lists(&[&list], None)?;
    queue.synchronize(Timeout::INFINITE)?;
    h.expect_bytes(buf, &[0xA1; 64])
}

pub(crate) fn barrier_system(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    let pool = h.pool(1, EventPoolFlags::HOST_VISIBLE)?;
    let gate = pool.create_event(EventDesc::new(0))?;
    let dst = h.buffer(&[0; 16])?;
    let mut list = h.list()?;
    list.append_memory_fill(dst, &[0x3E], 16, None, &[gate.clone()])?;
    list.close()?;
    let queue = h.queue()?;
    queue.execute_command_lists(&[&list], None)?;

    let signaler = {
        let gate = gate.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            gate.host_signal()
        })
    };
    h.ctx.system_barrier(&h.device)?;
    signaler
        .join()
        .map_err(|_| anyhow::anyhow!("signaling thread panicked"))??;
    h.expect_bytes(dst, &[0x3E; 16])
}
