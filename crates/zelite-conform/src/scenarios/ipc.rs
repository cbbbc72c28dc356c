use std::sync::Arc;

use anyhow::ensure;
use zelite_core::{
    CommandAppend, DriverConfig, Error, EventDesc, EventPoolFlags, IpcError, IpcEventPoolHandle,
    IpcTransport, SyncStatus, Timeout,
};

use super::{expect_eq, expect_err, Harness};

/// An exporting and an importing driver sharing one transport.
fn peers(config: &DriverConfig) -> anyhow::Result<(Harness, Harness)> {
    let transport = Arc::new(IpcTransport::new());
    Ok((
        Harness::with_transport(config, transport.clone())?,
        Harness::with_transport(config, transport)?,
    ))
}

pub(crate) fn ipc_event_pool_roundtrip(config: &DriverConfig) -> anyhow::Result<()> {
    let (exporter, importer) = peers(config)?;
    let pool = exporter.pool(8, EventPoolFlags::HOST_VISIBLE | EventPoolFlags::IPC)?;
    let local = pool.create_event(EventDesc::new(5))?;

    // Handles travel as opaque bytes.
    let bytes = *pool.get_ipc_handle()?.as_bytes();
    let handle = IpcEventPoolHandle::from_bytes(bytes)?;
    let opened = importer.ctx.open_ipc_event_pool(&handle)?;
    let remote = opened.create_event(EventDesc::new(5))?;
    expect_eq(remote.query_status()?, SyncStatus::NotReady, "imported before signal")?;

    // The importer's queue blocks on the event until the exporter's device signals it.
    let dst = importer.buffer(&[0; 4])?;
    let mut consumer = importer.list()?;
    consumer.append_memory_fill(dst, &[0x0E], 4, None, &[remote.clone()])?;
    consumer.close()?;
    let consumer_queue = importer.queue()?;
    consumer_queue.execute_command_lists(&[&consumer], None)?;

    let mut producer = exporter.list()?;
    producer.append_signal_event(&local)?;
    producer.close()?;
    let producer_queue = exporter.queue()?;
    producer_queue.execute_command_lists(&[&producer], None)?;

    expect_eq(
        remote.host_synchronize(Timeout::INFINITE)?,
        SyncStatus::Ready,
        "imported event after exporter signal",
    )?;
    consumer_queue.synchronize(Timeout::INFINITE)?;
    importer.expect_bytes(dst, &[0x0E; 4])?;

    remote.destroy()?;
    opened.close_ipc_handle()?;
    Ok(())
}

pub(crate) fn ipc_memory_shared(config: &DriverConfig) -> anyhow::Result<()> {
    let (exporter, importer) = peers(config)?;
    let ptr = exporter.ctx.alloc_device(&exporter.device, 32, 32)?;
    exporter.ctx.write(ptr, &[0x21; 32])?;
    let handle = exporter.ctx.get_ipc_mem_handle(ptr)?;
    let mapped = importer.ctx.open_ipc_mem_handle(&handle)?;
    importer.expect_bytes(mapped, &[0x21; 32])?;

    importer.ctx.write(mapped.offset(16), &[0x42; 16])?;
    let mut expected = vec![0x21; 16];
    expected.extend_from_slice(&[0x42; 16]);
    exporter.expect_bytes(ptr, &expected)?;

    importer.ctx.close_ipc_mem_handle(mapped)?;
    ensure!(
        importer.ctx.read(mapped, 1).is_err(),
        "closed mapping is still readable"
    );
    exporter.ctx.free(ptr)?;

    let host = exporter.ctx.alloc_host(16, 16)?;
    expect_err(
        exporter.ctx.get_ipc_mem_handle(host),
        |e| matches!(e, Error::UnsupportedFeature(_)),
        "exporting host memory",
    )
}

pub(crate) fn ipc_closed_export(config: &DriverConfig) -> anyhow::Result<()> {
    let (exporter, importer) = peers(config)?;
    let pool = exporter.pool(1, EventPoolFlags::IPC)?;
    let handle = pool.get_ipc_handle()?;
    pool.destroy()?;
    expect_err(
        importer.ctx.open_ipc_event_pool(&handle),
        |e| matches!(e, Error::Ipc(IpcError::UnknownToken(_))),
        "opening a handle of a destroyed pool",
    )?;

    let plain = exporter.pool(1, EventPoolFlags::HOST_VISIBLE)?;
    expect_err(
        plain.get_ipc_handle(),
        |e| matches!(e, Error::UnsupportedFeature(_)),
        "exporting a pool without the IPC flag",
    )
}
