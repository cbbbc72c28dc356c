mod harness;

use std::thread;

use anyhow::Result;
use pretty_assertions::assert_eq;
use zelite::ipc::{IpcEventPoolHandle, IpcMemHandle, IPC_HANDLE_BYTES};
use zelite::{
    CommandAppend, CommandListDesc, CommandQueueDesc, DriverConfig, EventDesc, EventPoolDesc,
    EventPoolFlags, SyncStatus, Timeout,
};

/// The exporter writes into shared memory on its device and signals; the
/// importer, holding only handle bytes, waits and reads the same memory.
#[test]
fn producer_and_consumer_exchange_only_handle_bytes() -> Result<()> {
    harness::init_tracing();
    let (exporter, importer) = harness::peers(DriverConfig::default())?;
    let device = exporter.device(0);

    let pool = exporter.ctx.create_event_pool(
        EventPoolDesc::new(4).with_flags(EventPoolFlags::HOST_VISIBLE | EventPoolFlags::IPC),
        &[device.clone()],
    )?;
    let ready = pool.create_event(EventDesc::new(3))?;
    let buffer = exporter.ctx.alloc_device(&device, 128, 64)?;

    let pool_bytes: [u8; IPC_HANDLE_BYTES] = *pool.get_ipc_handle()?.as_bytes();
    let mem_bytes: [u8; IPC_HANDLE_BYTES] = *exporter.ctx.get_ipc_mem_handle(buffer)?.as_bytes();

    let consumer = thread::spawn(move || -> Result<Vec<u8>> {
        let pool = importer
            .ctx
            .open_ipc_event_pool(&IpcEventPoolHandle::from_bytes(pool_bytes)?)?;
        let ready = pool.create_event(EventDesc::new(3))?;
        let mapped = importer
            .ctx
            .open_ipc_mem_handle(&IpcMemHandle::from_bytes(mem_bytes)?)?;
        assert_eq!(ready.host_synchronize(Timeout::INFINITE)?, SyncStatus::Ready);
        let bytes = importer.ctx.read(mapped, 128)?;
        importer.ctx.close_ipc_mem_handle(mapped)?;
        ready.destroy()?;
        pool.close_ipc_handle()?;
        Ok(bytes)
    });

    let mut list = exporter
        .ctx
        .create_command_list(&device, CommandListDesc::default())?;
    list.append_memory_fill(buffer, &[0xDE, 0xAD, 0xBE, 0xEF], 128, None, &[])?;
    list.append_barrier(Some(&ready), &[])?;
    list.close()?;
    let queue = exporter
        .ctx
        .create_command_queue(&device, CommandQueueDesc::default())?;
    queue.execute_command_lists(&[&list], None)?;
    queue.synchronize(Timeout::INFINITE)?;

    let bytes = consumer.join().expect("consumer thread")?;
    assert_eq!(bytes, [0xDE, 0xAD, 0xBE, 0xEF].repeat(32));

    ready.destroy()?;
    pool.destroy()?;
    exporter.ctx.free(buffer)?;
    assert_eq!(exporter.driver.transport().live_exports(), 0);
    Ok(())
}

#[test]
fn handle_kinds_are_not_interchangeable() -> Result<()> {
    let (exporter, _) = harness::peers(DriverConfig::default())?;
    let device = exporter.device(0);
    let buffer = exporter.ctx.alloc_shared(&device, 16, 16)?;
    let mem = exporter.ctx.get_ipc_mem_handle(buffer)?;
    let err = IpcEventPoolHandle::from_bytes(*mem.as_bytes()).unwrap_err();
    assert!(matches!(err, zelite::IpcError::WrongKind { .. }), "{err}");
    Ok(())
}
