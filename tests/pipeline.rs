mod harness;

use anyhow::Result;
use pretty_assertions::assert_eq;
use zelite::{
    CommandAppend, CommandListDesc, CommandQueueDesc, Context, Driver, DriverConfig, EventDesc,
    EventPoolDesc, EventPoolFlags, GroupCount, ModuleDesc, SyncStatus, Timeout,
};

/// Device 0 produces with a kernel, device 1 consumes after an event handoff,
/// and a fence tells the host when the consumer is done.
#[test]
fn two_device_pipeline_with_fence_and_timestamps() -> Result<()> {
    harness::init_tracing();
    let driver = Driver::new(DriverConfig::default())?;
    let ctx = Context::new(&driver);
    let devices = driver.devices();
    let (d0, d1) = (&devices[0], &devices[1]);

    let pool = ctx.create_event_pool(
        EventPoolDesc::new(2)
            .with_flags(EventPoolFlags::HOST_VISIBLE | EventPoolFlags::KERNEL_TIMESTAMP),
        &devices,
    )?;
    let produced = pool.create_event(EventDesc::new(0))?;
    let consumed = pool.create_event(EventDesc::new(1))?;

    let staging = ctx.alloc_shared(d0, 64, 64)?;
    let result = ctx.alloc_shared(d1, 64, 64)?;

    let module = ctx.create_module(
        d0,
        ModuleDesc::new().kernel("squares", 1, |launch| {
            let out = launch.pointer_arg(0)?;
            let bytes: Vec<u8> = (0..launch.global_size()?)
                .map(|i| (i * i) as u8)
                .collect();
            launch.write(out, &bytes)
        }),
    )?;
    let mut kernel = module.create_kernel("squares")?;
    kernel.set_group_size(8, 1, 1)?;
    kernel.set_argument(0, staging)?;

    let mut consumer = ctx.create_command_list(d1, CommandListDesc::default())?;
    consumer.append_memory_copy(result, staging, 64, Some(&consumed), &[produced.clone()])?;
    consumer.close()?;
    let q1 = ctx.create_command_queue(d1, CommandQueueDesc::default())?;
    let fence = q1.create_fence();
    q1.execute_command_lists(&[&consumer], Some(&fence))?;

    let mut producer = ctx.create_command_list(d0, CommandListDesc::default())?;
    producer.append_launch_kernel(&kernel, GroupCount::new(8, 1, 1), Some(&produced), &[])?;
    producer.close()?;
    let q0 = ctx.create_command_queue(d0, CommandQueueDesc::default())?;
    q0.execute_command_lists(&[&producer], None)?;

    assert_eq!(fence.host_synchronize(Timeout::INFINITE)?, SyncStatus::Ready);
    let expected: Vec<u8> = (0u64..64).map(|i| (i * i) as u8).collect();
    assert_eq!(ctx.read(result, 64)?, expected);

    let p = produced.query_kernel_timestamp()?.expect("producer timestamp");
    let c = consumed.query_kernel_timestamp()?.expect("consumer timestamp");
    // The copy could only start once the kernel had signaled.
    assert!(c.global.start >= p.global.end);
    assert!(c.global.end > c.global.start);

    let stats = driver.stats().snapshot();
    assert_eq!(stats.submissions, 2);
    assert_eq!(stats.device_signals, 2);
    assert_eq!(stats.faults, 0);
    Ok(())
}

#[test]
fn subdevice_queues_share_root_pools_and_budget() -> Result<()> {
    harness::init_tracing();
    let config = DriverConfig {
        device_count: 1,
        subdevices_per_device: 2,
        device_memory_bytes: 1 << 20,
        ..DriverConfig::default()
    };
    let driver = Driver::new(config)?;
    let ctx = Context::new(&driver);
    let root = driver.devices()[0].clone();
    let subs = root.subdevices();
    assert_eq!(subs.len(), 2);
    assert_eq!(root.properties().subdevice_count, 2);
    assert!(subs.iter().all(|s| s.is_subdevice() && s.subdevices().is_empty()));

    // Both halves of the root budget are drawn from one counter.
    let a = ctx.alloc_device(&subs[0], 512 << 10, 64)?;
    let b = ctx.alloc_device(&subs[1], 512 << 10, 64)?;
    assert!(matches!(
        ctx.alloc_device(&root, 1, 1),
        Err(zelite::Error::OutOfDeviceMemory { .. })
    ));
    ctx.free(a)?;
    ctx.free(b)?;

    let pool = ctx.create_event_pool(EventPoolDesc::new(2), &[root.clone()])?;
    let events: Vec<_> = (0..2)
        .map(|i| pool.create_event(EventDesc::new(i)))
        .collect::<zelite::Result<_>>()?;

    let mut queues = Vec::new();
    for (sub, event) in subs.iter().zip(&events) {
        let mut list = ctx.create_command_list(sub, CommandListDesc::default())?;
        list.append_signal_event(event)?;
        list.close()?;
        let queue = ctx.create_command_queue(sub, CommandQueueDesc::default())?;
        queue.execute_command_lists(&[&list], None)?;
        queues.push((queue, list));
    }
    ctx.system_barrier(&root)?;
    for event in &events {
        assert_eq!(event.query_status()?, SyncStatus::Ready);
    }
    Ok(())
}

#[test]
fn facade_exposes_runtime_and_ipc_layers() {
    assert_eq!(zelite::ipc::IPC_HANDLE_BYTES, 64);
    assert_eq!(zelite::ipc::layout::handle_offsets::TOKEN, 16);
    let config = zelite::runtime::DriverConfig::default();
    assert_eq!(config, DriverConfig::default());
}
