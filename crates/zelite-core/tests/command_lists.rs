mod common;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::Rig;
use pretty_assertions::assert_eq;
use zelite_core::{
    CommandAppend, CommandListDesc, CommandListState, CopyRegion, DevicePtr, Error, EventDesc,
    GroupCount, KernelArg, MemAdvice, ModuleDesc, Operation, SyncStatus, Timeout,
};

#[test]
fn close_twice_is_invalid_state_and_reset_reopens() {
    let rig = Rig::new();
    let mut list = rig.list();
    assert_eq!(list.state(), CommandListState::Open);
    list.append_barrier(None, &[]).unwrap();
    list.close().unwrap();
    assert_eq!(list.state(), CommandListState::Closed);
    assert_eq!(
        list.close().unwrap_err(),
        Error::InvalidState("command list is already closed")
    );
    assert!(matches!(
        list.append_barrier(None, &[]),
        Err(Error::InvalidState(_))
    ));
    assert_eq!(list.len(), 1);

    list.reset().unwrap();
    assert_eq!(list.state(), CommandListState::Open);
    assert!(list.is_empty());
    list.append_barrier(None, &[]).unwrap();
}

#[test]
fn open_list_cannot_be_executed() {
    let rig = Rig::new();
    let list = rig.list();
    let queue = rig.queue();
    assert!(matches!(
        queue.execute_command_lists(&[&list], None),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn barrier_on_empty_list_signals_its_event() {
    let rig = Rig::new();
    let pool = rig.pool(2);
    let e0 = pool.create_event(EventDesc::new(0)).unwrap();

    let mut list = rig.list();
    list.append_barrier(Some(&e0), &[]).unwrap();
    list.close().unwrap();
    let queue = rig.queue();
    queue.execute_command_lists(&[&list], None).unwrap();
    assert_eq!(queue.synchronize(Timeout::INFINITE).unwrap(), SyncStatus::Ready);

    assert_eq!(e0.query_status().unwrap(), SyncStatus::Ready);
    assert_eq!(e0.host_synchronize(Timeout::ZERO).unwrap(), SyncStatus::Ready);
}

#[test]
fn barrier_waiting_on_two_events_orders_both_copies() {
    let rig = Rig::new();
    let pool = rig.pool(2);
    let events = rig.events(&pool, 2);
    let (e0, e1) = (&events[0], &events[1]);

    let a = rig.buffer(&[0xAA; 64]);
    let b = rig.buffer(&[0; 64]);
    let c = rig.buffer(&[0; 64]);

    let mut list = rig.list();
    list.append_signal_event(e0).unwrap();
    list.append_memory_copy(b, a, 64, None, &[]).unwrap();
    list.append_signal_event(e1).unwrap();
    list.append_barrier(None, &[e0.clone(), e1.clone()]).unwrap();
    list.append_memory_copy(c, b, 64, None, &[]).unwrap();
    list.close().unwrap();

    let queue = rig.queue();
    queue.execute_command_lists(&[&list], None).unwrap();
    queue.synchronize(Timeout::INFINITE).unwrap();

    assert_eq!(rig.ctx.read(c, 64).unwrap(), vec![0xAA; 64]);
}

#[test]
fn barrier_holds_until_both_events_even_when_signaled_out_of_order() {
    let rig = Rig::new();
    let pool = rig.pool(2);
    let events = rig.events(&pool, 2);
    let (e0, e1) = (&events[0], &events[1]);

    let src = rig.buffer(&[0x5C; 32]);
    let dst = rig.buffer(&[0; 32]);

    let mut list = rig.list();
    list.append_barrier(None, &[e0.clone(), e1.clone()]).unwrap();
    list.append_memory_copy(dst, src, 32, None, &[]).unwrap();
    list.close().unwrap();
    let queue = rig.queue();
    queue.execute_command_lists(&[&list], None).unwrap();

    e1.host_signal().unwrap();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(queue.synchronize(Timeout::ZERO).unwrap(), SyncStatus::NotReady);
    assert_eq!(rig.ctx.read(dst, 32).unwrap(), vec![0; 32]);

    e0.host_signal().unwrap();
    assert_eq!(queue.synchronize(Timeout::INFINITE).unwrap(), SyncStatus::Ready);
    assert_eq!(rig.ctx.read(dst, 32).unwrap(), vec![0x5C; 32]);
}

#[test]
fn reset_and_resubmit_reproduces_side_effects() {
    let rig = Rig::new();
    let src = rig.buffer(&[1, 2, 3, 4, 5, 6, 7, 8]);
    let dst = rig.buffer(&[0; 8]);
    let queue = rig.queue();
    let mut list = rig.list();

    let record = |list: &mut zelite_core::CommandList| {
        list.append_memory_fill(dst, &[0xFF, 0xEE], 8, None, &[])
            .unwrap();
        list.append_barrier(None, &[]).unwrap();
        list.append_memory_copy(dst.offset(2), src, 4, None, &[])
            .unwrap();
        list.close().unwrap();
    };

    record(&mut list);
    queue.execute_command_lists(&[&list], None).unwrap();
    queue.synchronize(Timeout::INFINITE).unwrap();
    let first = rig.ctx.read(dst, 8).unwrap();

    rig.ctx.write(dst, &[0; 8]).unwrap();
    list.reset().unwrap();
    record(&mut list);
    queue.execute_command_lists(&[&list], None).unwrap();
    queue.synchronize(Timeout::INFINITE).unwrap();

    assert_eq!(rig.ctx.read(dst, 8).unwrap(), first);
    assert_eq!(first, vec![0xFF, 0xEE, 1, 2, 3, 4, 0xFF, 0xEE]);
}

#[test]
fn signal_copy_barrier_launch_run_in_program_order() {
    let rig = Rig::new();
    let pool = rig.pool(1);
    let e0 = pool.create_event(EventDesc::new(0)).unwrap();
    let src = rig.buffer(&[5; 16]);
    let dst = rig.buffer(&[0; 16]);
    let log = Arc::new(Mutex::new(Vec::new()));

    let module = {
        let log = log.clone();
        let e0 = e0.clone();
        rig.ctx
            .create_module(
                &rig.device,
                ModuleDesc::new().kernel("observe", 1, move |launch| {
                    let ptr = launch.pointer_arg(0)?;
                    let seen = launch.read(ptr, 16)?;
                    let signaled = e0.query_status().map_err(|e| e.to_string())?;
                    log.lock().unwrap().push((seen, signaled));
                    Ok(())
                }),
            )
            .unwrap()
    };
    let mut kernel = module.create_kernel("observe").unwrap();
    kernel.set_argument(0, dst).unwrap();

    let mut list = rig.list();
    list.append_signal_event(&e0).unwrap();
    list.append_memory_copy(dst, src, 16, None, &[]).unwrap();
    list.append_barrier(None, &[]).unwrap();
    list.append_launch_kernel(&kernel, GroupCount::new(1, 1, 1), None, &[])
        .unwrap();
    list.close().unwrap();

    let names: Vec<_> = list.operations().map(Operation::name).collect();
    assert_eq!(
        names,
        vec!["signal_event", "memory_copy", "barrier", "launch_kernel"]
    );

    let queue = rig.queue();
    queue.execute_command_lists(&[&list], None).unwrap();
    queue.synchronize(Timeout::INFINITE).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0], (vec![5; 16], SyncStatus::Ready));
}

#[test]
fn kernel_arguments_are_captured_at_append() {
    let rig = Rig::new();
    let out = rig.buffer(&[0; 4]);
    let module = rig
        .ctx
        .create_module(
            &rig.device,
            ModuleDesc::new().kernel("store", 2, |launch| {
                let ptr = launch.pointer_arg(0)?;
                let value = launch.u32_arg(1)?;
                let total = value * launch.global_size()? as u32;
                launch.write(ptr, &total.to_le_bytes())
            }),
        )
        .unwrap();
    let mut kernel = module.create_kernel("store").unwrap();
    kernel.set_group_size(4, 1, 1).unwrap();
    kernel.set_argument(0, KernelArg::Pointer(out)).unwrap();
    kernel.set_argument(1, 3u32).unwrap();

    let mut list = rig.list();
    list.append_launch_kernel(&kernel, GroupCount::new(2, 1, 1), None, &[])
        .unwrap();
    kernel.set_argument(1, 100u32).unwrap();
    list.close().unwrap();

    let queue = rig.queue();
    queue.execute_command_lists(&[&list], None).unwrap();
    queue.synchronize(Timeout::INFINITE).unwrap();
    assert_eq!(rig.ctx.read(out, 4).unwrap(), 24u32.to_le_bytes().to_vec());
}

#[test]
fn kernel_on_copy_only_ordinal_is_unsupported() {
    let rig = Rig::new();
    let module = rig
        .ctx
        .create_module(&rig.device, ModuleDesc::new().kernel("k", 0, |_| Ok(())))
        .unwrap();
    let kernel = module.create_kernel("k").unwrap();
    let mut list = rig
        .ctx
        .create_command_list(&rig.device, CommandListDesc { ordinal: 1 })
        .unwrap();
    assert!(matches!(
        list.append_launch_kernel(&kernel, GroupCount::new(1, 1, 1), None, &[]),
        Err(Error::UnsupportedFeature(_))
    ));
    list.append_memory_fill(rig.buffer(&[0; 4]), &[1], 4, None, &[])
        .unwrap();
}

#[test]
fn unknown_ordinal_is_invalid_argument() {
    let rig = Rig::new();
    assert!(matches!(
        rig.ctx
            .create_command_list(&rig.device, CommandListDesc { ordinal: 9 }),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn fill_and_ranges_barrier_arguments_are_validated() {
    let rig = Rig::new();
    let buf = rig.buffer(&[0; 64]);
    let mut list = rig.list();
    assert!(matches!(
        list.append_memory_fill(buf, &[1, 2, 3], 63, None, &[]),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        list.append_memory_fill(buf, &[1, 2], 63, None, &[]),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        list.append_memory_ranges_barrier(&[buf], &[], None, &[]),
        Err(Error::InvalidArgument(_))
    ));
    list.append_memory_ranges_barrier(&[buf, buf.offset(32)], &[16, 32], None, &[])
        .unwrap();
    assert_eq!(list.len(), 1);
}

#[test]
fn copy_region_moves_a_strided_rectangle() {
    let rig = Rig::new();
    // 4x4 source, copy the 2x2 block at (1, 1) into the top-left of an 8-pitch dst.
    let src_bytes: Vec<u8> = (0..16).collect();
    let src = rig.buffer(&src_bytes);
    let dst = rig.buffer(&[0; 16]);

    let mut list = rig.list();
    list.append_memory_copy_region(
        CopyRegion {
            ptr: dst,
            pitch: 8,
            origin_x: 0,
            origin_y: 0,
        },
        CopyRegion {
            ptr: src,
            pitch: 4,
            origin_x: 1,
            origin_y: 1,
        },
        2,
        2,
        None,
        &[],
    )
    .unwrap();
    list.close().unwrap();
    let queue = rig.queue();
    queue.execute_command_lists(&[&list], None).unwrap();
    queue.synchronize(Timeout::INFINITE).unwrap();

    let out = rig.ctx.read(dst, 16).unwrap();
    assert_eq!(&out[0..2], &[5, 6]);
    assert_eq!(&out[8..10], &[9, 10]);
    assert_eq!(out[2], 0);
}

#[test]
fn global_timestamp_prefetch_and_advise_execute() {
    let rig = Rig::new();
    let buf = rig.buffer(&[0; 8]);
    let mut list = rig.list();
    list.append_memory_prefetch(buf, 8).unwrap();
    list.append_mem_advise(buf, 8, MemAdvice::SetReadMostly).unwrap();
    list.append_write_global_timestamp(buf, None, &[]).unwrap();
    list.close().unwrap();

    let queue = rig.queue();
    queue.execute_command_lists(&[&list], None).unwrap();
    queue.synchronize(Timeout::INFINITE).unwrap();

    let bytes = rig.ctx.read(buf, 8).unwrap();
    let ts = u64::from_le_bytes(bytes.try_into().unwrap());
    assert!(ts > 0);
}

#[test]
fn event_reset_in_list_clears_host_signal() {
    let rig = Rig::new();
    let pool = rig.pool(1);
    let event = pool.create_event(EventDesc::new(0)).unwrap();
    event.host_signal().unwrap();

    let mut list = rig.list();
    list.append_event_reset(&event).unwrap();
    list.close().unwrap();
    let queue = rig.queue();
    queue.execute_command_lists(&[&list], None).unwrap();
    queue.synchronize(Timeout::INFINITE).unwrap();
    assert_eq!(event.query_status().unwrap(), SyncStatus::NotReady);
}

#[test]
fn unmapped_pointer_faults_at_execution_not_append() {
    let rig = Rig::new();
    let dst = rig.buffer(&[0; 4]);
    let mut list = rig.list();
    list.append_memory_copy(dst, DevicePtr::from_addr(0x10), 4, None, &[])
        .unwrap();
    list.close().unwrap();

    let queue = rig.queue();
    let submission = queue.execute_command_lists(&[&list], None).unwrap();
    assert!(matches!(
        submission.wait(Timeout::INFINITE),
        Err(Error::DeviceFault(_))
    ));
    assert!(matches!(
        queue.synchronize(Timeout::INFINITE),
        Err(Error::DeviceFault(_))
    ));
    assert_eq!(queue.synchronize(Timeout::INFINITE).unwrap(), SyncStatus::Ready);
}
