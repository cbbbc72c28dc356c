mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use common::Rig;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use zelite_core::{
    CommandAppend, Error, EventDesc, EventPoolDesc, EventPoolFlags, EventScope, SyncStatus,
    Timeout,
};

#[test]
fn host_synchronize_honors_zero_finite_and_infinite_timeouts() {
    let rig = Rig::new();
    let pool = rig.pool(1);
    let event = pool.create_event(EventDesc::new(0)).unwrap();

    assert_eq!(event.host_synchronize(Timeout::ZERO).unwrap(), SyncStatus::NotReady);

    let start = Instant::now();
    assert_eq!(
        event.host_synchronize(Timeout::from_millis(20)).unwrap(),
        SyncStatus::NotReady
    );
    assert!(start.elapsed() >= Duration::from_millis(20));

    let signaler = {
        let event = event.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            event.host_signal().unwrap();
        })
    };
    assert_eq!(
        event.host_synchronize(Timeout::INFINITE).unwrap(),
        SyncStatus::Ready
    );
    signaler.join().unwrap();
}

#[test]
fn scopes_are_recorded_on_the_event() {
    let rig = Rig::new();
    let pool = rig.pool(1);
    let event = pool
        .create_event(EventDesc::new(0).with_scopes(EventScope::DEVICE, EventScope::SUBDEVICE))
        .unwrap();
    assert_eq!(event.signal_scope(), EventScope::DEVICE);
    assert_eq!(event.wait_scope(), EventScope::SUBDEVICE);
}

#[test]
fn pool_shared_by_two_devices_is_visible_on_both() {
    let rig = Rig::new();
    let devices = rig.driver.devices();
    let pool = rig
        .ctx
        .create_event_pool(EventPoolDesc::new(2), &devices)
        .unwrap();
    let event = pool.create_event(EventDesc::new(0)).unwrap();

    let mut on_d1 = rig
        .ctx
        .create_command_list(&devices[1], Default::default())
        .unwrap();
    on_d1.append_signal_event(&event).unwrap();
    on_d1.close().unwrap();
    let q1 = rig
        .ctx
        .create_command_queue(&devices[1], Default::default())
        .unwrap();
    q1.execute_command_lists(&[&on_d1], None).unwrap();
    q1.synchronize(Timeout::INFINITE).unwrap();

    assert_eq!(event.query_status().unwrap(), SyncStatus::Ready);
}

#[test]
fn event_from_pool_on_other_device_is_rejected_at_append() {
    let rig = Rig::new();
    let pool = rig.pool(1);
    let event = pool.create_event(EventDesc::new(0)).unwrap();
    let other = rig.driver.devices()[1].clone();
    let mut list = rig
        .ctx
        .create_command_list(&other, Default::default())
        .unwrap();
    assert!(matches!(
        list.append_signal_event(&event),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn destroyed_event_is_rejected_at_append() {
    let rig = Rig::new();
    let pool = rig.pool(1);
    let event = pool.create_event(EventDesc::new(0)).unwrap();
    event.destroy().unwrap();
    let mut list = rig.list();
    assert!(matches!(
        list.append_barrier(Some(&event), &[]),
        Err(Error::InvalidHandle(_))
    ));
    assert!(matches!(
        list.append_wait_on_events(&[event]),
        Err(Error::InvalidHandle(_))
    ));
    assert!(list.is_empty());
}

#[test]
fn concurrent_signal_and_reset_on_distinct_events_do_not_interfere() {
    let rig = Rig::new();
    let pool = rig.pool(8);
    let events = rig.events(&pool, 8);
    let start = Arc::new(Barrier::new(events.len()));

    let workers: Vec<_> = events
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, event)| {
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for _ in 0..500 {
                    event.host_signal().unwrap();
                    event.host_reset().unwrap();
                }
                if i % 2 == 0 {
                    event.host_signal().unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    for (i, event) in events.iter().enumerate() {
        let expected = if i % 2 == 0 {
            SyncStatus::Ready
        } else {
            SyncStatus::NotReady
        };
        assert_eq!(event.query_status().unwrap(), expected, "event {i}");
    }
}

#[test]
fn host_and_device_signal_in_one_epoch_is_signaled_once() {
    let rig = Rig::new();
    let pool = rig.pool(1);
    let event = pool.create_event(EventDesc::new(0)).unwrap();
    event.host_signal().unwrap();

    let mut list = rig.list();
    list.append_signal_event(&event).unwrap();
    list.close().unwrap();
    let queue = rig.queue();
    queue.execute_command_lists(&[&list], None).unwrap();
    queue.synchronize(Timeout::INFINITE).unwrap();

    assert_eq!(event.query_status().unwrap(), SyncStatus::Ready);
    event.host_reset().unwrap();
    assert_eq!(event.query_status().unwrap(), SyncStatus::NotReady);
}

#[test]
fn kernel_timestamps_are_ordered_and_cleared_by_reset() {
    let rig = Rig::new();
    let pool = rig.pool_with_flags(
        1,
        EventPoolFlags::HOST_VISIBLE | EventPoolFlags::KERNEL_TIMESTAMP,
    );
    let event = pool.create_event(EventDesc::new(0)).unwrap();
    let src = rig.buffer(&[7; 256]);
    let dst = rig.buffer(&[0; 256]);

    let mut list = rig.list();
    list.append_memory_copy(dst, src, 256, Some(&event), &[]).unwrap();
    list.close().unwrap();
    let queue = rig.queue();
    queue.execute_command_lists(&[&list], None).unwrap();
    event.host_synchronize(Timeout::INFINITE).unwrap();

    let ts = event.query_kernel_timestamp().unwrap().unwrap();
    assert!(ts.global.start > 0);
    assert!(ts.global.end > ts.global.start);
    assert!(ts.context.start > 0);
    assert!(ts.context.end > ts.context.start);

    event.host_reset().unwrap();
    assert_eq!(event.query_kernel_timestamp().unwrap(), None);
}

proptest! {
    #[test]
    fn every_index_below_capacity_is_valid(capacity in 1u32..64, extra in 0u32..8) {
        let rig = Rig::new();
        let pool = rig.pool(capacity);
        for index in 0..capacity {
            prop_assert!(pool.create_event(EventDesc::new(index)).is_ok());
        }
        let index = capacity + extra;
        prop_assert_eq!(
            pool.create_event(EventDesc::new(index)).unwrap_err(),
            Error::OutOfBounds { index, capacity }
        );
    }
}
