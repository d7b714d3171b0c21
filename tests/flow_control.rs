use fmadring::{Received, RingBuilder, RingError, WaitPolicy};
use std::thread;
use std::time::{Duration, Instant};

const DEPTH: u64 = 8;

#[test]
fn test_full_ring_times_out_and_leaves_ring_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ring");

    let mut tx = RingBuilder::new(&path)
        .with_depth(DEPTH)
        .with_flow_control(true, Duration::from_millis(2))
        .build_producer()
        .unwrap();
    let _rx = RingBuilder::new(&path)
        .with_depth(DEPTH)
        .build_consumer()
        .unwrap();

    // depth - 1 records fit
    for ts in 0..DEPTH - 1 {
        tx.send(ts, 1, 0, b"x").unwrap();
    }
    assert_eq!(tx.occupancy(), (DEPTH - 1) as i64);

    let t0 = Instant::now();
    let result = tx.send(99, 1, 0, b"y");
    let elapsed = t0.elapsed();
    match result {
        Err(RingError::BackpressureTimeout { waited_ns, timeout_ns }) => {
            assert_eq!(timeout_ns, 2_000_000);
            assert!(waited_ns > timeout_ns);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    // gives up promptly once the timeout passes
    assert!(elapsed < Duration::from_millis(20), "send blocked {:?}", elapsed);
    assert!(matches!(
        tx.send_end_of_stream(100),
        Err(RingError::BackpressureTimeout { .. })
    ));

    let stats = tx.stats();
    assert_eq!(stats.put, DEPTH - 1);
    assert_eq!(stats.put_timestamp_ns, DEPTH - 2);
    assert!(stats.flow_control);
    assert_eq!(stats.flow_control_timeout_ns, 2_000_000);
}

#[test]
fn test_without_flow_control_producer_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ring");

    let mut tx = RingBuilder::new(&path)
        .with_depth(DEPTH)
        .build_producer()
        .unwrap();
    let _rx = RingBuilder::new(&path)
        .with_depth(DEPTH)
        .build_consumer()
        .unwrap();

    for ts in 0..3 * DEPTH {
        tx.send(ts, 1, 0, b"x").unwrap();
    }
    assert_eq!(tx.occupancy(), (3 * DEPTH) as i64);
    assert!(!tx.flow_control());
}

#[test]
fn test_occupancy_stays_bounded_with_concurrent_drain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ring");
    const COUNT: u64 = 5_000;

    let mut tx = RingBuilder::new(&path)
        .with_depth(DEPTH)
        .with_flow_control(true, Duration::from_secs(5))
        .with_wait_policy(WaitPolicy::Backoff)
        .build_producer()
        .unwrap();
    let mut rx = RingBuilder::new(&path)
        .with_depth(DEPTH)
        .with_wait_policy(WaitPolicy::Backoff)
        .build_consumer()
        .unwrap();

    let reader = thread::spawn(move || {
        let mut buf = [0u8; 64];
        let mut expected = 0u64;
        loop {
            match rx.receive(&mut buf).unwrap() {
                Received::Packet(info) => {
                    assert_eq!(info.timestamp_ns, expected);
                    assert!(rx.pending() <= (DEPTH - 1) as i64);
                    expected += 1;
                    if expected % 97 == 0 {
                        thread::sleep(Duration::from_micros(50));
                    }
                }
                Received::EndOfStream { .. } => break,
                Received::NoData => unreachable!("blocking receive"),
            }
        }
        expected
    });

    for ts in 0..COUNT {
        tx.send(ts, 8, 0, &ts.to_le_bytes()).unwrap();
        assert!(tx.occupancy() <= (DEPTH - 1) as i64);
    }
    tx.send_end_of_stream(COUNT).unwrap();

    assert_eq!(reader.join().unwrap(), COUNT);
}
