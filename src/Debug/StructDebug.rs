use std::fmt;
use std::sync::atomic::Ordering;

use crate::Core::SharedMemory::SharedMemoryBackend;
use crate::SPSC::{RingConsumer, RingMonitor, RingProducer};

/// Debug function for RingProducer
///
/// Shows:
/// - Ring path and depth
/// - Current put/get cursors
/// - Flow-control policy
/// - Mapping base address (never dereferenced here)
pub fn debug_ring_producer(producer: &RingProducer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let view = &producer.mapping.view;
    f.debug_struct("RingProducer")
        .field("path", &producer.mapping.path)
        .field("depth", &view.depth())
        .field("put", &view.put_page().cursor.load(Ordering::Relaxed))
        .field("get", &view.get_page().cursor.load(Ordering::Relaxed))
        .field("flow_control", &producer.flow_control)
        .field("timeout_ns", &producer.timeout_ns)
        .field("port_passthrough", &producer.port_passthrough)
        .field("mapping", &format_args!("{:p}", producer.mapping.shm().as_ptr()))
        .finish()
}

/// Debug function for RingConsumer
pub fn debug_ring_consumer(consumer: &RingConsumer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let view = &consumer.mapping.view;
    f.debug_struct("RingConsumer")
        .field("path", &consumer.mapping.path)
        .field("depth", &view.depth())
        .field("put", &view.put_page().cursor.load(Ordering::Relaxed))
        .field("get", &view.get_page().cursor.load(Ordering::Relaxed))
        .field("wait_for_data", &consumer.wait_for_data)
        .field("wait_policy", &consumer.wait_policy)
        .field("mapping", &format_args!("{:p}", consumer.mapping.shm().as_ptr()))
        .finish()
}

/// Debug function for RingMonitor
///
/// Safely displays the mapping location without touching slot memory
pub fn debug_ring_monitor(monitor: &RingMonitor, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RingMonitor")
        .field("path", &monitor.mapping.path)
        .field("depth", &monitor.mapping.view.depth())
        .field("writable", &monitor.mapping.shm().is_writable())
        .field("mapping", &format_args!("{:p}", monitor.mapping.shm().as_ptr()))
        .finish_non_exhaustive()
}
