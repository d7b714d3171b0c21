use std::fmt;
use std::path::Path;
use std::ptr::{self, addr_of_mut};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use super::builder::RingBuilder;
use super::layout::{flags, SLOT_PAYLOAD_CAPACITY, PUBLISHED_PORT};
use super::lifecycle::RingMapping;
use super::monitor::RingStats;
use super::wait::{WaitPolicy, Waiter};
use crate::error::{Result, RingError};
use crate::Core::timing::Stopwatch;

/// The single writer of a ring.
///
/// Owns the put cursor and the slot at the put position. Publishing a record is
/// a release store of the put cursor after the slot is fully written.
pub struct RingProducer {
    pub(crate) mapping: RingMapping,
    pub(crate) flow_control: bool,
    pub(crate) timeout_ns: u64,
    pub(crate) wait_policy: WaitPolicy,
    pub(crate) port_passthrough: bool,
}

impl RingProducer {
    pub(crate) fn new(mapping: RingMapping, cfg: &RingBuilder) -> Self {
        Self {
            mapping,
            flow_control: cfg.flow_control,
            timeout_ns: cfg.flow_control_timeout_ns,
            wait_policy: cfg.wait_policy,
            port_passthrough: cfg.port_passthrough,
        }
    }

    /// Publish one packet. Returns the number of payload bytes written.
    ///
    /// `payload.len()` is the capture length and must fit a slot.
    pub fn send(
        &mut self,
        timestamp_ns: u64,
        length_wire: u16,
        port: u8,
        payload: &[u8],
    ) -> Result<usize> {
        self.publish(timestamp_ns, length_wire, port, 0, payload)
    }

    /// Like [`send`](Self::send) with caller flags such as `flags::FCS_ERROR`.
    /// The end-of-stream bit is reserved for [`send_end_of_stream`](Self::send_end_of_stream).
    pub fn send_flagged(
        &mut self,
        timestamp_ns: u64,
        length_wire: u16,
        port: u8,
        packet_flags: u8,
        payload: &[u8],
    ) -> Result<usize> {
        self.publish(
            timestamp_ns,
            length_wire,
            port,
            packet_flags & !flags::END_OF_STREAM,
            payload,
        )
    }

    /// Publish the end-of-stream control record.
    pub fn send_end_of_stream(&mut self, timestamp_ns: u64) -> Result<()> {
        let put = self.acquire_slot()?;
        let view = &self.mapping.view;

        unsafe {
            let slot = view.slot(put);
            addr_of_mut!((*slot).timestamp_ns).write(timestamp_ns);
            addr_of_mut!((*slot).length_wire).write(0);
            addr_of_mut!((*slot).length_capture).write(0);
            addr_of_mut!((*slot).port).write(PUBLISHED_PORT);
            addr_of_mut!((*slot).flags).write(flags::END_OF_STREAM);
        }

        view.put_page().last_timestamp_ns.store(timestamp_ns, Relaxed);
        view.put_page().cursor.store(put.wrapping_add(1), Release);
        Ok(())
    }

    fn publish(
        &mut self,
        timestamp_ns: u64,
        length_wire: u16,
        port: u8,
        packet_flags: u8,
        payload: &[u8],
    ) -> Result<usize> {
        let len = payload.len();
        if len > SLOT_PAYLOAD_CAPACITY {
            return Err(RingError::PayloadTooLarge {
                len,
                capacity: SLOT_PAYLOAD_CAPACITY,
            });
        }

        let put = self.acquire_slot()?;
        let view = &self.mapping.view;
        let port = if self.port_passthrough {
            port
        } else {
            PUBLISHED_PORT
        };

        unsafe {
            let slot = view.slot(put);
            addr_of_mut!((*slot).timestamp_ns).write(timestamp_ns);
            addr_of_mut!((*slot).length_wire).write(length_wire);
            addr_of_mut!((*slot).length_capture).write(len as u16);
            addr_of_mut!((*slot).port).write(port);
            addr_of_mut!((*slot).flags).write(packet_flags);
            ptr::copy_nonoverlapping(
                payload.as_ptr(),
                addr_of_mut!((*slot).payload) as *mut u8,
                len,
            );
        }

        let page = view.put_page();
        page.bytes.store(page.bytes.load(Relaxed).wrapping_add(len as u64), Relaxed);
        page.last_timestamp_ns.store(timestamp_ns, Relaxed);
        page.cursor.store(put.wrapping_add(1), Release);
        Ok(len)
    }

    /// Wait for a free slot under flow control and return the put cursor.
    /// On timeout nothing has been written.
    fn acquire_slot(&self) -> Result<u64> {
        let view = &self.mapping.view;
        let put = view.put_page().cursor.load(Relaxed);
        if !self.flow_control {
            return Ok(put);
        }

        let limit = (view.depth() - 1) as i64;
        let watch = Stopwatch::start();
        let waiter = Waiter::new(self.wait_policy);
        loop {
            let get = view.get_page().cursor.load(Acquire);
            if (put.wrapping_sub(get) as i64) < limit {
                return Ok(put);
            }

            waiter.pause();

            let waited_ns = watch.elapsed_ns();
            if waited_ns > self.timeout_ns {
                log::warn!(
                    "RING[{}]: wait for drain timeout {} > {} ns",
                    self.mapping.path.display(),
                    waited_ns,
                    self.timeout_ns
                );
                return Err(RingError::BackpressureTimeout {
                    waited_ns,
                    timeout_ns: self.timeout_ns,
                });
            }
        }
    }

    /// Records published and not yet consumed.
    pub fn occupancy(&self) -> i64 {
        let view = &self.mapping.view;
        let put = view.put_page().cursor.load(Relaxed);
        let get = view.get_page().cursor.load(Acquire);
        put.wrapping_sub(get) as i64
    }

    pub fn stats(&self) -> RingStats {
        RingStats::capture(&self.mapping)
    }

    /// Publish how many bytes the capture source still holds for this ring.
    pub fn set_upstream_pending_bytes(&mut self, bytes: u64) {
        unsafe { self.mapping.view.set_upstream_pending_bytes(bytes) }
    }

    pub fn path(&self) -> &Path {
        &self.mapping.path
    }

    pub fn depth(&self) -> u64 {
        self.mapping.view.depth()
    }

    pub fn flow_control(&self) -> bool {
        self.flow_control
    }
}

impl fmt::Debug for RingProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_ring_producer(self, f)
    }
}
