use std::fmt;
use std::path::Path;
use std::ptr::{self, addr_of};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use super::builder::RingBuilder;
use super::layout::{flags, SLOT_PAYLOAD_CAPACITY};
use super::lifecycle::RingMapping;
use super::monitor::RingStats;
use super::wait::{WaitPolicy, Waiter};
use crate::error::{Result, RingError};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Per-packet fields copied out of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    pub timestamp_ns: u64,
    pub length_wire: u16,
    pub length_capture: u16,
    pub port: u8,
    pub flags: u8,
}

impl PacketInfo {
    /// Whole seconds of the capture timestamp.
    pub fn seconds(&self) -> u32 {
        (self.timestamp_ns / NANOS_PER_SEC) as u32
    }

    /// Nanosecond fraction of the capture timestamp.
    pub fn nanos(&self) -> u32 {
        (self.timestamp_ns % NANOS_PER_SEC) as u32
    }

    pub fn is_fcs_error(&self) -> bool {
        self.flags & flags::FCS_ERROR != 0
    }
}

/// Outcome of a receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// A data record; the payload was copied into the caller's buffer.
    Packet(PacketInfo),
    /// Nothing to read right now.
    NoData,
    /// The producer closed the stream. The control record has been consumed.
    EndOfStream { timestamp_ns: u64 },
}

/// The single reader of a ring.
///
/// Owns the get cursor. Attaching starts from the current put position, so
/// records published before the consumer attached are never delivered.
pub struct RingConsumer {
    pub(crate) mapping: RingMapping,
    pub(crate) wait_for_data: bool,
    pub(crate) wait_policy: WaitPolicy,
}

impl RingConsumer {
    pub(crate) fn new(mapping: RingMapping, cfg: &RingBuilder) -> Self {
        Self {
            mapping,
            wait_for_data: cfg.wait_for_data,
            wait_policy: cfg.wait_policy,
        }
    }

    /// Receive using the wait mode chosen at attach.
    pub fn receive(&mut self, payload: &mut [u8]) -> Result<Received> {
        self.receive_with(self.wait_for_data, payload)
    }

    /// Receive one record, copying its payload into `payload`.
    ///
    /// With `wait` set this spins until the producer publishes; there is no
    /// timeout. A buffer shorter than the record's capture length fails with
    /// `BufferTooSmall` and leaves the record queued.
    ///
    /// A capture length beyond the slot payload is an `Integrity` error and is
    /// terminal: the record stays at the head of the ring and every later call
    /// fails the same way. Recover by resetting the ring from the producer and
    /// attaching a new consumer.
    pub fn receive_with(&mut self, wait: bool, payload: &mut [u8]) -> Result<Received> {
        let view = &self.mapping.view;
        let get = view.get_page().cursor.load(Relaxed);

        let waiter = Waiter::new(self.wait_policy);
        let put = loop {
            let put = view.put_page().cursor.load(Acquire);
            if put != get {
                break put;
            }
            if !wait {
                return Ok(Received::NoData);
            }
            waiter.pause();
        };

        // get ahead of put: the ring was reset under us
        if (put.wrapping_sub(get) as i64) < 0 {
            return Ok(Received::NoData);
        }

        let slot = view.slot(get);
        let (timestamp_ns, slot_flags) = unsafe {
            (
                ptr::read(addr_of!((*slot).timestamp_ns)),
                ptr::read(addr_of!((*slot).flags)),
            )
        };

        if slot_flags & flags::END_OF_STREAM != 0 {
            let page = view.get_page();
            page.last_timestamp_ns.store(timestamp_ns, Relaxed);
            page.cursor.store(get.wrapping_add(1), Release);
            return Ok(Received::EndOfStream { timestamp_ns });
        }

        let info = unsafe {
            PacketInfo {
                timestamp_ns,
                length_wire: ptr::read(addr_of!((*slot).length_wire)),
                length_capture: ptr::read(addr_of!((*slot).length_capture)),
                port: ptr::read(addr_of!((*slot).port)),
                flags: slot_flags,
            }
        };

        let len = info.length_capture as usize;
        if len > SLOT_PAYLOAD_CAPACITY {
            return Err(RingError::integrity(
                "length_capture",
                SLOT_PAYLOAD_CAPACITY as u64,
                len as u64,
            ));
        }
        if len > payload.len() {
            return Err(RingError::BufferTooSmall {
                len: payload.len(),
                required: len,
            });
        }

        unsafe {
            ptr::copy_nonoverlapping(
                addr_of!((*slot).payload) as *const u8,
                payload.as_mut_ptr(),
                len,
            );
        }

        let page = view.get_page();
        page.bytes.store(page.bytes.load(Relaxed).wrapping_add(len as u64), Relaxed);
        page.last_timestamp_ns.store(timestamp_ns, Relaxed);
        page.cursor.store(get.wrapping_add(1), Release);
        Ok(Received::Packet(info))
    }

    /// Records published and not yet consumed.
    pub fn pending(&self) -> i64 {
        let view = &self.mapping.view;
        let put = view.put_page().cursor.load(Acquire);
        let get = view.get_page().cursor.load(Relaxed);
        put.wrapping_sub(get) as i64
    }

    pub fn stats(&self) -> RingStats {
        RingStats::capture(&self.mapping)
    }

    pub fn path(&self) -> &Path {
        &self.mapping.path
    }

    pub fn depth(&self) -> u64 {
        self.mapping.view.depth()
    }
}

impl fmt::Debug for RingConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_ring_consumer(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_splits_into_seconds_and_fraction() {
        let info = PacketInfo {
            timestamp_ns: 1_700_000_000_123_456_789,
            length_wire: 64,
            length_capture: 64,
            port: 0,
            flags: flags::FCS_ERROR,
        };
        assert_eq!(info.seconds(), 1_700_000_000);
        assert_eq!(info.nanos(), 123_456_789);
        assert!(info.is_fcs_error());
    }
}
