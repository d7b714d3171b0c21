use std::mem::size_of;
use std::ptr::{self, addr_of, addr_of_mut};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{Result, RingError};

/// Layout version written last when a ring is (re)initialised.
pub const RING_VERSION: u32 = 0x0000_0100;

/// Minimum address range reserved for a ring mapping.
pub const RING_MAP_RESERVE: usize = 16 * 1024 * 1024;

pub const PAGE_SIZE: usize = 4096;

/// Payload bytes available in one slot.
pub const SLOT_PAYLOAD_CAPACITY: usize = 10 * 1024;

pub const DEFAULT_DEPTH: u64 = 1024;

/// Bytes reserved in the header for a diagnostic copy of the ring path.
pub const PATH_CAPACITY: usize = 128;

/// Port value the send path publishes unless port passthrough is enabled.
/// Existing readers have only ever seen 0 here.
pub const PUBLISHED_PORT: u8 = 0;

const SLOT_HEADER_SIZE: usize = 24;
const SLOT_ALIGN_PAD: usize = 3 * PAGE_SIZE - SLOT_HEADER_SIZE - SLOT_PAYLOAD_CAPACITY;
const HEADER_FIELDS_SIZE: usize = 4 * 4 + 4 * 8 + PATH_CAPACITY;
const CURSOR_FIELDS_SIZE: usize = 3 * 8;

/// Slot flag bits
pub mod flags {
    /// Control record: the stream ended. Carries no payload.
    pub const END_OF_STREAM: u8 = 1 << 0;
    /// Frame check sequence error reported by the capture source.
    pub const FCS_ERROR: u8 = 1 << 1;
}

/// One packet record. Three pages long so every slot starts on a page boundary.
#[repr(C)]
pub struct Slot {
    /// Capture time, nanoseconds since the epoch.
    pub timestamp_ns: u64,
    pub length_wire: u16,
    /// Meaningful bytes in `payload`.
    pub length_capture: u16,
    pub port: u8,
    pub flags: u8,
    pub _pad1: u8,
    pub _pad2: u8,
    pub _pad3: u32,
    pub _pad4: u32,
    pub payload: [u8; SLOT_PAYLOAD_CAPACITY],
    pub _pad_align: [u8; SLOT_ALIGN_PAD],
}

/// First page of the descriptor. Mostly read-only after initialisation.
///
/// The 64-bit fields sit at unaligned offsets (140, 148, 160, 168), as in the
/// packed on-disk format, so they are stored as native-endian byte arrays.
#[repr(C)]
pub struct HeaderPage {
    pub version: AtomicU32,
    pub descriptor_size: u32,
    pub slot_size: u32,
    pub path: [u8; PATH_CAPACITY],
    pub depth: [u8; 8],
    pub mask: [u8; 8],
    pub flow_control: u32,
    pub flow_control_timeout_ns: [u8; 8],
    /// Bytes the capture source still holds for this ring. Zero unless a
    /// producer reports it.
    pub upstream_pending_bytes: [u8; 8],
    pub _align: [u8; PAGE_SIZE - HEADER_FIELDS_SIZE],
}

/// A cursor on its own page, followed by statistics owned by the same side.
#[repr(C)]
pub struct CursorPage {
    /// Monotonic count of records published (put page) or consumed (get page).
    pub cursor: AtomicU64,
    pub bytes: AtomicU64,
    pub last_timestamp_ns: AtomicU64,
    pub _align: [u8; PAGE_SIZE - CURSOR_FIELDS_SIZE],
}

/// Control block at the start of the mapping; the slot array follows it.
#[repr(C)]
pub struct RingControl {
    pub header: HeaderPage,
    pub put: CursorPage,
    pub get: CursorPage,
}

const _: () = assert!(size_of::<Slot>() == 3 * PAGE_SIZE);
const _: () = assert!(size_of::<HeaderPage>() == PAGE_SIZE);
const _: () = assert!(size_of::<CursorPage>() == PAGE_SIZE);
const _: () = assert!(size_of::<RingControl>() == 3 * PAGE_SIZE);

/// Total bytes of a descriptor holding `depth` slots.
pub const fn descriptor_size(depth: u64) -> u64 {
    size_of::<RingControl>() as u64 + depth * size_of::<Slot>() as u64
}

/// Address range to reserve for a descriptor of `depth` slots.
pub fn map_len(depth: u64) -> usize {
    let size = descriptor_size(depth) as usize;
    let rounded = (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    rounded.max(RING_MAP_RESERVE)
}

/// Typed view over a mapped descriptor.
///
/// This struct is NOT stored in shared memory. It holds raw pointers into a
/// mapping owned elsewhere and must not outlive it.
pub struct RingView {
    pub(crate) control: *mut RingControl,
    pub(crate) slots: *mut Slot,
    pub(crate) depth: u64,
    pub(crate) mask: u64,
}

unsafe impl Send for RingView {}

impl RingView {
    /// # Safety
    /// `base` must point to at least `descriptor_size(depth)` mapped bytes,
    /// aligned to a page, that stay mapped for the lifetime of the view.
    pub unsafe fn new(base: *mut u8, depth: u64) -> Self {
        Self {
            control: base as *mut RingControl,
            slots: base.add(size_of::<RingControl>()) as *mut Slot,
            depth,
            mask: depth - 1,
        }
    }

    #[inline]
    pub fn depth(&self) -> u64 {
        self.depth
    }

    #[inline]
    pub fn mask(&self) -> u64 {
        self.mask
    }

    #[inline]
    pub fn put_page(&self) -> &CursorPage {
        unsafe { &(*self.control).put }
    }

    #[inline]
    pub fn get_page(&self) -> &CursorPage {
        unsafe { &(*self.control).get }
    }

    #[inline]
    pub fn version(&self) -> u32 {
        unsafe { (*self.control).header.version.load(Ordering::Acquire) }
    }

    /// Slot addressed by a monotonic cursor.
    #[inline]
    pub(crate) fn slot(&self, cursor: u64) -> *mut Slot {
        unsafe { self.slots.add((cursor & self.mask) as usize) }
    }

    pub fn stored_descriptor_size(&self) -> u32 {
        unsafe { ptr::read_volatile(addr_of!((*self.control).header.descriptor_size)) }
    }

    pub fn stored_slot_size(&self) -> u32 {
        unsafe { ptr::read_volatile(addr_of!((*self.control).header.slot_size)) }
    }

    pub fn stored_depth(&self) -> u64 {
        u64::from_ne_bytes(unsafe { ptr::read_volatile(addr_of!((*self.control).header.depth)) })
    }

    pub fn stored_mask(&self) -> u64 {
        u64::from_ne_bytes(unsafe { ptr::read_volatile(addr_of!((*self.control).header.mask)) })
    }

    pub fn flow_control(&self) -> bool {
        unsafe { ptr::read_volatile(addr_of!((*self.control).header.flow_control)) != 0 }
    }

    pub fn flow_control_timeout_ns(&self) -> u64 {
        u64::from_ne_bytes(unsafe {
            ptr::read_volatile(addr_of!((*self.control).header.flow_control_timeout_ns))
        })
    }

    pub fn upstream_pending_bytes(&self) -> u64 {
        u64::from_ne_bytes(unsafe {
            ptr::read_volatile(addr_of!((*self.control).header.upstream_pending_bytes))
        })
    }

    /// Diagnostic copy of the path the producer created the ring with.
    pub fn stored_path(&self) -> String {
        let raw = unsafe { ptr::read_volatile(addr_of!((*self.control).header.path)) };
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    /// Zero the descriptor and write a fresh header. The version is written
    /// last, after a release fence, so a valid version vouches for every other field.
    ///
    /// # Safety
    /// The mapping must be writable and at least `descriptor_size(depth)` long.
    pub(crate) unsafe fn reset(&self, path: &[u8]) {
        let total = descriptor_size(self.depth) as usize;
        ptr::write_bytes(self.control as *mut u8, 0, total);

        let hdr = addr_of_mut!((*self.control).header);
        ptr::write_volatile(addr_of_mut!((*hdr).descriptor_size), total as u32);
        ptr::write_volatile(addr_of_mut!((*hdr).slot_size), size_of::<Slot>() as u32);
        ptr::write_volatile(addr_of_mut!((*hdr).depth), self.depth.to_ne_bytes());
        ptr::write_volatile(addr_of_mut!((*hdr).mask), self.mask.to_ne_bytes());

        self.put_page().cursor.store(0, Ordering::Relaxed);
        self.get_page().cursor.store(0, Ordering::Relaxed);

        std::sync::atomic::fence(Ordering::Release);
        (*hdr).version.store(RING_VERSION, Ordering::Relaxed);

        let mut copy = [0u8; PATH_CAPACITY];
        let n = path.len().min(PATH_CAPACITY - 1);
        copy[..n].copy_from_slice(&path[..n]);
        ptr::write_volatile(addr_of_mut!((*hdr).path), copy);
    }

    /// # Safety
    /// The mapping must be writable.
    pub(crate) unsafe fn set_flow_control(&self, enabled: bool, timeout_ns: u64) {
        let hdr = addr_of_mut!((*self.control).header);
        ptr::write_volatile(addr_of_mut!((*hdr).flow_control), enabled as u32);
        ptr::write_volatile(
            addr_of_mut!((*hdr).flow_control_timeout_ns),
            timeout_ns.to_ne_bytes(),
        );
    }

    /// # Safety
    /// The mapping must be writable.
    pub(crate) unsafe fn set_upstream_pending_bytes(&self, bytes: u64) {
        ptr::write_volatile(
            addr_of_mut!((*self.control).header.upstream_pending_bytes),
            bytes.to_ne_bytes(),
        );
    }

    /// Check every structural field against this process's expectations.
    pub fn validate(&self) -> Result<()> {
        let version = self.version();
        if version != RING_VERSION {
            return Err(RingError::integrity(
                "version",
                RING_VERSION as u64,
                version as u64,
            ));
        }

        let expected_size = descriptor_size(self.depth);
        let checks = [
            (
                "descriptor_size",
                expected_size,
                self.stored_descriptor_size() as u64,
            ),
            (
                "slot_size",
                size_of::<Slot>() as u64,
                self.stored_slot_size() as u64,
            ),
            ("depth", self.depth, self.stored_depth()),
            ("mask", self.mask, self.stored_mask()),
        ];

        for (field, expected, found) in checks {
            if expected != found {
                return Err(RingError::integrity(field, expected, found));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc_zeroed, dealloc, Layout};

    fn with_backing<F: FnOnce(&RingView)>(depth: u64, f: F) {
        let size = descriptor_size(depth) as usize;
        let layout = Layout::from_size_align(size, PAGE_SIZE).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null());
        let view = unsafe { RingView::new(ptr, depth) };
        f(&view);
        unsafe { dealloc(ptr, layout) };
    }

    #[test]
    fn descriptor_size_of_default_depth() {
        assert_eq!(descriptor_size(DEFAULT_DEPTH), 12_595_200);
        assert_eq!(map_len(DEFAULT_DEPTH), RING_MAP_RESERVE);
    }

    #[test]
    fn map_len_grows_past_reserve_for_deep_rings() {
        let deep = 4096;
        assert!(map_len(deep) as u64 >= descriptor_size(deep));
        assert_eq!(map_len(deep) % PAGE_SIZE, 0);
    }

    #[test]
    fn zeroed_descriptor_fails_on_version() {
        with_backing(8, |view| match view.validate() {
            Err(RingError::Integrity { field, .. }) => assert_eq!(field, "version"),
            other => panic!("unexpected {:?}", other),
        });
    }

    #[test]
    fn reset_writes_consistent_header() {
        with_backing(8, |view| {
            unsafe { view.reset(b"/dev/shm/test_ring") };
            view.validate().unwrap();
            assert_eq!(view.stored_depth(), 8);
            assert_eq!(view.stored_mask(), 7);
            assert_eq!(view.stored_path(), "/dev/shm/test_ring");
            assert_eq!(view.put_page().cursor.load(Ordering::Relaxed), 0);
            assert_eq!(view.get_page().cursor.load(Ordering::Relaxed), 0);
        });
    }

    #[test]
    fn long_path_is_truncated_with_terminator() {
        with_backing(2, |view| {
            let long = vec![b'a'; 300];
            unsafe { view.reset(&long) };
            assert_eq!(view.stored_path().len(), PATH_CAPACITY - 1);
        });
    }

    #[test]
    fn slot_index_wraps_on_mask() {
        with_backing(4, |view| {
            assert_eq!(view.slot(0), view.slot(4));
            assert_eq!(view.slot(3), view.slot(7));
            assert_ne!(view.slot(1), view.slot(2));
        });
    }

    #[test]
    fn flow_control_policy_round_trips_through_header() {
        with_backing(2, |view| {
            unsafe {
                view.reset(b"x");
                view.set_flow_control(true, 123_456_789);
            }
            assert!(view.flow_control());
            assert_eq!(view.flow_control_timeout_ns(), 123_456_789);
        });
    }

    #[test]
    fn upstream_pending_bytes_survive_flow_control_update() {
        with_backing(2, |view| {
            unsafe { view.reset(b"x") };
            assert_eq!(view.upstream_pending_bytes(), 0);
            unsafe {
                view.set_upstream_pending_bytes(1 << 40);
                view.set_flow_control(false, 7);
            }
            assert_eq!(view.upstream_pending_bytes(), 1 << 40);
            assert_eq!(view.flow_control_timeout_ns(), 7);
        });
    }
}
