// Open/validate/reset lifecycle of a ring mapping.
//
// The producer creates and sizes the backing file and may reinitialise the
// descriptor; consumers and monitors only validate and attach.

use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use super::builder::RingBuilder;
use super::layout::{descriptor_size, map_len, RingControl, RingView, RING_VERSION};
use crate::error::{Result, RingError};
use crate::Core::timing;
use crate::Core::SharedMemory::{ensure_file_len, map_file, MapAccess, SharedMemoryBackend};

/// An attached ring: the mapping plus a typed view into it.
pub(crate) struct RingMapping {
    pub(crate) view: RingView,
    pub(crate) path: PathBuf,
    // owns the memory `view` points into; dropped last
    shm: Box<dyn SharedMemoryBackend>,
}

impl RingMapping {
    fn map(path: &Path, depth: u64, access: MapAccess) -> Result<Self> {
        let shm = map_file(path, map_len(depth), access).map_err(|e| RingError::io(path, e))?;

        // Never touch a byte the file does not back.
        let control = size_of::<RingControl>() as u64;
        let file_len = shm.size() as u64;
        if file_len < control {
            return Err(RingError::integrity("file_size", control, file_len));
        }

        let view = unsafe { RingView::new(shm.as_ptr(), depth) };
        Ok(Self {
            view,
            path: path.to_path_buf(),
            shm: Box::new(shm),
        })
    }

    /// Validate the header, then confirm the file really holds every slot.
    fn validate(&self) -> Result<()> {
        self.view.validate()?;
        let expected = descriptor_size(self.view.depth());
        let file_len = self.shm.size() as u64;
        if file_len != expected {
            return Err(RingError::integrity("file_size", expected, file_len));
        }
        Ok(())
    }

    pub(crate) fn shm(&self) -> &dyn SharedMemoryBackend {
        &*self.shm
    }

    fn log_cursors(&self, role: &str) {
        let put = self.view.put_page().cursor.load(Ordering::Acquire);
        let get = self.view.get_page().cursor.load(Ordering::Acquire);
        log::info!(
            "RING[{}] {}: put:{:#x} ({:#x}) get:{:#x} ({:#x})",
            self.path.display(),
            role,
            put,
            put & self.view.mask(),
            get,
            get & self.view.mask()
        );
    }
}

fn fail(path: &Path, err: RingError) -> RingError {
    if err.is_fatal() {
        log::error!("RING[{}]: {}", path.display(), err);
    }
    err
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().as_bytes().to_vec()
}

/// Attach as the producer, creating or reinitialising the ring when needed.
pub(crate) fn open_for_produce(cfg: &RingBuilder) -> Result<RingMapping> {
    let path = cfg.path.as_path();
    let size = descriptor_size(cfg.depth);
    timing::cycles_per_ns();

    ensure_file_len(path, size as usize).map_err(|e| RingError::io(path, e))?;
    let mapping = RingMapping::map(path, cfg.depth, MapAccess::ReadWrite)?;
    let view = &mapping.view;

    log::debug!(
        "RING[{}] size {} map {} version {:#010x} expected {:#010x}",
        path.display(),
        size,
        mapping.shm().mapped_len(),
        view.version(),
        RING_VERSION
    );

    let mut reset = cfg.reset;
    if view.version() != RING_VERSION {
        log::warn!("RING[{}]: version wrong, forcing reset", path.display());
        reset = true;
    }

    if reset {
        unsafe { view.reset(&path_bytes(path)) };
        log::info!("RING[{}]: initialised with depth {}", path.display(), cfg.depth);
    }

    mapping.validate().map_err(|e| fail(path, e))?;

    unsafe { view.set_flow_control(cfg.flow_control, cfg.flow_control_timeout_ns) };
    mapping.log_cursors("producer");
    Ok(mapping)
}

/// Attach as the consumer. Any backlog already in the ring is discarded.
pub(crate) fn open_for_consume(cfg: &RingBuilder) -> Result<RingMapping> {
    let path = cfg.path.as_path();
    timing::cycles_per_ns();

    let mapping = RingMapping::map(path, cfg.depth, MapAccess::ReadWrite)?;
    mapping.validate().map_err(|e| fail(path, e))?;

    // the skipped backlog counts as consumed
    let view = &mapping.view;
    let (put_page, get_page) = (view.put_page(), view.get_page());
    let put = put_page.cursor.load(Ordering::Acquire);
    get_page
        .bytes
        .store(put_page.bytes.load(Ordering::Relaxed), Ordering::Relaxed);
    get_page.last_timestamp_ns.store(
        put_page.last_timestamp_ns.load(Ordering::Relaxed),
        Ordering::Relaxed,
    );
    get_page.cursor.store(put, Ordering::Release);

    mapping.log_cursors("consumer");
    Ok(mapping)
}

/// Attach read-only for statistics. Writes nothing.
pub(crate) fn open_for_monitor(cfg: &RingBuilder) -> Result<RingMapping> {
    let path = cfg.path.as_path();
    let mapping = RingMapping::map(path, cfg.depth, MapAccess::ReadOnly)?;
    mapping.validate().map_err(|e| fail(path, e))?;
    Ok(mapping)
}
