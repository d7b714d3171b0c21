// File-backed shared memory for the packet ring.
// The backing file holds exactly one ring descriptor; the mapping reserves a larger
// address range so the on-disk structure can grow without relocating the mapping.

use std::fmt::Debug;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

#[cfg(unix)]
use std::os::fd::{AsRawFd, IntoRawFd};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Shared memory backend trait for cross-process memory mapping
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Get a pointer to the start of the mapped region
    fn as_ptr(&self) -> *mut u8;

    /// Number of bytes backed by the file. Touching memory past this faults.
    fn size(&self) -> usize;

    /// Length of the reserved address range
    fn mapped_len(&self) -> usize;

    /// Get the underlying file descriptor
    fn raw_handle(&self) -> RawHandle;

    /// Whether the mapping was established writable
    fn is_writable(&self) -> bool;
}

/// Platform-specific handle type
#[derive(Debug, Clone, Copy)]
pub enum RawHandle {
    /// Unix file descriptor
    Fd(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAccess {
    ReadWrite,
    ReadOnly,
}

/// Make sure `path` exists and is exactly `len` bytes long.
///
/// A missing file is created (mode 0666, subject to umask); a file of any other
/// size is truncated or extended to `len`. Returns true when the file was touched.
#[cfg(unix)]
pub fn ensure_file_len(path: &Path, len: usize) -> io::Result<bool> {
    let current = fs::metadata(path).map(|m| m.len()).ok();
    if current == Some(len as u64) {
        return Ok(false);
    }

    log::warn!(
        "ring size mismatch {:?} != {} for {}, resizing",
        current,
        len,
        path.display()
    );

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .mode(0o666)
        .open(path)?;

    if unsafe { libc::ftruncate(file.as_raw_fd(), len as libc::off_t) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(true)
}

#[cfg(not(unix))]
pub fn ensure_file_len(_path: &Path, _len: usize) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "File-backed shared memory only supported on unix",
    ))
}

/// Map an existing file shared across processes.
///
/// The whole of `map_len` is reserved even when the file is shorter; only the
/// first `size()` bytes may be accessed.
#[cfg(unix)]
pub fn map_file(path: &Path, map_len: usize, access: MapAccess) -> io::Result<FileMapping> {
    FileMapping::open(path, map_len, access)
}

#[cfg(not(unix))]
pub fn map_file(_path: &Path, _map_len: usize, _access: MapAccess) -> io::Result<FileMapping> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "File-backed shared memory only supported on unix",
    ))
}

#[derive(Debug)]
pub struct FileMapping {
    ptr: NonNull<u8>,
    file_len: usize,
    map_len: usize,
    fd: i32,
    access: MapAccess,
    path: PathBuf,
}

// The mapping is plain shared memory; synchronisation is the ring protocol's job.
unsafe impl Send for FileMapping {}
unsafe impl Sync for FileMapping {}

#[cfg(unix)]
impl FileMapping {
    fn open(path: &Path, map_len: usize, access: MapAccess) -> io::Result<Self> {
        let writable = access == MapAccess::ReadWrite;
        let file = OpenOptions::new().read(true).write(writable).open(path)?;

        let file_len = file.metadata()?.len() as usize;
        if map_len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "mapping length must be non-zero",
            ));
        }
        // a file larger than the reservation is still mapped whole
        let page = 4096;
        let map_len = map_len.max((file_len + page - 1) & !(page - 1));

        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };

        let fd = file.into_raw_fd();
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                prot,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let ptr = match NonNull::new(ptr as *mut u8) {
            Some(p) => p,
            None => {
                unsafe {
                    libc::munmap(ptr, map_len);
                    libc::close(fd);
                }
                return Err(io::Error::new(io::ErrorKind::Other, "mmap returned null"));
            }
        };

        Ok(Self {
            ptr,
            file_len,
            map_len,
            fd,
            access,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
impl Drop for FileMapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.map_len);
            libc::close(self.fd);
        }
    }
}

impl SharedMemoryBackend for FileMapping {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.file_len
    }

    fn mapped_len(&self) -> usize {
        self.map_len
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Fd(self.fd)
    }

    fn is_writable(&self) -> bool {
        self.access == MapAccess::ReadWrite
    }
}
