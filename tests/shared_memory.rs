use fmadring::Core::SharedMemory::{
    ensure_file_len, map_file, MapAccess, RawHandle, SharedMemoryBackend,
};
use std::fs;
use std::io;

#[test]
fn test_create_and_map_shared_file() -> io::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("shm_ring");

    assert!(ensure_file_len(&path, 8192)?);
    // second call finds the size already right
    assert!(!ensure_file_len(&path, 8192)?);
    assert_eq!(fs::metadata(&path)?.len(), 8192);

    let writer = map_file(&path, 1 << 20, MapAccess::ReadWrite)?;
    assert_eq!(writer.size(), 8192);
    assert_eq!(writer.mapped_len(), 1 << 20);
    assert!(writer.is_writable());
    let RawHandle::Fd(fd) = writer.raw_handle();
    assert!(fd >= 0);

    let reader = map_file(&path, 1 << 20, MapAccess::ReadOnly)?;
    assert!(!reader.is_writable());

    unsafe {
        *writer.as_ptr().add(100) = 0x5a;
        assert_eq!(*reader.as_ptr().add(100), 0x5a);
    }
    Ok(())
}

#[test]
fn test_resize_existing_file() -> io::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("shm_ring");
    fs::write(&path, [1u8; 100])?;

    assert!(ensure_file_len(&path, 4096)?);
    assert_eq!(fs::metadata(&path)?.len(), 4096);
    Ok(())
}

#[test]
fn test_map_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = map_file(&dir.path().join("absent"), 4096, MapAccess::ReadOnly).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}

#[test]
fn test_file_larger_than_reservation_is_mapped_whole() -> io::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("big");
    ensure_file_len(&path, 3 * 4096)?;

    let m = map_file(&path, 4096, MapAccess::ReadOnly)?;
    assert_eq!(m.size(), 3 * 4096);
    assert!(m.mapped_len() >= 3 * 4096);
    Ok(())
}
