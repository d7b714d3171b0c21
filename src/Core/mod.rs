pub mod SharedMemory;
pub mod affinity;
pub mod timing;

pub use SharedMemory::{ensure_file_len, map_file, FileMapping, MapAccess, RawHandle, SharedMemoryBackend};
