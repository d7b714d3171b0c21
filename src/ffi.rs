use std::ffi::{c_char, CStr};
use std::path::PathBuf;
use std::ptr;
use std::time::Duration;

use crate::error::RingError;
use crate::SPSC::{Received, RingBuilder, RingConsumer, RingProducer};

// Return codes. Non-negative values are payload byte counts.
pub const FMADRING_END_OF_STREAM: i32 = -1;
pub const FMADRING_NO_DATA: i32 = -2;
pub const FMADRING_ERROR_NULL_POINTER: i32 = -3;
pub const FMADRING_ERROR_INVALID_ARG: i32 = -4;
pub const FMADRING_ERROR_TIMEOUT: i32 = -5;
pub const FMADRING_ERROR_TOO_LARGE: i32 = -6;
pub const FMADRING_ERROR_INTERNAL: i32 = -7;

/// Handle to a producer instance (opaque pointer)
pub struct ProducerHandle {
    inner: RingProducer,
}

/// Handle to a consumer instance (opaque pointer)
pub struct ConsumerHandle {
    inner: RingConsumer,
}

unsafe fn path_from_c(path: *const c_char) -> Option<PathBuf> {
    if path.is_null() {
        return None;
    }
    let bytes = CStr::from_ptr(path).to_bytes();
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        Some(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
    }
    #[cfg(not(unix))]
    {
        Some(PathBuf::from(String::from_utf8_lossy(bytes).into_owned()))
    }
}

/// Integrity failures abort, matching the assert behaviour C callers expect.
fn open_failed(what: &str, err: RingError) {
    log::error!("fmadring: failed to open {}: {}", what, err);
    if err.is_fatal() {
        std::process::abort();
    }
}

fn error_code(err: &RingError) -> i32 {
    match err {
        RingError::BackpressureTimeout { .. } => FMADRING_ERROR_TIMEOUT,
        RingError::PayloadTooLarge { .. } => FMADRING_ERROR_TOO_LARGE,
        RingError::BufferTooSmall { .. } | RingError::Config(_) => FMADRING_ERROR_INVALID_ARG,
        RingError::Integrity { .. } => {
            log::error!("fmadring: {}", err);
            std::process::abort();
        }
        RingError::Io { .. } => FMADRING_ERROR_INTERNAL,
    }
}

// -----------------------------------------------------------------------------
// Producer API
// -----------------------------------------------------------------------------

/// Attach as producer, creating the ring file if needed.
///
/// # Arguments
/// * `path` - NUL-terminated ring file path.
/// * `reset` - Reinitialise the ring even if it looks valid.
/// * `flow_control` - Fail sends that cannot get a slot within `timeout_ns`.
///
/// # Returns
/// * Pointer to `ProducerHandle`, or NULL on failure.
#[no_mangle]
pub unsafe extern "C" fn fmadring_producer_open(
    path: *const c_char,
    reset: bool,
    flow_control: bool,
    timeout_ns: u64,
) -> *mut ProducerHandle {
    let Some(path) = path_from_c(path) else {
        return ptr::null_mut();
    };

    match RingBuilder::new(&path)
        .with_reset(reset)
        .with_flow_control(flow_control, Duration::from_nanos(timeout_ns))
        .build_producer()
    {
        Ok(producer) => Box::into_raw(Box::new(ProducerHandle { inner: producer })),
        Err(e) => {
            open_failed("producer", e);
            ptr::null_mut()
        }
    }
}

/// Send one packet of `length_capture` bytes.
///
/// # Returns
/// * Bytes written, or a negative error code.
#[no_mangle]
pub unsafe extern "C" fn fmadring_producer_send(
    handle: *mut ProducerHandle,
    timestamp_ns: u64,
    length_wire: u32,
    length_capture: u32,
    port: u32,
    payload: *const u8,
) -> i32 {
    if handle.is_null() || (payload.is_null() && length_capture > 0) {
        return FMADRING_ERROR_NULL_POINTER;
    }
    if length_wire > u16::MAX as u32 || port > u8::MAX as u32 {
        return FMADRING_ERROR_INVALID_ARG;
    }

    let producer = &mut (*handle).inner;
    let data: &[u8] = if length_capture == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(payload, length_capture as usize)
    };

    match producer.send(timestamp_ns, length_wire as u16, port as u8, data) {
        Ok(n) => n as i32,
        Err(e) => error_code(&e),
    }
}

/// Send the end-of-stream marker.
#[no_mangle]
pub unsafe extern "C" fn fmadring_producer_send_eof(
    handle: *mut ProducerHandle,
    timestamp_ns: u64,
) -> i32 {
    if handle.is_null() {
        return FMADRING_ERROR_NULL_POINTER;
    }
    match (*handle).inner.send_end_of_stream(timestamp_ns) {
        Ok(()) => 0,
        Err(e) => error_code(&e),
    }
}

/// Free a producer handle.
#[no_mangle]
pub unsafe extern "C" fn fmadring_producer_free(handle: *mut ProducerHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

// -----------------------------------------------------------------------------
// Consumer API
// -----------------------------------------------------------------------------

/// Attach as consumer. Records already queued are skipped.
///
/// # Returns
/// * Pointer to `ConsumerHandle`, or NULL on failure.
#[no_mangle]
pub unsafe extern "C" fn fmadring_consumer_open(
    path: *const c_char,
    wait: bool,
) -> *mut ConsumerHandle {
    let Some(path) = path_from_c(path) else {
        return ptr::null_mut();
    };

    match RingBuilder::new(&path).with_wait_for_data(wait).build_consumer() {
        Ok(consumer) => Box::into_raw(Box::new(ConsumerHandle { inner: consumer })),
        Err(e) => {
            open_failed("consumer", e);
            ptr::null_mut()
        }
    }
}

/// Receive one packet.
///
/// Any of the out pointers other than `payload` may be NULL.
///
/// # Returns
/// * Payload bytes copied (>= 0).
/// * `FMADRING_END_OF_STREAM` when the producer closed the stream.
/// * `FMADRING_NO_DATA` if `wait` is false and the ring is empty.
/// * `FMADRING_ERROR_INVALID_ARG` if `payload_len` is too small; the packet stays queued.
#[no_mangle]
pub unsafe extern "C" fn fmadring_consumer_recv(
    handle: *mut ConsumerHandle,
    wait: bool,
    timestamp_ns: *mut u64,
    length_wire: *mut u32,
    length_capture: *mut u32,
    port: *mut u32,
    payload: *mut u8,
    payload_len: usize,
) -> i32 {
    if handle.is_null() || (payload.is_null() && payload_len > 0) {
        return FMADRING_ERROR_NULL_POINTER;
    }

    let consumer = &mut (*handle).inner;
    let buf: &mut [u8] = if payload_len == 0 {
        &mut []
    } else {
        std::slice::from_raw_parts_mut(payload, payload_len)
    };

    match consumer.receive_with(wait, buf) {
        Ok(Received::Packet(info)) => {
            if !timestamp_ns.is_null() {
                *timestamp_ns = info.timestamp_ns;
            }
            if !length_wire.is_null() {
                *length_wire = info.length_wire as u32;
            }
            if !length_capture.is_null() {
                *length_capture = info.length_capture as u32;
            }
            if !port.is_null() {
                *port = info.port as u32;
            }
            info.length_capture as i32
        }
        Ok(Received::NoData) => FMADRING_NO_DATA,
        Ok(Received::EndOfStream { timestamp_ns: ts }) => {
            if !timestamp_ns.is_null() {
                *timestamp_ns = ts;
            }
            FMADRING_END_OF_STREAM
        }
        Err(e) => error_code(&e),
    }
}

/// Free a consumer handle.
#[no_mangle]
pub unsafe extern "C" fn fmadring_consumer_free(handle: *mut ConsumerHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}
