// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
C ABI.

Every object is an opaque `uint64_t` handle; `0` is null. Handles are checked on every call, so
a released, forged or wrong-kind handle makes the call do nothing and return its null value
instead of reaching freed memory.

Conventions:

* Constructors return `0` on failure. Those that can fail with a diagnostic take an optional
  `char **` out-parameter, which receives a string the caller frees with [kq_string_free].
* Name queries return strings the caller frees with [kq_string_free].
* Each `kq_*_release` invalidates one handle. The object itself lives on while other objects
  still use it.

[header::c_header] returns the matching C header.
*/
mod handles;
pub mod header;

use crate::buffer::{Buffer, StorageMode};
use crate::command_buffer::{CommandBuffer, Status};
use crate::command_queue::CommandQueue;
use crate::device::Device;
use crate::error::Error;
use crate::imp::EntryPoint;
use crate::pipeline::PipelineState;
use crate::shader::{Function, Library};
use handles::{Kind, Object, table};
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;

fn insert(object: Object) -> u64 {
    table().insert(object)
}

/// Runs `f` on the object behind `handle` with the table locked.
fn lookup<T>(handle: u64, f: impl FnOnce(&mut Object) -> Option<T>) -> Option<T> {
    let mut table = table();
    f(table.get_mut(handle)?)
}

fn release(handle: u64, kind: Kind) {
    let object = table().remove(handle, kind);
    if object.is_none() && handle != 0 {
        logwise::warn_sync!(
            "release of an invalid {kind} handle",
            kind = logwise::privacy::LogIt(&kind)
        );
    }
    //dropped outside the lock
    drop(object);
}

fn device(handle: u64) -> Option<Device> {
    lookup(handle, |o| match o {
        Object::Device(d) => Some(d.clone()),
        _ => None,
    })
}

fn command_queue(handle: u64) -> Option<CommandQueue> {
    lookup(handle, |o| match o {
        Object::CommandQueue(q) => Some(q.clone()),
        _ => None,
    })
}

fn buffer(handle: u64) -> Option<Buffer> {
    lookup(handle, |o| match o {
        Object::Buffer(b) => Some(b.clone()),
        _ => None,
    })
}

fn library(handle: u64) -> Option<Library> {
    lookup(handle, |o| match o {
        Object::Library(l) => Some(l.clone()),
        _ => None,
    })
}

fn function(handle: u64) -> Option<Function> {
    lookup(handle, |o| match o {
        Object::Function(f) => Some(f.clone()),
        _ => None,
    })
}

fn pipeline(handle: u64) -> Option<PipelineState> {
    lookup(handle, |o| match o {
        Object::Pipeline(p) => Some(p.clone()),
        _ => None,
    })
}

fn command_buffer(handle: u64) -> Option<CommandBuffer> {
    lookup(handle, |o| match o {
        Object::CommandBuffer(c) => Some(c.clone()),
        _ => None,
    })
}

/// Runs `f` on an open encoder.
fn with_encoder(handle: u64, f: impl FnOnce(&mut crate::encoder::ComputeEncoder)) {
    let found = lookup(handle, |o| match o {
        Object::Encoder(Some(e)) => {
            f(e);
            Some(())
        }
        _ => None,
    });
    if found.is_none() {
        logwise::warn_sync!("encoder call on an invalid or ended encoder");
    }
}

fn to_c_string(s: &str) -> *mut c_char {
    match CString::new(s.replace('\0', "\u{FFFD}")) {
        Ok(c) => c.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// # Safety
///
/// `out` must be null or valid for a pointer-sized write.
unsafe fn write_out(out: *mut *mut c_char, message: Option<&str>) {
    if out.is_null() {
        return;
    }
    let value = message.map(to_c_string).unwrap_or(ptr::null_mut());
    unsafe {
        *out = value;
    }
}

/// # Safety
///
/// `s` must be null or a valid nul-terminated string.
unsafe fn str_arg<'a>(s: *const c_char, name: &'static str) -> Result<&'a str, Error> {
    if s.is_null() {
        return Err(Error::NullArgument(name));
    }
    unsafe { CStr::from_ptr(s) }
        .to_str()
        .map_err(|_| Error::InvalidUtf8(name))
}

/// Creates the process-wide backend instance. Returns 1.
#[unsafe(no_mangle)]
pub extern "C" fn kq_init() -> c_int {
    let _ = EntryPoint::shared();
    1
}

/// Releases every live handle.
#[unsafe(no_mangle)]
pub extern "C" fn kq_cleanup() {
    let objects = table().drain();
    if !objects.is_empty() {
        logwise::info_sync!(
            "kq_cleanup released {count} handles",
            count = objects.len()
        );
    }
    drop(objects);
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_create_default_device() -> u64 {
    Device::create_default()
        .map(|d| insert(Object::Device(d)))
        .unwrap_or(0)
}

/// The adapter name, freed with [kq_string_free].
#[unsafe(no_mangle)]
pub extern "C" fn kq_device_name(device_handle: u64) -> *mut c_char {
    device(device_handle)
        .map(|d| to_c_string(&d.name()))
        .unwrap_or(ptr::null_mut())
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_device_max_threads_per_threadgroup(device_handle: u64) -> u32 {
    device(device_handle)
        .map(|d| d.max_threads_per_threadgroup())
        .unwrap_or(0)
}

/// The alignment buffer offsets must have, or 0 for an invalid handle.
#[unsafe(no_mangle)]
pub extern "C" fn kq_device_min_buffer_offset_alignment(device_handle: u64) -> u64 {
    device(device_handle)
        .map(|d| d.min_buffer_offset_alignment() as u64)
        .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_device_release(device_handle: u64) {
    release(device_handle, Kind::Device)
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_device_create_command_queue(device_handle: u64) -> u64 {
    device(device_handle)
        .map(|d| insert(Object::CommandQueue(d.new_command_queue())))
        .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_command_queue_release(queue_handle: u64) {
    release(queue_handle, Kind::CommandQueue)
}

/// `storage_mode`: 0 Shared, 1 Managed, 2 Private, 3 Memoryless. Anything else returns 0.
#[unsafe(no_mangle)]
pub extern "C" fn kq_device_create_buffer(device_handle: u64, length: u64, storage_mode: u32) -> u64 {
    let mode = match StorageMode::try_from(storage_mode) {
        Ok(mode) => mode,
        Err(e) => {
            logwise::warn_sync!(
                "kq_device_create_buffer: {e}",
                e = logwise::privacy::LogIt(&e)
            );
            return 0;
        }
    };
    let Ok(length) = usize::try_from(length) else {
        return 0;
    };
    device(device_handle)
        .and_then(|d| d.new_buffer(length, mode))
        .map(|b| insert(Object::Buffer(b)))
        .unwrap_or(0)
}

/// The CPU view of the buffer, or null for GPU-only storage modes.
///
/// Valid until the buffer is released and no command buffer uses it.
#[unsafe(no_mangle)]
pub extern "C" fn kq_buffer_contents(buffer_handle: u64) -> *mut c_void {
    buffer(buffer_handle)
        .and_then(|b| b.contents())
        .map(|p| p.as_ptr().cast::<c_void>())
        .unwrap_or(ptr::null_mut())
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_buffer_length(buffer_handle: u64) -> u64 {
    buffer(buffer_handle).map(|b| b.length() as u64).unwrap_or(0)
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_buffer_did_modify_range(buffer_handle: u64, start: u64, length: u64) {
    if let Some(b) = buffer(buffer_handle) {
        let start = usize::try_from(start).unwrap_or(usize::MAX);
        let length = usize::try_from(length).unwrap_or(usize::MAX);
        b.mark_modified(start, length);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_buffer_release(buffer_handle: u64) {
    release(buffer_handle, Kind::Buffer)
}

/// Compiles WGSL source.
///
/// On failure returns 0 and, if `error_out` is non-null, stores the compiler diagnostic there.
/// On success stores null.
///
/// # Safety
///
/// `source` must be null or a valid nul-terminated string. `error_out` must be null or valid
/// for a pointer-sized write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kq_device_create_library(
    device_handle: u64,
    source: *const c_char,
    error_out: *mut *mut c_char,
) -> u64 {
    let result = match (device(device_handle), unsafe { str_arg(source, "source") }) {
        (None, _) => Err(Error::NullArgument("device")),
        (_, Err(e)) => Err(e),
        (Some(d), Ok(source)) => d.new_library(source).map_err(Error::from),
    };
    match result {
        Ok(library) => {
            unsafe { write_out(error_out, None) };
            insert(Object::Library(library))
        }
        Err(e) => {
            unsafe { write_out(error_out, Some(&e.to_string())) };
            0
        }
    }
}

/// Looks up an entry point by exact name. Returns 0 if there is none.
///
/// # Safety
///
/// `name` must be null or a valid nul-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kq_library_function(library_handle: u64, name: *const c_char) -> u64 {
    let name = match unsafe { str_arg(name, "name") } {
        Ok(name) => name,
        Err(e) => {
            logwise::warn_sync!("kq_library_function: {e}", e = logwise::privacy::LogIt(&e));
            return 0;
        }
    };
    library(library_handle)
        .and_then(|l| l.function(name))
        .map(|f| insert(Object::Function(f)))
        .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_library_release(library_handle: u64) {
    release(library_handle, Kind::Library)
}

/// The entry point name, freed with [kq_string_free].
#[unsafe(no_mangle)]
pub extern "C" fn kq_function_name(function_handle: u64) -> *mut c_char {
    function(function_handle)
        .map(|f| to_c_string(f.name()))
        .unwrap_or(ptr::null_mut())
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_function_release(function_handle: u64) {
    release(function_handle, Kind::Function)
}

/// Builds a compute pipeline, with the same error convention as [kq_device_create_library].
///
/// # Safety
///
/// `error_out` must be null or valid for a pointer-sized write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kq_device_create_compute_pipeline(
    device_handle: u64,
    function_handle: u64,
    error_out: *mut *mut c_char,
) -> u64 {
    let result = match (device(device_handle), function(function_handle)) {
        (None, _) => Err(Error::NullArgument("device")),
        (_, None) => Err(Error::NullArgument("function")),
        (Some(d), Some(f)) => d.new_compute_pipeline(&f).map_err(Error::from),
    };
    match result {
        Ok(pipeline) => {
            unsafe { write_out(error_out, None) };
            insert(Object::Pipeline(pipeline))
        }
        Err(e) => {
            unsafe { write_out(error_out, Some(&e.to_string())) };
            0
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_pipeline_max_total_threads_per_threadgroup(pipeline_handle: u64) -> u32 {
    pipeline(pipeline_handle)
        .map(|p| p.max_total_threads_per_threadgroup())
        .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_pipeline_release(pipeline_handle: u64) {
    release(pipeline_handle, Kind::Pipeline)
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_command_queue_command_buffer(queue_handle: u64) -> u64 {
    command_queue(queue_handle)
        .map(|q| insert(Object::CommandBuffer(q.command_buffer())))
        .unwrap_or(0)
}

/// Returns 0 while another encoder is open on the command buffer, or after commit.
#[unsafe(no_mangle)]
pub extern "C" fn kq_command_buffer_compute_encoder(command_buffer_handle: u64) -> u64 {
    command_buffer(command_buffer_handle)
        .and_then(|c| c.compute_encoder())
        .map(|e| insert(Object::Encoder(Some(e))))
        .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_encoder_set_pipeline(encoder_handle: u64, pipeline_handle: u64) {
    match pipeline(pipeline_handle) {
        Some(p) => with_encoder(encoder_handle, |e| e.set_pipeline(&p)),
        None => logwise::warn_sync!("kq_encoder_set_pipeline: invalid pipeline"),
    }
}

/// Binds a buffer from `offset` to its end.
///
/// `offset` must be a multiple of [kq_device_min_buffer_offset_alignment] and leave at least one
/// byte, or the dispatch that uses the binding faults the command buffer.
#[unsafe(no_mangle)]
pub extern "C" fn kq_encoder_set_buffer(encoder_handle: u64, buffer_handle: u64, offset: u64, index: u32) {
    match buffer(buffer_handle) {
        Some(b) => {
            let offset = usize::try_from(offset).unwrap_or(usize::MAX);
            with_encoder(encoder_handle, |e| e.set_buffer(&b, offset, index))
        }
        None => logwise::warn_sync!("kq_encoder_set_buffer: invalid buffer"),
    }
}

/// Binds a copy of `length` bytes at `bytes`.
///
/// # Safety
///
/// `bytes` must be valid for reads of `length` bytes, or null when `length` is 0.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kq_encoder_set_bytes(
    encoder_handle: u64,
    bytes: *const c_void,
    length: u64,
    index: u32,
) {
    let slice: &[u8] = if length == 0 {
        &[]
    } else if bytes.is_null() {
        logwise::warn_sync!("kq_encoder_set_bytes: null bytes");
        return;
    } else {
        let Ok(length) = usize::try_from(length) else {
            return;
        };
        unsafe { std::slice::from_raw_parts(bytes.cast::<u8>(), length) }
    };
    with_encoder(encoder_handle, |e| e.set_bytes(slice, index))
}

/// Dispatches `width` x `height` x `depth` threads.
#[unsafe(no_mangle)]
pub extern "C" fn kq_encoder_dispatch(encoder_handle: u64, width: u32, height: u32, depth: u32) {
    with_encoder(encoder_handle, |e| e.dispatch(width, height, depth))
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_encoder_dispatch_threadgroups(encoder_handle: u64, x: u32, y: u32, z: u32) {
    with_encoder(encoder_handle, |e| e.dispatch_threadgroups(x, y, z))
}

/// Ends encoding. The handle stays valid until [kq_encoder_release] but accepts no more calls.
#[unsafe(no_mangle)]
pub extern "C" fn kq_encoder_end_encoding(encoder_handle: u64) {
    let encoder = lookup(encoder_handle, |o| match o {
        Object::Encoder(e) => e.take(),
        _ => None,
    });
    match encoder {
        Some(e) => e.end_encoding(),
        None => logwise::warn_sync!("kq_encoder_end_encoding: invalid or ended encoder"),
    }
}

/// Releasing an encoder that was never ended faults its command buffer.
#[unsafe(no_mangle)]
pub extern "C" fn kq_encoder_release(encoder_handle: u64) {
    release(encoder_handle, Kind::Encoder)
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_command_buffer_commit(command_buffer_handle: u64) {
    if let Some(c) = command_buffer(command_buffer_handle) {
        c.commit();
    }
}

/// Opaque caller context, carried to the thread that runs the callback.
struct Context(*mut c_void);

// The caller promises the context may be used from the completion thread.
unsafe impl Send for Context {}

impl Context {
    fn into_inner(self) -> *mut c_void {
        self.0
    }
}

/// Commits, and calls `callback(context, status)` exactly once from the completion thread.
///
/// A null callback behaves like [kq_command_buffer_commit].
///
/// # Safety
///
/// `context` must stay valid until the callback runs, and must be usable from another thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kq_command_buffer_commit_with_callback(
    command_buffer_handle: u64,
    callback: Option<extern "C" fn(*mut c_void, u32)>,
    context: *mut c_void,
) {
    let Some(c) = command_buffer(command_buffer_handle) else {
        return;
    };
    match callback {
        Some(callback) => {
            let context = Context(context);
            c.commit_with_callback(move |status| callback(context.into_inner(), status as u32));
        }
        None => c.commit(),
    }
}

/// Blocks until the command buffer is terminal and returns its status code.
///
/// Returns 0 right away for a command buffer that was never committed, and 4 for an invalid
/// handle.
#[unsafe(no_mangle)]
pub extern "C" fn kq_command_buffer_wait_until_completed(command_buffer_handle: u64) -> u32 {
    //cloned out so the table isn't locked while we block
    command_buffer(command_buffer_handle)
        .map(|c| c.wait_until_completed())
        .unwrap_or(Status::Error) as u32
}

/// The status code, or 4 for an invalid handle.
#[unsafe(no_mangle)]
pub extern "C" fn kq_command_buffer_status(command_buffer_handle: u64) -> u32 {
    command_buffer(command_buffer_handle)
        .map(|c| c.status())
        .unwrap_or(Status::Error) as u32
}

#[unsafe(no_mangle)]
pub extern "C" fn kq_command_buffer_release(command_buffer_handle: u64) {
    release(command_buffer_handle, Kind::CommandBuffer)
}

/// Frees a string returned by this library.
///
/// # Safety
///
/// `s` must be null or a string returned by this library that was not already freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kq_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(s) });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handles_are_inert() {
        assert!(kq_device_name(0).is_null());
        assert_eq!(kq_device_create_command_queue(0), 0);
        assert_eq!(kq_device_create_buffer(0, 16, 0), 0);
        assert_eq!(kq_buffer_length(0), 0);
        assert!(kq_buffer_contents(0).is_null());
        assert!(kq_function_name(0).is_null());
        assert_eq!(kq_command_queue_command_buffer(0), 0);
        assert_eq!(kq_command_buffer_compute_encoder(0), 0);
        assert_eq!(kq_command_buffer_status(0), Status::Error as u32);
        assert_eq!(kq_command_buffer_wait_until_completed(0), Status::Error as u32);
        kq_encoder_dispatch(0, 1, 1, 1);
        kq_encoder_end_encoding(0);
        kq_command_buffer_commit(0);
        kq_buffer_did_modify_range(0, 0, 4);
        kq_device_release(0);
        kq_buffer_release(0);
        kq_encoder_release(0);
    }

    #[test]
    fn made_up_handles_are_inert() {
        let forged = 0x0300_0001_0000_0007;
        assert_eq!(kq_buffer_length(forged), 0);
        assert!(kq_buffer_contents(forged).is_null());
        kq_buffer_release(forged);
        kq_device_release(u64::MAX);
    }

    #[test]
    fn unknown_storage_mode_fails_before_the_device() {
        assert_eq!(kq_device_create_buffer(0, 16, 4), 0);
        assert_eq!(kq_device_create_buffer(0, 16, u32::MAX), 0);
    }

    #[test]
    fn library_errors_are_reported() {
        let source = CString::new("fn main() {}").unwrap();
        let mut error: *mut c_char = ptr::null_mut();
        let library = unsafe { kq_device_create_library(0, source.as_ptr(), &mut error) };
        assert_eq!(library, 0);
        assert!(!error.is_null());
        let message = unsafe { CStr::from_ptr(error) }.to_str().unwrap().to_string();
        assert!(message.contains("device"), "{message}");
        unsafe { kq_string_free(error) };

        //a null out-parameter is allowed
        assert_eq!(
            unsafe { kq_device_create_library(0, ptr::null(), ptr::null_mut()) },
            0
        );
        assert_eq!(unsafe { kq_library_function(0, ptr::null()) }, 0);
        unsafe { kq_string_free(ptr::null_mut()) };
    }

    #[test]
    fn bad_strings_are_told_apart_from_null_ones() {
        let invalid = b"\xff\xfe\0";
        let err = unsafe { str_arg(invalid.as_ptr().cast(), "source") }.unwrap_err();
        assert!(matches!(err, Error::InvalidUtf8("source")));
        assert!(err.to_string().contains("UTF-8"), "{err}");
        let err = unsafe { str_arg(ptr::null(), "source") }.unwrap_err();
        assert!(matches!(err, Error::NullArgument("source")));
        let valid = CString::new("fill").unwrap();
        assert_eq!(unsafe { str_arg(valid.as_ptr(), "name") }.unwrap(), "fill");
        assert_eq!(unsafe { kq_library_function(0, invalid.as_ptr().cast()) }, 0);
    }

    #[test]
    fn c_strings_survive_interior_nuls() {
        let s = to_c_string("a\0b");
        assert!(!s.is_null());
        let back = unsafe { CString::from_raw(s) };
        assert_eq!(back.to_str().unwrap(), "a\u{FFFD}b");
    }
}
