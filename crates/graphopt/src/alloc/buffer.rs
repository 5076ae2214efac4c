use std::fmt;
use std::ptr::NonNull;

use super::{AllocError, Allocator};

/// Byte storage obtained through [`request_buffer`].
///
/// The buffer holds a clone of the allocator handle it came from, which keeps the
/// implementation alive until the memory is returned.
pub struct Buffer {
    ptr: NonNull<u8>,
    bytes: usize,
    alignment: usize,
    allocator: Allocator,
    released: bool,
}

// SAFETY: a `Buffer` exclusively owns its allocation, mutable access goes through `&mut self`,
// and allocator implementations are required to be `Send + Sync`.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

/// Requests `bytes` of zero-filled storage aligned to `alignment` from `allocator`.
pub fn request_buffer(
    allocator: &Allocator,
    bytes: usize,
    alignment: usize,
) -> Result<Buffer, AllocError> {
    let ptr = allocator.allocate(bytes, alignment)?;
    // SAFETY: the allocator returned a region of at least `bytes` bytes.
    unsafe { ptr.as_ptr().write_bytes(0, bytes) };
    Ok(Buffer {
        ptr,
        bytes,
        alignment,
        allocator: allocator.clone(),
        released: false,
    })
}

/// Returns the storage of `buffer` to the allocator it was requested from.
pub fn release_buffer(mut buffer: Buffer) -> Result<(), AllocError> {
    buffer.release()
}

impl Buffer {
    pub fn len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the region is `bytes` long, initialized in `request_buffer` and owned by `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.bytes) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `as_bytes`, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.bytes) }
    }

    fn release(&mut self) -> Result<(), AllocError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.allocator
            .deallocate(self.ptr, self.bytes, self.alignment)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!(
                "failed to release {} byte buffer aligned to {}: {err}",
                self.bytes,
                self.alignment
            );
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("ptr", &self.ptr)
            .field("bytes", &self.bytes)
            .field("alignment", &self.alignment)
            .finish()
    }
}
