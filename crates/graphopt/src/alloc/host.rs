use std::alloc::{self, Layout};
use std::any::Any;
use std::mem;
use std::ptr::NonNull;

use anyhow::anyhow;

use super::{AllocError, AllocatorImpl};

/// Alignment the platform allocator guarantees without an explicit request.
pub const NATURAL_ALIGNMENT: usize = 2 * mem::size_of::<usize>();

/// Built-in allocator serving host memory from the global Rust allocator.
///
/// Stateless, so any two instances are interchangeable. Returned memory is zero-filled.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostAllocator;

impl HostAllocator {
    fn layout(bytes: usize, alignment: usize) -> anyhow::Result<Layout> {
        let align = if alignment == NATURAL_ALIGNMENT {
            NATURAL_ALIGNMENT
        } else {
            if !alignment.is_power_of_two() {
                return Err(AllocError::InvalidAlignment { alignment }.into());
            }
            alignment.max(mem::size_of::<*const u8>())
        };
        // Zero-sized layouts are not allowed by the global allocator.
        Layout::from_size_align(bytes.max(1), align)
            .map_err(|err| anyhow!("invalid layout for {bytes} bytes: {err}"))
    }
}

impl AllocatorImpl for HostAllocator {
    fn allocate(&self, bytes: usize, alignment: usize) -> anyhow::Result<NonNull<u8>> {
        let layout = Self::layout(bytes, alignment)?;
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| {
            anyhow!(
                "host allocation of {} bytes aligned to {} failed",
                layout.size(),
                layout.align()
            )
        })
    }

    fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, alignment: usize) -> anyhow::Result<()> {
        let layout = Self::layout(bytes, alignment)?;
        // SAFETY: the caller hands back a pointer obtained from `allocate` with the same
        // `(bytes, alignment)`, so `layout` matches the one used to allocate.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        Ok(())
    }

    fn is_equal(&self, other: &dyn AllocatorImpl) -> bool {
        other.as_any().is::<HostAllocator>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
