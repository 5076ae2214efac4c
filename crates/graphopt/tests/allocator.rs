use std::any::Any;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::anyhow;
use graphopt::alloc::{
    release_buffer, request_buffer, AllocError, Allocator, AllocatorImpl, HostAllocator,
    NATURAL_ALIGNMENT,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct FailingAllocator;

impl AllocatorImpl for FailingAllocator {
    fn allocate(&self, bytes: usize, _alignment: usize) -> anyhow::Result<NonNull<u8>> {
        Err(anyhow!("device out of memory ({bytes} bytes)"))
    }

    fn deallocate(&self, _ptr: NonNull<u8>, _bytes: usize, _alignment: usize) -> anyhow::Result<()> {
        Err(anyhow!("double free"))
    }

    fn is_equal(&self, _other: &dyn AllocatorImpl) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct PanickingAllocator;

impl AllocatorImpl for PanickingAllocator {
    fn allocate(&self, _bytes: usize, _alignment: usize) -> anyhow::Result<NonNull<u8>> {
        panic!("driver crashed");
    }

    fn deallocate(&self, _ptr: NonNull<u8>, _bytes: usize, _alignment: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_equal(&self, _other: &dyn AllocatorImpl) -> bool {
        panic!("comparison crashed");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Host-backed allocator that counts live allocations.
#[derive(Default)]
struct CountingAllocator {
    live: AtomicUsize,
}

impl AllocatorImpl for CountingAllocator {
    fn allocate(&self, bytes: usize, alignment: usize) -> anyhow::Result<NonNull<u8>> {
        let ptr = HostAllocator.allocate(bytes, alignment)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, alignment: usize) -> anyhow::Result<()> {
        HostAllocator.deallocate(ptr, bytes, alignment)?;
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_equal(&self, other: &dyn AllocatorImpl) -> bool {
        std::ptr::eq(
            self as *const Self as *const u8,
            other.as_any() as *const dyn Any as *const u8,
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn default_allocator_honours_power_of_two_alignments() {
    let allocator = Allocator::default();
    for alignment in [1usize, 2, 4, 8, 16, 32, 64, 128, 4096] {
        for bytes in [0usize, 1, 7, 64, 1000] {
            let ptr = allocator
                .allocate(bytes, alignment)
                .expect("power-of-two alignment must succeed");
            assert_eq!(ptr.as_ptr() as usize % alignment, 0, "align {alignment}");
            allocator
                .deallocate(ptr, bytes, alignment)
                .expect("deallocate with the same triple must succeed");
        }
    }
}

#[test]
fn natural_alignment_uses_plain_allocation() {
    let allocator = Allocator::default();
    let ptr = allocator.allocate(24, NATURAL_ALIGNMENT).unwrap();
    assert_eq!(ptr.as_ptr() as usize % NATURAL_ALIGNMENT, 0);
    allocator.deallocate(ptr, 24, NATURAL_ALIGNMENT).unwrap();
}

#[test]
fn non_power_of_two_alignment_is_rejected() {
    let allocator = Allocator::default();
    assert_eq!(
        allocator.allocate(16, 3),
        Err(AllocError::InvalidAlignment { alignment: 3 })
    );
    assert_eq!(
        allocator.allocate(16, 0),
        Err(AllocError::InvalidAlignment { alignment: 0 })
    );
}

#[test]
fn default_handles_compare_equal() {
    let a = Allocator::default();
    let b = Allocator::default();
    assert_eq!(a.equals(&b), Ok(true));
    assert_eq!(a.equals(&a.clone()), Ok(true));
}

#[test]
fn shared_instance_is_equal_without_delegation() {
    // The implementation panics on comparison, so equality must come from the fast path.
    let a = Allocator::new(PanickingAllocator);
    let b = a.clone();
    assert_eq!(a.equals(&b), Ok(true));
}

#[test]
fn distinct_instances_delegate_equality() {
    init_logging();
    let a = Allocator::new(CountingAllocator::default());
    let b = Allocator::new(CountingAllocator::default());
    assert_eq!(a.equals(&b), Ok(false));
    assert_eq!(a.equals(&Allocator::default()), Ok(false));
    assert_eq!(Allocator::default().equals(&a), Ok(false));

    let c = Allocator::new(PanickingAllocator);
    let d = Allocator::new(PanickingAllocator);
    assert_eq!(c.equals(&d), Err(AllocError::UnexpectedFailure));
}

#[test]
fn empty_handle_fails_every_operation() {
    let empty = Allocator::empty();
    assert!(!empty.is_initialized());
    assert!(Allocator::default().is_initialized());

    assert_eq!(empty.allocate(8, 8), Err(AllocError::NotInitialized));
    assert_eq!(
        empty.deallocate(NonNull::dangling(), 8, 8),
        Err(AllocError::NotInitialized)
    );
    assert_eq!(
        empty.equals(&Allocator::default()),
        Err(AllocError::NotInitialized)
    );
    assert_eq!(
        Allocator::default().equals(&empty),
        Err(AllocError::NotInitialized)
    );
    assert_eq!(
        request_buffer(&empty, 8, 8).err(),
        Some(AllocError::NotInitialized)
    );
}

#[test]
fn implementation_errors_are_normalized() {
    init_logging();
    let allocator = Allocator::new(FailingAllocator);
    match allocator.allocate(32, 8) {
        Err(AllocError::AllocationFailure { message }) => {
            assert!(message.contains("device out of memory"), "{message}");
        }
        other => panic!("expected AllocationFailure, got {other:?}"),
    }
    match allocator.deallocate(NonNull::dangling(), 32, 8) {
        Err(AllocError::AllocationFailure { message }) => assert!(message.contains("double free")),
        other => panic!("expected AllocationFailure, got {other:?}"),
    }
}

#[test]
fn panics_become_unexpected_failure() {
    init_logging();
    let allocator = Allocator::new(PanickingAllocator);
    assert_eq!(allocator.allocate(8, 8), Err(AllocError::UnexpectedFailure));
}

#[test]
fn keepalive_copy_shares_the_implementation() {
    let marker: Arc<dyn Any + Send + Sync> = Arc::new(String::from("module handle"));
    let base = Allocator::default();
    let pinned = Allocator::with_keepalive(&base, Arc::clone(&marker)).unwrap();
    assert!(pinned.is_initialized());
    assert_eq!(pinned.equals(&base), Ok(true));
    assert_eq!(Arc::strong_count(&marker), 2);
    drop(pinned);
    assert_eq!(Arc::strong_count(&marker), 1);

    assert_eq!(
        Allocator::with_keepalive(&Allocator::empty(), marker).err(),
        Some(AllocError::NotInitialized)
    );
}

#[test]
fn buffers_return_memory_to_their_allocator() {
    let counting = Arc::new(CountingAllocator::default());
    let allocator = Allocator::from_shared(counting.clone());

    let mut buffer = request_buffer(&allocator, 128, 64).unwrap();
    assert_eq!(buffer.len(), 128);
    assert_eq!(buffer.as_ptr() as usize % 64, 0);
    assert!(buffer.as_bytes().iter().all(|byte| *byte == 0));
    buffer.as_bytes_mut()[3] = 7;
    assert_eq!(buffer.as_bytes()[3], 7);
    assert_eq!(counting.live.load(Ordering::SeqCst), 1);

    release_buffer(buffer).unwrap();
    assert_eq!(counting.live.load(Ordering::SeqCst), 0);

    {
        let _dropped = request_buffer(&allocator, 16, 16).unwrap();
        assert_eq!(counting.live.load(Ordering::SeqCst), 1);
    }
    assert_eq!(counting.live.load(Ordering::SeqCst), 0);
}

#[test]
fn buffer_keeps_implementation_alive() {
    let counting = Arc::new(CountingAllocator::default());
    let buffer = {
        let allocator = Allocator::from_shared(counting.clone());
        request_buffer(&allocator, 8, 8).unwrap()
    };
    assert!(buffer.allocator().downcast_ref::<CountingAllocator>().is_some());
    drop(buffer);
    assert_eq!(Arc::strong_count(&counting), 1);
    assert_eq!(counting.live.load(Ordering::SeqCst), 0);
}

#[test]
fn allocator_is_shared_across_threads() {
    let counting = Arc::new(CountingAllocator::default());
    let allocator = Allocator::from_shared(counting.clone());

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let allocator = allocator.clone();
            thread::spawn(move || {
                for round in 0..64 {
                    let bytes = 16 * (worker + 1) + round;
                    let buffer = request_buffer(&allocator, bytes, 32).unwrap();
                    assert_eq!(buffer.len(), bytes);
                    release_buffer(buffer).unwrap();
                }
                allocator.equals(&allocator.clone()).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert_eq!(counting.live.load(Ordering::SeqCst), 0);
}
