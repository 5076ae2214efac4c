//! Type-erased memory allocators backing tensor and constant storage.
//!
//! An [`Allocator`] is a cheap, clonable handle over one shared [`AllocatorImpl`]. Every call
//! into the implementation goes through a single boundary that converts implementation errors
//! and panics into [`AllocError`], so callers never observe back-end specific failure types.

mod buffer;
mod host;

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Arc;

use thiserror::Error;

pub use buffer::{release_buffer, request_buffer, Buffer};
pub use host::{HostAllocator, NATURAL_ALIGNMENT};

/// Uniform error surface of every allocator handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("allocator was not initialized")]
    NotInitialized,
    #[error("alignment is not a power of 2: {alignment}")]
    InvalidAlignment { alignment: usize },
    #[error("allocation failed: {message}")]
    AllocationFailure { message: String },
    #[error("unexpected failure inside allocator implementation")]
    UnexpectedFailure,
}

/// Capability contract implemented by each memory back-end.
///
/// Implementations are shared between threads and graphs, so every method takes `&self` and
/// must be safe to call concurrently.
pub trait AllocatorImpl: Any + Send + Sync {
    fn allocate(&self, bytes: usize, alignment: usize) -> anyhow::Result<NonNull<u8>>;

    fn deallocate(&self, ptr: NonNull<u8>, bytes: usize, alignment: usize) -> anyhow::Result<()>;

    /// Reports whether memory allocated by `self` may be released through `other`.
    fn is_equal(&self, other: &dyn AllocatorImpl) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// Shared-ownership handle over a type-erased allocator implementation.
///
/// `Allocator::default()` binds the built-in [`HostAllocator`]. [`Allocator::empty`] produces a
/// handle with nothing bound; every operation on it fails with [`AllocError::NotInitialized`].
#[derive(Clone)]
pub struct Allocator {
    inner: Option<Arc<dyn AllocatorImpl>>,
    keepalive: Option<Arc<dyn Any + Send + Sync>>,
}

impl Allocator {
    pub fn new<A: AllocatorImpl>(implementation: A) -> Self {
        Self::from_shared(Arc::new(implementation))
    }

    pub fn from_shared(implementation: Arc<dyn AllocatorImpl>) -> Self {
        Self {
            inner: Some(implementation),
            keepalive: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            inner: None,
            keepalive: None,
        }
    }

    /// Copies `other` while pinning `keepalive` for as long as the new handle lives.
    ///
    /// Used when the implementation's code lives in a dynamically loaded module that must
    /// outlive every handle.
    pub fn with_keepalive(
        other: &Allocator,
        keepalive: Arc<dyn Any + Send + Sync>,
    ) -> Result<Self, AllocError> {
        let inner = other.implementation()?.clone();
        Ok(Self {
            inner: Some(inner),
            keepalive: Some(keepalive),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }

    pub fn allocate(&self, bytes: usize, alignment: usize) -> Result<NonNull<u8>, AllocError> {
        let implementation = self.implementation()?;
        guard(|| implementation.allocate(bytes, alignment))
    }

    pub fn deallocate(
        &self,
        ptr: NonNull<u8>,
        bytes: usize,
        alignment: usize,
    ) -> Result<(), AllocError> {
        let implementation = self.implementation()?;
        guard(|| implementation.deallocate(ptr, bytes, alignment))
    }

    /// Two handles are equal when they share one implementation instance, or when the
    /// implementations report themselves equal.
    pub fn equals(&self, other: &Allocator) -> Result<bool, AllocError> {
        let lhs = self.implementation()?;
        let rhs = other.implementation()?;
        if Arc::ptr_eq(lhs, rhs) {
            return Ok(true);
        }
        guard(|| Ok(lhs.is_equal(rhs.as_ref())))
    }

    /// Returns the bound implementation downcast to `A`, if it is one.
    pub fn downcast_ref<A: AllocatorImpl>(&self) -> Option<&A> {
        self.inner.as_ref()?.as_any().downcast_ref::<A>()
    }

    fn implementation(&self) -> Result<&Arc<dyn AllocatorImpl>, AllocError> {
        self.inner.as_ref().ok_or(AllocError::NotInitialized)
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(HostAllocator)
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("initialized", &self.is_initialized())
            .field("pinned", &self.keepalive.is_some())
            .finish()
    }
}

/// Runs one call into an implementation, normalizing whatever it raises.
///
/// `AllocError`s raised by the implementation keep their kind, any other error becomes
/// `AllocationFailure` with its message, and a panic becomes `UnexpectedFailure`.
fn guard<T>(call: impl FnOnce() -> anyhow::Result<T>) -> Result<T, AllocError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => match err.downcast::<AllocError>() {
            Ok(kind) => Err(kind),
            Err(err) => Err(AllocError::AllocationFailure {
                message: format!("{err:#}"),
            }),
        },
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            log::error!("allocator implementation panicked: {detail}");
            Err(AllocError::UnexpectedFailure)
        }
    }
}
