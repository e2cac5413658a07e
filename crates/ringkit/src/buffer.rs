//! Byte-region abstraction with plain, volatile, ordered, and atomic access.
//!
//! Every higher-level structure in this crate (rings, broadcast, trailers) is
//! a layout imposed on one of these regions. The trait maps Java-style access
//! modes onto the C11 orderings the implementations actually need:
//!
//! - plain `get`/`put`        → `Relaxed` (single-writer counters, caches)
//! - `get_*_volatile`         → `Acquire` (observe a publication)
//! - `put_*_ordered`          → `Release` (publish)
//! - `put_*_volatile`         → `SeqCst`
//! - `compare_and_set_i64`    → `AcqRel` on success, `Acquire` on failure
//!
//! Scalar accesses must be aligned to the scalar size. Offsets are validated
//! with debug assertions only; release builds trust the callers, which derive
//! every offset from a capacity check performed at construction.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI16, AtomicI32, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::bits::CACHE_LINE_LENGTH;
use crate::error::{Error, Result};

/// Required start-address alignment for any region used with scalar atomics.
pub const BUFFER_ALIGNMENT: usize = std::mem::size_of::<i64>();

#[inline]
fn check_scalar(capacity: usize, index: usize, size: usize) {
    debug_assert!(
        index + size <= capacity,
        "index {} + {} out of bounds for capacity {}",
        index,
        size,
        capacity
    );
    debug_assert!(
        index % size == 0,
        "index {} is not {}-byte aligned",
        index,
        size
    );
}

#[inline]
fn check_range(capacity: usize, index: usize, length: usize) {
    debug_assert!(
        index + length <= capacity,
        "range {}..{} out of bounds for capacity {}",
        index,
        index + length,
        capacity
    );
}

/// A typed view over a region of memory supporting aligned scalar access at
/// arbitrary byte offsets.
///
/// The region may be process-private (see [`AlignedBuffer`]) or shared
/// between processes (see `MappedBuffer` with the `mmap` feature); the access
/// protocol is identical. Scalar loads and stores always go through atomic
/// types so that concurrent use from the owning producer/consumer roles is
/// well defined even when a role contract is violated.
pub trait AtomicBuffer {
    /// Start of the region. The pointer is valid for `capacity()` bytes.
    fn as_mut_ptr(&self) -> *mut u8;

    /// Length of the region in bytes.
    fn capacity(&self) -> usize;

    /// Verify the region start satisfies [`BUFFER_ALIGNMENT`].
    fn verify_alignment(&self) -> Result<()> {
        let address = self.as_mut_ptr() as usize;
        if address % BUFFER_ALIGNMENT == 0 {
            Ok(())
        } else {
            Err(Error::BufferMisaligned {
                address,
                required: BUFFER_ALIGNMENT,
            })
        }
    }

    // ---------------------------------------------------------------------
    // PLAIN (Relaxed) SCALAR ACCESS
    // ---------------------------------------------------------------------

    #[inline]
    fn get_u8(&self, index: usize) -> u8 {
        check_scalar(self.capacity(), index, 1);
        // SAFETY: bounds checked above; u8 access is always aligned.
        unsafe { (*self.as_mut_ptr().add(index).cast::<AtomicU8>()).load(Ordering::Relaxed) }
    }

    #[inline]
    fn put_u8(&self, index: usize, value: u8) {
        check_scalar(self.capacity(), index, 1);
        // SAFETY: bounds checked above; u8 access is always aligned.
        unsafe {
            (*self.as_mut_ptr().add(index).cast::<AtomicU8>()).store(value, Ordering::Relaxed);
        }
    }

    #[inline]
    fn get_i16(&self, index: usize) -> i16 {
        check_scalar(self.capacity(), index, 2);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe { (*self.as_mut_ptr().add(index).cast::<AtomicI16>()).load(Ordering::Relaxed) }
    }

    #[inline]
    fn put_i16(&self, index: usize, value: i16) {
        check_scalar(self.capacity(), index, 2);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe {
            (*self.as_mut_ptr().add(index).cast::<AtomicI16>()).store(value, Ordering::Relaxed);
        }
    }

    #[inline]
    fn get_i32(&self, index: usize) -> i32 {
        check_scalar(self.capacity(), index, 4);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe { (*self.as_mut_ptr().add(index).cast::<AtomicI32>()).load(Ordering::Relaxed) }
    }

    #[inline]
    fn put_i32(&self, index: usize, value: i32) {
        check_scalar(self.capacity(), index, 4);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe {
            (*self.as_mut_ptr().add(index).cast::<AtomicI32>()).store(value, Ordering::Relaxed);
        }
    }

    #[inline]
    fn get_i64(&self, index: usize) -> i64 {
        check_scalar(self.capacity(), index, 8);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe { (*self.as_mut_ptr().add(index).cast::<AtomicI64>()).load(Ordering::Relaxed) }
    }

    #[inline]
    fn put_i64(&self, index: usize, value: i64) {
        check_scalar(self.capacity(), index, 8);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe {
            (*self.as_mut_ptr().add(index).cast::<AtomicI64>()).store(value, Ordering::Relaxed);
        }
    }

    // ---------------------------------------------------------------------
    // VOLATILE / ORDERED SCALAR ACCESS
    // ---------------------------------------------------------------------

    #[inline]
    fn get_i32_volatile(&self, index: usize) -> i32 {
        check_scalar(self.capacity(), index, 4);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe { (*self.as_mut_ptr().add(index).cast::<AtomicI32>()).load(Ordering::Acquire) }
    }

    #[inline]
    fn put_i32_volatile(&self, index: usize, value: i32) {
        check_scalar(self.capacity(), index, 4);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe {
            (*self.as_mut_ptr().add(index).cast::<AtomicI32>()).store(value, Ordering::SeqCst);
        }
    }

    #[inline]
    fn put_i32_ordered(&self, index: usize, value: i32) {
        check_scalar(self.capacity(), index, 4);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe {
            (*self.as_mut_ptr().add(index).cast::<AtomicI32>()).store(value, Ordering::Release);
        }
    }

    #[inline]
    fn get_i64_volatile(&self, index: usize) -> i64 {
        check_scalar(self.capacity(), index, 8);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe { (*self.as_mut_ptr().add(index).cast::<AtomicI64>()).load(Ordering::Acquire) }
    }

    #[inline]
    fn put_i64_volatile(&self, index: usize, value: i64) {
        check_scalar(self.capacity(), index, 8);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe {
            (*self.as_mut_ptr().add(index).cast::<AtomicI64>()).store(value, Ordering::SeqCst);
        }
    }

    #[inline]
    fn put_i64_ordered(&self, index: usize, value: i64) {
        check_scalar(self.capacity(), index, 8);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe {
            (*self.as_mut_ptr().add(index).cast::<AtomicI64>()).store(value, Ordering::Release);
        }
    }

    // ---------------------------------------------------------------------
    // ATOMIC READ-MODIFY-WRITE
    // ---------------------------------------------------------------------

    /// Compare-and-set on a 64-bit cell. Returns true if the swap happened.
    #[inline]
    fn compare_and_set_i64(&self, index: usize, expected: i64, update: i64) -> bool {
        check_scalar(self.capacity(), index, 8);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe {
            (*self.as_mut_ptr().add(index).cast::<AtomicI64>())
                .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        }
    }

    /// Atomic post-increment by `delta`; returns the prior value.
    #[inline]
    fn get_and_add_i64(&self, index: usize, delta: i64) -> i64 {
        check_scalar(self.capacity(), index, 8);
        // SAFETY: bounds and alignment checked against the region capacity.
        unsafe {
            (*self.as_mut_ptr().add(index).cast::<AtomicI64>()).fetch_add(delta, Ordering::AcqRel)
        }
    }

    // ---------------------------------------------------------------------
    // BULK ACCESS
    // ---------------------------------------------------------------------

    /// Copy `dst.len()` bytes starting at `index` into `dst`.
    ///
    /// The copy is not atomic; callers must hold the read side of the
    /// publication protocol (or re-validate afterwards, as the broadcast
    /// receiver does).
    #[inline]
    fn get_bytes(&self, index: usize, dst: &mut [u8]) {
        check_range(self.capacity(), index, dst.len());
        // SAFETY: bounds checked; dst is exclusive so the ranges cannot overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(self.as_mut_ptr().add(index), dst.as_mut_ptr(), dst.len());
        }
    }

    /// Copy `src` into the region starting at `index`.
    #[inline]
    fn put_bytes(&self, index: usize, src: &[u8]) {
        check_range(self.capacity(), index, src.len());
        // SAFETY: bounds checked; src is a separate allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.as_mut_ptr().add(index), src.len());
        }
    }

    /// Fill `length` bytes starting at `index` with `value`.
    #[inline]
    fn set_memory(&self, index: usize, length: usize, value: u8) {
        check_range(self.capacity(), index, length);
        // SAFETY: bounds checked against the region capacity.
        unsafe {
            std::ptr::write_bytes(self.as_mut_ptr().add(index), value, length);
        }
    }

    /// Borrow `length` bytes starting at `index` as a slice.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no other thread writes the range for the
    /// lifetime of the slice. The ring consumer holds this for consumed
    /// records via the head/tail protocol; broadcast receivers must NOT use
    /// this (the transmitter may overwrite at any time) and copy via
    /// [`AtomicBuffer::get_bytes`] instead.
    #[inline]
    unsafe fn slice(&self, index: usize, length: usize) -> &[u8] {
        check_range(self.capacity(), index, length);
        std::slice::from_raw_parts(self.as_mut_ptr().add(index), length)
    }
}

impl<A: AtomicBuffer> AtomicBuffer for &A {
    fn as_mut_ptr(&self) -> *mut u8 {
        (**self).as_mut_ptr()
    }

    fn capacity(&self) -> usize {
        (**self).capacity()
    }
}

impl<A: AtomicBuffer> AtomicBuffer for Arc<A> {
    fn as_mut_ptr(&self) -> *mut u8 {
        (**self).as_mut_ptr()
    }

    fn capacity(&self) -> usize {
        (**self).capacity()
    }
}

/// Owned, zero-initialised, cache-line-aligned heap region.
///
/// Uses a raw allocation instead of `Vec<u8>` because the global allocator
/// only guarantees 1-byte alignment for `u8` and the scalar atomics above
/// require the region start on an 8-byte boundary.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    capacity: usize,
}

impl AlignedBuffer {
    /// Allocate a zeroed region of `capacity` bytes aligned to a cache line.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be non-zero");
        let layout = Layout::from_size_align(capacity, CACHE_LINE_LENGTH)
            .expect("capacity overflows the address space");
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout)
        };
        Self { ptr, capacity }
    }
}

impl AtomicBuffer for AlignedBuffer {
    fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in new() with the identical layout.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.capacity, CACHE_LINE_LENGTH);
            dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

// SAFETY: all access to the region goes through atomic loads/stores or raw
// copies governed by the ownership protocol of the structure laid over it.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}
