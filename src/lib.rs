//! Segregated-fit allocator for embedded systems
//!
//! This crate provides a single type called [`Allocator`]. This type
//! implements the [`core::alloc::GlobalAlloc`]-trait, which is required to
//! use the [`alloc`-crate][alloc] on `#![no_std]`-targets, and additionally
//! exposes the classical allocation operations directly (allocate, free,
//! reallocate, zero-allocate). The heap is a fixed reserve of `N` bytes
//! embedded in the allocator value itself, claimed piece by piece through an
//! internal break pointer, so the worst-case memory usage is known at compile
//! time.
//!
//! # Usage
//! Copy and paste the following code snippet into your binary crate and
//! potentially adjust the number of bytes of the heap (here 64K):
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: segalloc::Allocator<65536> = segalloc::Allocator::new();
//!
//! extern crate alloc;
//! ```
//! Afterwards you don't need to interact with the crate or the variable
//! `ALLOCATOR` anymore and can just `use alloc::vec::Vec` or even
//! `use alloc::collections::BTreeMap`, i.e. every fancy collection which is
//! normally provided by the `std`.
//!
//! The minimal heap size is `4128`: 32 bytes for the heap skeleton plus 4096
//! bytes for the first chunk-sized extension. Adjust the size as necessary,
//! e.g. by doing a worst case calculation and potentially adding some backup
//! space of 10% (for example).
//!
//! # Implementation
//! The heap is structured as a run of *blocks*, each framed by two identical
//! 8-byte boundary tags packing the block size and an allocated bit:
//!
//! ```text
//! | hdr |   payload a    | ftr | hdr | payload b | ftr | hdr |  free  | ftr |
//! ^                                                    ^
//! allocated, size 48                                   free, size 32
//! ```
//!
//! Three design decisions do the heavy lifting:
//! 1.  **Boundary tags.** Since the footer of the left neighbor sits directly
//!     before a block's own header, both neighbors of any block can be
//!     examined in constant time. Freeing a block therefore *immediately*
//!     merges it with any free neighbor (four cases: none, left, right,
//!     both), so no two free blocks are ever adjacent and fragmentation
//!     cannot creep in over time.
//! 2.  **Segregated free lists.** Free blocks are threaded into one of 13
//!     doubly-linked lists bucketed by power-of-two size class, the links
//!     living inside the otherwise unused payload of the free blocks
//!     themselves. A search for a block of a given size starts in the bucket
//!     of that size class and only cascades to larger classes when the
//!     bucket has nothing suitable, which makes the search effectively
//!     sublinear in the number of free blocks. Each bucket is kept sorted by
//!     size, so the first hit is also the best-sized hit of its class.
//! 3.  **Splitting.** When the chosen block is larger than the request, the
//!     tail is split off and re-enters a bucket as its own free block, as
//!     long as at least 32 bytes (header + two links + footer) remain;
//!     otherwise the whole block is handed out and the few extra bytes ride
//!     along until the block is freed.
//!
//! All payloads are 16-byte aligned. Requests with stricter alignment (from
//! the [`GlobalAlloc`] interface) are satisfied by over-allocating and
//! nudging the returned pointer up; the deallocation path recovers the block
//! from such an interior pointer by walking the heap.
//!
//! The allocator starts out with nothing claimed. The first allocation
//! builds a tiny skeleton (a padding word, a 16-byte *prologue* block and a
//! zero-size *epilogue* header, all permanently marked allocated so that
//! every real block has well-defined neighbors) and claims memory in 4096
//! byte chunks from the reserve as needed. The reserve only ever grows up to
//! `N`; nothing is returned to the system, freed memory is recycled through
//! the buckets.
//!
//! [alloc]: https://doc.rust-lang.org/alloc/index.html
#![cfg_attr(not(test), no_std)]
#![warn(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

mod heap;

use heap::{Heap, ALIGNMENT};

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

/// The segregated-fit memory allocator.
///
/// This is the core type of this crate: an allocator with a predefined heap
/// size of `N` bytes, usable both as a `#[global_allocator]` and through its
/// inherent methods. The whole heap lives inside the value, so a `static`
/// allocator accounts its memory to the static image and the worst case is
/// visible at link time.
///
/// Its usage is simple: just copy and paste the following in the binary
/// crate you're developing and adjust the heap size (here 64K) to your
/// needs.
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: segalloc::Allocator<65536> = segalloc::Allocator::new();
/// ```
///
/// Note that the allocator must not be moved between the first allocation
/// and the last deallocation, since returned pointers point into the value
/// itself. A `static` fulfills this naturally.
pub struct Allocator<const N: usize> {
    /// The heap core, i.e. the block and free-list machinery.
    ///
    /// Protected by a `spin::Mutex` to make it usable with the shared
    /// references [`GlobalAlloc`] hands out.
    heap: spin::Mutex<Heap<N>>,
}

impl<const N: usize> Allocator<N> {
    /// Create a new [`Allocator`].
    ///
    /// This function is a `const fn`, therefore you can call it directly
    /// when creating the allocator.
    ///
    /// # Panics
    /// This function will panic, if the supplied heap size `N` is less than
    /// `4128` (heap skeleton plus one 4096-byte chunk) or not divisible by
    /// `16`.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        let heap = spin::Mutex::new(Heap::new());
        Self { heap }
    }

    /// Set up the heap skeleton and claim the first chunk.
    ///
    /// Calling this is optional, since the first allocation initializes the
    /// heap on demand, but doing it eagerly moves the setup cost to a
    /// convenient point in time. Idempotent.
    pub fn init(&self) -> bool {
        self.heap.lock().init()
    }

    /// Allocate a block of `size` bytes.
    ///
    /// The returned pointer is 16-byte aligned. Returns `None` if `size` is
    /// zero or the reserve is exhausted.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let mut heap = self.heap.lock();
        let offset = heap.allocate(size)?;
        let base = heap.base_ptr();
        // SAFETY: the heap core only returns offsets of payloads inside the
        // claimed part of the arena, so the sum stays inside one allocation.
        NonNull::new(unsafe { base.add(offset) })
    }

    /// Free the block at `ptr`.
    ///
    /// A null `ptr` is a no-op. Misuse that the cheap internal checks catch
    /// (foreign pointer, double free) is ignored instead of corrupting the
    /// heap.
    ///
    /// # Safety
    /// `ptr` must be null or a pointer obtained from this allocator that has
    /// not been freed since.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let mut heap = self.heap.lock();
        let base = heap.base_ptr() as usize;
        // errors are ignored: freeing cannot report and must not panic
        let _ = heap.free((ptr as usize).wrapping_sub(base));
    }

    /// Resize the block at `ptr` to `size` bytes, preserving its contents.
    ///
    /// A null `ptr` is a plain allocation; `size == 0` frees the block and
    /// returns `None`. On failure `None` is returned and the original block
    /// stays valid and untouched.
    ///
    /// # Safety
    /// `ptr` must be null or a pointer obtained from this allocator that has
    /// not been freed since.
    pub unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        let mut heap = self.heap.lock();
        let base = heap.base_ptr() as usize;
        let old = if ptr.is_null() {
            None
        } else {
            Some((ptr as usize).wrapping_sub(base))
        };
        let offset = heap.reallocate(old, size)?;
        let base = heap.base_ptr();
        // SAFETY: see `allocate()`; the core hands out in-arena offsets.
        NonNull::new(unsafe { base.add(offset) })
    }

    /// Allocate a zero-initialized block of `count * size` bytes.
    ///
    /// Returns `None` when the product overflows or is zero, or when the
    /// reserve is exhausted.
    pub fn zero_allocate(&self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let mut heap = self.heap.lock();
        let offset = heap.zero_allocate(count, size)?;
        let base = heap.base_ptr();
        // SAFETY: see `allocate()`; the core hands out in-arena offsets.
        NonNull::new(unsafe { base.add(offset) })
    }

    /// Verify the heap and free-list invariants.
    ///
    /// Walks the whole heap, so this is meant for tests and debugging, not
    /// for a hot path. Failures are described via the `log` facade and make
    /// the call return `false`.
    pub fn check_invariants(&self) -> bool {
        self.heap.lock().check_invariants()
    }

    /// Bytes claimed from the reserve so far, sentinel overhead included.
    pub fn claimed_bytes(&self) -> usize {
        self.heap.lock().claimed_bytes()
    }

    /// Bytes currently held in free blocks, boundary tags included.
    pub fn free_bytes(&self) -> usize {
        self.heap.lock().free_bytes()
    }

    /// Align a given pointer to the specified alignment.
    ///
    /// # Safety
    /// This function requires `align` to be a power of two and requires the
    /// `ptr` to point to a memory region, that is large enough, so that the
    /// aligned pointer is still in that memory region.
    unsafe fn align_to(ptr: *mut u8, align: usize) -> *mut u8 {
        let addr = ptr as usize;
        let mismatch = addr & (align - 1);
        let offset = if mismatch != 0 { align - mismatch } else { 0 };
        // SAFETY: "in-bound"-requirement is part of the safety-contract of
        // this function, therefore the caller is responsible for it
        unsafe { ptr.add(offset) }
    }
}

// SAFETY: the implementation adheres to the `GlobalAlloc` contract: returned
// pointers are aligned per the layout (natively for alignments up to 16, via
// over-allocation above that), null signals failure, and the methods do not
// panic on the intended paths.
unsafe impl<const N: usize> GlobalAlloc for Allocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let align = layout.align();
        // payloads are always 16-aligned, so smaller alignments come for
        // free. Larger alignments over-allocate by a conservative `align`
        // extra bytes and nudge the returned pointer up to the requested
        // boundary.
        let size = if align > ALIGNMENT {
            layout.size() + align
        } else {
            layout.size()
        };

        match self.allocate(size) {
            // SAFETY: `align` is a power of two as by the contract of
            // `Layout`, and the over-allocation above guarantees that the
            // aligned pointer is still inside the same block.
            Some(payload) => unsafe { Self::align_to(payload.as_ptr(), align) },
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            return;
        }
        let mut heap = self.heap.lock();
        let base = heap.base_ptr() as usize;
        let offset = (ptr as usize).wrapping_sub(base);
        let offset = if layout.align() > ALIGNMENT {
            // `alloc` may have shifted the pointer up; recover the payload
            // offset of the block it lives in
            match heap.block_containing(offset) {
                Some(bp) => bp,
                None => return,
            }
        } else {
            offset
        };
        // errors cannot be reported from `dealloc` (no unwinding allowed),
        // so detected misuse is dropped
        let _ = heap.free(offset);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            // `alloc` may have shifted `ptr` away from the block payload, so
            // the in-place resize path does not apply. Move through a fresh
            // aligned allocation instead.
            // SAFETY: `layout.align()` is a valid alignment and the caller
            // guarantees `new_size` rounds up to a representable layout.
            let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
            // SAFETY: forwarded straight to our own `alloc`/`dealloc` with
            // the layouts the caller handed in; the copy stays within both
            // allocations (`min` of the two sizes).
            unsafe {
                let new_ptr = self.alloc(new_layout);
                if !new_ptr.is_null() {
                    ptr::copy_nonoverlapping(ptr, new_ptr, layout.size().min(new_size));
                    self.dealloc(ptr, layout);
                }
                return new_ptr;
            }
        }

        // SAFETY: `ptr` came from this allocator and is still live, as per
        // the `realloc` contract.
        match unsafe { self.reallocate(ptr, new_size) } {
            Some(payload) => payload.as_ptr(),
            None => ptr::null_mut(),
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            // the aligned pointer sits somewhere inside an over-allocated
            // block, so zero the requested bytes rather than a whole payload
            // SAFETY: `alloc` returned a block with at least `layout.size()`
            // bytes behind the aligned pointer.
            unsafe {
                let ptr = self.alloc(layout);
                if !ptr.is_null() {
                    ptr::write_bytes(ptr, 0, layout.size());
                }
                return ptr;
            }
        }

        match self.zero_allocate(layout.size(), 1) {
            Some(payload) => payload.as_ptr(),
            None => ptr::null_mut(),
        }
    }
}
