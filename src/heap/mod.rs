//! The block-structured heap core.
//!
//! This module owns the actual allocation algorithm; the crate root only
//! wraps it in a lock and converts between offsets and pointers. The heap is
//! a run of blocks carved out of the [`Arena`], each framed by a pair of
//! boundary tags:
//!
//! ```text
//! | header |      payload ...      | footer | header | payload ...
//! ^--------^                                ^
//! 8 bytes  payload offset (16-aligned)      next block
//! ```
//!
//! The first word of the arena is an alignment pad, followed by a 16-byte
//! *prologue* block and, at the very break, a zero-size *epilogue* header.
//! Both sentinels are permanently marked allocated, so every real block has
//! well-defined neighbors and coalescing needs no bounds checks.
//!
//! Free blocks reuse their first two payload words as predecessor/successor
//! links of a size-class bucket (see [`index`]). Freeing eagerly coalesces
//! with both neighbors, so no two adjacent blocks are ever both free.
//! Allocation searches the buckets for the best-sized fit and splits the
//! chosen block when the remainder is big enough to stand on its own.

pub(crate) mod arena;
pub(crate) mod index;
pub(crate) mod tag;

use arena::Arena;
use index::{FreeIndex, NIL};
use tag::Tag;

/// Payload alignment; also the size granularity of blocks.
pub(crate) const ALIGNMENT: usize = 16;
/// Size of one header/footer/link word.
pub(crate) const WORD_SIZE: usize = 8;
/// Smallest possible block: header, two link words, footer.
pub(crate) const MIN_BLOCK_SIZE: usize = 2 * ALIGNMENT;
/// Granularity of heap extensions.
pub(crate) const CHUNK_SIZE: usize = 4096;
/// Number of size-class buckets.
pub(crate) const BUCKET_COUNT: usize = 13;

/// Bytes consumed by the pad word and the two sentinels.
pub(crate) const SKELETON_BYTES: usize = 4 * WORD_SIZE;

/// An error detected while freeing a block.
///
/// Freeing a pointer that did not come from the allocator is undefined
/// behavior; these checks are a cheap best effort, not a guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeError {
    /// The offset is outside the managed region, misaligned, or its header
    /// does not describe a plausible block.
    OutOfBounds,
    /// The header does not carry the allocated bit: either the block was
    /// already freed or the pointer never was an allocation.
    NotAllocated,
}

/// The allocator state: backing memory, bucket index, and the skeleton.
pub struct Heap<const N: usize> {
    arena: Arena<N>,
    index: FreeIndex,
    /// Payload offset of the prologue; 0 until [`init`](Self::init) has run.
    base: usize,
}

impl<const N: usize> Heap<N> {
    /// Create an uninitialized heap. The skeleton is built lazily on the
    /// first allocation (or by an explicit [`init`](Self::init)).
    ///
    /// # Panics
    /// Panics if `N` is not a multiple of 16 or cannot hold the skeleton
    /// plus the first chunk-sized extension.
    pub const fn new() -> Self {
        assert!(
            N >= SKELETON_BYTES + CHUNK_SIZE,
            "too small heap memory: sentinels and first chunk need 4128 bytes"
        );
        assert!(N % ALIGNMENT == 0, "memory size has to be divisible by 16");
        Self {
            arena: Arena::new(),
            index: FreeIndex::new(),
            base: 0,
        }
    }

    /// Build the heap skeleton and claim the first chunk.
    ///
    /// Idempotent: calling it on an initialized heap does nothing and
    /// reports success.
    pub fn init(&mut self) -> bool {
        if self.base != 0 {
            return true;
        }
        let start = match self.arena.sbrk(SKELETON_BYTES) {
            Some(start) => start,
            None => return false,
        };
        self.arena.store(start, 0); // alignment pad
        self.arena
            .store(start + WORD_SIZE, Tag::allocated(ALIGNMENT).as_raw());
        self.arena
            .store(start + 2 * WORD_SIZE, Tag::allocated(ALIGNMENT).as_raw());
        self.arena
            .store(start + 3 * WORD_SIZE, Tag::allocated(0).as_raw());
        self.base = start + 2 * WORD_SIZE;
        self.extend(CHUNK_SIZE).is_some()
    }

    /// Allocate a block for `size` payload bytes.
    ///
    /// Returns the 16-aligned payload offset, or `None` for a zero-size
    /// request or when the arena is exhausted.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        if self.base == 0 && !self.init() {
            return None;
        }
        if size == 0 {
            return None;
        }
        let asize = adjusted_size(size)?;
        let bp = match self.find_fit(asize) {
            Some(bp) => bp,
            None => self.extend(asize.max(CHUNK_SIZE))?,
        };
        self.place(bp, asize);
        debug_assert!(self.check_invariants());
        Some(bp)
    }

    /// Free the block at payload offset `bp`, coalescing with free neighbors.
    pub fn free(&mut self, bp: usize) -> Result<(), FreeError> {
        if self.base == 0 {
            return Err(FreeError::OutOfBounds);
        }
        let brk = self.arena.brk();
        if bp < self.base + ALIGNMENT || bp >= brk || bp % ALIGNMENT != 0 {
            return Err(FreeError::OutOfBounds);
        }
        let tag = self.header(bp);
        let size = tag.size();
        if size < MIN_BLOCK_SIZE || size % ALIGNMENT != 0 || size > brk - bp {
            return Err(FreeError::OutOfBounds);
        }
        if !tag.is_allocated() {
            return Err(FreeError::NotAllocated);
        }

        self.write_block(bp, Tag::free(size));
        self.index.insert(&mut self.arena, bp, size);
        self.coalesce(bp);
        debug_assert!(self.check_invariants());
        Ok(())
    }

    /// Resize the allocation at `bp` to `size` payload bytes.
    ///
    /// `None` for `bp` allocates fresh; `size == 0` frees and returns
    /// `None`. On allocation failure the original block is left untouched.
    pub fn reallocate(&mut self, bp: Option<usize>, size: usize) -> Option<usize> {
        let bp = match bp {
            Some(bp) => bp,
            None => return self.allocate(size),
        };
        if size == 0 {
            let _ = self.free(bp);
            return None;
        }

        let old_payload = self.header(bp).size() - ALIGNMENT;
        let new_bp = self.allocate(size)?;
        self.arena.copy(bp, new_bp, size.min(old_payload));
        let _ = self.free(bp);
        Some(new_bp)
    }

    /// Allocate `count * size` zeroed payload bytes.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> Option<usize> {
        let total = count.checked_mul(size)?;
        let bp = self.allocate(total)?;
        self.arena.zero(bp, total);
        Some(bp)
    }

    /// Grow the heap by at least `bytes` and return the payload offset of
    /// the resulting free block, already coalesced and indexed.
    fn extend(&mut self, bytes: usize) -> Option<usize> {
        let bytes = bytes.checked_add(ALIGNMENT - 1)? & !(ALIGNMENT - 1);
        let bp = self.arena.sbrk(bytes)?;
        // the new block's header lands on the old epilogue word, and a fresh
        // epilogue is written at the new break
        self.write_block(bp, Tag::free(bytes));
        self.arena
            .store(bp + bytes - WORD_SIZE, Tag::allocated(0).as_raw());
        self.index.insert(&mut self.arena, bp, bytes);
        Some(self.coalesce(bp))
    }

    /// Merge the free block at `bp` with any free neighbors.
    ///
    /// The block must already be linked into its bucket. Every participant
    /// is unlinked *before* the tags change, because bucket membership
    /// depends on the size being rewritten; the merged block is re-linked
    /// last.
    fn coalesce(&mut self, bp: usize) -> usize {
        let prev_free = !Tag::from_raw(self.arena.load(bp - ALIGNMENT)).is_allocated();
        let next_bp = self.next_block(bp);
        let next_free = !self.header(next_bp).is_allocated();
        let size = self.header(bp).size();

        let (merged, merged_size) = match (prev_free, next_free) {
            (false, false) => return bp,
            (false, true) => {
                let total = size + self.header(next_bp).size();
                self.index.remove(&mut self.arena, bp);
                self.index.remove(&mut self.arena, next_bp);
                (bp, total)
            }
            (true, false) => {
                let prev_bp = self.prev_block(bp);
                let total = size + self.header(prev_bp).size();
                self.index.remove(&mut self.arena, bp);
                self.index.remove(&mut self.arena, prev_bp);
                (prev_bp, total)
            }
            (true, true) => {
                let prev_bp = self.prev_block(bp);
                let total = size + self.header(prev_bp).size() + self.header(next_bp).size();
                self.index.remove(&mut self.arena, bp);
                self.index.remove(&mut self.arena, prev_bp);
                self.index.remove(&mut self.arena, next_bp);
                (prev_bp, total)
            }
        };

        self.write_block(merged, Tag::free(merged_size));
        self.index.insert(&mut self.arena, merged, merged_size);
        merged
    }

    /// Find a free block of at least `asize` bytes.
    ///
    /// Starts in the bucket of `asize` and cascades upward. Buckets are
    /// sorted, so the first sufficiently large block of the starting bucket
    /// is the best-sized one in its class; any block of a later bucket is
    /// large enough by construction.
    fn find_fit(&self, asize: usize) -> Option<usize> {
        for class in FreeIndex::class_of(asize)..BUCKET_COUNT {
            let mut bp = self.index.head(class);
            while bp != NIL {
                if self.header(bp).size() >= asize {
                    return Some(bp);
                }
                bp = FreeIndex::successor(&self.arena, bp);
            }
        }
        None
    }

    /// Turn the free block at `bp` into an allocation of `asize` bytes.
    ///
    /// Splits off the tail as a new free block when it is at least the
    /// minimum block size; otherwise the whole block is handed out.
    fn place(&mut self, bp: usize, asize: usize) {
        let csize = self.header(bp).size();
        self.index.remove(&mut self.arena, bp);
        if csize - asize >= MIN_BLOCK_SIZE {
            self.write_block(bp, Tag::allocated(asize));
            let rest = bp + asize;
            self.write_block(rest, Tag::free(csize - asize));
            self.index.insert(&mut self.arena, rest, csize - asize);
        } else {
            self.write_block(bp, Tag::allocated(csize));
        }
    }

    fn header(&self, bp: usize) -> Tag {
        Tag::from_raw(self.arena.load(bp - WORD_SIZE))
    }

    fn footer(&self, bp: usize) -> Tag {
        Tag::from_raw(self.arena.load(bp + self.header(bp).size() - ALIGNMENT))
    }

    /// Write `tag` as both header and footer of the block at `bp`.
    fn write_block(&mut self, bp: usize, tag: Tag) {
        self.arena.store(bp - WORD_SIZE, tag.as_raw());
        self.arena.store(bp + tag.size() - ALIGNMENT, tag.as_raw());
    }

    fn next_block(&self, bp: usize) -> usize {
        bp + self.header(bp).size()
    }

    fn prev_block(&self, bp: usize) -> usize {
        bp - Tag::from_raw(self.arena.load(bp - ALIGNMENT)).size()
    }

    /// Iterate over the payload offsets of all real blocks, sentinels
    /// excluded. Assumes a well-formed heap.
    fn blocks(&self) -> Blocks<'_, N> {
        let bp = if self.base == 0 {
            0
        } else {
            self.base + ALIGNMENT
        };
        Blocks { heap: self, bp }
    }

    /// Payload offset of the block whose payload region contains `offset`.
    pub fn block_containing(&self, offset: usize) -> Option<usize> {
        self.blocks().find(|&bp| {
            let payload = self.header(bp).size() - ALIGNMENT;
            offset >= bp && offset < bp + payload
        })
    }

    /// Total bytes claimed from the arena, sentinels included.
    pub fn claimed_bytes(&self) -> usize {
        self.arena.brk()
    }

    /// Bytes currently sitting in free blocks, boundary tags included.
    pub fn free_bytes(&self) -> usize {
        self.blocks()
            .map(|bp| self.header(bp))
            .filter(|tag| !tag.is_allocated())
            .map(|tag| tag.size())
            .sum()
    }

    /// Base address of the arena, for offset/pointer conversion.
    pub fn base_ptr(&mut self) -> *mut u8 {
        self.arena.base_ptr()
    }

    /// Verify the heap and bucket invariants.
    ///
    /// Read-only. Returns `false` and emits `log` diagnostics when a check
    /// fails; a heap that has not been initialized yet is trivially sound.
    pub fn check_invariants(&self) -> bool {
        if self.base == 0 {
            return true;
        }
        let brk = self.arena.brk();
        let mut ok = true;

        // forward walk over the real blocks
        let mut bp = self.base + ALIGNMENT;
        let mut prev_free = false;
        let mut free_blocks = 0_usize;
        loop {
            let header = self.header(bp);
            let size = header.size();
            if size == 0 {
                if !header.is_allocated() {
                    log::error!("heap check: epilogue at {:#x} not marked allocated", bp);
                    ok = false;
                }
                if bp != brk {
                    log::error!("heap check: epilogue at {:#x}, break at {:#x}", bp, brk);
                    ok = false;
                }
                break;
            }
            if bp % ALIGNMENT != 0 {
                log::error!("heap check: payload {:#x} not 16-byte aligned", bp);
                return false;
            }
            if size < MIN_BLOCK_SIZE || size % ALIGNMENT != 0 || size > brk - bp {
                log::error!("heap check: block {:#x} has impossible size {}", bp, size);
                return false;
            }
            if self.footer(bp) != header {
                log::error!("heap check: block {:#x} header/footer mismatch", bp);
                ok = false;
            }
            if header.is_allocated() {
                prev_free = false;
            } else {
                if prev_free {
                    log::error!("heap check: adjacent free blocks at {:#x}", bp);
                    ok = false;
                }
                prev_free = true;
                free_blocks += 1;
            }
            bp += size;
        }

        // every free block sits in exactly one bucket of the matching class,
        // in ascending size order, with consistent links
        let mut indexed = 0_usize;
        for class in 0..BUCKET_COUNT {
            let mut prev = NIL;
            let mut prev_size = 0_usize;
            let mut bp = self.index.head(class);
            while bp != NIL {
                indexed += 1;
                if indexed > free_blocks {
                    log::error!("heap check: bucket {} longer than the heap's free count", class);
                    return false;
                }
                let header = self.header(bp);
                if header.is_allocated() {
                    log::error!("heap check: allocated block {:#x} in bucket {}", bp, class);
                    return false;
                }
                if FreeIndex::class_of(header.size()) != class {
                    log::error!(
                        "heap check: block {:#x} of size {} in bucket {}",
                        bp,
                        header.size(),
                        class
                    );
                    ok = false;
                }
                if header.size() < prev_size {
                    log::error!("heap check: bucket {} out of order at {:#x}", class, bp);
                    ok = false;
                }
                if FreeIndex::predecessor(&self.arena, bp) != prev {
                    log::error!("heap check: broken predecessor link at {:#x}", bp);
                    ok = false;
                }
                prev_size = header.size();
                prev = bp;
                bp = FreeIndex::successor(&self.arena, bp);
            }
        }
        if indexed != free_blocks {
            log::error!(
                "heap check: {} free blocks in the heap, {} in the buckets",
                free_blocks,
                indexed
            );
            ok = false;
        }
        ok
    }
}

/// Round a payload request up to a full block size: header/footer overhead
/// plus 16-byte alignment, never below the minimum block.
fn adjusted_size(size: usize) -> Option<usize> {
    if size <= ALIGNMENT {
        Some(MIN_BLOCK_SIZE)
    } else {
        let padded = size.checked_add(2 * ALIGNMENT - 1)?;
        Some(padded & !(ALIGNMENT - 1))
    }
}

struct Blocks<'heap, const N: usize> {
    heap: &'heap Heap<N>,
    bp: usize,
}

impl<'heap, const N: usize> Iterator for Blocks<'heap, N> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bp == 0 {
            return None;
        }
        let size = self.heap.header(self.bp).size();
        if size == 0 {
            return None;
        }
        let bp = self.bp;
        self.bp += size;
        Some(bp)
    }
}

#[cfg(test)]
mod tests {
    use super::tag::Tag;
    use super::{adjusted_size, FreeError, Heap, ALIGNMENT, CHUNK_SIZE, SKELETON_BYTES, WORD_SIZE};

    type TestHeap = Heap<8192>;

    /// Fill the payload at `bp` with `words` copies of `pattern`.
    fn fill(heap: &mut TestHeap, bp: usize, words: usize, pattern: u64) {
        for i in 0..words {
            heap.arena.store(bp + i * WORD_SIZE, pattern);
        }
    }

    #[test]
    fn size_adjustment() {
        assert_eq!(adjusted_size(1), Some(32));
        assert_eq!(adjusted_size(16), Some(32));
        assert_eq!(adjusted_size(17), Some(48));
        assert_eq!(adjusted_size(24), Some(48));
        assert_eq!(adjusted_size(32), Some(48));
        assert_eq!(adjusted_size(48), Some(64));
        assert_eq!(adjusted_size(usize::MAX - 8), None);
    }

    #[test]
    fn init_builds_the_skeleton() {
        let mut heap = TestHeap::new();
        assert!(heap.init());

        assert_eq!(heap.arena.load(0), 0);
        assert_eq!(heap.arena.load(8), Tag::allocated(16).as_raw());
        assert_eq!(heap.arena.load(16), Tag::allocated(16).as_raw());
        assert_eq!(heap.base, 16);

        // the first chunk is claimed up front and forms one free block
        assert_eq!(heap.claimed_bytes(), SKELETON_BYTES + CHUNK_SIZE);
        assert_eq!(heap.header(32), Tag::free(CHUNK_SIZE));
        assert_eq!(
            heap.arena.load(heap.claimed_bytes() - WORD_SIZE),
            Tag::allocated(0).as_raw()
        );
        assert!(heap.check_invariants());
    }

    #[test]
    fn init_is_idempotent() {
        let mut heap = TestHeap::new();
        assert!(heap.init());
        let brk = heap.claimed_bytes();
        assert!(heap.init());
        assert_eq!(heap.claimed_bytes(), brk);
    }

    #[test]
    fn smallest_allocation() {
        let mut heap = TestHeap::new();
        let bp = heap.allocate(1).unwrap();
        assert_eq!(bp % 16, 0);
        assert_eq!(heap.header(bp), Tag::allocated(32));
        assert!(heap.check_invariants());

        heap.free(bp).unwrap();
        assert!(heap.check_invariants());
        assert_eq!(heap.free_bytes(), heap.claimed_bytes() - SKELETON_BYTES);
    }

    #[test]
    fn zero_size_request_is_refused() {
        let mut heap = TestHeap::new();
        assert_eq!(heap.allocate(0), None);
    }

    #[test]
    fn adjacent_allocations_are_contiguous() {
        let mut heap = TestHeap::new();
        let p = heap.allocate(8).unwrap();
        let q = heap.allocate(8).unwrap();
        assert_eq!(q - p, 32);

        let r = heap.allocate(24).unwrap();
        let s = heap.allocate(24).unwrap();
        assert_eq!(s - r, 48);

        for bp in [p, q, r, s] {
            heap.free(bp).unwrap();
        }
        assert!(heap.check_invariants());
        assert_eq!(heap.free_bytes(), heap.claimed_bytes() - SKELETON_BYTES);
    }

    #[test]
    fn freeing_merges_with_the_next_free_block() {
        let mut heap = TestHeap::new();
        let a = heap.allocate(512).unwrap();
        let b = heap.allocate(512).unwrap();
        let guard = heap.allocate(512).unwrap();

        // b's right neighbor stays allocated, so freeing a afterwards merges
        // to the right only
        heap.free(b).unwrap();
        heap.free(a).unwrap();
        assert_eq!(heap.header(a), Tag::free(1056));
        assert!(heap.check_invariants());

        heap.free(guard).unwrap();
    }

    #[test]
    fn freeing_merges_with_the_previous_free_block() {
        let mut heap = TestHeap::new();
        let a = heap.allocate(512).unwrap();
        let b = heap.allocate(512).unwrap();
        let guard = heap.allocate(512).unwrap();

        heap.free(a).unwrap();
        heap.free(b).unwrap();
        assert_eq!(heap.header(a), Tag::free(1056));
        assert!(heap.check_invariants());

        heap.free(guard).unwrap();
    }

    #[test]
    fn freeing_merges_with_both_neighbors() {
        let mut heap = TestHeap::new();
        let a = heap.allocate(512).unwrap();
        let b = heap.allocate(512).unwrap();
        let c = heap.allocate(512).unwrap();

        heap.free(b).unwrap(); // both neighbors allocated
        heap.free(a).unwrap(); // merges right into b
        heap.free(c).unwrap(); // merges left into a+b and right into the tail

        // everything coalesced back into a single free block
        assert_eq!(heap.header(a), Tag::free(CHUNK_SIZE));
        assert_eq!(heap.free_bytes(), heap.claimed_bytes() - SKELETON_BYTES);
        assert_eq!(heap.blocks().count(), 1);
        assert!(heap.check_invariants());
    }

    #[test]
    fn exact_fit_is_used_without_splitting() {
        let mut heap = TestHeap::new();
        let x = heap.allocate(100).unwrap(); // block size 128
        let _guard = heap.allocate(1).unwrap();
        heap.free(x).unwrap();

        let y = heap.allocate(112).unwrap(); // adjusts to exactly 128
        assert_eq!(y, x);
        assert_eq!(heap.header(y), Tag::allocated(128));
    }

    #[test]
    fn sixteen_byte_remainder_is_not_split_off() {
        let mut heap = TestHeap::new();
        let x = heap.allocate(100).unwrap(); // block size 128
        let _guard = heap.allocate(1).unwrap();
        heap.free(x).unwrap();

        let y = heap.allocate(96).unwrap(); // adjusts to 112, remainder 16
        assert_eq!(y, x);
        assert_eq!(heap.header(y), Tag::allocated(128));
        assert!(heap.check_invariants());
    }

    #[test]
    fn thirty_two_byte_remainder_is_split_off() {
        let mut heap = TestHeap::new();
        let x = heap.allocate(100).unwrap(); // block size 128
        let _guard = heap.allocate(1).unwrap();
        heap.free(x).unwrap();

        let y = heap.allocate(80).unwrap(); // adjusts to 96, remainder 32
        assert_eq!(y, x);
        assert_eq!(heap.header(y), Tag::allocated(96));
        assert_eq!(heap.header(y + 96), Tag::free(32));
        assert_eq!(heap.index.head(5), y + 96);
        assert!(heap.check_invariants());
    }

    #[test]
    fn allocation_extends_the_heap_when_no_fit_exists() {
        let mut heap = TestHeap::new();
        let a = heap.allocate(4000).unwrap();
        assert_eq!(heap.claimed_bytes(), SKELETON_BYTES + CHUNK_SIZE);

        // no block of this size is left, so the heap grows by another chunk
        let b = heap.allocate(4000).unwrap();
        assert_eq!(heap.claimed_bytes(), SKELETON_BYTES + 2 * CHUNK_SIZE);
        assert_ne!(a, b);
        assert!(heap.check_invariants());
    }

    #[test]
    fn exhaustion_reports_failure_but_keeps_working() {
        let mut heap = TestHeap::new();
        assert_eq!(heap.allocate(16 * 1024), None);
        // a failed extension must not corrupt anything
        assert!(heap.check_invariants());
        assert!(heap.allocate(64).is_some());
    }

    #[test]
    fn free_rejects_foreign_offsets() {
        let mut heap = TestHeap::new();
        assert_eq!(heap.free(64), Err(FreeError::OutOfBounds));

        heap.init();
        assert_eq!(heap.free(8), Err(FreeError::OutOfBounds));
        assert_eq!(heap.free(40), Err(FreeError::OutOfBounds)); // misaligned
        assert_eq!(heap.free(usize::MAX - 15), Err(FreeError::OutOfBounds));
    }

    #[test]
    fn double_free_is_detected() {
        let mut heap = TestHeap::new();
        let bp = heap.allocate(64).unwrap();
        let _guard = heap.allocate(64).unwrap();
        heap.free(bp).unwrap();
        assert_eq!(heap.free(bp), Err(FreeError::NotAllocated));
    }

    #[test]
    fn reallocation_copies_the_payload() {
        let mut heap = TestHeap::new();
        let p = heap.allocate(96).unwrap();
        fill(&mut heap, p, 12, 0xABAB_ABAB_ABAB_ABAB);
        let _guard = heap.allocate(1).unwrap();

        let q = heap.reallocate(Some(p), 200).unwrap();
        assert_ne!(q, p);
        for i in 0..12 {
            assert_eq!(heap.arena.load(q + i * WORD_SIZE), 0xABAB_ABAB_ABAB_ABAB);
        }
        assert!(heap.check_invariants());
    }

    #[test]
    fn reallocation_of_nothing_is_an_allocation() {
        let mut heap = TestHeap::new();
        let bp = heap.reallocate(None, 64).unwrap();
        assert_eq!(heap.header(bp), Tag::allocated(80));
    }

    #[test]
    fn reallocation_to_zero_is_a_free() {
        let mut heap = TestHeap::new();
        let bp = heap.allocate(64).unwrap();
        assert_eq!(heap.reallocate(Some(bp), 0), None);
        assert_eq!(heap.free_bytes(), heap.claimed_bytes() - SKELETON_BYTES);
    }

    #[test]
    fn failed_reallocation_leaves_the_block_intact() {
        let mut heap = TestHeap::new();
        let bp = heap.allocate(32).unwrap();
        fill(&mut heap, bp, 4, 0x1122_3344_5566_7788);

        assert_eq!(heap.reallocate(Some(bp), 16 * 1024), None);
        assert_eq!(heap.header(bp), Tag::allocated(48));
        for i in 0..4 {
            assert_eq!(heap.arena.load(bp + i * WORD_SIZE), 0x1122_3344_5566_7788);
        }
    }

    #[test]
    fn zero_allocation_is_zeroed() {
        let mut heap = TestHeap::new();
        let bp = heap.allocate(80).unwrap();
        fill(&mut heap, bp, 10, u64::MAX);
        heap.free(bp).unwrap();

        // reuses the dirtied memory and must clean it
        let zp = heap.zero_allocate(10, 8).unwrap();
        for i in 0..10 {
            assert_eq!(heap.arena.load(zp + i * WORD_SIZE), 0);
        }
    }

    #[test]
    fn zero_allocation_refuses_overflowing_requests() {
        let mut heap = TestHeap::new();
        assert_eq!(heap.zero_allocate(usize::MAX, 2), None);
    }

    #[test]
    fn block_containing_maps_interior_offsets() {
        let mut heap = TestHeap::new();
        let p = heap.allocate(64).unwrap();
        let q = heap.allocate(64).unwrap();

        assert_eq!(heap.block_containing(p), Some(p));
        assert_eq!(heap.block_containing(p + 40), Some(p));
        assert_eq!(heap.block_containing(q + 8), Some(q));
        // the footer/header seam between the blocks belongs to neither payload
        assert_eq!(heap.block_containing(q - WORD_SIZE), None);
    }

    #[test]
    fn checker_notices_a_clobbered_footer() {
        let mut heap = TestHeap::new();
        let bp = heap.allocate(64).unwrap();
        assert!(heap.check_invariants());

        let size = heap.header(bp).size();
        heap.arena.store(bp + size - ALIGNMENT, Tag::free(64).as_raw());
        assert!(!heap.check_invariants());
    }
}
