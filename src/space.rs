//! A minimal block heap.
//!
//! The space is one anonymous mapping cut into blocks of [`BYTES_PER_BLOCK`] bytes. Every block
//! carries a state:
//!
//! +-------+-------------------------------------------------------+
//! | Free  | not part of any allocation                            |
//! | Head  | first block of an allocation, holds the layout word   |
//! | Tail  | continuation of the allocation started by a head      |
//! | Mark  | head block of an allocation reached by the mark phase |
//! +-------+-------------------------------------------------------+
//!
//! Blocks are handed out by bumping a cursor and are never reused.
use std::{
    fmt,
    ptr::{self, NonNull},
    sync::atomic::{AtomicUsize, Ordering},
};

use atomic::Atomic;
use memmap2::MmapMut;

use crate::{
    error::SpaceError,
    globals::{BYTES_PER_BLOCK, WORD_SIZE},
    scanner::{BlockHandle, HeapBounds},
    util::is_aligned,
    Config,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockState {
    Free,
    Head,
    Tail,
    Mark,
}

pub struct BlockSpace {
    map: MmapMut,
    start: usize,
    end: usize,
    states: Box<[Atomic<BlockState>]>,
    next_free: AtomicUsize,
}

impl BlockSpace {
    pub fn new(config: &Config) -> Result<Self, SpaceError> {
        let block_count = config.heap_size / BYTES_PER_BLOCK;
        if block_count == 0 {
            return Err(SpaceError::TooSmall {
                size: config.heap_size,
            });
        }
        let size = block_count * BYTES_PER_BLOCK;
        let mut map = MmapMut::map_anon(size).map_err(|source| SpaceError::Map { size, source })?;
        let start = map.as_mut_ptr() as usize;
        debug_assert!(is_aligned(start, BYTES_PER_BLOCK));

        let states = (0..block_count)
            .map(|_| Atomic::new(BlockState::Free))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        logln_if!(
            config.verbose,
            "gc: block space {:#x}..{:#x} ({} blocks)",
            start,
            start + size,
            block_count
        );
        Ok(Self {
            map,
            start,
            end: start + size,
            states,
            next_free: AtomicUsize::new(0),
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    pub fn block_count(&self) -> usize {
        self.states.len()
    }

    /// Number of blocks not yet handed out.
    pub fn available_blocks(&self) -> usize {
        self.block_count() - self.next_free.load(Ordering::Acquire)
    }

    /// Allocates an object of `size` bytes described by `layout`.
    ///
    /// The layout word is stored in front of the object and the returned pointer is the word
    /// right after it. Memory is zeroed. Returns `None` once the space is exhausted or when
    /// `size` is larger than any space could hold.
    pub fn alloc(&self, size: usize, layout: usize) -> Option<NonNull<usize>> {
        let blocks = size.checked_add(WORD_SIZE + BYTES_PER_BLOCK - 1)? / BYTES_PER_BLOCK;
        let first = self
            .next_free
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                let end = next.checked_add(blocks)?;
                if end > self.states.len() {
                    None
                } else {
                    Some(end)
                }
            })
            .ok()?;

        for state in &self.states[first + 1..first + blocks] {
            state.store(BlockState::Tail, Ordering::Release);
        }
        let object = (self.start + first * BYTES_PER_BLOCK) as *mut usize;
        unsafe {
            object.write(layout);
        }
        self.states[first].store(BlockState::Head, Ordering::Release);
        NonNull::new(unsafe { object.add(1) })
    }

    pub fn block(&self, index: usize) -> Block<'_> {
        assert!(index < self.block_count(), "block {} out of range", index);
        Block { space: self, index }
    }

    /// Block containing `addr`, if `addr` is inside the space.
    pub fn block_of(&self, addr: usize) -> Option<Block<'_>> {
        if !self.is_on_heap(addr) {
            return None;
        }
        Some(Block {
            space: self,
            index: (addr - self.start) / BYTES_PER_BLOCK,
        })
    }

    pub fn state(&self, index: usize) -> BlockState {
        self.states[index].load(Ordering::Acquire)
    }

    /// Marks an unmarked head block. Returns `true` if this call marked it.
    pub fn mark(&self, head: usize) -> bool {
        self.states[head]
            .compare_exchange(
                BlockState::Head,
                BlockState::Mark,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Whether the allocation containing `addr` has been marked.
    pub fn is_marked(&self, addr: usize) -> bool {
        self.block_of(addr)
            .map_or(false, |block| block.find_head().state() == BlockState::Mark)
    }

    /// Turns marked heads back into plain heads. Returns how many marks were cleared.
    pub fn clear_marks(&self) -> usize {
        self.states
            .iter()
            .filter(|state| {
                // Free, unmarked and tail blocks fail the exchange and keep their state.
                state
                    .compare_exchange(
                        BlockState::Mark,
                        BlockState::Head,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            })
            .count()
    }

    /// Reads the word at `addr`.
    pub fn load(&self, addr: usize) -> usize {
        assert!(
            self.is_on_heap(addr) && is_aligned(addr, WORD_SIZE),
            "invalid heap word {:#x}",
            addr
        );
        // SAFETY: the whole mapping is readable for the lifetime of the space.
        unsafe { ptr::read(addr as *const usize) }
    }
}

impl HeapBounds for BlockSpace {
    #[inline]
    fn is_on_heap(&self, word: usize) -> bool {
        word >= self.start && word < self.end
    }
}

#[derive(Clone, Copy)]
pub struct Block<'s> {
    space: &'s BlockSpace,
    index: usize,
}

impl<'s> Block<'s> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> BlockState {
        self.space.state(self.index)
    }

    /// End address of the allocation this head block starts.
    pub fn object_end(&self) -> usize {
        let mut end = self.index + 1;
        while end < self.space.block_count() && self.space.state(end) == BlockState::Tail {
            end += 1;
        }
        self.space.start + end * BYTES_PER_BLOCK
    }
}

impl PartialEq for Block<'_> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.space, other.space) && self.index == other.index
    }
}

impl Eq for Block<'_> {}

impl fmt::Debug for Block<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("index", &self.index)
            .field("address", &format_args!("{:#x}", self.address()))
            .field("state", &self.state())
            .finish()
    }
}

// SAFETY: every block lies inside the mapping, which lives as long as the space. Head blocks
// start with the layout word written by `BlockSpace::alloc`, free blocks read as zero.
unsafe impl BlockHandle for Block<'_> {
    fn address(&self) -> usize {
        self.space.start + self.index * BYTES_PER_BLOCK
    }

    fn find_head(&self) -> Self {
        let mut index = self.index;
        while index > 0 && self.space.state(index) == BlockState::Tail {
            index -= 1;
        }
        Block {
            space: self.space,
            index,
        }
    }
}
