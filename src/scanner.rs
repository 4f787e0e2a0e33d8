use crate::{
    globals::WORD_SIZE,
    layout::{read_layout, Layout},
    util::is_aligned,
};

/// Heap membership test used to reject words that cannot be pointers.
pub trait HeapBounds {
    fn is_on_heap(&self, word: usize) -> bool;
}

/// Half-open address range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapRange {
    pub start: usize,
    pub end: usize,
}

impl HeapRange {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl HeapBounds for HeapRange {
    #[inline]
    fn is_on_heap(&self, word: usize) -> bool {
        word >= self.start && word < self.end
    }
}

/// Handle to a heap block as seen by the scanner.
///
/// # Safety
/// For a head block, [`address`](BlockHandle::address) must be readable and hold a layout value
/// that is valid for [`read_layout`]. Any external record it names must outlive the borrow of
/// the handle.
pub unsafe trait BlockHandle: PartialEq + Sized {
    /// Start address of the block. For a head block this is word 0 of the allocation.
    fn address(&self) -> usize;
    /// Head block of the allocation this block belongs to.
    fn find_head(&self) -> Self;
}

/// Per-object cursor that decides which words of an object are pointers.
///
/// The mark phase creates one scanner per object and calls [`classify`](Self::classify) once
/// for every word of the object in ascending order.
pub struct ObjectScanner<'a, H: HeapBounds + ?Sized> {
    index: usize,
    layout: Layout<'a>,
    heap: &'a H,
}

impl<'a, H: HeapBounds + ?Sized> ObjectScanner<'a, H> {
    /// Reads the layout word of the allocation starting at `block`.
    ///
    /// `block` must be the head of its allocation. Debug builds check this.
    pub fn new<B: BlockHandle>(block: &'a B, heap: &'a H) -> Self {
        #[cfg(debug_assertions)]
        {
            if *block != block.find_head() {
                panic!("gc: object scanner must start at head");
            }
        }
        // SAFETY: guaranteed by `BlockHandle` for head blocks.
        let layout = unsafe { read_layout(block.address() as *const usize) };
        Self::from_layout(layout, heap)
    }

    pub fn from_layout(layout: Layout<'a>, heap: &'a H) -> Self {
        Self {
            index: 0,
            layout,
            heap,
        }
    }

    #[inline]
    pub fn layout(&self) -> &Layout<'a> {
        &self.layout
    }

    /// Position of the next word within the layout period.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// True when the object cannot contain pointers and scanning it can be skipped.
    #[inline]
    pub fn is_pointer_free(&self) -> bool {
        self.layout.is_pointer_free()
    }

    /// Classifies the next word of the object. `word` is the value stored at `addr_of_word`,
    /// `parent` the start of the object.
    pub fn classify(&mut self, word: usize, parent: usize, addr_of_word: usize) -> bool {
        debug_assert!(addr_of_word >= parent, "word {:#x} before object {:#x}", addr_of_word, parent);
        debug_assert!(is_aligned(addr_of_word, WORD_SIZE), "unaligned word {:#x}", addr_of_word);

        let index = self.index;
        self.index = (index + 1) % self.layout.size();

        if !self.heap.is_on_heap(word) {
            // Definitely isn't a pointer.
            return false;
        }

        self.layout.is_pointer_word(index)
    }
}
