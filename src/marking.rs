use crate::{
    globals::WORD_SIZE,
    scanner::{BlockHandle, ObjectScanner},
    space::{BlockSpace, BlockState},
    Config,
};

/// Counters collected by one marking run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MarkStats {
    /// Objects taken off the worklist.
    pub objects: usize,
    /// Objects skipped because their layout has no pointers.
    pub pointer_free: usize,
    pub words_scanned: usize,
    /// Words classified as pointers.
    pub pointers_found: usize,
}

/// Marks everything reachable from a set of roots, using object layouts to decide which words
/// of an object to follow.
pub struct PreciseMarking<'a> {
    space: &'a BlockSpace,
    worklist: Vec<usize>,
    stats: MarkStats,
    verbose: bool,
}

impl<'a> PreciseMarking<'a> {
    pub fn new(space: &'a BlockSpace, config: &Config) -> Self {
        Self {
            space,
            worklist: vec![],
            stats: MarkStats::default(),
            verbose: config.verbose,
        }
    }

    /// Marks the allocation `word` points into, if any.
    pub fn mark_root(&mut self, word: usize) {
        let block = match self.space.block_of(word) {
            Some(block) => block,
            None => return,
        };
        if block.state() == BlockState::Free {
            return;
        }
        let head = block.find_head();
        if self.space.mark(head.index()) {
            self.worklist.push(head.index());
        }
    }

    /// Treats every word in `[from, to)` as a possible root.
    ///
    /// # Safety
    /// The range must be readable and word aligned.
    pub unsafe fn mark_range(&mut self, from: *const usize, to: *const usize) {
        let mut scan = from;
        while scan < to {
            self.mark_root(scan.read());
            scan = scan.add(1);
        }
    }

    /// Drains the worklist and returns what was done.
    pub fn run(&mut self) -> MarkStats {
        while let Some(index) = self.worklist.pop() {
            self.scan_object(index);
        }
        logln_if!(
            self.verbose,
            "gc: marked {} objects ({} pointer free), {} words scanned, {} pointers",
            self.stats.objects,
            self.stats.pointer_free,
            self.stats.words_scanned,
            self.stats.pointers_found
        );
        std::mem::take(&mut self.stats)
    }

    fn scan_object(&mut self, index: usize) {
        let space = self.space;
        let block = space.block(index);
        let mut scanner = ObjectScanner::new(&block, space);
        self.stats.objects += 1;
        if scanner.is_pointer_free() {
            // Fast path for objects like large byte buffers.
            self.stats.pointer_free += 1;
            return;
        }

        let parent = block.address();
        let end = block.object_end();
        // The first word is the layout itself.
        let mut addr = parent + WORD_SIZE;
        while addr < end {
            let word = space.load(addr);
            self.stats.words_scanned += 1;
            if scanner.classify(word, parent, addr) {
                self.stats.pointers_found += 1;
                self.mark_root(word);
            }
            addr += WORD_SIZE;
        }
    }
}
