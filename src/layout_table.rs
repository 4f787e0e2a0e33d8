use std::ptr;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::globals::{NATIVE_WORD_WIDTH, WORD_SIZE};

/// Inline layout of objects without pointers: one word, empty bitmap.
pub const POINTER_FREE_LAYOUT: usize = 0b11;

#[derive(Hash, PartialEq, Eq)]
struct RecordKey {
    size: usize,
    bitmap: Box<[u8]>,
}

/// Builds layout values for object types.
///
/// Small layouts are packed into the layout word. Larger ones become external records: a size
/// word followed by the bitmap bytes. Records are interned, so every object of a type shares one
/// record, and they are never modified or freed while the table lives. Objects referencing a
/// record must not outlive the table.
pub struct LayoutTable {
    records: Mutex<HashMap<RecordKey, Box<[usize]>>>,
}

impl LayoutTable {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Layout value for an object whose word `i` is a pointer iff `pointers[i]`.
    pub fn layout_for(&self, pointers: &[bool]) -> usize {
        let mut bitmap = vec![0u8; (pointers.len() + 7) / 8];
        for (index, _) in pointers.iter().enumerate().filter(|(_, is_ptr)| **is_ptr) {
            bitmap[index / 8] |= 1 << (index % 8);
        }
        self.layout_for_bitmap(pointers.len(), &bitmap)
    }

    /// Layout value for an object of `size` words with the given byte-packed pointer bitmap.
    /// Bits past `size` are ignored.
    pub fn layout_for_bitmap(&self, size: usize, bitmap: &[u8]) -> usize {
        let len = (size + 7) / 8;
        assert!(
            bitmap.len() >= len,
            "bitmap of {} bytes cannot describe {} words",
            bitmap.len(),
            size
        );
        let mut bitmap = bitmap[..len].to_vec();
        if size % 8 != 0 {
            bitmap[len - 1] &= (1u8 << (size % 8)) - 1;
        }

        if bitmap.iter().all(|byte| *byte == 0) {
            return POINTER_FREE_LAYOUT;
        }

        let packed = bitmap
            .iter()
            .take(8)
            .enumerate()
            .fold(0u64, |acc, (i, byte)| acc | (*byte as u64) << (8 * i));
        if let Some(raw) = NATIVE_WORD_WIDTH.encode_inline(size, packed) {
            return raw as usize;
        }

        self.intern(size, bitmap.into_boxed_slice())
    }

    fn intern(&self, size: usize, bitmap: Box<[u8]>) -> usize {
        let key = RecordKey { size, bitmap };
        let mut records = self.records.lock();
        if let Some(record) = records.get(&key) {
            return record.as_ptr() as usize;
        }

        let words = 1 + (key.bitmap.len() + WORD_SIZE - 1) / WORD_SIZE;
        let mut record = vec![0usize; words].into_boxed_slice();
        record[0] = size;
        unsafe {
            ptr::copy_nonoverlapping(
                key.bitmap.as_ptr(),
                record.as_mut_ptr().add(1).cast::<u8>(),
                key.bitmap.len(),
            );
        }
        let raw = record.as_ptr() as usize;
        log::trace!("gc: layout record for {} words at {:#x}", size, raw);
        records.insert(key, record);
        raw
    }

    /// Number of external records created so far.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LayoutTable {
    fn default() -> Self {
        Self::new()
    }
}
