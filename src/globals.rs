use std::mem::size_of;

use crate::layout::WordWidth;

#[cfg(not(any(
    target_pointer_width = "16",
    target_pointer_width = "32",
    target_pointer_width = "64"
)))]
compile_error!("precise scanning supports 16, 32 and 64 bit pointers only");

pub const WORD_SIZE: usize = size_of::<usize>();
pub const WORD_BITS: u32 = usize::BITS;

/// Word width of the target. Evaluated at compile time so an unknown pointer size is a build error.
pub const NATIVE_WORD_WIDTH: WordWidth = match WordWidth::from_bits(WORD_BITS) {
    Some(width) => width,
    None => panic!("unknown pointer size"),
};

/// Bits used by the size field of an inline layout on this target.
pub const SIZE_FIELD_BITS: u32 = NATIVE_WORD_WIDTH.size_field_bits();

/// Every block holds four words. An allocation always starts at a block boundary.
pub const BYTES_PER_BLOCK: usize = 4 * WORD_SIZE;
pub const WORDS_PER_BLOCK: usize = BYTES_PER_BLOCK / WORD_SIZE;
