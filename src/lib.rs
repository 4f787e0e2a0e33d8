//! # Precise object scanning
//!
//! Object scanner for block based garbage collectors running compiled code. The code generator
//! stores a layout value in the first word of every allocation; the scanner decodes it and tells
//! the mark phase which words of the object are pointers. Objects without layout information are
//! scanned conservatively.
//!
//! - [layout]: the three layout encodings and their decoder
//! - [scanner]: the per-object cursor used by the mark phase
//! - [layout_table]: builds layout values and shared layout records
//! - [space] and [marking]: a small block heap and a mark loop driving the scanner
macro_rules! logln_if {
    ($cond: expr, $($t:tt)*) => {
        if $cond {
            log::debug!($($t)*);
        }
    };
}

pub mod error;
pub mod globals;
pub mod layout;
pub mod layout_table;
pub mod marking;
pub mod scanner;
pub mod space;
pub mod util;


pub use error::{PlatformError, SpaceError};
pub use layout::{Layout, LayoutWord, WordWidth, UNKNOWN_LAYOUT};
pub use layout_table::{LayoutTable, POINTER_FREE_LAYOUT};
pub use marking::{MarkStats, PreciseMarking};
pub use scanner::{BlockHandle, HeapBounds, HeapRange, ObjectScanner};
pub use space::{Block, BlockSpace, BlockState};

/// Layout parameters of the running target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlatformInfo {
    pub word_width: WordWidth,
    pub size_field_bits: u32,
    pub inline_bitmap_bits: u32,
}

pub struct GCPlatform;

impl GCPlatform {
    /// Checks once that the target word width has an inline layout format.
    pub fn initialize() -> Result<PlatformInfo, PlatformError> {
        let word_width = WordWidth::try_from(usize::BITS)?;
        debug_assert_eq!(word_width, globals::NATIVE_WORD_WIDTH);
        let info = PlatformInfo {
            word_width,
            size_field_bits: globals::SIZE_FIELD_BITS,
            inline_bitmap_bits: word_width.inline_bitmap_bits(),
        };
        log::info!(
            "gc: precise layouts for {}-bit words ({} size bits, {} bitmap bits)",
            word_width.bits(),
            info.size_field_bits,
            info.inline_bitmap_bits
        );
        Ok(info)
    }

    /// Like [`initialize`](Self::initialize) but aborts the process on an unsupported target.
    pub fn initialize_or_abort() -> PlatformInfo {
        match Self::initialize() {
            Ok(info) => info,
            Err(err) => util::fatal(&err.to_string()),
        }
    }
}

/// Configuration for [`BlockSpace`] and [`PreciseMarking`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Size of the block space in bytes, rounded down to whole blocks.
    pub heap_size: usize,
    /// Enables verbose logging
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heap_size: 1024 * 1024,
            verbose: false,
        }
    }
}
