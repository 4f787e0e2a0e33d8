//! Object layouts as emitted by the code generator.
//!
//! The first word of every precisely typed allocation describes which words of the object hold
//! pointers. The word is encoded in one of three ways:
//!
//! +-----------------+--------------------------------------------------------------+
//! | raw value       | meaning                                                      |
//! +-----------------+--------------------------------------------------------------+
//! | 0               | Unknown layout, every word may be a pointer.                 |
//! | odd             | Inline layout: tag bit, size field, bitmap in the high bits. |
//! | even, nonzero   | Address of an external record: size word + bitmap bytes.     |
//! +-----------------+--------------------------------------------------------------+
//!
//! Inline layouts split the word like this (low bits first):
//!
//! +-------+------+------------+--------------+
//! | width | tag  | size field | bitmap       |
//! +-------+------+------------+--------------+
//! | 16    | 1    | 4          | 11           |
//! | 32    | 1    | 5          | 26           |
//! | 64    | 1    | 6          | 57           |
//! +-------+------+------------+--------------+
//!
//! Bitmaps repeat with a period of `size` words, so a layout describing one array element
//! describes the whole array.
use std::{ptr::NonNull, slice};

use modular_bitfield::prelude::*;

use crate::{error::PlatformError, globals::NATIVE_WORD_WIDTH};

/// Raw layout value of objects without compile-time layout.
pub const UNKNOWN_LAYOUT: usize = 0;

#[bitfield(bits = 16)]
#[derive(Clone, Copy)]
struct InlineWord16 {
    tag: bool,
    size: B4,
    bitmap: B11,
}

#[bitfield(bits = 32)]
#[derive(Clone, Copy)]
struct InlineWord32 {
    tag: bool,
    size: B5,
    bitmap: B26,
}

#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
struct InlineWord64 {
    tag: bool,
    size: B6,
    bitmap: B57,
}

/// Native word widths the layout encoding is defined for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WordWidth {
    W16,
    W32,
    W64,
}

impl WordWidth {
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            16 => Some(Self::W16),
            32 => Some(Self::W32),
            64 => Some(Self::W64),
            _ => None,
        }
    }

    pub const fn bits(self) -> u32 {
        match self {
            Self::W16 => 16,
            Self::W32 => 32,
            Self::W64 => 64,
        }
    }

    /// Width of the size field in an inline layout.
    pub const fn size_field_bits(self) -> u32 {
        match self {
            Self::W16 => 4,
            Self::W32 => 5,
            Self::W64 => 6,
        }
    }

    /// Bits left for the pointer bitmap once the tag and size field are taken.
    pub const fn inline_bitmap_bits(self) -> u32 {
        self.bits() - 1 - self.size_field_bits()
    }

    /// Splits an odd raw layout value into its size field and bitmap.
    pub fn split_inline(self, raw: u64) -> InlineFields {
        debug_assert!(raw & 1 != 0, "inline layouts carry a tag bit");
        match self {
            Self::W16 => {
                let word = InlineWord16::from_bytes((raw as u16).to_le_bytes());
                InlineFields {
                    size: word.size() as usize,
                    bitmap: word.bitmap() as u64,
                }
            }
            Self::W32 => {
                let word = InlineWord32::from_bytes((raw as u32).to_le_bytes());
                InlineFields {
                    size: word.size() as usize,
                    bitmap: word.bitmap() as u64,
                }
            }
            Self::W64 => {
                let word = InlineWord64::from_bytes(raw.to_le_bytes());
                InlineFields {
                    size: word.size() as usize,
                    bitmap: word.bitmap(),
                }
            }
        }
    }

    /// Builds an inline layout value. Returns `None` when `size` words cannot be described
    /// inline, in which case the layout needs an external record.
    pub fn encode_inline(self, size: usize, bitmap: u64) -> Option<u64> {
        if size == 0 || size >= self.inline_bitmap_bits() as usize {
            return None;
        }
        if bitmap >> self.inline_bitmap_bits() != 0 {
            return None;
        }
        let raw = match self {
            Self::W16 => {
                let word = InlineWord16::new()
                    .with_tag(true)
                    .with_size_checked(size as u8)
                    .ok()?
                    .with_bitmap_checked(bitmap as u16)
                    .ok()?;
                u16::from_le_bytes(word.into_bytes()) as u64
            }
            Self::W32 => {
                let word = InlineWord32::new()
                    .with_tag(true)
                    .with_size_checked(size as u8)
                    .ok()?
                    .with_bitmap_checked(bitmap as u32)
                    .ok()?;
                u32::from_le_bytes(word.into_bytes()) as u64
            }
            Self::W64 => {
                let word = InlineWord64::new()
                    .with_tag(true)
                    .with_size_checked(size as u8)
                    .ok()?
                    .with_bitmap_checked(bitmap)
                    .ok()?;
                u64::from_le_bytes(word.into_bytes())
            }
        };
        Some(raw)
    }
}

impl TryFrom<u32> for WordWidth {
    type Error = PlatformError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        Self::from_bits(bits).ok_or(PlatformError::UnsupportedWordWidth { bits })
    }
}

/// Fields of an inline layout value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InlineFields {
    pub size: usize,
    pub bitmap: u64,
}

/// A raw layout value sorted by encoding, before any memory is touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutWord {
    Unknown,
    Inline(InlineFields),
    External(NonNull<usize>),
}

impl LayoutWord {
    pub fn parse(raw: usize) -> Self {
        if raw & 1 != 0 {
            return Self::Inline(NATIVE_WORD_WIDTH.split_inline(raw as u64));
        }
        NonNull::new(raw as *mut usize).map_or(Self::Unknown, Self::External)
    }

    /// Turns the raw value into a [`Layout`], reading the external record if there is one.
    ///
    /// # Safety
    /// An external record address must point to a word-aligned size word followed by
    /// `ceil(size / 8)` bitmap bytes, and the record must stay unchanged for `'a`.
    pub unsafe fn resolve<'a>(self) -> Layout<'a> {
        match self {
            Self::Unknown => Layout::Unknown,
            Self::Inline(fields) => Layout::Inline {
                size: fields.size.max(1),
                bitmap: fields.bitmap as usize,
            },
            Self::External(record) => {
                let size = record.as_ptr().read();
                if size == 0 {
                    return Layout::Unknown;
                }
                let bytes = record.as_ptr().add(1).cast::<u8>();
                Layout::External {
                    size,
                    bitmap: slice::from_raw_parts(bytes, (size + 7) / 8),
                }
            }
        }
    }
}

/// Decoded layout of one object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout<'a> {
    /// No layout was emitted, every word is a candidate pointer.
    Unknown,
    /// Layout packed into the layout word itself.
    Inline { size: usize, bitmap: usize },
    /// Layout stored in a shared, immutable record.
    External { size: usize, bitmap: &'a [u8] },
}

impl<'a> Layout<'a> {
    /// Number of words after which the bitmap repeats. Never zero, even for a hand-built
    /// layout with a zero size.
    #[inline]
    pub fn size(&self) -> usize {
        match *self {
            Self::Unknown => 1,
            Self::Inline { size, .. } | Self::External { size, .. } => size.max(1),
        }
    }

    /// Objects with zero pointers never get an external record, so only the inline bitmap is
    /// looked at.
    #[inline]
    pub fn is_pointer_free(&self) -> bool {
        match *self {
            Self::Inline { bitmap, .. } => bitmap == 0,
            Self::Unknown | Self::External { .. } => false,
        }
    }

    /// Whether word `index` of the object is declared to hold a pointer.
    ///
    /// Inline bits past the word are clear. Words past the end of a short external bitmap are
    /// treated as pointers.
    #[inline]
    pub fn is_pointer_word(&self, index: usize) -> bool {
        let index = index % self.size();
        match *self {
            Self::Unknown => true,
            Self::Inline { bitmap, .. } => u32::try_from(index)
                .ok()
                .and_then(|shift| bitmap.checked_shr(shift))
                .map_or(false, |bits| bits & 1 != 0),
            Self::External { bitmap, .. } => bitmap
                .get(index / 8)
                .map_or(true, |byte| (byte >> (index % 8)) & 1 != 0),
        }
    }
}

/// Decodes a raw layout value.
///
/// # Safety
/// See [`LayoutWord::resolve`].
pub unsafe fn decode<'a>(raw: usize) -> Layout<'a> {
    LayoutWord::parse(raw).resolve()
}

/// Reads and decodes the layout word stored at the start of an allocation.
///
/// # Safety
/// `object` must be readable and its first word must be a layout value satisfying
/// [`LayoutWord::resolve`].
pub unsafe fn read_layout<'a>(object: *const usize) -> Layout<'a> {
    decode(object.read())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WIDTHS: [WordWidth; 3] = [WordWidth::W16, WordWidth::W32, WordWidth::W64];

    #[test]
    fn field_widths() {
        assert_eq!(WordWidth::W16.inline_bitmap_bits(), 11);
        assert_eq!(WordWidth::W32.inline_bitmap_bits(), 26);
        assert_eq!(WordWidth::W64.inline_bitmap_bits(), 57);
        assert_eq!(WordWidth::try_from(8u32), Err(PlatformError::UnsupportedWordWidth { bits: 8 }));
        assert_eq!(WordWidth::try_from(128u32), Err(PlatformError::UnsupportedWordWidth { bits: 128 }));
    }

    #[test]
    fn parse_sorts_by_encoding() {
        assert_eq!(LayoutWord::parse(0), LayoutWord::Unknown);
        assert!(matches!(LayoutWord::parse(647), LayoutWord::Inline(_)));
        assert!(matches!(LayoutWord::parse(0x1000), LayoutWord::External(_)));
    }

    #[test]
    fn zero_size_field_still_describes_one_word() {
        // tag bit only
        let layout = unsafe { decode(1) };
        assert_eq!(layout, Layout::Inline { size: 1, bitmap: 0 });
        assert!(layout.is_pointer_free());
    }

    #[test]
    fn empty_external_record_is_unknown() {
        let record = [0usize; 2];
        let layout = unsafe { decode(record.as_ptr() as usize) };
        assert_eq!(layout, Layout::Unknown);
    }

    #[test]
    fn encode_rejects_oversized_layouts() {
        for width in WIDTHS {
            let limit = width.inline_bitmap_bits() as usize;
            assert!(width.encode_inline(limit - 1, 1).is_some());
            assert!(width.encode_inline(limit, 1).is_none());
            assert!(width.encode_inline(0, 0).is_none());
            assert!(width.encode_inline(1, 1 << width.inline_bitmap_bits()).is_none());
        }
    }

    proptest! {
        #[test]
        fn split_matches_shifts(raw in any::<u64>(), pick in 0usize..3) {
            let width = WIDTHS[pick];
            let bits = width.bits();
            let s = width.size_field_bits();
            let raw = (raw | 1) & (u64::MAX >> (64 - bits));
            let fields = width.split_inline(raw);
            prop_assert_eq!(fields.size as u64, (raw >> 1) & ((1 << s) - 1));
            prop_assert_eq!(fields.bitmap, raw >> (1 + s));
        }

        #[test]
        fn encode_then_split(pick in 0usize..3, size in 1usize..11, bitmap in 0u64..2048) {
            let width = WIDTHS[pick];
            let raw = width.encode_inline(size, bitmap).unwrap();
            prop_assert_eq!(width.split_inline(raw), InlineFields { size, bitmap });
        }
    }
}
