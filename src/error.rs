use std::io;

use thiserror::Error;

/// The target cannot use precise layouts.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    #[error("unknown pointer size: {bits} bits")]
    UnsupportedWordWidth { bits: u32 },
}

#[derive(Debug, Error)]
pub enum SpaceError {
    #[error("could not map {size} bytes for the block space")]
    Map {
        size: usize,
        #[source]
        source: io::Error,
    },
    #[error("heap size {size} cannot hold a single block")]
    TooSmall { size: usize },
}
