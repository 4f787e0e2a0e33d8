use backtrace::Backtrace;

/// Reports an unrecoverable runtime condition and aborts the process.
///
/// Used for platform defects where continuing could corrupt the heap.
#[cold]
pub fn fatal(message: &str) -> ! {
    let trace = Backtrace::new();
    log::error!("gc: {}\n{:?}", message, trace);
    std::process::abort()
}

#[inline(always)]
pub const fn is_aligned(addr: usize, align: usize) -> bool {
    addr & align.wrapping_sub(1) == 0
}
