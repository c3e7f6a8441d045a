/// Reports an internal inconsistency and stops the measurement.
///
/// The message is logged at error level before panicking; release builds are
/// compiled with `panic = "abort"`, so the measured process aborts instead of
/// recording corrupted identities.
#[macro_export]
macro_rules! bug {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::tracing::error!("[Score-P BUG] {}", msg);
        panic!("[Score-P BUG] {}", msg)
    }};
}

/// [`bug!`] if `cond` holds.
#[macro_export]
macro_rules! bug_on {
    ($cond:expr, $($arg:tt)*) => {
        if $cond {
            $crate::bug!($($arg)*);
        }
    };
}

/// Rounds `value` up to the next multiple of `alignment` (a power of two).
pub(crate) const fn round_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}
