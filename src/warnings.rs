use std::sync::atomic::{AtomicBool, Ordering};

use crate::config;

static ENABLED: AtomicBool = AtomicBool::new(true);

pub(crate) enum RuntimeWarning<'a> {
    /// (waiting rank, awaited rank, seconds waited)
    CollectiveTimeout(usize, usize, f64),
    /// (path, reason)
    FilterFile(&'a str, &'a str),
    /// (innermost entered region, exited region)
    UnbalancedExit(&'a str, &'a str),
    /// (executable, reason)
    SymbolTable(&'a str, &'a str),
}

impl<'a> RuntimeWarning<'a> {
    pub(crate) fn enable_warnings() {
        ENABLED.store(true, Ordering::Relaxed);
    }
    pub(crate) fn disable_warnings() {
        ENABLED.store(false, Ordering::Relaxed);
    }

    fn print_warning(&self) -> bool {
        if ENABLED.load(Ordering::Relaxed) {
            match self {
                RuntimeWarning::CollectiveTimeout(_, _, elapsed) => {
                    config().collective_warning.unwrap_or(true) && *elapsed > 0.0
                }
                RuntimeWarning::FilterFile(_, _) => config().filter_warning.unwrap_or(true),
                RuntimeWarning::UnbalancedExit(_, _) => {
                    config().unbalanced_exit_warning.unwrap_or(true)
                }
                RuntimeWarning::SymbolTable(_, _) => true,
            }
        } else {
            false
        }
    }

    #[cfg(feature = "runtime-warnings-panic")]
    fn panic(&self, msg: &str) {
        match self {
            RuntimeWarning::CollectiveTimeout(_, _, _) => {}
            _ => panic!(
                "{msg}
                Note this warning causes a panic because scorep-core was compiled with the `runtime-warnings-panic` feature.
                To view backtrace set RUST_LIB_BACKTRACE=1.
                {}",
                std::backtrace::Backtrace::capture()
            ),
        }
    }

    pub(crate) fn print(self) {
        #[cfg(not(feature = "disable-runtime-warnings"))]
        if self.print_warning() {
            let msg = match self {
                RuntimeWarning::CollectiveTimeout(rank, source, elapsed) => {
                    format!("[Score-P WARNING] rank {rank} has been waiting {elapsed:.1} seconds for rank {source} in a collective operation. Potential deadlock detected.
                    All ranks must issue the same collectives in the same order.
                    The timeout can be set via SCOREP_DEADLOCK_TIMEOUT, the current timeout is {} seconds. Set SCOREP_COLLECTIVE_WARNING=false to disable this warning.",
                        config().deadlock_timeout)
                }
                RuntimeWarning::FilterFile(path, reason) => {
                    format!("[Score-P WARNING] unable to use filter file '{path}': {reason}. Measurement continues without filtering.
                    Set SCOREP_FILTER_WARNING=false to disable this warning.")
                }
                RuntimeWarning::UnbalancedExit(expected, got) => {
                    format!("[Score-P WARNING] exit of region '{got}' while '{expected}' is the innermost entered region.
                    Set SCOREP_UNBALANCED_EXIT_WARNING=false to disable this warning.")
                }
                RuntimeWarning::SymbolTable(exe, reason) => {
                    format!("[Score-P WARNING] no symbol table for '{exe}': {reason}. Compiler instrumented regions will not be named.")
                }
            };

            #[cfg(feature = "runtime-warnings-panic")]
            self.panic(&msg);
            tracing::warn!("{msg}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_silences_every_warning() {
        RuntimeWarning::disable_warnings();
        let silenced = !RuntimeWarning::FilterFile("f", "r").print_warning()
            && !RuntimeWarning::UnbalancedExit("a", "b").print_warning()
            && !RuntimeWarning::SymbolTable("exe", "r").print_warning();
        RuntimeWarning::enable_warnings();
        assert!(silenced);
        assert!(RuntimeWarning::SymbolTable("exe", "r").print_warning());
        assert!(!RuntimeWarning::CollectiveTimeout(0, 1, 0.0).print_warning());
    }
}
