use scorep_core::func_addr::SymbolTable;
use scorep_core::{FilterRules, Measurement, MeasurementBuilder, Paradigm, RegionType};

use serial_test::serial;

use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

fn measurement() -> Measurement {
    MeasurementBuilder::new()
        .with_memory(1 << 20)
        .with_page_size(4096)
        .with_filter(FilterRules::default())
        .with_symbols(SymbolTable::new())
        .build()
        .unwrap()
}

/// Runs an unbalanced exit and returns everything logged meanwhile.
fn unbalanced_exit_log() -> String {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    scorep_core::tracing::subscriber::with_default(subscriber, || {
        let m = measurement();
        let outer = m.define_region("outer", None, None, 0, 0, Paradigm::User, RegionType::Function);
        let inner = m.define_region("inner", None, None, 0, 0, Paradigm::User, RegionType::Function);
        m.enter_region(outer);
        m.enter_region(inner);
        m.exit_region(outer);
    });
    captured.text()
}

#[test]
#[serial]
fn unbalanced_exit_is_reported() {
    let log = unbalanced_exit_log();
    assert!(log.contains("exit of region 'outer' while 'inner'"), "{}", log);
}

#[test]
#[serial]
fn disabled_warnings_stay_silent() {
    scorep_core::disable_runtime_warnings();
    let silent = unbalanced_exit_log();
    scorep_core::enable_runtime_warnings();
    assert!(!silent.contains("[Score-P WARNING]"), "{}", silent);
    assert!(unbalanced_exit_log().contains("[Score-P WARNING]"));
}
