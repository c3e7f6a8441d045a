use scorep_core::definitions::RegionDef;
use scorep_core::func_addr::SymbolTable;
use scorep_core::{DefinitionStore, Handle, MeasurementBuilder, Paradigm, RegionType};

use serial_test::serial;

use std::path::PathBuf;

const FILTER: &str = "\
SCOREP_FILE_NAMES_BEGIN
  EXCLUDE */generated/*
SCOREP_FILE_NAMES_END

SCOREP_REGION_NAMES_BEGIN
  EXCLUDE *
  INCLUDE main solve_* # keep the solver
  EXCLUDE solve_tiny
  EXCLUDE MANGLED _ZN6detail*
SCOREP_REGION_NAMES_END
";

fn filter_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("scorep_core_{}_{}.filter", name, std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

fn define(m: &scorep_core::Measurement, name: &str, mangled: Option<&str>, file: &str) -> Handle<RegionDef> {
    m.define_region(name, mangled, Some(file), 1, 2, Paradigm::User, RegionType::Function)
}

#[test]
#[serial]
fn filter_file_gates_region_definitions() {
    let path = filter_file("gates", FILTER);
    let m = MeasurementBuilder::new()
        .with_filtering_file(path.to_str().unwrap())
        .with_symbols(SymbolTable::new())
        .build()
        .unwrap();

    let kept = [
        define(&m, "main", None, "main.c"),
        define(&m, "solve_big", None, "solver.c"),
        define(&m, "solve_helper", Some("_ZN4work12solve_helperEv"), "solver.c"),
    ];
    let dropped = [
        define(&m, "setup", None, "main.c"),
        define(&m, "solve_tiny", None, "solver.c"),
        define(&m, "solve_kernel", None, "src/generated/kernels.c"),
        define(&m, "solve_other", Some("_ZN6detail5otherEv"), "solver.c"),
    ];
    assert!(dropped.iter().all(|h| h.is_filtered()));
    assert!(kept.iter().all(|h| !h.is_invalid() && !h.is_filtered()));
    assert_eq!(m.definitions().count::<RegionDef>(), kept.len() as u32);

    // enter and exit of a filtered region are ignored
    m.enter_region(dropped[0]);
    m.exit_region(dropped[0]);
    m.enter_region(kept[0]);
    m.exit_region(kept[0]);

    std::fs::remove_file(path).unwrap();
}

#[test]
#[serial]
fn broken_filter_file_filters_nothing() {
    let path = filter_file("broken", "SCOREP_REGION_NAMES_BEGIN\n  EXCLUDE [\n");
    let m = MeasurementBuilder::new()
        .with_filtering_file(path.to_str().unwrap())
        .with_symbols(SymbolTable::new())
        .build()
        .unwrap();
    let region = define(&m, "anything", None, "main.c");
    assert!(!region.is_filtered());
    std::fs::remove_file(path).unwrap();
}

#[test]
#[serial]
fn missing_filter_file_filters_nothing() {
    let m = MeasurementBuilder::new()
        .with_filtering_file("/nonexistent/scorep_core.filter")
        .with_symbols(SymbolTable::new())
        .build()
        .unwrap();
    assert!(!define(&m, "main", None, "main.c").is_filtered());
}
