use scorep_core::{config_from, Config, MeasurementBuilder};

use serial_test::serial;

const VARIABLES: [&str; 6] = [
    "SCOREP_TOTAL_MEMORY",
    "SCOREP_PAGE_SIZE",
    "SCOREP_FILTERING_FILE",
    "SCOREP_DEADLOCK_TIMEOUT",
    "SCOREP_FILTER_WARNING",
    "SCOREP_COLLECTIVE_WARNING",
];

fn clear() {
    for var in VARIABLES {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn process_environment_is_read() {
    clear();
    std::env::set_var("SCOREP_TOTAL_MEMORY", "2097152");
    std::env::set_var("SCOREP_PAGE_SIZE", "2048");
    std::env::set_var("SCOREP_COLLECTIVE_WARNING", "false");
    let config = config_from(std::env::vars()).unwrap();
    clear();
    assert_eq!(config.total_memory, 2 << 20);
    assert_eq!(config.page_size, 2048);
    assert_eq!(config.collective_warning, Some(false));
    assert_eq!(config.filtering_file, None);
}

#[test]
#[serial]
fn unset_environment_gives_defaults() {
    clear();
    let config = config_from(std::env::vars()).unwrap();
    let defaults = Config::default();
    assert_eq!(config.total_memory, defaults.total_memory);
    assert_eq!(config.page_size, defaults.page_size);
    assert_eq!(config.deadlock_timeout, defaults.deadlock_timeout);
}

#[test]
#[serial]
fn builder_rejects_pages_larger_than_memory() {
    let result = MeasurementBuilder::new()
        .with_memory(4096)
        .with_page_size(8192)
        .build();
    assert!(result.is_err());
}
