use std::sync::OnceLock;

use serde::Deserialize;

fn default_total_memory() -> u32 {
    16_384_000
}

fn default_page_size() -> u32 {
    8192
}

fn default_deadlock_timeout() -> f64 {
    600.0
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Bytes of definition memory per process, default: 16384000
    #[serde(default = "default_total_memory")]
    pub total_memory: u32,

    /// Size of one definition memory page, rounded up to a power of two, default: 8192
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Path of a region filter file, no filtering if unset
    pub filtering_file: Option<String>,

    /// Seconds a blocked collective waits before warning about a potential deadlock, default: 600.0
    #[serde(default = "default_deadlock_timeout")]
    pub deadlock_timeout: f64,

    /// flag used to print warnings when a collective waits longer than the deadlock timeout. Default: true
    pub collective_warning: Option<bool>,
    /// flag used to print warnings when the filter file can not be used. Default: true
    pub filter_warning: Option<bool>,
    /// flag used to print warnings when a region is exited that is not the innermost entered one. Default: true
    pub unbalanced_exit_warning: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            total_memory: default_total_memory(),
            page_size: default_page_size(),
            filtering_file: None,
            deadlock_timeout: default_deadlock_timeout(),
            collective_warning: None,
            filter_warning: None,
            unbalanced_exit_warning: None,
        }
    }
}

/// Reads a configuration from `SCOREP_` prefixed variables of `vars`.
pub fn config_from<I>(vars: I) -> Result<Config, envy::Error>
where
    I: IntoIterator<Item = (String, String)>,
{
    envy::prefixed("SCOREP_").from_iter(vars)
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match envy::prefixed("SCOREP_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_without_variables() {
        assert_eq!(config_from(vars(&[])).unwrap(), Config::default());
    }

    #[test]
    fn prefixed_variables_override() {
        let config = config_from(vars(&[
            ("SCOREP_TOTAL_MEMORY", "1048576"),
            ("SCOREP_PAGE_SIZE", "4096"),
            ("SCOREP_FILTERING_FILE", "/tmp/filter"),
            ("SCOREP_DEADLOCK_TIMEOUT", "2.5"),
            ("SCOREP_FILTER_WARNING", "false"),
            ("TOTAL_MEMORY", "12"),
        ]))
        .unwrap();
        assert_eq!(config.total_memory, 1 << 20);
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.filtering_file.as_deref(), Some("/tmp/filter"));
        assert_eq!(config.deadlock_timeout, 2.5);
        assert_eq!(config.filter_warning, Some(false));
        assert_eq!(config.collective_warning, None);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(config_from(vars(&[("SCOREP_TOTAL_MEMORY", "lots")])).is_err());
    }
}
