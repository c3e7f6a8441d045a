//! Region filtering.
//!
//! Before a region is defined the measurement asks a [`RegionFilter`] whether
//! it should be recorded at all. Filtered regions get the
//! [`Handle::FILTERED`](crate::definitions::Handle) sentinel and entering or
//! exiting them costs nothing.
//!
//! [`FilterRules`] implements the filter-file format:
//!
//! ```text
//! SCOREP_FILE_NAMES_BEGIN
//!   EXCLUDE */internal/*
//!   INCLUDE */internal/keep.c
//! SCOREP_FILE_NAMES_END
//!
//! SCOREP_REGION_NAMES_BEGIN
//!   EXCLUDE *
//!   INCLUDE main foo_*
//!   EXCLUDE MANGLED _Z3barv   # matched against the mangled name
//! SCOREP_REGION_NAMES_END
//! ```
mod parser;

use crate::warnings::RuntimeWarning;

use std::path::Path;

/// Decides which regions are recorded.
pub trait RegionFilter: Send + Sync {
    /// `true` if the region must not be recorded. `file` and `mangled_name`
    /// are unknown for some adapters.
    fn is_filtered(&self, file: Option<&str>, demangled_name: &str, mangled_name: Option<&str>)
        -> bool;
}

impl<F> RegionFilter for F
where
    F: Fn(Option<&str>, &str, Option<&str>) -> bool + Send + Sync,
{
    fn is_filtered(&self, file: Option<&str>, demangled_name: &str, mangled_name: Option<&str>) -> bool {
        self(file, demangled_name, mangled_name)
    }
}

#[derive(Debug)]
pub enum FilterError {
    Io(String, std::io::Error),
    /// (line, offending token)
    ParseSyntax { line: usize, token: String },
    InvalidPattern {
        line: usize,
        pattern: String,
        error: glob::PatternError,
    },
}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FilterError::Io(path, e) => write!(f, "unable to read filter file {}: {}", path, e),
            FilterError::ParseSyntax { line, token } => {
                write!(f, "line {}: unexpected token '{}'", line, token)
            }
            FilterError::InvalidPattern {
                line,
                pattern,
                error,
            } => write!(f, "line {}: invalid pattern '{}': {}", line, pattern, error),
        }
    }
}

impl std::error::Error for FilterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FilterError::Io(_, e) => Some(e),
            FilterError::InvalidPattern { error, .. } => Some(error),
            FilterError::ParseSyntax { .. } => None,
        }
    }
}

pub type FilterResult<T> = Result<T, FilterError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuleAction {
    Exclude,
    Include,
}

#[derive(Debug, Clone)]
pub(crate) struct FilterRule {
    pattern: glob::Pattern,
    action: RuleAction,
    mangled: bool,
}

impl FilterRule {
    pub(crate) fn new(pattern: glob::Pattern, action: RuleAction, mangled: bool) -> FilterRule {
        FilterRule {
            pattern,
            action,
            mangled,
        }
    }
}

/// Ordered include/exclude rules for file names and region names.
#[derive(Debug, Clone, Default)]
pub struct FilterRules {
    file_rules: Vec<FilterRule>,
    region_rules: Vec<FilterRule>,
}

/// Everything starts included; an exclude rule can only exclude what is
/// still included and an include rule only re-include what is excluded, so
/// the last matching rule wins.
fn excluded_by<'a>(rules: &[FilterRule], subject: impl Fn(&FilterRule) -> &'a str) -> bool {
    let mut excluded = false;
    for rule in rules {
        match rule.action {
            RuleAction::Exclude if !excluded => excluded = rule.pattern.matches(subject(rule)),
            RuleAction::Include if excluded => excluded = !rule.pattern.matches(subject(rule)),
            _ => {}
        }
    }
    excluded
}

impl FilterRules {
    /// Parses the rules from the text of a filter file.
    pub fn parse(text: &str) -> FilterResult<FilterRules> {
        parser::parse(text)
    }

    pub fn from_file(path: impl AsRef<Path>) -> FilterResult<FilterRules> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FilterError::Io(path.display().to_string(), e))?;
        let rules = FilterRules::parse(&text)?;
        tracing::debug!(
            "{} file rule(s) and {} region rule(s) read from {}",
            rules.file_rules.len(),
            rules.region_rules.len(),
            path.display()
        );
        Ok(rules)
    }

    /// The rules of the filter file at `path`. A file that can not be used
    /// results in empty rules and a runtime warning; no path means no
    /// filtering.
    pub fn load(path: Option<&str>) -> FilterRules {
        match path {
            None => FilterRules::default(),
            Some(path) => FilterRules::from_file(path).unwrap_or_else(|e| {
                RuntimeWarning::FilterFile(path, &e.to_string()).print();
                FilterRules::default()
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.file_rules.is_empty() && self.region_rules.is_empty()
    }

    pub(crate) fn push_file_rule(&mut self, rule: FilterRule) {
        self.file_rules.push(rule);
    }

    pub(crate) fn push_region_rule(&mut self, rule: FilterRule) {
        self.region_rules.push(rule);
    }

    pub fn is_file_filtered(&self, file: &str) -> bool {
        excluded_by(&self.file_rules, |_| file)
    }

    /// Region rules marked `MANGLED` match `mangled_name`, falling back to
    /// the demangled name when there is none.
    pub fn is_region_filtered(&self, demangled_name: &str, mangled_name: Option<&str>) -> bool {
        excluded_by(&self.region_rules, |rule| match (rule.mangled, mangled_name) {
            (true, Some(mangled)) => mangled,
            _ => demangled_name,
        })
    }
}

impl RegionFilter for FilterRules {
    fn is_filtered(&self, file: Option<&str>, demangled_name: &str, mangled_name: Option<&str>) -> bool {
        if let Some(file) = file {
            if self.is_file_filtered(file) {
                tracing::trace!("filtered file {}", file);
                return true;
            }
        }
        let filtered = self.is_region_filtered(demangled_name, mangled_name);
        if filtered {
            tracing::trace!("filtered region {}", demangled_name);
        }
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = "
SCOREP_FILE_NAMES_BEGIN
  EXCLUDE */internal/*
  INCLUDE */internal/keep.c
SCOREP_FILE_NAMES_END

SCOREP_REGION_NAMES_BEGIN
  EXCLUDE *
  INCLUDE main foo_*
  EXCLUDE foo_bar
  EXCLUDE MANGLED _Z3bazv
SCOREP_REGION_NAMES_END
";

    #[test]
    fn later_rules_win() {
        let rules = FilterRules::parse(RULES).unwrap();
        assert!(!rules.is_filtered(None, "main", None));
        assert!(!rules.is_filtered(None, "foo_one", None));
        assert!(rules.is_filtered(None, "foo_bar", None));
        assert!(rules.is_filtered(None, "other", None));
    }

    #[test]
    fn file_rules_are_checked_first() {
        let rules = FilterRules::parse(RULES).unwrap();
        assert!(rules.is_filtered(Some("/src/internal/x.c"), "main", None));
        assert!(!rules.is_filtered(Some("/src/internal/keep.c"), "main", None));
        assert!(!rules.is_filtered(Some("/src/app.c"), "main", None));
    }

    #[test]
    fn mangled_rules_match_the_mangled_name() {
        let rules = FilterRules::parse(
            "SCOREP_REGION_NAMES_BEGIN\nEXCLUDE MANGLED _Z3bazv\nSCOREP_REGION_NAMES_END\n",
        )
        .unwrap();
        assert!(rules.is_filtered(None, "baz()", Some("_Z3bazv")));
        assert!(!rules.is_filtered(None, "baz()", Some("_Z3quxv")));
        // no mangled name known, the demangled one is used
        assert!(!rules.is_filtered(None, "baz()", None));
        assert!(rules.is_filtered(None, "_Z3bazv", None));
    }

    #[test]
    fn empty_rules_filter_nothing() {
        let rules = FilterRules::default();
        assert!(rules.is_empty());
        assert!(!rules.is_filtered(Some("a.c"), "main", Some("main")));
    }

    #[test]
    fn closures_are_filters() {
        let filter = |_: Option<&str>, name: &str, _: Option<&str>| name.starts_with("MPI_");
        let filter: &dyn RegionFilter = &filter;
        assert!(filter.is_filtered(None, "MPI_Send", None));
        assert!(!filter.is_filtered(None, "main", None));
    }

    #[test]
    fn missing_file_means_no_filter() {
        assert!(matches!(
            FilterRules::from_file("/nonexistent/scorep.filter"),
            Err(FilterError::Io(..))
        ));
        assert!(FilterRules::load(Some("/nonexistent/scorep.filter")).is_empty());
        assert!(FilterRules::load(None).is_empty());
    }
}
