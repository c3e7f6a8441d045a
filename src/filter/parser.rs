use super::{FilterError, FilterResult, FilterRule, FilterRules, RuleAction};

const FILE_NAMES_BEGIN: &str = "SCOREP_FILE_NAMES_BEGIN";
const FILE_NAMES_END: &str = "SCOREP_FILE_NAMES_END";
const REGION_NAMES_BEGIN: &str = "SCOREP_REGION_NAMES_BEGIN";
const REGION_NAMES_END: &str = "SCOREP_REGION_NAMES_END";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Start,
    Files(Option<RuleAction>),
    /// (action, MANGLED seen)
    Regions(Option<(RuleAction, bool)>),
}

fn syntax_error<T>(line: usize, token: &str) -> FilterResult<T> {
    Err(FilterError::ParseSyntax {
        line,
        token: token.to_string(),
    })
}

/// Splits one line into glob patterns. Comments start at the first `#`
/// that is not escaped; a backslash escapes the following character
/// (whitespace, `#`, or a glob meta character), it is matched literally.
fn tokens(line: &str, number: usize) -> FilterResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push_str(&glob::Pattern::escape(escaped.encode_utf8(&mut [0; 4]))),
                // escaping the line break, continuation lines are not supported
                None => return syntax_error(number, "\\"),
            },
            '#' => break,
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn pattern(token: &str, line: usize) -> FilterResult<glob::Pattern> {
    glob::Pattern::new(token).map_err(|error| FilterError::InvalidPattern {
        line,
        pattern: token.to_string(),
        error,
    })
}

fn process(rules: &mut FilterRules, mode: Mode, token: &str, line: usize) -> FilterResult<Mode> {
    let next = match (token, mode) {
        (FILE_NAMES_BEGIN, Mode::Start) => Mode::Files(None),
        (FILE_NAMES_END, Mode::Files(_)) => Mode::Start,
        (REGION_NAMES_BEGIN, Mode::Start) => Mode::Regions(None),
        (REGION_NAMES_END, Mode::Regions(_)) => Mode::Start,
        ("EXCLUDE", Mode::Files(_)) => Mode::Files(Some(RuleAction::Exclude)),
        ("INCLUDE", Mode::Files(_)) => Mode::Files(Some(RuleAction::Include)),
        ("EXCLUDE", Mode::Regions(_)) => Mode::Regions(Some((RuleAction::Exclude, false))),
        ("INCLUDE", Mode::Regions(_)) => Mode::Regions(Some((RuleAction::Include, false))),
        ("MANGLED", Mode::Regions(Some((action, _)))) => Mode::Regions(Some((action, true))),
        (FILE_NAMES_BEGIN | FILE_NAMES_END | REGION_NAMES_BEGIN | REGION_NAMES_END, _)
        | ("EXCLUDE" | "INCLUDE" | "MANGLED", _) => return syntax_error(line, token),
        (_, Mode::Files(Some(action))) => {
            rules.push_file_rule(FilterRule::new(pattern(token, line)?, action, false));
            mode
        }
        (_, Mode::Regions(Some((action, mangled)))) => {
            rules.push_region_rule(FilterRule::new(pattern(token, line)?, action, mangled));
            mode
        }
        _ => return syntax_error(line, token),
    };
    Ok(next)
}

pub(super) fn parse(text: &str) -> FilterResult<FilterRules> {
    let mut rules = FilterRules::default();
    let mut mode = Mode::Start;
    for (index, line) in text.lines().enumerate() {
        let number = index + 1;
        for token in tokens(line, number)? {
            mode = process(&mut rules, mode, &token, number)?;
        }
    }
    if mode != Mode::Start {
        tracing::debug!("filter file ends inside a block");
    }
    Ok(rules)
}
