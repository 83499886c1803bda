//! Logger-name matching.
//!
//! # Responsibilities
//! - Compile a logger-name pattern once, at configuration parse time
//! - Answer `name_matches` on every log call without allocating
//! - Render a canonical `(argument:Kind)` form for diagnostics
//!
//! # Design Decisions
//! - Matching is ordinal and case-sensitive
//! - Single leading/trailing `*` compile to plain string operations;
//!   only irregular wildcard placement pays for a regex
//! - A missing name never matches, whatever the pattern

use std::fmt;

use regex::Regex;

/// The strategy a [`NameMatcher`] compiled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    None,
    All,
    Equals,
    StartsWith,
    EndsWith,
    Contains,
    MultiplePattern,
}

impl MatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMode::None => "None",
            MatchMode::All => "All",
            MatchMode::Equals => "Equals",
            MatchMode::StartsWith => "StartsWith",
            MatchMode::EndsWith => "EndsWith",
            MatchMode::Contains => "Contains",
            MatchMode::MultiplePattern => "MultiplePattern",
        }
    }
}

#[derive(Debug, Clone)]
enum Compiled {
    None,
    All,
    Equals(String),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    MultiplePattern(Regex),
}

/// A compiled logger-name pattern.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    pattern: Option<String>,
    compiled: Compiled,
}

impl NameMatcher {
    /// Compile `pattern`. `None` yields a matcher that never matches.
    pub fn create(pattern: Option<&str>) -> Self {
        let compiled = match pattern {
            None => Compiled::None,
            Some(p) => compile(p),
        };
        Self {
            pattern: pattern.map(str::to_string),
            compiled,
        }
    }

    /// Shorthand for `create(Some(pattern))`.
    pub fn new(pattern: &str) -> Self {
        Self::create(Some(pattern))
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn mode(&self) -> MatchMode {
        match self.compiled {
            Compiled::None => MatchMode::None,
            Compiled::All => MatchMode::All,
            Compiled::Equals(_) => MatchMode::Equals,
            Compiled::StartsWith(_) => MatchMode::StartsWith,
            Compiled::EndsWith(_) => MatchMode::EndsWith,
            Compiled::Contains(_) => MatchMode::Contains,
            Compiled::MultiplePattern(_) => MatchMode::MultiplePattern,
        }
    }

    /// Returns true if `name` satisfies the pattern.
    ///
    /// `None` never matches. An empty name only matches `*` and the empty
    /// pattern itself.
    pub fn name_matches(&self, name: Option<&str>) -> bool {
        let Some(name) = name else {
            return false;
        };

        if name.is_empty() {
            return match &self.compiled {
                Compiled::All => true,
                Compiled::Equals(expected) => expected.is_empty(),
                _ => false,
            };
        }

        match &self.compiled {
            Compiled::None => false,
            Compiled::All => true,
            Compiled::Equals(expected) => name == expected,
            Compiled::StartsWith(prefix) => name.starts_with(prefix.as_str()),
            Compiled::EndsWith(suffix) => name.ends_with(suffix.as_str()),
            Compiled::Contains(middle) => name.contains(middle.as_str()),
            Compiled::MultiplePattern(regex) => regex.is_match(name),
        }
    }

    /// Convenience for callers that always have a name.
    pub fn matches(&self, name: &str) -> bool {
        self.name_matches(Some(name))
    }

    fn argument(&self) -> &str {
        match &self.compiled {
            Compiled::None | Compiled::All => "",
            Compiled::Equals(s)
            | Compiled::StartsWith(s)
            | Compiled::EndsWith(s)
            | Compiled::Contains(s) => s,
            Compiled::MultiplePattern(regex) => regex.as_str(),
        }
    }
}

impl fmt::Display for NameMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}:{})", self.argument(), self.mode().as_str())
    }
}

fn compile(pattern: &str) -> Compiled {
    let first_star = pattern.find('*');
    let has_question = pattern.contains('?');

    let Some(first) = first_star else {
        if has_question {
            return multiple_pattern(pattern);
        }
        return Compiled::Equals(pattern.to_string());
    };

    if pattern == "*" {
        return Compiled::All;
    }

    if !has_question {
        let last = pattern.len() - 1;
        let second = pattern[first + 1..].find('*').map(|i| i + first + 1);
        match second {
            Some(second) if first == 0 && second == last => {
                return Compiled::Contains(pattern[1..last].to_string());
            }
            None if first == 0 => {
                return Compiled::EndsWith(pattern[1..].to_string());
            }
            None if first == last => {
                return Compiled::StartsWith(pattern[..last].to_string());
            }
            _ => {}
        }
    }

    multiple_pattern(pattern)
}

fn multiple_pattern(pattern: &str) -> Compiled {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    source.push('$');

    match Regex::new(&source) {
        Ok(regex) => Compiled::MultiplePattern(regex),
        // Every literal is escaped, so this only triggers on size limits.
        Err(_) => Compiled::None,
    }
}
