//! Named capture group discovery from pattern source text.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Matches a named group opener: `(?<name>` or `(?P<name>`.
///
/// The identifier class starts with a letter, so `(?<=` and `(?<!` never match.
static GROUP_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\?P?<([A-Za-z][A-Za-z0-9]*)>").unwrap());

/// Ordered, deduplicated set of group names declared in a pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedGroups(BTreeSet<String>);

impl NamedGroups {
    /// Scan raw pattern source for named group declarations.
    ///
    /// The compiled regex is never consulted: names come from the text alone,
    /// so the result is the same whichever engine compiled the pattern.
    pub fn extract(pattern_source: &str) -> Self {
        let names = GROUP_NAME_REGEX
            .captures_iter(pattern_source)
            .map(|caps| caps[1].to_string())
            .collect();
        Self(names)
    }

    /// Names in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

/// Extract the named groups of `pattern_source` as a sorted list.
pub fn extract_named_groups(pattern_source: &str) -> Vec<String> {
    NamedGroups::extract(pattern_source)
        .iter()
        .map(str::to_string)
        .collect()
}
