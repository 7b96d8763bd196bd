//! Per-match context handed to the template engine.

use crate::matcher::{NamedGroups, PatternMatch};
use crate::template::{TemplateEngine, TemplateValue};
use std::collections::BTreeMap;

/// Template variable holding positional groups (`group[0]` is capture group 1).
pub const GROUP_VARIABLE: &str = "group";

/// Template variable holding named groups (`groupName['name']`).
pub const GROUP_NAME_VARIABLE: &str = "groupName";

/// Captured groups of a single match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchContext {
    /// Positional groups 1..=N, `None` where the group did not participate
    pub groups: Vec<Option<String>>,
    /// Named groups that participated in this match
    pub named_groups: BTreeMap<String, String>,
}

impl MatchContext {
    /// Build the context for one match.
    ///
    /// Only names present in `names` are looked up. A declared group that did
    /// not take part in the match (another alternative matched) is omitted.
    pub fn from_match(m: &PatternMatch<'_, '_>, names: &NamedGroups) -> Self {
        let groups = m
            .groups()
            .into_iter()
            .map(|g| g.map(str::to_string))
            .collect();

        let named_groups = names
            .iter()
            .filter_map(|name| m.named(name).map(|v| (name.to_string(), v.to_string())))
            .collect();

        Self {
            groups,
            named_groups,
        }
    }

    /// Positional group by template index (0 is capture group 1).
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    /// Named group value, if it participated.
    pub fn named(&self, name: &str) -> Option<&str> {
        self.named_groups.get(name).map(String::as_str)
    }

    /// Bind `group` and `groupName` into the template engine.
    pub fn bind<E: TemplateEngine + ?Sized>(self, engine: &mut E) {
        engine.set_variable(GROUP_VARIABLE, TemplateValue::List(self.groups));
        engine.set_variable(GROUP_NAME_VARIABLE, TemplateValue::Map(self.named_groups));
    }
}
