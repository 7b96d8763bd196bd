//! Replacement template evaluation.
//!
//! The rewrite engine only needs two capabilities from a template backend:
//! binding variables and evaluating a template string. [`TemplateEngine`]
//! captures that contract so any expression language can be plugged in.
//! [`ExpressionEngine`] is the built-in backend.

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// Regex for `{name}`, `{name[0]}`, `{name['key']}`, `{name.key}`, with an optional `#` prefix.
static EXPR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{#?([A-Za-z_][A-Za-z0-9_]*)(?:\[(?:(\d+)|'([^']*)'|"([^"]*)")\]|\.([A-Za-z_][A-Za-z0-9_]*))?\}"#,
    )
    .unwrap()
});

/// A value bound into a template context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    /// Plain text.
    Text(String),
    /// Ordered sequence with possibly missing entries.
    List(Vec<Option<String>>),
    /// String-keyed mapping.
    Map(BTreeMap<String, String>),
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<Option<String>>> for TemplateValue {
    fn from(value: Vec<Option<String>>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, String>> for TemplateValue {
    fn from(value: BTreeMap<String, String>) -> Self {
        Self::Map(value)
    }
}

/// A pluggable template evaluator.
pub trait TemplateEngine {
    /// Bind `value` to `name`, replacing any previous binding.
    fn set_variable(&mut self, name: &str, value: TemplateValue);

    /// Evaluate a template against the current bindings.
    fn evaluate(&mut self, template: &str) -> Result<String, TemplateError>;
}

impl<T: TemplateEngine + ?Sized> TemplateEngine for &mut T {
    fn set_variable(&mut self, name: &str, value: TemplateValue) {
        (**self).set_variable(name, value)
    }

    fn evaluate(&mut self, template: &str) -> Result<String, TemplateError> {
        (**self).evaluate(template)
    }
}

impl<T: TemplateEngine + ?Sized> TemplateEngine for Box<T> {
    fn set_variable(&mut self, name: &str, value: TemplateValue) {
        (**self).set_variable(name, value)
    }

    fn evaluate(&mut self, template: &str) -> Result<String, TemplateError> {
        (**self).evaluate(template)
    }
}

/// Built-in template engine.
///
/// Supports:
/// - `{name}` - a text variable
/// - `{group[1]}` - list element; a missing element renders as an empty string
/// - `{groupName['id']}`, `{groupName["id"]}`, `{groupName.id}` - map entry
/// - `{#group[1]}` - same as above, the `#` prefix is ignored
///
/// Braces whose content is not one of these forms are copied verbatim, so
/// JSON or other literal braces in a template pass through.
#[derive(Debug, Clone, Default)]
pub struct ExpressionEngine {
    variables: HashMap<String, TemplateValue>,
}

impl ExpressionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable binding (builder style).
    pub fn with_variable(mut self, name: &str, value: impl Into<TemplateValue>) -> Self {
        self.set_variable(name, value.into());
        self
    }

    /// Current binding of `name`.
    pub fn variable(&self, name: &str) -> Option<&TemplateValue> {
        self.variables.get(name)
    }

    fn resolve(&self, caps: &regex::Captures<'_>) -> Result<String, TemplateError> {
        let name = &caps[1];
        let value = self
            .variables
            .get(name)
            .ok_or_else(|| TemplateError::UndefinedVariable(name.to_string()))?;

        let index = caps.get(2).map(|m| m.as_str());
        let key = caps
            .get(3)
            .or_else(|| caps.get(4))
            .or_else(|| caps.get(5))
            .map(|m| m.as_str());

        match (value, index, key) {
            (TemplateValue::Text(text), None, None) => Ok(text.clone()),
            (TemplateValue::List(items), Some(index), None) => {
                let idx: usize = index
                    .parse()
                    .map_err(|_| TemplateError::InvalidExpression(caps[0].to_string()))?;
                match items.get(idx) {
                    Some(item) => Ok(item.clone().unwrap_or_default()),
                    None => Err(TemplateError::IndexOutOfRange {
                        name: name.to_string(),
                        index: idx,
                        len: items.len(),
                    }),
                }
            }
            (TemplateValue::Map(entries), None, Some(key)) => {
                entries
                    .get(key)
                    .cloned()
                    .ok_or_else(|| TemplateError::UndefinedKey {
                        name: name.to_string(),
                        key: key.to_string(),
                    })
            }
            _ => Err(TemplateError::InvalidAccess {
                name: name.to_string(),
                expr: caps[0].to_string(),
            }),
        }
    }
}

impl TemplateEngine for ExpressionEngine {
    fn set_variable(&mut self, name: &str, value: TemplateValue) {
        self.variables.insert(name.to_string(), value);
    }

    fn evaluate(&mut self, template: &str) -> Result<String, TemplateError> {
        let mut output = String::with_capacity(template.len());
        let mut last = 0;

        for caps in EXPR_REGEX.captures_iter(template) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            output.push_str(&template[last..whole.start()]);
            output.push_str(&self.resolve(&caps)?);
            last = whole.end();
        }

        output.push_str(&template[last..]);
        Ok(output)
    }
}

/// Errors raised while evaluating a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Undefined template variable: {0}")]
    UndefinedVariable(String),

    #[error("Undefined key '{key}' in template variable '{name}'")]
    UndefinedKey { name: String, key: String },

    #[error("Index {index} out of range for template variable '{name}' (length {len})")]
    IndexOutOfRange {
        name: String,
        index: usize,
        len: usize,
    },

    #[error("Invalid access on template variable '{name}': {expr}")]
    InvalidAccess { name: String, expr: String },

    #[error("Invalid template expression: {0}")]
    InvalidExpression(String),

    #[error("Template evaluation failed: {0}")]
    Evaluation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_engine() -> ExpressionEngine {
        let mut names = BTreeMap::new();
        names.insert("resource".to_string(), "users".to_string());
        names.insert("id".to_string(), "123".to_string());

        ExpressionEngine::new()
            .with_variable(
                "group",
                vec![Some("users/123".to_string()), None, Some("123".to_string())],
            )
            .with_variable("groupName", names)
            .with_variable("host", "apis.example.io")
    }

    #[test]
    fn test_list_access() {
        let mut engine = make_engine();
        assert_eq!(engine.evaluate("/v2/{group[0]}").unwrap(), "/v2/users/123");
        assert_eq!(engine.evaluate("[{group[1]}]").unwrap(), "[]");
        assert_eq!(engine.evaluate("{#group[2]}").unwrap(), "123");
    }

    #[test]
    fn test_map_access() {
        let mut engine = make_engine();
        assert_eq!(
            engine.evaluate("/{groupName['resource']}/{groupName.id}").unwrap(),
            "/users/123"
        );
        assert_eq!(
            engine.evaluate(r#"{#groupName["resource"]}"#).unwrap(),
            "users"
        );
    }

    #[test]
    fn test_text_variable() {
        let mut engine = make_engine();
        assert_eq!(
            engine.evaluate("https://{host}/{group[0]}").unwrap(),
            "https://apis.example.io/users/123"
        );
    }

    #[test]
    fn test_literal_braces_pass_through() {
        let mut engine = make_engine();
        assert_eq!(
            engine.evaluate(r#"{"id": 1} { not-an-expr }"#).unwrap(),
            r#"{"id": 1} { not-an-expr }"#
        );
        assert_eq!(engine.evaluate("plain").unwrap(), "plain");
    }

    #[test]
    fn test_errors() {
        let mut engine = make_engine();
        assert_eq!(
            engine.evaluate("{missing}").unwrap_err(),
            TemplateError::UndefinedVariable("missing".to_string())
        );
        assert!(matches!(
            engine.evaluate("{group[3]}").unwrap_err(),
            TemplateError::IndexOutOfRange { index: 3, len: 3, .. }
        ));
        assert!(matches!(
            engine.evaluate("{groupName['nope']}").unwrap_err(),
            TemplateError::UndefinedKey { .. }
        ));
        assert!(matches!(
            engine.evaluate("{group}").unwrap_err(),
            TemplateError::InvalidAccess { .. }
        ));
        assert!(matches!(
            engine.evaluate("{host[0]}").unwrap_err(),
            TemplateError::InvalidAccess { .. }
        ));
    }

    #[test]
    fn test_rebinding_replaces() {
        let mut engine = make_engine();
        engine.set_variable("host", "other.example".into());
        assert_eq!(engine.evaluate("{host}").unwrap(), "other.example");
        assert_eq!(
            engine.variable("host"),
            Some(&TemplateValue::Text("other.example".to_string()))
        );
    }
}
