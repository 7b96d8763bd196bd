//! Configuration types for the URL rewrite agent.

use serde::Deserialize;

/// Main configuration for the URL rewrite agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Configuration version
    #[serde(default = "default_version")]
    pub version: String,
    /// Global settings
    #[serde(default)]
    pub settings: Settings,
    /// The rewrite rule
    pub rewrite: RewriteConfig,
}

fn default_version() -> String {
    "1".to_string()
}

impl AgentConfig {
    /// Build a config around a rewrite rule with default settings.
    pub fn new(rewrite: RewriteConfig) -> Self {
        Self {
            version: default_version(),
            settings: Settings::default(),
            rewrite,
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Compile the `from_regex` pattern once instead of on every rewrite
    pub cache_pattern: bool,
    /// Enable debug header (X-Url-Rewrite)
    pub debug_headers: bool,
}

/// A single from/to rewrite rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RewriteConfig {
    /// Rewrite URLs in response headers
    #[serde(default, alias = "rewriteResponseHeaders")]
    pub rewrite_response_headers: bool,
    /// Rewrite URLs in the response body
    #[serde(default, alias = "rewriteResponseBody")]
    pub rewrite_response_body: bool,
    /// Pattern matching the URLs to rewrite
    #[serde(alias = "fromRegex")]
    pub from_regex: String,
    /// Replacement template, evaluated per match (`{group[0]}`, `{groupName['name']}`)
    #[serde(alias = "toReplacement")]
    pub to_replacement: String,
}

impl RewriteConfig {
    pub fn new(from_regex: impl Into<String>, to_replacement: impl Into<String>) -> Self {
        Self {
            rewrite_response_headers: false,
            rewrite_response_body: false,
            from_regex: from_regex.into(),
            to_replacement: to_replacement.into(),
        }
    }

    pub fn with_headers(mut self, enabled: bool) -> Self {
        self.rewrite_response_headers = enabled;
        self
    }

    pub fn with_body(mut self, enabled: bool) -> Self {
        self.rewrite_response_body = enabled;
        self
    }
}
