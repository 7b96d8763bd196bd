//! URL Rewrite Agent for Zentinel.
//!
//! Rewrites backend-facing URLs in response headers and bodies into their
//! public form, the way a reverse proxy fixes up `Location` headers:
//!
//! - Regex match enumeration with numbered and named capture groups
//! - Per-match replacement templates (`{group[0]}`, `{groupName['name']}`)
//! - In-place header value rewriting
//! - Buffered body rewriting across chunk boundaries
//!
//! ## Configuration Example
//!
//! ```yaml
//! rewrite:
//!   rewrite_response_headers: true
//!   rewrite_response_body: true
//!   from_regex: "https?://[^/]*/((.*|/*))"
//!   to_replacement: "https://apis.example.io/{group[1]}"
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod headers;
pub mod matcher;
pub mod policy;
pub mod template;
pub mod transformer;

pub use agent::{
    AgentStats, BodyDecision, HeadersDecision, ResponseBodyChunkEvent, ResponseHandler,
    ResponseHeadersEvent, UrlRewriteAgent, UrlRewriteAgentError,
};
pub use config::{AgentConfig, RewriteConfig, Settings};
pub use context::MatchContext;
pub use headers::HeaderCollection;
pub use matcher::{extract_named_groups, CompiledPattern, MatcherError};
pub use policy::UrlRewritePolicy;
pub use template::{ExpressionEngine, TemplateEngine, TemplateError, TemplateValue};
pub use transformer::{rewrite, BodyRewriteStage, BodySink, RewriteEngine, TransformError};
