//! Header and body rewriting.

mod body;
mod header;
mod rewrite;

pub use body::{BodyRewriteStage, BodySink, CollectingSink};
pub use header::HeaderRewriter;
pub use rewrite::{rewrite, RewriteEngine};

use crate::matcher::MatcherError;
use crate::template::TemplateError;

/// Errors that can occur while rewriting.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Pattern error: {0}")]
    Pattern(#[from] MatcherError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Body stream already flushed")]
    StreamFlushed,
}
