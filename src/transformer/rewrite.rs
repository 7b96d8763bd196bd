//! Regex-driven string rewriting.

use super::TransformError;
use crate::context::MatchContext;
use crate::matcher::CompiledPattern;
use crate::template::TemplateEngine;
use std::sync::Arc;
use tracing::trace;

/// Rewrites every match of a `from` pattern with an evaluated `to` template.
///
/// By default the pattern is compiled on every call. [`RewriteEngine::cached`]
/// compiles it once up front; the compiled pattern is immutable and may be
/// shared by concurrent rewrites.
#[derive(Debug, Clone)]
pub struct RewriteEngine {
    from: String,
    to: String,
    compiled: Option<Arc<CompiledPattern>>,
}

impl RewriteEngine {
    /// Engine that recompiles `from` on each rewrite.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            compiled: None,
        }
    }

    /// Engine with `from` compiled once.
    pub fn cached(from: impl Into<String>, to: impl Into<String>) -> Result<Self, TransformError> {
        let from = from.into();
        let compiled = CompiledPattern::compile(&from)?;
        Ok(Self {
            from,
            to: to.into(),
            compiled: Some(Arc::new(compiled)),
        })
    }

    pub fn from_pattern(&self) -> &str {
        &self.from
    }

    pub fn to_template(&self) -> &str {
        &self.to
    }

    pub fn is_cached(&self) -> bool {
        self.compiled.is_some()
    }

    /// Rewrite `subject`, evaluating the template once per match.
    ///
    /// Empty input is returned as-is without compiling the pattern.
    pub fn rewrite<E>(&self, subject: &str, engine: &mut E) -> Result<String, TransformError>
    where
        E: TemplateEngine + ?Sized,
    {
        if subject.is_empty() {
            return Ok(String::new());
        }

        match &self.compiled {
            Some(pattern) => rewrite_with(pattern, &self.to, subject, engine),
            None => {
                let pattern = CompiledPattern::compile(&self.from)?;
                rewrite_with(&pattern, &self.to, subject, engine)
            }
        }
    }

    /// Like [`RewriteEngine::rewrite`], treating an absent subject as empty.
    pub fn rewrite_opt<E>(
        &self,
        subject: Option<&str>,
        engine: &mut E,
    ) -> Result<String, TransformError>
    where
        E: TemplateEngine + ?Sized,
    {
        self.rewrite(subject.unwrap_or_default(), engine)
    }
}

/// One-shot rewrite: compile `from_pattern` and rewrite `subject` with `to_template`.
pub fn rewrite<E>(
    subject: &str,
    from_pattern: &str,
    to_template: &str,
    engine: &mut E,
) -> Result<String, TransformError>
where
    E: TemplateEngine + ?Sized,
{
    RewriteEngine::new(from_pattern, to_template).rewrite(subject, engine)
}

/// Reassemble `subject` with each match replaced by the evaluated template.
fn rewrite_with<E>(
    pattern: &CompiledPattern,
    template: &str,
    subject: &str,
    engine: &mut E,
) -> Result<String, TransformError>
where
    E: TemplateEngine + ?Sized,
{
    let mut output = String::with_capacity(subject.len());
    let mut last = 0;
    let mut count = 0usize;

    for m in pattern.matches(subject) {
        let m = m?;
        output.push_str(&subject[last..m.start()]);

        MatchContext::from_match(&m, pattern.names()).bind(engine);
        output.push_str(&engine.evaluate(template)?);

        last = m.end();
        count += 1;
    }

    if count == 0 {
        return Ok(subject.to_string());
    }

    output.push_str(&subject[last..]);

    trace!(
        pattern = pattern.as_str(),
        matches = count,
        input_len = subject.len(),
        output_len = output.len(),
        "Rewrote subject"
    );

    Ok(output)
}
