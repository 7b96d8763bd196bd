//! Response header rewriting.

use super::{RewriteEngine, TransformError};
use crate::headers::HeaderCollection;
use crate::template::TemplateEngine;
use std::sync::Arc;
use tracing::debug;

/// Applies a [`RewriteEngine`] to every value of every header.
#[derive(Debug, Clone)]
pub struct HeaderRewriter {
    engine: Arc<RewriteEngine>,
}

impl HeaderRewriter {
    pub fn new(engine: Arc<RewriteEngine>) -> Self {
        Self { engine }
    }

    /// Rewrite all header values in place.
    ///
    /// New values are computed for the whole collection before anything is
    /// written back, so on error the headers are left untouched. Returns the
    /// number of values that changed.
    pub fn rewrite_headers<H, E>(
        &self,
        headers: &mut H,
        template: &mut E,
    ) -> Result<usize, TransformError>
    where
        H: HeaderCollection + ?Sized,
        E: TemplateEngine + ?Sized,
    {
        debug!("Rewrite HTTP response headers");

        let mut rewritten = Vec::new();
        let mut changed = 0usize;

        for (name, values) in headers.entries() {
            let mut new_values = Vec::with_capacity(values.len());
            for value in &values {
                let new_value = self.engine.rewrite(value, template)?;
                if new_value != *value {
                    changed += 1;
                }
                new_values.push(new_value);
            }
            rewritten.push((name, new_values));
        }

        for (name, values) in rewritten {
            headers.replace(&name, values);
        }

        if changed > 0 {
            debug!(values_changed = changed, "Rewrote response header values");
        }

        Ok(changed)
    }
}
