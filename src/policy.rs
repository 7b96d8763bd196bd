//! Response-stage handler for a single rewrite rule.

use crate::config::{RewriteConfig, Settings};
use crate::headers::{mark_chunked, HeaderCollection};
use crate::matcher::CompiledPattern;
use crate::template::TemplateEngine;
use crate::transformer::{
    BodyRewriteStage, BodySink, HeaderRewriter, RewriteEngine, TransformError,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// Rewrites URLs in responses according to one [`RewriteConfig`].
///
/// Host integration points are [`UrlRewritePolicy::on_response_headers`],
/// called once per response, and [`UrlRewritePolicy::on_response_body_stage`],
/// called when the response body pipeline is assembled.
#[derive(Debug, Clone)]
pub struct UrlRewritePolicy {
    config: RewriteConfig,
    engine: Arc<RewriteEngine>,
    headers: HeaderRewriter,
}

impl UrlRewritePolicy {
    /// Build a policy, validating the `from_regex` pattern.
    ///
    /// The pattern is always compiled here so a bad pattern is reported before
    /// any response is processed. With `cache_pattern` the compiled pattern is
    /// kept; otherwise it is compiled again for every rewrite.
    pub fn new(config: RewriteConfig, settings: &Settings) -> Result<Self, TransformError> {
        let engine = if settings.cache_pattern {
            RewriteEngine::cached(&config.from_regex, &config.to_replacement)?
        } else {
            CompiledPattern::compile(&config.from_regex)?;
            RewriteEngine::new(&config.from_regex, &config.to_replacement)
        };
        let engine = Arc::new(engine);

        debug!(
            from = %config.from_regex,
            to = %config.to_replacement,
            headers = config.rewrite_response_headers,
            body = config.rewrite_response_body,
            cached = engine.is_cached(),
            "URL rewrite policy initialized"
        );

        Ok(Self {
            headers: HeaderRewriter::new(Arc::clone(&engine)),
            engine,
            config,
        })
    }

    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<RewriteEngine> {
        &self.engine
    }

    /// Response headers hook.
    ///
    /// Rewrites header values when header rewriting is enabled. When body
    /// rewriting is enabled the body length changes, so `Content-Length` is
    /// dropped and the body is marked chunked. Returns the number of header
    /// values that changed.
    pub fn on_response_headers<H, E>(
        &self,
        headers: &mut H,
        template: &mut E,
    ) -> Result<usize, TransformError>
    where
        H: HeaderCollection + ?Sized,
        E: TemplateEngine + ?Sized,
    {
        let changed = if self.config.rewrite_response_headers {
            self.headers.rewrite_headers(headers, template)?
        } else {
            0
        };

        if self.config.rewrite_response_body {
            trace!("Switching response body to chunked framing");
            mark_chunked(headers);
        }

        Ok(changed)
    }

    /// Response body hook.
    ///
    /// Returns `None` when body rewriting is disabled; the host must then leave
    /// the body pipeline untouched.
    pub fn on_response_body_stage<E, S>(
        &self,
        template: E,
        downstream: S,
    ) -> Option<BodyRewriteStage<E, S>>
    where
        E: TemplateEngine,
        S: BodySink,
    {
        if !self.config.rewrite_response_body {
            return None;
        }

        Some(BodyRewriteStage::new(
            Arc::clone(&self.engine),
            template,
            downstream,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{CONTENT_LENGTH, TRANSFER_ENCODING};
    use crate::template::ExpressionEngine;
    use crate::transformer::CollectingSink;
    use std::collections::HashMap;

    const FROM: &str = r"https?://[^/]*/((.*|/*))";
    const TO: &str = "https://apis.example.io/{group[1]}";

    fn make_headers() -> HashMap<String, Vec<String>> {
        let mut headers = HashMap::new();
        headers.insert(
            "Location".to_string(),
            vec!["https://localgateway/mypath".to_string()],
        );
        headers.insert("Content-Length".to_string(), vec!["120".to_string()]);
        headers
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = RewriteConfig::new("(", TO).with_headers(true);
        assert!(UrlRewritePolicy::new(config.clone(), &Settings::default()).is_err());

        let settings = Settings {
            cache_pattern: true,
            ..Default::default()
        };
        assert!(UrlRewritePolicy::new(config, &settings).is_err());
    }

    #[test]
    fn test_headers_rewritten() {
        let config = RewriteConfig::new(FROM, TO).with_headers(true);
        let policy = UrlRewritePolicy::new(config, &Settings::default()).unwrap();

        let mut headers = make_headers();
        let changed = policy
            .on_response_headers(&mut headers, &mut ExpressionEngine::new())
            .unwrap();

        assert_eq!(changed, 1);
        assert_eq!(
            headers.first("Location"),
            Some("https://apis.example.io/mypath".to_string())
        );
        // Body untouched, so framing is kept.
        assert_eq!(headers.first(CONTENT_LENGTH), Some("120".to_string()));
        assert!(policy
            .on_response_body_stage(ExpressionEngine::new(), CollectingSink::new())
            .is_none());
    }

    #[test]
    fn test_headers_disabled() {
        let config = RewriteConfig::new(FROM, TO);
        let policy = UrlRewritePolicy::new(config, &Settings::default()).unwrap();

        let mut headers = make_headers();
        let before = headers.clone();
        policy
            .on_response_headers(&mut headers, &mut ExpressionEngine::new())
            .unwrap();
        assert_eq!(headers, before);
    }

    #[test]
    fn test_body_enabled_switches_framing() {
        let config = RewriteConfig::new(FROM, TO).with_body(true);
        let policy = UrlRewritePolicy::new(config, &Settings::default()).unwrap();

        let mut headers = make_headers();
        policy
            .on_response_headers(&mut headers, &mut ExpressionEngine::new())
            .unwrap();

        assert_eq!(headers.first(CONTENT_LENGTH), None);
        assert_eq!(headers.first(TRANSFER_ENCODING), Some("chunked".to_string()));
        // Headers themselves are not rewritten.
        assert_eq!(
            headers.first("Location"),
            Some("https://localgateway/mypath".to_string())
        );
    }

    #[test]
    fn test_body_stage() {
        let config = RewriteConfig::new(FROM, TO).with_body(true);
        let settings = Settings {
            cache_pattern: true,
            ..Default::default()
        };
        let policy = UrlRewritePolicy::new(config, &settings).unwrap();
        assert!(policy.engine().is_cached());

        let mut stage = policy
            .on_response_body_stage(ExpressionEngine::new(), CollectingSink::new())
            .unwrap();
        stage
            .write(br#"{"link":"http://localhost:8082/mypath/toto"}"#)
            .unwrap();
        stage.end().unwrap();

        assert_eq!(
            stage.downstream().body().as_ref(),
            br#"{"link":"https://apis.example.io/mypath/toto"}"#
        );
    }
}
