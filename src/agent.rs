//! URL rewrite agent implementation.

use crate::config::{AgentConfig, Settings};
use crate::headers::HeaderCollection;
use crate::policy::UrlRewritePolicy;
use crate::template::ExpressionEngine;
use crate::transformer::{BodyRewriteStage, CollectingSink, TransformError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

/// Debug header naming the rewrites applied to a response.
pub const DEBUG_HEADER: &str = "X-Url-Rewrite";

/// Open streams above which stale entries are evicted.
const MAX_IN_FLIGHT: usize = 10_000;

/// Age after which an open stream counts as stale.
const STALE_AFTER: Duration = Duration::from_secs(60);

type Stage = BodyRewriteStage<ExpressionEngine, CollectingSink>;

/// Per-response body state, kept from the headers event to the end of the body.
struct StoredStream {
    /// Body stage; `None` when the headers phase failed
    stage: Option<Stage>,
    /// Time the headers event was handled
    start_time: Instant,
}

/// Response headers as delivered by the proxy.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeadersEvent {
    pub correlation_id: String,
    pub status: u16,
    pub headers: HashMap<String, Vec<String>>,
}

/// One chunk of a response body.
#[derive(Debug, Clone, Default)]
pub struct ResponseBodyChunkEvent {
    pub correlation_id: String,
    pub data: Bytes,
    /// Set on the final chunk of the body
    pub is_last: bool,
}

/// Outcome of the response headers phase.
#[derive(Debug, Clone)]
pub struct HeadersDecision {
    /// Headers to forward to the client
    pub headers: HashMap<String, Vec<String>>,
    /// Whether the body will be buffered and rewritten
    pub body_rewrite: bool,
}

/// Outcome of a response body chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyDecision {
    /// Forward the chunk unchanged
    Passthrough(Bytes),
    /// The chunk was buffered; forward nothing yet
    Buffered,
    /// Forward this rewritten body in place of the chunk
    Replaced(Bytes),
}

/// Snapshot of agent counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentStats {
    pub responses_total: u64,
    pub headers_rewritten: u64,
    pub bodies_rewritten: u64,
    pub rewrite_errors: u64,
}

/// Response lifecycle hooks driven by the proxy.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    /// Handle the response headers of a response.
    async fn on_response_headers(
        &self,
        event: ResponseHeadersEvent,
    ) -> Result<HeadersDecision, UrlRewriteAgentError>;

    /// Handle one chunk of a response body.
    async fn on_response_body_chunk(
        &self,
        event: ResponseBodyChunkEvent,
    ) -> Result<BodyDecision, UrlRewriteAgentError>;

    /// Handle the end of a response.
    ///
    /// Flushes a body stage that never saw a last chunk, which covers responses
    /// without body events (204, 304, HEAD). Returns the rewritten body, if a
    /// stage was open.
    async fn on_response_complete(
        &self,
        correlation_id: &str,
    ) -> Result<Option<Bytes>, UrlRewriteAgentError>;

    /// Handle a response that ended before its last body chunk.
    async fn on_response_aborted(&self, correlation_id: &str);
}

/// URL rewrite agent for Zentinel.
///
/// Rewrites URLs in response headers and bodies. Body stages are kept per
/// response, keyed by correlation id, from the headers event until the last
/// chunk, completion or an abort.
pub struct UrlRewriteAgent {
    /// Global settings
    settings: Settings,
    /// Rewrite policy
    policy: UrlRewritePolicy,
    /// In-flight body streams (keyed by correlation_id)
    streams: Arc<RwLock<HashMap<String, StoredStream>>>,
    /// Metrics: total responses processed.
    responses_total: AtomicU64,
    /// Metrics: header values rewritten.
    headers_rewritten: AtomicU64,
    /// Metrics: bodies rewritten.
    bodies_rewritten: AtomicU64,
    /// Metrics: rewrite errors.
    rewrite_errors: AtomicU64,
}

impl UrlRewriteAgent {
    /// Create a new agent from configuration.
    pub fn new(config: AgentConfig) -> Result<Self, UrlRewriteAgentError> {
        let policy = UrlRewritePolicy::new(config.rewrite, &config.settings)?;

        info!(
            version = %config.version,
            rewrite_headers = policy.config().rewrite_response_headers,
            rewrite_body = policy.config().rewrite_response_body,
            cache_pattern = config.settings.cache_pattern,
            debug_headers = config.settings.debug_headers,
            "URL rewrite agent initialized"
        );

        Ok(Self {
            settings: config.settings,
            policy,
            streams: Arc::new(RwLock::new(HashMap::new())),
            responses_total: AtomicU64::new(0),
            headers_rewritten: AtomicU64::new(0),
            bodies_rewritten: AtomicU64::new(0),
            rewrite_errors: AtomicU64::new(0),
        })
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> Result<Self, UrlRewriteAgentError> {
        let config: AgentConfig = serde_yaml::from_str(yaml)?;
        Self::new(config)
    }

    /// Create from a JSON configuration string.
    pub fn from_json(json: &str) -> Result<Self, UrlRewriteAgentError> {
        let config: AgentConfig = serde_json::from_str(json)?;
        Self::new(config)
    }

    pub fn policy(&self) -> &UrlRewritePolicy {
        &self.policy
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of responses with a body stage still open.
    pub async fn in_flight(&self) -> usize {
        self.streams.read().await.len()
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            responses_total: self.responses_total.load(Ordering::Relaxed),
            headers_rewritten: self.headers_rewritten.load(Ordering::Relaxed),
            bodies_rewritten: self.bodies_rewritten.load(Ordering::Relaxed),
            rewrite_errors: self.rewrite_errors.load(Ordering::Relaxed),
        }
    }

    /// Value of the debug header, if any rewrite is enabled.
    fn debug_header_value(&self) -> Option<&'static str> {
        let config = self.policy.config();
        match (config.rewrite_response_headers, config.rewrite_response_body) {
            (true, true) => Some("headers,body"),
            (true, false) => Some("headers"),
            (false, true) => Some("body"),
            (false, false) => None,
        }
    }

    /// Drop streams older than `max_age`. Returns the number evicted.
    pub async fn evict_stale(&self, max_age: Duration) -> usize {
        let mut streams = self.streams.write().await;
        evict_older_than(&mut streams, max_age)
    }

    /// Store the body state of a response.
    async fn store_stream(&self, correlation_id: &str, stage: Option<Stage>) {
        let mut streams = self.streams.write().await;
        let stored = StoredStream {
            stage,
            start_time: Instant::now(),
        };
        if streams.insert(correlation_id.to_string(), stored).is_some() {
            warn!(
                correlation_id,
                "Replaced an unfinished body stream for the same response"
            );
        }

        // Cleanup old streams (simple eviction if too many)
        if streams.len() > MAX_IN_FLIGHT {
            let evicted = evict_older_than(&mut streams, STALE_AFTER);
            if evicted > 0 {
                warn!(evicted, "Evicted stale body streams");
            }
        }
    }

    /// Feed the final bytes to a stage, flush it and return the rewritten body.
    fn finish_stage(
        &self,
        correlation_id: &str,
        mut stage: Stage,
        last: &[u8],
    ) -> Result<Bytes, UrlRewriteAgentError> {
        let result = stage.write(last).and_then(|stage| stage.end());
        if let Err(e) = result {
            self.record_error(correlation_id, &e, "body");
            return Err(e.into());
        }

        let body = stage.into_downstream().body();
        self.bodies_rewritten.fetch_add(1, Ordering::Relaxed);

        info!(correlation_id, body_size = body.len(), "Rewrote response body");

        Ok(body)
    }

    fn record_error(&self, correlation_id: &str, error: &TransformError, phase: &str) {
        self.rewrite_errors.fetch_add(1, Ordering::Relaxed);
        warn!(correlation_id, phase, error = %error, "URL rewrite failed");
    }
}

fn evict_older_than(streams: &mut HashMap<String, StoredStream>, max_age: Duration) -> usize {
    let before = streams.len();
    streams.retain(|_, stored| stored.start_time.elapsed() < max_age);
    before - streams.len()
}

#[async_trait]
impl ResponseHandler for UrlRewriteAgent {
    async fn on_response_headers(
        &self,
        event: ResponseHeadersEvent,
    ) -> Result<HeadersDecision, UrlRewriteAgentError> {
        self.responses_total.fetch_add(1, Ordering::Relaxed);

        let correlation_id = event.correlation_id;
        let mut headers = event.headers;

        let result = self
            .policy
            .on_response_headers(&mut headers, &mut ExpressionEngine::new());
        let changed = match result {
            Ok(changed) => changed,
            Err(e) => {
                self.record_error(&correlation_id, &e, "headers");
                // Body chunks of this response are rejected from now on.
                if self.policy.config().rewrite_response_body {
                    self.store_stream(&correlation_id, None).await;
                }
                return Err(e.into());
            }
        };
        self.headers_rewritten.fetch_add(changed as u64, Ordering::Relaxed);

        if self.settings.debug_headers {
            if let Some(value) = self.debug_header_value() {
                headers.set(DEBUG_HEADER, value);
            }
        }

        let stage = self
            .policy
            .on_response_body_stage(ExpressionEngine::new(), CollectingSink::new());
        let body_rewrite = stage.is_some();

        if let Some(stage) = stage {
            self.store_stream(&correlation_id, Some(stage)).await;
        }

        debug!(
            correlation_id = %correlation_id,
            status = event.status,
            values_changed = changed,
            body_rewrite,
            "Processed response headers"
        );

        Ok(HeadersDecision {
            headers,
            body_rewrite,
        })
    }

    async fn on_response_body_chunk(
        &self,
        event: ResponseBodyChunkEvent,
    ) -> Result<BodyDecision, UrlRewriteAgentError> {
        let correlation_id = event.correlation_id.as_str();

        if !event.is_last {
            let mut streams = self.streams.write().await;
            let Some(stored) = streams.get_mut(correlation_id) else {
                return Ok(BodyDecision::Passthrough(event.data));
            };
            let Some(stage) = stored.stage.as_mut() else {
                return Err(UrlRewriteAgentError::HeadersFailed(correlation_id.to_string()));
            };
            stage.write(&event.data)?;
            trace!(
                correlation_id,
                chunk_size = event.data.len(),
                buffered = stage.buffered_len(),
                "Buffered response body chunk"
            );
            return Ok(BodyDecision::Buffered);
        }

        let stored = self.streams.write().await.remove(correlation_id);
        let Some(stored) = stored else {
            return Ok(BodyDecision::Passthrough(event.data));
        };
        let Some(stage) = stored.stage else {
            return Err(UrlRewriteAgentError::HeadersFailed(correlation_id.to_string()));
        };

        self.finish_stage(correlation_id, stage, &event.data).map(BodyDecision::Replaced)
    }

    async fn on_response_complete(
        &self,
        correlation_id: &str,
    ) -> Result<Option<Bytes>, UrlRewriteAgentError> {
        let stored = self.streams.write().await.remove(correlation_id);
        let Some(stage) = stored.and_then(|stored| stored.stage) else {
            return Ok(None);
        };

        debug!(
            correlation_id,
            buffered = stage.buffered_len(),
            "Flushing body stage at response completion"
        );
        self.finish_stage(correlation_id, stage, &[]).map(Some)
    }

    async fn on_response_aborted(&self, correlation_id: &str) {
        if let Some(stored) = self.streams.write().await.remove(correlation_id) {
            debug!(
                correlation_id,
                discarded = stored.stage.as_ref().map_or(0, |stage| stage.buffered_len()),
                "Discarded body stream of aborted response"
            );
        }
    }
}

/// URL rewrite agent errors.
#[derive(Debug, thiserror::Error)]
pub enum UrlRewriteAgentError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rewrite error: {0}")]
    Transform(#[from] TransformError),

    #[error("Response headers failed to rewrite, body dropped: {0}")]
    HeadersFailed(String),
}
