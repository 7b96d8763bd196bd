//! Buffered response body rewriting.

use super::{RewriteEngine, TransformError};
use crate::template::TemplateEngine;
use bytes::{Bytes, BytesMut};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, warn};

/// Downstream side of a body stage.
pub trait BodySink {
    /// Receive one chunk.
    fn write(&mut self, chunk: Bytes);

    /// Receive end-of-stream.
    fn end(&mut self);
}

/// Sink that keeps everything it receives.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    chunks: Vec<Bytes>,
    ended: bool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// All received chunks joined together.
    pub fn body(&self) -> Bytes {
        match self.chunks.as_slice() {
            [single] => single.clone(),
            chunks => {
                let mut joined = BytesMut::new();
                for chunk in chunks {
                    joined.extend_from_slice(chunk);
                }
                joined.freeze()
            }
        }
    }
}

impl BodySink for CollectingSink {
    fn write(&mut self, chunk: Bytes) {
        self.chunks.push(chunk);
    }

    fn end(&mut self) {
        self.ended = true;
    }
}

#[derive(Debug)]
enum StageState {
    /// No chunk seen yet
    Idle,
    /// Chunks are being buffered
    Accumulating(BytesMut),
    /// End-of-stream handled; no further input accepted
    Flushed,
}

/// Stream stage that buffers the whole body and rewrites it once at end-of-stream.
///
/// Regex matches may span chunk boundaries, so nothing is forwarded until
/// [`BodyRewriteStage::end`]. The buffer is unbounded. One stage serves one
/// response body; calls must be sequential.
#[derive(Debug)]
pub struct BodyRewriteStage<E, S> {
    engine: Arc<RewriteEngine>,
    template: E,
    downstream: S,
    state: StageState,
}

impl<E, S> BodyRewriteStage<E, S>
where
    E: TemplateEngine,
    S: BodySink,
{
    pub fn new(engine: Arc<RewriteEngine>, template: E, downstream: S) -> Self {
        Self {
            engine,
            template,
            downstream,
            state: StageState::Idle,
        }
    }

    /// Buffer a chunk. Nothing is forwarded downstream yet.
    pub fn write(&mut self, chunk: &[u8]) -> Result<&mut Self, TransformError> {
        match &mut self.state {
            StageState::Flushed => return Err(TransformError::StreamFlushed),
            StageState::Accumulating(buffer) => buffer.extend_from_slice(chunk),
            StageState::Idle => self.state = StageState::Accumulating(BytesMut::from(chunk)),
        }
        Ok(self)
    }

    /// Rewrite the buffered body and emit it as a single chunk, then end the stream.
    ///
    /// A chunk is emitted even when nothing was written. On error nothing
    /// reaches the downstream sink.
    pub fn end(&mut self) -> Result<(), TransformError> {
        let buffer = match std::mem::replace(&mut self.state, StageState::Flushed) {
            StageState::Flushed => return Err(TransformError::StreamFlushed),
            StageState::Idle => BytesMut::new(),
            StageState::Accumulating(buffer) => buffer,
        };

        let body = decode_body(&buffer);
        let rewritten = self.engine.rewrite(&body, &mut self.template)?;

        debug!(
            input_size = buffer.len(),
            output_size = rewritten.len(),
            "Rewrote response body"
        );

        self.downstream.write(Bytes::from(rewritten));
        self.downstream.end();
        Ok(())
    }

    /// Bytes buffered so far.
    pub fn buffered_len(&self) -> usize {
        match &self.state {
            StageState::Accumulating(buffer) => buffer.len(),
            _ => 0,
        }
    }

    pub fn is_flushed(&self) -> bool {
        matches!(self.state, StageState::Flushed)
    }

    pub fn downstream(&self) -> &S {
        &self.downstream
    }

    pub fn into_downstream(self) -> S {
        self.downstream
    }
}

/// Decode the body as UTF-8, substituting U+FFFD for invalid sequences.
fn decode_body(buffer: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(buffer) {
        Ok(text) => Cow::Borrowed(text),
        Err(e) => {
            warn!(
                error = %e,
                body_size = buffer.len(),
                "Response body is not valid UTF-8, invalid sequences replaced"
            );
            String::from_utf8_lossy(buffer)
        }
    }
}
