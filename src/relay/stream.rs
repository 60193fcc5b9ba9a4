use bytes::Bytes;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::providers::{self, TokenUsage};
use crate::storage::{self, ChannelType};

#[derive(Clone)]
pub(super) struct StreamLogContext {
    pub(super) db_path: std::path::PathBuf,
    pub(super) channel_type: ChannelType,
    pub(super) token_id: Option<String>,
    pub(super) channel_id: String,
    pub(super) key_id: String,
    pub(super) model: String,
    pub(super) path: String,
    pub(super) http_status: i64,
    pub(super) status_is_success: bool,
    pub(super) started: Instant,
}

/// Pass-through byte stream that tallies SSE usage and writes the request
/// log exactly once — at stream end, on stream error, or on drop when the
/// client disconnects mid-stream.
pub(super) struct LogStream {
    inner: futures_util::stream::BoxStream<'static, Result<Bytes, reqwest::Error>>,
    ctx: StreamLogContext,
    finalized: bool,
    usage: TokenUsage,
    sse_buf: Vec<u8>,
    err_body_buf: Vec<u8>,
    stream_error: Option<String>,
}

impl LogStream {
    pub(super) fn new(
        inner: futures_util::stream::BoxStream<'static, Result<Bytes, reqwest::Error>>,
        ctx: StreamLogContext,
    ) -> Self {
        Self {
            inner,
            ctx,
            finalized: false,
            usage: TokenUsage::default(),
            sse_buf: Vec::new(),
            err_body_buf: Vec::new(),
            stream_error: None,
        }
    }

    fn on_chunk(&mut self, bytes: &Bytes) {
        const MAX_ERR_BODY_BUF: usize = 64 * 1024;
        if !self.ctx.status_is_success && self.err_body_buf.len() < MAX_ERR_BODY_BUF {
            let remain = MAX_ERR_BODY_BUF - self.err_body_buf.len();
            self.err_body_buf
                .extend_from_slice(&bytes[..bytes.len().min(remain)]);
        }
        self.consume_sse(bytes);
    }

    fn consume_sse(&mut self, bytes: &Bytes) {
        const MAX_SSE_BUF: usize = 256 * 1024;
        if self.sse_buf.len() < MAX_SSE_BUF {
            let remain = MAX_SSE_BUF - self.sse_buf.len();
            self.sse_buf
                .extend_from_slice(&bytes[..bytes.len().min(remain)]);
        }

        while let Some(nl) = self.sse_buf.iter().position(|b| *b == b'\n') {
            let line = self.sse_buf.drain(..=nl).collect::<Vec<u8>>();
            let Ok(mut s) = std::str::from_utf8(&line) else {
                continue;
            };
            s = s.trim();
            if !s.starts_with("data:") {
                continue;
            }
            let data = s["data:".len()..].trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }
            let Ok(v) = serde_json::from_str::<serde_json::Value>(data) else {
                continue;
            };
            self.usage
                .merge(providers::extract_usage(self.ctx.channel_type, &v));
        }
    }

    fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        let latency_ms = self.ctx.started.elapsed().as_millis() as i64;
        let error = if self.ctx.status_is_success && self.stream_error.is_none() {
            None
        } else if let Some(err) = self.stream_error.as_deref() {
            Some(super::truncate(err, 2000))
        } else {
            Some(super::truncate(
                &String::from_utf8_lossy(&self.err_body_buf),
                2000,
            ))
        };

        tracing::debug!(
            channel_id = %self.ctx.channel_id,
            key_id = %self.ctx.key_id,
            model = %self.ctx.model,
            http_status = self.ctx.http_status,
            latency_ms,
            "streaming relay finished"
        );

        super::spawn_log(
            self.ctx.db_path.clone(),
            storage::CreateRequestLog {
                ts_ms: storage::now_ms(),
                token_id: self.ctx.token_id.clone(),
                channel_id: self.ctx.channel_id.clone(),
                key_id: self.ctx.key_id.clone(),
                model: self.ctx.model.clone(),
                path: self.ctx.path.clone(),
                method: "POST".to_string(),
                status: self.ctx.http_status,
                latency_ms,
                input_tokens: self.usage.input_tokens,
                output_tokens: self.usage.output_tokens,
                error,
                streaming: true,
            },
        );
    }
}

impl futures_util::Stream for LogStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.as_mut().poll_next(cx);
        match polled {
            Poll::Ready(Some(Ok(bytes))) => {
                self.on_chunk(&bytes);
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.stream_error = Some(e.to_string());
                Poll::Ready(Some(Err(std::io::Error::other(e))))
            }
            Poll::Ready(None) => {
                self.finalize();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        // Client gone mid-stream: the upstream read aborts with the body,
        // and the log still records the partial latency.
        self.finalize();
    }
}
