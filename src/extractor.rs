//! Byte-window extraction from buffered and streamed bodies
//!
//! The streaming path walks the source chunk by chunk with a running
//! offset, forwards only the overlap with the requested window, and stops
//! reading as soon as the window is exhausted so the remainder of the
//! source is never consumed. Sub-chunk windows are zero-copy
//! (`Bytes::slice`).

use crate::error::Result;
use crate::models::{Body, MediaResponse, RangeSpec};
use bytes::Bytes;
use http::{HeaderValue, StatusCode};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Extracts a validated byte window from a response body
pub struct RangeExtractor;

impl RangeExtractor {
    /// Buffered extraction: slice the requested window out of a
    /// fully-materialized body
    ///
    /// The caller guarantees `range` was validated against `body.len()`;
    /// out-of-bounds windows are clamped defensively rather than panicking.
    pub fn extract_buffered(body: &Bytes, range: &RangeSpec) -> Bytes {
        let len = body.len() as u64;
        if len == 0 || range.start >= len {
            return Bytes::new();
        }
        let end = range.end.min(len - 1);
        body.slice(range.start as usize..=end as usize)
    }

    /// Streaming extraction: forward only the requested window, chunk by
    /// chunk, terminating early once the window is exhausted
    ///
    /// A mid-stream source error aborts the output with that error; the
    /// caller must not serve the truncated output as a complete 206.
    /// Dropping the returned receiver stops the forwarding task, which in
    /// turn drops the source and tears down the upstream read.
    pub fn extract_stream(
        mut source: mpsc::Receiver<Result<Bytes>>,
        range: RangeSpec,
    ) -> mpsc::Receiver<Result<Bytes>> {
        let (tx, rx) = mpsc::channel(8);

        tokio::spawn(async move {
            let mut offset: u64 = 0;

            while let Some(item) = source.recv().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("Source stream failed at offset {}: {}", offset, e);
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                if chunk.is_empty() {
                    continue;
                }

                let chunk_start = offset;
                let chunk_end = offset + chunk.len() as u64; // exclusive
                offset = chunk_end;

                // Entirely before the window
                if chunk_end <= range.start {
                    continue;
                }
                // Entirely past the window: stop reading the source
                if chunk_start > range.end {
                    break;
                }

                let lo = range.start.saturating_sub(chunk_start) as usize;
                let hi = (range.end.min(chunk_end - 1) - chunk_start + 1) as usize;
                let window = chunk.slice(lo..hi);

                if tx.send(Ok(window)).await.is_err() {
                    // Receiver gone, client disconnected
                    debug!("Range output dropped at offset {}, stopping", offset);
                    return;
                }

                if chunk_end > range.end {
                    // Window complete; do not drain the rest of the source
                    break;
                }
            }
        });

        rx
    }

    /// Extract the window from either body form
    ///
    /// Buffered bodies stay buffered; streams stay streamed.
    pub fn extract(body: Body, range: RangeSpec) -> Body {
        match body {
            Body::Full(bytes) => Body::Full(Self::extract_buffered(&bytes, &range)),
            Body::Stream(rx) => Body::Stream(Self::extract_stream(rx, range)),
        }
    }

    /// Turn a full response into a 206 Partial Content response for the
    /// given window
    ///
    /// Rewrites `Content-Range`, `Content-Length` and the status while
    /// preserving the remaining headers, and slices the body.
    pub fn partial_response(response: MediaResponse, range: RangeSpec) -> MediaResponse {
        let MediaResponse {
            headers: mut out,
            body,
            ..
        } = response;

        if let Ok(value) = HeaderValue::from_str(&range.content_range()) {
            out.insert(http::header::CONTENT_RANGE, value);
        }
        out.insert(http::header::CONTENT_LENGTH, HeaderValue::from(range.len()));
        out.insert(
            http::header::ACCEPT_RANGES,
            HeaderValue::from_static("bytes"),
        );

        debug!(
            "Serving partial content: {} ({} bytes)",
            range.content_range(),
            range.len()
        );

        MediaResponse::new(
            StatusCode::PARTIAL_CONTENT,
            out,
            Self::extract(body, range),
        )
    }
}
