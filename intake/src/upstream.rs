//! Upstream client: a minimal HTTP/1.1 client to the two payment
//! processors, with keep-alive, a per-host connection cap, and pooled
//! request and response body buffers.

use crate::error::UpstreamError;
use crate::payment::{Job, UpstreamPaymentRequest};
use crate::pool::Pool;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processor {
    Default,
    Fallback,
}

pub struct UpstreamClient {
    default_url: String,
    fallback_url: String,
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
    body_buffers: Arc<Pool<Vec<u8>>>,
    response_buffers: Arc<Pool<Vec<u8>>>,
}

impl UpstreamClient {
    pub fn new(default_url: String, fallback_url: String, timeout_ms: u64) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new())
            // Per-host idle connection cap: the upstream processors have
            // modest capacity, so keep-alive pooling is deliberately small.
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(60))
            .build(HttpConnector::new());

        Self {
            default_url: format!("{default_url}/payments"),
            fallback_url: format!("{fallback_url}/payments"),
            client,
            timeout: Duration::from_millis(timeout_ms),
            body_buffers: Arc::new(Pool::new(64, || Vec::with_capacity(256))),
            response_buffers: Arc::new(Pool::new(64, || Vec::with_capacity(256))),
        }
    }

    fn url_for(&self, processor: Processor) -> &str {
        match processor {
            Processor::Default => &self.default_url,
            Processor::Fallback => &self.fallback_url,
        }
    }

    /// Posts a job to the chosen processor. Success means HTTP 200 within
    /// the call timeout; anything else — transport error, non-200, or
    /// timeout — is an `UpstreamError` and callers retry on all of them
    /// alike (correlation id idempotency guards against double charges).
    pub async fn post_payment(&self, processor: Processor, job: &Job) -> Result<(), UpstreamError> {
        let mut buf = self.body_buffers.acquire_buffer();
        let payload = UpstreamPaymentRequest {
            correlation_id: &job.correlation_id,
            amount: job.amount,
            requested_at: job.requested_at(),
        };
        serde_json::to_writer(&mut *buf, &payload)
            .map_err(|e| UpstreamError::Build(e.to_string()))?;
        let body = Full::new(Bytes::copy_from_slice(&buf));
        // `buf` (the pooled buffer) is released back to the pool here via
        // its Drop impl regardless of how the call below turns out.

        let req = Request::builder()
            .method(Method::POST)
            .uri(self.url_for(processor))
            .header("content-type", "application/json")
            .body(body)
            .map_err(|e| UpstreamError::Build(e.to_string()))?;

        let call = self.client.request(req);
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(UpstreamError::Transport(e)),
            Err(_) => return Err(UpstreamError::Timeout),
        };

        let status = response.status();
        // The response body is drained into a pooled buffer rather than
        // `collect()`'s fresh, unpooled `Bytes` allocation, so its memory
        // is reused across calls the same way the pooled request body is.
        // Drained (and the buffer released) on every exit path, including
        // a non-200 status, so the connection can be reused.
        let mut resp_buf = self.response_buffers.acquire_buffer();
        let mut body = response.into_body();
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(UpstreamError::Body)?;
            if let Some(data) = frame.data_ref() {
                resp_buf.extend_from_slice(data);
            }
        }

        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(UpstreamError::Rejected(status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use time::OffsetDateTime;

    fn sample_job() -> Job {
        Job {
            correlation_id: "c1".to_string(),
            amount: Decimal::new(1990, 2),
            requested_at: Some(OffsetDateTime::now_utc()),
        }
    }

    #[tokio::test]
    async fn post_to_an_unreachable_processor_is_a_transport_error() {
        let client = UpstreamClient::new(
            "http://127.0.0.1:1".to_string(),
            "http://127.0.0.1:1".to_string(),
            300,
        );
        let err = client
            .post_payment(Processor::Default, &sample_job())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Transport(_)));
    }

    /// Spawns a one-shot fake processor on a loopback port that replies with
    /// the given status line and a small body, closing after one request.
    async fn fake_processor(status_line: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let body = b"{}";
            let response = format!(
                "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.write_all(body).await;
            let _ = stream.shutdown().await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn post_draining_a_200_response_into_the_pooled_buffer_succeeds() {
        let url = fake_processor("HTTP/1.1 200 OK").await;
        let client = UpstreamClient::new(url.clone(), url, 1_000);
        client
            .post_payment(Processor::Default, &sample_job())
            .await
            .expect("a 200 response must be treated as success");
    }

    #[tokio::test]
    async fn post_draining_a_non_200_response_is_rejected() {
        let url = fake_processor("HTTP/1.1 500 Internal Server Error").await;
        let client = UpstreamClient::new(url.clone(), url, 1_000);
        let err = client
            .post_payment(Processor::Default, &sample_job())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Rejected(StatusCode::INTERNAL_SERVER_ERROR)));
    }
}
