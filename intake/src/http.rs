//! HTTP ingest front-end: submit, summary, health, and purge routes.

use crate::payment::{Job, PaymentRequestBody};
use crate::pool::Pool;
use crate::queue::IngestQueue;
use crate::store::Store;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn empty() -> BoxBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

fn full(body: impl Into<Bytes>) -> BoxBody {
    Full::new(body.into()).map_err(|never| match never {}).boxed()
}

fn json_response(status: StatusCode, body: &impl serde::Serialize) -> Response<BoxBody> {
    let bytes = match serde_json::to_vec(body) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response body");
            return status_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full(bytes))
        .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR))
}

fn status_response(status: StatusCode) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .body(empty())
        .expect("building a status-only response never fails")
}

pub struct AppState {
    pub job_pool: Arc<Pool<Job>>,
    pub queue: IngestQueue,
    pub store: Arc<Store>,
    pub settle_delay: Duration,
}

pub async fn route(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<BoxBody>, hyper::Error> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/payments") => handle_submit_payment(req, &state).await,
        (&Method::GET, "/payments-summary") => handle_summary(req, &state).await,
        (&Method::GET, "/healthcheck") => status_response(StatusCode::NO_CONTENT),
        (&Method::POST, "/purge-payments") => handle_purge(&state).await,
        _ => status_response(StatusCode::NOT_FOUND),
    };
    Ok(response)
}

async fn read_body_bytes(req: Request<Incoming>, limit: usize) -> Result<Bytes, Response<BoxBody>> {
    if let Some(len) = req.body().size_hint().upper() {
        if len as usize > limit {
            return Err(status_response(StatusCode::PAYLOAD_TOO_LARGE));
        }
    }
    req.into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|_| status_response(StatusCode::BAD_REQUEST))
}

async fn handle_submit_payment(req: Request<Incoming>, state: &AppState) -> Response<BoxBody> {
    const MAX_BODY_BYTES: usize = 1 << 16;
    let bytes = match read_body_bytes(req, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    // A body that doesn't even parse as JSON is rejected outright rather
    // than silently accepted as an empty job, so a bad client-side bug
    // surfaces immediately instead of silently losing the payment. See
    // DESIGN.md for the recorded decision.
    let parsed: PaymentRequestBody = match serde_json::from_slice(&bytes) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "malformed payment body");
            return status_response(StatusCode::BAD_REQUEST);
        }
    };

    // Amount is non-negative — zero is valid, only a negative amount (or
    // an empty correlation id) is rejected.
    if parsed.correlation_id.is_empty() || parsed.amount < rust_decimal::Decimal::ZERO {
        return status_response(StatusCode::BAD_REQUEST);
    }

    let mut job = state.job_pool.acquire();
    *job = Job::from_body(parsed);

    // Blocks until the assigned worker has room; the caller only ever
    // sees 202 once the job is durably handed off.
    state.queue.push(job).await;

    status_response(StatusCode::ACCEPTED)
}

fn parse_query_time(query: &str, key: &str) -> Result<Option<OffsetDateTime>, ()> {
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        if k == key {
            if v.is_empty() {
                return Ok(None);
            }
            return time::OffsetDateTime::parse(&v, &time::format_description::well_known::Rfc3339)
                .map(Some)
                .map_err(|_| ());
        }
    }
    Ok(None)
}

async fn handle_summary(req: Request<Incoming>, state: &AppState) -> Response<BoxBody> {
    let query = req.uri().query().unwrap_or("");

    let from = match parse_query_time(query, "from") {
        Ok(v) => v,
        Err(()) => return status_response(StatusCode::BAD_REQUEST),
    };
    let to = match parse_query_time(query, "to") {
        Ok(v) => v,
        Err(()) => return status_response(StatusCode::BAD_REQUEST),
    };

    // Settle delay: give in-flight workers a moment to finish persisting
    // before the summary reads the table.
    if !state.settle_delay.is_zero() {
        tokio::time::sleep(state.settle_delay).await;
    }

    match state.store.aggregate_summary(from, to).await {
        Ok(summary) => json_response(StatusCode::OK, &summary),
        Err(e) => {
            tracing::error!(error = %e, "failed to aggregate payments summary");
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn handle_purge(state: &AppState) -> Response<BoxBody> {
    match state.store.purge().await {
        Ok(()) => status_response(StatusCode::OK),
        Err(e) => {
            tracing::error!(error = %e, "failed to purge payments table");
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_time_is_none_when_param_absent() {
        assert_eq!(parse_query_time("", "from").unwrap(), None);
    }

    #[test]
    fn query_time_parses_rfc3339_with_fractional_seconds() {
        let got = parse_query_time("from=2024-01-01T00:00:00.100Z", "from").unwrap();
        assert!(got.is_some());
    }

    #[test]
    fn query_time_rejects_unparseable_value() {
        assert!(parse_query_time("from=not-a-date", "from").is_err());
    }

    // `route()` takes `Request<Incoming>`, and `Incoming` bodies can only
    // be produced by an actual hyper connection, not constructed in a unit
    // test — so route dispatch is exercised indirectly via the status
    // helpers each arm delegates to, and directly where a real connection
    // is available (see the crate's integration-style scenarios in the
    // worker pool and upstream client tests).
    #[test]
    fn status_only_responses_carry_no_body_content_type() {
        let resp = status_response(StatusCode::NO_CONTENT);
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(resp.headers().get("content-type").is_none());
    }

    #[test]
    fn malformed_payment_body_fails_to_parse() {
        let err = serde_json::from_slice::<PaymentRequestBody>(b"not json").unwrap_err();
        assert!(err.is_syntax() || err.is_data());
    }

    #[test]
    fn zero_amount_is_allowed_but_negative_is_not() {
        // Amount is non-negative, so zero must pass validation.
        assert!(!(rust_decimal::Decimal::ZERO < rust_decimal::Decimal::ZERO));
        assert!(rust_decimal::Decimal::new(-1, 2) < rust_decimal::Decimal::ZERO);
    }
}
