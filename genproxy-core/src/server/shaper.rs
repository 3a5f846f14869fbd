//! Outward response shapes.

use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;

use crate::error::GenProxyError;
use crate::model::{AggregateBody, ErrorBody, TextBody};

/// Answer for any non-POST request.
pub fn liveness() -> Response {
    (StatusCode::OK, "ok").into_response()
}

pub fn json_text(text: impl Into<String>) -> Response {
    Json(TextBody { text: text.into() }).into_response()
}

pub fn json_aggregate(body: AggregateBody) -> Response {
    Json(body).into_response()
}

/// Live `text/plain` body. Status and headers are committed on return.
pub fn text_stream<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut resp = Response::new(Body::from_stream(stream));
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

/// `{status, error}` where `error` is the provider's body for upstream
/// failures and the wire tag otherwise.
pub fn error_body(err: &GenProxyError) -> ErrorBody {
    let error = match err {
        GenProxyError::Upstream { body, .. } => body.clone(),
        other => Value::String(other.kind().to_string()),
    };
    ErrorBody {
        status: err.body_status(),
        error,
    }
}

pub fn error_response(err: &GenProxyError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error_body(err))).into_response()
}
