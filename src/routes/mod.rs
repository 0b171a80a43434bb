//! HTTP route handlers
//!
//! - `POST /check-whatsapp` - registration check, see [`check`]
//! - anything else - JSON 404

pub mod check;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;

pub use check::check_whatsapp;

/// Serialize `body` as a JSON response with `status`
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let payload = match serde_json::to_vec(body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to serialize response body: {}", e);
            return plain_error();
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(payload)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Not found response
pub fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });
    json_response(StatusCode::NOT_FOUND, &body)
}

fn plain_error() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
