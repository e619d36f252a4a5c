//! Response values and sanitising transforms.
//!
//! # Responsibilities
//! - Define the response type returned by the dispatch core
//! - Record which origin served a response
//! - Remove bodies from exchanges that cannot carry one
//! - Resolve `Content-Length` / chunked `Transfer-Encoding` conflicts

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderValue, Method, Response, StatusCode};

use crate::origin::OriginId;
use crate::stream::ByteStream;

/// A response whose body is a [`ByteStream`].
pub type LiveResponse = Response<ByteStream>;

/// Response extension naming the origin that produced the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedBy(pub OriginId);

/// The origin that served `response`, if recorded.
pub fn served_by(response: &LiveResponse) -> Option<&OriginId> {
    response.extensions().get::<ServedBy>().map(|s| &s.0)
}

/// True when the exchange must not carry a response body.
pub fn is_bodiless(method: &Method, status: StatusCode) -> bool {
    method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

/// Strip the body, releasing whatever content the origin sent.
pub fn remove_body(response: LiveResponse) -> LiveResponse {
    let (mut parts, body) = response.into_parts();
    parts.headers.remove(TRANSFER_ENCODING);
    parts.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    Response::from_parts(parts, body.replace_with(ByteStream::empty()))
}

/// True when any `Transfer-Encoding` value ends in `chunked`.
pub fn is_chunked(response: &LiveResponse) -> bool {
    response
        .headers()
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| {
            v.rsplit(',')
                .next()
                .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
                .unwrap_or(false)
        })
}

/// Drop `Content-Length` when the body is chunked.
pub fn remove_conflicting_content_length(mut response: LiveResponse) -> LiveResponse {
    if is_chunked(&response) && response.headers().contains_key(CONTENT_LENGTH) {
        response.headers_mut().remove(CONTENT_LENGTH);
    }
    response
}
