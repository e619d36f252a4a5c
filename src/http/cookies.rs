//! Cookie lookup and sticky-session cookie issuance.

use std::time::Duration;

use http::header::COOKIE;
use http::{HeaderMap, HeaderValue};

use crate::origin::{AppId, OriginId};

/// Value of the first request cookie called `name`.
pub fn request_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
}

/// Name of the sticky-session cookie for an application.
pub fn sticky_cookie_name(app_id: &AppId) -> String {
    format!("styx_origin_{}", app_id)
}

/// `Set-Cookie` value pinning the client to `origin_id`.
pub fn sticky_set_cookie(app_id: &AppId, origin_id: &OriginId, max_age: Duration) -> Option<HeaderValue> {
    let cookie = format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly",
        sticky_cookie_name(app_id),
        origin_id,
        max_age.as_secs()
    );
    HeaderValue::from_str(&cookie).ok()
}
