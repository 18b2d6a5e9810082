//! Session cookie handling: HMAC signing, parsing, and `Set-Cookie` building.
//!
//! The cookie value is `<session id>.<base64url HMAC-SHA256 signature>`,
//! keyed by the configured session secret. A value whose signature does not
//! verify is treated as if no cookie had been sent at all.
//!
//! Cookies are issued `Secure` and `HttpOnly`; a trusted reverse proxy is
//! assumed to terminate TLS and forward the originating scheme.

use axum::http::{
    header::{HeaderValue, COOKIE},
    HeaderMap,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use cookie::Cookie;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn signature(secret: &str, sid: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(sid.as_bytes());
    Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Sign a session id into a cookie value.
pub(crate) fn sign(secret: &str, sid: &str) -> Option<String> {
    signature(secret, sid).map(|sig| format!("{sid}.{sig}"))
}

/// Recover the session id from a cookie value, rejecting bad signatures.
///
/// The comparison runs in constant time via the MAC itself.
pub(crate) fn verify(secret: &str, value: &str) -> Option<String> {
    let (sid, sig) = value.rsplit_once('.')?;
    let sig_bytes = URL_SAFE_NO_PAD.decode(sig).ok()?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(sid.as_bytes());
    mac.verify_slice(&sig_bytes).ok()?;
    Some(sid.to_owned())
}

/// Extract and verify the session id from the request's cookies.
pub(crate) fn session_id_from(headers: &HeaderMap, name: &str, secret: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|c| c.name() == name)
        .and_then(|c| verify(secret, c.value()))
}

/// Build the `Set-Cookie` header value for a freshly created session.
pub(crate) fn set_cookie_value(name: &str, secret: &str, sid: &str) -> Option<HeaderValue> {
    let value = sign(secret, sid)?;
    let cookie = Cookie::build((name.to_owned(), value))
        .path("/")
        .secure(true)
        .http_only(true)
        .build();
    HeaderValue::from_str(&cookie.to_string()).ok()
}
