//! Content-Security-Policy generation and per-request header middleware.
//!
//! The policy depends on the request's hostname (loopback downgrades to plain
//! `http`/`ws` schemes), so the header value is computed per request. The
//! caller-supplied override policy is parsed once at bootstrap; a directive in
//! the override fully replaces the default token list for that directive.
//!
//! The violation-report sink at `POST /report` never fails the request: a
//! reporting endpoint that errors would lose the report it exists to receive.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{
        header::{HeaderValue, CONTENT_TYPE, HOST},
        HeaderMap,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::warn;

/// Modern header name (Firefox 23+, Chrome 25+).
pub const CSP_HEADER: &str = "content-security-policy";
/// Legacy header name (IE10+). Carries the identical value.
pub const CSP_HEADER_LEGACY: &str = "x-content-security-policy";

/// Hostname that downgrades the policy to plain `http`/`ws` schemes.
const LOOPBACK_HOST: &str = "localhost";

/// Third-party origins required by the stock front-end dependencies
/// (analytics, hosted fonts and scripts, embedded video).
const GOOGLE_ORIGINS: &[&str] = &[
    "https://*.googleapis.com",
    "https://*.google-analytics.com",
    "https://*.googlecode.com",
    "https://*.gstatic.com",
    "https://*.google.com",
    "https://*.youtube.com",
    "https://*.ytimg.com",
];

/// An ordered Content-Security-Policy: directive names mapped to token lists.
///
/// Directive keys are unique; directive and token order are preserved so the
/// serialised header is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CspPolicy {
    directives: Vec<(String, Vec<String>)>,
}

impl CspPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from a configuration override map.
    ///
    /// `BTreeMap` iteration is sorted, so the resulting directive order is
    /// deterministic regardless of how the map was populated.
    pub fn from_overrides(overrides: &BTreeMap<String, Vec<String>>) -> Self {
        let mut policy = Self::new();
        for (name, tokens) in overrides {
            policy.set(name.clone(), tokens.clone());
        }
        policy
    }

    /// Set the token list for a directive, replacing any existing list while
    /// keeping the directive's position.
    pub fn set(&mut self, name: impl Into<String>, tokens: Vec<String>) {
        let name = name.into();
        match self.directives.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = tokens,
            None => self.directives.push((name, tokens)),
        }
    }

    /// Token list for a directive, if present.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.directives
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tokens)| tokens.as_slice())
    }

    /// Directive-wise merge: `overrides` wins for any directive it supplies;
    /// directives unique to `overrides` are appended after the base ones.
    pub fn merge(mut self, overrides: &CspPolicy) -> Self {
        for (name, tokens) in &overrides.directives {
            self.set(name.clone(), tokens.clone());
        }
        self
    }

    /// Serialise as `"<directive> <tok1> <tok2>;"` fragments concatenated
    /// with no separator between directives.
    pub fn serialize(&self) -> String {
        self.directives
            .iter()
            .map(|(name, tokens)| format!("{name} {};", tokens.join(" ")))
            .collect()
    }
}

/// Build the effective policy for `hostname` and serialise it.
///
/// Pure: the same inputs always produce the same header value.
pub fn generate(hostname: &str, overrides: &CspPolicy) -> String {
    default_policy(hostname).merge(overrides).serialize()
}

fn default_policy(hostname: &str) -> CspPolicy {
    let (http_origin, ws_origin) = if hostname == LOOPBACK_HOST {
        (format!("http://{hostname}"), format!("ws://{hostname}"))
    } else {
        (format!("https://{hostname}"), format!("wss://{hostname}"))
    };

    let mut policy = CspPolicy::new();
    policy.set(
        "default-src",
        with_google(&["'self'", "data:", &http_origin]),
    );
    policy.set(
        "script-src",
        with_google(&["'self'", "'unsafe-inline'", &http_origin]),
    );
    policy.set(
        "style-src",
        with_google(&[
            "'self'",
            "'unsafe-inline'",
            &http_origin,
            "https://fonts.googleapis.com",
        ]),
    );
    policy.set(
        "img-src",
        with_google(&[
            "'self'",
            "data:",
            &http_origin,
            "https://secure.gravatar.com",
        ]),
    );
    policy.set("connect-src", with_google(&["'self'", &ws_origin]));
    policy.set(
        "font-src",
        tokens(&[
            "'self'",
            "data:",
            &http_origin,
            "https://themes.googleusercontent.com",
            "https://fonts.googleapis.com",
            "https://fonts.gstatic.com",
        ]),
    );
    policy.set("report-uri", tokens(&["/report"]));
    policy
}

fn tokens(base: &[&str]) -> Vec<String> {
    base.iter().map(|t| (*t).to_owned()).collect()
}

fn with_google(base: &[&str]) -> Vec<String> {
    let mut out = tokens(base);
    out.extend(GOOGLE_ORIGINS.iter().map(|o| (*o).to_owned()));
    out
}

/// Shared state for the header middleware: the pre-parsed override policy.
#[derive(Clone)]
pub struct CspContext {
    overrides: Arc<CspPolicy>,
}

impl CspContext {
    pub fn new(overrides: CspPolicy) -> Self {
        Self {
            overrides: Arc::new(overrides),
        }
    }
}

/// Middleware: attach the serialised policy under both the modern and legacy
/// header names on every response.
pub async fn set_headers(
    State(ctx): State<CspContext>,
    req: Request,
    next: Next,
) -> Response {
    let host = request_host(req.headers());
    let value = generate(&host, &ctx.overrides);

    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&value) {
        resp.headers_mut().insert(CSP_HEADER, value.clone());
        resp.headers_mut().insert(CSP_HEADER_LEGACY, value);
    }
    resp
}

/// Hostname from the `Host` header with any port stripped.
///
/// Falls back to the loopback name when the header is absent or unreadable.
fn request_host(headers: &HeaderMap) -> String {
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(LOOPBACK_HOST);
    match host.rsplit_once(':') {
        Some((name, port))
            if !name.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            name.to_owned()
        }
        _ => host.to_owned(),
    }
}

/// `POST /report` — CSP violation-report sink.
///
/// Reports arrive as JSON (either `application/json` or the CSP report media
/// type) and are logged at warning level. The response is always `200` with
/// an empty JSON object; malformed bodies are logged and swallowed.
pub async fn report(body: Bytes) -> Response {
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(report) => warn!(report = %report, "csp violation report"),
        Err(e) => warn!(error = %e, "unparsable csp violation report"),
    }
    ([(CONTENT_TYPE, "application/json")], "{}").into_response()
}
