//! Cookie normalization.
//!
//! Accepts whatever the caller pasted in (an exported cookie array, that array as a JSON
//! string, or a raw `Cookie:` header) and turns it into descriptors the browser will accept.
//! Nothing in here is fatal: bad input degrades to fewer (or zero) cookies.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::site;

/// Cookie carrying the logged-in account id.
pub const SESSION_IDENTITY_COOKIE: &str = "c_user";
/// Signed session token paired with `c_user`.
pub const SIGNED_SESSION_COOKIE: &str = "xs";

static PERCENT_ENCODED: Lazy<Regex> = Lazy::new(|| Regex::new(r"%[0-9A-Fa-f]{2}").unwrap());

static AUTH_TOKEN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:xs|fr|datr|sb)$|session|auth|token").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    /// Case-insensitive, accepts the `no_restriction`/`unspecified` spellings browser
    /// extensions export. Anything unknown is `Lax`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("strict") => SameSite::Strict,
            Some("none") | Some("no_restriction") => SameSite::None,
            _ => SameSite::Lax,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CookieScope {
    Domain(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCookie {
    pub name: String,
    pub value: String,
    pub scope: CookieScope,
    pub path: String,
    /// Epoch seconds; `None` means a session cookie.
    pub expires: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

/// Loosely-typed fields pulled out of one input entry before normalization.
#[derive(Debug, Default)]
struct CookieFields {
    name: String,
    value: String,
    path: Option<String>,
    expires: Option<f64>,
    http_only: Option<bool>,
    secure: Option<bool>,
    same_site: Option<String>,
}

impl NormalizedCookie {
    fn from_fields(fields: CookieFields) -> Option<Self> {
        let name = fields.name.trim().to_string();
        let value = decode_value(fields.value.trim());
        if name.is_empty() || value.is_empty() {
            return None;
        }

        let same_site = SameSite::parse(fields.same_site.as_deref());
        let secure = same_site == SameSite::None || fields.secure.unwrap_or(true);
        let http_only = fields
            .http_only
            .unwrap_or_else(|| AUTH_TOKEN_NAME.is_match(&name));
        let path = fields
            .path
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "/".to_string());
        let expires = fields.expires.filter(|t| *t > 0.0).map(|t| t as i64);

        Some(Self {
            name,
            value,
            scope: CookieScope::Domain(site::COOKIE_DOMAIN.to_string()),
            path,
            expires,
            http_only,
            secure,
            same_site,
        })
    }
}

/// Normalize a cookie input value: an array of descriptor objects, or a string holding
/// either a JSON array or a `name=value; name2=value2` header.
pub fn normalize_cookies(input: &Value) -> Vec<NormalizedCookie> {
    match input {
        Value::Null => Vec::new(),
        Value::Array(items) => from_descriptors(items),
        Value::String(raw) => parse_cookie_string(raw),
        other => {
            warn!(input_kind = json_kind(other), "Unsupported cookie input; continuing without cookies");
            Vec::new()
        }
    }
}

/// String input: JSON array first, header syntax otherwise.
pub fn parse_cookie_string(raw: &str) -> Vec<NormalizedCookie> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => return from_descriptors(&items),
        Ok(other) => debug!(
            input_kind = json_kind(&other),
            "Cookie string is JSON but not an array, parsing as header"
        ),
        Err(e) => debug!(error = %e, "Cookie string is not JSON, parsing as header"),
    }

    parse_cookie_header(trimmed)
}

/// `name=value; name2=value2`, each pair split on its first `=`.
pub fn parse_cookie_header(raw: &str) -> Vec<NormalizedCookie> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            NormalizedCookie::from_fields(CookieFields {
                name: name.to_string(),
                value: value.to_string(),
                ..Default::default()
            })
        })
        .collect()
}

fn from_descriptors(items: &[Value]) -> Vec<NormalizedCookie> {
    let cookies: Vec<NormalizedCookie> = items.iter().filter_map(from_descriptor).collect();
    if cookies.len() < items.len() {
        debug!(
            dropped = items.len() - cookies.len(),
            kept = cookies.len(),
            "Dropped cookie entries without a usable name/value"
        );
    }
    cookies
}

fn from_descriptor(entry: &Value) -> Option<NormalizedCookie> {
    let fields = CookieFields {
        name: scalar_string(entry.get("name")?)?,
        value: scalar_string(entry.get("value")?)?,
        path: entry.get("path").and_then(Value::as_str).map(str::to_string),
        expires: entry
            .get("expires")
            .or_else(|| entry.get("expirationDate"))
            .and_then(Value::as_f64),
        http_only: entry.get("httpOnly").and_then(Value::as_bool),
        secure: entry.get("secure").and_then(Value::as_bool),
        same_site: entry.get("sameSite").and_then(Value::as_str).map(str::to_string),
    };
    NormalizedCookie::from_fields(fields)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Percent-decode only when the value actually contains an escape; a failed decode keeps
/// the raw value.
fn decode_value(raw: &str) -> String {
    if !PERCENT_ENCODED.is_match(raw) {
        return raw.to_string();
    }
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// A cookie as read back from the browser for the target origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleCookie {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieWarning {
    Missing(&'static str),
    ExpiredToken { name: String, epoch: i64 },
}

impl fmt::Display for CookieWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CookieWarning::Missing(name) => {
                write!(f, "cookie `{}` is not visible to the target host; login will likely fail", name)
            }
            CookieWarning::ExpiredToken { name, epoch } => {
                write!(f, "cookie `{}` embeds timestamp {} which is in the past", name, epoch)
            }
        }
    }
}

/// Predictive checks after injection. Warnings only, the run continues either way.
pub fn audit_visible_cookies(visible: &[VisibleCookie], now_epoch: i64) -> Vec<CookieWarning> {
    let mut warnings = Vec::new();

    for required in [SESSION_IDENTITY_COOKIE, SIGNED_SESSION_COOKIE] {
        if !visible.iter().any(|c| c.name == required && !c.value.is_empty()) {
            warnings.push(CookieWarning::Missing(required));
        }
    }

    for cookie in visible.iter().filter(|c| AUTH_TOKEN_NAME.is_match(&c.name)) {
        if let Some(epoch) = embedded_epoch(&cookie.value) {
            if epoch < now_epoch {
                warnings.push(CookieWarning::ExpiredToken {
                    name: cookie.name.clone(),
                    epoch,
                });
            }
        }
    }

    warnings
}

/// First `:`-separated segment that looks like epoch seconds (exactly ten digits).
pub fn embedded_epoch(value: &str) -> Option<i64> {
    decode_value(value)
        .split(':')
        .find(|seg| seg.len() == 10 && seg.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|seg| seg.parse().ok())
}
