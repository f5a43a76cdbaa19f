//! Response header interpretation: cookies, timestamps, content type and
//! redirect targets.

use std::sync::LazyLock;
use std::time::SystemTime;

use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{
    CONTENT_LENGTH, CONTENT_TYPE, DATE, HeaderMap, HeaderName, LAST_MODIFIED, LOCATION,
    SET_COOKIE,
};
use url::Url;

/// Legacy `Refresh` header (`5; url=https://...`).
pub(crate) const REFRESH: HeaderName = HeaderName::from_static("refresh");

/// Cookie attributes that never travel back to the server.
const COOKIE_ATTRIBUTES: &[&str] = &[
    "domain",
    "expires",
    "path",
    "httponly",
    "secure",
    "max-age",
    "samesite",
    "partitioned",
];

#[allow(clippy::expect_used)]
static REFRESH_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // Static pattern, safe to panic
    Regex::new(r#"(?i)url\s*=\s*['"]?\s*([^'"\s]+)"#).expect("refresh regex is valid")
});

/// Result of folding `Set-Cookie` headers into a request cookie string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CookieMerge {
    /// Merged `name=value; name=value` string, `None` when empty.
    pub merged: Option<String>,
    /// True when the response itself issued at least one cookie.
    pub obtained: bool,
}

/// Merges the response `Set-Cookie` headers into `existing`.
///
/// Later values replace earlier ones with the same name; attributes such as
/// `Domain`, `Expires`, `Path` and `HttpOnly` are dropped.
pub(crate) fn merge_cookies(existing: Option<&str>, headers: &HeaderMap) -> CookieMerge {
    let mut pairs: Vec<(String, String)> = Vec::new();
    if let Some(existing) = existing {
        for (name, value) in cookie_pairs(existing) {
            upsert(&mut pairs, name, value);
        }
    }

    let mut obtained = false;
    for header in headers.get_all(SET_COOKIE) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        for (name, value) in cookie_pairs(header) {
            obtained = true;
            upsert(&mut pairs, name, value);
        }
    }

    let merged = pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ");
    CookieMerge {
        merged: (!merged.is_empty()).then_some(merged),
        obtained,
    }
}

fn cookie_pairs(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    raw.split(';').filter_map(|segment| {
        let (name, value) = segment.split_once('=')?;
        let name = name.trim();
        if name.is_empty() || COOKIE_ATTRIBUTES.contains(&name.to_ascii_lowercase().as_str()) {
            return None;
        }
        Some((name, value.trim()))
    })
}

fn upsert(pairs: &mut Vec<(String, String)>, name: &str, value: &str) {
    match pairs.iter_mut().find(|(existing, _)| existing == name) {
        Some(pair) => pair.1 = value.to_string(),
        None => pairs.push((name.to_string(), value.to_string())),
    }
}

/// `Last-Modified`, falling back to `Date`, falling back to now.
pub(crate) fn last_modified(headers: &HeaderMap) -> SystemTime {
    http_date(headers, &LAST_MODIFIED)
        .or_else(|| http_date(headers, &DATE))
        .unwrap_or_else(SystemTime::now)
}

fn http_date(headers: &HeaderMap, name: &HeaderName) -> Option<SystemTime> {
    let value = headers.get(name)?.to_str().ok()?;
    httpdate::parse_http_date(value.trim()).ok()
}

/// Splits `Content-Type` into the lower-cased MIME essence and the charset.
pub(crate) fn content_type(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let Some(raw) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return (None, None);
    };
    let mut parts = raw.split(';');
    let essence = parts
        .next()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty());
    let charset = parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim();
        (!value.is_empty()).then(|| value.to_ascii_lowercase())
    });
    (essence, charset)
}

/// Parsed `Content-Length`, if present and numeric.
pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Extracts the URL from a `Refresh` header value.
pub(crate) fn refresh_url(value: &str) -> Option<&str> {
    REFRESH_URL_PATTERN
        .captures(value)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// Redirect target for a response, resolved against `base`.
///
/// 3xx responses use `Location` (then `Refresh`); other responses only
/// redirect through a `Refresh` header carrying a URL.
pub(crate) fn redirect_target(status: StatusCode, headers: &HeaderMap, base: &Url) -> Option<Url> {
    let location = status
        .is_redirection()
        .then(|| headers.get(LOCATION).and_then(|v| v.to_str().ok()))
        .flatten()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let raw = location.or_else(|| {
        headers
            .get(REFRESH)
            .and_then(|v| v.to_str().ok())
            .and_then(refresh_url)
    })?;
    base.join(raw).ok()
}

/// True when the response carries a `Refresh` header.
pub(crate) fn has_refresh(headers: &HeaderMap) -> bool {
    headers.contains_key(REFRESH)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use reqwest::header::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_merge_cookies_drops_attributes_and_dedupes() {
        let map = headers(&[
            ("set-cookie", "sid=abc; Domain=example.com; Path=/; HttpOnly"),
            ("set-cookie", "theme=dark; Expires=Wed, 21 Oct 2015 07:28:00 GMT"),
            ("set-cookie", "sid=def; Secure"),
        ]);

        let merge = merge_cookies(None, &map);

        assert_eq!(merge.merged.as_deref(), Some("sid=def; theme=dark"));
        assert!(merge.obtained);
    }

    #[test]
    fn test_merge_cookies_keeps_request_cookies() {
        let map = headers(&[("set-cookie", "b=2")]);

        let merge = merge_cookies(Some("a=1; b=1"), &map);

        assert_eq!(merge.merged.as_deref(), Some("a=1; b=2"));
        assert!(merge.obtained);
    }

    #[test]
    fn test_merge_cookies_without_set_cookie() {
        let merge = merge_cookies(Some("a=1"), &HeaderMap::new());
        assert_eq!(merge.merged.as_deref(), Some("a=1"));
        assert!(!merge.obtained);

        let merge = merge_cookies(None, &HeaderMap::new());
        assert_eq!(merge.merged, None);
    }

    #[test]
    fn test_last_modified_prefers_header_then_date() {
        let expected = SystemTime::UNIX_EPOCH + Duration::from_secs(1_445_412_480);
        let map = headers(&[
            ("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
            ("date", "Thu, 01 Jan 2020 00:00:00 GMT"),
        ]);
        assert_eq!(last_modified(&map), expected);

        let map = headers(&[("date", "Wed, 21 Oct 2015 07:28:00 GMT")]);
        assert_eq!(last_modified(&map), expected);
    }

    #[test]
    fn test_last_modified_falls_back_to_now() {
        let before = SystemTime::now();
        let stamp = last_modified(&headers(&[("last-modified", "garbage")]));
        assert!(stamp >= before);
    }

    #[test]
    fn test_content_type_split() {
        let map = headers(&[("content-type", "Text/HTML; Charset=\"UTF-8\"")]);
        assert_eq!(
            content_type(&map),
            (Some("text/html".to_string()), Some("utf-8".to_string()))
        );

        let map = headers(&[("content-type", "image/jpeg")]);
        assert_eq!(content_type(&map), (Some("image/jpeg".to_string()), None));

        assert_eq!(content_type(&HeaderMap::new()), (None, None));
    }

    #[test]
    fn test_content_length() {
        assert_eq!(content_length(&headers(&[("content-length", "0")])), Some(0));
        assert_eq!(content_length(&headers(&[("content-length", "abc")])), None);
    }

    #[test]
    fn test_refresh_url_variants() {
        assert_eq!(
            refresh_url("5; url=https://example.com/next"),
            Some("https://example.com/next")
        );
        assert_eq!(refresh_url("0;URL='/relative'"), Some("/relative"));
        assert_eq!(refresh_url("3"), None);
    }

    #[test]
    fn test_redirect_target_resolves_relative_location() {
        let base = Url::parse("https://example.com/a/b").unwrap();
        let map = headers(&[("location", "../c")]);

        let target = redirect_target(StatusCode::FOUND, &map, &base).unwrap();

        assert_eq!(target.as_str(), "https://example.com/c");
    }

    #[test]
    fn test_redirect_target_ignores_location_on_success() {
        let base = Url::parse("https://example.com/a").unwrap();
        let map = headers(&[("location", "/elsewhere")]);
        assert!(redirect_target(StatusCode::OK, &map, &base).is_none());

        let map = headers(&[("refresh", "0; url=/elsewhere")]);
        assert_eq!(
            redirect_target(StatusCode::OK, &map, &base).unwrap().as_str(),
            "https://example.com/elsewhere"
        );
        assert!(has_refresh(&map));
    }

    #[test]
    fn test_redirect_target_missing_location() {
        let base = Url::parse("https://example.com/a").unwrap();
        assert!(redirect_target(StatusCode::NOT_MODIFIED, &HeaderMap::new(), &base).is_none());
    }
}
