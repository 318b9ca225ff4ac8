//! URL canonicalization and scrape policy
//!
//! This module produces the stable dedupe key for tracked competitor URLs:
//! two spellings of the same product page must collapse to one canonical
//! form. It also hosts the domain allowlist policy consulted at tracker
//! creation and by the scrape executor.

use url::Url;

use crate::utils::error::UrlError;

/// Tracking parameters dropped during canonicalization.
///
/// Entries ending in `*` match by prefix.
pub const DEFAULT_TRACKING_PARAMS: &[&str] = &["utm_*", "gclid", "fbclid", "ref", "mc_*"];

/// Canonicalize a competitor URL using the default tracking-parameter set.
///
/// Pure and deterministic; performs no I/O. Idempotent:
/// `canonicalize(canonicalize(u)) == canonicalize(u)`.
///
/// # Errors
///
/// Returns [`UrlError`] when the URL cannot be parsed, the scheme is not
/// `http`/`https`, or the host is empty.
pub fn canonicalize(raw: &str) -> Result<String, UrlError> {
    let params: Vec<String> = DEFAULT_TRACKING_PARAMS
        .iter()
        .map(|s| s.to_string())
        .collect();
    canonicalize_with(raw, &params)
}

/// Canonicalize with a caller-supplied tracking-parameter set.
///
/// Steps: lowercase scheme and host (done by the parser), strip the default
/// port, drop the fragment, normalize percent-encoding of unreserved
/// characters in the path, drop tracking parameters, sort the remaining
/// query pairs by name, and strip the trailing slash unless the path is
/// exactly `/`.
pub fn canonicalize_with(raw: &str, tracking_params: &[String]) -> Result<String, UrlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Unparseable(String::new()));
    }

    let mut url = Url::parse(trimmed).map_err(|_| UrlError::Unparseable(trimmed.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::UnsupportedScheme(other.to_string())),
    }

    match url.host_str() {
        Some(h) if !h.is_empty() => {}
        _ => return Err(UrlError::MissingHost),
    }

    url.set_fragment(None);

    // Filter tracking params, then sort the survivors for a stable key
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k, tracking_params))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        url.set_query(Some(&query));
    }

    let path = normalize_path(url.path());
    url.set_path(&path);

    Ok(url.to_string())
}

/// Extract the lowercased host of a URL
pub fn extract_host(raw: &str) -> Result<String, UrlError> {
    let url = Url::parse(raw.trim()).map_err(|_| UrlError::Unparseable(raw.to_string()))?;
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.to_ascii_lowercase())
        .ok_or(UrlError::MissingHost)
}

fn is_tracking_param(name: &str, tracking_params: &[String]) -> bool {
    let lower = name.to_ascii_lowercase();
    tracking_params.iter().any(|p| {
        if let Some(prefix) = p.strip_suffix('*') {
            lower.starts_with(prefix)
        } else {
            lower == *p
        }
    })
}

/// Decode percent-encoded unreserved characters and strip the trailing
/// slash unless the path is exactly `/`.
fn normalize_path(path: &str) -> String {
    let decoded = decode_unreserved(path);
    if decoded.len() > 1 && decoded.ends_with('/') {
        decoded.trim_end_matches('/').to_string()
    } else {
        decoded
    }
}

/// Decode `%XX` sequences whose decoded byte is an unreserved character
/// (ALPHA / DIGIT / `-` / `.` / `_` / `~`); all other encodings stay as-is
/// with uppercased hex digits for consistency.
fn decode_unreserved(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = String::with_capacity(path.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &path[i + 1..i + 3];
            if let Ok(value) = u8::from_str_radix(hex, 16) {
                if value.is_ascii_alphanumeric() || matches!(value, b'-' | b'.' | b'_' | b'~') {
                    out.push(value as char);
                } else {
                    out.push('%');
                    out.push_str(&hex.to_ascii_uppercase());
                }
                i += 3;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }

    out
}

// ============================================================================
// Domain allowlist policy
// ============================================================================

/// Allowlist policy applied at tracker creation and job execution.
///
/// When enabled, a URL is allowed only if its host equals an entry or is a
/// subdomain of one. When disabled, every host passes.
#[derive(Debug, Clone, Default)]
pub struct UrlPolicy {
    enabled: bool,
    allowed: Vec<String>,
}

impl UrlPolicy {
    pub fn new(enabled: bool, allowed: Vec<String>) -> Self {
        let allowed = allowed
            .into_iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { enabled, allowed }
    }

    /// Policy that allows everything
    pub fn permissive() -> Self {
        Self {
            enabled: false,
            allowed: Vec::new(),
        }
    }

    /// Check whether the host of `url` is allowed
    pub fn allows(&self, url: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let Ok(host) = extract_host(url) else {
            return false;
        };
        self.allowed
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_scheme_and_host() {
        let out = canonicalize("HTTPS://Shop.Example.COM/p/42").unwrap();
        assert_eq!(out, "https://shop.example.com/p/42");
    }

    #[test]
    fn test_strips_default_port() {
        assert_eq!(
            canonicalize("https://shop.example.com:443/p/42").unwrap(),
            "https://shop.example.com/p/42"
        );
        assert_eq!(
            canonicalize("http://shop.example.com:80/p/42").unwrap(),
            "http://shop.example.com/p/42"
        );
    }

    #[test]
    fn test_keeps_explicit_port() {
        assert_eq!(
            canonicalize("https://shop.example.com:8443/p/42").unwrap(),
            "https://shop.example.com:8443/p/42"
        );
    }

    #[test]
    fn test_removes_fragment() {
        assert_eq!(
            canonicalize("https://shop.example.com/p/42#reviews").unwrap(),
            "https://shop.example.com/p/42"
        );
    }

    #[test]
    fn test_drops_tracking_params() {
        let out =
            canonicalize("https://shop.example.com/p/42?utm_source=x&utm_medium=y&gclid=abc&ref=a")
                .unwrap();
        assert_eq!(out, "https://shop.example.com/p/42");
    }

    #[test]
    fn test_mc_prefix_dropped() {
        let out = canonicalize("https://shop.example.com/p/42?mc_cid=1&mc_eid=2&size=xl").unwrap();
        assert_eq!(out, "https://shop.example.com/p/42?size=xl");
    }

    #[test]
    fn test_sorts_query_params() {
        let out = canonicalize("https://shop.example.com/p/42?b=2&a=1&c=3").unwrap();
        assert_eq!(out, "https://shop.example.com/p/42?a=1&b=2&c=3");
    }

    #[test]
    fn test_trailing_slash_removed() {
        assert_eq!(
            canonicalize("https://shop.example.com/p/42/").unwrap(),
            "https://shop.example.com/p/42"
        );
    }

    #[test]
    fn test_root_path_keeps_slash() {
        assert_eq!(
            canonicalize("https://shop.example.com/").unwrap(),
            "https://shop.example.com/"
        );
        assert_eq!(
            canonicalize("https://shop.example.com").unwrap(),
            "https://shop.example.com/"
        );
    }

    #[test]
    fn test_decodes_unreserved_percent_encoding() {
        // %41 is 'A', unreserved; %2F is '/', reserved and kept encoded
        let out = canonicalize("https://shop.example.com/p/%41bc%2Fd").unwrap();
        assert_eq!(out, "https://shop.example.com/p/Abc%2Fd");
    }

    #[test]
    fn test_reserved_encoding_case_normalized() {
        let out = canonicalize("https://shop.example.com/p/a%2fb").unwrap();
        assert_eq!(out, "https://shop.example.com/p/a%2Fb");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "https://Shop.example.com/p/42?utm_source=x&ref=a",
            "https://shop.example.com/p/42/?b=2&a=1#frag",
            "http://shop.example.com:80/%41/x/",
            "https://shop.example.com/",
        ];
        for input in inputs {
            let once = canonicalize(input).unwrap();
            let twice = canonicalize(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {input}");
        }
    }

    #[test]
    fn test_spelling_variants_collapse() {
        let a = canonicalize("https://Shop.example.com/p/42?utm_source=x&ref=a").unwrap();
        let b = canonicalize("https://shop.example.com/p/42/?ref=b").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "https://shop.example.com/p/42");
    }

    #[test]
    fn test_rejects_bad_scheme() {
        assert_eq!(
            canonicalize("ftp://shop.example.com/p/42"),
            Err(UrlError::UnsupportedScheme("ftp".to_string()))
        );
        assert!(matches!(
            canonicalize("file:///etc/passwd"),
            Err(UrlError::UnsupportedScheme(_)) | Err(UrlError::MissingHost)
        ));
    }

    #[test]
    fn test_rejects_unparseable() {
        assert!(canonicalize("not a url").is_err());
        assert!(canonicalize("").is_err());
        assert!(canonicalize("/relative/path").is_err());
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://Shop.Example.com/p/42").unwrap(),
            "shop.example.com"
        );
        assert!(extract_host("nope").is_err());
    }

    #[test]
    fn test_policy_disabled_allows_everything() {
        let policy = UrlPolicy::permissive();
        assert!(policy.allows("https://anything.example.org/x"));
    }

    #[test]
    fn test_policy_exact_and_subdomain_match() {
        let policy = UrlPolicy::new(true, vec!["shop.example.com".to_string()]);
        assert!(policy.allows("https://shop.example.com/p/1"));
        assert!(policy.allows("https://www.shop.example.com/p/1"));
        assert!(!policy.allows("https://evil.example.com/p/1"));
        assert!(!policy.allows("https://notshop.example.com.evil.io/p/1"));
    }

    #[test]
    fn test_policy_enabled_with_empty_list_blocks() {
        let policy = UrlPolicy::new(true, vec![]);
        assert!(!policy.allows("https://shop.example.com/p/1"));
    }
}
