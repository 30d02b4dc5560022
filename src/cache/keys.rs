//! Cache Key Derivation
//!
//! Builds deterministic, bounded-length keys of the form
//!
//! ```text
//! {namespace}:{METHOD}:{path}[?{query}][#{vary}]
//! ```
//!
//! The query is normalized (cache-busting params dropped, pairs sorted) and
//! the vary suffix carries only the whitelisted headers that change the
//! response: a credential fingerprint, the preferred encoding and the
//! primary accepted media type.

use crate::cache::entry::CacheKey;
use crate::error::{Error, Result};
use axum::http::{header, HeaderMap, Method, Uri};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default maximum key length
pub const DEFAULT_MAX_KEY_LENGTH: usize = 512;

/// Hex chars kept from a SHA-256 digest (fingerprints and long-key suffixes)
const DIGEST_HEX_LEN: usize = 16;

/// Encodings in preference order
const ENCODING_PREFERENCE: &[&str] = &["br", "gzip", "deflate", "identity"];

// =============================================================================
// Key Configuration
// =============================================================================

/// Key derivation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Keys longer than this are truncated and suffixed with a digest
    pub max_key_length: usize,
    /// Query params excluded from keys (`name` or `prefix*`)
    pub ignored_query_params: Vec<String>,
    /// Vary on a fingerprint of the `Authorization` header
    pub vary_on_authorization: bool,
    /// Vary on the preferred `Accept-Encoding`
    pub vary_on_encoding: bool,
    /// Vary on the primary `Accept` media type
    pub vary_on_accept: bool,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            ignored_query_params: vec!["_".to_string(), "utm_*".to_string()],
            vary_on_authorization: true,
            vary_on_encoding: true,
            vary_on_accept: true,
        }
    }
}

// =============================================================================
// Key Deriver
// =============================================================================

/// Pure key derivation: equal inputs always produce equal keys
#[derive(Debug, Clone, Default)]
pub struct KeyDeriver {
    config: KeyConfig,
}

impl KeyDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: KeyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KeyConfig {
        &self.config
    }

    /// Derive the key for a request
    pub fn derive(&self, namespace: &str, method: &Method, uri: &Uri, headers: &HeaderMap) -> Result<CacheKey> {
        self.derive_parts(namespace, method.as_str(), uri.path(), uri.query(), headers)
    }

    /// Derive a key from raw request parts
    pub fn derive_parts(
        &self,
        namespace: &str,
        method: &str,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<CacheKey> {
        let method = method.trim();
        if method.is_empty() {
            return Err(Error::KeyGeneration("empty method".into()));
        }
        if path.contains('\0') || query.map_or(false, |q| q.contains('\0')) {
            return Err(Error::KeyGeneration("NUL byte in request target".into()));
        }

        let mut raw = format!(
            "{}:{}:{}",
            sanitize(namespace),
            method.to_ascii_uppercase(),
            canonical_path(path)?
        );

        if let Some(query) = query {
            let normalized = self.normalize_query(query)?;
            if !normalized.is_empty() {
                raw.push('?');
                raw.push_str(&normalized);
            }
        }

        let vary = self.vary_suffix(headers);
        if !vary.is_empty() {
            raw.push('#');
            raw.push_str(&vary);
        }

        Ok(CacheKey::from_raw(self.cap_length(raw)))
    }

    /// Key prefix covering every variant of a path for one method
    ///
    /// Used by write-through invalidation.
    pub fn path_prefix(&self, namespace: &str, method: &str, path: &str) -> String {
        let path = canonical_path(path).unwrap_or_else(|_| sanitize(path));
        let mut prefix = format!("{}:{}:{}", sanitize(namespace), method.to_ascii_uppercase(), path);

        // Capped keys keep only the first `cut` bytes of the raw key.
        let cut = self.cap_cut(&prefix);
        if prefix.len() > cut {
            prefix.truncate(cut);
        }
        prefix
    }

    /// Normalize a query string: drop empty and ignored params, sort, re-encode
    pub fn normalize_query(&self, query: &str) -> Result<String> {
        let mut pairs: Vec<(String, String)> = Vec::new();

        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let name = decode_component(name)?;
            if name.is_empty() || self.is_ignored_param(&name) {
                continue;
            }
            let value = decode_component(value)?;
            pairs.push((name, value));
        }

        pairs.sort();

        Ok(pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&"))
    }

    fn is_ignored_param(&self, name: &str) -> bool {
        self.config.ignored_query_params.iter().any(|rule| match rule.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == rule,
        })
    }

    fn vary_suffix(&self, headers: &HeaderMap) -> String {
        let mut parts = Vec::with_capacity(3);

        if self.config.vary_on_authorization {
            if let Some(auth) = headers.get(header::AUTHORIZATION) {
                parts.push(format!("auth={}", fingerprint(auth.as_bytes())));
            }
        }

        if self.config.vary_on_encoding {
            if let Some(encoding) = header_str(headers, header::ACCEPT_ENCODING) {
                parts.push(format!("enc={}", preferred_encoding(encoding)));
            }
        }

        if self.config.vary_on_accept {
            if let Some(media) = header_str(headers, header::ACCEPT).and_then(primary_media_type) {
                parts.push(format!("accept={}", sanitize(&media)));
            }
        }

        parts.join("|")
    }

    fn cap_length(&self, raw: String) -> String {
        if raw.len() <= self.max_key_length() {
            return raw;
        }
        let digest = fingerprint(raw.as_bytes());
        let cut = self.cap_cut(&raw);
        format!("{}~{}", &raw[..cut], digest)
    }

    fn max_key_length(&self) -> usize {
        self.config.max_key_length.max(DIGEST_HEX_LEN + 2)
    }

    /// Byte length kept from an over-long key, before the digest suffix
    fn cap_cut(&self, raw: &str) -> usize {
        let mut cut = (self.max_key_length() - DIGEST_HEX_LEN - 1).min(raw.len());
        while !raw.is_char_boundary(cut) {
            cut -= 1;
        }
        cut
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// First 16 hex chars of the SHA-256 of `data`
pub fn fingerprint(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut hex = hex::encode(digest);
    hex.truncate(DIGEST_HEX_LEN);
    hex
}

/// Keep ASCII graphic chars, percent-encode everything else
///
/// `%` and the key separators `?`, `#` and `|` are encoded too, so distinct
/// inputs never sanitize to the same string.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_graphic() && !matches!(byte, b'%' | b'?' | b'#' | b'|') {
            out.push(byte as char);
        } else {
            push_encoded(&mut out, byte);
        }
    }
    out
}

/// Canonical form of a request path
///
/// Percent-escapes of unreserved characters are decoded, every other escape
/// is kept with uppercase hex, and literal bytes outside the path character
/// set are encoded. `/a%20b`, `/a_b` and `/a%2Fb` stay distinct.
pub fn canonical_path(path: &str) -> Result<String> {
    let decoded = urlencoding::decode(path)
        .map_err(|e| Error::KeyGeneration(format!("path is not valid UTF-8: {}", e)))?;
    if decoded.contains('\0') {
        return Err(Error::KeyGeneration("NUL byte in decoded path".into()));
    }

    let bytes = path.as_bytes();
    let mut out = String::with_capacity(path.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte == b'%' {
            if let Some(escaped) = bytes.get(i + 1..i + 3).and_then(hex_pair) {
                if is_unreserved(escaped) {
                    out.push(escaped as char);
                } else {
                    push_encoded(&mut out, escaped);
                }
                i += 3;
                continue;
            }
        }
        if is_path_char(byte) {
            out.push(byte as char);
        } else {
            push_encoded(&mut out, byte);
        }
        i += 1;
    }
    Ok(out)
}

fn hex_pair(pair: &[u8]) -> Option<u8> {
    if !pair.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let text = std::str::from_utf8(pair).ok()?;
    u8::from_str_radix(text, 16).ok()
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

fn is_path_char(byte: u8) -> bool {
    is_unreserved(byte)
        || matches!(
            byte,
            b'/' | b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'=' | b':' | b'@'
        )
}

fn push_encoded(out: &mut String, byte: u8) {
    out.push_str(&format!("%{:02X}", byte));
}

fn decode_component(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| Error::KeyGeneration(format!("query is not valid UTF-8: {}", e)))
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Pick the most preferred encoding the client accepts (q=0 excluded)
pub fn preferred_encoding(accept_encoding: &str) -> &'static str {
    let accepted: Vec<String> = accept_encoding
        .split(',')
        .filter_map(|token| {
            let mut parts = token.split(';');
            let name = parts.next()?.trim().to_ascii_lowercase();
            let refused = parts.any(|p| {
                p.trim()
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .map_or(false, |q| q <= 0.0)
            });
            (!name.is_empty() && !refused).then_some(name)
        })
        .collect();

    ENCODING_PREFERENCE
        .iter()
        .find(|enc| accepted.iter().any(|a| a == *enc))
        .copied()
        .unwrap_or("identity")
}

/// First media type of an `Accept` header, lowercased, parameters dropped
pub fn primary_media_type(accept: &str) -> Option<String> {
    let first = accept.split(',').next()?.split(';').next()?.trim();
    (!first.is_empty()).then(|| first.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn derive(path: &str, query: Option<&str>, headers: &HeaderMap) -> CacheKey {
        KeyDeriver::new()
            .derive_parts("file", "GET", path, query, headers)
            .unwrap()
    }

    #[test]
    fn test_basic_shape() {
        let key = derive("/api/files/42", None, &HeaderMap::new());
        assert_eq!(key.as_str(), "file:GET:/api/files/42");
    }

    #[test]
    fn test_equal_inputs_equal_keys() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));

        let a = derive("/api/files/42", Some("b=2&a=1"), &headers);
        let b = derive("/api/files/42", Some("a=1&b=2"), &headers.clone());
        assert_eq!(a, b);
    }

    #[test]
    fn test_query_normalization() {
        let deriver = KeyDeriver::new();
        assert_eq!(
            deriver.normalize_query("z=1&&a=hello+world&_=123&utm_source=x").unwrap(),
            "a=hello%20world&z=1"
        );
        assert_eq!(deriver.normalize_query("_=1&utm_medium=y").unwrap(), "");
        assert_eq!(deriver.normalize_query("a=2&a=1").unwrap(), "a=1&a=2");
    }

    #[test]
    fn test_cache_busting_params_share_key() {
        let headers = HeaderMap::new();
        assert_eq!(
            derive("/blobs/1", Some("_=111"), &headers),
            derive("/blobs/1", None, &headers)
        );
    }

    #[test]
    fn test_authorization_fingerprint_varies_key() {
        let mut alice = HeaderMap::new();
        alice.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer alice"));
        let mut bob = HeaderMap::new();
        bob.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer bob"));

        let ka = derive("/api/files/42", None, &alice);
        let kb = derive("/api/files/42", None, &bob);
        assert_ne!(ka, kb);
        assert!(!ka.as_str().contains("alice"));
        assert!(ka.as_str().contains(&format!("auth={}", fingerprint(b"Bearer alice"))));
    }

    #[test]
    fn test_preferred_encoding() {
        assert_eq!(preferred_encoding("gzip, deflate, br"), "br");
        assert_eq!(preferred_encoding("gzip;q=0.8, deflate"), "gzip");
        assert_eq!(preferred_encoding("br;q=0, gzip"), "gzip");
        assert_eq!(preferred_encoding("compress"), "identity");
    }

    #[test]
    fn test_primary_media_type() {
        assert_eq!(
            primary_media_type("Application/JSON; charset=utf-8, text/html").as_deref(),
            Some("application/json")
        );
        assert_eq!(primary_media_type(""), None);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("/a b\tc"), "/a%20b%09c");
        assert_eq!(sanitize("/café"), "/caf%C3%A9");
        assert_eq!(sanitize("text/html|x#y?%"), "text/html%7Cx%23y%3F%25");
        assert_ne!(sanitize("a b"), sanitize("a_b"));
    }

    #[test]
    fn test_canonical_path() {
        assert_eq!(canonical_path("/files/%7euser/a%2db").unwrap(), "/files/~user/a-b");
        assert_eq!(canonical_path("/doc%3fv=1").unwrap(), "/doc%3Fv=1");
        assert_eq!(canonical_path("/a b").unwrap(), "/a%20b");
        assert_eq!(canonical_path("/100%").unwrap(), "/100%25");
        assert_eq!(canonical_path("/a%+1").unwrap(), "/a%25+1");
        assert_eq!(canonical_path("/café").unwrap(), "/caf%C3%A9");
    }

    #[test]
    fn test_encoded_paths_do_not_collide() {
        let headers = HeaderMap::new();
        let deriver = KeyDeriver::new();
        assert_ne!(derive("/files/a%20b", None, &headers), derive("/files/a_b", None, &headers));
        assert_ne!(derive("/files/a%2Fb", None, &headers), derive("/files/a/b", None, &headers));
        assert_ne!(
            deriver.derive_parts("generic", "GET", "/doc%3Fv=1", None, &headers).unwrap(),
            deriver.derive_parts("generic", "GET", "/doc", Some("v=1"), &headers).unwrap()
        );
        assert_ne!(
            derive("/files/x%23enc=br", None, &headers),
            derive("/files/x", None, &{
                let mut h = HeaderMap::new();
                h.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("br"));
                h
            })
        );
        assert_eq!(derive("/files/%61bc", None, &headers), derive("/files/abc", None, &headers));
    }

    #[test]
    fn test_long_keys_are_capped_and_distinct() {
        let headers = HeaderMap::new();
        let long_a = format!("/files/{}a", "x".repeat(1000));
        let long_b = format!("/files/{}b", "x".repeat(1000));

        let ka = derive(&long_a, None, &headers);
        let kb = derive(&long_b, None, &headers);
        assert_eq!(ka.len(), DEFAULT_MAX_KEY_LENGTH);
        assert_eq!(kb.len(), DEFAULT_MAX_KEY_LENGTH);
        assert_ne!(ka, kb);
        assert_eq!(ka, derive(&long_a, None, &headers));
    }

    #[test]
    fn test_malformed_inputs_fail() {
        let deriver = KeyDeriver::new();
        let headers = HeaderMap::new();
        assert!(matches!(
            deriver.derive_parts("file", "", "/a", None, &headers),
            Err(Error::KeyGeneration(_))
        ));
        assert!(matches!(
            deriver.derive_parts("file", "GET", "/a%00b", None, &headers),
            Err(Error::KeyGeneration(_))
        ));
        assert!(matches!(
            deriver.derive_parts("file", "GET", "/a%FF", None, &headers),
            Err(Error::KeyGeneration(_))
        ));
    }

    #[test]
    fn test_path_prefix_matches_capped_keys() {
        let deriver = KeyDeriver::new();
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let path = format!("/api/files/{}", "x".repeat(600));

        let key = deriver.derive_parts("api", "GET", &path, Some("v=2"), &headers).unwrap();
        assert_eq!(key.len(), DEFAULT_MAX_KEY_LENGTH);
        let prefix = deriver.path_prefix("api", "GET", &path);
        assert!(prefix.len() < DEFAULT_MAX_KEY_LENGTH);
        assert!(key.has_prefix(&prefix));

        let bare = deriver.derive_parts("api", "GET", &path, None, &HeaderMap::new()).unwrap();
        assert!(bare.has_prefix(&prefix));
    }

    #[test]
    fn test_path_prefix_matches_derived_keys() {
        let deriver = KeyDeriver::new();
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let key = deriver
            .derive_parts("api", "get", "/api/jobs/7", Some("page=2"), &headers)
            .unwrap();
        assert!(key.has_prefix(&deriver.path_prefix("api", "GET", "/api/jobs/7")));
    }
}
