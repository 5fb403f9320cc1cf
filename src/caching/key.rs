//! # Cache Key Generation
//!
//! Builds deterministic cache keys from a service, an action, and the request's
//! query parameters. Identical logical requests must produce identical keys, so
//! parameters are sorted before joining; long keys are digested so the store
//! never sees unbounded key lengths.

use sha2::{Digest, Sha256};

/// Keys longer than this are replaced by a digest of their parameter section.
const MAX_KEY_LENGTH: usize = 200;

/// Build the cache key for a proxied request under the configured prefix.
///
/// Parameter order is irrelevant: `[("a","1"),("b","2")]` and
/// `[("b","2"),("a","1")]` yield the same key.
pub fn request_key(
    prefix: &str,
    service: &str,
    action: &str,
    params: &[(String, String)],
) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    let query = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let key = format!("{}{}:{}:{}", prefix, service, action, query);
    if key.len() <= MAX_KEY_LENGTH {
        key
    } else {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        format!(
            "{}{}:{}:{}",
            prefix,
            service,
            action,
            hex::encode(hasher.finalize())
        )
    }
}

/// Parse a raw query string into parameter pairs for [`request_key`].
pub fn parse_query(raw: Option<&str>) -> Vec<(String, String)> {
    raw.unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn identical_requests_share_a_key() {
        let a = request_key(
            "cache:",
            "weather",
            "forecast",
            &pairs(&[("city", "oslo"), ("days", "3")]),
        );
        let b = request_key(
            "cache:",
            "weather",
            "forecast",
            &pairs(&[("days", "3"), ("city", "oslo")]),
        );
        assert_eq!(a, b);
        assert!(a.starts_with("cache:weather:forecast:"));
    }

    #[test]
    fn distinct_requests_do_not_collide() {
        let a = request_key("cache:", "weather", "forecast", &pairs(&[("city", "oslo")]));
        let b = request_key("cache:", "weather", "forecast", &pairs(&[("city", "bergen")]));
        let c = request_key("cache:", "weather", "current", &pairs(&[("city", "oslo")]));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn keys_carry_the_configured_prefix() {
        let key = request_key("edge:", "weather", "current", &pairs(&[("city", "oslo")]));
        assert!(key.starts_with("edge:weather:current:"));
    }

    #[test]
    fn long_keys_are_digested() {
        let long: Vec<(String, String)> = (0..40)
            .map(|i| (format!("param{}", i), "x".repeat(20)))
            .collect();
        let key = request_key("cache:", "svc", "act", &long);
        assert!(key.len() <= 200 + "cache:svc:act:".len());
        // Digesting stays deterministic
        assert_eq!(key, request_key("cache:", "svc", "act", &long));
    }

    #[test]
    fn parses_raw_queries() {
        assert_eq!(
            parse_query(Some("b=2&a=1")),
            pairs(&[("b", "2"), ("a", "1")])
        );
        assert_eq!(parse_query(Some("flag")), pairs(&[("flag", "")]));
        assert!(parse_query(None).is_empty());
    }
}
