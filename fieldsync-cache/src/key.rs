//! Cache key derivation.
//!
//! Only idempotent reads are cacheable. A missing method means GET.

/// True for methods whose responses may be cached.
pub fn is_cacheable_method(method: &str) -> bool {
    let method = method.trim();
    method.is_empty() || method.eq_ignore_ascii_case("GET")
}

/// Key for a request, or `None` when the request must bypass the cache.
pub fn cache_key(method: &str, url: &str) -> Option<String> {
    if !is_cacheable_method(method) {
        return None;
    }
    Some(format!("GET:{}", url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_get_and_missing_method_share_key() {
        assert_eq!(cache_key("GET", "/api/farmers"), cache_key("", "/api/farmers"));
        assert_eq!(cache_key("get", "/api/farmers").as_deref(), Some("GET:/api/farmers"));
    }

    #[test]
    fn test_writes_are_not_cacheable() {
        for method in ["POST", "PUT", "PATCH", "DELETE", "post"] {
            assert_eq!(cache_key(method, "/api/claims"), None, "{method}");
        }
    }

    proptest! {
        #[test]
        fn prop_distinct_urls_distinct_keys(a in "/[a-z]{1,12}", b in "/[a-z]{1,12}") {
            prop_assume!(a != b);
            prop_assert_ne!(cache_key("GET", &a), cache_key("GET", &b));
        }
    }
}
