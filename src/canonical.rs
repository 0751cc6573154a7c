//! URL canonicalization used as the deduplication identity.
//!
//! Two URLs that only differ by tracking parameters, trailing slash,
//! scheme/host case or fragment map to the same key, and
//! `canonicalize(canonicalize(u)) == canonicalize(u)` for every input.

use url::Url;

/// Query parameters dropped from every key (matched case-insensitively).
pub const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
    "ref",
    "mc_cid",
    "mc_eid",
];

/// Canonicalize `raw` against the default [`TRACKING_PARAMS`] blacklist.
pub fn canonicalize(raw: &str) -> String {
    canonicalize_with(raw, TRACKING_PARAMS)
}

/// Canonicalize `raw`, dropping every query parameter named in `blacklist`.
///
/// Empty input gives an empty key. Input that does not parse as an absolute
/// URL still yields a degraded key (fragment and trailing slashes removed).
pub fn canonicalize_with(raw: &str, blacklist: &[&str]) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut url = match Url::parse(trimmed) {
        Ok(u) => u,
        Err(_) => return degraded(trimmed),
    };

    // scheme and host are already lower-cased by the parser
    url.set_fragment(None);

    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !blacklist.iter().any(|b| b.eq_ignore_ascii_case(k)))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        let stripped = path.trim_end_matches('/');
        url.set_path(if stripped.is_empty() { "/" } else { stripped });
    }

    url.to_string()
}

fn degraded(raw: &str) -> String {
    let no_fragment = raw.split('#').next().unwrap_or_default();
    let stripped = no_fragment.trim_end_matches('/');
    if stripped.is_empty() {
        no_fragment.to_string()
    } else {
        stripped.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_params_and_slash_collapse() {
        assert_eq!(
            canonicalize("https://Example.com/a/?utm_source=x&ref=y"),
            canonicalize("https://example.com/a")
        );
        assert_eq!(canonicalize("https://example.com/a"), "https://example.com/a");
    }

    #[test]
    fn test_scheme_and_host_lowercased_path_preserved() {
        assert_eq!(
            canonicalize("HTTPS://News.Example.COM/Art/Story"),
            "https://news.example.com/Art/Story"
        );
    }

    #[test]
    fn test_fragment_dropped() {
        assert_eq!(
            canonicalize("https://example.com/a#comments"),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_root_path_kept() {
        assert_eq!(canonicalize("https://example.com/"), "https://example.com/");
        assert_eq!(canonicalize("https://example.com"), "https://example.com/");
    }

    #[test]
    fn test_kept_params_preserve_order() {
        assert_eq!(
            canonicalize("https://example.com/s?z=1&utm_medium=m&a=2&FBCLID=f&m=3"),
            "https://example.com/s?z=1&a=2&m=3"
        );
    }

    #[test]
    fn test_blacklist_match_is_case_insensitive() {
        assert_eq!(
            canonicalize("https://example.com/a?UTM_Campaign=spring&Ref=home"),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_custom_blacklist() {
        assert_eq!(
            canonicalize_with("https://example.com/a?session=1&id=2", &["session"]),
            "https://example.com/a?id=2"
        );
    }

    #[test]
    fn test_empty_and_malformed_input() {
        assert_eq!(canonicalize(""), "");
        assert_eq!(canonicalize("   "), "");
        assert_eq!(canonicalize("not a url/#frag"), "not a url");
        assert_eq!(canonicalize("/relative/path/"), "/relative/path");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "https://Example.com/a/?utm_source=x&ref=y",
            "https://example.com/a//",
            "https://example.com/search?q=a b&x=%2F&utm_term=t",
            "https://example.com/?flag",
            "https://example.com:443/p?b=2&a=1#top",
            "http://example.com/caf%C3%A9/",
            "not a url//#x",
            "/",
            "",
        ];
        for u in inputs {
            let once = canonicalize(u);
            assert_eq!(canonicalize(&once), once, "not idempotent for {u:?}");
        }
    }
}
