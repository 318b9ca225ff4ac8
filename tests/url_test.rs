//! Canonicalization properties and tracker dedup scenarios

use pricewatch::scraper::url::{canonicalize, canonicalize_with, extract_host, UrlPolicy};

/// Idempotence: canonicalize(canonicalize(u)) == canonicalize(u)
#[test]
fn test_canonicalize_idempotent() {
    let urls = [
        "https://Shop.example.com/p/42?utm_source=x&ref=a",
        "http://shop.example.com:80/products/widget-pro/?b=2&a=1#reviews",
        "https://shop.example.com/%41bc?gclid=123",
        "https://shop.example.com/",
        "https://shop.example.com/p/42?size=XL&color=red",
    ];
    for url in urls {
        let once = canonicalize(url).unwrap();
        let twice = canonicalize(&once).unwrap();
        assert_eq!(once, twice, "canonicalize not idempotent for {url}");
    }
}

/// Collapse: spellings differing only in tracking params, query order,
/// trailing slash, fragment, or host case canonicalize identically
#[test]
fn test_canonical_collapse() {
    let groups: &[&[&str]] = &[
        &[
            "https://Shop.example.com/p/42?utm_source=x&ref=a",
            "https://shop.example.com/p/42/?ref=b",
            "https://shop.example.com/p/42#top",
            "https://shop.example.com/p/42?fbclid=zzz",
        ],
        &[
            "https://shop.example.com/p/1?color=red&size=XL",
            "https://shop.example.com/p/1?size=XL&color=red",
            "https://SHOP.example.com/p/1/?size=XL&color=red&utm_campaign=sale",
        ],
    ];

    for group in groups {
        let first = canonicalize(group[0]).unwrap();
        for url in &group[1..] {
            assert_eq!(
                first,
                canonicalize(url).unwrap(),
                "{url} did not collapse to {first}"
            );
        }
    }
}

/// Dedup on create: two spellings collapse to one canonical form
#[test]
fn test_dedup_canonical_form() {
    assert_eq!(
        canonicalize("https://Shop.example.com/p/42?utm_source=x&ref=a").unwrap(),
        "https://shop.example.com/p/42"
    );
    assert_eq!(
        canonicalize("https://shop.example.com/p/42/?ref=b").unwrap(),
        "https://shop.example.com/p/42"
    );
}

#[test]
fn test_custom_tracking_params() {
    let params = vec!["sid".to_string(), "track_*".to_string()];
    let out = canonicalize_with(
        "https://shop.example.com/p/1?sid=9&track_ab=x&keep=1",
        &params,
    )
    .unwrap();
    assert_eq!(out, "https://shop.example.com/p/1?keep=1");
}

#[test]
fn test_invalid_inputs_rejected() {
    assert!(canonicalize("").is_err());
    assert!(canonicalize("not a url").is_err());
    assert!(canonicalize("ftp://shop.example.com/p/1").is_err());
    assert!(canonicalize("mailto:x@example.com").is_err());
}

#[test]
fn test_extract_host_lowercases() {
    assert_eq!(
        extract_host("https://SHOP.Example.COM/p/1").unwrap(),
        "shop.example.com"
    );
}

#[test]
fn test_allowlist_policy() {
    let policy = UrlPolicy::new(true, vec!["example.com".to_string()]);
    assert!(policy.allows("https://example.com/p"));
    assert!(policy.allows("https://shop.example.com/p"));
    assert!(!policy.allows("https://example.org/p"));

    let open = UrlPolicy::new(false, vec![]);
    assert!(open.allows("https://anything.example.org/"));
}
