//! Per-request anti-detection headers.
//!
//! Derives a small set of varying headers (referer, cache-control, fetch
//! metadata) for every attempt so that requests from the same client do not
//! share an identical header signature. Pure function of the URL and the
//! supplied random source; a seeded generator reproduces the same choices.

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, PRAGMA, REFERER};
use url::Url;

const CACHE_OPTIONS: [&str; 3] = ["no-cache", "max-age=0", "no-store"];

/// Composes the per-request header set for `url`.
///
/// Draws, in order: a referer choice, the cache-control coin and value,
/// the pragma coin, and the sec-fetch coin.
pub fn compose<R: Rng + ?Sized>(url: &str, rng: &mut R) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(referer) = pick_referer(url, rng) {
        if let Ok(value) = HeaderValue::from_str(&referer) {
            headers.insert(REFERER, value);
        }
    }

    if rng.gen_ratio(1, 3) {
        let value = CACHE_OPTIONS[rng.gen_range(0..CACHE_OPTIONS.len())];
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(value));
    }

    if rng.gen_ratio(1, 4) {
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    }

    if rng.gen_ratio(1, 2) {
        headers.insert(
            HeaderName::from_static("sec-fetch-dest"),
            HeaderValue::from_static("document"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-mode"),
            HeaderValue::from_static("navigate"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-site"),
            HeaderValue::from_static("same-origin"),
        );
    }

    headers
}

/// Picks a plausible referer for `url`, or `None` to omit the header.
///
/// Choices: a search-engine query for the host, the bare origin, origin
/// with a trailing slash, origin + "/home", or no referer at all.
fn pick_referer<R: Rng + ?Sized>(url: &str, rng: &mut R) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let origin = format!("{}://{}", parsed.scheme(), host);

    let choices = [
        format!("https://www.google.com/search?q={}", urlencoding::encode(host)),
        format!("https://www.bing.com/search?q={}", urlencoding::encode(host)),
        "https://duckduckgo.com/".to_string(),
        origin.clone(),
        format!("{}/", origin),
        format!("{}/home", origin),
        String::new(),
    ];

    let choice = &choices[rng.gen_range(0..choices.len())];
    if choice.is_empty() {
        None
    } else {
        Some(choice.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_compose_reproducible_with_seed() {
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);
        assert_eq!(
            compose("https://vstup.osvita.ua/region/", &mut a),
            compose("https://vstup.osvita.ua/region/", &mut b)
        );
    }

    #[test]
    fn test_referer_choices_reference_the_host() {
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            if let Some(referer) = pick_referer("https://vstup.osvita.ua/x", &mut rng) {
                let known_engine = referer.starts_with("https://www.google.com/search")
                    || referer.starts_with("https://www.bing.com/search")
                    || referer == "https://duckduckgo.com/";
                let own_origin = referer.starts_with("https://vstup.osvita.ua");
                assert!(known_engine || own_origin, "unexpected referer: {}", referer);
            }
        }
    }

    #[test]
    fn test_unparsable_url_yields_no_referer() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(pick_referer("not a url", &mut rng).is_none());
    }

    #[test]
    fn test_cache_control_value_from_fixed_set() {
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let headers = compose("https://vstup.osvita.ua/", &mut rng);
            if let Some(value) = headers.get(CACHE_CONTROL) {
                assert!(CACHE_OPTIONS.contains(&value.to_str().unwrap()));
            }
        }
    }

    #[test]
    fn test_pragma_is_fixed_value() {
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let headers = compose("https://vstup.osvita.ua/", &mut rng);
            if let Some(value) = headers.get(PRAGMA) {
                assert_eq!(value, "no-cache");
            }
        }
    }

    #[test]
    fn test_sec_fetch_triple_together() {
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let headers = compose("https://vstup.osvita.ua/", &mut rng);
            let dest = headers.contains_key("sec-fetch-dest");
            assert_eq!(dest, headers.contains_key("sec-fetch-mode"));
            assert_eq!(dest, headers.contains_key("sec-fetch-site"));
            if dest {
                assert_eq!(headers.get("sec-fetch-mode").unwrap(), "navigate");
                assert_eq!(headers.get("sec-fetch-site").unwrap(), "same-origin");
            }
        }
    }

    #[test]
    fn test_compose_no_side_effects_on_bad_url() {
        let mut rng = StdRng::seed_from_u64(5);
        // Must not panic; referer is simply absent.
        let headers = compose("::::", &mut rng);
        assert!(headers.get(REFERER).is_none());
    }
}
