//! Mint URL helpers
//!
//! Every map keyed by mint (ledger balances, locks, sessions) uses the
//! normalized form, so two spellings of one mint never split a balance.

use url::Url;

/// Canonical form of a mint URL: scheme added if missing, trailing slashes
/// dropped, host lowercased.
pub fn normalize_mint_url(url: &str) -> String {
    let mut normalized = url.trim().to_string();

    while normalized.ends_with('/') {
        normalized.pop();
    }

    if !normalized.starts_with("http://") && !normalized.starts_with("https://") {
        normalized = format!("https://{}", normalized);
    }

    // Lowercase the host only; mint paths can be case sensitive
    if let Ok(parsed) = Url::parse(&normalized) {
        if let Some(host) = parsed.host_str() {
            let lowercase_host = host.to_lowercase();
            if let Some(pos) = normalized.to_lowercase().find(&lowercase_host) {
                normalized.replace_range(pos..pos + host.len(), &lowercase_host);
            }
        }
    }

    normalized
}

/// Whether `url` names the mint whose canonical form is `canonical`
#[inline]
pub fn mint_matches(url: &str, canonical: &str) -> bool {
    normalize_mint_url(url) == canonical
}

/// Check that a mint URL parses as http(s) with a host
pub fn is_valid_mint_url(url: &str) -> bool {
    if url.trim().is_empty() {
        return false;
    }
    match Url::parse(&normalize_mint_url(url)) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

/// Short form of a mint URL for messages ("mint.example.com")
pub fn mint_label(url: &str) -> String {
    Url::parse(&normalize_mint_url(url))
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}
