//! Anti-bot interstitial detection.

/// Substrings that only appear in edge-protection challenge pages.
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf_chl_opt",
    "__cf_chl_",
    "challenge-platform",
    "cf-challenge",
    "Just a moment...",
    "Checking your browser before accessing",
    "Attention Required! | Cloudflare",
    "DDoS protection by",
];

/// Only the head of the body is scanned; challenge markup sits near the top.
const SCAN_LIMIT: usize = 16 * 1024;

/// Returns true if `body` looks like a challenge page rather than an API response.
pub fn is_challenge(body: &str) -> bool {
    let head = match body.char_indices().nth(SCAN_LIMIT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    };
    // JSON bodies never carry challenge markup.
    if head.trim_start().starts_with(['{', '[']) {
        return false;
    }
    CHALLENGE_MARKERS.iter().any(|marker| head.contains(marker))
}
