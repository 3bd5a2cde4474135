//! Ticker extraction: `$CASHTAG`s plus whole-word watchlist symbols.

use once_cell::sync::Lazy;
use regex::Regex;

/// US large caps the original broadcast prioritised.
pub const DEFAULT_WATCHLIST: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "GOOG", "AMZN", "META", "NVDA", "TSLA", "JPM", "V", "PG", "JNJ",
    "WMT", "UNH", "HD", "MA", "BAC", "XOM", "CVX", "LLY", "ABBV", "PFE", "KO", "PEP", "TMO",
    "AVGO", "COST", "CRM", "ACN", "NKE", "ADBE", "TXN", "NFLX", "CMCSA", "INTC", "AMD", "PYPL",
    "DIS", "VZ", "CSCO",
];

pub fn default_watchlist() -> Vec<String> {
    DEFAULT_WATCHLIST.iter().map(|s| s.to_string()).collect()
}

static RE_CASHTAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Za-z]{1,5})\b").expect("cashtag regex"));
static RE_UPPER_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2,5}\b").expect("upper word regex"));

/// Distinct uppercase symbols in first-seen order. Single-letter watchlist
/// symbols (e.g. `V`) only match as cashtags.
pub fn extract_tickers(text: &str, watchlist: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |s: String| {
        if !out.contains(&s) {
            out.push(s);
        }
    };

    for cap in RE_CASHTAG.captures_iter(text) {
        push(cap[1].to_ascii_uppercase());
    }
    for m in RE_UPPER_WORD.find_iter(text) {
        let w = m.as_str();
        if watchlist.iter().any(|t| t == w) {
            push(w.to_string());
        }
    }
    out
}
