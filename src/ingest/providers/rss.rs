use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::ingest::build_candidate;
use crate::ingest::types::{FetchQuery, SourceAdapter, SourceError};
use crate::item::NewsItem;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

/// Display name for a feed URL.
pub fn source_name_for_feed(feed_url: &str) -> &'static str {
    let u = feed_url.to_ascii_lowercase();
    const MAPPING: &[(&str, &str)] = &[
        ("yahoo", "Yahoo Finance"),
        ("bloomberg", "Bloomberg"),
        ("reuters", "Reuters"),
        ("marketwatch", "MarketWatch"),
        ("google", "Google News"),
        ("cnbc", "CNBC"),
    ];
    MAPPING
        .iter()
        .find(|(k, _)| u.contains(k))
        .map(|(_, v)| *v)
        .unwrap_or("RSS Feed")
}

/// Replace `{{minutes_ago:N}}` placeholders in fixture XML with RFC 2822
/// timestamps relative to `now`, so canned feeds stay inside the lookback
/// window.
pub fn stamp_relative_dates(xml: &str, now: DateTime<Utc>) -> String {
    static RE: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"\{\{minutes_ago:(\d+)\}\}").expect("placeholder regex"));
    re.replace_all(xml, |caps: &regex::Captures<'_>| {
        let minutes: i64 = caps[1].parse().unwrap_or(0);
        (now - chrono::Duration::minutes(minutes))
            .format("%a, %d %b %Y %H:%M:%S +0000")
            .to_string()
    })
    .into_owned()
}

enum Mode {
    // own copy so tests can pass any &str
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

/// RSS 2.0 feed adapter.
pub struct RssSource {
    name: String,
    mode: Mode,
    watchlist: Vec<String>,
}

impl RssSource {
    pub fn from_fixture(name: &str, xml: &str, watchlist: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::Fixture(xml.to_string()),
            watchlist,
        }
    }

    pub fn from_url(url: &str, timeout: Duration, watchlist: Vec<String>) -> Result<Self, SourceError> {
        let client = super::http_client(timeout)?;
        Ok(Self {
            name: source_name_for_feed(url).to_string(),
            mode: Mode::Http {
                url: url.to_string(),
                client,
            },
            watchlist,
        })
    }

    fn parse_items(&self, xml: &str, query: &FetchQuery) -> Result<Vec<NewsItem>, SourceError> {
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss = from_str(&xml_clean).map_err(|e| SourceError::Malformed(e.to_string()))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let published_at = it
                .pub_date
                .as_deref()
                .and_then(parse_rfc2822)
                .unwrap_or(query.now);
            let candidate = build_candidate(
                &self.name,
                it.title.as_deref().unwrap_or_default(),
                it.description.as_deref().unwrap_or_default(),
                it.link,
                published_at,
                query.now,
                &[],
                &self.watchlist,
            );
            if let Some(c) = candidate {
                if matches_narrowing(&c, query) {
                    out.push(c);
                }
            }
        }
        counter!("news_source_events_total", "source" => self.name.clone()).increment(out.len() as u64);
        Ok(out)
    }
}

/// RSS feeds cannot be queried server-side, so keyword/ticker narrowing
/// happens after parsing.
fn matches_narrowing(item: &NewsItem, query: &FetchQuery) -> bool {
    if let Some(t) = &query.ticker {
        if !item.tickers.iter().any(|x| x.eq_ignore_ascii_case(t)) {
            return false;
        }
    }
    if let Some(k) = &query.keyword {
        if !item.content_text().to_lowercase().contains(&k.to_lowercase()) {
            return false;
        }
    }
    true
}

#[async_trait]
impl SourceAdapter for RssSource {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<NewsItem>, SourceError> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items(s, query),
            Mode::Http { url, client } => {
                let resp = client.get(url.as_str()).send().await?.error_for_status()?;
                let body = resp.text().await?;
                self.parse_items(&body, query)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
