// src/ingest/providers/gamma.rs
//! Polymarket Gamma `/events` listing, newest first.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;

use crate::error::FetchError;
use crate::ingest::types::ListingFetcher;

pub const DEFAULT_API_BASE: &str = "https://gamma-api.polymarket.com";
const USER_AGENT: &str = concat!("new-market-bot/", env!("CARGO_PKG_VERSION"));

pub struct GammaEventsProvider {
    mode: Mode,
}

enum Mode {
    // Own copy of the page so tests don't need 'static input.
    Fixture(String),
    Http {
        base: String,
        client: reqwest::Client,
        timeout: Duration,
    },
}

impl GammaEventsProvider {
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn from_url(base: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            mode: Mode::Http {
                base: base.trim_end_matches('/').to_string(),
                client,
                timeout,
            },
        })
    }

    /// Query for the newest open events. A single numeric allowed tag is
    /// pushed down to the API; anything else is enforced locally by the filter.
    pub fn query(limit: usize, tags: Option<&BTreeSet<String>>) -> Vec<(&'static str, String)> {
        let mut q = vec![
            ("limit", limit.to_string()),
            ("order", "createdAt".to_string()),
            ("ascending", "false".to_string()),
            ("closed", "false".to_string()),
        ];
        // `tag_id` takes the numeric id only; a slug is filtered locally.
        if let Some(tags) = tags.filter(|t| t.len() == 1) {
            if let Some(t) = tags.iter().find(|t| t.bytes().all(|b| b.is_ascii_digit())) {
                q.push(("tag_id", t.clone()));
            }
        }
        q
    }

    pub fn parse_page(body: &str) -> Result<Vec<Value>, FetchError> {
        let t0 = std::time::Instant::now();
        let v: Value = serde_json::from_str(body.trim())
            .map_err(|e| FetchError::Decode(format!("events body is not JSON: {e}")))?;
        let Value::Array(items) = v else {
            return Err(FetchError::Decode("events body is not a JSON array".into()));
        };
        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_events_total").increment(items.len() as u64);
        Ok(items)
    }
}

#[async_trait]
impl ListingFetcher for GammaEventsProvider {
    async fn fetch(
        &self,
        limit: usize,
        tags: Option<&BTreeSet<String>>,
    ) -> Result<Vec<Value>, FetchError> {
        match &self.mode {
            Mode::Fixture(s) => {
                let mut items = Self::parse_page(s)?;
                items.truncate(limit);
                Ok(items)
            }
            Mode::Http {
                base,
                client,
                timeout,
            } => {
                let url = format!("{base}/events");
                let resp = client
                    .get(&url)
                    .query(&Self::query(limit, tags))
                    .header(reqwest::header::ACCEPT, "application/json")
                    .timeout(*timeout)
                    .send()
                    .await
                    .map_err(|e| {
                        counter!("ingest_provider_errors_total").increment(1);
                        FetchError::Transport(format!("GET {url}: {e}"))
                    })?;

                let status = resp.status();
                if !status.is_success() {
                    counter!("ingest_provider_errors_total").increment(1);
                    return Err(FetchError::Transport(format!("GET {url}: HTTP {status}")));
                }

                let body = resp
                    .text()
                    .await
                    .map_err(|e| FetchError::Transport(format!("reading events body: {e}")))?;
                Self::parse_page(&body)
            }
        }
    }

    fn name(&self) -> &'static str {
        "gamma-events"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pushes_down_single_tag_only() {
        let one: BTreeSet<String> = ["2".to_string()].into();
        let q = GammaEventsProvider::query(50, Some(&one));
        assert!(q.contains(&("tag_id", "2".to_string())));
        assert!(q.contains(&("limit", "50".to_string())));

        let slug: BTreeSet<String> = ["politics".to_string()].into();
        let q = GammaEventsProvider::query(50, Some(&slug));
        assert!(!q.iter().any(|(k, _)| *k == "tag_id"));

        let two: BTreeSet<String> = ["2".to_string(), "21".to_string()].into();
        let q = GammaEventsProvider::query(50, Some(&two));
        assert!(!q.iter().any(|(k, _)| *k == "tag_id"));
    }

    #[test]
    fn non_array_body_is_decode_error() {
        let err = GammaEventsProvider::parse_page(r#"{"error": "x"}"#).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
        let err = GammaEventsProvider::parse_page("<html>").unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn fixture_mode_respects_limit() {
        let p = GammaEventsProvider::from_fixture(r#"[{"id":"1"},{"id":"2"},{"id":"3"}]"#);
        let out = p.fetch(2, None).await.unwrap();
        assert_eq!(out.len(), 2);
    }
}
