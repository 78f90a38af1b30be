// src/ingest/types.rs
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::FetchError;

/// One listed event. Immutable once decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub attributes: Map<String, Value>,
}

/// Why a raw listing element could not become an `Item`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedItem {
    NotAnObject,
    MissingId,
    MissingCreatedAt,
    BadCreatedAt(String),
}

impl std::fmt::Display for MalformedItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedItem::NotAnObject => write!(f, "element is not a JSON object"),
            MalformedItem::MissingId => write!(f, "missing id"),
            MalformedItem::MissingCreatedAt => write!(f, "missing createdAt"),
            MalformedItem::BadCreatedAt(raw) => write!(f, "unparseable createdAt {raw:?}"),
        }
    }
}

impl Item {
    pub fn from_json(raw: Value) -> Result<Self, MalformedItem> {
        let Value::Object(attributes) = raw else {
            return Err(MalformedItem::NotAnObject);
        };

        let id = match attributes.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(MalformedItem::MissingId),
        };

        let created_raw = attributes
            .get("createdAt")
            .and_then(Value::as_str)
            .ok_or(MalformedItem::MissingCreatedAt)?;
        let created_at = DateTime::parse_from_rfc3339(created_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| MalformedItem::BadCreatedAt(created_raw.to_string()))?;

        Ok(Self {
            id,
            created_at,
            attributes,
        })
    }

    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Number or numeric string; anything else reads as 0.
    pub fn num_attr(&self, key: &str) -> f64 {
        match self.attributes.get(key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.str_attr("title")
    }

    pub fn slug(&self) -> Option<&str> {
        self.str_attr("slug")
    }

    pub fn liquidity(&self) -> f64 {
        self.num_attr("liquidity")
    }

    pub fn volume(&self) -> f64 {
        self.num_attr("volume")
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.str_attr("endDate")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Tag identifiers: both `id` and `slug` of each entry in `tags`.
    pub fn tags(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(Value::Array(tags)) = self.attributes.get("tags") {
            for t in tags {
                match t {
                    Value::Object(o) => {
                        for key in ["id", "slug"] {
                            match o.get(key) {
                                Some(Value::String(s)) if !s.is_empty() => {
                                    out.insert(s.to_ascii_lowercase());
                                }
                                Some(Value::Number(n)) => {
                                    out.insert(n.to_string());
                                }
                                _ => {}
                            }
                        }
                    }
                    Value::String(s) if !s.is_empty() => {
                        out.insert(s.to_ascii_lowercase());
                    }
                    _ => {}
                }
            }
        }
        out
    }

    pub fn series_slugs(&self) -> Vec<String> {
        match self.attributes.get("series") {
            Some(Value::Array(series)) => series
                .iter()
                .filter_map(|s| s.get("slug").and_then(Value::as_str))
                .map(str::to_ascii_lowercase)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Source of listing pages. Pure request/response mapping; elements are
/// returned undecoded so one bad record cannot fail the whole fetch.
#[async_trait::async_trait]
pub trait ListingFetcher: Send + Sync {
    async fn fetch(
        &self,
        limit: usize,
        tags: Option<&BTreeSet<String>>,
    ) -> Result<Vec<Value>, FetchError>;

    fn name(&self) -> &'static str;
}
