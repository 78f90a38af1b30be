// src/ingest/mod.rs
//! Novelty filter: turns one fetched page plus the current checkpoint into the
//! ordered list of genuinely new items, each marked notify or skip.
//! No I/O; the poll loop owns every side effect.

pub mod filters;
pub mod providers;
pub mod types;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::checkpoint::Checkpoint;
use crate::ingest::filters::{FilterConfig, SkipReason};
use crate::ingest::types::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Notify,
    Skip(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub item: Item,
    pub verdict: Verdict,
}

/// Output of one filtering pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// New items ascending by `(created_at, id)`, skipped ones included so
    /// they can advance the checkpoint.
    pub entries: Vec<Candidate>,
    /// Items at or before the checkpoint.
    pub already_seen: usize,
}

impl Selection {
    pub fn to_notify(&self) -> impl Iterator<Item = &Item> {
        self.entries
            .iter()
            .filter(|c| c.verdict == Verdict::Notify)
            .map(|c| &c.item)
    }

    pub fn notify_count(&self) -> usize {
        self.to_notify().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.entries.len() - self.notify_count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode raw listing elements, dropping malformed ones with a warning.
/// Returns `(items, malformed_count)`.
pub fn decode_items(raw: Vec<Value>) -> (Vec<Item>, usize) {
    let mut items = Vec::with_capacity(raw.len());
    let mut malformed = 0usize;
    for (idx, v) in raw.into_iter().enumerate() {
        match Item::from_json(v) {
            Ok(it) => items.push(it),
            Err(e) => {
                malformed += 1;
                tracing::warn!(target: "ingest", index = idx, reason = %e, "dropping malformed item");
            }
        }
    }
    (items, malformed)
}

/// Partition against the checkpoint, order ascending by `(created_at, id)`,
/// then apply the allow-filters.
pub fn select_new(
    items: Vec<Item>,
    checkpoint: &Checkpoint,
    filters: &FilterConfig,
    now: DateTime<Utc>,
) -> Selection {
    let mut already_seen = 0usize;
    let mut fresh: Vec<Item> = Vec::with_capacity(items.len());

    for it in items {
        if checkpoint.has_seen(it.created_at, &it.id) {
            already_seen += 1;
        } else {
            fresh.push(it);
        }
    }

    fresh.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    // The same record can show up twice in one page.
    fresh.dedup_by(|a, b| a.created_at == b.created_at && a.id == b.id);

    let entries = fresh
        .into_iter()
        .map(|item| {
            let verdict = match filters::check(&item, filters, now) {
                None => Verdict::Notify,
                Some(reason) => {
                    tracing::debug!(
                        target: "ingest",
                        id = %item.id,
                        reason = reason.as_str(),
                        title = item.title().unwrap_or_default(),
                        "item skipped by filter"
                    );
                    Verdict::Skip(reason)
                }
            };
            Candidate { item, verdict }
        })
        .collect();

    Selection {
        entries,
        already_seen,
    }
}
