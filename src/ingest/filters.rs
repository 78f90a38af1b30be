// src/ingest/filters.rs
//! Allow-filters applied to genuinely new items. A rejected item is never
//! notified but still advances the checkpoint.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

use super::types::Item;

/// League series slugs that mark an event as sports.
pub const SPORTS_SERIES: &[&str] = &[
    "nba",
    "nfl",
    "nhl",
    "mlb",
    "mls",
    "wnba",
    "nba-2026",
    "nfl-2025",
    "nhl-2026",
    "cfb",
    "cfb-2025",
    "premier-league",
    "premier-league-2025",
    "bundesliga",
    "bundesliga-2025",
    "la-liga",
    "serie-a",
    "ligue-1",
    "champions-league",
    "europa-league",
    "ucl-2025",
    "uel-2025",
];

const SPORTS_SERIES_KEYWORDS: &[&str] = &[
    "nba",
    "nfl",
    "nhl",
    "mlb",
    "soccer",
    "football",
    "basketball",
];

#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// 0 disables.
    pub min_liquidity: f64,
    /// 0 disables.
    pub min_volume: f64,
    /// Lower-cased tag ids/slugs. Empty disables.
    pub allowed_tags: BTreeSet<String>,
    pub exclude_sports: bool,
    pub exclude_up_or_down: bool,
    pub skip_expired: bool,
    /// 0 disables.
    pub max_age_minutes: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_liquidity: 0.0,
            min_volume: 0.0,
            allowed_tags: BTreeSet::new(),
            exclude_sports: true,
            exclude_up_or_down: true,
            skip_expired: true,
            max_age_minutes: 0,
        }
    }
}

impl FilterConfig {
    /// Everything passes.
    pub fn permissive() -> Self {
        Self {
            exclude_sports: false,
            exclude_up_or_down: false,
            skip_expired: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TagNotAllowed,
    LowLiquidity,
    LowVolume,
    Sports,
    UpOrDown,
    Expired,
    TooOld,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::TagNotAllowed => "tag_not_allowed",
            SkipReason::LowLiquidity => "low_liquidity",
            SkipReason::LowVolume => "low_volume",
            SkipReason::Sports => "sports",
            SkipReason::UpOrDown => "up_or_down",
            SkipReason::Expired => "expired",
            SkipReason::TooOld => "too_old",
        }
    }
}

pub fn is_tag_allowed(item: &Item, allowed: &BTreeSet<String>) -> bool {
    allowed.is_empty() || item.tags().iter().any(|t| allowed.contains(t))
}

pub fn is_sports_event(item: &Item) -> bool {
    for slug in item.series_slugs() {
        if SPORTS_SERIES.contains(&slug.as_str()) {
            return true;
        }
        // Whole segments only, so "conflict" does not read as "nfl".
        if slug.split('-').any(|seg| SPORTS_SERIES_KEYWORDS.contains(&seg)) {
            return true;
        }
    }

    static RE_MATCHUP: OnceCell<Regex> = OnceCell::new();
    let re = RE_MATCHUP.get_or_init(|| {
        Regex::new(r"(?i)( vs\.? |o/u |spread:|moneyline|over/under)").expect("static regex")
    });
    item.title().is_some_and(|t| re.is_match(t))
}

pub fn is_up_or_down(item: &Item) -> bool {
    item.title()
        .is_some_and(|t| t.to_ascii_lowercase().contains("up or down"))
}

pub fn is_expired(item: &Item, now: DateTime<Utc>) -> bool {
    item.end_date().is_some_and(|end| end < now)
}

/// First failing filter, or `None` if the item may be notified.
pub fn check(item: &Item, cfg: &FilterConfig, now: DateTime<Utc>) -> Option<SkipReason> {
    if !is_tag_allowed(item, &cfg.allowed_tags) {
        return Some(SkipReason::TagNotAllowed);
    }
    if cfg.min_liquidity > 0.0 && item.liquidity() < cfg.min_liquidity {
        return Some(SkipReason::LowLiquidity);
    }
    if cfg.min_volume > 0.0 && item.volume() < cfg.min_volume {
        return Some(SkipReason::LowVolume);
    }
    if cfg.exclude_sports && is_sports_event(item) {
        return Some(SkipReason::Sports);
    }
    if cfg.exclude_up_or_down && is_up_or_down(item) {
        return Some(SkipReason::UpOrDown);
    }
    if cfg.skip_expired && is_expired(item, now) {
        return Some(SkipReason::Expired);
    }
    if cfg.max_age_minutes > 0 {
        // Clamp keeps Duration::minutes far from its overflow panic.
        let max_age = Duration::minutes(cfg.max_age_minutes.min(1_000_000_000) as i64);
        if now.signed_duration_since(item.created_at) > max_age {
            return Some(SkipReason::TooOld);
        }
    }
    None
}
