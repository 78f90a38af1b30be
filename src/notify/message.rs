// src/notify/message.rs
//! Post text and image selection for one item.

use crate::ingest::types::Item;

/// Hard cap on post length, measured by [`post_weight`].
pub const MAX_POST_WEIGHT: usize = 280;

/// Every link counts as this many characters regardless of its length.
const LINK_WEIGHT: usize = 23;

/// Image slots in priority order. Each slot lists the attribute spellings
/// seen upstream; the first non-empty value across slots wins.
pub const IMAGE_FIELDS: &[(&str, &[&str])] = &[
    ("primary", &["image"]),
    ("cover", &["coverImage", "cover_image"]),
    ("banner", &["bannerImage", "banner_image"]),
    ("icon", &["icon"]),
    ("thumbnail", &["thumbnail", "thumbnailImage", "thumbnail_image"]),
];

pub const DEFAULT_EVENT_URL_BASE: &str = "https://polymarket.com/event/";

const HEADLINE: &str = "🚨 New Polymarket Event!";
const DEFAULT_TITLE: &str = "New Event";
const MIN_TRUNCATED_TITLE: usize = 20;

pub fn resolve_image_url(item: &Item) -> Option<String> {
    IMAGE_FIELDS
        .iter()
        .flat_map(|(_, keys)| keys.iter())
        .find_map(|k| item.str_attr(k))
        .map(str::to_string)
}

/// `$1.2M`, `$45K`, `$300`.
pub fn format_usd(num: f64) -> String {
    if num >= 1_000_000.0 {
        format!("${:.1}M", num / 1_000_000.0)
    } else if num >= 1_000.0 {
        format!("${:.0}K", num / 1_000.0)
    } else {
        format!("${:.0}", num.max(0.0))
    }
}

/// Post length as X counts it: a link weighs [`LINK_WEIGHT`], code points
/// outside the Latin and common punctuation blocks (emoji, CJK) weigh 2.
pub fn post_weight(text: &str) -> usize {
    text.split_inclusive(char::is_whitespace)
        .map(piece_weight)
        .sum()
}

fn piece_weight(piece: &str) -> usize {
    let word = piece.trim_end();
    if is_link(word) {
        LINK_WEIGHT + piece[word.len()..].chars().map(char_weight).sum::<usize>()
    } else {
        piece.chars().map(char_weight).sum()
    }
}

fn is_link(word: &str) -> bool {
    ["https://", "http://"]
        .iter()
        .any(|p| word.len() > p.len() && word.starts_with(p))
}

fn char_weight(c: char) -> usize {
    match u32::from(c) {
        0x0000..=0x10FF | 0x2000..=0x200D | 0x2010..=0x201F | 0x2032..=0x2037 => 1,
        _ => 2,
    }
}

/// Longest prefix of `text` whose weight fits `budget`. Links are kept whole
/// or dropped.
fn truncate_to_weight(text: &str, budget: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for piece in text.split_inclusive(char::is_whitespace) {
        let w = piece_weight(piece);
        if used + w <= budget {
            out.push_str(piece);
            used += w;
            continue;
        }
        if !is_link(piece.trim_end()) {
            for c in piece.chars() {
                used += char_weight(c);
                if used > budget {
                    break;
                }
                out.push(c);
            }
        }
        break;
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    pub event_url_base: String,
    pub footer: Option<String>,
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self {
            event_url_base: DEFAULT_EVENT_URL_BASE.to_string(),
            footer: None,
        }
    }
}

impl MessageTemplate {
    pub fn event_url(&self, item: &Item) -> String {
        let slug = item.slug().unwrap_or(&item.id);
        format!("{}{}", self.event_url_base, slug)
    }

    pub fn render(&self, item: &Item) -> String {
        let title = item.title().unwrap_or(DEFAULT_TITLE);
        let text = self.compose(item, title);

        let overflow = post_weight(&text).saturating_sub(MAX_POST_WEIGHT);
        if overflow == 0 {
            return text;
        }

        let budget = post_weight(title).saturating_sub(overflow + 3);
        let short = truncate_to_weight(title, budget);
        let text = if short.chars().count() > MIN_TRUNCATED_TITLE {
            self.compose(item, &format!("{}...", short.trim_end()))
        } else {
            text
        };
        if post_weight(&text) <= MAX_POST_WEIGHT {
            text
        } else {
            truncate_to_weight(&text, MAX_POST_WEIGHT)
        }
    }

    fn compose(&self, item: &Item, title: &str) -> String {
        let mut out = format!(
            "{HEADLINE}\n\n{title}\n\n📊 Volume: {}\n💰 Liquidity: {}",
            format_usd(item.volume()),
            format_usd(item.liquidity()),
        );
        if let Some(end) = item.end_date() {
            out.push_str(&format!("\n⏳ Ends: {}", end.format("%Y-%m-%d")));
        }
        out.push_str(&format!("\n\nTrade 👉 {}", self.event_url(item)));
        if let Some(footer) = self.footer.as_deref().filter(|f| !f.trim().is_empty()) {
            out.push_str("\n\n");
            out.push_str(footer.trim());
        }
        out
    }
}
