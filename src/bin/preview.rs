//! Prints what the next poll cycle would post, without posting or saving.
//! Pass a path to a JSON page to preview offline instead of hitting the API.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use new_market_bot::ingest::providers::gamma::GammaEventsProvider;
use new_market_bot::ingest::{decode_items, select_new, Verdict};
use new_market_bot::notify::message::resolve_image_url;
use new_market_bot::{init_tracing, BotConfig, CheckpointStore, FileCheckpointStore, ListingFetcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = BotConfig::from_env()?;
    let fetcher: Arc<dyn ListingFetcher> = match std::env::args().nth(1) {
        Some(path) => {
            let page = std::fs::read_to_string(&path)
                .with_context(|| format!("reading fixture page {path}"))?;
            Arc::new(GammaEventsProvider::from_fixture(&page))
        }
        None => Arc::new(GammaEventsProvider::from_url(&cfg.api_base, cfg.http_timeout())?),
    };

    let checkpoint = FileCheckpointStore::new(&cfg.state_path).load()?;
    let raw = fetcher.fetch(cfg.page_size, cfg.fetch_tags()).await?;
    let (items, malformed) = decode_items(raw);
    let selection = select_new(items, &checkpoint, &cfg.filters(), Utc::now());
    let template = cfg.template();

    println!(
        "checkpoint {} | new {} | to post {} | skipped {} | malformed {}",
        checkpoint.last_seen_created_at.to_rfc3339(),
        selection.entries.len(),
        selection.notify_count(),
        selection.skipped_count(),
        malformed
    );
    for c in &selection.entries {
        match c.verdict {
            Verdict::Skip(reason) => {
                println!("- skip {} ({})", c.item.id, reason.as_str());
            }
            Verdict::Notify => {
                let image = if cfg.include_images {
                    resolve_image_url(&c.item)
                } else {
                    None
                };
                println!("----- {} @ {}", c.item.id, c.item.created_at.to_rfc3339());
                println!("{}", template.render(&c.item));
                println!("[image: {}]", image.as_deref().unwrap_or("-"));
            }
        }
    }
    Ok(())
}
