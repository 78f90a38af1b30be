// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod ingest;
pub mod notify;
pub mod poller;

// ---- Re-exports for stable public API ----
pub use crate::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
pub use crate::config::BotConfig;
pub use crate::error::{CheckpointError, FetchError, NotifyError, PollError};
pub use crate::ingest::types::{Item, ListingFetcher};
pub use crate::notify::{Notifier, NotifyResult};
pub use crate::poller::{CycleOutcome, CycleReport, PollLoop};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
/// `RUST_LOG` picks levels (default `info`); `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}
