//! # Poll Loop
//! One cycle: load checkpoint → fetch → filter → notify each new item in
//! ascending order → persist → sleep. Cycles never overlap and items are
//! notified strictly one after another, so the checkpoint tip always matches
//! the last confirmed post.
//!
//! Commit granularity is per item: after every confirmed post the advanced
//! checkpoint is saved. A crash (or failed save) therefore re-delivers at most
//! the item whose advance did not persist, never the whole batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::BotConfig;
use crate::error::{CheckpointError, NotifyError, PollError};
use crate::ingest::filters::FilterConfig;
use crate::ingest::types::ListingFetcher;
use crate::ingest::{decode_items, select_new, Verdict};
use crate::notify::message::{resolve_image_url, MessageTemplate};
use crate::notify::Notifier;

/// One-time metrics registration.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("poll_cycles_total", "Poll cycles started.");
        describe_counter!("poll_fetch_errors_total", "Listing fetch failures.");
        describe_counter!("items_new_total", "Items newer than the checkpoint.");
        describe_counter!("items_filtered_total", "New items rejected by allow-filters.");
        describe_counter!("items_notified_total", "Items posted successfully.");
        describe_counter!("items_duplicate_total", "Items the destination already held.");
        describe_counter!("notify_errors_total", "Failed notification attempts.");
        describe_counter!("checkpoint_saves_total", "Successful checkpoint writes.");
        describe_gauge!("poll_last_run_ts", "Unix ts when the last cycle started.");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Filtering,
    Notifying,
    Persisting,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleOutcome {
    /// Every new item handled and the checkpoint persisted.
    #[default]
    Completed,
    /// Fresh checkpoint: the page was marked seen without posting.
    Primed,
    LoadFailed,
    FetchFailed,
    NotifyFailed,
    RateLimited { retry_after: Option<Duration> },
    PersistFailed,
    /// Shutdown requested between two items.
    Interrupted,
}

impl CycleOutcome {
    pub fn is_faulted(&self) -> bool {
        !matches!(
            self,
            CycleOutcome::Completed | CycleOutcome::Primed | CycleOutcome::Interrupted
        )
    }
}

/// What one cycle did. This is also what the summary log line reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub fetched: usize,
    pub malformed: usize,
    pub new: usize,
    pub skipped: usize,
    pub notified: usize,
    pub failed: usize,
    /// Items the destination already held from an earlier, unpersisted send.
    pub duplicates: usize,
    /// Ids posted this cycle, in order.
    pub posted_ids: Vec<String>,
    /// Last checkpoint successfully written this cycle.
    pub checkpoint: Option<Checkpoint>,
    pub outcome: CycleOutcome,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct PollLoop {
    cfg: BotConfig,
    filters: FilterConfig,
    template: MessageTemplate,
    fetcher: Arc<dyn ListingFetcher>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn CheckpointStore>,
    clock: Clock,
    state: CycleState,
    fetch_failures: u32,
}

impl PollLoop {
    /// Refuses to build on a corrupt checkpoint.
    pub fn new(
        cfg: BotConfig,
        fetcher: Arc<dyn ListingFetcher>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self, CheckpointError> {
        let existing = store.try_load()?;
        match &existing {
            Some(cp) => info!(
                target: "poller",
                last_seen = %cp.last_seen_created_at.to_rfc3339(),
                recent_ids = cp.recent_ids.len(),
                total_notified = cp.total_notified,
                "checkpoint loaded"
            ),
            None => info!(target: "poller", "no checkpoint yet, starting from zero"),
        }
        ensure_metrics_described();
        Ok(Self {
            filters: cfg.filters(),
            template: cfg.template(),
            cfg,
            fetcher,
            notifier,
            store,
            clock: Arc::new(Utc::now),
            state: CycleState::Idle,
            fetch_failures: 0,
        })
    }

    /// Replace the wall clock (tests).
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    fn enter(&mut self, s: CycleState) {
        debug!(target: "poller", from = ?self.state, to = ?s, "state");
        self.state = s;
    }

    /// Run until shutdown or a fatal error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PollError> {
        info!(
            target: "poller",
            interval_secs = self.cfg.poll_interval_secs,
            page_size = self.cfg.page_size,
            min_liquidity = self.cfg.min_liquidity,
            allowed_tags = ?self.cfg.allowed_tags,
            include_images = self.cfg.include_images,
            notifier = self.notifier.name(),
            dry_run = self.notifier.is_dry_run(),
            "poll loop starting"
        );

        loop {
            if *shutdown.borrow() {
                info!(target: "poller", "shutdown requested, stopping");
                return Ok(());
            }

            let report = self.run_cycle(&shutdown).await?;
            self.enter(CycleState::Idle);

            if *shutdown.borrow() {
                info!(target: "poller", "shutdown requested, stopping");
                return Ok(());
            }

            let delay = self.next_delay(&report);
            info!(target: "poller", sleep_secs = delay.as_secs(), "sleeping");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                res = shutdown.changed() => {
                    // Sender gone: nobody can ask us to stop any more.
                    if res.is_err() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Gap after this cycle. Fetch failures back off exponentially; a rate
    /// limit waits for the reset (or the configured backoff).
    pub fn next_delay(&self, report: &CycleReport) -> Duration {
        let base = self.cfg.poll_interval();
        match report.outcome {
            CycleOutcome::FetchFailed if self.fetch_failures > 1 => {
                let factor = 1u32 << (self.fetch_failures - 1).min(16);
                base.saturating_mul(factor).min(self.cfg.max_backoff())
            }
            CycleOutcome::RateLimited { retry_after } => {
                base.max(retry_after.unwrap_or_else(|| self.cfg.rate_limit_backoff()))
            }
            _ => base,
        }
    }

    /// One full cycle. `Err` only for fatal conditions (corrupt state,
    /// rejected credentials); everything else is reported in the outcome.
    pub async fn run_cycle(
        &mut self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleReport, PollError> {
        counter!("poll_cycles_total").increment(1);
        let now = (self.clock)();
        gauge!("poll_last_run_ts").set(now.timestamp() as f64);

        let mut report = CycleReport::default();

        let mut cp = match self.store.load() {
            Ok(cp) => cp,
            Err(e @ CheckpointError::CorruptState { .. }) => {
                self.enter(CycleState::Faulted);
                error!(target: "poller", error = %e, "checkpoint is corrupt, refusing to continue");
                return Err(e.into());
            }
            Err(e) => {
                self.enter(CycleState::Faulted);
                warn!(target: "poller", error = %e, "could not load checkpoint, retrying next cycle");
                report.outcome = CycleOutcome::LoadFailed;
                return Ok(report);
            }
        };
        cp.last_poll_time = Some(now);

        // Fetching
        self.enter(CycleState::Fetching);
        let raw = match self
            .fetcher
            .fetch(self.cfg.page_size, self.cfg.fetch_tags())
            .await
        {
            Ok(raw) => {
                self.fetch_failures = 0;
                raw
            }
            Err(e) => {
                self.enter(CycleState::Faulted);
                self.fetch_failures = self.fetch_failures.saturating_add(1);
                counter!("poll_fetch_errors_total").increment(1);
                warn!(
                    target: "poller",
                    error = %e,
                    fetcher = self.fetcher.name(),
                    consecutive = self.fetch_failures,
                    "fetch failed, checkpoint untouched"
                );
                // Cursor is unchanged; only the poll time is recorded.
                if let Err(e) = self.store.save(&cp) {
                    warn!(target: "poller", error = %e, "could not record poll time");
                } else {
                    report.checkpoint = Some(cp);
                }
                report.outcome = CycleOutcome::FetchFailed;
                self.log_summary(&report);
                return Ok(report);
            }
        };
        report.fetched = raw.len();

        // Filtering
        self.enter(CycleState::Filtering);
        let (items, malformed) = decode_items(raw);
        report.malformed = malformed;
        let selection = select_new(items, &cp, &self.filters, now);
        report.new = selection.entries.len();
        counter!("items_new_total").increment(report.new as u64);

        if self.cfg.skip_backlog_on_first_run && cp.is_fresh() && !selection.is_empty() {
            for c in &selection.entries {
                cp.advance(c.item.created_at, &c.item.id);
            }
            report.skipped = selection.entries.len();
            info!(
                target: "poller",
                items = report.skipped,
                "first run: marking current listing as seen without posting"
            );
            report.outcome = CycleOutcome::Primed;
            self.persist_final(&mut cp, &mut report);
            self.log_summary(&report);
            return Ok(report);
        }

        // Notifying. Strictly sequential: one item is confirmed and committed
        // before the next one is sent.
        self.enter(CycleState::Notifying);
        let mut fatal: Option<NotifyError> = None;
        for c in selection.entries {
            if *shutdown.borrow() {
                info!(target: "poller", "shutdown requested mid-batch");
                report.outcome = CycleOutcome::Interrupted;
                break;
            }

            let item = c.item;
            if let Verdict::Skip(_) = c.verdict {
                cp.advance(item.created_at, &item.id);
                report.skipped += 1;
                counter!("items_filtered_total").increment(1);
                continue;
            }

            let image_url = if self.cfg.include_images {
                resolve_image_url(&item)
            } else {
                None
            };
            let text = self.template.render(&item);

            let delivered = match self.notifier.notify(&text, image_url.as_deref()).await {
                Ok(res) => Ok(Some(res.id)),
                Err(e) if e.is_already_delivered() => {
                    // An earlier send landed but its advance was never saved.
                    warn!(
                        target: "poller",
                        error = %e,
                        id = %item.id,
                        "item already posted upstream, treating as delivered"
                    );
                    Ok(None)
                }
                Err(e) => Err(e),
            };

            match delivered {
                Ok(post_id) => {
                    cp.advance(item.created_at, &item.id);
                    cp.total_notified += 1;
                    match post_id {
                        Some(post_id) => {
                            report.notified += 1;
                            report.posted_ids.push(item.id.clone());
                            counter!("items_notified_total").increment(1);
                            info!(
                                target: "poller",
                                id = %item.id,
                                created_at = %item.created_at.to_rfc3339(),
                                post_id = %post_id,
                                title = item.title().unwrap_or_default(),
                                "item notified"
                            );
                        }
                        None => {
                            report.duplicates += 1;
                            counter!("items_duplicate_total").increment(1);
                        }
                    }

                    self.enter(CycleState::Persisting);
                    match self.store.save(&cp) {
                        Ok(()) => {
                            counter!("checkpoint_saves_total").increment(1);
                            report.checkpoint = Some(cp.clone());
                        }
                        Err(e) => {
                            // The post is out; the next cycle may send it again.
                            error!(
                                target: "poller",
                                error = %e,
                                id = %item.id,
                                "checkpoint save failed after notify, aborting batch"
                            );
                            report.outcome = CycleOutcome::PersistFailed;
                            break;
                        }
                    }
                    self.enter(CycleState::Notifying);
                }
                Err(e) => {
                    report.failed += 1;
                    counter!("notify_errors_total").increment(1);
                    error!(
                        target: "poller",
                        error = %e,
                        id = %item.id,
                        "notify failed, stopping batch before this item"
                    );
                    report.outcome = match &e {
                        NotifyError::RateLimited { retry_after } => CycleOutcome::RateLimited {
                            retry_after: *retry_after,
                        },
                        _ => CycleOutcome::NotifyFailed,
                    };
                    if matches!(e, NotifyError::Auth(_)) {
                        fatal = Some(e);
                    }
                    break;
                }
            }
        }

        // Persisting: skipped items and the poll time ride along here.
        if report.outcome != CycleOutcome::PersistFailed {
            self.persist_final(&mut cp, &mut report);
        }
        if report.outcome.is_faulted() {
            self.enter(CycleState::Faulted);
        }
        self.log_summary(&report);

        match fatal {
            Some(e) => Err(PollError::Auth(e)),
            None => Ok(report),
        }
    }

    fn persist_final(&mut self, cp: &mut Checkpoint, report: &mut CycleReport) {
        self.enter(CycleState::Persisting);
        match self.store.save(cp) {
            Ok(()) => {
                counter!("checkpoint_saves_total").increment(1);
                report.checkpoint = Some(cp.clone());
            }
            Err(e) => {
                error!(target: "poller", error = %e, "checkpoint save failed");
                if !report.outcome.is_faulted() {
                    report.outcome = CycleOutcome::PersistFailed;
                }
            }
        }
    }

    fn log_summary(&self, report: &CycleReport) {
        let (last_seen, recent_ids, total) = match &report.checkpoint {
            Some(cp) => (
                cp.last_seen_created_at.to_rfc3339(),
                cp.recent_ids.len(),
                cp.total_notified,
            ),
            None => ("-".to_string(), 0, 0),
        };
        info!(
            target: "poller",
            fetched = report.fetched,
            malformed = report.malformed,
            new = report.new,
            skipped = report.skipped,
            notified = report.notified,
            failed = report.failed,
            duplicates = report.duplicates,
            outcome = ?report.outcome,
            checkpoint_last_seen = %last_seen,
            checkpoint_recent_ids = recent_ids,
            total_notified = total,
            "poll cycle finished"
        );
    }
}
