// src/notify/dry_run.rs
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Notifier, NotifyResult};
use crate::error::NotifyError;

/// Logs what would be posted and always succeeds. No network access.
#[derive(Debug, Default)]
pub struct DryRunNotifier {
    sent: AtomicU64,
}

impl DryRunNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Notifier for DryRunNotifier {
    async fn notify(
        &self,
        text: &str,
        image_url: Option<&str>,
    ) -> Result<NotifyResult, NotifyError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            target: "notify",
            image = image_url.unwrap_or("-"),
            "[DRY RUN] would post:\n{text}"
        );
        Ok(NotifyResult {
            id: format!("dry-run-{n}"),
        })
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_succeeds_with_sequential_ids() {
        let n = DryRunNotifier::new();
        let a = n.notify("one", None).await.unwrap();
        let b = n.notify("two", Some("https://x/img.png")).await.unwrap();
        assert_eq!(a.id, "dry-run-1");
        assert_eq!(b.id, "dry-run-2");
        assert_eq!(n.sent(), 2);
        assert!(n.is_dry_run());
    }
}
