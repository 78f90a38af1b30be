// src/notify/mod.rs
//! Outbound delivery. The poll loop only sees the [`Notifier`] trait; which
//! implementation runs (live X account or dry mode) is decided once at
//! startup from the configured credentials.

pub mod dry_run;
pub mod message;
pub mod oauth;
pub mod x;

use std::sync::Arc;

use crate::error::NotifyError;

pub use dry_run::DryRunNotifier;
pub use oauth::OAuthCredentials;
pub use x::XNotifier;

/// Identifier of a delivered post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyResult {
    pub id: String,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str, image_url: Option<&str>)
        -> Result<NotifyResult, NotifyError>;

    fn name(&self) -> &'static str;

    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Live X notifier when credentials are present, dry mode otherwise.
pub fn build_notifier(
    creds: Option<OAuthCredentials>,
    timeout: std::time::Duration,
) -> Result<Arc<dyn Notifier>, NotifyError> {
    match creds {
        Some(c) => {
            tracing::info!(target: "notify", "X credentials present, posting live");
            Ok(Arc::new(XNotifier::new(c)?.with_timeout(timeout)))
        }
        None => {
            tracing::warn!(target: "notify", "running in DRY RUN mode (no X credentials)");
            Ok(Arc::new(DryRunNotifier::new()))
        }
    }
}
