// src/notify/x.rs
use std::time::Duration;

use reqwest::{header::HeaderMap, Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::oauth::OAuthCredentials;
use super::{Notifier, NotifyResult};
use crate::error::NotifyError;

pub const TWEETS_URL: &str = "https://api.twitter.com/2/tweets";
pub const MEDIA_UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";

/// Posts to an X account with OAuth 1.0a user credentials.
#[derive(Clone)]
pub struct XNotifier {
    creds: OAuthCredentials,
    client: Client,
    timeout: Duration,
    max_retries: u8,
    tweets_url: String,
    media_url: String,
}

impl XNotifier {
    pub fn new(creds: OAuthCredentials) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .user_agent(concat!("new-market-bot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            creds,
            client,
            timeout: Duration::from_secs(30),
            max_retries: 2,
            tweets_url: TWEETS_URL.to_string(),
            media_url: MEDIA_UPLOAD_URL.to_string(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn download_image(&self, url: &str) -> Result<Vec<u8>, NotifyError> {
        let rsp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(rsp.bytes().await?.to_vec())
    }

    async fn upload_media(&self, bytes: Vec<u8>) -> Result<String, NotifyError> {
        let auth = self
            .creds
            .authorization_header("POST", &self.media_url, &[]);
        let form = reqwest::multipart::Form::new()
            .part("media", reqwest::multipart::Part::bytes(bytes).file_name("image"));

        let rsp = self
            .client
            .post(&self.media_url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await?;

        let status = rsp.status();
        if !status.is_success() {
            let headers = rsp.headers().clone();
            let body = rsp.text().await.unwrap_or_default();
            return Err(classify_failure(status, &headers, &body));
        }
        let media: MediaUploadResponse = rsp.json().await?;
        Ok(media.media_id_string)
    }

    /// Download and upload the image. Any failure degrades to a text-only post.
    async fn prepare_media(&self, image_url: &str) -> Option<String> {
        let bytes = match self.download_image(image_url).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(target: "notify", error = %e, image_url, "could not download image");
                return None;
            }
        };
        match self.upload_media(bytes).await {
            Ok(id) => {
                tracing::info!(target: "notify", media_id = %id, "image uploaded");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(target: "notify", error = %e, "media upload failed");
                None
            }
        }
    }

    async fn create_post(
        &self,
        payload: &CreatePostPayload,
    ) -> Result<NotifyResult, NotifyError> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let auth = self
                .creds
                .authorization_header("POST", &self.tweets_url, &[]);
            let res = self
                .client
                .post(&self.tweets_url)
                .header(reqwest::header::AUTHORIZATION, auth)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) if rsp.status().is_success() => {
                    let body: CreatePostResponse = rsp.json().await?;
                    return Ok(NotifyResult { id: body.data.id });
                }
                Ok(rsp) => {
                    let status = rsp.status();
                    let headers = rsp.headers().clone();
                    let body = rsp.text().await.unwrap_or_default();
                    classify_failure(status, &headers, &body)
                }
                Err(e) => NotifyError::from(e),
            };

            // Only plain transport failures are worth retrying in place.
            if matches!(err, NotifyError::Transport(_)) && attempt < self.max_retries {
                tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                continue;
            }
            return Err(err);
        }
    }
}

#[async_trait::async_trait]
impl Notifier for XNotifier {
    async fn notify(
        &self,
        text: &str,
        image_url: Option<&str>,
    ) -> Result<NotifyResult, NotifyError> {
        let media_id = match image_url {
            Some(url) => self.prepare_media(url).await,
            None => None,
        };
        let payload = CreatePostPayload {
            text: text.to_string(),
            media: media_id.map(|id| MediaIds {
                media_ids: vec![id],
            }),
        };
        let res = self.create_post(&payload).await?;
        tracing::info!(target: "notify", post_id = %res.id, "post sent");
        Ok(res)
    }

    fn name(&self) -> &'static str {
        "x"
    }
}

/// Map a non-2xx response to the notifier error taxonomy.
pub fn classify_failure(status: StatusCode, headers: &HeaderMap, body: &str) -> NotifyError {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::FORBIDDEN if is_duplicate_rejection(body) => {
            NotifyError::Duplicate(format!("HTTP {status}: {snippet}"))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            NotifyError::Auth(format!("HTTP {status}: {snippet}"))
        }
        StatusCode::TOO_MANY_REQUESTS => NotifyError::RateLimited {
            retry_after: rate_limit_reset(headers, chrono::Utc::now().timestamp()),
        },
        _ => NotifyError::Transport(format!("HTTP {status}: {snippet}")),
    }
}

/// X answers a repeated text with 403 and a "duplicate content" detail.
fn is_duplicate_rejection(body: &str) -> bool {
    body.to_ascii_lowercase().contains("duplicate content")
}

/// `x-rate-limit-reset` is an epoch second; turn it into a delay from `now`.
fn rate_limit_reset(headers: &HeaderMap, now: i64) -> Option<Duration> {
    let reset: i64 = headers
        .get("x-rate-limit-reset")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    u64::try_from(reset.checked_sub(now)?)
        .ok()
        .map(Duration::from_secs)
}

#[derive(Serialize)]
struct MediaIds {
    media_ids: Vec<String>,
}

#[derive(Serialize)]
struct CreatePostPayload {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<MediaIds>,
}

#[derive(Deserialize)]
struct CreatePostResponse {
    data: CreatedPost,
}

#[derive(Deserialize)]
struct CreatedPost {
    id: String,
}

#[derive(Deserialize)]
struct MediaUploadResponse {
    media_id_string: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn auth_failures_are_fatal_kind() {
        let h = HeaderMap::new();
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, &h, "nope"),
            NotifyError::Auth(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, &h, ""),
            NotifyError::Auth(_)
        ));
    }

    #[test]
    fn duplicate_content_is_not_an_auth_failure() {
        let h = HeaderMap::new();
        let body = r#"{"detail":"You are not allowed to create a Tweet with duplicate content.","type":"about:blank","title":"Forbidden","status":403}"#;
        let err = classify_failure(StatusCode::FORBIDDEN, &h, body);
        assert!(matches!(err, NotifyError::Duplicate(_)), "{err:?}");
        assert!(err.is_already_delivered());

        // Same wording on a 401 is still a credential problem.
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, &h, body),
            NotifyError::Auth(_)
        ));
        let forbidden = r#"{"detail":"You are not permitted to perform this action.","status":403}"#;
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, &h, forbidden),
            NotifyError::Auth(_)
        ));
    }

    #[test]
    fn too_many_requests_is_rate_limited() {
        let h = HeaderMap::new();
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, &h, ""),
            NotifyError::RateLimited { retry_after: None }
        ));
    }

    #[test]
    fn server_errors_are_transport() {
        let h = HeaderMap::new();
        assert!(matches!(
            classify_failure(StatusCode::BAD_GATEWAY, &h, "upstream"),
            NotifyError::Transport(_)
        ));
    }

    #[test]
    fn reset_header_becomes_delay() {
        let mut h = HeaderMap::new();
        h.insert("x-rate-limit-reset", HeaderValue::from_static("1700000900"));
        assert_eq!(
            rate_limit_reset(&h, 1_700_000_000),
            Some(Duration::from_secs(900))
        );
        // Reset already passed.
        assert_eq!(rate_limit_reset(&h, 1_700_001_000), None);
    }

    #[test]
    fn extreme_reset_header_does_not_overflow() {
        let mut h = HeaderMap::new();
        h.insert(
            "x-rate-limit-reset",
            HeaderValue::from_static("-9223372036854775808"),
        );
        assert_eq!(rate_limit_reset(&h, 1_700_000_000), None);

        h.insert(
            "x-rate-limit-reset",
            HeaderValue::from_static("9223372036854775807"),
        );
        assert_eq!(rate_limit_reset(&h, -1), None);
    }

    #[test]
    fn payload_omits_media_when_absent() {
        let p = CreatePostPayload {
            text: "hi".into(),
            media: None,
        };
        assert_eq!(serde_json::to_string(&p).unwrap(), r#"{"text":"hi"}"#);
        let p = CreatePostPayload {
            text: "hi".into(),
            media: Some(MediaIds {
                media_ids: vec!["9".into()],
            }),
        };
        assert_eq!(
            serde_json::to_string(&p).unwrap(),
            r#"{"text":"hi","media":{"media_ids":["9"]}}"#
        );
    }
}
