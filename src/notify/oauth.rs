// src/notify/oauth.rs
//! OAuth 1.0a (HMAC-SHA1) request signing for the X API.
//!
//! Only query/form parameters take part in the signature; JSON and multipart
//! bodies are not signed, which is what the X endpoints we call expect.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::{distr::Alphanumeric, Rng};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

#[derive(Clone)]
pub struct OAuthCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

// Never print secrets.
impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("consumer_key_len", &self.consumer_key.len())
            .field("access_token_len", &self.access_token.len())
            .finish()
    }
}

/// RFC 3986 percent-encoding (unreserved characters stay as-is).
pub fn percent_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

pub fn nonce() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Signature base string: METHOD&url&sorted-encoded-params.
pub fn signature_base(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    let param_str = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(url),
        percent_encode(&param_str)
    )
}

pub fn sign(base: &str, consumer_secret: &str, token_secret: &str) -> String {
    let key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    );
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha1::new_from_slice(key.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(base.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

impl OAuthCredentials {
    /// Full `Authorization` header value for one request.
    pub fn authorization_header(
        &self,
        method: &str,
        url: &str,
        request_params: &[(String, String)],
    ) -> String {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.authorization_header_with(method, url, request_params, &nonce(), &timestamp)
    }

    pub fn authorization_header_with(
        &self,
        method: &str,
        url: &str,
        request_params: &[(String, String)],
        nonce: &str,
        timestamp: &str,
    ) -> String {
        let mut oauth: Vec<(String, String)> = vec![
            ("oauth_consumer_key".into(), self.consumer_key.clone()),
            ("oauth_nonce".into(), nonce.to_string()),
            ("oauth_signature_method".into(), "HMAC-SHA1".into()),
            ("oauth_timestamp".into(), timestamp.to_string()),
            ("oauth_token".into(), self.access_token.clone()),
            ("oauth_version".into(), "1.0".into()),
        ];

        let mut all = oauth.clone();
        all.extend(request_params.iter().cloned());
        let base = signature_base(method, url, &all);
        let signature = sign(&base, &self.consumer_secret, &self.access_secret);
        oauth.push(("oauth_signature".into(), signature));
        oauth.sort();

        let fields = oauth
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("OAuth {fields}")
    }
}
