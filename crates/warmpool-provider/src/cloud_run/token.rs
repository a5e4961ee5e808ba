//! OAuth bearer tokens for the Cloud Run API.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ProviderErrorKind;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh this long before the metadata server says the token expires.
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Where bearer tokens come from.
pub enum TokenSource {
    /// A fixed token, e.g. from `gcloud auth print-access-token`.
    Static(String),
    /// The GCE/Cloud Run metadata server, cached until near expiry.
    Metadata(Mutex<Option<CachedToken>>),
}

pub struct CachedToken {
    token: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

impl TokenSource {
    /// Use the token in `env_var` if set, otherwise the metadata server.
    pub fn from_env(env_var: &str) -> Self {
        match std::env::var(env_var) {
            Ok(token) if !token.trim().is_empty() => TokenSource::Static(token.trim().to_string()),
            _ => TokenSource::Metadata(Mutex::new(None)),
        }
    }

    pub(crate) async fn token(&self, http: &reqwest::Client) -> Result<String, ProviderErrorKind> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Metadata(cache) => {
                let mut cache = cache.lock().await;
                if let Some(cached) = cache.as_ref()
                    && Instant::now() < cached.refresh_at
                {
                    return Ok(cached.token.clone());
                }

                let fetched = fetch_metadata_token(http).await?;
                let lifetime = Duration::from_secs(fetched.expires_in).saturating_sub(EXPIRY_SLACK);
                debug!(expires_in = fetched.expires_in, "fetched metadata access token");
                *cache = Some(CachedToken {
                    token: fetched.access_token.clone(),
                    refresh_at: Instant::now() + lifetime,
                });
                Ok(fetched.access_token)
            }
        }
    }
}

async fn fetch_metadata_token(http: &reqwest::Client) -> Result<MetadataToken, ProviderErrorKind> {
    let response = http
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| ProviderErrorKind::Auth(format!("metadata server unreachable: {e}")))?;

    if !response.status().is_success() {
        return Err(ProviderErrorKind::Auth(format!(
            "metadata server returned {}",
            response.status()
        )));
    }

    response
        .json::<MetadataToken>()
        .await
        .map_err(|e| ProviderErrorKind::Auth(format!("bad metadata token: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_is_returned_as_is() {
        let source = TokenSource::Static("abc".to_string());
        let http = reqwest::Client::new();
        assert_eq!(source.token(&http).await.unwrap(), "abc");
    }

    #[test]
    fn unset_env_falls_back_to_metadata() {
        let source = TokenSource::from_env("WARMPOOL_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert!(matches!(source, TokenSource::Metadata(_)));
    }
}
