//! Conditional fetching of the catalog resource.

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use crate::catalog::{CacheRecord, Catalog};

/// How long a fetch may be in flight before it counts as failed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Validators carried from the current cache record into a conditional
/// request. Both absent means the request is unconditional.
#[derive(Debug, Clone, Default)]
pub struct Validators {
  pub tag: Option<String>,
  pub timestamp: Option<String>,
}

impl Validators {
  pub fn from_record(record: &CacheRecord) -> Self {
    Self {
      tag: record.validator_tag.clone(),
      timestamp: record.validator_timestamp.clone(),
    }
  }
}

/// Why a fetch failed. Informational only: every failure funnels into
/// `FetchOutcome::Failed` and is recovered locally.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("network error: {0}")]
  Network(String),

  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  #[error("unexpected status: {0}")]
  BadStatus(StatusCode),

  #[error("body is not a JSON catalog: {0}")]
  Parse(String),
}

/// Outcome of a conditional catalog fetch.
#[derive(Debug)]
pub enum FetchOutcome {
  /// Origin returned a full body with fresh validators
  Fresh {
    payload: Catalog,
    validator_tag: Option<String>,
    validator_timestamp: Option<String>,
  },
  /// Origin confirmed the cached body is still valid; no body transferred
  NotModified,
  /// Network error, timeout, unexpected status, or unparseable body
  Failed(FetchError),
}

/// Trait for catalog fetchers, so orchestration can run against scripted
/// outcomes in tests.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, validators: Validators) -> FetchOutcome;
}

/// HTTP implementation of the catalog fetcher.
///
/// Issues a GET with revalidation headers derived from the validators and
/// intermediate caching disabled, raced against the timeout. Never returns
/// an error: failures are classified into the outcome.
pub struct HttpFetcher {
  client: reqwest::Client,
  url: Url,
  timeout: Duration,
}

impl HttpFetcher {
  pub fn new(url: Url) -> Self {
    Self {
      client: reqwest::Client::new(),
      url,
      timeout: DEFAULT_TIMEOUT,
    }
  }

  /// Set the fetch deadline.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  async fn request(&self, validators: &Validators) -> Result<FetchOutcome, FetchError> {
    let mut request = self
      .client
      .get(self.url.clone())
      .header(header::CACHE_CONTROL, "no-cache");

    if let Some(tag) = &validators.tag {
      request = request.header(header::IF_NONE_MATCH, tag.as_str());
    }
    if let Some(timestamp) = &validators.timestamp {
      request = request.header(header::IF_MODIFIED_SINCE, timestamp.as_str());
    }

    let response = request
      .send()
      .await
      .map_err(|e| FetchError::Network(e.to_string()))?;

    if response.status() == StatusCode::NOT_MODIFIED {
      return Ok(FetchOutcome::NotModified);
    }
    if !response.status().is_success() {
      return Err(FetchError::BadStatus(response.status()));
    }

    let validator_tag = header_value(&response, header::ETAG);
    let validator_timestamp = header_value(&response, header::LAST_MODIFIED);

    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::Network(e.to_string()))?;
    let payload: Catalog =
      serde_json::from_slice(&body).map_err(|e| FetchError::Parse(e.to_string()))?;

    Ok(FetchOutcome::Fresh {
      payload,
      validator_tag,
      validator_timestamp,
    })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, validators: Validators) -> FetchOutcome {
    let conditional = validators.tag.is_some() || validators.timestamp.is_some();
    debug!(url = %self.url, conditional, "fetching catalog");

    match timeout(self.timeout, self.request(&validators)).await {
      Ok(Ok(outcome)) => outcome,
      Ok(Err(e)) => FetchOutcome::Failed(e),
      Err(_) => FetchOutcome::Failed(FetchError::Timeout(self.timeout)),
    }
  }
}

fn header_value(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
  response
    .headers()
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(String::from)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_unreachable_origin_is_a_failed_outcome() {
    // Port 9 (discard) is closed on any sane test host
    let url = Url::parse("http://127.0.0.1:9/offers.json").unwrap();
    let fetcher = HttpFetcher::new(url).with_timeout(Duration::from_secs(2));

    let outcome = fetcher.fetch(Validators::default()).await;
    assert!(matches!(
      outcome,
      FetchOutcome::Failed(FetchError::Network(_)) | FetchOutcome::Failed(FetchError::Timeout(_))
    ));
  }

  #[test]
  fn test_validators_from_record() {
    let record = CacheRecord {
      validator_tag: Some("\"v1\"".to_string()),
      validator_timestamp: Some("Mon".to_string()),
      fetched_at: 0,
      payload: Catalog::new(),
    };

    let validators = Validators::from_record(&record);
    assert_eq!(validators.tag.as_deref(), Some("\"v1\""));
    assert_eq!(validators.timestamp.as_deref(), Some("Mon"));
  }
}
