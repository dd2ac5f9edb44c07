//! HTTP client for the hosted table API.
//!
//! Uses reqwest with the project's public key. Every operation is a JSON POST
//! to `{base_url}/{project_id}/{table}/{action}`; the store answers with the
//! `StoreResponse` envelope even for rejections, so only transport failures
//! and unparsable bodies surface as `Err`.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{BatchResponse, FetchResponse, GetResponse, QueryParams, RecordStore};
use crate::error::{CrmError, CrmResult};
use crate::types::{Config, Record};

const PUBLIC_KEY_HEADER: &str = "X-Apper-Public-Key";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Whether a request may reach the store more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// Fetch, get, update and delete: a resend has the same effect.
    Safe,
    /// Create: a resend after the store saw the request duplicates records.
    Unsafe,
}

/// Statuses worth resending. 429 means the store refused the request
/// unread; timeouts and server errors may follow a completed write.
fn should_retry_status(status: reqwest::StatusCode, replay: Replay) -> bool {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    replay == Replay::Safe
        && (status == reqwest::StatusCode::REQUEST_TIMEOUT || status.is_server_error())
}

/// Transport failures worth resending. A refused connection never reached
/// the store; a timed-out one may have.
fn should_retry_error(err: &reqwest::Error, replay: Replay) -> bool {
    err.is_connect() || (err.is_timeout() && replay == Replay::Safe)
}

/// Backoff before attempt `attempt + 1`: the store's Retry-After seconds
/// (capped at 30) if given, else doubling from the policy's initial backoff
/// up to its maximum, plus up to 150ms of jitter.
fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    let requested = retry_after
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    if let Some(secs) = requested {
        return Duration::from_secs(secs.min(30));
    }

    let doubled = policy
        .initial_backoff_ms
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let jitter = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::from(d.subsec_millis()) % 150);
    Duration::from_millis(doubled.min(policy.max_backoff_ms) + jitter)
}

/// Send a request under `policy`. Throttling is always retried; timeouts and
/// server errors only when `replay` is `Safe`.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
    replay: Replay,
) -> CrmResult<reqwest::Response> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        // Streaming bodies cannot be cloned; send those once.
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(CrmError::from);
        };
        let last = attempt >= attempts;

        let delay = match cloned.send().await {
            Ok(response) if !last && should_retry_status(response.status(), replay) => {
                let delay = retry_delay(
                    attempt,
                    policy,
                    response.headers().get(reqwest::header::RETRY_AFTER),
                );
                log::warn!(
                    "record store answered {}; attempt {}/{}, retrying in {:?}",
                    response.status(),
                    attempt,
                    attempts,
                    delay
                );
                delay
            }
            Ok(response) => return Ok(response),
            Err(err) if !last && should_retry_error(&err, replay) => {
                let delay = retry_delay(attempt, policy, None);
                log::warn!(
                    "record store unreachable ({}); attempt {}/{}, retrying in {:?}",
                    err,
                    attempt,
                    attempts,
                    delay
                );
                delay
            }
            Err(err) => return Err(CrmError::from(err)),
        };

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Error body the API returns alongside non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct RecordsBody<'a> {
    records: &'a [Record],
}

#[derive(Serialize)]
struct DeleteBody<'a> {
    #[serde(rename = "RecordIds")]
    record_ids: &'a [i64],
}

pub struct RemoteStore {
    client: reqwest::Client,
    base_url: Url,
    project_id: String,
    public_key: String,
    retry: RetryPolicy,
}

impl RemoteStore {
    pub fn new(config: &Config) -> CrmResult<Self> {
        if config.project_id.trim().is_empty() {
            return Err(CrmError::Config("projectId is not set".to_string()));
        }
        if config.public_key.trim().is_empty() {
            return Err(CrmError::Config("publicKey is not set".to_string()));
        }

        // Url::join drops the last path segment unless the base ends in '/'.
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| CrmError::Config(format!("Invalid baseUrl {}: {}", base, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| CrmError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            project_id: config.project_id.clone(),
            public_key: config.public_key.clone(),
            retry: config.retry.clone(),
        })
    }

    pub(crate) fn endpoint(&self, table: &str, action: &str) -> CrmResult<Url> {
        self.base_url
            .join(&format!("{}/{}/{}", self.project_id, table, action))
            .map_err(|e| CrmError::Config(format!("Invalid endpoint for {table}: {e}")))
    }

    async fn post<B, T>(&self, url: Url, body: &B, replay: Replay) -> CrmResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        log::debug!("record store POST {}", url);
        let request = self
            .client
            .post(url.clone())
            .header(PUBLIC_KEY_HEADER, self.public_key.clone())
            .json(body);

        let resp = send_with_retry(request, &self.retry, replay).await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|b| b.message)
                .filter(|m| !m.trim().is_empty());
            return Err(match message {
                Some(message) => CrmError::remote(message),
                None => CrmError::Transport(format!("Record store error {}: {}", status, text)),
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| CrmError::Transport(format!("Failed to parse store response: {e}")))
    }
}

#[async_trait]
impl RecordStore for RemoteStore {
    async fn fetch_records(&self, table: &str, params: &QueryParams) -> CrmResult<FetchResponse> {
        self.post(self.endpoint(table, "fetch")?, params, Replay::Safe)
            .await
    }

    async fn get_record_by_id(
        &self,
        table: &str,
        id: i64,
        params: &QueryParams,
    ) -> CrmResult<GetResponse> {
        self.post(self.endpoint(table, &format!("get/{id}"))?, params, Replay::Safe)
            .await
    }

    async fn create_records(&self, table: &str, records: Vec<Record>) -> CrmResult<BatchResponse> {
        let body = RecordsBody { records: &records };
        self.post(self.endpoint(table, "create")?, &body, Replay::Unsafe)
            .await
    }

    async fn update_records(&self, table: &str, records: Vec<Record>) -> CrmResult<BatchResponse> {
        let body = RecordsBody { records: &records };
        self.post(self.endpoint(table, "update")?, &body, Replay::Safe)
            .await
    }

    async fn delete_records(&self, table: &str, ids: &[i64]) -> CrmResult<BatchResponse> {
        let body = DeleteBody { record_ids: ids };
        self.post(self.endpoint(table, "delete")?, &body, Replay::Safe)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            project_id: "proj-1".to_string(),
            public_key: "pk".to_string(),
            base_url: "https://tables.example.com/v1".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let store = RemoteStore::new(&config()).unwrap();
        let url = store.endpoint("contact_c", "fetch").unwrap();
        assert_eq!(url.as_str(), "https://tables.example.com/v1/proj-1/contact_c/fetch");
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let mut cfg = config();
        cfg.public_key = "  ".to_string();
        assert!(matches!(RemoteStore::new(&cfg), Err(CrmError::Config(_))));
    }

    #[test]
    fn test_creates_are_not_resent_after_possible_writes() {
        use reqwest::StatusCode;
        for replay in [Replay::Safe, Replay::Unsafe] {
            assert!(should_retry_status(StatusCode::TOO_MANY_REQUESTS, replay));
            assert!(!should_retry_status(StatusCode::BAD_REQUEST, replay));
        }
        assert!(should_retry_status(StatusCode::BAD_GATEWAY, Replay::Safe));
        assert!(should_retry_status(StatusCode::REQUEST_TIMEOUT, Replay::Safe));
        assert!(!should_retry_status(StatusCode::BAD_GATEWAY, Replay::Unsafe));
        assert!(!should_retry_status(StatusCode::REQUEST_TIMEOUT, Replay::Unsafe));
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        let first = retry_delay(1, &policy, None);
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(250));
        let third = retry_delay(3, &policy, None);
        assert!(third >= Duration::from_millis(400) && third < Duration::from_millis(550));
        let capped = retry_delay(40, &policy, None);
        assert!(capped >= Duration::from_millis(1_000) && capped < Duration::from_millis(1_150));

        let header = reqwest::header::HeaderValue::from_static("120");
        assert_eq!(retry_delay(1, &policy, Some(&header)), Duration::from_secs(30));
    }

    #[test]
    fn test_delete_body_wire_shape() {
        let body = DeleteBody { record_ids: &[3, 4] };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"RecordIds": [3, 4]})
        );
    }
}
