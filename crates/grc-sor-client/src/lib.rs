//! SOR Client (C2) — authenticated, retrying, paginated HTTP access to the
//! SOR's ServiceNow-shaped tabular API (§4.2, §6).
//!
//! `SorClient` is the only place that speaks HTTP to the SOR. Every other
//! component (`grc-pull`, `grc-push`, `grc-vault`) depends on this crate's
//! trait-free, concrete client — there is exactly one SOR, so there's no
//! adapter trait to implement here.

mod auth;
mod error;
mod pagination;

pub use auth::AuthConfig;
pub use error::SorError;
pub use pagination::{clamp_page_size, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

use auth::{CachedToken, TokenCache, TokenResponse};
use grc_schemas::{Page, SorControl, SorInstanceInfo, SorStatement, SorSystem, SorUpdateResult};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Result of `test_connection()` (§4.2, §8 scenario 1).
#[derive(Debug, Clone)]
pub struct TestConnectionResult {
    pub version: String,
    pub build_tag: String,
    pub response_time_ms: u64,
}

/// Tunables recognized from config (§6 "Environment knobs").
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Authenticated, retrying, paginated HTTP client for one SOR instance.
pub struct SorClient {
    http: reqwest::Client,
    instance_url: String,
    auth: AuthConfig,
    config: ClientConfig,
    oauth_token: TokenCache,
}

impl SorClient {
    pub fn new(instance_url: impl Into<String>, auth: AuthConfig, config: ClientConfig) -> Result<Self, SorError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SorError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            auth,
            config,
            oauth_token: Mutex::new(None),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/api/now/table/{}", self.instance_url, table)
    }

    /// Apply auth to an outbound request, minting/caching an OAuth token if needed.
    async fn authorize(&self, mut req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, SorError> {
        match &self.auth {
            AuthConfig::Basic { username, password } => {
                req = req.basic_auth(username, Some(password));
            }
            AuthConfig::Oauth { .. } => {
                let token = self.ensure_oauth_token().await?;
                req = req.bearer_auth(token);
            }
        }
        Ok(req)
    }

    /// Client-credentials grant (RFC 6749) against `token_url`, cached until
    /// 30s before expiry.
    async fn ensure_oauth_token(&self) -> Result<String, SorError> {
        let AuthConfig::Oauth {
            client_id,
            client_secret,
            token_url,
        } = &self.auth
        else {
            unreachable!("ensure_oauth_token only called for AuthConfig::Oauth")
        };

        {
            let guard = self.oauth_token.lock().await;
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let resp = self
            .http
            .post(token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(map_reqwest_err)?;

        if let Some(err) = error::classify_status(resp.status(), retry_after_secs(&resp)) {
            return Err(err);
        }

        let token: TokenResponse = resp.json().await.map_err(|e| SorError::Decode(e.to_string()))?;
        let mut guard = self.oauth_token.lock().await;
        *guard = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(30)),
        });
        Ok(token.access_token)
    }

    /// `test_connection()` — lightweight discovery endpoint (§6).
    pub async fn test_connection(&self) -> Result<TestConnectionResult, SorError> {
        let started = Instant::now();
        let url = format!("{}/api/now/table/sys_properties", self.instance_url);
        let req = self.authorize(self.http.get(&url).query(&[("sysparm_limit", "1")])).await?;
        let resp = self.send_with_retry_for_get(req).await?;
        let info: SorInstanceInfo = resp.json().await.map_err(|e| SorError::Decode(e.to_string()))?;
        Ok(TestConnectionResult {
            version: info.version,
            build_tag: info.build_tag,
            response_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub async fn fetch_systems(&self, offset: u64, page_size: usize) -> Result<Page<SorSystem>, SorError> {
        self.fetch_table_page("cmdb_ci_service", &[], offset, page_size).await
    }

    pub async fn fetch_controls(&self, system_sor_id: &str, offset: u64, page_size: usize) -> Result<Page<SorControl>, SorError> {
        let filter = format!("parent_system={system_sor_id}");
        self.fetch_table_page("sn_compliance_control", &[("sysparm_query", filter.as_str())], offset, page_size)
            .await
    }

    pub async fn fetch_statements(&self, control_sor_id: &str, offset: u64, page_size: usize) -> Result<Page<SorStatement>, SorError> {
        let filter = format!("control={control_sor_id}");
        self.fetch_table_page(
            "sn_compliance_statement",
            &[("sysparm_query", filter.as_str())],
            offset,
            page_size,
        )
        .await
    }

    /// `PUT .../api/now/table/{table}/{sys_id}` — NOT retried on 5xx: a
    /// non-idempotent write whose prior attempt may already have landed
    /// must not be blindly resent (§4.2).
    pub async fn update_statement(&self, sor_id: &str, content: &str) -> Result<SorUpdateResult, SorError> {
        let url = format!("{}/{}", self.table_url("sn_compliance_statement"), sor_id);
        let body = json!({ "content": content });
        let req = self.authorize(self.http.put(&url).json(&body)).await?;
        let resp = req.send().await.map_err(map_reqwest_err)?;
        if let Some(err) = error::classify_status(resp.status(), retry_after_secs(&resp)) {
            return Err(err);
        }
        #[derive(serde::Deserialize)]
        struct Wrapper {
            result: SorUpdateResult,
        }
        let wrapper: Wrapper = resp.json().await.map_err(|e| SorError::Decode(e.to_string()))?;
        Ok(wrapper.result)
    }

    async fn fetch_table_page<T: DeserializeOwned>(
        &self,
        table: &str,
        extra_query: &[(&str, &str)],
        offset: u64,
        page_size: usize,
    ) -> Result<Page<T>, SorError> {
        let offset_s = offset.to_string();
        let limit_s = clamp_page_size(page_size).to_string();
        let mut query: Vec<(&str, &str)> = vec![("sysparm_offset", offset_s.as_str()), ("sysparm_limit", limit_s.as_str())];
        query.extend_from_slice(extra_query);

        let url = self.table_url(table);
        let req = self.authorize(self.http.get(&url).query(&query)).await?;
        let resp = self.send_with_retry_for_get(req).await?;

        let total_count = resp
            .headers()
            .get("X-Total-Count")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        #[derive(serde::Deserialize)]
        struct Wrapper<T> {
            result: Vec<T>,
        }
        let wrapper: Wrapper<T> = resp.json().await.map_err(|e| SorError::Decode(e.to_string()))?;
        Ok(Page {
            items: wrapper.result,
            total_count,
        })
    }

    /// Idempotent-GET retry policy (§4.2): exponential backoff, initial
    /// ~500ms, capped at ~8s, up to `max_retries` additional attempts, on
    /// transport errors, 5xx, and 429.
    async fn send_with_retry_for_get(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, SorError> {
        let mut backoff = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(8))
            .with_max_elapsed_time(None)
            .build();

        let mut attempt: u32 = 0;
        loop {
            let attempt_req = req
                .try_clone()
                .expect("GET request bodies are always clone-able");
            let result = attempt_req.send().await;

            let outcome = match result {
                Ok(resp) => match error::classify_status(resp.status(), retry_after_secs(&resp)) {
                    None => Ok(resp),
                    Some(err) => Err(err),
                },
                Err(e) => Err(map_reqwest_err(e)),
            };

            match outcome {
                Ok(resp) => return Ok(resp),
                Err(err) if attempt < self.config.max_retries && err.is_retryable_for_get() => {
                    attempt += 1;
                    let wait = backoff::backoff::Backoff::next_backoff(&mut backoff).unwrap_or(Duration::from_secs(8));
                    warn!(attempt, ?wait, error = %err, "retrying SOR GET");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Err(err) => {
                    debug!(error = %err, "SOR GET failed, not retrying");
                    return Err(err);
                }
            }
        }
    }
}

fn map_reqwest_err(e: reqwest::Error) -> SorError {
    if e.is_timeout() {
        SorError::Timeout
    } else {
        SorError::Transport(e.to_string())
    }
}

fn retry_after_secs(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}
