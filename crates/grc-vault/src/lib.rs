//! Connection Vault (C3) — single active SOR connection, admin-style API.
//!
//! Mints a configured [`grc_sor_client::SorClient`] on demand from the
//! decrypted secret; the plaintext secret never leaves this function's
//! stack frame — it is not returned, logged, or persisted (§4.3).

use chrono::{DateTime, Utc};
use grc_crypto::EncryptionKey;
use grc_schemas::{AuthMethod, TestStatus};
use grc_sor_client::{AuthConfig, ClientConfig, SorClient, TestConnectionResult};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// `save_config` received a structurally invalid input.
    Validation(Vec<(String, String)>),
    /// An operation that requires an active connection found none.
    NotConfigured,
    /// `get_client` couldn't decrypt the stored secret (wrong key, corrupt row).
    DecryptionFailed,
}

impl std::fmt::Display for VaultError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultError::Validation(fields) => write!(f, "validation_failed: {fields:?}"),
            VaultError::NotConfigured => write!(f, "connection_not_configured"),
            VaultError::DecryptionFailed => write!(f, "connection_decryption_failed"),
        }
    }
}

impl std::error::Error for VaultError {}

/// Caller-supplied input to `save_config`. Secrets arrive as plaintext and
/// are encrypted before ever reaching the store.
#[derive(Debug, Clone)]
pub struct ConfigInput {
    pub instance_url: String,
    pub auth_method: AuthMethod,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_url: Option<String>,
}

impl ConfigInput {
    /// Structural validation (§4.3 precondition `input.validate()`).
    pub fn validate(&self) -> Result<(), VaultError> {
        let mut errors = Vec::new();
        if self.instance_url.trim().is_empty() {
            errors.push(("instance_url".to_string(), "must not be empty".to_string()));
        }
        if !self.instance_url.starts_with("http://") && !self.instance_url.starts_with("https://") {
            errors.push(("instance_url".to_string(), "must be an http(s) URL".to_string()));
        }
        match self.auth_method {
            AuthMethod::Basic => {
                if self.username.as_deref().unwrap_or("").is_empty() {
                    errors.push(("username".to_string(), "required for basic auth".to_string()));
                }
                if self.password.as_deref().unwrap_or("").is_empty() {
                    errors.push(("password".to_string(), "required for basic auth".to_string()));
                }
            }
            AuthMethod::Oauth => {
                if self.client_id.as_deref().unwrap_or("").is_empty() {
                    errors.push(("client_id".to_string(), "required for oauth".to_string()));
                }
                if self.client_secret.as_deref().unwrap_or("").is_empty() {
                    errors.push(("client_secret".to_string(), "required for oauth".to_string()));
                }
                if self.token_url.as_deref().unwrap_or("").is_empty() {
                    errors.push(("token_url".to_string(), "required for oauth".to_string()));
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(VaultError::Validation(errors))
        }
    }

    fn secret(&self) -> &str {
        match self.auth_method {
            AuthMethod::Basic => self.password.as_deref().unwrap_or(""),
            AuthMethod::Oauth => self.client_secret.as_deref().unwrap_or(""),
        }
    }
}

/// `connection.getStatus()` response.
#[derive(Debug, Clone)]
pub struct Status {
    pub is_configured: bool,
    pub instance_url: Option<String>,
    pub auth_method: Option<AuthMethod>,
    pub last_test_at: Option<DateTime<Utc>>,
    pub last_test_status: TestStatus,
    pub last_test_message: Option<String>,
    pub last_test_instance_version: Option<String>,
}

/// Vault operations, backed by a Postgres pool and a fixed encryption key.
pub struct Vault {
    pool: PgPool,
    key: EncryptionKey,
    client_config: ClientConfig,
}

impl Vault {
    pub fn new(pool: PgPool, key: EncryptionKey, client_config: ClientConfig) -> Self {
        Self { pool, key, client_config }
    }

    pub async fn get_status(&self) -> anyhow::Result<Status> {
        let active = grc_store::connections::get_active(&self.pool).await?;
        Ok(match active {
            None => Status {
                is_configured: false,
                instance_url: None,
                auth_method: None,
                last_test_at: None,
                last_test_status: TestStatus::Unknown,
                last_test_message: None,
                last_test_instance_version: None,
            },
            Some(row) => Status {
                is_configured: true,
                instance_url: Some(row.instance_url),
                auth_method: Some(row.auth_method),
                last_test_at: row.last_test_at,
                last_test_status: row.last_test_status,
                last_test_message: row.last_test_message,
                last_test_instance_version: row.last_test_instance_version,
            },
        })
    }

    pub async fn save_config(&self, input: ConfigInput) -> Result<grc_store::ConnectionRow, VaultError> {
        input.validate()?;

        let (ciphertext, nonce) = grc_crypto::encrypt_str(&self.key, input.secret())
            .map_err(|_| VaultError::DecryptionFailed)?;

        let username = match input.auth_method {
            AuthMethod::Basic => input.username.clone(),
            AuthMethod::Oauth => None,
        };

        let cfg = grc_store::connections::NewConnectionConfig {
            instance_url: input.instance_url.clone(),
            auth_method: input.auth_method,
            username,
            secret_ciphertext: ciphertext,
            secret_nonce: nonce,
            oauth_client_id: input.client_id.clone(),
            oauth_token_url: input.token_url.clone(),
            created_by: None,
        };

        let row = grc_store::connections::save_config(&self.pool, &cfg)
            .await
            .map_err(|_| VaultError::DecryptionFailed)?;
        info!(connection_id = %row.id, "saved SOR connection config");
        Ok(row)
    }

    /// Build a live `SorClient` from the decrypted active connection. The
    /// plaintext secret is consumed immediately into the client and never
    /// returned.
    pub async fn get_client(&self) -> Result<SorClient, VaultError> {
        let row = grc_store::connections::get_active(&self.pool)
            .await
            .map_err(|_| VaultError::NotConfigured)?
            .ok_or(VaultError::NotConfigured)?;

        let secret = grc_crypto::decrypt_str(&self.key, &row.secret_ciphertext, &row.secret_nonce)
            .map_err(|_| VaultError::DecryptionFailed)?;

        let auth = match row.auth_method {
            AuthMethod::Basic => AuthConfig::Basic {
                username: row.username.clone().unwrap_or_default(),
                password: secret,
            },
            AuthMethod::Oauth => AuthConfig::Oauth {
                client_id: row.oauth_client_id.clone().unwrap_or_default(),
                client_secret: secret,
                token_url: row.oauth_token_url.clone().unwrap_or_default(),
            },
        };

        SorClient::new(row.instance_url.clone(), auth, self.client_config.clone()).map_err(|_| VaultError::DecryptionFailed)
    }

    /// `connection.testConnection()` — builds a client, calls
    /// `test_connection`, and persists the outcome atomically.
    pub async fn test_connection(&self, connection_id: Uuid) -> Result<TestConnectionResult, VaultError> {
        let client = self.get_client().await?;
        match client.test_connection().await {
            Ok(result) => {
                grc_store::connections::record_test_outcome(
                    &self.pool,
                    connection_id,
                    TestStatus::Success,
                    None,
                    Some(&result.version),
                )
                .await
                .map_err(|_| VaultError::DecryptionFailed)?;
                Ok(result)
            }
            Err(e) => {
                warn!(error = %e, "SOR connection test failed");
                grc_store::connections::record_test_outcome(&self.pool, connection_id, TestStatus::Failure, Some(&e.to_string()), None)
                    .await
                    .map_err(|_| VaultError::DecryptionFailed)?;
                Err(VaultError::NotConfigured)
            }
        }
    }

    /// Drop the active connection. Idempotent (§4.3).
    pub async fn delete(&self) -> anyhow::Result<()> {
        grc_store::connections::delete_active(&self.pool).await
    }
}

/// Default `ClientConfig` built from environment knobs (§6): `sor.timeout`
/// (30s), `sor.max_retries` (3), `sor.page_size` (100).
pub fn default_client_config() -> ClientConfig {
    ClientConfig {
        timeout: Duration::from_secs(30),
        max_retries: 3,
        page_size: 100,
    }
}
