//! Connection Vault persistence (C3 calls into this; C1 owns the secret
//! encryption, this module only stores/retrieves the opaque bytes).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use grc_schemas::{AuthMethod, TestStatus};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConnectionRow {
    pub id: Uuid,
    pub instance_url: String,
    pub auth_method: AuthMethod,
    pub username: Option<String>,
    pub secret_ciphertext: Vec<u8>,
    pub secret_nonce: Vec<u8>,
    pub oauth_client_id: Option<String>,
    pub oauth_token_url: Option<String>,
    pub is_active: bool,
    pub last_test_at: Option<DateTime<Utc>>,
    pub last_test_status: TestStatus,
    pub last_test_message: Option<String>,
    pub last_test_instance_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

/// Input to `save_config` — secrets are already encrypted by the caller
/// (C3), this module never sees plaintext.
#[derive(Debug, Clone)]
pub struct NewConnectionConfig {
    pub instance_url: String,
    pub auth_method: AuthMethod,
    pub username: Option<String>,
    pub secret_ciphertext: Vec<u8>,
    pub secret_nonce: Vec<u8>,
    pub oauth_client_id: Option<String>,
    pub oauth_token_url: Option<String>,
    pub created_by: Option<String>,
}

fn auth_method_str(m: AuthMethod) -> &'static str {
    match m {
        AuthMethod::Basic => "basic",
        AuthMethod::Oauth => "oauth",
    }
}

fn parse_auth_method(s: &str) -> AuthMethod {
    match s {
        "oauth" => AuthMethod::Oauth,
        _ => AuthMethod::Basic,
    }
}

fn parse_test_status(s: &str) -> TestStatus {
    match s {
        "success" => TestStatus::Success,
        "failure" => TestStatus::Failure,
        "pending" => TestStatus::Pending,
        _ => TestStatus::Unknown,
    }
}

fn row_to_connection(row: sqlx::postgres::PgRow) -> Result<ConnectionRow, sqlx::Error> {
    Ok(ConnectionRow {
        id: row.try_get("id")?,
        instance_url: row.try_get("instance_url")?,
        auth_method: parse_auth_method(&row.try_get::<String, _>("auth_method")?),
        username: row.try_get("username")?,
        secret_ciphertext: row.try_get("secret_ciphertext")?,
        secret_nonce: row.try_get("secret_nonce")?,
        oauth_client_id: row.try_get("oauth_client_id")?,
        oauth_token_url: row.try_get("oauth_token_url")?,
        is_active: row.try_get("is_active")?,
        last_test_at: row.try_get("last_test_at")?,
        last_test_status: parse_test_status(&row.try_get::<String, _>("last_test_status")?),
        last_test_message: row.try_get("last_test_message")?,
        last_test_instance_version: row.try_get("last_test_instance_version")?,
        created_at: row.try_get("created_at")?,
        created_by: row.try_get("created_by")?,
    })
}

/// Atomically deactivate any prior active row and insert the new one
/// (§4.3 `save_config`). Returns the newly active row.
pub async fn save_config(pool: &PgPool, cfg: &NewConnectionConfig) -> Result<ConnectionRow> {
    let mut tx = pool.begin().await.context("save_config begin tx failed")?;

    sqlx::query("update connections set is_active = false where is_active")
        .execute(&mut *tx)
        .await
        .context("save_config deactivate prior failed")?;

    let row = sqlx::query(
        r#"
        insert into connections (
            instance_url, auth_method, username, secret_ciphertext, secret_nonce,
            oauth_client_id, oauth_token_url, is_active, last_test_status, created_by
        ) values ($1, $2, $3, $4, $5, $6, $7, true, 'pending', $8)
        returning *
        "#,
    )
    .bind(&cfg.instance_url)
    .bind(auth_method_str(cfg.auth_method))
    .bind(&cfg.username)
    .bind(&cfg.secret_ciphertext)
    .bind(&cfg.secret_nonce)
    .bind(&cfg.oauth_client_id)
    .bind(&cfg.oauth_token_url)
    .bind(&cfg.created_by)
    .fetch_one(&mut *tx)
    .await
    .context("save_config insert failed")?;

    let connection = row_to_connection(row)?;
    tx.commit().await.context("save_config commit failed")?;
    Ok(connection)
}

/// The current active connection, if any.
pub async fn get_active(pool: &PgPool) -> Result<Option<ConnectionRow>> {
    let row = sqlx::query("select * from connections where is_active limit 1")
        .fetch_optional(pool)
        .await
        .context("get_active failed")?;
    row.map(row_to_connection).transpose().map_err(Into::into)
}

/// Persist the outcome of `test_connection` atomically (§4.3).
pub async fn record_test_outcome(
    pool: &PgPool,
    id: Uuid,
    status: TestStatus,
    message: Option<&str>,
    instance_version: Option<&str>,
) -> Result<()> {
    let status_str = match status {
        TestStatus::Success => "success",
        TestStatus::Failure => "failure",
        TestStatus::Pending => "pending",
        TestStatus::Unknown => "unknown",
    };
    sqlx::query(
        r#"
        update connections
        set last_test_at = now(),
            last_test_status = $2,
            last_test_message = $3,
            last_test_instance_version = $4,
            updated_at = now()
        where id = $1
        "#,
    )
    .bind(id)
    .bind(status_str)
    .bind(message)
    .bind(instance_version)
    .execute(pool)
    .await
    .context("record_test_outcome failed")?;
    Ok(())
}

/// Drop the active connection. Idempotent — no error if none exists.
pub async fn delete_active(pool: &PgPool) -> Result<()> {
    sqlx::query("delete from connections where is_active")
        .execute(pool)
        .await
        .context("delete_active failed")?;
    Ok(())
}
