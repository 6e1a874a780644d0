//! Authentication variants (§4.2) — applied per request by [`crate::SorClient`].

use std::time::Instant;
use tokio::sync::Mutex;

/// How the client authenticates against the SOR instance.
#[derive(Debug, Clone)]
pub enum AuthConfig {
    Basic {
        username: String,
        password: String,
    },
    Oauth {
        client_id: String,
        client_secret: String,
        token_url: String,
    },
}

/// A cached OAuth access token plus its expiry, so repeated requests don't
/// re-run the client-credentials grant every time.
pub(crate) struct CachedToken {
    pub access_token: String,
    pub expires_at: Instant,
}

/// Internal token cache — `None` until the first OAuth request.
pub(crate) type TokenCache = Mutex<Option<CachedToken>>;

#[derive(serde::Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}
