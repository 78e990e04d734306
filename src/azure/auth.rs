//! Azure Authentication
//!
//! Bearer tokens come either from a caller-supplied token or from the Azure
//! CLI (`az account get-access-token`). CLI tokens are cached until shortly
//! before they expire.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::RwLock;

/// Resource the management tokens are issued for
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

/// Resource Key Vault data-plane tokens are issued for
pub const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";

/// Refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// TTL used when the CLI does not report an expiry
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Clone)]
enum TokenSource {
    Static(String),
    AzureCli { resource: String },
}

/// Azure credentials holder with token caching
#[derive(Clone)]
pub struct Credentials {
    source: TokenSource,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    /// Epoch seconds; `expiresOn` holds a local-time string and is ignored
    #[serde(default, rename = "expires_on")]
    expires_on: Option<i64>,
}

impl Credentials {
    /// Use a fixed bearer token
    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Static(token.into()),
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Fetch tokens through the Azure CLI for the management endpoint
    pub fn azure_cli() -> Self {
        Self {
            source: TokenSource::AzureCli {
                resource: MANAGEMENT_RESOURCE.to_string(),
            },
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Same token source, issuing tokens for another resource. Fixed tokens
    /// are reused as they are.
    pub fn for_resource(&self, resource: &str) -> Self {
        let source = match &self.source {
            TokenSource::Static(token) => TokenSource::Static(token.clone()),
            TokenSource::AzureCli { .. } => TokenSource::AzureCli {
                resource: resource.to_string(),
            },
        };
        Self {
            source,
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Get an access token for API calls
    pub async fn get_token(&self) -> Result<String> {
        let resource = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::AzureCli { resource } => resource,
        };

        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let fetched = fetch_cli_token(resource).await?;
        let ttl = fetched
            .expires_on
            .and_then(|epoch| DateTime::<Utc>::from_timestamp(epoch, 0))
            .and_then(|expiry| (expiry - Utc::now()).to_std().ok())
            .unwrap_or(DEFAULT_TOKEN_TTL);
        let expires_at = Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_BUFFER);

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: fetched.access_token.clone(),
                expires_at,
            });
        }

        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            ttl.saturating_sub(TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(fetched.access_token)
    }

    /// Force refresh the token
    pub async fn refresh_token(&self) -> Result<String> {
        {
            let mut cache = self.token_cache.write().await;
            *cache = None;
        }
        self.get_token().await
    }
}

async fn fetch_cli_token(resource: &str) -> Result<CliToken> {
    let output = Command::new("az")
        .args(["account", "get-access-token", "--output", "json", "--resource", resource])
        .output()
        .await
        .context("Failed to run the Azure CLI. Install it or pass --token")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "Azure CLI could not issue a token. Run 'az login'. ({})",
            stderr.trim()
        );
    }

    serde_json::from_slice(&output.stdout).context("Failed to parse Azure CLI token output")
}

/// Get the Azure CLI configuration directory
pub fn get_azure_config_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("AZURE_CONFIG_DIR") {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|p| p.join(".azure"))
}

/// Subscription IDs are GUIDs
fn validate_subscription_id(subscription: &str) -> bool {
    subscription.len() == 36
        && subscription.chars().enumerate().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureProfile {
    #[serde(default)]
    subscriptions: Vec<ProfileSubscription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileSubscription {
    id: String,
    #[serde(default)]
    is_default: bool,
}

/// Read the default subscription from the environment or the Azure CLI profile
pub fn get_default_subscription() -> Option<String> {
    if let Ok(subscription) = std::env::var("AZURE_SUBSCRIPTION_ID") {
        if validate_subscription_id(&subscription) {
            return Some(subscription);
        }
        tracing::warn!("Invalid subscription ID format in AZURE_SUBSCRIPTION_ID");
    }

    let profile_path = get_azure_config_dir()?.join("azureProfile.json");
    let content = std::fs::read_to_string(&profile_path).ok()?;
    // The CLI writes this file with a UTF-8 BOM
    let profile: AzureProfile = serde_json::from_str(content.trim_start_matches('\u{feff}')).ok()?;

    profile
        .subscriptions
        .into_iter()
        .find(|s| s.is_default)
        .map(|s| s.id)
        .filter(|id| validate_subscription_id(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_subscription_id() {
        assert!(validate_subscription_id("00000000-1111-2222-3333-444444444444"));
        assert!(!validate_subscription_id("not-a-guid"));
        assert!(!validate_subscription_id("00000000x1111-2222-3333-444444444444"));
    }

    #[tokio::test]
    async fn test_static_token_is_returned_as_is() {
        let creds = Credentials::from_token("abc");
        assert_eq!(creds.get_token().await.unwrap(), "abc");
        assert_eq!(creds.refresh_token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_for_resource_keeps_fixed_token() {
        let creds = Credentials::from_token("abc").for_resource(KEY_VAULT_RESOURCE);
        assert_eq!(creds.get_token().await.unwrap(), "abc");
    }

    #[test]
    fn test_for_resource_retargets_cli_tokens() {
        let creds = Credentials::azure_cli().for_resource(KEY_VAULT_RESOURCE);
        match creds.source {
            TokenSource::AzureCli { resource } => assert_eq!(resource, KEY_VAULT_RESOURCE),
            TokenSource::Static(_) => panic!("expected a CLI token source"),
        }
    }

    #[test]
    fn test_cli_token_output_parses() {
        let token: CliToken =
            serde_json::from_str(r#"{"accessToken":"t","expiresOn":"2023-11-14 22:13:20.000000","expires_on":1700000000}"#)
                .unwrap();
        assert_eq!(token.access_token, "t");
        assert_eq!(token.expires_on, Some(1700000000));
    }
}
