//! Key Vault data-plane binding
//!
//! Secret versions are not exposed by Resource Manager. They are read from the
//! vault's own host (`https://{vault}.vault.azure.net`) with a token issued for
//! Key Vault. Listings and fetches never keep the secret value itself.

use super::auth::Credentials;
use super::http::{ArmHttpClient, ArmResponse};
use crate::resource::{Fetched, Page, RemoteBinding, ResourceDef, ResourceType, Scope};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

const VAULT_DNS_SUFFIX: &str = "vault.azure.net";

/// Lists and fetches the versions of one Key Vault secret
pub struct VaultVersionsBinding {
    http: ArmHttpClient,
    credentials: Credentials,
    def: Arc<ResourceDef>,
    /// Fixed vault endpoint; derived from the vault name when unset
    endpoint: Option<Url>,
}

impl VaultVersionsBinding {
    pub fn new(http: ArmHttpClient, credentials: Credentials, def: Arc<ResourceDef>) -> Self {
        Self {
            http,
            credentials,
            def,
            endpoint: None,
        }
    }

    /// Send every request to `endpoint` instead of the vault's public host
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self> {
        let mut url = Url::parse(endpoint)
            .with_context(|| format!("Invalid Key Vault endpoint '{}'", endpoint))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        self.endpoint = Some(url);
        Ok(self)
    }

    /// Vault host and secret name for a scope rooted at a secret
    fn locate(&self, scope: &Scope) -> Result<(Url, String)> {
        let secret = scope
            .parent
            .as_ref()
            .filter(|id| id.resource_type() == ResourceType::new("Microsoft.KeyVault", "vaults/secrets"))
            .with_context(|| format!("{} are only listed under a secret", self.def.display_name))?;
        let vault = secret
            .parent()
            .with_context(|| format!("Secret '{}' has no vault", secret))?;

        let base = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => Url::parse(&format!("https://{}.{}/", vault.name(), VAULT_DNS_SUFFIX))
                .with_context(|| format!("Invalid vault name '{}'", vault.name()))?,
        };
        Ok((base, secret.name().to_string()))
    }

    fn url(&self, base: &Url, path: &str) -> Result<String> {
        let mut url = base
            .join(path)
            .with_context(|| format!("Invalid Key Vault path '{}'", path))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.def.api_version);
        Ok(url.into())
    }

    async fn send_get(&self, url: &str) -> Result<ArmResponse> {
        let token = self.credentials.get_token().await?;
        self.http.send(Method::GET, url, &token, None).await
    }
}

/// Drop the secret value and name the item after the last segment of its id
fn version_item(mut item: Value) -> Value {
    if let Some(fields) = item.as_object_mut() {
        fields.remove("value");
        let version = fields
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| id.trim_end_matches('/').rsplit('/').next())
            .map(str::to_string);
        if let Some(version) = version {
            fields.insert("name".to_string(), Value::String(version));
        }
    }
    item
}

#[async_trait]
impl RemoteBinding for VaultVersionsBinding {
    async fn list_page(&self, scope: &Scope, cursor: Option<&str>) -> Result<Page> {
        let (base, secret) = self.locate(scope)?;
        let url = match cursor {
            Some(link) => {
                let parsed = Url::parse(link)
                    .with_context(|| format!("Invalid continuation link '{}'", link))?;
                if parsed.origin() != base.origin() {
                    bail!("Continuation link points outside the vault");
                }
                link.to_string()
            }
            None => self.url(
                &base,
                &format!("secrets/{}/versions", urlencoding::encode(&secret)),
            )?,
        };

        let response = self
            .send_get(&url)
            .await
            .with_context(|| format!("Failed to list versions of secret '{}'", secret))?
            .error_for_status()?;

        let items = response
            .body
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(version_item)
            .collect();
        let next = response
            .body
            .get("nextLink")
            .and_then(Value::as_str)
            .filter(|link| !link.is_empty())
            .map(str::to_string);

        Ok(Page { items, next })
    }

    async fn get(&self, scope: &Scope, name: &str) -> Result<Fetched> {
        let (base, secret) = self.locate(scope)?;
        let url = self.url(
            &base,
            &format!(
                "secrets/{}/{}",
                urlencoding::encode(&secret),
                urlencoding::encode(name)
            ),
        )?;

        let response = self
            .send_get(&url)
            .await
            .with_context(|| format!("Failed to get version '{}' of secret '{}'", name, secret))?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(Fetched::Absent);
        }
        Ok(Fetched::Found(version_item(response.error_for_status()?.body)))
    }
}
