//! Azure Resource Manager client
//!
//! Combines credentials and the HTTP layer, and builds versioned URLs against
//! one management endpoint.

use super::auth::Credentials;
use super::http::{ArmHttpClient, ArmResponse};
use anyhow::{bail, Context, Result};
use reqwest::Method;
use serde_json::Value;
use url::Url;

#[derive(Clone)]
pub struct ArmClient {
    pub credentials: Credentials,
    pub http: ArmHttpClient,
    endpoint: Url,
}

impl ArmClient {
    pub fn new(endpoint: &str, credentials: Credentials) -> Result<Self> {
        let mut endpoint = Url::parse(endpoint)
            .with_context(|| format!("Invalid management endpoint '{}'", endpoint))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self {
            credentials,
            http: ArmHttpClient::new()?,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Absolute URL for a management path with its `api-version`
    pub fn url(&self, path: &str, api_version: &str) -> Result<String> {
        let mut url = self
            .endpoint
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid resource path '{}'", path))?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url.into())
    }

    /// Continuation links must point back at the management endpoint, so a
    /// crafted `nextLink` cannot send the bearer token elsewhere
    pub fn check_same_origin(&self, link: &str) -> Result<()> {
        let url = Url::parse(link).with_context(|| format!("Invalid continuation link '{}'", link))?;
        if url.origin() != self.endpoint.origin() {
            bail!("Continuation link points outside the management endpoint");
        }
        Ok(())
    }

    pub async fn get(&self, url: &str) -> Result<ArmResponse> {
        let token = self.credentials.get_token().await?;
        self.http.send(Method::GET, url, &token, None).await
    }

    pub async fn put(&self, url: &str, body: &Value) -> Result<ArmResponse> {
        let token = self.credentials.get_token().await?;
        self.http.send(Method::PUT, url, &token, Some(body)).await
    }

    pub async fn delete(&self, url: &str) -> Result<ArmResponse> {
        let token = self.credentials.get_token().await?;
        self.http.send(Method::DELETE, url, &token, None).await
    }
}
