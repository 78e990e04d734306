//! REST binding
//!
//! Implements [`RemoteBinding`] for any [`ResourceDef`] against the Resource
//! Manager conventions: `value`/`nextLink` paging, 404 for missing resources
//! and 202 for accepted long-running operations.

use super::auth::KEY_VAULT_RESOURCE;
use super::client::ArmClient;
use super::keyvault::VaultVersionsBinding;
use crate::resource::{
    Applied, Deleted, Fetched, Page, Plane, Registry, RemoteBinding, ResourceConfig, ResourceDef,
    ResourceId, ResourceKind, Scope,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;

pub struct RestBinding {
    client: ArmClient,
    def: Arc<ResourceDef>,
}

impl RestBinding {
    pub fn new(client: ArmClient, def: Arc<ResourceDef>) -> Self {
        Self { client, def }
    }

    /// Management path of the collection holding this kind under `scope`
    pub fn collection_path(&self, scope: &Scope) -> Result<String> {
        let parent = scope.effective_parent();
        match (&self.def.collection, &parent) {
            (Some(collection), Some(parent)) => Ok(format!("{}/{}", parent, collection)),
            _ => ResourceId::collection_path(parent.as_ref(), &self.def.resource_type())
                .with_context(|| format!("Cannot address {}", self.def.display_name)),
        }
    }

    fn item_url(&self, scope: &Scope, name: &str) -> Result<String> {
        let path = if self.def.generic {
            // Generic items are addressed by their full id
            name.to_string()
        } else {
            format!(
                "{}/{}",
                self.collection_path(scope)?,
                urlencoding::encode(name)
            )
        };
        self.client.url(&path, &self.def.api_version)
    }
}

#[async_trait]
impl RemoteBinding for RestBinding {
    async fn list_page(&self, scope: &Scope, cursor: Option<&str>) -> Result<Page> {
        let url = match cursor {
            Some(link) => {
                self.client.check_same_origin(link)?;
                link.to_string()
            }
            None => self
                .client
                .url(&self.collection_path(scope)?, &self.def.api_version)?,
        };

        let response = self
            .client
            .get(&url)
            .await
            .with_context(|| format!("Failed to list {}", self.def.display_name))?
            .error_for_status()?;

        let items = response
            .body
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next = response
            .body
            .get("nextLink")
            .and_then(Value::as_str)
            .filter(|link| !link.is_empty())
            .map(str::to_string);

        Ok(Page { items, next })
    }

    fn supports_get(&self) -> bool {
        self.def.supports_get
    }

    async fn get(&self, scope: &Scope, name: &str) -> Result<Fetched> {
        let response = self
            .client
            .get(&self.item_url(scope, name)?)
            .await
            .with_context(|| format!("Failed to get {} '{}'", self.def.display_name, name))?;

        if response.status == StatusCode::NOT_FOUND {
            return Ok(Fetched::Absent);
        }
        Ok(Fetched::Found(response.error_for_status()?.body))
    }

    async fn create_or_update(&self, scope: &Scope, name: &str, desired: &Value) -> Result<Applied> {
        let response = self
            .client
            .put(&self.item_url(scope, name)?, desired)
            .await
            .with_context(|| format!("Failed to write {} '{}'", self.def.display_name, name))?
            .error_for_status()?;

        let body = Some(response.body).filter(|body| !body.is_null());
        match (response.status, body) {
            (StatusCode::ACCEPTED, body) => Ok(Applied::Accepted(body)),
            (_, Some(body)) => Ok(Applied::Completed(body)),
            (_, None) => Ok(Applied::Accepted(None)),
        }
    }

    async fn delete(&self, scope: &Scope, name: &str) -> Result<Deleted> {
        let response = self
            .client
            .delete(&self.item_url(scope, name)?)
            .await
            .with_context(|| format!("Failed to delete {} '{}'", self.def.display_name, name))?;

        if response.status == StatusCode::NOT_FOUND {
            return Ok(Deleted::AlreadyAbsent);
        }
        response.error_for_status()?;
        Ok(Deleted::Removed)
    }
}

/// Registry with every definition bound through `client`: management kinds
/// to the REST API, Key Vault kinds to the vault's data plane
pub fn arm_registry(client: &ArmClient, config: &ResourceConfig) -> Registry {
    let vault_credentials = client.credentials.for_resource(KEY_VAULT_RESOURCE);
    let mut registry = Registry::new();
    for def in config.resources.values() {
        let def = Arc::new(def.clone());
        let remote: Arc<dyn RemoteBinding> = match def.plane {
            Plane::Management => Arc::new(RestBinding::new(client.clone(), def.clone())),
            Plane::KeyVault => Arc::new(VaultVersionsBinding::new(
                client.http.clone(),
                vault_credentials.clone(),
                def.clone(),
            )),
        };
        registry.register(def, remote);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::auth::Credentials;
    use crate::resource::{builtin_definitions, ResourceType};

    fn binding(key: &str) -> RestBinding {
        let client =
            ArmClient::new("https://management.azure.com/", Credentials::from_token("t")).unwrap();
        let def = builtin_definitions().resources.get(key).unwrap().clone();
        RestBinding::new(client, Arc::new(def))
    }

    #[test]
    fn test_nested_collection_path() {
        let server = ResourceId::resource_group("s", "rg")
            .child(&ResourceType::new("Microsoft.DBforPostgreSQL", "servers"), "pg")
            .unwrap();
        let path = binding("postgres-databases")
            .collection_path(&Scope::under(&server))
            .unwrap();
        assert_eq!(
            path,
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.DBforPostgreSQL/servers/pg/databases"
        );
    }

    #[test]
    fn test_generic_collection_uses_override() {
        let scope = Scope::under(&ResourceId::subscription("s"));
        let generic = binding("generic-resources");
        assert_eq!(generic.collection_path(&scope).unwrap(), "/subscriptions/s/resources");
        assert_eq!(
            generic
                .collection_path(&scope.with_resource_group(Some("rg")))
                .unwrap(),
            "/subscriptions/s/resourceGroups/rg/resources"
        );
    }

    #[test]
    fn test_service_collection_override() {
        let account = ResourceId::resource_group("s", "rg")
            .child(&ResourceType::new("Microsoft.Storage", "storageAccounts"), "logs")
            .unwrap();
        let path = binding("storage-containers")
            .collection_path(&Scope::under(&account))
            .unwrap();
        assert_eq!(
            path,
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/logs/blobServices/default/containers"
        );
    }

    #[test]
    fn test_item_names_are_encoded() {
        let scope = Scope::under(&ResourceId::resource_group("s", "rg"));
        let url = binding("webapps").item_url(&scope, "my app").unwrap();
        assert!(url.contains("/providers/Microsoft.Web/sites/my%20app?api-version="));
    }

    #[test]
    fn test_registry_binds_every_definition() {
        let client =
            ArmClient::new("https://management.azure.com/", Credentials::from_token("t")).unwrap();
        let registry = arm_registry(&client, builtin_definitions());
        assert_eq!(registry.keys().len(), builtin_definitions().resources.len());
        assert!(registry.kind("subscriptions").is_some());
    }
}
