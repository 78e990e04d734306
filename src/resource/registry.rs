//! Resource Registry - kind adapters, remote bindings and type resolvers
//!
//! Kinds are described by [`ResourceKind`]. The stock implementation,
//! [`ResourceDef`], is data-driven: definitions are loaded from JSON embedded at
//! compile time, so new ARM resource kinds need no code. The [`Registry`] is
//! built explicitly and handed to the tree; nothing here is looked up through
//! global state except the embedded definitions themselves.

use super::entity::Resource;
use super::error::{Remediation, Result};
use super::identity::{ResourceId, ResourceType};
use super::remote::{RemoteBinding, Scope};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[include_str!("../resources/azure.json")];

/// Provisioning states after which a resource is no longer changing
const SETTLED_STATES: &[&str] = &["Succeeded", "Failed", "Canceled", "Cancelled", "Ready"];

const DEFAULT_STATUS_PATH: &str = "properties.provisioningState";

/// Capabilities a resource kind supplies to the generic core
pub trait ResourceKind: Send + Sync {
    /// Registry key, e.g. `postgres-databases`
    fn key(&self) -> &str;

    fn display_name(&self) -> &str;

    fn resource_type(&self) -> ResourceType;

    /// Registry keys of the child modules every resource of this kind exposes
    fn child_kinds(&self) -> &[String] {
        &[]
    }

    /// Name of a raw item as used by the remote API
    fn name_of(&self, raw: &Value) -> Option<String> {
        raw.get("name").and_then(Value::as_str).map(str::to_string)
    }

    fn child_id(&self, parent: Option<&ResourceId>, name: &str) -> Result<ResourceId> {
        match parent {
            Some(parent) => parent.child(&self.resource_type(), name),
            None => Ok(ResourceId::subscription(name)),
        }
    }

    fn id_of(&self, parent: Option<&ResourceId>, raw: &Value) -> Option<ResourceId> {
        let name = self.name_of(raw)?;
        self.child_id(parent, &name).ok()
    }

    /// Name to hand to the remote binding for a resource of this kind
    fn remote_name(&self, id: &ResourceId) -> String {
        id.name().to_string()
    }

    /// False while the snapshot reports an in-flight provisioning operation
    fn is_settled(&self, raw: &Value) -> bool {
        provisioning_settled(raw, DEFAULT_STATUS_PATH)
    }

    /// Desired state sent to the remote: `current` overlaid with `changes`
    fn encode(&self, current: Option<&Value>, changes: &Map<String, Value>) -> Value {
        let mut desired = current
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        for (path, value) in changes {
            assign_path(&mut desired, path, value.clone());
        }
        desired
    }

    fn required_fields(&self) -> &[String] {
        &[]
    }

    /// Local checks run before any remote call
    fn validate(&self, desired: &Value) -> std::result::Result<(), String> {
        let missing: Vec<&str> = self
            .required_fields()
            .iter()
            .filter(|path| lookup_path(desired, path).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "{} is missing required field(s): {}",
                self.display_name(),
                missing.join(", ")
            ))
        }
    }

    /// Whether the remote deletes children together with their parent
    fn cascades_delete(&self) -> bool {
        true
    }

    /// Why resources of this kind cannot be created, updated or deleted here;
    /// `None` when they can
    fn read_only_reason(&self) -> Option<String> {
        None
    }

    /// Actions offered when access to `scope` is denied
    fn remediation(&self, scope: &Scope, docs_url: &str) -> Vec<Remediation> {
        let target = scope
            .parent
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        vec![
            Remediation::configure_access(target),
            Remediation::learn_more(docs_url),
        ]
    }
}

/// Resource definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    /// Filled from the map key when loaded
    #[serde(skip)]
    pub key: String,
    pub display_name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub type_path: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Collection segment overriding the one derived from the type
    #[serde(default)]
    pub collection: Option<String>,
    /// Items are heterogeneous and identified by their full `id`
    #[serde(default)]
    pub generic: bool,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default = "default_true")]
    pub cascade_delete: bool,
    #[serde(default = "default_true")]
    pub supports_get: bool,
    #[serde(default)]
    pub status_path: Option<String>,
    #[serde(default)]
    pub access_docs_url: Option<String>,
    /// Listed and fetched only; writes are rejected before reaching the remote
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub plane: Plane,
}

/// API surface a definition is served from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Plane {
    /// Resource Manager, addressed by resource id
    #[default]
    Management,
    /// Key Vault data plane, addressed through the vault's own host
    KeyVault,
}

fn default_api_version() -> String {
    "2021-04-01".to_string()
}

fn default_true() -> bool {
    true
}

impl ResourceDef {
    pub fn new(key: &str, display_name: &str, resource_type: &ResourceType) -> Self {
        Self {
            key: key.to_string(),
            display_name: display_name.to_string(),
            namespace: resource_type.namespace().to_string(),
            type_path: resource_type.kind().to_string(),
            api_version: default_api_version(),
            collection: None,
            generic: false,
            children: Vec::new(),
            required_fields: Vec::new(),
            cascade_delete: true,
            supports_get: true,
            status_path: None,
            access_docs_url: None,
            read_only: false,
            plane: Plane::Management,
        }
    }

    pub fn with_children(mut self, children: &[&str]) -> Self {
        self.children = children.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_required_fields(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_collection(mut self, collection: &str) -> Self {
        self.collection = Some(collection.to_string());
        self
    }

    /// The remote does not remove children when the parent is deleted
    pub fn without_cascade(mut self) -> Self {
        self.cascade_delete = false;
        self
    }

    pub fn generic(mut self) -> Self {
        self.generic = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

impl ResourceKind for ResourceDef {
    fn key(&self) -> &str {
        &self.key
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn resource_type(&self) -> ResourceType {
        ResourceType::new(self.namespace.clone(), self.type_path.clone())
    }

    fn child_kinds(&self) -> &[String] {
        &self.children
    }

    fn name_of(&self, raw: &Value) -> Option<String> {
        let field = if self.generic { "id" } else { "name" };
        raw.get(field).and_then(Value::as_str).map(str::to_string)
    }

    fn child_id(&self, parent: Option<&ResourceId>, name: &str) -> Result<ResourceId> {
        if self.generic {
            return ResourceId::parse(name);
        }
        match (parent, &self.collection) {
            (Some(parent), Some(collection)) => parent.child_in(collection, name),
            (Some(parent), None) => parent.child(&self.resource_type(), name),
            (None, _) => Ok(ResourceId::subscription(name)),
        }
    }

    fn remote_name(&self, id: &ResourceId) -> String {
        if self.generic {
            id.to_string()
        } else {
            id.name().to_string()
        }
    }

    fn is_settled(&self, raw: &Value) -> bool {
        provisioning_settled(raw, self.status_path.as_deref().unwrap_or(DEFAULT_STATUS_PATH))
    }

    fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    fn cascades_delete(&self) -> bool {
        self.cascade_delete
    }

    fn read_only_reason(&self) -> Option<String> {
        if self.generic {
            // The generic listing carries no provider api-version to write with
            Some(format!(
                "{} entries are listed generically; resolve the resource to its concrete kind to change it",
                self.display_name
            ))
        } else if self.read_only {
            Some(format!("{} resources are read-only", self.display_name))
        } else {
            None
        }
    }

    fn remediation(&self, scope: &Scope, docs_url: &str) -> Vec<Remediation> {
        let target = scope
            .parent
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let docs = self.access_docs_url.as_deref().unwrap_or(docs_url);
        vec![
            Remediation::configure_access(target),
            Remediation::learn_more(docs),
        ]
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub resources: HashMap<String, ResourceDef>,
}

impl ResourceConfig {
    /// Parse a definitions document, filling each definition's key
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut config: ResourceConfig = serde_json::from_str(content)?;
        for (key, def) in config.resources.iter_mut() {
            def.key = key.clone();
        }
        Ok(config)
    }
}

/// Global registry loaded from JSON
static DEFINITIONS: OnceLock<ResourceConfig> = OnceLock::new();

/// Built-in definitions (loads from embedded JSON on first access)
pub fn builtin_definitions() -> &'static ResourceConfig {
    DEFINITIONS.get_or_init(|| {
        let mut final_config = ResourceConfig::default();
        for content in RESOURCE_FILES {
            let partial = ResourceConfig::parse(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded resource JSON: {}", e));
            final_config.resources.extend(partial.resources);
        }
        final_config
    })
}

/// Resolves an identifier to its concrete, typed resource
pub type Resolver =
    Arc<dyn Fn(ResourceId) -> BoxFuture<'static, Result<Option<Arc<Resource>>>> + Send + Sync>;

/// A kind adapter paired with its remote binding
pub struct KindBinding {
    pub kind: Arc<dyn ResourceKind>,
    pub remote: Arc<dyn RemoteBinding>,
}

/// Explicit registry of kinds and type resolvers
#[derive(Default)]
pub struct Registry {
    kinds: HashMap<String, Arc<KindBinding>>,
    resolvers: HashMap<String, Resolver>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: Arc<dyn ResourceKind>,
        remote: Arc<dyn RemoteBinding>,
    ) -> &mut Self {
        let key = kind.key().to_string();
        self.kinds.insert(key, Arc::new(KindBinding { kind, remote }));
        self
    }

    /// Register a resolver for a full resource type such as `Microsoft.Web/sites`
    pub fn register_resolver(&mut self, resource_type: &str, resolver: Resolver) -> &mut Self {
        self.resolvers
            .insert(resource_type.to_ascii_lowercase(), resolver);
        self
    }

    pub fn kind(&self, key: &str) -> Option<&Arc<KindBinding>> {
        self.kinds.get(key)
    }

    /// Typed (non-generic) kind registered for `resource_type`
    pub fn kind_for_type(&self, resource_type: &ResourceType) -> Option<&Arc<KindBinding>> {
        self.kinds
            .values()
            .find(|binding| binding.kind.resource_type() == *resource_type)
    }

    pub fn resolver(&self, resource_type: &ResourceType) -> Option<&Resolver> {
        self.resolvers.get(&resource_type.full().to_ascii_lowercase())
    }

    /// All kind keys, sorted (for autocomplete)
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Look up a value using a dot-notation path
pub fn lookup_path<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(item, |current, part| match part.parse::<usize>() {
        Ok(idx) if current.is_array() => current.get(idx),
        _ => current.get(part),
    })
}

/// Set a value at a dot-notation path, creating intermediate objects
pub fn assign_path(item: &mut Value, path: &str, value: Value) {
    let mut current = item;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

fn provisioning_settled(raw: &Value, status_path: &str) -> bool {
    match lookup_path(raw, status_path).and_then(Value::as_str) {
        Some(state) => SETTLED_STATES
            .iter()
            .any(|settled| settled.eq_ignore_ascii_case(state)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definitions_load_successfully() {
        let defs = builtin_definitions();
        assert!(!defs.resources.is_empty(), "Registry should have resources");
    }

    #[test]
    fn test_postgres_databases_definition_exists() {
        let def = builtin_definitions()
            .resources
            .get("postgres-databases")
            .expect("postgres databases should be defined");
        assert_eq!(def.key, "postgres-databases");
        assert_eq!(
            def.resource_type(),
            ResourceType::new("Microsoft.DBforPostgreSQL", "servers/databases")
        );
    }

    #[test]
    fn test_child_kinds_reference_known_definitions() {
        let defs = builtin_definitions();
        for def in defs.resources.values() {
            for child in &def.children {
                assert!(
                    defs.resources.contains_key(child),
                    "{} references unknown child kind {}",
                    def.key,
                    child
                );
            }
        }
    }

    #[test]
    fn test_storage_accounts_delete_children_first() {
        let defs = builtin_definitions();
        let account = &defs.resources["storage-accounts"];
        assert_eq!(account.children, vec!["storage-containers", "storage-queues"]);
        assert!(!account.cascades_delete());

        let group = ResourceId::resource_group("s", "rg");
        let account_id = account.child_id(Some(&group), "logs").unwrap();
        let queue = defs.resources["storage-queues"]
            .child_id(Some(&account_id), "jobs")
            .unwrap();
        assert_eq!(
            queue.to_string(),
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/logs/queueServices/default/queues/jobs"
        );
        assert_eq!(queue.resource_type(), defs.resources["storage-queues"].resource_type());
    }

    #[test]
    fn test_secret_versions_are_read_only_and_served_by_the_vault() {
        let defs = builtin_definitions();
        let versions = &defs.resources["keyvault-secret-versions"];
        assert_eq!(versions.plane, Plane::KeyVault);
        assert!(versions.read_only_reason().is_some());
        assert!(defs.resources["keyvault-secrets"]
            .children
            .contains(&"keyvault-secret-versions".to_string()));
        assert!(defs.resources["keyvault-secrets"].read_only_reason().is_none());
        assert!(defs.resources["generic-resources"].read_only_reason().is_some());
    }

    #[test]
    fn test_dot_paths() {
        let mut item = json!({"properties": {"charset": "UTF8"}, "tags": ["a", "b"]});
        assert_eq!(lookup_path(&item, "properties.charset"), Some(&json!("UTF8")));
        assert_eq!(lookup_path(&item, "tags.1"), Some(&json!("b")));
        assert_eq!(lookup_path(&item, "properties.missing"), None);

        assign_path(&mut item, "properties.collation", json!("en_US"));
        assign_path(&mut item, "sku.name", json!("B1"));
        assert_eq!(item["properties"]["collation"], "en_US");
        assert_eq!(item["properties"]["charset"], "UTF8");
        assert_eq!(item["sku"]["name"], "B1");
    }

    #[test]
    fn test_validate_reports_missing_required_fields() {
        let def = ResourceDef::new(
            "servers",
            "Server",
            &ResourceType::new("Microsoft.DBforPostgreSQL", "servers"),
        )
        .with_required_fields(&["location", "sku.name"]);

        let err = def.validate(&json!({"location": "westus"})).unwrap_err();
        assert!(err.contains("sku.name"));
        assert!(def
            .validate(&json!({"location": "westus", "sku": {"name": "B1"}}))
            .is_ok());
    }

    #[test]
    fn test_settled_follows_provisioning_state() {
        let def = ResourceDef::new("sites", "Web App", &ResourceType::new("Microsoft.Web", "sites"));
        assert!(def.is_settled(&json!({})));
        assert!(def.is_settled(&json!({"properties": {"provisioningState": "Succeeded"}})));
        assert!(!def.is_settled(&json!({"properties": {"provisioningState": "Updating"}})));
    }

    #[test]
    fn test_generic_kind_identifies_items_by_full_id() {
        let def = ResourceDef::new(
            "generic",
            "Resource",
            &ResourceType::new("Microsoft.Resources", "resources"),
        )
        .generic();
        let raw = json!({"id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Web/sites/app", "name": "app"});
        let id = def.id_of(None, &raw).unwrap();
        assert_eq!(id.resource_type(), ResourceType::new("Microsoft.Web", "sites"));
        assert_eq!(def.remote_name(&id), id.to_string());
    }
}
