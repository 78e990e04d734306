//! In-memory remote used by the integration tests
//!
//! Each registered kind gets a [`FakeBinding`] storing raw items per parent.
//! Bindings share one [`CallLog`] so tests can assert on cross-kind call order.

#![allow(dead_code)]

use async_trait::async_trait;
use aztree::resource::{
    Applied, Deleted, Fetched, HttpStatusError, Page, Registry, RemoteBinding, Resource,
    ResourceDef, ResourceId, ResourceTree, ResourceType, Scope, TreeOptions,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SUB: &str = "00000000-0000-0000-0000-000000000001";

#[derive(Default)]
pub struct CallLog(Mutex<Vec<String>>);

impl CallLog {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

pub struct FakeBinding {
    key: String,
    log: Arc<CallLog>,
    /// (normalized parent id, lowercased name) -> raw item
    items: Mutex<BTreeMap<(String, String), Value>>,
    lists: AtomicUsize,
    gets: AtomicUsize,
    writes: AtomicUsize,
    deletes: AtomicUsize,
    supports_get: AtomicBool,
    accept_async: AtomicBool,
    page_size: AtomicUsize,
    failure: Mutex<Option<(u16, String)>>,
    get_delay: Mutex<Option<Duration>>,
    list_delay: Mutex<Option<Duration>>,
    delete_delay: Mutex<Option<Duration>>,
}

fn parent_key(scope: &Scope) -> String {
    scope
        .effective_parent()
        .map(|p| p.normalized())
        .unwrap_or_default()
}

impl FakeBinding {
    fn new(def: &ResourceDef, log: Arc<CallLog>) -> Self {
        Self {
            key: def.key.clone(),
            log,
            items: Mutex::new(BTreeMap::new()),
            lists: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            supports_get: AtomicBool::new(def.supports_get),
            accept_async: AtomicBool::new(false),
            page_size: AtomicUsize::new(0),
            failure: Mutex::new(None),
            get_delay: Mutex::new(None),
            list_delay: Mutex::new(None),
            delete_delay: Mutex::new(None),
        }
    }

    pub fn insert(&self, parent: &ResourceId, name: &str, raw: Value) {
        self.items
            .lock()
            .unwrap()
            .insert((parent.normalized(), name.to_lowercase()), raw);
    }

    /// Store a top-level item, listed under the root scope
    pub fn insert_root(&self, name: &str, raw: Value) {
        self.items
            .lock()
            .unwrap()
            .insert((String::new(), name.to_lowercase()), raw);
    }

    pub fn remove(&self, parent: &ResourceId, name: &str) -> Option<Value> {
        self.items
            .lock()
            .unwrap()
            .remove(&(parent.normalized(), name.to_lowercase()))
    }

    pub fn stored(&self, parent: &ResourceId, name: &str) -> Option<Value> {
        self.items
            .lock()
            .unwrap()
            .get(&(parent.normalized(), name.to_lowercase()))
            .cloned()
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn set_supports_get(&self, supported: bool) {
        self.supports_get.store(supported, Ordering::SeqCst);
    }

    pub fn set_accept_async(&self, accept: bool) {
        self.accept_async.store(accept, Ordering::SeqCst);
    }

    /// Zero disables paging
    pub fn set_page_size(&self, size: usize) {
        self.page_size.store(size, Ordering::SeqCst);
    }

    pub fn fail_with(&self, status: u16, message: &str) {
        *self.failure.lock().unwrap() = Some((status, message.to_string()));
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Delay single-item fetches after the store has been read
    pub fn set_get_delay(&self, delay: Option<Duration>) {
        *self.get_delay.lock().unwrap() = delay;
    }

    /// Delay listings after the store has been read
    pub fn set_list_delay(&self, delay: Option<Duration>) {
        *self.list_delay.lock().unwrap() = delay;
    }

    /// Delay deletes before the item is removed from the store
    pub fn set_delete_delay(&self, delay: Option<Duration>) {
        *self.delete_delay.lock().unwrap() = delay;
    }

    fn check_failure(&self) -> anyhow::Result<()> {
        if let Some((status, message)) = self.failure.lock().unwrap().clone() {
            return Err(anyhow::Error::new(HttpStatusError::new(status, message))
                .context(format!("fake transport call for {} failed", self.key)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBinding for FakeBinding {
    async fn list_page(&self, scope: &Scope, cursor: Option<&str>) -> anyhow::Result<Page> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("list:{}", self.key));
        self.check_failure()?;

        let parent = parent_key(scope);
        let all: Vec<Value> = self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|((p, _), _)| *p == parent)
            .map(|(_, raw)| raw.clone())
            .collect();

        let start = match cursor {
            Some(cursor) => cursor.parse::<usize>()?,
            None => 0,
        };
        let size = match self.page_size.load(Ordering::SeqCst) {
            0 => all.len().max(1),
            n => n,
        };
        let end = (start + size).min(all.len());
        let next = (end < all.len()).then(|| end.to_string());

        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(Page {
            items: all[start.min(end)..end].to_vec(),
            next,
        })
    }

    fn supports_get(&self) -> bool {
        self.supports_get.load(Ordering::SeqCst)
    }

    async fn get(&self, scope: &Scope, name: &str) -> anyhow::Result<Fetched> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("get:{}:{}", self.key, name));
        self.check_failure()?;

        let found = self
            .items
            .lock()
            .unwrap()
            .get(&(parent_key(scope), name.to_lowercase()))
            .cloned();

        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(match found {
            Some(raw) => Fetched::Found(raw),
            None => Fetched::Absent,
        })
    }

    async fn create_or_update(
        &self,
        scope: &Scope,
        name: &str,
        desired: &Value,
    ) -> anyhow::Result<Applied> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("put:{}:{}", self.key, name));
        self.check_failure()?;

        let mut stored = desired.clone();
        stored["name"] = json!(name);
        self.items
            .lock()
            .unwrap()
            .insert((parent_key(scope), name.to_lowercase()), stored.clone());

        if self.accept_async.load(Ordering::SeqCst) {
            Ok(Applied::Accepted(None))
        } else {
            Ok(Applied::Completed(stored))
        }
    }

    async fn delete(&self, scope: &Scope, name: &str) -> anyhow::Result<Deleted> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("delete:{}:{}", self.key, name));
        self.check_failure()?;

        let delay = *self.delete_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let removed = self
            .items
            .lock()
            .unwrap()
            .remove(&(parent_key(scope), name.to_lowercase()));
        Ok(match removed {
            Some(_) => Deleted::Removed,
            None => Deleted::AlreadyAbsent,
        })
    }
}

/// Kinds used by the tests: a small ARM-shaped hierarchy plus one kind whose
/// remote does not cascade deletes and whose children sit below a service
/// segment
pub fn definitions() -> Vec<ResourceDef> {
    let pg = "Microsoft.DBforPostgreSQL";
    let storage = "Microsoft.Storage";
    let mut defs = vec![
        ResourceDef::new("subscriptions", "Subscription", &ResourceType::subscription())
            .with_children(&["resource-groups", "generic-resources"]),
        ResourceDef::new("resource-groups", "Resource Group", &ResourceType::resource_group())
            .with_children(&["servers", "accounts", "sites"]),
        ResourceDef::new("servers", "Server", &ResourceType::new(pg, "servers"))
            .with_children(&["firewall-rules", "databases"]),
        ResourceDef::new(
            "firewall-rules",
            "Firewall Rule",
            &ResourceType::new(pg, "servers/firewallRules"),
        )
        .with_required_fields(&["properties.startIpAddress", "properties.endIpAddress"]),
        ResourceDef::new("databases", "Database", &ResourceType::new(pg, "servers/databases")),
        ResourceDef::new("accounts", "Storage Account", &ResourceType::new(storage, "storageAccounts"))
            .with_children(&["containers"])
            .without_cascade(),
        ResourceDef::new(
            "containers",
            "Container",
            &ResourceType::new(storage, "storageAccounts/blobServices/containers"),
        )
        .with_collection("blobServices/default/containers"),
        ResourceDef::new("sites", "Web App", &ResourceType::new("Microsoft.Web", "sites")),
        ResourceDef::new(
            "generic-resources",
            "Resource",
            &ResourceType::new("Microsoft.Resources", "resources"),
        )
        .with_collection("resources")
        .generic(),
    ];
    for def in defs.iter_mut() {
        if def.generic {
            def.supports_get = false;
        }
    }
    defs
}

pub struct Harness {
    pub tree: ResourceTree,
    pub log: Arc<CallLog>,
    bindings: HashMap<String, Arc<FakeBinding>>,
}

pub fn harness() -> Harness {
    build(TreeOptions::default(), |_| {})
}

pub fn harness_with_options(options: TreeOptions) -> Harness {
    build(options, |_| {})
}

pub fn harness_with_registry(extend: impl FnOnce(&mut Registry)) -> Harness {
    build(TreeOptions::default(), extend)
}

fn build(options: TreeOptions, extend: impl FnOnce(&mut Registry)) -> Harness {
    let log = Arc::new(CallLog::default());
    let mut registry = Registry::new();
    let mut bindings = HashMap::new();
    for def in definitions() {
        let binding = Arc::new(FakeBinding::new(&def, log.clone()));
        bindings.insert(def.key.clone(), binding.clone());
        registry.register(Arc::new(def), binding);
    }
    extend(&mut registry);

    Harness {
        tree: ResourceTree::new(registry, options),
        log,
        bindings,
    }
}

impl Harness {
    pub fn binding(&self, key: &str) -> &Arc<FakeBinding> {
        &self.bindings[key]
    }

    pub fn sub(&self) -> Arc<Resource> {
        self.tree.subscription(SUB).unwrap()
    }

    pub fn sub_id(&self) -> ResourceId {
        ResourceId::subscription(SUB)
    }

    pub fn seed(&self, key: &str, parent: &ResourceId, name: &str, raw: Value) {
        self.binding(key).insert(parent, name, raw);
    }

    /// Seed a named item carrying only its name plus `extra` fields
    pub fn seed_named(&self, key: &str, parent: &ResourceId, name: &str, extra: Value) {
        let mut raw = json!({ "name": name });
        if let Value::Object(fields) = extra {
            for (k, v) in fields {
                raw[k] = v;
            }
        }
        self.seed(key, parent, name, raw);
    }

    pub async fn group(&self, name: &str) -> Arc<Resource> {
        self.seed_named("resource-groups", &self.sub_id(), name, json!({"location": "westus"}));
        self.tree
            .module_for(&self.sub(), "resource-groups")
            .unwrap()
            .get(name, None)
            .await
            .unwrap()
            .expect("seeded resource group")
    }

    /// Load a child of `kind` under `parent`, seeding it first
    pub async fn child(&self, parent: &Arc<Resource>, kind: &str, name: &str, extra: Value) -> Arc<Resource> {
        self.seed_named(kind, parent.id(), name, extra);
        self.tree
            .module_for(parent, kind)
            .unwrap()
            .get(name, None)
            .await
            .unwrap()
            .expect("seeded resource")
    }

    pub async fn server(&self, group: &str, name: &str) -> Arc<Resource> {
        let rg = self.group(group).await;
        self.child(&rg, "servers", name, json!({"location": "westus"})).await
    }
}

pub fn rule_body(start: &str, end: &str) -> Value {
    json!({"properties": {"startIpAddress": start, "endIpAddress": end}})
}
