//! Resource tree
//!
//! Entry point for callers: holds the registry and the subscription roots, and
//! hands out modules. Every entity and module shares one [`Context`].

use super::cache::ResourceCache;
use super::entity::{LoadOutcome, Resource};
use super::error::{Error, ErrorClassifier, Result};
use super::identity::ResourceId;
use super::module::{self, ResourceModule};
use super::registry::{KindBinding, Registry};
use super::remote::Scope;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Registry key of the root kind
pub const SUBSCRIPTION_KIND: &str = "subscriptions";

pub const DEFAULT_ACCESS_DOCS_URL: &str =
    "https://learn.microsoft.com/azure/role-based-access-control/role-assignments-portal";

pub const DEFAULT_MAX_LIST_PAGES: usize = 1000;

/// Tunables for a [`ResourceTree`]
#[derive(Debug, Clone)]
pub struct TreeOptions {
    /// Documentation offered with authorization failures
    pub access_docs_url: String,
    /// Upper bound on pages drained by a single listing
    pub max_list_pages: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            access_docs_url: DEFAULT_ACCESS_DOCS_URL.to_string(),
            max_list_pages: DEFAULT_MAX_LIST_PAGES,
        }
    }
}

pub(crate) struct Context {
    pub(crate) registry: Registry,
    pub(crate) classifier: ErrorClassifier,
    pub(crate) max_list_pages: usize,
    roots: ResourceCache,
    /// Write clock: bumped by every commit, delete and invalidation
    clock: AtomicU64,
}

impl Context {
    pub(crate) fn now(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    /// Advance the write clock; the result is greater than any earlier `now()`
    pub(crate) fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn root_kind(&self) -> Result<&Arc<KindBinding>> {
        self.registry.kind(SUBSCRIPTION_KIND).ok_or_else(|| {
            Error::Validation(format!("no '{}' kind is registered", SUBSCRIPTION_KIND))
        })
    }

    pub(crate) fn subscription(self: &Arc<Self>, subscription_id: &str) -> Result<Arc<Resource>> {
        let binding = self.root_kind()?;
        let id = ResourceId::subscription(subscription_id);
        Ok(self.roots.get_or_insert_with(&id, || {
            Resource::new(
                id.clone(),
                binding.clone(),
                Scope::root(),
                Weak::new(),
                self.clone(),
            )
        }))
    }

    /// Walk from the subscription root down to `id`, loading each step.
    /// Intermediate steps no module holds (service singletons such as
    /// `blobServices/default`) are stepped over.
    pub(crate) async fn get_by_id(self: &Arc<Self>, id: &ResourceId) -> Result<Option<Arc<Resource>>> {
        let mut current = self.subscription(id.subscription_id())?;
        let ancestors = id.ancestors();
        for (depth, step) in ancestors.iter().enumerate().skip(1) {
            let step_type = step.resource_type();
            let module = current
                .sub_modules()
                .iter()
                .find(|module| module.kind().resource_type() == step_type)
                .cloned();
            let Some(module) = module else {
                if depth + 1 < ancestors.len() {
                    continue;
                }
                tracing::debug!(id = %id, step = %step_type, "no module holds this resource type");
                return Ok(None);
            };
            match module.get(step.name(), None).await? {
                Some(next) if next.id() == step => current = next,
                _ => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Concrete resource for `id`: an injected resolver wins, otherwise a typed
    /// kind registered for the type is looked up through the tree
    pub(crate) async fn resolve_concrete(
        self: &Arc<Self>,
        id: &ResourceId,
    ) -> Result<Option<Arc<Resource>>> {
        let resource_type = id.resource_type();
        if let Some(resolver) = self.registry.resolver(&resource_type) {
            return resolver(id.clone()).await;
        }
        if self.registry.kind_for_type(&resource_type).is_some() {
            return self.get_by_id(id).await;
        }
        Ok(None)
    }
}

/// Cached tree of remote resources rooted at subscriptions
#[derive(Clone)]
pub struct ResourceTree {
    ctx: Arc<Context>,
}

impl ResourceTree {
    pub fn new(registry: Registry, options: TreeOptions) -> Self {
        Self {
            ctx: Arc::new(Context {
                registry,
                classifier: ErrorClassifier::new(options.access_docs_url),
                max_list_pages: options.max_list_pages.max(1),
                roots: ResourceCache::new(),
                clock: AtomicU64::new(0),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.ctx.classifier
    }

    /// Root resource for a subscription; created on first reference
    pub fn subscription(&self, subscription_id: &str) -> Result<Arc<Resource>> {
        self.ctx.subscription(subscription_id)
    }

    /// Subscriptions visible to the caller
    pub async fn list_subscriptions(&self) -> Result<Vec<Arc<Resource>>> {
        let binding = self.ctx.root_kind()?.clone();
        let started = self.ctx.now();
        let items = module::drain(&self.ctx, &binding, &Scope::root()).await?;

        let mut listed = Vec::with_capacity(items.len());
        let mut seen = HashSet::new();
        for raw in items {
            let id = raw
                .get("id")
                .and_then(serde_json::Value::as_str)
                .and_then(|id| ResourceId::parse(id).ok())
                .filter(ResourceId::is_subscription)
                .or_else(|| binding.kind.id_of(None, &raw));
            let Some(id) = id else {
                tracing::warn!("skipping subscription without an id");
                continue;
            };
            let entity = self.ctx.subscription(id.subscription_id())?;
            entity.finish_load(started, LoadOutcome::Found(raw));
            if seen.insert(id.normalized()) {
                listed.push(entity);
            }
        }
        Ok(listed)
    }

    /// The module holding `kind` resources under `parent`
    pub fn module_for(&self, parent: &Arc<Resource>, kind: &str) -> Result<Arc<ResourceModule>> {
        parent.sub_module(kind).ok_or_else(|| {
            Error::Validation(format!(
                "'{}' is not a child kind of {} (expected one of: {})",
                kind,
                parent.kind_key(),
                parent.kind().child_kinds().join(", ")
            ))
        })
    }

    /// Every child module a resource exposes
    pub fn list_sub_modules(&self, parent: &Arc<Resource>) -> Vec<Arc<ResourceModule>> {
        parent.sub_modules().to_vec()
    }

    /// Load a resource by its full identifier, walking down from its subscription
    pub async fn get_by_id(&self, id: &ResourceId) -> Result<Option<Arc<Resource>>> {
        self.ctx.get_by_id(id).await
    }

    /// Drop every cached subscription and everything below it
    pub fn invalidate(&self) -> usize {
        self.ctx.roots.clear(self.ctx.tick())
    }
}
