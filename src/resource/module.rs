//! Resource modules
//!
//! A [`ResourceModule`] owns every resource of one kind under one parent. It is
//! the only caller of the kind's [`RemoteBinding`] and the only writer of its
//! cache partition.
//!
//! [`RemoteBinding`]: super::remote::RemoteBinding

use super::cache::ResourceCache;
use super::draft::{Draft, DraftTarget};
use super::entity::{LoadOutcome, Resource};
use super::error::{Error, ErrorKind, Result};
use super::identity::ResourceId;
use super::registry::{KindBinding, ResourceKind};
use super::remote::{Applied, Deleted, Fetched, Scope};
use super::tree::Context;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub struct ResourceModule {
    binding: Arc<KindBinding>,
    parent: Weak<Resource>,
    scope: Scope,
    ctx: Arc<Context>,
    cache: ResourceCache,
    this: Weak<ResourceModule>,
}

impl ResourceModule {
    pub(crate) fn new(
        parent: &Arc<Resource>,
        binding: Arc<KindBinding>,
        ctx: Arc<Context>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            binding,
            parent: Arc::downgrade(parent),
            scope: Scope::under(parent.id()),
            ctx,
            cache: ResourceCache::new(),
            this: this.clone(),
        })
    }

    /// Registry key of the kind this module holds
    pub fn name(&self) -> &str {
        self.binding.kind.key()
    }

    pub fn display_name(&self) -> &str {
        self.binding.kind.display_name()
    }

    pub fn kind(&self) -> &dyn ResourceKind {
        self.binding.kind.as_ref()
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn parent(&self) -> Option<Arc<Resource>> {
        self.parent.upgrade()
    }

    /// Entities currently cached in this module, in no particular order
    pub fn cached(&self) -> Vec<Arc<Resource>> {
        self.cache.values()
    }

    pub(crate) fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Look up a resource by name, cache first.
    ///
    /// On a miss the kind's single-item endpoint is used when it has one,
    /// otherwise the full listing is scanned case-insensitively. A resource the
    /// remote does not know yields `Ok(None)`.
    pub async fn get(
        &self,
        name: &str,
        resource_group: Option<&str>,
    ) -> Result<Option<Arc<Resource>>> {
        let scope = self.scope.with_resource_group(resource_group);
        let id = self
            .binding
            .kind
            .child_id(scope.effective_parent().as_ref(), name)?;

        if let Some(hit) = self.cache.get(&id) {
            debug!(id = %id, "cache hit");
            return Ok(Some(hit));
        }

        debug!(id = %id, kind = %self.name(), "cache miss, fetching");
        let started = self.ctx.now();
        let remote_name = self.binding.kind.remote_name(&id);
        match fetch_one(&self.ctx, &self.binding, &scope, &remote_name).await? {
            Some(raw) => Ok(self.absorb(&scope, raw, started)),
            None => {
                debug!(id = %id, "not found remotely");
                Ok(None)
            }
        }
    }

    /// List every resource of this kind under the parent.
    ///
    /// All pages are drained before anything is cached; a failure on any page
    /// aborts the listing. Entries cached before the listing started and
    /// missing from it are evicted unless they were written in the meantime.
    pub async fn list(&self) -> Result<Vec<Arc<Resource>>> {
        let started = self.ctx.now();
        let known: HashSet<String> = self
            .cache
            .values()
            .iter()
            .map(|entity| entity.id().normalized())
            .collect();
        let items = drain(&self.ctx, &self.binding, &self.scope).await?;

        let mut listed = Vec::with_capacity(items.len());
        let mut seen = HashSet::with_capacity(items.len());
        for raw in items {
            if let Some(entity) = self.absorb(&self.scope, raw, started) {
                if seen.insert(entity.id().normalized()) {
                    listed.push(entity);
                }
            }
        }

        let stale = self.cache.retain(|entity| {
            let key = entity.id().normalized();
            seen.contains(&key) || !known.contains(&key) || entity.written_at() > started
        });
        if !stale.is_empty() {
            ResourceCache::evict(&stale, self.ctx.tick());
            debug!(kind = %self.name(), count = stale.len(), "evicted entries missing from listing");
        }

        debug!(kind = %self.name(), count = listed.len(), "listed resources");
        Ok(listed)
    }

    /// Stage a new resource. Nothing is sent until the draft is committed.
    pub fn create(self: &Arc<Self>, name: &str, config: Map<String, Value>) -> Result<Draft> {
        let id = self
            .binding
            .kind
            .child_id(self.scope.effective_parent().as_ref(), name)?;
        self.ensure_writable("create", &id)?;
        Ok(Draft::new(
            self.clone(),
            DraftTarget::Create {
                id,
                name: name.to_string(),
            },
            config,
        ))
    }

    /// Stage changes to a resource owned by this module
    pub fn update_draft(self: &Arc<Self>, resource: &Arc<Resource>) -> Result<Draft> {
        let owned = resource
            .owner()
            .is_some_and(|owner| Arc::ptr_eq(&owner, self));
        if !owned {
            return Err(Error::Validation(format!(
                "'{}' does not belong to the {} module",
                resource.id(),
                self.name()
            )));
        }
        self.ensure_writable("update", resource.id())?;
        Ok(Draft::new(
            self.clone(),
            DraftTarget::Update {
                resource: resource.clone(),
            },
            Map::new(),
        ))
    }

    /// Delete a resource of this kind. Deleting something the remote no longer
    /// has succeeds; an id that lives under another parent is rejected.
    pub async fn delete(&self, id: &ResourceId) -> Result<()> {
        let kind = &self.binding.kind;
        let parent = self.scope.effective_parent();
        let owned = kind
            .child_id(parent.as_ref(), &kind.remote_name(id))
            .is_ok_and(|expected| expected == *id);
        if !owned {
            return Err(Error::Validation(format!(
                "'{}' is not a {} under '{}'",
                id,
                self.display_name(),
                parent.map(|p| p.to_string()).unwrap_or_default()
            )));
        }

        let entity = match self.cache.get(id) {
            Some(entity) => entity,
            None => {
                let scope = id.parent().map(|p| Scope::under(&p)).unwrap_or_default();
                self.make_entity(id.clone(), scope)
            }
        };
        self.delete_entity(&entity).await
    }

    /// Drop every cached entry of this module and its subtree
    pub fn invalidate(&self) -> usize {
        self.cache.clear(self.ctx.tick())
    }

    pub(crate) async fn refresh_entity(&self, entity: &Arc<Resource>) -> Result<()> {
        if reload(&self.ctx, &self.binding, entity).await? {
            let evicted = self.cache.invalidate_subtree(entity.id(), self.ctx.tick());
            debug!(id = %entity.id(), evicted, "resource no longer exists remotely");
        }
        Ok(())
    }

    pub(crate) fn delete_entity<'a>(&'a self, entity: &'a Arc<Resource>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.ensure_writable("delete", entity.id())?;
            let at = self.ctx.tick();
            let before = entity.begin_delete(at);
            match self.delete_remote(entity).await {
                Ok(()) => {
                    let evicted =
                        self.cache.invalidate_subtree(entity.id(), at) + entity.evict_children(at);
                    entity.finish_delete(None);
                    info!(id = %entity.id(), evicted, "deleted resource");
                    Ok(())
                }
                Err(err) => {
                    entity.finish_delete(Some(before));
                    warn!(id = %entity.id(), "delete failed: {}", err);
                    Err(err)
                }
            }
        })
    }

    async fn delete_remote(&self, entity: &Arc<Resource>) -> Result<()> {
        if !self.binding.kind.cascades_delete() {
            for module in entity.sub_modules() {
                if module.kind().read_only_reason().is_some() {
                    continue;
                }
                for child in module.list().await? {
                    module.delete_entity(&child).await?;
                }
            }
        }

        let name = entity.remote_name();
        info!(id = %entity.id(), "deleting resource");
        match self.binding.remote.delete(entity.scope(), &name).await {
            Ok(Deleted::Removed) => Ok(()),
            Ok(Deleted::AlreadyAbsent) => {
                debug!(id = %entity.id(), "already absent");
                Ok(())
            }
            Err(err) => {
                let classified = classify(&self.ctx, &self.binding, entity.scope(), &err);
                if classified.kind() == ErrorKind::NotFound {
                    debug!(id = %entity.id(), "already absent");
                    Ok(())
                } else {
                    Err(classified)
                }
            }
        }
    }

    /// Send a draft's desired state and merge the result into the cache. The
    /// cache is untouched unless the remote call succeeds.
    pub(crate) async fn commit_draft(
        &self,
        target: &DraftTarget,
        changes: &Map<String, Value>,
    ) -> Result<Arc<Resource>> {
        let kind = &self.binding.kind;
        let (id, current, scope) = match target {
            DraftTarget::Create { id, .. } => (id.clone(), None, self.scope.clone()),
            DraftTarget::Update { resource } => (
                resource.id().clone(),
                resource.snapshot(),
                resource.scope().clone(),
            ),
        };
        self.ensure_writable("commit", &id)?;

        let desired = kind.encode(current.as_ref(), changes);
        kind.validate(&desired).map_err(Error::Validation)?;

        info!(id = %id, "committing changes");
        let applied = self
            .binding
            .remote
            .create_or_update(&scope, &kind.remote_name(&id), &desired)
            .await
            .map_err(|err| classify(&self.ctx, &self.binding, &scope, &err))?;

        let (snapshot, accepted) = match applied {
            Applied::Completed(raw) => {
                let settled = kind.is_settled(&raw);
                (raw, !settled)
            }
            Applied::Accepted(raw) => (raw.unwrap_or(desired), true),
        };

        let at = self.ctx.tick();
        let entity = match target {
            DraftTarget::Create { .. } => self
                .cache
                .get_or_insert_with(&id, || self.make_entity(id.clone(), scope.clone())),
            DraftTarget::Update { resource } => {
                let cached = self.cache.get_or_insert_with(&id, || resource.clone());
                if !Arc::ptr_eq(&cached, resource) {
                    resource.apply_commit(at, snapshot.clone(), accepted);
                }
                cached
            }
        };
        entity.apply_commit(at, snapshot, accepted);
        debug!(id = %id, status = %entity.status(), "commit applied");
        Ok(entity)
    }

    fn ensure_writable(&self, action: &str, id: &ResourceId) -> Result<()> {
        match self.binding.kind.read_only_reason() {
            Some(reason) => Err(Error::Validation(format!(
                "cannot {} '{}': {}",
                action, id, reason
            ))),
            None => Ok(()),
        }
    }

    fn make_entity(&self, id: ResourceId, scope: Scope) -> Arc<Resource> {
        Resource::new(
            id,
            self.binding.clone(),
            scope,
            self.this.clone(),
            self.ctx.clone(),
        )
    }

    /// Turn a raw remote item into a cached entity
    fn absorb(&self, scope: &Scope, raw: Value, started: u64) -> Option<Arc<Resource>> {
        let kind = &self.binding.kind;
        let parent = scope.effective_parent();
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| ResourceId::parse(id).ok())
            .filter(|id| id.resource_type() == kind.resource_type())
            .or_else(|| kind.id_of(parent.as_ref(), &raw));

        let Some(id) = id else {
            warn!(kind = %self.name(), "skipping item without a usable name");
            return None;
        };

        let entity = self
            .cache
            .get_or_insert_with(&id, || self.make_entity(id.clone(), scope.clone()));
        entity.finish_load(started, LoadOutcome::Found(raw));
        Some(entity)
    }
}

impl fmt::Debug for ResourceModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceModule")
            .field("kind", &self.name())
            .field("scope", &self.scope)
            .field("cached", &self.cache.len())
            .finish()
    }
}

/// Reload `entity` from the remote. Returns true when the remote no longer
/// has it and the outcome was applied.
pub(crate) async fn reload(ctx: &Context, binding: &KindBinding, entity: &Arc<Resource>) -> Result<bool> {
    let started = ctx.now();
    entity.begin_load();
    match fetch_one(ctx, binding, entity.scope(), &entity.remote_name()).await {
        Ok(Some(raw)) => {
            entity.finish_load(started, LoadOutcome::Found(raw));
            Ok(false)
        }
        Ok(None) => Ok(entity.finish_load(started, LoadOutcome::Absent)),
        Err(err) => {
            entity.finish_load(started, LoadOutcome::Failed);
            Err(err)
        }
    }
}

fn classify(ctx: &Context, binding: &KindBinding, scope: &Scope, err: &anyhow::Error) -> Error {
    let hint = binding.remote.classify_failure(err);
    ctx.classifier.classify(hint, binding.kind.as_ref(), scope)
}

async fn fetch_one(
    ctx: &Context,
    binding: &KindBinding,
    scope: &Scope,
    name: &str,
) -> Result<Option<Value>> {
    if !binding.remote.supports_get() {
        let items = drain(ctx, binding, scope).await?;
        return Ok(items.into_iter().find(|raw| {
            binding
                .kind
                .name_of(raw)
                .is_some_and(|candidate| candidate.eq_ignore_ascii_case(name))
        }));
    }

    match binding.remote.get(scope, name).await {
        Ok(Fetched::Found(raw)) => Ok(Some(raw)),
        Ok(Fetched::Absent) => Ok(None),
        Err(err) => {
            let classified = classify(ctx, binding, scope, &err);
            if classified.kind() == ErrorKind::NotFound {
                Ok(None)
            } else {
                Err(classified)
            }
        }
    }
}

/// Drain every page of a listing. A missing parent lists as empty.
pub(crate) async fn drain(ctx: &Context, binding: &KindBinding, scope: &Scope) -> Result<Vec<Value>> {
    let kind = binding.kind.display_name();
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    let mut cursors = HashSet::new();

    for page in 1..=ctx.max_list_pages {
        let result = match binding.remote.list_page(scope, cursor.as_deref()).await {
            Ok(result) => result,
            Err(err) => {
                let classified = classify(ctx, binding, scope, &err);
                if classified.kind() == ErrorKind::NotFound && cursor.is_none() {
                    debug!(kind, "listing scope not found, treating as empty");
                    return Ok(Vec::new());
                }
                return Err(classified);
            }
        };

        debug!(kind, page, count = result.items.len(), "fetched page");
        items.extend(result.items);

        match result.next {
            None => return Ok(items),
            Some(next) => {
                if !cursors.insert(next.clone()) {
                    return Err(Error::Fatal(format!(
                        "listing {} returned a repeated continuation cursor",
                        kind
                    )));
                }
                cursor = Some(next);
            }
        }
    }

    Err(Error::Fatal(format!(
        "listing {} exceeded {} pages",
        kind, ctx.max_list_pages
    )))
}
