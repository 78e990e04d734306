//! Resource entity
//!
//! A node of the cached tree. Holds the last remote snapshot and a status that
//! only [`StatusEngine`] computes. Mutation goes through the owning module;
//! entities keep a weak back-reference to it.

use super::draft::Draft;
use super::error::{Error, Result};
use super::identity::ResourceId;
use super::module::{self, ResourceModule};
use super::registry::{lookup_path, KindBinding, ResourceKind};
use super::remote::Scope;
use super::status::{Status, StatusEngine, StatusEvent};
use super::tree::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use tokio::sync::OnceCell;

pub struct Resource {
    id: ResourceId,
    kind: Arc<KindBinding>,
    scope: Scope,
    owner: Weak<ResourceModule>,
    ctx: Arc<Context>,
    state: Mutex<EntityState>,
    concrete: OnceCell<Arc<Resource>>,
    sub_modules: OnceLock<Vec<Arc<ResourceModule>>>,
}

#[derive(Debug)]
struct EntityState {
    snapshot: Option<Value>,
    status: Status,
    /// Write-clock value of the last commit, delete or invalidation
    written_at: u64,
    synced_at: Option<DateTime<Utc>>,
}

/// Outcome of a remote read, applied with [`Resource::finish_load`]
pub(crate) enum LoadOutcome {
    Found(Value),
    Absent,
    Failed,
}

impl Resource {
    pub(crate) fn new(
        id: ResourceId,
        kind: Arc<KindBinding>,
        scope: Scope,
        owner: Weak<ResourceModule>,
        ctx: Arc<Context>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            scope,
            owner,
            ctx,
            state: Mutex::new(EntityState {
                snapshot: None,
                status: Status::Unknown,
                written_at: 0,
                synced_at: None,
            }),
            concrete: OnceCell::new(),
            sub_modules: OnceLock::new(),
        })
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    pub fn kind(&self) -> &dyn ResourceKind {
        self.kind.kind.as_ref()
    }

    pub fn kind_key(&self) -> &str {
        self.kind.kind.key()
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    /// Last successfully fetched (or committed) representation
    pub fn snapshot(&self) -> Option<Value> {
        self.lock().snapshot.clone()
    }

    /// Field of the snapshot at a dot-notation path
    pub fn field(&self, path: &str) -> Option<Value> {
        let state = self.lock();
        state
            .snapshot
            .as_ref()
            .and_then(|snapshot| lookup_path(snapshot, path))
            .cloned()
    }

    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.lock().synced_at
    }

    /// Module this resource belongs to; `None` for subscription roots
    pub fn owner(&self) -> Option<Arc<ResourceModule>> {
        self.owner.upgrade()
    }

    pub fn parent(&self) -> Option<Arc<Resource>> {
        self.owner()?.parent()
    }

    /// The fixed set of child modules for this resource's kind
    pub fn sub_modules(self: &Arc<Self>) -> &[Arc<ResourceModule>] {
        self.sub_modules.get_or_init(|| {
            self.kind
                .kind
                .child_kinds()
                .iter()
                .filter_map(|key| match self.ctx.registry.kind(key) {
                    Some(binding) => Some(ResourceModule::new(self, binding.clone(), self.ctx.clone())),
                    None => {
                        tracing::warn!(kind = %key, parent = %self.id, "child kind is not registered");
                        None
                    }
                })
                .collect()
        })
    }

    pub fn sub_module(self: &Arc<Self>, key: &str) -> Option<Arc<ResourceModule>> {
        self.sub_modules()
            .iter()
            .find(|module| module.name() == key)
            .cloned()
    }

    /// Reload the snapshot from the remote
    pub async fn refresh(self: &Arc<Self>) -> Result<()> {
        match self.owner() {
            Some(owner) => owner.refresh_entity(self).await,
            None => module::reload(&self.ctx, &self.kind, self).await.map(|_| ()),
        }
    }

    /// Delete through the owning module
    pub async fn delete(self: &Arc<Self>) -> Result<()> {
        let owner = self.owner().ok_or_else(|| {
            Error::Validation(format!("'{}' has no owning module and cannot be deleted", self.id))
        })?;
        owner.delete_entity(self).await
    }

    /// Start an update draft for this resource
    pub fn update(self: &Arc<Self>) -> Result<Draft> {
        let owner = self.owner().ok_or_else(|| {
            Error::Validation(format!("'{}' has no owning module and cannot be updated", self.id))
        })?;
        owner.update_draft(self)
    }

    /// Resolve this resource to its typed counterpart.
    ///
    /// The first successful resolution is memoized for the entity's lifetime and
    /// concurrent callers converge on it. When no concrete type can be found the
    /// resource itself is returned.
    pub async fn to_concrete(self: &Arc<Self>) -> Result<Arc<Resource>> {
        let resolved = self
            .concrete
            .get_or_try_init(|| async {
                match self.ctx.resolve_concrete(&self.id).await {
                    Ok(Some(concrete)) => Ok(concrete),
                    Ok(None) => Err(None),
                    Err(err) => Err(Some(err)),
                }
            })
            .await;

        match resolved {
            Ok(concrete) => Ok(concrete.clone()),
            Err(None) => {
                tracing::debug!(id = %self.id, "no concrete type for resource");
                Ok(self.clone())
            }
            Err(Some(err)) => Err(err),
        }
    }

    /// Memoized concrete resource, if already resolved
    pub fn concrete(&self) -> Option<Arc<Resource>> {
        self.concrete.get().cloned()
    }

    /// Kind reported by the remote, falling back to the resolved kind
    pub fn kind_label(&self) -> String {
        if let Some(kind) = self.field("kind").and_then(|v| v.as_str().map(str::to_string)) {
            return kind;
        }
        match self.concrete() {
            Some(concrete) => concrete.kind().display_name().to_string(),
            None => self.kind().display_name().to_string(),
        }
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn remote_name(&self) -> String {
        self.kind.kind.remote_name(&self.id)
    }

    fn lock(&self) -> MutexGuard<'_, EntityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, state: &mut EntityState, event: StatusEvent) {
        let next = StatusEngine::next(state.status, event);
        if next != state.status {
            tracing::trace!(id = %self.id, from = %state.status, to = %next, "status transition");
        }
        state.status = next;
    }

    pub(crate) fn begin_load(&self) {
        let mut state = self.lock();
        self.transition(&mut state, StatusEvent::LoadStarted);
    }

    /// Apply a read that started at write-clock `started`. Reads overtaken by a
    /// later write are discarded; returns whether the outcome was applied.
    pub(crate) fn finish_load(&self, started: u64, outcome: LoadOutcome) -> bool {
        let mut state = self.lock();
        if matches!(state.status, Status::Deleting | Status::Deleted) {
            tracing::debug!(id = %self.id, status = %state.status, "discarding read of a deleted resource");
            return false;
        }
        if state.written_at > started {
            tracing::debug!(id = %self.id, "discarding read overtaken by a newer write");
            if state.status == Status::Loading {
                // Settle on the newer write's snapshot
                let event = match &state.snapshot {
                    Some(snapshot) => StatusEvent::Loaded {
                        settled: self.kind.kind.is_settled(snapshot),
                    },
                    None => StatusEvent::LoadAbsent,
                };
                self.transition(&mut state, event);
            }
            return false;
        }
        if state.status != Status::Loading {
            self.transition(&mut state, StatusEvent::LoadStarted);
        }
        match outcome {
            LoadOutcome::Found(snapshot) => {
                let settled = self.kind.kind.is_settled(&snapshot);
                state.snapshot = Some(snapshot);
                state.synced_at = Some(Utc::now());
                self.transition(&mut state, StatusEvent::Loaded { settled });
            }
            LoadOutcome::Absent => {
                state.snapshot = None;
                self.transition(&mut state, StatusEvent::LoadAbsent);
            }
            LoadOutcome::Failed => {
                self.transition(&mut state, StatusEvent::LoadFailed);
            }
        }
        true
    }

    pub(crate) fn apply_commit(&self, at: u64, snapshot: Value, accepted: bool) {
        let mut state = self.lock();
        state.written_at = state.written_at.max(at);
        state.snapshot = Some(snapshot);
        state.synced_at = Some(Utc::now());
        self.transition(&mut state, StatusEvent::Committed { accepted });
    }

    /// Mark the start of a delete; returns the status to restore on failure
    pub(crate) fn begin_delete(&self, at: u64) -> Status {
        let mut state = self.lock();
        let before = state.status;
        state.written_at = state.written_at.max(at);
        self.transition(&mut state, StatusEvent::DeleteStarted);
        before
    }

    /// Settle a delete. A confirmed delete always ends in `Deleted`.
    pub(crate) fn finish_delete(&self, failed_from: Option<Status>) {
        let mut state = self.lock();
        match failed_from {
            Some(before) => self.transition(&mut state, StatusEvent::DeleteFailed { before }),
            None => {
                state.snapshot = None;
                self.transition(&mut state, StatusEvent::DeleteConfirmed);
            }
        }
    }

    /// Clear the snapshot and reset status
    pub(crate) fn invalidate(&self, at: u64) {
        let mut state = self.lock();
        state.written_at = state.written_at.max(at);
        state.snapshot = None;
        self.transition(&mut state, StatusEvent::Invalidated);
    }

    pub(crate) fn written_at(&self) -> u64 {
        self.lock().written_at
    }

    /// Clear every child partition below this entity, invalidating what was
    /// cached there; returns the eviction count
    pub(crate) fn evict_children(&self, at: u64) -> usize {
        self.sub_modules
            .get()
            .map(|modules| modules.iter().map(|module| module.cache().clear(at)).sum())
            .unwrap_or(0)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id.to_string())
            .field("kind", &self.kind_key())
            .field("status", &self.status())
            .finish()
    }
}
