//! Drafts: staged mutations
//!
//! A [`Draft`] collects field edits without touching the remote or the cache.
//! [`Draft::commit`] sends them through the owning module exactly once;
//! committing again replays the recorded outcome.

use super::entity::Resource;
use super::error::{Error, ErrorKind, Result};
use super::identity::ResourceId;
use super::module::ResourceModule;
use super::registry::lookup_path;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftState {
    Created,
    Committing,
    Committed,
    Failed,
}

impl fmt::Display for DraftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DraftState::Created => "CREATED",
            DraftState::Committing => "COMMITTING",
            DraftState::Committed => "COMMITTED",
            DraftState::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// What a draft will create or change
#[derive(Debug, Clone)]
pub enum DraftTarget {
    Create { id: ResourceId, name: String },
    Update { resource: Arc<Resource> },
}

impl DraftTarget {
    pub fn id(&self) -> &ResourceId {
        match self {
            DraftTarget::Create { id, .. } => id,
            DraftTarget::Update { resource } => resource.id(),
        }
    }
}

struct DraftInner {
    state: DraftState,
    changes: Map<String, Value>,
    outcome: Option<Result<Arc<Resource>>>,
}

pub struct Draft {
    id: Uuid,
    module: Arc<ResourceModule>,
    target: DraftTarget,
    inner: Mutex<DraftInner>,
}

impl Draft {
    pub(crate) fn new(
        module: Arc<ResourceModule>,
        target: DraftTarget,
        changes: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            module,
            target,
            inner: Mutex::new(DraftInner {
                state: DraftState::Created,
                changes,
                outcome: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &DraftTarget {
        &self.target
    }

    pub fn module(&self) -> &Arc<ResourceModule> {
        &self.module
    }

    pub fn state(&self) -> DraftState {
        self.lock().state
    }

    pub fn is_create(&self) -> bool {
        matches!(self.target, DraftTarget::Create { .. })
    }

    /// Stage a field edit at a dot-notation path
    pub fn set(&self, field: &str, value: Value) -> Result<&Self> {
        let mut inner = self.lock();
        if inner.state != DraftState::Created {
            return Err(Error::Validation(format!(
                "draft for '{}' is {} and can no longer be edited",
                self.target.id(),
                inner.state
            )));
        }
        inner.changes.insert(field.to_string(), value);
        Ok(self)
    }

    /// Staged value for a field, falling back to the current snapshot
    pub fn get(&self, field: &str) -> Option<Value> {
        if let Some(staged) = self.lock().changes.get(field) {
            return Some(staged.clone());
        }
        match &self.target {
            DraftTarget::Update { resource } => resource.field(field),
            DraftTarget::Create { .. } => None,
        }
    }

    pub fn changes(&self) -> Map<String, Value> {
        self.lock().changes.clone()
    }

    /// Desired state as it would be sent on commit
    pub fn desired(&self) -> Value {
        let changes = self.changes();
        match &self.target {
            DraftTarget::Update { resource } => {
                resource.kind().encode(resource.snapshot().as_ref(), &changes)
            }
            DraftTarget::Create { .. } => self.module.kind().encode(None, &changes),
        }
    }

    /// Whether the staged edits differ from the current snapshot
    pub fn is_modified(&self) -> bool {
        let changes = self.changes();
        match &self.target {
            DraftTarget::Create { .. } => true,
            DraftTarget::Update { resource } => {
                let snapshot = resource.snapshot().unwrap_or(Value::Null);
                changes
                    .iter()
                    .any(|(path, value)| lookup_path(&snapshot, path) != Some(value))
            }
        }
    }

    /// Validate, send, and merge the result into the cache.
    ///
    /// Single-shot: once a commit has reached the remote, later calls return
    /// the same result without another remote call. A local validation
    /// failure leaves the draft editable.
    pub async fn commit(&self) -> Result<Arc<Resource>> {
        let changes = {
            let mut inner = self.lock();
            match inner.state {
                DraftState::Committed | DraftState::Failed => {
                    if let Some(outcome) = &inner.outcome {
                        tracing::debug!(draft = %self.id, "replaying recorded commit outcome");
                        return outcome.clone();
                    }
                }
                DraftState::Committing => {
                    return Err(Error::Validation(format!(
                        "draft for '{}' is already being committed",
                        self.target.id()
                    )));
                }
                DraftState::Created => {}
            }
            inner.state = DraftState::Committing;
            inner.changes.clone()
        };

        let outcome = self.module.commit_draft(&self.target, &changes).await;

        let mut inner = self.lock();
        if matches!(&outcome, Err(err) if err.kind() == ErrorKind::Validation) {
            inner.state = DraftState::Created;
            return outcome;
        }
        match &outcome {
            Ok(_) => inner.state = DraftState::Committed,
            Err(err) => {
                tracing::warn!(draft = %self.id, id = %self.target.id(), "commit failed: {}", err);
                inner.state = DraftState::Failed;
            }
        }
        inner.outcome = Some(outcome.clone());
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, DraftInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Draft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Draft")
            .field("id", &self.id)
            .field("target", &self.target.id().to_string())
            .field("state", &self.state())
            .finish()
    }
}
