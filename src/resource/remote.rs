//! Remote binding contract
//!
//! A [`RemoteBinding`] is the per-kind gateway to the management API. Modules
//! are its only callers; bindings never touch the cache.

use super::identity::ResourceId;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Where a module's resources live: the parent resource and its resource group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub parent: Option<ResourceId>,
    pub resource_group: Option<String>,
}

impl Scope {
    /// Scope of top-level (subscription) resources
    pub fn root() -> Self {
        Self::default()
    }

    pub fn under(parent: &ResourceId) -> Self {
        Self {
            parent: Some(parent.clone()),
            resource_group: parent.resource_group_name().map(str::to_string),
        }
    }

    /// Same scope, with the resource group overridden by a caller hint
    pub fn with_resource_group(&self, hint: Option<&str>) -> Self {
        let mut scope = self.clone();
        if let Some(rg) = hint {
            scope.resource_group = Some(rg.to_string());
        }
        scope
    }

    /// Resource that children are addressed under. A resource group hint
    /// narrows a subscription-level scope to that group.
    pub fn effective_parent(&self) -> Option<ResourceId> {
        match (&self.parent, &self.resource_group) {
            (Some(parent), Some(rg)) if parent.is_subscription() => {
                Some(ResourceId::resource_group(parent.subscription_id(), rg.clone()))
            }
            (parent, _) => parent.clone(),
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Value>,
    /// Opaque continuation cursor; `None` on the last page
    pub next: Option<String>,
}

/// Result of a single-item fetch
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Found(Value),
    Absent,
}

/// Result of a create-or-update call
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// The remote applied the change and returned the new representation
    Completed(Value),
    /// The remote accepted a long-running change that has not finished yet
    Accepted(Option<Value>),
}

/// Result of a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deleted {
    Removed,
    AlreadyAbsent,
}

/// Failure carrying an HTTP-equivalent status, placed in the error chain by
/// bindings so classification does not depend on message parsing
#[derive(Debug, Clone, Error)]
#[error("{message} (HTTP {status})")]
pub struct HttpStatusError {
    pub status: u16,
    pub message: String,
}

impl HttpStatusError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// What a binding reports about a failure, consumed by the error classifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureHint {
    pub status: Option<u16>,
    pub root_cause: String,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl FailureHint {
    /// Walk the error chain looking for status codes, timeouts and cancellation
    pub fn from_error(err: &anyhow::Error) -> Self {
        let mut hint = FailureHint::default();
        let mut api_message = None;

        for cause in err.chain() {
            if let Some(http) = cause.downcast_ref::<HttpStatusError>() {
                hint.status.get_or_insert(http.status);
                api_message.get_or_insert_with(|| http.message.clone());
            } else if let Some(request) = cause.downcast_ref::<reqwest::Error>() {
                if let Some(status) = request.status() {
                    hint.status.get_or_insert(status.as_u16());
                }
                hint.timed_out |= request.is_timeout();
            } else if cause.is::<tokio::time::error::Elapsed>() {
                hint.timed_out = true;
            } else if let Some(join) = cause.downcast_ref::<tokio::task::JoinError>() {
                hint.cancelled |= join.is_cancelled();
            }
        }

        hint.root_cause = api_message.unwrap_or_else(|| err.root_cause().to_string());
        hint
    }
}

/// Remote operations for one resource kind
#[async_trait]
pub trait RemoteBinding: Send + Sync {
    /// Fetch one page of the listing under `scope`
    async fn list_page(&self, scope: &Scope, cursor: Option<&str>) -> Result<Page>;

    /// Whether [`RemoteBinding::get`] is backed by a single-item endpoint
    fn supports_get(&self) -> bool {
        true
    }

    async fn get(&self, _scope: &Scope, name: &str) -> Result<Fetched> {
        anyhow::bail!("single-item fetch of '{}' is not supported", name)
    }

    async fn create_or_update(&self, _scope: &Scope, name: &str, _desired: &Value) -> Result<Applied> {
        anyhow::bail!("'{}' cannot be created or updated through this binding", name)
    }

    async fn delete(&self, _scope: &Scope, name: &str) -> Result<Deleted> {
        anyhow::bail!("'{}' cannot be deleted through this binding", name)
    }

    fn classify_failure(&self, err: &anyhow::Error) -> FailureHint {
        FailureHint::from_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_hint_prefers_api_message_over_wrapper() {
        let err = Err::<(), _>(HttpStatusError::new(403, "Caller lacks list permission"))
            .context("Failed to list secrets")
            .unwrap_err();
        let hint = FailureHint::from_error(&err);
        assert_eq!(hint.status, Some(403));
        assert_eq!(hint.root_cause, "Caller lacks list permission");
    }

    #[test]
    fn test_hint_uses_root_cause_without_status() {
        let err = anyhow::anyhow!("connection reset").context("Failed to send request");
        let hint = FailureHint::from_error(&err);
        assert_eq!(hint.status, None);
        assert_eq!(hint.root_cause, "connection reset");
    }

    #[test]
    fn test_scope_resource_group_hint() {
        let rg = ResourceId::resource_group("s", "rg");
        let scope = Scope::under(&rg);
        assert_eq!(scope.resource_group.as_deref(), Some("rg"));
        assert_eq!(
            scope.with_resource_group(Some("other")).resource_group.as_deref(),
            Some("other")
        );
        assert_eq!(scope.with_resource_group(None), scope);
    }

    #[test]
    fn test_hint_narrows_subscription_scope() {
        let sub = ResourceId::subscription("s");
        let scope = Scope::under(&sub);
        assert_eq!(scope.effective_parent(), Some(sub));
        assert_eq!(
            scope.with_resource_group(Some("rg")).effective_parent(),
            Some(ResourceId::resource_group("s", "rg"))
        );
    }
}
