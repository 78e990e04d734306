//! Resource abstraction layer
//!
//! A cached, lazily populated tree of remote resources. Every kind is handled
//! by the same generic [`Resource`] / [`ResourceModule`] pair, parameterized
//! by a [`ResourceKind`] adapter and a [`RemoteBinding`].
//!
//! # Architecture
//!
//! - [`identity`] - Parses and normalizes fully-qualified resource identifiers
//! - [`cache`] - Sharded, per-module cache partitions
//! - [`entity`] - Resource nodes holding snapshot and status
//! - [`module`] - Per-(parent, kind) gateway to the remote binding
//! - [`draft`] - Staged mutations and the commit protocol
//! - [`status`] - The status state machine
//! - [`error`] - Error taxonomy and failure classification
//! - [`registry`] - Kind definitions (embedded JSON), bindings and resolvers
//! - [`remote`] - The remote binding contract
//! - [`tree`] - Subscription roots and module lookup
//!
//! # Example
//!
//! ```ignore
//! use aztree::resource::{ResourceTree, TreeOptions};
//!
//! async fn add_rule(tree: &ResourceTree, server: &std::sync::Arc<aztree::resource::Resource>) -> aztree::Result<()> {
//!     let rules = tree.module_for(server, "postgres-firewall-rules")?;
//!     let draft = rules.create("office", Default::default())?;
//!     draft.set("properties.startIpAddress", "10.0.0.1".into())?;
//!     draft.set("properties.endIpAddress", "10.0.0.255".into())?;
//!     draft.commit().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod draft;
pub mod entity;
pub mod error;
pub mod identity;
pub mod module;
pub mod registry;
pub mod remote;
pub mod status;
pub mod tree;

pub use cache::ResourceCache;
pub use draft::{Draft, DraftState, DraftTarget};
pub use entity::Resource;
pub use error::{Error, ErrorClassifier, ErrorKind, Remediation, RemediationAction, Result};
pub use identity::{ResourceId, ResourceType};
pub use module::ResourceModule;
pub use registry::{
    builtin_definitions, KindBinding, Plane, Registry, Resolver, ResourceConfig, ResourceDef,
    ResourceKind,
};
pub use remote::{Applied, Deleted, FailureHint, Fetched, HttpStatusError, Page, RemoteBinding, Scope};
pub use status::{Status, StatusEngine, StatusEvent};
pub use tree::{ResourceTree, TreeOptions, SUBSCRIPTION_KIND};
