//! aztree: a cached, lazily populated tree of Azure resources.
//!
//! [`resource`] holds the generic core (identity, cache, modules, drafts,
//! status, error classification); [`azure`] binds it to the Resource Manager
//! REST API.

pub mod azure;
pub mod config;
pub mod resource;

pub use resource::{Error, ErrorKind, Resource, ResourceModule, ResourceTree, Result, Status};

/// Version injected at compile time via AZTREE_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("AZTREE_VERSION") {
    Some(v) => v,
    None => "dev",
};
