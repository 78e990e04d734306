//! Azure Resource Manager interaction module
//!
//! # Module Structure
//!
//! - [`auth`] - Bearer tokens from a fixed token or the Azure CLI
//! - [`client`] - Management client and URL building
//! - [`http`] - HTTP utilities for REST calls
//! - [`binding`] - [`RemoteBinding`](crate::resource::RemoteBinding) over the REST API
//! - [`keyvault`] - Secret versions from the Key Vault data plane
//!
//! # Example
//!
//! ```ignore
//! use aztree::azure::{arm_registry, ArmClient, Credentials};
//! use aztree::resource::{builtin_definitions, ResourceTree, TreeOptions};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = ArmClient::new("https://management.azure.com/", Credentials::azure_cli())?;
//!     let tree = ResourceTree::new(arm_registry(&client, builtin_definitions()), TreeOptions::default());
//!     let sub = tree.subscription("00000000-0000-0000-0000-000000000000")?;
//!     let groups = tree.module_for(&sub, "resource-groups")?.list().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod binding;
pub mod client;
pub mod http;
pub mod keyvault;

pub use auth::Credentials;
pub use binding::{arm_registry, RestBinding};
pub use client::ArmClient;
pub use keyvault::VaultVersionsBinding;
