//! Configuration Management
//!
//! Handles persistent configuration storage for aztree.

use crate::resource::tree::{DEFAULT_ACCESS_DOCS_URL, DEFAULT_MAX_LIST_PAGES};
use crate::resource::TreeOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com/";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Management endpoint (sovereign clouds use their own)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Last used subscription
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Documentation offered when access is denied
    #[serde(default)]
    pub access_docs_url: Option<String>,
    #[serde(default)]
    pub max_list_pages: Option<usize>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("aztree").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path; a missing or malformed file yields defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    /// Get effective endpoint (config > AZURE_RESOURCE_MANAGER_URL > public cloud)
    pub fn effective_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .or_else(|| std::env::var("AZURE_RESOURCE_MANAGER_URL").ok())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    /// Get effective subscription (config > environment / Azure CLI default)
    pub fn effective_subscription(&self) -> Option<String> {
        self.subscription_id
            .clone()
            .or_else(crate::azure::auth::get_default_subscription)
    }

    pub fn tree_options(&self) -> TreeOptions {
        TreeOptions {
            access_docs_url: self
                .access_docs_url
                .clone()
                .unwrap_or_else(|| DEFAULT_ACCESS_DOCS_URL.to_string()),
            max_list_pages: self.max_list_pages.unwrap_or(DEFAULT_MAX_LIST_PAGES),
        }
    }

    /// Set subscription and save
    pub fn set_subscription(&mut self, subscription_id: &str) -> Result<()> {
        self.subscription_id = Some(subscription_id.to_string());
        self.save()
    }
}
