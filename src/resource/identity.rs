//! Resource identifiers
//!
//! Parses and normalizes fully-qualified management identifiers of the form
//!
//! ```text
//! /subscriptions/{sub}[/resourceGroups/{rg}][/providers/{ns}/{type}/{name}[/{type}/{name}]*]
//! ```
//!
//! Identifiers compare and hash case-insensitively; `Display` always emits the
//! canonical keyword casing so that parse -> display -> parse is stable.

use super::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

pub const RESOURCES_NAMESPACE: &str = "Microsoft.Resources";

/// A resource type: provider namespace plus a (possibly nested) type path,
/// e.g. `Microsoft.DBforPostgreSQL` + `servers/databases`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceType {
    namespace: String,
    kind: String,
}

impl ResourceType {
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
        }
    }

    pub fn subscription() -> Self {
        Self::new(RESOURCES_NAMESPACE, "subscriptions")
    }

    pub fn resource_group() -> Self {
        Self::new(RESOURCES_NAMESPACE, "resourceGroups")
    }

    /// Parse `Namespace/type[/subtype]`
    pub fn parse(full: &str) -> Option<Self> {
        let (namespace, kind) = full.split_once('/')?;
        if namespace.is_empty() || kind.is_empty() {
            return None;
        }
        Some(Self::new(namespace, kind))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Last segment of the type path
    pub fn leaf(&self) -> &str {
        self.kind.rsplit('/').next().unwrap_or(&self.kind)
    }

    /// Type path of the enclosing resource, if this type is nested
    pub fn parent_kind(&self) -> Option<&str> {
        self.kind.rsplit_once('/').map(|(parent, _)| parent)
    }

    pub fn full(&self) -> String {
        format!("{}/{}", self.namespace, self.kind)
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        self.namespace.eq_ignore_ascii_case(&other.namespace)
            && self.kind.eq_ignore_ascii_case(&other.kind)
    }
}

impl Eq for ResourceType {}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.kind)
    }
}

/// Fully-qualified resource identifier
#[derive(Debug, Clone)]
pub struct ResourceId {
    subscription_id: String,
    resource_group: Option<String>,
    namespace: Option<String>,
    /// (type, name) pairs below the provider namespace, outermost first
    segments: Vec<(String, String)>,
}

impl ResourceId {
    pub fn subscription(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: None,
            namespace: None,
            segments: Vec::new(),
        }
    }

    pub fn resource_group(subscription_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: Some(name.into()),
            namespace: None,
            segments: Vec::new(),
        }
    }

    pub fn parse(id: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidId {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = id.trim().trim_start_matches('/').trim_end_matches('/');
        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty path segment"));
        }

        let subscription_id = match (parts.first(), parts.get(1)) {
            (Some(keyword), Some(sub)) if keyword.eq_ignore_ascii_case("subscriptions") => {
                sub.to_string()
            }
            _ => return Err(invalid("expected '/subscriptions/{id}' prefix")),
        };

        let mut idx = 2;
        let mut resource_group = None;
        if parts
            .get(idx)
            .is_some_and(|p| p.eq_ignore_ascii_case("resourceGroups"))
        {
            let name = parts
                .get(idx + 1)
                .ok_or_else(|| invalid("missing resource group name"))?;
            resource_group = Some(name.to_string());
            idx += 2;
        }

        let mut namespace = None;
        let mut segments = Vec::new();
        if idx < parts.len() {
            if !parts[idx].eq_ignore_ascii_case("providers") {
                return Err(invalid("expected 'providers' segment"));
            }
            let ns = parts
                .get(idx + 1)
                .ok_or_else(|| invalid("missing provider namespace"))?;
            let rest = &parts[idx + 2..];
            if rest.is_empty() || rest.len() % 2 != 0 {
                return Err(invalid("provider path must be type/name pairs"));
            }
            namespace = Some(ns.to_string());
            segments = rest
                .chunks(2)
                .map(|pair| (pair[0].to_string(), pair[1].to_string()))
                .collect();
        }

        Ok(Self {
            subscription_id,
            resource_group,
            namespace,
            segments,
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn resource_group_name(&self) -> Option<&str> {
        self.resource_group.as_deref()
    }

    pub fn is_subscription(&self) -> bool {
        self.resource_group.is_none() && self.segments.is_empty()
    }

    pub fn is_resource_group(&self) -> bool {
        self.resource_group.is_some() && self.segments.is_empty()
    }

    /// Leaf name of the identified resource
    pub fn name(&self) -> &str {
        self.segments
            .last()
            .map(|(_, name)| name.as_str())
            .or(self.resource_group.as_deref())
            .unwrap_or(&self.subscription_id)
    }

    pub fn resource_type(&self) -> ResourceType {
        match &self.namespace {
            Some(ns) => ResourceType::new(ns.clone(), self.type_path()),
            None if self.resource_group.is_some() => ResourceType::resource_group(),
            None => ResourceType::subscription(),
        }
    }

    fn type_path(&self) -> String {
        self.segments
            .iter()
            .map(|(t, _)| t.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn parent(&self) -> Option<ResourceId> {
        if !self.segments.is_empty() {
            let mut parent = self.clone();
            parent.segments.pop();
            if parent.segments.is_empty() {
                parent.namespace = None;
            }
            return Some(parent);
        }
        if self.resource_group.is_some() {
            return Some(Self::subscription(self.subscription_id.clone()));
        }
        None
    }

    /// Chain from the subscription root down to (and including) this id
    pub fn ancestors(&self) -> Vec<ResourceId> {
        let mut chain = vec![self.clone()];
        let mut current = self.parent();
        while let Some(id) = current {
            current = id.parent();
            chain.push(id);
        }
        chain.reverse();
        chain
    }

    /// REST collection path holding resources of `kind` under `parent`
    pub fn collection_path(parent: Option<&ResourceId>, kind: &ResourceType) -> Result<String> {
        let Some(parent) = parent else {
            if *kind == ResourceType::subscription() {
                return Ok("/subscriptions".to_string());
            }
            return Err(Error::Validation(format!("'{kind}' requires a parent scope")));
        };

        if *kind == ResourceType::resource_group() {
            if parent.is_subscription() {
                return Ok(format!("{parent}/resourceGroups"));
            }
            return Err(Error::Validation(
                "resource groups only exist under a subscription".to_string(),
            ));
        }

        match (&parent.namespace, kind.parent_kind()) {
            (None, None) => Ok(format!(
                "{parent}/providers/{}/{}",
                kind.namespace(),
                kind.kind()
            )),
            (Some(ns), Some(parent_kind))
                if ns.eq_ignore_ascii_case(kind.namespace())
                    && parent.type_path().eq_ignore_ascii_case(parent_kind) =>
            {
                Ok(format!("{parent}/{}", kind.leaf()))
            }
            _ => Err(Error::Validation(format!(
                "'{kind}' cannot be nested under '{}'",
                parent.resource_type()
            ))),
        }
    }

    /// Identifier of a child resource of `kind` named `name`
    pub fn child(&self, kind: &ResourceType, name: &str) -> Result<ResourceId> {
        validate_name(name)?;
        let collection = Self::collection_path(Some(self), kind)?;
        Self::parse(&format!("{collection}/{name}"))
    }

    /// Identifier of a child named `name` in an explicit collection below this
    /// id, such as `blobServices/default/containers`
    pub fn child_in(&self, collection: &str, name: &str) -> Result<ResourceId> {
        validate_name(name)?;
        Self::parse(&format!("{self}/{}/{name}", collection.trim_matches('/')))
    }

    /// Lowercased canonical form, used as cache key
    pub fn normalized(&self) -> String {
        self.to_string().to_lowercase()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("resource name must not be empty".to_string()));
    }
    if name.contains('/') {
        return Err(Error::Validation(format!(
            "resource name '{name}' must not contain '/'"
        )));
    }
    Ok(())
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/subscriptions/{}", self.subscription_id)?;
        if let Some(rg) = &self.resource_group {
            write!(f, "/resourceGroups/{rg}")?;
        }
        if let Some(ns) = &self.namespace {
            write!(f, "/providers/{ns}")?;
            for (kind, name) in &self.segments {
                write!(f, "/{kind}/{name}")?;
            }
        }
        Ok(())
    }
}

impl PartialEq for ResourceId {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for ResourceId {}

impl Hash for ResourceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
