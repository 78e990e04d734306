//! Error taxonomy and failure classification
//!
//! Every failure coming back from a remote binding is funneled through
//! [`ErrorClassifier`] before it reaches a caller. Read paths turn
//! [`ErrorKind::NotFound`] into an absent result; everything else is surfaced
//! as one of the [`Error`] variants below.

use super::registry::ResourceKind;
use super::remote::{FailureHint, Scope};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Broad failure category, independent of the wire status that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Local, pre-remote check failed
    Validation,
    NotFound,
    Authorization,
    Conflict,
    /// Rate limiting, server-side hiccups, timeouts
    Transient,
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

/// What a remediation prompt does when the user picks it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "target", rename_all = "snake_case")]
pub enum RemediationAction {
    /// Open the access policy editor of the given resource
    ConfigureAccess(String),
    /// Open a documentation page
    OpenUrl(String),
}

/// A user-facing, actionable follow-up attached to an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remediation {
    pub title: String,
    pub action: RemediationAction,
}

impl Remediation {
    pub fn configure_access(scope: impl Into<String>) -> Self {
        Self {
            title: "Review access policy".to_string(),
            action: RemediationAction::ConfigureAccess(scope.into()),
        }
    }

    pub fn learn_more(url: impl Into<String>) -> Self {
        Self {
            title: "Learn more".to_string(),
            action: RemediationAction::OpenUrl(url.into()),
        }
    }
}

/// Errors surfaced by the resource tree
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid resource id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("access denied: {message}")]
    Authorization {
        message: String,
        remediation: Vec<Remediation>,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidId { .. } | Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Authorization { .. } => ErrorKind::Authorization,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Transient(_) => ErrorKind::Transient,
            Error::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Remediation prompts; empty for everything but authorization failures
    pub fn remediation(&self) -> &[Remediation] {
        match self {
            Error::Authorization { remediation, .. } => remediation,
            _ => &[],
        }
    }

    /// Underlying message without the category prefix
    pub fn message(&self) -> &str {
        match self {
            Error::InvalidId { reason, .. } => reason,
            Error::Validation(m)
            | Error::NotFound(m)
            | Error::Conflict(m)
            | Error::Transient(m)
            | Error::Fatal(m) => m,
            Error::Authorization { message, .. } => message,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maps raw remote failures onto [`ErrorKind`] and builds the surfaced error
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    docs_url: String,
}

impl ErrorClassifier {
    pub fn new(docs_url: impl Into<String>) -> Self {
        Self {
            docs_url: docs_url.into(),
        }
    }

    pub fn docs_url(&self) -> &str {
        &self.docs_url
    }

    /// Category for a failure hint
    pub fn kind_of(hint: &FailureHint) -> ErrorKind {
        match hint.status {
            Some(404) | Some(410) => ErrorKind::NotFound,
            Some(403) => ErrorKind::Authorization,
            Some(409) | Some(412) => ErrorKind::Conflict,
            Some(408) | Some(429) => ErrorKind::Transient,
            Some(status) if (500..600).contains(&status) => ErrorKind::Transient,
            Some(_) => ErrorKind::Fatal,
            // Caller-initiated cancellation is not worth retrying
            None if hint.cancelled => ErrorKind::Fatal,
            None if hint.timed_out => ErrorKind::Transient,
            None => ErrorKind::Fatal,
        }
    }

    /// Build the caller-facing error, attaching remediation for access failures
    pub fn classify(&self, hint: FailureHint, kind: &dyn ResourceKind, scope: &Scope) -> Error {
        let category = Self::kind_of(&hint);
        let message = hint.root_cause;
        tracing::debug!(kind = %category, status = ?hint.status, "classified remote failure: {}", message);

        match category {
            ErrorKind::NotFound => Error::NotFound(message),
            ErrorKind::Authorization => Error::Authorization {
                message,
                remediation: kind.remediation(scope, &self.docs_url),
            },
            ErrorKind::Conflict => Error::Conflict(message),
            ErrorKind::Transient => Error::Transient(message),
            ErrorKind::Validation | ErrorKind::Fatal => Error::Fatal(message),
        }
    }
}
