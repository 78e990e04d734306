//! Resource status state machine

use serde::Serialize;
use std::fmt;

/// Remote-sync state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Never loaded, or reset by an invalidation
    Unknown,
    Loading,
    /// Local snapshot matches the last successful remote read or write
    Ok,
    /// A committed mutation was accepted but is not yet reflected remotely
    Pending,
    Deleting,
    Deleted,
    Error,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Unknown,
        Status::Loading,
        Status::Ok,
        Status::Pending,
        Status::Deleting,
        Status::Deleted,
        Status::Error,
    ];
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Unknown => "UNKNOWN",
            Status::Loading => "LOADING",
            Status::Ok => "OK",
            Status::Pending => "PENDING",
            Status::Deleting => "DELETING",
            Status::Deleted => "DELETED",
            Status::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Things that happen to a resource, fed to [`StatusEngine::next`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    LoadStarted,
    /// Remote returned a snapshot; `settled` is false while provisioning is in flight
    Loaded { settled: bool },
    LoadAbsent,
    LoadFailed,
    /// A draft commit succeeded; `accepted` when the remote has not applied it yet
    Committed { accepted: bool },
    DeleteStarted,
    DeleteConfirmed,
    DeleteFailed { before: Status },
    Invalidated,
}

/// The only place status transitions are computed
pub struct StatusEngine;

impl StatusEngine {
    pub fn next(current: Status, event: StatusEvent) -> Status {
        use Status::*;
        use StatusEvent::*;

        match (current, event) {
            (Deleting | Deleted, LoadStarted) => current,
            (_, LoadStarted) => Loading,
            (Loading, Loaded { settled: true }) => Ok,
            (Loading, Loaded { settled: false }) => Pending,
            (Loading, LoadAbsent) => Unknown,
            (Loading, LoadFailed) => Error,
            (_, Committed { accepted: false }) => Ok,
            (_, Committed { accepted: true }) => Pending,
            (_, DeleteStarted) => Deleting,
            (_, DeleteConfirmed) => Deleted,
            (Deleting, DeleteFailed { before }) => before,
            (Deleted, Invalidated) => Deleted,
            (_, Invalidated) => Unknown,
            (state, ignored) => {
                tracing::trace!(?state, ?ignored, "status event does not apply");
                state
            }
        }
    }
}
