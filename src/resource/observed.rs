//! Observed remote state for a resource.
//!
//! Observed state is produced exclusively by a remote state fetcher and
//! never mutated by the engine; each fetch replaces the previous
//! snapshot wholesale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::spec::ResourceId;
use super::value::AttributeValue;

/// Lifecycle status of a remote resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// The resource is being created or transitioning.
    Pending,
    /// The resource is live and serving.
    Running,
    /// The resource exists but is stopped.
    Stopped,
    /// The resource has been terminated and will disappear.
    Terminated,
    /// The remote system reported a status this engine does not model.
    #[default]
    Unknown,
}

impl ResourceStatus {
    /// Maps a vendor-reported status string onto the closed enum.
    ///
    /// Unrecognized strings map to [`Self::Unknown`]; status mapping is
    /// total and never fails.
    #[must_use]
    pub fn from_vendor(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "pending" | "starting" | "stopping" | "creating" => Self::Pending,
            "running" | "active" | "available" => Self::Running,
            "stopped" => Self::Stopped,
            "terminated" | "deleted" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    /// Returns true for statuses that count as settled when verifying
    /// convergence of a create or update.
    #[must_use]
    pub const fn is_stable(self) -> bool {
        matches!(self, Self::Running | Self::Stopped)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A snapshot of remote state for one resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedState {
    /// Identifier of the resource this snapshot belongs to.
    pub id: ResourceId,
    /// Identifier assigned by the remote system (e.g. `i-8b9f...`).
    pub remote_id: Option<String>,
    /// Attribute values as reported remotely, ordered by name.
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Lifecycle status at fetch time.
    pub status: ResourceStatus,
    /// When this snapshot was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl ObservedState {
    /// Creates a snapshot with the current time as fetch timestamp.
    #[must_use]
    pub fn new(
        id: ResourceId,
        attributes: BTreeMap<String, AttributeValue>,
        status: ResourceStatus,
    ) -> Self {
        Self {
            id,
            remote_id: None,
            attributes,
            status,
            fetched_at: Utc::now(),
        }
    }

    /// Sets the remote-assigned identifier.
    #[must_use]
    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    /// Returns the value of a single observed attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}
