//! Remote state fetcher contract.
//!
//! A fetcher is the only component that talks to a remote system. It
//! reads live state and submits mutations; everything above it (diff,
//! plan, executor, verifier) is provider-agnostic. Absence is reported
//! structurally as `Ok(None)`, never by matching on error text, and
//! mutation errors arrive pre-classified as transient or fatal so the
//! executor can decide whether to retry without knowing the provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::RemoteError;
use crate::planner::PlannedAction;
use crate::resource::{ObservedState, ResourceId};

/// Receipt for a submitted mutation.
///
/// Returned by [`RemoteStateFetcher::mutate`] once the remote system has
/// accepted the request. Acceptance is not convergence; the verifier
/// polls until the observed state actually matches.
#[derive(Debug, Clone, Serialize)]
pub struct MutationHandle {
    /// Unique identifier for this mutation.
    pub mutation_id: Uuid,
    /// Resource the mutation targets.
    pub resource: ResourceId,
    /// Remote identifier of the resource, if known after the mutation.
    /// Present after creates and updates, absent after deletes.
    pub remote_id: Option<String>,
    /// When the remote system accepted the mutation.
    pub submitted_at: DateTime<Utc>,
}

impl MutationHandle {
    /// Creates a handle for a freshly accepted mutation.
    #[must_use]
    pub fn new(resource: ResourceId, remote_id: Option<String>) -> Self {
        Self {
            mutation_id: Uuid::new_v4(),
            resource,
            remote_id,
            submitted_at: Utc::now(),
        }
    }
}

/// Trait for provider backends that read and mutate remote state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStateFetcher: Send + Sync {
    /// Fetches the current observed state of a resource.
    ///
    /// Returns `None` when the resource does not exist remotely. Absence
    /// is part of the contract, not an error.
    ///
    /// # Errors
    ///
    /// Returns a classified [`RemoteError`] when the remote system
    /// cannot be queried.
    async fn get(&self, id: &ResourceId) -> Result<Option<ObservedState>, RemoteError>;

    /// Submits a mutation to the remote system.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transient`] for failures worth retrying,
    /// [`RemoteError::Fatal`] for failures that are not, and
    /// [`RemoteError::NotFound`] when an update or delete targets a
    /// resource that no longer exists.
    async fn mutate(&self, action: &PlannedAction) -> Result<MutationHandle, RemoteError>;

    /// Returns the provider name this fetcher serves.
    fn provider(&self) -> &'static str;
}

#[async_trait]
impl RemoteStateFetcher for Box<dyn RemoteStateFetcher> {
    async fn get(&self, id: &ResourceId) -> Result<Option<ObservedState>, RemoteError> {
        (**self).get(id).await
    }

    async fn mutate(&self, action: &PlannedAction) -> Result<MutationHandle, RemoteError> {
        (**self).mutate(action).await
    }

    fn provider(&self) -> &'static str {
        (**self).provider()
    }
}
