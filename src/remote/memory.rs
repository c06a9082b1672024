//! In-memory provider backend.
//!
//! Holds remote state in a map and implements the full fetcher
//! contract, including reference resolution against its own store and
//! configurable settle delays and fault injection. Used by the `memory`
//! provider for local runs and throughout the test suite.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::RemoteError;
use crate::planner::{ActionKind, PlannedAction};
use crate::resource::{AttributeValue, ObservedState, ResourceId, ResourceStatus};

use super::fetcher::{MutationHandle, RemoteStateFetcher};

/// Scripted failure for a single resource.
#[derive(Debug, Clone)]
enum Fault {
    /// The next `remaining` mutations fail transiently.
    Transient { remaining: u32 },
    /// Every mutation fails fatally.
    Fatal { message: String },
    /// The resource never reaches a stable status.
    NeverSettle,
}

/// One resource as the remote system stores it.
#[derive(Debug, Clone)]
struct StoredResource {
    remote_id: String,
    attributes: BTreeMap<String, AttributeValue>,
    status: ResourceStatus,
    polls_until_stable: u32,
}

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<ResourceId, StoredResource>,
    faults: BTreeMap<ResourceId, Fault>,
    mutations: Vec<MutationHandle>,
    next_id: u64,
}

/// In-memory remote backend.
#[derive(Debug, Default)]
pub struct InMemoryFetcher {
    inner: Mutex<Inner>,
    /// Polls a freshly created resource spends in `Pending` before it
    /// reports `Running`.
    settle_polls: u32,
}

impl InMemoryFetcher {
    /// Creates an empty backend whose resources settle immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend whose created resources stay `Pending` for the
    /// given number of polls.
    #[must_use]
    pub fn with_settle_after(polls: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            settle_polls: polls,
        }
    }

    /// Preloads a resource as if it already existed remotely.
    pub async fn seed(&self, state: ObservedState) {
        let mut inner = self.inner.lock().await;
        let remote_id = state
            .remote_id
            .unwrap_or_else(|| format!("mem-{}", inner.next_id));
        inner.next_id += 1;
        inner.resources.insert(
            state.id,
            StoredResource {
                remote_id,
                attributes: state.attributes,
                status: state.status,
                polls_until_stable: 0,
            },
        );
    }

    /// Makes the next `times` mutations of a resource fail transiently.
    pub async fn fail_transient(&self, id: ResourceId, times: u32) {
        let mut inner = self.inner.lock().await;
        inner.faults.insert(id, Fault::Transient { remaining: times });
    }

    /// Makes every mutation of a resource fail fatally.
    pub async fn fail_fatal(&self, id: ResourceId, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.faults.insert(
            id,
            Fault::Fatal {
                message: message.into(),
            },
        );
    }

    /// Keeps a resource in `Pending` forever once created.
    pub async fn never_settle(&self, id: ResourceId) {
        let mut inner = self.inner.lock().await;
        inner.faults.insert(id, Fault::NeverSettle);
    }

    /// Number of resources currently stored.
    pub async fn resource_count(&self) -> usize {
        self.inner.lock().await.resources.len()
    }

    /// Number of mutations accepted so far.
    pub async fn mutation_count(&self) -> usize {
        self.inner.lock().await.mutations.len()
    }

    /// Resources in the order their mutations were accepted.
    pub async fn mutation_order(&self) -> Vec<ResourceId> {
        self.inner
            .lock()
            .await
            .mutations
            .iter()
            .map(|m| m.resource.clone())
            .collect()
    }

    /// Remote identifier of a stored resource.
    pub async fn remote_id_of(&self, id: &ResourceId) -> Option<String> {
        self.inner
            .lock()
            .await
            .resources
            .get(id)
            .map(|r| r.remote_id.clone())
    }

    /// One attribute of a stored resource.
    pub async fn remote_attribute(&self, id: &ResourceId, name: &str) -> Option<AttributeValue> {
        self.inner
            .lock()
            .await
            .resources
            .get(id)
            .and_then(|r| r.attributes.get(name).cloned())
    }

    /// Resolves reference values against the stored resources, so a
    /// created dependent records the concrete identifier of its
    /// dependency the way a real provider would.
    fn resolve(value: &AttributeValue, resources: &BTreeMap<ResourceId, StoredResource>) -> AttributeValue {
        match value {
            AttributeValue::Reference(r) => resources.get(&r.resource).map_or_else(
                || value.clone(),
                |target| {
                    if r.attribute == "id" {
                        AttributeValue::Str(target.remote_id.clone())
                    } else {
                        target
                            .attributes
                            .get(&r.attribute)
                            .cloned()
                            .unwrap_or_else(|| value.clone())
                    }
                },
            ),
            AttributeValue::List(items) => AttributeValue::List(
                items.iter().map(|v| Self::resolve(v, resources)).collect(),
            ),
            AttributeValue::Nested(map) => AttributeValue::Nested(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::resolve(v, resources)))
                    .collect(),
            ),
            AttributeValue::Str(_) | AttributeValue::Int(_) | AttributeValue::Bool(_) => {
                value.clone()
            }
        }
    }

    /// Consumes one fault charge for a resource, if any is scripted.
    fn check_fault(inner: &mut Inner, id: &ResourceId) -> Result<(), RemoteError> {
        match inner.faults.get_mut(id) {
            Some(Fault::Transient { remaining }) if *remaining > 0 => {
                *remaining -= 1;
                if *remaining == 0 {
                    inner.faults.remove(id);
                }
                Err(RemoteError::transient("simulated transient failure"))
            }
            Some(Fault::Fatal { message }) => Err(RemoteError::fatal(message.clone())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStateFetcher for InMemoryFetcher {
    async fn get(&self, id: &ResourceId) -> Result<Option<ObservedState>, RemoteError> {
        let mut inner = self.inner.lock().await;
        let never_settles = matches!(inner.faults.get(id), Some(Fault::NeverSettle));

        let Some(stored) = inner.resources.get_mut(id) else {
            return Ok(None);
        };

        if stored.status == ResourceStatus::Pending && !never_settles {
            // Check before decrementing: a resource created with a settle
            // delay of n stays Pending for exactly n polls
            if stored.polls_until_stable == 0 {
                stored.status = ResourceStatus::Running;
            } else {
                stored.polls_until_stable -= 1;
            }
        }

        Ok(Some(ObservedState {
            id: id.clone(),
            remote_id: Some(stored.remote_id.clone()),
            attributes: stored.attributes.clone(),
            status: stored.status,
            fetched_at: Utc::now(),
        }))
    }

    async fn mutate(&self, action: &PlannedAction) -> Result<MutationHandle, RemoteError> {
        let mut inner = self.inner.lock().await;
        Self::check_fault(&mut inner, &action.resource)?;

        let handle = match action.kind {
            ActionKind::Create => {
                let Some(spec) = &action.spec else {
                    return Err(RemoteError::fatal("create submitted without a spec"));
                };
                let attributes: BTreeMap<String, AttributeValue> = spec
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::resolve(v, &inner.resources)))
                    .collect();
                let remote_id = format!("mem-{}", inner.next_id);
                inner.next_id += 1;
                let status = if self.settle_polls == 0 {
                    ResourceStatus::Running
                } else {
                    ResourceStatus::Pending
                };
                debug!("Creating {} as {remote_id}", action.resource);
                inner.resources.insert(
                    action.resource.clone(),
                    StoredResource {
                        remote_id: remote_id.clone(),
                        attributes,
                        status,
                        polls_until_stable: self.settle_polls,
                    },
                );
                MutationHandle::new(action.resource.clone(), Some(remote_id))
            }

            ActionKind::Update => {
                let Some(spec) = &action.spec else {
                    return Err(RemoteError::fatal("update submitted without a spec"));
                };
                let attributes: BTreeMap<String, AttributeValue> = spec
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::resolve(v, &inner.resources)))
                    .collect();
                let Some(stored) = inner.resources.get_mut(&action.resource) else {
                    return Err(RemoteError::not_found(action.resource.to_string()));
                };
                debug!("Updating {} ({})", action.resource, stored.remote_id);
                stored.attributes = attributes;
                let remote_id = stored.remote_id.clone();
                MutationHandle::new(action.resource.clone(), Some(remote_id))
            }

            ActionKind::Delete => {
                if inner.resources.remove(&action.resource).is_none() {
                    return Err(RemoteError::not_found(action.resource.to_string()));
                }
                debug!("Deleting {}", action.resource);
                MutationHandle::new(action.resource.clone(), None)
            }
        };

        inner.mutations.push(handle.clone());
        Ok(handle)
    }

    fn provider(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceSpec;

    fn create_action(spec: ResourceSpec) -> PlannedAction {
        PlannedAction {
            kind: ActionKind::Create,
            resource: spec.id.clone(),
            provider: Some(String::from("memory")),
            spec: Some(spec),
            remote_id: None,
            attribute_diffs: vec![],
            reason: String::new(),
            new_hash: None,
            dependencies: vec![],
        }
    }

    fn delete_action(id: ResourceId) -> PlannedAction {
        PlannedAction {
            kind: ActionKind::Delete,
            resource: id,
            provider: Some(String::from("memory")),
            spec: None,
            remote_id: None,
            attribute_diffs: vec![],
            reason: String::new(),
            new_hash: None,
            dependencies: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let fetcher = InMemoryFetcher::new();
        let spec = ResourceSpec::new(ResourceId::new("instance", "web"), "memory")
            .with_attribute("image_id", AttributeValue::str("img-v1"));

        let handle = fetcher.mutate(&create_action(spec.clone())).await.unwrap();
        assert!(handle.remote_id.is_some());

        let observed = fetcher.get(&spec.id).await.unwrap().unwrap();
        assert_eq!(observed.status, ResourceStatus::Running);
        assert_eq!(
            observed.attributes.get("image_id"),
            Some(&AttributeValue::str("img-v1"))
        );
    }

    #[tokio::test]
    async fn test_get_missing_is_none_not_error() {
        let fetcher = InMemoryFetcher::new();
        let result = fetcher
            .get(&ResourceId::new("instance", "ghost"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_transient_fault_consumed_then_succeeds() {
        let fetcher = InMemoryFetcher::new();
        let spec = ResourceSpec::new(ResourceId::new("instance", "web"), "memory");
        fetcher.fail_transient(spec.id.clone(), 2).await;

        let action = create_action(spec);
        let first = fetcher.mutate(&action).await.unwrap_err();
        assert!(first.is_transient());
        let second = fetcher.mutate(&action).await.unwrap_err();
        assert!(second.is_transient());
        assert!(fetcher.mutate(&action).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_missing_reports_not_found() {
        let fetcher = InMemoryFetcher::new();
        let err = fetcher
            .mutate(&delete_action(ResourceId::new("instance", "gone")))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_reference_resolves_to_remote_id() {
        let fetcher = InMemoryFetcher::new();
        let sg_id = ResourceId::new("security_group", "web");
        let sg = ResourceSpec::new(sg_id.clone(), "memory");
        fetcher.mutate(&create_action(sg)).await.unwrap();
        let sg_remote = fetcher.remote_id_of(&sg_id).await.unwrap();

        let instance = ResourceSpec::new(ResourceId::new("instance", "web"), "memory")
            .with_attribute("security_group", AttributeValue::reference(sg_id, "id"));
        fetcher.mutate(&create_action(instance.clone())).await.unwrap();

        let stored = fetcher
            .remote_attribute(&instance.id, "security_group")
            .await
            .unwrap();
        assert_eq!(stored, AttributeValue::Str(sg_remote));
    }

    #[tokio::test]
    async fn test_settle_delay_reaches_running_after_polls() {
        let fetcher = InMemoryFetcher::with_settle_after(2);
        let spec = ResourceSpec::new(ResourceId::new("instance", "slow"), "memory");
        fetcher.mutate(&create_action(spec.clone())).await.unwrap();

        let first = fetcher.get(&spec.id).await.unwrap().unwrap();
        assert_eq!(first.status, ResourceStatus::Pending);
        let second = fetcher.get(&spec.id).await.unwrap().unwrap();
        assert_eq!(second.status, ResourceStatus::Pending);
        let third = fetcher.get(&spec.id).await.unwrap().unwrap();
        assert_eq!(third.status, ResourceStatus::Running);
    }

    #[tokio::test]
    async fn test_never_settle_stays_pending() {
        let fetcher = InMemoryFetcher::with_settle_after(1);
        let spec = ResourceSpec::new(ResourceId::new("instance", "stuck"), "memory");
        fetcher.never_settle(spec.id.clone()).await;
        fetcher.mutate(&create_action(spec.clone())).await.unwrap();

        for _ in 0..5 {
            let observed = fetcher.get(&spec.id).await.unwrap().unwrap();
            assert_eq!(observed.status, ResourceStatus::Pending);
        }
    }
}
