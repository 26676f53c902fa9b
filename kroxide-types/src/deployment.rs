//! Deployment holds the direct-apply data model (§3, §6): deployment records, progress events,
//! options, and results. The apply loop itself lives in `kroxide-engine`; this crate only
//! defines the shapes it produces and consumes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reference::ResourceId;

/// ResourceStatus is a [`DeployedResource`]'s lifecycle state (§3): monotonic along
/// `pending -> deployed -> ready`, or to `failed` from any state (§8 "Monotonic status").
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceStatus {
    /// Not yet applied.
    Pending,
    /// Applied to the cluster, not yet confirmed ready.
    Deployed,
    /// Applied and confirmed ready.
    Ready,
    /// Failed at some stage; terminal.
    Failed,
}

impl ResourceStatus {
    /// Can_transition_to reports whether moving from `self` to `next` is a legal, monotonic
    /// transition (§8: "no backward transitions").
    pub fn can_transition_to(self, next: Self) -> bool {
        use ResourceStatus::{Deployed, Failed, Pending, Ready};
        match (self, next) {
            (_, Failed) => true,
            (Pending, Deployed | Ready) => true,
            (Deployed, Ready) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

/// DeployedResource is `{id, kind, name, namespace, manifest, status, deployedAt, error?}` (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployedResource {
    /// Id is the resource's composition-scoped id.
    pub id: ResourceId,
    /// Kind is the Kubernetes kind.
    pub kind: String,
    /// Name is the Kubernetes object name.
    pub name: String,
    /// Namespace, if the kind is namespaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Manifest is the post-resolution manifest that was (or would be) applied.
    pub manifest: Value,
    /// Status is the resource's current lifecycle state.
    pub status: ResourceStatus,
    /// DeployedAt is when the resource was applied, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
    /// Error describes the failure, if `status == Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeployedResource {
    /// Pending constructs a resource in its initial state.
    pub fn pending(id: ResourceId, kind: impl Into<String>, name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            name: name.into(),
            namespace,
            manifest: Value::Null,
            status: ResourceStatus::Pending,
            deployed_at: None,
            error: None,
        }
    }

    /// Transition_to moves this resource to `next`, panicking if the transition would be
    /// non-monotonic — a programmer error in the deployer, never a user-triggerable condition
    /// (§8's invariant is meant to hold by construction).
    pub fn transition_to(&mut self, next: ResourceStatus) {
        assert!(
            self.status.can_transition_to(next),
            "illegal status transition {:?} -> {:?} for {:?}",
            self.status,
            next,
            self.id
        );
        self.status = next;
    }
}

/// DeploymentStatus is the outcome of a whole [`DeploymentRecord`] (§6, §7).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeploymentStatus {
    /// Still applying resources.
    Running,
    /// All resources applied (and ready, if requested) successfully.
    Completed,
    /// Some resources succeeded, at least one failed, and no rollback occurred.
    Partial,
    /// The deployment failed and (if requested) was rolled back.
    Failed,
}

/// RetryPolicy controls the API-call retry behaviour applied to each resource apply (§4.3.3,
/// §6): `{maxRetries=3, backoffMultiplier=2, initialDelay=1000, maxDelay=10000}`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// MaxRetries is the maximum number of additional attempts after the first.
    pub max_retries: u32,
    /// BackoffMultiplier is the exponential backoff factor.
    pub backoff_multiplier: f64,
    /// InitialDelay is the first retry's delay.
    pub initial_delay: Duration,
    /// MaxDelay caps the backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_multiplier: 2.0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay_for returns the backoff delay before retry attempt `attempt` (0-indexed), capped at
    /// `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let millis = (self.initial_delay.as_millis() as f64) * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// DeploymentMode selects between direct in-process apply and the alchemy side-channel (§6).
/// The core only implements `Direct`; `Alchemy` is accepted so options round-trip, but routing
/// to the alchemy collaborator is out of scope (§1).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// The engine resolves references and applies resources itself.
    #[default]
    Direct,
    /// Delegates to the out-of-scope alchemy collaborator.
    Alchemy,
}

/// DeploymentOptions configures a deployment (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentOptions {
    /// Mode selects direct or alchemy deployment.
    #[serde(default)]
    pub mode: DeploymentMode,
    /// Namespace overrides the target namespace for namespaced resources lacking one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// WaitForReady, if true, blocks on the readiness engine (§4.4) after each apply.
    #[serde(default = "default_true")]
    pub wait_for_ready: bool,
    /// Timeout bounds each resource's apply-plus-readiness-wait.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
    /// DryRun, if true, resolves references and builds manifests but never calls the cluster.
    #[serde(default)]
    pub dry_run: bool,
    /// RollbackOnFailure, if true, triggers rollback (§4.3.4) on the first resource failure.
    #[serde(default)]
    pub rollback_on_failure: bool,
    /// RetryPolicy overrides the default retry policy.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// HydrateStatus, if true, runs the status hydrator (§4.5) once per resource.
    #[serde(default = "default_true")]
    pub hydrate_status: bool,
    /// EventMonitorOptions configures the event monitor (§4.6); `None` disables it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_monitor: Option<EventMonitorOptions>,
}

fn default_true() -> bool {
    true
}
fn default_timeout() -> Duration {
    Duration::from_millis(300_000)
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::default(),
            namespace: None,
            wait_for_ready: true,
            timeout: default_timeout(),
            dry_run: false,
            rollback_on_failure: false,
            retry_policy: RetryPolicy::default(),
            hydrate_status: true,
            event_monitor: None,
        }
    }
}

/// EventMonitorOptions configures the event monitor (§4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMonitorOptions {
    /// EventTypes filters delivered events by `involvedObject`'s event type.
    #[serde(default = "default_event_types")]
    pub event_types: Vec<String>,
    /// MaxWatchConnections caps pooled watch connections (default 10, §4.6).
    #[serde(default = "default_max_watches")]
    pub max_watch_connections: usize,
    /// DiscoverChildren enables owner-reference-driven child discovery (default on, §4.6).
    #[serde(default = "default_true")]
    pub discover_children: bool,
}

fn default_event_types() -> Vec<String> {
    vec!["Warning".into(), "Error".into()]
}
fn default_max_watches() -> usize {
    10
}

impl Default for EventMonitorOptions {
    fn default() -> Self {
        Self {
            event_types: default_event_types(),
            max_watch_connections: default_max_watches(),
            discover_children: true,
        }
    }
}

/// ProgressEventKind is the tag of a [`ProgressEvent`] (§6).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressEventKind {
    /// Deployment started.
    Started,
    /// Generic progress update.
    Progress,
    /// Deployment completed (possibly partially).
    Completed,
    /// Deployment failed.
    Failed,
    /// Rollback occurred.
    Rollback,
    /// A resource's readiness message changed.
    ResourceStatus,
    /// A resource became ready.
    ResourceReady,
    /// A non-fatal warning about a resource.
    ResourceWarning,
    /// A Kubernetes event was observed by the event monitor.
    KubernetesEvent,
    /// A child resource was discovered via owner references.
    ChildResourceDiscovered,
}

/// ProgressEvent is emitted to the user's progress callback (§6): `{type, message, timestamp,
/// resourceId?, details?, error?}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Type is the event's kind.
    #[serde(rename = "type")]
    pub kind: ProgressEventKind,
    /// Message is a human-readable description.
    pub message: String,
    /// Timestamp is when the event occurred.
    pub timestamp: DateTime<Utc>,
    /// ResourceId names the resource this event concerns, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,
    /// Details carries arbitrary structured context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Error describes the failure, for `failed`/`resource-warning` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    /// New constructs an event with the current time and no resource/details/error.
    pub fn new(kind: ProgressEventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            resource_id: None,
            details: None,
            error: None,
        }
    }

    /// For_resource attaches a resource id.
    #[must_use]
    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    /// With_details attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// With_error attaches an error description.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// DeploymentError is one failure recorded against a [`DeploymentResult`] (§7).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentError {
    /// ResourceId the error concerns, if resource-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,
    /// Kind names the taxonomy kind (§7), e.g. `"ResourceDeploymentError"`.
    pub kind: String,
    /// Message describes the failure.
    pub message: String,
}

/// DeploymentRecord is the per-deployment record (§3) retained in process for rollback:
/// `{id, resources, graph, startedAt, endedAt?, status, options}`. `graph` is represented here
/// as the resource ids in applied order (the engine's `DependencyGraph` carries the full edge
/// set; this flattened form is what the record needs to retain for rollback ordering).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Id uniquely identifies this deployment.
    pub id: String,
    /// Resources lists every resource in application order, with its current state.
    pub resources: Vec<DeployedResource>,
    /// Order is the topological application order (by id), retained for rollback (§4.3.4:
    /// "deletes already-applied resources in reverse topological order").
    pub order: Vec<ResourceId>,
    /// StartedAt is when the deployment began.
    pub started_at: DateTime<Utc>,
    /// EndedAt is when the deployment finished, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Status is the deployment's current/final status.
    pub status: DeploymentStatus,
    /// Options are the options this deployment was run with.
    pub options: DeploymentOptions,
}

/// DeploymentResult is the return value of a deployment (§6): `{deploymentId, resources,
/// dependencyGraph, duration, status, errors}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentResult {
    /// DeploymentId identifies the deployment this result describes.
    pub deployment_id: String,
    /// Resources is the final state of every resource in the deployment.
    pub resources: Vec<DeployedResource>,
    /// DependencyGraph is the topological application order (by id).
    pub dependency_graph: Vec<ResourceId>,
    /// Duration is the wall-clock time the deployment took.
    pub duration: Duration,
    /// Status is the deployment's final status.
    pub status: DeploymentStatus,
    /// Errors lists every non-fatal failure recorded during the deployment.
    pub errors: Vec<DeploymentError>,
}

/// RollbackResult is the return value of a rollback (§6): `{deploymentId, rolledBackResources,
/// duration, status, errors}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollbackResult {
    /// DeploymentId identifies the deployment that was rolled back.
    pub deployment_id: String,
    /// RolledBackResources lists the ids successfully deleted.
    pub rolled_back_resources: Vec<ResourceId>,
    /// Duration is the wall-clock time the rollback took.
    pub duration: Duration,
    /// Status is the rollback's own outcome (§4.3.4: "Rollback itself has its own
    /// partial/failed outcome").
    pub status: DeploymentStatus,
    /// Errors lists every deletion failure recorded during the rollback.
    pub errors: Vec<DeploymentError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        assert!(ResourceStatus::Pending.can_transition_to(ResourceStatus::Deployed));
        assert!(ResourceStatus::Deployed.can_transition_to(ResourceStatus::Ready));
        assert!(!ResourceStatus::Ready.can_transition_to(ResourceStatus::Pending));
        assert!(!ResourceStatus::Ready.can_transition_to(ResourceStatus::Deployed));
        assert!(ResourceStatus::Deployed.can_transition_to(ResourceStatus::Failed));
    }

    #[test]
    fn retry_policy_caps_backoff() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
        assert_eq!(p.delay_for(10), Duration::from_secs(10));
    }
}
