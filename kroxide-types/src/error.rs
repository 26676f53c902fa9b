//! Error holds the build-time error taxonomy (§7) that belongs to the data model itself:
//! malformed compositions and schema validation. Apply-time errors
//! (`ResolutionError`, `ResourceDeploymentError`, `ReadinessTimeout`, `RollbackError`) live
//! alongside the components that raise them (`kroxide-resolver`, `kroxide-engine`).

use crate::reference::ResourceId;

/// CompositionError indicates an invalid composition (§7): unknown reference, cyclic
/// dependency, schema mismatch, cluster-scope/namespace mismatch. Surfaced at build time;
/// fatal.
#[derive(Debug, thiserror::Error)]
pub enum CompositionError {
    /// UnknownReference indicates a reference names a resource id absent from the composition.
    #[error("reference to unknown resource {0:?}")]
    UnknownReference(ResourceId),
    /// CircularDependency names a dependency cycle. Per §7, this variant is "re-thrown verbatim;
    /// never wrapped" by callers.
    #[error("circular dependency: {}", cycle.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "))]
    CircularDependency {
        /// Cycle lists the resource ids forming the cycle, in dependency order.
        cycle: Vec<ResourceId>,
    },
    /// SchemaMismatch indicates a manifest or expression does not match its declared schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    /// ClusterScopeMismatch indicates a cluster-scoped kind was configured with a namespace.
    #[error("{kind} is cluster-scoped and cannot be created in namespace {namespace:?}")]
    ClusterScopeMismatch {
        /// Kind is the cluster-scoped kind's name.
        kind: String,
        /// Namespace is the (disallowed) namespace that was supplied.
        namespace: String,
    },
    /// MissingName indicates a factory configuration omitted a required name.
    #[error("missing name for resource of kind {0}")]
    MissingName(String),
    /// InvalidFieldPath indicates a field path's textual form could not be parsed.
    #[error("invalid field path: {0}")]
    InvalidFieldPath(String),
    /// Serialization indicates a manifest could not round-trip through JSON.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// ValidationError indicates a user spec failed validation against its declared schema (§7).
/// Surfaced to the caller before any cluster contact.
#[derive(Debug, thiserror::Error)]
#[error("validation error at {path}: {message}")]
pub struct ValidationError {
    /// Path is the field path (dotted, within the user spec) that failed validation.
    pub path: String,
    /// Message describes the failure.
    pub message: String,
}
