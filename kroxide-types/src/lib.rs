#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Types holds the data model of the resource-graph engine: references, the expression IR,
//! enhanced manifests, compositions, and deployment records.

pub mod composition;
pub mod deployment;
pub mod error;
pub mod expr;
pub mod manifest;
pub mod reference;

pub use composition::{Composition, CompositionBuilder, OpenSchema, Schema};
pub use deployment::{
    DeployedResource, DeploymentError, DeploymentMode, DeploymentOptions, DeploymentRecord,
    DeploymentResult, DeploymentStatus, EventMonitorOptions, ProgressEvent, ProgressEventKind,
    ResourceStatus, RetryPolicy, RollbackResult,
};
pub use error::{CompositionError, ValidationError};
pub use expr::{BinaryOp, Expr, Literal, LogicalOp, TemplatePart, WHITELISTED_CALLS};
pub use manifest::{EnhancedManifest, ErasedManifest, Factory, FactoryConfig, ReadinessFn, ReadinessOutcome};
pub use reference::{FieldPath, FieldSegment, FieldType, RefView, Reference, ResourceId, SCHEMA_RESOURCE};
