#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Engine implements the composition builder's downstream halves: the dependency graph and
//! topological deployer (§4.3), the event monitor (§4.6), and the shared `Context`/`Error` types
//! both the library and the CLI binary build on.

use tracing::instrument;

pub mod deploy;
mod events;
pub mod graph;
pub mod metrics;
pub mod util;

pub use deploy::{deploy, deploy_resource, rollback};
pub use graph::DependencyGraph;
pub use metrics::Metrics;

use kroxide_types::ResourceId;

/// Error is the engine's error taxonomy (§7): library errors are re-thrown verbatim from their
/// originating crate; the engine only adds its own leaf variants for failures with no upstream
/// error type to carry.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// TracingConfig indicates the error came from the tracing setup.
    #[error("tracing_subscriber error: {0}")]
    TracingConfig(#[from] tracing_subscriber::filter::ParseError),
    /// Tracing indicates the error came from installing the tracing subscriber.
    #[error("tracing error: {0}")]
    Tracing(#[from] tracing::subscriber::SetGlobalDefaultError),
    /// Kube is a generic error from the `kube` crate.
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    /// KubeConfig indicates the process was unable to find a kubeconfig.
    #[error("kubeconfig error: {0}")]
    KubeConfig(#[from] kube::config::InferConfigError),
    /// Io indicates some OS-level I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// AddrParse indicates a CLI-supplied socket address failed to parse.
    #[error("address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    /// Json indicates a JSON serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Yaml indicates a YAML serialization failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Tokio indicates an error joining a spawned task.
    #[error("tokio error: {0}")]
    Tokio(#[from] tokio::task::JoinError),
    /// Composition is a composition-graph error (§4.3.1, §4.3.2): unknown references or cycles.
    #[error("composition error: {0}")]
    Composition(#[from] kroxide_types::CompositionError),
    /// Resolver is a reference-resolution error from the live snapshot (§4.3.1).
    #[error("resolver error: {0}")]
    Resolver(#[from] kroxide_resolver::ResolverError),
    /// Hydration is a status-hydration error (§4.5).
    #[error("hydration error: {0}")]
    Hydration(#[from] kroxide_resolver::HydrationError),
    /// Template is an emission/resolution error from the templating layer (§4.2, §4.7).
    #[error("template error: {0}")]
    Template(#[from] kroxide_templates::TemplateError),
    /// Rgd is an RGD-emission error (§4.7).
    #[error("rgd emission error: {0}")]
    Rgd(#[from] kroxide_templates::RgdError),
    /// ResourceDeployment describes a single resource's apply-or-readiness failure (§7's
    /// `ResourceDeploymentError`) outside the per-deployment `DeploymentResult.errors` list, e.g.
    /// when a named resource is requested for single-resource deployment and isn't found.
    #[error("resource deployment error for {resource_id}: {message}")]
    ResourceDeployment {
        /// Id of the resource the error concerns.
        resource_id: ResourceId,
        /// Message describing the failure.
        message: String,
    },
    /// Rollback describes a rollback-specific failure that aborted the rollback itself, as
    /// opposed to a per-resource deletion failure (those accumulate in `RollbackResult.errors`).
    #[error("rollback error for {resource_id}: {message}")]
    Rollback {
        /// Id of the resource the error concerns.
        resource_id: ResourceId,
        /// Message describing the failure.
        message: String,
    },
}

/// Result typedef for the engine.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Context is the shared state every deployment/rollback call runs against (§1.1).
pub struct Context {
    /// Client is a k8s client. This should only ever be `clone()`'d out of the Context.
    pub client: kube::Client,
    /// Metrics holds the process's Prometheus counters (§1.1's observability stack).
    pub metrics: metrics::Metrics,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ctx")
    }
}

impl Context {
    /// New builds a Context from an inferred kubeconfig and a fresh metrics registry.
    #[instrument(skip_all)]
    pub async fn new() -> Result<Self> {
        let config = kube::Config::infer().await?;
        let client = kube::Client::try_from(config)?;
        Ok(Self {
            client,
            metrics: metrics::Metrics::default(),
        })
    }
}
