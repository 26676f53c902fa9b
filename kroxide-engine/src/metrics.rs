//! Metrics contains the metrics setup for the engine (§1.1's ambient observability stack).

use opentelemetry::{
    global,
    metrics::{Counter, Meter},
};

/// Metrics collects every counter the engine exposes over the Prometheus introspection endpoint.
#[derive(Clone)]
pub struct Metrics {
    /// Deploy holds the deployment-loop counters.
    pub deploy: DeployMetrics,
}

impl Default for Metrics {
    fn default() -> Self {
        let meter = global::meter("kroxide_engine");
        Self {
            deploy: DeployMetrics::from(meter),
        }
    }
}

/// DeployMetrics counts outcomes of the dependency resolver and topological deployer (§4.3).
#[derive(Clone)]
pub struct DeployMetrics {
    /// Deployments records the total number of `deploy` invocations.
    pub deployments: Counter<u64>,
    /// ResourcesApplied records the total number of individual resource applies attempted.
    pub resources_applied: Counter<u64>,
    /// ResourceFailures records the total number of resource applies that failed after retries.
    pub resource_failures: Counter<u64>,
    /// Rollbacks records the total number of rollbacks performed.
    pub rollbacks: Counter<u64>,
}

impl From<Meter> for DeployMetrics {
    fn from(meter: Meter) -> Self {
        Self {
            deployments: meter.u64_counter("deployments").with_unit("{deployment}").build(),
            resources_applied: meter.u64_counter("resources_applied").with_unit("{resource}").build(),
            resource_failures: meter.u64_counter("resource_failures").with_unit("{resource}").build(),
            rollbacks: meter.u64_counter("rollbacks").with_unit("{rollback}").build(),
        }
    }
}
