//! Deploy drives a [`Composition`] to a live cluster in dependency order, tracking per-resource
//! status, retrying and timing out individual applies, waiting for readiness, hydrating the
//! composite status, and rolling back on failure when asked (§4.3).

use std::collections::HashSet;
use std::time::{Duration, Instant};

use kube::api::{Api, DeleteParams, DynamicObject};
use kube::core::GroupVersionKind;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use kroxide_resolver::{check_readiness, poll_until_ready, LiveSnapshot};
use kroxide_types::{
    Composition, DeployedResource, DeploymentError, DeploymentOptions, DeploymentResult,
    DeploymentStatus, ErasedManifest, ProgressEvent, ProgressEventKind, ReadinessFn,
    ReadinessOutcome, ResourceId, ResourceStatus, RollbackResult,
};

use crate::{events::EventMonitor, util, Context, Error};

/// Reference-resolution gets its own fixed deadline, independent of `options.timeout` (which
/// bounds apply-plus-readiness): a manifest stuck waiting on a dependency that will never appear
/// should fall back to its unresolved form rather than starve the per-resource apply budget.
const REFERENCE_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(30);
const REFERENCE_RETRY_INTERVAL: Duration = Duration::from_secs(2);
const DELETE_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(30);
const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Deploy applies every resource in `composition` in dependency order, tracking progress through
/// `progress` and returning once every resource has reached a terminal state (§4.3.3, §4.3.4).
pub async fn deploy(
    composition: &Composition,
    spec: &Value,
    ctx: &Context,
    options: &DeploymentOptions,
    mut progress: impl FnMut(ProgressEvent) + Send,
) -> crate::Result<DeploymentResult> {
    let started = Instant::now();
    let deployment_id = format!("{}-{}", composition.name, chrono::Utc::now().timestamp_millis());
    ctx.metrics.deploy.deployments.add(1, &[]);

    let graph = crate::graph::DependencyGraph::build(composition)?;
    let order = graph.order()?;

    progress(ProgressEvent::new(ProgressEventKind::Started, "deployment started"));

    let mut monitor = None;
    let mut monitor_rx = None;
    if let Some(opts) = &options.event_monitor {
        let (m, rx) = EventMonitor::spawn(ctx.client.clone(), composition, opts.clone());
        monitor = Some(m);
        monitor_rx = Some(rx);
    }

    let mut snapshot = LiveSnapshot::new(spec.clone());
    let mut resources = Vec::with_capacity(order.len());
    let mut applied_ids: Vec<ResourceId> = Vec::new();
    let mut errors: Vec<DeploymentError> = Vec::new();
    let cancel = CancellationToken::new();

    for id in &order {
        let manifest = &composition.resources[id];
        let record = apply_one(
            ctx,
            id,
            manifest,
            options.namespace.as_deref(),
            &mut snapshot,
            composition,
            options,
            &cancel,
            &mut progress,
        )
        .await;

        if let Some(rx) = monitor_rx.as_mut() {
            while let Ok(ev) = rx.try_recv() {
                progress(ev);
            }
        }

        let failed = record.status == ResourceStatus::Failed;
        if failed {
            if let Some(msg) = &record.error {
                errors.push(DeploymentError {
                    resource_id: Some(id.clone()),
                    kind: "ResourceDeploymentError".to_string(),
                    message: msg.clone(),
                });
            }
            resources.push(record);

            if options.rollback_on_failure {
                if let Some(m) = &monitor {
                    m.cancel();
                }
                let rollback_result =
                    rollback(&deployment_id, composition, ctx, &applied_ids, &mut progress).await?;
                progress(ProgressEvent::new(ProgressEventKind::Failed, "deployment rolled back"));
                return Ok(DeploymentResult {
                    deployment_id,
                    resources,
                    dependency_graph: order,
                    duration: started.elapsed(),
                    status: DeploymentStatus::Failed,
                    errors: rollback_result.errors,
                });
            }
            continue;
        }

        applied_ids.push(id.clone());
        resources.push(record);
    }

    if options.hydrate_status && !options.dry_run {
        match kroxide_resolver::hydrate_status(&composition.status_mapping, &snapshot) {
            Ok(status) => {
                progress(ProgressEvent::new(ProgressEventKind::Progress, "status hydrated").with_details(status));
            }
            Err(e) => {
                progress(
                    ProgressEvent::new(ProgressEventKind::ResourceWarning, "status hydration failed")
                        .with_error(e.to_string()),
                );
            }
        }
    }

    if let Some(rx) = monitor_rx.as_mut() {
        while let Ok(ev) = rx.try_recv() {
            progress(ev);
        }
    }
    if let Some(m) = monitor {
        m.cancel();
    }

    let status = if errors.is_empty() {
        DeploymentStatus::Completed
    } else {
        DeploymentStatus::Partial
    };
    progress(ProgressEvent::new(
        if status == DeploymentStatus::Completed { ProgressEventKind::Completed } else { ProgressEventKind::Failed },
        "deployment finished",
    ));

    Ok(DeploymentResult {
        deployment_id,
        resources,
        dependency_graph: order,
        duration: started.elapsed(),
        status,
        errors,
    })
}

/// Deploy_resource applies a single named resource out of band, pre-populating the live snapshot
/// from every other resource in the composition so its embedded references still resolve (§4.3.5).
pub async fn deploy_resource(
    composition: &Composition,
    spec: &Value,
    ctx: &Context,
    id: &ResourceId,
    options: &DeploymentOptions,
    mut progress: impl FnMut(ProgressEvent) + Send,
) -> crate::Result<DeployedResource> {
    let manifest = composition.resources.get(id).ok_or_else(|| Error::ResourceDeployment {
        resource_id: id.clone(),
        message: "resource not found in composition".to_string(),
    })?;

    let mut snapshot = LiveSnapshot::new(spec.clone());
    let raw = serde_json::to_value(&manifest.object)?;
    refresh_dependencies(&ctx.client, composition, &raw, &mut snapshot).await;

    let cancel = CancellationToken::new();
    Ok(apply_one(
        ctx,
        id,
        manifest,
        options.namespace.as_deref(),
        &mut snapshot,
        composition,
        options,
        &cancel,
        &mut progress,
    )
    .await)
}

#[allow(clippy::too_many_arguments)]
async fn apply_one(
    ctx: &Context,
    id: &ResourceId,
    manifest: &ErasedManifest,
    namespace_override: Option<&str>,
    snapshot: &mut LiveSnapshot,
    composition: &Composition,
    options: &DeploymentOptions,
    cancel: &CancellationToken,
    progress: &mut dyn FnMut(ProgressEvent),
) -> DeployedResource {
    let namespace = manifest.namespace().or_else(|| namespace_override.map(str::to_string));
    let mut record = DeployedResource::pending(id.clone(), manifest.kind(), manifest.name(), namespace.clone());
    ctx.metrics.deploy.resources_applied.add(1, &[]);
    progress(ProgressEvent::new(ProgressEventKind::Progress, "applying resource").for_resource(id.clone()));

    let raw = match serde_json::to_value(&manifest.object) {
        Ok(v) => v,
        Err(e) => {
            record.transition_to(ResourceStatus::Failed);
            record.error = Some(e.to_string());
            return record;
        }
    };

    let resolved = resolve_manifest(&ctx.client, composition, &raw, snapshot, id, progress).await;
    record.manifest = resolved.clone();

    if options.dry_run {
        record.transition_to(ResourceStatus::Deployed);
        return record;
    }

    let gvk = match manifest_gvk(manifest) {
        Ok(gvk) => gvk,
        Err(e) => {
            record.transition_to(ResourceStatus::Failed);
            record.error = Some(e);
            return record;
        }
    };
    let dynamic_obj: DynamicObject = match serde_json::from_value(resolved) {
        Ok(obj) => obj,
        Err(e) => {
            record.transition_to(ResourceStatus::Failed);
            record.error = Some(e.to_string());
            return record;
        }
    };

    let api_resource = kube::core::ApiResource::from_gvk(&gvk);
    let api = util::dynamic_api(ctx.client.clone(), &api_resource, namespace.as_deref());

    match apply_with_retry(&api, &dynamic_obj, &options.retry_policy, options.timeout).await {
        Ok(applied) => {
            record.transition_to(ResourceStatus::Deployed);
            if let Ok(v) = serde_json::to_value(&applied) {
                snapshot.insert(id.clone(), v);
            }
        }
        Err(msg) => {
            ctx.metrics.deploy.resource_failures.add(1, &[]);
            record.transition_to(ResourceStatus::Failed);
            record.error = Some(msg);
            return record;
        }
    }

    if options.wait_for_ready {
        let name = dynamic_obj.metadata.name.clone().unwrap_or_default();
        match wait_ready(&api, &name, manifest.readiness.as_ref(), options.timeout, cancel).await {
            Ok(outcome) => {
                if let Ok(Some(live)) = api.get_opt(&name).await
                    && let Ok(v) = serde_json::to_value(&live)
                {
                    snapshot.insert(id.clone(), v);
                }
                record.transition_to(ResourceStatus::Ready);
                record.error = outcome.message;
                progress(ProgressEvent::new(ProgressEventKind::ResourceReady, "resource ready").for_resource(id.clone()));
            }
            Err(msg) => {
                ctx.metrics.deploy.resource_failures.add(1, &[]);
                record.transition_to(ResourceStatus::Failed);
                record.error = Some(msg);
            }
        }
    }

    record
}

fn manifest_gvk(manifest: &ErasedManifest) -> Result<GroupVersionKind, String> {
    let types = manifest.object.types.clone().ok_or_else(|| "manifest has no apiVersion/kind".to_string())?;
    GroupVersionKind::try_from(types).map_err(|e| e.to_string())
}

async fn resolve_manifest(
    client: &kube::Client,
    composition: &Composition,
    raw: &Value,
    snapshot: &mut LiveSnapshot,
    id: &ResourceId,
    progress: &mut dyn FnMut(ProgressEvent),
) -> Value {
    let deadline = Instant::now().checked_add(REFERENCE_RESOLUTION_TIMEOUT).expect("reference resolution timeout does not overflow Instant");
    loop {
        let attempt = {
            let resolver = snapshot.resolver();
            kroxide_templates::resolve_for_direct(raw, &resolver)
        };
        match attempt {
            Ok(resolved) => return resolved,
            Err(e) => {
                if Instant::now() >= deadline {
                    progress(
                        ProgressEvent::new(
                            ProgressEventKind::ResourceWarning,
                            "reference resolution timed out, applying unresolved manifest",
                        )
                        .for_resource(id.clone())
                        .with_error(e.to_string()),
                    );
                    return raw.clone();
                }
                refresh_dependencies(client, composition, raw, snapshot).await;
                tokio::time::sleep(REFERENCE_RETRY_INTERVAL).await;
            }
        }
    }
}

async fn refresh_dependencies(client: &kube::Client, composition: &Composition, raw: &Value, snapshot: &mut LiveSnapshot) {
    let mut refs = Vec::new();
    crate::graph::collect_expr_refs(raw, &mut refs);
    let mut seen = HashSet::new();
    for r in refs {
        if r.resource_id.is_schema() || !seen.insert(r.resource_id.clone()) {
            continue;
        }
        let Some(target) = composition.resources.get(&r.resource_id) else {
            continue;
        };
        let Ok(gvk) = manifest_gvk(target) else { continue };
        let name = target.name();
        let namespace = target.namespace();
        let _ = snapshot.fetch(client, r.resource_id.clone(), &gvk, namespace.as_deref(), &name).await;
    }
}

async fn apply_with_retry(
    api: &Api<DynamicObject>,
    obj: &DynamicObject,
    retry: &kroxide_types::RetryPolicy,
    timeout: Duration,
) -> Result<DynamicObject, String> {
    let mut attempt = 0u32;
    loop {
        let outcome = tokio::time::timeout(timeout, util::apply_dynamic(api, obj)).await;
        match outcome {
            Ok(Ok(applied)) => return Ok(applied),
            Ok(Err(e)) if attempt >= retry.max_retries => return Err(e.to_string()),
            Ok(Err(_)) => {}
            Err(_) if attempt >= retry.max_retries => return Err(format!("timed out after {timeout:?}")),
            Err(_) => {}
        }
        tokio::time::sleep(retry.delay_for(attempt)).await;
        attempt = attempt.saturating_add(1);
    }
}

async fn wait_ready(
    api: &Api<DynamicObject>,
    name: &str,
    readiness: Option<&ReadinessFn<DynamicObject>>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ReadinessOutcome, String> {
    let readiness = readiness.cloned();
    let fetch = async || api.get(name).await;
    let check = move |obj: &DynamicObject| match &readiness {
        Some(f) => f(obj),
        None => serde_json::to_value(obj)
            .map(|v| check_readiness(&v))
            .unwrap_or_else(|_| ReadinessOutcome::pending("could not inspect object")),
    };
    poll_until_ready(fetch, check, timeout, cancel.clone()).await.map_err(|e| e.to_string())
}

/// Rollback deletes every applied resource in reverse order, tolerating resources already gone
/// and waiting out finalizers up to a fixed deadline before giving up on confirmation (§4.3.4).
pub async fn rollback(
    deployment_id: &str,
    composition: &Composition,
    ctx: &Context,
    applied: &[ResourceId],
    progress: &mut dyn FnMut(ProgressEvent),
) -> crate::Result<RollbackResult> {
    let started = Instant::now();
    ctx.metrics.deploy.rollbacks.add(1, &[]);
    let mut rolled_back = Vec::with_capacity(applied.len());
    let mut errors = Vec::new();

    for id in applied.iter().rev() {
        let Some(manifest) = composition.resources.get(id) else {
            continue;
        };
        let gvk = match manifest_gvk(manifest) {
            Ok(gvk) => gvk,
            Err(e) => {
                errors.push(DeploymentError { resource_id: Some(id.clone()), kind: "RollbackError".to_string(), message: e });
                continue;
            }
        };
        let api_resource = kube::core::ApiResource::from_gvk(&gvk);
        let namespace = manifest.namespace();
        let api = util::dynamic_api(ctx.client.clone(), &api_resource, namespace.as_deref());
        let name = manifest.name();

        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                wait_deleted(&api, &name, DELETE_CONFIRMATION_TIMEOUT, progress, id).await;
                rolled_back.push(id.clone());
                progress(ProgressEvent::new(ProgressEventKind::Rollback, "resource rolled back").for_resource(id.clone()));
            }
            Err(kube::Error::Api(status)) if status.code == 404 => {
                rolled_back.push(id.clone());
                progress(ProgressEvent::new(ProgressEventKind::Rollback, "resource already absent").for_resource(id.clone()));
            }
            Err(e) => {
                errors.push(DeploymentError { resource_id: Some(id.clone()), kind: "RollbackError".to_string(), message: e.to_string() });
            }
        }
    }

    let status = if errors.is_empty() {
        DeploymentStatus::Completed
    } else if rolled_back.is_empty() {
        DeploymentStatus::Failed
    } else {
        DeploymentStatus::Partial
    };

    Ok(RollbackResult {
        deployment_id: deployment_id.to_string(),
        rolled_back_resources: rolled_back,
        duration: started.elapsed(),
        status,
        errors,
    })
}

async fn wait_deleted(api: &Api<DynamicObject>, name: &str, timeout: Duration, progress: &mut dyn FnMut(ProgressEvent), id: &ResourceId) {
    let deadline = Instant::now().checked_add(timeout).unwrap_or_else(Instant::now);
    loop {
        match api.get_opt(name).await {
            Ok(None) | Err(_) => return,
            Ok(Some(_)) => {
                if Instant::now() >= deadline {
                    progress(
                        ProgressEvent::new(
                            ProgressEventKind::ResourceWarning,
                            "deletion not confirmed before timeout, likely held by a finalizer",
                        )
                        .for_resource(id.clone()),
                    );
                    return;
                }
                tokio::time::sleep(DELETE_POLL_INTERVAL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Request, Response, StatusCode};
    use k8s_openapi::api::core::v1::ConfigMap;
    use kroxide_types::EnhancedManifest;
    use kube::client::Body;

    fn cm_manifest(name: &str) -> ErasedManifest {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some(name.into());
        cm.metadata.namespace = Some("default".into());
        EnhancedManifest::new(name, cm).erase().unwrap()
    }

    #[test]
    fn manifest_gvk_reads_type_meta() {
        let manifest = cm_manifest("cfg");
        let gvk = manifest_gvk(&manifest).unwrap();
        assert_eq!(gvk.kind, "ConfigMap");
        assert_eq!(gvk.version, "v1");
        assert!(gvk.group.is_empty());
    }

    #[test]
    fn manifest_gvk_errors_without_type_meta() {
        let mut manifest = cm_manifest("cfg");
        manifest.object.types = None;
        assert!(manifest_gvk(&manifest).is_err());
    }

    #[tokio::test]
    async fn resolve_manifest_short_circuits_when_nothing_to_resolve() {
        // A mock client that would panic on first use: resolution with no embedded references
        // must never touch the network (§4.3.3 only retries/refetches when resolution fails).
        let (mock_service, _handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = kube::Client::new(mock_service, "default");
        let composition = Composition::builder("demo", "v1", "Demo").build().unwrap();
        let mut snapshot = LiveSnapshot::new(serde_json::json!({}));
        let raw = serde_json::json!({"data": {"key": "value"}});
        let mut progress = |_ev: ProgressEvent| {};
        let resolved = resolve_manifest(&client, &composition, &raw, &mut snapshot, &ResourceId::from("cfg"), &mut progress).await;
        assert_eq!(resolved, raw);
    }

    #[tokio::test]
    async fn apply_with_retry_creates_when_absent() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = kube::Client::new(mock_service, "default");
        let resource = kube::core::ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "ConfigMap"));
        let api = util::dynamic_api(client, &resource, Some("default"));
        let mut obj = DynamicObject::new("cfg", &resource);
        obj.metadata.namespace = Some("default".into());

        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("GET not observed");
            assert_eq!(*request.method(), Method::GET);
            let not_found = serde_json::json!({"status": "Failure", "reason": "NotFound", "code": 404});
            send.send_response(
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from(serde_json::to_vec(&not_found).unwrap()))
                    .unwrap(),
            );

            let (request, send) = handle.next_request().await.expect("POST not observed");
            assert_eq!(*request.method(), Method::POST);
            let body = request.into_body().collect_bytes().await.unwrap();
            let created: DynamicObject = serde_json::from_slice(&body).unwrap();
            send.send_response(Response::builder().body(Body::from(serde_json::to_vec(&created).unwrap())).unwrap());
        });

        let result = apply_with_retry(&api, &obj, &kroxide_types::RetryPolicy::default(), Duration::from_secs(5)).await;
        server.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn apply_with_retry_replaces_when_present() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = kube::Client::new(mock_service, "default");
        let resource = kube::core::ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "ConfigMap"));
        let api = util::dynamic_api(client, &resource, Some("default"));
        let mut obj = DynamicObject::new("cfg", &resource);
        obj.metadata.namespace = Some("default".into());

        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("GET not observed");
            assert_eq!(*request.method(), Method::GET);
            let mut existing = DynamicObject::new("cfg", &kube::core::ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "ConfigMap")));
            existing.metadata.namespace = Some("default".into());
            existing.metadata.resource_version = Some("41".into());
            send.send_response(Response::builder().body(Body::from(serde_json::to_vec(&existing).unwrap())).unwrap());

            let (request, send) = handle.next_request().await.expect("PUT not observed");
            assert_eq!(*request.method(), Method::PUT);
            let body = request.into_body().collect_bytes().await.unwrap();
            let replaced: DynamicObject = serde_json::from_slice(&body).unwrap();
            assert_eq!(replaced.metadata.resource_version.as_deref(), Some("41"));
            send.send_response(Response::builder().body(Body::from(serde_json::to_vec(&replaced).unwrap())).unwrap());
        });

        let result = apply_with_retry(&api, &obj, &kroxide_types::RetryPolicy::default(), Duration::from_secs(5)).await;
        server.await.unwrap();
        assert!(result.is_ok());
    }
}
