//! Events implements the event monitor (§4.6): server-side field-selector-filtered watches of
//! `Event` objects, pooled per `(kind, namespace)`, with owner-reference-driven child-resource
//! discovery, delivered through the same progress callback as deployment events.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Event;
use kube::api::{Api, ListParams, ResourceExt, WatchEvent, WatchParams};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use kroxide_types::{Composition, EventMonitorOptions, ProgressEvent, ProgressEventKind};

/// Child_kinds maps a parent Kubernetes kind to the ordered chain of candidate child kinds
/// child-resource discovery looks for (§4.6).
fn child_kinds(parent_kind: &str) -> &'static [&'static str] {
    match parent_kind {
        "Deployment" => &["ReplicaSet", "Pod"],
        "StatefulSet" | "DaemonSet" | "Job" => &["Pod"],
        "CronJob" => &["Job", "Pod"],
        _ => &[],
    }
}

/// EventMonitor owns the watch tasks spawned for one deployment. Dropping/cancelling it aborts
/// every pooled watch and any pending discovery timer (§4.6: "shutdown aborts all watches and
/// cancels pending discovery timers").
pub struct EventMonitor {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl EventMonitor {
    /// Spawn starts one watch per `(kind, namespace)` combination present in `composition`,
    /// capped at `opts.max_watch_connections`, and returns the monitor plus a receiver that
    /// yields progress events as they arrive. Events delivered before the caller first polls the
    /// receiver are simply queued (the channel is unbounded), matching the spec's "watches run in
    /// parallel with the apply loop" without requiring the deployer's progress callback to be
    /// `Send`-shared across tasks.
    pub fn spawn(client: kube::Client, composition: &Composition, opts: EventMonitorOptions) -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut by_group: HashMap<(String, String), Vec<String>> = HashMap::new();
        for manifest in composition.resources.values() {
            let kind = manifest.kind().to_string();
            if kind.is_empty() {
                continue;
            }
            let namespace = manifest.namespace().unwrap_or_else(|| "default".to_string());
            by_group.entry((kind, namespace)).or_default().push(manifest.name());
        }

        let mut groups: Vec<((String, String), Vec<String>)> = by_group.into_iter().collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        if groups.len() > opts.max_watch_connections {
            warn!(
                dropped = groups.len().saturating_sub(opts.max_watch_connections),
                "event monitor watch pool at capacity, dropping lowest-priority (kind, namespace) groups"
            );
            groups.truncate(opts.max_watch_connections);
        }

        let task_client = client.clone();
        let task_cancel = cancel.clone();
        let event_types: HashSet<String> = opts.event_types.iter().cloned().collect();
        let discover_children = opts.discover_children;
        let parent_kinds: Vec<(String, String, String)> = composition
            .resources
            .values()
            .map(|m| (m.kind().to_string(), m.name(), m.namespace().unwrap_or_else(|| "default".to_string())))
            .collect();

        let handle = tokio::spawn(async move {
            let mut watches = tokio::task::JoinSet::new();
            for ((kind, namespace), names) in groups {
                let client = task_client.clone();
                let cancel = task_cancel.clone();
                let tx = tx.clone();
                let event_types = event_types.clone();
                watches.spawn(watch_group(client, kind, namespace, names, event_types, cancel, tx));
            }
            if discover_children {
                for (kind, name, namespace) in parent_kinds {
                    if child_kinds(&kind).is_empty() {
                        continue;
                    }
                    let client = task_client.clone();
                    let cancel = task_cancel.clone();
                    let tx = tx.clone();
                    watches.spawn(discover_children_for(client, kind, name, namespace, cancel, tx));
                }
            }
            while watches.join_next().await.is_some() {}
        });

        (Self { cancel, handle }, rx)
    }

    /// Cancel aborts every watch and discovery timer this monitor owns.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

async fn watch_group(
    client: kube::Client,
    kind: String,
    namespace: String,
    names: Vec<String>,
    event_types: HashSet<String>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<ProgressEvent>,
) {
    let events: Api<Event> = Api::namespaced(client, &namespace);

    let field_selector = if names.len() == 1 {
        format!("involvedObject.kind={kind},involvedObject.name={}", names[0])
    } else {
        format!("involvedObject.kind={kind}")
    };
    let name_filter: HashSet<String> = names.into_iter().collect();

    let resource_version = match events.list(&ListParams::default().fields(&field_selector)).await {
        Ok(list) => list.metadata.resource_version.unwrap_or_else(|| "0".to_string()),
        Err(e) => {
            warn!(%kind, %namespace, error = %e, "event monitor could not list current resourceVersion, starting from 0");
            "0".to_string()
        }
    };

    let wp = WatchParams::default().fields(&field_selector).timeout(290);
    loop {
        let stream = tokio::select! {
            () = cancel.cancelled() => return,
            stream = events.watch(&wp, &resource_version) => stream,
        };
        let mut stream = match stream {
            Ok(s) => Box::pin(s),
            Err(e) => {
                warn!(%kind, %namespace, error = %e, "event monitor watch failed, retrying");
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(Duration::from_secs(5)) => continue,
                };
            }
        };
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                next = stream.next() => {
                    match next {
                        Some(Ok(WatchEvent::Added(ev))) | Some(Ok(WatchEvent::Modified(ev))) => {
                            if name_filter.len() > 1 {
                                let involved = ev.involved_object.name.as_deref().unwrap_or_default();
                                if !name_filter.contains(involved) {
                                    continue;
                                }
                            }
                            if let Some(progress) = progress_for_event(&ev, &event_types) {
                                let _ = tx.send(progress);
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            trace!(%kind, %namespace, error = %e, "event monitor watch stream error, re-watching");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
    }
}

fn progress_for_event(ev: &Event, event_types: &HashSet<String>) -> Option<ProgressEvent> {
    let event_type = ev.type_.clone().unwrap_or_default();
    if !event_types.contains(&event_type) {
        return None;
    }
    let details = serde_json::json!({
        "involvedObject": {
            "kind": ev.involved_object.kind,
            "name": ev.involved_object.name,
            "namespace": ev.involved_object.namespace,
        },
        "reason": ev.reason,
        "count": ev.count,
        "firstTimestamp": ev.first_timestamp.as_ref().map(|t| t.0.to_string()),
        "lastTimestamp": ev.last_timestamp.as_ref().map(|t| t.0.to_string()),
        "source": ev.source.as_ref().and_then(|s| s.component.clone()),
        "eventType": event_type,
    });
    Some(
        ProgressEvent::new(ProgressEventKind::KubernetesEvent, ev.message.clone().unwrap_or_default())
            .with_details(details),
    )
}

async fn discover_children_for(
    client: kube::Client,
    parent_kind: String,
    parent_name: String,
    namespace: String,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<ProgressEvent>,
) {
    tokio::select! {
        () = cancel.cancelled() => return,
        () = tokio::time::sleep(Duration::from_secs(1)) => {}
    }

    let parent_uid = match parent_uid(&client, &parent_kind, &parent_name, &namespace).await {
        Some(uid) => uid,
        None => return,
    };

    for child_kind in child_kinds(&parent_kind) {
        let ar = match resolve_api_resource(&client, child_kind, &namespace).await {
            Some(ar) => ar,
            None => continue,
        };
        let api: Api<kube::core::DynamicObject> = Api::namespaced_with(client.clone(), &namespace, &ar);
        let Ok(list) = api.list(&ListParams::default()).await else {
            continue;
        };
        for child in &list.items {
            let owned = child
                .owner_references()
                .iter()
                .any(|owner| owner.kind == parent_kind && owner.uid == parent_uid);
            if !owned {
                continue;
            }
            let relationship = match parent_kind.as_str() {
                "CronJob" => "creates",
                "Deployment" | "StatefulSet" | "DaemonSet" => "manages",
                _ => "owns",
            };
            let details = serde_json::json!({
                "parentKind": parent_kind,
                "parentName": parent_name,
                "childKind": child_kind,
                "childName": child.name_any(),
                "relationship": relationship,
            });
            let _ = tx.send(
                ProgressEvent::new(ProgressEventKind::ChildResourceDiscovered, "child resource discovered")
                    .with_details(details),
            );
        }
    }
}

async fn parent_uid(client: &kube::Client, kind: &str, name: &str, namespace: &str) -> Option<String> {
    let ar = resolve_api_resource(client, kind, namespace).await?;
    let api: Api<kube::core::DynamicObject> = Api::namespaced_with(client.clone(), namespace, &ar);
    api.get_opt(name).await.ok().flatten().and_then(|o| o.uid())
}

/// Resolve_api_resource maps a child kind name to its well-known group/version (§4.6 only
/// discovers children among the fixed [`child_kinds`] table, so a static lookup suffices — no
/// server-side API discovery round trip is needed).
async fn resolve_api_resource(client: &kube::Client, kind: &str, _namespace: &str) -> Option<kube::core::ApiResource> {
    let (group, version) = match kind {
        "Pod" | "ReplicaSet" => ("", "v1"),
        "Deployment" | "StatefulSet" | "DaemonSet" => ("apps", "v1"),
        "Job" | "CronJob" => ("batch", "v1"),
        _ => return None,
    };
    let gvk = if group.is_empty() {
        kube::core::GroupVersionKind::gvk("", version, kind)
    } else {
        kube::core::GroupVersionKind::gvk(group, version, kind)
    };
    let _ = client;
    Some(kube::core::ApiResource::from_gvk(&gvk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    #[test]
    fn child_kinds_covers_the_common_workload_owners() {
        assert_eq!(child_kinds("Deployment"), &["ReplicaSet", "Pod"]);
        assert_eq!(child_kinds("StatefulSet"), &["Pod"]);
        assert_eq!(child_kinds("DaemonSet"), &["Pod"]);
        assert_eq!(child_kinds("Job"), &["Pod"]);
        assert_eq!(child_kinds("CronJob"), &["Job", "Pod"]);
        assert!(child_kinds("ConfigMap").is_empty());
    }

    fn sample_event(event_type: &str) -> Event {
        Event {
            involved_object: ObjectReference {
                kind: Some("Deployment".into()),
                name: Some("app".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            type_: Some(event_type.into()),
            reason: Some("ScalingReplicaSet".into()),
            message: Some("Scaled up replica set app-abc123 to 1".into()),
            count: Some(3),
            first_timestamp: Some(Time(k8s_openapi::jiff::Timestamp::from_second(1_700_000_000).unwrap())),
            last_timestamp: Some(Time(k8s_openapi::jiff::Timestamp::from_second(1_700_000_060).unwrap())),
            ..Default::default()
        }
    }

    #[test]
    fn progress_for_event_filters_by_configured_event_types() {
        let wanted: HashSet<String> = ["Warning".to_string()].into_iter().collect();
        assert!(progress_for_event(&sample_event("Normal"), &wanted).is_none());
        assert!(progress_for_event(&sample_event("Warning"), &wanted).is_some());
    }

    #[test]
    fn progress_for_event_carries_involved_object_and_timestamps() {
        let wanted: HashSet<String> = ["Warning".to_string()].into_iter().collect();
        let ev = progress_for_event(&sample_event("Warning"), &wanted).unwrap();
        let details = ev.details.expect("details attached");
        assert_eq!(details["involvedObject"]["name"], "app");
        assert_eq!(details["reason"], "ScalingReplicaSet");
        assert_eq!(details["count"], 3);
        assert!(details["firstTimestamp"].as_str().unwrap().starts_with("2023-11-14"));
    }
}
