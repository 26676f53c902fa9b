//! Graph builds the resource dependency graph from a composition's manifests and produces a
//! deterministic topological application order (§4.3.1, §4.3.2).

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use kroxide_types::{Composition, CompositionError, Expr, ResourceId};

/// DependencyGraph is the directed graph `(nodes: resourceId, edges: u -> v iff u references v)`
/// (§3). An edge `u -> v` means `u`'s manifest references `v`, so `v` must be applied first.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: Vec<ResourceId>,
    /// Deps maps a node to the set of nodes it depends on (must be applied before it).
    deps: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

impl DependencyGraph {
    /// Build walks every resource's built manifest for embedded [`Expr`] references and
    /// constructs the dependency graph (§4.3.1).
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::UnknownReference`] if a manifest references a resource id
    /// absent from the composition.
    pub fn build(composition: &Composition) -> Result<Self, CompositionError> {
        let nodes: Vec<ResourceId> = composition.resources.keys().cloned().collect();
        let mut deps: BTreeMap<ResourceId, BTreeSet<ResourceId>> =
            nodes.iter().cloned().map(|id| (id, BTreeSet::new())).collect();

        for (id, manifest) in &composition.resources {
            let value = serde_json::to_value(&manifest.object)
                .map_err(|e| CompositionError::Serialization(e.to_string()))?;
            let mut refs = Vec::new();
            collect_expr_refs(&value, &mut refs);
            for r in refs {
                if r.resource_id.is_schema() || &r.resource_id == id {
                    continue;
                }
                if !composition.resources.contains_key(&r.resource_id) {
                    return Err(CompositionError::UnknownReference(r.resource_id));
                }
                deps.get_mut(id).expect("id just inserted above").insert(r.resource_id);
            }
        }

        Ok(Self { nodes, deps })
    }

    /// Order produces a deterministic topological order: resources are emitted once every
    /// resource they depend on has already been emitted, ties broken lexicographically by id
    /// (§4.3.2).
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::CircularDependency`] naming the cycle if the graph is not
    /// acyclic.
    pub fn order(&self) -> Result<Vec<ResourceId>, CompositionError> {
        let mut remaining = self.deps.clone();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut ready: BTreeSet<ResourceId> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| id.clone())
            .collect();

        while let Some(id) = ready.iter().next().cloned() {
            ready.remove(&id);
            remaining.remove(&id);
            order.push(id.clone());
            for (other, deps) in remaining.iter_mut() {
                if deps.remove(&id) && deps.is_empty() {
                    ready.insert(other.clone());
                }
            }
        }

        if !remaining.is_empty() {
            let cycle = find_cycle(&remaining);
            return Err(CompositionError::CircularDependency { cycle });
        }

        Ok(order)
    }

    /// Nodes returns every resource id in the graph.
    pub fn nodes(&self) -> &[ResourceId] {
        &self.nodes
    }
}

/// Find_cycle locates one cycle among the nodes still carrying unresolved dependencies once
/// Kahn's algorithm stalls, for a precise `CircularDependencyError` message.
fn find_cycle(remaining: &BTreeMap<ResourceId, BTreeSet<ResourceId>>) -> Vec<ResourceId> {
    let start = remaining.keys().next().expect("stalled graph is non-empty").clone();
    let mut path = vec![start.clone()];
    let mut current = start.clone();
    let mut seen = BTreeSet::new();
    seen.insert(current.clone());
    loop {
        let next = remaining[&current]
            .iter()
            .next()
            .expect("node in `remaining` always has an unresolved dependency")
            .clone();
        if let Some(pos) = path.iter().position(|id| *id == next) {
            return path[pos..].to_vec();
        }
        path.push(next.clone());
        seen.insert(next.clone());
        current = next;
    }
}

/// Collect_expr_refs walks `value` looking for embedded serialized [`Expr`]s, the same detection
/// `kroxide-templates::substitute` uses, appending every reference found. Duplicated rather than
/// imported since this crate has no dependency edge onto `kroxide-templates`'s private helper.
/// `pub(crate)` so the deployer can reuse it to find which live resources a manifest still needs
/// to refetch while waiting out a reference-resolution timeout (§4.3.3).
pub(crate) fn collect_expr_refs(value: &Value, out: &mut Vec<kroxide_types::Reference>) {
    if let Ok(expr) = serde_json::from_value::<Expr>(value.clone()) {
        out.extend(expr.references().into_iter().cloned());
        return;
    }
    if let Value::String(s) = value
        && let Ok(expr) = serde_json::from_str::<Expr>(s)
    {
        out.extend(expr.references().into_iter().cloned());
        return;
    }
    match value {
        Value::Object(map) => {
            for v in map.values() {
                collect_expr_refs(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_expr_refs(v, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use kroxide_types::{EnhancedManifest, RefView};

    fn manifest(name: &str) -> kroxide_types::ErasedManifest {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some(name.into());
        cm.metadata.namespace = Some("default".into());
        EnhancedManifest::new(name, cm).erase().unwrap()
    }

    fn manifest_referencing(name: &str, target: &str) -> kroxide_types::ErasedManifest {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some(name.into());
        cm.metadata.namespace = Some("default".into());
        let expr = Expr::from(RefView::new(target).field("metadata").field("name"));
        cm.data = Some(std::collections::BTreeMap::from([(
            "target".to_string(),
            serde_json::to_string(&expr).unwrap(),
        )]));
        EnhancedManifest::new(name, cm).erase().unwrap()
    }

    #[test]
    fn orders_dependents_after_dependencies() {
        let composition = Composition::builder("demo", "v1", "Demo")
            .resource(manifest("db"))
            .unwrap()
            .resource(manifest_referencing("app", "db"))
            .unwrap()
            .build()
            .unwrap();
        let graph = DependencyGraph::build(&composition).unwrap();
        let order = graph.order().unwrap();
        let db_pos = order.iter().position(|id| id.as_str() == "db").unwrap();
        let app_pos = order.iter().position(|id| id.as_str() == "app").unwrap();
        assert!(db_pos < app_pos);
    }

    #[test]
    fn ties_break_lexicographically() {
        let composition = Composition::builder("demo", "v1", "Demo")
            .resource(manifest("zeta"))
            .unwrap()
            .resource(manifest("alpha"))
            .unwrap()
            .build()
            .unwrap();
        let graph = DependencyGraph::build(&composition).unwrap();
        let order = graph.order().unwrap();
        assert_eq!(order[0].as_str(), "alpha");
        assert_eq!(order[1].as_str(), "zeta");
    }

    #[test]
    fn rejects_cycles() {
        let mut a = Secret::default();
        a.metadata.name = Some("a".into());
        a.metadata.namespace = Some("default".into());
        a.string_data = Some(std::collections::BTreeMap::from([(
            "target".to_string(),
            serde_json::to_string(&Expr::from(RefView::new("b").field("metadata").field("name"))).unwrap(),
        )]));
        let a = EnhancedManifest::new("a", a).erase().unwrap();

        let composition = Composition::builder("demo", "v1", "Demo")
            .resource(a)
            .unwrap()
            .resource(manifest_referencing("b", "a"))
            .unwrap()
            .build()
            .unwrap();
        let graph = DependencyGraph::build(&composition).unwrap();
        let err = graph.order().unwrap_err();
        assert!(matches!(err, CompositionError::CircularDependency { .. }));
    }
}
