//! Resolve builds a [`LiveSnapshot`] of already-deployed resources and projects [`FieldPath`]s
//! out of it, the mechanism behind reference resolution (§4.3.1: "the resolver looks up the
//! resource's live object by id and projects the reference's field path out of it").

use indexmap::IndexMap;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind};
use serde_json::Value;
use tracing::trace;

use kroxide_types::{FieldPath, Reference, ResourceId};

/// ResolverError indicates a live resource could not be fetched or projected.
#[derive(thiserror::Error, Debug)]
pub enum ResolverError {
    /// Kube is a generic error from the `kube` crate while fetching a live object.
    #[error("kube error fetching {resource_id}: {source}")]
    Kube {
        /// Id of the resource that failed to fetch.
        resource_id: ResourceId,
        /// Underlying error.
        #[source]
        source: kube::Error,
    },
}

/// LiveSnapshot holds the already-resolved JSON form of the user spec (schema) and every
/// deployed resource in a composition, keyed by resource id.
#[derive(Debug, Default, Clone)]
pub struct LiveSnapshot {
    schema: Value,
    objects: IndexMap<ResourceId, Value>,
}

impl LiveSnapshot {
    /// New starts a snapshot with the given user spec value as the schema root.
    pub fn new(schema: Value) -> Self {
        Self {
            schema,
            objects: IndexMap::new(),
        }
    }

    /// Insert records the live JSON value for a resource id.
    pub fn insert(&mut self, id: ResourceId, object: Value) {
        self.objects.insert(id, object);
    }

    /// Fetch populates the snapshot entry for `id` by reading its live object from the cluster.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::Kube`] if the API server request fails. A `NotFound` response is
    /// not an error here: the resource simply has no value yet (resolved as absent).
    pub async fn fetch(
        &mut self,
        client: &kube::Client,
        id: ResourceId,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ResolverError> {
        let ar = ApiResource::from_gvk(gvk);
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
            None => Api::all_with(client.clone(), &ar),
        };
        match api.get_opt(name).await {
            Ok(Some(obj)) => {
                let value = serde_json::to_value(&obj).unwrap_or(Value::Null);
                trace!(%id, "fetched live object");
                self.objects.insert(id, value);
            }
            Ok(None) => {
                trace!(%id, "resource not yet present");
                self.objects.insert(id, Value::Null);
            }
            Err(source) => return Err(ResolverError::Kube { resource_id: id, source }),
        }
        Ok(())
    }

    /// Resolve looks up the value of a single reference against this snapshot.
    pub fn resolve(&self, r: &Reference) -> Option<Value> {
        let root = if r.resource_id.is_schema() {
            &self.schema
        } else {
            self.objects.get(&r.resource_id)?
        };
        project_path(root, &r.field_path)
    }

    /// Resolver returns a closure suitable for [`kroxide_expr::evaluate`]'s resolve parameter.
    pub fn resolver(&self) -> impl Fn(&Reference) -> Option<Value> + '_ {
        move |r: &Reference| self.resolve(r)
    }
}

/// Project_path walks `path`'s segments out of `root`, returning `None` if any intermediate
/// segment is absent or the wrong shape.
pub fn project_path(root: &Value, path: &FieldPath) -> Option<Value> {
    let mut cur = root.clone();
    for seg in path.segments() {
        cur = match seg {
            kroxide_types::FieldSegment::Name(n) => cur.get(n)?.clone(),
            kroxide_types::FieldSegment::Index(i) => cur.get(*i)?.clone(),
        };
    }
    Some(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kroxide_types::RefView;

    #[test]
    fn resolves_nested_field_from_schema() {
        let snap = LiveSnapshot::new(serde_json::json!({"spec": {"name": "demo"}}));
        let r = RefView::schema().field("spec").field("name").reference().clone();
        assert_eq!(snap.resolve(&r), Some(Value::String("demo".into())));
    }

    #[test]
    fn missing_resource_resolves_to_none() {
        let snap = LiveSnapshot::new(Value::Null);
        let r = RefView::new("db").field("status").reference().clone();
        assert_eq!(snap.resolve(&r), None);
    }

    #[test]
    fn project_path_handles_array_index() {
        let root = serde_json::json!({"status": {"ingress": [{"ip": "1.2.3.4"}]}});
        let path = FieldPath::root().field("status").field("ingress").index(0).field("ip");
        assert_eq!(project_path(&root, &path), Some(Value::String("1.2.3.4".into())));
    }
}
