//! Manifest holds the `EnhancedManifest` type (§3): a plain Kubernetes object augmented with a
//! stable id, an optional readiness evaluator, and (via [`crate::reference`]) a reference view.

use std::fmt;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DynamicObject, TypeMeta};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CompositionError;
use crate::reference::ResourceId;

/// ReadinessOutcome is a factory-supplied readiness predicate's result (§4.4):
/// `{ready, message?, details?}`.
#[derive(Clone, Debug, Default, Serialize, serde::Deserialize)]
pub struct ReadinessOutcome {
    /// Ready indicates the resource has reached its desired state.
    pub ready: bool,
    /// Message is a human-readable description of the current state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Details carries arbitrary structured context (e.g. observed replica counts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ReadinessOutcome {
    /// Ready constructs a successful outcome.
    pub fn ready() -> Self {
        Self {
            ready: true,
            ..Default::default()
        }
    }

    /// Pending constructs an outcome that is not yet ready, carrying a progress message.
    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            ready: false,
            message: Some(message.into()),
            details: None,
        }
    }
}

/// ReadinessFn is a factory-provided readiness evaluator over an object of type `K` (§4.4,
/// strategy 1). It is `Arc`'d so a single evaluator can be shared across the readiness poller's
/// repeated invocations without re-registering a closure per tick.
pub type ReadinessFn<K> = Arc<dyn Fn(&K) -> ReadinessOutcome + Send + Sync>;

/// EnhancedManifest is a Kubernetes object plus a stable id and an optional readiness evaluator
/// (§3).
pub struct EnhancedManifest<K> {
    /// Id is unique within the owning composition.
    pub id: ResourceId,
    /// Object is the underlying Kubernetes manifest.
    pub object: K,
    /// Readiness is the factory-supplied readiness predicate, if any.
    pub readiness: Option<ReadinessFn<K>>,
}

impl<K> fmt::Debug for EnhancedManifest<K>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnhancedManifest")
            .field("id", &self.id)
            .field("object", &self.object)
            .field("readiness", &self.readiness.is_some())
            .finish()
    }
}

impl<K> EnhancedManifest<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + 'static,
{
    /// New wraps `object` under `id`, with no readiness evaluator.
    pub fn new(id: impl Into<ResourceId>, object: K) -> Self {
        Self {
            id: id.into(),
            object,
            readiness: None,
        }
    }

    /// With_readiness attaches a readiness evaluator.
    #[must_use]
    pub fn with_readiness(mut self, f: ReadinessFn<K>) -> Self {
        self.readiness = Some(f);
        self
    }

    /// Erase converts this manifest into a type-erased [`ErasedManifest`], the form the
    /// composition graph and deployer operate on so that resources of differing kinds can share
    /// one `resources: id -> EnhancedManifest` map (§3).
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::Serialization`] if `object` cannot round-trip through JSON.
    pub fn erase(self) -> Result<ErasedManifest, CompositionError> {
        let types = TypeMeta {
            api_version: K::api_version(&()).to_string(),
            kind: K::kind(&()).to_string(),
        };
        let metadata = self.object.meta().clone();
        let value = serde_json::to_value(&self.object)
            .map_err(|e| CompositionError::Serialization(e.to_string()))?;
        // Keep every field but the ones `types`/`metadata` above already carry: `spec` for most
        // kinds, but also e.g. `data`/`binaryData` (ConfigMap), `stringData` (Secret), `rules`
        // (Role) — anything a kind puts at the top level rather than nesting under `spec`.
        let data = match value {
            Value::Object(mut map) => {
                map.remove("apiVersion");
                map.remove("kind");
                map.remove("metadata");
                map.remove("status");
                Value::Object(map)
            }
            other => other,
        };
        let readiness = self.readiness.map(|f| -> ReadinessFn<DynamicObject> {
            Arc::new(move |obj: &DynamicObject| {
                // DynamicObject serializes as the full object (types + metadata + flattened
                // data), so round-tripping through JSON re-hydrates the typed `K` the evaluator
                // expects, observing spec *and* status as the live object does.
                match serde_json::to_value(obj).and_then(serde_json::from_value::<K>) {
                    Ok(typed) => f(&typed),
                    Err(_) => ReadinessOutcome::pending("unable to decode live object for readiness evaluation"),
                }
            })
        });
        Ok(ErasedManifest {
            id: self.id,
            object: DynamicObject {
                types: Some(types),
                metadata,
                data,
            },
            readiness,
        })
    }
}

/// ErasedManifest is the type-erased form of an [`EnhancedManifest`]: a [`DynamicObject`] (the
/// same type `kube`'s own dynamic-client machinery uses for kind-agnostic objects) plus id and
/// readiness evaluator. [`crate::Composition`] stores resources in this form.
pub struct ErasedManifest {
    /// Id is unique within the owning composition.
    pub id: ResourceId,
    /// Object is the underlying manifest, kind-erased.
    pub object: DynamicObject,
    /// Readiness is the factory-supplied readiness predicate, if any, operating on the erased
    /// object.
    pub readiness: Option<ReadinessFn<DynamicObject>>,
}

impl fmt::Debug for ErasedManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedManifest")
            .field("id", &self.id)
            .field("kind", &self.object.types.as_ref().map(|t| &t.kind))
            .field("name", &self.object.metadata.name)
            .field("readiness", &self.readiness.is_some())
            .finish()
    }
}

impl ErasedManifest {
    /// Kind returns the object's Kubernetes kind, if known.
    pub fn kind(&self) -> &str {
        self.object
            .types
            .as_ref()
            .map(|t| t.kind.as_str())
            .unwrap_or("")
    }

    /// Name returns the object's name.
    pub fn name(&self) -> String {
        self.object.name_any()
    }

    /// Namespace returns the object's namespace, if namespaced.
    pub fn namespace(&self) -> Option<String> {
        self.object.namespace()
    }

    /// Metadata returns the object's metadata.
    pub fn metadata(&self) -> &ObjectMeta {
        &self.object.metadata
    }
}

/// FactoryConfig is the configuration a [`Factory`] is invoked with (§6): `{name, namespace?,
/// id?, ...kind-specific-fields}`.
#[derive(Clone, Debug, Default, Serialize, serde::Deserialize)]
pub struct FactoryConfig {
    /// Name of the resource to create.
    pub name: String,
    /// Namespace, required for namespaced kinds, forbidden for cluster-scoped kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Id overrides the derived resource id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ResourceId>,
    /// Fields carries kind-specific configuration as arbitrary JSON.
    #[serde(flatten)]
    pub fields: Value,
}

/// Factory is the external collaborator interface (§1, §6) a composition builder uses to obtain
/// an [`EnhancedManifest`] for a given configuration — the core never implements concrete
/// factories itself (Deployment, Service, Helm, …), it only consumes this trait.
pub trait Factory {
    /// Output is the concrete Kubernetes resource type this factory produces.
    type Output: Resource<DynamicType = ()> + Serialize + DeserializeOwned;

    /// Build constructs an [`EnhancedManifest`] from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError`] if `config` is invalid for this factory — in particular, a
    /// cluster-scoped kind given a namespace must return
    /// [`CompositionError::ClusterScopeMismatch`] (§6).
    fn build(&self, config: &FactoryConfig) -> Result<EnhancedManifest<Self::Output>, CompositionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;

    #[test]
    fn erase_round_trips_kind_and_name() {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some("cfg".into());
        cm.metadata.namespace = Some("default".into());
        let em = EnhancedManifest::new("cfg-resource", cm);
        let erased = em.erase().unwrap();
        assert_eq!(erased.kind(), "ConfigMap");
        assert_eq!(erased.name(), "cfg");
        assert_eq!(erased.namespace().as_deref(), Some("default"));
    }
}
