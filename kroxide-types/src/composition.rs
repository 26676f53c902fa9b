//! Composition holds the top-level data model object (§3): a named set of resources plus a
//! status mapping, built against a pair of externally-supplied schemas.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{CompositionError, ValidationError};
use crate::expr::Expr;
use crate::manifest::ErasedManifest;
use crate::reference::{FieldPath, FieldType, ResourceId};

/// Schema is the external collaborator interface (§1: "a schema interface that validates and
/// introspects user spec/status shapes"). The core never implements a concrete schema; callers
/// supply one (e.g. backed by `schemars`-generated JSON Schema, or a hand-written shape).
pub trait Schema: Send + Sync {
    /// Validate checks `value` against this schema, returning every violation found rather than
    /// failing fast, matching `ValidationError`'s "surfaced to caller before any cluster
    /// contact" role (§7).
    fn validate(&self, value: &Value) -> Vec<ValidationError>;

    /// Field_type introspects the expected type of `path` within this schema, if known. Used
    /// for advisory validation (§4.2.3); returning `None` is always acceptable ("late-bound"
    /// fields, §4.1).
    fn field_type(&self, path: &FieldPath) -> Option<FieldType>;

    /// Json_schema returns this schema's shape as a JSON Schema document, for embedding in an
    /// emitted `ResourceGraphDefinition` (§4.7). `None` means the schema has no representable
    /// shape (e.g. [`OpenSchema`]); the emitter embeds an empty object in that case.
    fn json_schema(&self) -> Option<Value> {
        None
    }
}

/// OpenSchema is a permissive [`Schema`] that accepts any value and knows no field types. Useful
/// as a default when the caller has no schema to enforce, and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSchema;

impl Schema for OpenSchema {
    fn validate(&self, _value: &Value) -> Vec<ValidationError> {
        Vec::new()
    }
    fn field_type(&self, _path: &FieldPath) -> Option<FieldType> {
        None
    }
}

/// Composition is `{name, apiVersion, kind, specSchema, statusSchema, resources, statusMapping}`
/// (§3).
pub struct Composition {
    /// Name of the composition (and of the CRD it projects, for RGD emission).
    pub name: String,
    /// ApiVersion of the CRD this composition's instances are served under.
    pub api_version: String,
    /// Kind of the CRD this composition's instances are served under.
    pub kind: String,
    /// SpecSchema validates and introspects the user-supplied spec.
    pub spec_schema: Box<dyn Schema>,
    /// StatusSchema validates and introspects the projected status.
    pub status_schema: Box<dyn Schema>,
    /// Resources maps a stable id to its enhanced manifest. An [`IndexMap`] is used (not a
    /// `HashMap`) so resource insertion order is preserved as a stable default ordering ahead of
    /// the dependency-resolver's own tie-breaking (§4.3.2 orders lexicographically by id
    /// regardless, but iteration order elsewhere — e.g. RGD emission — benefits from stability).
    pub resources: IndexMap<ResourceId, ErasedManifest>,
    /// StatusMapping maps a status leaf path to the expression that computes it.
    pub status_mapping: IndexMap<FieldPath, Expr>,
}

impl Composition {
    /// Builder starts building a composition.
    pub fn builder(
        name: impl Into<String>,
        api_version: impl Into<String>,
        kind: impl Into<String>,
    ) -> CompositionBuilder {
        CompositionBuilder {
            name: name.into(),
            api_version: api_version.into(),
            kind: kind.into(),
            spec_schema: Box::new(OpenSchema),
            status_schema: Box::new(OpenSchema),
            resources: IndexMap::new(),
            status_mapping: IndexMap::new(),
        }
    }

    /// Validate_references re-checks the invariant that every reference names an existing
    /// resource id or the schema sentinel (§3: "Violations are a hard error surfaced at
    /// composition build time"). Exposed so callers mutating a composition after construction
    /// (uncommon, but not prohibited) can re-validate.
    ///
    /// # Errors
    ///
    /// Returns the first [`CompositionError::UnknownReference`] found.
    pub fn validate_references(&self) -> Result<(), CompositionError> {
        let mut exprs: Vec<&Expr> = self.status_mapping.values().collect();
        // Resources themselves may carry expressions embedded as JSON strings when loaded via
        // `kroxide-templates`'s declarative path; those are validated at that layer since this
        // type only models manifests as already-resolved `ErasedManifest`s. Here we validate the
        // status mapping, which is always expression-valued (§3's `statusMapping: leafPath ->
        // Expression`).
        while let Some(e) = exprs.pop() {
            for r in e.references() {
                if !r.resource_id.is_schema() && !self.resources.contains_key(&r.resource_id) {
                    return Err(CompositionError::UnknownReference(r.resource_id.clone()));
                }
            }
        }
        Ok(())
    }
}

/// CompositionBuilder incrementally assembles a [`Composition`], rejecting duplicate resource
/// ids and unknown references at [`Self::build`] time.
pub struct CompositionBuilder {
    name: String,
    api_version: String,
    kind: String,
    spec_schema: Box<dyn Schema>,
    status_schema: Box<dyn Schema>,
    resources: IndexMap<ResourceId, ErasedManifest>,
    status_mapping: IndexMap<FieldPath, Expr>,
}

impl CompositionBuilder {
    /// Spec_schema sets the schema used to validate the user spec.
    #[must_use]
    pub fn spec_schema(mut self, schema: impl Schema + 'static) -> Self {
        self.spec_schema = Box::new(schema);
        self
    }

    /// Status_schema sets the schema used to validate the projected status.
    #[must_use]
    pub fn status_schema(mut self, schema: impl Schema + 'static) -> Self {
        self.status_schema = Box::new(schema);
        self
    }

    /// Resource adds an enhanced manifest under its own id.
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::SchemaMismatch`] if `manifest.id` was already inserted.
    pub fn resource(mut self, manifest: ErasedManifest) -> Result<Self, CompositionError> {
        if self.resources.contains_key(&manifest.id) {
            return Err(CompositionError::SchemaMismatch(format!(
                "duplicate resource id {:?}",
                manifest.id
            )));
        }
        self.resources.insert(manifest.id.clone(), manifest);
        Ok(self)
    }

    /// Status_field maps a leaf path of the projected status to an expression.
    #[must_use]
    pub fn status_field(mut self, path: FieldPath, expr: Expr) -> Self {
        self.status_mapping.insert(path, expr);
        self
    }

    /// Build finalises the composition, validating that every reference names an existing
    /// resource id or the schema sentinel (§3 invariant).
    ///
    /// # Errors
    ///
    /// Returns [`CompositionError::UnknownReference`] on violation.
    pub fn build(self) -> Result<Composition, CompositionError> {
        let composition = Composition {
            name: self.name,
            api_version: self.api_version,
            kind: self.kind,
            spec_schema: self.spec_schema,
            status_schema: self.status_schema,
            resources: self.resources,
            status_mapping: self.status_mapping,
        };
        composition.validate_references()?;
        Ok(composition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::EnhancedManifest;
    use crate::reference::{RefView, Reference};
    use k8s_openapi::api::core::v1::ConfigMap;

    fn cm(name: &str) -> ErasedManifest {
        let mut c = ConfigMap::default();
        c.metadata.name = Some(name.into());
        c.metadata.namespace = Some("default".into());
        EnhancedManifest::new(name, c).erase().unwrap()
    }

    #[test]
    fn rejects_unknown_reference() {
        let bad = Expr::Ref(Reference::new("missing", FieldPath::root().field("x")));
        let result = Composition::builder("demo", "v1", "Demo")
            .resource(cm("a"))
            .unwrap()
            .status_field(FieldPath::root().field("url"), bad)
            .build();
        let Err(err) = result else { panic!("expected a build error") };
        assert!(matches!(err, CompositionError::UnknownReference(_)));
    }

    #[test]
    fn accepts_schema_and_known_resource_references() {
        let ok = Expr::from(RefView::new("a").field("metadata").field("name"))
            .or_else(Expr::from(RefView::schema().field("spec").field("name")));
        let built = Composition::builder("demo", "v1", "Demo")
            .resource(cm("a"))
            .unwrap()
            .status_field(FieldPath::root().field("name"), ok)
            .build();
        assert!(built.is_ok());
    }
}
