//! Rgd emits a [`Composition`] as a single `ResourceGraphDefinition` document for an external
//! reconciler to interpret (§4.7).

use serde_json::{Map, Value};

use kroxide_expr::{analyze, AnalysisContext, AnalysisError, SourceMap};
use kroxide_types::{Composition, FieldSegment, ResourceId};

use crate::substitute::{resolve_for_cel, TemplateError};

/// Kind_resolver returns a closure that looks up a referenced resource's kind from `composition`,
/// for the curated per-kind field validation `kroxide_expr::analyze` performs (§4.2.3).
fn kind_resolver(composition: &Composition) -> impl Fn(&ResourceId) -> Option<String> + '_ {
    move |id| composition.resources.get(id)?.object.types.as_ref().map(|t| t.kind.clone())
}

/// EXTERNAL_RECONCILER_API_VERSION is the `apiVersion` of the emitted `ResourceGraphDefinition`
/// document (§4.7).
pub const EXTERNAL_RECONCILER_API_VERSION: &str = "kro.run/v1alpha1";

/// RgdError wraps the ways emission can fail.
#[derive(thiserror::Error, Debug)]
pub enum RgdError {
    /// A resource's built manifest or a status expression could not be serialised/lowered.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// Serde_json failed to turn a resource's manifest into a `Value`.
    #[error("serialising manifest: {0}")]
    Json(#[from] serde_json::Error),
    /// CEL analysis of a status expression failed.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    /// The document could not be rendered as YAML.
    #[error("rendering yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Emit_rgd serialises `composition` into a `ResourceGraphDefinition` YAML document (§4.7),
/// alongside the [`SourceMap`] recording every expression analyzed along the way (§4.2.4).
/// Emission is idempotent: calling this twice on the same composition produces byte-identical
/// output, since every map involved (`serde_json::Value::Object`, backed by a `BTreeMap`) is
/// serialised in sorted key order and every array preserves the composition's own insertion
/// order.
///
/// # Errors
///
/// Returns [`RgdError`] if a manifest fails to serialise, an embedded reference expression calls
/// an unwhitelisted function or names an unrecognised field on a known resource kind, or the
/// resulting document fails to render as YAML.
pub fn emit_rgd(composition: &Composition) -> Result<(String, SourceMap), RgdError> {
    let resolve_kind = kind_resolver(composition);
    let mut source_map = SourceMap::new();

    let mut resources = Vec::with_capacity(composition.resources.len());
    for (id, manifest) in &composition.resources {
        let raw = serde_json::to_value(&manifest.object)?;
        let template = resolve_for_cel(&raw, AnalysisContext::ResourceBuilder, &resolve_kind)?;
        resources.push(serde_json::json!({"id": id.as_str(), "template": template}));
    }

    let mut status = Value::Null;
    for (path, expr) in &composition.status_mapping {
        if expr.references().is_empty() {
            // Pure-literal leaves are handled in-process by the status hydrator during direct
            // apply and have no business in a document an external reconciler re-evaluates
            // (§4.5).
            continue;
        }
        let analysis = analyze(expr, AnalysisContext::StatusBuilder, &resolve_kind)?;
        set_path(&mut status, path.segments(), Value::String(analysis.cel.clone()));
        source_map.push(analysis);
    }
    if status.is_null() {
        status = Value::Object(Map::new());
    }

    let schema = serde_json::json!({
        "apiVersion": composition.api_version,
        "kind": composition.kind,
        "spec": composition.spec_schema.json_schema().unwrap_or(Value::Object(Map::new())),
        "status": status,
    });

    let doc = serde_json::json!({
        "apiVersion": EXTERNAL_RECONCILER_API_VERSION,
        "kind": "ResourceGraphDefinition",
        "metadata": {"name": composition.name},
        "spec": {
            "schema": schema,
            "resources": resources,
        },
    });

    Ok((serde_yaml::to_string(&doc)?, source_map))
}

fn set_path(root: &mut Value, segments: &[FieldSegment], value: Value) {
    match segments.split_first() {
        None => *root = value,
        Some((FieldSegment::Name(n), rest)) => {
            if !root.is_object() {
                *root = Value::Object(Map::new());
            }
            let map = root.as_object_mut().expect("just ensured object");
            let entry = map.entry(n.clone()).or_insert(Value::Null);
            set_path(entry, rest, value);
        }
        Some((FieldSegment::Index(i), rest)) => {
            if !root.is_array() {
                *root = Value::Array(Vec::new());
            }
            let arr = root.as_array_mut().expect("just ensured array");
            while arr.len() <= *i {
                arr.push(Value::Null);
            }
            set_path(&mut arr[*i], rest, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kroxide_types::{EnhancedManifest, FieldPath, RefView};

    fn demo_composition() -> Composition {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some("demo".into());
        cm.metadata.namespace = Some("default".into());
        let manifest = EnhancedManifest::new("cm", cm).erase().unwrap();

        Composition::builder("demo", "v1alpha1", "Demo")
            .resource(manifest)
            .unwrap()
            .status_field(
                FieldPath::root().field("ready"),
                kroxide_types::Expr::from(RefView::new("cm").field("metadata").field("name"))
                    .eq_expr("demo"),
            )
            .status_field(FieldPath::root().field("note"), kroxide_types::Expr::from("static"))
            .build()
            .unwrap()
    }

    #[test]
    fn emission_is_idempotent() {
        let composition = demo_composition();
        let (a, _) = emit_rgd(&composition).unwrap();
        let (b, _) = emit_rgd(&composition).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn literal_status_leaves_are_omitted() {
        let composition = demo_composition();
        let (yaml, _) = emit_rgd(&composition).unwrap();
        assert!(!yaml.contains("note"));
        assert!(yaml.contains("ready"));
    }

    #[test]
    fn document_has_expected_top_level_shape() {
        let composition = demo_composition();
        let (yaml, _) = emit_rgd(&composition).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["kind"].as_str(), Some("ResourceGraphDefinition"));
        assert_eq!(doc["spec"]["resources"][0]["id"].as_str(), Some("cm"));
    }

    #[test]
    fn source_map_records_status_expressions() {
        let composition = demo_composition();
        let (_, source_map) = emit_rgd(&composition).unwrap();
        assert_eq!(source_map.entries().len(), 1);
        assert_eq!(source_map.entries()[0].context, kroxide_expr::AnalysisContext::StatusBuilder);
    }
}
