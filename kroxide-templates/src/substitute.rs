//! Substitute resolves [`Expr`] values embedded inside a manifest's JSON fields (§4.7): a
//! resource's `FactoryConfig` may place a serialized expression at any position to make one
//! resource's field depend on another's, and this module walks the built manifest replacing
//! those subtrees — either with their evaluated value (direct deployment) or with a CEL
//! placeholder string (RGD emission).

use serde_json::{Map, Value};

use kroxide_expr::{analyze, evaluate, AnalysisContext, AnalysisError, EvalError};
use kroxide_types::{Expr, Reference, ResourceId};

/// TemplateError wraps whichever of the two resolution strategies failed.
#[derive(thiserror::Error, Debug)]
pub enum TemplateError {
    /// Direct evaluation against resolved reference values failed.
    #[error("direct evaluation: {0}")]
    Eval(#[from] EvalError),
    /// CEL analysis (used for RGD emission) failed, e.g. an unwhitelisted call.
    #[error("cel analysis: {0}")]
    Analysis(#[from] AnalysisError),
}

/// Try_as_expr attempts to interpret `value` as a serialized [`Expr`]. `Expr`'s derived
/// `Serialize` is externally tagged (`{"Ref": {...}}`, `{"Binary": [...]}`, ...), a shape no
/// ordinary Kubernetes manifest field takes, so this is an unambiguous detector in practice.
/// Manifest fields Kubernetes types string (`ConfigMap.data`, env var values, ...) can't carry a
/// nested JSON object at all, so a reference placed there is serialized to a JSON *string*
/// instead; this is tried as a fallback so both positions are detected identically.
fn try_as_expr(value: &Value) -> Option<Expr> {
    if let Ok(expr) = serde_json::from_value::<Expr>(value.clone()) {
        return Some(expr);
    }
    match value {
        Value::String(s) => serde_json::from_str::<Expr>(s).ok(),
        _ => None,
    }
}

/// Resolve_for_direct walks `value`, replacing every embedded expression with its evaluated
/// result against `resolve`, for use when the engine applies a composition directly.
///
/// # Errors
///
/// Returns the first [`EvalError`] encountered.
pub fn resolve_for_direct(
    value: &Value,
    resolve: &dyn Fn(&Reference) -> Option<Value>,
) -> Result<Value, TemplateError> {
    if let Some(expr) = try_as_expr(value) {
        return Ok(evaluate(&expr, resolve)?);
    }
    Ok(match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_for_direct(v, resolve)?);
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_for_direct(item, resolve)?);
            }
            Value::Array(out)
        }
        other => other.clone(),
    })
}

/// Resolve_for_cel walks `value`, replacing every embedded expression with a `${cel}` placeholder
/// string, for use when the engine emits a composition as a `ResourceGraphDefinition` (§4.7: "CEL
/// placeholders substituted into string positions ... references in non-string positions
/// represented as the CEL expression in string form"). Every expression found is analyzed under
/// `context` (§4.2.3), with `resolve_kind` consulted for curated per-kind field validation.
///
/// # Errors
///
/// Returns the first [`AnalysisError`] encountered (an unwhitelisted call, a result-type
/// mismatch, or an unrecognised field on a known resource kind).
pub fn resolve_for_cel(
    value: &Value,
    context: AnalysisContext,
    resolve_kind: &dyn Fn(&ResourceId) -> Option<String>,
) -> Result<Value, TemplateError> {
    if let Some(expr) = try_as_expr(value) {
        let analysis = analyze(&expr, context, resolve_kind)?;
        return Ok(Value::String(format!("${{{}}}", analysis.cel)));
    }
    Ok(match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_for_cel(v, context, resolve_kind)?);
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_for_cel(item, context, resolve_kind)?);
            }
            Value::Array(out)
        }
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kroxide_types::RefView;

    #[test]
    fn direct_resolution_inlines_evaluated_value() {
        let expr = Expr::from(RefView::new("svc").field("status").field("ip"));
        let field = serde_json::to_value(&expr).unwrap();
        let manifest = serde_json::json!({"spec": {"host": field}});
        let resolved = resolve_for_direct(&manifest, &|_r| Some(Value::String("10.0.0.1".into()))).unwrap();
        assert_eq!(resolved, serde_json::json!({"spec": {"host": "10.0.0.1"}}));
    }

    #[test]
    fn cel_resolution_wraps_in_placeholder_syntax() {
        let expr = Expr::from(RefView::new("svc").field("status").field("ip"));
        let field = serde_json::to_value(&expr).unwrap();
        let manifest = serde_json::json!({"spec": {"host": field}});
        let resolved = resolve_for_cel(&manifest, AnalysisContext::ResourceBuilder, &|_| None).unwrap();
        assert_eq!(
            resolved,
            serde_json::json!({"spec": {"host": "${resources.svc.status.ip}"}})
        );
    }

    #[test]
    fn string_typed_fields_carry_a_serialized_expr() {
        let expr = Expr::from(RefView::new("svc").field("status").field("ip"));
        let field = Value::String(serde_json::to_string(&expr).unwrap());
        let manifest = serde_json::json!({"data": {"host": field}});
        let resolved = resolve_for_direct(&manifest, &|_r| Some(Value::String("10.0.0.1".into()))).unwrap();
        assert_eq!(resolved, serde_json::json!({"data": {"host": "10.0.0.1"}}));
    }

    #[test]
    fn plain_json_passes_through_unchanged() {
        let manifest = serde_json::json!({"spec": {"replicas": 3, "name": "demo"}});
        assert_eq!(resolve_for_direct(&manifest, &|_| None).unwrap(), manifest);
        assert_eq!(resolve_for_cel(&manifest, AnalysisContext::ResourceBuilder, &|_| None).unwrap(), manifest);
    }
}
