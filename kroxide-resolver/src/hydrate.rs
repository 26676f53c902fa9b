//! Hydrate materialises a composition's projected status by evaluating each mapped leaf
//! expression against live resolved values (§4.5).

use indexmap::IndexMap;
use serde_json::Value;

use kroxide_expr::EvalError;
use kroxide_types::{Expr, FieldPath, FieldSegment};

use crate::resolve::LiveSnapshot;

/// HydrationError names the leaf path whose expression failed to evaluate.
#[derive(thiserror::Error, Debug)]
#[error("hydrating status field {path}: {source}")]
pub struct HydrationError {
    /// Leaf path being hydrated when the failure occurred.
    pub path: FieldPath,
    /// Underlying evaluation error.
    #[source]
    pub source: EvalError,
}

/// Hydrate_status evaluates every leaf expression in `mapping` against `snapshot`, building the
/// nested status object the mapping describes.
///
/// # Errors
///
/// Returns the first [`HydrationError`] encountered; later leaves are not attempted once one
/// fails, since a partially-hydrated status is not a meaningful value to surface (§7: "hydration
/// failures are returned, not silently substituted with defaults").
pub fn hydrate_status(
    mapping: &IndexMap<FieldPath, Expr>,
    snapshot: &LiveSnapshot,
) -> Result<Value, HydrationError> {
    let resolver = snapshot.resolver();
    let mut status = Value::Null;
    for (path, expr) in mapping {
        let value = kroxide_expr::evaluate(expr, &resolver).map_err(|source| HydrationError {
            path: path.clone(),
            source,
        })?;
        set_path(&mut status, path.segments(), value);
    }
    Ok(status)
}

fn set_path(root: &mut Value, segments: &[FieldSegment], value: Value) {
    match segments.split_first() {
        None => *root = value,
        Some((FieldSegment::Name(n), rest)) => {
            if !root.is_object() {
                *root = Value::Object(serde_json::Map::new());
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
    use kroxide_types::RefView;

    #[test]
    fn hydrates_nested_status_from_two_leaves() {
        let mut snap = LiveSnapshot::new(Value::Null);
        snap.insert("svc".into(), serde_json::json!({"status": {"ip": "10.0.0.1"}}));
        snap.insert("db".into(), serde_json::json!({"status": {"ready": true}}));

        let mut mapping = IndexMap::new();
        mapping.insert(
            FieldPath::root().field("url").field("host"),
            Expr::from(RefView::new("svc").field("status").field("ip")),
        );
        mapping.insert(
            FieldPath::root().field("ready"),
            Expr::from(RefView::new("db").field("status").field("ready")),
        );

        let status = hydrate_status(&mapping, &snap).unwrap();
        assert_eq!(status, serde_json::json!({"url": {"host": "10.0.0.1"}, "ready": true}));
    }

    #[test]
    fn reports_which_leaf_failed() {
        let snap = LiveSnapshot::new(Value::Null);
        let mut mapping = IndexMap::new();
        mapping.insert(
            FieldPath::root().field("missing"),
            Expr::from(RefView::new("absent").field("x")),
        );
        let err = hydrate_status(&mapping, &snap).unwrap_err();
        assert_eq!(err.path.to_string(), "missing");
    }
}
