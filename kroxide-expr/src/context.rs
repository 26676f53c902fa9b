//! Context implements §4.2.3's context detection and validation: each analysed expression plays
//! one role in a composition, which selects its expected CEL result type and which curated
//! per-kind field paths the analyzer recognises.

use serde::{Deserialize, Serialize};

use kroxide_types::{BinaryOp, Expr, FieldPath, FieldSegment, FieldType, Literal, Reference, ResourceId};

use crate::AnalysisError;

/// AnalysisContext is the role an expression plays in a composition (§4.2.3): it selects the
/// expected CEL result type and, for `StatusBuilder`/`ResourceBuilder`, whether curated per-kind
/// field-path validation applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisContext {
    /// A composition's status-mapping leaf expression.
    StatusBuilder,
    /// A field embedded directly in a resource's own manifest.
    ResourceBuilder,
    /// An `includeWhen`/`readyWhen`-style boolean guard; expects a boolean result.
    Conditional,
    /// A template-literal interpolation; expects a string result.
    TemplateLiteral,
    /// No role is imposed (e.g. ad hoc CLI linting); no result-type check applies.
    Unconstrained,
}

/// Severity classifies a [`Diagnostic`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Non-fatal: the expression analyzes fine but touches a deprecated or possibly-absent field.
    Warning,
}

/// Diagnostic is a non-fatal finding surfaced alongside a successful analysis (§4.2.3's
/// deprecated/nullable field warnings).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity of the finding.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

impl Diagnostic {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// ExprClass classifies an expression node for the source map (§4.2.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprClass {
    /// Binary or logical operator application.
    Binary,
    /// Member or index access.
    Member,
    /// Template literal.
    Template,
    /// `cond ? then : else`.
    Conditional,
    /// `a?.b`.
    OptionalChain,
    /// `a ?? b`.
    NullishCoalesce,
    /// Function call.
    Call,
    /// Literal, reference, or unary negation.
    Other,
}

/// Classify returns the top-level classification of `expr` (§4.2.4).
pub fn classify(expr: &Expr) -> ExprClass {
    match expr {
        Expr::Literal(_) | Expr::Ref(_) | Expr::Unary(_) => ExprClass::Other,
        Expr::Member(..) | Expr::Index(..) => ExprClass::Member,
        Expr::Binary(..) | Expr::Logical(..) => ExprClass::Binary,
        Expr::Conditional(..) => ExprClass::Conditional,
        Expr::Template(_) => ExprClass::Template,
        Expr::OptionalChain(..) => ExprClass::OptionalChain,
        Expr::NullishCoalesce(..) => ExprClass::NullishCoalesce,
        Expr::Call(..) => ExprClass::Call,
    }
}

/// Infer_result_type makes a best-effort static guess at `expr`'s CEL result type. `None` means
/// unknown and is never treated as a mismatch — late-bound references are always accepted.
fn infer_result_type(expr: &Expr) -> Option<FieldType> {
    match expr {
        Expr::Literal(Literal::Bool(_)) => Some(FieldType::Bool),
        Expr::Literal(Literal::Number(_)) => Some(FieldType::Number),
        Expr::Literal(Literal::String(_)) => Some(FieldType::String),
        Expr::Literal(Literal::Null) => None,
        Expr::Ref(r) => r.expected_type,
        Expr::Binary(BinaryOp::StrictEq | BinaryOp::StrictNe, ..) => Some(FieldType::Bool),
        Expr::Binary(BinaryOp::Other(op), ..) => match op.as_str() {
            "==" | "!=" | "<" | "<=" | ">" | ">=" => Some(FieldType::Bool),
            _ => None,
        },
        Expr::Logical(..) | Expr::Unary(_) => Some(FieldType::Bool),
        Expr::Template(_) => Some(FieldType::String),
        Expr::Conditional(_, t, f) => {
            let (tt, ft) = (infer_result_type(t), infer_result_type(f));
            if tt == ft {
                tt
            } else {
                None
            }
        }
        Expr::Member(..) | Expr::Index(..) | Expr::OptionalChain(..) | Expr::NullishCoalesce(..) | Expr::Call(..) => None,
    }
}

/// Validate_context checks `expr`'s inferred result type against what `context` expects,
/// whenever the inference is confident (§4.2.3: "context selects ... the expected result type").
pub fn validate_context(expr: &Expr, context: AnalysisContext) -> Result<(), AnalysisError> {
    let expected = match context {
        AnalysisContext::Conditional => FieldType::Bool,
        AnalysisContext::TemplateLiteral => FieldType::String,
        AnalysisContext::StatusBuilder | AnalysisContext::ResourceBuilder | AnalysisContext::Unconstrained => {
            return Ok(());
        }
    };
    match infer_result_type(expr) {
        Some(actual) if actual != expected => Err(AnalysisError::ResultTypeMismatch {
            context,
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

struct FieldSpec {
    path: &'static str,
    deprecated: bool,
    nullable: bool,
}

const fn field(path: &'static str) -> FieldSpec {
    FieldSpec { path, deprecated: false, nullable: false }
}
const fn deprecated_field(path: &'static str) -> FieldSpec {
    FieldSpec { path, deprecated: true, nullable: false }
}
const fn nullable_field(path: &'static str) -> FieldSpec {
    FieldSpec { path, deprecated: false, nullable: true }
}

const COMMON_FIELDS: &[FieldSpec] = &[
    field("metadata.name"),
    field("metadata.namespace"),
    field("metadata.labels"),
    field("metadata.annotations"),
    field("metadata.uid"),
];

const DEPLOYMENT_FIELDS: &[FieldSpec] = &[
    field("spec.replicas"),
    field("spec.selector"),
    field("spec.template"),
    field("status.replicas"),
    field("status.readyReplicas"),
    field("status.availableReplicas"),
    field("status.updatedReplicas"),
    field("status.unavailableReplicas"),
    field("status.conditions"),
    deprecated_field("status.observedGeneration"),
];

const SERVICE_FIELDS: &[FieldSpec] = &[
    deprecated_field("spec.clusterIP"),
    field("spec.clusterIPs"),
    field("spec.selector"),
    field("spec.type"),
    field("spec.ports"),
    nullable_field("status.loadBalancer.ingress[]"),
    field("status.conditions"),
];

const POD_FIELDS: &[FieldSpec] = &[
    field("status.phase"),
    nullable_field("status.podIP"),
    nullable_field("status.podIPs"),
    field("status.conditions"),
    nullable_field("status.containerStatuses"),
    field("status.hostIP"),
];

const CONFIG_MAP_FIELDS: &[FieldSpec] = &[field("data"), field("binaryData")];

const SECRET_FIELDS: &[FieldSpec] = &[field("data"), field("type"), nullable_field("stringData")];

/// Curated_fields returns the known field paths for one of the five curated kinds (§4.2.3:
/// "Deployment|Service|Pod|ConfigMap|Secret"), or `None` for any other kind (validation is simply
/// skipped for kinds outside the curated set).
fn curated_fields(kind: &str) -> Option<&'static [FieldSpec]> {
    match kind {
        "Deployment" => Some(DEPLOYMENT_FIELDS),
        "Service" => Some(SERVICE_FIELDS),
        "Pod" => Some(POD_FIELDS),
        "ConfigMap" => Some(CONFIG_MAP_FIELDS),
        "Secret" => Some(SECRET_FIELDS),
        _ => None,
    }
}

fn normalize_path(path: &FieldPath) -> String {
    let mut out = String::new();
    for seg in path.segments() {
        match seg {
            FieldSegment::Name(n) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(n);
            }
            FieldSegment::Index(_) => out.push_str("[]"),
        }
    }
    out
}

fn find_field(fields: &'static [FieldSpec], normalized: &str) -> Option<&'static FieldSpec> {
    fields.iter().chain(COMMON_FIELDS.iter()).find(|f| {
        normalized == f.path || normalized.starts_with(&format!("{}.", f.path)) || normalized.starts_with(&format!("{}[", f.path))
    })
}

/// Validate_references runs curated per-kind field-path validation over every reference in
/// `refs` whose resource's kind `resolve_kind` can name (§4.2.3), returning a deprecated/nullable
/// warning [`Diagnostic`] per recognised-but-flagged field. A kind outside the curated set, or
/// unresolvable (the caller has no kind information, or the reference targets the schema), skips
/// validation entirely rather than erroring — only a *recognised* kind with an *unrecognised*
/// field path is a hard error.
///
/// # Errors
///
/// Returns [`AnalysisError::UnrecognizedField`] for a field path not present in the curated table
/// for a known kind.
pub fn validate_references(
    refs: &[&Reference],
    resolve_kind: &dyn Fn(&ResourceId) -> Option<String>,
) -> Result<Vec<Diagnostic>, AnalysisError> {
    let mut diagnostics = Vec::new();
    for r in refs {
        if r.resource_id.is_schema() || r.field_path.is_empty() {
            continue;
        }
        let Some(kind) = resolve_kind(&r.resource_id) else { continue };
        let Some(fields) = curated_fields(&kind) else { continue };
        let normalized = normalize_path(&r.field_path);
        match find_field(fields, &normalized) {
            Some(spec) => {
                if spec.deprecated {
                    diagnostics.push(Diagnostic::warning(format!("{kind} field {normalized:?} (referenced by {r}) is deprecated")));
                }
                if spec.nullable {
                    diagnostics.push(Diagnostic::warning(format!(
                        "{kind} field {normalized:?} (referenced by {r}) may be absent; guard with has() or ??"
                    )));
                }
            }
            None => {
                return Err(AnalysisError::UnrecognizedField { kind, path: normalized });
            }
        }
    }
    Ok(diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kroxide_types::RefView;

    #[test]
    fn recognised_field_on_curated_kind_passes() {
        let refs = [Reference::new("deployment", FieldPath::root().field("status").field("readyReplicas"))];
        let refs: Vec<&Reference> = refs.iter().collect();
        let diagnostics = validate_references(&refs, &|_| Some("Deployment".to_string())).unwrap();
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn unrecognised_field_on_curated_kind_errors() {
        let refs = [Reference::new("deployment", FieldPath::root().field("status").field("bogusField"))];
        let refs: Vec<&Reference> = refs.iter().collect();
        let err = validate_references(&refs, &|_| Some("Deployment".to_string())).unwrap_err();
        assert!(matches!(err, AnalysisError::UnrecognizedField { .. }));
    }

    #[test]
    fn deprecated_field_warns_instead_of_erroring() {
        let refs = [Reference::new("svc", FieldPath::root().field("spec").field("clusterIP"))];
        let refs: Vec<&Reference> = refs.iter().collect();
        let diagnostics = validate_references(&refs, &|_| Some("Service".to_string())).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn unknown_kind_skips_validation() {
        let refs = [Reference::new("thing", FieldPath::root().field("anything"))];
        let refs: Vec<&Reference> = refs.iter().collect();
        let diagnostics = validate_references(&refs, &|_| Some("CustomResource".to_string())).unwrap();
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn conditional_context_rejects_non_boolean_result() {
        let e = Expr::from("not-a-bool");
        assert!(matches!(
            validate_context(&e, AnalysisContext::Conditional),
            Err(AnalysisError::ResultTypeMismatch { .. })
        ));
    }

    #[test]
    fn conditional_context_accepts_comparison() {
        let e = Expr::from(RefView::new("svc").field("status").field("ready")).eq_expr(true);
        assert!(validate_context(&e, AnalysisContext::Conditional).is_ok());
    }

    #[test]
    fn template_literal_context_accepts_templates() {
        let e = Expr::Template(vec![]);
        assert!(validate_context(&e, AnalysisContext::TemplateLiteral).is_ok());
    }
}
