#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Expr-analysis turns an [`kroxide_types::Expr`] IR tree into the two representations the rest
//! of the engine needs: a CEL string suitable for embedding in an emitted `ResourceGraphDefinition`
//! (§4.2), and a directly-evaluated [`serde_json::Value`] suitable for in-process status
//! hydration against live cluster state (§4.5). It also offers a small recursive-descent parser
//! for the declarative (YAML/JSON-loaded) path, so both entry points converge on the same IR, and
//! a context-aware validator (§4.2.3) that checks a curated per-kind field map and an expression's
//! expected result type before the lowering is trusted.

use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use kroxide_types::{Expr, FieldType, Reference, ResourceId, TemplatePart, WHITELISTED_CALLS};

mod context;
mod eval;
mod lower;
mod parse;

pub use context::{classify, AnalysisContext, Diagnostic, ExprClass, Severity};
pub use eval::{evaluate, EvalError};
pub use parse::{parse_text, ParseError};

/// EmissionContext selects which of the analyzer's two back ends a lowering pass targets. This is
/// a separate axis from [`AnalysisContext`]: `EmissionContext` picks CEL-string vs. direct
/// evaluation, while `AnalysisContext` names the expression's *role* within a composition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmissionContext {
    /// Lower to a CEL string, destined for a `ResourceGraphDefinition`'s `status.expressions`.
    Cel,
    /// Evaluate directly against already-resolved reference values, used by the in-process
    /// status hydrator and by readiness checks (no CEL runtime involved).
    Direct,
}

/// SourceSpan records where an expression node came from in original source text (§4.2.4):
/// `(line, column, length)`, all zero for a combinator-built expression that was never textual.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    /// One-based line number, 0 if unknown.
    pub line: u32,
    /// One-based column number, 0 if unknown.
    pub column: u32,
    /// Length in bytes of the originating source slice, 0 if unknown.
    pub length: u32,
}

/// Analysis is the result of analyzing one expression: its CEL lowering, the references it
/// contains, its role and node classification, a source span for diagnostics, and any non-fatal
/// warnings raised during curated field validation (§4.2.3, §4.2.4).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Cel is the lowered CEL string (§4.2.2).
    pub cel: String,
    /// References lists every distinct [`Reference`] the expression contains, in the order they
    /// first appear.
    pub references: Vec<Reference>,
    /// Span is the expression's source location, `(0,0,0)` for combinator-built expressions.
    pub span: SourceSpan,
    /// Context is the role this expression played during analysis (§4.2.3).
    pub context: AnalysisContext,
    /// Class is this expression's node classification (§4.2.4).
    pub class: ExprClass,
    /// Diagnostics lists non-fatal findings (deprecated/nullable field access) raised while
    /// validating this expression's references against the curated per-kind field map.
    pub diagnostics: Vec<Diagnostic>,
}

/// SourceMap is an exportable, mergeable collection of [`Analysis`] entries (§4.2.4): the
/// accumulated record of every expression a composition analyzed during one emission pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMap {
    entries: Vec<Analysis>,
}

impl SourceMap {
    /// New returns an empty source map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push appends one analysis to the map.
    pub fn push(&mut self, analysis: Analysis) {
        self.entries.push(analysis);
    }

    /// Entries returns every analysis recorded so far.
    pub fn entries(&self) -> &[Analysis] {
        &self.entries
    }

    /// Merge combines two source maps, e.g. one per resource plus one for the status mapping,
    /// into the single map an emitted composition carries.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.entries.extend(other.entries);
        self
    }
}

/// AnalysisError is returned when an expression cannot be analyzed.
#[derive(thiserror::Error, Debug)]
pub enum AnalysisError {
    /// Call used a function name outside [`WHITELISTED_CALLS`] (§6).
    #[error("call to unwhitelisted function {0:?}")]
    UnwhitelistedCall(String),
    /// The expression's inferred result type doesn't match what its [`AnalysisContext`] expects
    /// (§4.2.3: a `Conditional` guard must be boolean, a `TemplateLiteral` interpolation must be
    /// string).
    #[error("{context:?} context expects a {expected:?} result, got {actual:?}")]
    ResultTypeMismatch {
        /// Context the expression was analyzed under.
        context: AnalysisContext,
        /// Result type that context expects.
        expected: FieldType,
        /// Result type the expression actually infers to.
        actual: FieldType,
    },
    /// A reference named a field path absent from the curated map for its (known) resource kind
    /// (§4.2.3).
    #[error("{kind} has no recognised field {path:?}")]
    UnrecognizedField {
        /// Kind the curated lookup was performed against.
        kind: String,
        /// Normalised field path that wasn't recognised.
        path: String,
    },
}

fn validate_calls(e: &Expr) -> Result<(), AnalysisError> {
    match e {
        Expr::Call(name, args) => {
            if !WHITELISTED_CALLS.contains(&name.as_str()) {
                return Err(AnalysisError::UnwhitelistedCall(name.clone()));
            }
            for a in args {
                validate_calls(a)?;
            }
            Ok(())
        }
        Expr::Literal(_) | Expr::Ref(_) => Ok(()),
        Expr::Member(e, _) | Expr::Index(e, _) | Expr::Unary(e) | Expr::OptionalChain(e, _) => {
            validate_calls(e)
        }
        Expr::Binary(_, a, b) | Expr::Logical(_, a, b) | Expr::NullishCoalesce(a, b) => {
            validate_calls(a)?;
            validate_calls(b)
        }
        Expr::Conditional(c, t, f) => {
            validate_calls(c)?;
            validate_calls(t)?;
            validate_calls(f)
        }
        Expr::Template(parts) => {
            for p in parts {
                if let TemplatePart::Expr(e) = p {
                    validate_calls(e)?;
                }
            }
            Ok(())
        }
    }
}

fn dedup_references(refs: Vec<&Reference>) -> Vec<Reference> {
    let mut out: Vec<Reference> = Vec::new();
    for r in refs {
        if !out.iter().any(|seen| seen == r) {
            out.push(r.clone());
        }
    }
    out
}

fn cache_key(e: &Expr) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    // `Expr` derives neither `Hash` nor a stable ordering usable for a cache key, but its
    // canonical JSON form is stable and cheap relative to re-lowering, so we hash that instead.
    let json = serde_json::to_vec(e).unwrap_or_default();
    let mut h = DefaultHasher::new();
    json.hash(&mut h);
    h.finish()
}

const CACHE_CAPACITY: usize = 4096;

// Keyed by `(expression hash, context)` (§4.2.3): the same IR analyzed under two different
// contexts can disagree on expected result type and curated validation, so context is part of
// cache identity, not just an input alongside it.
static CACHE: LazyLock<Mutex<lru::LruCache<(u64, AnalysisContext), Analysis>>> = LazyLock::new(|| {
    Mutex::new(lru::LruCache::new(
        std::num::NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is nonzero"),
    ))
});

/// Analyze lowers `expr` to CEL under `context` (§4.2.3), validates its references against the
/// curated per-kind field map (kind looked up through `resolve_kind`, which may return `None` for
/// an unknown or not-yet-deployed resource — validation is then skipped for that reference), and
/// caches the result keyed by `(expr, context)` (§5.1: "a bounded, read-mostly cache of prior
/// analyses, avoiding re-lowering identical expressions on every reconcile").
///
/// # Errors
///
/// Returns [`AnalysisError::UnwhitelistedCall`] if `expr` calls a function outside
/// [`WHITELISTED_CALLS`], [`AnalysisError::ResultTypeMismatch`] if `expr`'s inferred result type
/// contradicts what `context` expects, or [`AnalysisError::UnrecognizedField`] if a reference
/// names a field path absent from the curated map for its (known) resource kind.
pub fn analyze(
    expr: &Expr,
    context: AnalysisContext,
    resolve_kind: &dyn Fn(&ResourceId) -> Option<String>,
) -> Result<Analysis, AnalysisError> {
    let key = (cache_key(expr), context);
    if let Some(hit) = CACHE.lock().get(&key) {
        return Ok(hit.clone());
    }
    validate_calls(expr)?;
    context::validate_context(expr, context)?;
    let references = dedup_references(expr.references());
    let diagnostics = context::validate_references(&expr.references(), resolve_kind)?;
    let cel = lower::lower_to_cel(expr);
    let analysis = Analysis {
        cel,
        references,
        span: SourceSpan::default(),
        context,
        class: context::classify(expr),
        diagnostics,
    };
    CACHE.lock().put(key, analysis.clone());
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kroxide_types::{FieldPath, RefView};

    fn no_kind(_: &ResourceId) -> Option<String> {
        None
    }

    #[test]
    fn analyze_caches_identical_expressions() {
        let e = Expr::from(RefView::new("svc").field("status").field("ready")).eq_expr(true);
        let a1 = analyze(&e, AnalysisContext::StatusBuilder, &no_kind).unwrap();
        let a2 = analyze(&e, AnalysisContext::StatusBuilder, &no_kind).unwrap();
        assert_eq!(a1, a2);
        assert_eq!(a1.references.len(), 1);
    }

    #[test]
    fn analyze_distinguishes_cache_entries_by_context() {
        let e = Expr::from(RefView::new("svc").field("status").field("ready")).eq_expr(true);
        let as_status = analyze(&e, AnalysisContext::StatusBuilder, &no_kind).unwrap();
        let as_conditional = analyze(&e, AnalysisContext::Conditional, &no_kind).unwrap();
        assert_eq!(as_status.context, AnalysisContext::StatusBuilder);
        assert_eq!(as_conditional.context, AnalysisContext::Conditional);
    }

    #[test]
    fn analyze_rejects_unwhitelisted_calls() {
        let e = Expr::Call("exec".to_string(), vec![]);
        assert!(matches!(
            analyze(&e, AnalysisContext::Unconstrained, &no_kind),
            Err(AnalysisError::UnwhitelistedCall(name)) if name == "exec"
        ));
    }

    #[test]
    fn analyze_surfaces_curated_field_warnings() {
        let e = Expr::from(RefView::new("svc").field("spec").field("clusterIP"));
        let a = analyze(&e, AnalysisContext::StatusBuilder, &|_| Some("Service".to_string())).unwrap();
        assert_eq!(a.diagnostics.len(), 1);
    }

    #[test]
    fn analyze_rejects_unrecognised_field_on_known_kind() {
        let e = Expr::from(RefView::new("deployment").field("status").field("bogusField"));
        assert!(matches!(
            analyze(&e, AnalysisContext::StatusBuilder, &|_| Some("Deployment".to_string())),
            Err(AnalysisError::UnrecognizedField { .. })
        ));
    }

    #[test]
    fn analyze_rejects_conditional_context_type_mismatch() {
        let e = Expr::from("not-a-bool");
        assert!(matches!(
            analyze(&e, AnalysisContext::Conditional, &no_kind),
            Err(AnalysisError::ResultTypeMismatch { .. })
        ));
    }

    #[test]
    fn strict_eq_lowers_to_double_equals() {
        let e = Expr::from(1.0).eq_expr(1.0);
        let a = analyze(&e, AnalysisContext::StatusBuilder, &no_kind).unwrap();
        assert_eq!(a.cel, "1 == 1");
    }

    #[test]
    fn field_path_round_trips_through_reference() {
        let path = FieldPath::root().field("status").index(0).field("ip");
        assert_eq!(path.to_string(), "status[0].ip");
    }
}
