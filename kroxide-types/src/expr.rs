//! Expr is the host-side expression IR (§3, §4.2.2): a tree whose leaves are literals or
//! [`Reference`]s and whose interior nodes are the node kinds the analyzer knows how to lower
//! to CEL. This module owns the *data*; `kroxide-expr` owns the *lowering*.

use serde::{Deserialize, Serialize};

use crate::reference::{RefView, Reference};

/// Literal is a leaf value: bool, number, or string (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    /// Bool literal.
    Bool(bool),
    /// Number literal, kept as `f64` the way JSON numbers are.
    Number(f64),
    /// String literal.
    String(String),
    /// Null literal, distinct from "no value" (used by nullish-coalesce / optional-chain).
    Null,
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}
impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}
impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}
impl From<String> for Literal {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// BinaryOp is a binary operator appearing in an IR [`Expr::Binary`] node (§4.2.2's CEL lowering
/// table).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `===`, rewritten to CEL `==`.
    StrictEq,
    /// `!==`, rewritten to CEL `!=`.
    StrictNe,
    /// Any other comparison/arithmetic operator, lowered by identity.
    Other(String),
}

impl BinaryOp {
    /// Text returns the operator's host-language textual form.
    pub fn text(&self) -> &str {
        match self {
            Self::StrictEq => "===",
            Self::StrictNe => "!==",
            Self::Other(s) => s,
        }
    }

    /// Cel_text returns the operator's CEL textual form (§4.2.2 table).
    pub fn cel_text(&self) -> &str {
        match self {
            Self::StrictEq => "==",
            Self::StrictNe => "!=",
            Self::Other(s) => s,
        }
    }
}

/// LogicalOp is `&&` or `||` (§4.2.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    /// `&&`
    And,
    /// `||`
    Or,
}

/// Expr is the IR tree (§4.2.2): `Literal, Ref, Member, Index, Binary(op), Logical(&&,||),
/// Unary(!), Conditional, Template(parts), OptionalChain, NullishCoalesce, Call(name, args)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal leaf.
    Literal(Literal),
    /// Reference leaf.
    Ref(Reference),
    /// Member access on a sub-expression (used when the expression itself, not a [`RefView`],
    /// needs a further field projected — e.g. a call result).
    Member(Box<Expr>, String),
    /// Index access on a sub-expression.
    Index(Box<Expr>, usize),
    /// Binary operator application.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Logical `&&`/`||` application.
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    /// Unary `!`.
    Unary(Box<Expr>),
    /// `cond ? then : else`.
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Template literal: alternating literal string parts and interpolated expressions.
    Template(Vec<TemplatePart>),
    /// `a?.b`, the `b` member projected only if `a` is present.
    OptionalChain(Box<Expr>, String),
    /// `a ?? b`.
    NullishCoalesce(Box<Expr>, Box<Expr>),
    /// Call to a whitelisted function name with positional arguments.
    Call(String, Vec<Expr>),
}

/// TemplatePart is one piece of a [`Expr::Template`]: either literal text or an interpolated
/// sub-expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TemplatePart {
    /// Literal template text.
    Text(String),
    /// Interpolated `${...}` expression.
    Expr(Box<Expr>),
}

impl From<Literal> for Expr {
    fn from(l: Literal) -> Self {
        Self::Literal(l)
    }
}
impl From<Reference> for Expr {
    fn from(r: Reference) -> Self {
        Self::Ref(r)
    }
}
impl From<RefView> for Expr {
    fn from(v: RefView) -> Self {
        Self::Ref(v.into_reference())
    }
}
impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Self::Literal(Literal::Bool(v))
    }
}
impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Self::Literal(Literal::Number(v))
    }
}
impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Self::Literal(Literal::String(v.to_string()))
    }
}
impl From<String> for Expr {
    fn from(v: String) -> Self {
        Self::Literal(Literal::String(v))
    }
}

/// WHITELISTED_CALLS are the only function names the analyzer accepts in [`Expr::Call`] nodes,
/// per the CEL surface constraint in §6 ("No function calls other than `string(…)`, `size(…)`,
/// and user-supplied whitelisted calls").
pub const WHITELISTED_CALLS: &[&str] = &["string", "size", "template"];

impl Expr {
    /// References walks the IR tree and collects every [`Reference`] leaf, used by the
    /// dependency graph builder (§4.3.1: "An edge `u -> v` is added for each distinct `Ref(v,
    /// ...)` appearing in `u`'s manifest") and by the status hydrator's dependency ordering
    /// (§4.5).
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(r) => out.push(r),
            Self::Member(e, _) | Self::Index(e, _) => e.collect_references(out),
            Self::Binary(_, a, b) | Self::Logical(_, a, b) | Self::NullishCoalesce(a, b) => {
                a.collect_references(out);
                b.collect_references(out);
            }
            Self::Unary(e) | Self::OptionalChain(e, _) => e.collect_references(out),
            Self::Conditional(c, t, e) => {
                c.collect_references(out);
                t.collect_references(out);
                e.collect_references(out);
            }
            Self::Template(parts) => {
                for p in parts {
                    if let TemplatePart::Expr(e) = p {
                        e.collect_references(out);
                    }
                }
            }
            Self::Call(_, args) => {
                for a in args {
                    a.collect_references(out);
                }
            }
        }
    }

    /// Eq builds a `self === other` node.
    #[must_use]
    pub fn eq_expr(self, other: impl Into<Expr>) -> Self {
        Self::Binary(BinaryOp::StrictEq, Box::new(self), Box::new(other.into()))
    }

    /// Ne builds a `self !== other` node.
    #[must_use]
    pub fn ne_expr(self, other: impl Into<Expr>) -> Self {
        Self::Binary(BinaryOp::StrictNe, Box::new(self), Box::new(other.into()))
    }

    /// Cmp builds a `self <op> other` node for an arbitrary comparison/arithmetic operator.
    #[must_use]
    pub fn cmp(self, op: impl Into<String>, other: impl Into<Expr>) -> Self {
        Self::Binary(BinaryOp::Other(op.into()), Box::new(self), Box::new(other.into()))
    }

    /// And builds a `self && other` node.
    #[must_use]
    pub fn and(self, other: impl Into<Expr>) -> Self {
        Self::Logical(LogicalOp::And, Box::new(self), Box::new(other.into()))
    }

    /// Or builds a `self || other` node.
    #[must_use]
    pub fn or(self, other: impl Into<Expr>) -> Self {
        Self::Logical(LogicalOp::Or, Box::new(self), Box::new(other.into()))
    }

    /// Negate builds a `!self` node.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Unary(Box::new(self))
    }

    /// When builds a `self ? then : else_` node.
    #[must_use]
    pub fn when(self, then: impl Into<Expr>, else_: impl Into<Expr>) -> Self {
        Self::Conditional(Box::new(self), Box::new(then.into()), Box::new(else_.into()))
    }

    /// Optional_field builds an `self?.name` node.
    #[must_use]
    pub fn optional_field(self, name: impl Into<String>) -> Self {
        Self::OptionalChain(Box::new(self), name.into())
    }

    /// Or_else builds a `self ?? default` node.
    #[must_use]
    pub fn or_else(self, default: impl Into<Expr>) -> Self {
        Self::NullishCoalesce(Box::new(self), Box::new(default.into()))
    }
}

impl std::ops::BitAnd for Expr {
    type Output = Expr;
    fn bitand(self, rhs: Self) -> Self::Output {
        self.and(rhs)
    }
}

impl std::ops::BitOr for Expr {
    type Output = Expr;
    fn bitor(self, rhs: Self) -> Self::Output {
        self.or(rhs)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;
    fn not(self) -> Self::Output {
        Expr::negate(self)
    }
}

/// Template builds an [`Expr::Template`] node from a literal-prefixed interleaving of text and
/// expressions, mirroring a host-language template literal such as `` `https://${hostname}` ``.
#[must_use]
pub fn template(parts: Vec<TemplatePart>) -> Expr {
    Expr::Template(parts)
}

/// Call builds an [`Expr::Call`] node if `name` is whitelisted.
///
/// # Errors
///
/// Returns `Err(name)` if `name` is not in [`WHITELISTED_CALLS`].
pub fn call(name: &str, args: Vec<Expr>) -> Result<Expr, String> {
    if WHITELISTED_CALLS.contains(&name) {
        Ok(Expr::Call(name.to_string(), args))
    } else {
        Err(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::RefView;

    #[test]
    fn combinators_never_panic_and_always_yield_expr() {
        let a = RefView::new("deployment").field("status").field("readyReplicas");
        let e: Expr = Expr::from(a).cmp(">", 0.0);
        match e {
            Expr::Binary(BinaryOp::Other(ref op), ..) if op == ">" => {}
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn bitand_bitor_stand_in_for_short_circuit_operators() {
        let a = Expr::from(true);
        let b = Expr::from(false);
        match a & b {
            Expr::Logical(LogicalOp::And, ..) => {}
            other => panic!("unexpected node: {other:?}"),
        }
    }
}
