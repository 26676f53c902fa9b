//! Lower turns an [`Expr`] tree into a CEL string (§4.2.2's rewrite table).

use kroxide_types::{Expr, FieldSegment, FieldType, Literal, LogicalOp, Reference, TemplatePart};

/// Lower_to_cel renders `expr` as CEL source text.
pub fn lower_to_cel(expr: &Expr) -> String {
    render_at(expr, 0)
}

/// Precedence tiers, low to high. Ternary-shaped forms (conditional, and the nullish-coalesce /
/// optional-chain rewrites, which are themselves ternaries) bind loosest; atoms (refs, member
/// access, calls, templates) never need parenthesising around themselves.
const PREC_TERNARY: u8 = 0;
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_EQUALITY: u8 = 3;
const PREC_COMPARISON: u8 = 4;
const PREC_ADDITIVE: u8 = 5;
const PREC_MULTIPLICATIVE: u8 = 6;
const PREC_ATOM: u8 = 7;

fn binary_prec(cel_op: &str) -> u8 {
    match cel_op {
        "==" | "!=" => PREC_EQUALITY,
        "<" | "<=" | ">" | ">=" | "in" => PREC_COMPARISON,
        "+" | "-" => PREC_ADDITIVE,
        "*" | "/" | "%" => PREC_MULTIPLICATIVE,
        _ => PREC_COMPARISON,
    }
}

fn prec(expr: &Expr) -> u8 {
    match expr {
        Expr::Literal(_) | Expr::Ref(_) | Expr::Member(..) | Expr::Index(..) | Expr::Call(..) | Expr::Template(_) | Expr::Unary(_) => PREC_ATOM,
        Expr::Binary(op, ..) => binary_prec(op.cel_text()),
        Expr::Logical(LogicalOp::And, ..) => PREC_AND,
        Expr::Logical(LogicalOp::Or, ..) => PREC_OR,
        Expr::Conditional(..) | Expr::OptionalChain(..) | Expr::NullishCoalesce(..) => PREC_TERNARY,
    }
}

/// Render_at renders `expr`, wrapping it in parens only if its own precedence is lower than
/// `min` — the minimum precedence the surrounding context can accept without ambiguity (§8:
/// scenarios hold "exactly as stated", i.e. minimal/precedence-driven parens, not a blanket wrap
/// of every binary/logical/conditional/nullish node).
fn render_at(expr: &Expr, min: u8) -> String {
    let rendered = render_inner(expr);
    if prec(expr) < min {
        format!("({rendered})")
    } else {
        rendered
    }
}

fn render_inner(expr: &Expr) -> String {
    match expr {
        Expr::Literal(l) => render_literal(l),
        Expr::Ref(r) => render_ref(r),
        Expr::Member(e, name) => format!("{}.{name}", render_at(e, PREC_ATOM)),
        Expr::Index(e, i) => format!("{}[{i}]", render_at(e, PREC_ATOM)),
        // `===`/`!==` have no CEL equivalent operator; CEL's `==`/`!=` are already the strict
        // form (no coercion), so the rewrite is a name change only (§4.2.2).
        Expr::Binary(op, a, b) => {
            let cel_op = op.cel_text();
            let p = binary_prec(cel_op);
            format!("{} {cel_op} {}", render_at(a, p), render_at(b, p + 1))
        }
        Expr::Logical(op, a, b) => {
            let (cel_op, p) = match op {
                LogicalOp::And => ("&&", PREC_AND),
                LogicalOp::Or => ("||", PREC_OR),
            };
            format!("{} {cel_op} {}", render_at(a, p), render_at(b, p))
        }
        Expr::Unary(e) => format!("!({})", render_at(e, 0)),
        Expr::Conditional(c, t, f) => {
            format!("{} ? {} : {}", render_at(c, PREC_OR), render_at(t, PREC_TERNARY), render_at(f, PREC_TERNARY))
        }
        Expr::Template(parts) => render_template(parts),
        // `a?.b` has no direct CEL operator; CEL's `has()` macro is the nearest primitive, so the
        // lowering rewrites it to a ternary guarded by `has()` (§4.2.2).
        Expr::OptionalChain(e, name) => {
            let base = render_at(e, PREC_ATOM);
            format!("has({base}.{name}) ? {base}.{name} : null")
        }
        // `a ?? b` likewise has no CEL operator and rewrites to an explicit null check.
        Expr::NullishCoalesce(a, b) => {
            let a_s = render_at(a, PREC_COMPARISON + 1);
            format!("{a_s} != null ? {a_s} : {}", render_at(b, PREC_TERNARY))
        }
        Expr::Call(name, args) => {
            let rendered_args: Vec<String> = args.iter().map(|a| render_at(a, PREC_TERNARY)).collect();
            format!("{name}({})", rendered_args.join(", "))
        }
    }
}

fn render_literal(l: &Literal) -> String {
    match l {
        Literal::Bool(b) => b.to_string(),
        Literal::Number(n) => n.to_string(),
        Literal::String(s) => format!("{s:?}"),
        Literal::Null => "null".to_string(),
    }
}

/// Cel_ident sanitises a resource id into a CEL-safe identifier: `resources.<id>...` is a member
/// access (§4.2.2's table, §6's CEL surface — only `.field` member access and `[n]` indexing are
/// part of the surface, not string map-indexing), so the id itself must read as an identifier.
/// `ResourceId::derive` already produces lowercase hyphen-joined ids; hyphens (and any other
/// non-identifier byte) are rewritten to `_` here rather than falling back to bracket indexing.
fn cel_ident(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for (i, c) in id.char_indices() {
        let ok = c.is_ascii_alphanumeric() || c == '_';
        let ok_first = ok && !(i == 0 && c.is_ascii_digit());
        out.push(if ok_first { c } else { '_' });
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Render_ref renders a reference as `resources.<id>.field.path` (schema references render as
/// `schema.field.path`), matching §4.2.2's table and §6's CEL surface of dotted member access
/// plus `[n]` indexing — string map-indexing is not part of that surface.
fn render_ref(r: &Reference) -> String {
    let mut out = if r.resource_id.is_schema() {
        "schema".to_string()
    } else {
        format!("resources.{}", cel_ident(r.resource_id.as_str()))
    };
    for seg in r.field_path.segments() {
        match seg {
            FieldSegment::Name(n) => {
                out.push('.');
                out.push_str(n);
            }
            FieldSegment::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Needs_string_coercion reports whether an interpolated template part must be wrapped in
/// `string(...)` before concatenation (§4.2.2: "numeric parts coerced via `string()`"; only
/// numeric parts — a string-typed or untyped reference, or a string literal, concatenates as-is).
fn needs_string_coercion(e: &Expr) -> bool {
    match e {
        Expr::Literal(Literal::String(_)) => false,
        Expr::Literal(_) => true,
        Expr::Ref(r) => !matches!(r.expected_type, None | Some(FieldType::String)),
        _ => false,
    }
}

fn render_template(parts: &[TemplatePart]) -> String {
    let rendered: Vec<String> = parts
        .iter()
        .map(|p| match p {
            TemplatePart::Text(s) => format!("{s:?}"),
            TemplatePart::Expr(e) if needs_string_coercion(e) => format!("string({})", render_at(e, PREC_TERNARY)),
            TemplatePart::Expr(e) => render_at(e, PREC_ADDITIVE + 1),
        })
        .collect();
    if rendered.is_empty() {
        "\"\"".to_string()
    } else {
        rendered.join(" + ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kroxide_types::RefView;

    #[test]
    fn optional_chain_rewrites_to_has_guard() {
        let e = Expr::from(RefView::new("db")).optional_field("status");
        assert_eq!(
            lower_to_cel(&e),
            "has(resources.db.status) ? resources.db.status : null"
        );
    }

    #[test]
    fn nullish_coalesce_rewrites_to_null_check() {
        let e = Expr::from(RefView::new("db").field("status").field("url")).or_else("fallback");
        assert_eq!(
            lower_to_cel(&e),
            "resources.db.status.url != null ? resources.db.status.url : \"fallback\""
        );
    }

    #[test]
    fn schema_reference_lowers_without_resources_indirection() {
        let e = Expr::from(RefView::schema().field("spec").field("name"));
        assert_eq!(lower_to_cel(&e), "schema.spec.name");
    }

    #[test]
    fn comparison_lowers_without_blanket_parens() {
        let e = Expr::from(RefView::new("deployment").field("status").field("readyReplicas")).cmp(">", 0.0);
        assert_eq!(lower_to_cel(&e), "resources.deployment.status.readyReplicas > 0");
    }

    #[test]
    fn conditional_lowers_identically() {
        let e = Expr::from(RefView::new("schema").field("ready")).when("Running", "Pending");
        assert_eq!(lower_to_cel(&e), "resources.schema.ready ? \"Running\" : \"Pending\"");
    }

    #[test]
    fn template_coerces_only_non_string_parts() {
        let e = Expr::Template(vec![
            TemplatePart::Text("https://".into()),
            TemplatePart::Expr(Box::new(Expr::from(RefView::schema().field("spec").field("hostname")))),
        ]);
        assert_eq!(lower_to_cel(&e), "\"https://\" + schema.spec.hostname");
    }

    #[test]
    fn template_coerces_numeric_parts() {
        let e = Expr::Template(vec![
            TemplatePart::Text("replicas: ".into()),
            TemplatePart::Expr(Box::new(Expr::Ref(
                Reference::new("deployment", kroxide_types::FieldPath::root().field("spec").field("replicas"))
                    .with_type(FieldType::Number),
            ))),
        ]);
        assert_eq!(
            lower_to_cel(&e),
            "\"replicas: \" + string(resources.deployment.spec.replicas)"
        );
    }

    #[test]
    fn nested_logical_and_comparison_stays_unparenthesized() {
        let e = Expr::from(RefView::new("svc").field("status").field("ready"))
            .eq_expr(true)
            .and(Expr::from(RefView::new("svc").field("status").field("replicas")).cmp(">", 0.0));
        assert_eq!(
            lower_to_cel(&e),
            "resources.svc.status.ready == true && resources.svc.status.replicas > 0"
        );
    }
}
