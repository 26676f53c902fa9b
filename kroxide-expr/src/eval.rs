//! Eval directly evaluates an [`Expr`] against already-resolved reference values, the "Direct"
//! emission context (§4.2.3): the status hydrator (§4.5) and readiness checks need a concrete
//! JSON value in-process, not a CEL string destined for a `ResourceGraphDefinition`.

use serde_json::Value;

use kroxide_types::{BinaryOp, Expr, Literal, LogicalOp, Reference, TemplatePart};

/// EvalError is returned when an expression cannot be evaluated against the supplied resolver.
#[derive(thiserror::Error, Debug)]
pub enum EvalError {
    /// Resolve returned nothing for a reference that had no default to fall back to.
    #[error("unresolved reference: {0}")]
    Unresolved(Reference),
    /// A member/index access was attempted on a value of the wrong shape.
    #[error("cannot project field {field:?} from {value}")]
    NotAnObject {
        /// Field being projected.
        field: String,
        /// Value it was projected from.
        value: Value,
    },
    /// A binary/comparison operator was applied to operands it cannot handle.
    #[error("operator {op} not applicable to {lhs} and {rhs}")]
    BadOperands {
        /// Operator text.
        op: String,
        /// Left operand.
        lhs: Value,
        /// Right operand.
        rhs: Value,
    },
    /// Call used a function name the direct evaluator does not implement.
    #[error("unsupported call: {0}")]
    UnsupportedCall(String),
}

/// Evaluate walks `expr`, resolving [`Expr::Ref`] leaves through `resolve`, and returns the
/// resulting JSON value.
///
/// # Errors
///
/// Returns [`EvalError`] if a reference is unresolved, a projection targets a non-object/array,
/// or an unsupported call is encountered.
pub fn evaluate(
    expr: &Expr,
    resolve: &dyn Fn(&Reference) -> Option<Value>,
) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(l) => Ok(literal_value(l)),
        Expr::Ref(r) => resolve(r).ok_or_else(|| EvalError::Unresolved(r.clone())),
        Expr::Member(e, name) => {
            let v = evaluate(e, resolve)?;
            project_field(v, name)
        }
        Expr::Index(e, i) => {
            let v = evaluate(e, resolve)?;
            project_index(v, *i)
        }
        Expr::Binary(op, a, b) => {
            let lhs = evaluate(a, resolve)?;
            let rhs = evaluate(b, resolve)?;
            eval_binary(op, lhs, rhs)
        }
        Expr::Logical(op, a, b) => {
            let lhs = truthy(&evaluate(a, resolve)?);
            let result = match op {
                LogicalOp::And => lhs && truthy(&evaluate(b, resolve)?),
                LogicalOp::Or => lhs || truthy(&evaluate(b, resolve)?),
            };
            Ok(Value::Bool(result))
        }
        Expr::Unary(e) => Ok(Value::Bool(!truthy(&evaluate(e, resolve)?))),
        Expr::Conditional(c, t, f) => {
            if truthy(&evaluate(c, resolve)?) {
                evaluate(t, resolve)
            } else {
                evaluate(f, resolve)
            }
        }
        Expr::Template(parts) => {
            let mut out = String::new();
            for p in parts {
                match p {
                    TemplatePart::Text(s) => out.push_str(s),
                    TemplatePart::Expr(e) => out.push_str(&stringify(&evaluate(e, resolve)?)),
                }
            }
            Ok(Value::String(out))
        }
        Expr::OptionalChain(e, name) => {
            let v = evaluate(e, resolve)?;
            match v {
                Value::Object(map) => Ok(map.get(name.as_str()).cloned().unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                other => project_field(other, name),
            }
        }
        Expr::NullishCoalesce(a, b) => {
            let v = evaluate(a, resolve)?;
            if v.is_null() {
                evaluate(b, resolve)
            } else {
                Ok(v)
            }
        }
        Expr::Call(name, args) => eval_call(name, args, resolve),
    }
}

fn literal_value(l: &Literal) -> Value {
    match l {
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Null => Value::Null,
    }
}

fn project_field(v: Value, name: &str) -> Result<Value, EvalError> {
    match v {
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        other => Err(EvalError::NotAnObject {
            field: name.to_string(),
            value: other,
        }),
    }
}

fn project_index(v: Value, i: usize) -> Result<Value, EvalError> {
    match v {
        Value::Array(items) => Ok(items.get(i).cloned().unwrap_or(Value::Null)),
        other => Err(EvalError::NotAnObject {
            field: format!("[{i}]"),
            value: other,
        }),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn eval_binary(op: &BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::StrictEq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::StrictNe => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Other(op) => eval_comparison(op, lhs, rhs),
    }
}

fn eval_comparison(op: &str, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) else {
        return Err(EvalError::BadOperands {
            op: op.to_string(),
            lhs,
            rhs,
        });
    };
    let result = match op {
        ">" => l > r,
        ">=" => l >= r,
        "<" => l < r,
        "<=" => l <= r,
        "==" => l == r,
        "!=" => l != r,
        other => {
            return Err(EvalError::BadOperands {
                op: other.to_string(),
                lhs: Value::from(l),
                rhs: Value::from(r),
            })
        }
    };
    Ok(Value::Bool(result))
}

fn eval_call(
    name: &str,
    args: &[Expr],
    resolve: &dyn Fn(&Reference) -> Option<Value>,
) -> Result<Value, EvalError> {
    match name {
        "string" => {
            let v = args
                .first()
                .map(|a| evaluate(a, resolve))
                .transpose()?
                .unwrap_or(Value::Null);
            Ok(Value::String(stringify(&v)))
        }
        "size" => {
            let v = args
                .first()
                .map(|a| evaluate(a, resolve))
                .transpose()?
                .unwrap_or(Value::Null);
            let len = match &v {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                _ => {
                    return Err(EvalError::BadOperands {
                        op: "size".to_string(),
                        lhs: v,
                        rhs: Value::Null,
                    })
                }
            };
            Ok(Value::from(len))
        }
        other => Err(EvalError::UnsupportedCall(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kroxide_types::{FieldPath, RefView};

    fn resolver(value: Value) -> impl Fn(&Reference) -> Option<Value> {
        move |_r: &Reference| Some(value.clone())
    }

    #[test]
    fn evaluates_member_projection() {
        let obj = serde_json::json!({"status": {"ready": true}});
        let e = Expr::from(RefView::new("svc")).optional_field("status");
        let v = evaluate(&e, &resolver(obj)).unwrap();
        assert_eq!(v, serde_json::json!({"ready": true}));
    }

    #[test]
    fn nullish_coalesce_falls_back_on_null() {
        let e = Expr::Literal(Literal::Null).or_else("fallback");
        let v = evaluate(&e, &|_| None).unwrap();
        assert_eq!(v, Value::String("fallback".into()));
    }

    #[test]
    fn comparison_operators_work_on_numbers() {
        let e = Expr::from(5.0).cmp(">", 3.0);
        let v = evaluate(&e, &|_| None).unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn unresolved_reference_errors() {
        let e = Expr::Ref(Reference::new("db", FieldPath::root().field("x")));
        assert!(matches!(evaluate(&e, &|_| None), Err(EvalError::Unresolved(_))));
    }
}
