//! Parse turns expression source text into an [`Expr`] IR tree, the entry point used when a
//! composition is loaded declaratively (YAML/JSON) rather than assembled through Rust
//! combinators (§4.2.1). Both paths converge on the same `Expr` tree, so a single analyzer
//! serves both.

use kroxide_types::{Expr, FieldPath, Reference, TemplatePart, WHITELISTED_CALLS};

/// ParseError indicates `text` could not be parsed as an expression.
#[derive(thiserror::Error, Debug)]
#[error("parse error at byte {pos}: {message}")]
pub struct ParseError {
    /// Byte offset into the source text where parsing failed.
    pub pos: usize,
    /// Human-readable description.
    pub message: String,
}

/// Parse_text parses `text` as a single expression.
///
/// # Errors
///
/// Returns [`ParseError`] on malformed input or trailing unconsumed text.
pub fn parse_text(text: &str) -> Result<Expr, ParseError> {
    let mut p = Parser::new(text);
    let expr = p.parse_conditional()?;
    p.skip_ws();
    if p.pos != p.src.len() {
        return Err(p.err("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            pos: self.pos,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.rest().chars().next() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_str(&mut self, s: &str) -> bool {
        self.skip_ws();
        self.rest().starts_with(s)
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.peek_str(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn expect_str(&mut self, s: &str) -> Result<(), ParseError> {
        if self.eat_str(s) {
            Ok(())
        } else {
            Err(self.err(format!("expected {s:?}")))
        }
    }

    // ?: -- lowest precedence, right-associative.
    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_nullish()?;
        if self.eat_str("?") && !self.peek_str(".") {
            let then = self.parse_conditional()?;
            self.expect_str(":")?;
            let else_ = self.parse_conditional()?;
            Ok(cond.when(then, else_))
        } else {
            Ok(cond)
        }
    }

    fn parse_nullish(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_or()?;
        while self.eat_str("??") {
            let rhs = self.parse_or()?;
            lhs = lhs.or_else(rhs);
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        loop {
            self.skip_ws();
            if self.rest().starts_with("||") {
                self.pos += 2;
                let rhs = self.parse_and()?;
                lhs = lhs.or(rhs);
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_equality()?;
        loop {
            self.skip_ws();
            if self.rest().starts_with("&&") {
                self.pos += 2;
                let rhs = self.parse_equality()?;
                lhs = lhs.and(rhs);
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_relational()?;
        loop {
            self.skip_ws();
            if self.eat_str("===") {
                lhs = lhs.eq_expr(self.parse_relational()?);
            } else if self.eat_str("!==") {
                lhs = lhs.ne_expr(self.parse_relational()?);
            } else if self.eat_str("==") {
                lhs = lhs.cmp("==", self.parse_relational()?);
            } else if self.eat_str("!=") {
                lhs = lhs.cmp("!=", self.parse_relational()?);
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            self.skip_ws();
            let op = if self.eat_str(">=") {
                Some(">=")
            } else if self.eat_str("<=") {
                Some("<=")
            } else if self.rest().starts_with('>') {
                self.pos += 1;
                Some(">")
            } else if self.rest().starts_with('<') {
                self.pos += 1;
                Some("<")
            } else {
                None
            };
            match op {
                Some(op) => lhs = lhs.cmp(op, self.parse_additive()?),
                None => break,
            }
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_ws();
            let op = if self.rest().starts_with('+') {
                self.pos += 1;
                Some("+")
            } else if self.rest().starts_with('-') {
                self.pos += 1;
                Some("-")
            } else {
                None
            };
            match op {
                Some(op) => lhs = lhs.cmp(op, self.parse_unary()?),
                None => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.skip_ws();
        if self.rest().starts_with('!') && !self.rest().starts_with("!=") {
            self.pos += 1;
            let operand = self.parse_unary()?;
            Ok(operand.negate())
        } else {
            self.parse_postfix()
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            self.skip_ws();
            if self.rest().starts_with("?.") {
                self.pos += 2;
                let name = self.parse_ident()?;
                expr = expr.optional_field(name);
            } else if self.rest().starts_with('.') {
                self.pos += 1;
                let name = self.parse_ident()?;
                expr = Expr::Member(Box::new(expr), name);
            } else if self.rest().starts_with('[') {
                self.pos += 1;
                let idx = self.parse_number_literal()?;
                self.expect_str("]")?;
                let i = idx as usize;
                expr = Expr::Index(Box::new(expr), i);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_ws();
        let c = self
            .rest()
            .chars()
            .next()
            .ok_or_else(|| self.err("unexpected end of input"))?;
        if c == '(' {
            self.pos += 1;
            let inner = self.parse_conditional()?;
            self.expect_str(")")?;
            return Ok(inner);
        }
        if c == '"' {
            return Ok(Expr::from(self.parse_string_literal()?));
        }
        if c == '`' {
            return self.parse_template_literal();
        }
        if c.is_ascii_digit() {
            return Ok(Expr::from(self.parse_number_literal()?));
        }
        if c.is_alphabetic() || c == '_' {
            return self.parse_ident_led();
        }
        Err(self.err(format!("unexpected character {c:?}")))
    }

    fn parse_ident(&mut self) -> Result<String, ParseError> {
        self.skip_ws();
        let start = self.pos;
        let mut chars = self.rest().chars();
        let Some(first) = chars.next() else {
            return Err(self.err("expected identifier"));
        };
        if !(first.is_alphabetic() || first == '_') {
            return Err(self.err("expected identifier"));
        }
        self.pos += first.len_utf8();
        while let Some(c) = self.rest().chars().next() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn parse_ident_led(&mut self) -> Result<Expr, ParseError> {
        let name = self.parse_ident()?;
        self.skip_ws();
        if name == "true" {
            return Ok(Expr::from(true));
        }
        if name == "false" {
            return Ok(Expr::from(false));
        }
        if name == "null" {
            return Ok(Expr::Literal(kroxide_types::Literal::Null));
        }
        if self.rest().starts_with('(') && WHITELISTED_CALLS.contains(&name.as_str()) {
            self.pos += 1;
            let mut args = Vec::new();
            self.skip_ws();
            if !self.rest().starts_with(')') {
                loop {
                    args.push(self.parse_conditional()?);
                    self.skip_ws();
                    if self.eat_str(",") {
                        continue;
                    }
                    break;
                }
            }
            self.expect_str(")")?;
            return Ok(Expr::Call(name, args));
        }
        // A bare identifier names a resource id (or "schema"); the following dotted/indexed
        // chain accumulates directly into a `FieldPath` rather than nested `Member`/`Index`
        // nodes, matching how combinator-built `RefView` chains collapse into one `Reference`.
        let mut path = FieldPath::root();
        loop {
            self.skip_ws();
            if self.rest().starts_with('.') && !self.rest().starts_with("..") {
                self.pos += 1;
                let field = self.parse_ident()?;
                path = path.field(field);
            } else if self.rest().starts_with('[') {
                self.pos += 1;
                let idx = self.parse_number_literal()? as usize;
                self.expect_str("]")?;
                path = path.index(idx);
            } else {
                break;
            }
        }
        Ok(Expr::Ref(Reference::new(name, path)))
    }

    fn parse_number_literal(&mut self) -> Result<f64, ParseError> {
        self.skip_ws();
        let start = self.pos;
        if self.rest().starts_with('-') {
            self.pos += 1;
        }
        let mut saw_digit = false;
        while let Some(c) = self.rest().chars().next() {
            if c.is_ascii_digit() {
                self.pos += 1;
                saw_digit = true;
            } else if c == '.' && saw_digit {
                self.pos += 1;
            } else {
                break;
            }
        }
        if !saw_digit {
            return Err(self.err("expected number"));
        }
        self.src[start..self.pos]
            .parse()
            .map_err(|_| self.err("invalid number literal"))
    }

    fn parse_string_literal(&mut self) -> Result<String, ParseError> {
        self.expect_str("\"")?;
        let mut out = String::new();
        loop {
            let c = self
                .rest()
                .chars()
                .next()
                .ok_or_else(|| self.err("unterminated string"))?;
            self.pos += c.len_utf8();
            match c {
                '"' => break,
                '\\' => {
                    let esc = self
                        .rest()
                        .chars()
                        .next()
                        .ok_or_else(|| self.err("unterminated escape"))?;
                    self.pos += esc.len_utf8();
                    out.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }

    fn parse_template_literal(&mut self) -> Result<Expr, ParseError> {
        self.expect_str("`")?;
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            let c = self
                .rest()
                .chars()
                .next()
                .ok_or_else(|| self.err("unterminated template literal"))?;
            if c == '`' {
                self.pos += 1;
                break;
            }
            if c == '$' && self.rest()[1..].starts_with('{') {
                if !text.is_empty() {
                    parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                }
                self.pos += 2;
                let inner = self.parse_conditional()?;
                self.expect_str("}")?;
                parts.push(TemplatePart::Expr(Box::new(inner)));
                continue;
            }
            text.push(c);
            self.pos += c.len_utf8();
        }
        if !text.is_empty() {
            parts.push(TemplatePart::Text(text));
        }
        Ok(Expr::Template(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reference_chain() {
        let e = parse_text("deployment.status.readyReplicas").unwrap();
        match e {
            Expr::Ref(r) => {
                assert_eq!(r.resource_id.as_str(), "deployment");
                assert_eq!(r.field_path.to_string(), "status.readyReplicas");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_strict_equality_and_logical_and() {
        let e = parse_text("svc.ready === true && svc.replicas > 0").unwrap();
        match e {
            Expr::Logical(kroxide_types::LogicalOp::And, ..) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_ternary_and_optional_chain() {
        let e = parse_text("svc?.status ? svc.status : \"pending\"").unwrap();
        match e {
            Expr::Conditional(..) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_template_literal() {
        let e = parse_text("`https://${svc.host}/api`").unwrap();
        match e {
            Expr::Template(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_whitelisted_call() {
        let e = parse_text("size(svc.items)").unwrap();
        assert!(matches!(e, Expr::Call(name, _) if name == "size"));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_text("true extra").is_err());
    }
}
