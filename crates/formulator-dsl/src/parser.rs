//! Recursive-descent parser for procedures.
//!
//! Expressions use precedence climbing. Every nested construct passes through
//! [`Parser::enter`], which bounds nesting depth so hostile input cannot
//! overflow the stack.

use crate::ast::{
    AssignOp, BinaryOp, Body, Expr, Procedure, Property, Stmt, TemplatePart, UnaryOp,
};
use crate::lexer::{tokenize, Spanned, TemplatePiece, Token};
use crate::value::Value;
use thiserror::Error;

/// Maximum syntactic nesting accepted by the parser.
pub const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("procedure is empty")]
    Empty,

    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedChar { offset: usize, found: char },

    #[error("unterminated {what} starting at offset {offset}")]
    Unterminated { what: &'static str, offset: usize },

    #[error("expected {expected} at offset {offset}, found {found}")]
    UnexpectedToken {
        offset: usize,
        expected: &'static str,
        found: String,
    },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("procedure must be a single arrow function or function expression")]
    NotCallable,

    #[error("unexpected input after the procedure at offset {offset}")]
    TrailingInput { offset: usize },

    #[error("'{construct}' is not supported (offset {offset})")]
    Unsupported {
        offset: usize,
        construct: String,
    },

    #[error("expression nested too deeply at offset {offset}")]
    TooDeep { offset: usize },
}

const RESERVED: &[&str] = &[
    "const", "let", "var", "if", "else", "return", "throw", "function", "new", "typeof", "true",
    "false", "null", "undefined", "for", "while", "do", "switch", "class", "try", "catch",
    "import", "export", "await", "async", "yield", "this", "delete", "in", "instanceof", "void",
];

const LOOP_KEYWORDS: &[&str] = &[
    "for", "while", "do", "switch", "class", "try", "import", "export", "await", "async",
    "yield", "this", "delete", "void",
];

/// Parse procedure text into a callable [`Procedure`].
///
/// Accepts exactly one arrow function or function expression, optionally
/// wrapped in parentheses and followed by a semicolon.
pub fn parse_procedure(source: &str) -> Result<Procedure, ParseError> {
    if source.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens, source.len(), 0);
    let procedure = parser.callable()?;
    while parser.eat_punct(";") {}
    if let Some(tok) = parser.peek() {
        return Err(ParseError::TrailingInput { offset: tok.offset });
    }
    Ok(procedure)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    end_offset: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, end_offset: usize, depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth,
            end_offset,
        }
    }

    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.peek().map(|s| s.offset).unwrap_or(self.end_offset)
    }

    fn next(&mut self) -> Option<Spanned> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn at_punct(&self, p: &str) -> bool {
        self.peek().is_some_and(|s| s.token.is_punct(p))
    }

    fn at_ident(&self, name: &str) -> bool {
        self.peek().is_some_and(|s| s.token.is_ident(name))
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.at_ident(name) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        match self.peek() {
            Some(tok) => ParseError::UnexpectedToken {
                offset: tok.offset,
                expected,
                found: tok.token.describe(),
            },
            None => ParseError::UnexpectedEnd { expected },
        }
    }

    fn expect_punct(&mut self, p: &'static str) -> Result<(), ParseError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected(p))
        }
    }

    fn binding_name(&mut self) -> Result<String, ParseError> {
        match self.peek().map(|s| &s.token) {
            Some(Token::Ident(name)) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ParseError::TooDeep {
                offset: self.offset(),
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ------------------------------------------------------------------
    // Callable forms
    // ------------------------------------------------------------------

    fn callable(&mut self) -> Result<Procedure, ParseError> {
        self.enter()?;
        let result = self.callable_inner();
        self.leave();
        result
    }

    fn callable_inner(&mut self) -> Result<Procedure, ParseError> {
        if self.eat_ident("async") {
            return Err(ParseError::Unsupported {
                offset: self.offset(),
                construct: "async".to_string(),
            });
        }

        if self.eat_ident("function") {
            if matches!(self.peek_at(0), Some(Token::Ident(_))) {
                // Function names are not bound inside the body.
                self.binding_name()?;
            }
            self.expect_punct("(")?;
            let params = self.param_list()?;
            self.expect_punct("{")?;
            let body = self.block_rest()?;
            return Ok(Procedure {
                params,
                body: Body::Block(body),
            });
        }

        // `x => ...`
        if matches!(self.peek_at(0), Some(Token::Ident(_)))
            && self.peek_at(1).is_some_and(|t| t.is_punct("=>"))
        {
            let param = self.binding_name()?;
            self.pos += 1;
            let body = self.arrow_body()?;
            return Ok(Procedure {
                params: vec![param],
                body,
            });
        }

        if self.at_punct("(") {
            let start = self.pos;
            self.pos += 1;
            if let Ok(params) = self.param_list() {
                if self.eat_punct("=>") {
                    let body = self.arrow_body()?;
                    return Ok(Procedure { params, body });
                }
            }
            // `(x => ...)`
            self.pos = start + 1;
            let inner = self.callable()?;
            self.expect_punct(")")?;
            return Ok(inner);
        }

        Err(ParseError::NotCallable)
    }

    /// Parameters after the opening parenthesis, through the closing one.
    fn param_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        if self.eat_punct(")") {
            return Ok(params);
        }
        loop {
            params.push(self.binding_name()?);
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct(")")?;
            return Ok(params);
        }
    }

    fn arrow_body(&mut self) -> Result<Body, ParseError> {
        if self.eat_punct("{") {
            Ok(Body::Block(self.block_rest()?))
        } else {
            Ok(Body::Expr(self.expression()?))
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Statements after an opening brace, through the closing one.
    fn block_rest(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.enter()?;
        let mut stmts = Vec::new();
        loop {
            if self.eat_punct("}") {
                break;
            }
            if self.peek().is_none() {
                return Err(ParseError::UnexpectedEnd { expected: "}" });
            }
            self.statement(&mut stmts)?;
        }
        self.leave();
        Ok(stmts)
    }

    fn statement_or_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.eat_punct("{") {
            return self.block_rest();
        }
        self.enter()?;
        let mut stmts = Vec::new();
        self.statement(&mut stmts)?;
        self.leave();
        Ok(stmts)
    }

    fn statement(&mut self, out: &mut Vec<Stmt>) -> Result<(), ParseError> {
        if self.eat_punct(";") {
            return Ok(());
        }
        if self.eat_punct("{") {
            out.extend(self.block_rest()?);
            return Ok(());
        }

        let offset = self.offset();
        if let Some(Token::Ident(word)) = self.peek_at(0) {
            let word = word.clone();
            if LOOP_KEYWORDS.contains(&word.as_str()) {
                return Err(ParseError::Unsupported {
                    offset,
                    construct: word,
                });
            }
            match word.as_str() {
                "const" | "let" | "var" => {
                    let constant = word == "const";
                    self.pos += 1;
                    loop {
                        let name = self.binding_name()?;
                        let init = if self.eat_punct("=") {
                            Some(self.expression()?)
                        } else {
                            None
                        };
                        out.push(Stmt::Declare {
                            name,
                            constant,
                            init,
                        });
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                    self.eat_punct(";");
                    return Ok(());
                }
                "if" => {
                    self.pos += 1;
                    self.expect_punct("(")?;
                    let test = self.expression()?;
                    self.expect_punct(")")?;
                    let then = self.statement_or_block()?;
                    let otherwise = if self.eat_ident("else") {
                        self.statement_or_block()?
                    } else {
                        Vec::new()
                    };
                    out.push(Stmt::If {
                        test,
                        then,
                        otherwise,
                    });
                    return Ok(());
                }
                "return" => {
                    self.pos += 1;
                    let value = if self.at_punct(";") || self.at_punct("}") || self.peek().is_none()
                    {
                        None
                    } else {
                        Some(self.expression()?)
                    };
                    self.eat_punct(";");
                    out.push(Stmt::Return(value));
                    return Ok(());
                }
                "throw" => {
                    self.pos += 1;
                    let value = self.expression()?;
                    self.eat_punct(";");
                    out.push(Stmt::Throw(value));
                    return Ok(());
                }
                "function" => {
                    return Err(ParseError::Unsupported {
                        offset,
                        construct: "nested function".to_string(),
                    });
                }
                _ => {}
            }

            let assign = self.peek_at(1).and_then(|t| match t {
                Token::Punct("=") => Some(AssignOp::Set),
                Token::Punct("+=") => Some(AssignOp::Add),
                Token::Punct("-=") => Some(AssignOp::Sub),
                Token::Punct("*=") => Some(AssignOp::Mul),
                Token::Punct("/=") => Some(AssignOp::Div),
                _ => None,
            });
            if let Some(op) = assign {
                let name = self.binding_name()?;
                self.pos += 1;
                let value = self.expression()?;
                self.eat_punct(";");
                out.push(Stmt::Assign { name, op, value });
                return Ok(());
            }
        }

        let expr = self.expression()?;
        self.eat_punct(";");
        out.push(Stmt::Expr(expr));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let test = self.binary(0)?;
        let result = if self.eat_punct("?") {
            let consequent = self.expression()?;
            self.expect_punct(":")?;
            let alternate = self.expression()?;
            Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            }
        } else {
            test
        };
        self.leave();
        Ok(result)
    }

    fn peek_binary_op(&self) -> Option<(BinaryOp, u8, bool)> {
        let tok = self.peek()?;
        let Token::Punct(p) = &tok.token else {
            return None;
        };
        let op = match *p {
            "??" => (BinaryOp::Nullish, 1, false),
            "||" => (BinaryOp::Or, 1, false),
            "&&" => (BinaryOp::And, 2, false),
            "==" => (BinaryOp::Eq, 3, false),
            "!=" => (BinaryOp::Ne, 3, false),
            "===" => (BinaryOp::StrictEq, 3, false),
            "!==" => (BinaryOp::StrictNe, 3, false),
            "<" => (BinaryOp::Lt, 4, false),
            "<=" => (BinaryOp::Le, 4, false),
            ">" => (BinaryOp::Gt, 4, false),
            ">=" => (BinaryOp::Ge, 4, false),
            "+" => (BinaryOp::Add, 5, false),
            "-" => (BinaryOp::Sub, 5, false),
            "*" => (BinaryOp::Mul, 6, false),
            "/" => (BinaryOp::Div, 6, false),
            "%" => (BinaryOp::Rem, 6, false),
            "**" => (BinaryOp::Pow, 7, true),
            _ => return None,
        };
        Some(op)
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        self.enter()?;
        let mut lhs = self.unary()?;
        let mut chained = 0usize;
        while let Some((op, prec, right_assoc)) = self.peek_binary_op() {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            // Long operator chains build deep left spines; count them too.
            chained += 1;
            self.enter()?;
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.binary(next_min)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = self.depth.saturating_sub(chained);
        self.leave();
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = if self.eat_punct("-") {
            Some(UnaryOp::Neg)
        } else if self.eat_punct("+") {
            Some(UnaryOp::Plus)
        } else if self.eat_punct("!") {
            Some(UnaryOp::Not)
        } else if self.eat_ident("typeof") {
            Some(UnaryOp::TypeOf)
        } else {
            None
        };
        match op {
            Some(op) => {
                self.enter()?;
                let operand = self.unary()?;
                self.leave();
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        let mut links = 0usize;
        loop {
            if self.eat_punct(".") {
                let name = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Property::Name(name),
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                if self.eat_punct("[") {
                    let index = self.expression()?;
                    self.expect_punct("]")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Property::Computed(Box::new(index)),
                        optional: true,
                    };
                } else {
                    let name = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Property::Name(name),
                        optional: true,
                    };
                }
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Property::Computed(Box::new(index)),
                    optional: false,
                };
            } else if self.eat_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                break;
            }
            links += 1;
            self.enter()?;
        }
        self.depth = self.depth.saturating_sub(links);
        Ok(expr)
    }

    fn property_name(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Spanned {
                token: Token::Ident(name),
                ..
            }) => Ok(name),
            Some(tok) => Err(ParseError::UnexpectedToken {
                offset: tok.offset,
                expected: "property name",
                found: tok.token.describe(),
            }),
            None => Err(ParseError::UnexpectedEnd {
                expected: "property name",
            }),
        }
    }

    /// Arguments after the opening parenthesis, through the closing one.
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat_punct(",") {
                if self.eat_punct(")") {
                    return Ok(args);
                }
                continue;
            }
            self.expect_punct(")")?;
            return Ok(args);
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Some(tok) = self.next() else {
            return Err(ParseError::UnexpectedEnd {
                expected: "expression",
            });
        };
        let offset = tok.offset;
        match tok.token {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Template(pieces) => self.template(pieces),
            Token::Punct("(") => {
                self.enter()?;
                let inner = self.expression()?;
                self.expect_punct(")")?;
                self.leave();
                Ok(inner)
            }
            Token::Punct("[") => {
                self.enter()?;
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.expression()?);
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                self.leave();
                Ok(Expr::Array(items))
            }
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "undefined" => Ok(Expr::Literal(Value::Undefined)),
                "NaN" => Ok(Expr::Literal(Value::Number(f64::NAN))),
                "Infinity" => Ok(Expr::Literal(Value::Number(f64::INFINITY))),
                "new" => {
                    let class = self.binding_name()?;
                    let args = if self.eat_punct("(") {
                        self.arguments()?
                    } else {
                        Vec::new()
                    };
                    Ok(Expr::New { class, args })
                }
                "function" => Err(ParseError::Unsupported {
                    offset,
                    construct: "nested function".to_string(),
                }),
                w if RESERVED.contains(&w) => Err(ParseError::Unsupported {
                    offset,
                    construct: w.to_string(),
                }),
                _ => {
                    if self.at_punct("=>") {
                        return Err(ParseError::Unsupported {
                            offset,
                            construct: "nested function".to_string(),
                        });
                    }
                    Ok(Expr::Ident(word.clone()))
                }
            },
            other => Err(ParseError::UnexpectedToken {
                offset,
                expected: "expression",
                found: other.describe(),
            }),
        }
    }

    fn template(&mut self, pieces: Vec<TemplatePiece>) -> Result<Expr, ParseError> {
        let mut parts = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match piece {
                TemplatePiece::Text(text) => parts.push(TemplatePart::Text(text)),
                TemplatePiece::Expr { source, offset } => {
                    let mut tokens = tokenize(&source).map_err(|e| shift(e, offset))?;
                    for tok in &mut tokens {
                        tok.offset += offset;
                    }
                    let mut inner = Parser::new(tokens, offset + source.len(), self.depth + 1);
                    let expr = inner.expression()?;
                    if let Some(tok) = inner.peek() {
                        return Err(ParseError::UnexpectedToken {
                            offset: tok.offset,
                            expected: "}",
                            found: tok.token.describe(),
                        });
                    }
                    parts.push(TemplatePart::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(parts))
    }
}

fn shift(err: ParseError, by: usize) -> ParseError {
    match err {
        ParseError::UnexpectedChar { offset, found } => ParseError::UnexpectedChar {
            offset: offset + by,
            found,
        },
        ParseError::Unterminated { what, offset } => ParseError::Unterminated {
            what,
            offset: offset + by,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_param_arrow() {
        let p = parse_procedure("row => row.price * row.qty").unwrap();
        assert_eq!(p.params, vec!["row".to_string()]);
        assert!(matches!(
            p.body,
            Body::Expr(Expr::Binary {
                op: BinaryOp::Mul,
                ..
            })
        ));
    }

    #[test]
    fn parses_parenthesized_params_and_block() {
        let p = parse_procedure("(a, b) => { const s = a + b; if (s > 10) { return 'big'; } else return 'small'; }")
            .unwrap();
        assert_eq!(p.params, vec!["a".to_string(), "b".to_string()]);
        match p.body {
            Body::Block(stmts) => assert_eq!(stmts.len(), 2),
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn parses_function_expressions() {
        let p = parse_procedure("function grade(score) { return score >= 90 ? 'A' : 'B' }").unwrap();
        assert_eq!(p.params, vec!["score".to_string()]);
        assert!(parse_procedure("function (x) { return x; };").is_ok());
    }

    #[test]
    fn accepts_wrapping_parentheses() {
        let p = parse_procedure("(x => x + 1);").unwrap();
        assert_eq!(p.params, vec!["x".to_string()]);
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let p = parse_procedure("x => 1 + 2 * 3").unwrap();
        let Body::Expr(Expr::Binary { op, rhs, .. }) = p.body else {
            panic!("expected binary body");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn exponent_is_right_associative() {
        let p = parse_procedure("x => 2 ** 3 ** 2").unwrap();
        let Body::Expr(Expr::Binary { lhs, rhs, .. }) = p.body else {
            panic!("expected binary body");
        };
        assert!(matches!(*lhs, Expr::Literal(_)));
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Pow, .. }));
    }

    #[test]
    fn rejects_non_callable_text() {
        assert_eq!(parse_procedure("1 + 2"), Err(ParseError::NotCallable));
        assert_eq!(parse_procedure("   "), Err(ParseError::Empty));
    }

    #[test]
    fn rejects_trailing_input() {
        assert!(matches!(
            parse_procedure("x => x\ny => y"),
            Err(ParseError::TrailingInput { .. })
        ));
    }

    #[test]
    fn rejects_loops() {
        let err = parse_procedure("x => { for (;;) {} }").unwrap_err();
        assert!(matches!(err, ParseError::Unsupported { construct, .. } if construct == "for"));
        assert!(matches!(
            parse_procedure("x => { while (true) {} }"),
            Err(ParseError::Unsupported { .. })
        ));
    }

    #[test]
    fn rejects_nested_functions() {
        assert!(matches!(
            parse_procedure("x => y => y"),
            Err(ParseError::Unsupported { .. })
        ));
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let source = format!("x => {}x{}", "(".repeat(5000), ")".repeat(5000));
        assert!(matches!(
            parse_procedure(&source),
            Err(ParseError::TooDeep { .. })
        ));
        let chain = format!("x => x{}", " + 1".repeat(5000));
        assert!(matches!(
            parse_procedure(&chain),
            Err(ParseError::TooDeep { .. })
        ));
    }

    #[test]
    fn template_expressions_report_absolute_offsets() {
        let err = parse_procedure("x => `${x @}`").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnexpectedChar {
                offset: 10,
                found: '@'
            }
        );
    }

    #[test]
    fn optional_chaining_and_computed_members() {
        let p = parse_procedure("r => r?.name ?? r['alt name']").unwrap();
        let Body::Expr(Expr::Binary { op, lhs, rhs }) = p.body else {
            panic!("expected binary body");
        };
        assert_eq!(op, BinaryOp::Nullish);
        assert!(matches!(*lhs, Expr::Member { optional: true, .. }));
        assert!(matches!(
            *rhs,
            Expr::Member {
                property: Property::Computed(_),
                ..
            }
        ));
    }
}
