//! CEL parser - hand-written recursive descent with inline macro expansion.

use crate::ast::{Expr, ListElement, MapEntry, Spanned, SpannedExpr, StructField};
use crate::lexer::{Span, SpannedToken, Token};
use crate::macros::{MacroContext, MacroExpansion, MacroRegistry};

/// Parse error with span information.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

/// Recursive descent parser for CEL expressions.
pub struct Parser<'a> {
    tokens: &'a [SpannedToken],
    pos: usize,
    /// Counter for generating unique node IDs (starts at 1)
    next_id: i64,
    /// Registry of macros for expansion.
    macros: MacroRegistry,
}

impl<'a> Parser<'a> {
    /// Create a new parser for the given token stream with standard macros.
    pub fn new(tokens: &'a [SpannedToken]) -> Self {
        Self::with_macros(tokens, MacroRegistry::standard())
    }

    /// Create a new parser with a custom macro registry.
    pub fn with_macros(tokens: &'a [SpannedToken], macros: MacroRegistry) -> Self {
        Self {
            tokens,
            pos: 0,
            next_id: 1,
            macros,
        }
    }

    /// Allocate the next unique node ID.
    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // === Utility Methods ===

    /// Peek at the current token without consuming it.
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    /// Get the span of the current token.
    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| s.clone())
            .unwrap_or_else(|| self.eof_span())
    }

    /// Get the span representing end-of-input.
    fn eof_span(&self) -> Span {
        let end = self.tokens.last().map(|(_, s)| s.end).unwrap_or(0);
        end..end
    }

    /// Advance to the next token, returning the current one.
    fn advance(&mut self) -> Option<&SpannedToken> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Check if the current token matches the given token.
    fn check(&self, token: &Token) -> bool {
        self.peek().map_or(false, |t| t == token)
    }

    /// Consume the current token if it matches, returning true if consumed.
    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Expect a specific token, returning an error if not found.
    fn expect(&mut self, token: &Token) -> Result<Span, ParseError> {
        if self.check(token) {
            let span = self.peek_span();
            self.advance();
            Ok(span)
        } else {
            Err(ParseError {
                message: format!("expected '{}', found {:?}", token, self.peek()),
                span: self.peek_span(),
            })
        }
    }

    /// Check if we've reached the end of the token stream.
    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Validate an identifier: names shaped like `__x__` are reserved for
    /// synthetic variables such as the comprehension accumulator.
    fn check_ident(&self, name: &str, span: &Span) -> Result<(), ParseError> {
        if name.len() > 4 && name.starts_with("__") && name.ends_with("__") {
            return Err(ParseError {
                message: format!("identifier '{}' uses the reserved '__name__' form", name),
                span: span.clone(),
            });
        }
        Ok(())
    }

    // === Expression Parsing ===

    /// Parse an expression (entry point).
    pub fn parse_expr(&mut self) -> Result<SpannedExpr, ParseError> {
        self.parse_ternary()
    }

    /// Parse ternary conditional: expr ? expr : expr (right-associative)
    fn parse_ternary(&mut self) -> Result<SpannedExpr, ParseError> {
        let cond = self.parse_or()?;

        if self.match_token(&Token::Question) {
            let then_expr = self.parse_ternary()?;
            self.expect(&Token::Colon)?;
            let else_expr = self.parse_ternary()?;
            let span = cond.span.start..else_expr.span.end;

            Ok(Spanned::new(
                self.next_id(),
                Expr::Ternary {
                    cond: Box::new(cond),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                },
                span,
            ))
        } else {
            Ok(cond)
        }
    }

    /// Parse logical OR: expr || expr
    fn parse_or(&mut self) -> Result<SpannedExpr, ParseError> {
        use crate::ast::BinaryOp;

        let mut left = self.parse_and()?;

        while self.match_token(&Token::Or) {
            let right = self.parse_and()?;
            let span = left.span.start..right.span.end;
            left = Spanned::new(
                self.next_id(),
                Expr::Binary {
                    op: BinaryOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse logical AND: expr && expr
    fn parse_and(&mut self) -> Result<SpannedExpr, ParseError> {
        use crate::ast::BinaryOp;

        let mut left = self.parse_relation()?;

        while self.match_token(&Token::And) {
            let right = self.parse_relation()?;
            let span = left.span.start..right.span.end;
            left = Spanned::new(
                self.next_id(),
                Expr::Binary {
                    op: BinaryOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse relational operators: == != < <= > >= in
    ///
    /// Relations are non-associative: `a < b < c` is a parse error.
    fn parse_relation(&mut self) -> Result<SpannedExpr, ParseError> {
        let left = self.parse_addition()?;

        if let Some(op) = self.peek_relop() {
            self.advance();
            let right = self.parse_addition()?;
            let span = left.span.start..right.span.end;

            if self.peek_relop().is_some() {
                return Err(ParseError {
                    message: "relational operators are non-associative".to_string(),
                    span: self.peek_span(),
                });
            }

            return Ok(Spanned::new(
                self.next_id(),
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            ));
        }

        Ok(left)
    }

    /// Check if the current token is a relational operator.
    fn peek_relop(&self) -> Option<crate::ast::BinaryOp> {
        use crate::ast::BinaryOp;

        match self.peek()? {
            Token::EqEq => Some(BinaryOp::Eq),
            Token::Ne => Some(BinaryOp::Ne),
            Token::Lt => Some(BinaryOp::Lt),
            Token::Le => Some(BinaryOp::Le),
            Token::Gt => Some(BinaryOp::Gt),
            Token::Ge => Some(BinaryOp::Ge),
            Token::In => Some(BinaryOp::In),
            _ => None,
        }
    }

    /// Parse additive operators: + -
    fn parse_addition(&mut self) -> Result<SpannedExpr, ParseError> {
        use crate::ast::BinaryOp;

        let mut left = self.parse_mult()?;

        loop {
            let op = if self.match_token(&Token::Plus) {
                BinaryOp::Add
            } else if self.match_token(&Token::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };

            let right = self.parse_mult()?;
            let span = left.span.start..right.span.end;
            left = Spanned::new(
                self.next_id(),
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse multiplicative operators: * / %
    fn parse_mult(&mut self) -> Result<SpannedExpr, ParseError> {
        use crate::ast::BinaryOp;

        let mut left = self.parse_unary()?;

        loop {
            let op = if self.match_token(&Token::Star) {
                BinaryOp::Mul
            } else if self.match_token(&Token::Slash) {
                BinaryOp::Div
            } else if self.match_token(&Token::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };

            let right = self.parse_unary()?;
            let span = left.span.start..right.span.end;
            left = Spanned::new(
                self.next_id(),
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse unary operators: - !
    fn parse_unary(&mut self) -> Result<SpannedExpr, ParseError> {
        use crate::ast::UnaryOp;

        let start = self.peek_span().start;

        if self.match_token(&Token::Minus) {
            let expr = self.parse_unary()?;
            let span = start..expr.span.end;
            Ok(Spanned::new(
                self.next_id(),
                Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(expr),
                },
                span,
            ))
        } else if self.match_token(&Token::Not) {
            let expr = self.parse_unary()?;
            let span = start..expr.span.end;
            Ok(Spanned::new(
                self.next_id(),
                Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                },
                span,
            ))
        } else {
            self.parse_postfix()
        }
    }

    /// Parse postfix operators: . .? [] [?] () {}
    fn parse_postfix(&mut self) -> Result<SpannedExpr, ParseError> {
        let mut expr = self.parse_atom()?;

        loop {
            if self.check(&Token::LParen) {
                // Function call
                expr = self.parse_call(expr)?;
            } else if self.check(&Token::LBracket) {
                // Index
                expr = self.parse_index(expr)?;
            } else if self.check(&Token::Dot) {
                // Member access
                expr = self.parse_member(expr)?;
            } else if self.check(&Token::LBrace) {
                // Struct literal (only if expr is an ident or member chain)
                match flatten_type_name(&expr) {
                    Some(type_name) => expr = self.parse_struct_init(expr.span.start, type_name)?,
                    None => break,
                }
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parse a function call: expr(args...)
    /// Also handles inline macro expansion using the macro registry.
    fn parse_call(&mut self, callee: SpannedExpr) -> Result<SpannedExpr, ParseError> {
        let start = callee.span.start;
        self.expect(&Token::LParen)?;

        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            args.push(self.parse_expr()?);
            while self.match_token(&Token::Comma) {
                if self.check(&Token::RParen) {
                    break; // trailing comma
                }
                args.push(self.parse_expr()?);
            }
        }

        let end_span = self.expect(&Token::RParen)?;
        let span = start..end_span.end;

        // Try macro expansion using the registry
        if let Some(expanded) = self.try_macro_expansion(&callee, span.clone(), &args)? {
            return Ok(expanded);
        }

        // Not a macro - return regular Call node
        Ok(Spanned::new(
            self.next_id(),
            Expr::Call {
                expr: Box::new(callee),
                args,
            },
            span,
        ))
    }

    /// Try to expand a call as a macro using the registry.
    ///
    /// Returns Ok(None) if no matching macro is found. A macro whose name
    /// and arity match but whose argument shape is invalid fails the parse.
    fn try_macro_expansion(
        &mut self,
        callee: &SpannedExpr,
        span: Span,
        args: &[SpannedExpr],
    ) -> Result<Option<SpannedExpr>, ParseError> {
        // `has` accepts exactly one argument; any other arity is malformed
        // rather than a candidate for ordinary dispatch.
        if let Expr::Ident(name) = &callee.node {
            if name == "has" && self.macros.contains("has") && args.len() != 1 {
                return Err(ParseError {
                    message: format!("has() requires 1 argument, got {}", args.len()),
                    span,
                });
            }
        }

        let (name, receiver, is_receiver) = match extract_call_info(callee) {
            Some(info) => info,
            None => return Ok(None),
        };

        let macro_def = match self.macros.lookup(&name, args.len(), is_receiver) {
            Some(m) => m,
            None => return Ok(None),
        };
        let expander = macro_def.expander;

        let mut next_id_fn = || {
            let id = self.next_id;
            self.next_id += 1;
            id
        };
        let mut ctx = MacroContext::new(&mut next_id_fn);

        match expander(&mut ctx, span.clone(), receiver, args.to_vec()) {
            MacroExpansion::Expanded(expr) => Ok(Some(expr)),
            MacroExpansion::Error(message) => Err(ParseError { message, span }),
        }
    }

    /// Parse an index operation: expr[index] or expr[?index]
    fn parse_index(&mut self, base: SpannedExpr) -> Result<SpannedExpr, ParseError> {
        let start = base.span.start;
        self.expect(&Token::LBracket)?;
        let optional = self.match_token(&Token::Question);
        let index = self.parse_expr()?;
        let end_span = self.expect(&Token::RBracket)?;

        Ok(Spanned::new(
            self.next_id(),
            Expr::Index {
                expr: Box::new(base),
                index: Box::new(index),
                optional,
            },
            start..end_span.end,
        ))
    }

    /// Parse member access: expr.field or expr.?field
    fn parse_member(&mut self, base: SpannedExpr) -> Result<SpannedExpr, ParseError> {
        let start = base.span.start;
        self.expect(&Token::Dot)?;
        let optional = self.match_token(&Token::Question);

        let (field, end) = match self.advance() {
            Some((Token::Ident(name), span)) => {
                let name = name.clone();
                let span = span.clone();
                self.check_ident(&name, &span)?;
                (name, span.end)
            }
            other => {
                let found = other.map(|(t, _)| t.clone());
                return Err(ParseError {
                    message: format!("expected identifier after '.', found {:?}", found),
                    span: self.peek_span(),
                });
            }
        };

        Ok(Spanned::new(
            self.next_id(),
            Expr::Member {
                expr: Box::new(base),
                field,
                optional,
            },
            start..end,
        ))
    }

    /// Parse struct initialization: Type{field: value, ...}
    fn parse_struct_init(
        &mut self,
        start: usize,
        type_name: String,
    ) -> Result<SpannedExpr, ParseError> {
        self.expect(&Token::LBrace)?;

        let mut fields = Vec::new();
        if !self.check(&Token::RBrace) {
            fields.push(self.parse_struct_field()?);
            while self.match_token(&Token::Comma) {
                if self.check(&Token::RBrace) {
                    break; // trailing comma
                }
                fields.push(self.parse_struct_field()?);
            }
        }

        let end_span = self.expect(&Token::RBrace)?;

        Ok(Spanned::new(
            self.next_id(),
            Expr::Struct { type_name, fields },
            start..end_span.end,
        ))
    }

    /// Parse a struct field: name: value or ?name: value
    fn parse_struct_field(&mut self) -> Result<StructField, ParseError> {
        let optional = self.match_token(&Token::Question);

        let name = match self.advance() {
            Some((Token::Ident(name), _)) => name.clone(),
            other => {
                let found = other.map(|(t, _)| t.clone());
                return Err(ParseError {
                    message: format!("expected field name, found {:?}", found),
                    span: self.peek_span(),
                });
            }
        };

        self.expect(&Token::Colon)?;
        let value = self.parse_expr()?;

        Ok(StructField {
            name,
            value,
            optional,
        })
    }

    /// Parse an atom: literal, identifier, parenthesized expression, list, or map.
    fn parse_atom(&mut self) -> Result<SpannedExpr, ParseError> {
        let span = self.peek_span();

        // Clone the token to avoid borrowing issues
        let token = self.peek().cloned();

        match token {
            // Literals
            Some(Token::Int(n)) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Int(n), span))
            }
            Some(Token::UInt(n)) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::UInt(n), span))
            }
            Some(Token::Float(n)) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Float(n), span))
            }
            Some(Token::String(s)) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::String(s), span))
            }
            Some(Token::Bytes(b)) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Bytes(b), span))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Bool(true), span))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Bool(false), span))
            }
            Some(Token::Null) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Null, span))
            }

            // Identifier
            Some(Token::Ident(name)) => {
                self.check_ident(&name, &span)?;
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Ident(name), span))
            }

            // Reserved word - error
            Some(Token::Reserved(word)) => Err(ParseError {
                message: format!(
                    "'{}' is a reserved word and cannot be used as an identifier",
                    word
                ),
                span,
            }),

            // Root identifier: .name
            Some(Token::Dot) => {
                self.advance();
                match self.advance() {
                    Some((Token::Ident(name), end_span)) => {
                        let name = name.clone();
                        let end = end_span.end;
                        self.check_ident(&name, &(span.start..end))?;
                        Ok(Spanned::new(
                            self.next_id(),
                            Expr::RootIdent(name),
                            span.start..end,
                        ))
                    }
                    _ => Err(ParseError {
                        message: "expected identifier after '.'".to_string(),
                        span: self.peek_span(),
                    }),
                }
            }

            // Parenthesized expression
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }

            // List literal
            Some(Token::LBracket) => self.parse_list(),

            // Map literal
            Some(Token::LBrace) => self.parse_map(),

            // Error cases
            Some(token) => Err(ParseError {
                message: format!("unexpected token: {:?}", token),
                span,
            }),

            None => Err(ParseError {
                message: "unexpected end of input".to_string(),
                span: self.eof_span(),
            }),
        }
    }

    /// Parse a list literal: [expr, ?expr, ...]
    fn parse_list(&mut self) -> Result<SpannedExpr, ParseError> {
        let start = self.peek_span().start;
        self.expect(&Token::LBracket)?;

        let mut items = Vec::new();
        if !self.check(&Token::RBracket) {
            items.push(self.parse_list_element()?);
            while self.match_token(&Token::Comma) {
                if self.check(&Token::RBracket) {
                    break; // trailing comma
                }
                items.push(self.parse_list_element()?);
            }
        }

        let end_span = self.expect(&Token::RBracket)?;

        Ok(Spanned::new(
            self.next_id(),
            Expr::List(items),
            start..end_span.end,
        ))
    }

    fn parse_list_element(&mut self) -> Result<ListElement, ParseError> {
        let optional = self.match_token(&Token::Question);
        let expr = self.parse_expr()?;
        Ok(ListElement { expr, optional })
    }

    /// Parse a map literal: {expr: expr, ?expr: expr, ...}
    fn parse_map(&mut self) -> Result<SpannedExpr, ParseError> {
        let start = self.peek_span().start;
        self.expect(&Token::LBrace)?;

        let mut entries = Vec::new();
        if !self.check(&Token::RBrace) {
            entries.push(self.parse_map_entry()?);
            while self.match_token(&Token::Comma) {
                if self.check(&Token::RBrace) {
                    break; // trailing comma
                }
                entries.push(self.parse_map_entry()?);
            }
        }

        let end_span = self.expect(&Token::RBrace)?;

        Ok(Spanned::new(
            self.next_id(),
            Expr::Map(entries),
            start..end_span.end,
        ))
    }

    fn parse_map_entry(&mut self) -> Result<MapEntry, ParseError> {
        let optional = self.match_token(&Token::Question);
        let key = self.parse_expr()?;
        self.expect(&Token::Colon)?;
        let value = self.parse_expr()?;
        Ok(MapEntry {
            key,
            value,
            optional,
        })
    }
}

/// Flatten an identifier chain into a struct type name.
/// Returns None if the expression is not usable as a type name.
fn flatten_type_name(expr: &SpannedExpr) -> Option<String> {
    match &expr.node {
        Expr::Ident(name) => Some(name.clone()),
        Expr::RootIdent(name) => Some(format!(".{}", name)),
        Expr::Member {
            expr,
            field,
            optional: false,
        } => flatten_type_name(expr).map(|prefix| format!("{}.{}", prefix, field)),
        _ => None,
    }
}

/// Extract call information from a callee expression.
/// Returns (name, receiver, is_receiver) or None if not a macro candidate.
fn extract_call_info(callee: &SpannedExpr) -> Option<(String, Option<SpannedExpr>, bool)> {
    match &callee.node {
        // Global function call: name(args)
        Expr::Ident(name) => Some((name.clone(), None, false)),
        // Method call: receiver.name(args); optional-chained receivers are
        // never macro targets
        Expr::Member {
            expr,
            field,
            optional: false,
        } => Some((field.clone(), Some((**expr).clone()), true)),
        _ => None,
    }
}

/// Parse tokens into an AST with inline macro expansion using standard macros.
pub fn parse_tokens(tokens: &[SpannedToken]) -> Result<SpannedExpr, ParseError> {
    parse_tokens_with_macros(tokens, MacroRegistry::standard())
}

/// Parse tokens into an AST with inline macro expansion using a custom
/// macro registry.
pub fn parse_tokens_with_macros(
    tokens: &[SpannedToken],
    macros: MacroRegistry,
) -> Result<SpannedExpr, ParseError> {
    if tokens.is_empty() {
        return Err(ParseError {
            message: "empty input".to_string(),
            span: 0..0,
        });
    }

    let mut parser = Parser::with_macros(tokens, macros);
    let ast = parser.parse_expr()?;
    if !parser.at_end() {
        return Err(ParseError {
            message: "unexpected tokens after expression".to_string(),
            span: parser.peek_span(),
        });
    }
    Ok(ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, UnaryOp};
    use crate::lexer::lex;

    fn parse_expr(input: &str) -> SpannedExpr {
        let tokens = lex(input).unwrap();
        parse_tokens(&tokens).expect("expected AST")
    }

    fn parse_expr_node(input: &str) -> Expr {
        parse_expr(input).node
    }

    fn parse_fails(input: &str) -> ParseError {
        let tokens = lex(input).unwrap();
        parse_tokens(&tokens).expect_err("expected parse error")
    }

    #[test]
    fn parse_literals() {
        assert_eq!(parse_expr_node("123"), Expr::Int(123));
        assert_eq!(parse_expr_node("123u"), Expr::UInt(123));
        assert_eq!(parse_expr_node("1.5"), Expr::Float(1.5));
        assert_eq!(
            parse_expr_node(r#""hello""#),
            Expr::String("hello".to_string())
        );
        assert_eq!(parse_expr_node("true"), Expr::Bool(true));
        assert_eq!(parse_expr_node("false"), Expr::Bool(false));
        assert_eq!(parse_expr_node("null"), Expr::Null);
    }

    #[test]
    fn parse_identifier() {
        assert_eq!(parse_expr_node("foo"), Expr::Ident("foo".to_string()));
    }

    #[test]
    fn parse_list() {
        if let Expr::List(items) = parse_expr_node("[1, 2, 3]") {
            assert_eq!(items.len(), 3);
            assert_eq!(items[0].expr.node, Expr::Int(1));
            assert_eq!(items[1].expr.node, Expr::Int(2));
            assert_eq!(items[2].expr.node, Expr::Int(3));
            assert!(!items[0].optional);
        } else {
            panic!("expected list");
        }
    }

    #[test]
    fn parse_optional_list_element() {
        if let Expr::List(items) = parse_expr_node("[?a, 2]") {
            assert!(items[0].optional);
            assert!(!items[1].optional);
        } else {
            panic!("expected list");
        }
    }

    #[test]
    fn parse_map() {
        if let Expr::Map(entries) = parse_expr_node(r#"{"a": 1, "b": 2}"#) {
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[0].key.node, Expr::String("a".to_string()));
            assert_eq!(entries[0].value.node, Expr::Int(1));
        } else {
            panic!("expected map");
        }
    }

    #[test]
    fn parse_optional_map_entry() {
        if let Expr::Map(entries) = parse_expr_node(r#"{?"a": x}"#) {
            assert!(entries[0].optional);
        } else {
            panic!("expected map");
        }
    }

    #[test]
    fn parse_binary_ops() {
        if let Expr::Binary { op, left, right } = parse_expr_node("1 + 2") {
            assert_eq!(op, BinaryOp::Add);
            assert_eq!(left.node, Expr::Int(1));
            assert_eq!(right.node, Expr::Int(2));
        } else {
            panic!("expected binary");
        }
    }

    #[test]
    fn parse_precedence() {
        // 1 + 2 * 3 should parse as 1 + (2 * 3)
        if let Expr::Binary { op, left, right } = parse_expr_node("1 + 2 * 3") {
            assert_eq!(op, BinaryOp::Add);
            assert_eq!(left.node, Expr::Int(1));
            if let Expr::Binary {
                op: inner_op,
                left: inner_left,
                right: inner_right,
            } = &right.node
            {
                assert_eq!(*inner_op, BinaryOp::Mul);
                assert_eq!(inner_left.node, Expr::Int(2));
                assert_eq!(inner_right.node, Expr::Int(3));
            } else {
                panic!("expected inner binary");
            }
        } else {
            panic!("expected binary");
        }
    }

    #[test]
    fn parse_associativity() {
        // 1 - 2 - 3 should parse as (1 - 2) - 3 (left associative)
        if let Expr::Binary { op, left, right } = parse_expr_node("1 - 2 - 3") {
            assert_eq!(op, BinaryOp::Sub);
            assert_eq!(right.node, Expr::Int(3));
            if let Expr::Binary {
                op: inner_op,
                left: inner_left,
                right: inner_right,
            } = &left.node
            {
                assert_eq!(*inner_op, BinaryOp::Sub);
                assert_eq!(inner_left.node, Expr::Int(1));
                assert_eq!(inner_right.node, Expr::Int(2));
            } else {
                panic!("expected inner binary");
            }
        } else {
            panic!("expected binary");
        }
    }

    #[test]
    fn relations_are_non_associative() {
        let err = parse_fails("1 < 2 < 3");
        assert!(err.message.contains("non-associative"));
    }

    #[test]
    fn parse_unary() {
        if let Expr::Unary { op, expr } = parse_expr_node("-x") {
            assert_eq!(op, UnaryOp::Neg);
            assert_eq!(expr.node, Expr::Ident("x".to_string()));
        } else {
            panic!("expected unary");
        }
    }

    #[test]
    fn parse_member_access() {
        if let Expr::Member {
            expr,
            field,
            optional,
        } = parse_expr_node("a.b")
        {
            assert_eq!(expr.node, Expr::Ident("a".to_string()));
            assert_eq!(field, "b");
            assert!(!optional);
        } else {
            panic!("expected member access");
        }
    }

    #[test]
    fn parse_optional_member_access() {
        if let Expr::Member {
            field, optional, ..
        } = parse_expr_node("a.?b")
        {
            assert_eq!(field, "b");
            assert!(optional);
        } else {
            panic!("expected member access");
        }
    }

    #[test]
    fn parse_index() {
        if let Expr::Index {
            expr,
            index,
            optional,
        } = parse_expr_node("a[0]")
        {
            assert_eq!(expr.node, Expr::Ident("a".to_string()));
            assert_eq!(index.node, Expr::Int(0));
            assert!(!optional);
        } else {
            panic!("expected index");
        }
    }

    #[test]
    fn parse_optional_index() {
        if let Expr::Index { optional, .. } = parse_expr_node("a[?0]") {
            assert!(optional);
        } else {
            panic!("expected index");
        }
    }

    #[test]
    fn parse_call() {
        if let Expr::Call { expr, args } = parse_expr_node("f(x, y)") {
            assert_eq!(expr.node, Expr::Ident("f".to_string()));
            assert_eq!(args.len(), 2);
            assert_eq!(args[0].node, Expr::Ident("x".to_string()));
            assert_eq!(args[1].node, Expr::Ident("y".to_string()));
        } else {
            panic!("expected call");
        }
    }

    #[test]
    fn parse_ternary() {
        if let Expr::Ternary {
            cond,
            then_expr,
            else_expr,
        } = parse_expr_node("a ? b : c")
        {
            assert_eq!(cond.node, Expr::Ident("a".to_string()));
            assert_eq!(then_expr.node, Expr::Ident("b".to_string()));
            assert_eq!(else_expr.node, Expr::Ident("c".to_string()));
        } else {
            panic!("expected ternary");
        }
    }

    #[test]
    fn ternary_is_right_associative() {
        // a ? b : c ? d : e == a ? b : (c ? d : e)
        if let Expr::Ternary { else_expr, .. } = parse_expr_node("a ? b : c ? d : e") {
            assert!(matches!(else_expr.node, Expr::Ternary { .. }));
        } else {
            panic!("expected ternary");
        }
    }

    #[test]
    fn parse_chained_member_access() {
        if let Expr::Member { expr, field, .. } = parse_expr_node("a.b.c") {
            assert_eq!(field, "c");
            if let Expr::Member {
                expr: inner_expr,
                field: inner_field,
                ..
            } = &expr.node
            {
                assert_eq!(inner_expr.node, Expr::Ident("a".to_string()));
                assert_eq!(inner_field, "b");
            } else {
                panic!("expected inner member");
            }
        } else {
            panic!("expected member access");
        }
    }

    #[test]
    fn parse_struct_literal() {
        if let Expr::Struct { type_name, fields } = parse_expr_node("pkg.Msg{a: 1, b: 2}") {
            assert_eq!(type_name, "pkg.Msg");
            assert_eq!(fields.len(), 2);
            assert_eq!(fields[0].name, "a");
            assert!(!fields[0].optional);
        } else {
            panic!("expected struct");
        }
    }

    #[test]
    fn parse_struct_optional_field() {
        if let Expr::Struct { fields, .. } = parse_expr_node("Msg{?a: x}") {
            assert!(fields[0].optional);
        } else {
            panic!("expected struct");
        }
    }

    #[test]
    fn reserved_word_rejected() {
        let err = parse_fails("package");
        assert!(err.message.contains("reserved word"));
        let err = parse_fails("1 + var");
        assert!(err.message.contains("reserved word"));
    }

    #[test]
    fn dunder_identifier_rejected() {
        let err = parse_fails("__result__");
        assert!(err.message.contains("__name__"));
        let err = parse_fails("a.__x__");
        assert!(err.message.contains("__name__"));
    }

    #[test]
    fn has_wrong_shape_fails() {
        assert!(parse_tokens(&lex("has(a)").unwrap()).is_err());
        assert!(parse_tokens(&lex("has(a.b, a.c)").unwrap()).is_err());
        assert!(parse_tokens(&lex("has(42)").unwrap()).is_err());
    }

    // === ID Assignment Tests ===

    #[test]
    fn ids_start_at_one() {
        let ast = parse_expr("123");
        assert_eq!(ast.id, 1);
    }

    #[test]
    fn ids_are_unique_in_expression() {
        let ast = parse_expr("1 + 2");

        // Collect all IDs from the expression tree
        fn collect_ids(expr: &SpannedExpr, ids: &mut Vec<i64>) {
            ids.push(expr.id);
            match &expr.node {
                Expr::Binary { left, right, .. } => {
                    collect_ids(left, ids);
                    collect_ids(right, ids);
                }
                Expr::Unary { expr, .. } => {
                    collect_ids(expr, ids);
                }
                Expr::List(elements) => {
                    for e in elements {
                        collect_ids(&e.expr, ids);
                    }
                }
                _ => {}
            }
        }

        let mut ids = Vec::new();
        collect_ids(&ast, &mut ids);

        // All IDs should be unique
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids.len(), sorted.len(), "IDs should be unique");
    }

    #[test]
    fn ids_are_depth_first() {
        let ast = parse_expr("1 + 2");

        if let Expr::Binary { left, right, .. } = &ast.node {
            assert!(left.id < ast.id, "left child should have lower ID than parent");
            assert!(right.id < ast.id, "right child should have lower ID than parent");
            assert!(left.id < right.id, "left child should have lower ID than right child");
        } else {
            panic!("expected binary");
        }
    }

    // === Macro Expansion Tests ===

    #[test]
    fn expand_has() {
        let ast = parse_expr("has(m.x)");
        if let Expr::MemberTestOnly { expr, field } = &ast.node {
            assert_eq!(expr.node, Expr::Ident("m".to_string()));
            assert_eq!(field, "x");
        } else {
            panic!("expected member test, got {:?}", ast.node);
        }
    }

    #[test]
    fn expand_all_2arg() {
        let ast = parse_expr("[1,2,3].all(x, x > 0)");
        if let Expr::Comprehension {
            iter_var,
            iter_var2,
            accu_var,
            ..
        } = &ast.node
        {
            assert_eq!(iter_var, "x");
            assert!(iter_var2.is_empty());
            assert_eq!(accu_var, "__result__");
        } else {
            panic!("expected comprehension, got {:?}", ast.node);
        }
    }

    #[test]
    fn expand_exists_3arg() {
        let ast = parse_expr("[1,2].exists(i, v, i < v)");
        if let Expr::Comprehension {
            iter_var, iter_var2, ..
        } = &ast.node
        {
            assert_eq!(iter_var, "i");
            assert_eq!(iter_var2, "v");
        } else {
            panic!("expected comprehension, got {:?}", ast.node);
        }
    }

    #[test]
    fn expand_exists_one_3arg() {
        let ast = parse_expr("[7].exists_one(i, v, i == 0 && v == 7)");
        if let Expr::Comprehension {
            iter_var, iter_var2, ..
        } = &ast.node
        {
            assert_eq!(iter_var, "i");
            assert_eq!(iter_var2, "v");
        } else {
            panic!("expected comprehension, got {:?}", ast.node);
        }
    }

    #[test]
    fn expand_filter() {
        let ast = parse_expr("[1,2,3].filter(x, x > 1)");
        assert!(matches!(ast.node, Expr::Comprehension { .. }));
    }

    #[test]
    fn expand_opt_map() {
        let ast = parse_expr("o.optMap(v, v + 1)");
        assert!(matches!(ast.node, Expr::Bind { .. }));
    }

    #[test]
    fn wrong_arg_count_returns_call() {
        // exists with 1 arg is not a macro match; it stays a regular call
        let ast = parse_expr("[1,2].exists(x)");
        assert!(matches!(ast.node, Expr::Call { .. }));
    }

    #[test]
    fn macro_with_non_ident_iter_var_fails() {
        assert!(parse_tokens(&lex("[1].all(1, true)").unwrap()).is_err());
    }

    // === Macro Registry Tests ===

    #[test]
    fn parse_with_no_macros() {
        let tokens = lex("[1,2].all(x, x > 0)").unwrap();
        let ast = parse_tokens_with_macros(&tokens, MacroRegistry::new()).unwrap();
        // Without macros, all() should be a regular call
        assert!(matches!(ast.node, Expr::Call { .. }));

        let tokens = lex("has(m.x)").unwrap();
        let ast = parse_tokens_with_macros(&tokens, MacroRegistry::new()).unwrap();
        assert!(matches!(ast.node, Expr::Call { .. }));
    }
}
