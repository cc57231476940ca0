//! CEL (Common Expression Language) parser for the compile pipeline.
//!
//! Turns CEL source text into a [`SpannedExpr`] AST with built-in macros
//! (`has`, `all`, `exists`, `exists_one`, `map`, `filter`, `optMap`,
//! `optFlatMap`) expanded inline into comprehension and member-test nodes.

pub mod ast;
pub mod lexer;
pub mod macros;
mod parser;

pub use ast::{
    BinaryOp, Expr, ListElement, MapEntry, Span, Spanned, SpannedExpr, StructField, UnaryOp,
};
pub use macros::{ArgCount, Macro, MacroRegistry, MacroStyle, ACCU_VAR, NOT_STRICTLY_FALSE};
pub use parser::{parse_tokens, parse_tokens_with_macros, ParseError};

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}..{}",
            self.message, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for ParseError {}

/// Parse a CEL expression from source with standard macros.
pub fn parse(input: &str) -> Result<SpannedExpr, ParseError> {
    let tokens = lexer::lex(input).map_err(|e| ParseError {
        message: e.message,
        span: e.span,
    })?;
    parse_tokens(&tokens)
}

/// Parse a CEL expression from source with a custom macro registry.
///
/// Passing [`MacroRegistry::new()`] disables macro expansion entirely;
/// macro-shaped calls then parse as ordinary function calls.
pub fn parse_with_macros(
    input: &str,
    macros: MacroRegistry,
) -> Result<SpannedExpr, ParseError> {
    let tokens = lexer::lex(input).map_err(|e| ParseError {
        message: e.message,
        span: e.span,
    })?;
    parse_tokens_with_macros(&tokens, macros)
}
