//! Error handling tests for cel-compile-parser.

mod common;

use cel_compile_parser::parse;

#[test]
fn error_on_unclosed_parenthesis() {
    assert!(parse("(1 + 2").is_err());
}

#[test]
fn error_on_unclosed_bracket() {
    assert!(parse("[1, 2").is_err());
}

#[test]
fn error_on_unclosed_brace() {
    assert!(parse("{\"a\": 1").is_err());
}

#[test]
fn error_on_missing_operator() {
    assert!(parse("1 2").is_err());
}

#[test]
fn error_on_trailing_operator() {
    assert!(parse("1 +").is_err());
}

#[test]
fn error_on_empty_input() {
    assert!(parse("").is_err());
}

#[test]
fn error_on_unclosed_string() {
    assert!(parse("\"hello").is_err());
}

#[test]
fn error_on_incomplete_ternary() {
    assert!(parse("a ? b").is_err());
}

#[test]
fn error_on_bad_tokens() {
    // A lone 0x prefix lexes as `0` then `x`, which is two expressions
    assert!(parse("0x").is_err());
    assert!(parse("0xg").is_err());
    assert!(parse("1.5u").is_err());
}

#[test]
fn error_on_bad_escape() {
    assert!(parse(r#""\q""#).is_err());
    assert!(parse(r#""\uD800""#).is_err());
    assert!(parse(r#"b"\U00000041""#).is_err());
}

#[test]
fn error_on_reserved_word_identifier() {
    for word in ["package", "var", "namespace", "function", "as", "void", "return"] {
        let err = common::assert_parse_error(word);
        assert!(
            err.message.contains("reserved word"),
            "expected reserved-word diagnostic for '{}', got: {}",
            word,
            err.message
        );
    }
}

#[test]
fn error_on_malformed_has() {
    assert!(parse("has(a)").is_err());
    assert!(parse("has(a[0])").is_err());
    assert!(parse("has(1 + 2)").is_err());
}

#[test]
fn errors_carry_spans() {
    let err = common::assert_parse_error("1 + + 2");
    assert!(err.span.start <= err.span.end);
    assert!(err.span.end <= "1 + + 2".len());
}
