//! This module turns lambda source text into the syntactic AST of
//! [crate::ast::source]. A chumsky lexer produces a spanned token stream and
//! a chumsky parser covering the narrow arrow-lambda subset turns it into a
//! tree; everything downstream of here works on the AST only.

mod expr;
mod lexer;

use anyhow::{anyhow, Result};
use chumsky::error::SimpleReason;
use chumsky::{Parser, Stream};
use itertools::Itertools;

use self::lexer::Token;

use crate::ast::source::{Arrow, Expr};
use crate::error::{Error, Reason, Span};

/// Parse a lambda source string into an expression tree.
pub fn parse(source: &str) -> Result<Expr> {
    let tokens = lexer::lexer()
        .parse(source)
        .map_err(|errors| anyhow!(combine_errors(errors.into_iter().map(convert_char_error))))?;

    let len = source.chars().count();
    let stream = Stream::from_iter(len..len + 1, tokens.into_iter());

    expr::expr()
        .then_ignore(chumsky::primitive::end())
        .parse(stream)
        .map_err(|errors| anyhow!(combine_errors(errors.into_iter().map(convert_error))))
}

/// Parse a lambda source string, requiring a top-level arrow function.
pub fn parse_lambda(source: &str) -> Result<Arrow> {
    let expr = parse(source)?;
    let span = expr.span;
    match expr.kind.into_arrow() {
        Ok(arrow) => Ok(arrow),
        Err(kind) => Err(Error::new(Reason::Structural(format!(
            "expected an arrow function, but found {}",
            kind.name()
        )))
        .with_span(span)
        .into()),
    }
}

fn combine_errors(errors: impl Iterator<Item = Error>) -> Error {
    // Subsequent errors are usually cascades of the first.
    errors.into_iter().next().unwrap_or_else(|| {
        Error::new(Reason::Simple("unknown parse error".to_string()))
    })
}

fn convert_error(e: chumsky::prelude::Simple<Token>) -> Error {
    let span = Some(Span {
        start: e.span().start,
        end: e.span().end,
    });

    if let SimpleReason::Custom(message) = e.reason() {
        return Error::new_simple(message).with_span(span);
    }

    let expected = e
        .expected()
        .filter_map(|t| t.as_ref().map(|e| e.to_string()))
        .collect_vec();

    let found = e
        .found()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "end of input".to_string());

    if expected.is_empty() || expected.len() > 10 {
        Error::new(Reason::Unexpected { found })
    } else {
        let expected = expected.join(", ");

        Error::new(Reason::Expected {
            who: None,
            expected,
            found,
        })
    }
    .with_span(span)
}

fn convert_char_error(e: chumsky::prelude::Simple<char>) -> Error {
    let span = Some(Span {
        start: e.span().start,
        end: e.span().end,
    });

    let found = e
        .found()
        .map(|c| format!("`{c}`"))
        .unwrap_or_else(|| "end of input".to_string());

    Error::new(Reason::Unexpected { found }).with_span(span)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::source::{BinOp, ExprKind};

    #[test]
    fn test_parse_simple_chain() {
        let arrow = parse_lambda("(q, p) => q.from('users').where(u => u.age >= p.min)").unwrap();
        assert_eq!(arrow.params, vec!["q", "p"]);

        let call = arrow.body.kind.as_call().unwrap();
        let callee = call.0.kind.as_member().unwrap();
        assert_eq!(callee.1, "where");
    }

    #[test]
    fn test_parse_rejects_non_lambda() {
        let err = parse_lambda("1 + 2").unwrap_err();
        assert!(err
            .to_string()
            .contains("expected an arrow function, but found binary expression"));
    }

    #[test]
    fn test_parse_precedence_groups_or_below_and() {
        let arrow = parse_lambda("u => u.a && u.b || u.c").unwrap();
        let binary = arrow.body.kind.as_binary().unwrap();
        assert_eq!(*binary.1, BinOp::Or);
    }

    #[test]
    fn test_parse_object_in_parens() {
        let arrow = parse_lambda("u => ({ id: u.id, active: true, ...u })").unwrap();
        match &arrow.body.kind {
            ExprKind::Object(entries) => assert_eq!(entries.len(), 3),
            other => panic!("expected object literal, found {}", other.name()),
        }
    }

    #[test]
    fn test_parse_optional_chaining_is_transparent() {
        let a = parse_lambda("u => u?.name").unwrap();
        let b = parse_lambda("u => u.name").unwrap();
        assert_eq!(a.body, b.body);
    }

    #[test]
    fn test_parse_ternary() {
        let arrow = parse_lambda("u => u.age >= 18 ? 'adult' : 'minor'").unwrap();
        assert!(arrow.body.kind.is_conditional());
    }
}
