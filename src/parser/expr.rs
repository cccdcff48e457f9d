use chumsky::prelude::*;

use crate::ast::source::*;
use crate::error::Span;

use super::lexer::Token;

pub fn expr() -> impl Parser<Token, Expr, Error = Simple<Token>> + Clone {
    recursive(|expr| {
        let literal = select! { Token::Literal(lit) => ExprKind::Literal(lit) };

        let ident_kind = ident_part().map(ExprKind::Ident);

        let object_entry = choice((
            ctrl("...").ignore_then(expr.clone()).map(ObjectEntry::Spread),
            ident_part()
                .then_ignore(ctrl(":"))
                .then(expr.clone())
                .map(|(name, value)| ObjectEntry::Property { name, value }),
            // shorthand `{ name }`
            ident_part().map_with_span(|name, span| ObjectEntry::Property {
                name: name.clone(),
                value: into_expr(ExprKind::Ident(name), span),
            }),
        ));

        let object = object_entry
            .separated_by(ctrl(","))
            .allow_trailing()
            .delimited_by(ctrl("{"), ctrl("}"))
            .map(ExprKind::Object)
            .labelled("object literal");

        let array = expr
            .clone()
            .separated_by(ctrl(","))
            .allow_trailing()
            .delimited_by(ctrl("["), ctrl("]"))
            .map(ExprKind::Array)
            .labelled("array literal");

        let parenthesized = expr.clone().delimited_by(ctrl("("), ctrl(")"));

        let term = choice((literal, object, array, ident_kind))
            .map_with_span(into_expr)
            .or(parenthesized)
            .boxed();

        // Postfix chains: member access, optional-chaining member access
        // (transparent), calls, computed indexing.
        let postfix_op = choice((
            ctrl(".")
                .or(ctrl("?."))
                .ignore_then(ident_part())
                .map(Postfix::Member),
            expr.clone()
                .separated_by(ctrl(","))
                .allow_trailing()
                .delimited_by(ctrl("("), ctrl(")"))
                .map(Postfix::Call),
            expr.clone()
                .delimited_by(ctrl("["), ctrl("]"))
                .map(|index| Postfix::Index(Box::new(index))),
        ));

        let postfix = term
            .map_with_span(|e, s| (e, s))
            .then(postfix_op.map_with_span(|p, s| (p, s)).repeated())
            .foldl(|(object, obj_span), (op, op_span)| {
                let span = obj_span.start..op_span.end;
                let kind = match op {
                    Postfix::Member(property) => ExprKind::Member {
                        object: Box::new(object),
                        property,
                    },
                    Postfix::Call(args) => ExprKind::Call {
                        callee: Box::new(object),
                        args,
                    },
                    Postfix::Index(index) => ExprKind::Index {
                        object: Box::new(object),
                        index,
                    },
                };
                (into_expr(kind, span.clone()), span)
            })
            .map(|(e, _)| e)
            .boxed();

        // Unary operators
        let unary = operator_unary()
            .map_with_span(|op, span| (op, span))
            .repeated()
            .then(postfix)
            .foldr(|(op, span), e| {
                let span = span.start..e.span.map_or(span.end, |s| s.end);
                into_expr(
                    ExprKind::Unary {
                        op,
                        expr: Box::new(e),
                    },
                    span,
                )
            })
            .boxed();

        // Binary operators, tightest first
        let term = binary_op_parser(unary, operator_mul());
        let term = binary_op_parser(term, operator_add());
        let term = binary_op_parser(term, operator_compare());
        let term = binary_op_parser(term, operator_equality());
        let term = binary_op_parser(term, operator_coalesce());
        let term = binary_op_parser(term, operator_and());
        let term = binary_op_parser(term, operator_or());

        // Conditional (ternary); right-associative through the recursive arms.
        let conditional = term
            .map_with_span(|e, s| (e, s))
            .then(
                ctrl("?")
                    .ignore_then(expr.clone())
                    .then_ignore(ctrl(":"))
                    .then(expr.clone())
                    .or_not(),
            )
            .map(|((condition, span), arms)| match arms {
                None => condition,
                Some((then, otherwise)) => {
                    let end = otherwise.span.map_or(span.end, |s| s.end);
                    into_expr(
                        ExprKind::Conditional {
                            condition: Box::new(condition),
                            then: Box::new(then),
                            otherwise: Box::new(otherwise),
                        },
                        span.start..end,
                    )
                }
            });

        arrow(expr).or(conditional).boxed()
    })
}

enum Postfix {
    Member(String),
    Call(Vec<Expr>),
    Index(Box<Expr>),
}

fn arrow<E>(expr: E) -> impl Parser<Token, Expr, Error = Simple<Token>> + Clone
where
    E: Parser<Token, Expr, Error = Simple<Token>> + Clone,
{
    let params = ident_part()
        .map(|p| vec![p])
        .or(ident_part()
            .separated_by(ctrl(","))
            .allow_trailing()
            .delimited_by(ctrl("("), ctrl(")")));

    params
        .then_ignore(ctrl("=>"))
        .then(expr)
        .map(|(params, body)| {
            ExprKind::Arrow(Arrow {
                params,
                body: Box::new(body),
            })
        })
        .map_with_span(into_expr)
        .labelled("arrow function")
}

fn binary_op_parser<'a, Term, Op>(
    term: Term,
    op: Op,
) -> impl Parser<Token, Expr, Error = Simple<Token>> + Clone + 'a
where
    Term: Parser<Token, Expr, Error = Simple<Token>> + Clone + 'a,
    Op: Parser<Token, BinOp, Error = Simple<Token>> + Clone + 'a,
{
    let term = term.map_with_span(|e, s| (e, s)).boxed();

    (term.clone())
        .then(op.then(term).repeated())
        .foldl(|left, (op, right)| {
            let span = left.1.start..right.1.end;
            let kind = ExprKind::Binary {
                left: Box::new(left.0),
                op,
                right: Box::new(right.0),
            };
            (into_expr(kind, span.clone()), span)
        })
        .map(|(e, _)| e)
        .boxed()
}

pub fn ident_part() -> impl Parser<Token, String, Error = Simple<Token>> + Clone {
    select! { Token::Ident(ident) => ident }.labelled("identifier")
}

fn ctrl(chars: &str) -> impl Parser<Token, Token, Error = Simple<Token>> + Clone {
    just(Token::Control(chars.to_string()))
}

fn into_expr(kind: ExprKind, span: std::ops::Range<usize>) -> Expr {
    Expr {
        kind,
        span: Some(Span {
            start: span.start,
            end: span.end,
        }),
    }
}

fn operator_unary() -> impl Parser<Token, UnOp, Error = Simple<Token>> + Clone {
    (ctrl("!").to(UnOp::Not)).or(ctrl("-").to(UnOp::Neg))
}
fn operator_mul() -> impl Parser<Token, BinOp, Error = Simple<Token>> + Clone {
    (ctrl("*").to(BinOp::Mul))
        .or(ctrl("/").to(BinOp::Div))
        .or(ctrl("%").to(BinOp::Mod))
}
fn operator_add() -> impl Parser<Token, BinOp, Error = Simple<Token>> + Clone {
    (ctrl("+").to(BinOp::Add)).or(ctrl("-").to(BinOp::Sub))
}
fn operator_compare() -> impl Parser<Token, BinOp, Error = Simple<Token>> + Clone {
    (ctrl("<=").to(BinOp::Lte))
        .or(ctrl(">=").to(BinOp::Gte))
        .or(ctrl("<").to(BinOp::Lt))
        .or(ctrl(">").to(BinOp::Gt))
}
fn operator_equality() -> impl Parser<Token, BinOp, Error = Simple<Token>> + Clone {
    (ctrl("==").to(BinOp::Eq)).or(ctrl("!=").to(BinOp::Ne))
}
fn operator_coalesce() -> impl Parser<Token, BinOp, Error = Simple<Token>> + Clone {
    ctrl("??").to(BinOp::Coalesce)
}
fn operator_and() -> impl Parser<Token, BinOp, Error = Simple<Token>> + Clone {
    ctrl("&&").to(BinOp::And)
}
fn operator_or() -> impl Parser<Token, BinOp, Error = Simple<Token>> + Clone {
    ctrl("||").to(BinOp::Or)
}
