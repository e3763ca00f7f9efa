//! Token-level grammar.
//!
//! Operator precedence is encoded by layering: OR is weakest, then AND, NOT,
//! comparison, and finally primaries. `!=` lowers to `Negate(Eq(..))` right
//! here; every other comparison operator maps to its own node.

use chumsky::prelude::*;

use super::ast::{JoinCst, QueryCst, SelectItemCst, TableCst};
use super::lexer::Token;
use crate::sql::expr::Expr;
use crate::value::Value;

fn ident() -> impl Parser<Token, String, Error = Simple<Token>> + Clone {
    select! { Token::Ident(name) => name }
}

/// `AS? IDENTIFIER`, as a whole optional. Keywords are distinct tokens, so a
/// following `FROM` / `JOIN` / `WHERE` never parses as an alias.
fn alias() -> impl Parser<Token, Option<String>, Error = Simple<Token>> + Clone {
    just(Token::As).or_not().ignore_then(ident()).or_not()
}

/// Number literal promotion: integer-looking text (no `.`, `e`, `E`) that
/// fits an i64 becomes `Int`; everything else becomes `Float`.
fn number_value(text: &str) -> Option<Value> {
    if !text.contains(['.', 'e', 'E']) {
        if let Ok(int) = text.parse::<i64>() {
            return Some(Value::Int(int));
        }
    }
    text.parse::<f64>().map(Value::Float).ok()
}

pub(crate) fn expression() -> impl Parser<Token, Expr, Error = Simple<Token>> + Clone {
    recursive(|expr| {
        let constant = select! { Token::Str(text) => Expr::Constant(Value::Str(text)) }.or(
            select! { Token::Number(text) => text }.try_map(|text, span| {
                number_value(&text)
                    .map(Expr::Constant)
                    .ok_or_else(|| Simple::custom(span, format!("invalid number: {text}")))
            }),
        );

        let field = ident()
            .then(just(Token::Dot).ignore_then(ident()).or_not())
            .map(|(first, rest)| match rest {
                Some(name) => Expr::Field {
                    source: Some(first),
                    name,
                },
                None => Expr::Field {
                    source: None,
                    name: first,
                },
            });

        let primary = choice((
            expr.delimited_by(just(Token::LParen), just(Token::RParen)),
            constant,
            field,
        ));

        let comparison = primary
            .clone()
            .then(
                one_of([
                    Token::Eq,
                    Token::Neq,
                    Token::Lte,
                    Token::Gte,
                    Token::Lt,
                    Token::Gt,
                ])
                .then(primary)
                .or_not(),
            )
            .map(|(lhs, rest)| match rest {
                None => lhs,
                Some((op, rhs)) => {
                    let (lhs, rhs) = (Box::new(lhs), Box::new(rhs));
                    match op {
                        Token::Eq => Expr::Eq(lhs, rhs),
                        Token::Neq => Expr::Negate(Box::new(Expr::Eq(lhs, rhs))),
                        Token::Lt => Expr::Lt(lhs, rhs),
                        Token::Lte => Expr::Lte(lhs, rhs),
                        Token::Gt => Expr::Gt(lhs, rhs),
                        Token::Gte => Expr::Gte(lhs, rhs),
                        _ => unreachable!("comparison operator set is closed"),
                    }
                }
            });

        let negated = just(Token::Not)
            .repeated()
            .then(comparison)
            .foldr(|_not, operand| Expr::Negate(Box::new(operand)));

        let conjunction = negated
            .clone()
            .then(just(Token::And).ignore_then(negated).repeated())
            .foldl(|lhs, rhs| Expr::And(Box::new(lhs), Box::new(rhs)));

        conjunction
            .clone()
            .then(just(Token::Or).ignore_then(conjunction).repeated())
            .foldl(|lhs, rhs| Expr::Or(Box::new(lhs), Box::new(rhs)))
    })
}

fn table_expression() -> impl Parser<Token, TableCst, Error = Simple<Token>> {
    let base = ident().then(alias()).map(|(stream, alias)| TableCst {
        stream,
        alias,
        joins: Vec::new(),
    });

    // A join's right side is a base stream reference; chained JOIN clauses
    // belong to the outermost table and nest left-associatively.
    let join_clause = just(Token::Join)
        .ignore_then(base.clone())
        .then_ignore(just(Token::On))
        .then(expression())
        .then_ignore(just(Token::Within))
        .then(select! { Token::Number(text) => text }.map_with_span(|text, span| (text, span)))
        .then(ident().map_with_span(|text, span| (text, span)))
        .map(|(((rhs, on), magnitude), unit)| JoinCst {
            rhs,
            on,
            magnitude,
            unit,
        });

    base.then(join_clause.repeated())
        .map(|(mut table, joins)| {
            table.joins = joins;
            table
        })
}

fn select_item() -> impl Parser<Token, SelectItemCst, Error = Simple<Token>> {
    let star = just(Token::Star).to(SelectItemCst::Star);
    let item = expression()
        .map_with_span(|expr, span| (expr, span))
        .then(alias())
        .map(|((expr, span), alias)| SelectItemCst::Expr { expr, alias, span });
    star.or(item)
}

pub(crate) fn query() -> impl Parser<Token, QueryCst, Error = Simple<Token>> {
    just(Token::Select)
        .ignore_then(
            select_item()
                .separated_by(just(Token::Comma))
                .at_least(1),
        )
        .then_ignore(just(Token::From))
        .then(table_expression())
        .then(just(Token::Where).ignore_then(expression()).or_not())
        .then_ignore(end())
        .map(|((items, table), where_clause)| QueryCst {
            items,
            table,
            where_clause,
        })
}
