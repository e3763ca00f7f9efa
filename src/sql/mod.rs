//! SQL dialect front end.
//!
//! Parsing runs in three stages:
//! 1. [`lexer`] — character stream to spanned tokens (keywords folded
//!    case-insensitively).
//! 2. [`grammar`] — tokens to a concrete syntax tree, collecting every
//!    syntax error rather than stopping at the first.
//! 3. [`ast::lower`] — shape checks (time units, SELECT-list items) that
//!    accumulate semantic errors.
//!
//! Syntax and semantic failures are both fatal to the query; per-event
//! runtime failures never originate here.

pub mod ast;
pub mod expr;
mod grammar;
mod lexer;

pub use ast::{Column, JoinWindow, SelectStmt, SourceNode};
pub use expr::{EvalFn, Expr, PredicateFn};

use crate::error::{StreamQlError, SyntaxError};
use chumsky::Stream;
use chumsky::error::{Simple, SimpleReason};
use chumsky::prelude::Parser;
use std::fmt;
use std::hash::Hash;

/// 1-based (line, column) of a char offset.
pub(crate) fn line_col(src: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for (i, c) in src.chars().enumerate() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

fn syntax_error<T: fmt::Display + Hash + Eq>(src: &str, error: &Simple<T>) -> SyntaxError {
    let (line, column) = line_col(src, error.span().start);
    let message = match error.reason() {
        SimpleReason::Custom(message) => message.clone(),
        _ => {
            let found = error
                .found()
                .map(|t| format!("'{t}'"))
                .unwrap_or_else(|| "end of input".to_string());
            let expected: Vec<String> = error
                .expected()
                .filter_map(|t| t.as_ref().map(|t| format!("'{t}'")))
                .collect();
            if expected.is_empty() {
                format!("unexpected {found}")
            } else {
                format!("expected {}, found {found}", expected.join(" or "))
            }
        }
    };
    SyntaxError {
        line,
        column,
        message,
    }
}

/// Parse a query. Returns the statement AST, or every syntax error
/// ([`StreamQlError::Parse`]) / semantic error ([`StreamQlError::Semantic`])
/// found in the text. Parsing is a pure function of the input.
pub fn parse(input: &str) -> Result<SelectStmt, StreamQlError> {
    let tokens = lexer::lexer().parse(input).map_err(|errors| {
        StreamQlError::Parse(errors.iter().map(|e| syntax_error(input, e)).collect())
    })?;

    let len = input.chars().count();
    let cst = grammar::query()
        .parse(Stream::from_iter(len..len + 1, tokens.into_iter()))
        .map_err(|errors| {
            StreamQlError::Parse(errors.iter().map(|e| syntax_error(input, e)).collect())
        })?;

    ast::lower(cst, input).map_err(StreamQlError::Semantic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn where_only_query() {
        let stmt = parse("SELECT StringPayload FROM streamA WHERE CorrelationID = 1").unwrap();
        assert_eq!(
            stmt.columns,
            vec![Column {
                source: None,
                field: "StringPayload".into(),
                alias: None,
            }]
        );
        let SourceNode::Where { input, predicate } = stmt.source else {
            panic!("expected WHERE at the root source");
        };
        assert_eq!(
            *input,
            SourceNode::Stream {
                name: "streamA".into(),
                alias: None,
            }
        );
        assert_eq!(
            predicate,
            Expr::Eq(
                Box::new(Expr::Field {
                    source: None,
                    name: "CorrelationID".into(),
                }),
                Box::new(Expr::Constant(Value::Int(1))),
            )
        );
    }

    #[test]
    fn unknown_time_unit_is_semantic() {
        let err = parse("SELECT x FROM s JOIN t ON s.k = t.k WITHIN 5 BANANAS").unwrap_err();
        let StreamQlError::Semantic(errors) = err else {
            panic!("expected semantic error, got {err:?}");
        };
        assert!(errors[0].message.contains("Unknown time unit"));
    }

    #[test]
    fn syntax_error_carries_position() {
        let err = parse("SELECT FROM").unwrap_err();
        let StreamQlError::Parse(errors) = err else {
            panic!("expected parse error, got {err:?}");
        };
        assert!(!errors.is_empty());
        assert_eq!(errors[0].line, 1);
    }

    #[test]
    fn line_col_spans_lines() {
        let src = "SELECT x\nFROM s";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 7), (1, 8));
        assert_eq!(line_col(src, 9), (2, 1));
    }
}
