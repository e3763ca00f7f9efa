//! Character-level lexer.
//!
//! Produces a spanned token stream for the token-level grammar. Keywords are
//! recognized case-insensitively; identifiers keep their original case. Time
//! units (`SECONDS`, `MINUTES`, ...) stay ordinary identifiers and are
//! interpreted during lowering, so they remain usable as field names.

use chumsky::prelude::*;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    // Keywords
    Select,
    From,
    Where,
    Join,
    On,
    Within,
    As,
    And,
    Or,
    Not,

    Ident(String),
    /// Raw number text; Int/Float promotion happens in the grammar.
    Number(String),
    /// String literal with quotes stripped and `''` unescaped.
    Str(String),

    // Comparison operators
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,

    LParen,
    RParen,
    Comma,
    Dot,
    Star,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Select => write!(f, "SELECT"),
            Token::From => write!(f, "FROM"),
            Token::Where => write!(f, "WHERE"),
            Token::Join => write!(f, "JOIN"),
            Token::On => write!(f, "ON"),
            Token::Within => write!(f, "WITHIN"),
            Token::As => write!(f, "AS"),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::Not => write!(f, "NOT"),
            Token::Ident(name) => write!(f, "{name}"),
            Token::Number(text) => write!(f, "{text}"),
            Token::Str(text) => write!(f, "'{text}'"),
            Token::Eq => write!(f, "="),
            Token::Neq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Lte => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Gte => write!(f, ">="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Star => write!(f, "*"),
        }
    }
}

fn keyword_or_ident(text: String) -> Token {
    match text.to_ascii_uppercase().as_str() {
        "SELECT" => Token::Select,
        "FROM" => Token::From,
        "WHERE" => Token::Where,
        "JOIN" => Token::Join,
        "ON" => Token::On,
        "WITHIN" => Token::Within,
        "AS" => Token::As,
        "AND" => Token::And,
        "OR" => Token::Or,
        "NOT" => Token::Not,
        _ => Token::Ident(text),
    }
}

pub(crate) fn lexer() -> impl Parser<char, Vec<(Token, std::ops::Range<usize>)>, Error = Simple<char>>
{
    let ident = filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .map(Some)
        .chain::<char, Vec<_>, _>(
            filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_').repeated(),
        )
        .collect::<String>()
        .map(keyword_or_ident);

    let exponent = one_of("eE").chain::<char, _, _>(
        one_of("+-")
            .or_not()
            .chain::<char, String, _>(text::digits(10)),
    );

    let number = text::digits(10)
        .chain::<char, _, _>(just('.').chain(text::digits(10)).or_not().flatten())
        .chain::<char, _, _>(exponent.or_not().flatten())
        .collect::<String>()
        .map(Token::Number);

    let string = just('\'')
        .ignore_then(
            just("''")
                .to('\'')
                .or(filter(|c: &char| *c != '\''))
                .repeated(),
        )
        .then_ignore(just('\''))
        .collect::<String>()
        .map(Token::Str);

    let operator = choice((
        just("!=").to(Token::Neq),
        just("<=").to(Token::Lte),
        just(">=").to(Token::Gte),
        just('=').to(Token::Eq),
        just('<').to(Token::Lt),
        just('>').to(Token::Gt),
    ));

    let control = choice((
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just(',').to(Token::Comma),
        just('.').to(Token::Dot),
        just('*').to(Token::Star),
    ));

    let token = choice((operator, number, string, ident, control));

    token
        .map_with_span(|token, span| (token, span))
        .padded()
        .repeated()
        .then_ignore(end())
}
