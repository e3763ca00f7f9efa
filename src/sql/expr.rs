//! Expression AST and compilation.
//!
//! Expressions lower to pure closures over [`EventLike`], so predicate
//! evaluation in the hot path is a chain of direct calls with no tree
//! walking. Field lookups are resolved at runtime; absent fields evaluate to
//! `Null` rather than failing, matching the engine's schema-free model.

use crate::error::StreamQlError;
use crate::event::EventLike;
use crate::value::Value;
use std::sync::Arc;

/// A compiled expression: event in, value out.
pub type EvalFn = Arc<dyn Fn(&dyn EventLike) -> Result<Value, StreamQlError> + Send + Sync>;

/// A compiled predicate. Non-boolean results are a type mismatch.
pub type PredicateFn = Arc<dyn Fn(&dyn EventLike) -> Result<bool, StreamQlError> + Send + Sync>;

/// Expression AST. `!=` has no node of its own; the parser emits
/// `Negate(Eq(..))`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Lte(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Gte(Box<Expr>, Box<Expr>),
    /// A field reference, optionally qualified by a stream alias.
    Field {
        source: Option<String>,
        name: String,
    },
    Constant(Value),
}

fn binary(
    lhs: &Expr,
    rhs: &Expr,
    op: fn(&Value, &Value) -> Result<Value, StreamQlError>,
) -> EvalFn {
    let lhs = lhs.compile();
    let rhs = rhs.compile();
    Arc::new(move |event| op(&lhs(event)?, &rhs(event)?))
}

impl Expr {
    /// The runtime lookup key of a field reference: `source.field` when
    /// qualified, `field` otherwise.
    pub fn field_key(source: &Option<String>, name: &str) -> String {
        match source {
            Some(source) => format!("{source}.{name}"),
            None => name.to_string(),
        }
    }

    /// Lower this expression into an evaluable closure.
    pub fn compile(&self) -> EvalFn {
        match self {
            Expr::Field { source, name } => {
                let key = Expr::field_key(source, name);
                Arc::new(move |event| Ok(event.field(&key).unwrap_or(Value::Null)))
            }
            Expr::Constant(value) => {
                let value = value.clone();
                Arc::new(move |_| Ok(value.clone()))
            }
            Expr::Eq(l, r) => binary(l, r, Value::eq),
            Expr::Lt(l, r) => binary(l, r, Value::lt),
            Expr::Lte(l, r) => binary(l, r, Value::lte),
            Expr::Gt(l, r) => binary(l, r, Value::gt),
            Expr::Gte(l, r) => binary(l, r, Value::gte),
            Expr::And(l, r) => binary(l, r, Value::and),
            Expr::Or(l, r) => binary(l, r, Value::or),
            Expr::Negate(inner) => {
                let inner = inner.compile();
                Arc::new(move |event| inner(event)?.not())
            }
        }
    }

    /// Compile as a boolean predicate (WHERE / ON position).
    pub fn compile_predicate(&self) -> PredicateFn {
        let eval = self.compile();
        Arc::new(move |event| eval(event)?.into_bool())
    }

    /// Flatten the top-level AND chain into its conjuncts. A non-AND
    /// expression is its own single conjunct. Used by the join builder to
    /// decompose ON clauses.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(l, r) => {
                let mut out = l.conjuncts();
                out.extend(r.conjuncts());
                out
            }
            other => vec![other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use chrono::Utc;
    use std::collections::HashMap;

    fn event(pairs: &[(&str, Value)]) -> Event {
        let data: HashMap<String, Value> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Event::new(Utc::now(), data)
    }

    fn field(name: &str) -> Box<Expr> {
        Box::new(Expr::Field {
            source: None,
            name: name.into(),
        })
    }

    fn constant(v: Value) -> Box<Expr> {
        Box::new(Expr::Constant(v))
    }

    #[test]
    fn field_lookup_and_comparison() {
        let ev = event(&[("x", Value::Int(3))]);
        let expr = Expr::Eq(field("x"), constant(Value::Int(3)));
        let pred = expr.compile_predicate();
        assert!(pred(&ev).unwrap());

        let expr = Expr::Lt(field("x"), constant(Value::Int(2)));
        assert!(!expr.compile_predicate()(&ev).unwrap());
    }

    #[test]
    fn absent_field_is_null() {
        let ev = event(&[]);
        let eval = field("missing").compile();
        assert_eq!(eval(&ev).unwrap(), Value::Null);

        // Null = 3 is false, so the predicate simply rejects.
        let pred = Expr::Eq(field("missing"), constant(Value::Int(3))).compile_predicate();
        assert!(!pred(&ev).unwrap());
    }

    #[test]
    fn qualified_field_uses_dotted_key() {
        let ev = event(&[("a.x", Value::Str("hit".into()))]);
        let expr = Expr::Field {
            source: Some("a".into()),
            name: "x".into(),
        };
        assert_eq!(expr.compile()(&ev).unwrap(), Value::Str("hit".into()));
    }

    #[test]
    fn boolean_combinators() {
        let ev = event(&[("x", Value::Int(1)), ("y", Value::Int(2))]);
        let x_is_1 = Expr::Eq(field("x"), constant(Value::Int(1)));
        let y_is_9 = Expr::Eq(field("y"), constant(Value::Int(9)));

        let and = Expr::And(Box::new(x_is_1.clone()), Box::new(y_is_9.clone()));
        assert!(!and.compile_predicate()(&ev).unwrap());

        let or = Expr::Or(Box::new(x_is_1.clone()), Box::new(y_is_9.clone()));
        assert!(or.compile_predicate()(&ev).unwrap());

        let negated = Expr::Negate(Box::new(y_is_9));
        assert!(negated.compile_predicate()(&ev).unwrap());
    }

    #[test]
    fn non_boolean_predicate_is_type_mismatch() {
        let ev = event(&[("x", Value::Int(1))]);
        let pred = field("x").compile_predicate();
        assert!(matches!(
            pred(&ev),
            Err(StreamQlError::TypeMismatch(_))
        ));
    }

    #[test]
    fn conjunct_flattening() {
        let a = Expr::Eq(field("a"), field("b"));
        let b = Expr::Eq(field("c"), field("d"));
        let c = Expr::Eq(field("e"), field("f"));
        let chain = Expr::And(
            Box::new(Expr::And(Box::new(a.clone()), Box::new(b.clone()))),
            Box::new(c.clone()),
        );
        assert_eq!(chain.conjuncts(), vec![&a, &b, &c]);
        assert_eq!(a.conjuncts(), vec![&a]);
    }
}
