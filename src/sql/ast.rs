//! Statement AST and parse-tree lowering.
//!
//! The grammar produces a small concrete syntax tree ([`QueryCst`]) that is
//! still shape-checked: select items may be arbitrary expressions and join
//! windows carry raw token text. Lowering turns that into the statement AST,
//! accumulating every [`SemanticError`] instead of stopping at the first.

use crate::error::SemanticError;
use crate::sql::expr::Expr;
use chrono::Duration;

pub(crate) type Span = std::ops::Range<usize>;

// ── Statement AST ──────────────────────────────────────────────────────────

/// A projected column: `field`, `source.field`, `field AS alias` or `*`.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub source: Option<String>,
    pub field: String,
    pub alias: Option<String>,
}

impl Column {
    pub fn is_star(&self) -> bool {
        self.field == "*"
    }

    /// The field name this column projects, qualified by its source.
    pub fn lookup_key(&self) -> String {
        Expr::field_key(&self.source, &self.field)
    }
}

/// A relational input: a named stream, a filtered input, or a windowed join.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceNode {
    Stream {
        name: String,
        alias: Option<String>,
    },
    Where {
        input: Box<SourceNode>,
        predicate: Expr,
    },
    Join(JoinWindow),
}

/// A time-bounded join of two inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinWindow {
    pub lhs: Box<SourceNode>,
    pub rhs: Box<SourceNode>,
    pub within: Duration,
    pub on: Expr,
}

/// The top-level statement. The `source` may itself be a `Where` or `Join`
/// node; the select list always sits at the root.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub columns: Vec<Column>,
    pub source: SourceNode,
}

impl SelectStmt {
    /// `SELECT *` projects nothing away.
    pub fn is_wildcard(&self) -> bool {
        self.columns.iter().any(Column::is_star)
    }
}

// ── Concrete syntax tree (grammar output) ──────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) enum SelectItemCst {
    Star,
    Expr {
        expr: Expr,
        alias: Option<String>,
        span: Span,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct JoinCst {
    pub rhs: TableCst,
    pub on: Expr,
    pub magnitude: (String, Span),
    pub unit: (String, Span),
}

#[derive(Debug, Clone)]
pub(crate) struct TableCst {
    pub stream: String,
    pub alias: Option<String>,
    pub joins: Vec<JoinCst>,
}

#[derive(Debug, Clone)]
pub(crate) struct QueryCst {
    pub items: Vec<SelectItemCst>,
    pub table: TableCst,
    pub where_clause: Option<Expr>,
}

// ── Lowering ───────────────────────────────────────────────────────────────

struct Lowering<'a> {
    src: &'a str,
    errors: Vec<SemanticError>,
}

impl<'a> Lowering<'a> {
    fn error(&mut self, span: &Span, message: String) {
        let (line, column) = super::line_col(self.src, span.start);
        self.errors.push(SemanticError {
            line,
            column,
            message,
        });
    }

    fn lower_item(&mut self, item: SelectItemCst) -> Column {
        match item {
            SelectItemCst::Star => Column {
                source: None,
                field: "*".into(),
                alias: None,
            },
            SelectItemCst::Expr { expr, alias, span } => match expr {
                Expr::Field { source, name } => Column {
                    source,
                    field: name,
                    alias,
                },
                other => {
                    self.error(
                        &span,
                        format!("only column references are supported in the SELECT list, got {other:?}"),
                    );
                    Column {
                        source: None,
                        field: String::new(),
                        alias,
                    }
                }
            },
        }
    }

    fn lower_window(&mut self, magnitude: (String, Span), unit: (String, Span)) -> Duration {
        let amount: i64 = match magnitude.0.parse() {
            Ok(n) => n,
            Err(_) => {
                self.error(
                    &magnitude.1,
                    format!("join window magnitude must be an integer, got {}", magnitude.0),
                );
                1
            }
        };
        let unit_seconds = match unit.0.to_ascii_uppercase().as_str() {
            "SECOND" | "SECONDS" => 1,
            "MINUTE" | "MINUTES" => 60,
            "HOUR" | "HOURS" => 3_600,
            "DAY" | "DAYS" => 86_400,
            other => {
                self.error(&unit.1, format!("Unknown time unit: {other}"));
                1
            }
        };
        Duration::seconds(unit_seconds * amount)
    }

    fn lower_table(&mut self, table: TableCst) -> SourceNode {
        let mut node = SourceNode::Stream {
            name: table.stream,
            alias: table.alias,
        };
        // Chained joins nest left-associatively.
        for join in table.joins {
            let within = self.lower_window(join.magnitude, join.unit);
            let rhs = self.lower_table(join.rhs);
            node = SourceNode::Join(JoinWindow {
                lhs: Box::new(node),
                rhs: Box::new(rhs),
                within,
                on: join.on,
            });
        }
        node
    }
}

/// Lower the parse tree, accumulating semantic errors.
pub(crate) fn lower(cst: QueryCst, src: &str) -> Result<SelectStmt, Vec<SemanticError>> {
    let mut ctx = Lowering {
        src,
        errors: Vec::new(),
    };

    let columns = cst
        .items
        .into_iter()
        .map(|item| ctx.lower_item(item))
        .collect();

    let mut source = ctx.lower_table(cst.table);
    if let Some(predicate) = cst.where_clause {
        source = SourceNode::Where {
            input: Box::new(source),
            predicate,
        };
    }

    if ctx.errors.is_empty() {
        Ok(SelectStmt { columns, source })
    } else {
        Err(ctx.errors)
    }
}
