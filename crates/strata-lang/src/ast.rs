//! Abstract syntax tree for filter expressions.

use crate::span::{Span, Spanned};

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// All sub-expressions must hold.
    And(Vec<FilterExpr>),
    /// At least one sub-expression must hold.
    Or(Vec<FilterExpr>),
    /// `field <op> value`.
    Comparison {
        field: Spanned<String>,
        op: ComparisonOp,
        value: Spanned<Literal>,
    },
    /// `field =in= (a, b, ...)` or `field =out= (a, b, ...)`.
    In {
        field: Spanned<String>,
        values: Vec<Spanned<Literal>>,
        negated: bool,
    },
}

impl FilterExpr {
    /// Source span covered by this expression.
    pub fn span(&self) -> Span {
        match self {
            FilterExpr::And(parts) | FilterExpr::Or(parts) => parts
                .iter()
                .map(FilterExpr::span)
                .reduce(Span::merge)
                .unwrap_or_default(),
            FilterExpr::Comparison { field, value, .. } => field.span.merge(value.span),
            FilterExpr::In { field, values, .. } => values
                .iter()
                .fold(field.span, |acc, v| acc.merge(v.span)),
        }
    }

    /// Field names referenced anywhere in the expression.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterExpr::And(parts) | FilterExpr::Or(parts) => {
                for part in parts {
                    part.collect_fields(out);
                }
            }
            FilterExpr::Comparison { field, .. } | FilterExpr::In { field, .. } => {
                out.push(field.value.as_str())
            }
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    /// SQL spelling of the operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }
}

/// A literal value as written in the filter.
///
/// Values are untyped text; the consumer types them against the schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Unquoted word, e.g. `10` or `logKey-1`.
    Word(String),
    /// Single- or double-quoted string with escapes resolved.
    Quoted(String),
}

impl Literal {
    /// The literal's text.
    pub fn text(&self) -> &str {
        match self {
            Literal::Word(s) | Literal::Quoted(s) => s,
        }
    }
}
