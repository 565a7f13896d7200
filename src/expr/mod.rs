//! Expression language for computed columns.
//!
//! User strings such as `if(x > 0, log(x), lag(x, 0))` are parsed into an
//! owned [`Expr`] tree and evaluated against a pipeline's raw columns by
//! [`eval::Evaluator`]. Parsing and evaluation are separate phases so one
//! tree can be reused across pipelines or loop iterations; loop variables
//! are bound in the evaluator's environment instead of being spliced into
//! the tree.
//!
//! The grammar lives in `expression.pest`. Operator precedence, from
//! loosest to tightest: `||`, `&&`, comparisons, `+ -`, `* /`, `^`
//! (right-associative), unary minus. Single-quoted tokens are dates when
//! they parse as `CCYYMMDD` or `MM/DD/CCYY`, otherwise strings.

mod builtins;
mod eval;

pub use builtins::{lookup_builtin, ArgClass, Builtin, BuiltinLevel};
pub use eval::{add_computed, add_loop_fields, Evaluator};

use chrono::NaiveDate;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;
use std::sync::OnceLock;

use crate::frame::FrameError;
use crate::raw::{BinOp, CmpOp, RawError, Value};

pub type ExprResult<T> = Result<T, ExprError>;

#[derive(Parser)]
#[grammar = "expr/expression.pest"]
struct ExprParser;

/// Errors from parsing or evaluating an expression.
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("could not parse '{input}': {cause}")]
    Parse { input: String, cause: String },

    #[error("'{0}' is not a known function")]
    UnknownFunction(String),

    #[error("{function} takes {expected} argument(s), got {got}")]
    Arity { function: String, expected: usize, got: usize },

    #[error("argument {index} of {function} must be {expected}")]
    ArgKind { function: String, index: usize, expected: &'static str },

    #[error("'{0}' is not a field of the pipeline or a bound variable")]
    UnknownField(String),

    #[error(transparent)]
    Raw(#[from] RawError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl ExprError {
    pub fn parse<I: Into<String>, C: Into<String>>(input: I, cause: C) -> Self {
        Self::Parse { input: input.into(), cause: cause.into() }
    }

    pub fn unknown_function<S: Into<String>>(name: S) -> Self {
        Self::UnknownFunction(name.into())
    }

    pub fn arity<S: Into<String>>(function: S, expected: usize, got: usize) -> Self {
        Self::Arity { function: function.into(), expected, got }
    }

    pub fn arg_kind<S: Into<String>>(function: S, index: usize, expected: &'static str) -> Self {
        Self::ArgKind { function: function.into(), index, expected }
    }

    pub fn unknown_field<S: Into<String>>(name: S) -> Self {
        Self::UnknownField(name.into())
    }
}

/// A parsed expression tree. Trees are immutable once built; evaluation
/// never writes back into them.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// A quoted literal: a date when it parses as one, else a string.
    Literal(Value),
    /// An identifier resolved against the pipeline (or the evaluator's
    /// environment) at evaluation time.
    Field(String),
    Neg(Box<Expr>),
    Binary { op: ExprOp, left: Box<Expr>, right: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
}

/// A binary operator node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExprOp {
    Arith(BinOp),
    Cmp(CmpOp),
    And,
    Or,
}

/// Parse one expression string into a tree.
pub fn parse_expr(input: &str) -> ExprResult<Expr> {
    let mut pairs = ExprParser::parse(Rule::expression, input)
        .map_err(|e| ExprError::parse(input, e.to_string()))?;
    let expression = pairs.next().expect("a successful parse yields the expression rule");
    let expr_pair = expression
        .into_inner()
        .next()
        .expect("the expression rule contains the expr rule");
    build_expr(expr_pair.into_inner(), input)
}

fn pratt() -> &'static PrattParser<Rule> {
    static PRATT: OnceLock<PrattParser<Rule>> = OnceLock::new();
    PRATT.get_or_init(|| {
        PrattParser::new()
            .op(Op::infix(Rule::or_op, Assoc::Left))
            .op(Op::infix(Rule::and_op, Assoc::Left))
            .op(Op::infix(Rule::eq_op, Assoc::Left)
                | Op::infix(Rule::ne_op, Assoc::Left)
                | Op::infix(Rule::lt_op, Assoc::Left)
                | Op::infix(Rule::le_op, Assoc::Left)
                | Op::infix(Rule::gt_op, Assoc::Left)
                | Op::infix(Rule::ge_op, Assoc::Left))
            .op(Op::infix(Rule::add_op, Assoc::Left) | Op::infix(Rule::sub_op, Assoc::Left))
            .op(Op::infix(Rule::mul_op, Assoc::Left) | Op::infix(Rule::div_op, Assoc::Left))
            .op(Op::infix(Rule::pow_op, Assoc::Right))
            .op(Op::prefix(Rule::neg_op))
    })
}

fn build_expr(pairs: Pairs<'_, Rule>, input: &str) -> ExprResult<Expr> {
    pratt()
        .map_primary(|p| build_primary(p, input))
        .map_prefix(|op, rhs| match op.as_rule() {
            Rule::neg_op => Ok(Expr::Neg(Box::new(rhs?))),
            r => Err(ExprError::parse(input, format!("unexpected prefix {r:?}"))),
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::or_op => ExprOp::Or,
                Rule::and_op => ExprOp::And,
                Rule::eq_op => ExprOp::Cmp(CmpOp::Eq),
                Rule::ne_op => ExprOp::Cmp(CmpOp::Ne),
                Rule::lt_op => ExprOp::Cmp(CmpOp::Lt),
                Rule::le_op => ExprOp::Cmp(CmpOp::Le),
                Rule::gt_op => ExprOp::Cmp(CmpOp::Gt),
                Rule::ge_op => ExprOp::Cmp(CmpOp::Ge),
                Rule::add_op => ExprOp::Arith(BinOp::Add),
                Rule::sub_op => ExprOp::Arith(BinOp::Sub),
                Rule::mul_op => ExprOp::Arith(BinOp::Mul),
                Rule::div_op => ExprOp::Arith(BinOp::Div),
                Rule::pow_op => ExprOp::Arith(BinOp::Pow),
                r => return Err(ExprError::parse(input, format!("unexpected operator {r:?}"))),
            };
            Ok(Expr::Binary { op, left: Box::new(lhs?), right: Box::new(rhs?) })
        })
        .parse(pairs)
}

fn build_primary(p: Pair<'_, Rule>, input: &str) -> ExprResult<Expr> {
    match p.as_rule() {
        Rule::number => {
            let text = p.as_str();
            let v = text
                .parse::<f64>()
                .map_err(|_| ExprError::parse(input, format!("bad number '{text}'")))?;
            Ok(Expr::Number(v))
        }
        Rule::literal => {
            let quoted = p.as_str();
            let inner = &quoted[1..quoted.len() - 1];
            Ok(Expr::Literal(literal_value(inner)))
        }
        Rule::ident => Ok(Expr::Field(p.as_str().to_string())),
        Rule::call => {
            let mut inner = p.into_inner();
            let name = inner
                .next()
                .expect("a call starts with its function name")
                .as_str()
                .to_string();
            let args = inner
                .map(|arg| build_expr(arg.into_inner(), input))
                .collect::<ExprResult<Vec<_>>>()?;
            Ok(Expr::Call { name, args })
        }
        Rule::expr => build_expr(p.into_inner(), input),
        r => Err(ExprError::parse(input, format!("unexpected token {r:?}"))),
    }
}

/// Interpret a quoted literal: `CCYYMMDD` and `MM/DD/CCYY` forms become
/// dates, everything else stays a string.
fn literal_value(inner: &str) -> Value {
    let date = NaiveDate::parse_from_str(inner, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(inner, "%m/%d/%Y"));
    match date {
        Ok(d) => Value::Date(d),
        Err(_) => Value::Str(inner.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_precedence() {
        let tree = parse_expr("1 + 2 * 3").unwrap();
        match tree {
            Expr::Binary { op: ExprOp::Arith(BinOp::Add), right, .. } => {
                assert!(matches!(*right, Expr::Binary { op: ExprOp::Arith(BinOp::Mul), .. }));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_parse_pow_right_assoc() {
        let tree = parse_expr("2 ^ 3 ^ 2").unwrap();
        match tree {
            Expr::Binary { op: ExprOp::Arith(BinOp::Pow), left, right } => {
                assert_eq!(*left, Expr::Number(2.0));
                assert!(matches!(*right, Expr::Binary { op: ExprOp::Arith(BinOp::Pow), .. }));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_parse_call_and_comparison() {
        let tree = parse_expr("if(x > 0, log(x), lag(x, 0))").unwrap();
        match tree {
            Expr::Call { name, args } => {
                assert_eq!(name, "if");
                assert_eq!(args.len(), 3);
                assert!(matches!(&args[0], Expr::Binary { op: ExprOp::Cmp(CmpOp::Gt), .. }));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn test_parse_unary_minus() {
        let tree = parse_expr("-(x + 1)").unwrap();
        assert!(matches!(tree, Expr::Neg(_)));

        let tree = parse_expr("-x ^ 2").unwrap();
        // unary minus binds tighter than any infix operator here
        assert!(matches!(tree, Expr::Binary { op: ExprOp::Arith(BinOp::Pow), .. }));
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(
            parse_expr("'hello'").unwrap(),
            Expr::Literal(Value::Str("hello".into()))
        );
        assert_eq!(
            parse_expr("'20240315'").unwrap(),
            Expr::Literal(Value::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()))
        );
        assert_eq!(
            parse_expr("'03/15/2024'").unwrap(),
            Expr::Literal(Value::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()))
        );
    }

    #[test]
    fn test_parse_unbalanced_parens() {
        assert!(matches!(parse_expr("(1 + 2"), Err(ExprError::Parse { .. })));
        assert!(matches!(parse_expr("f(1, 2"), Err(ExprError::Parse { .. })));
    }

    #[test]
    fn test_parse_logicals() {
        let tree = parse_expr("x > 0 && y < 1 || z == 2").unwrap();
        // `||` is the loosest operator, so it is the root
        assert!(matches!(tree, Expr::Binary { op: ExprOp::Or, .. }));
    }
}
