//! Evaluation of parsed expressions against a pipeline.
//!
//! The evaluator resolves identifiers against a binding environment
//! first and the frame's raw columns second, so loop variables can
//! shadow nothing and field reads always copy: an expression can never
//! mutate the pipeline it reads from.

use chrono::{Duration, NaiveDate};
use indexmap::IndexMap;
use itertools::Itertools;
use log::info;

use super::builtins::{lookup_builtin, Builtin};
use super::{parse_expr, Expr, ExprError, ExprOp, ExprResult};
use crate::frame::Frame;
use crate::pipeline::Pipeline;
use crate::raw::{broadcast_len, delta, AggOp, BinOp, Kind, Raw, RawError, Value};

/// Walks an expression tree against one frame plus a set of local
/// bindings.
pub struct Evaluator<'a> {
    frame: &'a Frame,
    env: IndexMap<String, Raw>,
}

impl<'a> Evaluator<'a> {
    pub fn new(frame: &'a Frame) -> Self {
        Self { frame, env: IndexMap::new() }
    }

    /// Bind `name` to a fixed buffer; bindings win over frame fields.
    pub fn bind<S: Into<String>>(&mut self, name: S, raw: Raw) {
        self.env.insert(name.into(), raw);
    }

    pub fn evaluate(&self, expr: &Expr) -> ExprResult<Raw> {
        match expr {
            Expr::Number(v) => Ok(Raw::F64(vec![*v])),
            Expr::Literal(value) => {
                let mut raw = Raw::alloc(0, value.kind());
                raw.push(value.clone())?;
                Ok(raw)
            }
            Expr::Field(name) => self.resolve(name),
            Expr::Neg(inner) => Ok(self.evaluate(inner)?.neg()?),
            Expr::Binary { op, left, right } => {
                let l = self.evaluate(left)?;
                let r = self.evaluate(right)?;
                self.binary(*op, &l, &r)
            }
            Expr::Call { name, args } => {
                let builtin = lookup_builtin(name)
                    .ok_or_else(|| ExprError::unknown_function(name))?;
                if args.len() != builtin.arity() {
                    return Err(ExprError::arity(name, builtin.arity(), args.len()));
                }
                let values = args
                    .iter()
                    .map(|a| self.evaluate(a))
                    .collect::<ExprResult<Vec<_>>>()?;
                check_args(builtin, &values)?;
                dispatch(builtin, &values)
            }
        }
    }

    fn resolve(&self, name: &str) -> ExprResult<Raw> {
        if let Some(raw) = self.env.get(name) {
            return Ok(raw.clone());
        }
        if self.frame.column(name).is_none() {
            return Err(ExprError::unknown_field(name));
        }
        Ok(self.frame.raw_of(name)?)
    }

    fn binary(&self, op: ExprOp, l: &Raw, r: &Raw) -> ExprResult<Raw> {
        match op {
            ExprOp::Arith(op) => Ok(l.binary(r, op)?),
            ExprOp::Cmp(op) => {
                let bools = l.compare(r, op)?;
                Ok(Raw::F64(bools.into_iter().map(|b| f64::from(b)).collect()))
            }
            ExprOp::And | ExprOp::Or => {
                let a = l.as_f64_vec()?;
                let b = r.as_f64_vec()?;
                let n = broadcast_len("logical", a.len(), b.len())?;
                let (da, db) = (delta(a.len()), delta(b.len()));
                let out = (0..n)
                    .map(|i| {
                        let (x, y) = (a[i * da] != 0.0, b[i * db] != 0.0);
                        let v = match op {
                            ExprOp::And => x && y,
                            _ => x || y,
                        };
                        f64::from(v)
                    })
                    .collect();
                Ok(Raw::F64(out))
            }
        }
    }
}

fn check_args(builtin: &Builtin, values: &[Raw]) -> ExprResult<()> {
    for (i, (class, raw)) in builtin.args.iter().zip(values).enumerate() {
        if !class.accepts(raw) {
            return Err(ExprError::arg_kind(builtin.name, i + 1, class.describe()));
        }
    }
    Ok(())
}

fn dispatch(builtin: &Builtin, args: &[Raw]) -> ExprResult<Raw> {
    let out = match builtin.name {
        "exp" => args[0].exp()?,
        "log" => args[0].log()?,
        "pow" => args[0].binary(&args[1], BinOp::Pow)?,
        "lag" => eval_lag(&args[0], &args[1])?,
        "if" => eval_if(&args[0], &args[1], &args[2])?,
        "row" => Raw::F64((0..args[0].len()).map(|i| i as f64).collect()),
        "cat" => {
            let v = args[0].as_f64_vec()?;
            Raw::I64(v.into_iter().map(|x| x.trunc() as i64).collect())
        }
        "toInt" => {
            let v = args[0].as_f64_vec()?;
            Raw::I64(v.into_iter().map(|x| x.trunc() as i64).collect())
        }
        "toFloat" => Raw::F64(args[0].as_f64_vec()?),
        "toString" => Raw::Str(args[0].values().iter().map(|v| v.to_string()).collect()),
        "toDate" => eval_to_date(&args[0])?,
        "dateAdd" => eval_date_add(&args[0], &args[1])?,
        "countBefore" => args[0].cume_before(AggOp::Count)?,
        "countAfter" => args[0].cume_after(AggOp::Count)?,
        "cumeBefore" => args[0].cume_before(AggOp::Sum)?,
        "cumeAfter" => args[0].cume_after(AggOp::Sum)?,
        "prodBefore" => args[0].cume_before(AggOp::Product)?,
        "prodAfter" => args[0].cume_after(AggOp::Product)?,
        "index" => {
            let idx = args[1].as_f64_vec()?;
            let idx = Raw::I64(idx.into_iter().map(|x| x.trunc() as i64).collect());
            args[0].index(&idx)?
        }
        "range" => eval_range(&args[0], &args[1])?,
        "mean" => args[0].mean()?,
        "std" => args[0].std()?,
        "sum" => args[0].sum()?,
        "count" => Raw::F64(vec![args[0].len() as f64]),
        "min" => args[0].min()?,
        "max" => args[0].max()?,
        "sse" => Raw::F64(vec![sse_of(&args[0], &args[1])?]),
        "mad" => eval_mad(&args[0], &args[1])?,
        "r2" => eval_r2(&args[0], &args[1])?,
        "npv" => eval_npv(&args[0], &args[1])?,
        "irr" => eval_irr(&args[0], &args[1])?,
        "print" => eval_print(&args[0], &args[1])?,
        "printIf" => eval_print_if(&args[0], &args[1], &args[2])?,
        other => return Err(ExprError::unknown_function(other)),
    };
    Ok(out)
}

fn eval_lag(x: &Raw, missing: &Raw) -> ExprResult<Raw> {
    let m = missing.get(0)?;
    if m.kind() == x.kind() {
        return Ok(x.lag(m)?);
    }
    // mixed numeric kinds lag through floats
    if x.kind().is_numeric() && m.kind().is_numeric() {
        let floats = Raw::F64(x.as_f64_vec()?);
        return Ok(floats.lag(Value::F64(m.as_f64()?))?);
    }
    Err(RawError::kind_clash("lag", x.kind(), m.kind()).into())
}

fn eval_if(cond: &Raw, t: &Raw, f: &Raw) -> ExprResult<Raw> {
    let c = cond.as_f64_vec()?;
    let a = t.as_f64_vec()?;
    let b = f.as_f64_vec()?;
    let n = broadcast_len("if", c.len(), a.len())?;
    let n = broadcast_len("if", n, b.len())?;
    let (dc, da, db) = (delta(c.len()), delta(a.len()), delta(b.len()));
    let out = (0..n)
        .map(|i| if c[i * dc] != 0.0 { a[i * da] } else { b[i * db] })
        .collect();
    Ok(Raw::F64(out))
}

fn eval_to_date(x: &Raw) -> ExprResult<Raw> {
    if x.kind() == Kind::Date {
        return Ok(x.clone());
    }
    let mut out = Vec::with_capacity(x.len());
    for v in x.values() {
        let text = match v {
            Value::Str(s) => s,
            Value::I32(_) | Value::I64(_) => v.to_string(),
            Value::F64(x) => format!("{}", x.trunc() as i64),
            Value::F32(x) => format!("{}", x.trunc() as i64),
            Value::Date(d) => {
                out.push(d);
                continue;
            }
        };
        let date = NaiveDate::parse_from_str(&text, "%Y%m%d")
            .or_else(|_| NaiveDate::parse_from_str(&text, "%m/%d/%Y"))
            .or_else(|_| NaiveDate::parse_from_str(&text, "%Y-%m-%d"))
            .map_err(|_| RawError::bad_value(text, Kind::Date))?;
        out.push(date);
    }
    Ok(Raw::Date(out))
}

fn eval_date_add(dates: &Raw, days: &Raw) -> ExprResult<Raw> {
    let d = match dates {
        Raw::Date(d) => d,
        _ => return Err(RawError::kind_mismatch("dateAdd", dates.kind()).into()),
    };
    let offsets = days.as_f64_vec()?;
    let n = broadcast_len("dateAdd", d.len(), offsets.len())?;
    let (dd, doff) = (delta(d.len()), delta(offsets.len()));
    let out = (0..n)
        .map(|i| d[i * dd] + Duration::days(offsets[i * doff].trunc() as i64))
        .collect();
    Ok(Raw::Date(out))
}

fn eval_range(a: &Raw, b: &Raw) -> ExprResult<Raw> {
    let start = a.get(0)?.as_f64()?.trunc() as i64;
    let end = b.get(0)?.as_f64()?.trunc() as i64;
    if end <= start {
        return Err(RawError::domain("range", format!("[{start}, {end}) is empty")).into());
    }
    Ok(Raw::F64((start..end).map(|i| i as f64).collect()))
}

fn sse_of(y: &Raw, yhat: &Raw) -> ExprResult<f64> {
    let a = y.as_f64_vec()?;
    let b = yhat.as_f64_vec()?;
    let n = broadcast_len("sse", a.len(), b.len())?;
    let (da, db) = (delta(a.len()), delta(b.len()));
    Ok((0..n).map(|i| (a[i * da] - b[i * db]).powi(2)).sum())
}

fn eval_mad(y: &Raw, yhat: &Raw) -> ExprResult<Raw> {
    let a = y.as_f64_vec()?;
    let b = yhat.as_f64_vec()?;
    let n = broadcast_len("mad", a.len(), b.len())?;
    let (da, db) = (delta(a.len()), delta(b.len()));
    let total: f64 = (0..n).map(|i| (a[i * da] - b[i * db]).abs()).sum();
    Ok(Raw::F64(vec![total / n as f64]))
}

fn eval_r2(y: &Raw, yhat: &Raw) -> ExprResult<Raw> {
    let obs = y.as_f64_vec()?;
    let mean = obs.iter().sum::<f64>() / obs.len() as f64;
    let sst: f64 = obs.iter().map(|x| (x - mean).powi(2)).sum();
    if sst == 0.0 {
        return Err(RawError::domain("r2", "the observed values are constant").into());
    }
    let sse = sse_of(y, yhat)?;
    Ok(Raw::F64(vec![1.0 - sse / sst]))
}

/// Net present value: cash flows discounted from time zero.
fn eval_npv(discount: &Raw, cashflows: &Raw) -> ExprResult<Raw> {
    let rate = discount.get(0)?.as_f64()?;
    if rate <= -1.0 {
        return Err(RawError::domain("npv", format!("discount rate {rate} is at or below -1")).into());
    }
    let cf = cashflows.as_f64_vec()?;
    let npv = cf
        .iter()
        .enumerate()
        .map(|(t, &c)| c / (1.0 + rate).powi(t as i32))
        .sum();
    Ok(Raw::F64(vec![npv]))
}

/// Internal rate of return: the rate in (0, 1) at which the cash flows,
/// discounted from time one, are worth `cost`. Solved by bisection; the
/// discounted value is monotone decreasing in the rate.
fn eval_irr(cost: &Raw, cashflows: &Raw) -> ExprResult<Raw> {
    let cost = cost.get(0)?.as_f64()?;
    let cf = cashflows.as_f64_vec()?;
    let value = |r: f64| -> f64 {
        cf.iter()
            .enumerate()
            .map(|(t, &c)| c / (1.0 + r).powi(t as i32 + 1))
            .sum::<f64>()
            - cost
    };

    let (mut lo, mut hi) = (1e-9, 1.0);
    if value(lo) < 0.0 || value(hi) > 0.0 {
        return Err(
            RawError::domain("irr", "no rate in (0, 1) recovers the cost").into(),
        );
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if value(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 {
            break;
        }
    }
    Ok(Raw::F64(vec![0.5 * (lo + hi)]))
}

fn eval_print(x: &Raw, n: &Raw) -> ExprResult<Raw> {
    let n = n.get(0)?.as_f64()?;
    if n < 0.0 {
        return Err(RawError::domain("print", format!("cannot print {n} values")).into());
    }
    let count = (n.trunc() as usize).min(x.len());
    let shown = (0..count).map(|i| x.get(i).unwrap().to_string()).join(", ");
    info!("[{shown}]");
    Ok(Raw::F64(vec![count as f64]))
}

fn eval_print_if(cond: &Raw, x: &Raw, n: &Raw) -> ExprResult<Raw> {
    if cond.get(0)?.as_f64()? != 0.0 {
        eval_print(x, n)
    } else {
        Ok(Raw::F64(vec![0.0]))
    }
}

/// Evaluate `expr_str` against the pipeline and install the result as
/// the field `name`.
///
/// A one-element result is broadcast to the pipeline's row count. An
/// existing field of the same name is dropped first. Float results
/// become continuous columns; integer, string, and date results become
/// categorical ones.
pub fn add_computed(pipe: &mut dyn Pipeline, name: &str, expr_str: &str) -> ExprResult<()> {
    let expr = parse_expr(expr_str)?;
    add_expr_with_env(pipe, name, &expr, &IndexMap::new())
}

fn add_expr_with_env(
    pipe: &mut dyn Pipeline,
    name: &str,
    expr: &Expr,
    env: &IndexMap<String, Raw>,
) -> ExprResult<()> {
    let result = {
        let mut ev = Evaluator::new(pipe.frame());
        for (k, v) in env {
            ev.bind(k.clone(), v.clone());
        }
        ev.evaluate(expr)?
    };
    install_result(pipe, name, result)
}

fn install_result(pipe: &mut dyn Pipeline, name: &str, result: Raw) -> ExprResult<()> {
    let rows = pipe.frame().rows();
    let result = if result.len() == 1 && rows > 1 {
        let v = result.get(0)?;
        let mut big = Raw::alloc(0, result.kind());
        for _ in 0..rows {
            big.push(v.clone())?;
        }
        big
    } else {
        result
    };

    if pipe.frame().column(name).is_some() {
        pipe.frame_mut().drop_field(name)?;
    }
    if result.kind().is_float() {
        pipe.frame_mut().append_cts(&result, name, false, None)?;
    } else {
        pipe.frame_mut().append_cat(&result, name, None)?;
    }
    Ok(())
}

/// Evaluate a list of expressions once per value of a loop variable.
///
/// For each `v` in `[start, end)` the variable `var` is bound to the
/// one-element buffer `[v]` and each expression is evaluated and
/// installed under the matching name. Expressions may reference the
/// names they assign, which is how running aggregates are built up.
pub fn add_loop_fields(
    pipe: &mut dyn Pipeline,
    var: &str,
    start: i64,
    end: i64,
    names: &[&str],
    exprs: &[&str],
) -> ExprResult<()> {
    if names.len() != exprs.len() {
        return Err(ExprError::arity("loop assignment", names.len(), exprs.len()));
    }
    let trees = exprs
        .iter()
        .map(|e| parse_expr(e))
        .collect::<ExprResult<Vec<_>>>()?;

    for v in start..end {
        let mut env = IndexMap::new();
        env.insert(var.to_string(), Raw::F64(vec![v as f64]));
        for (name, tree) in names.iter().zip(&trees) {
            add_expr_with_env(pipe, name, tree, &env)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, PipelineSettings, VecPipeline};
    use crate::test_utils::letters_frame;
    use approx::assert_abs_diff_eq;

    fn eval_str(frame: &Frame, s: &str) -> ExprResult<Raw> {
        Evaluator::new(frame).evaluate(&parse_expr(s).unwrap())
    }

    fn scalar(frame: &Frame, s: &str) -> f64 {
        let raw = eval_str(frame, s).unwrap();
        assert_eq!(raw.len(), 1);
        raw.as_f64_vec().unwrap()[0]
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        let frame = letters_frame(false);
        assert_abs_diff_eq!(scalar(&frame, "1 + 2 * 3"), 7.0);
        assert_abs_diff_eq!(scalar(&frame, "(1 + 2) * 3"), 9.0);
        assert_abs_diff_eq!(scalar(&frame, "2 ^ 3 ^ 2"), 512.0);
        assert_abs_diff_eq!(scalar(&frame, "7 - 2 - 1"), 4.0);
    }

    #[test]
    fn test_field_reference_uses_raw_values() {
        let frame = letters_frame(false);
        // x0 is normalized in storage, but expressions see the raw scale
        let raw = eval_str(&frame, "x0 + 1").unwrap().as_f64_vec().unwrap();
        assert_eq!(raw.len(), 10);
        assert_abs_diff_eq!(raw[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(raw[9], 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_negation_matches_multiplication() {
        let frame = letters_frame(false);
        let negated = eval_str(&frame, "-(x0 + 1)").unwrap().as_f64_vec().unwrap();
        let scaled = eval_str(&frame, "(x0 + 1) * (0 - 1)").unwrap().as_f64_vec().unwrap();
        for (a, b) in negated.iter().zip(&scaled) {
            assert_abs_diff_eq!(a, b);
        }
    }

    #[test]
    fn test_cat_comparison_with_literal() {
        let frame = letters_frame(false);
        let is_c = eval_str(&frame, "x1 == 'c'").unwrap().as_f64_vec().unwrap();
        assert_eq!(is_c.len(), 10);
        assert_abs_diff_eq!(is_c.iter().sum::<f64>(), 5.0);
        assert_abs_diff_eq!(is_c[2], 1.0);
        assert_abs_diff_eq!(is_c[0], 0.0);
    }

    #[test]
    fn test_if_broadcasts() {
        let frame = letters_frame(false);
        let v = eval_str(&frame, "if(x0 > 4, 1, 0 - 1)").unwrap().as_f64_vec().unwrap();
        assert_eq!(v.len(), 10);
        assert_abs_diff_eq!(v[0], -1.0);
        assert_abs_diff_eq!(v[9], 1.0);
    }

    #[test]
    fn test_logical_operators() {
        let frame = letters_frame(false);
        let v = eval_str(&frame, "x0 > 2 && x0 < 7").unwrap().as_f64_vec().unwrap();
        assert_abs_diff_eq!(v.iter().sum::<f64>(), 4.0);
        let v = eval_str(&frame, "x0 < 1 || x0 > 8").unwrap().as_f64_vec().unwrap();
        assert_abs_diff_eq!(v.iter().sum::<f64>(), 2.0);
    }

    #[test]
    fn test_log_domain_error() {
        let frame = letters_frame(false);
        // x0 starts at zero, so log must refuse
        let err = eval_str(&frame, "log(x0)");
        assert!(matches!(err, Err(ExprError::Raw(RawError::Domain { .. }))));
    }

    #[test]
    fn test_logistic_objective_is_negative_scalar() {
        let mut frame = Frame::new(false);
        let y = Raw::from(vec![1.0, 0.0, 1.0, 1.0, 0.0, 1.0]);
        let p = Raw::from(vec![0.8, 0.3, 0.6, 0.9, 0.2, 0.7]);
        frame.append_cts(&y, "y", false, None).unwrap();
        frame.append_cts(&p, "p", false, None).unwrap();

        let ll = scalar(&frame, "sum(if(y > 0, log(p), log(1 - p)))");
        assert!(ll < 0.0);
    }

    #[test]
    fn test_summary_intrinsics() {
        let frame = letters_frame(false);
        assert_abs_diff_eq!(scalar(&frame, "mean(x0)"), 4.5, epsilon = 1e-9);
        assert_abs_diff_eq!(scalar(&frame, "sum(x0)"), 45.0, epsilon = 1e-9);
        assert_abs_diff_eq!(scalar(&frame, "count(x0)"), 10.0);
        assert_abs_diff_eq!(scalar(&frame, "max(x0) - min(x0)"), 9.0, epsilon = 1e-9);
        assert_abs_diff_eq!(scalar(&frame, "sse(x0, x0)"), 0.0);
        assert_abs_diff_eq!(scalar(&frame, "mad(x0, x0 + 1)"), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(scalar(&frame, "r2(x0, x0)"), 1.0);
    }

    #[test]
    fn test_windowed_intrinsics() {
        let frame = letters_frame(false);
        let v = eval_str(&frame, "cumeBefore(x0)").unwrap().as_f64_vec().unwrap();
        assert_abs_diff_eq!(v[0], 0.0);
        assert_abs_diff_eq!(v[9], 36.0, epsilon = 1e-9);

        let v = eval_str(&frame, "lag(x0, 0 - 1)").unwrap().as_f64_vec().unwrap();
        assert_abs_diff_eq!(v[0], -1.0);
        assert_abs_diff_eq!(v[1], 0.0, epsilon = 1e-9);

        let v = eval_str(&frame, "row(x1)").unwrap().as_f64_vec().unwrap();
        assert_abs_diff_eq!(v[3], 3.0);
    }

    #[test]
    fn test_npv_known_value() {
        let mut frame = Frame::new(false);
        frame
            .append_cts(&Raw::from(vec![100.0, 100.0, 100.0, 100.0]), "cf", false, None)
            .unwrap();
        assert_abs_diff_eq!(scalar(&frame, "npv(0.05, cf)"), 372.3248, epsilon = 1e-3);
    }

    #[test]
    fn test_irr_recovers_cost() {
        let mut frame = Frame::new(false);
        frame
            .append_cts(&Raw::from(vec![110.0, 110.0, 110.0]), "cf", false, None)
            .unwrap();
        let rate = scalar(&frame, "irr(300, cf)");
        let value: f64 = (1..=3).map(|t| 110.0 / (1.0 + rate).powi(t)).sum();
        assert_abs_diff_eq!(value, 300.0, epsilon = 1e-4);
    }

    #[test]
    fn test_irr_without_bracket() {
        let mut frame = Frame::new(false);
        frame
            .append_cts(&Raw::from(vec![1.0, 1.0]), "cf", false, None)
            .unwrap();
        let err = eval_str(&frame, "irr(1000, cf)");
        assert!(matches!(err, Err(ExprError::Raw(RawError::Domain { .. }))));
    }

    #[test]
    fn test_date_intrinsics() {
        let frame = letters_frame(false);
        let d = eval_str(&frame, "toDate('20240101')").unwrap();
        assert_eq!(
            d.get(0).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );

        let d = eval_str(&frame, "dateAdd(toDate('20240101'), 31)").unwrap();
        assert_eq!(
            d.get(0).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
        );

        let v = eval_str(&frame, "toDate('01/15/2024') < '20240201'").unwrap();
        assert_abs_diff_eq!(v.as_f64_vec().unwrap()[0], 1.0);
    }

    #[test]
    fn test_arity_and_kind_errors() {
        let frame = letters_frame(false);
        assert!(matches!(
            eval_str(&frame, "if(x0 > 0, 1)"),
            Err(ExprError::Arity { .. })
        ));
        assert!(matches!(
            eval_str(&frame, "nosuch(x0)"),
            Err(ExprError::UnknownFunction(_))
        ));
        assert!(matches!(
            eval_str(&frame, "dateAdd(x0, 1)"),
            Err(ExprError::ArgKind { .. })
        ));
        assert!(matches!(
            eval_str(&frame, "missing + 1"),
            Err(ExprError::UnknownField(_))
        ));
    }

    #[test]
    fn test_print_rejects_negative_count() {
        let frame = letters_frame(false);
        let err = eval_str(&frame, "print(x0, 0 - 2)");
        assert!(matches!(err, Err(ExprError::Raw(RawError::Domain { .. }))));
        assert_abs_diff_eq!(scalar(&frame, "print(x0, 3)"), 3.0);
    }

    #[test]
    fn test_add_computed_installs_column() {
        let mut pipe = VecPipeline::from_frame(letters_frame(false), PipelineSettings::default());
        add_computed(&mut pipe, "x3", "if(x0 > 4, 1, 0)").unwrap();
        assert!(pipe.is_cts("x3"));
        assert_eq!(pipe.frame().rows(), 10);

        // a scalar result broadcasts to every row
        add_computed(&mut pipe, "x4", "mean(x0)").unwrap();
        let data = pipe.frame().column("x4").unwrap().data().floats().unwrap();
        assert_eq!(data.len(), 10);
        assert_abs_diff_eq!(data[7], 4.5, epsilon = 1e-9);

        // integer results install as categoricals
        add_computed(&mut pipe, "x5", "cat(x0)").unwrap();
        assert!(pipe.is_cat("x5"));

        // re-adding a name replaces the old column
        add_computed(&mut pipe, "x3", "x0 * 2").unwrap();
        let ft = pipe.get_field_type("x3").unwrap();
        assert!(ft.role == crate::schema::Role::Cts);
        assert_eq!(pipe.frame().rows(), 10);
    }

    #[test]
    fn test_add_loop_fields_accumulates() {
        let mut pipe = VecPipeline::from_frame(letters_frame(false), PipelineSettings::default());
        add_computed(&mut pipe, "acc", "0").unwrap();
        add_loop_fields(&mut pipe, "v", 1, 4, &["acc"], &["acc + v"]).unwrap();

        let acc = pipe.frame().raw_of("acc").unwrap().as_f64_vec().unwrap();
        // 0 + 1 + 2 + 3, broadcast across every row
        assert_abs_diff_eq!(acc[0], 6.0);
        assert_abs_diff_eq!(acc[9], 6.0);
    }
}
