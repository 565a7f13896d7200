//! Type-tagged raw column buffers.
//!
//! A [`Raw`] is an ordered sequence of values that all share one [`Kind`].
//! It is the common currency between row readers, the frame container, and
//! the expression evaluator: readers produce `Raw` columns, the frame
//! encodes them into numeric storage, and expressions operate on `Raw`
//! values before their result is installed as a new column.
//!
//! Elementwise binary operations follow the broadcast rule: a length-1
//! operand is stretched to the other operand's length; any other length
//! difference is an error.

use std::cmp::Ordering;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::NaiveDate;
use itertools::Itertools;

pub type RawResult<T> = Result<T, RawError>;

/// Errors from operations on raw column buffers.
///
/// Each variant has a similarly named associated function that creates
/// it with some generics to make it more convenient to use.
#[derive(Debug, thiserror::Error)]
pub enum RawError {
    /// The operand kind is not accepted by the operation.
    #[error("{op} cannot operate on {kind} values")]
    KindMismatch { op: String, kind: Kind },

    /// Two buffers that must share a kind do not.
    #[error("{op} requires matching kinds, got {left} and {right}")]
    KindClash { op: String, left: Kind, right: Kind },

    /// Two buffers are not broadcastable (neither has length 1 and the
    /// lengths differ).
    #[error("{op} requires broadcastable lengths, got {left} and {right}")]
    LengthMismatch { op: String, left: usize, right: usize },

    /// A math domain violation, e.g. log of a non-positive value.
    #[error("domain error in {op}: {reason}")]
    Domain { op: String, reason: String },

    /// The operation needs at least one element.
    #[error("{op} requires a non-empty buffer")]
    Empty { op: String },

    /// An index was outside the buffer.
    #[error("index {index} out of bounds for {op} on a buffer of length {len}")]
    OutOfBounds { op: String, index: usize, len: usize },

    /// A string could not be interpreted as the requested kind.
    #[error("could not convert '{value}' to {kind}")]
    BadValue { value: String, kind: Kind },
}

impl RawError {
    pub fn kind_mismatch<S: Into<String>>(op: S, kind: Kind) -> Self {
        Self::KindMismatch { op: op.into(), kind }
    }

    pub fn kind_clash<S: Into<String>>(op: S, left: Kind, right: Kind) -> Self {
        Self::KindClash { op: op.into(), left, right }
    }

    pub fn length_mismatch<S: Into<String>>(op: S, left: usize, right: usize) -> Self {
        Self::LengthMismatch { op: op.into(), left, right }
    }

    pub fn domain<S: Into<String>, R: Into<String>>(op: S, reason: R) -> Self {
        Self::Domain { op: op.into(), reason: reason.into() }
    }

    pub fn empty<S: Into<String>>(op: S) -> Self {
        Self::Empty { op: op.into() }
    }

    pub fn out_of_bounds<S: Into<String>>(op: S, index: usize, len: usize) -> Self {
        Self::OutOfBounds { op: op.into(), index, len }
    }

    pub fn bad_value<S: Into<String>>(value: S, kind: Kind) -> Self {
        Self::BadValue { value: value.into(), kind }
    }
}

/// The storage kind of a raw buffer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Float64,
    Float32,
    Int32,
    Int64,
    /// UTF-8 string values
    #[strum(serialize = "string")]
    #[serde(rename = "string")]
    Str,
    /// Calendar dates (no time component)
    Date,
}

impl Kind {
    /// Whether values of this kind can be losslessly viewed as floats.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Kind::Float64 | Kind::Float32 | Kind::Int32 | Kind::Int64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Kind::Float64 | Kind::Float32)
    }
}

/// A single element of a raw buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    F64(f64),
    F32(f32),
    I32(i32),
    I64(i64),
    Str(String),
    Date(NaiveDate),
}

// Values are used as level-dictionary keys; float keys never occur there
// (categorical encoding rejects float input), so bitwise hashing is safe.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::F64(v) => v.to_bits().hash(state),
            Value::F32(v) => v.to_bits().hash(state),
            Value::I32(v) => v.hash(state),
            Value::I64(v) => v.hash(state),
            Value::Str(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::F64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
        }
    }
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::F64(_) => Kind::Float64,
            Value::F32(_) => Kind::Float32,
            Value::I32(_) => Kind::Int32,
            Value::I64(_) => Kind::Int64,
            Value::Str(_) => Kind::Str,
            Value::Date(_) => Kind::Date,
        }
    }

    /// View this value as an `f64`.
    ///
    /// Numeric kinds convert directly; strings are parsed. Dates cannot
    /// be viewed as floats.
    pub fn as_f64(&self) -> RawResult<f64> {
        match self {
            Value::F64(v) => Ok(*v),
            Value::F32(v) => Ok(*v as f64),
            Value::I32(v) => Ok(*v as f64),
            Value::I64(v) => Ok(*v as f64),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| RawError::bad_value(s, Kind::Float64)),
            Value::Date(_) => Err(RawError::kind_mismatch("as_f64", Kind::Date)),
        }
    }

    /// Compare two values, coercing numeric kinds through `f64`.
    ///
    /// Strings compare lexicographically and dates chronologically; any
    /// other cross-kind comparison is an error.
    pub fn compare(&self, other: &Value) -> RawResult<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Ok(a.cmp(b)),
            (a, b) if a.kind().is_numeric() && b.kind().is_numeric() => {
                Ok(a.as_f64()?.total_cmp(&b.as_f64()?))
            }
            (a, b) => Err(RawError::kind_clash("compare", a.kind(), b.kind())),
        }
    }

    /// The string form used to order level dictionaries at fit time.
    pub fn sort_key(&self) -> String {
        self.to_string()
    }

    /// The zero element for a kind, used when allocating buffers.
    pub fn zero(kind: Kind) -> Value {
        match kind {
            Kind::Float64 => Value::F64(0.0),
            Kind::Float32 => Value::F32(0.0),
            Kind::Int32 => Value::I32(0),
            Kind::Int64 => Value::I64(0),
            Kind::Str => Value::Str(String::new()),
            Kind::Date => Value::Date(NaiveDate::default()),
        }
    }
}

/// A comparison operator on raw values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn apply(&self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

impl FromStr for CmpOp {
    type Err = RawError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            _ => Err(RawError::bad_value(s, Kind::Str)),
        }
    }
}

impl Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

/// Aggregations available to the windowed cumulative operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Sum,
    Product,
    Count,
}

/// An ordered, homogeneous column of values.
#[derive(Debug, Clone, PartialEq)]
pub enum Raw {
    F64(Vec<f64>),
    F32(Vec<f32>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    Str(Vec<String>),
    Date(Vec<NaiveDate>),
}

impl From<Vec<f64>> for Raw {
    fn from(value: Vec<f64>) -> Self {
        Raw::F64(value)
    }
}

impl From<Vec<i32>> for Raw {
    fn from(value: Vec<i32>) -> Self {
        Raw::I32(value)
    }
}

impl From<Vec<i64>> for Raw {
    fn from(value: Vec<i64>) -> Self {
        Raw::I64(value)
    }
}

impl From<Vec<String>> for Raw {
    fn from(value: Vec<String>) -> Self {
        Raw::Str(value)
    }
}

impl From<Vec<NaiveDate>> for Raw {
    fn from(value: Vec<NaiveDate>) -> Self {
        Raw::Date(value)
    }
}

impl Raw {
    /// Build a buffer from scalar values; the kind is taken from the
    /// first element and every element must match it.
    pub fn from_values(values: Vec<Value>) -> RawResult<Self> {
        let first = values
            .first()
            .ok_or_else(|| RawError::empty("from_values"))?;
        let kind = first.kind();
        let mut raw = Raw::alloc(0, kind);
        for v in values {
            raw.push(v)?;
        }
        Ok(raw)
    }

    /// A zeroed buffer of `n` elements of the given kind.
    pub fn alloc(n: usize, kind: Kind) -> Self {
        match kind {
            Kind::Float64 => Raw::F64(vec![0.0; n]),
            Kind::Float32 => Raw::F32(vec![0.0; n]),
            Kind::Int32 => Raw::I32(vec![0; n]),
            Kind::Int64 => Raw::I64(vec![0; n]),
            Kind::Str => Raw::Str(vec![String::new(); n]),
            Kind::Date => Raw::Date(vec![NaiveDate::default(); n]),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Raw::F64(_) => Kind::Float64,
            Raw::F32(_) => Kind::Float32,
            Raw::I32(_) => Kind::Int32,
            Raw::I64(_) => Kind::Int64,
            Raw::Str(_) => Kind::Str,
            Raw::Date(_) => Kind::Date,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Raw::F64(v) => v.len(),
            Raw::F32(v) => v.len(),
            Raw::I32(v) => v.len(),
            Raw::I64(v) => v.len(),
            Raw::Str(v) => v.len(),
            Raw::Date(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> RawResult<Value> {
        if i >= self.len() {
            return Err(RawError::out_of_bounds("get", i, self.len()));
        }
        let v = match self {
            Raw::F64(v) => Value::F64(v[i]),
            Raw::F32(v) => Value::F32(v[i]),
            Raw::I32(v) => Value::I32(v[i]),
            Raw::I64(v) => Value::I64(v[i]),
            Raw::Str(v) => Value::Str(v[i].clone()),
            Raw::Date(v) => Value::Date(v[i]),
        };
        Ok(v)
    }

    pub fn set(&mut self, i: usize, value: Value) -> RawResult<()> {
        if i >= self.len() {
            return Err(RawError::out_of_bounds("set", i, self.len()));
        }
        match (self, value) {
            (Raw::F64(v), Value::F64(x)) => v[i] = x,
            (Raw::F32(v), Value::F32(x)) => v[i] = x,
            (Raw::I32(v), Value::I32(x)) => v[i] = x,
            (Raw::I64(v), Value::I64(x)) => v[i] = x,
            (Raw::Str(v), Value::Str(x)) => v[i] = x,
            (Raw::Date(v), Value::Date(x)) => v[i] = x,
            (me, value) => {
                return Err(RawError::kind_clash("set", me.kind(), value.kind()));
            }
        }
        Ok(())
    }

    pub fn push(&mut self, value: Value) -> RawResult<()> {
        match (self, value) {
            (Raw::F64(v), Value::F64(x)) => v.push(x),
            (Raw::F32(v), Value::F32(x)) => v.push(x),
            (Raw::I32(v), Value::I32(x)) => v.push(x),
            (Raw::I64(v), Value::I64(x)) => v.push(x),
            (Raw::Str(v), Value::Str(x)) => v.push(x),
            (Raw::Date(v), Value::Date(x)) => v.push(x),
            (me, value) => {
                return Err(RawError::kind_clash("push", me.kind(), value.kind()));
            }
        }
        Ok(())
    }

    pub fn swap(&mut self, i: usize, j: usize) {
        match self {
            Raw::F64(v) => v.swap(i, j),
            Raw::F32(v) => v.swap(i, j),
            Raw::I32(v) => v.swap(i, j),
            Raw::I64(v) => v.swap(i, j),
            Raw::Str(v) => v.swap(i, j),
            Raw::Date(v) => v.swap(i, j),
        }
    }

    pub fn values(&self) -> Vec<Value> {
        (0..self.len()).map(|i| self.get(i).unwrap()).collect()
    }

    /// The whole buffer coerced to floats. Numeric kinds convert
    /// directly, strings must parse; anything else is a kind mismatch.
    pub fn as_f64_vec(&self) -> RawResult<Vec<f64>> {
        match self {
            Raw::F64(v) => Ok(v.clone()),
            Raw::F32(v) => Ok(v.iter().map(|&x| x as f64).collect()),
            Raw::I32(v) => Ok(v.iter().map(|&x| x as f64).collect()),
            Raw::I64(v) => Ok(v.iter().map(|&x| x as f64).collect()),
            Raw::Str(v) => v
                .iter()
                .map(|s| {
                    s.trim()
                        .parse::<f64>()
                        .map_err(|_| RawError::bad_value(s, Kind::Float64))
                })
                .collect(),
            Raw::Date(_) => Err(RawError::kind_mismatch("as_f64_vec", Kind::Date)),
        }
    }

    fn require_numeric(&self, op: &str) -> RawResult<Vec<f64>> {
        if !self.kind().is_numeric() {
            return Err(RawError::kind_mismatch(op, self.kind()));
        }
        self.as_f64_vec()
    }

    /// Sum of a numeric buffer as a single-element buffer.
    pub fn sum(&self) -> RawResult<Raw> {
        let v = self.require_numeric("sum")?;
        Ok(Raw::F64(vec![v.iter().sum()]))
    }

    /// Mean of a numeric buffer as a single-element buffer.
    pub fn mean(&self) -> RawResult<Raw> {
        let v = self.require_numeric("mean")?;
        if v.is_empty() {
            return Err(RawError::empty("mean"));
        }
        Ok(Raw::F64(vec![v.iter().sum::<f64>() / v.len() as f64]))
    }

    /// Sample standard deviation (n-1 denominator) as a single-element
    /// buffer. Buffers with fewer than two elements report 0.
    pub fn std(&self) -> RawResult<Raw> {
        let v = self.require_numeric("std")?;
        if v.len() < 2 {
            return Ok(Raw::F64(vec![0.0]));
        }
        let mean = v.iter().sum::<f64>() / v.len() as f64;
        let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (v.len() - 1) as f64;
        Ok(Raw::F64(vec![var.sqrt()]))
    }

    pub fn max(&self) -> RawResult<Raw> {
        let v = self.require_numeric("max")?;
        let m = v
            .iter()
            .copied()
            .reduce(f64::max)
            .ok_or_else(|| RawError::empty("max"))?;
        Ok(Raw::F64(vec![m]))
    }

    pub fn min(&self) -> RawResult<Raw> {
        let v = self.require_numeric("min")?;
        let m = v
            .iter()
            .copied()
            .reduce(f64::min)
            .ok_or_else(|| RawError::empty("min"))?;
        Ok(Raw::F64(vec![m]))
    }

    /// Cumulative aggregate over indices `0..i-1` for each index `i`.
    /// The first element is the aggregation's identity.
    pub fn cume_before(&self, op: AggOp) -> RawResult<Raw> {
        let v = self.agg_input(op, "cumeBefore")?;
        let mut out = Vec::with_capacity(v.len());
        let mut acc = agg_identity(op);
        for x in v {
            out.push(acc);
            acc = agg_step(op, acc, x);
        }
        Ok(Raw::F64(out))
    }

    /// Cumulative aggregate over indices `i+1..n-1` for each index `i`.
    /// The last element is the aggregation's identity.
    pub fn cume_after(&self, op: AggOp) -> RawResult<Raw> {
        let v = self.agg_input(op, "cumeAfter")?;
        let mut out = vec![0.0; v.len()];
        let mut acc = agg_identity(op);
        for i in (0..v.len()).rev() {
            out[i] = acc;
            acc = agg_step(op, acc, v[i]);
        }
        Ok(Raw::F64(out))
    }

    fn agg_input(&self, op: AggOp, name: &str) -> RawResult<Vec<f64>> {
        // Counting does not look at the values, so any kind is fine there.
        if op == AggOp::Count {
            Ok(vec![1.0; self.len()])
        } else {
            self.require_numeric(name)
        }
    }

    /// Shift right by one element; the first element becomes `missing`.
    pub fn lag(&self, missing: Value) -> RawResult<Raw> {
        if missing.kind() != self.kind() {
            return Err(RawError::kind_clash("lag", self.kind(), missing.kind()));
        }
        let mut out = Raw::alloc(0, self.kind());
        out.push(missing)?;
        for i in 0..self.len().saturating_sub(1) {
            out.push(self.get(i)?)?;
        }
        Ok(out)
    }

    /// e^x elementwise.
    pub fn exp(&self) -> RawResult<Raw> {
        let v = self.require_numeric("exp")?;
        Ok(Raw::F64(v.into_iter().map(f64::exp).collect()))
    }

    /// Natural log elementwise; non-positive inputs are a domain error.
    pub fn log(&self) -> RawResult<Raw> {
        let v = self.require_numeric("log")?;
        if let Some(bad) = v.iter().find(|&&x| x <= 0.0) {
            return Err(RawError::domain("log", format!("log of non-positive value {bad}")));
        }
        Ok(Raw::F64(v.into_iter().map(f64::ln).collect()))
    }

    /// Values permuted by an integer-kind index buffer of the same length.
    pub fn index(&self, idx: &Raw) -> RawResult<Raw> {
        if !matches!(idx.kind(), Kind::Int32 | Kind::Int64) {
            return Err(RawError::kind_mismatch("index", idx.kind()));
        }
        if idx.len() != self.len() {
            return Err(RawError::length_mismatch("index", self.len(), idx.len()));
        }
        let mut out = Raw::alloc(0, self.kind());
        for i in 0..idx.len() {
            let j = match idx.get(i)? {
                Value::I32(j) => j as i64,
                Value::I64(j) => j,
                _ => unreachable!(),
            };
            if j < 0 || j as usize >= self.len() {
                return Err(RawError::out_of_bounds("index", j.max(0) as usize, self.len()));
            }
            out.push(self.get(j as usize)?)?;
        }
        Ok(out)
    }

    /// Elementwise comparison against another buffer with broadcasting,
    /// using [`Value::compare`] coercion.
    pub fn compare(&self, other: &Raw, op: CmpOp) -> RawResult<Vec<bool>> {
        let n = broadcast_len("compare", self.len(), other.len())?;
        let (da, db) = (delta(self.len()), delta(other.len()));
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let ord = self.get(i * da)?.compare(&other.get(i * db)?)?;
            out.push(op.apply(ord));
        }
        Ok(out)
    }

    /// Elementwise arithmetic with broadcasting; both sides coerce to
    /// floats and the result is always a `Float64` buffer.
    pub fn binary(&self, other: &Raw, op: BinOp) -> RawResult<Raw> {
        let a = self.require_numeric(op.name())?;
        let b = other.require_numeric(op.name())?;
        let n = broadcast_len(op.name(), a.len(), b.len())?;
        let (da, db) = (delta(a.len()), delta(b.len()));
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(op.apply(a[i * da], b[i * db])?);
        }
        Ok(Raw::F64(out))
    }

    /// Numeric negation, elementwise.
    pub fn neg(&self) -> RawResult<Raw> {
        let v = self.require_numeric("negate")?;
        Ok(Raw::F64(v.into_iter().map(|x| -x).collect()))
    }

    /// The distinct values of this buffer, ordered by their string form.
    ///
    /// This ordering is what fixes level codes at fit time, so it must
    /// stay deterministic across runs.
    pub fn distinct_sorted(&self) -> Vec<Value> {
        self.values()
            .into_iter()
            .unique()
            .sorted_by(|a, b| a.sort_key().cmp(&b.sort_key()))
            .collect()
    }
}

/// The elementary binary operators of the expression language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    pub fn name(&self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "subtract",
            BinOp::Mul => "multiply",
            BinOp::Div => "divide",
            BinOp::Pow => "pow",
        }
    }

    fn apply(&self, a: f64, b: f64) -> RawResult<f64> {
        match self {
            BinOp::Add => Ok(a + b),
            BinOp::Sub => Ok(a - b),
            BinOp::Mul => Ok(a * b),
            BinOp::Div => {
                if b == 0.0 {
                    Err(RawError::domain("divide", format!("{a} / 0")))
                } else {
                    Ok(a / b)
                }
            }
            BinOp::Pow => Ok(a.powf(b)),
        }
    }
}

/// The broadcast length of two operands, or an error if neither side
/// can stretch.
pub fn broadcast_len(op: &str, a: usize, b: usize) -> RawResult<usize> {
    if a == b {
        Ok(a)
    } else if a == 1 || b == 1 {
        Ok(a.max(b))
    } else {
        Err(RawError::length_mismatch(op, a, b))
    }
}

/// The index step for one operand under broadcasting: 0 pins a
/// length-1 operand to its only element.
pub fn delta(len: usize) -> usize {
    usize::from(len != 1)
}

fn agg_identity(op: AggOp) -> f64 {
    match op {
        AggOp::Sum | AggOp::Count => 0.0,
        AggOp::Product => 1.0,
    }
}

fn agg_step(op: AggOp, acc: f64, x: f64) -> f64 {
    match op {
        AggOp::Sum | AggOp::Count => acc + x,
        AggOp::Product => acc * x,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use itertools::Itertools;
    use rstest::rstest;

    fn floats(raw: &Raw) -> Vec<f64> {
        raw.as_f64_vec().unwrap()
    }

    #[test]
    fn test_kind_inference() {
        let raw = Raw::from_values(vec![Value::I64(3), Value::I64(5)]).unwrap();
        assert_eq!(raw.kind(), Kind::Int64);
        assert_eq!(raw.len(), 2);

        let err = Raw::from_values(vec![Value::I64(3), Value::Str("x".into())]);
        assert!(matches!(err, Err(RawError::KindClash { .. })));
    }

    #[test]
    fn test_reductions() {
        let raw = Raw::from((1..=10).map(|i| i as f64).collect_vec());
        assert_abs_diff_eq!(floats(&raw.sum().unwrap())[0], 55.0);
        assert_abs_diff_eq!(floats(&raw.mean().unwrap())[0], 5.5);
        assert_abs_diff_eq!(floats(&raw.std().unwrap())[0], 3.0276503, epsilon = 1e-6);
        assert_abs_diff_eq!(floats(&raw.max().unwrap())[0], 10.0);
        assert_abs_diff_eq!(floats(&raw.min().unwrap())[0], 1.0);

        let strs = Raw::from(vec!["a".to_string(), "b".to_string()]);
        assert!(matches!(strs.sum(), Err(RawError::KindMismatch { .. })));
    }

    #[test]
    fn test_cume_windows() {
        let raw = Raw::from(vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(floats(&raw.cume_before(AggOp::Sum).unwrap()), vec![0.0, 1.0, 3.0, 6.0]);
        assert_eq!(floats(&raw.cume_after(AggOp::Sum).unwrap()), vec![9.0, 7.0, 4.0, 0.0]);
        assert_eq!(
            floats(&raw.cume_before(AggOp::Product).unwrap()),
            vec![1.0, 1.0, 2.0, 6.0]
        );
        assert_eq!(floats(&raw.cume_after(AggOp::Count).unwrap()), vec![3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_lag() {
        let raw = Raw::from(vec![1.0, 2.0, 3.0]);
        let lagged = raw.lag(Value::F64(-1.0)).unwrap();
        assert_eq!(floats(&lagged), vec![-1.0, 1.0, 2.0]);

        // missing value must match the buffer's kind
        assert!(raw.lag(Value::Str("na".into())).is_err());
    }

    #[test]
    fn test_log_domain() {
        let ok = Raw::from(vec![1.0, std::f64::consts::E]);
        assert_abs_diff_eq!(floats(&ok.log().unwrap())[1], 1.0, epsilon = 1e-12);

        let bad = Raw::from(vec![1.0, 0.0]);
        assert!(matches!(bad.log(), Err(RawError::Domain { .. })));
    }

    #[test]
    fn test_index_permutation() {
        let raw = Raw::from(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        let idx = Raw::from(vec![2i64, 0, 1]);
        let permuted = raw.index(&idx).unwrap();
        assert_eq!(permuted.values(), vec![
            Value::Str("c".into()),
            Value::Str("a".into()),
            Value::Str("b".into())
        ]);

        let short = Raw::from(vec![0i64]);
        assert!(matches!(raw.index(&short), Err(RawError::LengthMismatch { .. })));
    }

    #[rstest]
    #[case(BinOp::Add, vec![3.0, 4.0, 5.0])]
    #[case(BinOp::Mul, vec![2.0, 4.0, 6.0])]
    #[case(BinOp::Pow, vec![1.0, 4.0, 9.0])]
    fn test_broadcast_binary(#[case] op: BinOp, #[case] expect: Vec<f64>) {
        let xs = Raw::from(vec![1.0, 2.0, 3.0]);
        let two = Raw::from(vec![2.0]);
        let got = xs.binary(&two, op).unwrap();
        assert_eq!(floats(&got), expect);
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn test_broadcast_length_mismatch() {
        let a = Raw::from(vec![1.0, 2.0]);
        let b = Raw::from(vec![1.0, 2.0, 3.0]);
        assert!(matches!(a.binary(&b, BinOp::Add), Err(RawError::LengthMismatch { .. })));
    }

    #[test]
    fn test_divide_by_zero() {
        let a = Raw::from(vec![1.0]);
        let b = Raw::from(vec![0.0]);
        assert!(matches!(a.binary(&b, BinOp::Div), Err(RawError::Domain { .. })));
    }

    #[test]
    fn test_compare_coercion() {
        let ints = Raw::from(vec![1i64, 5, 10]);
        let threshold = Raw::from(vec![5.0]);
        let got = ints.compare(&threshold, CmpOp::Ge).unwrap();
        assert_eq!(got, vec![false, true, true]);

        let dates = Raw::from(vec![
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
        ]);
        let cutoff = Raw::from(vec![NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()]);
        assert_eq!(dates.compare(&cutoff, CmpOp::Lt).unwrap(), vec![true, false]);

        assert!(ints.compare(&dates, CmpOp::Eq).is_err());
    }

    #[test]
    fn test_distinct_sorted() {
        let raw = Raw::from(vec![
            "d".to_string(),
            "e".to_string(),
            "a".to_string(),
            "d".to_string(),
        ]);
        let lvls = raw.distinct_sorted();
        assert_eq!(lvls, vec![
            Value::Str("a".into()),
            Value::Str("d".into()),
            Value::Str("e".into())
        ]);
    }

    #[test]
    fn test_negation() {
        let raw = Raw::from(vec![1.0, -2.0]);
        assert_eq!(floats(&raw.neg().unwrap()), vec![-1.0, 2.0]);
    }

    #[test]
    fn test_set_and_swap() {
        let mut raw = Raw::from(vec![1.0, 2.0, 3.0]);
        raw.set(1, Value::F64(20.0)).unwrap();
        raw.swap(0, 2);
        assert_eq!(floats(&raw), vec![3.0, 20.0, 1.0]);

        assert!(raw.set(9, Value::F64(0.0)).is_err());
        assert!(raw.set(0, Value::Str("x".into())).is_err());
    }

    #[test]
    fn test_cmp_op_strings() {
        assert_eq!(CmpOp::from_str("<=").unwrap(), CmpOp::Le);
        assert_eq!(CmpOp::from_str("!=").unwrap(), CmpOp::Ne);
        assert_eq!(CmpOp::Ge.to_string(), ">=");
        assert!(CmpOp::from_str("<>").is_err());
    }
}
