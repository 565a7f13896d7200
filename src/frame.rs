//! The frame container: named, typed columns with joint row operations.
//!
//! A [`Frame`] owns a set of encoded columns that always agree on the row
//! count. Continuous columns store normalized (or plain) floats, categorical
//! columns store contiguous integer codes, and one-hot/embedding columns
//! store dense 0/1 blocks derived from a categorical parent. All row
//! operations (sort, shuffle, slice, join, append) permute or rebuild every
//! column as a unit so the rows stay aligned.
//!
//! Mutating operations build their result first and install it only after
//! the invariant check passes, so a failed call leaves the frame exactly as
//! it was.

use std::collections::HashSet;

use itertools::Itertools;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::raw::{Raw, RawError, Value};
use crate::schema::{FieldType, FitParams, Role, Schema, SchemaError};
use crate::summary::Summary;

pub type FrameResult<T> = Result<T, FrameError>;

/// Minimum scale accepted when normalizing a continuous column.
pub const MIN_SCALE: f64 = 1e-8;

/// Errors from frame construction and row operations.
///
/// Each variant has a similarly named associated function that builds it
/// with some generics to make it more convenient to use.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Raw(#[from] RawError),

    #[error("field '{field}' must be {expected}, found {got}")]
    RoleMismatch { field: String, expected: &'static str, got: Role },

    #[error("cannot normalize '{field}': standard deviation {std:e} is below {MIN_SCALE:e}")]
    ZeroVariance { field: String, std: f64 },

    #[error("value '{value}' of field '{field}' is not a known level and no default resolves")]
    UnknownLevel { field: String, value: String },

    #[error("{op} produced no rows")]
    EmptySlice { op: String },

    #[error("field '{field}' has {got} rows, expected {want}")]
    RowCountMismatch { field: String, got: usize, want: usize },

    #[error("cannot join: {reason}")]
    Join { reason: String },

    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl FrameError {
    pub fn role_mismatch<S: Into<String>>(field: S, expected: &'static str, got: Role) -> Self {
        Self::RoleMismatch { field: field.into(), expected, got }
    }

    pub fn zero_variance<S: Into<String>>(field: S, std: f64) -> Self {
        Self::ZeroVariance { field: field.into(), std }
    }

    pub fn unknown_level<S: Into<String>>(field: S, value: &Value) -> Self {
        Self::UnknownLevel { field: field.into(), value: value.to_string() }
    }

    pub fn empty_slice<S: Into<String>>(op: S) -> Self {
        Self::EmptySlice { op: op.into() }
    }

    pub fn row_count<S: Into<String>>(field: S, got: usize, want: usize) -> Self {
        Self::RowCountMismatch { field: field.into(), got, want }
    }

    pub fn join<S: Into<String>>(reason: S) -> Self {
        Self::Join { reason: reason.into() }
    }

    pub fn invariant<S: Into<String>>(reason: S) -> Self {
        Self::Invariant(reason.into())
    }

    pub fn unknown_field<S: Into<String>>(name: S) -> Self {
        Self::Schema(SchemaError::unknown_field(name))
    }
}

/// Encoded storage of one column: flat row-major floats for
/// continuous/one-hot/embedding roles, integer codes for categoricals.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<f64>),
    Int(Vec<i32>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn floats(&self) -> Option<&[f64]> {
        match self {
            ColumnData::Float(v) => Some(v),
            ColumnData::Int(_) => None,
        }
    }

    pub fn ints(&self) -> Option<&[i32]> {
        match self {
            ColumnData::Int(v) => Some(v),
            ColumnData::Float(_) => None,
        }
    }
}

/// One materialized column: its schema, its distribution summary, the
/// encoded data, and (optionally) the raw values it was built from.
#[derive(Debug, Clone)]
pub struct Column {
    ft: FieldType,
    summary: Summary,
    data: ColumnData,
    raw: Option<Raw>,
}

impl Column {
    pub fn field_type(&self) -> &FieldType {
        &self.ft
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn raw(&self) -> Option<&Raw> {
        self.raw.as_ref()
    }

    fn nrows(&self) -> usize {
        self.data.len() / self.ft.width()
    }

    /// Gather the rows named by `idx` into a fresh column. A `None`
    /// index stands for an unmatched left-join row and takes the fill.
    fn gather(&self, idx: &[Option<usize>], fill: Option<&Value>) -> FrameResult<Column> {
        let w = self.ft.width();
        let data = match &self.data {
            ColumnData::Float(v) => {
                let mut out = Vec::with_capacity(idx.len() * w);
                for &i in idx {
                    match i {
                        Some(i) => out.extend_from_slice(&v[i * w..(i + 1) * w]),
                        None => out.extend(std::iter::repeat(0.0).take(w)),
                    }
                }
                ColumnData::Float(out)
            }
            ColumnData::Int(v) => {
                let fill_code = match fill {
                    Some(value) => Some(
                        self.ft
                            .params
                            .code_of(value)
                            .ok_or_else(|| FrameError::unknown_level(&self.ft.name, value))?,
                    ),
                    None => None,
                };
                let mut out = Vec::with_capacity(idx.len());
                for &i in idx {
                    match (i, fill_code) {
                        (Some(i), _) => out.push(v[i]),
                        (None, Some(code)) => out.push(code),
                        (None, None) => {
                            return Err(FrameError::join(format!(
                                "'{}' has no default level to fill unmatched rows",
                                self.ft.name
                            )))
                        }
                    }
                }
                ColumnData::Int(out)
            }
        };
        let raw = match &self.raw {
            Some(raw) => {
                let mut out = Raw::alloc(0, raw.kind());
                for &i in idx {
                    match i {
                        Some(i) => out.push(raw.get(i)?)?,
                        None => out.push(Value::zero(raw.kind()))?,
                    }
                }
                Some(out)
            }
            None => None,
        };
        let mut col = Column { ft: self.ft.clone(), summary: self.summary.clone(), data, raw };
        col.rebuild_summary();
        Ok(col)
    }

    fn rebuild_summary(&mut self) {
        self.summary = match (&self.data, self.ft.role) {
            (ColumnData::Int(codes), _) => Summary::cat(codes, &self.ft.params.levels),
            (ColumnData::Float(v), Role::Cts) => Summary::cts(v),
            (ColumnData::Float(_), _) => {
                // One-hot blocks summarize as their parent's codes.
                let codes = self.one_hot_codes();
                Summary::cat(&codes, &self.ft.params.levels)
            }
        };
    }

    fn one_hot_codes(&self) -> Vec<i32> {
        let w = self.ft.width();
        match &self.data {
            ColumnData::Float(v) => v
                .chunks(w)
                .map(|row| row.iter().position(|&x| x == 1.0).unwrap_or(0) as i32)
                .collect(),
            ColumnData::Int(v) => v.clone(),
        }
    }
}

/// How [`Frame::join`] treats left rows with no match on the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Unmatched left rows are dropped.
    Inner,
    /// Unmatched left rows are kept; right continuous columns fill with
    /// 0 and right categorical columns fill with their default level.
    Left,
}

/// A collection of named, typed columns sharing one row count.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    columns: Vec<Column>,
    rows: usize,
    sort_field: Option<String>,
    sort_ascending: bool,
    keep_raw: bool,
}

impl Frame {
    /// An empty frame. `keep_raw` retains each column's raw input
    /// buffer next to the encoded one, which doubles memory but makes
    /// [`Frame::raw_of`] exact for string and date columns.
    pub fn new(keep_raw: bool) -> Self {
        Self { keep_raw, sort_ascending: true, ..Default::default() }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn keep_raw(&self) -> bool {
        self.keep_raw
    }

    pub fn sort_field(&self) -> Option<&str> {
        self.sort_field.as_deref()
    }

    pub fn sort_ascending(&self) -> bool {
        self.sort_ascending
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.ft.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.ft.name == name)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn field_type(&self, name: &str) -> Option<&FieldType> {
        self.column(name).map(|c| &c.ft)
    }

    /// The schema of every column, in column order.
    pub fn schema(&self) -> Schema {
        let mut schema = Schema::default();
        for c in &self.columns {
            // Names are already unique within a frame.
            schema.push(c.ft.clone()).unwrap();
        }
        schema
    }

    fn require_new_rows(&self, name: &str, n: usize) -> FrameResult<()> {
        if self.column(name).is_some() {
            return Err(SchemaError::duplicate_field(name).into());
        }
        if n == 0 {
            return Err(FrameError::empty_slice(format!("append of '{name}'")));
        }
        if !self.columns.is_empty() && n != self.rows {
            return Err(FrameError::row_count(name, n, self.rows));
        }
        Ok(())
    }

    /// Append a continuous column.
    ///
    /// Any numeric kind or numeric-parsable string coerces to floats.
    /// When `fp` is given its location/scale are adopted verbatim;
    /// otherwise they are fit as the mean and sample standard deviation.
    /// With `normalize`, the stored data is `(x - location) / scale`.
    pub fn append_cts(
        &mut self,
        raw: &Raw,
        name: &str,
        normalize: bool,
        fp: Option<&FitParams>,
    ) -> FrameResult<()> {
        self.require_new_rows(name, raw.len())?;
        let values = raw.as_f64_vec()?;

        let params = match fp {
            Some(fp) => fp.clone(),
            None => {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let std = if values.len() < 2 {
                    0.0
                } else {
                    (values.iter().map(|x| (x - mean).powi(2)).sum::<f64>()
                        / (values.len() - 1) as f64)
                        .sqrt()
                };
                FitParams::cts(mean, std)
            }
        };

        let data = if normalize {
            if params.scale < MIN_SCALE {
                return Err(FrameError::zero_variance(name, params.scale));
            }
            values.iter().map(|x| (x - params.location) / params.scale).collect_vec()
        } else {
            values.clone()
        };

        let ft = FieldType::new_cts(name, normalize, params);
        let column = Column {
            ft,
            summary: Summary::cts(&values),
            data: ColumnData::Float(data),
            raw: self.keep_raw.then(|| raw.clone()),
        };
        self.install_column(column)
    }

    /// Append a categorical column.
    ///
    /// Float input is rejected. When `fp` is omitted the level dictionary
    /// is derived from the sorted distinct values; otherwise values are
    /// encoded under `fp.levels` with `fp.default` as the fallback, and a
    /// value that resolves to neither is an error.
    pub fn append_cat(&mut self, raw: &Raw, name: &str, fp: Option<&FitParams>) -> FrameResult<()> {
        self.require_new_rows(name, raw.len())?;
        if raw.kind().is_float() {
            return Err(RawError::kind_mismatch("append_cat", raw.kind()).into());
        }

        let params = match fp {
            Some(fp) => fp.clone(),
            None => FitParams::from_levels(raw.distinct_sorted()),
        };

        let mut codes = Vec::with_capacity(raw.len());
        for i in 0..raw.len() {
            let v = raw.get(i)?;
            let code = params
                .code_of(&v)
                .ok_or_else(|| FrameError::unknown_level(name, &v))?;
            codes.push(code);
        }

        let column = Column {
            summary: Summary::cat(&codes, &params.levels),
            ft: FieldType::new_cat(name, params),
            data: ColumnData::Int(codes),
            raw: self.keep_raw.then(|| raw.clone()),
        };
        self.install_column(column)
    }

    /// Expand a categorical column into a dense 0/1 block.
    pub fn make_one_hot(&mut self, from: &str, name: &str) -> FrameResult<()> {
        self.make_expanded(from, name, Role::OneHot, 0)
    }

    /// Same storage as [`Frame::make_one_hot`], but marked for a learned
    /// embedding of `emb_cols` columns (at least 2).
    pub fn make_embed(&mut self, from: &str, name: &str, emb_cols: usize) -> FrameResult<()> {
        if emb_cols < 2 {
            return Err(FrameError::invariant(format!(
                "embedding '{name}' needs at least 2 columns, got {emb_cols}"
            )));
        }
        self.make_expanded(from, name, Role::Embed, emb_cols)
    }

    fn make_expanded(
        &mut self,
        from: &str,
        name: &str,
        role: Role,
        emb_cols: usize,
    ) -> FrameResult<()> {
        if self.column(name).is_some() {
            return Err(SchemaError::duplicate_field(name).into());
        }
        let parent = self
            .column(from)
            .ok_or_else(|| FrameError::unknown_field(from))?;
        if parent.ft.role != Role::Cat {
            return Err(FrameError::role_mismatch(from, "Cat", parent.ft.role));
        }

        let codes = parent.data.ints().expect("Cat columns store integer codes");
        let width = parent.ft.params.n_levels();
        let mut data = vec![0.0; codes.len() * width];
        for (row, &code) in codes.iter().enumerate() {
            data[row * width + code as usize] = 1.0;
        }

        let mut ft = FieldType::new_one_hot(name, from, parent.ft.params.clone());
        ft.role = role;
        ft.emb_cols = emb_cols;
        let column = Column {
            ft,
            summary: Summary::one_hot(codes.len(), &parent.summary),
            data: ColumnData::Float(data),
            raw: None,
        };
        self.install_column(column)
    }

    fn install_column(&mut self, column: Column) -> FrameResult<()> {
        let nrows = column.nrows();
        let mut candidate = self.clone();
        if candidate.columns.is_empty() {
            candidate.rows = nrows;
        }
        candidate.columns.push(column);
        candidate.check_invariants()?;
        *self = candidate;
        Ok(())
    }

    /// Verify every frame invariant; called at the end of each mutating
    /// operation on the candidate state before it is installed.
    pub fn check_invariants(&self) -> FrameResult<()> {
        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.ft.name.as_str()) {
                return Err(SchemaError::duplicate_field(&col.ft.name).into());
            }
            if col.nrows() != self.rows {
                return Err(FrameError::row_count(&col.ft.name, col.nrows(), self.rows));
            }
            if col.summary.nrows != self.rows {
                return Err(FrameError::invariant(format!(
                    "summary of '{}' has {} rows, frame has {}",
                    col.ft.name, col.summary.nrows, self.rows
                )));
            }
            match col.ft.role {
                Role::Cts => {
                    if col.ft.normalized && col.ft.params.scale < MIN_SCALE {
                        return Err(FrameError::zero_variance(&col.ft.name, col.ft.params.scale));
                    }
                }
                Role::Cat => {
                    let n = col.ft.params.n_levels() as i32;
                    let codes = col.data.ints().ok_or_else(|| {
                        FrameError::invariant(format!("'{}' is Cat but stores floats", col.ft.name))
                    })?;
                    if codes.iter().any(|&c| c < 0 || c >= n) {
                        return Err(FrameError::invariant(format!(
                            "'{}' has codes outside 0..{n}",
                            col.ft.name
                        )));
                    }
                }
                Role::OneHot | Role::Embed => {
                    self.check_one_hot(col)?;
                }
                Role::Either => {
                    return Err(FrameError::invariant(format!(
                        "'{}' still has the placeholder role",
                        col.ft.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_one_hot(&self, col: &Column) -> FrameResult<()> {
        let from = col.ft.from.as_deref().ok_or_else(|| {
            FrameError::invariant(format!("'{}' has no parent field", col.ft.name))
        })?;
        let parent = self
            .column(from)
            .ok_or_else(|| FrameError::unknown_field(from))?;
        if parent.ft.role != Role::Cat {
            return Err(FrameError::role_mismatch(from, "Cat", parent.ft.role));
        }
        if col.ft.cats != parent.ft.params.n_levels() {
            return Err(FrameError::invariant(format!(
                "'{}' is {} wide but its parent has {} levels",
                col.ft.name,
                col.ft.cats,
                parent.ft.params.n_levels()
            )));
        }
        if col.ft.role == Role::Embed && col.ft.emb_cols < 2 {
            return Err(FrameError::invariant(format!(
                "embedding '{}' has width hint {}",
                col.ft.name, col.ft.emb_cols
            )));
        }
        let data = col.data.floats().ok_or_else(|| {
            FrameError::invariant(format!("'{}' does not store floats", col.ft.name))
        })?;
        for (row, chunk) in data.chunks(col.ft.width()).enumerate() {
            let ones = chunk.iter().filter(|&&x| x == 1.0).count();
            let zeros = chunk.iter().filter(|&&x| x == 0.0).count();
            if ones != 1 || ones + zeros != chunk.len() {
                return Err(FrameError::invariant(format!(
                    "row {row} of '{}' is not a unit indicator",
                    col.ft.name
                )));
            }
        }
        Ok(())
    }

    /// Reconstruct the original raw values of a field.
    ///
    /// The stored mirror is returned when present. Otherwise continuous
    /// columns invert the normalization, categorical columns decode
    /// through the level dictionary, and one-hot/embedding columns
    /// delegate to their parent.
    pub fn raw_of(&self, field: &str) -> FrameResult<Raw> {
        let col = self
            .column(field)
            .ok_or_else(|| FrameError::unknown_field(field))?;
        if let Some(raw) = &col.raw {
            return Ok(raw.clone());
        }
        match col.ft.role {
            Role::Cts => {
                let data = col.data.floats().expect("Cts columns store floats");
                let values = if col.ft.normalized {
                    let (loc, scale) = (col.ft.params.location, col.ft.params.scale);
                    data.iter().map(|x| x * scale + loc).collect_vec()
                } else {
                    data.to_vec()
                };
                Ok(Raw::F64(values))
            }
            Role::Cat => {
                let codes = col.data.ints().expect("Cat columns store integer codes");
                let mut out: Option<Raw> = None;
                for &code in codes {
                    let value = col.ft.params.value_of(code).ok_or_else(|| {
                        FrameError::invariant(format!("code {code} of '{field}' has no level"))
                    })?;
                    match &mut out {
                        Some(raw) => raw.push(value.clone())?,
                        None => {
                            let mut raw = Raw::alloc(0, value.kind());
                            raw.push(value.clone())?;
                            out = Some(raw);
                        }
                    }
                }
                out.ok_or_else(|| FrameError::empty_slice("raw_of"))
            }
            Role::OneHot | Role::Embed => {
                let from = col.ft.from.as_deref().expect("expanded columns have a parent");
                self.raw_of(from)
            }
            Role::Either => Err(FrameError::invariant(format!(
                "'{field}' still has the placeholder role"
            ))),
        }
    }

    /// Apply a joint row permutation to every column.
    fn permuted(&self, perm: &[usize]) -> FrameResult<Frame> {
        let idx = perm.iter().map(|&i| Some(i)).collect_vec();
        let mut out = self.clone();
        out.columns = self
            .columns
            .iter()
            .map(|c| c.gather(&idx, None))
            .collect::<FrameResult<Vec<_>>>()?;
        out.rows = perm.len();
        Ok(out)
    }

    /// Sort all rows by one field. Sorting on a one-hot or embedding
    /// column dispatches to its parent. The sort is stable: equal keys
    /// keep their input order.
    pub fn sort(&mut self, field: &str, ascending: bool) -> FrameResult<()> {
        let key_field = self.sort_key_field(field)?;
        let col = self.column(&key_field).expect("sort key was just resolved");

        let mut order = (0..self.rows).collect_vec();
        match &col.data {
            ColumnData::Float(v) => order.sort_by(|&a, &b| v[a].total_cmp(&v[b])),
            ColumnData::Int(v) => order.sort_by(|&a, &b| v[a].cmp(&v[b])),
        }
        if !ascending {
            order.reverse();
        }

        let mut candidate = self.permuted(&order)?;
        candidate.sort_field = Some(field.to_string());
        candidate.sort_ascending = ascending;
        candidate.check_invariants()?;
        *self = candidate;
        Ok(())
    }

    fn sort_key_field(&self, field: &str) -> FrameResult<String> {
        let col = self
            .column(field)
            .ok_or_else(|| FrameError::unknown_field(field))?;
        if col.ft.role.is_one_hot_like() {
            Ok(col.ft.from.clone().expect("expanded columns have a parent"))
        } else {
            Ok(field.to_string())
        }
    }

    /// Uniform random joint permutation of the rows; clears the sort
    /// marker. Seeded from the OS entropy source.
    pub fn shuffle(&mut self) -> FrameResult<()> {
        self.shuffle_with(StdRng::from_entropy())
    }

    /// Shuffle with a fixed seed, for reproducible runs and tests.
    pub fn shuffle_seeded(&mut self, seed: u64) -> FrameResult<()> {
        self.shuffle_with(StdRng::seed_from_u64(seed))
    }

    fn shuffle_with(&mut self, mut rng: StdRng) -> FrameResult<()> {
        let mut order = (0..self.rows).collect_vec();
        order.shuffle(&mut rng);
        let mut candidate = self.permuted(&order)?;
        candidate.sort_field = None;
        candidate.check_invariants()?;
        *self = candidate;
        Ok(())
    }

    /// Materialize a new frame with the selected rows, in the order
    /// given. Level dictionaries are preserved exactly so codes in the
    /// subset stay compatible with this frame; only the distribution
    /// summaries are rebuilt.
    pub fn subset(&self, rows: &[usize]) -> FrameResult<Frame> {
        if rows.is_empty() {
            return Err(FrameError::empty_slice("subset"));
        }
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.rows) {
            return Err(RawError::out_of_bounds("subset", bad, self.rows).into());
        }
        let out = self.permuted(rows)?;
        out.check_invariants()?;
        Ok(out)
    }

    /// A single row as a one-row frame.
    pub fn row(&self, i: usize) -> FrameResult<Frame> {
        self.subset(&[i])
    }

    /// Keep the rows where `predicate` holds.
    pub fn slice<F: Fn(usize) -> bool>(&self, predicate: F) -> FrameResult<Frame> {
        let rows = (0..self.rows).filter(|&i| predicate(i)).collect_vec();
        if rows.is_empty() {
            return Err(FrameError::empty_slice("slice"));
        }
        self.subset(&rows)
    }

    /// Keep the rows whose raw value of `field` is one of `values`.
    /// The raw view is consulted, never the normalized floats.
    pub fn where_in(&self, field: &str, values: &[Value]) -> FrameResult<Frame> {
        let raw = self.raw_of(field)?;
        let rows = (0..raw.len())
            .filter(|&i| {
                let v = raw.get(i).expect("index is within the raw buffer");
                values.contains(&v)
            })
            .collect_vec();
        if rows.is_empty() {
            return Err(FrameError::empty_slice(format!("where on '{field}'")));
        }
        self.subset(&rows)
    }

    /// Remove a field. One-hot and embedding columns whose parent is
    /// removed go with it.
    pub fn drop_field(&mut self, field: &str) -> FrameResult<()> {
        if self.column(field).is_none() {
            return Err(FrameError::unknown_field(field));
        }
        let mut candidate = self.clone();
        candidate
            .columns
            .retain(|c| c.ft.name != field && c.ft.from.as_deref() != Some(field));
        if candidate.columns.is_empty() {
            candidate.rows = 0;
        }
        if candidate.sort_field.as_deref() == Some(field) {
            candidate.sort_field = None;
        }
        candidate.check_invariants()?;
        *self = candidate;
        Ok(())
    }

    /// Restrict the frame to the named fields. Parents of kept one-hot
    /// and embedding columns are kept implicitly so the expanded columns
    /// stay valid.
    pub fn keep(&mut self, fields: &[&str]) -> FrameResult<()> {
        for &f in fields {
            if self.column(f).is_none() {
                return Err(FrameError::unknown_field(f));
            }
        }
        let mut wanted: HashSet<&str> = fields.iter().copied().collect();
        for &f in fields {
            if let Some(col) = self.column(f) {
                if let Some(from) = col.ft.from.as_deref() {
                    wanted.insert(from);
                }
            }
        }
        let mut candidate = self.clone();
        candidate.columns.retain(|c| wanted.contains(c.ft.name.as_str()));
        if let Some(sf) = candidate.sort_field.as_deref() {
            if !wanted.contains(sf) {
                candidate.sort_field = None;
            }
        }
        candidate.check_invariants()?;
        *self = candidate;
        Ok(())
    }

    /// Derive a new frame whose encoding matches `schema`: each base
    /// column's raw values are re-encoded under the supplied fit
    /// parameters, then the expanded columns are rebuilt. Columns not in
    /// `schema` are omitted.
    pub fn update_schema(&self, schema: &Schema) -> FrameResult<Frame> {
        let mut out = Frame::new(self.keep_raw);
        for ft in schema.iter() {
            match ft.role {
                Role::Cts => {
                    let raw = self.raw_of(&ft.name)?;
                    out.append_cts(&raw, &ft.name, ft.normalized, Some(&ft.params))?;
                }
                Role::Cat => {
                    let raw = self.raw_of(&ft.name)?;
                    out.append_cat(&raw, &ft.name, Some(&ft.params))?;
                }
                Role::OneHot | Role::Embed => {}
                Role::Either => {
                    return Err(FrameError::invariant(format!(
                        "schema field '{}' has the placeholder role",
                        ft.name
                    )))
                }
            }
        }
        for ft in schema.iter() {
            let from = ft.from.as_deref().unwrap_or_default();
            match ft.role {
                Role::OneHot => out.make_one_hot(from, &ft.name)?,
                Role::Embed => out.make_embed(from, &ft.name, ft.emb_cols)?,
                _ => {}
            }
        }
        Ok(out)
    }

    /// Rebuild every column from its raw view. With `schema` the
    /// supplied fit parameters are adopted; without it, parameters are
    /// refit from the data.
    pub fn reinit(&self, schema: Option<&Schema>) -> FrameResult<Frame> {
        match schema {
            Some(schema) => self.update_schema(schema),
            None => {
                let mut out = Frame::new(self.keep_raw);
                for col in &self.columns {
                    let ft = &col.ft;
                    match ft.role {
                        Role::Cts => {
                            let raw = self.raw_of(&ft.name)?;
                            out.append_cts(&raw, &ft.name, ft.normalized, None)?;
                        }
                        Role::Cat => {
                            let raw = self.raw_of(&ft.name)?;
                            out.append_cat(&raw, &ft.name, None)?;
                        }
                        Role::OneHot | Role::Embed => {}
                        Role::Either => unreachable!("frames never store placeholder columns"),
                    }
                }
                for col in &self.columns {
                    let ft = &col.ft;
                    let from = ft.from.as_deref().unwrap_or_default();
                    match ft.role {
                        Role::OneHot => out.make_one_hot(from, &ft.name)?,
                        Role::Embed => out.make_embed(from, &ft.name, ft.emb_cols)?,
                        _ => {}
                    }
                }
                Ok(out)
            }
        }
    }

    /// Join another frame on a shared categorical key.
    ///
    /// Both key columns must be categorical with identical level
    /// dictionaries; all other field names must be disjoint. The right
    /// side is matched by binary search on its sorted key codes, taking
    /// the first match when the right key repeats. Output rows follow
    /// this frame's current order.
    pub fn join(&self, right: &Frame, on: &str, kind: JoinKind) -> FrameResult<Frame> {
        let left_key = self
            .column(on)
            .ok_or_else(|| FrameError::unknown_field(on))?;
        let right_key = right
            .column(on)
            .ok_or_else(|| FrameError::unknown_field(on))?;
        if left_key.ft.role != Role::Cat {
            return Err(FrameError::role_mismatch(on, "Cat", left_key.ft.role));
        }
        if right_key.ft.role != Role::Cat {
            return Err(FrameError::role_mismatch(on, "Cat", right_key.ft.role));
        }
        if left_key.ft.params.levels != right_key.ft.params.levels {
            return Err(FrameError::join(format!(
                "'{on}' has different level dictionaries on the two sides"
            )));
        }
        let left_names: HashSet<&str> = self.field_names().into_iter().collect();
        for name in right.field_names() {
            if name != on && left_names.contains(name) {
                return Err(FrameError::join(format!("field '{name}' exists on both sides")));
            }
        }

        // Sort the right side ascending by the key so each left code can
        // be found by binary search.
        let mut right_sorted = right.clone();
        right_sorted.sort(on, true)?;
        let right_codes = right_sorted
            .column(on)
            .expect("key column survives sorting")
            .data
            .ints()
            .expect("Cat columns store integer codes")
            .to_vec();

        let left_codes = left_key.data.ints().expect("Cat columns store integer codes");
        let mut left_idx = Vec::new();
        let mut right_idx: Vec<Option<usize>> = Vec::new();
        for (i, &code) in left_codes.iter().enumerate() {
            let at = right_codes.partition_point(|&c| c < code);
            let matched = right_codes.get(at).is_some_and(|&c| c == code);
            match (matched, kind) {
                (true, _) => {
                    left_idx.push(Some(i));
                    right_idx.push(Some(at));
                }
                (false, JoinKind::Left) => {
                    left_idx.push(Some(i));
                    right_idx.push(None);
                }
                (false, JoinKind::Inner) => {}
            }
        }
        if left_idx.is_empty() {
            return Err(FrameError::empty_slice(format!("join on '{on}'")));
        }
        debug!("join on '{on}' matched {} of {} left rows", left_idx.len(), self.rows);

        let mut out = Frame::new(self.keep_raw);
        out.rows = left_idx.len();
        for col in &self.columns {
            out.columns.push(col.gather(&left_idx, None)?);
        }
        // Right expanded columns are rebuilt from their gathered parent
        // rather than gathered themselves, since an unmatched row has no
        // valid indicator block to copy.
        for col in &right_sorted.columns {
            if col.ft.name == on || col.ft.role.is_one_hot_like() {
                continue;
            }
            let fill = col.ft.params.default.clone();
            out.columns.push(col.gather(&right_idx, fill.as_ref())?);
        }
        out.check_invariants()?;
        for col in &right_sorted.columns {
            let ft = &col.ft;
            let from = ft.from.as_deref().unwrap_or_default();
            match ft.role {
                Role::OneHot => out.make_one_hot(from, &ft.name)?,
                Role::Embed => out.make_embed(from, &ft.name, ft.emb_cols)?,
                _ => {}
            }
        }
        Ok(out)
    }

    /// Vertically append another frame's rows.
    ///
    /// Fields must match by name and role. Without a replacement schema,
    /// the other frame's raw values are encoded under this frame's fit
    /// parameters, so a categorical value unseen on this side (and not
    /// covered by a default) is an error. With `schema`, both sides are
    /// re-encoded under it.
    pub fn append_rows(&self, other: &Frame, schema: Option<&Schema>) -> FrameResult<Frame> {
        let mine: HashSet<(&str, Role)> = self
            .columns
            .iter()
            .map(|c| (c.ft.name.as_str(), c.ft.role))
            .collect();
        let theirs: HashSet<(&str, Role)> = other
            .columns
            .iter()
            .map(|c| (c.ft.name.as_str(), c.ft.role))
            .collect();
        if mine != theirs {
            return Err(FrameError::invariant(
                "appended frames must have the same fields and roles".to_string(),
            ));
        }

        let combined = |name: &str| -> FrameResult<Raw> {
            let mut raw = self.raw_of(name)?;
            let other_raw = other.raw_of(name)?;
            for i in 0..other_raw.len() {
                raw.push(other_raw.get(i)?)?;
            }
            Ok(raw)
        };

        // With a replacement schema both sides are encoded under it from
        // the start; otherwise the other frame's values must fit this
        // frame's dictionaries.
        let target: Schema = match schema {
            Some(schema) => schema.clone(),
            None => self.schema(),
        };

        let mut out = Frame::new(self.keep_raw);
        for ft in target.iter() {
            match ft.role {
                Role::Cts => {
                    let raw = combined(&ft.name)?;
                    out.append_cts(&raw, &ft.name, ft.normalized, Some(&ft.params))?;
                }
                Role::Cat => {
                    let raw = combined(&ft.name)?;
                    out.append_cat(&raw, &ft.name, Some(&ft.params))?;
                }
                _ => {}
            }
        }
        for ft in target.iter() {
            let from = ft.from.as_deref().unwrap_or_default();
            match ft.role {
                Role::OneHot => out.make_one_hot(from, &ft.name)?,
                Role::Embed => out.make_embed(from, &ft.name, ft.emb_cols)?,
                _ => {}
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{letters_frame, lvl};
    use approx::assert_abs_diff_eq;
    use itertools::Itertools;
    use rstest::rstest;

    fn cts_1_to_10() -> Raw {
        Raw::from((1..=10).map(|i| i as f64).collect_vec())
    }

    #[test]
    fn test_cts_normalization_round_trip() {
        let mut frame = Frame::new(false);
        frame.append_cts(&cts_1_to_10(), "x", true, None).unwrap();

        let ft = frame.field_type("x").unwrap();
        assert_abs_diff_eq!(ft.params.location, 5.5);
        assert_abs_diff_eq!(ft.params.scale, 3.0276503, epsilon = 1e-6);

        let raw = frame.raw_of("x").unwrap().as_f64_vec().unwrap();
        for (got, want) in raw.iter().zip(1..=10) {
            assert_abs_diff_eq!(got, &(want as f64), epsilon = 1e-6);
        }

        // Re-encoding without normalization returns the plain values.
        let mut plain_ft = ft.clone();
        plain_ft.normalized = false;
        let schema = Schema::new(vec![plain_ft]).unwrap();
        let plain = frame.update_schema(&schema).unwrap();
        let data = plain.column("x").unwrap().data().floats().unwrap().to_vec();
        for (got, want) in data.iter().zip(1..=10) {
            assert_abs_diff_eq!(got, &(want as f64), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_zero_variance_rejected() {
        let mut frame = Frame::new(false);
        let flat = Raw::from(vec![3.0; 5]);
        let err = frame.append_cts(&flat, "x", true, None);
        assert!(matches!(err, Err(FrameError::ZeroVariance { .. })));
        // the failed append must not leave a column behind
        assert!(frame.is_empty());
    }

    #[test]
    fn test_cat_encoding_deterministic() {
        let mut frame = Frame::new(false);
        let raw = Raw::from(
            ["d", "e", "a", "b", "c"].map(String::from).to_vec(),
        );
        frame.append_cat(&raw, "grade", None).unwrap();
        let codes = frame.column("grade").unwrap().data().ints().unwrap().to_vec();
        assert_eq!(codes, vec![3, 4, 0, 1, 2]);
    }

    #[test]
    fn test_cat_external_dictionary_with_default() {
        let mut params = FitParams::from_levels(vec![
            lvl("e"),
            lvl("b"),
            lvl("c"),
            lvl("d"),
        ]);
        params.default = Some(lvl("d"));

        let mut frame = Frame::new(false);
        let raw = Raw::from(
            ["d", "e", "a", "b", "c"].map(String::from).to_vec(),
        );
        frame.append_cat(&raw, "grade", Some(&params)).unwrap();
        let codes = frame.column("grade").unwrap().data().ints().unwrap().to_vec();
        // "a" is unknown and falls back to the default "d" (code 3);
        // "e" itself encodes as 0 under the external dictionary.
        assert_eq!(codes, vec![3, 0, 3, 1, 2]);

        let mut no_default = params.clone();
        no_default.default = None;
        let mut frame2 = Frame::new(false);
        let err = frame2.append_cat(&raw, "grade", Some(&no_default));
        assert!(matches!(err, Err(FrameError::UnknownLevel { .. })));
    }

    #[test]
    fn test_one_hot_shape() {
        let frame = letters_frame(false);
        let hot = frame.column("x2").unwrap();
        assert_eq!(hot.field_type().cats, 3);
        let data = hot.data().floats().unwrap();
        assert_eq!(data.len(), frame.rows() * 3);
        for chunk in data.chunks(3) {
            assert_abs_diff_eq!(chunk.iter().sum::<f64>(), 1.0);
        }
    }

    #[test]
    fn test_embed_shares_one_hot_storage() {
        let mut frame = letters_frame(false);
        frame.make_embed("x1", "x1_emb", 4).unwrap();
        let emb = frame.column("x1_emb").unwrap();
        assert_eq!(emb.field_type().role, Role::Embed);
        assert_eq!(emb.field_type().emb_cols, 4);
        assert_eq!(
            emb.data().floats().unwrap(),
            frame.column("x2").unwrap().data().floats().unwrap()
        );

        let err = frame.make_embed("x1", "too_narrow", 1);
        assert!(matches!(err, Err(FrameError::Invariant(_))));
    }

    #[test]
    fn test_one_hot_requires_cat_parent() {
        let mut frame = Frame::new(false);
        frame.append_cts(&cts_1_to_10(), "x", false, None).unwrap();
        let err = frame.make_one_hot("x", "x_oh");
        assert!(matches!(err, Err(FrameError::RoleMismatch { .. })));
    }

    #[test]
    fn test_shuffle_keeps_rows_aligned() {
        let mut frame = letters_frame(false);
        frame.shuffle_seeded(20240117).unwrap();
        assert!(frame.sort_field().is_none());

        let x1 = frame.column("x1").unwrap().data().ints().unwrap().to_vec();
        let hot = frame.column("x2").unwrap().data().floats().unwrap().to_vec();
        for (row, &code) in x1.iter().enumerate() {
            for k in 0..3 {
                let want = if k == code as usize { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(hot[row * 3 + k], want);
            }
        }
    }

    #[test]
    fn test_sort_orders_and_preserves_multiset() {
        let mut frame = letters_frame(false);
        let before = frame.raw_of("x0").unwrap().as_f64_vec().unwrap();
        frame.shuffle_seeded(7).unwrap();
        frame.sort("x0", true).unwrap();
        assert_eq!(frame.sort_field(), Some("x0"));

        let after = frame.raw_of("x0").unwrap().as_f64_vec().unwrap();
        for pair in after.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        let mut multiset = after.clone();
        multiset.sort_by(f64::total_cmp);
        let mut expected = before;
        expected.sort_by(f64::total_cmp);
        assert_eq!(multiset, expected);
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn test_sort_descending(#[case] ascending: bool) {
        let mut frame = letters_frame(false);
        frame.sort("x0", ascending).unwrap();
        let data = frame.raw_of("x0").unwrap().as_f64_vec().unwrap();
        for pair in data.windows(2) {
            if ascending {
                assert!(pair[0] <= pair[1]);
            } else {
                assert!(pair[0] >= pair[1]);
            }
        }
    }

    #[test]
    fn test_sort_on_one_hot_uses_parent() {
        let mut frame = letters_frame(false);
        frame.sort("x2", true).unwrap();
        let codes = frame.column("x1").unwrap().data().ints().unwrap().to_vec();
        for pair in codes.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_subset_preserves_levels() {
        let frame = letters_frame(false);
        let sub = frame.subset(&[0, 2, 5]).unwrap();
        assert_eq!(sub.rows(), 3);
        assert_eq!(
            sub.field_type("x1").unwrap().params.levels,
            frame.field_type("x1").unwrap().params.levels
        );
        // summaries reflect the subset rows
        assert_eq!(sub.column("x1").unwrap().summary().nrows, 3);
    }

    #[test]
    fn test_where_in_uses_raw_values() {
        let frame = letters_frame(false);
        let only_c = frame.where_in("x1", &[lvl("c")]).unwrap();
        let codes = only_c.column("x1").unwrap().data().ints().unwrap();
        assert!(codes.iter().all(|&c| c == 2));
        assert_eq!(only_c.rows(), 5);
    }

    #[test]
    fn test_empty_slice() {
        let frame = letters_frame(false);
        let err = frame.slice(|_| false);
        assert!(matches!(err, Err(FrameError::EmptySlice { .. })));
    }

    #[test]
    fn test_drop_field_removes_orphans() {
        let mut frame = letters_frame(false);
        frame.drop_field("x1").unwrap();
        assert_eq!(frame.field_names(), vec!["x0"]);
    }

    #[test]
    fn test_keep_retains_one_hot_parent() {
        let mut frame = letters_frame(false);
        frame.keep(&["x2"]).unwrap();
        let mut names = frame.field_names();
        names.sort();
        assert_eq!(names, vec!["x1", "x2"]);
    }

    #[test]
    fn test_update_schema_identity() {
        let frame = letters_frame(true);
        let same = frame.update_schema(&frame.schema()).unwrap();
        for col in frame.columns() {
            let other = same.column(&col.field_type().name).unwrap();
            assert_eq!(col.data(), other.data());
        }
    }

    #[test]
    fn test_reinit_refits_params() {
        let frame = letters_frame(true);
        let sub = frame.subset(&[0, 1, 2, 3]).unwrap();
        let refit = sub.reinit(None).unwrap();
        // after refitting, the location is the subset mean
        let ft = refit.field_type("x0").unwrap();
        assert_abs_diff_eq!(ft.params.location, 1.5);
    }

    #[test]
    fn test_join_inner_on_cat_key() {
        let keys = FitParams::from_levels((1..=7i64).map(Value::I64).collect_vec());

        let mut left = Frame::new(false);
        left.append_cat(&Raw::from((1..=7i64).collect_vec()), "row", Some(&keys))
            .unwrap();
        left.append_cts(&Raw::from((1..=7).map(|i| i as f64 * 10.0).collect_vec()), "left_val", false, None)
            .unwrap();

        let mut right = Frame::new(false);
        right
            .append_cat(&Raw::from((1..=5i64).collect_vec()), "row", Some(&keys))
            .unwrap();
        right
            .append_cts(&Raw::from((1..=5).map(|i| i as f64 * 100.0).collect_vec()), "right_val", false, None)
            .unwrap();

        let joined = left.join(&right, "row", JoinKind::Inner).unwrap();
        assert_eq!(joined.rows(), 5);
        let mut names = joined.field_names();
        names.sort();
        assert_eq!(names, vec!["left_val", "right_val", "row"]);

        let lv = joined.column("left_val").unwrap().data().floats().unwrap();
        let rv = joined.column("right_val").unwrap().data().floats().unwrap();
        for i in 0..5 {
            assert_abs_diff_eq!(rv[i], lv[i] * 10.0);
        }
    }

    #[test]
    fn test_join_rejects_shared_field_names() {
        let keys = FitParams::from_levels(vec![Value::I64(1), Value::I64(2)]);
        let mut left = Frame::new(false);
        left.append_cat(&Raw::from(vec![1i64, 2]), "k", Some(&keys)).unwrap();
        left.append_cts(&Raw::from(vec![1.0, 2.0]), "v", false, None).unwrap();
        let right = left.clone();
        let err = left.join(&right, "k", JoinKind::Inner);
        assert!(matches!(err, Err(FrameError::Join { .. })));
    }

    #[test]
    fn test_append_rows_rejects_new_levels() {
        let mut left = Frame::new(false);
        left.append_cat(
            &Raw::from(["a", "b"].map(String::from).to_vec()),
            "x",
            None,
        )
        .unwrap();

        let mut right = Frame::new(false);
        right
            .append_cat(&Raw::from(["a", "z"].map(String::from).to_vec()), "x", None)
            .unwrap();

        let err = left.append_rows(&right, None);
        assert!(matches!(err, Err(FrameError::UnknownLevel { .. })));
    }

    #[test]
    fn test_append_rows_under_replacement_schema() {
        let mut left = Frame::new(false);
        left.append_cat(
            &Raw::from(["a", "b"].map(String::from).to_vec()),
            "x",
            None,
        )
        .unwrap();

        let mut right = Frame::new(false);
        right
            .append_cat(&Raw::from(["a", "z"].map(String::from).to_vec()), "x", None)
            .unwrap();

        let wide = FitParams::from_levels(vec![lvl("a"), lvl("b"), lvl("z")]);
        let schema = Schema::new(vec![FieldType::new_cat("x", wide)]).unwrap();
        let joined = left.append_rows(&right, Some(&schema)).unwrap();
        assert_eq!(joined.rows(), 4);
        let codes = joined.column("x").unwrap().data().ints().unwrap().to_vec();
        assert_eq!(codes, vec![0, 1, 0, 2]);
    }
}
