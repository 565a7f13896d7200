//! Per-column schema: roles, fit parameters, and level dictionaries.
//!
//! A [`FieldType`] describes how one column is encoded; a [`Schema`] is the
//! ordered list of field types for a whole frame. Fit parameters are frozen
//! when a column is first encoded and reapplied verbatim at inference, so a
//! schema saved from a training run reproduces the exact same encoding when
//! loaded later. Level dictionaries are kept in the order of the raw
//! values' string form, which makes code assignment deterministic across
//! runs and platforms.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::raw::{Kind, Value};

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while building, saving, or loading schemas.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("field '{0}' appears more than once")]
    DuplicateField(String),

    #[error("field '{0}' is not part of the schema")]
    UnknownField(String),

    #[error("could not {action} schema file {}: {reason}", .path.display())]
    FileError { action: &'static str, path: PathBuf, reason: String },

    #[error("level '{value}' could not be read as {kind}")]
    BadLevel { value: String, kind: Kind },

    #[error("{0}")]
    Invalid(String),
}

impl SchemaError {
    pub fn duplicate_field<S: Into<String>>(name: S) -> Self {
        Self::DuplicateField(name.into())
    }

    pub fn unknown_field<S: Into<String>>(name: S) -> Self {
        Self::UnknownField(name.into())
    }

    pub fn file_error<P: Into<PathBuf>, S: Into<String>>(
        action: &'static str,
        path: P,
        reason: S,
    ) -> Self {
        Self::FileError { action, path: path.into(), reason: reason.into() }
    }

    pub fn bad_level<S: Into<String>>(value: S, kind: Kind) -> Self {
        Self::BadLevel { value: value.into(), kind }
    }

    pub fn invalid<S: Into<String>>(reason: S) -> Self {
        Self::Invalid(reason.into())
    }
}

/// The semantic classification of a column. This single tag drives
/// storage layout and operator dispatch everywhere else in the crate.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
pub enum Role {
    /// Continuous numeric, one scalar per row
    Cts,
    /// Discrete categorical, one integer code per row
    Cat,
    /// A categorical expanded to a dense 0/1 row
    OneHot,
    /// Same storage as `OneHot`, marked for a learned embedding
    Embed,
    /// Polymorphic placeholder used only by expression results
    /// before they are installed in a frame
    Either,
}

impl Role {
    /// Whether columns of this role store flat float data.
    pub fn is_float_storage(&self) -> bool {
        matches!(self, Role::Cts | Role::OneHot | Role::Embed)
    }

    pub fn is_one_hot_like(&self) -> bool {
        matches!(self, Role::OneHot | Role::Embed)
    }
}

/// Fit-time parameters for one column, reapplied at inference.
///
/// For continuous columns `location`/`scale` hold the mean and sample
/// standard deviation used for normalization. For categorical columns
/// `levels` maps each raw value to its contiguous code and `default`
/// names the fallback level for unseen values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FitParams {
    pub location: f64,
    pub scale: f64,
    pub default: Option<Value>,
    pub levels: IndexMap<Value, i32>,
}

impl FitParams {
    pub fn cts(location: f64, scale: f64) -> Self {
        Self { location, scale, ..Default::default() }
    }

    /// Build a level dictionary from already-distinct values, assigning
    /// codes in the order given. Callers are expected to pass the output
    /// of [`crate::raw::Raw::distinct_sorted`] so codes are stable.
    pub fn from_levels(levels: Vec<Value>) -> Self {
        let levels = levels
            .into_iter()
            .enumerate()
            .map(|(code, v)| (v, code as i32))
            .collect();
        Self { levels, ..Default::default() }
    }

    /// The code for a raw value, falling back to the default level.
    /// `None` means the value is unknown and no default resolves.
    pub fn code_of(&self, value: &Value) -> Option<i32> {
        self.levels.get(value).copied().or_else(|| {
            self.default.as_ref().and_then(|d| self.levels.get(d).copied())
        })
    }

    /// The raw value for a code.
    pub fn value_of(&self, code: i32) -> Option<&Value> {
        self.levels.iter().find(|(_, &c)| c == code).map(|(v, _)| v)
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// The kind of the level keys, if any levels exist.
    pub fn level_kind(&self) -> Option<Kind> {
        self.levels.keys().next().map(|v| v.kind())
    }
}

/// The schema for a single column.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldType {
    pub name: String,
    pub role: Role,
    /// Number of levels (and one-hot width); 0 for continuous columns.
    pub cats: usize,
    /// Embedding width hint; at least 2 when `role` is [`Role::Embed`].
    pub emb_cols: usize,
    /// Whether continuous data was normalized by `(x - location) / scale`.
    pub normalized: bool,
    /// The parent categorical field for one-hot and embedding columns.
    pub from: Option<String>,
    pub params: FitParams,
}

impl FieldType {
    pub fn new_cts<S: Into<String>>(name: S, normalized: bool, params: FitParams) -> Self {
        Self {
            name: name.into(),
            role: Role::Cts,
            cats: 0,
            emb_cols: 0,
            normalized,
            from: None,
            params,
        }
    }

    pub fn new_cat<S: Into<String>>(name: S, params: FitParams) -> Self {
        let cats = params.n_levels();
        Self {
            name: name.into(),
            role: Role::Cat,
            cats,
            emb_cols: 0,
            normalized: false,
            from: None,
            params,
        }
    }

    pub fn new_one_hot<S: Into<String>>(name: S, from: S, params: FitParams) -> Self {
        let cats = params.n_levels();
        Self {
            name: name.into(),
            role: Role::OneHot,
            cats,
            emb_cols: 0,
            normalized: false,
            from: Some(from.into()),
            params,
        }
    }

    /// The per-row width of the encoded storage.
    pub fn width(&self) -> usize {
        self.cats.max(1)
    }
}

/// The ordered collection of field types for a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema(Vec<FieldType>);

impl Schema {
    pub fn new(fields: Vec<FieldType>) -> SchemaResult<Self> {
        let mut schema = Schema::default();
        for ft in fields {
            schema.push(ft)?;
        }
        Ok(schema)
    }

    pub fn push(&mut self, ft: FieldType) -> SchemaResult<()> {
        if self.get(&ft.name).is_some() {
            return Err(SchemaError::duplicate_field(&ft.name));
        }
        self.0.push(ft);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldType> {
        self.0.iter().find(|ft| ft.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldType> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|ft| ft.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Write the schema as a JSON list, one record per column.
    pub fn save(&self, path: &Path) -> SchemaResult<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .map_err(|e| SchemaError::file_error("write", path, e.to_string()))
    }

    /// Load a schema previously written by [`Schema::save`].
    pub fn load(path: &Path) -> SchemaResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| SchemaError::file_error("read", path, e.to_string()))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> SchemaResult<String> {
        let recs: Vec<FieldTypeRec> = self.0.iter().map(FieldTypeRec::from).collect();
        serde_json::to_string_pretty(&recs)
            .map_err(|e| SchemaError::invalid(format!("could not serialize schema: {e}")))
    }

    pub fn from_json(json: &str) -> SchemaResult<Self> {
        let recs: Vec<FieldTypeRec> = serde_json::from_str(json)
            .map_err(|e| SchemaError::invalid(format!("could not deserialize schema: {e}")))?;
        let fields = recs
            .into_iter()
            .map(FieldType::try_from)
            .collect::<SchemaResult<Vec<_>>>()?;
        Self::new(fields)
    }
}

/// On-disk form of one field type. Level keys are stored by their string
/// form alongside the kind needed to read them back.
#[derive(Debug, Serialize, Deserialize)]
struct FieldTypeRec {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Role")]
    role: Role,
    #[serde(rename = "Cats")]
    cats: usize,
    #[serde(rename = "EmbCols")]
    emb_cols: usize,
    #[serde(rename = "Normalized")]
    normalized: bool,
    #[serde(rename = "From")]
    from: Option<String>,
    #[serde(rename = "FP")]
    fp: FitParamsRec,
}

#[derive(Debug, Serialize, Deserialize)]
struct FitParamsRec {
    location: f64,
    scale: f64,
    default: Option<String>,
    kind: Option<Kind>,
    lvl: IndexMap<String, i32>,
}

impl From<&FieldType> for FieldTypeRec {
    fn from(ft: &FieldType) -> Self {
        let kind = ft.params.level_kind();
        let lvl = ft
            .params
            .levels
            .iter()
            .map(|(v, &code)| (encode_level(v), code))
            .collect();
        Self {
            name: ft.name.clone(),
            role: ft.role,
            cats: ft.cats,
            emb_cols: ft.emb_cols,
            normalized: ft.normalized,
            from: ft.from.clone(),
            fp: FitParamsRec {
                location: ft.params.location,
                scale: ft.params.scale,
                default: ft.params.default.as_ref().map(encode_level),
                kind,
                lvl,
            },
        }
    }
}

impl TryFrom<FieldTypeRec> for FieldType {
    type Error = SchemaError;

    fn try_from(rec: FieldTypeRec) -> Result<Self, Self::Error> {
        let mut levels = IndexMap::with_capacity(rec.fp.lvl.len());
        if !rec.fp.lvl.is_empty() {
            let kind = rec.fp.kind.ok_or_else(|| {
                SchemaError::invalid(format!("field '{}' has levels but no level kind", rec.name))
            })?;
            for (s, code) in rec.fp.lvl {
                levels.insert(decode_level(&s, kind)?, code);
            }
        }
        let default = match (rec.fp.default, rec.fp.kind) {
            (Some(s), Some(kind)) => Some(decode_level(&s, kind)?),
            (Some(s), None) => {
                return Err(SchemaError::invalid(format!(
                    "field '{}' has default '{s}' but no level kind",
                    rec.name
                )))
            }
            (None, _) => None,
        };
        Ok(FieldType {
            name: rec.name,
            role: rec.role,
            cats: rec.cats,
            emb_cols: rec.emb_cols,
            normalized: rec.normalized,
            from: rec.from,
            params: FitParams {
                location: rec.fp.location,
                scale: rec.fp.scale,
                default,
                levels,
            },
        })
    }
}

fn encode_level(v: &Value) -> String {
    v.to_string()
}

fn decode_level(s: &str, kind: Kind) -> SchemaResult<Value> {
    match kind {
        Kind::Str => Ok(Value::Str(s.to_string())),
        Kind::Int32 => s
            .parse::<i32>()
            .map(Value::I32)
            .map_err(|_| SchemaError::bad_level(s, kind)),
        Kind::Int64 => s
            .parse::<i64>()
            .map(Value::I64)
            .map_err(|_| SchemaError::bad_level(s, kind)),
        Kind::Date => {
            // Dates are written as plain ISO dates; tolerate a trailing
            // time component from other producers.
            let date_part = s.split('T').next().unwrap_or(s);
            NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| SchemaError::bad_level(s, kind))
        }
        Kind::Float64 | Kind::Float32 => Err(SchemaError::bad_level(s, kind)),
    }
}
