//! Row sources and sinks for building and exporting frames.
//!
//! A [`RowReader`] hands out rows of [`Value`]s together with a
//! [`TableSpec`] naming each field and its base type. The delimited-text
//! implementation here covers the common flat-file case; column-store
//! drivers live outside this crate and only need to implement the trait.
//! A [`Frame`] can itself be exposed as a reader so its contents can be
//! exported through any [`RowWriter`].

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use itertools::Itertools;
use log::debug;

use crate::error::FileLocation;
use crate::frame::Frame;
use crate::raw::{Kind, Raw, Value};
use crate::schema::Role;

pub type ReaderResult<T> = Result<T, ReaderError>;

/// Errors from reading or writing row-oriented files.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("could not open {}: {reason}", .path.display())]
    CouldNotOpen { path: PathBuf, reason: String },

    #[error("could not read from {loc}: {reason}")]
    CouldNotRead { loc: FileLocation, reason: String },

    #[error("could not parse {loc}: {cause}")]
    ParseError { loc: FileLocation, cause: String },

    #[error("the source produced no rows")]
    EmptyRead,

    #[error("cannot seek to row {row}: the source has {rows} rows")]
    BadSeek { row: usize, rows: usize },

    #[error("could not write to {}: {reason}", .path.display())]
    CouldNotWrite { path: PathBuf, reason: String },
}

impl ReaderError {
    pub fn could_not_open<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::CouldNotOpen { path: path.into(), reason: reason.into() }
    }

    pub fn could_not_read<S: Into<String>>(loc: FileLocation, reason: S) -> Self {
        Self::CouldNotRead { loc, reason: reason.into() }
    }

    pub fn parse_error<S: Into<String>>(loc: FileLocation, cause: S) -> Self {
        Self::ParseError { loc, cause: cause.into() }
    }

    pub fn could_not_write<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::CouldNotWrite { path: path.into(), reason: reason.into() }
    }
}

/// The base type of one field as presented by a row source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseKind {
    Float,
    Int,
    Str,
    /// A string validated to a fixed byte width.
    FixedStr(usize),
    Date,
}

impl BaseKind {
    /// The raw buffer kind this base type loads into.
    pub fn kind(&self) -> Kind {
        match self {
            BaseKind::Float => Kind::Float64,
            BaseKind::Int => Kind::Int64,
            BaseKind::Str | BaseKind::FixedStr(_) => Kind::Str,
            BaseKind::Date => Kind::Date,
        }
    }
}

/// The field names and base types of a row source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSpec {
    pub fields: Vec<(String, BaseKind)>,
}

impl TableSpec {
    pub fn new(fields: Vec<(String, BaseKind)>) -> Self {
        Self { fields }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn kind_of(&self, name: &str) -> Option<BaseKind> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, k)| *k)
    }

    pub fn ncols(&self) -> usize {
        self.fields.len()
    }
}

/// A synchronous source of data rows.
///
/// `read` returns up to `n` rows and an empty vector at end of input;
/// with `validate` each row is checked against the table spec. Sources
/// clean up on drop, so there is no explicit close.
pub trait RowReader {
    /// Total number of data rows in the source.
    fn count_lines(&mut self) -> ReaderResult<usize>;

    fn read(&mut self, n: usize, validate: bool) -> ReaderResult<Vec<Vec<Value>>>;

    /// Rewind to the first data row.
    fn reset(&mut self) -> ReaderResult<()>;

    /// Position the cursor so the next `read` starts at `row`.
    fn seek(&mut self, row: usize) -> ReaderResult<()>;

    fn table_spec(&self) -> &TableSpec;
}

/// Reader for delimiter-separated text files with a header line.
///
/// The table spec may be supplied up front or inferred by sniffing the
/// first data line: integer-parsable tokens become `Int`, float-parsable
/// become `Float`, tokens matching `MM/DD/CCYY` or `CCYY-MM-DD` become
/// `Date`, anything else `Str`. All-digit date stamps such as `CCYYMMDD`
/// sniff as integers, so pass an explicit spec for those.
pub struct DelimReader {
    path: PathBuf,
    delim: char,
    spec: TableSpec,
    lines: Lines<BufReader<File>>,
    line_num: usize,
}

impl DelimReader {
    /// Open `path` and infer the table spec from the header and the
    /// first data line.
    pub fn open(path: &Path, delim: char) -> ReaderResult<Self> {
        let mut lines = open_lines(path)?;
        let header = next_line(&mut lines, path, 1)?
            .ok_or_else(|| ReaderError::could_not_read(path.into(), "file is empty"))?;
        let names = header.split(delim).map(|s| s.trim().to_string()).collect_vec();

        let first = next_line(&mut lines, path, 2)?.ok_or(ReaderError::EmptyRead)?;
        let kinds = first
            .split(delim)
            .map(|tok| sniff_kind(tok.trim()))
            .collect_vec();
        if names.len() != kinds.len() {
            return Err(ReaderError::parse_error(
                FileLocation::new(Some(path), Some(2), Some(first)),
                format!("{} header fields but {} data fields", names.len(), kinds.len()),
            ));
        }
        let spec = TableSpec::new(names.into_iter().zip(kinds).collect());
        debug!("inferred {} fields from {}", spec.ncols(), path.display());

        // Reopen so the first data line is read again by `read`.
        let mut reader = Self {
            path: path.to_path_buf(),
            delim,
            spec,
            lines: open_lines(path)?,
            line_num: 0,
        };
        reader.reset()?;
        Ok(reader)
    }

    /// Open `path` with a known table spec. The first line is still
    /// expected to be a header and is skipped.
    pub fn with_spec(path: &Path, delim: char, spec: TableSpec) -> ReaderResult<Self> {
        let mut reader = Self {
            path: path.to_path_buf(),
            delim,
            spec,
            lines: open_lines(path)?,
            line_num: 0,
        };
        reader.reset()?;
        Ok(reader)
    }

    fn location(&self, line: Option<String>) -> FileLocation {
        FileLocation::new(Some(self.path.as_path()), Some(self.line_num), line)
    }

    fn parse_row(&self, line: &str, validate: bool) -> ReaderResult<Vec<Value>> {
        let tokens = line.split(self.delim).map(str::trim).collect_vec();
        if tokens.len() != self.spec.ncols() {
            return Err(ReaderError::parse_error(
                self.location(Some(line.to_string())),
                format!("expected {} fields, found {}", self.spec.ncols(), tokens.len()),
            ));
        }
        let mut row = Vec::with_capacity(tokens.len());
        for (tok, (name, kind)) in tokens.iter().zip(&self.spec.fields) {
            let value = parse_value(tok, *kind, validate).map_err(|cause| {
                ReaderError::parse_error(
                    self.location(Some(line.to_string())),
                    format!("field '{name}': {cause}"),
                )
            })?;
            row.push(value);
        }
        Ok(row)
    }
}

impl RowReader for DelimReader {
    fn count_lines(&mut self) -> ReaderResult<usize> {
        // Count on a fresh handle so the current cursor is undisturbed.
        let lines = open_lines(&self.path)?;
        let total = lines.count();
        Ok(total.saturating_sub(1))
    }

    fn read(&mut self, n: usize, validate: bool) -> ReaderResult<Vec<Vec<Value>>> {
        let mut rows = Vec::with_capacity(n);
        while rows.len() < n {
            self.line_num += 1;
            match next_line(&mut self.lines, &self.path, self.line_num)? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => rows.push(self.parse_row(&line, validate)?),
                None => break,
            }
        }
        Ok(rows)
    }

    fn reset(&mut self) -> ReaderResult<()> {
        self.lines = open_lines(&self.path)?;
        self.line_num = 1;
        // Skip the header.
        next_line(&mut self.lines, &self.path, 1)?;
        Ok(())
    }

    fn seek(&mut self, row: usize) -> ReaderResult<()> {
        self.reset()?;
        for _ in 0..row {
            self.line_num += 1;
            if next_line(&mut self.lines, &self.path, self.line_num)?.is_none() {
                let rows = self.count_lines()?;
                return Err(ReaderError::BadSeek { row, rows });
            }
        }
        Ok(())
    }

    fn table_spec(&self) -> &TableSpec {
        &self.spec
    }
}

fn open_lines(path: &Path) -> ReaderResult<Lines<BufReader<File>>> {
    let f = File::open(path).map_err(|e| ReaderError::could_not_open(path, e.to_string()))?;
    Ok(BufReader::new(f).lines())
}

fn next_line(
    lines: &mut Lines<BufReader<File>>,
    path: &Path,
    line_num: usize,
) -> ReaderResult<Option<String>> {
    match lines.next() {
        Some(Ok(line)) => Ok(Some(line)),
        Some(Err(e)) => Err(ReaderError::could_not_read(
            FileLocation::new::<_, String>(Some(path), Some(line_num), None),
            e.to_string(),
        )),
        None => Ok(None),
    }
}

fn sniff_kind(token: &str) -> BaseKind {
    if token.parse::<i64>().is_ok() {
        BaseKind::Int
    } else if token.parse::<f64>().is_ok() {
        BaseKind::Float
    } else if parse_date(token).is_some() {
        BaseKind::Date
    } else {
        BaseKind::Str
    }
}

fn parse_date(token: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(token, "%m/%d/%Y")
        .or_else(|_| NaiveDate::parse_from_str(token, "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(token, "%Y%m%d"))
        .ok()
}

fn parse_value(token: &str, kind: BaseKind, validate: bool) -> Result<Value, String> {
    match kind {
        BaseKind::Float => token
            .parse::<f64>()
            .map(Value::F64)
            .map_err(|_| format!("'{token}' is not a float")),
        BaseKind::Int => token
            .parse::<i64>()
            .map(Value::I64)
            .map_err(|_| format!("'{token}' is not an integer")),
        BaseKind::Str => Ok(Value::Str(token.to_string())),
        BaseKind::FixedStr(width) => {
            if validate && token.len() != width {
                Err(format!("'{token}' is not {width} bytes wide"))
            } else {
                Ok(Value::Str(token.to_string()))
            }
        }
        BaseKind::Date => parse_date(token)
            .map(Value::Date)
            .ok_or_else(|| format!("'{token}' is not a date")),
    }
}

/// A frame exposed as a row source so it can be exported.
///
/// Continuous columns are exported un-normalized, categorical columns as
/// their decoded raw levels; one-hot and embedding blocks are derived
/// data and are hidden from the exported schema.
pub struct FrameReader {
    spec: TableSpec,
    columns: Vec<Raw>,
    rows: usize,
    cursor: usize,
}

impl FrameReader {
    pub fn new(frame: &Frame) -> crate::frame::FrameResult<Self> {
        let mut fields = Vec::new();
        let mut columns = Vec::new();
        for col in frame.columns() {
            let ft = col.field_type();
            if ft.role.is_one_hot_like() {
                continue;
            }
            let raw = frame.raw_of(&ft.name)?;
            let base = match (ft.role, raw.kind()) {
                (Role::Cts, _) => BaseKind::Float,
                (_, Kind::Int32 | Kind::Int64) => BaseKind::Int,
                (_, Kind::Date) => BaseKind::Date,
                _ => BaseKind::Str,
            };
            fields.push((ft.name.clone(), base));
            columns.push(raw);
        }
        Ok(Self {
            spec: TableSpec::new(fields),
            columns,
            rows: frame.rows(),
            cursor: 0,
        })
    }
}

impl RowReader for FrameReader {
    fn count_lines(&mut self) -> ReaderResult<usize> {
        Ok(self.rows)
    }

    fn read(&mut self, n: usize, _validate: bool) -> ReaderResult<Vec<Vec<Value>>> {
        let end = (self.cursor + n).min(self.rows);
        let mut rows = Vec::with_capacity(end - self.cursor);
        for i in self.cursor..end {
            let row = self
                .columns
                .iter()
                .map(|raw| raw.get(i).expect("row index is within the frame"))
                .collect_vec();
            rows.push(row);
        }
        self.cursor = end;
        Ok(rows)
    }

    fn reset(&mut self) -> ReaderResult<()> {
        self.cursor = 0;
        Ok(())
    }

    fn seek(&mut self, row: usize) -> ReaderResult<()> {
        if row > self.rows {
            return Err(ReaderError::BadSeek { row, rows: self.rows });
        }
        self.cursor = row;
        Ok(())
    }

    fn table_spec(&self) -> &TableSpec {
        &self.spec
    }
}

/// A synchronous sink for data rows.
pub trait RowWriter {
    fn write_row(&mut self, row: &[Value]) -> ReaderResult<()>;

    /// Flush anything buffered; called once after the last row.
    fn finish(&mut self) -> ReaderResult<()>;
}

/// Writer for delimiter-separated text files; emits the header line on
/// construction.
pub struct DelimWriter {
    path: PathBuf,
    delim: char,
    writer: BufWriter<File>,
}

impl DelimWriter {
    pub fn create(path: &Path, delim: char, spec: &TableSpec) -> ReaderResult<Self> {
        let f =
            File::create(path).map_err(|e| ReaderError::could_not_write(path, e.to_string()))?;
        let mut writer = BufWriter::new(f);
        let header = spec.field_names().join(&delim.to_string());
        writeln!(writer, "{header}")
            .map_err(|e| ReaderError::could_not_write(path, e.to_string()))?;
        Ok(Self { path: path.to_path_buf(), delim, writer })
    }
}

impl RowWriter for DelimWriter {
    fn write_row(&mut self, row: &[Value]) -> ReaderResult<()> {
        let line = row.iter().map(|v| v.to_string()).join(&self.delim.to_string());
        writeln!(self.writer, "{line}")
            .map_err(|e| ReaderError::could_not_write(&self.path, e.to_string()))
    }

    fn finish(&mut self) -> ReaderResult<()> {
        self.writer
            .flush()
            .map_err(|e| ReaderError::could_not_write(&self.path, e.to_string()))
    }
}

/// Copy every row of `reader` into `writer`.
pub fn export<R: RowReader, W: RowWriter>(reader: &mut R, writer: &mut W) -> ReaderResult<()> {
    reader.reset()?;
    loop {
        let rows = reader.read(512, false)?;
        if rows.is_empty() {
            break;
        }
        for row in rows {
            writer.write_row(&row)?;
        }
    }
    writer.finish()
}
