//! Streaming batcher over a frame with epoch/cycle/pull semantics.
//!
//! A pipeline owns an encoded [`Frame`] and walks it in fixed-size row
//! windows. Each call to [`Pipeline::batch`] hands out views that alias
//! the frame's storage directly (no copies on the hot path), named by the
//! fields the caller asked for. Two implementations share the trait:
//!
//! - [`VecPipeline`] wraps an already-built frame;
//! - [`StreamPipeline`] materializes its frame from a [`RowReader`] on
//!   first use, and can either reuse it across epochs (`cycle`) or go
//!   back to the reader when an epoch exhausts the buffer.
//!
//! Batches are emitted in the frame's current row order; shuffling is the
//! only source of nondeterminism and is explicit.

use error_stack::ResultExt;
use indexmap::IndexMap;
use log::{debug, info};
use ndarray::{ArrayView1, ArrayView2};

use crate::frame::{ColumnData, Frame, FrameError, JoinKind};
use crate::raw::{Raw, Value};
use crate::reader::{ReaderError, RowReader};
use crate::schema::{FieldType, Role, Schema};
use crate::summary::{render_cat, render_cts, Distribution};

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors from pipeline construction and batching.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error("field '{0}' was requested for a batch but is not in the pipeline")]
    UnknownBatchField(String),

    #[error("could not initialize the pipeline")]
    InitFailed,
}

impl PipelineError {
    pub fn unknown_batch_field<S: Into<String>>(name: S) -> Self {
        Self::UnknownBatchField(name.into())
    }
}

/// Construction-time knobs for a pipeline. This is also where the
/// diagnostic verbosity lives; there is no process-wide flag.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Rows per batch; 0 means one batch per epoch.
    pub batch_size: usize,
    /// Reuse the materialized frame across epochs instead of going back
    /// to the reader.
    pub cycle: bool,
    /// Keep each column's raw buffer next to the encoded one.
    pub keep_raw: bool,
    /// Log every batch window at debug level.
    pub verbose: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { batch_size: 0, cycle: true, keep_raw: false, verbose: false }
    }
}

impl PipelineSettings {
    pub fn batch_size(mut self, b: usize) -> Self {
        self.batch_size = b;
        self
    }

    pub fn cycle(mut self, cycle: bool) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn keep_raw(mut self, keep: bool) -> Self {
        self.keep_raw = keep;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// A view of one field's rows for the current batch, aliasing the
/// frame's storage.
#[derive(Debug)]
pub enum TensorView<'a> {
    /// `batch × width` floats (continuous, one-hot, embedding)
    Float(ArrayView2<'a, f64>),
    /// `batch` integer codes (categorical)
    Int(ArrayView1<'a, i32>),
}

/// The named views handed out by one [`Pipeline::batch`] call.
#[derive(Debug)]
pub struct MiniBatch<'a> {
    views: IndexMap<String, TensorView<'a>>,
}

impl<'a> MiniBatch<'a> {
    pub fn get(&self, field: &str) -> Option<&TensorView<'a>> {
        self.views.get(field)
    }

    pub fn floats(&self, field: &str) -> Option<&ArrayView2<'a, f64>> {
        match self.views.get(field) {
            Some(TensorView::Float(v)) => Some(v),
            _ => None,
        }
    }

    pub fn ints(&self, field: &str) -> Option<&ArrayView1<'a, i32>> {
        match self.views.get(field) {
            Some(TensorView::Int(v)) => Some(v),
            _ => None,
        }
    }

    pub fn fields(&self) -> Vec<&str> {
        self.views.keys().map(|s| s.as_str()).collect()
    }
}

/// The batching interface shared by vector- and reader-backed pipelines.
pub trait Pipeline {
    /// Materialize the frame from the source. Called implicitly by the
    /// other methods; fails on an empty source.
    fn init(&mut self) -> PipelineResult<()>;

    /// The encoded frame. Panics if called before a successful `init`;
    /// the trait's own methods initialize first.
    fn frame(&self) -> &Frame;

    fn frame_mut(&mut self) -> &mut Frame;

    /// Total row count of one epoch.
    fn rows(&self) -> usize;

    /// The configured batch size, with 0 resolved to the row count.
    fn batch_size(&self) -> usize;

    /// Bind the next window of rows to the requested fields.
    ///
    /// Returns `Ok(None)` at end of epoch, after resetting the cursor
    /// and bumping the epoch counter. Tail rows that do not fill a
    /// complete batch are dropped.
    fn batch(&mut self, fields: &[&str]) -> PipelineResult<Option<MiniBatch<'_>>>;

    /// Read (and with a non-negative argument, set) the epoch counter.
    fn epoch(&mut self, set: i64) -> usize;

    /// Install a callback invoked with the finished epoch number each
    /// time the cursor wraps.
    fn on_epoch_end(&mut self, callback: Box<dyn FnMut(usize)>);

    fn field_list(&self) -> Vec<String> {
        self.frame()
            .field_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn cols(&self) -> usize {
        self.frame().cols()
    }

    fn get_field_type(&self, field: &str) -> Option<FieldType> {
        self.frame().field_type(field).cloned()
    }

    fn is_cts(&self, field: &str) -> bool {
        self.frame()
            .field_type(field)
            .map(|ft| ft.role == Role::Cts)
            .unwrap_or(false)
    }

    fn is_cat(&self, field: &str) -> bool {
        self.frame()
            .field_type(field)
            .map(|ft| ft.role == Role::Cat)
            .unwrap_or(false)
    }

    fn is_normalized(&self, field: &str) -> bool {
        self.frame()
            .field_type(field)
            .map(|ft| ft.normalized)
            .unwrap_or(false)
    }

    /// A human summary of one field: quantiles for continuous columns,
    /// the `top_k` most frequent levels for categorical ones.
    fn describe(&self, field: &str, top_k: usize) -> PipelineResult<String> {
        let col = self
            .frame()
            .column(field)
            .ok_or_else(|| FrameError::unknown_field(field))?;
        let s = col.summary();
        let text = match &s.distr {
            Distribution::Cts(cts) => render_cts(field, s.nrows, cts),
            Distribution::Cat(cat) => render_cat(field, s.nrows, cat, top_k),
        };
        Ok(text)
    }

    /// Uniform random joint permutation of the rows.
    fn shuffle(&mut self) -> PipelineResult<()> {
        self.frame_mut().shuffle()?;
        Ok(())
    }

    /// Sort all rows by one field.
    fn sort(&mut self, field: &str, ascending: bool) -> PipelineResult<()> {
        self.frame_mut().sort(field, ascending)?;
        Ok(())
    }
}

fn resolve_batch_size(configured: usize, rows: usize) -> usize {
    if configured == 0 {
        rows
    } else {
        configured
    }
}

/// The shared hot path: bind `b` rows starting at `start` to views over
/// the frame's storage.
fn bind_views<'a>(
    frame: &'a Frame,
    fields: &[&str],
    start: usize,
    b: usize,
) -> PipelineResult<MiniBatch<'a>> {
    let mut views = IndexMap::with_capacity(fields.len());
    for &field in fields {
        let col = frame
            .column(field)
            .ok_or_else(|| PipelineError::unknown_batch_field(field))?;
        let view = match col.data() {
            ColumnData::Float(data) => {
                let w = col.field_type().width();
                let window = &data[start * w..(start + b) * w];
                let view = ArrayView2::from_shape((b, w), window)
                    .expect("window length always matches the batch shape");
                TensorView::Float(view)
            }
            ColumnData::Int(codes) => TensorView::Int(ArrayView1::from(&codes[start..start + b])),
        };
        views.insert(field.to_string(), view);
    }
    Ok(MiniBatch { views })
}

/// Pipeline over an already-materialized frame.
pub struct VecPipeline {
    frame: Frame,
    settings: PipelineSettings,
    start_row: usize,
    epoch: usize,
    callback: Option<Box<dyn FnMut(usize)>>,
}

impl VecPipeline {
    pub fn from_frame(frame: Frame, settings: PipelineSettings) -> Self {
        Self { frame, settings, start_row: 0, epoch: 0, callback: None }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// A new vector pipeline over the rows where `predicate` holds.
    pub fn slice<F: Fn(usize) -> bool>(&self, predicate: F) -> PipelineResult<VecPipeline> {
        let frame = self.frame.slice(predicate)?;
        Ok(VecPipeline::from_frame(frame, self.settings.clone()))
    }

    /// A new vector pipeline over the selected rows.
    pub fn subset(&self, rows: &[usize]) -> PipelineResult<VecPipeline> {
        let frame = self.frame.subset(rows)?;
        Ok(VecPipeline::from_frame(frame, self.settings.clone()))
    }

    /// A single row as a one-row pipeline.
    pub fn row(&self, i: usize) -> PipelineResult<VecPipeline> {
        let frame = self.frame.row(i)?;
        Ok(VecPipeline::from_frame(frame, self.settings.clone()))
    }

    /// A new vector pipeline over the rows whose raw value of `field`
    /// is one of `values`.
    pub fn where_in(&self, field: &str, values: &[Value]) -> PipelineResult<VecPipeline> {
        let frame = self.frame.where_in(field, values)?;
        Ok(VecPipeline::from_frame(frame, self.settings.clone()))
    }

    /// Join with another pipeline's frame on a shared categorical key.
    pub fn join(&self, right: &dyn Pipeline, on: &str, kind: JoinKind) -> PipelineResult<VecPipeline> {
        let frame = self.frame.join(right.frame(), on, kind)?;
        Ok(VecPipeline::from_frame(frame, self.settings.clone()))
    }
}

impl Pipeline for VecPipeline {
    fn init(&mut self) -> PipelineResult<()> {
        if self.frame.rows() == 0 {
            return Err(ReaderError::EmptyRead.into());
        }
        Ok(())
    }

    fn frame(&self) -> &Frame {
        &self.frame
    }

    fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    fn rows(&self) -> usize {
        self.frame.rows()
    }

    fn batch_size(&self) -> usize {
        resolve_batch_size(self.settings.batch_size, self.frame.rows())
    }

    fn batch(&mut self, fields: &[&str]) -> PipelineResult<Option<MiniBatch<'_>>> {
        self.init()?;
        let b = self.batch_size();
        if self.start_row + b > self.frame.rows() {
            self.start_row = 0;
            let finished = self.epoch;
            self.epoch += 1;
            if let Some(cb) = &mut self.callback {
                cb(finished);
            }
            return Ok(None);
        }
        if self.settings.verbose {
            debug!("batch rows {}..{}", self.start_row, self.start_row + b);
        }
        let start = self.start_row;
        self.start_row += b;
        bind_views(&self.frame, fields, start, b).map(Some)
    }

    fn epoch(&mut self, set: i64) -> usize {
        if set >= 0 {
            self.epoch = set as usize;
        }
        self.epoch
    }

    fn on_epoch_end(&mut self, callback: Box<dyn FnMut(usize)>) {
        self.callback = Some(callback);
    }
}

/// Pipeline that materializes its frame from a row reader.
///
/// The frame is built lazily on first use. When an epoch exhausts the
/// buffer, the pipeline either rewinds in place (`cycle`) or marks
/// itself to reset the reader and rebuild on the next `batch` call.
pub struct StreamPipeline<R: RowReader> {
    reader: R,
    settings: PipelineSettings,
    overrides: Schema,
    frame: Option<Frame>,
    start_row: usize,
    epoch: usize,
    needs_pull: bool,
    callback: Option<Box<dyn FnMut(usize)>>,
}

impl<R: RowReader> StreamPipeline<R> {
    pub fn new(reader: R, settings: PipelineSettings) -> Self {
        Self {
            reader,
            settings,
            overrides: Schema::default(),
            frame: None,
            start_row: 0,
            epoch: 0,
            needs_pull: false,
            callback: None,
        }
    }

    /// Replace the inferred encodings for the named fields.
    ///
    /// A `Cat` override whose level dictionary is empty (and a `Cts`
    /// override whose scale is zero) is fit from the data; otherwise the
    /// supplied parameters are adopted verbatim. `OneHot` and `Embed`
    /// entries derive new columns from their parent after the base
    /// columns are built.
    pub fn with_overrides(mut self, overrides: Schema) -> Self {
        self.overrides = overrides;
        self
    }

    fn ensure_init(&mut self) -> PipelineResult<()> {
        if self.frame.is_none() {
            self.init()?;
        }
        Ok(())
    }

    /// Pull every row from the reader and encode it into a frame.
    fn build_frame(&mut self) -> PipelineResult<Frame> {
        let spec = self.reader.table_spec().clone();
        let mut columns: Vec<Raw> = Vec::new();
        let mut total = 0usize;
        loop {
            let rows = self.reader.read(1024, true)?;
            if rows.is_empty() {
                break;
            }
            for row in &rows {
                if columns.is_empty() {
                    for value in row {
                        columns.push(Raw::alloc(0, value.kind()));
                    }
                }
                for (raw, value) in columns.iter_mut().zip(row) {
                    raw.push(value.clone()).map_err(FrameError::from)?;
                }
            }
            total += rows.len();
        }
        if total == 0 {
            return Err(ReaderError::EmptyRead.into());
        }
        debug!("materialized {total} rows from the reader");

        let mut frame = Frame::new(self.settings.keep_raw);
        for ((name, base), raw) in spec.fields.iter().zip(&columns) {
            match self.overrides.get(name) {
                Some(ft) => match ft.role {
                    Role::Cts => {
                        let fp = (ft.params.scale != 0.0).then_some(&ft.params);
                        frame.append_cts(raw, name, ft.normalized, fp)?;
                    }
                    Role::Cat => {
                        let fp = (!ft.params.levels.is_empty()).then_some(&ft.params);
                        frame.append_cat(raw, name, fp)?;
                    }
                    _ => {
                        return Err(FrameError::role_mismatch(
                            name,
                            "Cts or Cat for a base column",
                            ft.role,
                        )
                        .into())
                    }
                },
                None => {
                    // Without an override, floats stay continuous and
                    // everything else is treated as categorical.
                    if base.kind().is_float() {
                        frame.append_cts(raw, name, false, None)?;
                    } else {
                        frame.append_cat(raw, name, None)?;
                    }
                }
            }
        }
        for ft in self.overrides.iter() {
            let from = ft.from.as_deref().unwrap_or_default();
            match ft.role {
                Role::OneHot => frame.make_one_hot(from, &ft.name)?,
                Role::Embed => frame.make_embed(from, &ft.name, ft.emb_cols)?,
                _ => {}
            }
        }
        Ok(frame)
    }

    /// Hand the materialized frame off as a vector pipeline, e.g. to
    /// slice out a validation set.
    pub fn into_vec(mut self) -> PipelineResult<VecPipeline> {
        self.ensure_init()?;
        Ok(VecPipeline::from_frame(
            self.frame.expect("frame was just initialized"),
            self.settings,
        ))
    }
}

impl<R: RowReader> Pipeline for StreamPipeline<R> {
    fn init(&mut self) -> PipelineResult<()> {
        let frame = self.build_frame()?;
        info!("pipeline initialized with {} rows, {} columns", frame.rows(), frame.cols());
        self.frame = Some(frame);
        self.start_row = 0;
        self.needs_pull = false;
        Ok(())
    }

    fn frame(&self) -> &Frame {
        self.frame
            .as_ref()
            .expect("the pipeline must be initialized before its frame is used")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frame
            .as_mut()
            .expect("the pipeline must be initialized before its frame is used")
    }

    fn rows(&self) -> usize {
        self.frame.as_ref().map(|f| f.rows()).unwrap_or(0)
    }

    fn batch_size(&self) -> usize {
        resolve_batch_size(self.settings.batch_size, self.rows())
    }

    fn batch(&mut self, fields: &[&str]) -> PipelineResult<Option<MiniBatch<'_>>> {
        self.ensure_init()?;
        if self.needs_pull {
            self.reader.reset()?;
            self.init()?;
        }
        let b = self.batch_size();
        let rows = self.rows();
        if self.start_row + b > rows {
            self.start_row = 0;
            let finished = self.epoch;
            self.epoch += 1;
            if let Some(cb) = &mut self.callback {
                cb(finished);
            }
            if !self.settings.cycle {
                self.needs_pull = true;
            }
            return Ok(None);
        }
        if self.settings.verbose {
            debug!("batch rows {}..{}", self.start_row, self.start_row + b);
        }
        let start = self.start_row;
        self.start_row += b;
        bind_views(self.frame.as_ref().expect("initialized above"), fields, start, b).map(Some)
    }

    fn epoch(&mut self, set: i64) -> usize {
        if set >= 0 {
            self.epoch = set as usize;
        }
        self.epoch
    }

    fn on_epoch_end(&mut self, callback: Box<dyn FnMut(usize)>) {
        self.callback = Some(callback);
    }
}

/// Build a stream pipeline and materialize it immediately, attaching
/// file context to any failure.
pub fn init_pipeline<R: RowReader>(
    reader: R,
    settings: PipelineSettings,
    overrides: Schema,
) -> error_stack::Result<StreamPipeline<R>, PipelineError> {
    let mut pipe = StreamPipeline::new(reader, settings).with_overrides(overrides);
    pipe.init().change_context(PipelineError::InitFailed)?;
    Ok(pipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FitParams;
    use crate::test_utils::letters_frame;
    use approx::assert_abs_diff_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn pipe(batch_size: usize) -> VecPipeline {
        VecPipeline::from_frame(
            letters_frame(false),
            PipelineSettings::default().batch_size(batch_size),
        )
    }

    #[test]
    fn test_batch_walkthrough() {
        let mut p = pipe(3);
        assert_eq!(p.rows(), 10);
        assert_eq!(p.batch_size(), 3);

        // floor(10 / 3) complete batches, then end of epoch
        for _ in 0..3 {
            let batch = p.batch(&["x0", "x1"]).unwrap();
            assert!(batch.is_some());
        }
        assert!(p.batch(&["x0", "x1"]).unwrap().is_none());
        assert_eq!(p.epoch(-1), 1);

        // the cursor reset, so the next epoch walks the same windows
        let batch = p.batch(&["x0"]).unwrap().unwrap();
        let x0 = batch.floats("x0").unwrap();
        assert_eq!(x0.shape(), &[3, 1]);
    }

    #[test]
    fn test_batch_views_alias_storage() {
        let mut p = pipe(4);
        let frame_data = p.frame().column("x0").unwrap().data().floats().unwrap().to_vec();

        let first = p.batch(&["x0"]).unwrap().unwrap();
        let view = first.floats("x0").unwrap();
        for i in 0..4 {
            assert_abs_diff_eq!(view[[i, 0]], frame_data[i]);
        }
        drop(first);

        let second = p.batch(&["x0"]).unwrap().unwrap();
        let view = second.floats("x0").unwrap();
        for i in 0..4 {
            assert_abs_diff_eq!(view[[i, 0]], frame_data[4 + i]);
        }
    }

    #[test]
    fn test_batch_one_hot_width_and_cat_codes() {
        let mut p = pipe(5);
        let batch = p.batch(&["x1", "x2"]).unwrap().unwrap();
        let hot = batch.floats("x2").unwrap();
        assert_eq!(hot.shape(), &[5, 3]);
        let codes = batch.ints("x1").unwrap();
        for (row, &code) in codes.iter().enumerate() {
            assert_abs_diff_eq!(hot[[row, code as usize]], 1.0);
        }
    }

    #[test]
    fn test_zero_batch_size_is_whole_epoch() {
        let mut p = pipe(0);
        assert_eq!(p.batch_size(), 10);
        let batch = p.batch(&["x0"]).unwrap().unwrap();
        assert_eq!(batch.floats("x0").unwrap().shape(), &[10, 1]);
        assert!(p.batch(&["x0"]).unwrap().is_none());
    }

    #[test]
    fn test_unknown_batch_field() {
        let mut p = pipe(2);
        let err = p.batch(&["nope"]);
        assert!(matches!(err, Err(PipelineError::UnknownBatchField(_))));
    }

    #[test]
    fn test_epoch_callback() {
        let mut p = pipe(5);
        let seen: Rc<RefCell<Vec<usize>>> = Rc::default();
        let sink = Rc::clone(&seen);
        p.on_epoch_end(Box::new(move |e| sink.borrow_mut().push(e)));

        for _ in 0..2 {
            while p.batch(&["x0"]).unwrap().is_some() {}
        }
        assert_eq!(*seen.borrow(), vec![0, 1]);
    }

    #[test]
    fn test_epoch_set_and_get() {
        let mut p = pipe(5);
        assert_eq!(p.epoch(-1), 0);
        assert_eq!(p.epoch(7), 7);
        assert_eq!(p.epoch(-1), 7);
    }

    #[test]
    fn test_slice_returns_vector_pipeline() {
        let p = pipe(2);
        let codes = p.frame().column("x1").unwrap().data().ints().unwrap().to_vec();
        let sub = p.slice(|i| codes[i] == 2).unwrap();
        assert_eq!(sub.rows(), 5);
        assert!(sub.is_cat("x1"));
    }

    #[test]
    fn test_describe() {
        let p = pipe(2);
        let cts = p.describe("x0", 3).unwrap();
        assert!(cts.contains("median"));
        let cat = p.describe("x1", 2).unwrap();
        assert!(cat.contains('c'));
        assert!(p.describe("nope", 2).is_err());
    }

    #[test]
    fn test_stream_pipeline_lazy_init_and_cycle() {
        let path = std::env::temp_dir().join(format!("featframe-stream-{}.csv", std::process::id()));
        std::fs::write(&path, "x,grade\n1.5,a\n2.5,b\n3.5,a\n4.5,c\n").unwrap();

        let reader = crate::reader::DelimReader::open(&path, ',').unwrap();
        let mut p = StreamPipeline::new(
            reader,
            PipelineSettings::default().batch_size(2).cycle(true),
        );

        // batch() initializes lazily
        let batch = p.batch(&["x", "grade"]).unwrap().unwrap();
        assert_eq!(batch.floats("x").unwrap().shape(), &[2, 1]);
        assert!(batch.ints("grade").is_some());
        drop(batch);

        assert_eq!(p.rows(), 4);
        assert!(p.batch(&["x"]).unwrap().is_some());
        assert!(p.batch(&["x"]).unwrap().is_none());
        // cycling reuses the buffer
        assert!(p.batch(&["x"]).unwrap().is_some());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_stream_pipeline_pull_reinitializes() {
        let path = std::env::temp_dir().join(format!("featframe-pull-{}.csv", std::process::id()));
        std::fs::write(&path, "x\n1.5\n2.5\n3.5\n4.5\n").unwrap();

        let reader = crate::reader::DelimReader::open(&path, ',').unwrap();
        let mut p = StreamPipeline::new(
            reader,
            PipelineSettings::default().batch_size(2).cycle(false),
        );

        assert!(p.batch(&["x"]).unwrap().is_some());
        assert!(p.batch(&["x"]).unwrap().is_some());
        // end of epoch leaves the pipeline waiting on a re-read
        assert!(p.batch(&["x"]).unwrap().is_none());
        // the next call resets the reader and rebuilds the frame
        assert!(p.batch(&["x"]).unwrap().is_some());
        assert_eq!(p.rows(), 4);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_vec_pipeline_row_subset_where() {
        let p = pipe(2);
        assert_eq!(p.row(3).unwrap().rows(), 1);
        assert_eq!(p.subset(&[0, 1]).unwrap().rows(), 2);

        let only_a = p.where_in("x1", &[crate::raw::Value::Str("a".into())]).unwrap();
        assert_eq!(only_a.rows(), 3);
    }

    #[test]
    fn test_stream_pipeline_overrides() {
        let path = std::env::temp_dir().join(format!("featframe-ovr-{}.csv", std::process::id()));
        std::fs::write(&path, "x,grade\n1.0,a\n2.0,b\n3.0,a\n").unwrap();

        let mut schema = Schema::default();
        schema
            .push(FieldType::new_cts("x", true, FitParams::default()))
            .unwrap();
        schema
            .push(FieldType::new_one_hot("grade_oh", "grade", FitParams::default()))
            .unwrap();

        let reader = crate::reader::DelimReader::open(&path, ',').unwrap();
        let mut p = StreamPipeline::new(reader, PipelineSettings::default())
            .with_overrides(schema);
        p.init().unwrap();

        assert!(p.is_normalized("x"));
        let ft = p.get_field_type("grade_oh").unwrap();
        assert_eq!(ft.role, Role::OneHot);
        assert_eq!(ft.cats, 2);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_stream_pipeline_empty_source() {
        let path = std::env::temp_dir().join(format!("featframe-empty-{}.csv", std::process::id()));
        std::fs::write(&path, "x,y\n").unwrap();
        let spec = crate::reader::TableSpec::new(vec![
            ("x".to_string(), crate::reader::BaseKind::Float),
            ("y".to_string(), crate::reader::BaseKind::Str),
        ]);
        let reader = crate::reader::DelimReader::with_spec(&path, ',', spec).unwrap();
        let mut p = StreamPipeline::new(reader, PipelineSettings::default());
        let err = p.init();
        assert!(matches!(err, Err(PipelineError::Reader(ReaderError::EmptyRead))));
        std::fs::remove_file(path).ok();
    }
}
