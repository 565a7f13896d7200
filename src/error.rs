//! Common errors across the featframe crate

use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Where in a tabular input file a problem occurred.
///
/// All three parts are optional so that the same type can describe
/// "somewhere in this file", "this line of this file", or a fully
/// quoted offending line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileLocation {
    pub path: Option<PathBuf>,
    pub line_num: Option<usize>,
    pub line: Option<String>,
}

impl FileLocation {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(
        path: Option<P>,
        line_num: Option<usize>,
        line: Option<S>,
    ) -> Self {
        Self {
            path: path.map(|p| p.into()),
            line_num,
            line: line.map(|l| l.into()),
        }
    }
}

impl Display for FileLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.path, self.line_num) {
            (Some(p), Some(n)) => write!(f, "{}, line {n}", p.display())?,
            (Some(p), None) => write!(f, "{}", p.display())?,
            (None, Some(n)) => write!(f, "line {n}")?,
            (None, None) => write!(f, "input")?,
        }
        if let Some(line) = &self.line {
            write!(f, " ('{}')", line.trim_end())?;
        }
        Ok(())
    }
}

impl From<&Path> for FileLocation {
    fn from(value: &Path) -> Self {
        Self::new::<_, String>(Some(value), None, None)
    }
}
