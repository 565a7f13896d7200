//! The table of builtin intrinsics.
//!
//! Each entry fixes the function's arity, the class of every argument,
//! and whether the result is a per-row vector or a single summary value.
//! The table is built once on first lookup; rebuilding it would produce
//! the same content, so a racing double-initialization is harmless.

use indexmap::IndexMap;
use std::sync::OnceLock;

use crate::raw::{Kind, Raw};

/// What an intrinsic accepts in one argument position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgClass {
    /// Numeric (or numeric-parsable) values.
    Float,
    /// Calendar dates.
    Date,
    /// Any raw buffer.
    Any,
}

impl ArgClass {
    pub fn accepts(&self, raw: &Raw) -> bool {
        match self {
            ArgClass::Float => raw.kind().is_numeric() || raw.as_f64_vec().is_ok(),
            ArgClass::Date => raw.kind() == Kind::Date,
            ArgClass::Any => true,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ArgClass::Float => "numeric",
            ArgClass::Date => "a date",
            ArgClass::Any => "any value",
        }
    }
}

/// Whether an intrinsic produces a per-row vector or a one-element
/// summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinLevel {
    Row,
    Summary,
}

/// One entry of the intrinsic table.
#[derive(Debug, Clone)]
pub struct Builtin {
    pub name: &'static str,
    pub args: &'static [ArgClass],
    pub level: BuiltinLevel,
}

impl Builtin {
    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

macro_rules! builtin {
    ($name:literal, $level:ident, [$($arg:ident),*]) => {
        (
            $name,
            Builtin {
                name: $name,
                args: &[$(ArgClass::$arg),*],
                level: BuiltinLevel::$level,
            },
        )
    };
}

fn table() -> &'static IndexMap<&'static str, Builtin> {
    static TABLE: OnceLock<IndexMap<&'static str, Builtin>> = OnceLock::new();
    TABLE.get_or_init(|| {
        IndexMap::from([
            // row-level
            builtin!("exp", Row, [Float]),
            builtin!("log", Row, [Float]),
            builtin!("pow", Row, [Float, Float]),
            builtin!("lag", Row, [Any, Any]),
            builtin!("if", Row, [Float, Float, Float]),
            builtin!("row", Row, [Any]),
            builtin!("cat", Row, [Float]),
            builtin!("toInt", Row, [Any]),
            builtin!("toFloat", Row, [Any]),
            builtin!("toString", Row, [Any]),
            builtin!("toDate", Row, [Any]),
            builtin!("dateAdd", Row, [Date, Float]),
            builtin!("countBefore", Row, [Any]),
            builtin!("countAfter", Row, [Any]),
            builtin!("cumeBefore", Row, [Float]),
            builtin!("cumeAfter", Row, [Float]),
            builtin!("prodBefore", Row, [Float]),
            builtin!("prodAfter", Row, [Float]),
            builtin!("index", Row, [Any, Float]),
            builtin!("range", Row, [Float, Float]),
            // summary-level
            builtin!("mean", Summary, [Float]),
            builtin!("std", Summary, [Float]),
            builtin!("sum", Summary, [Float]),
            builtin!("count", Summary, [Any]),
            builtin!("min", Summary, [Float]),
            builtin!("max", Summary, [Float]),
            builtin!("sse", Summary, [Float, Float]),
            builtin!("mad", Summary, [Float, Float]),
            builtin!("r2", Summary, [Float, Float]),
            builtin!("npv", Summary, [Float, Float]),
            builtin!("irr", Summary, [Float, Float]),
            builtin!("print", Summary, [Any, Float]),
            builtin!("printIf", Summary, [Float, Any, Float]),
        ])
    })
}

/// Look up an intrinsic by name.
pub fn lookup_builtin(name: &str) -> Option<&'static Builtin> {
    table().get(name)
}
