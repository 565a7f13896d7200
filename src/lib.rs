/// Common error types
pub mod error;
/// Type-tagged raw column buffers
pub mod raw;
/// Per-column schema: roles, fit parameters, level dictionaries
pub mod schema;
/// Distribution summaries used for schema inference and `describe`
pub mod summary;
/// The frame container: named, typed columns with joint row operations
pub mod frame;
/// Row sources and sinks for building and exporting frames
pub mod reader;
/// Streaming batcher over a frame with epoch/cycle/pull semantics
pub mod pipeline;
/// Expression language for computed columns
pub mod expr;
/// The model-definition DSL
pub mod modspec;
/// Console logger setup for the binaries
pub mod logging;

#[cfg(test)]
mod test_utils;
