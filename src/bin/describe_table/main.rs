//! Inspect a delimited data file the way the feature pipeline will see it.
//!
//! The file is read into a stream pipeline with a sniffed schema, every
//! field is summarized (quantiles for continuous columns, top level
//! frequencies for categorical ones), and optionally a computed column
//! is evaluated first so its distribution can be checked before it is
//! used in a model.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use error_stack::ResultExt;
use figment::providers::{Format, Toml};
use figment::Figment;
use log::info;

use featframe::expr::add_computed;
use featframe::logging::init_logging;
use featframe::pipeline::{init_pipeline, Pipeline, PipelineSettings};
use featframe::reader::DelimReader;
use featframe::schema::Schema;

fn main() -> ExitCode {
    if let Err(e) = main_inner() {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_inner() -> error_stack::Result<(), CliError> {
    let clargs = Cli::parse();
    init_logging(clargs.verbose.log_level_filter());

    let config = load_config(clargs.config.as_deref())?;
    let delim = clargs.delim.or(config.delim).unwrap_or(',');
    let top_k = clargs.top_k.or(config.top_k).unwrap_or(10);

    let reader = DelimReader::open(&clargs.file, delim)
        .change_context_lazy(|| CliError::from("could not open the input file"))?;

    let settings = PipelineSettings::default().keep_raw(config.keep_raw.unwrap_or(false));
    let mut pipe = init_pipeline(reader, settings, Schema::default())
        .change_context_lazy(|| CliError::from("could not build the pipeline"))?;
    info!("loaded {} rows, {} fields", pipe.rows(), pipe.cols());

    for spec in &clargs.expr {
        let (name, text) = spec.split_once('=').ok_or_else(|| {
            CliError::from(format!("computed fields look like name=expression, got '{spec}'"))
        })?;
        add_computed(&mut pipe, name.trim(), text.trim())
            .change_context_lazy(|| CliError::from(format!("could not compute '{name}'")))?;
    }

    let fields = if clargs.fields.is_empty() {
        pipe.field_list()
    } else {
        clargs.fields.clone()
    };
    for field in fields {
        let table = pipe
            .describe(&field, top_k)
            .change_context_lazy(|| CliError::from(format!("could not describe '{field}'")))?;
        println!("{table}\n");
    }

    Ok(())
}

/// Summarize the fields of a delimited data file.
#[derive(Debug, Parser)]
struct Cli {
    /// Path to the file to read
    file: PathBuf,

    /// Fields to describe; all of them when omitted
    fields: Vec<String>,

    /// Field delimiter (defaults to the config value, then a comma)
    #[arg(short, long)]
    delim: Option<char>,

    /// Optional TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Add a computed field before describing, e.g. --expr "lp=log(price)".
    /// May be repeated.
    #[arg(short, long)]
    expr: Vec<String>,

    /// How many levels to show for categorical fields
    #[arg(short, long)]
    top_k: Option<usize>,

    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Debug, Default, serde::Deserialize)]
struct DescribeConfig {
    delim: Option<char>,
    top_k: Option<usize>,
    keep_raw: Option<bool>,
}

fn load_config(path: Option<&std::path::Path>) -> error_stack::Result<DescribeConfig, CliError> {
    let Some(path) = path else {
        return Ok(DescribeConfig::default());
    };
    Figment::new()
        .merge(Toml::file(path))
        .extract()
        .change_context_lazy(|| CliError::from("could not read the settings file"))
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct CliError(String);

impl From<&str> for CliError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CliError {
    fn from(value: String) -> Self {
        Self(value)
    }
}
