//! The model-definition DSL.
//!
//! A model is an ordered list of text layers, one per line, e.g.
//!
//! ```text
//! Input(x0 + E(grade_oh, 5) + region_oh)
//! FC(size:32, activation:Relu, bias:true)
//! Dropout(0.2)
//! FC(size:1, activation:Sigmoid, bias:true)
//! Target(y)
//! ```
//!
//! [`ModSpec`] parses and validates these lines against a pipeline's
//! schema. Persistence is a file pair sharing a base path: `<root>S.nn`
//! holds the layer text and `<root>P.nn` holds the trained tensors as a
//! JSON array of [`ParamRecord`]s. The training loop itself lives
//! outside this crate.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::pipeline::Pipeline;
use crate::schema::{FieldType, Role};

pub type ModSpecResult<T> = Result<T, ModSpecError>;

/// Errors from parsing or validating a model specification.
#[derive(Debug, thiserror::Error)]
pub enum ModSpecError {
    #[error("could not parse model layer '{line}': {cause}")]
    Parse { line: String, cause: String },

    #[error("invalid model: {0}")]
    Validation(String),

    #[error("field '{0}' is not part of the pipeline")]
    UnknownField(String),

    #[error("field '{field}' cannot be used here: {reason}")]
    BadFeature { field: String, reason: String },

    #[error("could not {action} {}: {reason}", .path.display())]
    FileError { action: &'static str, path: PathBuf, reason: String },
}

impl ModSpecError {
    pub fn parse<L: Into<String>, C: Into<String>>(line: L, cause: C) -> Self {
        Self::Parse { line: line.into(), cause: cause.into() }
    }

    pub fn validation<S: Into<String>>(reason: S) -> Self {
        Self::Validation(reason.into())
    }

    pub fn unknown_field<S: Into<String>>(name: S) -> Self {
        Self::UnknownField(name.into())
    }

    pub fn bad_feature<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::BadFeature { field: field.into(), reason: reason.into() }
    }

    pub fn file_error<P: Into<PathBuf>, S: Into<String>>(
        action: &'static str,
        path: P,
        reason: S,
    ) -> Self {
        Self::FileError { action, path: path.into(), reason: reason.into() }
    }
}

/// Activation functions a fully connected layer may use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Linear,
    Relu,
    LeakyRelu(f64),
    Sigmoid,
    SoftMax,
}

impl Activation {
    const DEFAULT_LEAK: f64 = 0.01;
}

impl FromStr for Activation {
    type Err = ModSpecError;

    /// Activation names ignore case; `LeakyRelu` optionally takes its
    /// slope, e.g. `LeakyRelu(0.1)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "linear" => return Ok(Self::Linear),
            "relu" => return Ok(Self::Relu),
            "sigmoid" => return Ok(Self::Sigmoid),
            "softmax" => return Ok(Self::SoftMax),
            "leakyrelu" => return Ok(Self::LeakyRelu(Self::DEFAULT_LEAK)),
            _ => {}
        }
        if let Some(rest) = lower.strip_prefix("leakyrelu(") {
            if let Some(alpha) = rest.strip_suffix(')') {
                let alpha = alpha.trim().parse::<f64>().map_err(|_| {
                    ModSpecError::parse(s, "the LeakyRelu slope must be a number")
                })?;
                return Ok(Self::LeakyRelu(alpha));
            }
        }
        Err(ModSpecError::parse(s, "not a known activation"))
    }
}

impl Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linear => write!(f, "Linear"),
            Self::Relu => write!(f, "Relu"),
            Self::LeakyRelu(alpha) => write!(f, "LeakyRelu({alpha})"),
            Self::Sigmoid => write!(f, "Sigmoid"),
            Self::SoftMax => write!(f, "SoftMax"),
        }
    }
}

/// A fully connected layer.
#[derive(Debug, Clone, PartialEq)]
pub struct FcLayer {
    pub size: usize,
    pub activation: Activation,
    pub bias: bool,
}

/// One feature of the input layer.
#[derive(Debug, Clone, PartialEq)]
pub enum InputFeature {
    Plain(String),
    /// `E(field, cols)`: embed a one-hot field into `cols` columns.
    Embed { field: String, cols: usize },
}

impl Display for InputFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(name) => write!(f, "{name}"),
            Self::Embed { field, cols } => write!(f, "E({field}, {cols})"),
        }
    }
}

/// The kind tag of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LayerKind {
    Input,
    Fc,
    DropOut,
    Target,
}

/// One parsed layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerSpec {
    Input(Vec<InputFeature>),
    Fc(FcLayer),
    DropOut(f64),
    Target(String),
}

impl LayerSpec {
    pub fn kind(&self) -> LayerKind {
        match self {
            Self::Input(_) => LayerKind::Input,
            Self::Fc(_) => LayerKind::Fc,
            Self::DropOut(_) => LayerKind::DropOut,
            Self::Target(_) => LayerKind::Target,
        }
    }
}

static LAYER_REGEX: OnceLock<regex::Regex> = OnceLock::new();
static EMBED_REGEX: OnceLock<regex::Regex> = OnceLock::new();

fn layer_regex() -> &'static regex::Regex {
    LAYER_REGEX.get_or_init(|| {
        regex::Regex::new(r"^\s*([A-Za-z]+)\s*\((.*)\)\s*$")
            .expect("the layer regex is valid")
    })
}

fn embed_regex() -> &'static regex::Regex {
    EMBED_REGEX.get_or_init(|| {
        regex::Regex::new(r"^[Ee]\s*\(\s*(\w+)\s*,\s*(\d+)\s*\)$")
            .expect("the embedding regex is valid")
    })
}

impl FromStr for LayerSpec {
    type Err = ModSpecError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let caps = layer_regex()
            .captures(line)
            .ok_or_else(|| ModSpecError::parse(line, "expected Kind(args)"))?;
        let kind = caps.get(1).expect("group 1 always matches").as_str();
        let body = caps.get(2).expect("group 2 always matches").as_str().trim();

        match kind.to_ascii_lowercase().as_str() {
            "input" => {
                let features = body
                    .split('+')
                    .map(|tok| parse_feature(tok.trim(), line))
                    .collect::<ModSpecResult<Vec<_>>>()?;
                if features.is_empty() {
                    return Err(ModSpecError::parse(line, "the input layer needs features"));
                }
                Ok(Self::Input(features))
            }
            "fc" => parse_fc(body, line).map(Self::Fc),
            "dropout" => {
                let p = body
                    .parse::<f64>()
                    .map_err(|_| ModSpecError::parse(line, "the dropout rate must be a number"))?;
                Ok(Self::DropOut(p))
            }
            "target" => {
                if body.is_empty() || body.contains(|c: char| c.is_whitespace()) {
                    return Err(ModSpecError::parse(line, "Target takes a single field name"));
                }
                Ok(Self::Target(body.to_string()))
            }
            other => Err(ModSpecError::parse(line, format!("'{other}' is not a layer kind"))),
        }
    }
}

fn parse_feature(token: &str, line: &str) -> ModSpecResult<InputFeature> {
    if token.is_empty() {
        return Err(ModSpecError::parse(line, "empty feature in the input list"));
    }
    if let Some(caps) = embed_regex().captures(token) {
        let field = caps.get(1).expect("group 1 always matches").as_str().to_string();
        let cols = caps
            .get(2)
            .expect("group 2 always matches")
            .as_str()
            .parse::<usize>()
            .map_err(|_| ModSpecError::parse(line, "the embedding width must be an integer"))?;
        return Ok(InputFeature::Embed { field, cols });
    }
    if token.chars().all(|c| c.is_alphanumeric() || c == '_') {
        Ok(InputFeature::Plain(token.to_string()))
    } else {
        Err(ModSpecError::parse(line, format!("'{token}' is not a feature")))
    }
}

fn parse_fc(body: &str, line: &str) -> ModSpecResult<FcLayer> {
    let mut size = None;
    let mut activation = Activation::Linear;
    let mut bias = true;
    for part in body.split(',') {
        let (key, value) = part
            .split_once(':')
            .ok_or_else(|| ModSpecError::parse(line, "FC arguments must look like key:value"))?;
        match key.trim().to_ascii_lowercase().as_str() {
            "size" => {
                let n = value.trim().parse::<usize>().map_err(|_| {
                    ModSpecError::parse(line, "the FC size must be a positive integer")
                })?;
                size = Some(n);
            }
            "activation" => activation = Activation::from_str(value)?,
            "bias" => {
                bias = value.trim().parse::<bool>().map_err(|_| {
                    ModSpecError::parse(line, "the FC bias must be true or false")
                })?;
            }
            other => {
                return Err(ModSpecError::parse(line, format!("'{other}' is not an FC argument")))
            }
        }
    }
    let size = size.ok_or_else(|| ModSpecError::parse(line, "FC needs a size"))?;
    Ok(FcLayer { size, activation, bias })
}

impl Display for LayerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input(features) => {
                write!(f, "Input({})", features.iter().map(|x| x.to_string()).join(" + "))
            }
            Self::Fc(fc) => write!(
                f,
                "FC(size:{}, activation:{}, bias:{})",
                fc.size, fc.activation, fc.bias
            ),
            Self::DropOut(p) => write!(f, "Dropout({p})"),
            Self::Target(name) => write!(f, "Target({name})"),
        }
    }
}

/// An ordered, validated list of model layers.
#[derive(Debug, Clone, PartialEq)]
pub struct ModSpec {
    layers: Vec<LayerSpec>,
}

impl ModSpec {
    /// Parse one layer per line and validate the result.
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> ModSpecResult<Self> {
        let layers = lines
            .iter()
            .map(|l| LayerSpec::from_str(l.as_ref()))
            .collect::<ModSpecResult<Vec<_>>>()?;
        let spec = Self { layers };
        spec.check()?;
        Ok(spec)
    }

    /// Structural validation: `Input` first, `Target` last, at least
    /// one fully connected layer, dropout rates strictly inside (0, 1).
    pub fn check(&self) -> ModSpecResult<()> {
        if self.layers.len() < 3 {
            return Err(ModSpecError::validation(
                "a model needs at least Input, one FC, and Target layers",
            ));
        }
        if !matches!(self.layers.first(), Some(LayerSpec::Input(_))) {
            return Err(ModSpecError::validation("the first layer must be Input"));
        }
        if !matches!(self.layers.last(), Some(LayerSpec::Target(_))) {
            return Err(ModSpecError::validation("the last layer must be Target"));
        }
        let middle = &self.layers[1..self.layers.len() - 1];
        if !middle.iter().any(|l| matches!(l, LayerSpec::Fc(_))) {
            return Err(ModSpecError::validation("a model needs at least one FC layer"));
        }
        for layer in middle {
            match layer {
                LayerSpec::Input(_) | LayerSpec::Target(_) => {
                    return Err(ModSpecError::validation(
                        "Input and Target may only appear at the ends",
                    ))
                }
                LayerSpec::Fc(fc) if fc.size == 0 => {
                    return Err(ModSpecError::validation("FC layers need a positive size"))
                }
                LayerSpec::DropOut(p) if *p <= 0.0 || *p >= 1.0 => {
                    return Err(ModSpecError::validation(format!(
                        "dropout rate {p} is outside (0, 1)"
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, i: usize) -> Option<&LayerSpec> {
        self.layers.get(i)
    }

    /// The kind tag of layer `i`.
    pub fn ltype(&self, i: usize) -> Option<LayerKind> {
        self.layers.get(i).map(|l| l.kind())
    }

    /// The fully connected parameters of layer `i`, if it is one.
    pub fn fc(&self, i: usize) -> Option<&FcLayer> {
        match self.layers.get(i) {
            Some(LayerSpec::Fc(fc)) => Some(fc),
            _ => None,
        }
    }

    /// The dropout rate of layer `i`, if it is a dropout layer.
    pub fn drop_out(&self, i: usize) -> Option<f64> {
        match self.layers.get(i) {
            Some(LayerSpec::DropOut(p)) => Some(*p),
            _ => None,
        }
    }

    /// Resolve the input features against a pipeline.
    ///
    /// Categorical fields are rejected: they must be one-hot (or
    /// embedding) columns before they can feed the model. An `E(f, c)`
    /// wrapper turns a one-hot field into an embedding of width `c`.
    pub fn inputs(&self, pipe: &dyn Pipeline) -> ModSpecResult<Vec<FieldType>> {
        let features = match self.layers.first() {
            Some(LayerSpec::Input(features)) => features,
            _ => return Err(ModSpecError::validation("the first layer must be Input")),
        };
        let mut out = Vec::with_capacity(features.len());
        for feature in features {
            match feature {
                InputFeature::Plain(name) => {
                    let ft = pipe
                        .get_field_type(name)
                        .ok_or_else(|| ModSpecError::unknown_field(name))?;
                    match ft.role {
                        Role::Cts | Role::OneHot | Role::Embed => out.push(ft),
                        Role::Cat => {
                            return Err(ModSpecError::bad_feature(
                                name,
                                "categorical fields must be one-hot encoded first",
                            ))
                        }
                        Role::Either => {
                            return Err(ModSpecError::bad_feature(name, "unresolved role"))
                        }
                    }
                }
                InputFeature::Embed { field, cols } => {
                    if *cols < 2 {
                        return Err(ModSpecError::bad_feature(
                            field,
                            "an embedding needs at least 2 columns",
                        ));
                    }
                    let mut ft = pipe
                        .get_field_type(field)
                        .ok_or_else(|| ModSpecError::unknown_field(field))?;
                    if !ft.role.is_one_hot_like() {
                        return Err(ModSpecError::bad_feature(
                            field,
                            "only one-hot fields can be embedded",
                        ));
                    }
                    ft.role = Role::Embed;
                    ft.emb_cols = *cols;
                    out.push(ft);
                }
            }
        }
        Ok(out)
    }

    /// Resolve the target field against a pipeline.
    ///
    /// The target must be continuous or one-hot; a `SoftMax` output
    /// layer additionally requires a one-hot target.
    pub fn target(&self, pipe: &dyn Pipeline) -> ModSpecResult<FieldType> {
        let name = match self.layers.last() {
            Some(LayerSpec::Target(name)) => name,
            _ => return Err(ModSpecError::validation("the last layer must be Target")),
        };
        let ft = pipe
            .get_field_type(name)
            .ok_or_else(|| ModSpecError::unknown_field(name))?;
        if !matches!(ft.role, Role::Cts | Role::OneHot) {
            return Err(ModSpecError::bad_feature(
                name,
                "the target must be continuous or one-hot",
            ));
        }
        let output_fc = self
            .layers
            .iter()
            .rev()
            .find_map(|l| match l {
                LayerSpec::Fc(fc) => Some(fc),
                _ => None,
            })
            .expect("check() guarantees at least one FC layer");
        if output_fc.activation == Activation::SoftMax && ft.role != Role::OneHot {
            return Err(ModSpecError::bad_feature(
                name,
                "a SoftMax output layer needs a one-hot target",
            ));
        }
        Ok(ft)
    }

    /// Write the layer text to `<root>S.nn`.
    pub fn save(&self, root: &Path) -> ModSpecResult<()> {
        let path = spec_path(root);
        let text = self.layers.iter().map(|l| l.to_string()).join("\n");
        std::fs::write(&path, text + "\n")
            .map_err(|e| ModSpecError::file_error("write", path, e.to_string()))
    }

    /// Load and validate the layer text from `<root>S.nn`.
    pub fn load(root: &Path) -> ModSpecResult<Self> {
        let path = spec_path(root);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ModSpecError::file_error("read", path, e.to_string()))?;
        let lines = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect_vec();
        Self::from_lines(&lines)
    }
}

/// One trainable tensor of a fitted model, as persisted in `<root>P.nn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRecord {
    pub name: String,
    pub dims: Vec<usize>,
    pub parms: Vec<f64>,
}

/// Write the trained tensors to `<root>P.nn` as a JSON array.
pub fn save_params(root: &Path, params: &[ParamRecord]) -> ModSpecResult<()> {
    let path = params_path(root);
    let json = serde_json::to_string_pretty(params)
        .map_err(|e| ModSpecError::file_error("serialize", &path, e.to_string()))?;
    std::fs::write(&path, json)
        .map_err(|e| ModSpecError::file_error("write", path, e.to_string()))
}

/// Read the trained tensors back from `<root>P.nn`.
pub fn load_params(root: &Path) -> ModSpecResult<Vec<ParamRecord>> {
    let path = params_path(root);
    let json = std::fs::read_to_string(&path)
        .map_err(|e| ModSpecError::file_error("read", &path, e.to_string()))?;
    serde_json::from_str(&json)
        .map_err(|e| ModSpecError::file_error("deserialize", path, e.to_string()))
}

fn spec_path(root: &Path) -> PathBuf {
    PathBuf::from(format!("{}S.nn", root.display()))
}

fn params_path(root: &Path) -> PathBuf {
    PathBuf::from(format!("{}P.nn", root.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineSettings, VecPipeline};
    use crate::test_utils::letters_frame;
    use approx::assert_abs_diff_eq;

    fn sample_lines() -> Vec<&'static str> {
        vec![
            "Input(x0 + E(x2, 4))",
            "FC(size:8, activation:Relu, bias:true)",
            "Dropout(0.2)",
            "FC(size:1, activation:Sigmoid, bias:true)",
            "Target(x0)",
        ]
    }

    #[test]
    fn test_parse_and_introspect() {
        let spec = ModSpec::from_lines(&sample_lines()).unwrap();
        assert_eq!(spec.len(), 5);
        assert_eq!(spec.ltype(0), Some(LayerKind::Input));
        assert_eq!(spec.ltype(2), Some(LayerKind::DropOut));
        assert_eq!(spec.ltype(4), Some(LayerKind::Target));

        let fc = spec.fc(1).unwrap();
        assert_eq!(fc.size, 8);
        assert_eq!(fc.activation, Activation::Relu);
        assert!(fc.bias);

        assert_abs_diff_eq!(spec.drop_out(2).unwrap(), 0.2);
        assert!(spec.fc(2).is_none());
    }

    #[test]
    fn test_activation_spellings() {
        assert_eq!(Activation::from_str("relu").unwrap(), Activation::Relu);
        assert_eq!(Activation::from_str("SoftMax").unwrap(), Activation::SoftMax);
        match Activation::from_str("LeakyRelu(0.2)").unwrap() {
            Activation::LeakyRelu(a) => assert_abs_diff_eq!(a, 0.2),
            other => panic!("unexpected activation {other:?}"),
        }
        match Activation::from_str("leakyrelu").unwrap() {
            Activation::LeakyRelu(a) => assert_abs_diff_eq!(a, 0.01),
            other => panic!("unexpected activation {other:?}"),
        }
        assert!(Activation::from_str("tanh").is_err());
    }

    #[test]
    fn test_check_rejects_bad_structure() {
        let missing_target = vec!["Input(x0)", "FC(size:4, activation:Linear, bias:true)"];
        assert!(matches!(
            ModSpec::from_lines(&missing_target),
            Err(ModSpecError::Validation(_))
        ));

        let bad_dropout = vec![
            "Input(x0)",
            "FC(size:4, activation:Linear, bias:true)",
            "Dropout(1.5)",
            "Target(x0)",
        ];
        assert!(matches!(
            ModSpec::from_lines(&bad_dropout),
            Err(ModSpecError::Validation(_))
        ));

        let no_fc = vec!["Input(x0)", "Dropout(0.5)", "Target(x0)"];
        assert!(matches!(ModSpec::from_lines(&no_fc), Err(ModSpecError::Validation(_))));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            LayerSpec::from_str("Flatten(3)"),
            Err(ModSpecError::Parse { .. })
        ));
        assert!(matches!(
            LayerSpec::from_str("FC(activation:Relu)"),
            Err(ModSpecError::Parse { .. })
        ));
        assert!(matches!(
            LayerSpec::from_str("Dropout(lots)"),
            Err(ModSpecError::Parse { .. })
        ));
    }

    fn sample_pipe() -> VecPipeline {
        VecPipeline::from_frame(letters_frame(false), PipelineSettings::default())
    }

    #[test]
    fn test_inputs_resolution() {
        let spec = ModSpec::from_lines(&sample_lines()).unwrap();
        let pipe = sample_pipe();
        let inputs = spec.inputs(&pipe).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].role, Role::Cts);
        assert_eq!(inputs[1].role, Role::Embed);
        assert_eq!(inputs[1].emb_cols, 4);
    }

    #[test]
    fn test_inputs_reject_cat() {
        let lines = vec![
            "Input(x1)",
            "FC(size:4, activation:Linear, bias:true)",
            "Target(x0)",
        ];
        let spec = ModSpec::from_lines(&lines).unwrap();
        let pipe = sample_pipe();
        assert!(matches!(spec.inputs(&pipe), Err(ModSpecError::BadFeature { .. })));
    }

    #[test]
    fn test_target_softmax_needs_one_hot() {
        let pipe = sample_pipe();

        let lines = vec![
            "Input(x0)",
            "FC(size:3, activation:SoftMax, bias:true)",
            "Target(x2)",
        ];
        let spec = ModSpec::from_lines(&lines).unwrap();
        let target = spec.target(&pipe).unwrap();
        assert_eq!(target.role, Role::OneHot);

        let lines = vec![
            "Input(x0)",
            "FC(size:1, activation:SoftMax, bias:true)",
            "Target(x0)",
        ];
        let spec = ModSpec::from_lines(&lines).unwrap();
        assert!(matches!(spec.target(&pipe), Err(ModSpecError::BadFeature { .. })));
    }

    #[test]
    fn test_save_load_round_trip() {
        let spec = ModSpec::from_lines(&sample_lines()).unwrap();
        let root = std::env::temp_dir().join(format!("featframe-mod-{}", std::process::id()));
        spec.save(&root).unwrap();
        let loaded = ModSpec::load(&root).unwrap();
        assert_eq!(spec, loaded);

        let params = vec![ParamRecord {
            name: "fc0".to_string(),
            dims: vec![2, 3],
            parms: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
        }];
        save_params(&root, &params).unwrap();
        let loaded = load_params(&root).unwrap();
        assert_eq!(params, loaded);

        std::fs::remove_file(spec_path(&root)).ok();
        std::fs::remove_file(params_path(&root)).ok();
    }
}
