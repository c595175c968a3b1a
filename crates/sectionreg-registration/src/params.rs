//! Elastix-style parameter maps and the preset store.
//!
//! A [`ParameterMap`] is an ordered list of `name -> [values]` read from and
//! written to the elastix text syntax:
//!
//! ```text
//! // comment
//! (Transform "EulerTransform")
//! (MaximumNumberOfIterations 300)
//! ```
//!
//! Values stay textual; typed getters parse on demand so a map can round-trip
//! keys this crate does not interpret.

use std::fmt;
use std::path::Path;

use crate::error::{RegistrationError, Result};
use crate::transform::{Stage, TransformModel};

/// Ordered elastix parameter map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterMap {
    entries: Vec<(String, Vec<String>)>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse elastix parameter text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut map = Self::new();
        let mut chars = text.chars().peekable();
        let mut line = 1;

        while let Some(c) = chars.next() {
            match c {
                '\n' => line += 1,
                c if c.is_whitespace() => {}
                '/' if chars.peek() == Some(&'/') => {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                            break;
                        }
                    }
                }
                '(' => {
                    let mut tokens = Vec::new();
                    let mut current = String::new();
                    let mut closed = false;
                    while let Some(c) = chars.next() {
                        match c {
                            ')' => {
                                closed = true;
                                break;
                            }
                            '"' => {
                                let mut quoted = String::new();
                                let mut terminated = false;
                                for c in chars.by_ref() {
                                    if c == '"' {
                                        terminated = true;
                                        break;
                                    }
                                    quoted.push(c);
                                }
                                if !terminated {
                                    return Err(RegistrationError::config(format!(
                                        "unterminated string on line {}",
                                        line
                                    )));
                                }
                                tokens.push(quoted);
                            }
                            '\n' => {
                                return Err(RegistrationError::config(format!(
                                    "unclosed parameter on line {}",
                                    line
                                )))
                            }
                            c if c.is_whitespace() => {
                                if !current.is_empty() {
                                    tokens.push(std::mem::take(&mut current));
                                }
                            }
                            c => current.push(c),
                        }
                    }
                    if !current.is_empty() {
                        tokens.push(current);
                    }
                    if !closed {
                        return Err(RegistrationError::config(format!(
                            "unclosed parameter on line {}",
                            line
                        )));
                    }
                    let mut tokens = tokens.into_iter();
                    let name = tokens.next().ok_or_else(|| {
                        RegistrationError::config(format!("empty parameter on line {}", line))
                    })?;
                    map.set(&name, tokens.collect());
                }
                other => {
                    return Err(RegistrationError::config(format!(
                        "unexpected '{}' on line {}",
                        other, line
                    )))
                }
            }
        }
        Ok(map)
    }

    /// Read and parse a parameter file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RegistrationError::config(format!("cannot read parameter file {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Elastix text form.
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    /// Set `name`, replacing any previous values in place.
    pub fn set(&mut self, name: &str, values: Vec<String>) {
        match self.entries.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = values,
            None => self.entries.push((name.to_string(), values)),
        }
    }

    pub fn set_str(&mut self, name: &str, value: &str) {
        self.set(name, vec![value.to_string()]);
    }

    pub fn set_numbers<T: ToString>(&mut self, name: &str, values: &[T]) {
        self.set(name, values.iter().map(ToString::to_string).collect());
    }

    /// Builder form of [`ParameterMap::set`].
    pub fn with(mut self, name: &str, values: &[&str]) -> Self {
        self.set(name, values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// First value of `name`.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|values| values.first()).map(String::as_str)
    }

    /// All values of `name` parsed as numbers.
    pub fn get_f64_list(&self, name: &str) -> Result<Option<Vec<f64>>> {
        self.get(name)
            .map(|values| values.iter().map(|v| parse_number(name, v)).collect())
            .transpose()
    }

    pub fn get_f64(&self, name: &str) -> Result<Option<f64>> {
        self.get_str(name).map(|v| parse_number(name, v)).transpose()
    }

    pub fn get_usize(&self, name: &str) -> Result<Option<usize>> {
        match self.get_f64(name)? {
            Some(v) if v >= 0.0 && v.fract() == 0.0 => Ok(Some(v as usize)),
            Some(v) => Err(RegistrationError::config(format!(
                "{} must be a non-negative integer, got {}",
                name, v
            ))),
            None => Ok(None),
        }
    }

    /// Number under `name`, or a `ConfigError` when absent.
    pub fn require_f64(&self, name: &str) -> Result<f64> {
        self.get_f64(name)?
            .ok_or_else(|| RegistrationError::config(format!("missing parameter {}", name)))
    }

    pub fn require_usize(&self, name: &str) -> Result<usize> {
        self.get_usize(name)?
            .ok_or_else(|| RegistrationError::config(format!("missing parameter {}", name)))
    }

    pub fn require_f64_list(&self, name: &str) -> Result<Vec<f64>> {
        self.get_f64_list(name)?
            .ok_or_else(|| RegistrationError::config(format!("missing parameter {}", name)))
    }

    /// The transform family named by `(Transform ...)`.
    pub fn transform_model(&self) -> Result<TransformModel> {
        let name = self
            .get_str("Transform")
            .ok_or_else(|| RegistrationError::config("parameter map does not declare (Transform ...)"))?;
        TransformModel::from_elastix_name(name)
            .ok_or_else(|| RegistrationError::config(format!("unsupported transform family {}", name)))
    }

    /// Stage this map registers at.
    pub fn stage(&self) -> Result<Stage> {
        Ok(self.transform_model()?.stage())
    }

    /// Keep every entry of `self`; add the entries of `base` it lacks.
    pub fn merged_over(mut self, base: &ParameterMap) -> Self {
        for (name, values) in &base.entries {
            if !self.contains(name) {
                self.entries.push((name.clone(), values.clone()));
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl fmt::Display for ParameterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, values) in &self.entries {
            write!(f, "({}", name)?;
            for value in values {
                if value.parse::<f64>().is_ok() {
                    write!(f, " {}", value)?;
                } else {
                    write!(f, " \"{}\"", value)?;
                }
            }
            writeln!(f, ")")?;
        }
        Ok(())
    }
}

fn parse_number(name: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| RegistrationError::config(format!("{} expects a number, got '{}'", name, value)))
}

/// Built-in preset names.
pub const TRANSLATION: &str = "translation";
pub const RIGID: &str = "rigid";
pub const AFFINE: &str = "affine";
/// The reserved non-linear preset.
pub const NON_LINEAR: &str = "nl";

/// Resolves preset names and parameter files into complete maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterStore;

impl ParameterStore {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a preset name or a path to a user parameter file.
    ///
    /// A user file must declare a supported `Transform`; the built-in preset
    /// of that family fills in every key the file leaves out.
    pub fn resolve(&self, spec: &str) -> Result<ParameterMap> {
        if let Some(preset) = Self::preset(spec) {
            return Ok(preset);
        }

        let path = Path::new(spec);
        if !path.is_file() {
            return Err(RegistrationError::config(format!(
                "'{}' is neither a registration preset nor a readable parameter file",
                spec
            )));
        }

        let user = ParameterMap::from_file(path)?;
        let model = user.transform_model()?;
        let merged = user.merged_over(&Self::preset_for(model));
        validate_numbers(&merged)?;

        tracing::debug!(file = %path.display(), transform = model.elastix_name(), "loaded parameter file");
        Ok(merged)
    }

    /// Built-in preset by name or alias.
    pub fn preset(name: &str) -> Option<ParameterMap> {
        match name {
            TRANSLATION => Some(Self::preset_for(TransformModel::Translation)),
            RIGID | "rigid-default" => Some(Self::preset_for(TransformModel::Euler)),
            AFFINE | "affine-default" => Some(Self::preset_for(TransformModel::Affine)),
            NON_LINEAR | "deformable-default" | "nonlinear" => Some(Self::preset_for(TransformModel::BSpline)),
            _ => None,
        }
    }

    /// Built-in defaults of a transform family.
    pub fn preset_for(model: TransformModel) -> ParameterMap {
        let (iterations, learning_rate, stride) = match model {
            TransformModel::Translation => ("250", "2.0", "4"),
            TransformModel::Euler => ("300", "1.0", "4"),
            TransformModel::Affine => ("400", "0.5", "4"),
            TransformModel::BSpline => ("200", "0.5", "2"),
        };

        let map = ParameterMap::new()
            .with("Transform", &[model.elastix_name()])
            .with("Metric", &["AdvancedMeanSquares"])
            .with("Optimizer", &["Adam"])
            .with("Interpolator", &["LinearInterpolator"])
            .with("MaximumNumberOfIterations", &[iterations])
            .with("LearningRate", &[learning_rate])
            .with("SampleGridSpacing", &[stride])
            .with("DefaultPixelValue", &["0"])
            .with("ResultImagePixelType", &["float"]);

        match model {
            TransformModel::BSpline => map.with("FinalGridSpacingInPhysicalUnits", &["100"]),
            _ => map,
        }
    }
}

/// Reject maps whose numeric hyperparameters do not parse.
fn validate_numbers(map: &ParameterMap) -> Result<()> {
    for key in [
        "MaximumNumberOfIterations",
        "LearningRate",
        "SampleGridSpacing",
        "DefaultPixelValue",
        "FinalGridSpacingInPhysicalUnits",
    ] {
        map.get_f64_list(key)?;
    }
    Ok(())
}
