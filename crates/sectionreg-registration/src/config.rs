//! Run configuration loaded from YAML.
//!
//! Both a nested layout and the flat `source_fp` / `target_res` style keys
//! are accepted:
//!
//! ```yaml
//! source:
//!   path: slide_he.tif
//!   resolution: 0.5
//!   modality: brightfield
//! target:
//!   path: slide_af.tif
//!   resolution: 0.65
//!   modality: fluorescence
//!   mask: slide_af_mask.tif
//! work_dir: out
//! reg_model: rigid
//! project_name: kidney
//! ```

use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use serde_yml::{Mapping, Value};

use sectionreg_core::image::Modality;

use crate::error::{RegistrationError, Result};
use crate::pipeline::{ImageInput, RunRequest};
use crate::preprocess::{ImageSource, MaskSource};

/// One input image of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    #[serde(alias = "fp")]
    pub path: PathBuf,
    /// Microns per pixel.
    #[serde(alias = "res")]
    pub resolution: f64,
    #[serde(alias = "img_type")]
    pub modality: Modality,
    #[serde(default, alias = "mask_fp")]
    pub mask: Option<PathBuf>,
    #[serde(default, alias = "mask_res")]
    pub mask_resolution: Option<f64>,
}

impl ImageSpec {
    pub fn to_input<B: Backend>(&self) -> ImageInput<B> {
        ImageInput {
            source: ImageSource::Path(self.path.clone()),
            resolution: self.resolution,
            modality: self.modality,
            mask: self
                .mask
                .as_ref()
                .map(|mask| MaskSource::new(ImageSource::Path(mask.clone()), self.mask_resolution)),
        }
    }
}

/// A complete two-image registration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    pub source: ImageSpec,
    pub target: ImageSpec,
    #[serde(alias = "wd")]
    pub work_dir: PathBuf,
    /// Linear preset name or parameter file path.
    pub reg_model: String,
    pub project_name: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub intermediate_output: bool,
    #[serde(default = "enabled")]
    pub bounding_box_source: bool,
    #[serde(default = "enabled")]
    pub bounding_box_target: bool,
}

fn enabled() -> bool {
    true
}

impl RunSpec {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let mut value: Value =
            serde_yml::from_str(text).map_err(|e| RegistrationError::config(format!("invalid run spec: {}", e)))?;
        if let Value::Mapping(map) = &mut value {
            nest_flat_keys(map, "source");
            nest_flat_keys(map, "target");
        }
        serde_yml::from_value(value).map_err(|e| RegistrationError::config(format!("invalid run spec: {}", e)))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RegistrationError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// The run with file-backed inputs.
    pub fn to_request<B: Backend>(&self) -> RunRequest<B> {
        RunRequest {
            source: self.source.to_input(),
            target: self.target.to_input(),
            work_dir: self.work_dir.clone(),
            reg_model: self.reg_model.clone(),
            project_name: self.project_name.clone(),
            intermediate_output: self.intermediate_output,
            bounding_box_source: self.bounding_box_source,
            bounding_box_target: self.bounding_box_target,
        }
    }
}

/// Move `<prefix>_<key>` entries into a nested `<prefix>` mapping.
fn nest_flat_keys(map: &mut Mapping, prefix: &str) {
    if map.contains_key(prefix) {
        return;
    }
    let flat_prefix = format!("{}_", prefix);
    let flat: Vec<Value> = map
        .keys()
        .filter(|key| key.as_str().is_some_and(|k| k.starts_with(&flat_prefix)))
        .cloned()
        .collect();
    if flat.is_empty() {
        return;
    }

    let mut nested = Mapping::new();
    for key in flat {
        if let (Some(value), Some(name)) = (map.remove(&key), key.as_str()) {
            nested.insert(Value::String(name[flat_prefix.len()..].to_string()), value);
        }
    }
    map.insert(Value::String(prefix.to_string()), Value::Mapping(nested));
}
