use std::fs;
use std::path::Path;

use anyhow::{Context as AnyhowContext, Result};

use crate::compiler::core::Compiler;
use crate::dsl::ModelDef;
use crate::runtime::blueprint::Blueprint;

pub fn load_model_from_yaml(file_path: impl AsRef<Path>) -> Result<ModelDef> {
    let file_path = file_path.as_ref();
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read YAML file from {}", file_path.display()))?;

    let model: ModelDef = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize YAML content from {}", file_path.display()))?;

    Ok(model)
}

/// Loads and compiles in one go.
pub fn load_blueprint(file_path: impl AsRef<Path>) -> Result<Blueprint> {
    let file_path = file_path.as_ref();
    let model = load_model_from_yaml(file_path)?;
    Compiler::new()
        .compile(model)
        .with_context(|| format!("Failed to compile model from {}", file_path.display()))
}
