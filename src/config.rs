use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::ConfigError;
use crate::evaluator::Ruleset;
use crate::schema::{Constraint, FieldDescriptor, FieldType, Schema};

fn default_collection() -> String {
    "users".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
}

/// One field as written in a rules file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub length: Option<Bounds<usize>>,
    #[serde(default)]
    pub one_of: Option<Vec<String>>,
    #[serde(default)]
    pub range: Option<Bounds<f64>>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub check: Option<String>,
}

impl FieldConfig {
    fn compile(&self) -> Result<FieldDescriptor, ConfigError> {
        let mut field = FieldDescriptor::new(&self.name, self.field_type);
        if let Some(b) = self.length {
            field = field.with(Constraint::length(b.min, b.max));
        }
        if let Some(values) = &self.one_of {
            field = field.with(Constraint::one_of(values.iter().cloned()));
        }
        if let Some(b) = self.range {
            field = field.with(Constraint::range(b.min, b.max));
        }
        if let Some(pattern) = &self.pattern {
            field = field.with(Constraint::pattern(&self.name, pattern)?);
        }
        if let Some(expression) = &self.check {
            field = field.with(Constraint::check(&self.name, expression)?);
        }
        Ok(field)
    }
}

/// The rules file: one collection, owner-only access, and its closed schema.
///
/// ```yaml
/// collection: users
/// fields:
///   - name: age
///     type: number
///     range: { min: 0, max: 150 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    pub fields: Vec<FieldConfig>,
}

impl RulesConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn build(&self) -> Result<Ruleset, ConfigError> {
        if self.collection.trim().is_empty() {
            return Err(ConfigError::EmptyCollection);
        }
        let fields = self
            .fields
            .iter()
            .map(FieldConfig::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Ruleset::new(&self.collection, Schema::new(fields)?))
    }
}

impl Ruleset {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        RulesConfig::from_yaml(yaml)?.build()
    }

    /// Reads and compiles a rules file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("failed to read rules file {}", path.display()))?;
        let ruleset = Self::from_yaml_str(&yaml)
            .with_context(|| format!("invalid rules file {}", path.display()))?;
        info!(
            path = %path.display(),
            collection = ruleset.collection(),
            fields = ruleset.schema().fields().len(),
            "loaded rules"
        );
        Ok(ruleset)
    }
}
