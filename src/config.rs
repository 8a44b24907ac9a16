use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::algorithms::AlgorithmRegistry;
use crate::error::ConfigError;

/// Default number of rows processed per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectType {
    #[serde(rename = "DEDUP")]
    Dedup,
    #[serde(rename = "LINK")]
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipType {
    #[serde(rename = "1T1")]
    OneToOne,
    #[serde(rename = "1TM")]
    OneToMany,
    #[serde(rename = "MT1")]
    ManyToOne,
}

impl RelationshipType {
    pub fn label(&self) -> &'static str {
        match self {
            RelationshipType::OneToOne => "One to One",
            RelationshipType::OneToMany => "One to Many",
            RelationshipType::ManyToOne => "Many to One",
        }
    }
}

/// Column-type hints supplied by the caller. The engine performs no schema
/// inference; hinted Integer/Real columns are checked at import time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    #[serde(rename = "VARCHAR", alias = "CHAR", alias = "TEXT")]
    Text,
    #[serde(rename = "INTEGER")]
    Integer,
    #[serde(rename = "REAL")]
    Real,
    #[serde(rename = "BOOLEAN")]
    Bool,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Real)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    /// Path to the source delimited file.
    pub url: PathBuf,
    /// Unique key column; values must order as numbers.
    pub index_field: String,
    /// Entity column, required for LINK projects.
    #[serde(default)]
    pub entity_field: Option<String>,
    /// Columns to import; defaults to the columns the steps reference.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub data_types: Option<HashMap<String, ColumnType>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockingSchema {
    pub left: Vec<String>,
    #[serde(default)]
    pub right: Vec<String>,
    /// Encoding name per blocking column; empty means EXACT for all.
    #[serde(default)]
    pub transformations: Vec<String>,
}

fn default_comparison_name() -> String {
    "EXACT".to_string()
}

/// Declared arguments of a field comparison. Names follow the individual
/// comparators; unused fields stay `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonArgs {
    #[serde(default)]
    pub n: Option<usize>,
    #[serde(default)]
    pub start: Option<usize>,
    #[serde(default)]
    pub end: Option<usize>,
    #[serde(default)]
    pub length: Option<usize>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub max_edits: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSpec {
    #[serde(default = "default_comparison_name")]
    pub name: String,
    #[serde(default)]
    pub args: ComparisonArgs,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkingSchema {
    pub left: Vec<String>,
    #[serde(default)]
    pub right: Vec<String>,
    pub comparisons: Vec<ComparisonSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub seq: u32,
    pub blocking_schema: BlockingSchema,
    pub linking_schema: LinkingSchema,
    /// Grouped steps resolve entities/links and extract the resolved
    /// records; ungrouped steps only accumulate matches.
    #[serde(default)]
    pub group: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    pub output_root: PathBuf,
    pub temp_path: PathBuf,
    pub datasets: Vec<DatasetConfig>,
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub relationship_type: Option<RelationshipType>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: ProjectConfig = serde_json::from_str(&raw)?;
        Ok(cfg)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    /// Validate the descriptor before any file I/O begins. The first
    /// failure wins and names the offending field.
    pub fn validate(&self, registry: &AlgorithmRegistry) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "name" });
        }
        if self.output_root.as_os_str().is_empty() {
            return Err(ConfigError::MissingField { field: "output_root" });
        }
        if self.temp_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField { field: "temp_path" });
        }
        if self.steps.is_empty() {
            return Err(ConfigError::MissingField { field: "steps" });
        }
        if let Some(size) = self.chunk_size {
            if size == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "chunk_size",
                    reason: "must be > 0".into(),
                });
            }
        }

        let expected_datasets = match self.project_type {
            ProjectType::Dedup => 1,
            ProjectType::Link => 2,
        };
        if self.datasets.len() != expected_datasets {
            return Err(ConfigError::InvalidValue {
                field: "datasets",
                reason: format!(
                    "expected {} dataset(s), found {}",
                    expected_datasets,
                    self.datasets.len()
                ),
            });
        }
        if self.project_type == ProjectType::Link && self.relationship_type.is_none() {
            return Err(ConfigError::MissingField {
                field: "relationship_type",
            });
        }

        for dataset in &self.datasets {
            if dataset.index_field.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: "datasets.index_field",
                });
            }
            if self.project_type == ProjectType::Link
                && dataset
                    .entity_field
                    .as_deref()
                    .map_or(true, |f| f.trim().is_empty())
            {
                return Err(ConfigError::MissingField {
                    field: "datasets.entity_field",
                });
            }
            if !dataset.url.exists() {
                return Err(ConfigError::InvalidValue {
                    field: "datasets.url",
                    reason: format!("dataset file {} does not exist", dataset.url.display()),
                });
            }
        }

        for step in &self.steps {
            self.validate_step(step, registry)?;
        }
        Ok(())
    }

    fn validate_step(
        &self,
        step: &StepConfig,
        registry: &AlgorithmRegistry,
    ) -> Result<(), ConfigError> {
        let blocking = &step.blocking_schema;
        if blocking.left.is_empty() {
            return Err(ConfigError::MissingField {
                field: "steps.blocking_schema.left",
            });
        }
        if !blocking.right.is_empty() && blocking.right.len() != blocking.left.len() {
            return Err(ConfigError::InvalidValue {
                field: "steps.blocking_schema.right",
                reason: "left/right blocking column counts differ".into(),
            });
        }
        if !blocking.transformations.is_empty()
            && blocking.transformations.len() != blocking.left.len()
        {
            return Err(ConfigError::InvalidValue {
                field: "steps.blocking_schema.transformations",
                reason: "one transformation per blocking column required".into(),
            });
        }
        for name in &blocking.transformations {
            registry.encoding(name)?;
        }

        let linking = &step.linking_schema;
        if linking.left.is_empty() {
            return Err(ConfigError::MissingField {
                field: "steps.linking_schema.left",
            });
        }
        if !linking.right.is_empty() && linking.right.len() != linking.left.len() {
            return Err(ConfigError::InvalidValue {
                field: "steps.linking_schema.right",
                reason: "left/right linking column counts differ".into(),
            });
        }
        if linking.comparisons.len() != linking.left.len() {
            return Err(ConfigError::InvalidValue {
                field: "steps.linking_schema.comparisons",
                reason: "one comparison per linking column required".into(),
            });
        }
        for cmp in &linking.comparisons {
            registry.comparator(&cmp.name)?;
            if let (Some(start), Some(end)) = (cmp.args.start, cmp.args.end) {
                if start > end {
                    return Err(ConfigError::InvalidValue {
                        field: "steps.linking_schema.comparisons.args",
                        reason: format!("slice start {} is past end {}", start, end),
                    });
                }
            }
        }
        Ok(())
    }
}
