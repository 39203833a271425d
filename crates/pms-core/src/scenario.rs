//! Versioned JSON scenario and design files.
//!
//! Matrices are nested arrays, outer index = test node:
//!
//! ```json
//! {
//!   "schema_version": "1.0.0",
//!   "n": [[6, 11], [12, 6], [2, 13]],
//!   "y": [[3, 0], [6, 0], [0, 0]],
//!   "sens": 1.0,
//!   "spec": 1.0
//! }
//! ```

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::design::Design;
use crate::fixtures::SyntheticChain;
use crate::inference::{InferenceError, PosteriorDraws};
use crate::model::{validate_accuracy, validate_sourcing, ModelError, Observations, PriorData, SupplyChainShape};

pub const SCENARIO_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scenario JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("scenario schema version {actual} is incompatible with {expected}")]
    SchemaVersion { expected: String, actual: String },
    #[error("invalid scenario: {0}")]
    Invalid(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("invalid scenario draws: {0}")]
    Draws(#[from] InferenceError),
}

impl From<ScenarioError> for pms_common::Error {
    fn from(err: ScenarioError) -> Self {
        match err {
            ScenarioError::Io { source, .. } => pms_common::Error::Io(source),
            ScenarioError::Parse(e) => pms_common::Error::Json(e),
            ScenarioError::SchemaVersion { expected, actual } => {
                pms_common::Error::SchemaVersion { expected, actual }
            }
            other => pms_common::Error::InvalidObservations(other.to_string()),
        }
    }
}

fn default_schema_version() -> String {
    SCENARIO_SCHEMA_VERSION.to_string()
}

fn default_accuracy() -> f64 {
    1.0
}

/// On-disk scenario layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFile {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub n: Vec<Vec<u64>>,
    pub y: Vec<Vec<u64>>,
    #[serde(default = "default_accuracy")]
    pub sens: f64,
    #[serde(default = "default_accuracy")]
    pub spec: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draws: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_rates: Option<Vec<f64>>,
}

/// A validated scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub description: Option<String>,
    pub observations: Observations,
    pub sens: f64,
    pub spec: f64,
    pub sourcing: Option<Array2<f64>>,
    pub draws: Option<PosteriorDraws>,
    pub true_rates: Option<Array1<f64>>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ScenarioError> {
        let file: ScenarioFile = serde_json::from_str(content)?;
        Self::from_file(file)
    }

    pub fn from_file(file: ScenarioFile) -> Result<Self, ScenarioError> {
        check_schema_version(&file.schema_version)?;
        let n = matrix(&file.n, "n")?;
        let y = matrix(&file.y, "y")?;
        let observations = Observations::new(n, y)?;
        let shape = observations.shape();
        validate_accuracy("sens", file.sens)?;
        validate_accuracy("spec", file.spec)?;

        let sourcing = match &file.q {
            Some(rows) => {
                let q = matrix(rows, "q")?;
                validate_sourcing(&q, shape)?;
                Some(q)
            }
            None => None,
        };
        let draws = match &file.draws {
            Some(rows) => {
                let draws = PosteriorDraws::from_rows(rows)?;
                if draws.num_rates() != shape.num_rates() {
                    return Err(ScenarioError::Invalid(format!(
                        "draws have {} rates, chain needs {}",
                        draws.num_rates(),
                        shape.num_rates()
                    )));
                }
                Some(draws)
            }
            None => None,
        };
        let true_rates = match &file.true_rates {
            Some(rates) if rates.len() != shape.num_rates() => {
                return Err(ScenarioError::Invalid(format!(
                    "true_rates has {} entries, chain needs {}",
                    rates.len(),
                    shape.num_rates()
                )));
            }
            Some(rates) => Some(Array1::from(rates.clone())),
            None => None,
        };

        Ok(Self {
            description: file.description,
            observations,
            sens: file.sens,
            spec: file.spec,
            sourcing,
            draws,
            true_rates,
        })
    }

    pub fn from_chain(chain: SyntheticChain, draws: Option<PosteriorDraws>) -> Self {
        Self {
            description: None,
            observations: chain.observations,
            sens: chain.sens,
            spec: chain.spec,
            sourcing: Some(chain.sourcing),
            draws,
            true_rates: Some(chain.true_rates),
        }
    }

    pub fn shape(&self) -> SupplyChainShape {
        self.observations.shape()
    }

    /// Prior data from this scenario and a current-belief draw set.
    pub fn prior_data(&self, draws: PosteriorDraws) -> Result<PriorData, ModelError> {
        PriorData::new(
            self.observations.clone(),
            self.sens,
            self.spec,
            self.sourcing.clone(),
            draws,
        )
    }

    pub fn to_file(&self) -> ScenarioFile {
        ScenarioFile {
            schema_version: SCENARIO_SCHEMA_VERSION.to_string(),
            description: self.description.clone(),
            n: rows(self.observations.n()),
            y: rows(self.observations.y()),
            sens: self.sens,
            spec: self.spec,
            q: self.sourcing.as_ref().map(rows),
            draws: self.draws.as_ref().map(PosteriorDraws::to_rows),
            true_rates: self.true_rates.as_ref().map(|r| r.to_vec()),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, ScenarioError> {
        Ok(serde_json::to_string_pretty(&self.to_file())?)
    }
}

/// Major versions must match.
fn check_schema_version(actual: &str) -> Result<(), ScenarioError> {
    let major = |v: &str| v.split('.').next().unwrap_or_default().to_string();
    if major(actual) != major(SCENARIO_SCHEMA_VERSION) {
        return Err(ScenarioError::SchemaVersion {
            expected: SCENARIO_SCHEMA_VERSION.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn matrix<T: Clone>(rows: &[Vec<T>], name: &str) -> Result<Array2<T>, ScenarioError> {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    if rows.is_empty() || width == 0 {
        return Err(ScenarioError::Invalid(format!("{name} is empty")));
    }
    if let Some(i) = rows.iter().position(|r| r.len() != width) {
        return Err(ScenarioError::Invalid(format!(
            "{name} row {i} has {} columns, expected {width}",
            rows[i].len()
        )));
    }
    let flat: Vec<T> = rows.iter().flatten().cloned().collect();
    Array2::from_shape_vec((rows.len(), width), flat)
        .map_err(|e| ScenarioError::Invalid(format!("{name}: {e}")))
}

fn rows<T: Clone>(m: &Array2<T>) -> Vec<Vec<T>> {
    m.rows().into_iter().map(|r| r.to_vec()).collect()
}

/// Tagged design on disk: `{"test_nodes": [...]}` or `{"traces": [[...]]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignFile {
    TestNodes(Vec<f64>),
    Traces(Vec<Vec<f64>>),
}

impl DesignFile {
    pub fn load(path: &Path) -> Result<Design, ScenarioError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: DesignFile = serde_json::from_str(&content)?;
        file.into_design()
    }

    pub fn into_design(self) -> Result<Design, ScenarioError> {
        match self {
            DesignFile::TestNodes(weights) => Ok(Design::TestNodes(Array1::from(weights))),
            DesignFile::Traces(rows) => Ok(Design::Traces(matrix(&rows, "design")?)),
        }
    }

    pub fn from_design(design: &Design) -> Self {
        match design {
            Design::TestNodes(d) => DesignFile::TestNodes(d.to_vec()),
            Design::Traces(d) => DesignFile::Traces(rows(d)),
        }
    }
}
