//! Plan case files.
//!
//! A case bundles a domain, a problem, the problem's declared initial values
//! and the plan to evaluate:
//!
//! ```yaml
//! domain: domain.pddl
//! problem: problem.pddl
//! init:
//!   - { name: "at robot loc1", value: true }
//! happenings:
//!   - { time: 0, action: "load robot box", kind: instantaneous }
//! ```
//!
//! Domain and problem paths are resolved against the case file's directory.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use valstep_proto::{Happening, PlanningTask, TimedVariableValue, Value};

/// Errors loading a plan case.
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid plan case {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Initial value of '{name}' is not finite")]
    NonFiniteInit { name: String },
}

/// A declared initial value.
#[derive(Debug, Clone, Deserialize)]
pub struct InitialValue {
    pub name: String,
    pub value: Value,
}

/// A plan case as written on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanCase {
    pub domain: PathBuf,
    pub problem: PathBuf,
    #[serde(default)]
    pub init: Vec<InitialValue>,
    #[serde(default)]
    pub happenings: Vec<Happening>,
}

/// A case with its domain and problem text read in.
#[derive(Debug, Clone)]
pub struct LoadedCase {
    pub task: PlanningTask,
    pub happenings: Vec<Happening>,
}

impl PlanCase {
    pub fn parse_yaml(content: &str, path: &Path) -> Result<Self, CaseError> {
        serde_yaml::from_str(content).map_err(|source| CaseError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads the case file and the domain and problem it names.
    pub fn load(path: impl AsRef<Path>) -> Result<LoadedCase, CaseError> {
        let path = path.as_ref();
        let case = Self::parse_yaml(&read(path)?, path)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        case.resolve(base)
    }

    fn resolve(self, base: &Path) -> Result<LoadedCase, CaseError> {
        let domain_text = read(&base.join(&self.domain))?;
        let problem_text = read(&base.join(&self.problem))?;

        let initial_values = self
            .init
            .into_iter()
            .map(|init| match init.value {
                Value::Number(n) if !n.is_finite() => {
                    Err(CaseError::NonFiniteInit { name: init.name })
                }
                value => Ok(TimedVariableValue::new(0.0, init.name, value)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LoadedCase {
            task: PlanningTask::new(domain_text, problem_text).with_initial_values(initial_values),
            happenings: self.happenings,
        })
    }
}

fn read(path: &Path) -> Result<String, CaseError> {
    fs::read_to_string(path).map_err(|source| CaseError::Read {
        path: path.to_path_buf(),
        source,
    })
}
