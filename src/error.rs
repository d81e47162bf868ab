use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BuscoError {
    #[error("malformed config file {path}: {message}")]
    ConfigFile { path: PathBuf, message: String },

    #[error("missing config file {0}")]
    MissingConfigFile(PathBuf),

    #[error("invalid configuration:\n  {}", .violations.join("\n  "))]
    #[diagnostic(help("run `busco --help` for the list of accepted options"))]
    ConfigValidation { violations: Vec<String> },

    #[error("lineage detection failed: {0}")]
    LineageDetection(String),

    #[error("analysis of {target} failed during {stage}: {message}")]
    TargetExecution {
        target: String,
        stage: String,
        message: String,
    },

    #[error("failed to relocate log file: {0}")]
    Finalization(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("invalid lineage dataset: {0}")]
    InvalidDataset(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("output folder {0} already exists; use --force to overwrite or --restart to resume")]
    OutputExists(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to set up logging: {0}")]
    Logging(String),
}

impl BuscoError {
    pub fn validation(violation: impl Into<String>) -> Self {
        BuscoError::ConfigValidation {
            violations: vec![violation.into()],
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            BuscoError::ConfigFile { .. }
                | BuscoError::MissingConfigFile(_)
                | BuscoError::ConfigValidation { .. }
        )
    }
}
