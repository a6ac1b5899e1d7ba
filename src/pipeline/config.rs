//! Pipeline configuration.
//!
//! This module provides the run configuration assembled from CLI arguments
//! and the external tool command lines, which can be overridden from the
//! environment.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::scheduler::{StageSelection, StageStrategy};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while preparing configured directories.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command prefixes of the external toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommands {
    pub trac_all: String,
    pub bedpostx: String,
    pub run_freesurfer: String,
    pub bids_validator: String,
    pub tractstats2table: String,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            trac_all: "trac-all".to_string(),
            bedpostx: "bedpostx".to_string(),
            run_freesurfer: "run_freesurfer.py".to_string(),
            bids_validator: "bids-validator".to_string(),
            tractstats2table: "python2 `which tractstats2table`".to_string(),
        }
    }
}

impl ToolCommands {
    /// Creates tool commands from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TRACULA_TRAC_ALL`: trac-all command (default: trac-all)
    /// - `TRACULA_BEDPOSTX`: bedpostx command (default: bedpostx)
    /// - `TRACULA_RUN_FREESURFER`: FreeSurfer BIDS-App entry point (default: run_freesurfer.py)
    /// - `TRACULA_BIDS_VALIDATOR`: validator command (default: bids-validator)
    /// - `TRACULA_TRACTSTATS2TABLE`: table builder (default: python2 `which tractstats2table`)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but blank.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut tools = Self::default();
        let fields: [(&str, &mut String); 5] = [
            ("TRACULA_TRAC_ALL", &mut tools.trac_all),
            ("TRACULA_BEDPOSTX", &mut tools.bedpostx),
            ("TRACULA_RUN_FREESURFER", &mut tools.run_freesurfer),
            ("TRACULA_BIDS_VALIDATOR", &mut tools.bids_validator),
            ("TRACULA_TRACTSTATS2TABLE", &mut tools.tractstats2table),
        ];
        for (key, field) in fields {
            if let Ok(val) = std::env::var(key) {
                *field = parse_env_command(&val, key)?;
            }
        }
        Ok(tools)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let commands = [
            ("trac_all", &self.trac_all),
            ("bedpostx", &self.bedpostx),
            ("run_freesurfer", &self.run_freesurfer),
            ("bids_validator", &self.bids_validator),
            ("tractstats2table", &self.tractstats2table),
        ];
        for (name, command) in commands {
            if command.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} command cannot be empty",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for one invocation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Input BIDS dataset.
    pub bids_dir: PathBuf,
    /// TRACULA output root.
    pub output_dir: PathBuf,
    /// FreeSurfer subjects directory; `output_dir` when unset.
    pub freesurfer_dir: Option<PathBuf>,
    /// FreeSurfer license key.
    pub license_key: String,
    /// Subject labels without `sub-`; empty means all.
    pub participant_labels: Vec<String>,
    /// Session labels without `ses-`; empty means all.
    pub session_labels: Vec<String>,
    pub stages: StageSelection,
    /// Worker pool size for parallel segments.
    pub n_cpus: usize,
    pub strategy: StageStrategy,
    /// Limit FreeSurfer remediation to `-autorecon1` (CI smoke tests).
    pub freesurfer_tests_only: bool,
    pub skip_bids_validator: bool,
    pub tools: ToolCommands,
}

impl PipelineConfig {
    /// Creates a configuration with default options.
    pub fn new(
        bids_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        license_key: impl Into<String>,
    ) -> Self {
        Self {
            bids_dir: bids_dir.into(),
            output_dir: output_dir.into(),
            freesurfer_dir: None,
            license_key: license_key.into(),
            participant_labels: Vec::new(),
            session_labels: Vec::new(),
            stages: StageSelection::all(),
            n_cpus: 1,
            strategy: StageStrategy::JobFiles,
            freesurfer_tests_only: false,
            skip_bids_validator: false,
            tools: ToolCommands::default(),
        }
    }

    /// The effective FreeSurfer subjects directory.
    pub fn freesurfer_dir(&self) -> &Path {
        self.freesurfer_dir.as_deref().unwrap_or(self.output_dir.as_path())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_cpus == 0 {
            return Err(ConfigError::ValidationFailed(
                "n_cpus must be greater than 0".to_string(),
            ));
        }

        if self.license_key.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "license_key cannot be empty".to_string(),
            ));
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "output_dir cannot be empty".to_string(),
            ));
        }

        self.tools.validate()
    }

    /// Creates the output directory if it does not exist.
    pub fn ensure_output_dir(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// Builder method to set the FreeSurfer directory.
    pub fn with_freesurfer_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.freesurfer_dir = Some(dir.into());
        self
    }

    /// Builder method to restrict subjects.
    pub fn with_participant_labels(mut self, labels: Vec<String>) -> Self {
        self.participant_labels = labels;
        self
    }

    /// Builder method to restrict sessions.
    pub fn with_session_labels(mut self, labels: Vec<String>) -> Self {
        self.session_labels = labels;
        self
    }

    /// Builder method to set the stages.
    pub fn with_stages(mut self, stages: StageSelection) -> Self {
        self.stages = stages;
        self
    }

    /// Builder method to set the CPU count.
    pub fn with_n_cpus(mut self, n_cpus: usize) -> Self {
        self.n_cpus = n_cpus;
        self
    }

    /// Builder method to set the stage strategy.
    pub fn with_strategy(mut self, strategy: StageStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Builder method to enable FreeSurfer test mode.
    pub fn with_freesurfer_tests_only(mut self, enabled: bool) -> Self {
        self.freesurfer_tests_only = enabled;
        self
    }

    /// Builder method to skip the BIDS validator.
    pub fn with_skip_bids_validator(mut self, skip: bool) -> Self {
        self.skip_bids_validator = skip;
        self
    }

    /// Builder method to set tool commands.
    pub fn with_tools(mut self, tools: ToolCommands) -> Self {
        self.tools = tools;
        self
    }
}

/// Parse an environment variable holding a command line.
fn parse_env_command(value: &str, key: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "command cannot be blank".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig::new("/bids", "/out", "abc123")
    }

    #[test]
    fn test_default_config() {
        let config = config();
        assert_eq!(config.n_cpus, 1);
        assert_eq!(config.strategy, StageStrategy::JobFiles);
        assert_eq!(config.stages, StageSelection::all());
        assert_eq!(config.freesurfer_dir(), Path::new("/out"));
        assert!(!config.freesurfer_tests_only);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = config()
            .with_freesurfer_dir("/fs")
            .with_participant_labels(vec!["01".to_string()])
            .with_session_labels(vec!["a".to_string()])
            .with_n_cpus(8)
            .with_strategy(StageStrategy::Direct)
            .with_freesurfer_tests_only(true)
            .with_skip_bids_validator(true);

        assert_eq!(config.freesurfer_dir(), Path::new("/fs"));
        assert_eq!(config.participant_labels, vec!["01"]);
        assert_eq!(config.session_labels, vec!["a"]);
        assert_eq!(config.n_cpus, 8);
        assert_eq!(config.strategy, StageStrategy::Direct);
        assert!(config.freesurfer_tests_only);
        assert!(config.skip_bids_validator);
    }

    #[test]
    fn test_validation_zero_cpus() {
        let result = config().with_n_cpus(0).validate();
        assert!(result.unwrap_err().to_string().contains("n_cpus"));
    }

    #[test]
    fn test_validation_empty_license() {
        let result = PipelineConfig::new("/bids", "/out", "  ").validate();
        assert!(result.unwrap_err().to_string().contains("license_key"));
    }

    #[test]
    fn test_validation_empty_tool() {
        let tools = ToolCommands {
            bedpostx: String::new(),
            ..ToolCommands::default()
        };
        let result = config().with_tools(tools).validate();
        assert!(result.unwrap_err().to_string().contains("bedpostx"));
    }

    #[test]
    fn test_default_tools() {
        let tools = ToolCommands::default();
        assert_eq!(tools.trac_all, "trac-all");
        assert_eq!(tools.tractstats2table, "python2 `which tractstats2table`");
    }

    #[test]
    fn test_parse_env_command() {
        assert_eq!(parse_env_command(" /opt/bin/trac-all ", "K").unwrap(), "/opt/bin/trac-all");
        let err = parse_env_command("   ", "TRACULA_TRAC_ALL").unwrap_err();
        assert!(err.to_string().contains("TRACULA_TRAC_ALL"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "KEY".to_string(),
            message: "bad value".to_string(),
        };
        assert!(err.to_string().contains("KEY"));
        assert!(err.to_string().contains("bad value"));

        let err = ConfigError::ValidationFailed("test failure".to_string());
        assert!(err.to_string().contains("test failure"));
    }
}
