use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::{EntityKind, Phase};

pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// Main configuration structure for phasegate
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PhasegateConfig {
    /// Workspace and storage settings
    pub workspace: WorkspaceConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Entity kinds that must be fully approved before each phase can be
    pub phases: PhaseRequirements,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Workspace identifier all records are scoped to
    pub id: String,
    /// Path of the JSON state document
    pub state_file: PathBuf,
    /// Optional JSON manifest listing the specification documents
    pub documents_manifest: Option<PathBuf>,
    /// Newest state changes kept per workspace in the state file; `None` keeps all
    pub history_limit: Option<usize>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            state_file: PathBuf::from(".phasegate/state.json"),
            documents_manifest: None,
            history_limit: Some(DEFAULT_HISTORY_LIMIT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level, overridden by RUST_LOG
    pub log_level: String,
    /// Emit JSON lines instead of compact text
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PhaseRequirements {
    pub intent: Vec<EntityKind>,
    pub specification: Vec<EntityKind>,
    pub ui_design: Vec<EntityKind>,
    pub implementation: Vec<EntityKind>,
    pub control_loop: Vec<EntityKind>,
}

impl Default for PhaseRequirements {
    fn default() -> Self {
        Self {
            intent: vec![EntityKind::StoryCard],
            specification: vec![EntityKind::Capability, EntityKind::Enabler],
            ui_design: vec![EntityKind::StoryCard],
            implementation: vec![EntityKind::Enabler],
            control_loop: vec![EntityKind::Capability],
        }
    }
}

impl PhaseRequirements {
    pub fn kinds_for(&self, phase: Phase) -> &[EntityKind] {
        match phase {
            Phase::Intent => &self.intent,
            Phase::Specification => &self.specification,
            Phase::UiDesign => &self.ui_design,
            Phase::Implementation => &self.implementation,
            Phase::ControlLoop => &self.control_loop,
        }
    }
}

impl PhasegateConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (`phasegate.toml`, or `path` when given)
    /// 3. Environment variables (prefixed with PHASEGATE_, `__` between sections)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        builder = match path {
            Some(path) => builder.add_source(File::from(path.to_path_buf()).required(true)),
            None => builder.add_source(File::with_name("phasegate").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("PHASEGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
