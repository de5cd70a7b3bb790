//! Configuration for the oxide64 host

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::overlay::NO_MODULE;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub paths: PathConfig,
    pub modules: ModulesConfig,
    pub session: SessionConfig,
    /// Per-title module overrides, keyed by the selector chosen in
    /// `session.title_selector`.
    pub module_overrides: BTreeMap<String, ModuleOverride>,
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Root directory scanned for module images
    pub modules: PathBuf,
    pub data: PathBuf,
    /// Where numbered save-state slots are written
    pub states: PathBuf,
}

/// Global module bindings, one value per capability category.
///
/// A value is either a module image path (absolute, or a bare file name
/// resolved under the category's directory) or the `(none)` sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    pub rsp: String,
    pub graphics: String,
    pub audio: String,
    pub input: String,
    pub execution: String,
}

/// Per-title module overrides; unset fields fall back to the global tier
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModuleOverride {
    pub rsp: Option<String>,
    pub graphics: Option<String>,
    pub audio: Option<String>,
    pub input: Option<String>,
    pub execution: Option<String>,
}

/// Session defaults applied at host construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub save_slot: u8,
    /// Emulation speed in percent, 100 is native pace
    pub speed_factor: u32,
    pub speed_limited: bool,
    pub volume: u8,
    pub title_selector: TitleSelector,
}

/// How per-title override keys are derived from the loaded media
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TitleSelector {
    #[default]
    InternalName,
    Digest,
}

impl ModulesConfig {
    /// Raw configured value for a category
    pub fn value(&self, capability: Capability) -> &str {
        match capability {
            Capability::Rsp => &self.rsp,
            Capability::Graphics => &self.graphics,
            Capability::Audio => &self.audio,
            Capability::Input => &self.input,
            Capability::Execution => &self.execution,
        }
    }
}

impl ModuleOverride {
    pub fn value(&self, capability: Capability) -> Option<&str> {
        match capability {
            Capability::Rsp => self.rsp.as_deref(),
            Capability::Graphics => self.graphics.as_deref(),
            Capability::Audio => self.audio.as_deref(),
            Capability::Input => self.input.as_deref(),
            Capability::Execution => self.execution.as_deref(),
        }
    }
}

// Default implementations

impl Default for PathConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxide64");

        Self {
            modules: base.join("modules"),
            data: base.clone(),
            states: base.join("states"),
        }
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            rsp: NO_MODULE.to_string(),
            graphics: NO_MODULE.to_string(),
            audio: NO_MODULE.to_string(),
            input: NO_MODULE.to_string(),
            execution: NO_MODULE.to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            save_slot: 0,
            speed_factor: 100,
            speed_limited: true,
            volume: 80,
            title_selector: TitleSelector::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxide64")
            .join("config.toml")
    }
}
