//! Settings overlay: resolved module bindings consumed by the registry
//!
//! Configuration storage and precedence merging live outside the host; the
//! registry only ever sees the resolved per-capability choices produced
//! here.

use std::path::{Path, PathBuf};

use crate::capability::Capability;
use crate::config::Config;

/// Sentinel configuration value meaning "explicitly no module"
pub const NO_MODULE: &str = "(none)";

/// A resolved module binding for one capability category
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleChoice {
    /// Leave the slot empty
    NoModule,
    /// Load the image at this resolved path
    Path(PathBuf),
}

impl ModuleChoice {
    /// Parse a raw configured value.
    ///
    /// Empty values and the `(none)` sentinel mean no module. A bare file
    /// name is resolved under the category's directory below `module_root`;
    /// anything with a path component is taken as given.
    pub fn parse(raw: &str, capability: Capability, module_root: &Path) -> ModuleChoice {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NO_MODULE) {
            return ModuleChoice::NoModule;
        }

        let path = Path::new(trimmed);
        if path.is_absolute() || path.components().count() > 1 {
            ModuleChoice::Path(path.to_path_buf())
        } else {
            ModuleChoice::Path(module_root.join(capability.dir_name()).join(path))
        }
    }

    pub fn is_no_module(&self) -> bool {
        matches!(self, ModuleChoice::NoModule)
    }
}

/// The five resolved choices handed to `PluginRegistry::apply_settings`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsOverlay {
    choices: [ModuleChoice; Capability::COUNT],
}

impl SettingsOverlay {
    pub fn new() -> Self {
        Self {
            choices: [
                ModuleChoice::NoModule,
                ModuleChoice::NoModule,
                ModuleChoice::NoModule,
                ModuleChoice::NoModule,
                ModuleChoice::NoModule,
            ],
        }
    }

    pub fn get(&self, capability: Capability) -> &ModuleChoice {
        &self.choices[capability.index()]
    }

    pub fn set(&mut self, capability: Capability, choice: ModuleChoice) {
        self.choices[capability.index()] = choice;
    }
}

impl Default for SettingsOverlay {
    fn default() -> Self {
        Self::new()
    }
}

/// Supplies the desired module binding per capability.
///
/// Implementations merge whatever precedence tiers they carry; the host
/// consumes only the final value.
pub trait OverlayResolver {
    fn resolve(&self, capability: Capability) -> ModuleChoice;

    /// Resolve all five categories at once
    fn overlay(&self) -> SettingsOverlay {
        let mut overlay = SettingsOverlay::new();
        for capability in Capability::ALL {
            overlay.set(capability, self.resolve(capability));
        }
        overlay
    }
}

/// Resolver over the host configuration: the per-title override tier wins,
/// then the global tier.
pub struct ConfigResolver<'a> {
    config: &'a Config,
    title_key: Option<&'a str>,
}

impl<'a> ConfigResolver<'a> {
    /// Resolver for the global tier only
    pub fn global(config: &'a Config) -> Self {
        Self {
            config,
            title_key: None,
        }
    }

    /// Resolver honoring the override tier for the given title key
    pub fn for_title(config: &'a Config, title_key: &'a str) -> Self {
        Self {
            config,
            title_key: Some(title_key),
        }
    }
}

impl OverlayResolver for ConfigResolver<'_> {
    fn resolve(&self, capability: Capability) -> ModuleChoice {
        let raw = self
            .title_key
            .and_then(|key| self.config.module_overrides.get(key))
            .and_then(|entry| entry.value(capability))
            .unwrap_or_else(|| self.config.modules.value(capability));
        ModuleChoice::parse(raw, capability, &self.config.paths.modules)
    }
}
