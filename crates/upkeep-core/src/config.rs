//! Run configuration file.
//!
//! A single TOML file describes the run options and the plugin set:
//!
//! ```toml
//! [run]
//! max_concurrent = 4
//! continue_on_error = false
//!
//! [plugins.apt]
//! enabled = true
//! depends_on = []
//!
//! [plugins.apt.phases.check]
//! command = ["apt-get", "update"]
//! mutexes = ["pkgmgr:apt", "pkgmgr:dpkg"]
//! timeout_secs = 300
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpkeepCoreError};
use crate::phase::Phase;
use crate::plugin::{PhaseCommand, PluginSpec, RunOptions};

/// One plugin's entry in the configuration file.
///
/// Phase keys are the wire names (`check`, `download`, `execute`); they
/// are validated when the entry is turned into a descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Whether the plugin participates in runs. Defaults to true.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Commands per phase, keyed by phase name.
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseCommand>,
    /// Plugins that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Phase names that may be skipped when the check finds nothing to
    /// do.
    #[serde(default)]
    pub skippable: Vec<String>,
    /// Whether the plugin has a separate download phase.
    #[serde(default)]
    pub separate_download: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            phases: BTreeMap::new(),
            depends_on: Vec::new(),
            skippable: Vec::new(),
            separate_download: false,
        }
    }
}

impl PluginConfig {
    /// Convert a config entry into a runtime descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`UpkeepCoreError::InvalidPlugin`] when a phase name is
    /// not one of `check`, `download`, `execute`.
    pub fn to_spec(&self, name: &str) -> Result<PluginSpec> {
        let parse = |raw: &str| {
            raw.parse::<Phase>()
                .map_err(|e| UpkeepCoreError::InvalidPlugin {
                    plugin: name.to_string(),
                    reason: e.to_string(),
                })
        };

        let mut phases = BTreeMap::new();
        for (raw, cmd) in &self.phases {
            phases.insert(parse(raw)?, cmd.clone());
        }
        let mut skippable = Vec::new();
        for raw in &self.skippable {
            skippable.push(parse(raw)?);
        }

        Ok(PluginSpec {
            name: name.to_string(),
            phases,
            depends_on: self.depends_on.clone(),
            skippable,
            separate_download: self.separate_download,
        })
    }
}

/// The whole configuration file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Global run options.
    #[serde(default)]
    pub run: RunOptions,
    /// Plugin entries keyed by plugin name.
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Returns [`Config::default()`] if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`UpkeepCoreError::ConfigIo`] on I/O failures or
    /// [`UpkeepCoreError::ConfigParse`] on TOML parse failures.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(UpkeepCoreError::ConfigIo)?;
        let config: Config = toml::from_str(&data).map_err(UpkeepCoreError::ConfigParse)?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(UpkeepCoreError::ConfigIo)?;
        }
        let data = toml::to_string_pretty(self).map_err(|e| {
            UpkeepCoreError::InvalidPlugin {
                plugin: String::new(),
                reason: format!("config serialization failed: {e}"),
            }
        })?;
        std::fs::write(path, data).map_err(UpkeepCoreError::ConfigIo)?;
        Ok(())
    }

    /// The enabled plugin descriptors, optionally filtered.
    ///
    /// `only` keeps just the named plugins; `skip` removes names. Both
    /// filters reject unknown names so typos fail loudly.
    pub fn selected_specs(
        &self,
        only: &[String],
        skip: &[String],
    ) -> Result<Vec<PluginSpec>> {
        for name in only.iter().chain(skip) {
            if !self.plugins.contains_key(name) {
                return Err(UpkeepCoreError::UnknownPlugin(name.clone()));
            }
        }

        self.plugins
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .filter(|(name, _)| only.is_empty() || only.contains(name))
            .filter(|(name, _)| !skip.contains(name))
            .map(|(name, cfg)| cfg.to_spec(name))
            .collect()
    }
}

/// Convenience constructor used by tests and the built-in demo set: a
/// plugin entry with a check and execute command.
pub fn simple_plugin(check: &[&str], execute: &[&str], mutexes: &[&str]) -> PluginConfig {
    let mut phases = BTreeMap::new();
    let mut check_cmd = PhaseCommand::new(check.iter().copied());
    let mut exec_cmd = PhaseCommand::new(execute.iter().copied());
    for m in mutexes {
        check_cmd = check_cmd.mutex(*m);
        exec_cmd = exec_cmd.mutex(*m);
    }
    phases.insert(Phase::Check.wire_name().to_string(), check_cmd);
    phases.insert(Phase::Execute.wire_name().to_string(), exec_cmd);
    PluginConfig {
        enabled: true,
        phases,
        depends_on: Vec::new(),
        skippable: vec![
            Phase::Download.wire_name().to_string(),
            Phase::Execute.wire_name().to_string(),
        ],
        separate_download: false,
    }
}
