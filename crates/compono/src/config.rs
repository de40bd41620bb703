//! Compiler configuration
//!
//! Settings are layered, lowest precedence first: built-in defaults, the user's
//! `compono.toml` in the platform config directory, the project `compono.toml`
//! (or an explicit `--config` file), `COMPONO_*` environment variables and finally
//! command-line flags. File layers are merged key by key before deserializing, so
//! a later file only needs to mention the keys it changes. Unknown keys are an
//! error.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use etcetera::BaseStrategy;
use log::{debug, trace};
use serde::Deserialize;

use crate::{
    optimizer::DEFAULT_INLINE_THRESHOLD,
    types::{Mode, Target},
};

/// File name looked up in the project and user config directories
pub const CONFIG_FILE_NAME: &str = "compono.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Entry module; its directory is the project root
    pub entry: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub mode: Mode,
    pub targets: Vec<Target>,
    pub service_worker: bool,
    /// Components with fewer body tokens than this are marked inlinable
    pub inline_threshold: usize,
    /// Path fragment that puts a file in the vendor chunk
    pub vendor_marker: String,
    pub live_reload_port: u16,
    /// Include error stacks in failed compile results
    pub debug: bool,
    /// Extensions tried when an import omits one
    pub extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entry: None,
            out_dir: PathBuf::from("dist"),
            mode: Mode::Production,
            targets: vec![Target::Web],
            service_worker: false,
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            vendor_marker: "node_modules".to_owned(),
            live_reload_port: 35729,
            debug: false,
            extensions: vec![".js".to_owned(), ".mjs".to_owned(), ".jsx".to_owned()],
        }
    }
}

impl Config {
    /// Parse a single TOML document on top of the defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(text).context("Invalid configuration TOML")?;
        Self::from_table(table)
    }

    fn from_table(table: toml::Table) -> Result<Self> {
        toml::Value::Table(table)
            .try_into::<Self>()
            .context("Invalid configuration")
    }

    /// Merge the given files in order (missing files are skipped) over the defaults
    pub fn load_layers(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = toml::Table::new();
        for path in paths {
            if !path.is_file() {
                trace!("No configuration at {}", path.display());
                continue;
            }
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
            let table: toml::Table = toml::from_str(&text)
                .with_context(|| format!("Invalid TOML in '{}'", path.display()))?;
            debug!("Loaded configuration from {}", path.display());
            merged.extend(table);
        }
        Self::from_table(merged)
    }

    /// Load user and project configuration
    ///
    /// An explicit config file replaces the project lookup and must exist.
    pub fn load(explicit: Option<&Path>, project_dir: &Path) -> Result<Self> {
        let mut layers: Vec<PathBuf> = user_config_path().into_iter().collect();
        match explicit {
            Some(path) => {
                if !path.is_file() {
                    bail!("Config file '{}' does not exist", path.display());
                }
                layers.push(path.to_path_buf());
            }
            None => layers.push(project_dir.join(CONFIG_FILE_NAME)),
        }
        let mut config = Self::load_layers(&layers)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `COMPONO_MODE`, `COMPONO_OUT_DIR` and `COMPONO_DEBUG`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(mode) = lookup("COMPONO_MODE") {
            self.mode = mode.parse().context("Invalid COMPONO_MODE")?;
        }
        if let Some(out_dir) = lookup("COMPONO_OUT_DIR") {
            self.out_dir = PathBuf::from(out_dir);
        }
        if let Some(debug) = lookup("COMPONO_DEBUG") {
            self.debug = matches!(
                debug.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    /// Directory containing the entry file
    pub fn project_root(&self) -> Option<&Path> {
        let entry = self.entry.as_deref()?;
        Some(
            entry
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new(".")),
        )
    }
}

/// `<config dir>/compono/compono.toml` for the current user
pub fn user_config_path() -> Option<PathBuf> {
    let strategy = etcetera::choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("compono").join(CONFIG_FILE_NAME))
}
