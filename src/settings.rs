//! Runtime settings, read through the `config` crate.
//!
//! Sources are layered: built-in defaults, then an optional TOML file
//! (`plugkeys.toml` in the working directory unless a path is given), then
//! environment variables prefixed with `PLUGKEYS_` (e.g. `PLUGKEYS_ID_SPACE=per_kind`).

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

pub const DEFAULT_FILE: &str = "plugkeys";

/// How ids are handed out across the key kinds of a [`crate::key::KeySpace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdSpace {
    /// One generator injected into every registry; ids never repeat across kinds.
    #[default]
    Shared,
    /// Every registry counts on its own.
    PerKind,
}

/// What happens to handler failures swallowed by best-effort dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Diagnostics {
    #[default]
    Log,
    Silent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub id_space: IdSpace,
    #[serde(default)]
    pub diagnostics: Diagnostics,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id_space: IdSpace::default(),
            diagnostics: Diagnostics::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl Settings {
    /// Loads settings from `path` (without extension, as `config` expects) or
    /// from `plugkeys.toml` if no path is given. A missing file is not an error.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path.unwrap_or(DEFAULT_FILE)).required(false))
            .add_source(Environment::with_prefix("PLUGKEYS"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
