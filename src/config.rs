//! Daemon settings: built-in defaults, optionally overlaid by a TOML file,
//! then by command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::DaemonOpts;
use crate::protocol::DEFAULT_BIND;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind: String,
    pub log_file: Option<PathBuf>,
    pub journal: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            log_file: None,
            journal: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let s: Settings =
            toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
        Ok(s)
    }

    pub fn resolve(opts: &DaemonOpts) -> Result<Self> {
        let mut s = match &opts.config {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        if let Some(bind) = &opts.bind {
            s.bind = bind.clone();
        }
        if opts.log_file.is_some() {
            s.log_file = opts.log_file.clone();
        }
        if opts.journal.is_some() {
            s.journal = opts.journal.clone();
        }
        Ok(s)
    }
}
