//! Configuration for conbridge.
//!
//! Settings are read from `~/.conbridge/config.toml`. Every key is optional;
//! command line flags override whatever the file says.
//!
//! ```toml
//! # conhost binary to launch (default: conhost.exe from PATH)
//! conhost = "C:\\tools\\OpenConsole.exe"
//!
//! # Command line hosted inside conhost (default: cmd.exe)
//! shell = "pwsh.exe -NoLogo"
//!
//! # Initial size; the current terminal size is used when omitted
//! width = 120
//! height = 30
//!
//! starting_directory = "C:\\src"
//!
//! # Let conhost pick up the cursor position of this terminal
//! inherit_cursor = true
//!
//! # graphemes, wcswidth or console
//! text_measurement = "graphemes"
//!
//! # tracing filter, overridden by CONBRIDGE_LOG
//! log_level = "debug"
//!
//! [env]
//! TERM = "xterm-256color"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::env::EnvironmentMap;
use crate::core::pty::{PtyError, PtyFlags, PtyOptions, TextMeasurement, DEFAULT_CONHOST};

pub const DEFAULT_SHELL: &str = "cmd.exe";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid [env] entry: {0}")]
    Environment(#[from] PtyError),
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// conhost binary
    pub conhost: String,
    /// Command line to host
    pub shell: String,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub starting_directory: Option<PathBuf>,
    pub inherit_cursor: bool,
    pub text_measurement: Option<TextMeasurement>,
    pub log_level: String,
    /// Extra environment variables for the hosted process
    pub env: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            conhost: DEFAULT_CONHOST.to_string(),
            shell: DEFAULT_SHELL.to_string(),
            width: None,
            height: None,
            starting_directory: None,
            inherit_cursor: false,
            text_measurement: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            env: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults
    pub fn load() -> Self {
        match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    /// Load configuration, reporting a malformed file. A missing file is
    /// not an error.
    pub fn try_load() -> Result<Self, ConfigError> {
        let Some(path) = Self::config_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// `~/.conbridge`
    pub fn config_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".conbridge"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Launch options for the hosted command.
    pub fn pty_options(&self) -> Result<PtyOptions, ConfigError> {
        let mut extra_env = EnvironmentMap::new();
        for (name, value) in &self.env {
            extra_env.insert(name, value)?;
        }

        let mut flags = self.text_measurement.map_or(PtyFlags::empty(), TextMeasurement::flags);
        flags.set(PtyFlags::INHERIT_CURSOR, self.inherit_cursor);

        let mut options = PtyOptions::new(self.shell.clone())
            .with_size(self.width.unwrap_or(0), self.height.unwrap_or(0))
            .with_flags(flags);
        options.conhost = self.conhost.clone();
        options.starting_directory = self.starting_directory.clone();
        options.extra_env = extra_env;
        Ok(options)
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
