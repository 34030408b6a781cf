//! Client configuration.
//!
//! Command line flags come from clap; persistent settings live in a JSON
//! file resolved from `--config`, `./.tun.json`, then `~/.tun/config.json`.

use crate::logger::DEFAULT_MAX_LOGGED_REQUESTS;
use crate::plugins::PluginConfigStore;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tun_core::error::{ErrorCategory, MediationError, MediationResult, ResultExt};

/// Settings file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = ".tun.json";

/// Tun Client - Gate and classify traffic to a local service.
#[derive(Parser, Debug, Clone)]
#[command(name = "tun-client")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file to read and persist to
    #[arg(long, global = true, env = "TUN_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true, env = "TUN_DEBUG")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the local mediation server
    Serve(ServeArgs),

    /// Inspect or change the enabled request plugins
    #[command(subcommand)]
    Plugins(PluginsCommand),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to accept visitor traffic on
    #[arg(short, long, env = "TUN_LISTEN", default_value = "127.0.0.1:8081")]
    pub listen: SocketAddr,

    /// Local service to forward to (host:port)
    #[arg(short, long, env = "TUN_TARGET", default_value = "127.0.0.1:8080")]
    pub target: String,

    /// Require a magic login. Comma separated emails or @domains; empty
    /// admits any valid address
    #[arg(long, env = "TUN_MAGIC_AUTH")]
    pub magic_auth: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PluginsCommand {
    /// List known plugins
    List,

    /// Enable plugins by id
    Enable {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Disable plugins by id
    Disable {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

/// Contents of the JSON settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Magic auth policy; absent disables the gate.
    pub magic_auth: Option<String>,
    /// Enabled plugin ids; absent enables every built-in.
    pub request_plugins: Option<Vec<String>>,
    pub custom_plugin_directory: Option<PathBuf>,
    pub max_logged_requests: Option<usize>,
}

impl Settings {
    /// Read a settings file.
    pub fn load(path: &Path) -> MediationResult<Self> {
        let contents = std::fs::read_to_string(path).with_context(
            ErrorCategory::Configuration,
            "path",
            path.display().to_string(),
        )?;
        serde_json::from_str(&contents).with_context(
            ErrorCategory::Configuration,
            "path",
            path.display().to_string(),
        )
    }

    /// Locate and load settings for this process.
    ///
    /// Returns the settings together with the file they came from, if any.
    pub fn resolve(explicit: Option<&Path>) -> MediationResult<(Self, Option<PathBuf>)> {
        let cwd = std::env::current_dir().ok();
        Self::resolve_from(explicit, cwd.as_deref(), dirs::home_dir().as_deref())
    }

    fn resolve_from(
        explicit: Option<&Path>,
        cwd: Option<&Path>,
        home: Option<&Path>,
    ) -> MediationResult<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        let candidates = [
            cwd.map(|dir| dir.join(LOCAL_CONFIG_FILE)),
            home.map(user_config_path),
        ];

        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                debug!("Loading settings from {}", path.display());
                let settings = Self::load(&path)?;
                return Ok((settings, Some(path)));
            }
        }

        debug!("No settings file found; using defaults");
        Ok((Self::default(), None))
    }

    /// Directory scanned for custom plugin definitions.
    pub fn plugin_directory(&self) -> Option<PathBuf> {
        self.custom_plugin_directory
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".tun").join("plugins")))
    }

    pub fn max_logged_requests(&self) -> usize {
        self.max_logged_requests
            .unwrap_or(DEFAULT_MAX_LOGGED_REQUESTS)
    }
}

fn user_config_path(home: &Path) -> PathBuf {
    home.join(".tun").join("config.json")
}

/// Persists the enabled-plugin list into a JSON settings file, leaving every
/// other key untouched.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store writing back to the file settings were resolved from, or to the
    /// user file when none was found.
    pub fn for_source(source: Option<&Path>) -> MediationResult<Self> {
        Self::for_source_in(source, dirs::home_dir().as_deref())
    }

    fn for_source_in(source: Option<&Path>, home: Option<&Path>) -> MediationResult<Self> {
        match (source, home) {
            (Some(path), _) => Ok(Self::new(path)),
            (None, Some(home)) => Ok(Self::new(user_config_path(home))),
            (None, None) => Err(MediationError::config("Cannot locate home directory")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> MediationResult<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let contents = std::fs::read_to_string(&self.path).with_context(
            ErrorCategory::Configuration,
            "path",
            self.path.display().to_string(),
        )?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str(&contents) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(MediationError::config("Settings file is not a JSON object")
                .with_context("path", self.path.display().to_string())),
            Err(e) => Err(MediationError::config(e.to_string())
                .with_cause(e)
                .with_context("path", self.path.display().to_string())),
        }
    }
}

impl PluginConfigStore for JsonConfigStore {
    fn save_enabled_plugins(&self, ids: &[String]) -> MediationResult<()> {
        let mut document = self.read_document()?;
        document.insert(
            "request_plugins".to_string(),
            Value::Array(ids.iter().cloned().map(Value::String).collect()),
        );

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(
                ErrorCategory::Configuration,
                "path",
                parent.display().to_string(),
            )?;
        }

        let json = serde_json::to_string_pretty(&Value::Object(document))
            .with_category(ErrorCategory::Internal)?;
        std::fs::write(&self.path, json + "\n").with_context(
            ErrorCategory::Configuration,
            "path",
            self.path.display().to_string(),
        )?;

        info!("Saved plugin settings to {}", self.path.display());
        Ok(())
    }
}
