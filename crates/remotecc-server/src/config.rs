use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use libremotecc::pty::{DEFAULT_COLS, DEFAULT_ROWS};
use libremotecc::{CommandSpec, HubConfig};
use remotecc_protocol::DEFAULT_PORT;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub command: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    pub debounce_ms: u64,
    pub backlog_capacity: usize,
    pub window_capacity: usize,
    pub show_qr: bool,
    /// Logs go to stderr when unset.
    pub log_file: Option<PathBuf>,
}

/// Values given on the command line. They win over the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub no_qr: bool,
    pub debounce_ms: Option<u64>,
    /// Program followed by its arguments; empty keeps the configured command.
    pub command: Vec<String>,
}

impl ServerConfig {
    /// Load `path`, or the default config file when it exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = remotecc_protocol::paths::config_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if overrides.no_qr {
            self.show_qr = false;
        }
        if let Some(ms) = overrides.debounce_ms {
            self.debounce_ms = ms;
        }
        let mut command = overrides.command.into_iter();
        if let Some(program) = command.next() {
            self.command = program;
            self.args = command.collect();
        }
        self
    }

    pub fn hub_config(&self) -> HubConfig {
        let mut spec = CommandSpec::new(&self.command, self.args.clone());
        spec.cols = self.cols;
        spec.rows = self.rows;

        let mut config = HubConfig::new(spec);
        config.coalescer.debounce = Duration::from_millis(self.debounce_ms);
        config.backlog_capacity = self.backlog_capacity;
        config.window_capacity = self.window_capacity;
        config
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: "0.0.0.0".to_string(),
            command: "claude".to_string(),
            args: Vec::new(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            debounce_ms: 100,
            backlog_capacity: 100,
            window_capacity: 1000,
            show_qr: true,
            log_file: None,
        }
    }
}
