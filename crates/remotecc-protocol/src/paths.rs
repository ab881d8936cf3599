use std::path::PathBuf;

/// Returns the config directory path for remotecc.
pub fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("remotecc")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("remotecc")
    } else {
        PathBuf::from("/tmp/remotecc")
    }
}

/// Returns the config file path for the relay server.
pub fn config_path() -> PathBuf {
    dirs_path().join("config.toml")
}
