use std::path::{Path, PathBuf};

/// Configuration directory: `~/.config/disposable/`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("disposable")
}

/// Default config file: `~/.config/disposable/config.toml`
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// The generated private key lives beside whichever config file is in use.
pub fn ssh_key_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
        .join("id_ed25519")
}

/// Session logs: `~/.local/share/disposable/logs/`
pub fn logs_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("disposable")
        .join("logs")
}
