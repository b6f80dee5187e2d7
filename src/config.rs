use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use facet::Facet;

use crate::error::DisposableError;
use crate::paths;

/// Port the reverse tunnel binds on the droplet's loopback interface.
pub const DEFAULT_TUNNEL_PORT: u16 = disposable_transfer::codec::DEFAULT_TUNNEL_PORT;

#[derive(Debug, Clone, Facet)]
pub struct Config {
    /// DigitalOcean API token.
    pub token: String,
    /// Default region slug for `up`.
    pub region: String,
    /// Default size slug for `up`.
    pub size: String,
    /// Id of the uploaded public key, attached to every droplet.
    pub key_id: u64,
    #[facet(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct SessionConfig {
    #[facet(default = "root")]
    pub user: String,
    /// Replaces the built-in bootstrap command when set.
    #[facet(default)]
    pub bootstrap: Option<String>,
    #[facet(default = 8190)]
    pub tunnel_port: u16,
    #[facet(default = true)]
    pub probe_ipv6: bool,
    /// Where `copyback`/`copyfrom` builds for the droplet are read from.
    /// Defaults to the directory holding this executable.
    #[facet(default)]
    pub tools_dir: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user: "root".into(),
            bootstrap: None,
            tunnel_port: DEFAULT_TUNNEL_PORT,
            probe_ipv6: true,
            tools_dir: None,
        }
    }
}

impl SessionConfig {
    /// The one-shot command run on the droplet before the interactive shell.
    /// Must be safe to run more than once.
    pub fn bootstrap_command(&self) -> String {
        match &self.bootstrap {
            Some(cmd) => cmd.clone(),
            None => format!(
                "grep -qs '^DISPOSABLE_TUNNEL=' /etc/environment || \
                 echo 'DISPOSABLE_TUNNEL=http://127.0.0.1:{}' >> /etc/environment",
                self.tunnel_port
            ),
        }
    }
}

// ── SystemConfig ──────────────────────────────────────────

/// Parsed config plus where it came from.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub config_path: PathBuf,
    pub key_path: PathBuf,
    pub config: Config,
}

impl SystemConfig {
    /// Read the stored OpenSSH private key.
    pub fn private_key(&self) -> Result<String, DisposableError> {
        fs::read_to_string(&self.key_path).map_err(|source| {
            DisposableError::io(
                format!("failed to read private key {}", self.key_path.display()),
                source,
            )
        })
    }

    pub fn save(&self) -> Result<(), DisposableError> {
        save_config(&self.config_path, &self.config)
    }
}

pub fn validate_config(config: &Config) -> Result<(), DisposableError> {
    let required = [
        ("token", &config.token),
        ("region", &config.region),
        ("size", &config.size),
        ("session.user", &config.session.user),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(DisposableError::Validation {
                message: format!("{field} must not be empty"),
            });
        }
    }
    if config.session.tunnel_port == 0 {
        return Err(DisposableError::Validation {
            message: "session.tunnel_port must not be 0".into(),
        });
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<SystemConfig, DisposableError> {
    if !path.exists() {
        return Err(DisposableError::NotConfigured {
            path: path.display().to_string(),
        });
    }

    let contents = fs::read_to_string(path).map_err(|source| DisposableError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    let config: Config = facet_toml::from_str(&contents).map_err(|e| DisposableError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    validate_config(&config)?;

    Ok(SystemConfig {
        config_path: path.to_path_buf(),
        key_path: paths::ssh_key_path(path),
        config,
    })
}

/// Write the config file, readable only by the owner (it holds the token).
pub fn save_config(path: &Path, config: &Config) -> Result<(), DisposableError> {
    write_private(path, &generate_toml(config)).map_err(|source| DisposableError::ConfigWrite {
        path: path.display().to_string(),
        source,
    })
}

/// Store a private key with owner-only permissions.
pub fn save_private_key(path: &Path, pem: &str) -> Result<(), DisposableError> {
    write_private(path, pem).map_err(|source| {
        DisposableError::io(format!("failed to write private key {}", path.display()), source)
    })
}

fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

pub fn generate_toml(config: &Config) -> String {
    let mut out = String::new();
    out.push_str(&format!("token = {}\n", toml_string(&config.token)));
    out.push_str(&format!("region = {}\n", toml_string(&config.region)));
    out.push_str(&format!("size = {}\n", toml_string(&config.size)));
    out.push_str(&format!("key_id = {}\n", config.key_id));

    let session = &config.session;
    let defaults = SessionConfig::default();
    let customized = session.user != defaults.user
        || session.bootstrap.is_some()
        || session.tunnel_port != defaults.tunnel_port
        || session.probe_ipv6 != defaults.probe_ipv6
        || session.tools_dir.is_some();
    if customized {
        out.push_str("\n[session]\n");
        out.push_str(&format!("user = {}\n", toml_string(&session.user)));
        if let Some(ref cmd) = session.bootstrap {
            out.push_str(&format!("bootstrap = {}\n", toml_string(cmd)));
        }
        out.push_str(&format!("tunnel_port = {}\n", session.tunnel_port));
        out.push_str(&format!("probe_ipv6 = {}\n", session.probe_ipv6));
        if let Some(ref dir) = session.tools_dir {
            out.push_str(&format!("tools_dir = {}\n", toml_string(dir)));
        }
    }
    out
}

/// Quote a value as a TOML basic string.
fn toml_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn valid_config() -> Config {
        Config {
            token: "dop_v1_abc123".into(),
            region: "nyc3".into(),
            size: "s-1vcpu-1gb".into(),
            key_id: 4242,
            session: SessionConfig::default(),
        }
    }

    #[test]
    fn minimal_config_takes_session_defaults() {
        let toml = "token = \"t\"\nregion = \"ams3\"\nsize = \"s-2vcpu-2gb\"\nkey_id = 7\n";
        let config: Config = facet_toml::from_str(toml).unwrap();
        assert_eq!(config.region, "ams3");
        assert_eq!(config.key_id, 7);
        assert_eq!(config.session.user, "root");
        assert_eq!(config.session.tunnel_port, 8190);
        assert!(config.session.probe_ipv6);
        assert!(config.session.bootstrap.is_none());
    }

    #[test]
    fn session_table_overrides() {
        let toml = "\
token = \"t\"
region = \"ams3\"
size = \"s\"
key_id = 1

[session]
user = \"admin\"
bootstrap = \"apt-get install -y rsync\"
tunnel_port = 9000
probe_ipv6 = false
tools_dir = \"/opt/disposable/linux-x86_64\"
";
        let config: Config = facet_toml::from_str(toml).unwrap();
        assert_eq!(config.session.user, "admin");
        assert_eq!(
            config.session.tools_dir.as_deref(),
            Some("/opt/disposable/linux-x86_64")
        );
        assert_eq!(config.session.tunnel_port, 9000);
        assert!(!config.session.probe_ipv6);
        assert_eq!(config.session.bootstrap_command(), "apt-get install -y rsync");
    }

    #[test]
    fn generated_toml_parses_back() {
        let mut config = valid_config();
        config.token = "we\"ird\\token".into();
        config.session.bootstrap = Some("echo \"hi\"".into());
        config.session.tools_dir = Some("/opt/tools".into());

        let parsed: Config = facet_toml::from_str(&generate_toml(&config)).unwrap();
        assert_eq!(parsed.token, config.token);
        assert_eq!(parsed.key_id, 4242);
        assert_eq!(parsed.session.bootstrap.as_deref(), Some("echo \"hi\""));
        assert_eq!(parsed.session.tools_dir.as_deref(), Some("/opt/tools"));
    }

    #[test]
    fn default_session_is_not_written() {
        let toml = generate_toml(&valid_config());
        assert!(!toml.contains("[session]"));
    }

    #[test]
    fn default_bootstrap_mentions_tunnel_port() {
        let session = SessionConfig {
            tunnel_port: 8200,
            ..SessionConfig::default()
        };
        assert!(session.bootstrap_command().contains("127.0.0.1:8200"));
    }

    #[test]
    fn validation_rejects_empty_token() {
        let mut config = valid_config();
        config.token = "  ".into();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn validation_rejects_zero_port() {
        let mut config = valid_config();
        config.session.tunnel_port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn missing_file_is_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("config.toml")).unwrap_err();
        assert!(matches!(err, DisposableError::NotConfigured { .. }));
    }

    #[test]
    fn save_then_load() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        save_config(&path, &valid_config()).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.config.size, "s-1vcpu-1gb");
        assert_eq!(loaded.key_path, dir.path().join("nested").join("id_ed25519"));
    }
}
