//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client-secret material itself lives in a separate JSON file
//! referenced by `auth.client_secrets_path`, never in the TOML, so the
//! TOML can be committed without leaking secrets.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub drive: DriveConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Public base URL when the gateway sits behind a reverse proxy.
    /// When unset, the redirect URI is derived from the request's Host
    /// header and x-forwarded-proto.
    #[serde(default)]
    pub external_base_url: Option<String>,
    /// Force the https scheme for derived redirect URIs (TLS-terminating
    /// proxy in front, plain HTTP behind it).
    #[serde(default)]
    pub force_https: bool,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Credential lifecycle settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    pub client_secrets_path: PathBuf,
    pub credentials_path: PathBuf,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

/// Remote object-store settings
#[derive(Debug, Deserialize)]
pub struct DriveConfig {
    pub folder_id: String,
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    1000
}

fn default_scopes() -> Vec<String> {
    vec![drive_auth::secrets::DRIVE_FILE_SCOPE.to_string()]
}

fn default_upload_url() -> String {
    ingest::drive::DEFAULT_UPLOAD_URL.to_string()
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("staging")
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment
    /// variables.
    ///
    /// `GOOGLE_CLIENT_SECRETS` overrides `auth.client_secrets_path`.
    /// Broken auth or drive configuration must fail here, at startup,
    /// not lazily on the first request that needs it.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.server.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "server.request_timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }

        if let Some(ref base) = config.server.external_base_url {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "server.external_base_url must start with http:// or https://, got: {base}"
                )));
            }
        }

        if config.drive.folder_id.trim().is_empty() {
            return Err(common::Error::Config(
                "drive.folder_id must not be empty".into(),
            ));
        }

        if !config.drive.upload_url.starts_with("http://")
            && !config.drive.upload_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "drive.upload_url must start with http:// or https://, got: {}",
                config.drive.upload_url
            )));
        }

        if config.auth.scopes.is_empty() {
            return Err(common::Error::Config(
                "auth.scopes must name at least one scope".into(),
            ));
        }

        if let Ok(secrets_path) = std::env::var("GOOGLE_CLIENT_SECRETS") {
            config.auth.client_secrets_path = PathBuf::from(secrets_path);
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("ingest-gateway.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[server]
listen_addr = "127.0.0.1:8080"

[auth]
client_secrets_path = "/etc/gateway/client_secret.json"
credentials_path = "/var/lib/gateway/credential.json"

[drive]
folder_id = "folder-abc"
"#
    }

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ingest-gateway-test-{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_valid_config_applies_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("GOOGLE_CLIENT_SECRETS") };
        let path = write_config("valid", valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.server.max_connections, 1000);
        assert!(!config.server.force_https);
        assert_eq!(config.drive.folder_id, "folder-abc");
        assert_eq!(config.drive.upload_url, ingest::drive::DEFAULT_UPLOAD_URL);
        assert_eq!(
            config.auth.scopes,
            vec![drive_auth::secrets::DRIVE_FILE_SCOPE.to_string()]
        );
    }

    #[test]
    fn missing_file_errors() {
        assert!(Config::load(Path::new("/nonexistent/config.toml")).is_err());
    }

    #[test]
    fn empty_folder_id_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let path = write_config(
            "empty-folder",
            r#"
[server]
listen_addr = "127.0.0.1:8080"

[auth]
client_secrets_path = "x.json"
credentials_path = "c.json"

[drive]
folder_id = "  "
"#,
        );
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("folder_id"), "got: {err}");
    }

    #[test]
    fn zero_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let path = write_config(
            "zero-timeout",
            r#"
[server]
listen_addr = "127.0.0.1:8080"
request_timeout_secs = 0

[auth]
client_secrets_path = "x.json"
credentials_path = "c.json"

[drive]
folder_id = "f"
"#,
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn bad_external_base_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let path = write_config(
            "bad-base",
            r#"
[server]
listen_addr = "127.0.0.1:8080"
external_base_url = "gateway.example.com"

[auth]
client_secrets_path = "x.json"
credentials_path = "c.json"

[drive]
folder_id = "f"
"#,
        );
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn env_var_overrides_client_secrets_path() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let path = write_config("env-secrets", valid_toml());

        unsafe { set_env("GOOGLE_CLIENT_SECRETS", "/run/secrets/cs.json") };
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.auth.client_secrets_path,
            PathBuf::from("/run/secrets/cs.json")
        );
        unsafe { remove_env("GOOGLE_CLIENT_SECRETS") };
    }

    #[test]
    fn resolve_path_prefers_cli_over_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        assert_eq!(
            Config::resolve_path(Some("/cli/wins.toml")),
            PathBuf::from("/cli/wins.toml")
        );
        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("/env/should-lose.toml")
        );
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("ingest-gateway.toml")
        );
    }
}
