use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "config/config.json";
pub const PID_FILE_NAME: &str = "capmux.pid";
pub const MODULE_ALL: &str = "all";

/// Validation run after every config merge.
pub trait ConfigCheck {
    fn check(&self) -> Result<()>;
}

/// Process-wide settings, built once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub config_file: String,
    pub base_path: PathBuf,
    pub version: String,
    /// Empty means the stdio transport.
    pub listen_addr: String,
    pub debug: bool,
    pub module: String,
    pub username: String,
    pub home_dir: String,
    pub system_info: String,
    pub description: String,
    pub command: String,
    pub args: String,
    pub base_url: String,
    pub server_name: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        let home_dir = std::env::var("HOME").unwrap_or_default();
        let base_path = if home_dir.is_empty() {
            absolute_path(".capmux")
        } else {
            absolute_path(Path::new(&home_dir).join(".capmux"))
        };

        Self {
            config_file: DEFAULT_CONFIG_FILE.to_string(),
            base_path,
            version: env!("CARGO_PKG_VERSION").to_string(),
            listen_addr: String::new(),
            debug: false,
            module: MODULE_ALL.to_string(),
            username: std::env::var("USER").unwrap_or_default(),
            home_dir,
            system_info: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            description: "Local capability host exposing browser, command and filesystem tools"
                .to_string(),
            command: "capmux".to_string(),
            args: String::new(),
            base_url: String::new(),
            server_name: "capmux".to_string(),
        }
    }
}

impl HostConfig {
    /// Relative paths are resolved against the current directory.
    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = absolute_path(base_path);
        self
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_path.join(&self.config_file)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.base_path.join(PID_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_path.join("logs")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_path.join("config")
    }

    pub fn browser_dir(&self) -> PathBuf {
        self.base_path.join("browser")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base_path.join("data")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.base_path.join("cache")
    }

    pub fn base_directories(&self) -> Vec<PathBuf> {
        vec![
            self.logs_dir(),
            self.config_dir(),
            self.browser_dir(),
            self.data_dir(),
            self.cache_dir(),
        ]
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in self.base_directories() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                CoreError::Io(format!("failed to create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    pub fn is_sse(&self) -> bool {
        !self.listen_addr.is_empty()
    }
}

impl ConfigCheck for HostConfig {
    fn check(&self) -> Result<()> {
        if self.base_path.as_os_str().is_empty() {
            return Err(CoreError::InvalidConfig("base_path must not be empty".to_string()));
        }
        if !self.base_path.is_absolute() {
            return Err(CoreError::InvalidConfig(format!(
                "base_path '{}' must be an absolute path",
                self.base_path.display()
            )));
        }
        if self.is_sse() {
            self.listen_addr.parse::<SocketAddr>().map_err(|e| {
                CoreError::InvalidConfig(format!(
                    "listen_addr '{}' is not a socket address: {e}",
                    self.listen_addr
                ))
            })?;
        }
        Ok(())
    }
}

/// Joins a relative path onto the current directory. Provider defaults are
/// derived from the base path and must be absolute.
pub fn absolute_path(path: impl Into<PathBuf>) -> PathBuf {
    let path = path.into();
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => std::env::temp_dir().join(path),
    }
}

pub fn check_positive(field: &str, value: i64) -> Result<()> {
    if value <= 0 {
        return Err(CoreError::InvalidConfig(format!(
            "{field} must be greater than 0, got {value}"
        )));
    }
    Ok(())
}

/// An empty path means "use the built-in prompt".
pub fn check_prompt_file(path: &str) -> Result<()> {
    if path.is_empty() {
        return Ok(());
    }
    std::fs::read_to_string(path).map_err(|e| {
        CoreError::InvalidConfig(format!("prompt file '{path}' is not readable: {e}"))
    })?;
    Ok(())
}

/// Loads the prompt text, falling back to `builtin` when no file is configured.
pub fn load_prompt(path: &str, builtin: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(builtin.to_string());
    }
    std::fs::read_to_string(path).map_err(|e| {
        CoreError::InvalidConfig(format!("prompt file '{path}' is not readable: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_host_config_passes_check() {
        let config = HostConfig::default();
        assert!(config.check().is_ok());
        assert_eq!(config.module, MODULE_ALL);
        assert!(!config.is_sse());
    }

    #[test]
    fn test_paths_are_under_base_path() {
        let config = HostConfig::default().with_base_path("/tmp/capmux-test");

        assert_eq!(
            config.config_path(),
            PathBuf::from("/tmp/capmux-test/config/config.json")
        );
        assert_eq!(config.pid_path(), PathBuf::from("/tmp/capmux-test/capmux.pid"));
        assert_eq!(config.base_directories().len(), 5);
    }

    #[test]
    fn test_relative_base_path_is_made_absolute() {
        let config = HostConfig::default().with_base_path("rel-capmux");

        assert!(config.base_path.is_absolute());
        assert!(config.base_path.ends_with("rel-capmux"));
        assert!(config.data_dir().is_absolute());
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_relative_base_path_rejected_by_check() {
        let config = HostConfig {
            base_path: PathBuf::from("rel-capmux"),
            ..HostConfig::default()
        };
        assert!(matches!(config.check(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_listen_addr_rejected() {
        let config = HostConfig {
            listen_addr: "not-an-address".to_string(),
            ..HostConfig::default()
        };
        assert!(matches!(config.check(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_ensure_directories_creates_layout() {
        let dir = std::env::temp_dir().join(format!("capmux-cfg-{}", uuid::Uuid::new_v4()));
        let config = HostConfig::default().with_base_path(&dir);

        config.ensure_directories().unwrap();
        for sub in config.base_directories() {
            assert!(sub.is_dir());
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_check_positive() {
        assert!(check_positive("timeout", 1).is_ok());
        assert!(check_positive("timeout", 0).is_err());
        assert!(check_positive("timeout", -5).is_err());
    }

    #[test]
    fn test_prompt_file_checks() {
        assert!(check_prompt_file("").is_ok());
        assert!(check_prompt_file("/definitely/not/here.txt").is_err());
        assert_eq!(load_prompt("", "builtin").unwrap(), "builtin");
    }

    #[test]
    fn test_host_config_json_roundtrip_with_missing_keys() {
        let parsed: HostConfig =
            serde_json::from_str(r#"{"listen_addr":"127.0.0.1:6789","debug":true}"#).unwrap();
        assert!(parsed.debug);
        assert!(parsed.is_sse());
        assert_eq!(parsed.config_file, DEFAULT_CONFIG_FILE);
    }
}
