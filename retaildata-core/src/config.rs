//! Runtime settings: defaults, an optional TOML file, then `RETAILDATA_*`
//! environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credentials::BackendPreference;
use crate::error::DataError;

pub const APP_NAME: &str = "retaildata";
pub const ENV_PREFIX: &str = "RETAILDATA_";
pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_FETCH_WORKERS: usize = 4;
/// Data root used when the platform reports no data directory.
pub const FALLBACK_DATA_DIR: &str = "./data";

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the `raw/`, `prepared/` and `meta/` trees.
    pub data_dir: PathBuf,
    /// Scratch space for archives and partial downloads.
    pub cache_dir: PathBuf,
    /// When false, `download` always re-acquires.
    pub cache_enabled: bool,
    pub credential_file: PathBuf,
    pub credential_backend: BackendPreference,
    /// Never read from or written to the settings file.
    #[serde(skip)]
    pub master_password: Option<String>,
    pub fetch_workers: usize,
    pub http_timeout_secs: u64,
    pub hub_endpoint: String,
    /// Extra TOML catalog merged into the built-in registry.
    pub catalog_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = default_data_dir(dirs::data_dir());
        let cache_dir = dirs::cache_dir()
            .map(|d| d.join(APP_NAME))
            .unwrap_or_else(|| data_dir.join("cache"));
        let credential_file = dirs::config_dir()
            .map(|d| d.join(APP_NAME))
            .unwrap_or_else(|| data_dir.clone())
            .join("credentials.json");
        Self {
            data_dir,
            cache_dir,
            cache_enabled: true,
            credential_file,
            credential_backend: BackendPreference::Auto,
            master_password: None,
            fetch_workers: DEFAULT_FETCH_WORKERS,
            http_timeout_secs: 60,
            hub_endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            catalog_path: None,
        }
    }
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn load() -> Result<Self, DataError> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve settings with an injectable environment lookup.
    ///
    /// The file named by `RETAILDATA_CONFIG` wins over the platform default
    /// `<config_dir>/retaildata/config.toml`; environment variables override
    /// whatever the file sets.
    pub fn resolve<F>(env: F) -> Result<Self, DataError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit = env(&env_key("CONFIG")).map(PathBuf::from);
        let file = explicit.or_else(|| default_config_file().filter(|p| p.is_file()));
        let mut settings = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env(env)?;
        Ok(settings)
    }

    /// Settings with every path under one root. Used by tests and by the
    /// CLI `--data-dir` flag.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
            credential_file: root.join("credentials.json"),
            ..Self::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
        Self::from_toml(&content).map_err(|e| match e {
            DataError::InvalidConfiguration(reason) => {
                DataError::InvalidConfiguration(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, DataError> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| DataError::InvalidConfiguration(e.to_string()))?;
        settings.check()?;
        Ok(settings)
    }

    /// Apply `RETAILDATA_*` overrides.
    pub fn apply_env<F>(&mut self, env: F) -> Result<(), DataError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| env(&env_key(name)).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = get("CACHE_ENABLED") {
            self.cache_enabled = parse_bool("CACHE_ENABLED", &v)?;
        }
        if let Some(v) = get("CREDENTIAL_FILE") {
            self.credential_file = PathBuf::from(v);
        }
        if let Some(v) = get("CREDENTIAL_BACKEND") {
            self.credential_backend = v.parse()?;
        }
        if let Some(v) = get("MASTER_PASSWORD") {
            self.master_password = Some(v);
        }
        if let Some(v) = get("FETCH_WORKERS") {
            self.fetch_workers = v.trim().parse().map_err(|_| {
                DataError::InvalidConfiguration(format!(
                    "{} must be a positive integer, got '{v}'",
                    env_key("FETCH_WORKERS")
                ))
            })?;
        }
        if let Some(v) = get("HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = v.trim().parse().map_err(|_| {
                DataError::InvalidConfiguration(format!(
                    "{} must be a number of seconds, got '{v}'",
                    env_key("HTTP_TIMEOUT_SECS")
                ))
            })?;
        }
        if let Some(v) = get("HUB_ENDPOINT") {
            self.hub_endpoint = v;
        }
        if let Some(v) = get("CATALOG") {
            self.catalog_path = Some(PathBuf::from(v));
        }
        self.check()
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    fn check(&self) -> Result<(), DataError> {
        if self.fetch_workers == 0 {
            return Err(DataError::InvalidConfiguration(
                "fetch_workers must be at least 1".into(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(DataError::InvalidConfiguration(
                "http_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// `<platform data dir>/retaildata`, or `./data` when the platform has none.
fn default_data_dir(platform: Option<PathBuf>) -> PathBuf {
    platform
        .map(|d| d.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(FALLBACK_DATA_DIR))
}

pub fn env_key(name: &str) -> String {
    format!("{ENV_PREFIX}{name}")
}

fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME).join("config.toml"))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, DataError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DataError::InvalidConfiguration(format!(
            "{} must be a boolean, got '{value}'",
            env_key(name)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert!(s.cache_enabled);
        assert_eq!(s.fetch_workers, 4);
        assert_eq!(s.credential_backend, BackendPreference::Auto);
        assert_eq!(s.data_dir, default_data_dir(dirs::data_dir()));
    }

    #[test]
    fn data_dir_falls_back_to_local_data() {
        assert_eq!(default_data_dir(None), PathBuf::from("./data"));
        assert_eq!(
            default_data_dir(Some(PathBuf::from("/home/u/.local/share"))),
            PathBuf::from("/home/u/.local/share/retaildata")
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut s = Settings::rooted_at("/tmp/rd");
        s.apply_env(env_from(&[
            ("RETAILDATA_DATA_DIR", "/srv/data"),
            ("RETAILDATA_CACHE_ENABLED", "false"),
            ("RETAILDATA_FETCH_WORKERS", "8"),
            ("RETAILDATA_CREDENTIAL_BACKEND", "file"),
            ("RETAILDATA_MASTER_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        assert_eq!(s.data_dir, PathBuf::from("/srv/data"));
        assert!(!s.cache_enabled);
        assert_eq!(s.fetch_workers, 8);
        assert_eq!(s.credential_backend, BackendPreference::File);
        assert_eq!(s.master_password.as_deref(), Some("hunter2"));
        // Untouched keys keep their values
        assert_eq!(s.cache_dir, PathBuf::from("/tmp/rd/cache"));
    }

    #[test]
    fn bad_env_values_rejected() {
        let mut s = Settings::default();
        let err = s
            .apply_env(env_from(&[("RETAILDATA_CACHE_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, DataError::InvalidConfiguration(_)));

        let mut s = Settings::default();
        assert!(s
            .apply_env(env_from(&[("RETAILDATA_FETCH_WORKERS", "0")]))
            .is_err());
    }

    #[test]
    fn file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "data_dir = \"/from/file\"\nfetch_workers = 2\ncache_enabled = false\n",
        )
        .unwrap();
        let path_str = path.display().to_string();
        let s = Settings::resolve(env_from(&[
            ("RETAILDATA_CONFIG", path_str.as_str()),
            ("RETAILDATA_FETCH_WORKERS", "6"),
        ]))
        .unwrap();
        assert_eq!(s.data_dir, PathBuf::from("/from/file"));
        assert!(!s.cache_enabled);
        assert_eq!(s.fetch_workers, 6);
    }

    #[test]
    fn master_password_never_serialized() {
        let mut s = Settings::rooted_at("/tmp/rd");
        s.master_password = Some("secret".into());
        let text = toml::to_string(&s).unwrap();
        assert!(!text.contains("secret"));
    }
}
