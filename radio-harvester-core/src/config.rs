use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::extract::ExtractorPatterns;

static DEFAULT_PROJECT_DIRS: Lazy<Option<ProjectDirs>> = Lazy::new(|| {
    #[cfg(target_os = "macos")]
    {
        ProjectDirs::from("com", "radio-harvester", "radio-harvester")
    }
    #[cfg(target_os = "windows")]
    {
        ProjectDirs::from("", "radio-harvester", "radio-harvester")
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        ProjectDirs::from("", "", "radio-harvester")
    }
});

pub const CONFIG_RELATIVE_PATH: &str = "radio_harvester.toml";
pub const DEFAULT_BASE_URL: &str = "https://qazradio.fm/kz/audiosloadmore";
pub const ERROR_LOG_FILE_NAME: &str = "err.log.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub error_log: ErrorLogSettings,
    #[serde(default)]
    pub logging: LogSettings,
}

impl Config {
    pub fn load_or_default(path: Option<&Path>) -> Result<(Self, PathBuf), ConfigError> {
        let resolved_path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(default_config_path);

        if resolved_path.exists() {
            let content = fs::read_to_string(&resolved_path).map_err(|source| ConfigError::Io {
                path: resolved_path.clone(),
                source,
            })?;
            let config =
                toml::from_str::<Config>(&content).map_err(|source| ConfigError::Parse {
                    path: resolved_path.clone(),
                    source,
                })?;
            Ok((config, resolved_path))
        } else {
            let config = Config::default();
            config.save(&resolved_path)?;
            Ok((config, resolved_path))
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let serialized =
            toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })?;
        fs::write(path, serialized).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The only validation performed: the listing endpoint has to be a URL.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.source.base_url).map_err(|source| ConfigError::InvalidBaseUrl {
            url: self.source.base_url.clone(),
            source,
        })
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.error_log
            .path
            .clone()
            .unwrap_or_else(|| self.download.output_dir.join(ERROR_LOG_FILE_NAME))
    }
}

pub(crate) fn project_dirs() -> Option<&'static ProjectDirs> {
    DEFAULT_PROJECT_DIRS.as_ref()
}

fn default_config_path() -> PathBuf {
    if let Some(project_dirs) = project_dirs() {
        project_dirs.config_dir().join(CONFIG_RELATIVE_PATH)
    } else {
        PathBuf::from(CONFIG_RELATIVE_PATH)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    pub base_url: String,
    /// Overrides the built-in track, link and title patterns.
    #[serde(default)]
    pub patterns: Option<ExtractorPatterns>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            patterns: None,
        }
    }
}

/// What the dispatcher does with descriptors still queued when the stop
/// signal arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Dispatch everything that was enqueued before the stop signal.
    #[default]
    Drain,
    /// Race the stop signal against the queue; whatever is left is dropped.
    BestEffort,
}

impl std::fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ShutdownPolicy::Drain => "drain",
            ShutdownPolicy::BestEffort => "best_effort",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    pub output_dir: PathBuf,
    pub workers: usize,
    pub channel_capacity: usize,
    pub timeout_sec: u64,
    /// Skips TLS certificate verification for every request. Off unless set.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub shutdown: ShutdownPolicy,
}

impl DownloadSettings {
    pub fn effective_workers(&self) -> usize {
        self.workers.clamp(1, 64)
    }

    pub fn effective_channel_capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_sec > 0).then(|| Duration::from_secs(self.timeout_sec))
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            workers: 8,
            channel_capacity: 20,
            timeout_sec: 180,
            accept_invalid_certs: false,
            shutdown: ShutdownPolicy::Drain,
        }
    }
}

fn default_output_dir() -> PathBuf {
    match dirs::audio_dir().or_else(|| dirs::home_dir().map(|home| home.join("Music"))) {
        Some(music) => music.join("radio-harvester"),
        None => PathBuf::from("music"),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorLogSettings {
    /// Defaults to `err.log.jsonl` inside the output directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level {0:?}, expected error, warn, info or debug")]
pub struct ParseLogLevelError(pub String);

impl std::str::FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(ParseLogLevelError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Writes a daily-rolling process log next to stdout output.
    pub enabled: bool,
    pub level: LogLevel,
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::Info,
            dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn config_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let restored: Config = toml::from_str(&toml).unwrap();
        assert_eq!(restored.download.workers, 8);
        assert_eq!(restored.download.channel_capacity, 20);
        assert!(!restored.download.accept_invalid_certs);
        assert_eq!(restored.download.shutdown, ShutdownPolicy::Drain);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [download]
            output_dir = "/tmp/music"
            workers = 0
            channel_capacity = 0
            timeout_sec = 0
            shutdown = "best_effort"
            "#,
        )
        .unwrap();
        assert_eq!(config.source.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.source.patterns, None);
        assert_eq!(config.download.effective_workers(), 1);
        assert_eq!(config.download.effective_channel_capacity(), 1);
        assert_eq!(config.download.timeout(), None);
        assert_eq!(config.download.shutdown, ShutdownPolicy::BestEffort);
        assert_eq!(
            config.error_log_path(),
            PathBuf::from("/tmp/music").join(ERROR_LOG_FILE_NAME)
        );
    }

    #[test]
    fn load_creates_default_file_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_RELATIVE_PATH);
        let (config, resolved) = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(resolved, path);
        assert!(path.exists());
        assert_eq!(config.source.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let mut config = Config::default();
        config.source.base_url = "not a url".to_string();
        assert!(matches!(
            config.base_url(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("warn".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!(
            "trace".parse::<LogLevel>(),
            Err(ParseLogLevelError("trace".to_string()))
        );
    }
}
