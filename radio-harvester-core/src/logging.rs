use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::{fmt, util::SubscriberInitExt, EnvFilter};

use crate::config::{project_dirs, LogLevel, LogSettings};

pub const LOG_FILE_PREFIX: &str = "radio_harvester.log";

/// HTTP stack targets held at `warn` unless `RUST_LOG` says otherwise.
const HTTP_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

/// `<data dir>/logs`, e.g. `~/.local/share/radio-harvester/logs` on Linux.
fn default_log_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// How much of the event stream reaches stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Full,
    WarningsOnly,
}

impl Console {
    fn level_filter(self) -> LevelFilter {
        match self {
            Console::Full => LevelFilter::TRACE,
            Console::WarningsOnly => LevelFilter::WARN,
        }
    }
}

/// Keeps the non-blocking file writer alive; drop it last.
pub struct LogManager {
    _guard: Option<WorkerGuard>,
    level: LogLevel,
    file_dir: Option<PathBuf>,
}

impl LogManager {
    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Directory of the rolling process log, `None` when file logging is off.
    pub fn file_dir(&self) -> Option<&Path> {
        self.file_dir.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct LogManagerBuilder {
    level: LogLevel,
    file_dir: Option<PathBuf>,
    console: Console,
}

impl Default for LogManagerBuilder {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file_dir: Some(default_log_dir()),
            console: Console::Full,
        }
    }
}

impl LogManagerBuilder {
    pub fn with_settings(mut self, settings: &LogSettings) -> Self {
        self.level = settings.level;
        self.file_dir = settings
            .enabled
            .then(|| settings.dir.clone().unwrap_or_else(default_log_dir));
        self
    }

    /// A level given on the command line wins over the config file.
    pub fn level_override(mut self, level: Option<LogLevel>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.console = if quiet {
            Console::WarningsOnly
        } else {
            Console::Full
        };
        self
    }

    fn directives(&self) -> String {
        let http_level = match self.level {
            LogLevel::Error => LogLevel::Error,
            _ => LogLevel::Warn,
        };
        std::iter::once(self.level.to_string())
            .chain(
                HTTP_TARGETS
                    .iter()
                    .map(|target| format!("{target}={http_level}")),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }

    pub fn build(self) -> io::Result<LogManager> {
        let (file_layer, guard) = match &self.file_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().with_writer(writer).with_ansi(false);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let console_layer = fmt::layer()
            .with_target(false)
            .with_filter(self.console.level_filter());

        tracing_subscriber::registry()
            .with(self.filter())
            .with(file_layer)
            .with(console_layer)
            .try_init()
            .map_err(io::Error::other)?;

        Ok(LogManager {
            _guard: guard,
            level: self.level,
            file_dir: self.file_dir,
        })
    }
}
