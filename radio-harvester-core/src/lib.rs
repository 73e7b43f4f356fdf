pub mod config;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod error_log;
pub mod extract;
pub mod fetch;
pub mod harvest;
pub mod http;
pub mod logging;
pub mod model;

pub use config::{
    Config, DownloadSettings, ErrorLogSettings, LogLevel, LogSettings, ParseLogLevelError,
    ShutdownPolicy, SourceSettings,
};
pub use dispatch::{DispatchSummary, DownloadDispatcher};
pub use download::{DownloadOutcome, Downloader};
pub use error::{
    ConfigError, ExtractError, FetchError, FlushError, HarvestError, HarvesterError,
};
pub use error_log::{ErrorCollector, ErrorLog, ErrorSink};
pub use extract::{ContentExtractor, ExtractorPatterns};
pub use fetch::{PageFetcher, WalkSummary};
pub use harvest::{HarvestSummary, Harvester};
pub use logging::{LogManager, LogManagerBuilder};
pub use model::{ErrorRecord, PageResponse, SongDescriptor};

pub type Result<T> = std::result::Result<T, HarvesterError>;
