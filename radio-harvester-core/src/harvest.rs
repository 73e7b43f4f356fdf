use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use url::Url;

use crate::config::Config;
use crate::dispatch::{DispatchSummary, DownloadDispatcher};
use crate::download::Downloader;
use crate::error::HarvestError;
use crate::error_log::{ErrorCollector, ErrorLog, ErrorSink};
use crate::extract::ContentExtractor;
use crate::fetch::{PageFetcher, WalkSummary};
use crate::http::build_client;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    pub pages: u64,
    pub descriptors: u64,
    pub failed_page: Option<u64>,
    pub dispatched: u64,
    pub dropped: u64,
    pub saved: u64,
    pub errors: usize,
    /// Lines written to the error log, `None` if the log could not be created.
    pub log_written: Option<usize>,
}

/// Runs a whole harvest: page walk, downloads, and the final error-log flush.
pub struct Harvester {
    config: Config,
    base_url: Url,
    extractor: ContentExtractor,
}

impl Harvester {
    pub fn new(config: Config) -> crate::Result<Self> {
        let base_url = config.base_url()?;
        let extractor = match &config.source.patterns {
            Some(patterns) => ContentExtractor::new(patterns)?,
            None => ContentExtractor::default(),
        };
        Ok(Self {
            config,
            base_url,
            extractor,
        })
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.config.error_log_path()
    }

    /// Per-track failures never make this return `Err`; they end up in the
    /// error log. Only setup problems do. The error log is flushed before any
    /// late failure is reported.
    pub async fn run(&self) -> crate::Result<HarvestSummary> {
        let span = info_span!("harvest", source = %self.base_url);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> crate::Result<HarvestSummary> {
        let settings = &self.config.download;
        tokio::fs::create_dir_all(&settings.output_dir)
            .await
            .map_err(|source| HarvestError::OutputDir {
                path: settings.output_dir.clone(),
                source,
            })?;

        let client = build_client(settings).map_err(|source| HarvestError::Client { source })?;
        let (errors, collector) = ErrorSink::spawn();
        let (tx, rx) = mpsc::channel(settings.effective_channel_capacity());
        let stop = CancellationToken::new();

        let fetcher = PageFetcher::new(client.clone(), &self.base_url)
            .with_extractor(self.extractor.clone());
        let walker = tokio::spawn({
            let stop = stop.clone();
            async move { fetcher.walk(tx, stop).await }.instrument(info_span!("walk"))
        });

        let downloader = Downloader::new(client, settings.output_dir.clone(), errors);
        let dispatcher = DownloadDispatcher::new(
            downloader,
            settings.effective_workers(),
            settings.shutdown,
        );
        info!(
            "harvesting {} into {} with {} workers ({} shutdown)",
            self.base_url,
            settings.output_dir.display(),
            settings.effective_workers(),
            settings.shutdown
        );
        let dispatched = dispatcher.run(rx, stop).await;
        drop(dispatcher);

        self.settle(walker.await, dispatched, collector).await
    }

    /// Collects and flushes the error log, then reports the walker's fate.
    async fn settle(
        &self,
        walked: Result<WalkSummary, JoinError>,
        dispatched: DispatchSummary,
        collector: ErrorCollector,
    ) -> crate::Result<HarvestSummary> {
        let log = collector.finish().await;
        let log_written = self.flush(&log);
        let walked = walked.map_err(|source| HarvestError::Join { source })?;

        Ok(HarvestSummary {
            pages: walked.pages,
            descriptors: walked.descriptors,
            failed_page: walked.failed_page,
            dispatched: dispatched.dispatched,
            dropped: dispatched.dropped,
            saved: dispatched.saved,
            errors: log.len(),
            log_written,
        })
    }

    fn flush(&self, log: &ErrorLog) -> Option<usize> {
        let path = self.error_log_path();
        match log.flush(&path) {
            Ok(written) => {
                info!("wrote {written} error records to {}", path.display());
                Some(written)
            }
            Err(err) => {
                error!("{err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvesterError;
    use crate::model::{ErrorRecord, SongDescriptor};
    use tempfile::tempdir;

    async fn dying_walk() -> WalkSummary {
        panic!("walker died")
    }

    #[tokio::test]
    async fn error_log_is_flushed_even_when_the_walker_panicked() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.download.output_dir = dir.path().to_path_buf();
        let harvester = Harvester::new(config).unwrap();

        let (sink, collector) = ErrorSink::spawn();
        sink.append(ErrorRecord::new(
            SongDescriptor::new("X", "", "raw"),
            "cannot parse, thus not downloading: raw",
        ));
        drop(sink);
        let walked = tokio::spawn(dying_walk()).await;

        let result = harvester
            .settle(walked, DispatchSummary::default(), collector)
            .await;

        assert!(matches!(
            result,
            Err(HarvesterError::Harvest(HarvestError::Join { .. }))
        ));
        let written = std::fs::read_to_string(harvester.error_log_path()).unwrap();
        assert_eq!(written.lines().count(), 1);
        assert!(written.contains("cannot parse, thus not downloading"));
    }
}
