use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::FetchError;
use crate::extract::ContentExtractor;
use crate::http::with_trailing_slash;
use crate::model::{PageResponse, SongDescriptor};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Pages that returned a non-empty body.
    pub pages: u64,
    pub descriptors: u64,
    /// Index of the page whose fetch ended the walk, if any.
    pub failed_page: Option<u64>,
}

/// Walks the listing endpoint page by page and feeds every extracted track
/// into the download channel.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
    base_url: Url,
    extractor: ContentExtractor,
}

impl PageFetcher {
    pub fn new(client: reqwest::Client, base_url: &Url) -> Self {
        Self {
            client,
            base_url: with_trailing_slash(base_url),
            extractor: ContentExtractor::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: ContentExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn page_url(&self, index: u64) -> Result<Url, FetchError> {
        self.base_url
            .join(&index.to_string())
            .map_err(|source| FetchError::InvalidUrl { index, source })
    }

    pub async fn fetch_page(&self, index: u64) -> Result<PageResponse, FetchError> {
        let url = self.page_url(index)?;
        let network = |source: reqwest::Error| FetchError::Network {
            url: url.to_string(),
            source,
        };

        let body = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(network)?
            .bytes()
            .await
            .map_err(network)?;

        serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Runs the pagination loop from page 0. `stop` is cancelled exactly once,
    /// when the walk ends for any reason.
    ///
    /// A page that cannot be fetched or decoded ends the walk as if it were
    /// the empty sentinel page.
    pub async fn walk(
        &self,
        songs: mpsc::Sender<SongDescriptor>,
        stop: CancellationToken,
    ) -> WalkSummary {
        let mut summary = WalkSummary::default();

        for index in 0u64.. {
            info!("getting page {index}");
            let page = match self.fetch_page(index).await {
                Ok(page) => page,
                Err(err) => {
                    error!("failed to get page {index}, stopping: {err}");
                    summary.failed_page = Some(index);
                    break;
                }
            };

            if page.is_last() {
                info!("page {index} is empty, listing finished");
                break;
            }

            summary.pages += 1;
            let found = self.extractor.extract(&page.content);
            debug!("page {index} yielded {} tracks", found.len());

            let mut receiver_gone = false;
            for song in found {
                if songs.send(song).await.is_err() {
                    receiver_gone = true;
                    break;
                }
                summary.descriptors += 1;
            }
            if receiver_gone {
                warn!("download channel closed, abandoning walk at page {index}");
                break;
            }
        }

        stop.cancel();
        summary
    }
}
