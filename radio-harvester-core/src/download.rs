use std::path::{Component, Path, PathBuf};

use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error_log::ErrorSink;
use crate::model::{ErrorRecord, SongDescriptor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Saved(PathBuf),
    /// Exactly one record was sent to the error sink.
    Failed,
}

impl DownloadOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, DownloadOutcome::Saved(_))
    }
}

/// Fetches one track and writes it to `<output_dir>/<title>.mp3`. The body
/// lands in a `.part` file first and only replaces the target once complete.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    output_dir: PathBuf,
    errors: ErrorSink,
}

impl Downloader {
    pub fn new(client: reqwest::Client, output_dir: impl Into<PathBuf>, errors: ErrorSink) -> Self {
        Self {
            client,
            output_dir: output_dir.into(),
            errors,
        }
    }

    pub async fn download(&self, song: SongDescriptor) -> DownloadOutcome {
        match self.try_download(&song).await {
            Ok(path) => {
                info!("saved {:?} to {}", song.title, path.display());
                DownloadOutcome::Saved(path)
            }
            Err(message) => {
                warn!("{message}");
                self.errors.append(ErrorRecord::new(song, message));
                DownloadOutcome::Failed
            }
        }
    }

    async fn try_download(&self, song: &SongDescriptor) -> Result<PathBuf, String> {
        if song.link.is_empty() {
            return Err(format!(
                "cannot parse, thus not downloading: {}",
                song.raw_value
            ));
        }

        let file_name = song.file_name();
        if !is_plain_file_name(&file_name) {
            return Err(format!(
                "cannot create file: {:?} is not a plain file name",
                song.title
            ));
        }

        debug!("downloading {}", song.link);
        let response = self
            .client
            .get(&song.link)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| format!("cannot download: {err}"))?;

        let path = self.output_dir.join(&file_name);
        let partial = self.output_dir.join(format!("{file_name}{PARTIAL_SUFFIX}"));
        let file = File::create(&partial)
            .await
            .map_err(|err| format!("cannot create file: {err}"))?;

        if let Err(message) = write_body(file, response, &partial, &path).await {
            if let Err(err) = tokio::fs::remove_file(&partial).await {
                debug!("cannot remove {}: {err}", partial.display());
            }
            return Err(message);
        }

        Ok(path)
    }
}

/// Suffix of the file a body is streamed into before it is renamed over
/// `<title>.mp3`.
const PARTIAL_SUFFIX: &str = ".part";

/// Titles come straight from the page markup; only a single normal path
/// component may be joined onto the output directory.
fn is_plain_file_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

async fn write_body(
    mut file: File,
    response: reqwest::Response,
    partial: &Path,
    path: &Path,
) -> Result<(), String> {
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(copy_failed)?;
        file.write_all(&chunk).await.map_err(copy_failed)?;
    }
    file.flush().await.map_err(copy_failed)?;
    drop(file);

    tokio::fs::rename(partial, path)
        .await
        .map_err(copy_failed)
}

fn copy_failed(err: impl std::fmt::Display) -> String {
    format!("cannot copy from resp to file: {err}")
}
