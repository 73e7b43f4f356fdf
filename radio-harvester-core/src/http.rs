use tracing::warn;
use url::Url;

use crate::config::DownloadSettings;

/// Builds the client shared by the page walker and every download.
pub fn build_client(settings: &DownloadSettings) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = settings.timeout() {
        builder = builder.timeout(timeout);
    }
    if settings.accept_invalid_certs {
        warn!("TLS certificate verification is disabled for all requests");
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build()
}

/// Makes `Url::join` append to the last path segment instead of replacing it.
pub fn with_trailing_slash(url: &Url) -> Url {
    let mut normalized = url.clone();
    if !normalized.path().ends_with('/') {
        let path = format!("{}/", normalized.path());
        normalized.set_path(&path);
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_missing_slash() {
        let url = Url::parse("https://qazradio.fm/kz/audiosloadmore").unwrap();
        assert_eq!(
            with_trailing_slash(&url).as_str(),
            "https://qazradio.fm/kz/audiosloadmore/"
        );
    }

    #[test]
    fn keeps_existing_slash() {
        let url = Url::parse("https://host/list/").unwrap();
        assert_eq!(with_trailing_slash(&url).as_str(), "https://host/list/");
    }

    #[test]
    fn builds_with_defaults() {
        assert!(build_client(&DownloadSettings::default()).is_ok());
    }
}
