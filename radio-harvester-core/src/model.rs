use serde::{Deserialize, Serialize};

/// JSON envelope returned for one listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResponse {
    pub content: String,
}

impl PageResponse {
    /// An empty body marks the end of the listing.
    pub fn is_last(&self) -> bool {
        self.content.is_empty()
    }
}

/// One track block pulled out of a listing page.
///
/// `failed_to_parse` is true when either the link or the title could not be
/// extracted. On disk it is written under the `isParsed` key, which keeps the
/// polarity used by existing error logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongDescriptor {
    #[serde(rename = "name")]
    pub title: String,
    #[serde(rename = "url")]
    pub link: String,
    #[serde(rename = "isParsed")]
    pub failed_to_parse: bool,
    #[serde(rename = "rawValue")]
    pub raw_value: String,
}

impl SongDescriptor {
    pub fn new(
        title: impl Into<String>,
        link: impl Into<String>,
        raw_value: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let link = link.into();
        let failed_to_parse = link.is_empty() || title.is_empty();
        Self {
            title,
            link,
            failed_to_parse,
            raw_value: raw_value.into(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.mp3", self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub song: SongDescriptor,
    pub err: String,
}

impl ErrorRecord {
    pub fn new(song: SongDescriptor, err: impl Into<String>) -> Self {
        Self {
            song,
            err: err.into(),
        }
    }
}
