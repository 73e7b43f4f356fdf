use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ExtractError;
use crate::model::SongDescriptor;

pub const TRACK_PATTERN: &str = r#"<a href=.+?<i class="fa fa-download"></i></a></span>"#;
pub const LINK_PATTERN: &str = r#"href="(?P<link>https?://[^"]+\.mp3)""#;
pub const TITLE_PATTERN: &str = r#"download="(?P<title>[^"]+)"><i "#;

static TRACK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(TRACK_PATTERN).expect("valid regex"));
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(LINK_PATTERN).expect("valid regex"));
static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(TITLE_PATTERN).expect("valid regex"));

/// Source patterns for a listing layout. `link` and `title` must expose a
/// capture group of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorPatterns {
    pub track: String,
    pub link: String,
    pub title: String,
}

impl Default for ExtractorPatterns {
    fn default() -> Self {
        Self {
            track: TRACK_PATTERN.to_string(),
            link: LINK_PATTERN.to_string(),
            title: TITLE_PATTERN.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentExtractor {
    track: Regex,
    link: Regex,
    title: Regex,
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self {
            track: TRACK_RE.clone(),
            link: LINK_RE.clone(),
            title: TITLE_RE.clone(),
        }
    }
}

impl ContentExtractor {
    pub fn new(patterns: &ExtractorPatterns) -> Result<Self, ExtractError> {
        Ok(Self {
            track: compile("track", &patterns.track)?,
            link: with_group(compile("link", &patterns.link)?, "link")?,
            title: with_group(compile("title", &patterns.title)?, "title")?,
        })
    }

    /// Splits a page body into track blocks and pulls a link and title out of
    /// each. Blocks missing either field are kept and flagged.
    pub fn extract(&self, body: &str) -> Vec<SongDescriptor> {
        self.track
            .find_iter(body)
            .map(|fragment| {
                let raw = fragment.as_str();
                let link = first_capture(&self.link, raw, "link");
                let title = first_capture(&self.title, raw, "title");
                SongDescriptor::new(title, link, raw)
            })
            .collect()
    }
}

fn compile(name: &'static str, pattern: &str) -> Result<Regex, ExtractError> {
    Regex::new(pattern).map_err(|source| ExtractError::Pattern { name, source })
}

fn with_group(re: Regex, group: &'static str) -> Result<Regex, ExtractError> {
    if re.capture_names().flatten().any(|name| name == group) {
        Ok(re)
    } else {
        Err(ExtractError::MissingGroup { group })
    }
}

fn first_capture<'a>(re: &Regex, haystack: &'a str, group: &str) -> &'a str {
    re.captures(haystack)
        .and_then(|captures| captures.name(group))
        .map(|m| m.as_str())
        .unwrap_or_default()
}
