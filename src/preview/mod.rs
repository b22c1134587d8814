pub mod cache;
pub mod providers;
pub mod resolver;

use serde::{Deserialize, Serialize};

/// Lightweight summary shown before committing to a download. Every field may
/// be empty; a whole value always comes from a single producer, never merged
/// across producers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewInfo {
    pub title: String,
    pub thumbnail: String,
    pub author: String,
}

impl PreviewInfo {
    pub fn new(title: impl Into<String>, thumbnail: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            thumbnail: thumbnail.into(),
            author: author.into(),
        }
    }
}

/// What a lookup hands back to the page. A missing preview is not an error:
/// the warning explains it and the download flow stays available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewOutcome {
    pub meta: Option<PreviewInfo>,
    pub warning: Option<String>,
}

impl PreviewOutcome {
    pub fn found(meta: PreviewInfo) -> Self {
        Self {
            meta: Some(meta),
            warning: None,
        }
    }

    pub fn missing(warning: impl Into<String>) -> Self {
        Self {
            meta: None,
            warning: Some(warning.into()),
        }
    }
}
