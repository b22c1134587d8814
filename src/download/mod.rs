pub mod manager;
pub mod orchestrator;
pub mod progress;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOptions {
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub format: String,
    pub quality: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub options: DownloadOptions,
}

/// Answer from `POST {base}/download`: where the prepared file will appear
/// and what the server wants it called.
#[derive(Debug, Clone, Deserialize)]
pub struct JobResponse {
    #[serde(rename = "downloadUrl", default)]
    pub download_url: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Preparing,
    Polling,
    Downloading,
    Done,
    Cancelled,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Cancelled | Phase::Failed)
    }
}

/// Live view of one orchestration run. A fresh instance is created per run
/// and discarded at the end; bytes and progress keep their last values on
/// failure or cancellation so the page can show how far the run got.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub run_id: String,
    pub phase: Phase,
    pub progress: f32,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub speed_bps: f64,
    pub filename: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl TransferSnapshot {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            phase: Phase::Idle,
            progress: 0.0,
            downloaded_bytes: 0,
            total_bytes: 0,
            speed_bps: 0.0,
            filename: None,
            message: None,
            error: None,
            started_at: Utc::now(),
        }
    }
}

/// Maps a content type onto the file extension it implies, falling back to
/// the extension already on the candidate name, then to mp4.
pub fn extension_for_content_type(content_type: &str, fallback_name: &str) -> String {
    let name_ext = fallback_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty());

    let ct = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if ct.is_empty() {
        return name_ext.unwrap_or_else(|| "mp4".to_string());
    }

    if ct.contains("mp4") {
        "mp4".to_string()
    } else if ct.contains("webm") {
        "webm".to_string()
    } else if ct.contains("ogg") {
        "ogg".to_string()
    } else if ct.contains("matroska") {
        "mkv".to_string()
    } else if ct.contains("mpeg") || ct.contains("mp3") {
        "mp3".to_string()
    } else if ct.contains("wav") {
        "wav".to_string()
    } else {
        name_ext.unwrap_or_else(|| "mp4".to_string())
    }
}

/// Final on-disk name: the extension implied by the response content type is
/// appended when the server name has none and replaces a mismatched one.
pub fn resolve_filename(server_name: &str, content_type: &str) -> String {
    let implied = extension_for_content_type(content_type, server_name);

    match server_name.rsplit_once('.') {
        None => format!("{}.{}", server_name, implied),
        Some((stem, current)) => {
            if current.eq_ignore_ascii_case(&implied) {
                server_name.to_string()
            } else {
                format!("{}.{}", stem, implied)
            }
        }
    }
}

/// Default name when the server response omits one.
pub fn default_filename(options: &DownloadOptions) -> String {
    if options.format == "mp3" {
        "video.mp3".to_string()
    } else {
        "video.mp4".to_string()
    }
}
