use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tauri error: {0}")]
    Tauri(#[from] tauri::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job error: {0}")]
    Job(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Cancelled by user")]
    Cancelled,
}

impl AppError {
    /// True when the error stems from a user-initiated abort rather than a
    /// genuine failure. Besides the dedicated variant, message text is
    /// inspected so aborts surfaced through transport errors are not
    /// misreported.
    pub fn is_cancellation(&self) -> bool {
        if matches!(self, AppError::Cancelled) {
            return true;
        }
        let text = self.to_string().to_lowercase();
        text.contains("cancel") || text.contains("abort")
    }
}

impl From<AppError> for tauri::ipc::InvokeError {
    fn from(error: AppError) -> Self {
        tauri::ipc::InvokeError::from(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
