use crate::errors::{AppError, Result};
use url::Url;
use std::path::Path;

pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    /// Accepts anything that parses as an http(s) URL with a host. Scheme-less
    /// input ("youtube.com/watch?v=...") is allowed; https is assumed.
    pub fn validate_url(&self, url: &str) -> Result<()> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation("URL cannot be empty".to_string()));
        }

        let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };

        let parsed_url = Url::parse(&candidate)
            .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

        if parsed_url.host_str().map_or(true, |h| h.is_empty()) {
            return Err(AppError::Validation("URL must have a host".to_string()));
        }

        Ok(())
    }

    pub fn validate_download_path(&self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(AppError::Validation("Download path cannot be empty".to_string()));
        }

        let path = Path::new(path);

        // Check for path traversal attempts
        if path.components().any(|component| {
            matches!(component, std::path::Component::ParentDir)
        }) {
            return Err(AppError::Validation("Path traversal detected".to_string()));
        }

        // Check for null bytes
        if path.to_string_lossy().contains('\0') {
            return Err(AppError::Validation("Null bytes not allowed in file path".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_full_and_scheme_less_urls() {
        let validator = InputValidator::new();
        assert!(validator.validate_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").is_ok());
        assert!(validator.validate_url("youtube.com/watch?v=dQw4w9WgXcQ").is_ok());
        assert!(validator.validate_url("  youtu.be/dQw4w9WgXcQ  ").is_ok());
    }

    #[test]
    fn rejects_empty_and_host_less_input() {
        let validator = InputValidator::new();
        assert!(validator.validate_url("").is_err());
        assert!(validator.validate_url("   ").is_err());
        assert!(validator.validate_url("https://").is_err());
        assert!(validator.validate_url("not a url at all").is_err());
    }

    #[test]
    fn rejects_traversal_in_download_path() {
        let validator = InputValidator::new();
        assert!(validator.validate_download_path("../outside").is_err());
        assert!(validator.validate_download_path("downloads/videos").is_ok());
    }
}
