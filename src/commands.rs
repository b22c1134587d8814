use tauri::{Emitter, State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::download::manager::TransferManager;
use crate::download::{DownloadRequest, TransferSnapshot};
use crate::errors::AppError;
use crate::preview::resolver::PreviewResolver;
use crate::preview::PreviewOutcome;
use crate::security::InputValidator;

pub const PREVIEW_EVENT: &str = "preview://update";
pub const TRANSFER_EVENT: &str = "transfer://progress";

// State management
pub struct AppState {
    pub config: Arc<Mutex<AppConfig>>,
    pub resolver: Arc<PreviewResolver>,
    pub transfers: Arc<TransferManager>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub download_path: Option<String>,
    pub backend_base_url: Option<String>,
    pub proxy: Option<String>,
    pub poll_max_attempts: Option<u32>,
    pub proceed_after_poll_timeout: Option<bool>,
    // UI settings
    pub theme: Option<String>,
    pub show_notifications: Option<bool>,
}

#[tauri::command]
pub async fn validate_url(input: String) -> std::result::Result<(), AppError> {
    InputValidator::new().validate_url(&input)
}

#[tauri::command]
pub async fn fetch_preview(
    app: tauri::AppHandle,
    state: State<'_, AppState>,
    url: String,
) -> std::result::Result<PreviewOutcome, AppError> {
    InputValidator::new().validate_url(&url)?;

    let resolver = state.resolver.clone();
    resolver
        .resolve(&url, move |info| {
            let _ = app.emit(PREVIEW_EVENT, info.clone());
        })
        .await
}

#[tauri::command]
pub async fn start_download(
    app: tauri::AppHandle,
    state: State<'_, AppState>,
    request: DownloadRequest,
) -> std::result::Result<String, AppError> {
    InputValidator::new().validate_url(&request.url)?;

    state
        .transfers
        .start(request, move |snapshot| {
            let _ = app.emit(TRANSFER_EVENT, snapshot);
        })
        .await
}

#[tauri::command]
pub async fn cancel_download(state: State<'_, AppState>) -> std::result::Result<(), AppError> {
    state.transfers.cancel().await
}

#[tauri::command]
pub async fn get_transfer_state(
    state: State<'_, AppState>,
) -> std::result::Result<TransferSnapshot, AppError> {
    Ok(state.transfers.current())
}

#[tauri::command]
pub async fn get_settings(
    state: State<'_, AppState>,
) -> std::result::Result<serde_json::Value, AppError> {
    let config = state.config.lock().await;

    Ok(serde_json::json!({
        "download_path": config.download_path.to_string_lossy().to_string(),
        "backend_base_url": config.backend_base_url,
        "proxy": config.proxy,
        "poll_max_attempts": config.poll_max_attempts,
        "proceed_after_poll_timeout": config.proceed_after_poll_timeout,
        "theme": config.ui.theme,
        "show_notifications": config.ui.show_notifications,
    }))
}

#[tauri::command]
pub async fn update_settings(
    state: State<'_, AppState>,
    update: SettingsUpdate,
) -> std::result::Result<(), AppError> {
    let mut config = state.config.lock().await;

    if let Some(path) = update.download_path {
        InputValidator::new().validate_download_path(&path)?;
        config.download_path = std::path::PathBuf::from(path);
    }

    if let Some(base_url) = update.backend_base_url {
        config.backend_base_url = base_url;
    }

    if let Some(proxy) = update.proxy {
        config.proxy = if proxy.is_empty() { None } else { Some(proxy) };
    }

    if let Some(attempts) = update.poll_max_attempts {
        config.poll_max_attempts = attempts;
    }

    if let Some(proceed) = update.proceed_after_poll_timeout {
        config.proceed_after_poll_timeout = proceed;
    }

    if let Some(theme) = update.theme {
        config.ui.theme = theme;
    }

    if let Some(show_notifications) = update.show_notifications {
        config.ui.show_notifications = show_notifications;
    }

    config.save()?;
    Ok(())
}

#[tauri::command]
pub async fn browse_folder(
    app: tauri::AppHandle,
) -> std::result::Result<Option<String>, AppError> {
    use tauri_plugin_dialog::DialogExt;
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();

    app.dialog().file()
        .set_title("Select Download Folder")
        .pick_folder(move |path| {
            let _ = tx.send(path);
        });

    match rx.recv() {
        Ok(Some(path)) => Ok(Some(path.to_string())),
        Ok(None) => Ok(None),
        Err(_) => Ok(None),
    }
}
