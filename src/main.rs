// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod commands;
mod config;
mod download;
mod errors;
mod preview;
mod security;
#[cfg(test)]
mod test_support;
mod utils;

use log::info;
use std::sync::Arc;
use tokio::sync::Mutex;

use download::manager::TransferManager;
use preview::cache::PreviewCache;
use preview::resolver::PreviewResolver;

#[tokio::main]
async fn main() {
    // Initialize logger
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Starting clipfetch");

    // Load configuration
    let config = match config::AppConfig::load() {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            config::AppConfig::default()
        }
    };

    // The preview cache lives for the whole session and is owned by the
    // composition root; the resolver holds a reference to it.
    let preview_cache = Arc::new(PreviewCache::new());
    let resolver = Arc::new(PreviewResolver::new(preview_cache.clone(), &config));
    info!("Preview resolver initialized successfully");

    let config = Arc::new(Mutex::new(config));
    let transfers = Arc::new(TransferManager::new(config.clone()));

    // Create app state
    let app_state = commands::AppState {
        config,
        resolver,
        transfers,
    };

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .manage(app_state)
        .invoke_handler(tauri::generate_handler![
            commands::validate_url,
            commands::fetch_preview,
            commands::start_download,
            commands::cancel_download,
            commands::get_transfer_state,
            commands::get_settings,
            commands::update_settings,
            commands::browse_folder
        ])
        .setup(|_app| {
            info!("Application setup completed");
            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
