use std::future::Future;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use log::{info, warn};
use regex::Regex;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::preview::cache::PreviewCache;
use crate::preview::providers::{BackendMetaProducer, OembedProducer, PreviewProducer};
use crate::preview::{PreviewInfo, PreviewOutcome};

const PREVIEW_UNAVAILABLE: &str =
    "Couldn't fetch a preview for this URL. You can still continue to download.";

static HOSTED_ID_PATTERN: OnceLock<Regex> = OnceLock::new();
static BARE_ID_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Pulls an 11-character YouTube video id out of the input. Known host forms
/// (youtu.be, watch?v=, shorts/, embed/, v/, the nocookie domain) are matched
/// first; a bare token anywhere in the string is accepted as a fallback.
pub fn extract_video_id(input: &str) -> Option<String> {
    let trimmed = input.trim();

    let hosted = HOSTED_ID_PATTERN.get_or_init(|| {
        Regex::new(
            r"(?:youtu\.be/|youtube(?:-nocookie)?\.com/(?:watch\?v=|shorts/|embed/|v/))([0-9A-Za-z_-]{11})",
        )
        .expect("hosted id pattern")
    });
    if let Some(captures) = hosted.captures(trimmed) {
        return captures.get(1).map(|m| m.as_str().to_string());
    }

    let bare = BARE_ID_PATTERN
        .get_or_init(|| Regex::new(r"([0-9A-Za-z_-]{11})").expect("bare id pattern"));
    bare.captures(trimmed)
        .and_then(|captures| captures.get(1).map(|m| m.as_str().to_string()))
}

fn thumbnail_for_id(id: &str) -> String {
    format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", id)
}

fn placeholder_for_id(id: &str) -> PreviewInfo {
    PreviewInfo::new(format!("YouTube video ({})", id), thumbnail_for_id(id), "")
}

/// Resolves previews with layered fallbacks and memoization. One lookup may
/// be in flight per resolver; starting a new one cancels and supersedes the
/// previous (its callbacks may no longer touch the cache or publish).
pub struct PreviewResolver {
    cache: Arc<PreviewCache>,
    primary: Arc<dyn PreviewProducer>,
    fallbacks: Vec<Arc<dyn PreviewProducer>>,
    inflight: Mutex<Option<CancellationToken>>,
}

impl PreviewResolver {
    pub fn new(cache: Arc<PreviewCache>, config: &AppConfig) -> Self {
        let mut builder = Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36");

        if let Some(proxy_url) = &config.proxy {
            if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder.build().unwrap_or_else(|_| Client::new());

        let primary: Arc<dyn PreviewProducer> = Arc::new(BackendMetaProducer::new(
            client.clone(),
            config.backend_base_url.clone(),
            config.meta_timeout(),
        ));
        let fallbacks: Vec<Arc<dyn PreviewProducer>> = vec![
            Arc::new(OembedProducer::noembed(client.clone())),
            Arc::new(OembedProducer::youtube_oembed(client)),
        ];

        Self::with_producers(cache, primary, fallbacks)
    }

    pub fn with_producers(
        cache: Arc<PreviewCache>,
        primary: Arc<dyn PreviewProducer>,
        fallbacks: Vec<Arc<dyn PreviewProducer>>,
    ) -> Self {
        Self {
            cache,
            primary,
            fallbacks,
            inflight: Mutex::new(None),
        }
    }

    /// Resolves a preview for the given input. `publish` receives provisional
    /// and final previews as they become available; the returned outcome is
    /// the terminal answer.
    pub async fn resolve<F>(&self, raw_url: &str, publish: F) -> Result<PreviewOutcome>
    where
        F: Fn(&PreviewInfo) + Send + Sync,
    {
        let trimmed = raw_url.trim().to_string();
        if trimmed.is_empty() {
            return Err(AppError::Validation("URL cannot be empty".to_string()));
        }

        // Memoized: answer without any network traffic.
        if let Some(hit) = self.cache.get(&trimmed).await {
            info!("[PREVIEW] Cache hit for {}", trimmed);
            publish(&hit);
            return Ok(PreviewOutcome::found(hit));
        }

        // Single-flight: starting this lookup supersedes the previous one.
        let token = {
            let mut inflight = self.inflight.lock().await;
            if let Some(previous) = inflight.take() {
                previous.cancel();
            }
            let token = CancellationToken::new();
            *inflight = Some(token.clone());
            token
        };

        // Optimistic thumbnail for recognized ids, published before any
        // network round trip and superseded by whatever resolves later.
        let video_id = extract_video_id(&trimmed);
        if let Some(id) = &video_id {
            publish(&PreviewInfo::new("", thumbnail_for_id(id), ""));
        }

        match self.guarded(&token, self.primary.lookup(&trimmed)).await {
            Ok(Some(info)) => {
                info!("[PREVIEW] Resolved via {}: {}", self.primary.name(), trimmed);
                return self.commit(&token, &trimmed, info, &publish).await;
            }
            Ok(None) => {
                warn!("[PREVIEW] {} had no answer for {}", self.primary.name(), trimmed);
            }
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => {
                warn!(
                    "[PREVIEW] {} failed for {}: {}, falling back",
                    self.primary.name(),
                    trimmed,
                    e
                );
            }
        }

        // Both secondary producers race; the first usable title in producer
        // order wins and the other answer is simply disregarded.
        let lookups = self.fallbacks.iter().map(|producer| {
            let producer = producer.clone();
            let url = trimmed.clone();
            async move { producer.lookup(&url).await.ok().flatten() }
        });
        let results = self
            .guarded_all(&token, futures::future::join_all(lookups))
            .await?;

        if let Some(info) = results.into_iter().flatten().find(|m| !m.title.is_empty()) {
            info!("[PREVIEW] Resolved via fallback provider: {}", trimmed);
            return self.commit(&token, &trimmed, info, &publish).await;
        }

        if let Some(id) = video_id {
            info!("[PREVIEW] Synthesizing placeholder for id {}", id);
            return self
                .commit(&token, &trimmed, placeholder_for_id(&id), &publish)
                .await;
        }

        warn!("[PREVIEW] No producer could answer for {}", trimmed);
        Ok(PreviewOutcome::missing(PREVIEW_UNAVAILABLE))
    }

    /// Runs a producer future under the lookup's cancellation scope.
    async fn guarded<T>(
        &self,
        token: &CancellationToken,
        lookup: impl Future<Output = Result<Option<T>>>,
    ) -> Result<Option<T>> {
        tokio::select! {
            _ = token.cancelled() => Err(AppError::Cancelled),
            out = lookup => out,
        }
    }

    async fn guarded_all<T>(
        &self,
        token: &CancellationToken,
        lookups: impl Future<Output = Vec<T>>,
    ) -> Result<Vec<T>> {
        tokio::select! {
            _ = token.cancelled() => Err(AppError::Cancelled),
            out = lookups => Ok(out),
        }
    }

    /// Stores and publishes a resolved preview, unless this lookup has been
    /// superseded in the meantime.
    async fn commit<F>(
        &self,
        token: &CancellationToken,
        key: &str,
        info: PreviewInfo,
        publish: &F,
    ) -> Result<PreviewOutcome>
    where
        F: Fn(&PreviewInfo) + Send + Sync,
    {
        if token.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        self.cache.insert(key, info.clone()).await;
        publish(&info);
        Ok(PreviewOutcome::found(info))
    }
}
