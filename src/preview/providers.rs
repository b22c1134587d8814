use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::errors::Result;
use crate::preview::PreviewInfo;

/// A single source of preview metadata. Producers are tried in a fixed order
/// by the resolver; each either yields a complete preview or nothing.
#[async_trait]
pub trait PreviewProducer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, url: &str) -> Result<Option<PreviewInfo>>;
}

/// Authoritative lookup against our own backend:
/// `GET {base}/meta?url=...` -> `{ ok, meta: { title, thumbnail, author } }`.
pub struct BackendMetaProducer {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl BackendMetaProducer {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PreviewProducer for BackendMetaProducer {
    fn name(&self) -> &'static str {
        "backend"
    }

    async fn lookup(&self, url: &str) -> Result<Option<PreviewInfo>> {
        let request_url = format!(
            "{}/meta?url={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(url)
        );

        let response = self
            .client
            .get(&request_url)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let json: Value = response.json().await?;
        if json["ok"].as_bool() != Some(true) {
            return Ok(None);
        }

        let meta = &json["meta"];
        if !meta.is_object() {
            return Ok(None);
        }

        Ok(Some(PreviewInfo::new(
            meta["title"].as_str().unwrap_or(""),
            meta["thumbnail"].as_str().unwrap_or(""),
            meta["author"].as_str().unwrap_or(""),
        )))
    }
}

/// Public oEmbed-style endpoint taking a `url` query parameter and answering
/// `{ title, thumbnail_url, author_name }`. Only responses carrying a
/// non-empty title count as usable.
pub struct OembedProducer {
    client: Client,
    name: &'static str,
    endpoint: String,
    wants_format_param: bool,
    timeout: Duration,
}

impl OembedProducer {
    pub fn noembed(client: Client) -> Self {
        Self {
            client,
            name: "noembed",
            endpoint: "https://noembed.com/embed".to_string(),
            wants_format_param: false,
            timeout: Duration::from_secs(9),
        }
    }

    pub fn youtube_oembed(client: Client) -> Self {
        Self {
            client,
            name: "youtube-oembed",
            endpoint: "https://www.youtube.com/oembed".to_string(),
            wants_format_param: true,
            timeout: Duration::from_secs(7),
        }
    }

    #[cfg(test)]
    pub fn for_endpoint(client: Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            name: "oembed-fixture",
            endpoint: endpoint.into(),
            wants_format_param: false,
            timeout,
        }
    }
}

#[async_trait]
impl PreviewProducer for OembedProducer {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn lookup(&self, url: &str) -> Result<Option<PreviewInfo>> {
        let mut request_url = format!("{}?url={}", self.endpoint, urlencoding::encode(url));
        if self.wants_format_param {
            request_url.push_str("&format=json");
        }

        let response = self
            .client
            .get(&request_url)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let json: Value = response.json().await?;
        let title = json["title"].as_str().unwrap_or("");
        if title.is_empty() {
            return Ok(None);
        }

        Ok(Some(PreviewInfo::new(
            title,
            json["thumbnail_url"].as_str().unwrap_or(""),
            json["author_name"].as_str().unwrap_or(""),
        )))
    }
}
