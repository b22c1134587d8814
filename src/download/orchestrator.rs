use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use log::{info, warn};
use reqwest::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::download::progress::{
    poll_pace, transfer_pace, warmup_step, SpeedMeter, TransferGauge, POLL_CEILING,
    PREPARE_CEILING, TRANSFER_FLOOR,
};
use crate::download::{
    default_filename, resolve_filename, DownloadRequest, JobResponse, Phase,
};
use crate::errors::{AppError, Result};
use crate::utils::{ensure_dir_exists, format_bytes, sanitize_filename};

const ERROR_DETAIL_LIMIT: usize = 500;

/// What the existence probe learned about the file before transfer.
#[derive(Debug, Clone, Default)]
struct ProbedFile {
    size: u64,
    content_type: String,
}

/// Drives one download run end to end: submit the job, wait for the file to
/// exist, stream it down and persist it, narrating everything through the
/// gauge. Each network sub-phase gets a fresh cancellation scope derived
/// from the run token; the previous scope is triggered before the next one
/// is created, so a stray timer or request can never outlive its phase.
pub struct DownloadOrchestrator {
    client: Client,
    base_url: String,
    download_dir: PathBuf,
    poll_interval: Duration,
    poll_max_attempts: u32,
    proceed_after_poll_timeout: bool,
}

impl DownloadOrchestrator {
    pub fn new(config: &AppConfig) -> Self {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36");

        if let Some(proxy_url) = &config.proxy {
            if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        Self {
            client: builder.build().unwrap_or_else(|_| Client::new()),
            base_url: config.backend_base_url.clone(),
            download_dir: config.download_path.clone(),
            poll_interval: config.poll_interval(),
            poll_max_attempts: config.poll_max_attempts,
            proceed_after_poll_timeout: config.proceed_after_poll_timeout,
        }
    }

    pub async fn run(
        &self,
        request: DownloadRequest,
        gauge: Arc<TransferGauge>,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        gauge.begin("Your video will be downloaded to your Downloads folder.");

        // Job submission, with a warm-up animation so the bar is not frozen
        // while the request is outstanding.
        let submit_scope = cancel.child_token();
        let warmup = spawn_warmup(gauge.clone(), submit_scope.clone());
        let job = tokio::select! {
            _ = submit_scope.cancelled() => Err(AppError::Cancelled),
            result = self.submit_job(&request) => result,
        };
        submit_scope.cancel();
        let _ = warmup.await;
        let job = job?;

        gauge.raise_to(35.0);
        let server_filename = job
            .filename
            .clone()
            .unwrap_or_else(|| default_filename(&request.options));
        gauge.set_filename(&server_filename);
        info!(
            "[TRANSFER] Job accepted, file will appear at {} as {}",
            job.download_url, server_filename
        );

        // Existence polling.
        gauge.set_phase(
            Phase::Polling,
            Some("Finalizing file on server, waiting for availability..."),
        );
        let poll_scope = cancel.child_token();
        let probed = self
            .wait_for_file(&job.download_url, gauge.clone(), &poll_scope)
            .await;
        poll_scope.cancel();

        let probed = match probed {
            Ok(info) => info,
            Err(e) if e.is_cancellation() => return Err(AppError::Cancelled),
            Err(e) => {
                if self.proceed_after_poll_timeout {
                    // The transfer below is the real source of truth; it will
                    // fail on its own if the file genuinely is not there.
                    warn!("[TRANSFER] Existence polling gave up ({}), attempting transfer anyway", e);
                    ProbedFile::default()
                } else {
                    return Err(e);
                }
            }
        };

        gauge.set_total_bytes(probed.size);
        gauge.raise_to(45.0);

        // Byte transfer under its own scope.
        gauge.set_phase(Phase::Downloading, Some("Downloading..."));
        gauge.raise_to(TRANSFER_FLOOR);
        let transfer_scope = cancel.child_token();
        let result = self
            .transfer(&job.download_url, &server_filename, &probed, gauge, &transfer_scope)
            .await;
        transfer_scope.cancel();
        result
    }

    async fn submit_job(&self, request: &DownloadRequest) -> Result<JobResponse> {
        let payload = serde_json::json!({
            "url": request.url,
            "type": request.options.media_type,
            "format": request.options.format,
            "quality": request.options.quality,
        });

        // Deliberately no timeout: the server may transcode for a while.
        let response = self
            .client
            .post(format!("{}/download", self.base_url.trim_end_matches('/')))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = clip_detail(&response.text().await.unwrap_or_default());
            return Err(AppError::Job(format!(
                "Job submission failed: {}. Server message: {}",
                status, detail
            )));
        }

        let job: JobResponse = response.json().await?;
        if job.download_url.is_empty() {
            return Err(AppError::Job(
                "Server response missing download URL".to_string(),
            ));
        }
        Ok(job)
    }

    /// Polls the file URL until it exists or attempts run out. A visual
    /// pacing timer runs alongside the probe loop so the bar keeps moving
    /// even when individual probes are slow; both are stopped and joined
    /// before this returns, whichever finished first.
    async fn wait_for_file(
        &self,
        url: &str,
        gauge: Arc<TransferGauge>,
        scope: &CancellationToken,
    ) -> Result<ProbedFile> {
        let base = gauge.snapshot().progress;
        let window = self.poll_interval * self.poll_max_attempts;
        let pacer_scope = scope.child_token();
        let pacer = spawn_poll_pacer(gauge.clone(), pacer_scope.clone(), base, window);

        let result = self.probe_loop(url, scope).await;

        pacer_scope.cancel();
        let _ = pacer.await;

        if result.is_ok() {
            gauge.raise_to(POLL_CEILING);
        }
        result
    }

    async fn probe_loop(&self, url: &str, scope: &CancellationToken) -> Result<ProbedFile> {
        let mut attempts = 0;
        while attempts < self.poll_max_attempts {
            let probe = tokio::select! {
                _ = scope.cancelled() => return Err(AppError::Cancelled),
                response = self.client.head(url).send() => response,
            };

            match probe {
                Ok(response) if response.status() == reqwest::StatusCode::OK => {
                    // read the header directly: a HEAD response has no body,
                    // so the body-derived length would always be zero
                    let size = header_str(&response, reqwest::header::CONTENT_LENGTH)
                        .parse::<u64>()
                        .unwrap_or(0);
                    let content_type = header_str(&response, reqwest::header::CONTENT_TYPE);
                    info!(
                        "[TRANSFER] File is ready: {} ({}, {})",
                        url,
                        format_bytes(size),
                        if content_type.is_empty() { "unknown type" } else { &content_type }
                    );
                    return Ok(ProbedFile { size, content_type });
                }
                Ok(_) => {}
                // Network blip: counts as a failed attempt, loop continues.
                Err(_) => {}
            }

            attempts += 1;
            tokio::select! {
                _ = scope.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        Err(AppError::Job("File not ready after waiting".to_string()))
    }

    async fn transfer(
        &self,
        url: &str,
        server_filename: &str,
        probed: &ProbedFile,
        gauge: Arc<TransferGauge>,
        scope: &CancellationToken,
    ) -> Result<PathBuf> {
        let response = tokio::select! {
            _ = scope.cancelled() => return Err(AppError::Cancelled),
            response = self.client.get(url).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let detail = clip_detail(&response.text().await.unwrap_or_default());
            return Err(AppError::Download(format!(
                "Download request failed: {}. Server message: {}",
                status, detail
            )));
        }

        // A success status carrying an HTML document is an error page, not
        // the media file; it must never be persisted.
        let content_type = header_str(&response, reqwest::header::CONTENT_TYPE);
        if content_type.to_lowercase().contains("text/html") {
            let detail = clip_detail(
                &response
                    .text()
                    .await
                    .unwrap_or_else(|_| "No server message.".to_string()),
            );
            return Err(AppError::Download(format!(
                "Server returned an HTML error page instead of a file. Message: {}",
                detail
            )));
        }

        let total = match response.content_length() {
            Some(length) if length > 0 => length,
            _ => probed.size,
        };
        gauge.set_total_bytes(total);

        let final_name = resolve_filename(server_filename, &content_type);
        gauge.set_filename(&final_name);

        let mut stream = response.bytes_stream();
        let mut data: Vec<u8> = Vec::new();
        let mut meter = SpeedMeter::start(Instant::now());

        loop {
            let chunk = tokio::select! {
                _ = scope.cancelled() => return Err(AppError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            data.extend_from_slice(&chunk);
            let received = data.len() as u64;
            gauge.update_bytes(received);
            if let Some(bps) = meter.sample(received, Instant::now()) {
                gauge.set_speed(bps);
            }
            gauge.advance(|current| transfer_pace(received, total, current));
        }

        ensure_dir_exists(&self.download_dir).await?;
        let path = self.download_dir.join(sanitize_filename(&final_name));
        tokio::fs::write(&path, &data).await?;
        info!(
            "[TRANSFER] Saved {} ({})",
            path.display(),
            format_bytes(data.len() as u64)
        );

        gauge.complete("Download complete. Check your Downloads folder.");
        Ok(path)
    }
}

fn clip_detail(text: &str) -> String {
    text.chars().take(ERROR_DETAIL_LIMIT).collect()
}

fn header_str(response: &reqwest::Response, name: reqwest::header::HeaderName) -> String {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string()
}

fn spawn_warmup(gauge: Arc<TransferGauge>, scope: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(400));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                _ = ticker.tick() => {
                    gauge.advance(|current| warmup_step(current, PREPARE_CEILING));
                }
            }
        }
    })
}

fn spawn_poll_pacer(
    gauge: Arc<TransferGauge>,
    scope: CancellationToken,
    base: f32,
    window: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                _ = ticker.tick() => {
                    let paced = poll_pace(base, started.elapsed(), window, POLL_CEILING);
                    gauge.raise_to(paced);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{DownloadOptions, MediaType, TransferSnapshot};
    use crate::test_support::{json_response, spawn_fixture_server, status_response};
    use hyper::body::Bytes;
    use hyper::{Body, Method, Request, Response};
    use std::sync::{Arc, Mutex as StdMutex, OnceLock};

    fn test_request() -> DownloadRequest {
        DownloadRequest {
            url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            options: DownloadOptions {
                media_type: MediaType::Video,
                format: "mp4".to_string(),
                quality: "best".to_string(),
            },
        }
    }

    fn test_config(base_url: &str, dir: &std::path::Path) -> AppConfig {
        AppConfig {
            backend_base_url: base_url.to_string(),
            download_path: dir.to_path_buf(),
            poll_interval_ms: 10,
            poll_max_attempts: 3,
            ..AppConfig::default()
        }
    }

    fn gauge_with_collector() -> (Arc<StdMutex<Vec<TransferSnapshot>>>, Arc<TransferGauge>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            Box::new(move |snap: TransferSnapshot| seen.lock().unwrap().push(snap))
        };
        (seen, Arc::new(TransferGauge::new("test-run", sink)))
    }

    fn assert_monotonic(snapshots: &[TransferSnapshot]) {
        for pair in snapshots.windows(2) {
            assert!(
                pair[1].progress >= pair[0].progress,
                "progress went backwards: {} -> {}",
                pair[0].progress,
                pair[1].progress
            );
        }
    }

    /// Fixture backend: POST /download hands out a job, HEAD/GET /file serve
    /// a webm payload of the given size.
    async fn media_backend(payload_len: usize) -> (String, tokio::task::JoinHandle<()>) {
        let advertised: Arc<OnceLock<String>> = Arc::new(OnceLock::new());

        let handler_advertised = advertised.clone();
        let (base, server) = spawn_fixture_server(move |req: Request<Body>| {
            let advertised = handler_advertised.clone();
            async move {
                let origin = advertised.get().cloned().unwrap_or_default();
                match (req.method().clone(), req.uri().path()) {
                    (Method::POST, "/download") => json_response(&format!(
                        r#"{{"downloadUrl":"{}/file","filename":"clip"}}"#,
                        origin
                    )),
                    (Method::HEAD, "/file") | (Method::GET, "/file") => Response::builder()
                        .header("content-type", "video/webm")
                        .body(Body::from(vec![0u8; payload_len]))
                        .unwrap(),
                    _ => status_response(404, "not found"),
                }
            }
        })
        .await;

        advertised.set(base.clone()).unwrap();
        (base, server)
    }

    #[tokio::test]
    async fn happy_path_streams_persists_and_finishes_at_100() {
        let payload_len = 1_000_000;
        let (base, _server) = media_backend(payload_len).await;
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = DownloadOrchestrator::new(&test_config(&base, dir.path()));
        let (seen, gauge) = gauge_with_collector();

        let path = orchestrator
            .run(test_request(), gauge.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert!(path.ends_with("clip.webm"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), payload_len as u64);

        let final_snap = gauge.snapshot();
        assert_eq!(final_snap.phase, Phase::Done);
        assert_eq!(final_snap.progress, 100.0);
        assert_eq!(final_snap.downloaded_bytes, payload_len as u64);
        assert_eq!(final_snap.total_bytes, payload_len as u64);
        assert_eq!(final_snap.filename.as_deref(), Some("clip.webm"));

        assert_monotonic(&seen.lock().unwrap());
    }

    #[tokio::test]
    async fn server_error_body_is_surfaced() {
        let advertised: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
        let handler_advertised = advertised.clone();
        let (base, _server) = spawn_fixture_server(move |req: Request<Body>| {
            let advertised = handler_advertised.clone();
            async move {
                let origin = advertised.get().cloned().unwrap_or_default();
                match (req.method().clone(), req.uri().path()) {
                    (Method::POST, "/download") => json_response(&format!(
                        r#"{{"downloadUrl":"{}/file","filename":"clip"}}"#,
                        origin
                    )),
                    (Method::HEAD, "/file") => status_response(200, ""),
                    (Method::GET, "/file") => status_response(500, "quota exceeded"),
                    _ => status_response(404, ""),
                }
            }
        })
        .await;
        advertised.set(base.clone()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = DownloadOrchestrator::new(&test_config(&base, dir.path()));
        let (_, gauge) = gauge_with_collector();

        let err = orchestrator
            .run(test_request(), gauge, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("quota exceeded"), "{}", err);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn html_error_pages_are_never_persisted() {
        let advertised: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
        let handler_advertised = advertised.clone();
        let (base, _server) = spawn_fixture_server(move |req: Request<Body>| {
            let advertised = handler_advertised.clone();
            async move {
                let origin = advertised.get().cloned().unwrap_or_default();
                match (req.method().clone(), req.uri().path()) {
                    (Method::POST, "/download") => json_response(&format!(
                        r#"{{"downloadUrl":"{}/file","filename":"clip"}}"#,
                        origin
                    )),
                    (Method::GET, "/file") | (Method::HEAD, "/file") => Response::builder()
                        .header("content-type", "text/html; charset=utf-8")
                        .body(Body::from("<html>something broke</html>"))
                        .unwrap(),
                    _ => status_response(404, ""),
                }
            }
        })
        .await;
        advertised.set(base.clone()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = DownloadOrchestrator::new(&test_config(&base, dir.path()));
        let (_, gauge) = gauge_with_collector();

        let err = orchestrator
            .run(test_request(), gauge, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("HTML error page"), "{}", err);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn poll_exhaustion_still_attempts_the_transfer() {
        let advertised: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
        let handler_advertised = advertised.clone();
        let (base, _server) = spawn_fixture_server(move |req: Request<Body>| {
            let advertised = handler_advertised.clone();
            async move {
                let origin = advertised.get().cloned().unwrap_or_default();
                match (req.method().clone(), req.uri().path()) {
                    (Method::POST, "/download") => json_response(&format!(
                        r#"{{"downloadUrl":"{}/file","filename":"clip"}}"#,
                        origin
                    )),
                    // existence probe never succeeds
                    (Method::HEAD, "/file") => status_response(404, ""),
                    (Method::GET, "/file") => Response::builder()
                        .header("content-type", "video/mp4")
                        .body(Body::from(vec![7u8; 2048]))
                        .unwrap(),
                    _ => status_response(404, ""),
                }
            }
        })
        .await;
        advertised.set(base.clone()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = DownloadOrchestrator::new(&test_config(&base, dir.path()));
        let (_, gauge) = gauge_with_collector();

        let path = orchestrator
            .run(test_request(), gauge.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert!(path.ends_with("clip.mp4"));
        assert_eq!(gauge.snapshot().phase, Phase::Done);
    }

    #[tokio::test]
    async fn strict_mode_fails_on_poll_exhaustion() {
        let advertised: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
        let handler_advertised = advertised.clone();
        let (base, _server) = spawn_fixture_server(move |req: Request<Body>| {
            let advertised = handler_advertised.clone();
            async move {
                let origin = advertised.get().cloned().unwrap_or_default();
                match (req.method().clone(), req.uri().path()) {
                    (Method::POST, "/download") => json_response(&format!(
                        r#"{{"downloadUrl":"{}/file","filename":"clip"}}"#,
                        origin
                    )),
                    _ => status_response(404, ""),
                }
            }
        })
        .await;
        advertised.set(base.clone()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&base, dir.path());
        config.proceed_after_poll_timeout = false;
        let orchestrator = DownloadOrchestrator::new(&config);
        let (_, gauge) = gauge_with_collector();

        let err = orchestrator
            .run(test_request(), gauge, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not ready"), "{}", err);
    }

    #[tokio::test]
    async fn missing_download_url_fails_the_run() {
        let (base, _server) = spawn_fixture_server(|req: Request<Body>| async move {
            match (req.method().clone(), req.uri().path()) {
                (Method::POST, "/download") => json_response(r#"{"filename":"clip"}"#),
                _ => status_response(404, ""),
            }
        })
        .await;

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = DownloadOrchestrator::new(&test_config(&base, dir.path()));
        let (_, gauge) = gauge_with_collector();

        let err = orchestrator
            .run(test_request(), gauge, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing download URL"), "{}", err);
    }

    #[tokio::test]
    async fn cancellation_mid_transfer_stops_updates_and_persists_nothing() {
        let advertised: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
        let handler_advertised = advertised.clone();
        let (base, _server) = spawn_fixture_server(move |req: Request<Body>| {
            let advertised = handler_advertised.clone();
            async move {
                let origin = advertised.get().cloned().unwrap_or_default();
                match (req.method().clone(), req.uri().path()) {
                    (Method::POST, "/download") => json_response(&format!(
                        r#"{{"downloadUrl":"{}/file","filename":"clip"}}"#,
                        origin
                    )),
                    (Method::HEAD, "/file") => Response::builder()
                        .header("content-type", "video/webm")
                        .body(Body::empty())
                        .unwrap(),
                    (Method::GET, "/file") => {
                        // drip-feed the body so the transfer stays in flight
                        let (mut tx, body) = Body::channel();
                        tokio::spawn(async move {
                            for _ in 0..100 {
                                if tx.send_data(Bytes::from(vec![0u8; 1024])).await.is_err() {
                                    return;
                                }
                                tokio::time::sleep(Duration::from_millis(25)).await;
                            }
                        });
                        Response::builder()
                            .header("content-type", "video/webm")
                            .body(body)
                            .unwrap()
                    }
                    _ => status_response(404, ""),
                }
            }
        })
        .await;
        advertised.set(base.clone()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Arc::new(DownloadOrchestrator::new(&test_config(&base, dir.path())));
        let (seen, gauge) = gauge_with_collector();
        let cancel = CancellationToken::new();

        let run = {
            let orchestrator = orchestrator.clone();
            let gauge = gauge.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { orchestrator.run(test_request(), gauge, cancel).await })
        };

        // wait until bytes are flowing, then pull the plug
        for _ in 0..200 {
            let snap = gauge.snapshot();
            if snap.phase == Phase::Downloading && snap.downloaded_bytes > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();

        let result = run.await.unwrap();
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());

        // no further updates once the run has ended
        let published = seen.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(seen.lock().unwrap().len(), published);
    }
}
