//! Test harness adapter: simulates a backend child without spawning a real
//! engine binary. The Process Supervisor still supervises *something* (a
//! trivial `sleep` process) so its lifecycle bookkeeping is exercised
//! end-to-end; the actual HTTP surface is served by an in-process listener
//! bound to the same ephemeral port the cache chose.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

use lmr_domain::capability::{Capability, Operation};
use lmr_domain::error::Result;
use lmr_domain::model::{ModelInfo, RecipeOptions};
use lmr_supervisor::{LogSink, SpawnSpec};

use crate::traits::{BackendAdapter, BackendKind, InstallOutcome};

const ALL_CAPABILITIES: &[Capability] = &[
    Capability::Completion,
    Capability::Embeddings,
    Capability::Reranking,
    Capability::AudioTranscription,
    Capability::SpeechSynthesis,
    Capability::ImageGeneration,
];

pub struct FakeAdapter {
    kind: BackendKind,
    ready_after: Duration,
    never_ready: bool,
    installed: Arc<AtomicBool>,
}

impl FakeAdapter {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            ready_after: Duration::ZERO,
            never_ready: false,
            installed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_after = delay;
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    pub fn was_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BackendAdapter for FakeAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn capabilities(&self) -> &'static [Capability] {
        ALL_CAPABILITIES
    }

    async fn ensure_installed(&self) -> Result<InstallOutcome> {
        self.installed.store(true, Ordering::SeqCst);
        Ok(InstallOutcome {
            upgraded: false,
            version: "fake-0".to_string(),
        })
    }

    fn readiness_path(&self) -> &'static str {
        "/health"
    }

    fn build_spawn(
        &self,
        _model: &ModelInfo,
        _options: &RecipeOptions,
        port: u16,
        _log_sink: &Arc<dyn LogSink>,
    ) -> Result<SpawnSpec> {
        let ready_after = self.ready_after;
        let never_ready = self.never_ready;

        tokio::spawn(async move {
            let Ok(listener) = TcpListener::bind(("127.0.0.1", port)).await else {
                return;
            };
            let started = Instant::now();
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(serve_one(socket, started, ready_after, never_ready));
            }
        });

        // A harmless long-lived process so the supervisor has something
        // real to track; it never serves the traffic above.
        Ok(SpawnSpec {
            exe: "sleep".into(),
            args: vec!["3600".to_string()],
            env: HashMap::new(),
            working_dir: None,
        })
    }

    fn path_for(&self, op: Operation) -> Option<&'static str> {
        match op {
            Operation::ChatCompletion => Some("/v1/chat/completions"),
            Operation::Completion => Some("/v1/completions"),
            Operation::Embeddings => Some("/v1/embeddings"),
            Operation::Reranking => Some("/v1/rerank"),
            Operation::AudioTranscriptions => Some("/inference"),
            Operation::AudioSpeech => Some("/v1/audio/speech"),
            Operation::ImagesGenerations => Some("/sdapi/v1/txt2img"),
            Operation::Responses => None,
        }
    }
}

async fn serve_one(
    mut socket: tokio::net::TcpStream,
    started: Instant,
    ready_after: Duration,
    never_ready: bool,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let (path, body) = loop {
        let Ok(n) = socket.read(&mut chunk).await else {
            return;
        };
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(parsed) = try_parse_request(&buf) {
            break parsed;
        }
        if buf.len() > 1024 * 1024 {
            return;
        }
    };
    let _ = path;

    let ready = !never_ready && started.elapsed() >= ready_after;
    let (status, payload) = if !ready {
        ("503 Service Unavailable", "{\"status\":\"starting\"}".to_string())
    } else {
        (
            "200 OK",
            format!("{{\"status\":\"ok\",\"echo_len\":{}}}", body.len()),
        )
    };

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
}

/// Parses just enough of an HTTP/1.1 request to know the path and to read
/// a `Content-Length`-sized body, if any. Returns `None` until the full
/// head (and body, if declared) has arrived.
fn try_parse_request(buf: &[u8]) -> Option<(String, Vec<u8>)> {
    let head_end = find_subslice(buf, b"\r\n\r\n")?;
    let head = std::str::from_utf8(&buf[..head_end]).ok()?;
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let path = request_line.split_whitespace().nth(1)?.to_string();

    let content_length: usize = lines
        .find_map(|l| l.strip_prefix("Content-Length:").or_else(|| l.strip_prefix("content-length:")))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    let body_start = head_end + 4;
    if buf.len() < body_start + content_length {
        return None;
    }
    Some((path, buf[body_start..body_start + content_length].to_vec()))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    fn dummy_model() -> ModelInfo {
        ModelInfo {
            id: "user.fake".into(),
            checkpoint: "org/model:Q4".into(),
            recipe: lmr_domain::model::Recipe::Llamacpp,
            labels: vec![],
            size_gb: 0.1,
            downloaded: true,
            suggested: false,
            mmproj: None,
            image_defaults: None,
            paths: Default::default(),
        }
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn becomes_ready_after_configured_delay() {
        let port = free_port().await;
        let adapter = FakeAdapter::new(BackendKind::Llamacpp).with_ready_delay(Duration::from_millis(100));
        let sink: Arc<dyn LogSink> = StdArc::new(lmr_supervisor::NullSink);
        adapter
            .build_spawn(&dummy_model(), &RecipeOptions::default(), port, &sink)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let early = reqwest::get(format!("http://127.0.0.1:{port}/health")).await.unwrap();
        assert_eq!(early.status(), 503);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let late = reqwest::get(format!("http://127.0.0.1:{port}/health")).await.unwrap();
        assert_eq!(late.status(), 200);
    }

    #[tokio::test]
    async fn never_ready_mode_always_returns_unavailable() {
        let port = free_port().await;
        let adapter = FakeAdapter::new(BackendKind::Llamacpp).never_ready();
        let sink: Arc<dyn LogSink> = StdArc::new(lmr_supervisor::NullSink);
        adapter
            .build_spawn(&dummy_model(), &RecipeOptions::default(), port, &sink)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let resp = reqwest::get(format!("http://127.0.0.1:{port}/health")).await.unwrap();
        assert_eq!(resp.status(), 503);
    }
}
