//! Shared test fixtures: manifest builders and a scripted HTTP server for
//! response sequences mockito cannot express (per-hit variation, stalled
//! streams).

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use modelwire::manifest::schema::*;

/// A minimal OpenAI-compatible manifest pointing nowhere; tests override
/// the base URL per target.
pub fn openai_style_manifest(id: &str) -> ProtocolManifest {
    ProtocolManifest {
        schema: None,
        id: id.to_string(),
        protocol_version: "1.0".into(),
        endpoint: EndpointSpec {
            base_url: "https://unreachable.invalid".into(),
            paths: HashMap::from([
                ("chat".to_string(), "/v1/chat/completions".to_string()),
                ("embedding".to_string(), "/v1/embeddings".to_string()),
            ]),
        },
        auth: AuthSpec {
            scheme: AuthScheme::None,
            env_var: String::new(),
            header_name: None,
            query_param: None,
            prefix: None,
        },
        capabilities: Capabilities {
            streaming: true,
            tools: true,
            ..Default::default()
        },
        request: RequestRules::default(),
        streaming: Some(StreamingSpec {
            decoder: DecoderKind::Sse,
            content_path: Some("$.choices[0].delta.content".into()),
            thinking_path: None,
            tool_call_path: Some("$.choices[0].delta.tool_calls".into()),
            role_path: None,
            finish_reason_path: Some("$.choices[0].finish_reason".into()),
            usage_path: Some("$.usage".into()),
            fan_out_path: None,
        }),
        response_paths: Some(ResponsePaths {
            content: Some("$.choices[0].message.content".into()),
            tool_calls: Some("$.choices[0].message.tool_calls".into()),
            usage: Some("$.usage".into()),
            finish_reason: Some("$.choices[0].finish_reason".into()),
            embedding_vectors: Some("$.data".into()),
        }),
        error_mapping: None,
        rate_limit_headers: None,
    }
}

/// An Anthropic-flavored manifest (event-routed SSE, system lift).
pub fn anthropic_style_manifest(id: &str) -> ProtocolManifest {
    let mut manifest = openai_style_manifest(id);
    manifest.endpoint.paths =
        HashMap::from([("chat".to_string(), "/v1/messages".to_string())]);
    manifest.request.system_key = Some("system".into());
    manifest.request.tool_dialect = ToolDialect::Anthropic;
    manifest.streaming = Some(StreamingSpec {
        decoder: DecoderKind::AnthropicSse,
        content_path: None,
        thinking_path: None,
        tool_call_path: None,
        role_path: None,
        finish_reason_path: None,
        usage_path: None,
        fan_out_path: None,
    });
    manifest.response_paths = Some(ResponsePaths {
        content: Some("$.content[0].text".into()),
        tool_calls: None,
        usage: Some("$.usage".into()),
        finish_reason: Some("$.stop_reason".into()),
        embedding_vectors: None,
    });
    manifest
}

/// One canned HTTP response for the scripted server.
#[derive(Clone)]
pub struct Canned {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Body chunks with a pause before each; one chunk means "write whole
    /// body at once".
    pub chunks: Vec<(Duration, String)>,
}

impl Canned {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("content-type".into(), "application/json".into())],
            chunks: vec![(Duration::ZERO, body.to_string())],
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn sse(frames: &[&str]) -> Self {
        let body: String = frames.iter().map(|f| format!("{f}\n\n")).collect();
        Self {
            status: 200,
            headers: vec![("content-type".into(), "text/event-stream".into())],
            chunks: vec![(Duration::ZERO, body)],
        }
    }

    /// SSE body delivered in stages, pausing before each chunk.
    pub fn sse_staged(stages: Vec<(Duration, String)>) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".into(), "text/event-stream".into())],
            chunks: stages,
        }
    }
}

/// Serves a scripted sequence of responses; hit N gets response N (the
/// last response repeats once the script runs out).
pub struct ScriptedServer {
    addr: std::net::SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl ScriptedServer {
    pub async fn start(script: Vec<Canned>) -> Self {
        assert!(!script.is_empty(), "script must have at least one response");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let script = Arc::new(script);
        let hits_bg = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let script = Arc::clone(&script);
                let hits = Arc::clone(&hits_bg);
                tokio::spawn(async move {
                    let _ = serve_connection(stream, script, hits).await;
                });
            }
        });

        Self { addr, hits }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn serve_connection(
    mut stream: tokio::net::TcpStream,
    script: Arc<Vec<Canned>>,
    hits: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    loop {
        // Read one request: headers, then content-length body.
        let header_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let header_text = String::from_utf8_lossy(&buf[..header_end]).into_owned();
        let content_length = header_text
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        buf.drain(..header_end + content_length);

        let hit = hits.fetch_add(1, Ordering::SeqCst);
        let canned = script.get(hit).unwrap_or_else(|| script.last().unwrap());

        let body_len: usize = canned.chunks.iter().map(|(_, c)| c.len()).sum();
        let mut head = format!(
            "HTTP/1.1 {} X\r\ncontent-length: {body_len}\r\nconnection: keep-alive\r\n",
            canned.status
        );
        for (name, value) in &canned.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");
        stream.write_all(head.as_bytes()).await?;
        stream.flush().await?;

        for (pause, chunk) in &canned.chunks {
            if !pause.is_zero() {
                tokio::time::sleep(*pause).await;
            }
            stream.write_all(chunk.as_bytes()).await?;
            stream.flush().await?;
        }
    }
}
