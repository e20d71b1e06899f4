//! In-process fake VOICEVOX engine for the blocking client tests.
//!
//! Runs an axum server on its own tokio runtime so tests can stay synchronous.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Smallest valid RIFF/WAVE header followed by a few silent samples.
pub fn fake_wav() -> Vec<u8> {
    let data = [0u8; 8];
    let mut buf = Vec::new();
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&24000u32.to_le_bytes());
    buf.extend_from_slice(&48000u32.to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(&data);
    buf
}

/// The document `/audio_query` answers with.
pub fn engine_query() -> Value {
    json!({
        "accent_phrases": [],
        "speedScale": 1.0,
        "pitchScale": 0.0,
        "intonationScale": 1.0,
        "volumeScale": 1.0,
        "prePhonemeLength": 0.1,
        "postPhonemeLength": 0.1,
        "pauseLength": null,
        "pauseLengthScale": 1.0,
        "outputSamplingRate": 24000,
        "outputStereo": false,
        "kana": ""
    })
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path: String,
    pub params: HashMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
pub struct EngineBehavior {
    pub query_status: Option<u16>,
    pub synthesis_status: Option<u16>,
    pub query_delay: Option<Duration>,
    pub synthesis_delay: Option<Duration>,
    pub empty_audio: bool,
}

struct EngineState {
    behavior: EngineBehavior,
    calls: Mutex<Vec<RecordedCall>>,
}

impl EngineState {
    fn record(&self, path: &str, params: HashMap<String, String>, body: Option<Value>) {
        self.calls.lock().unwrap().push(RecordedCall {
            path: path.to_string(),
            params,
            body,
        });
    }
}

pub struct FakeEngine {
    pub base_url: String,
    state: Arc<EngineState>,
    _runtime: tokio::runtime::Runtime,
}

impl FakeEngine {
    pub fn start() -> Self {
        Self::with_behavior(EngineBehavior::default())
    }

    pub fn with_behavior(behavior: EngineBehavior) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let state = Arc::new(EngineState {
            behavior,
            calls: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/audio_query", post(audio_query))
            .route("/synthesis", post(synthesis))
            .route("/version", get(version))
            .with_state(Arc::clone(&state));
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        runtime.spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base_url: format!("http://{}", addr),
            state,
            _runtime: runtime,
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }
}

fn status_or_ok(code: Option<u16>) -> StatusCode {
    code.and_then(|c| StatusCode::from_u16(c).ok())
        .unwrap_or(StatusCode::OK)
}

async fn audio_query(
    State(state): State<Arc<EngineState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.record("/audio_query", params, None);
    if let Some(delay) = state.behavior.query_delay {
        tokio::time::sleep(delay).await;
    }
    let status = status_or_ok(state.behavior.query_status);
    if !status.is_success() {
        return (status, "engine error").into_response();
    }
    Json(engine_query()).into_response()
}

async fn synthesis(
    State(state): State<Arc<EngineState>>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let parsed = serde_json::from_slice::<Value>(&body).ok();
    state.record("/synthesis", params, parsed);
    if let Some(delay) = state.behavior.synthesis_delay {
        tokio::time::sleep(delay).await;
    }
    let status = status_or_ok(state.behavior.synthesis_status);
    if !status.is_success() {
        return (status, "synthesis failed").into_response();
    }
    let audio = if state.behavior.empty_audio {
        Vec::new()
    } else {
        fake_wav()
    };
    ([(header::CONTENT_TYPE, "audio/wav")], audio).into_response()
}

async fn version() -> Json<&'static str> {
    Json("0.14.7")
}

/// Plain TCP engine that answers `/audio_query` and hangs up on anything else.
/// Returns the base URL; the accept thread lives for the rest of the test binary.
pub fn hang_up_on_synthesis() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let head = read_head(&mut stream);
            if head.starts_with("POST /audio_query") {
                let body = engine_query().to_string();
                let reply = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(reply.as_bytes());
            }
            // Dropping the stream closes the connection without a response.
        }
    });
    format!("http://{}", addr)
}

fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}
