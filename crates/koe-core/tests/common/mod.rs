//! Test doubles for the conversation loop and a catch-all fake HTTP server.

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use axum::Router;
use koe_core::{CoreError, CoreResult, InputEvent, LineSource, ResponseGenerator};
use koe_voice::{
    AudioBuffer, AudioSink, SpeakerProfile, SpeechSynthesizer, VoiceError, VoiceResult,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Feeds fixed events, then reports end of input.
pub struct ScriptedInput {
    events: VecDeque<InputEvent>,
    pub prompts: Vec<String>,
}

impl ScriptedInput {
    pub fn lines(lines: &[&str]) -> Self {
        Self {
            events: lines.iter().map(|l| InputEvent::Line(l.to_string())).collect(),
            prompts: Vec::new(),
        }
    }

    pub fn then(mut self, event: InputEvent) -> Self {
        self.events.push_back(event);
        self
    }
}

impl LineSource for ScriptedInput {
    fn read_line(&mut self, prompt: &str) -> InputEvent {
        self.prompts.push(prompt.to_string());
        self.events.pop_front().unwrap_or(InputEvent::Closed)
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

pub struct FixedGenerator {
    reply: Result<String, String>,
    pub calls: Mutex<Vec<String>>,
}

impl FixedGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ResponseGenerator for FixedGenerator {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn try_generate(&self, user_text: &str) -> CoreResult<String> {
        self.calls.lock().unwrap().push(user_text.to_string());
        self.reply.clone().map_err(CoreError::Generation)
    }
}

#[derive(Default)]
pub struct RecordingSynth {
    fail_with_status: Option<u16>,
    raise_on_call: Option<Arc<AtomicBool>>,
    pub calls: Mutex<Vec<(String, u32)>>,
}

impl RecordingSynth {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn rejecting(status: u16) -> Self {
        Self {
            fail_with_status: Some(status),
            ..Self::default()
        }
    }

    /// Succeeds, but raises `flag` as if Ctrl-C arrived mid-synthesis.
    pub fn interrupting(flag: Arc<AtomicBool>) -> Self {
        Self {
            raise_on_call: Some(flag),
            ..Self::default()
        }
    }

    /// Also raise `flag` on every call, whatever the result.
    pub fn raising(mut self, flag: Arc<AtomicBool>) -> Self {
        self.raise_on_call = Some(flag);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl SpeechSynthesizer for RecordingSynth {
    fn synthesize(&self, text: &str, speaker: &SpeakerProfile) -> VoiceResult<AudioBuffer> {
        self.calls.lock().unwrap().push((text.to_string(), speaker.id));
        if let Some(flag) = &self.raise_on_call {
            flag.store(true, Ordering::SeqCst);
        }
        match self.fail_with_status {
            Some(status) => Err(VoiceError::SynthesisRejected {
                step: koe_voice::SynthesisStep::AudioQuery,
                status,
                message: "engine error".to_string(),
            }),
            None => Ok(AudioBuffer::new(b"RIFF....WAVE".to_vec())),
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    fail: bool,
    raise_on_play: Option<Arc<AtomicBool>>,
    pub plays: Mutex<Vec<usize>>,
}

impl RecordingSink {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Raises `flag` and fails, as a player killed by Ctrl-C does.
    pub fn killed_by_interrupt(flag: Arc<AtomicBool>) -> Self {
        Self {
            fail: true,
            raise_on_play: Some(flag),
            ..Self::default()
        }
    }

    pub fn play_count(&self) -> usize {
        self.plays.lock().unwrap().len()
    }
}

impl AudioSink for RecordingSink {
    fn play(&self, buffer: AudioBuffer) -> VoiceResult<()> {
        self.plays.lock().unwrap().push(buffer.len());
        if let Some(flag) = &self.raise_on_play {
            flag.store(true, Ordering::SeqCst);
        }
        if self.fail {
            Err(VoiceError::PlaybackUnavailable("player 'aplay' not found".to_string()))
        } else {
            Ok(())
        }
    }
}

pub fn zundamon() -> SpeakerProfile {
    SpeakerProfile::new(1, "ずんだもん")
        .with_speed_scale(1.5)
        .with_pitch_scale(0.03)
        .with_pause_length(0.3)
}

// ---------------------------------------------------------------------------
// Fake HTTP server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    pub fn text(status: u16, text: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: text.as_bytes().to_vec(),
        }
    }

    pub fn wav(bytes: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "audio/wav",
            body: bytes,
        }
    }
}

type Responder = Box<dyn Fn(&RecordedRequest) -> Reply + Send + Sync>;

struct ServerState {
    responder: Responder,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Answers every request through one closure and records what it saw.
pub struct FakeServer {
    pub base_url: String,
    state: Arc<ServerState>,
    _runtime: tokio::runtime::Runtime,
}

impl FakeServer {
    pub fn start(responder: impl Fn(&RecordedRequest) -> Reply + Send + Sync + 'static) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let state = Arc::new(ServerState {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .fallback(handle)
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

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.path == path).collect()
    }
}

async fn handle(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect(),
        body: body.to_vec(),
    };
    let reply = (state.responder)(&request);
    state.requests.lock().unwrap().push(request);
    Response::builder()
        .status(StatusCode::from_u16(reply.status).unwrap())
        .header(header::CONTENT_TYPE, reply.content_type)
        .body(Body::from(reply.body))
        .unwrap()
}
