//! Network listener that turns producer messages into spawn events.
//!
//! Each message is a flat JSON object with the optional keys `text`, `color`,
//! `size`, `speed`, `fontFamily`, `fontWeight`, `fontStyle` and
//! `textDecoration`. Anything that does not parse is logged and dropped; the
//! listener keeps serving.

use crate::bus::Publisher;
use crate::model::{
    DanmakuRecord, FontStyle, FontWeight, RecordError, DEFAULT_COLOR, DEFAULT_FONT_FAMILY,
    DEFAULT_FONT_SIZE, DEFAULT_SPEED,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{Error as WsError, Message};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3210";
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const LOG_PAYLOAD_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// One JSON object per text or binary websocket frame.
    #[default]
    WebSocket,
    /// One JSON object per line over plain TCP.
    Lines,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(String),
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("payload is not valid UTF-8")]
    Utf8,
    #[error("field `{field}` must be an integer, got {value}")]
    NotAnInteger { field: &'static str, value: String },
    #[error("field `{field}` must be a string or number, got {value}")]
    NotAScalar { field: &'static str, value: String },
    #[error("unknown font style {0}")]
    FontStyle(String),
    #[error(transparent)]
    Record(#[from] RecordError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    #[serde(default)]
    text: Option<Value>,
    #[serde(default)]
    color: Option<Value>,
    #[serde(default)]
    size: Option<Value>,
    #[serde(default)]
    speed: Option<Value>,
    #[serde(default)]
    font_family: Option<Value>,
    #[serde(default)]
    font_weight: Option<Value>,
    #[serde(default)]
    font_style: Option<Value>,
    #[serde(default)]
    text_decoration: Option<Value>,
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn coerce_string(field: &'static str, value: Option<&Value>, default: &str) -> Result<String, PayloadError> {
    match present(value) {
        None => Ok(default.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(other) => Err(PayloadError::NotAScalar {
            field,
            value: other.to_string(),
        }),
    }
}

/// Integers, floats (truncated), booleans and integer strings are accepted.
fn coerce_int(field: &'static str, value: Option<&Value>, default: i64) -> Result<i64, PayloadError> {
    let Some(value) = present(value) else {
        return Ok(default);
    };
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| PayloadError::NotAnInteger {
        field,
        value: value.to_string(),
    })
}

fn coerce_font_style(value: Option<&Value>) -> Result<FontStyle, PayloadError> {
    match present(value) {
        None => Ok(FontStyle::Normal),
        Some(Value::String(s)) => FontStyle::from_name(s)
            .or_else(|| s.trim().parse::<i64>().ok().and_then(FontStyle::from_index))
            .ok_or_else(|| PayloadError::FontStyle(s.clone())),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(FontStyle::from_index)
            .ok_or_else(|| PayloadError::FontStyle(n.to_string())),
        Some(other) => Err(PayloadError::FontStyle(other.to_string())),
    }
}

/// Builds a record from one wire message, filling absent fields with their
/// defaults.
pub fn parse_payload(payload: &str) -> Result<DanmakuRecord, PayloadError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| PayloadError::Json(e.to_string()))?;
    if !value.is_object() {
        return Err(PayloadError::NotAnObject);
    }
    let wire: WirePayload =
        serde_json::from_value(value).map_err(|e| PayloadError::Json(e.to_string()))?;

    let text = coerce_string("text", wire.text.as_ref(), "")?;
    let color = coerce_string("color", wire.color.as_ref(), DEFAULT_COLOR)?;
    let size = coerce_int("size", wire.size.as_ref(), DEFAULT_FONT_SIZE as i64)?;
    let speed = coerce_int("speed", wire.speed.as_ref(), DEFAULT_SPEED)?;
    let font_family = coerce_string("fontFamily", wire.font_family.as_ref(), DEFAULT_FONT_FAMILY)?;
    let font_weight = coerce_int(
        "fontWeight",
        wire.font_weight.as_ref(),
        FontWeight::NORMAL.0 as i64,
    )?;
    let font_weight = i32::try_from(font_weight).map_err(|_| PayloadError::NotAnInteger {
        field: "fontWeight",
        value: font_weight.to_string(),
    })?;
    let font_style = coerce_font_style(wire.font_style.as_ref())?;
    let text_decoration = coerce_string("textDecoration", wire.text_decoration.as_ref(), "")?;

    Ok(DanmakuRecord::builder(text)
        .color(color)
        .font_size(size)
        .speed(speed)
        .font_family(font_family)
        .font_weight(FontWeight(font_weight))
        .font_style(font_style)
        .text_decoration(text_decoration)
        .build()?)
}

fn preview(payload: &str) -> &str {
    match payload.char_indices().nth(LOG_PAYLOAD_LIMIT) {
        Some((idx, _)) => &payload[..idx],
        None => payload,
    }
}

/// Parses one message and publishes it. Returns whether a spawn was sent.
pub fn handle_message(publisher: &Publisher, payload: &str) -> bool {
    match parse_payload(payload) {
        Ok(record) => {
            tracing::debug!(id = %record.id(), text = %record.text, "danmaku received");
            if !publisher.spawn(record) {
                tracing::warn!("event bus gone, dropping danmaku");
                return false;
            }
            true
        }
        Err(error) => {
            tracing::warn!(%error, payload = preview(payload), "dropping malformed danmaku payload");
            false
        }
    }
}

pub struct IngestionService {
    addr: String,
    transport: Transport,
    publisher: Publisher,
}

impl IngestionService {
    pub fn new(addr: impl Into<String>, transport: Transport, publisher: Publisher) -> Self {
        Self {
            addr: addr.into(),
            transport,
            publisher,
        }
    }

    /// Binds the listener and starts accepting on a background thread. Bind
    /// failures are reported here rather than on the worker.
    pub fn start(self) -> Result<IngestHandle> {
        let listener = TcpListener::bind(&self.addr)
            .with_context(|| format!("failed to bind danmaku listener on {}", self.addr))?;
        listener
            .set_nonblocking(true)
            .context("failed to make danmaku listener non-blocking")?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));

        tracing::info!(addr = %local_addr, transport = ?self.transport, "danmaku listener started");

        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("danmaku-ingest".into())
            .spawn(move || accept_loop(listener, self.transport, self.publisher, thread_stop))
            .context("failed to spawn danmaku listener thread")?;

        Ok(IngestHandle {
            local_addr,
            stop,
            thread: Some(thread),
        })
    }
}

pub struct IngestHandle {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl IngestHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new connections. Connections already open are served
    /// until their peer hangs up.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("danmaku listener thread panicked");
            }
        }
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    transport: Transport,
    publisher: Publisher,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nonblocking(false) {
                    tracing::warn!(%peer, %err, "could not configure connection");
                    continue;
                }
                tracing::debug!(%peer, "producer connected");
                let publisher = publisher.clone();
                let spawned = thread::Builder::new()
                    .name(format!("danmaku-conn-{peer}"))
                    .spawn(move || {
                        let result = match transport {
                            Transport::WebSocket => serve_websocket(stream, &publisher),
                            Transport::Lines => serve_lines(stream, &publisher),
                        };
                        match result {
                            Ok(count) => tracing::debug!(%peer, count, "producer disconnected"),
                            Err(err) => tracing::warn!(%peer, ?err, "producer connection failed"),
                        }
                    });
                if let Err(err) = spawned {
                    tracing::error!(%peer, %err, "failed to spawn connection thread");
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                tracing::warn!(%err, "accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    tracing::info!("danmaku listener stopped");
}

fn serve_lines(stream: TcpStream, publisher: &Publisher) -> Result<usize> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut published = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).context("read failed")? == 0 {
            break;
        }
        let Ok(line) = std::str::from_utf8(&buf) else {
            tracing::warn!(error = %PayloadError::Utf8, "dropping malformed danmaku payload");
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if handle_message(publisher, line) {
            published += 1;
        }
    }
    Ok(published)
}

fn serve_websocket(stream: TcpStream, publisher: &Publisher) -> Result<usize> {
    let mut socket =
        tungstenite::accept(stream).map_err(|e| anyhow::anyhow!("websocket handshake failed: {e}"))?;
    let mut published = 0;
    loop {
        match socket.read() {
            Ok(Message::Text(text)) => {
                if handle_message(publisher, text.as_str()) {
                    published += 1;
                }
            }
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    if handle_message(publisher, text) {
                        published += 1;
                    }
                }
                Err(_) => {
                    tracing::warn!(error = %PayloadError::Utf8, "dropping malformed danmaku payload");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(published)
}
