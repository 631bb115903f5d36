//! Reader for the newline-delimited `data: <json>` frames the backend streams
//! for chat turns, retrieval turns and job reconnects.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;

use crate::core::api::{ByteStream, JobStatus, MatchedSpace, Source};

/// One recognized event of a stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    JobStarted { job_id: String },
    MatchedSpaces(Vec<MatchedSpace>),
    Sources(Vec<Source>),
    Thinking(String),
    ThinkingEnd,
    Response(String),
    /// `reconnect` / `update` frames carry the job's buffered output so far.
    Snapshot {
        content: Option<String>,
        thinking: Option<String>,
        status: Option<JobStatus>,
    },
    Error(String),
    /// A frame whose only meaning is its `done` flag.
    Done,
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
    pub event: StreamEvent,
    /// Set by `"type":"done"` or a boolean `done` field on any frame.
    pub done: bool,
}

/// A `data:` payload that could not be turned into a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct FrameReader {
    lines: BufReader<StreamReader<ByteStream, bytes::Bytes>>,
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            lines: BufReader::new(StreamReader::new(stream)),
            buf: Vec::new(),
        }
    }

    /// Next raw `data:` payload, or `None` at end of stream. Lines without
    /// the prefix (comments, `event:`, blank separators) are skipped. Bytes
    /// are not decoded here, so a bad line only spoils its own frame.
    pub async fn next_data(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            self.buf.clear();
            if self.lines.read_until(b'\n', &mut self.buf).await? == 0 {
                return Ok(None);
            }
            if let Some(data) = self.buf.trim_ascii().strip_prefix(b"data:") {
                return Ok(Some(data.trim_ascii().to_vec()));
            }
        }
    }
}

fn str_field<'a>(json: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| json.get(*k).and_then(|v| v.as_str()))
}

fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => Some(
            str_field(value, &["message", "detail"])
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
        ),
        other => Some(other.to_string()),
    }
}

/// Decode and classify one raw payload from [`FrameReader::next_data`].
/// Either failure is returned so the caller can log and skip the frame.
pub fn decode_frame(raw: &[u8]) -> Result<StreamFrame, FrameError> {
    let data = std::str::from_utf8(raw)?;
    Ok(parse_frame(data)?)
}

/// Classify one `data:` payload. Invalid JSON is returned as the parse error
/// so the caller can log and skip it.
pub fn parse_frame(data: &str) -> Result<StreamFrame, serde_json::Error> {
    let json: Value = serde_json::from_str(data)?;
    let event_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let done = event_type == "done" || json.get("done").and_then(|v| v.as_bool()) == Some(true);

    if let Some(message) = json.get("error").and_then(error_text) {
        return Ok(StreamFrame {
            event: StreamEvent::Error(message),
            done,
        });
    }

    let token = || str_field(&json, &["token", "text"]).unwrap_or("").to_string();

    let event = match event_type {
        "job_started" => match str_field(&json, &["job_id", "jobId"]) {
            Some(job_id) => StreamEvent::JobStarted {
                job_id: job_id.to_string(),
            },
            None => StreamEvent::Other(event_type.to_string()),
        },
        "matched_spaces" => StreamEvent::MatchedSpaces(
            json.get("spaces")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
        ),
        "sources" => StreamEvent::Sources(
            json.get("sources")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
        ),
        "thinking" => StreamEvent::Thinking(token()),
        "thinking_end" => StreamEvent::ThinkingEnd,
        "response" => StreamEvent::Response(token()),
        "reconnect" | "update" => StreamEvent::Snapshot {
            content: str_field(&json, &["content"]).map(str::to_string),
            thinking: str_field(&json, &["thinking"]).map(str::to_string),
            status: str_field(&json, &["status"]).and_then(JobStatus::from_status),
        },
        "done" => StreamEvent::Done,
        "" if done => StreamEvent::Done,
        other => StreamEvent::Other(other.to_string()),
    };

    Ok(StreamFrame { event, done })
}
