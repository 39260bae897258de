use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only JSONL log of pipeline lifecycle events.
///
/// - default fields are `type`, `request_id`, `pipeline`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
///
/// Clones share the same file and lock, so one writer can serve
/// concurrent requests.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    lock: Mutex<()>,
}

/// Events for one pipeline request.
#[derive(Debug, Clone)]
pub struct RequestEvents {
    writer: Option<EventWriter>,
    request_id: String,
    pipeline: &'static str,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn emit(
        &self,
        event_type: &str,
        request_id: &str,
        pipeline: &str,
        payload: EventPayload,
    ) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "request_id".to_string(),
            Value::String(request_id.to_string()),
        );
        event.insert("pipeline".to_string(), Value::String(pipeline.to_string()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

impl RequestEvents {
    pub fn new(
        writer: Option<EventWriter>,
        request_id: impl Into<String>,
        pipeline: &'static str,
    ) -> Self {
        Self {
            writer,
            request_id: request_id.into(),
            pipeline,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn pipeline(&self) -> &'static str {
        self.pipeline
    }

    /// Best effort: a failing event log never fails the request.
    pub fn emit(&self, event_type: &str, payload: EventPayload) {
        let Some(writer) = self.writer.as_ref() else {
            return;
        };
        if let Err(err) = writer.emit(event_type, &self.request_id, self.pipeline, payload) {
            tracing::warn!(
                event_type,
                path = %writer.path().display(),
                "failed to write event: {err:#}"
            );
        }
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
