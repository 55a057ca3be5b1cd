use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Raw model output is only dumped to the event log when this flag is set.
pub const DEBUG_ENV_FLAG: &str = "TAPCANVAS_DEBUG";

pub fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV_FLAG).map(|value| value == "1").unwrap_or(false)
}

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `turn_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
/// - a disabled writer swallows events, so logging can never affect the turn
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    sink: Option<PathBuf>,
    turn_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, turn_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                sink: Some(path.into()),
                turn_id: turn_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    /// Writer that drops every event. Used when no events path is configured.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                sink: None,
                turn_id: String::new(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn turn_id(&self) -> &str {
        &self.inner.turn_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "turn_id".to_string(),
            Value::String(self.inner.turn_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let Some(path) = self.inner.sink.as_ref() else {
            return Ok(Value::Object(event));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    /// Best-effort emit: an events file that cannot be written must never
    /// fail the turn.
    pub fn emit_lossy(&self, event_type: &str, payload: EventPayload) {
        let _ = self.emit(event_type, payload);
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "turn-123");

        let mut payload = EventPayload::new();
        payload.insert("role".to_string(), Value::String("story_writer".to_string()));
        let emitted = writer.emit("role_selected", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("role_selected".to_string()));
        assert_eq!(parsed["turn_id"], Value::String("turn-123".to_string()));
        assert_eq!(parsed["role"], Value::String("story_writer".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn emit_appends_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "turn-123");

        writer.emit("one", EventPayload::new())?;
        writer.emit("two", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(first["type"], Value::String("one".to_string()));
        assert_eq!(second["type"], Value::String("two".to_string()));
        Ok(())
    }

    #[test]
    fn disabled_writer_swallows_events() -> anyhow::Result<()> {
        let writer = EventWriter::disabled();
        let emitted = writer.emit("ignored", EventPayload::new())?;
        assert_eq!(emitted["type"], Value::String("ignored".to_string()));
        Ok(())
    }
}
