use serde::Serialize;
use serde_json::Value;

/// One Server-Sent Event. `data` is parsed JSON when the payload parses,
/// otherwise the raw joined text as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SseEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub data: Value,
}

impl SseEvent {
    /// Render back to wire framing, terminated by a blank line
    #[cfg(test)]
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(event) = &self.event {
            out.push_str(&format!("event: {}\n", event));
        }
        if let Some(id) = &self.id {
            out.push_str(&format!("id: {}\n", id));
        }
        let data = match &self.data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        for line in data.split('\n') {
            out.push_str(&format!("data: {}\n", line));
        }
        out.push('\n');
        out
    }
}

/// A captured body after decoding
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBody {
    Events(Vec<SseEvent>),
    Json(Value),
    Raw(String),
}

#[derive(Default)]
struct PendingEvent {
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl PendingEvent {
    fn flush(&mut self, out: &mut Vec<SseEvent>) {
        let pending = std::mem::take(self);
        if pending.data.is_empty() {
            return;
        }
        let joined = pending.data.join("\n");
        let data = serde_json::from_str(&joined).unwrap_or(Value::String(joined));
        out.push(SseEvent {
            event: pending.event,
            id: pending.id,
            data,
        });
    }
}

/// Decode SSE text into events.
///
/// Total: never fails. Text without any `data:` line yields no events, and a
/// trailing event that was never terminated by a blank line is still
/// emitted if it has data.
pub fn decode(raw: &str) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut pending = PendingEvent::default();

    for line in raw.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.trim().is_empty() {
            pending.flush(&mut events);
        } else if line.starts_with(':') {
            continue;
        } else if let Some(value) = field(line, "data") {
            pending.data.push(value.to_string());
        } else if let Some(value) = field(line, "event") {
            pending.event = Some(value.to_string());
        } else if let Some(value) = field(line, "id") {
            pending.id = Some(value.to_string());
        }
    }
    pending.flush(&mut events);

    events
}

/// `name:value` or `name: value`
fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let value = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

/// Decode a captured body: SSE when it carries `data:` lines, otherwise a
/// single JSON document, otherwise the raw text
pub fn decode_body(raw: &str) -> DecodedBody {
    if raw.contains("data:") {
        let events = decode(raw);
        if !events.is_empty() {
            return DecodedBody::Events(events);
        }
    }

    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => DecodedBody::Json(value),
        Err(_) => DecodedBody::Raw(raw.to_string()),
    }
}
