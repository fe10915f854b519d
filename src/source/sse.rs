//! Server-sent events decoding for streaming database watches.
//!
//! The database streams changes as SSE frames:
//!
//! ```text
//! event: put
//! data: {"path": "/", "data": {"TDS": 120, "pH": 7.1}}
//!
//! event: patch
//! data: {"path": "/", "data": {"pH": 7.3}}
//!
//! event: keep-alive
//! data: null
//! ```
//!
//! [`SseDecoder`] splits the byte stream into frames, [`StreamEvent`]
//! interprets them and [`apply`] folds `put`/`patch` into a local snapshot
//! so that subscribers always see the whole value.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::TransportError;

/// A raw SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental SSE decoder. Feed it chunks as they arrive.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Consume a chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }

            // Comment line
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        frames
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// A decoded database stream event.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamEvent {
    /// Replace the value at `path`.
    Put { path: String, data: Value },
    /// Merge the children of `data` into the value at `path`.
    Patch { path: String, data: Value },
    KeepAlive,
    /// The server closed the watch.
    Cancel(String),
    /// The credential expired or was revoked.
    AuthRevoked(String),
}

#[derive(Deserialize)]
struct Change {
    path: String,
    data: Value,
}

impl StreamEvent {
    /// Interpret a frame. Unrecognized event types yield `Ok(None)`.
    pub fn parse(frame: &SseFrame) -> Result<Option<Self>, TransportError> {
        let change = || {
            serde_json::from_str::<Change>(&frame.data)
                .map_err(|e| TransportError::Parse(format!("{} event: {}", frame.event, e)))
        };
        let reason = || {
            serde_json::from_str::<Value>(&frame.data)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| frame.event.clone())
        };

        let event = match frame.event.as_str() {
            "put" => {
                let Change { path, data } = change()?;
                StreamEvent::Put { path, data }
            }
            "patch" => {
                let Change { path, data } = change()?;
                StreamEvent::Patch { path, data }
            }
            "keep-alive" => StreamEvent::KeepAlive,
            "cancel" => StreamEvent::Cancel(reason()),
            "auth_revoked" => StreamEvent::AuthRevoked(reason()),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Fold a `put` (`merge == false`) or `patch` (`merge == true`) into `root`.
pub(crate) fn apply(root: &mut Value, path: &str, data: Value, merge: bool) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if merge {
        if let Value::Object(children) = data {
            for (key, value) in children {
                let mut child_path = segments.clone();
                child_path.push(&key);
                set_at(root, &child_path, value);
            }
        }
    } else {
        set_at(root, &segments, data);
    }

    if is_empty(root) {
        *root = Value::Null;
    }
}

fn set_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }

    if let Value::Object(map) = node {
        let child = map.entry(head.to_string()).or_insert(Value::Null);
        set_at(child, rest, value);
        if is_empty(child) {
            map.remove(*head);
        }
    }
}

fn is_empty(value: &Value) -> bool {
    value.is_null() || value.as_object().is_some_and(Map::is_empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decoder_frames() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push(
            b"event: put\ndata: {\"path\":\"/\",\"data\":1}\n\nevent: keep-alive\ndata: null\n\n",
        );
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "put");
        assert_eq!(frames[0].data, "{\"path\":\"/\",\"data\":1}");
        assert_eq!(frames[1].event, "keep-alive");
    }

    #[test]
    fn test_decoder_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: pa").is_empty());
        assert!(decoder.push(b"tch\r\ndata: {\"path\":\"/a\",").is_empty());
        let frames = decoder.push(b"\"data\":{}}\r\n\r\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "patch".into(),
                data: "{\"path\":\"/a\",\"data\":{}}".into(),
            }]
        );
    }

    #[test]
    fn test_decoder_ignores_comments() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push(b": ping\n\ndata: hello\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "hello");
    }

    #[test]
    fn test_parse_events() {
        let put = SseFrame {
            event: "put".into(),
            data: r#"{"path":"/","data":{"pH":7}}"#.into(),
        };
        assert_eq!(
            StreamEvent::parse(&put).unwrap(),
            Some(StreamEvent::Put {
                path: "/".into(),
                data: json!({ "pH": 7 })
            })
        );

        let cancel = SseFrame {
            event: "cancel".into(),
            data: "\"Permission denied\"".into(),
        };
        assert_eq!(
            StreamEvent::parse(&cancel).unwrap(),
            Some(StreamEvent::Cancel("Permission denied".into()))
        );

        let other = SseFrame {
            event: "message".into(),
            data: "x".into(),
        };
        assert_eq!(StreamEvent::parse(&other).unwrap(), None);

        let broken = SseFrame {
            event: "put".into(),
            data: "{".into(),
        };
        assert!(matches!(
            StreamEvent::parse(&broken),
            Err(TransportError::Parse(_))
        ));
    }

    #[test]
    fn test_apply_put_and_patch() {
        let mut root = Value::Null;
        apply(&mut root, "/", json!({ "TDS": 100, "pH": 7.0 }), false);
        assert_eq!(root, json!({ "TDS": 100, "pH": 7.0 }));

        apply(&mut root, "/", json!({ "pH": 7.4, "Turbidity": 2 }), true);
        assert_eq!(root, json!({ "TDS": 100, "pH": 7.4, "Turbidity": 2 }));

        apply(&mut root, "/TDS", json!(250), false);
        assert_eq!(root["TDS"], json!(250));

        apply(&mut root, "/probe/depth", json!(3), false);
        assert_eq!(root["probe"], json!({ "depth": 3 }));
    }

    #[test]
    fn test_apply_null_removes() {
        let mut root = json!({ "TDS": 100, "probe": { "depth": 3 } });
        apply(&mut root, "/probe/depth", Value::Null, false);
        assert_eq!(root, json!({ "TDS": 100 }));

        apply(&mut root, "/", json!({ "TDS": null }), true);
        assert_eq!(root, Value::Null);
    }
}
