//! Object and event types for the informer
//!
//! Defines the raw object representation, the identity and version markers
//! handed out by the remote source, and the change events that flow from the
//! watch stream into the cache and out to every subscriber.

use crate::error::{InformerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A remote object as delivered by the source (metadata/spec/status document)
pub type RawObject = Value;

/// Server-assigned object identity (`metadata.uid`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Read the identity of a raw object, if it carries a non-empty one
    pub fn of(object: &RawObject) -> Option<Self> {
        object
            .get("metadata")
            .and_then(|m| m.get("uid"))
            .and_then(Value::as_str)
            .filter(|uid| !uid.is_empty())
            .map(Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque version marker from which a watch can be opened without gaps
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(String);

impl ResumeToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque continuation marker, valid only within one list pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(cursor: impl Into<String>) -> Self {
        Self(cursor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of a list response
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects on this page
    pub items: Vec<RawObject>,
    /// Resume token (usually only present on the first page)
    pub resource_version: Option<ResumeToken>,
    /// Cursor for the next page, `None` when the listing is complete
    pub next_cursor: Option<PageCursor>,
}

impl ListPage {
    pub fn new(items: Vec<RawObject>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    /// Builder pattern: set resume token
    pub fn with_resource_version(mut self, token: impl Into<String>) -> Self {
        self.resource_version = Some(ResumeToken::new(token));
        self
    }

    /// Builder pattern: set next cursor
    pub fn with_next_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.next_cursor = Some(PageCursor::new(cursor));
        self
    }

    /// Decode a Kubernetes-style list body
    ///
    /// `null` and `{}` decode to `None` (missing response). Empty `resourceVersion`
    /// and `continue` values are treated as absent.
    pub fn from_json(body: Value) -> Result<Option<Self>> {
        let mut obj = match body {
            Value::Null => return Ok(None),
            Value::Object(obj) if obj.is_empty() => return Ok(None),
            Value::Object(obj) => obj,
            _ => {
                return Err(InformerError::Serialization {
                    message: "list response is not a JSON object".to_string(),
                    source: None,
                })
            }
        };

        let metadata = obj.get("metadata");
        let field = |name: &str| {
            metadata
                .and_then(|m| m.get(name))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let resource_version = field("resourceVersion").map(ResumeToken::new);
        let next_cursor = field("continue").map(PageCursor::new);

        let items = match obj.remove("items") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(InformerError::Serialization {
                    message: "list response `items` is not an array".to_string(),
                    source: None,
                })
            }
        };

        Ok(Some(Self {
            items,
            resource_version,
            next_cursor,
        }))
    }
}

/// Change event type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Object created
    Added,
    /// Object changed
    Modified,
    /// Object removed
    Deleted,
    /// Source reported an error; the stream is no longer usable
    Error,
    /// Any other tag, kept verbatim
    Unrecognized(String),
}

impl EventKind {
    /// Parse a wire tag (`ADDED`, `MODIFIED`, ...)
    pub fn parse(tag: &str) -> Self {
        match tag {
            "ADDED" => Self::Added,
            "MODIFIED" => Self::Modified,
            "DELETED" => Self::Deleted,
            "ERROR" => Self::Error,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Wire tag for this kind
    pub fn as_str(&self) -> &str {
        match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Error => "ERROR",
            Self::Unrecognized(tag) => tag,
        }
    }

    /// Low-cardinality label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Error => "error",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::parse(&tag))
    }
}

/// A single watch notification
///
/// Serializes to the wire frame `{"type": "...", "object": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,

    #[serde(default)]
    pub object: RawObject,
}

impl StreamEvent {
    pub fn new(kind: EventKind, object: RawObject) -> Self {
        Self { kind, object }
    }

    pub fn added(object: RawObject) -> Self {
        Self::new(EventKind::Added, object)
    }

    pub fn modified(object: RawObject) -> Self {
        Self::new(EventKind::Modified, object)
    }

    pub fn deleted(object: RawObject) -> Self {
        Self::new(EventKind::Deleted, object)
    }

    pub fn error(object: RawObject) -> Self {
        Self::new(EventKind::Error, object)
    }

    /// Decode one newline-delimited watch frame
    pub fn from_json_line(line: &[u8]) -> Result<Self> {
        serde_json::from_slice(line)
            .map_err(|e| InformerError::serialization_with_source("Invalid watch frame", e))
    }

    /// Identity of the carried object
    pub fn uid(&self) -> Option<Uid> {
        Uid::of(&self.object)
    }

    /// Human-readable message of an error status object
    pub fn status_message(&self) -> Option<&str> {
        self.object.get("message").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_uid_extraction() {
        let pod = json!({"metadata": {"uid": "abc-123", "name": "web"}});
        assert_eq!(Uid::of(&pod), Some(Uid::new("abc-123")));

        assert_eq!(Uid::of(&json!({"metadata": {"name": "web"}})), None);
        assert_eq!(Uid::of(&json!({"metadata": {"uid": ""}})), None);
        assert_eq!(Uid::of(&json!("not an object")), None);
    }

    #[test]
    fn test_watch_frame_decoding() {
        let line = br#"{"type":"MODIFIED","object":{"metadata":{"uid":"1"},"v":2}}"#;
        let event = StreamEvent::from_json_line(line).unwrap();
        assert_eq!(event.kind, EventKind::Modified);
        assert_eq!(event.uid(), Some(Uid::new("1")));

        let bookmark = StreamEvent::from_json_line(br#"{"type":"BOOKMARK","object":{}}"#).unwrap();
        assert_eq!(bookmark.kind, EventKind::Unrecognized("BOOKMARK".to_string()));
        assert_eq!(bookmark.kind.label(), "unrecognized");

        assert!(StreamEvent::from_json_line(b"{not json").is_err());
    }

    #[test]
    fn test_error_event_message() {
        let frame = br#"{"type":"ERROR","object":{"kind":"Status","code":410,"message":"too old resource version"}}"#;
        let event = StreamEvent::from_json_line(frame).unwrap();
        assert_eq!(event.kind, EventKind::Error);
        assert_eq!(event.status_message(), Some("too old resource version"));
    }

    #[test]
    fn test_list_page_decoding() {
        let body = json!({
            "metadata": {"resourceVersion": "100", "continue": "page-2"},
            "items": [{"metadata": {"uid": "a"}}, {"metadata": {"uid": "b"}}]
        });
        let page = ListPage::from_json(body).unwrap().unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.resource_version, Some(ResumeToken::new("100")));
        assert_eq!(page.next_cursor, Some(PageCursor::new("page-2")));

        let last = json!({"metadata": {"continue": ""}, "items": []});
        let page = ListPage::from_json(last).unwrap().unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_cursor, None);
        assert_eq!(page.resource_version, None);
    }

    #[test]
    fn test_missing_list_response() {
        assert!(ListPage::from_json(Value::Null).unwrap().is_none());
        assert!(ListPage::from_json(json!({})).unwrap().is_none());
        assert!(ListPage::from_json(json!([1, 2])).is_err());
        assert!(ListPage::from_json(json!({"items": "nope"})).is_err());
    }
}
