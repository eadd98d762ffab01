use crate::error::{Result, StarbugError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

/// A watch event as it appears on the wire: `{"type": "ADDED", "object": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWatchEvent {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    pub object: serde_json::Value,
}

/// Status object carried by an ERROR watch event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchStatus {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl WatchStatus {
    /// The resource version we watched from has been compacted away (HTTP 410);
    /// the only way forward is a fresh list.
    pub fn is_gone(&self) -> bool {
        self.code == Some(410) || self.reason.as_deref() == Some("Expired")
    }
}

/// A typed incremental change delivered by a watch stream
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Progress marker carrying only a newer resource version
    Bookmark(String),
    Error(WatchStatus),
}

impl<K: DeserializeOwned> WatchEvent<K> {
    /// Decode a wire event into a typed one
    pub fn from_raw(raw: RawWatchEvent) -> Result<Self> {
        let decode = |value: serde_json::Value| -> Result<K> {
            serde_json::from_value(value).map_err(|e| {
                StarbugError::serialization_error(
                    format!("Failed to decode watch object: {}", e),
                    Some(Box::new(e)),
                )
            })
        };

        match raw.event_type {
            WatchEventType::Added => Ok(Self::Added(decode(raw.object)?)),
            WatchEventType::Modified => Ok(Self::Modified(decode(raw.object)?)),
            WatchEventType::Deleted => Ok(Self::Deleted(decode(raw.object)?)),
            WatchEventType::Bookmark => {
                let version = raw.object["metadata"]["resourceVersion"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                Ok(Self::Bookmark(version))
            }
            WatchEventType::Error => {
                let status = serde_json::from_value(raw.object).unwrap_or_default();
                Ok(Self::Error(status))
            }
        }
    }
}

impl<K> WatchEvent<K> {
    /// Event type tag of this event
    pub fn event_type(&self) -> WatchEventType {
        match self {
            Self::Added(_) => WatchEventType::Added,
            Self::Modified(_) => WatchEventType::Modified,
            Self::Deleted(_) => WatchEventType::Deleted,
            Self::Bookmark(_) => WatchEventType::Bookmark,
            Self::Error(_) => WatchEventType::Error,
        }
    }
}
