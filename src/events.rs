use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// Events the host receives, one per externally observable step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentEvent {
    Status {
        message: String,
        severity: Severity,
    },
    #[serde(rename_all = "camelCase")]
    StateUpdate {
        url: String,
        title: String,
        /// Base64 JPEG.
        #[serde(skip_serializing_if = "Option::is_none")]
        screenshot: Option<String>,
        pages_count: usize,
    },
}

impl AgentEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            severity: Severity::Info,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            severity: Severity::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Status { .. } => "status",
            AgentEvent::StateUpdate { .. } => "state",
        }
    }
}

/// Sending side of the host event stream.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Events with no listener are dropped.
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_severity() {
        let json = serde_json::to_value(AgentEvent::success("Clicked")).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["severity"], "success");
    }

    #[test]
    fn state_update_uses_camel_case() {
        let event = AgentEvent::StateUpdate {
            url: "https://example.com".into(),
            title: "Example".into(),
            screenshot: None,
            pages_count: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stateUpdate");
        assert_eq!(json["pagesCount"], 2);
        assert!(json.get("screenshot").is_none());
    }
}
