use std::time::Duration;

use thiserror::Error;

use crate::types::ActionKind;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("model returned no decision")]
    NoDecision,

    #[error("action '{action}' requires '{field}'")]
    MissingActionParameter {
        action: ActionKind,
        field: &'static str,
    },

    #[error("action '{action}' got unusable '{field}': {value}")]
    InvalidActionParameter {
        action: ActionKind,
        field: &'static str,
        value: String,
    },

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    #[error("perception degraded: {0}")]
    PerceptionDegraded(String),

    #[error("document unavailable: {0}")]
    DocumentUnavailable(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl serde::Serialize for PilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type PilotResult<T> = Result<T, PilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_its_message() {
        let err = PilotError::MissingActionParameter {
            action: ActionKind::Type,
            field: "elementId",
        };
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!("action 'type' requires 'elementId'")
        );
    }
}
