//! Transcript events observed during an assistant run.

use serde::{Deserialize, Serialize};

/// Outcome of a tool invocation as reported back to the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// No result was observed (run ended or was cut off first).
    Pending,

    /// The tool returned normally.
    Success { output: String },

    /// The tool reported an error.
    Error { output: String },
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ToolOutcome::Pending)
    }
}

/// One observed assistant action. Position in the run's event list is its
/// observation order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A tool was invoked.
    ToolInvocation {
        /// Assistant-side identifier used to pair the call with its result.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        name: String,
        arguments: serde_json::Value,
        outcome: ToolOutcome,
    },

    /// A skill or slash command was activated.
    SkillActivation { name: String },

    /// A segment of text emitted by the assistant.
    TextChunk { content: String },
}

impl Event {
    pub fn tool(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Event::ToolInvocation {
            call_id: None,
            name: name.into(),
            arguments,
            outcome: ToolOutcome::Pending,
        }
    }

    pub fn skill(name: impl Into<String>) -> Self {
        Event::SkillActivation { name: name.into() }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Event::TextChunk {
            content: content.into(),
        }
    }

    /// Short kind label used in logs and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ToolInvocation { .. } => "tool_invocation",
            Event::SkillActivation { .. } => "skill_activation",
            Event::TextChunk { .. } => "text_chunk",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_tagged_encoding() {
        let event = Event::skill("rwx:review-gha-migration");
        let raw = serde_json::to_value(&event).expect("serialize");
        assert_eq!(raw["type"], json!("skill_activation"));
        assert_eq!(raw["name"], json!("rwx:review-gha-migration"));
    }

    #[test]
    fn test_tool_invocation_preserves_arguments_and_outcome() {
        let event = Event::ToolInvocation {
            call_id: Some("toolu_01".to_string()),
            name: "Bash".to_string(),
            arguments: json!({"command": "go vet ./..."}),
            outcome: ToolOutcome::Error {
                output: "exit status 1".to_string(),
            },
        };

        let json = serde_json::to_string(&event).expect("serialize");
        let back: Event = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(event, back);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Event::tool("Bash", json!({})).kind(), "tool_invocation");
        assert_eq!(Event::text("hi").kind(), "text_chunk");
        assert!(ToolOutcome::Pending.is_pending());
        assert!(!ToolOutcome::Success {
            output: String::new()
        }
        .is_error());
    }
}
