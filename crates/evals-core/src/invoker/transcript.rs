//! Stream-json transcript parsing.
//!
//! The assistant writes one JSON object per line. Each line is decoded as it
//! arrives and turned into zero or more [`Event`]s appended in observation
//! order. Tool results never create events of their own; they fill in the
//! outcome of the invocation they answer, in place.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::{EvalError, Event, Result, SessionInfo, ToolOutcome};

const COMMAND_NAME_OPEN: &str = "<command-name>";
const COMMAND_NAME_CLOSE: &str = "</command-name>";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamMessage {
    System {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    Assistant {
        message: MessageBody,
    },
    User {
        message: MessageBody,
    },
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        num_turns: Option<u64>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        session_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    content: MessageContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<ToolResultContent>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolResultContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl ToolResultContent {
    fn into_text(self) -> String {
        match self {
            ToolResultContent::Text(text) => text,
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Terminal signal reported by the assistant.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub is_error: bool,
    pub result: Option<String>,
}

/// Everything captured from a transcript stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub events: Vec<Event>,
    pub session: SessionInfo,
    pub completion: Option<Completion>,
}

impl Transcript {
    /// The completion text, or every text chunk concatenated when the
    /// assistant never sent one.
    pub fn final_output(&self) -> String {
        if let Some(text) = self.completion.as_ref().and_then(|c| c.result.clone()) {
            return text;
        }
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::TextChunk { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Incremental stream-json parser.
#[derive(Debug)]
pub struct TranscriptParser {
    skill_tool: String,
    events: Vec<Event>,
    /// Tool call id -> index of its `ToolInvocation` in `events`.
    open_calls: HashMap<String, usize>,
    skill_calls: HashSet<String>,
    session: SessionInfo,
    completion: Option<Completion>,
    line_no: usize,
}

impl TranscriptParser {
    pub fn new(skill_tool: impl Into<String>) -> Self {
        Self {
            skill_tool: skill_tool.into(),
            events: Vec::new(),
            open_calls: HashMap::new(),
            skill_calls: HashSet::new(),
            session: SessionInfo::default(),
            completion: None,
            line_no: 0,
        }
    }

    /// Lines consumed so far.
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn is_complete(&self) -> bool {
        self.completion.is_some()
    }

    /// Decode one line. Returns how many events it appended.
    ///
    /// # Errors
    ///
    /// `EvalError::Protocol` with the raw line attached when the line is not a
    /// well-formed message.
    pub fn feed_line(&mut self, line: &str) -> Result<usize> {
        self.line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(0);
        }

        let message: StreamMessage =
            serde_json::from_str(trimmed).map_err(|e| self.protocol_error(line, e.to_string()))?;

        let before = self.events.len();
        match message {
            StreamMessage::System { session_id, model } => {
                if session_id.is_some() {
                    self.session.session_id = session_id;
                }
                if model.is_some() {
                    self.session.model = model;
                }
            }
            StreamMessage::Assistant { message } => self.on_assistant(message, line)?,
            StreamMessage::User { message } => self.on_user(message),
            StreamMessage::Result {
                is_error,
                result,
                duration_ms,
                num_turns,
                total_cost_usd,
                session_id,
            } => {
                if session_id.is_some() {
                    self.session.session_id = session_id;
                }
                self.session.reported_duration_ms = duration_ms;
                self.session.num_turns = num_turns;
                self.session.cost_usd = total_cost_usd;
                self.completion = Some(Completion { is_error, result });
            }
            StreamMessage::Unknown => {
                debug!(line_no = self.line_no, "skipping unrecognised transcript message");
            }
        }
        Ok(self.events.len() - before)
    }

    /// Decode one line exactly as read from the stream, trailing newline
    /// included. Bytes that are not UTF-8 are a protocol error; the error
    /// carries the line with invalid sequences replaced.
    pub fn feed_bytes(&mut self, raw: &[u8]) -> Result<usize> {
        let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        match std::str::from_utf8(raw) {
            Ok(line) => self.feed_line(line),
            Err(e) => {
                self.line_no += 1;
                Err(self.protocol_error(
                    &String::from_utf8_lossy(raw),
                    format!("line is not valid UTF-8: {e}"),
                ))
            }
        }
    }

    /// Consume the parser, returning everything captured so far.
    pub fn finish(self) -> Transcript {
        Transcript {
            events: self.events,
            session: self.session,
            completion: self.completion,
        }
    }

    fn on_assistant(&mut self, message: MessageBody, raw: &str) -> Result<()> {
        let blocks = match message.content {
            MessageContent::Text(text) => {
                self.push_text(text);
                return Ok(());
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        for block in blocks {
            match block {
                ContentBlock::Text { text } => self.push_text(text),
                ContentBlock::ToolUse { id, name, input } if name == self.skill_tool => {
                    let skill = ["skill", "command", "name"]
                        .iter()
                        .find_map(|k| input.get(*k).and_then(Value::as_str))
                        .ok_or_else(|| {
                            self.protocol_error(raw, "skill invocation without a skill name".into())
                        })?;
                    self.events.push(Event::skill(skill.trim_start_matches('/')));
                    self.skill_calls.insert(id);
                }
                ContentBlock::ToolUse { id, name, input } => {
                    self.open_calls.insert(id.clone(), self.events.len());
                    self.events.push(Event::ToolInvocation {
                        call_id: Some(id),
                        name,
                        arguments: input,
                        outcome: ToolOutcome::Pending,
                    });
                }
                ContentBlock::ToolResult { .. } | ContentBlock::Other => {}
            }
        }
        Ok(())
    }

    fn on_user(&mut self, message: MessageBody) {
        let blocks = match message.content {
            MessageContent::Text(text) => {
                self.push_command_names(&text);
                return;
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        for block in blocks {
            match block {
                ContentBlock::Text { text } => self.push_command_names(&text),
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    if self.skill_calls.contains(&tool_use_id) {
                        continue;
                    }
                    let Some(index) = self.open_calls.remove(&tool_use_id) else {
                        debug!(tool_use_id = %tool_use_id, "tool result without a matching call");
                        continue;
                    };
                    let output = content.map(ToolResultContent::into_text).unwrap_or_default();
                    if let Some(Event::ToolInvocation { outcome, .. }) = self.events.get_mut(index) {
                        *outcome = if is_error {
                            ToolOutcome::Error { output }
                        } else {
                            ToolOutcome::Success { output }
                        };
                    }
                }
                ContentBlock::ToolUse { .. } | ContentBlock::Other => {}
            }
        }
    }

    fn push_text(&mut self, text: String) {
        if !text.is_empty() {
            self.events.push(Event::text(text));
        }
    }

    /// Slash commands show up as `<command-name>/name</command-name>` in the
    /// user turn that expands them.
    fn push_command_names(&mut self, text: &str) {
        let mut rest = text;
        while let Some(start) = rest.find(COMMAND_NAME_OPEN) {
            let after = &rest[start + COMMAND_NAME_OPEN.len()..];
            let Some(end) = after.find(COMMAND_NAME_CLOSE) else {
                break;
            };
            let name = after[..end].trim().trim_start_matches('/');
            if !name.is_empty() {
                self.events.push(Event::skill(name));
            }
            rest = &after[end + COMMAND_NAME_CLOSE.len()..];
        }
    }

    fn protocol_error(&self, raw: &str, reason: String) -> EvalError {
        EvalError::Protocol {
            line_no: self.line_no,
            reason,
            raw: raw.to_string(),
        }
    }
}
