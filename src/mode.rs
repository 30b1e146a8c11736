//! Assistant modes and the tool call protocol that switches them
//!
//! The model switches modes by calling a single declared function with a
//! `mode` argument. Each valid call produces one notification and one
//! acknowledgement; invalid calls produce neither and do not affect their
//! siblings in the same batch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::session::protocol::{FunctionCall, FunctionDeclaration, FunctionResponse};
use crate::{Error, Result};

/// Default name of the mode switch function
pub const DEFAULT_TOOL_NAME: &str = "switch_mode";

/// Default description advertised for the mode switch function
pub const DEFAULT_TOOL_DESCRIPTION: &str =
    "Switch the assistant into the mode that best fits what the student is asking for.";

/// What the assistant is currently helping with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssistantMode {
    /// Open conversation
    #[default]
    General,
    /// Step-by-step homework help
    Homework,
    /// General knowledge quiz
    GkQuiz,
    /// Science explanations and experiments
    Science,
}

impl AssistantMode {
    /// Every mode, in declaration order
    pub const ALL: [Self; 4] = [Self::General, Self::Homework, Self::GkQuiz, Self::Science];

    /// Wire name used in tool calls
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::Homework => "HOMEWORK",
            Self::GkQuiz => "GK_QUIZ",
            Self::Science => "SCIENCE",
        }
    }

    /// Human-readable label for display
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::General => "General",
            Self::Homework => "Homework Helper",
            Self::GkQuiz => "GK Quiz",
            Self::Science => "Science Lab",
        }
    }
}

impl fmt::Display for AssistantMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssistantMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::InvalidMode(s.to_string()))
    }
}

/// Interprets mode switch tool calls
#[derive(Debug, Clone)]
pub struct ModeProtocol {
    tool_name: String,
    description: String,
}

impl Default for ModeProtocol {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_NAME, DEFAULT_TOOL_DESCRIPTION)
    }
}

impl ModeProtocol {
    /// Create a handler for the function named `tool_name`
    #[must_use]
    pub fn new(tool_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            description: description.into(),
        }
    }

    /// Name of the mode switch function
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Declaration registered with the model during setup
    #[must_use]
    pub fn declaration(&self) -> FunctionDeclaration {
        let modes: Vec<&str> = AssistantMode::ALL.iter().map(|m| m.as_str()).collect();
        FunctionDeclaration {
            name: self.tool_name.clone(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "OBJECT",
                "properties": {
                    "mode": {
                        "type": "STRING",
                        "enum": modes,
                        "description": "The mode to switch to",
                    }
                },
                "required": ["mode"],
            }),
        }
    }

    /// Whether a call targets the mode switch function
    #[must_use]
    pub fn handles(&self, call: &FunctionCall) -> bool {
        call.name == self.tool_name
    }

    /// Resolve one call into the requested mode and its acknowledgement
    ///
    /// # Errors
    ///
    /// Returns `InvalidMode` if the `mode` argument is missing, not a string,
    /// or not one of the known modes
    pub fn handle(&self, call: &FunctionCall) -> Result<(AssistantMode, FunctionResponse)> {
        let requested = call
            .args
            .get("mode")
            .ok_or_else(|| Error::InvalidMode("missing mode argument".to_string()))?;
        let requested = requested
            .as_str()
            .ok_or_else(|| Error::InvalidMode(requested.to_string()))?;
        let mode: AssistantMode = requested.parse()?;

        let ack = FunctionResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            response: serde_json::json!({ "result": format!("Switched to {mode}") }),
        };
        Ok((mode, ack))
    }

    /// Handle a batch of calls in order
    ///
    /// `notify` fires once per valid mode switch. Returns the
    /// acknowledgements to send back, one per valid call.
    pub fn handle_batch<F>(&self, calls: &[FunctionCall], mut notify: F) -> Vec<FunctionResponse>
    where
        F: FnMut(AssistantMode),
    {
        let mut acks = Vec::with_capacity(calls.len());

        for call in calls {
            if !self.handles(call) {
                tracing::warn!(name = %call.name, id = ?call.id, "ignoring unknown tool call");
                continue;
            }

            match self.handle(call) {
                Ok((mode, ack)) => {
                    tracing::info!(%mode, id = ?call.id, "mode switched");
                    notify(mode);
                    acks.push(ack);
                }
                Err(e) => {
                    tracing::warn!(error = %e, id = ?call.id, "skipping mode switch");
                }
            }
        }

        acks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, mode: &str) -> FunctionCall {
        FunctionCall {
            id: Some(id.to_string()),
            name: DEFAULT_TOOL_NAME.to_string(),
            args: serde_json::json!({ "mode": mode }),
        }
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("HOMEWORK".parse::<AssistantMode>().unwrap(), AssistantMode::Homework);
        assert_eq!(" gk_quiz ".parse::<AssistantMode>().unwrap(), AssistantMode::GkQuiz);
        assert!(matches!("BOGUS".parse::<AssistantMode>(), Err(Error::InvalidMode(_))));
        assert!("".parse::<AssistantMode>().is_err());
    }

    #[test]
    fn test_mode_wire_names() {
        for mode in AssistantMode::ALL {
            assert_eq!(mode.to_string().parse::<AssistantMode>().unwrap(), mode);
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
        }
        assert_eq!(AssistantMode::default(), AssistantMode::General);
    }

    #[test]
    fn test_batch_skips_invalid_entries() {
        let protocol = ModeProtocol::default();
        let mut notified = Vec::new();

        let acks = protocol.handle_batch(&[call("1", "HOMEWORK"), call("2", "BOGUS")], |mode| {
            notified.push(mode);
        });

        assert_eq!(notified, vec![AssistantMode::Homework]);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].id.as_deref(), Some("1"));
        assert_eq!(acks[0].response["result"], "Switched to HOMEWORK");
    }

    #[test]
    fn test_invalid_before_valid_still_processes() {
        let protocol = ModeProtocol::default();
        let mut notified = Vec::new();

        let acks = protocol.handle_batch(&[call("a", "NOPE"), call("b", "SCIENCE")], |mode| {
            notified.push(mode);
        });

        assert_eq!(notified, vec![AssistantMode::Science]);
        assert_eq!(acks[0].id.as_deref(), Some("b"));
    }

    #[test]
    fn test_missing_or_non_string_mode() {
        let protocol = ModeProtocol::default();
        let mut bad = call("1", "HOMEWORK");
        bad.args = serde_json::json!({});
        assert!(matches!(protocol.handle(&bad), Err(Error::InvalidMode(_))));

        bad.args = serde_json::json!({ "mode": 3 });
        assert!(matches!(protocol.handle(&bad), Err(Error::InvalidMode(_))));
    }

    #[test]
    fn test_unknown_tool_is_ignored() {
        let protocol = ModeProtocol::default();
        let other = FunctionCall {
            id: Some("x".to_string()),
            name: "play_music".to_string(),
            args: serde_json::json!({ "mode": "SCIENCE" }),
        };

        let mut fired = false;
        let acks = protocol.handle_batch(&[other], |_| fired = true);
        assert!(acks.is_empty());
        assert!(!fired);
    }

    #[test]
    fn test_declaration_lists_modes() {
        let declaration = ModeProtocol::new("set_mode", "desc").declaration();
        assert_eq!(declaration.name, "set_mode");
        let modes = &declaration.parameters["properties"]["mode"]["enum"];
        assert_eq!(modes.as_array().unwrap().len(), 4);
        assert_eq!(modes[2], "GK_QUIZ");
    }
}
