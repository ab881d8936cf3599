pub mod paths;

use serde::{Deserialize, Serialize};

/// Default TCP port the relay listens on.
pub const DEFAULT_PORT: u16 = 3456;

/// Close code sent when the presented token does not match (policy violation).
pub const CLOSE_INVALID_TOKEN: u16 = 1008;

/// Close code sent to every client when the server shuts down (going away).
pub const CLOSE_SHUTTING_DOWN: u16 = 1001;

pub const CLOSE_REASON_INVALID_TOKEN: &str = "Invalid token";
pub const CLOSE_REASON_SHUTTING_DOWN: &str = "Server shutting down";

/// Close code sent to a client that fell too far behind (try again later).
/// Reconnecting gives it a fresh snapshot.
pub const CLOSE_CLIENT_LAGGING: u16 = 1013;
pub const CLOSE_REASON_CLIENT_LAGGING: &str = "Client too slow";

/// Query parameter carrying the session token on the upgrade request.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Coarse classification of what the agent behind the PTY is doing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    #[default]
    Working,
    Waiting,
}

impl AgentState {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Working => "working",
            AgentState::Waiting => "waiting",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a numbered menu found in the agent's output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct QuestionOption {
    pub number: u32,
    pub title: String,
    pub description: Option<String>,
    /// The option carried the selection cursor glyph in the source text.
    pub selected: bool,
}

/// Structured view of the prompt the agent is waiting on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub question: Option<String>,
    /// `None` means no menu was recognised; callers fall back to `raw_text`.
    pub options: Option<Vec<QuestionOption>>,
    pub raw_text: String,
}

impl Question {
    /// Text shown before the question itself, when there is enough of it to be useful.
    pub fn context(&self) -> Option<&str> {
        let question = self.question.as_deref()?;
        let idx = self.raw_text.find(question)?;
        if idx == 0 {
            return None;
        }
        let context = self.raw_text[..idx].trim();
        (context.chars().count() > 10).then_some(context)
    }
}

/// Payload of a `state` message. The question fields are only present while waiting.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub state: AgentState,
    #[serde(flatten)]
    pub question: Option<Question>,
}

impl StateUpdate {
    pub fn working() -> Self {
        Self {
            state: AgentState::Working,
            question: None,
        }
    }

    pub fn waiting(question: Question) -> Self {
        Self {
            state: AgentState::Waiting,
            question: Some(question),
        }
    }
}

/// Server-to-client messages, one JSON object per WebSocket text frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Connected {
        message: String,
    },
    State(StateUpdate),
    /// Raw terminal output; only sent as backlog replay on join.
    Output {
        data: String,
    },
    Exit {
        #[serde(rename = "exitCode")]
        exit_code: Option<u32>,
        signal: Option<String>,
    },
    Error {
        message: String,
    },
}

/// Client-to-server messages.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Keystrokes forwarded verbatim to the PTY.
    Input { data: String },
    /// Manual state override for testing/debugging.
    ForceState { state: AgentState },
}

/// Build the URL a client uses to reach a relay.
pub fn connection_url(host: &str, port: u16, token: &str) -> String {
    format!("ws://{host}:{port}/?{TOKEN_QUERY_PARAM}={token}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_question() -> Question {
        Question {
            question: Some("Continue? (y/n)".to_string()),
            options: None,
            raw_text: "Continue? (y/n)".to_string(),
        }
    }

    #[test]
    fn waiting_state_carries_question_fields() {
        let msg = ServerMessage::State(StateUpdate::waiting(sample_question()));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "state",
                "state": "waiting",
                "question": "Continue? (y/n)",
                "options": null,
                "rawText": "Continue? (y/n)"
            })
        );
    }

    #[test]
    fn working_state_has_no_question_fields() {
        let msg = ServerMessage::State(StateUpdate::working());
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"state","state":"working"}"#);
    }

    #[test]
    fn waiting_state_parses_back() {
        let text = r#"{"type":"state","state":"waiting","question":null,"options":[{"number":1,"title":"Yes","description":null,"selected":true}],"rawText":"1. Yes"}"#;
        let parsed: ServerMessage = serde_json::from_str(text).unwrap();
        let ServerMessage::State(update) = parsed else {
            panic!("expected state message");
        };
        assert_eq!(update.state, AgentState::Waiting);
        let question = update.question.expect("question payload");
        assert_eq!(question.question, None);
        let options = question.options.expect("options");
        assert_eq!(options.len(), 1);
        assert!(options[0].selected);
    }

    #[test]
    fn exit_uses_camel_case_code() {
        let msg = ServerMessage::Exit {
            exit_code: Some(0),
            signal: None,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "exit", "exitCode": 0, "signal": null})
        );
    }

    #[test]
    fn client_message_tags() {
        let input: ClientMessage = serde_json::from_str(r#"{"type":"input","data":"\r"}"#).unwrap();
        assert_eq!(
            input,
            ClientMessage::Input {
                data: "\r".to_string()
            }
        );

        let force: ClientMessage =
            serde_json::from_str(r#"{"type":"forceState","state":"waiting"}"#).unwrap();
        assert_eq!(
            force,
            ClientMessage::ForceState {
                state: AgentState::Waiting
            }
        );
    }

    #[test]
    fn unknown_client_message_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"resize","cols":1}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn question_context_requires_meaningful_prefix() {
        let mut q = sample_question();
        assert_eq!(q.context(), None);

        q.raw_text = "I looked at the build output.\nContinue? (y/n)".to_string();
        assert_eq!(q.context(), Some("I looked at the build output."));

        q.raw_text = "ok\nContinue? (y/n)".to_string();
        assert_eq!(q.context(), None);
    }

    #[test]
    fn connection_url_format() {
        assert_eq!(
            connection_url("192.168.1.5", 3456, "abc"),
            "ws://192.168.1.5:3456/?token=abc"
        );
    }
}
