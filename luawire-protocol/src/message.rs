//! JSON message types for host replies and events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A decoded message read from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Answer to a command we issued.
    Reply(Reply),
    /// Unsolicited message without a `reply_id`.
    Event(Value),
    /// Carries a `reply_id` but does not fit the reply schema.
    Invalid { reply_id: u64, reason: String },
}

impl Incoming {
    /// Splits a decoded value into a reply or an event by its `reply_id`.
    pub fn classify(value: Value) -> Self {
        let Some(reply_id) = value.get("reply_id").and_then(Value::as_u64) else {
            return Incoming::Event(value);
        };

        match Reply::deserialize(&value) {
            Ok(reply) => Incoming::Reply(reply),
            Err(e) => Incoming::Invalid {
                reply_id,
                reason: e.to_string(),
            },
        }
    }
}

/// Reply envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Correlation id of the command this answers.
    pub reply_id: u64,

    /// Return value of the command on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Set when the host failed to run the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,

    /// Set when the host gave up on the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<bool>,

    /// Any other fields the host included.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Reply {
    pub fn ok(reply_id: u64, result: impl Into<Value>) -> Self {
        Self {
            reply_id,
            result: Some(result.into()),
            error: None,
            timeout: Some(false),
            extra: Map::new(),
        }
    }

    pub fn error(reply_id: u64, message: impl Into<String>) -> Self {
        Self {
            reply_id,
            result: None,
            error: Some(Value::String(message.into())),
            timeout: Some(false),
            extra: Map::new(),
        }
    }

    pub fn timed_out(reply_id: u64) -> Self {
        Self {
            reply_id,
            result: None,
            error: None,
            timeout: Some(true),
            extra: Map::new(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout.unwrap_or(false)
    }

    /// Returns the host's error message, if any. Non-string errors are
    /// rendered as JSON.
    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    /// Returns the result, or `Value::Null` when absent.
    pub fn result(&self) -> &Value {
        self.result.as_ref().unwrap_or(&Value::Null)
    }
}

/// A subtitle (SPU) track offered by the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub index: i64,
    pub language: String,
    pub description: String,
}

impl SubtitleTrack {
    /// Lua that returns `{indices, descriptions}` for the current input.
    pub const LIST_COMMAND: &'static str =
        r#"return {vlc.var.get_list(vlc.object.input(), "spu-es")}"#;

    /// Lua that makes this track the active one.
    pub fn select_command(&self) -> String {
        format!(
            r#"vlc.var.set(vlc.object.input(), "spu-es", {})"#,
            self.index
        )
    }

    /// Builds a track from its index and the player's display text, which
    /// looks like `"Track 1 - [English]"`.
    pub fn from_description(index: i64, text: &str) -> Self {
        let (description, language) = text.split_once(" - ").unwrap_or((text, "none"));
        Self {
            index,
            language: language.replace(&['[', ']'][..], ""),
            description: description.to_string(),
        }
    }

    /// Parses the result of [`Self::LIST_COMMAND`].
    pub fn from_result(result: &Value) -> Result<Vec<Self>, serde_json::Error> {
        let (indices, descriptions) = <(Vec<i64>, Vec<String>)>::deserialize(result)?;
        Ok(indices
            .into_iter()
            .zip(descriptions.iter())
            .map(|(index, text)| Self::from_description(index, text))
            .collect())
    }
}
