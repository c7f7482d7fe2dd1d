//! SignalR wire frames.
//!
//! The hub speaks a compact JSON framing: single-letter field names, a
//! literal `{}` as keep-alive placeholder, invocation replies keyed by `I`,
//! and push envelopes carrying an `M` array of hub messages. Only the
//! subset the remote hub actually uses is modeled here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version sent on the control endpoints.
pub const CLIENT_PROTOCOL: &str = "1.5";

/// Keep-alive placeholder frame.
pub const KEEP_ALIVE_FRAME: &str = "{}";

/// Outbound hub method invocation.
///
/// Serializes to `{"H":<hub>,"M":<method>,"A":[...],"I":<id>}`. The hub
/// matches method names case-insensitively; the reference client lowercases
/// them on the way out and so do we.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    #[serde(rename = "H")]
    pub hub: String,
    #[serde(rename = "M")]
    pub method: String,
    #[serde(rename = "A")]
    pub args: Vec<Value>,
    #[serde(rename = "I")]
    pub id: u32,
}

impl Invocation {
    pub fn new(hub: &str, method: &str, args: Vec<Value>, id: u32) -> Self {
        Self {
            hub: hub.to_string(),
            method: method.to_lowercase(),
            args,
            id,
        }
    }
}

/// One hub message carried inside a push envelope's `M` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "H", default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<String>,
    #[serde(rename = "M")]
    pub method: String,
    #[serde(rename = "A", default)]
    pub args: Vec<Value>,
}

/// Result of a matched invocation reply: the server's `R` value or its `E`
/// error text.
pub type ReplyResult = Result<Value, String>;

/// Classified inbound text frame.
#[derive(Debug, PartialEq)]
pub enum InboundFrame {
    /// Literal `{}`; requires no acknowledgement.
    KeepAlive,
    /// Reply to the invocation with the given id.
    Reply { id: u32, result: ReplyResult },
    /// Progress notification for a pending invocation; dropped.
    Progress { id: u32 },
    /// Hub push messages, in array order. The envelope's `C` cursor is
    /// ignored.
    Push(Vec<HubMessage>),
    /// Valid JSON matching no known shape; dropped.
    Other,
    /// Not valid JSON; dropped.
    Invalid,
}

/// Classify one inbound text frame.
pub fn classify_frame(text: &str) -> InboundFrame {
    if text == KEEP_ALIVE_FRAME {
        return InboundFrame::KeepAlive;
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return InboundFrame::Invalid,
    };

    if let Some(raw_id) = value.get("I") {
        let Some(id) = parse_invocation_id(raw_id) else {
            return InboundFrame::Other;
        };
        if value.get("D").is_some() {
            return InboundFrame::Progress { id };
        }
        if let Some(result) = value.get("R") {
            return InboundFrame::Reply {
                id,
                result: Ok(result.clone()),
            };
        }
        let error = match value.get("E") {
            Some(Value::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => String::from("invocation failed without detail"),
        };
        return InboundFrame::Reply {
            id,
            result: Err(error),
        };
    }

    if let Some(Value::Array(entries)) = value.get("M") {
        let messages = entries
            .iter()
            .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
            .collect();
        return InboundFrame::Push(messages);
    }

    InboundFrame::Other
}

/// The hub sends reply ids as strings, but be lenient about numbers.
fn parse_invocation_id(value: &Value) -> Option<u32> {
    match value {
        Value::String(text) => text.parse().ok(),
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    }
}

/// Hub descriptor list for the `connectionData` query parameter.
#[derive(Debug, Serialize)]
struct HubRef<'a> {
    name: &'a str,
}

/// Render `[{"name":"<hub>"}]` for the control endpoints.
pub fn connection_data(hub: &str) -> String {
    serde_json::to_string(&[HubRef { name: hub }]).unwrap_or_else(|_| String::from("[]"))
}
