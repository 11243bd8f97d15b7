//! Wire types for the player's line-delimited JSON IPC

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error string the player uses for a successful reply
pub const SUCCESS: &str = "success";

/// Outgoing command
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub command: Vec<Value>,
    pub request_id: u64,
}

impl Request {
    pub fn new(name: &str, args: Vec<Value>, request_id: u64) -> Self {
        let mut command = Vec::with_capacity(args.len() + 1);
        command.push(Value::String(name.to_string()));
        command.extend(args);
        Self {
            command,
            request_id,
        }
    }

    /// Serialized frame, newline terminated
    pub fn to_frame(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Reply correlated to a [`Request`] by `request_id`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reply {
    pub request_id: u64,
    pub error: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.error == SUCCESS
    }
}

/// Unsolicited notification from the player
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerEvent {
    pub event: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

/// One decoded inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Reply(Reply),
    Event(PlayerEvent),
    /// Valid JSON that is neither a reply nor an event
    Other(Value),
}

/// Decode one line from the player
pub fn decode(line: &str) -> serde_json::Result<Inbound> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("request_id").is_some() && value.get("error").is_some() {
        return Ok(Inbound::Reply(serde_json::from_value(value)?));
    }
    if value.get("event").is_some() {
        return Ok(Inbound::Event(serde_json::from_value(value)?));
    }
    Ok(Inbound::Other(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_frame() {
        let request = Request::new("set_property", vec![json!("pause"), json!(true)], 7);
        let frame = request.to_frame().unwrap();
        assert!(frame.ends_with('\n'));
        let parsed: Value = serde_json::from_str(frame.trim_end()).unwrap();
        assert_eq!(parsed, json!({"command": ["set_property", "pause", true], "request_id": 7}));
    }

    #[test]
    fn test_decode_reply() {
        let inbound = decode(r#"{"data":false,"request_id":3,"error":"success"}"#).unwrap();
        match inbound {
            Inbound::Reply(reply) => {
                assert!(reply.is_success());
                assert_eq!(reply.request_id, 3);
                assert_eq!(reply.data, Some(json!(false)));
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_reply_without_data() {
        let inbound = decode(r#"{"request_id":4,"error":"property not found"}"#).unwrap();
        assert!(matches!(inbound, Inbound::Reply(ref r) if !r.is_success() && r.data.is_none()));
    }

    #[test]
    fn test_decode_event() {
        let inbound = decode(r#"{"event":"property-change","name":"pause","data":true}"#).unwrap();
        match inbound {
            Inbound::Event(event) => {
                assert_eq!(event.event, "property-change");
                assert_eq!(event.fields["name"], json!("pause"));
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(decode("{not json").is_err());
    }
}
