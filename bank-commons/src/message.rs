use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Unique identifier of one instance of the Chandy-Lamport algorithm,
/// conventionally the bank id of the node that initiated it.
pub type MarkerId = String;

/// A message exchanged between banks, or sent to the state collector.
///
/// On the wire this is always a JSON object `{"type": ..., "amount": ...}`,
/// matching the six peer message types plus the collector greeting. CREDIT
/// and DEBIT carry a positive integer amount; MARKER and GREETING carry a
/// string in the `amount` field; REFUSED/CONNECT/OK carry the conventional
/// `-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Credit(u64),
    Debit(u64),
    Refused,
    Connect,
    Ok,
    Marker(MarkerId),
    /// Sent once, at collector-link startup. Not part of spec.md's peer
    /// wire format; only ever sent/received on the collector link.
    Greeting(String),
}

impl Message {
    pub fn is_credit(&self) -> bool {
        matches!(self, Message::Credit(_))
    }

    pub fn is_debit(&self) -> bool {
        matches!(self, Message::Debit(_))
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, Message::Connect)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Message::Ok)
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, Message::Marker(_))
    }
}

#[derive(Serialize, Deserialize)]
struct Wire {
    #[serde(rename = "type")]
    kind: String,
    amount: Value,
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (kind, amount) = match self {
            Message::Credit(amount) => ("CREDIT", Value::from(*amount)),
            Message::Debit(amount) => ("DEBIT", Value::from(*amount)),
            Message::Refused => ("REFUSED", Value::from(-1)),
            Message::Connect => ("CONNECT", Value::from(-1)),
            Message::Ok => ("OK", Value::from(-1)),
            Message::Marker(marker_id) => ("MARKER", Value::from(marker_id.clone())),
            Message::Greeting(text) => ("GREETING", Value::from(text.clone())),
        };
        Wire {
            kind: kind.to_string(),
            amount,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = Wire::deserialize(deserializer)?;
        let result: Result<Message, String> = match wire.kind.as_str() {
            "CREDIT" => as_u64(&wire.amount).map(Message::Credit),
            "DEBIT" => as_u64(&wire.amount).map(Message::Debit),
            "REFUSED" => Ok(Message::Refused),
            "CONNECT" => Ok(Message::Connect),
            "OK" => Ok(Message::Ok),
            "MARKER" => as_string(&wire.amount).map(Message::Marker),
            "GREETING" => as_string(&wire.amount).map(Message::Greeting),
            other => Err(format!("unknown message type: {other}")),
        };
        result.map_err(de::Error::custom)
    }
}

fn as_u64(value: &Value) -> Result<u64, String> {
    value
        .as_u64()
        .ok_or_else(|| format!("expected a non-negative integer amount, got {value}"))
}

fn as_string(value: &Value) -> Result<String, String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| format!("expected a string amount, got {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_round_trips() {
        let msg = Message::Credit(30);
        let encoded = serde_json::to_string(&msg).unwrap();
        assert_eq!(encoded, r#"{"type":"CREDIT","amount":30}"#);
        assert_eq!(serde_json::from_str::<Message>(&encoded).unwrap(), msg);
    }

    #[test]
    fn refused_uses_conventional_amount() {
        let encoded = serde_json::to_string(&Message::Refused).unwrap();
        assert_eq!(encoded, r#"{"type":"REFUSED","amount":-1}"#);
    }

    #[test]
    fn marker_amount_is_a_string() {
        let msg = Message::Marker("bank-a".to_string());
        let encoded = serde_json::to_string(&msg).unwrap();
        assert_eq!(encoded, r#"{"type":"MARKER","amount":"bank-a"}"#);
        assert_eq!(serde_json::from_str::<Message>(&encoded).unwrap(), msg);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = r#"{"type":"BOGUS","amount":1}"#;
        assert!(serde_json::from_str::<Message>(raw).is_err());
    }
}
