//! Wire frames exchanged between the broker and its clients.
//!
//! Frames are single JSON objects, one per line. The `type` tag keeps the
//! wire debuggable with nothing more than `nc`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delivery quality level chosen by the caller per publish/subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// Fire-and-forget; a momentarily absent subscriber misses the message.
    AtMostOnce,
    /// At-least-once; durable subscribers receive buffered messages on
    /// reconnect, and duplicates are possible.
    AtLeastOnce,
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            other => Err(format!("unsupported qos level {}", other)),
        }
    }
}

/// One frame on the broker connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame on every connection; identifies the client for durable
    /// subscription resumption.
    Hello {
        /// Stable identity of the connecting process.
        client_id: String,
    },
    /// Register interest in a topic or the `#` wildcard.
    #[serde(rename = "sub")]
    Subscribe {
        /// Topic name or `#`.
        pattern: String,
        /// Requested delivery quality.
        qos: QoS,
        /// Buffer matching messages across disconnects.
        #[serde(default)]
        durable: bool,
    },
    /// Publish a payload to a topic.
    #[serde(rename = "pub")]
    Publish {
        /// Destination topic.
        topic: String,
        /// JSON payload.
        payload: Value,
        /// Requested delivery quality.
        qos: QoS,
    },
    /// A delivered message, broker to subscriber.
    #[serde(rename = "msg")]
    Message {
        /// Topic the payload was published on.
        topic: String,
        /// JSON payload.
        payload: Value,
    },
}
