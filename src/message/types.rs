//! Diff-sync protocol message types.
//!
//! The distribution layer only looks at a message's kind; bodies are carried
//! as-is between the synchronization engines on each server. Diffs inside a
//! patch stay as raw JSON so engines can use any diff representation.

use std::fmt;

use serde::{
    ser::{self, SerializeStruct},
    Deserialize, Serialize, Serializer,
};
use serde_json::Value;

use crate::error::Error;

/// Wire tag for patch messages.
pub const PATCH_TAG: &str = "PATCH";

/// Wire tag for acknowledgement messages.
pub const ACK_TAG: &str = "ACK";

/// One edit produced by diffing a local change against the shadow copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edit {
    /// Client version the diff was computed against.
    pub client_version: u64,
    /// Server version the diff was computed against.
    pub server_version: u64,
    /// Engine-specific diff payload.
    pub diff: Value,
}

/// A batch of edits waiting to be applied to a shadow copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// Edits in the order they were produced.
    pub edits: Vec<Edit>,
}

impl Patch {
    /// Create a patch from a list of edits.
    pub fn new(edits: Vec<Edit>) -> Self {
        Self { edits }
    }
}

/// Acknowledgement that a patch was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// Last client version the acknowledging side has applied.
    pub client_version: u64,
    /// Last server version the acknowledging side has applied.
    pub server_version: u64,
}

/// Protocol message exchanged between diff-sync stacks.
///
/// Serialized as `{"type": "PATCH" | "ACK", "body": ...}`. A `type` this node
/// does not know (sent by a newer peer) decodes to [`SyncMessage::Unsupported`]
/// so the rest of the envelope can still be inspected and logged.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawMessage")]
pub enum SyncMessage {
    /// Edits to apply against the shared shadow.
    Patch(Patch),
    /// Acknowledgement of a previously applied patch.
    Ack(Ack),
    /// A message kind this node cannot interpret.
    ///
    /// `kind` is never [`PATCH_TAG`] or [`ACK_TAG`]: decoding maps those to
    /// their own variants, and encoding refuses them. Build one with
    /// [`SyncMessage::unsupported`].
    Unsupported {
        /// The wire `type` tag.
        kind: String,
        /// The raw body.
        body: Value,
    },
}

impl SyncMessage {
    /// Create a message of a kind this node does not interpret.
    ///
    /// Fails with [`Error::Encode`] if `kind` is a known wire tag.
    pub fn unsupported(kind: impl Into<String>, body: Value) -> Result<Self, Error> {
        let kind = kind.into();
        if is_known_tag(&kind) {
            return Err(Error::Encode(format!(
                "{} is a known message kind, not an unsupported one",
                kind
            )));
        }
        Ok(SyncMessage::Unsupported { kind, body })
    }

    /// Kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            SyncMessage::Patch(_) => MessageKind::Patch,
            SyncMessage::Ack(_) => MessageKind::Ack,
            SyncMessage::Unsupported { kind, .. } => MessageKind::Other(kind.clone()),
        }
    }

    /// Check if this is a patch.
    pub fn is_patch(&self) -> bool {
        matches!(self, SyncMessage::Patch(_))
    }

    /// Check if this is an ack.
    pub fn is_ack(&self) -> bool {
        matches!(self, SyncMessage::Ack(_))
    }
}

impl From<Patch> for SyncMessage {
    fn from(patch: Patch) -> Self {
        SyncMessage::Patch(patch)
    }
}

impl From<Ack> for SyncMessage {
    fn from(ack: Ack) -> Self {
        SyncMessage::Ack(ack)
    }
}

impl Serialize for SyncMessage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("SyncMessage", 2)?;
        match self {
            SyncMessage::Patch(patch) => {
                state.serialize_field("type", PATCH_TAG)?;
                state.serialize_field("body", patch)?;
            }
            SyncMessage::Ack(ack) => {
                state.serialize_field("type", ACK_TAG)?;
                state.serialize_field("body", ack)?;
            }
            SyncMessage::Unsupported { kind, .. } if is_known_tag(kind) => {
                return Err(ser::Error::custom(format!(
                    "unsupported message cannot use the known tag {}",
                    kind
                )));
            }
            SyncMessage::Unsupported { kind, body } => {
                state.serialize_field("type", kind)?;
                state.serialize_field("body", body)?;
            }
        }
        state.end()
    }
}

fn is_known_tag(kind: &str) -> bool {
    kind == PATCH_TAG || kind == ACK_TAG
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    body: Value,
}

impl TryFrom<RawMessage> for SyncMessage {
    type Error = Error;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        match raw.kind.as_str() {
            PATCH_TAG => Ok(SyncMessage::Patch(serde_json::from_value(raw.body)?)),
            ACK_TAG => Ok(SyncMessage::Ack(serde_json::from_value(raw.body)?)),
            _ => Ok(SyncMessage::Unsupported {
                kind: raw.kind,
                body: raw.body,
            }),
        }
    }
}

/// Message kind used for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// [`SyncMessage::Patch`].
    Patch,
    /// [`SyncMessage::Ack`].
    Ack,
    /// Any other wire tag.
    Other(String),
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Patch => f.write_str(PATCH_TAG),
            MessageKind::Ack => f.write_str(ACK_TAG),
            MessageKind::Other(kind) => f.write_str(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patch_wire_shape() {
        let msg = SyncMessage::from(Patch::new(vec![Edit {
            client_version: 1,
            server_version: 2,
            diff: json!([{"op": "insert", "at": 4, "text": "hi"}]),
        }]));

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "PATCH",
                "body": {"edits": [{
                    "clientVersion": 1,
                    "serverVersion": 2,
                    "diff": [{"op": "insert", "at": 4, "text": "hi"}]
                }]}
            })
        );
    }

    #[test]
    fn test_ack_wire_shape() {
        let msg = SyncMessage::Ack(Ack {
            client_version: 3,
            server_version: 5,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "ACK", "body": {"clientVersion": 3, "serverVersion": 5}})
        );
        assert_eq!(serde_json::from_value::<SyncMessage>(value).unwrap(), msg);
    }

    #[test]
    fn test_unknown_kind_preserved() {
        let value = json!({"type": "SNAPSHOT", "body": {"text": "hello"}});
        let msg: SyncMessage = serde_json::from_value(value.clone()).unwrap();

        assert_eq!(msg.kind(), MessageKind::Other("SNAPSHOT".into()));
        assert!(!msg.is_patch());
        assert!(!msg.is_ack());
        assert_eq!(serde_json::to_value(&msg).unwrap(), value);
    }

    #[test]
    fn test_known_kind_with_bad_body_rejected() {
        let value = json!({"type": "ACK", "body": {"clientVersion": "three"}});
        assert!(serde_json::from_value::<SyncMessage>(value).is_err());
    }

    #[test]
    fn test_unsupported_rejects_known_tags() {
        assert!(matches!(
            SyncMessage::unsupported(PATCH_TAG, json!({})),
            Err(Error::Encode(_))
        ));
        assert!(matches!(
            SyncMessage::unsupported(ACK_TAG, json!({})),
            Err(Error::Encode(_))
        ));

        let msg = SyncMessage::unsupported("SNAPSHOT", json!({"text": "hi"})).unwrap();
        assert_eq!(msg.kind(), MessageKind::Other("SNAPSHOT".into()));
    }

    #[test]
    fn test_unsupported_with_known_tag_not_serialized() {
        let msg = SyncMessage::Unsupported {
            kind: PATCH_TAG.into(),
            body: json!({"edits": "not a list"}),
        };
        assert!(serde_json::to_value(&msg).is_err());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(MessageKind::Patch.to_string(), "PATCH");
        assert_eq!(MessageKind::Ack.to_string(), "ACK");
    }
}
