//! Outbound command definitions and the sequencing encoder.
//!
//! Every command is a JSON object `{ "seq": <u64>, "action": <str>, ... }`.
//! Sequence numbers start at 1 and grow by exactly one per encoded
//! command, whatever the action.

use std::fmt;

use serde_json::{Map, Value, json};

use crate::error::CogsError;

// ── Action ───────────────────────────────────────────────────────

/// All commands understood by the pub/sub service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Request the current session identifier.
    SessionUuid,
    /// Subscribe to a channel.
    Subscribe { channel: String },
    /// Unsubscribe from a channel.
    Unsubscribe { channel: String },
    /// Drop every subscription of this session.
    UnsubscribeAll,
    /// List the session's subscriptions.
    Subscriptions,
    /// Publish a message, optionally asking for an acknowledgement.
    Publish {
        channel: String,
        message: String,
        ack: bool,
    },
}

impl Action {
    /// The wire discriminator for the `action` field.
    pub fn name(&self) -> &'static str {
        match self {
            Action::SessionUuid => "session-uuid",
            Action::Subscribe { .. } => "subscribe",
            Action::Unsubscribe { .. } => "unsubscribe",
            Action::UnsubscribeAll => "unsubscribe-all",
            Action::Subscriptions => "subscriptions",
            Action::Publish { .. } => "pub",
        }
    }

    /// Returns `true` if the service answers this command with a reply
    /// carrying its sequence number.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Action::Publish { ack: false, .. })
    }

    fn fields(&self, map: &mut Map<String, Value>) {
        match self {
            Action::SessionUuid | Action::UnsubscribeAll | Action::Subscriptions => {}
            Action::Subscribe { channel } | Action::Unsubscribe { channel } => {
                map.insert("channel".into(), json!(channel));
            }
            Action::Publish {
                channel,
                message,
                ack,
            } => {
                map.insert("chan".into(), json!(channel));
                map.insert("msg".into(), json!(message));
                map.insert("ack".into(), json!(ack));
            }
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Encoder ──────────────────────────────────────────────────────

/// A command ready to be written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommand {
    pub seq: u64,
    pub payload: String,
}

/// Allocates sequence numbers and serialises commands.
///
/// Not internally synchronised: the owner must serialise access.
#[derive(Debug)]
pub struct CommandEncoder {
    next: u64,
}

impl CommandEncoder {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next sequence number and encode `action` with it.
    pub fn encode(&mut self, action: &Action) -> Result<EncodedCommand, CogsError> {
        let seq = self.next;

        let mut map = Map::new();
        map.insert("seq".into(), json!(seq));
        map.insert("action".into(), json!(action.name()));
        action.fields(&mut map);
        let payload = serde_json::to_string(&Value::Object(map))?;

        // Zero is never issued, even after wrap-around.
        self.next = self.next.checked_add(1).unwrap_or(1);
        Ok(EncodedCommand { seq, payload })
    }
}

impl Default for CommandEncoder {
    fn default() -> Self {
        Self::new()
    }
}
