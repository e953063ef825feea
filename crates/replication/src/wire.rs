//! Packets exchanged between server and clients.
//!
//! Every packet is the bincode encoding of one of the enums below. Tag ids
//! travel as raw integers, which is only sound once both sides proved they
//! share the same tag manifest during the handshake.

use std::fmt;

use serde::{Deserialize, Serialize};
use sf_core::{ActionOutcome, ActionPayload, CardId, CardUpdate, OwnerId, Sequence, Version};

use crate::error::{ReplicationError, Result};

/// Server-assigned identifier of a client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// One predicted action as sent by a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMessage {
    pub sequence: Sequence,
    pub card: CardId,
    pub payload: ActionPayload,
}

/// The server's authoritative outcome for one action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub sequence: Sequence,
    pub card: CardId,
    pub outcome: ActionOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientPacket {
    /// First packet on a connection.
    Hello {
        owner: OwnerId,
        tag_manifest: [u8; 32],
    },
    Actions(Vec<ActionMessage>),
    /// The client holds `card` at `version`.
    Ack { card: CardId, version: Version },
    /// The client discarded its view of `card` and needs a full copy.
    ResyncRequest { card: CardId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerPacket {
    Welcome {
        connection: ConnectionId,
    },
    Refused {
        reason: String,
    },
    /// Everything a connection needs to hear about one tick. Never sent
    /// when both lists are empty.
    Tick {
        tick: u64,
        results: Vec<ActionResult>,
        updates: Vec<CardUpdate>,
    },
}

pub fn encode<T: Serialize>(packet: &T) -> Result<Vec<u8>> {
    bincode::serialize(packet).map_err(ReplicationError::Encode)
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(ReplicationError::Decode)
}
