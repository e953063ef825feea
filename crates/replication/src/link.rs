//! In-process transport: one pair of unbounded queues per connection.
//!
//! The simulation never awaits; each side drains its inbound queue with
//! `try_recv` once per tick. A real transport only has to move the same
//! byte buffers.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

use crate::error::{ReplicationError, Result};

/// One direction-pair of a connection.
#[derive(Debug)]
pub struct Endpoint {
    outbound: UnboundedSender<Vec<u8>>,
    inbound: UnboundedReceiver<Vec<u8>>,
}

/// Creates a connected `(server, client)` endpoint pair.
pub fn link() -> (Endpoint, Endpoint) {
    let (to_client, from_server) = mpsc::unbounded_channel();
    let (to_server, from_client) = mpsc::unbounded_channel();
    (
        Endpoint {
            outbound: to_client,
            inbound: from_client,
        },
        Endpoint {
            outbound: to_server,
            inbound: from_server,
        },
    )
}

impl Endpoint {
    pub fn send(&self, bytes: Vec<u8>) -> Result<()> {
        self.outbound
            .send(bytes)
            .map_err(|_| ReplicationError::ChannelClosed)
    }

    /// Next queued packet, `Ok(None)` if the queue is empty right now.
    pub fn try_recv(&mut self) -> Result<Option<Vec<u8>>> {
        match self.inbound.try_recv() {
            Ok(bytes) => Ok(Some(bytes)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ReplicationError::ChannelClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}
