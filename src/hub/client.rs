use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{ClientRecord, Message, Role};

/// Outbound queue depth per connection. A full queue stalls the hub.
pub const OUTBOUND_CAPACITY: usize = 10;

/// A live connection as the hub sees it.
///
/// Holds the only sender of the connection's outbound queue: dropping the
/// `Client` closes the queue and ends the connection's writer.
///
/// `client_id` names the membership, `conn_id` this particular socket. A user
/// with two tabs open has two `Client`s sharing a `client_id`.
#[derive(Debug)]
pub struct Client {
    pub conn_id: Uuid,
    pub client_id: Uuid,
    pub room_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub role: Role,

    outbound: mpsc::Sender<Message>,
}

/// Identity of a client, used to address it after it was handed to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub conn_id: Uuid,
    pub client_id: Uuid,
    pub room_id: Uuid,
    pub user_id: String,
}

impl Client {
    pub fn new(record: &ClientRecord) -> (Self, mpsc::Receiver<Message>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let client = Self {
            conn_id: Uuid::now_v7(),
            client_id: record.client_id,
            room_id: record.room_id,
            user_id: record.user_id.clone(),
            user_name: record.user_name.clone(),
            role: record.role,
            outbound,
        };
        (client, rx)
    }

    pub fn key(&self) -> ClientKey {
        ClientKey {
            conn_id: self.conn_id,
            client_id: self.client_id,
            room_id: self.room_id,
            user_id: self.user_id.clone(),
        }
    }

    /// Waits for room in the outbound queue. Fails once the connection's
    /// writer is gone.
    pub(crate) async fn deliver(
        &self,
        msg: Message,
    ) -> Result<(), mpsc::error::SendError<Message>> {
        self.outbound.send(msg).await
    }

    pub(crate) fn is_gone(&self) -> bool {
        self.outbound.is_closed()
    }
}
