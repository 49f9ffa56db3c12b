//! One live socket bound to one membership.
//!
//! A connection runs two loops: the writer drains the client's outbound queue
//! into the peer, the reader turns inbound frames into broadcasts. Whichever
//! stops first ends the session.

use std::fmt::Display;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    hub::{Client, ClientKey, HubHandle},
    models::{ClientRecord, Message},
    store::{Store, StoreResult},
};

/// An inbound frame, already stripped of transport detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ignore,
    Close,
}

#[derive(Debug)]
pub struct Connection {
    record: ClientRecord,
    key: ClientKey,
    outbound: mpsc::Receiver<Message>,
}

/// Looks up the user's membership and registers a client for it with the hub.
///
/// Fails with `NotFound` when the user isn't a member of the room: joining
/// goes through the membership API, never through the socket.
pub async fn connect(
    store: &dyn Store,
    hub: &HubHandle,
    room_id: Uuid,
    user_id: &str,
) -> StoreResult<Connection> {
    let record = store.get_membership(user_id, room_id).await?;
    let (client, outbound) = Client::new(&record);
    let key = client.key();
    hub.register(client);
    Ok(Connection { record, key, outbound })
}

impl Connection {
    pub fn record(&self) -> &ClientRecord {
        &self.record
    }

    pub async fn run<W, R, E>(self, hub: HubHandle, sink: W, stream: R)
    where
        W: Sink<String> + Unpin + Send + 'static,
        W::Error: Display + Send,
        R: Stream<Item = Result<Frame, E>> + Unpin,
        E: Display,
    {
        let Connection { record, key, outbound } = self;
        info!(room_id = %key.room_id, client_id = %key.client_id, "connection open");

        let mut writer = tokio::spawn(write_loop(outbound, sink));

        tokio::select! {
            _ = read_loop(&hub, &record, stream) => {
                hub.unregister(key.clone());
                let _ = (&mut writer).await;
            }
            _ = &mut writer => {
                hub.unregister(key.clone());
            }
        }

        info!(room_id = %key.room_id, client_id = %key.client_id, "connection closed");
    }
}

async fn write_loop<W>(mut outbound: mpsc::Receiver<Message>, mut sink: W)
where
    W: Sink<String> + Unpin,
    W::Error: Display + Send,
{
    while let Some(msg) = outbound.recv().await {
        let frame = match serde_json::to_string(&msg) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(message_id = %msg.message_id, %err, "failed to encode message");
                continue;
            }
        };
        if let Err(err) = sink.send(frame).await {
            debug!(%err, "peer write failed");
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop<R, E>(hub: &HubHandle, record: &ClientRecord, mut stream: R)
where
    R: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Frame::Text(content)) => {
                let msg = Message::draft(
                    record.room_id,
                    record.client_id,
                    &record.user_id,
                    &record.user_name,
                    content,
                );
                hub.broadcast(msg).await;
            }
            Ok(Frame::Ignore) => continue,
            Ok(Frame::Close) => break,
            Err(err) => {
                debug!(client_id = %record.client_id, %err, "read failed");
                break;
            }
        }
    }
}
