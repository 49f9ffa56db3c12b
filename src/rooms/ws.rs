use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{ws::Message as WsMessage, Path, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{future, SinkExt, StreamExt};
use tracing::warn;
use uuid::Uuid;

use crate::{
    connection::{self, Frame},
    hub::HubHandle,
    store::Store,
};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path((room_id, user_id)): Path<(Uuid, String)>,
    State(store): State<Arc<dyn Store>>,
    State(hub): State<HubHandle>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(async move |mut socket| {
        let conn = match connection::connect(store.as_ref(), &hub, room_id, &user_id).await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(%room_id, %user_id, %err, "join refused");
                let _ = socket.send(WsMessage::Close(None)).await;
                return;
            }
        };

        let (sender, receiver) = socket.split();
        let sender = sender.with(|text: String| {
            future::ready(Ok::<_, axum::Error>(WsMessage::Text(text.into())))
        });
        let receiver = receiver.map(|msg| msg.map(to_frame));

        conn.run(hub, sender, receiver).await;
    })
}

fn to_frame(msg: WsMessage) -> Frame {
    match msg {
        WsMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
        WsMessage::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Frame::Text(text),
            Err(_) => Frame::Ignore,
        },
        WsMessage::Ping(_) | WsMessage::Pong(_) => Frame::Ignore,
        WsMessage::Close(_) => Frame::Close,
    }
}
