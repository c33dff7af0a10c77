use axum::{
    debug_handler,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    AppResult, error_response,
    hub::{ChatMessage, Client, HubHandle},
    store::RoomStore,
};

/// Caller-supplied identity; untrusted, passed through as-is.
#[derive(Debug, Deserialize)]
pub(crate) struct JoinParams {
    #[serde(default, rename = "userId")]
    user_id: String,
    #[serde(default)]
    username: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn join_room(
    Path(room_id): Path<Uuid>,
    Query(params): Query<JoinParams>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<HubHandle>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    // The room must be unexpired in the store and materialized in the hub
    // before the join event is dispatched.
    let Some(room) = RoomStore::new(db_pool).room_by_id(&room_id).await? else {
        return Ok(error_response(
            StatusCode::NOT_FOUND,
            "room not found or expired",
        ));
    };
    hub.ensure_room(room.into()).await?;

    Ok(ws.on_upgrade(move |socket| pump(socket, hub, room_id.to_string(), params)))
}

/// Per-connection pump: one write task drains the hub-owned outbound queue
/// into the socket until the hub closes it at Leave; the read loop feeds
/// inbound text frames to the hub as broadcasts.
async fn pump(socket: WebSocket, hub: HubHandle, room_id: String, params: JoinParams) {
    let (client, mut outbound) = Client::new(
        params.user_id.clone(),
        params.username.clone(),
        room_id.clone(),
    );
    if hub.join(client).await.is_err() {
        return;
    }

    let (mut sink, mut stream) = socket.split();

    let write_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        if let Message::Text(text) = frame {
            let msg = ChatMessage {
                content: text.as_str().to_owned(),
                room_id: room_id.clone(),
                username: params.username.clone(),
                user_id: params.user_id.clone(),
                is_system: false,
            };
            if hub.broadcast(msg).await.is_err() {
                break;
            }
        }
    }

    if let Err(err) = hub.leave(room_id, params.user_id).await {
        tracing::warn!(error = %err, "failed to deliver leave event");
    }

    // Leave closes the outbound queue, which ends the write task.
    let _ = write_task.await;
}
