use axum::{
    Json, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    AppResult,
    config::Config,
    error_response,
    hub::HubHandle,
    store::{NewRoom, RoomStore},
};

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRoomReq {
    name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct RoomRes {
    id: String,
    name: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn create_room(
    State(db_pool): State<SqlitePool>,
    State(hub): State<HubHandle>,
    State(config): State<Config>,
    Json(req): Json<CreateRoomReq>,
) -> AppResult<Response> {
    let store = RoomStore::new(db_pool);

    if store.count_active_rooms().await? >= config.max_rooms {
        return Ok(error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "maximum number of rooms reached",
        ));
    }

    let room = store
        .create_room(NewRoom {
            name: req.name,
            ..Default::default()
        })
        .await?;
    let res = RoomRes {
        id: room.id.clone(),
        name: room.name.clone(),
    };
    hub.ensure_room(room.into()).await?;

    Ok(Json(res).into_response())
}

/// Lists unexpired rooms, materializing each in the hub along the way so a
/// follow-up join finds its entry.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn get_rooms(
    State(db_pool): State<SqlitePool>,
    State(hub): State<HubHandle>,
) -> AppResult<Response> {
    let rooms = RoomStore::new(db_pool).active_rooms().await?;
    for room in &rooms {
        hub.ensure_room(room.clone().into()).await?;
    }
    Ok(Json(rooms).into_response())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn get_clients(
    State(hub): State<HubHandle>,
    Path(room_id): Path<String>,
) -> AppResult<Response> {
    let clients = hub.clients(room_id).await?;
    Ok(Json(clients).into_response())
}
