mod manage;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/createRoom", post(manage::create_room))
        .route("/getRooms", get(manage::get_rooms))
        .route("/getClients/{room_id}", get(manage::get_clients))
        .route("/joinRoom/{room_id}", get(ws::join_room))
}
