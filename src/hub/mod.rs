//! The room hub: a single task owns all room/client membership and every
//! mutation goes through its event channels, so the map needs no lock.
//!
//! The loop itself never performs I/O. History replay, message persistence
//! and stat updates run as detached tasks whose failures are only logged.

mod message;

pub use message::ChatMessage;

use std::collections::HashMap;

use anyhow::anyhow;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::store::{NewMessage, Room, RoomStore, StatsStore};

/// Capacity of each client's outbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 10;
/// Capacity of the inbound broadcast queue.
const BROADCAST_QUEUE_CAPACITY: usize = 5;
/// How many durable messages a joining client gets replayed.
const REPLAY_LIMIT: i64 = 100;

/// One connected participant's session within a room.
#[derive(Debug)]
pub struct Client {
    pub id: String,
    pub username: String,
    pub room_id: String,
    sender: mpsc::Sender<ChatMessage>,
}

impl Client {
    /// Builds the client together with the receiving half of its bounded
    /// outbound queue. The hub owns the sender from Join until Leave; the
    /// connection pump drains the receiver until it closes.
    pub fn new(
        id: String,
        username: String,
        room_id: String,
    ) -> (Self, mpsc::Receiver<ChatMessage>) {
        let (sender, receiver) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (
            Self {
                id,
                username,
                room_id,
                sender,
            },
            receiver,
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub id: String,
    pub username: String,
}

/// In-memory mirror of a durable room row plus its live membership.
#[derive(Debug)]
pub struct RoomEntry {
    pub id: String,
    pub name: String,
    pub is_pinned: bool,
    pub topic_title: Option<String>,
    pub topic_description: Option<String>,
    pub topic_url: Option<String>,
    pub topic_source: Option<String>,
    pub expires_at: i64,
    clients: HashMap<String, Client>,
}

impl From<Room> for RoomEntry {
    fn from(room: Room) -> Self {
        Self {
            id: room.id,
            name: room.name,
            is_pinned: room.is_pinned,
            topic_title: room.topic_title,
            topic_description: room.topic_description,
            topic_url: room.topic_url,
            topic_source: room.topic_source,
            expires_at: room.expires_at,
            clients: HashMap::new(),
        }
    }
}

enum Control {
    Join(Client),
    Leave {
        room_id: String,
        client_id: String,
    },
    EnsureRoom(RoomEntry),
    Clients {
        room_id: String,
        reply: oneshot::Sender<Vec<ClientInfo>>,
    },
}

/// Cloneable entry point to the hub task. When the last handle is dropped
/// the hub's channels close and its loop ends.
#[derive(Clone)]
pub struct HubHandle {
    control: mpsc::Sender<Control>,
    broadcast: mpsc::Sender<ChatMessage>,
}

impl HubHandle {
    /// Materialize a room entry if absent; existing membership is kept.
    pub async fn ensure_room(&self, room: RoomEntry) -> anyhow::Result<()> {
        self.send_control(Control::EnsureRoom(room)).await
    }

    /// Register a client in its room. The room must already be materialized;
    /// `ensure_room` on the same handle is processed first (one FIFO queue).
    pub async fn join(&self, client: Client) -> anyhow::Result<()> {
        self.send_control(Control::Join(client)).await
    }

    pub async fn leave(&self, room_id: String, client_id: String) -> anyhow::Result<()> {
        self.send_control(Control::Leave { room_id, client_id }).await
    }

    /// Submit a message for fan-out. Blocks only while the inbound broadcast
    /// queue (capacity 5) is full.
    pub async fn broadcast(&self, msg: ChatMessage) -> anyhow::Result<()> {
        self.broadcast
            .send(msg)
            .await
            .map_err(|_| anyhow!("hub stopped"))
    }

    /// Snapshot of a room's current members; empty for unknown rooms.
    pub async fn clients(&self, room_id: String) -> anyhow::Result<Vec<ClientInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send_control(Control::Clients { room_id, reply }).await?;
        rx.await.map_err(|_| anyhow!("hub stopped"))
    }

    async fn send_control(&self, ctl: Control) -> anyhow::Result<()> {
        self.control
            .send(ctl)
            .await
            .map_err(|_| anyhow!("hub stopped"))
    }
}

pub struct Hub {
    rooms: HashMap<String, RoomEntry>,
    control_rx: mpsc::Receiver<Control>,
    broadcast_rx: mpsc::Receiver<ChatMessage>,
    room_store: RoomStore,
    stats_store: StatsStore,
}

impl Hub {
    pub fn new(pool: SqlitePool) -> (Self, HubHandle) {
        let (control_tx, control_rx) = mpsc::channel(1);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE_CAPACITY);
        (
            Self {
                rooms: HashMap::new(),
                control_rx,
                broadcast_rx,
                room_store: RoomStore::new(pool.clone()),
                stats_store: StatsStore::new(pool),
            },
            HubHandle {
                control: control_tx,
                broadcast: broadcast_tx,
            },
        )
    }

    /// The control loop. Runs until every `HubHandle` is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                ctl = self.control_rx.recv() => match ctl {
                    Some(ctl) => self.handle_control(ctl),
                    None => break,
                },
                msg = self.broadcast_rx.recv() => match msg {
                    Some(msg) => self.handle_broadcast(msg),
                    None => break,
                },
            }
        }
        tracing::debug!("hub stopped");
    }

    fn handle_control(&mut self, ctl: Control) {
        match ctl {
            Control::Join(client) => self.handle_join(client),
            Control::Leave { room_id, client_id } => {
                if let Some(room) = self.rooms.get_mut(&room_id)
                    && room.clients.remove(&client_id).is_some()
                {
                    // Dropping the stored sender closes the client's
                    // outbound queue, which ends its write loop.
                    tracing::debug!(%room_id, %client_id, "client left");
                }
            }
            Control::EnsureRoom(room) => {
                self.rooms.entry(room.id.clone()).or_insert(room);
            }
            Control::Clients { room_id, reply } => {
                let clients = self
                    .rooms
                    .get(&room_id)
                    .map(|room| {
                        room.clients
                            .values()
                            .map(|c| ClientInfo {
                                id: c.id.clone(),
                                username: c.username.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let _ = reply.send(clients);
            }
        }
    }

    fn handle_join(&mut self, client: Client) {
        let Some(room) = self.rooms.get_mut(&client.room_id) else {
            tracing::warn!(
                room_id = %client.room_id,
                client_id = %client.id,
                "join into unmaterialized room dropped"
            );
            return;
        };

        let room_id = client.room_id.clone();
        let replay_queue = client.sender.clone();

        // First registrant wins; a duplicate id is left out of fan-out but
        // still gets history replayed onto its own queue.
        if room.clients.contains_key(&client.id) {
            tracing::debug!(%room_id, client_id = %client.id, "duplicate client id ignored");
        } else {
            room.clients.insert(client.id.clone(), client);
        }

        let store = self.room_store.clone();
        tokio::spawn(replay_history(store, room_id, replay_queue));
    }

    fn handle_broadcast(&mut self, msg: ChatMessage) {
        let Some(room) = self.rooms.get(&msg.room_id) else {
            // Unknown room: no fan-out, no persistence.
            tracing::debug!(room_id = %msg.room_id, "broadcast into unknown room dropped");
            return;
        };

        tokio::spawn(persist_message(
            self.room_store.clone(),
            self.stats_store.clone(),
            msg.clone(),
        ));

        for client in room.clients.values() {
            // Never block the loop on a full queue: drop for that client.
            if client.sender.try_send(msg.clone()).is_err() {
                tracing::warn!(
                    room_id = %msg.room_id,
                    client_id = %client.id,
                    "outbound queue unavailable, dropping message for client"
                );
            }
        }
    }
}

/// Detached: replay the most recent durable messages, oldest first, onto a
/// freshly joined client's queue. Runs concurrently with live fan-out.
async fn replay_history(store: RoomStore, room_id: String, queue: mpsc::Sender<ChatMessage>) {
    let messages = match store.recent_messages(&room_id, REPLAY_LIMIT).await {
        Ok(messages) => messages,
        Err(err) => {
            tracing::warn!(%room_id, error = %err, "failed to load room history");
            return;
        }
    };

    for msg in messages {
        if queue.send(ChatMessage::from(msg)).await.is_err() {
            // Receiver hung up mid-replay.
            return;
        }
    }
}

/// Detached: persist a broadcast message and, for authenticated authors,
/// bump their lifetime message counter. Failures are logged and dropped.
async fn persist_message(rooms: RoomStore, stats: StatsStore, msg: ChatMessage) {
    // An unparseable author id means an anonymous message, still persisted.
    let user_id = Uuid::parse_str(&msg.user_id).ok();

    if let Err(err) = rooms
        .create_message(NewMessage {
            room_id: msg.room_id.clone(),
            user_id,
            username: msg.username,
            content: msg.content,
            is_system: msg.is_system,
        })
        .await
    {
        tracing::warn!(room_id = %msg.room_id, error = %err, "failed to persist message");
    }

    if let Some(user_id) = user_id
        && let Err(err) = stats.increment_message_count(&user_id).await
    {
        tracing::warn!(%user_id, error = %err, "failed to update message count");
    }
}
