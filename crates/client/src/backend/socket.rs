//! Realtime socket for [`RestBackend`](super::RestBackend).
//!
//! Joins a Phoenix channel subscribed to `postgres_changes` (every event type)
//! on the item table and republishes each row change into the backend's
//! [`ChangeFeed`]. The socket reconnects with capped exponential backoff until
//! its [`Listener`] is dropped.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use stockbook_inventory::ItemId;

use crate::realtime::{ChangeEvent, ChangeFeed, ChangeKind};

const HEARTBEAT: Duration = Duration::from_secs(25);
const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub(crate) struct SocketConfig {
    pub url: String,
    pub api_key: String,
    pub channel: String,
    pub table: String,
}

/// Websocket endpoint for a service base URL (`http` -> `ws`, `https` -> `wss`).
pub(crate) fn socket_url(base_url: &str, api_key: &str) -> String {
    let base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    };
    format!("{base}/realtime/v1/websocket?apikey={api_key}&vsn=1.0.0")
}

/// Running socket task. Dropping it closes the socket.
pub(crate) struct Listener {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Listener {
    pub fn spawn(runtime: &Handle, config: SocketConfig, feed: ChangeFeed) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let task = runtime.spawn(run(config, feed, stop_rx));
        Self { stop, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

async fn run(config: SocketConfig, feed: ChangeFeed, stop: watch::Receiver<bool>) {
    let mut delay = RECONNECT_MIN;
    loop {
        let result = tokio::select! {
            result = session(&config, &feed) => result,
            _ = stopped(stop.clone()) => break,
        };
        match result {
            Ok(joined) => {
                tracing::info!(table = %config.table, "realtime socket closed by server");
                if joined {
                    delay = RECONNECT_MIN;
                }
            }
            Err(e) => tracing::warn!(error = %e, table = %config.table, "realtime socket failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stopped(stop.clone()) => break,
        }
        delay = (delay * 2).min(RECONNECT_MAX);
    }
    tracing::debug!(table = %config.table, "realtime socket stopped");
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

/// One connection. Returns whether the channel join was acknowledged before
/// the server closed the socket.
async fn session(config: &SocketConfig, feed: &ChangeFeed) -> Result<bool, tungstenite::Error> {
    let (socket, _) = connect_async(config.url.as_str()).await?;
    let (mut sink, mut stream) = socket.split();

    let mut reference = 1_u64;
    sink.send(Message::text(join_frame(config, reference))).await?;
    tracing::info!(table = %config.table, "realtime socket connected");

    let mut heartbeat = tokio::time::interval(HEARTBEAT);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    heartbeat.tick().await;

    let mut joined = false;
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                reference += 1;
                sink.send(Message::text(heartbeat_frame(reference))).await?;
            }
            message = stream.next() => match message {
                None | Some(Ok(Message::Close(_))) => return Ok(joined),
                Some(Err(e)) => return Err(e),
                Some(Ok(Message::Text(text))) => match parse_frame(&text, &config.table) {
                    Some(Frame::Change(event)) => {
                        tracing::debug!(kind = ?event.kind, id = ?event.id, "realtime change");
                        feed.publish(event);
                    }
                    Some(Frame::Joined) => {
                        joined = true;
                        tracing::debug!(channel = %config.channel, "realtime channel joined");
                    }
                    Some(Frame::Rejected(reason)) => {
                        tracing::warn!(channel = %config.channel, %reason, "realtime channel join rejected");
                    }
                    None => {}
                },
                Some(Ok(_)) => {}
            }
        }
    }
}

fn join_frame(config: &SocketConfig, reference: u64) -> String {
    json!({
        "topic": format!("realtime:{}", config.channel),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": config.table }
                ]
            },
            "access_token": config.api_key
        },
        "ref": reference.to_string()
    })
    .to_string()
}

fn heartbeat_frame(reference: u64) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string()
    })
    .to_string()
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Change(ChangeEvent),
    Joined,
    Rejected(String),
}

fn parse_frame(text: &str, table: &str) -> Option<Frame> {
    let frame: RawFrame = serde_json::from_str(text).ok()?;
    match frame.event.as_str() {
        "postgres_changes" => parse_change(&frame.payload, table).map(Frame::Change),
        "phx_reply" if frame.topic != "phoenix" => {
            match frame.payload.get("status").and_then(Value::as_str) {
                Some("ok") => Some(Frame::Joined),
                Some(_) => Some(Frame::Rejected(frame.payload["response"].to_string())),
                None => None,
            }
        }
        "phx_error" | "system" if frame.payload.get("status").and_then(Value::as_str) == Some("error") => {
            Some(Frame::Rejected(frame.payload.to_string()))
        }
        _ => None,
    }
}

fn parse_change(payload: &Value, table: &str) -> Option<ChangeEvent> {
    let data = payload.get("data")?;
    let kind = match data.get("type")?.as_str()? {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        _ => return None,
    };
    if data
        .get("table")
        .and_then(Value::as_str)
        .is_some_and(|t| t != table)
    {
        return None;
    }
    let id = ["record", "old_record"]
        .into_iter()
        .filter_map(|key| data.get(key)?.get("id"))
        .find_map(|id| serde_json::from_value::<ItemId>(id.clone()).ok());
    Some(ChangeEvent::new(table, kind, id))
}
