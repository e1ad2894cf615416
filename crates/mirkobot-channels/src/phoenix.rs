//! Phoenix-channels websocket transport for mirkoczat.
//!
//! One socket per channel. The session joins `rooms:<name>` with the login
//! token and is considered connected on an `ok` join reply. A single task
//! then owns the socket: it writes outbound frames (priority queue first),
//! sends heartbeats and publishes inbound chat lines on the bus.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mirkobot_core::{Bus, MirkobotError, Result};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::inbound::{self, InboundMessage};
use crate::link::{ChannelLink, ConnectRequest, Connector, RemoteActions};
use crate::session::SessionState;

const PHOENIX_TOPIC: &str = "phoenix";
const EVENT_JOIN: &str = "phx_join";
const EVENT_LEAVE: &str = "phx_leave";
const EVENT_REPLY: &str = "phx_reply";
const EVENT_ERROR: &str = "phx_error";
const EVENT_CLOSE: &str = "phx_close";
const EVENT_HEARTBEAT: &str = "heartbeat";
/// Public chat line, both directions.
const EVENT_MESSAGE: &str = "new_msg";
/// Whisper addressed to the bot.
const EVENT_PRIVATE: &str = "private_msg";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Actions reachable through `channel::<name>::execute`.
const ACTIONS: &[&str] = &["doPrivateMessage", "doPush", "ping", "leave"];

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Topic a channel is joined under.
pub fn room_topic(channel: &str) -> String {
    format!("rooms:{channel}")
}

/// Socket endpoint with the login token and serializer version attached.
pub fn socket_url(server: &str, token: &str) -> Result<url::Url> {
    let mut url = url::Url::parse(server)
        .map_err(|e| MirkobotError::Config(format!("invalid server '{server}': {e}")))?;
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

/// Outbound work for the socket task.
#[derive(Debug)]
enum Frame {
    Text(String),
    Push { event: String, payload: Value },
    Heartbeat,
    Leave,
}

/// Opens real websocket links.
#[derive(Debug, Clone)]
pub struct PhoenixConnector {
    heartbeat: Duration,
}

impl Default for PhoenixConnector {
    fn default() -> Self {
        Self {
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }
}

impl PhoenixConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heartbeat(heartbeat: Duration) -> Self {
        Self { heartbeat }
    }
}

#[async_trait]
impl Connector for PhoenixConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Arc<dyn ChannelLink>> {
        let url = socket_url(&request.server, &request.credentials.token)?;
        let topic = room_topic(&request.channel);
        let refs = Arc::new(AtomicU64::new(1));

        debug!(channel = %request.channel, server = %request.server, "opening socket");
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| MirkobotError::channel(&request.channel, e))?;
        let (mut write, mut read) = ws.split();

        let join_ref = next_ref(&refs);
        let join = envelope(
            &topic,
            EVENT_JOIN,
            json!({ "token": request.credentials.token }),
            &join_ref,
        );
        write
            .send(Message::Text(join.to_string().into()))
            .await
            .map_err(|e| MirkobotError::channel(&request.channel, e))?;
        await_join_reply(&mut read, &topic, &join_ref, &request.channel).await?;

        let capacity = request.queue_capacity.max(1);
        let (normal_tx, normal_rx) = mpsc::channel(capacity);
        let (priority_tx, priority_rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();

        let link = Arc::new(PhoenixLink {
            channel: request.channel.clone(),
            normal: normal_tx,
            priority: priority_tx,
            cancel: cancel.clone(),
        });

        let task = SocketTask {
            channel: request.channel,
            login: request.credentials.login,
            topic,
            bus: request.bus,
            state: request.state,
            refs,
            heartbeat: self.heartbeat,
        };
        tokio::spawn(task.run(write, read, normal_rx, priority_rx, cancel));

        Ok(link)
    }
}

async fn await_join_reply(read: &mut WsRead, topic: &str, join_ref: &str, channel: &str) -> Result<()> {
    while let Some(msg) = read.next().await {
        let msg = msg.map_err(|e| MirkobotError::channel(channel, e))?;
        if msg.is_close() {
            break;
        }
        let Ok(text) = msg.to_text() else { continue };
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            continue;
        };
        if frame["topic"] != topic || frame["event"] != EVENT_REPLY || frame["ref"] != join_ref {
            continue;
        }
        return match frame["payload"]["status"].as_str() {
            Some("ok") => Ok(()),
            status => Err(MirkobotError::channel(
                channel,
                format!(
                    "join refused ({}): {}",
                    status.unwrap_or("unknown"),
                    frame["payload"]["response"]
                ),
            )),
        };
    }
    Err(MirkobotError::channel(channel, "socket closed before join reply"))
}

fn next_ref(refs: &AtomicU64) -> String {
    refs.fetch_add(1, Ordering::SeqCst).to_string()
}

fn envelope(topic: &str, event: &str, payload: Value, reference: &str) -> Value {
    json!({
        "topic": topic,
        "event": event,
        "payload": payload,
        "ref": reference,
    })
}

/// Handle held by the session. Sending only enqueues.
struct PhoenixLink {
    channel: String,
    normal: mpsc::Sender<Frame>,
    priority: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

impl PhoenixLink {
    fn enqueue(&self, frame: Frame, priority: bool) -> Result<()> {
        let queue = if priority { &self.priority } else { &self.normal };
        queue.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                MirkobotError::channel(&self.channel, "outbound queue is full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                MirkobotError::ChannelNotConnected(self.channel.clone())
            }
        })
    }
}

impl RemoteActions for PhoenixLink {
    fn has_action(&self, name: &str) -> bool {
        ACTIONS.contains(&name)
    }

    fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        match name {
            // doPrivateMessage(nick, ...words)
            "doPrivateMessage" => {
                let mut words = args.iter().map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                let nick = words.next().filter(|n| !n.is_empty()).ok_or_else(|| {
                    MirkobotError::channel(&self.channel, "doPrivateMessage needs a nick")
                })?;
                let text = words.collect::<Vec<_>>().join(" ");
                self.enqueue(Frame::Text(format!("/msg {nick} {text}")), false)?;
                Ok(Value::Bool(true))
            }
            // doPush(event, payload)
            "doPush" => {
                let event = args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| MirkobotError::channel(&self.channel, "doPush needs an event"))?
                    .to_string();
                let payload = args.get(1).cloned().unwrap_or_else(|| json!({}));
                self.enqueue(Frame::Push { event, payload }, false)?;
                Ok(Value::Bool(true))
            }
            "ping" => {
                self.enqueue(Frame::Heartbeat, true)?;
                Ok(Value::Bool(true))
            }
            "leave" => {
                self.enqueue(Frame::Leave, true)?;
                Ok(Value::Bool(true))
            }
            other => Err(MirkobotError::channel(
                &self.channel,
                format!("unknown action '{other}'"),
            )),
        }
    }
}

impl ChannelLink for PhoenixLink {
    fn send(&self, message: &str, priority: bool) -> Result<()> {
        self.enqueue(Frame::Text(message.to_string()), priority)
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

/// Owns the socket after a successful join.
struct SocketTask {
    channel: String,
    login: String,
    topic: String,
    bus: Bus,
    state: Arc<SessionState>,
    refs: Arc<AtomicU64>,
    heartbeat: Duration,
}

impl SocketTask {
    async fn run(
        self,
        mut write: WsWrite,
        mut read: WsRead,
        mut normal: mpsc::Receiver<Frame>,
        mut priority: mpsc::Receiver<Frame>,
        cancel: CancellationToken,
    ) {
        let mut heartbeat_timer = tokio::time::interval(self.heartbeat);
        heartbeat_timer.tick().await; // consume initial tick

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let leave = self.encode(Frame::Leave);
                    let _ = write.send(Message::Text(leave.to_string().into())).await;
                    let _ = write.close().await;
                    debug!(channel = %self.channel, "socket closed on request");
                    break;
                }
                Some(frame) = priority.recv() => {
                    if !self.write_frame(&mut write, frame).await {
                        break;
                    }
                }
                Some(frame) = normal.recv() => {
                    if !self.write_frame(&mut write, frame).await {
                        break;
                    }
                }
                _ = heartbeat_timer.tick() => {
                    if !self.write_frame(&mut write, Frame::Heartbeat).await {
                        break;
                    }
                }
                msg = read.next() => match msg {
                    Some(Ok(msg)) => {
                        if msg.is_close() {
                            info!(channel = %self.channel, "server closed connection");
                            break;
                        }
                        if !self.handle_inbound(&msg) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(channel = %self.channel, error = %e, "websocket error");
                        break;
                    }
                    None => {
                        info!(channel = %self.channel, "websocket stream ended");
                        break;
                    }
                },
            }
        }

        if self.state.mark_disconnected() {
            warn!(channel = %self.channel, login = %self.login, "channel connection lost");
        }
    }

    fn encode(&self, frame: Frame) -> Value {
        let reference = next_ref(&self.refs);
        match frame {
            Frame::Text(body) => envelope(&self.topic, EVENT_MESSAGE, json!({ "body": body }), &reference),
            Frame::Push { event, payload } => envelope(&self.topic, &event, payload, &reference),
            Frame::Heartbeat => envelope(PHOENIX_TOPIC, EVENT_HEARTBEAT, json!({}), &reference),
            Frame::Leave => envelope(&self.topic, EVENT_LEAVE, json!({}), &reference),
        }
    }

    async fn write_frame(&self, write: &mut WsWrite, frame: Frame) -> bool {
        let leaving = matches!(frame, Frame::Leave);
        let encoded = self.encode(frame);
        if let Err(e) = write.send(Message::Text(encoded.to_string().into())).await {
            warn!(channel = %self.channel, error = %e, "send failed");
            return false;
        }
        !leaving
    }

    /// Returns false when the server ended the channel.
    fn handle_inbound(&self, msg: &Message) -> bool {
        let Ok(text) = msg.to_text() else { return true };
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            debug!(channel = %self.channel, "ignoring non-JSON frame");
            return true;
        };
        if frame["topic"] != self.topic.as_str() {
            return true;
        }

        match frame["event"].as_str().unwrap_or_default() {
            EVENT_MESSAGE | EVENT_PRIVATE => {
                let private = frame["event"] == EVENT_PRIVATE;
                match serde_json::from_value::<InboundMessage>(frame["payload"].clone()) {
                    Ok(mut line) => {
                        line.private |= private;
                        inbound::publish(&self.bus, &self.channel, &self.login, &line);
                    }
                    Err(e) => debug!(channel = %self.channel, error = %e, "malformed chat line"),
                }
                true
            }
            EVENT_ERROR | EVENT_CLOSE => {
                warn!(channel = %self.channel, event = %frame["event"], "server ended channel");
                false
            }
            EVENT_REPLY => true,
            other => {
                debug!(channel = %self.channel, event = %other, "unhandled event");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_carries_token() {
        let url = socket_url("ws://mirkoczat.pl/socket/websocket", "abc=").unwrap();
        assert_eq!(url.scheme(), "ws");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("token".into(), "abc=".into())));
        assert!(pairs.contains(&("vsn".into(), "1.0.0".into())));
    }

    #[test]
    fn bad_server_is_a_config_error() {
        assert!(matches!(
            socket_url("not a url", "t"),
            Err(MirkobotError::Config(_))
        ));
    }

    #[test]
    fn join_envelope_shape() {
        let v = envelope(&room_topic("hydepark"), EVENT_JOIN, json!({"token": "t"}), "1");
        assert_eq!(v["topic"], "rooms:hydepark");
        assert_eq!(v["event"], "phx_join");
        assert_eq!(v["ref"], "1");
        assert_eq!(v["payload"]["token"], "t");
    }

    #[tokio::test]
    async fn link_queues_are_separate() {
        let (normal_tx, mut normal_rx) = mpsc::channel(4);
        let (priority_tx, mut priority_rx) = mpsc::channel(4);
        let link = PhoenixLink {
            channel: "hydepark".into(),
            normal: normal_tx,
            priority: priority_tx,
            cancel: CancellationToken::new(),
        };
        link.send("normal", false).unwrap();
        link.send("urgent", true).unwrap();
        link.invoke("doPrivateMessage", vec![json!("alice"), json!("hi"), json!("there")])
            .unwrap();

        assert!(matches!(priority_rx.recv().await, Some(Frame::Text(t)) if t == "urgent"));
        assert!(matches!(normal_rx.recv().await, Some(Frame::Text(t)) if t == "normal"));
        assert!(
            matches!(normal_rx.recv().await, Some(Frame::Text(t)) if t == "/msg alice hi there")
        );
        assert!(link.invoke("doPrivateMessage", vec![]).is_err());
        assert_eq!(link.resolve("private-message").as_deref(), Some("doPrivateMessage"));
        assert_eq!(link.resolve("push").as_deref(), Some("doPush"));
        assert_eq!(link.resolve("ping").as_deref(), Some("ping"));
        assert!(link.resolve("explode").is_none());
    }
}
