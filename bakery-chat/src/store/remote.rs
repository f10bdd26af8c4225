use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::models::input::ChatMessageDraft;
use crate::models::ChatMessage;
use crate::protocol::{Role, WsMessage};

use super::{MessageStore, SessionFilter, Snapshot, Subscription};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

type Reply = oneshot::Sender<Result<WsMessage>>;

/// Work handed to the connection task
enum Command {
    Request {
        request_id: u64,
        frame: WsMessage,
        reply: Reply,
    },
    Subscribe {
        subscription_id: u64,
        filter: SessionFilter,
        tx: watch::Sender<Snapshot>,
        /// Settled by the first snapshot or a failure for this subscription
        ready: Reply,
    },
    Unsubscribe {
        subscription_id: u64,
    },
}

/// Message store client backed by a chat server over WebSocket.
///
/// A background task owns the socket. It reconnects after a drop and
/// re-subscribes every open subscription; requests issued while disconnected
/// fail with `ChatError::Transport` so the caller can keep its input and retry.
pub struct RemoteStore {
    cmd_tx: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

/// Subscriptions the connection task keeps alive across reconnects
type Subscriptions = HashMap<u64, (SessionFilter, watch::Sender<Snapshot>)>;

impl RemoteStore {
    /// Connect and authenticate. Fails if the first handshake fails; later
    /// drops are retried in the background.
    pub async fn connect(server_url: &str, role: Role, token: Option<String>) -> Result<Self> {
        let (write, read) = open_connection(server_url, role, token.as_deref()).await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let link = Link {
            server_url: server_url.to_string(),
            role,
            token,
        };
        tokio::spawn(link.run(Some((write, read)), cmd_rx, shutdown_rx));

        Ok(Self {
            cmd_tx,
            next_id: AtomicU64::new(1),
            shutdown_tx,
        })
    }

    /// Connect to the configured server. Only operators present the operator
    /// token.
    pub async fn from_config(config: &ChatConfig, role: Role) -> Result<Self> {
        let token = match role {
            Role::Operator => config.operator_token.clone(),
            Role::Customer => None,
        };
        Self::connect(&config.server_url, role, token).await
    }

    /// Close the connection. Open subscriptions end after their last snapshot.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request<F>(&self, build: F) -> Result<WsMessage>
    where
        F: FnOnce(u64) -> WsMessage,
    {
        let request_id = self.next_id();
        let (reply, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Request {
                request_id,
                frame: build(request_id),
                reply,
            })
            .map_err(|_| ChatError::Transport("Store connection closed".to_string()))?;

        match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChatError::Transport("Store connection closed".to_string())),
            Err(_) => Err(ChatError::Transport(format!(
                "No reply to request {} within {:?}",
                request_id, REQUEST_TIMEOUT
            ))),
        }
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

fn unexpected(frame: WsMessage) -> ChatError {
    ChatError::Transport(format!("Unexpected reply: {:?}", frame))
}

#[async_trait]
impl MessageStore for RemoteStore {
    async fn append(&self, draft: ChatMessageDraft) -> Result<ChatMessage> {
        // Reject locally so an invalid draft never reaches the wire
        draft.validate_draft()?;
        match self
            .request(|request_id| WsMessage::Append { request_id, draft })
            .await?
        {
            WsMessage::Appended { message, .. } => Ok(message),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(&self, filter: SessionFilter) -> Result<Subscription> {
        let subscription_id = self.next_id();
        let (tx, rx) = watch::channel::<Snapshot>(Arc::new(Vec::new()));
        let (ready, ready_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe {
                subscription_id,
                filter,
                tx,
                ready,
            })
            .map_err(|_| ChatError::Transport("Store connection closed".to_string()))?;

        let cancel_tx = self.cmd_tx.clone();
        let cancel = move || {
            let _ = cancel_tx.send(Command::Unsubscribe { subscription_id });
        };

        // Hand the subscription out only once it holds the server's first snapshot
        match tokio::time::timeout(REQUEST_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(_))) => Ok(Subscription::new(rx).on_cancel(cancel)),
            Ok(Ok(Err(e))) => {
                cancel();
                Err(e)
            }
            Ok(Err(_)) => {
                cancel();
                Err(ChatError::Transport("Store connection closed".to_string()))
            }
            Err(_) => {
                cancel();
                Err(ChatError::Transport(
                    "Timed out waiting for the first snapshot".to_string(),
                ))
            }
        }
    }

    async fn mark_read(&self, message_id: &str) -> Result<()> {
        let message_id = message_id.to_string();
        match self
            .request(|request_id| WsMessage::MarkRead {
                request_id,
                message_id,
            })
            .await?
        {
            WsMessage::Done { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn delete_session(&self, session_id: &str) -> Result<usize> {
        let session_id = session_id.to_string();
        match self
            .request(|request_id| WsMessage::DeleteSession {
                request_id,
                session_id,
            })
            .await?
        {
            WsMessage::Done { count, .. } => Ok(count.unwrap_or(0)),
            other => Err(unexpected(other)),
        }
    }
}

async fn send_frame(write: &mut WsWrite, frame: &WsMessage) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    write
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| ChatError::Transport(format!("Failed to send frame: {}", e)))
}

/// Open a socket and complete the `connect` / `auth_response` handshake.
async fn open_connection(server_url: &str, role: Role, token: Option<&str>) -> Result<(WsWrite, WsRead)> {
    info!(url = %server_url, ?role, "Connecting to chat server");
    let (ws_stream, _) = connect_async(server_url)
        .await
        .map_err(|e| ChatError::Transport(format!("Failed to connect to {}: {}", server_url, e)))?;
    let (mut write, mut read) = ws_stream.split();

    send_frame(
        &mut write,
        &WsMessage::Connect {
            role,
            token: token.map(String::from),
        },
    )
    .await?;

    let response = tokio::time::timeout(AUTH_TIMEOUT, async {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => return serde_json::from_str::<WsMessage>(&text).ok(),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    })
    .await
    .map_err(|_| ChatError::Transport("Authentication timeout".to_string()))?;

    match response {
        Some(WsMessage::AuthResponse { success: true, message }) => {
            info!("Authenticated with chat server: {}", message);
            Ok((write, read))
        }
        Some(WsMessage::AuthResponse { success: false, message }) => {
            error!("Authentication failed: {}", message);
            Err(ChatError::Forbidden(message))
        }
        _ => Err(ChatError::Transport(
            "Connection closed during authentication".to_string(),
        )),
    }
}

/// State of the background connection task
struct Link {
    server_url: String,
    role: Role,
    token: Option<String>,
}

impl Link {
    async fn run(
        self,
        mut connection: Option<(WsWrite, WsRead)>,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut subscriptions: Subscriptions = HashMap::new();
        let mut pending: HashMap<u64, Reply> = HashMap::new();

        loop {
            if let Some((mut write, mut read)) = connection.take() {
                let mut resubscribed = true;
                for (subscription_id, (filter, _)) in subscriptions.iter() {
                    let frame = subscribe_frame(*subscription_id, filter);
                    if send_frame(&mut write, &frame).await.is_err() {
                        resubscribed = false;
                        break;
                    }
                }

                if resubscribed {
                    let keep_running = self
                        .serve(
                            &mut write,
                            &mut read,
                            &mut cmd_rx,
                            &mut shutdown_rx,
                            &mut subscriptions,
                            &mut pending,
                        )
                        .await;

                    fail_pending(&mut pending, "Connection to chat server lost");
                    if !keep_running {
                        if let Err(e) = write.send(Message::Close(None)).await {
                            debug!(error = %e, "Failed to send close frame");
                        }
                        info!("Chat store connection closed");
                        return;
                    }
                }
                warn!(url = %self.server_url, "Disconnected from chat server, will reconnect");
            }

            if !idle(RECONNECT_DELAY, &mut cmd_rx, &mut shutdown_rx, &mut subscriptions).await {
                info!("Shutdown requested, stopping reconnection");
                return;
            }

            match open_connection(&self.server_url, self.role, self.token.as_deref()).await {
                Ok(conn) => connection = Some(conn),
                Err(e) => warn!(error = %e, "Reconnect failed"),
            }
        }
    }

    /// Pump one live connection. Returns false when the store is shutting down.
    async fn serve(
        &self,
        write: &mut WsWrite,
        read: &mut WsRead,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
        shutdown_rx: &mut broadcast::Receiver<()>,
        subscriptions: &mut Subscriptions,
        pending: &mut HashMap<u64, Reply>,
    ) -> bool {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return false,
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { return false };
                    let frame = match cmd {
                        Command::Request { request_id, frame, reply } => {
                            pending.insert(request_id, reply);
                            frame
                        }
                        Command::Subscribe { subscription_id, filter, tx, ready } => {
                            let frame = subscribe_frame(subscription_id, &filter);
                            pending.insert(subscription_id, ready);
                            subscriptions.insert(subscription_id, (filter, tx));
                            frame
                        }
                        Command::Unsubscribe { subscription_id } => {
                            subscriptions.remove(&subscription_id);
                            WsMessage::Unsubscribe { subscription_id }
                        }
                    };
                    if let Err(e) = send_frame(write, &frame).await {
                        error!(error = %e, "Failed to send to chat server");
                        return true;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handle_frame(&text, subscriptions, pending);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Server closed connection");
                            return true;
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            return true;
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

fn subscribe_frame(subscription_id: u64, filter: &SessionFilter) -> WsMessage {
    WsMessage::Subscribe {
        subscription_id,
        session_id: filter.session_id.clone(),
        limit: filter.limit,
    }
}

fn fail_pending(pending: &mut HashMap<u64, Reply>, reason: &str) {
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(ChatError::Transport(reason.to_string())));
    }
}

/// Wait out the reconnect delay while still accepting commands. New requests
/// and subscriptions fail immediately; cancellations are still applied.
/// Returns false on shutdown.
async fn idle(
    delay: Duration,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shutdown_rx: &mut broadcast::Receiver<()>,
    subscriptions: &mut Subscriptions,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            _ = shutdown_rx.recv() => return false,
            cmd = cmd_rx.recv() => match cmd {
                None => return false,
                Some(Command::Request { reply, .. }) => {
                    let _ = reply.send(Err(ChatError::Transport(
                        "Not connected to chat server".to_string(),
                    )));
                }
                Some(Command::Subscribe { ready, .. }) => {
                    let _ = ready.send(Err(ChatError::Transport(
                        "Not connected to chat server".to_string(),
                    )));
                }
                Some(Command::Unsubscribe { subscription_id }) => {
                    subscriptions.remove(&subscription_id);
                }
            }
        }
    }
}

/// Route one server frame to its subscription or waiting request
fn handle_frame(text: &str, subscriptions: &mut Subscriptions, pending: &mut HashMap<u64, Reply>) {
    let frame: WsMessage = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "Failed to parse frame from server");
            return;
        }
    };

    if let WsMessage::Snapshot {
        subscription_id,
        messages,
    } = frame
    {
        match subscriptions.get(&subscription_id) {
            Some((_, tx)) => {
                let count = messages.len();
                debug!(subscription_id, count, "Snapshot received");
                tx.send_replace(Arc::new(messages));
                if let Some(ready) = pending.remove(&subscription_id) {
                    let _ = ready.send(Ok(WsMessage::Done {
                        request_id: subscription_id,
                        count: Some(count),
                    }));
                }
            }
            None => debug!(subscription_id, "Snapshot for closed subscription"),
        }
        return;
    }

    match frame.reply_to() {
        Some(request_id) => {
            let Some(reply) = pending.remove(&request_id) else {
                debug!(request_id, "Reply for abandoned request");
                return;
            };
            let result = match frame {
                WsMessage::Failure { kind, message, .. } => {
                    // a rejected subscribe is reported against its subscription id
                    subscriptions.remove(&request_id);
                    Err(ChatError::from_kind(&kind, message))
                }
                other => Ok(other),
            };
            let _ = reply.send(result);
        }
        None => match frame {
            WsMessage::Failure { kind, message, .. } => {
                warn!(kind = %kind, "Server reported: {}", message)
            }
            other => debug!(?other, "Ignoring unexpected frame"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::msg;

    #[test]
    fn test_snapshot_routed_to_subscription() {
        let (tx, rx) = watch::channel::<Snapshot>(Arc::new(Vec::new()));
        let mut subscriptions: Subscriptions = HashMap::new();
        subscriptions.insert(5, (SessionFilter::session("abc"), tx));
        let mut pending = HashMap::new();

        let frame = WsMessage::Snapshot {
            subscription_id: 5,
            messages: vec![msg("a", "abc", 1, true)],
        };
        handle_frame(&serde_json::to_string(&frame).unwrap(), &mut subscriptions, &mut pending);

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow()[0].id, "a");
    }

    #[tokio::test]
    async fn test_failure_reply_becomes_typed_error() {
        let mut subscriptions: Subscriptions = HashMap::new();
        let mut pending = HashMap::new();
        let (reply, reply_rx) = oneshot::channel();
        pending.insert(11, reply);

        let frame = WsMessage::Failure {
            request_id: Some(11),
            kind: "validation".into(),
            message: "empty".into(),
        };
        handle_frame(&serde_json::to_string(&frame).unwrap(), &mut subscriptions, &mut pending);

        let result = reply_rx.await.unwrap();
        assert_eq!(result.unwrap_err(), ChatError::Validation("empty".into()));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_subscribe_is_dropped() {
        let (tx, _rx) = watch::channel::<Snapshot>(Arc::new(Vec::new()));
        let mut subscriptions: Subscriptions = HashMap::new();
        subscriptions.insert(3, (SessionFilter::all(), tx));
        let mut pending = HashMap::new();
        let (ready, ready_rx) = oneshot::channel();
        pending.insert(3, ready);

        let frame = WsMessage::failure(Some(3), &ChatError::Forbidden("operators only".into()));
        handle_frame(&serde_json::to_string(&frame).unwrap(), &mut subscriptions, &mut pending);

        assert!(matches!(ready_rx.await.unwrap(), Err(ChatError::Forbidden(_))));
        assert!(subscriptions.is_empty());
    }

    #[tokio::test]
    async fn test_fail_pending_reports_transport() {
        let mut pending = HashMap::new();
        let (reply, reply_rx) = oneshot::channel();
        pending.insert(1, reply);
        fail_pending(&mut pending, "gone");
        assert!(matches!(reply_rx.await.unwrap(), Err(ChatError::Transport(_))));
    }

    #[tokio::test]
    async fn test_connect_to_nothing_fails_with_transport() {
        let err = RemoteStore::connect("ws://127.0.0.1:1", Role::Customer, None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::Transport(_)));
    }

    #[tokio::test]
    async fn test_from_config_uses_server_url() {
        let config = ChatConfig {
            server_url: "ws://127.0.0.1:1".to_string(),
            operator_token: Some("s3cret".to_string()),
            ..ChatConfig::default()
        };
        let err = RemoteStore::from_config(&config, Role::Operator).await.err().unwrap();
        assert!(matches!(err, ChatError::Transport(ref m) if m.contains("127.0.0.1:1")));
    }
}
