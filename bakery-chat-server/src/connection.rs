use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bakery_chat::protocol::{Role, WsMessage};
use bakery_chat::store::{MessageStore, SessionFilter};
use bakery_chat::ChatError;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::state::ServerState;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// One authenticated connection: its role, outbound channel, and the
/// forwarding task behind each of its subscriptions.
pub struct Client {
    role: Role,
    tx: mpsc::UnboundedSender<String>,
    subscriptions: HashMap<u64, JoinHandle<()>>,
}

impl Client {
    pub fn new(role: Role, tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            role,
            tx,
            subscriptions: HashMap::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn subscription_count(&mut self) -> usize {
        self.subscriptions.retain(|_, task| !task.is_finished());
        self.subscriptions.len()
    }

    fn send(&self, frame: &WsMessage) {
        match serde_json::to_string(frame) {
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(e) => error!("Failed to serialize frame: {}", e),
        }
    }

    fn fail(&self, request_id: Option<u64>, e: &ChatError) {
        self.send(&WsMessage::failure(request_id, e));
    }

    fn unsubscribe(&mut self, subscription_id: u64) -> bool {
        match self.subscriptions.remove(&subscription_id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for (_, task) in self.subscriptions.drain() {
            task.abort();
        }
    }
}

/// Handle a single WebSocket connection
pub async fn handle_connection(ws_stream: WebSocketStream<TcpStream>, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Wait for Connect message to authenticate
    let Some((role, token)) = wait_for_connect(&mut ws_receiver).await else {
        warn!("Connection closed before authentication");
        return;
    };

    let auth = state.authenticate(role, token.as_deref());
    let auth_response = match &auth {
        Ok(()) => WsMessage::AuthResponse {
            success: true,
            message: "Connected to LAIM Bakery chat".to_string(),
        },
        Err(e) => {
            warn!(?role, "Authentication failed: {}", e.message());
            WsMessage::AuthResponse {
                success: false,
                message: e.message().to_string(),
            }
        }
    };
    match serde_json::to_string(&auth_response) {
        Ok(json) => {
            if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                error!(?role, "Failed to send auth response: {}", e);
                return;
            }
        }
        Err(e) => {
            error!(?role, "Failed to serialize auth response: {}", e);
            return;
        }
    }
    if auth.is_err() {
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    }

    let client_id = state.add_client(role);
    info!(client_id, ?role, "Client connected");

    // Create channel for sending frames to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut client = Client::new(role, tx);

    // Spawn task to forward frames from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            res = ws_receiver.next() => {
                match res {
                    Some(Ok(Message::Text(text))) => {
                        handle_message(&text, &mut client, &state).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(client_id, "Client sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(client_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(client_id, "WebSocket stream ended");
                        break;
                    }
                    _ => {}
                }
            }
            _ = &mut send_task => {
                info!(client_id, "Send task finished (likely connection lost)");
                break;
            }
        }
    }

    // Cleanup
    drop(client);
    send_task.abort();
    state.remove_client(client_id);
    info!(client_id, ?role, "Client disconnected");
}

/// Wait for the Connect frame from a new connection
async fn wait_for_connect(
    receiver: &mut SplitStream<WebSocketStream<TcpStream>>,
) -> Option<(Role, Option<String>)> {
    let connect = tokio::time::timeout(AUTH_TIMEOUT, async {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(text)) = result {
                match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Connect { role, token }) => return Some((role, token)),
                    Ok(other) => warn!(?other, "Frame before connect, ignoring"),
                    Err(e) => warn!("Failed to parse Connect message: {}", e),
                }
            }
        }
        None
    });

    match connect.await {
        Ok(result) => result,
        Err(_) => {
            warn!("Authentication timeout");
            None
        }
    }
}

/// Handle one frame from an authenticated client. Replies and snapshots go
/// out through the client's channel.
pub async fn handle_message(text: &str, client: &mut Client, state: &ServerState) {
    let msg: WsMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(role = ?client.role, "Failed to parse message: {}", e);
            client.fail(None, &ChatError::Validation(format!("Malformed frame: {}", e)));
            return;
        }
    };

    match msg {
        WsMessage::Append { request_id, mut draft } => {
            // Authorship comes from the connection's role, never the client
            draft.is_customer_authored = client.role == Role::Customer;
            match state.store.append(draft).await {
                Ok(message) => client.send(&WsMessage::Appended { request_id, message }),
                Err(e) => client.fail(Some(request_id), &e),
            }
        }
        WsMessage::Subscribe {
            subscription_id,
            session_id,
            limit,
        } => subscribe(client, state, subscription_id, SessionFilter { session_id, limit }).await,
        WsMessage::Unsubscribe { subscription_id } => {
            if !client.unsubscribe(subscription_id) {
                debug!(subscription_id, "Unsubscribe for unknown subscription");
            }
        }
        WsMessage::MarkRead {
            request_id,
            message_id,
        } => {
            if let Err(e) = require_operator(client, "mark messages read") {
                return client.fail(Some(request_id), &e);
            }
            match state.store.mark_read(&message_id).await {
                Ok(()) => client.send(&WsMessage::Done {
                    request_id,
                    count: None,
                }),
                Err(e) => client.fail(Some(request_id), &e),
            }
        }
        WsMessage::DeleteSession {
            request_id,
            session_id,
        } => {
            if let Err(e) = require_operator(client, "clear sessions") {
                return client.fail(Some(request_id), &e);
            }
            match state.store.delete_session(&session_id).await {
                Ok(removed) => client.send(&WsMessage::Done {
                    request_id,
                    count: Some(removed),
                }),
                Err(e) => client.fail(Some(request_id), &e),
            }
        }
        WsMessage::Connect { .. } => {
            // Already authenticated, ignore
        }
        WsMessage::AuthResponse { .. }
        | WsMessage::Appended { .. }
        | WsMessage::Snapshot { .. }
        | WsMessage::Done { .. }
        | WsMessage::Failure { .. } => {
            // Server-only frames, ignore from client
            debug!(role = ?client.role, "Ignoring server-only frame from client");
        }
    }
}

fn require_operator(client: &Client, action: &str) -> Result<(), ChatError> {
    match client.role {
        Role::Operator => Ok(()),
        Role::Customer => Err(ChatError::Forbidden(format!("Customers cannot {}", action))),
    }
}

/// Open a store subscription and forward each snapshot to the client.
/// Failures are reported against the subscription id.
async fn subscribe(client: &mut Client, state: &ServerState, subscription_id: u64, filter: SessionFilter) {
    if client.role == Role::Customer {
        let Some(session_id) = filter.session_id.as_deref() else {
            return client.fail(
                Some(subscription_id),
                &ChatError::Forbidden("Customers may only subscribe to their own session".to_string()),
            );
        };
        if let Some(text) = state.welcome() {
            if let Err(e) = state.store.ensure_welcome(session_id, text) {
                warn!(session_id, error = %e, "Failed to post welcome message");
            }
        }
    }

    let mut subscription = match state.store.subscribe(filter).await {
        Ok(s) => s,
        Err(e) => return client.fail(Some(subscription_id), &e),
    };

    let tx = client.tx.clone();
    let task = tokio::spawn(async move {
        while let Some(snapshot) = subscription.next().await {
            let frame = WsMessage::Snapshot {
                subscription_id,
                messages: snapshot.as_ref().clone(),
            };
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    error!(subscription_id, "Failed to serialize snapshot: {}", e);
                    continue;
                }
            };
            if tx.send(json).is_err() {
                break;
            }
        }
        debug!(subscription_id, "Subscription forwarding stopped");
    });

    if let Some(previous) = client.subscriptions.insert(subscription_id, task) {
        previous.abort();
    }
}
