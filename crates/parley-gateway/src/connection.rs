use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use parley_types::events::{GatewayCommand, GatewayEvent, ViewQuery};
use parley_types::models::User;

use crate::blocking;
use crate::dispatcher::Dispatcher;
use crate::typing::TypingDebouncer;
use crate::views::EntityKey;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// The first frame must be an Identify within this window.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection from Identify to teardown.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, typing: TypingDebouncer) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify
    let Some(identity_key) = wait_for_identify(&mut receiver, IDENTIFY_TIMEOUT).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    // Step 2: Resolve the user and mark them online
    let user = match go_online(&dispatcher, &identity_key).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!("Unknown identity {} on gateway, closing", identity_key);
            return;
        }
        Err(e) => {
            warn!("Failed to bring {} online: {}", identity_key, e);
            return;
        }
    };

    info!("{} ({}) connected to gateway", user.name, user.id);
    dispatcher.user_connected(user.id).await;

    // Step 3: Send Ready event
    let ready = GatewayEvent::Ready { user: user.clone() };
    if send_event(&mut sender, &ready).await.is_ok() {
        run_connection_loop(sender, receiver, &dispatcher, &typing, &user).await;
    }

    // Teardown: subscriptions are gone by now, then ephemeral state, then presence
    go_offline(&dispatcher, &typing, &user).await;
    info!("{} ({}) disconnected from gateway", user.name, user.id);
}

/// Only the user's last open connection clears typing flags and presence.
async fn go_offline(dispatcher: &Dispatcher, typing: &TypingDebouncer, user: &User) {
    if !dispatcher.user_disconnected(user.id).await {
        return;
    }

    typing.clear_user(user.id).await;
    let identity = user.identity_key.clone();
    match blocking(dispatcher.db(), move |db| db.set_online_status(&identity, false)).await {
        Ok(Ok(Some(id))) => dispatcher.invalidate([EntityKey::User(id)]),
        Ok(Ok(None)) => {}
        Ok(Err(e)) => warn!("Failed to mark {} offline: {}", user.id, e),
        Err(e) => warn!("spawn_blocking join error: {}", e),
    }
}

async fn go_online(dispatcher: &Dispatcher, identity_key: &str) -> anyhow::Result<Option<User>> {
    let identity = identity_key.to_string();
    let user = blocking(dispatcher.db(), move |db| {
        if db.set_online_status(&identity, true)?.is_none() {
            return Ok(None);
        }
        db.get_user_by_identity(&identity)
    })
    .await??;

    if let Some(user) = &user {
        dispatcher.invalidate([EntityKey::User(user.id)]);
    }
    Ok(user)
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(event)?;
    sender.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: &Dispatcher,
    typing: &TypingDebouncer,
    user: &User,
) {
    let conn_id = Uuid::new_v4();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward view updates -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = send_event(&mut sender, &event).await {
                        warn!("Dropping connection {}: {}", conn_id, e);
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let session = Session {
        conn_id,
        user_id: user.id,
        dispatcher: dispatcher.clone(),
        typing: typing.clone(),
        events: event_tx,
    };
    let username = user.name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => session.handle_command(cmd).await,
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("{} ({}) bad command: {} -- raw: {}", username, session.user_id, e, raw);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.drop_connection(conn_id).await;
}

async fn wait_for_identify<S, E>(receiver: &mut S, within: Duration) -> Option<String>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { identity_key }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return Some(identity_key);
                }
            }
        }
        None
    };

    tokio::time::timeout(within, identify).await.ok().flatten()
}

/// Per-connection command context.
struct Session {
    conn_id: Uuid,
    user_id: Uuid,
    dispatcher: Dispatcher,
    typing: TypingDebouncer,
    events: mpsc::UnboundedSender<GatewayEvent>,
}

impl Session {
    async fn handle_command(&self, cmd: GatewayCommand) {
        match cmd {
            GatewayCommand::Identify { .. } => {} // Already handled

            GatewayCommand::Subscribe { subscription_id, view } => {
                if let Err(message) = self.check_view(&view) {
                    warn!("{} refused subscription {}: {}", self.user_id, subscription_id, message);
                    let _ = self.events.send(GatewayEvent::SubscriptionError { subscription_id, message });
                    return;
                }
                self.dispatcher
                    .subscribe(self.conn_id, subscription_id, view, self.events.clone())
                    .await;
            }

            GatewayCommand::Unsubscribe { subscription_id } => {
                self.dispatcher.unsubscribe(self.conn_id, subscription_id).await;
            }

            GatewayCommand::SetTyping { conversation_id, is_typing } => {
                if let Err(e) = self.typing.signal(conversation_id, self.user_id, is_typing).await {
                    warn!("SetTyping from {} in {} rejected: {}", self.user_id, conversation_id, e);
                }
            }

            GatewayCommand::MarkRead { conversation_id } => {
                let user_id = self.user_id;
                match blocking(self.dispatcher.db(), move |db| db.mark_read(conversation_id, user_id)).await {
                    Ok(Ok(_)) => self
                        .dispatcher
                        .invalidate([EntityKey::ReadState(conversation_id, user_id)]),
                    Ok(Err(e)) => warn!("MarkRead from {} in {} rejected: {}", user_id, conversation_id, e),
                    Err(e) => warn!("spawn_blocking join error: {}", e),
                }
            }
        }
    }

    /// Per-user views are only served to the identified user.
    fn check_view(&self, view: &ViewQuery) -> Result<(), String> {
        let owner = match view {
            ViewQuery::ConversationList { user_id } => Some(*user_id),
            ViewQuery::TypingRoster { viewer_id, .. } => Some(*viewer_id),
            ViewQuery::MessageFeed { .. } => None,
        };
        match owner {
            Some(id) if id != self.user_id => Err(format!("view belongs to user {}", id)),
            _ => Ok(()),
        }
    }
}
