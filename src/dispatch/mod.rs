//! Telegram long-polling dispatcher
//!
//! Turns updates into engine events and engine replies into Bot API calls.
//! Each user gets a worker task fed by a bounded channel, so one user's
//! events are handled strictly in order while different users proceed
//! concurrently. The poll loop never waits on a worker: when a user's queue
//! is full the update is dropped and the user is told to wait. Workers exit
//! after sitting idle and are respawned on the user's next update.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::conversation::{Button, ConversationEngine, InboundEvent, MenuAction, Reply};
use crate::telegram::{InlineKeyboardButton, InlineKeyboardMarkup, TelegramClient, Update};
use crate::UserId;

/// Queue depth per user worker
const WORKER_QUEUE: usize = 16;

/// A worker with an empty queue exits after this long
const WORKER_IDLE: Duration = Duration::from_secs(600);

const BUSY_TEXT: &str =
    "I'm still working on your earlier messages. Please wait a moment and try again.";

/// Pause after a failed poll
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

/// An update reduced to what the engine needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    pub user: UserId,
    pub chat_id: i64,
    /// None for updates that only need acknowledging
    pub event: Option<InboundEvent>,
    pub callback_id: Option<String>,
}

impl Incoming {
    pub fn from_update(update: Update) -> Option<Incoming> {
        if let Some(query) = update.callback_query {
            let chat_id = query
                .message
                .as_ref()
                .map(|m| m.chat.id)
                .unwrap_or(query.from.id);
            let event = query
                .data
                .as_deref()
                .and_then(MenuAction::parse)
                .map(InboundEvent::Menu);

            return Some(Incoming {
                user: query.from.id,
                chat_id,
                event,
                callback_id: Some(query.id),
            });
        }

        let message = update.message?;
        let user = message.from.as_ref()?.id;
        let text = message.text?;

        Some(Incoming {
            user,
            chat_id: message.chat.id,
            event: parse_text(&text),
            callback_id: None,
        })
    }
}

/// Map message text to an event; unknown commands map to None
fn parse_text(text: &str) -> Option<InboundEvent> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    match text.strip_prefix('/') {
        Some(command) => {
            let name = command
                .split_whitespace()
                .next()
                .unwrap_or("")
                .split('@')
                .next()
                .unwrap_or("");
            match name {
                "start" | "help" => Some(InboundEvent::Start),
                "cancel" => Some(InboundEvent::Cancel),
                _ => None,
            }
        }
        None => Some(InboundEvent::Text(text.to_string())),
    }
}

/// One button per row
pub fn keyboard(buttons: &[Button]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: buttons
            .iter()
            .map(|b| {
                vec![InlineKeyboardButton {
                    text: b.label.clone(),
                    callback_data: b.action.callback_data(),
                }]
            })
            .collect(),
    }
}

/// Polls Telegram and feeds per-user workers
pub struct Dispatcher {
    poller: TelegramClient,
    sender: TelegramClient,
    engine: Arc<ConversationEngine>,
    poll_timeout_secs: u64,
    worker_idle: Duration,
}

type Workers = HashMap<UserId, mpsc::Sender<Incoming>>;

impl Dispatcher {
    /// `poller` needs an HTTP timeout longer than `poll_timeout_secs`
    pub fn new(
        poller: TelegramClient,
        sender: TelegramClient,
        engine: Arc<ConversationEngine>,
        poll_timeout_secs: u64,
    ) -> Self {
        Self {
            poller,
            sender,
            engine,
            poll_timeout_secs,
            worker_idle: WORKER_IDLE,
        }
    }

    /// How long a worker waits for its next update before exiting
    pub fn with_worker_idle(mut self, idle: Duration) -> Self {
        self.worker_idle = idle;
        self
    }

    /// Poll until `shutdown` flips, then drain the workers
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut offset: i64 = 0;
        let mut workers = Workers::new();
        let mut tasks = JoinSet::new();

        info!("Polling Telegram for updates");

        loop {
            reap(&mut workers, &mut tasks);

            let polled = tokio::select! {
                _ = shutdown.changed() => break,
                polled = self.poller.get_updates(offset, self.poll_timeout_secs) => polled,
            };

            let updates = match polled {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("getUpdates failed: {}", e);
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => continue,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                if let Some(incoming) = Incoming::from_update(update) {
                    self.route(&mut workers, &mut tasks, incoming);
                }
            }
        }

        info!("Stopping dispatcher, draining {} workers", workers.len());
        drop(workers);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Worker task failed: {}", e);
            }
        }
    }

    /// Queue an update on its user's worker without waiting
    fn route(&self, workers: &mut Workers, tasks: &mut JoinSet<()>, incoming: Incoming) {
        let user = incoming.user;

        let incoming = match workers.get(&user) {
            Some(tx) => match tx.try_send(incoming) {
                Ok(()) => return,
                Err(TrySendError::Full(incoming)) => {
                    warn!("Queue full for user {}, dropping update", user);
                    tasks.spawn(reply_busy(self.sender.clone(), incoming));
                    return;
                }
                // Worker went idle or died
                Err(TrySendError::Closed(incoming)) => incoming,
            },
            None => incoming,
        };

        debug!("Starting worker for user {}", user);
        let (tx, rx) = mpsc::channel(WORKER_QUEUE);
        tasks.spawn(worker(
            self.sender.clone(),
            self.engine.clone(),
            rx,
            self.worker_idle,
        ));
        if tx.try_send(incoming).is_err() {
            warn!("Fresh worker for user {} refused its first update", user);
        }
        workers.insert(user, tx);
    }
}

/// Collect finished tasks and forget workers that have exited
fn reap(workers: &mut Workers, tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.try_join_next() {
        if let Err(e) = joined {
            warn!("Worker task failed: {}", e);
        }
    }
    workers.retain(|_, tx| !tx.is_closed());
}

async fn reply_busy(client: TelegramClient, incoming: Incoming) {
    if let Some(callback_id) = &incoming.callback_id {
        if let Err(e) = client.answer_callback_query(callback_id).await {
            debug!("answerCallbackQuery failed: {}", e);
        }
    }
    if let Err(e) = client.send_message(incoming.chat_id, BUSY_TEXT, None).await {
        debug!("Busy notice to chat {} failed: {}", incoming.chat_id, e);
    }
}

async fn worker(
    client: TelegramClient,
    engine: Arc<ConversationEngine>,
    mut rx: mpsc::Receiver<Incoming>,
    idle: Duration,
) {
    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(incoming)) => process(&client, &engine, incoming).await,
            Ok(None) => return,
            Err(_) => {
                // Refuse new updates, but finish any that slipped in
                rx.close();
                while let Some(incoming) = rx.recv().await {
                    process(&client, &engine, incoming).await;
                }
                return;
            }
        }
    }
}

async fn process(client: &TelegramClient, engine: &ConversationEngine, incoming: Incoming) {
    if let Some(callback_id) = &incoming.callback_id {
        if let Err(e) = client.answer_callback_query(callback_id).await {
            debug!("answerCallbackQuery failed: {}", e);
        }
    }

    let Some(event) = incoming.event else {
        debug!("Ignoring update from user {}", incoming.user);
        return;
    };

    if matches!(event, InboundEvent::Text(_) | InboundEvent::Menu(_)) {
        if let Err(e) = client.send_chat_action(incoming.chat_id, "typing").await {
            debug!("sendChatAction failed: {}", e);
        }
    }

    let replies = engine.handle(incoming.user, event).await;
    for reply in replies {
        if let Err(e) = deliver(client, incoming.chat_id, reply).await {
            warn!("Failed to deliver reply to chat {}: {}", incoming.chat_id, e);
        }
    }
}

async fn deliver(client: &TelegramClient, chat_id: i64, reply: Reply) -> anyhow::Result<()> {
    match reply {
        Reply::Text(text) => {
            client.send_message(chat_id, &text, None).await?;
        }
        Reply::Image(path) => {
            let png = tokio::fs::read(&path).await?;
            client.send_document(chat_id, png, "sticker.png").await?;
        }
        Reply::Menu { text, buttons } => {
            client
                .send_message(chat_id, &text, Some(&keyboard(&buttons)))
                .await?;
        }
    }
    Ok(())
}
