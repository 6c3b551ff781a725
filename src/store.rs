//! Owner of the chat history and the send lifecycle.
//!
//! Every mutation of [`History`] goes through a method here and is followed by
//! a persist. A send is split into `begin_send` (optimistic update),
//! [`PendingSend::run`] (the remote call, which touches no shared state) and
//! `finish_send` (reconciliation), so the UI loop can run the middle part as a
//! background task.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use crate::composer::Mode;
use crate::gateway::{ConversationContext, Gateway, GatewayError, SendOptions};
use crate::history::{
    derive_title, replay_turns, ChatMessage, GeneratedImage, History, Session, Source,
    DEFAULT_TITLE, UNTITLED_SOURCE,
};
use crate::sidebar::{self, SessionSummary};
use crate::storage::Storage;

pub type SharedContext = Arc<Mutex<Box<dyn ConversationContext>>>;

/// Time-based ids that stay unique when two are minted in the same millisecond.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: i64,
}

impl IdGenerator {
    /// Current time in epoch milliseconds, bumped past the previous value.
    pub fn next_millis(&mut self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        self.last = now.max(self.last + 1);
        self.last
    }

    pub fn next(&mut self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_millis())
    }
}

/// A send whose optimistic update has been applied but whose remote call has
/// not run yet.
pub struct PendingSend {
    session_id: String,
    placeholder_id: String,
    prompt: String,
    mode: Mode,
    context: Option<SharedContext>,
    gateway: Arc<dyn Gateway>,
}

/// Result of a remote call, ready to be reconciled into the store.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub session_id: String,
    pub placeholder_id: String,
    pub result: Result<ChatMessage, GatewayError>,
}

impl PendingSend {
    #[cfg(test)]
    pub fn placeholder_id(&self) -> &str {
        &self.placeholder_id
    }

    pub async fn run(self) -> SendOutcome {
        tracing::debug!(session = %self.session_id, mode = ?self.mode, "dispatching prompt");
        let result = self.dispatch().await;
        SendOutcome {
            session_id: self.session_id,
            placeholder_id: self.placeholder_id,
            result,
        }
    }

    async fn dispatch(&self) -> Result<ChatMessage, GatewayError> {
        let id = self.placeholder_id.clone();

        if self.mode == Mode::Image {
            let payloads = self.gateway.generate_images(&self.prompt).await?;
            let images: Vec<GeneratedImage> = payloads
                .iter()
                .map(|payload| GeneratedImage {
                    url: format!("data:image/jpeg;base64,{}", payload),
                    alt: self.prompt.clone(),
                })
                .collect();
            let mut message = ChatMessage::model(
                id,
                format!("Generated {} image(s) for: \"{}\"", images.len(), self.prompt),
            );
            message.images = Some(images);
            return Ok(message);
        }

        let context = self
            .context
            .as_ref()
            .ok_or_else(|| GatewayError::generic("Chat session not initialized."))?;
        let options = SendOptions {
            web_search: self.mode == Mode::Search,
        };
        let reply = context.lock().await.send(&self.prompt, options).await?;

        let mut message = ChatMessage::model(id, reply.text);
        if self.mode == Mode::Search {
            message.sources = Some(
                reply
                    .citations
                    .into_iter()
                    .map(|c| Source {
                        uri: c.uri,
                        title: c.title.unwrap_or_else(|| UNTITLED_SOURCE.to_string()),
                    })
                    .collect(),
            );
        }
        Ok(message)
    }
}

pub struct SessionStore {
    history: History,
    messages: Vec<ChatMessage>,
    context: Option<SharedContext>,
    sending: bool,
    storage: Box<dyn Storage>,
    gateway: Arc<dyn Gateway>,
    ids: IdGenerator,
}

impl SessionStore {
    /// Rehydrates from storage. Unreadable records are discarded, never fatal.
    pub fn open(storage: Box<dyn Storage>, gateway: Arc<dyn Gateway>) -> Self {
        let mut store = SessionStore {
            history: History::default(),
            messages: Vec::new(),
            context: None,
            sending: false,
            storage,
            gateway,
            ids: IdGenerator::default(),
        };

        match store.read_persisted() {
            Ok(Some(history)) if history.active_session().is_some() => store.adopt(history),
            Ok(Some(history)) => {
                tracing::warn!(
                    active = ?history.active_chat_id,
                    "Discarding chat history without a resolvable active session"
                );
                store.clear_persisted();
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Failed to load chat history: {}", e);
                store.clear_persisted();
            }
        }
        store
    }

    fn clear_persisted(&mut self) {
        if let Err(e) = self.storage.remove() {
            tracing::warn!("Failed to clear chat history: {}", e);
        }
    }

    fn read_persisted(&self) -> anyhow::Result<Option<History>> {
        match self.storage.get()? {
            Some(json) => Ok(Some(History::from_json(&json)?)),
            None => Ok(None),
        }
    }

    fn adopt(&mut self, history: History) {
        self.history = history;
        self.load_active();
        tracing::info!(
            sessions = self.history.sessions.len(),
            active = ?self.history.active_chat_id,
            "chat history loaded"
        );
    }

    /// Points the visible list and the live context at the active session.
    fn load_active(&mut self) {
        match self.history.active_session() {
            Some(session) => {
                self.messages = session.messages.clone();
                let turns = replay_turns(&session.messages);
                self.context = Some(Arc::new(Mutex::new(self.gateway.create_context(turns))));
            }
            None => {
                self.messages.clear();
                self.context = None;
            }
        }
    }

    fn persist(&mut self) {
        let result = if self.history.sessions.is_empty() {
            self.storage.remove()
        } else {
            self.history
                .to_json()
                .map_err(anyhow::Error::from)
                .and_then(|json| self.storage.set(&json))
        };
        if let Err(e) = result {
            tracing::warn!("Failed to persist chat history: {}", e);
        }
    }

    fn insert_session(&mut self, title: &str) -> String {
        let created_at = self.ids.next_millis();
        let id = format!("chat-{}", created_at);
        self.history
            .sessions
            .insert(id.clone(), Session::new(title, created_at));
        self.history.active_chat_id = Some(id.clone());
        self.messages.clear();
        self.context = Some(Arc::new(Mutex::new(self.gateway.create_context(Vec::new()))));
        tracing::info!(session = %id, "session created");
        id
    }

    pub fn new_session(&mut self) -> String {
        let id = self.insert_session(DEFAULT_TITLE);
        self.persist();
        id
    }

    pub fn select_session(&mut self, id: &str) {
        if self.history.active_chat_id.as_deref() == Some(id) {
            return;
        }
        if !self.history.sessions.contains_key(id) {
            tracing::debug!(session = %id, "ignoring selection of unknown session");
            return;
        }
        self.history.active_chat_id = Some(id.to_string());
        self.load_active();
        self.persist();
    }

    pub fn delete_session(&mut self, id: &str) {
        if self.history.sessions.remove(id).is_none() {
            tracing::debug!(session = %id, "ignoring deletion of unknown session");
            return;
        }
        tracing::info!(session = %id, "session deleted");

        if self.history.active_chat_id.as_deref() == Some(id) {
            self.history.active_chat_id = self.history.newest_session_id();
            self.load_active();
        }
        self.persist();
    }

    /// Applies the optimistic half of a send. Returns `None` when a send is
    /// already in flight or the prompt is blank.
    pub fn begin_send(&mut self, prompt: &str, mode: Mode) -> Option<PendingSend> {
        if self.sending || prompt.trim().is_empty() {
            return None;
        }
        self.sending = true;

        let user = ChatMessage::user(self.ids.next("user"), prompt);
        let placeholder = ChatMessage::placeholder(self.ids.next("ai"));

        let session_id = match self.active_session_id() {
            Some(id) => id.to_string(),
            None => self.insert_session(&derive_title(prompt)),
        };
        if let Some(session) = self.history.sessions.get_mut(&session_id) {
            if session.messages.is_empty() {
                session.metadata.title = derive_title(prompt);
            }
            session.messages.push(user.clone());
        }

        self.messages.push(user);
        let placeholder_id = placeholder.id.clone();
        self.messages.push(placeholder);
        self.persist();

        Some(PendingSend {
            session_id,
            placeholder_id,
            prompt: prompt.to_string(),
            mode,
            context: self.context.clone(),
            gateway: self.gateway.clone(),
        })
    }

    /// Reconciles a finished remote call and clears the in-flight flag.
    pub fn finish_send(&mut self, outcome: SendOutcome) {
        self.sending = false;

        let message = match outcome.result {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("Failed to send message: {}", e);
                ChatMessage::error(outcome.placeholder_id.clone(), &e.to_string())
            }
        };

        if self.history.active_chat_id.as_deref() == Some(outcome.session_id.as_str()) {
            // No placeholder: the session was reloaded mid-send and its
            // context was replayed without this reply.
            let reloaded = match self
                .messages
                .iter_mut()
                .find(|m| m.id == outcome.placeholder_id)
            {
                Some(slot) => {
                    *slot = message;
                    false
                }
                None => {
                    self.messages.push(message);
                    true
                }
            };
            let stored: Vec<ChatMessage> = self
                .messages
                .iter()
                .filter(|m| !m.is_loading)
                .cloned()
                .collect();
            if reloaded {
                let turns = replay_turns(&stored);
                self.context = Some(Arc::new(Mutex::new(self.gateway.create_context(turns))));
            }
            if let Some(session) = self.history.active_session_mut() {
                session.messages = stored;
            }
        } else if let Some(session) = self.history.sessions.get_mut(&outcome.session_id) {
            session.messages.push(message);
        } else {
            tracing::debug!(session = %outcome.session_id, "dropping reply for deleted session");
            return;
        }
        self.persist();
    }

    /// Runs a whole send in place. The UI splits this across tasks instead.
    pub async fn send_message(&mut self, prompt: &str, mode: Mode) {
        if let Some(pending) = self.begin_send(prompt, mode) {
            let outcome = pending.run().await;
            self.finish_send(outcome);
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.history.active_chat_id.as_deref()
    }

    pub fn active_title(&self) -> Option<&str> {
        self.history
            .active_session()
            .map(|s| s.metadata.title.as_str())
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        sidebar::summarize(&self.history)
    }

    #[cfg(test)]
    pub fn history(&self) -> &History {
        &self.history
    }

    #[cfg(test)]
    pub fn has_live_context(&self) -> bool {
        self.context.is_some()
    }
}
