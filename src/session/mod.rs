mod store;

pub use store::{ SessionKey, SessionStore };

use chrono::{ DateTime, Utc };
use log::{ debug, info };
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::llm::chat::{ ChatClient, ModelSession };
use crate::models::chat::ConversationHistory;
use crate::models::image::ImageAttachment;

pub const MESSAGES: SessionKey<ConversationHistory> = SessionKey::new("messages");
pub const IMAGES: SessionKey<Vec<ImageAttachment>> = SessionKey::new("images");
pub const TOGGLE: SessionKey<bool> = SessionKey::new("toggle");
pub const CLIENT: SessionKey<Option<Arc<dyn ChatClient>>> = SessionKey::new("client");
pub const CHAT: SessionKey<Option<ModelSession>> = SessionKey::new("chat");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No usable API key yet.
    Uninitialized,
    /// Client configured, no model session opened.
    Configured,
    Ready,
    /// A remote call is in flight.
    Sending,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Uninitialized => "uninitialized",
            SessionPhase::Configured => "configured",
            SessionPhase::Ready => "ready",
            SessionPhase::Sending => "sending",
        };
        f.write_str(name)
    }
}

/// Read-only view of what the session will use on its next send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub api_key_configured: bool,
    pub show_images: bool,
    pub pending_uploads: Vec<ImageAttachment>,
}

/// State owned by one connection for as long as it stays open.
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    phase: SessionPhase,
    store: SessionStore,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            phase: SessionPhase::Uninitialized,
            store: SessionStore::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!("Session {}: {} -> {}", self.id, self.phase, phase);
            self.phase = phase;
        }
    }

    /// Creates the conversation slots; existing values are kept.
    pub fn set_session_state(&mut self, show_images: bool) {
        info!("Setting session variables for {}", self.id);
        self.store.get_or_init(MESSAGES, ConversationHistory::new());
        self.store.get_or_init(IMAGES, Vec::new());
        self.store.get_or_init(TOGGLE, show_images);
        self.store.get_or_init(CLIENT, None);
        self.store.get_or_init(CHAT, None);
    }

    pub fn history(&mut self) -> &mut ConversationHistory {
        self.store.get_or_init(MESSAGES, ConversationHistory::new())
    }

    pub fn show_images(&mut self) -> bool {
        *self.store.get_or_init(TOGGLE, false)
    }

    pub fn set_show_images(&mut self, show: bool) {
        *self.store.get_or_init(TOGGLE, show) = show;
    }

    pub fn pending_uploads(&mut self) -> &mut Vec<ImageAttachment> {
        self.store.get_or_init(IMAGES, Vec::new())
    }

    pub fn client(&mut self) -> Option<Arc<dyn ChatClient>> {
        self.store.get_or_init(CLIENT, None).clone()
    }

    pub fn api_key_configured(&mut self) -> bool {
        self.store.get_or_init(CLIENT, None).is_some()
    }

    /// Installs a client. Any open model session belonged to the previous one and is dropped.
    pub fn install_client(&mut self, client: Arc<dyn ChatClient>) {
        info!("Session {} configured for model {}", self.id, client.get_model());
        *self.store.get_or_init(CLIENT, None) = Some(client);
        *self.store.get_or_init(CHAT, None) = None;
        self.set_phase(SessionPhase::Configured);
    }

    pub fn clear_client(&mut self) {
        *self.store.get_or_init(CLIENT, None) = None;
        *self.store.get_or_init(CHAT, None) = None;
        self.set_phase(SessionPhase::Uninitialized);
    }

    pub fn config(&mut self) -> SessionConfig {
        SessionConfig {
            api_key_configured: self.api_key_configured(),
            show_images: self.show_images(),
            pending_uploads: self.pending_uploads().clone(),
        }
    }

    /// Lends the model session and the history together for one send.
    pub(crate) fn take_chat(&mut self) -> Option<ModelSession> {
        self.store.get_or_init(CHAT, None).take()
    }

    pub(crate) fn put_chat(&mut self, chat: ModelSession) {
        *self.store.get_or_init(CHAT, None) = Some(chat);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::testing::ScriptedClient;
    use crate::llm::chat::start_session;
    use crate::models::chat::ChatMessage;

    #[test]
    fn set_session_state_keeps_existing_values() {
        let mut session = Session::new();
        session.history().push(ChatMessage::assistant("kept"));
        session.set_show_images(false);
        session.set_session_state(true);
        assert_eq!(session.history().len(), 1);
        assert!(!session.show_images());
    }

    #[test]
    fn default_toggle_comes_from_setup() {
        let mut session = Session::new();
        session.set_session_state(true);
        assert!(session.show_images());
        session.set_show_images(false);
        assert!(!session.show_images());
    }

    #[test]
    fn installing_a_client_resets_the_model_session() {
        let mut session = Session::new();
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
        assert!(!session.config().api_key_configured);

        let client: Arc<dyn ChatClient> = Arc::new(ScriptedClient::replying(&["x"]));
        session.install_client(client.clone());
        session.put_chat(start_session(client.clone()));
        assert_eq!(session.phase(), SessionPhase::Configured);

        session.install_client(client);
        assert!(session.take_chat().is_none());
        assert!(session.api_key_configured());

        session.clear_client();
        assert!(!session.api_key_configured());
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
    }

    #[test]
    fn sessions_do_not_share_state() {
        let mut a = Session::new();
        let mut b = Session::new();
        a.history().push(ChatMessage::user("only in a", None));
        assert_eq!(a.history().len(), 1);
        assert!(b.history().is_empty());
        assert_ne!(a.id(), b.id());
    }
}
