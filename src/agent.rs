use crate::cli::Args;
use crate::config::prompt::{ self, PromptConfig };
use crate::error::ChatError;
use crate::llm::LlmConfig;
use crate::llm::chat::{ new_client as new_chat_client, start_session };
use crate::models::chat::{ ChatMessage, ConversationHistory, Prompt };
use crate::models::image::ImageAttachment;
use crate::session::{ Session, SessionPhase };

use log::{ info, warn, error };
use std::error::Error;
use std::sync::Arc;

pub const IMAGES_COMMAND: &str = "\\images";

/// Result of a submission that did not fail.
#[derive(Debug)]
pub enum SubmitOutcome<'s> {
    /// Both messages were appended; the full history is returned for re-display.
    Replied {
        history: &'s ConversationHistory,
    },
    /// No API key: nothing was sent and nothing was recorded.
    NeedsApiKey {
        notice: String,
    },
}

/// Conversation policy shared by every connection. Holds configuration only; all
/// mutable state lives in the `Session` passed to each call.
pub struct StoryAgent {
    llm_config: LlmConfig,
    prompt_config: Arc<PromptConfig>,
    show_images_default: bool,
}

impl StoryAgent {
    pub fn new(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let prompt_config = prompt::load_prompts(&args.prompts_path)?;
        let llm_config = LlmConfig::from_args(args);
        info!(
            "Chat client settings: Model={}, BaseURL={}, ServerKey={}",
            llm_config.completion_model,
            llm_config.base_url,
            if llm_config.has_api_key() { "set" } else { "per session" }
        );
        Ok(Self::with_config(llm_config, prompt_config, args.show_images))
    }

    pub fn with_config(
        llm_config: LlmConfig,
        prompt_config: Arc<PromptConfig>,
        show_images_default: bool
    ) -> Self {
        Self { llm_config, prompt_config, show_images_default }
    }

    pub fn prompts(&self) -> &PromptConfig {
        &self.prompt_config
    }

    pub fn model(&self) -> &str {
        &self.llm_config.completion_model
    }

    pub fn server_key_configured(&self) -> bool {
        self.llm_config.has_api_key()
    }

    /// Fresh session with its slots initialised and, if the server holds a key, a client.
    pub fn open_session(&self) -> Session {
        let mut session = Session::new();
        session.set_session_state(self.show_images_default);
        if self.llm_config.has_api_key() {
            match new_chat_client(&self.llm_config) {
                Ok(client) => session.install_client(client),
                Err(e) => warn!("Server API key unusable for session {}: {}", session.id(), e),
            }
        }
        session
    }

    /// Key entered interactively for one session.
    pub fn configure_session(&self, session: &mut Session, api_key: &str) -> Result<(), ChatError> {
        let config = self.llm_config.with_api_key(api_key);
        match new_chat_client(&config) {
            Ok(client) => {
                session.install_client(client);
                Ok(())
            }
            Err(e) => {
                session.clear_client();
                Err(e)
            }
        }
    }

    /// Replaces the pending uploads and, if given, the show-images toggle.
    pub fn stage_uploads(
        &self,
        session: &mut Session,
        images: Vec<ImageAttachment>,
        show_images: Option<bool>
    ) {
        if let Some(show) = show_images {
            session.set_show_images(show);
        }
        info!("Session {}: {} image(s) uploaded", session.id(), images.len());
        *session.pending_uploads() = images;
    }

    /// Typed text wins. Without it, the first pending upload becomes an image prompt with
    /// the default story instruction. The uploads stay pending until `submit` gets a reply.
    pub fn prepare_prompt(&self, session: &mut Session, typed: Option<&str>) -> Option<Prompt> {
        if let Some(text) = typed.map(str::trim).filter(|t| !t.is_empty()) {
            return Some(Prompt::Text(text.to_string()));
        }

        let uploads = session.pending_uploads();
        let first = uploads.first()?.clone();
        let ignored = uploads.len() - 1;
        if ignored > 0 {
            warn!(
                "Session {}: only the first uploaded image is used, ignoring {} more",
                session.id(),
                ignored
            );
        }
        Some(Prompt::Image {
            image: first,
            text: self.prompt_config.image_story_prompt.clone(),
        })
    }

    pub async fn submit<'s>(
        &self,
        session: &'s mut Session,
        prompt: Prompt
    ) -> Result<SubmitOutcome<'s>, ChatError> {
        let client = match session.client() {
            Some(client) => client,
            None => {
                info!("Session {}: refusing prompt, no API key configured", session.id());
                return Ok(SubmitOutcome::NeedsApiKey {
                    notice: self.prompt_config.missing_api_key_notice.clone(),
                });
            }
        };

        let mut chat = match session.take_chat() {
            Some(chat) => chat,
            None => start_session(client),
        };
        session.set_phase(SessionPhase::Sending);

        let result = chat.send(session.history(), &prompt).await;

        match result {
            Ok(response) => {
                session.put_chat(chat);
                session.set_phase(SessionPhase::Ready);
                if prompt.image().is_some() {
                    session.pending_uploads().clear();
                }

                let attached_image = if session.show_images() {
                    prompt.image().cloned()
                } else {
                    None
                };
                let user_text = match prompt {
                    Prompt::Text(text) => text,
                    Prompt::Image { text, .. } => text,
                };

                let history = session.history();
                history.push(ChatMessage::user(user_text, attached_image));
                history.push(ChatMessage::assistant(response));
                Ok(SubmitOutcome::Replied { history })
            }
            Err(e) if e.is_configuration() => {
                error!("Session {}: API key rejected: {}", session.id(), e);
                session.clear_client();
                Err(e)
            }
            Err(e) => {
                error!("Session {}: model call failed: {}", session.id(), e);
                session.put_chat(chat);
                session.set_phase(SessionPhase::Ready);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::testing::ScriptedClient;
    use crate::llm::chat::ChatClient;
    use crate::models::chat::Role;
    use crate::models::image::tests::png_attachment;

    fn agent() -> StoryAgent {
        StoryAgent::with_config(LlmConfig::default(), Arc::new(PromptConfig::default()), false)
    }

    fn session_with(client: &Arc<ScriptedClient>) -> Session {
        let mut session = agent().open_session();
        let client: Arc<dyn ChatClient> = client.clone();
        session.install_client(client);
        session
    }

    #[tokio::test]
    async fn streamed_fragments_become_one_reply() {
        let agent = agent();
        let client = Arc::new(ScriptedClient::replying(&["Once ", "upon ", "a time"]));
        let mut session = session_with(&client);

        let outcome = agent.submit(&mut session, Prompt::Text("hello".into())).await.unwrap();
        match outcome {
            SubmitOutcome::Replied { history } => {
                assert_eq!(history.len(), 2);
                assert_eq!(history.messages()[0].role, Role::User);
                assert_eq!(history.messages()[0].content, "hello");
                assert_eq!(history.messages()[1].role, Role::Assistant);
                assert_eq!(history.messages()[1].content, "Once upon a time");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    #[tokio::test]
    async fn history_grows_by_two_per_submission_in_alternating_order() {
        let agent = agent();
        let client = Arc::new(ScriptedClient::replying(&["ok"]));
        let mut session = session_with(&client);

        for i in 0..5 {
            agent.submit(&mut session, Prompt::Text(format!("prompt {}", i))).await.unwrap();
        }

        let history = session.history();
        assert_eq!(history.len(), 10);
        for (i, message) in history.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(message.role, expected);
        }

        let calls = client.calls.lock().unwrap();
        let context_sizes: Vec<usize> = calls.iter().map(|(n, _)| *n).collect();
        assert_eq!(context_sizes, vec![0, 2, 4, 6, 8]);
    }

    #[tokio::test]
    async fn unconfigured_session_is_refused_without_calling_the_model() {
        let agent = agent();
        let mut session = agent.open_session();

        let outcome = agent.submit(&mut session, Prompt::Text("hello".into())).await.unwrap();
        match outcome {
            SubmitOutcome::NeedsApiKey { notice } => {
                assert_eq!(notice, agent.prompts().missing_api_key_notice);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(session.history().is_empty());
        assert_eq!(session.phase(), SessionPhase::Uninitialized);
    }

    #[tokio::test]
    async fn image_prompt_keeps_text_and_image_apart() {
        let agent = agent();
        let client = Arc::new(ScriptedClient::replying(&["A story."]));
        let mut session = session_with(&client);
        session.set_show_images(true);

        let image = png_attachment("a.png");
        let prompt = Prompt::Image { image: image.clone(), text: "make it short".into() };
        agent.submit(&mut session, prompt).await.unwrap();

        let user = &session.history().messages()[0];
        assert_eq!(user.content, "make it short");
        assert_eq!(user.attached_image.as_ref(), Some(&image));
    }

    #[tokio::test]
    async fn image_is_not_kept_when_toggle_is_off() {
        let agent = agent();
        let client = Arc::new(ScriptedClient::replying(&["A story."]));
        let mut session = session_with(&client);

        let prompt = Prompt::Image { image: png_attachment("a.png"), text: "go".into() };
        agent.submit(&mut session, prompt).await.unwrap();

        assert!(session.history().messages()[0].attached_image.is_none());
        assert!(client.prompts()[0].image().is_some());
    }

    #[tokio::test]
    async fn only_the_first_of_several_uploads_is_sent() {
        let agent = agent();
        let client = Arc::new(ScriptedClient::replying(&["story"]));
        let mut session = session_with(&client);

        let a = png_attachment("a.png");
        let b = png_attachment("b.png");
        agent.stage_uploads(&mut session, vec![a.clone(), b], Some(true));

        let prompt = agent.prepare_prompt(&mut session, None).unwrap();
        agent.submit(&mut session, prompt).await.unwrap();

        let sent = client.prompts();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            Prompt::Image {
                image: a,
                text: "Write a beautiful story based on provided image".into(),
            }
        );
        assert!(session.pending_uploads().is_empty());
        assert!(agent.prepare_prompt(&mut session, None).is_none());
    }

    #[tokio::test]
    async fn upload_survives_a_rejected_key() {
        let agent = agent();
        let rejecting = Arc::new(ScriptedClient::failing(|| {
            ChatError::Configuration("API key not valid".into())
        }));
        let mut session = session_with(&rejecting);
        agent.stage_uploads(&mut session, vec![png_attachment("a.png")], None);

        let prompt = agent.prepare_prompt(&mut session, None).unwrap();
        let err = agent.submit(&mut session, prompt).await.unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(session.pending_uploads().len(), 1);

        let working = Arc::new(ScriptedClient::replying(&["A story."]));
        let client: Arc<dyn ChatClient> = working.clone();
        session.install_client(client);
        let prompt = agent.prepare_prompt(&mut session, None).unwrap();
        agent.submit(&mut session, prompt).await.unwrap();

        assert!(working.prompts()[0].image().is_some());
        assert!(session.pending_uploads().is_empty());
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn typed_text_takes_priority_over_uploads() {
        let agent = agent();
        let mut session = agent.open_session();
        agent.stage_uploads(&mut session, vec![png_attachment("a.png")], None);

        let prompt = agent.prepare_prompt(&mut session, Some("  a dragon  ")).unwrap();
        assert_eq!(prompt, Prompt::Text("a dragon".into()));
        assert_eq!(session.pending_uploads().len(), 1);
        assert!(agent.prepare_prompt(&mut Session::new(), Some("   ")).is_none());
    }

    #[tokio::test]
    async fn failed_call_leaves_history_unchanged() {
        let agent = agent();
        let client = Arc::new(ScriptedClient::failing(|| ChatError::Status {
            status: 429,
            message: "quota".into(),
        }));
        let mut session = session_with(&client);

        let err = agent.submit(&mut session, Prompt::Text("hello".into())).await.unwrap_err();
        assert!(err.is_remote());
        assert!(session.history().is_empty());
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert!(session.api_key_configured());
    }

    #[tokio::test]
    async fn rejected_key_unconfigures_the_session() {
        let agent = agent();
        let client = Arc::new(ScriptedClient::failing(|| {
            ChatError::Configuration("API key not valid".into())
        }));
        let mut session = session_with(&client);

        let err = agent.submit(&mut session, Prompt::Text("hello".into())).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(!session.api_key_configured());
        assert_eq!(session.phase(), SessionPhase::Uninitialized);

        let outcome = agent.submit(&mut session, Prompt::Text("again".into())).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::NeedsApiKey { .. }));
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn interactive_key_configures_the_session() {
        let agent = agent();
        let mut session = agent.open_session();
        assert!(agent.configure_session(&mut session, "").is_err());
        assert!(!session.api_key_configured());

        agent.configure_session(&mut session, "user-key").unwrap();
        assert!(session.api_key_configured());
        assert_eq!(session.phase(), SessionPhase::Configured);
    }

    #[test]
    fn server_key_configures_new_sessions() {
        let agent = StoryAgent::with_config(
            LlmConfig::default().with_api_key("server-key"),
            Arc::new(PromptConfig::default()),
            true
        );
        let mut session = agent.open_session();
        assert!(session.api_key_configured());
        assert!(session.show_images());
    }
}
