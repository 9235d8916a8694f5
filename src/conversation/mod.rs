//! Conversation engine
//!
//! One finite state machine per user. Each inbound event runs under that
//! user's session lock, calls at most one of the generation service or the
//! gateway, and ends in a `Transition` looked up in the state table.
//!
//! Every transition into `Description` goes through `reset`, which releases
//! the session's artifact. That is what keeps a user at zero live files
//! whenever they are back at the description prompt.

mod reply;
mod state;

pub use reply::{Button, InboundEvent, MenuAction, Reply};
pub use state::{ConversationState, Transition};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::artifacts::{EphemeralArtifact, EphemeralArtifactStore};
use crate::error::StickerError;
use crate::gateway::PackGateway;
use crate::generation::StickerGenerationService;
use crate::registry::naming::{derive_set_name, pack_key, validate_title, MAX_TITLE_LEN};
use crate::registry::{PackRegistry, StickerRecord};
use crate::UserId;

const GREETING: &str =
    "Hi! Send me a description and I'll turn it into a sticker, e.g. \"a red fox in sunglasses\".";
const DESCRIPTION_PROMPT: &str = "Send me a description for a new sticker.";

/// In-memory state of one user's conversation
#[derive(Debug, Default)]
pub struct UserSession {
    state: ConversationState,
    last_description: Option<String>,
    artifact: Option<EphemeralArtifact>,
}

/// Routes user events through the sticker workflow
pub struct ConversationEngine {
    generation: StickerGenerationService,
    gateway: Arc<dyn PackGateway>,
    registry: Arc<dyn PackRegistry>,
    artifacts: Arc<EphemeralArtifactStore>,
    bot_username: String,
    sessions: RwLock<HashMap<UserId, Arc<Mutex<UserSession>>>>,
}

impl ConversationEngine {
    pub fn new(
        generation: StickerGenerationService,
        gateway: Arc<dyn PackGateway>,
        registry: Arc<dyn PackRegistry>,
        artifacts: Arc<EphemeralArtifactStore>,
        bot_username: &str,
    ) -> Self {
        Self {
            generation,
            gateway,
            registry,
            artifacts,
            bot_username: bot_username.to_string(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn on_text(&self, user: UserId, text: &str) -> Vec<Reply> {
        self.handle(user, InboundEvent::Text(text.to_string())).await
    }

    pub async fn on_menu(&self, user: UserId, action: MenuAction) -> Vec<Reply> {
        self.handle(user, InboundEvent::Menu(action)).await
    }

    pub async fn on_cancel(&self, user: UserId) -> Vec<Reply> {
        self.handle(user, InboundEvent::Cancel).await
    }

    pub async fn on_start(&self, user: UserId) -> Vec<Reply> {
        self.handle(user, InboundEvent::Start).await
    }

    /// Current state for `user` (Description if they never wrote)
    pub async fn state(&self, user: UserId) -> ConversationState {
        let session = self.sessions.read().await.get(&user).cloned();
        match session {
            Some(session) => session.lock().await.state,
            None => ConversationState::Description,
        }
    }

    /// Path of the user's live artifact, if any
    pub async fn artifact_path(&self, user: UserId) -> Option<std::path::PathBuf> {
        let session = self.sessions.read().await.get(&user).cloned()?;
        let session = session.lock().await;
        session.artifact.as_ref().map(|a| a.path().to_path_buf())
    }

    async fn session(&self, user: UserId) -> Arc<Mutex<UserSession>> {
        if let Some(session) = self.sessions.read().await.get(&user) {
            return session.clone();
        }
        self.sessions
            .write()
            .await
            .entry(user)
            .or_insert_with(|| {
                debug!("New session for user {}", user);
                Arc::new(Mutex::new(UserSession::default()))
            })
            .clone()
    }

    /// Handle one event; events for the same user run one at a time
    pub async fn handle(&self, user: UserId, event: InboundEvent) -> Vec<Reply> {
        let session = self.session(user).await;
        let mut session = session.lock().await;
        let mut replies = Vec::new();

        let transition = match event {
            InboundEvent::Start => {
                replies.push(Reply::text(GREETING));
                Transition::Reset
            }
            InboundEvent::Cancel => {
                replies.push(Reply::text(
                    "Cancelled. Send me a description whenever you want a new sticker.",
                ));
                Transition::Reset
            }
            InboundEvent::Text(text) => {
                self.on_text_in_state(user, &mut session, text, &mut replies)
                    .await
            }
            InboundEvent::Menu(action) => {
                self.on_menu_in_state(user, &mut session, action, &mut replies)
                    .await
            }
        };

        self.apply(user, &mut session, transition);
        replies
    }

    fn apply(&self, user: UserId, session: &mut UserSession, transition: Transition) {
        let from = session.state;
        let to = from.next(transition).unwrap_or_else(|| {
            warn!(
                "No transition from {:?} on {:?} for user {}, resetting",
                from, transition, user
            );
            ConversationState::Description
        });

        if to == ConversationState::Description {
            self.reset(session);
        } else if to.holds_artifact() && session.artifact.is_none() {
            warn!("User {} reached {:?} without a sticker, resetting", user, to);
            self.reset(session);
        } else {
            session.state = to;
        }
        debug!("User {}: {:?} --{:?}--> {:?}", user, from, transition, to);
    }

    /// Release the artifact and clear the session
    fn reset(&self, session: &mut UserSession) {
        self.release_artifact(session);
        session.last_description = None;
        session.state = ConversationState::Description;
    }

    fn release_artifact(&self, session: &mut UserSession) {
        if let Some(artifact) = session.artifact.take() {
            self.artifacts.release(&artifact.handle());
        }
    }

    async fn on_text_in_state(
        &self,
        user: UserId,
        session: &mut UserSession,
        text: String,
        replies: &mut Vec<Reply>,
    ) -> Transition {
        match session.state {
            ConversationState::CreatePack => self.create_pack(user, session, &text, replies).await,
            // Anything else is a fresh description
            _ => self.generate(user, session, text, replies).await,
        }
    }

    async fn on_menu_in_state(
        &self,
        user: UserId,
        session: &mut UserSession,
        action: MenuAction,
        replies: &mut Vec<Reply>,
    ) -> Transition {
        use ConversationState as S;

        match (session.state, action) {
            (S::Description, _) => {
                replies.push(Reply::text(DESCRIPTION_PROMPT));
                Transition::Reset
            }

            (S::Options, MenuAction::AddToPack) => {
                if session.artifact.is_none() {
                    return self.fail(user, StickerError::Resource("no live sticker".into()), replies);
                }
                replies.push(self.pack_menu(user).await);
                Transition::PacksOffered
            }
            (S::Options, MenuAction::Regenerate) => match session.last_description.clone() {
                Some(description) => self.generate(user, session, description, replies).await,
                None => {
                    replies.push(Reply::text(DESCRIPTION_PROMPT));
                    Transition::Reset
                }
            },
            (S::Options, MenuAction::Finish) => {
                replies.push(Reply::text(
                    "All done! Send me a new description whenever you like.",
                ));
                Transition::Reset
            }
            (S::Options, MenuAction::Skip) => {
                replies.push(Reply::text("Skipped. Send me another description."));
                Transition::Reset
            }
            (S::Options, _) => {
                replies.push(options_menu());
                Transition::StaleInput
            }

            (S::PackSelection, MenuAction::ChoosePack(key)) => {
                self.append_to_existing(user, session, &key, replies).await
            }
            (S::PackSelection, MenuAction::CreatePack) => {
                replies.push(name_prompt());
                Transition::NamePrompted
            }
            (S::PackSelection, MenuAction::Back) => {
                replies.push(options_menu());
                Transition::BackToOptions
            }
            (S::PackSelection, _) => {
                replies.push(self.pack_menu(user).await);
                Transition::StaleInput
            }

            (S::CreatePack, MenuAction::Back) => {
                replies.push(options_menu());
                Transition::BackToOptions
            }
            (S::CreatePack, _) => {
                replies.push(name_prompt());
                Transition::StaleInput
            }
        }
    }

    /// Replace the session's artifact with a freshly generated one
    async fn generate(
        &self,
        user: UserId,
        session: &mut UserSession,
        description: String,
        replies: &mut Vec<Reply>,
    ) -> Transition {
        self.release_artifact(session);
        session.last_description = Some(description.clone());

        match self.generation.generate(user, &description).await {
            Ok(artifact) => {
                replies.push(Reply::Image(artifact.path().to_path_buf()));
                replies.push(options_menu());
                session.artifact = Some(artifact);
                Transition::Generated
            }
            Err(failure) => {
                let err = StickerError::from(failure);
                warn!("Sticker generation failed for user {}: {}", user, err);
                replies.push(Reply::text(format!(
                    "{} {}",
                    err.user_message(),
                    DESCRIPTION_PROMPT
                )));
                Transition::GenerationFailed
            }
        }
    }

    async fn append_to_existing(
        &self,
        user: UserId,
        session: &mut UserSession,
        key: &str,
        replies: &mut Vec<Reply>,
    ) -> Transition {
        let Some(artifact) = session.artifact.as_ref() else {
            return self.fail(user, StickerError::Resource("no live sticker".into()), replies);
        };

        let packs = self.registry.get_packs(user).await;
        let Some(pack) = packs.values().find(|p| pack_key(&p.set_name) == key) else {
            warn!("User {} chose unknown pack key {}", user, key);
            replies.push(Reply::text(format!(
                "That pack is no longer available. {}",
                DESCRIPTION_PROMPT
            )));
            return Transition::Failed;
        };

        if let Err(e) = self
            .gateway
            .append_to_pack(user, &pack.set_name, artifact)
            .await
        {
            return self.fail(user, e.into(), replies);
        }

        replies.push(Reply::text(format!(
            "Added to \"{}\": {}",
            pack.display_name,
            pack_link(&pack.set_name)
        )));
        self.mirror(user, &pack.set_name, None, replies).await;
        Transition::Committed
    }

    async fn create_pack(
        &self,
        user: UserId,
        session: &mut UserSession,
        text: &str,
        replies: &mut Vec<Reply>,
    ) -> Transition {
        let Some(artifact) = session.artifact.as_ref() else {
            return self.fail(user, StickerError::Resource("no live sticker".into()), replies);
        };

        let Some(title) = validate_title(text) else {
            replies.push(Reply::text(format!(
                "A pack name must be 1 to {} characters long. Try another one.",
                MAX_TITLE_LEN
            )));
            return Transition::NameInvalid;
        };

        let set_name = derive_set_name(title, user, &self.bot_username);
        info!("User {} creating pack {} ({})", user, set_name, title);

        if let Err(e) = self
            .gateway
            .create_pack(user, &set_name, title, artifact)
            .await
        {
            let err = StickerError::from(e);
            if err.is_name_taken() {
                warn!("Pack name {} taken for user {}", set_name, user);
                replies.push(Reply::text(err.user_message()));
                return Transition::NameTaken;
            }
            return self.fail(user, err, replies);
        }

        replies.push(Reply::text(format!(
            "Created \"{}\" with your sticker: {}",
            title,
            pack_link(&set_name)
        )));
        self.mirror(user, &set_name, Some(title), replies).await;
        Transition::Committed
    }

    /// Record a remote success locally and flush the registry
    async fn mirror(
        &self,
        user: UserId,
        set_name: &str,
        created_title: Option<&str>,
        replies: &mut Vec<Reply>,
    ) {
        let result = async {
            if let Some(title) = created_title {
                self.registry
                    .record_created_pack(user, set_name, title)
                    .await?;
            }
            self.registry
                .record_append(user, set_name, StickerRecord::added_now())
                .await?;
            self.registry.persist().await?;
            Ok::<(), StickerError>(())
        }
        .await;

        if let Err(e) = result {
            error!(
                "Pack {} changed on Telegram but registry update failed: {}",
                set_name, e
            );
            replies.push(Reply::text(
                "Your sticker is in the pack, but I couldn't update my own records.",
            ));
        }
    }

    fn fail(&self, user: UserId, err: StickerError, replies: &mut Vec<Reply>) -> Transition {
        warn!("Step failed for user {}: {}", user, err);
        replies.push(Reply::text(format!(
            "{} {}",
            err.user_message(),
            DESCRIPTION_PROMPT
        )));
        Transition::Failed
    }

    /// Existing packs, then "create new" and "cancel"
    async fn pack_menu(&self, user: UserId) -> Reply {
        let packs = self.registry.get_packs(user).await;

        let text = if packs.is_empty() {
            "You don't have any packs yet. Create one?".to_string()
        } else {
            "Which pack should this sticker go to?".to_string()
        };

        let mut buttons: Vec<Button> = packs
            .values()
            .map(|p| Button::new(&p.display_name, MenuAction::ChoosePack(pack_key(&p.set_name))))
            .collect();
        buttons.push(Button::new("➕ Create new pack", MenuAction::CreatePack));
        buttons.push(Button::new("↩️ Cancel", MenuAction::Back));

        Reply::Menu { text, buttons }
    }
}

fn options_menu() -> Reply {
    Reply::Menu {
        text: "What next?".to_string(),
        buttons: vec![
            Button::new("📦 Add to pack", MenuAction::AddToPack),
            Button::new("🔄 Regenerate", MenuAction::Regenerate),
            Button::new("⏭ Skip", MenuAction::Skip),
            Button::new("✅ Finish", MenuAction::Finish),
        ],
    }
}

fn name_prompt() -> Reply {
    Reply::Menu {
        text: "Send me a name for the new pack.".to_string(),
        buttons: vec![Button::new("↩️ Cancel", MenuAction::Back)],
    }
}

fn pack_link(set_name: &str) -> String {
    format!("https://t.me/addstickers/{}", set_name)
}
