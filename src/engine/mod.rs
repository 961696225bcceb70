//! Conversation strategies.
//!
//! Both engines drive the same [`Stage`] contract: `start()` moves an idle
//! session to `ask_disease`, and every later turn consumes one normalized
//! transcript. The rule engine walks the full intake; the delegated engine
//! hands free-form reasoning to the language model and only uses the
//! `ask_disease` and `confirm` stages.

pub mod delegated;
pub mod normalize;
pub mod rules;

pub use delegated::DelegatedEngine;
pub use normalize::{TranscriptEvent, TranscriptNormalizer};
pub use rules::RuleEngine;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::classifier::{ConfirmDecision, ConfirmPolicy, classify_confirmation};
use crate::config::EngineKind;
use crate::error::IntakeResult;
use crate::models::{ConversationSession, Report, Stage};

/// Re-prompt used when a turn cannot be understood
pub const REPROMPT: &str = "Sorry — I did not understand. Please repeat.";

/// Said when the model returned something unusable; the stage does not move
pub const RETRY_PROMPT: &str =
    "I received an unexpected response while preparing your answer. Please say that again.";

pub const CLOSING_PROMPT: &str = "Okay. Take care — get well soon.";

pub const CONTINUE_PROMPT: &str = "Tell me what else you would like help with.";

pub const ANYTHING_ELSE_PROMPT: &str = "Would you like anything else?";

/// What a single turn produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    /// Assistant lines, in the order they should be spoken
    pub replies: Vec<String>,
    /// Set on the turn that completes an intake
    pub report: Option<Report>,
    /// The session reached its terminal stage on this turn
    pub ended: bool,
}

impl TurnOutcome {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            replies: vec![text.into()],
            ..Default::default()
        }
    }
}

/// A conversation strategy.
///
/// Engines mutate the session they are given, including the message trail.
/// Callers hand them a working copy and commit it only when the turn
/// succeeds, so a failed or cancelled turn never moves the stage.
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Reset the intake and emit the opening prompt
    fn start(&self, session: &mut ConversationSession) -> TurnOutcome;

    /// Apply one normalized transcript
    async fn respond(&self, session: &mut ConversationSession, text: &str)
    -> IntakeResult<TurnOutcome>;
}

/// Both engines, picked per session
#[derive(Clone)]
pub struct Engines {
    pub rules: Arc<dyn ConversationEngine>,
    pub delegated: Arc<dyn ConversationEngine>,
}

impl Engines {
    pub fn get(&self, kind: EngineKind) -> Arc<dyn ConversationEngine> {
        match kind {
            EngineKind::Rules => self.rules.clone(),
            EngineKind::Llm => self.delegated.clone(),
        }
    }
}

/// Shared `confirm` stage handling: terminate or start a fresh intake
pub(crate) fn confirm_turn(
    session: &mut ConversationSession,
    text: &str,
    policy: ConfirmPolicy,
) -> TurnOutcome {
    match classify_confirmation(text, policy) {
        ConfirmDecision::Terminate => {
            session.stage = Stage::Ended;
            session.push_assistant(CLOSING_PROMPT);
            info!("Session {} ended", session.session_id);
            TurnOutcome {
                replies: vec![CLOSING_PROMPT.to_string()],
                report: None,
                ended: true,
            }
        }
        ConfirmDecision::Continue => {
            session.reset_intake();
            session.stage = Stage::AskDisease;
            session.push_assistant(CONTINUE_PROMPT);
            TurnOutcome::reply(CONTINUE_PROMPT)
        }
    }
}
