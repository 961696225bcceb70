use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::classifier::{ConfirmPolicy, select_follow_up_set, suggest_specialist};
use crate::config::EngineKind;
use crate::error::{IntakeError, IntakeResult};
use crate::models::{
    ConversationSession, DEFAULT_LANGUAGE, FollowUpQuestionSet, Stage, match_language,
    spoken_language_list,
};
use crate::report::synthesize_from_session;

use super::{ANYTHING_ELSE_PROMPT, ConversationEngine, TurnOutcome, confirm_turn};

pub const OPENING_PROMPT: &str = "Please tell me the disease or main symptom you are experiencing.";

pub const AGE_PROMPT: &str = "Thanks. What is your age (in years)?";

/// Canonical stage machine:
/// `ask_disease → ask_language → collect_name → collect_age → followups →
/// synthesis → confirm`
#[derive(Debug, Clone)]
pub struct RuleEngine {
    confirm_policy: ConfirmPolicy,
    default_language: String,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(ConfirmPolicy::default(), DEFAULT_LANGUAGE)
    }
}

impl RuleEngine {
    pub fn new(confirm_policy: ConfirmPolicy, default_language: impl Into<String>) -> Self {
        Self {
            confirm_policy,
            default_language: default_language.into(),
        }
    }

    fn say(session: &mut ConversationSession, outcome: &mut TurnOutcome, text: String) {
        session.push_assistant(text.clone());
        outcome.replies.push(text);
    }

    /// Automatic step once the last follow-up is answered
    fn synthesize(&self, session: &mut ConversationSession) -> IntakeResult<TurnOutcome> {
        session.stage = Stage::Synthesis;
        let report = synthesize_from_session(session, Utc::now())?;

        let medicine = report
            .primary_medication()
            .map(|m| m.name.clone())
            .unwrap_or_else(|| "your medicine".to_string());

        let mut outcome = TurnOutcome::default();
        Self::say(
            session,
            &mut outcome,
            format!("I will prepare a prescription for {medicine} now and save it to your history."),
        );
        Self::say(
            session,
            &mut outcome,
            format!("Prescription saved. {ANYTHING_ELSE_PROMPT}"),
        );

        info!(
            "Session {} synthesized report ({} for {:?})",
            session.session_id, medicine, report.chief_complaint
        );
        outcome.report = Some(report);
        session.stage = Stage::Confirm;
        Ok(outcome)
    }
}

#[async_trait]
impl ConversationEngine for RuleEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Rules
    }

    /// The session keeps its language; it is set at creation or by the
    /// patient in `ask_language`
    fn start(&self, session: &mut ConversationSession) -> TurnOutcome {
        session.reset_intake();
        session.stage = Stage::AskDisease;
        session.push_assistant(OPENING_PROMPT);
        TurnOutcome::reply(OPENING_PROMPT)
    }

    async fn respond(
        &self,
        session: &mut ConversationSession,
        text: &str,
    ) -> IntakeResult<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(IntakeError::EmptyInput);
        }
        if !session.stage.accepts_input() {
            return Err(IntakeError::InvalidState(format!(
                "session {} is {} and does not accept input",
                session.session_id, session.stage
            )));
        }

        let from = session.stage;
        session.push_user(text);
        let mut outcome = TurnOutcome::default();

        match from {
            Stage::AskDisease => {
                session.patient.disease = Some(text.to_string());
                let doctor = suggest_specialist(Some(text));
                Self::say(
                    session,
                    &mut outcome,
                    format!(
                        "For {text}, a {doctor} is commonly suitable. Which language would you prefer? You can say {}.",
                        spoken_language_list()
                    ),
                );
                session.stage = Stage::AskLanguage;
            }
            Stage::AskLanguage => {
                let matched = match_language(text);
                session.language = matched
                    .map(|l| l.code.to_string())
                    .unwrap_or_else(|| self.default_language.clone());
                let label = matched.map(|l| l.label).unwrap_or("English");
                Self::say(
                    session,
                    &mut outcome,
                    format!("Okay — I'll continue in {label}. Please tell me your full name."),
                );
                session.stage = Stage::CollectName;
            }
            Stage::CollectName => {
                session.patient.name = Some(text.to_string());
                Self::say(session, &mut outcome, AGE_PROMPT.to_string());
                session.stage = Stage::CollectAge;
            }
            Stage::CollectAge => {
                session.patient.age = Some(text.to_string());
                session.follow_ups = FollowUpQuestionSet::new(select_follow_up_set(
                    session.patient.disease.as_deref(),
                ));
                session.stage = Stage::Followups;
                match session.follow_ups.current().map(str::to_string) {
                    Some(question) => Self::say(session, &mut outcome, question),
                    None => outcome = self.synthesize(session)?,
                }
            }
            Stage::Followups => {
                session.answers.push(text.to_string());
                match session.follow_ups.advance().map(str::to_string) {
                    Some(question) => Self::say(session, &mut outcome, question),
                    None => outcome = self.synthesize(session)?,
                }
            }
            Stage::Confirm => {
                outcome = confirm_turn(session, text, self.confirm_policy);
            }
            Stage::Idle | Stage::Synthesis | Stage::Ended => {
                return Err(IntakeError::InvalidState(format!(
                    "stage {from} does not accept input"
                )));
            }
        }

        debug!(
            "Session {}: {} -> {}",
            session.session_id, from, session.stage
        );
        Ok(outcome)
    }
}
