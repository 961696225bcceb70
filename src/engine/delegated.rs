use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::classifier::ConfirmPolicy;
use crate::config::EngineKind;
use crate::error::{IntakeError, IntakeResult};
use crate::llm::{DELEGATED_GREETING, LlmGateway, TriagePayload, history_to_prompt, triage_or_fallback};
use crate::models::{ConversationSession, Role, Stage};
use crate::report::synthesize_from_triage;

use super::{ANYTHING_ELSE_PROMPT, ConversationEngine, TurnOutcome, confirm_turn};

/// Free-form intake driven by the language model.
///
/// Every patient turn is sent with the full history. The exchange stays in
/// `ask_disease` until the model commits to a recommendation (a medication or
/// an escalation); that answer becomes the report and the session moves to
/// `confirm`. The offline generator always recommends, so an unreachable
/// model completes the intake in one turn.
pub struct DelegatedEngine {
    gateway: Arc<dyn LlmGateway>,
    confirm_policy: ConfirmPolicy,
}

impl DelegatedEngine {
    pub fn new(gateway: Arc<dyn LlmGateway>, confirm_policy: ConfirmPolicy) -> Self {
        Self {
            gateway,
            confirm_policy,
        }
    }

    async fn converse(
        &self,
        session: &mut ConversationSession,
        text: &str,
    ) -> IntakeResult<TurnOutcome> {
        if session.patient.disease.is_none() {
            session.patient.disease = Some(text.to_string());
        }
        session.push_user(text);

        let history = history_to_prompt(&session.messages);
        let outcome = triage_or_fallback(self.gateway.as_ref(), &history, &patient_transcript(session))
            .await?;
        let payload = outcome.payload;

        if let Some(info) = &payload.patient_info {
            if session.patient.name.is_none() {
                session.patient.name = info.name.clone().filter(|n| !n.trim().is_empty());
            }
            if session.patient.age.is_none() {
                session.patient.age = info.age.clone().filter(|a| !a.trim().is_empty());
            }
        }

        session.push_assistant(payload.reply_text.clone());
        let mut turn = TurnOutcome::reply(payload.reply_text.clone());

        if outcome.fallback || is_conclusive(&payload) {
            session.stage = Stage::Synthesis;
            let report = synthesize_from_triage(&payload, Some(&*session), outcome.fallback, Utc::now());
            info!(
                "Session {} concluded by {} triage ({})",
                session.session_id,
                if outcome.fallback { "offline" } else { "model" },
                report.diagnosis
            );
            session.push_assistant(ANYTHING_ELSE_PROMPT);
            turn.replies.push(ANYTHING_ELSE_PROMPT.to_string());
            turn.report = Some(report);
            session.stage = Stage::Confirm;
        } else {
            debug!("Session {} still gathering details", session.session_id);
        }

        Ok(turn)
    }
}

/// The model has committed to a recommendation
fn is_conclusive(payload: &TriagePayload) -> bool {
    payload.escalate
        || payload
            .prescription
            .recommended_medications
            .iter()
            .any(|m| m.name.as_deref().is_some_and(|n| !n.trim().is_empty()))
}

/// Everything the patient has said in this session, for keyword fallback
fn patient_transcript(session: &ConversationSession) -> String {
    session
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(". ")
}

#[async_trait]
impl ConversationEngine for DelegatedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Llm
    }

    fn start(&self, session: &mut ConversationSession) -> TurnOutcome {
        session.reset_intake();
        session.stage = Stage::AskDisease;
        session.push_assistant(DELEGATED_GREETING);
        TurnOutcome::reply(DELEGATED_GREETING)
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

        match session.stage {
            Stage::Confirm => {
                session.push_user(text);
                Ok(confirm_turn(session, text, self.confirm_policy))
            }
            stage if stage.accepts_input() => self.converse(session, text).await,
            stage => Err(IntakeError::InvalidState(format!(
                "session {} is {} and does not accept input",
                session.session_id, stage
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{ScriptedGateway, triage_json};
    use crate::models::ReportSource;

    fn engine(gateway: Arc<ScriptedGateway>) -> DelegatedEngine {
        DelegatedEngine::new(gateway, ConfirmPolicy::Keyword)
    }

    fn started(engine: &DelegatedEngine) -> ConversationSession {
        let mut session = ConversationSession::new(EngineKind::Llm, "en-IN");
        engine.start(&mut session);
        session
    }

    #[tokio::test]
    async fn test_timeout_yields_fallback_report() {
        let gateway = Arc::new(ScriptedGateway::unreachable());
        let engine = engine(gateway.clone());
        let mut session = started(&engine);

        let outcome = engine.respond(&mut session, "I have a bad headache").await.unwrap();
        let report = outcome.report.unwrap();

        assert_eq!(report.source, ReportSource::Fallback);
        assert_eq!(report.medications[0].name, "Ibuprofen");
        assert_eq!(session.stage, Stage::Confirm);
        assert!(outcome.replies[0].starts_with("Unable to reach AI service"));
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn test_inconclusive_answer_keeps_gathering() {
        let reply = serde_json::json!({
            "replyText": "How long have you had it?",
            "symptoms": ["cough"],
        })
        .to_string();
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Ok(reply),
            Ok(triage_json("Take rest and this medicine.", "Naproxen")),
        ]));
        let engine = engine(gateway.clone());
        let mut session = started(&engine);

        let first = engine.respond(&mut session, "I have a cough").await.unwrap();
        assert!(first.report.is_none());
        assert_eq!(session.stage, Stage::AskDisease);

        let second = engine.respond(&mut session, "three days").await.unwrap();
        let report = second.report.unwrap();
        assert_eq!(report.medications.len(), 1);
        assert_eq!(report.medications[0].name, "Naproxen");
        assert_eq!(report.chief_complaint, "I have a cough");
        assert_eq!(session.patient.name.as_deref(), Some("Ravi"));
        assert_eq!(session.stage, Stage::Confirm);

        // Full history is sent every turn
        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls[1].len(), session.messages.len() - 2);
    }

    #[tokio::test]
    async fn test_schema_violation_propagates() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Ok("{\"oops\": true}".to_string())]));
        let engine = engine(gateway);
        let mut session = started(&engine);
        let err = engine.respond(&mut session, "headache").await.unwrap_err();
        assert!(matches!(err, IntakeError::SchemaViolation { .. }));
    }

    #[tokio::test]
    async fn test_confirm_uses_shared_policy() {
        let engine = engine(Arc::new(ScriptedGateway::unreachable()));
        let mut session = started(&engine);
        session.stage = Stage::Confirm;
        let outcome = engine.respond(&mut session, "no thanks, bye").await.unwrap();
        assert!(outcome.ended);
        assert_eq!(session.stage, Stage::Ended);
    }
}
