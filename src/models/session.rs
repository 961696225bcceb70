use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineKind;

/// Position of a session in the intake stage machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Idle,
    AskDisease,
    AskLanguage,
    CollectName,
    CollectAge,
    Followups,
    /// Transient: entered automatically once the follow-up set is exhausted
    Synthesis,
    Confirm,
    Ended,
}

impl Stage {
    /// Stages that accept a normalized transcript
    pub fn accepts_input(&self) -> bool {
        !matches!(self, Self::Idle | Self::Synthesis | Self::Ended)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AskDisease => "ask_disease",
            Self::AskLanguage => "ask_language",
            Self::CollectName => "collect_name",
            Self::CollectAge => "collect_age",
            Self::Followups => "followups",
            Self::Synthesis => "synthesis",
            Self::Confirm => "confirm",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker of a message in the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One spoken turn in the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Patient data gathered during the intake
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    /// Declared complaint, verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disease: Option<String>,
}

/// Follow-up questions chosen once when the follow-up stage is entered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowUpQuestionSet {
    questions: Vec<String>,
    /// Index of the question currently awaiting an answer
    index: usize,
}

impl FollowUpQuestionSet {
    pub fn new(questions: Vec<String>) -> Self {
        Self { questions, index: 0 }
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Question awaiting an answer, if any
    pub fn current(&self) -> Option<&str> {
        self.questions.get(self.index).map(String::as_str)
    }

    /// Move past the current question, returning the next one
    pub fn advance(&mut self) -> Option<&str> {
        if self.index < self.questions.len() {
            self.index += 1;
        }
        self.current()
    }

    pub fn is_exhausted(&self) -> bool {
        self.index >= self.questions.len()
    }
}

/// A single end-to-end intake conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub stage: Stage,
    pub engine: EngineKind,
    #[serde(default)]
    pub patient: PatientDetails,
    /// One answer per follow-up question, in order
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub follow_ups: FollowUpQuestionSet,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationSession {
    /// Create a session with a fresh identifier
    pub fn new(engine: EngineKind, language: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), engine, language)
    }

    pub fn with_id(session_id: impl Into<String>, engine: EngineKind, language: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            stage: Stage::Idle,
            engine,
            patient: PatientDetails::default(),
            answers: Vec::new(),
            follow_ups: FollowUpQuestionSet::default(),
            messages: Vec::new(),
            language: language.into(),
            created_at: Utc::now(),
        }
    }

    /// Clear everything gathered for the current intake; the message trail is kept
    pub fn reset_intake(&mut self) {
        self.patient = PatientDetails::default();
        self.answers.clear();
        self.follow_ups = FollowUpQuestionSet::default();
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    /// First thing the patient said, used as a listing excerpt
    pub fn first_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follow_up_set_advances_and_exhausts() {
        let mut set = FollowUpQuestionSet::new(vec!["a".into(), "b".into()]);
        assert_eq!(set.current(), Some("a"));
        assert_eq!(set.advance(), Some("b"));
        assert!(!set.is_exhausted());
        assert_eq!(set.advance(), None);
        assert!(set.is_exhausted());
        // Advancing past the end is a no-op
        assert_eq!(set.advance(), None);
        assert_eq!(set.index(), 2);
    }

    #[test]
    fn test_reset_intake_keeps_messages() {
        let mut session = ConversationSession::new(EngineKind::Rules, "en-IN");
        session.patient.disease = Some("fever".into());
        session.answers.push("two days".into());
        session.push_user("fever");

        session.reset_intake();

        assert!(session.patient.disease.is_none());
        assert!(session.answers.is_empty());
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::AskDisease).unwrap();
        assert_eq!(json, "\"ask_disease\"");
        assert_eq!(Stage::CollectAge.to_string(), "collect_age");
    }
}
