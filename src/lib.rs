pub mod classifier;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod llm;
pub mod models;
pub mod report;
pub mod runtime;
pub mod server;
pub mod service;
pub mod store;

pub use classifier::{ConfirmDecision, ConfirmPolicy, classify_confirmation};
pub use config::{EngineKind, IntakeConfig};
pub use conversation::{Backend, Conversation, TurnResult};
pub use engine::{ConversationEngine, DelegatedEngine, Engines, RuleEngine, TranscriptNormalizer};
pub use error::{IntakeError, IntakeResult};
pub use llm::{ChatCompletionsClient, GatewayConfig, LlmGateway};
pub use models::{ConversationSession, Report, Stage};
pub use report::{DocumentRenderer, TextRenderer};
pub use runtime::{ConsoleCapture, ConsolePlayback, RecordedEvent, VoiceSession, replay};
pub use service::IntakeService;
pub use store::{DocumentStore, FileSessionStore, PersistenceAdapter, SessionStore};
