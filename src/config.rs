use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::ConfirmPolicy;

/// Which conversation strategy drives a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Explicit stage machine with keyword classification
    #[default]
    Rules,
    /// Free-form exchange delegated to the language model
    Llm,
}

/// Configuration for the intake core
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Root directory for session records and rendered documents
    pub data_dir: PathBuf,
    /// Default engine for new sessions
    pub engine: EngineKind,
    /// Silence after the last interim transcript before it is promoted to final
    pub debounce_window: Duration,
    /// Upper bound on waiting for playback to signal completion
    pub playback_timeout: Duration,
    /// How the confirm stage separates "continue" from "terminate"
    pub confirm_policy: ConfirmPolicy,
    /// Locale used until the patient picks one
    pub default_language: String,
    /// Prefix for document URLs handed back to clients
    pub public_base_url: String,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            engine: EngineKind::Rules,
            debounce_window: Duration::from_millis(2000),
            playback_timeout: Duration::from_secs(30),
            confirm_policy: ConfirmPolicy::default(),
            default_language: crate::models::DEFAULT_LANGUAGE.to_string(),
            public_base_url: String::new(),
        }
    }
}

impl IntakeConfig {
    /// Directory holding one JSON record per session
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Directory holding rendered report documents
    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    /// Public URL for a rendered document
    pub fn document_url(&self, filename: &str) -> String {
        format!(
            "{}/reports/{}",
            self.public_base_url.trim_end_matches('/'),
            filename
        )
    }
}
