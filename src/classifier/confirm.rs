use serde::{Deserialize, Serialize};

/// Outcome of the confirm stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmDecision {
    /// Patient wants help with something else
    Continue,
    /// Patient is done; the session ends
    Terminate,
}

/// How a confirm-stage answer is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmPolicy {
    /// Any occurrence of "no" terminates, including inside other words
    Substring,
    /// Whole-word match against a closed negation vocabulary
    #[default]
    Keyword,
}

/// Words that end the session under [`ConfirmPolicy::Keyword`]
const NEGATION_WORDS: &[&str] = &[
    "no", "nope", "nah", "nothing", "bye", "goodbye", "done", "stop", "end", "exit",
];

/// Phrases that end the session under [`ConfirmPolicy::Keyword`]
const NEGATION_PHRASES: &[&str] = &["that's all", "that is all", "not now"];

/// Classify an answer to "would you like anything else?".
///
/// A negation hit wins over the default of continuing.
pub fn classify_confirmation(text: &str, policy: ConfirmPolicy) -> ConfirmDecision {
    let lower = text.to_lowercase();

    let terminate = match policy {
        ConfirmPolicy::Substring => lower.contains("no"),
        ConfirmPolicy::Keyword => {
            NEGATION_PHRASES.iter().any(|p| lower.contains(p))
                || lower
                    .split(|c: char| !(c.is_alphanumeric() || c == '\''))
                    .any(|word| NEGATION_WORDS.contains(&word))
        }
    };

    if terminate {
        ConfirmDecision::Terminate
    } else {
        ConfirmDecision::Continue
    }
}
