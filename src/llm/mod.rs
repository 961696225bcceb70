pub mod client;
pub mod fallback;
pub mod prompts;
pub mod validation;

pub use client::*;
pub use fallback::*;
pub use prompts::*;
pub use validation::*;

use tracing::{info, warn};

use crate::error::{IntakeError, IntakeResult};

/// A triage answer and whether it came from the offline generator
#[derive(Debug, Clone, PartialEq)]
pub struct TriageOutcome {
    pub payload: TriagePayload,
    pub fallback: bool,
}

/// Ask the model for a validated triage answer
pub async fn request_triage(
    gateway: &dyn LlmGateway,
    history: &[PromptMessage],
) -> IntakeResult<TriagePayload> {
    let raw = gateway.complete(TRIAGE_SYSTEM_PROMPT, history).await?;
    parse_triage(&raw)
}

/// Triage with the unreachable case recovered by the offline generator.
///
/// `SchemaViolation` is still returned: a malformed clinical payload is never
/// silently replaced.
pub async fn triage_or_fallback(
    gateway: &dyn LlmGateway,
    history: &[PromptMessage],
    transcript: &str,
) -> IntakeResult<TriageOutcome> {
    match request_triage(gateway, history).await {
        Ok(payload) => Ok(TriageOutcome {
            payload,
            fallback: false,
        }),
        Err(IntakeError::UpstreamUnreachable(reason)) => {
            warn!("LLM unreachable ({}), using offline triage", reason);
            Ok(TriageOutcome {
                payload: offline_triage(transcript),
                fallback: true,
            })
        }
        Err(e) => Err(e),
    }
}

/// Ask the model to summarize a consultation
pub async fn request_report(
    gateway: &dyn LlmGateway,
    messages: &[crate::models::ChatMessage],
) -> IntakeResult<ReportPayload> {
    let request = build_report_request(messages);
    let raw = gateway.complete(REPORT_SYSTEM_PROMPT, &request).await?;
    let payload = parse_report(&raw)?;
    info!("Report summary received: {}", payload.chief_complaint);
    Ok(payload)
}
