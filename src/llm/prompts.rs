use crate::models::ChatMessage;

use super::PromptMessage;

/// System prompt for triage (strict JSON contract)
pub const TRIAGE_SYSTEM_PROMPT: &str = r#"You are a medical triage assistant. Output ONLY JSON matching this schema EXACTLY:
{
  "replyText": "<short spoken reply to the patient>",
  "diagnosis": "<brief probable diagnosis or 'unknown'>",
  "symptoms": ["symptom1", "symptom2"],
  "severity": "mild|moderate|severe|unknown",
  "recommendedActions": ["action1", "action2"],
  "escalate": true|false,
  "recommendedSpecialist": "e.g. Emergency / General Physician / ENT / Dermatologist",
  "patientInfo": {"name": "<if mentioned>", "age": "<if mentioned>"},
  "prescription": {
    "recommended_medications": [
      {"name": "<drug name>", "dose": "<dose>", "duration": "<duration>", "notes": "<notes>"}
    ],
    "notes_for_clinician": "<free text>"
  }
}

RULES:
- Recommend at most ONE medication. Prefer common over-the-counter options.
- Do not guess a diagnosis you cannot support from the conversation; use "unknown".
- Set "escalate" to true for any red-flag symptom (chest pain, breathing difficulty, confusion, severe bleeding).
- Respond ONLY with JSON and nothing else."#;

/// System prompt for summarizing a finished consultation
pub const REPORT_SYSTEM_PROMPT: &str = r#"You are a medical professional analyzing a patient consultation. Based on the conversation, produce a medical report.

Extract specific information from the conversation: the patient's name and age, the main complaint, any medical history, the most likely assessment, medications or treatments discussed, and follow-up recommendations. Use "Not specified" only when the conversation truly contains no information.

Return a VALID JSON object with exactly this structure:
{
  "patientInfo": {"name": "string", "age": "string"},
  "chiefComplaint": "string",
  "medicalHistory": "string",
  "assessment": "string",
  "prescription": "string",
  "followUp": "string"
}

Return ONLY the JSON object: no markdown, no code blocks, no explanations."#;

/// Opening line for the free-form (model-driven) conversation
pub const DELEGATED_GREETING: &str =
    "Hello, I'm your AI medical assistant. Can you tell me your name, age and what your problem is?";

/// Convert the audit trail into model messages
pub fn history_to_prompt(messages: &[ChatMessage]) -> Vec<PromptMessage> {
    messages
        .iter()
        .map(|m| PromptMessage::new(m.role.as_str(), m.content.clone()))
        .collect()
}

/// Build the single user message asking for a consultation summary
pub fn build_report_request(messages: &[ChatMessage]) -> Vec<PromptMessage> {
    let mut prompt = String::from("Please analyze this consultation and generate a medical report:\n\n");
    for m in messages {
        prompt.push_str(&format!("{}: {}\n", m.role.as_str(), m.content));
    }
    vec![PromptMessage::new("user", prompt)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_preserves_order_and_roles() {
        let messages = vec![
            ChatMessage::assistant("What is the problem?"),
            ChatMessage::user("I have a headache"),
        ];
        let prompt = history_to_prompt(&messages);
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].role, "assistant");
        assert_eq!(prompt[1].content, "I have a headache");
    }

    #[test]
    fn test_report_request_flattens_transcript() {
        let messages = vec![ChatMessage::user("fever since Monday")];
        let prompt = build_report_request(&messages);
        assert_eq!(prompt.len(), 1);
        assert!(prompt[0].content.contains("user: fever since Monday"));
    }
}
