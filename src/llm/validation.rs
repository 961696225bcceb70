use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{IntakeError, IntakeResult};
use crate::models::UNKNOWN;

/// Severity values the triage schema allows
pub const ALLOWED_SEVERITIES: &[&str] = &["mild", "moderate", "severe", "unknown"];

/// A medication entry as the model reports it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicationPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dose: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionPayload {
    #[serde(default)]
    pub recommended_medications: Vec<MedicationPayload>,
    #[serde(default)]
    pub notes_for_clinician: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientInfoPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub age: Option<String>,
}

/// Triage answer for a transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriagePayload {
    pub reply_text: String,
    #[serde(default)]
    pub diagnosis: Option<String>,
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub escalate: bool,
    #[serde(default)]
    pub recommended_specialist: Option<String>,
    #[serde(default)]
    pub prescription: PrescriptionPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_info: Option<PatientInfoPayload>,
}

/// Consultation summary used when a report is regenerated from the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    #[serde(default)]
    pub patient_info: PatientInfoPayload,
    pub chief_complaint: String,
    #[serde(default)]
    pub medical_history: Option<String>,
    pub assessment: String,
    #[serde(default)]
    pub prescription: Option<String>,
    #[serde(default)]
    pub follow_up: Option<String>,
}

/// Parse and validate a triage answer.
///
/// Requires `replyText` (non-empty string) and a `symptoms` array. Severity
/// outside the allowed set is normalized to `unknown`.
pub fn parse_triage(raw: &str) -> IntakeResult<TriagePayload> {
    let value = parse_json_object(raw)?;

    match value.get("replyText") {
        Some(Value::String(s)) if !s.trim().is_empty() => {}
        _ => return Err(IntakeError::schema("missing or empty replyText", raw)),
    }
    if !matches!(value.get("symptoms"), Some(Value::Array(_))) {
        return Err(IntakeError::schema("symptoms must be an array", raw));
    }

    let mut payload: TriagePayload = serde_json::from_value(value)
        .map_err(|e| IntakeError::schema(format!("invalid triage payload: {e}"), raw))?;

    payload.severity = Some(normalize_severity(payload.severity.as_deref()));
    Ok(payload)
}

/// Parse and validate a consultation summary.
///
/// Requires `chiefComplaint` and `assessment` strings.
pub fn parse_report(raw: &str) -> IntakeResult<ReportPayload> {
    let value = parse_json_object(raw)?;

    for key in ["chiefComplaint", "assessment"] {
        if !matches!(value.get(key), Some(Value::String(_))) {
            return Err(IntakeError::schema(format!("missing {key}"), raw));
        }
    }

    serde_json::from_value(value)
        .map_err(|e| IntakeError::schema(format!("invalid report payload: {e}"), raw))
}

fn parse_json_object(raw: &str) -> IntakeResult<Value> {
    let cleaned = strip_code_fences(raw);
    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| IntakeError::schema(format!("response is not valid JSON: {e}"), raw))?;
    if !value.is_object() {
        return Err(IntakeError::schema("response is not a JSON object", raw));
    }
    Ok(value)
}

/// Remove a surrounding markdown code block, if present
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn normalize_severity(severity: Option<&str>) -> String {
    let lower = severity.unwrap_or_default().trim().to_lowercase();
    if ALLOWED_SEVERITIES.contains(&lower.as_str()) {
        lower
    } else {
        UNKNOWN.to_string()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
