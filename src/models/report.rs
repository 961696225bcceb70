use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker for a field the intake never captured
pub const NOT_SPECIFIED: &str = "Not specified";

/// Marker for a diagnosis or severity the evidence does not support
pub const UNKNOWN: &str = "unknown";

/// Precautions used whenever no source supplies them
pub const DEFAULT_PRECAUTIONS: &str = "Rest, hydrate, avoid self-medication beyond the prescribed medicine. Seek in-person care if symptoms worsen.";

/// Identity block of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub name: String,
    pub age: String,
}

impl Default for PatientInfo {
    fn default() -> Self {
        Self {
            name: NOT_SPECIFIED.to_string(),
            age: NOT_SPECIFIED.to_string(),
        }
    }
}

/// A single medication entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    pub name: String,
    pub dose: String,
    pub duration: String,
    pub instructions: String,
}

/// Where the clinical content of a report came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    /// Keyword rules over stage-machine data
    Rules,
    /// Validated language-model payload
    Llm,
    /// Offline generator used while the model was unreachable
    Fallback,
}

/// Structured clinical artifact produced at the end of an intake.
///
/// Every field is always present; missing values carry [`NOT_SPECIFIED`] or
/// [`UNKNOWN`] so renderers can rely on the full key set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub patient_info: PatientInfo,
    pub chief_complaint: String,
    pub diagnosis: String,
    pub severity: String,
    pub recommended_specialist: String,
    pub symptoms: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub medical_history: String,
    pub follow_up: String,
    /// At most one entry is surfaced to the patient
    pub medications: Vec<Medication>,
    pub precautions: String,
    pub notes_for_clinician: String,
    pub escalate: bool,
    pub source: ReportSource,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    /// The medication surfaced to the patient
    pub fn primary_medication(&self) -> Option<&Medication> {
        self.medications.first()
    }
}

/// Reference to a rendered report document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub filename: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_uses_camel_case_keys() {
        let report = Report {
            patient_info: PatientInfo::default(),
            chief_complaint: "fever".into(),
            diagnosis: UNKNOWN.into(),
            severity: UNKNOWN.into(),
            recommended_specialist: "General Physician".into(),
            symptoms: vec!["fever".into()],
            recommended_actions: vec![],
            medical_history: NOT_SPECIFIED.into(),
            follow_up: NOT_SPECIFIED.into(),
            medications: vec![],
            precautions: DEFAULT_PRECAUTIONS.into(),
            notes_for_clinician: String::new(),
            escalate: false,
            source: ReportSource::Rules,
            generated_at: Utc::now(),
        };

        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("patientInfo").is_some());
        assert!(value.get("chiefComplaint").is_some());
        assert!(value.get("recommendedSpecialist").is_some());
        assert_eq!(value["source"], "rules");
        assert!(report.primary_medication().is_none());
    }
}
