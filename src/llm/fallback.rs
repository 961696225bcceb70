use crate::classifier::{MedicationSuggestion, select_medication};
use crate::models::UNKNOWN;

use super::{MedicationPayload, PrescriptionPayload, TriagePayload};

/// Note attached to every offline answer so clinicians know to double-check it
pub const FALLBACK_CLINICIAN_NOTE: &str =
    "Fallback generated because the language model was unreachable. Verify clinical details.";

struct Inference {
    diagnosis: &'static str,
    symptoms: Vec<String>,
    severity: &'static str,
    specialist: &'static str,
    medication: MedicationSuggestion,
}

fn infer(text: &str) -> Inference {
    let lower = text.to_lowercase();

    if lower.contains("headache") {
        return Inference {
            diagnosis: "Tension-type headache",
            symptoms: vec!["headache".to_string()],
            severity: "mild",
            specialist: "Neurologist",
            medication: select_medication(Some("headache")),
        };
    }
    if lower.contains("fever") || lower.contains("temperature") {
        return Inference {
            diagnosis: "Likely viral fever",
            symptoms: vec!["fever".to_string()],
            severity: "moderate",
            specialist: "General Physician",
            medication: select_medication(Some("fever")),
        };
    }
    if lower.contains("cough") || lower.contains("cold") {
        let complaint = match (lower.contains("cough"), lower.contains("dry")) {
            (true, true) => "dry cough",
            (true, false) => "cough",
            (false, _) => "cold",
        };
        return Inference {
            diagnosis: "Upper respiratory infection / common cold",
            symptoms: vec!["cough".to_string(), "runny nose".to_string()],
            severity: "mild",
            specialist: "General Physician",
            medication: select_medication(Some(complaint)),
        };
    }

    Inference {
        diagnosis: "Unknown - needs clinical review",
        symptoms: vec![text.trim().to_string()],
        severity: UNKNOWN,
        specialist: "General Physician",
        medication: select_medication(Some(text)),
    }
}

/// Deterministic triage used when the model cannot be reached.
///
/// The medicine is chosen by the same rule that chose the diagnosis, so a
/// complaint naming several symptoms still gets a consistent answer.
pub fn offline_triage(transcript: &str) -> TriagePayload {
    let inference = infer(transcript);
    let med = inference.medication;

    TriagePayload {
        reply_text: format!(
            "Unable to reach AI service. Based on what you said, I suggest: {}. Recommended medicine: {}.",
            inference.diagnosis, med.name
        ),
        diagnosis: Some(inference.diagnosis.to_string()),
        symptoms: inference.symptoms,
        severity: Some(inference.severity.to_string()),
        recommended_actions: vec![
            "Take rest".to_string(),
            "Use the recommended medicine as directed".to_string(),
            "Seek in-person care if symptoms worsen".to_string(),
        ],
        escalate: false,
        recommended_specialist: Some(inference.specialist.to_string()),
        prescription: PrescriptionPayload {
            recommended_medications: vec![MedicationPayload {
                name: Some(med.name),
                dose: Some(med.dosage),
                duration: Some(med.duration),
                notes: Some(med.instructions),
            }],
            notes_for_clinician: Some(FALLBACK_CLINICIAN_NOTE.to_string()),
        },
        patient_info: None,
    }
}
