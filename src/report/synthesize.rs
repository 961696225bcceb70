use chrono::{DateTime, Utc};

use crate::classifier::{select_medication, suggest_specialist};
use crate::error::{IntakeError, IntakeResult};
use crate::llm::{FALLBACK_CLINICIAN_NOTE, MedicationPayload, ReportPayload, TriagePayload};
use crate::models::{
    ConversationSession, DEFAULT_PRECAUTIONS, Medication, NOT_SPECIFIED, PatientInfo, Report,
    ReportSource, UNKNOWN,
};

const RULES_CLINICIAN_NOTE: &str =
    "Generated from a structured voice intake using keyword rules. Not a medical diagnosis.";

/// Build a report from a completed rule-based intake.
///
/// Fails with `InvalidState` when no complaint was captured: a report is never
/// synthesized without one.
pub fn synthesize_from_session(
    session: &ConversationSession,
    generated_at: DateTime<Utc>,
) -> IntakeResult<Report> {
    let disease = session
        .patient
        .disease
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| {
            IntakeError::InvalidState("cannot synthesize a report without a complaint".to_string())
        })?;

    let specialist = suggest_specialist(Some(disease));
    let medication: Medication = select_medication(Some(disease)).into();

    Ok(Report {
        patient_info: patient_info(session.patient.name.clone(), session.patient.age.clone()),
        chief_complaint: disease.to_string(),
        diagnosis: UNKNOWN.to_string(),
        severity: UNKNOWN.to_string(),
        recommended_specialist: specialist.label().to_string(),
        symptoms: vec![disease.to_string()],
        recommended_actions: vec![
            format!("Consult a {} if symptoms persist", specialist.label()),
            "Take the recommended medicine as directed".to_string(),
        ],
        medical_history: follow_up_history(session),
        follow_up: format!(
            "See a {} in person if symptoms worsen or do not improve within the treatment period.",
            specialist.label()
        ),
        medications: vec![medication],
        precautions: DEFAULT_PRECAUTIONS.to_string(),
        notes_for_clinician: RULES_CLINICIAN_NOTE.to_string(),
        escalate: false,
        source: ReportSource::Rules,
        generated_at,
    })
}

/// Build a report from a validated (or offline) triage answer
pub fn synthesize_from_triage(
    payload: &TriagePayload,
    session: Option<&ConversationSession>,
    fallback: bool,
    generated_at: DateTime<Utc>,
) -> Report {
    let (name, age) = match &payload.patient_info {
        Some(info) => (info.name.clone(), info.age.clone()),
        None => (None, None),
    };
    let name = non_blank(name).or_else(|| session.and_then(|s| s.patient.name.clone()));
    let age = non_blank(age).or_else(|| session.and_then(|s| s.patient.age.clone()));

    let chief_complaint = session
        .and_then(|s| s.patient.disease.clone().or_else(|| s.first_user_message().map(str::to_string)))
        .or_else(|| (!payload.symptoms.is_empty()).then(|| payload.symptoms.join(", ")));

    let source = if fallback { ReportSource::Fallback } else { ReportSource::Llm };
    let notes = if fallback {
        Some(FALLBACK_CLINICIAN_NOTE.to_string())
    } else {
        payload.prescription.notes_for_clinician.clone()
    };

    Report {
        patient_info: patient_info(name, age),
        chief_complaint: or_not_specified(chief_complaint),
        diagnosis: or_unknown(payload.diagnosis.clone()),
        severity: or_unknown(payload.severity.clone()),
        recommended_specialist: non_blank(payload.recommended_specialist.clone())
            .unwrap_or_else(|| suggest_specialist(None).label().to_string()),
        symptoms: payload.symptoms.clone(),
        recommended_actions: payload.recommended_actions.clone(),
        medical_history: NOT_SPECIFIED.to_string(),
        follow_up: NOT_SPECIFIED.to_string(),
        medications: primary_medication(&payload.prescription.recommended_medications)
            .into_iter()
            .collect(),
        precautions: DEFAULT_PRECAUTIONS.to_string(),
        notes_for_clinician: or_not_specified(notes),
        escalate: payload.escalate,
        source,
        generated_at,
    }
}

/// Build a report from a consultation summary produced at regeneration time
pub fn synthesize_from_summary(
    payload: &ReportPayload,
    session: &ConversationSession,
    generated_at: DateTime<Utc>,
) -> Report {
    let name = non_blank(payload.patient_info.name.clone()).or_else(|| session.patient.name.clone());
    let age = non_blank(payload.patient_info.age.clone()).or_else(|| session.patient.age.clone());
    let disease = session.patient.disease.as_deref();

    Report {
        patient_info: patient_info(name, age),
        chief_complaint: or_not_specified(Some(payload.chief_complaint.clone())),
        diagnosis: or_unknown(Some(payload.assessment.clone())),
        severity: UNKNOWN.to_string(),
        recommended_specialist: suggest_specialist(disease).label().to_string(),
        symptoms: disease.map(|d| vec![d.to_string()]).unwrap_or_default(),
        recommended_actions: Vec::new(),
        medical_history: or_not_specified(payload.medical_history.clone()),
        follow_up: or_not_specified(payload.follow_up.clone()),
        medications: disease
            .map(|d| vec![select_medication(Some(d)).into()])
            .unwrap_or_default(),
        precautions: DEFAULT_PRECAUTIONS.to_string(),
        notes_for_clinician: or_not_specified(payload.prescription.clone()),
        escalate: false,
        source: ReportSource::Llm,
        generated_at,
    }
}

/// First usable medication; further candidates are dropped
fn primary_medication(candidates: &[MedicationPayload]) -> Option<Medication> {
    candidates
        .iter()
        .find(|m| m.name.as_deref().is_some_and(|n| !n.trim().is_empty()))
        .map(|m| Medication {
            name: or_not_specified(m.name.clone()),
            dose: or_not_specified(m.dose.clone()),
            duration: or_not_specified(m.duration.clone()),
            instructions: or_not_specified(m.notes.clone()),
        })
}

fn follow_up_history(session: &ConversationSession) -> String {
    let lines: Vec<String> = session
        .follow_ups
        .questions()
        .iter()
        .zip(session.answers.iter())
        .map(|(q, a)| format!("{} {}", q, a))
        .collect();

    if lines.is_empty() {
        NOT_SPECIFIED.to_string()
    } else {
        lines.join("\n")
    }
}

fn patient_info(name: Option<String>, age: Option<String>) -> PatientInfo {
    PatientInfo {
        name: or_not_specified(name),
        age: or_not_specified(age),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn or_not_specified(value: Option<String>) -> String {
    non_blank(value).unwrap_or_else(|| NOT_SPECIFIED.to_string())
}

fn or_unknown(value: Option<String>) -> String {
    non_blank(value).unwrap_or_else(|| UNKNOWN.to_string())
}
