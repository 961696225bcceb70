use crate::error::IntakeResult;
use crate::models::{NOT_SPECIFIED, Report};

/// Longest filename component kept from a patient or complaint field
const MAX_COMPONENT_LEN: usize = 48;

/// Output of a document renderer
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Turns a report into a downloadable document.
///
/// PDF output is left to external renderers; they plug in here.
pub trait DocumentRenderer: Send + Sync {
    /// File extension without the dot
    fn extension(&self) -> &'static str;

    fn render(&self, report: &Report, session_id: &str) -> IntakeResult<RenderedDocument>;
}

/// Plain-text prescription layout
#[derive(Debug, Clone, Default)]
pub struct TextRenderer;

impl TextRenderer {
    /// Format the report as text, wrapping long fields at 80 columns
    pub fn format(&self, report: &Report, session_id: &str) -> String {
        let mut output = String::new();

        output.push_str("MEDICAL PRESCRIPTION\n");
        output.push_str(&"=".repeat(80));
        output.push('\n');
        output.push_str(&format!(
            "Date: {}\n",
            report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        output.push_str(&format!("Session: {}\n\n", session_id));

        output.push_str("PATIENT DETAILS\n");
        output.push_str(&format!("Name: {}\n", report.patient_info.name));
        output.push_str(&format!("Age: {}\n", report.patient_info.age));
        push_field(&mut output, "Complaint", &report.chief_complaint);
        push_field(&mut output, "Doctor Type", &report.recommended_specialist);
        output.push('\n');

        output.push_str("ASSESSMENT\n");
        push_field(&mut output, "Diagnosis", &report.diagnosis);
        push_field(&mut output, "Severity", &report.severity);
        if !report.symptoms.is_empty() {
            push_field(&mut output, "Symptoms", &report.symptoms.join(", "));
        }
        if report.escalate {
            output.push_str("** Escalation recommended: seek in-person care promptly **\n");
        }
        output.push('\n');

        output.push_str("MEDICINE\n");
        match report.primary_medication() {
            Some(med) => {
                push_field(&mut output, "Name", &med.name);
                push_field(&mut output, "Dosage", &med.dose);
                push_field(&mut output, "When / How", &med.instructions);
                push_field(&mut output, "Duration", &med.duration);
            }
            None => output.push_str("No medicine recommended.\n"),
        }
        output.push('\n');

        if !report.recommended_actions.is_empty() {
            output.push_str("RECOMMENDED ACTIONS\n");
            for action in &report.recommended_actions {
                output.push_str(&wrap_text(&format!("- {}", action), 80));
                output.push('\n');
            }
            output.push('\n');
        }

        if report.medical_history != NOT_SPECIFIED {
            output.push_str("HISTORY\n");
            for line in report.medical_history.lines() {
                output.push_str(&wrap_text(line, 80));
                output.push('\n');
            }
            output.push('\n');
        }

        output.push_str("PRECAUTIONS\n");
        output.push_str(&wrap_text(&report.precautions, 80));
        output.push_str("\n\n");

        push_field(&mut output, "Follow-up", &report.follow_up);
        push_field(&mut output, "Notes for clinician", &report.notes_for_clinician);
        output.push('\n');

        output.push_str("Doctor: AI Medical Agent            Signature: ___________________\n");
        output.push_str(&wrap_text(
            "This report was generated by an AI medical assistant. Please consult a qualified healthcare professional for final diagnosis and treatment.",
            80,
        ));
        output.push('\n');

        output
    }
}

impl DocumentRenderer for TextRenderer {
    fn extension(&self) -> &'static str {
        "txt"
    }

    fn render(&self, report: &Report, session_id: &str) -> IntakeResult<RenderedDocument> {
        Ok(RenderedDocument {
            filename: document_filename(report, session_id, self.extension()),
            bytes: self.format(report, session_id).into_bytes(),
            content_type: "text/plain; charset=utf-8",
        })
    }
}

fn push_field(output: &mut String, label: &str, value: &str) {
    output.push_str(&wrap_text(&format!("{}: {}", label, value), 80));
    output.push('\n');
}

/// Filename derived from the report and the session it belongs to.
///
/// The session id keeps documents of different sessions apart even when
/// patient, complaint and timestamp coincide; a session regenerating its
/// report within the same millisecond replaces its own document.
pub fn document_filename(report: &Report, session_id: &str, extension: &str) -> String {
    let name = sanitize_component(&report.patient_info.name, "patient");
    let complaint = sanitize_component(&report.chief_complaint, "report");
    let stamp = report.generated_at.format("%Y%m%dT%H%M%S%3f");
    let scope = sanitize_component(session_id, "session");
    format!("{}_{}_{}_{}.{}", name, complaint, stamp, scope, extension)
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`, collapsing runs
pub fn sanitize_component(value: &str, fallback: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.trim().chars() {
        let safe = c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_');
        if safe {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let trimmed: String = out
        .trim_matches(|c| c == '_' || c == '.')
        .chars()
        .take(MAX_COMPONENT_LEN)
        .collect();

    if trimmed.is_empty() || value.trim() == NOT_SPECIFIED {
        fallback.to_string()
    } else {
        trimmed
    }
}

/// Wrap text at approximately the given width
fn wrap_text(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut line_len = 0;

    for word in text.split_whitespace() {
        if line_len + word.len() + 1 > width && line_len > 0 {
            result.push('\n');
            line_len = 0;
        }
        if line_len > 0 {
            result.push(' ');
            line_len += 1;
        }
        result.push_str(word);
        line_len += word.len();
    }

    result
}
