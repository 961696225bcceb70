use serde::{Deserialize, Serialize};

use crate::models::Medication;

/// Single conservative over-the-counter suggestion for a complaint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationSuggestion {
    pub name: String,
    pub dosage: String,
    pub instructions: String,
    pub duration: String,
}

impl MedicationSuggestion {
    fn new(name: &str, dosage: &str, instructions: &str, duration: &str) -> Self {
        Self {
            name: name.to_string(),
            dosage: dosage.to_string(),
            instructions: instructions.to_string(),
            duration: duration.to_string(),
        }
    }
}

impl From<MedicationSuggestion> for Medication {
    fn from(s: MedicationSuggestion) -> Self {
        Medication {
            name: s.name,
            dose: s.dosage,
            duration: s.duration,
            instructions: s.instructions,
        }
    }
}

fn paracetamol() -> MedicationSuggestion {
    MedicationSuggestion::new(
        "Paracetamol",
        "500 mg",
        "Take 1 tablet every 4–6 hours as needed",
        "3 days",
    )
}

/// Select one medication for a complaint.
///
/// Never fails: complaints without a keyword hit (or no complaint at all) get
/// the paracetamol default.
pub fn select_medication(disease: Option<&str>) -> MedicationSuggestion {
    let s = disease.unwrap_or_default().to_lowercase();
    let has = |k: &str| s.contains(k);

    if has("fever") || has("temperature") || has("flu") {
        return paracetamol();
    }
    if has("cough") && has("dry") {
        return MedicationSuggestion::new(
            "Dextromethorphan",
            "10 mg",
            "Take 1 teaspoon (10 ml) every 6–8 hours as needed",
            "5 days",
        );
    }
    if has("cough") {
        return MedicationSuggestion::new(
            "Guaifenesin",
            "100 mg/5 ml",
            "Take 5–10 ml every 4–6 hours as needed",
            "5 days",
        );
    }
    if has("pain") || has("headache") || has("migraine") {
        return MedicationSuggestion::new(
            "Ibuprofen",
            "400 mg",
            "Take 1 tablet every 6–8 hours as needed with food",
            "3 days",
        );
    }
    if has("cold") || has("congestion") {
        return MedicationSuggestion::new("Cetirizine", "10 mg", "Take 1 tablet at night", "5 days");
    }

    paracetamol()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headache_selects_ibuprofen() {
        assert_eq!(select_medication(Some("bad headache")).name, "Ibuprofen");
    }

    #[test]
    fn test_dry_cough_before_generic_cough() {
        assert_eq!(select_medication(Some("dry cough")).name, "Dextromethorphan");
        assert_eq!(select_medication(Some("wet cough")).name, "Guaifenesin");
    }

    #[test]
    fn test_fever_outranks_pain() {
        assert_eq!(select_medication(Some("fever and body pain")).name, "Paracetamol");
    }

    #[test]
    fn test_cold_selects_cetirizine() {
        assert_eq!(select_medication(Some("nasal congestion")).name, "Cetirizine");
    }

    #[test]
    fn test_default_is_never_empty() {
        let none = select_medication(None);
        let unknown = select_medication(Some("strange feeling"));
        assert_eq!(none, unknown);
        assert_eq!(none.name, "Paracetamol");
        assert!(!none.dosage.is_empty());
    }

    #[test]
    fn test_conversion_to_medication() {
        let med: Medication = select_medication(Some("migraine")).into();
        assert_eq!(med.dose, "400 mg");
        assert_eq!(med.duration, "3 days");
    }
}
