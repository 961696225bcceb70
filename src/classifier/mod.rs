pub mod confirm;
pub mod followups;
pub mod medication;
pub mod specialist;

pub use confirm::*;
pub use followups::*;
pub use medication::*;
pub use specialist::*;

/// Everything the keyword rules derive from one complaint
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub specialist: Specialist,
    pub follow_ups: Vec<String>,
    pub medication: MedicationSuggestion,
}

/// Run all keyword classifiers over a complaint.
///
/// Pure: identical input always yields an identical classification.
pub fn classify(disease: Option<&str>) -> Classification {
    Classification {
        specialist: suggest_specialist(disease),
        follow_ups: select_follow_up_set(disease),
        medication: select_medication(disease),
    }
}
