use serde::{Deserialize, Serialize};

/// Doctor type suggested for a complaint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Specialist {
    Dermatologist,
    Ophthalmologist,
    Gynecologist,
    Pediatrician,
    Cardiologist,
    GeneralPhysician,
    Dentist,
    Psychiatrist,
}

impl Specialist {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dermatologist => "Dermatologist",
            Self::Ophthalmologist => "Ophthalmologist",
            Self::Gynecologist => "Gynecologist",
            Self::Pediatrician => "Pediatrician",
            Self::Cardiologist => "Cardiologist",
            Self::GeneralPhysician => "General Physician",
            Self::Dentist => "Dentist",
            Self::Psychiatrist => "Psychiatrist",
        }
    }
}

impl std::fmt::Display for Specialist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Keyword categories in priority order; the first category with a hit wins
const SPECIALIST_RULES: &[(&[&str], Specialist)] = &[
    (&["skin", "rash", "acne"], Specialist::Dermatologist),
    (&["eye", "vision"], Specialist::Ophthalmologist),
    (&["preg", "obst"], Specialist::Gynecologist),
    (&["child", "pediatric", "kid"], Specialist::Pediatrician),
    (&["heart", "cardiac", "chest pain"], Specialist::Cardiologist),
    (&["fever", "cold", "cough", "flu"], Specialist::GeneralPhysician),
    (&["tooth", "dental"], Specialist::Dentist),
    (&["mental", "depress", "anxiety"], Specialist::Psychiatrist),
];

/// Suggest a specialist for a declared complaint
pub fn suggest_specialist(disease: Option<&str>) -> Specialist {
    let Some(disease) = disease else {
        return Specialist::GeneralPhysician;
    };
    let lower = disease.to_lowercase();

    SPECIALIST_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, specialist)| *specialist)
        .unwrap_or(Specialist::GeneralPhysician)
}
