/// Questions asked when no complaint-specific list applies
pub const BASELINE_FOLLOW_UPS: &[&str] = &[
    "When did these symptoms start?",
    "How severe are they on a scale from 1 (mild) to 10 (very severe)?",
    "Do you have any known allergies to medicines or foods?",
    "Are you taking any other medications or supplements currently?",
    "Do you have any chronic conditions (e.g., diabetes, hypertension)?",
    "Have you noticed anything that makes the symptoms better or worse?",
];

pub const FEVER_FOLLOW_UPS: &[&str] = &[
    "When did the fever start?",
    "Have you measured your temperature? If yes, what is the highest temperature?",
    "Any cough, sore throat, or breathing difficulty?",
    "Are you experiencing body aches or headache?",
    "Any recent travel or exposure to someone unwell?",
    "Any medicines already taken for these symptoms?",
];

pub const COUGH_FOLLOW_UPS: &[&str] = &[
    "Is the cough dry or productive (with phlegm)?",
    "How long have you had the cough?",
    "Any fever, breathlessness, or chest pain?",
    "Any history of asthma or smoking?",
    "Have you tried any cough medicines already?",
];

/// Pick exactly one follow-up list for a complaint; lists are never merged
pub fn select_follow_up_set(disease: Option<&str>) -> Vec<String> {
    let lower = disease.unwrap_or_default().to_lowercase();

    let chosen = if lower.contains("fever") || lower.contains("temperature") {
        FEVER_FOLLOW_UPS
    } else if lower.contains("cough") {
        COUGH_FOLLOW_UPS
    } else {
        BASELINE_FOLLOW_UPS
    };

    chosen.iter().map(|q| q.to_string()).collect()
}
