/// Locale used until the patient chooses another
pub const DEFAULT_LANGUAGE: &str = "en-IN";

/// A spoken language the assistant can switch to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    pub label: &'static str,
    pub code: &'static str,
}

impl Language {
    /// Name a patient is likely to say, e.g. "english" for "English (India)"
    pub fn spoken_name(&self) -> &'static str {
        self.label.split_whitespace().next().unwrap_or(self.label)
    }
}

pub const SUPPORTED_LANGUAGES: &[Language] = &[
    Language { label: "English (India)", code: "en-IN" },
    Language { label: "Hindi", code: "hi-IN" },
    Language { label: "Bengali", code: "bn-IN" },
    Language { label: "Tamil", code: "ta-IN" },
    Language { label: "Telugu", code: "te-IN" },
    Language { label: "Marathi", code: "mr-IN" },
    Language { label: "Kannada", code: "kn-IN" },
    Language { label: "Malayalam", code: "ml-IN" },
    Language { label: "Gujarati", code: "gu-IN" },
    Language { label: "Punjabi", code: "pa-IN" },
];

/// Match a spoken answer against the supported languages.
///
/// Case-insensitive substring match on either the spoken name or the locale
/// code; the first table entry that matches wins.
pub fn match_language(text: &str) -> Option<&'static Language> {
    let lower = text.to_lowercase();
    SUPPORTED_LANGUAGES.iter().find(|l| {
        lower.contains(&l.spoken_name().to_lowercase()) || lower.contains(&l.code.to_lowercase())
    })
}

/// Look up a language by its locale code
pub fn language_by_code(code: &str) -> Option<&'static Language> {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|l| l.code.eq_ignore_ascii_case(code))
}

/// Comma-separated spoken names for prompts
pub fn spoken_language_list() -> String {
    let names: Vec<&str> = SUPPORTED_LANGUAGES.iter().map(|l| l.spoken_name()).collect();
    match names.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} or {}", rest.join(", "), last),
        _ => names.join(""),
    }
}
