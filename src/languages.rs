//! Supported target languages and request-time resolution

use serde::Serialize;

use crate::error::{DubbingError, Result};

/// A dubbing target language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Language {
    pub name: &'static str,
    pub code: &'static str,
}

/// The scheduled Indian languages the service dubs into
pub const SUPPORTED_LANGUAGES: &[Language] = &[
    Language { name: "Assamese", code: "as" },
    Language { name: "Bengali", code: "bn" },
    Language { name: "Bodo", code: "brx" },
    Language { name: "Dogri", code: "doi" },
    Language { name: "Gujarati", code: "gu" },
    Language { name: "Hindi", code: "hi" },
    Language { name: "Kannada", code: "kn" },
    Language { name: "Kashmiri", code: "ks" },
    Language { name: "Konkani", code: "kok" },
    Language { name: "Maithili", code: "mai" },
    Language { name: "Malayalam", code: "ml" },
    Language { name: "Manipuri", code: "mni" },
    Language { name: "Marathi", code: "mr" },
    Language { name: "Nepali", code: "ne" },
    Language { name: "Odia", code: "or" },
    Language { name: "Punjabi", code: "pa" },
    Language { name: "Sanskrit", code: "sa" },
    Language { name: "Santali", code: "sat" },
    Language { name: "Sindhi", code: "sd" },
    Language { name: "Tamil", code: "ta" },
    Language { name: "Telugu", code: "te" },
    Language { name: "Urdu", code: "ur" },
];

/// Language names in alphabetical order
pub fn supported_names() -> Vec<String> {
    let mut names: Vec<String> = SUPPORTED_LANGUAGES
        .iter()
        .map(|l| l.name.to_string())
        .collect();
    names.sort();
    names
}

/// Resolve a user-supplied language code or name.
///
/// Exact codes win, then names and codes compared case-insensitively.
/// Anything else is an input validation error listing the supported names.
pub fn resolve_language(requested: &str) -> Result<Language> {
    let wanted = requested.trim();

    if let Some(lang) = SUPPORTED_LANGUAGES.iter().find(|l| l.code == wanted) {
        return Ok(*lang);
    }

    SUPPORTED_LANGUAGES
        .iter()
        .find(|l| l.name.eq_ignore_ascii_case(wanted) || l.code.eq_ignore_ascii_case(wanted))
        .copied()
        .ok_or_else(|| DubbingError::UnsupportedLanguage {
            requested: requested.to_string(),
            supported: supported_names(),
        })
}
