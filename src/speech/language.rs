//! Language registry and text-evidence language detection.
//!
//! The speech service auto-detects the spoken language acoustically, but
//! short segments are often mislabeled. Script ranges and stop-word counts
//! over the transcribed text give a cheap second opinion; when the text
//! evidence is confident enough it overrides the service's guess.

/// Language codes the subtitle pipeline accepts
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "en", "vi", "zh", "ja", "ko", "fr", "de", "es", "ar", "ru", "pt", "it", "th", "hi", "nl",
    "pl", "tr", "sv",
];

/// Text-evidence confidence above which the detected language wins over the
/// service's acoustic guess
pub const TEXT_EVIDENCE_THRESHOLD: f32 = 0.5;

pub fn is_supported(code: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&code)
}

/// Validate a configured display language, falling back to English
pub fn normalize_display_language(code: &str) -> String {
    let lower = code.to_lowercase();
    if is_supported(&lower) {
        lower
    } else {
        "en".to_string()
    }
}

const VIETNAMESE_CHARS: &str = "àáạảãâầấậẩẫăằắặẳẵèéẹẻẽêềếệểễìíịỉĩòóọỏõôồốộổỗơờớợởỡùúụủũưừứựửữỳýỵỷỹđ";
const RUSSIAN_CHARS: &str = "абвгдеёжзийклмнопрстуфхцчшщъыьэюя";

const STOP_WORDS: &[(&str, &[&str])] = &[
    ("en", &["the", "is", "and", "to", "a", "in", "it", "you", "that", "of"]),
    ("vi", &["là", "của", "có", "và", "với", "được", "trong", "cho", "từ", "một"]),
    ("fr", &["le", "de", "et", "à", "un", "il", "être", "en", "avoir", "que"]),
    ("de", &["der", "die", "und", "in", "den", "von", "zu", "das", "mit", "sich"]),
    ("es", &["el", "de", "que", "y", "a", "en", "un", "es", "se", "no"]),
    ("pt", &["o", "de", "que", "e", "do", "a", "em", "para", "é", "com"]),
    ("it", &["il", "di", "che", "e", "la", "per", "una", "in", "del", "è"]),
];

fn script_ratio(text: &str, in_script: impl Fn(char) -> bool) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let matches = text.chars().filter(|&c| in_script(c)).count();
    matches as f32 / total as f32
}

/// Detect the language of a piece of text with a confidence score.
///
/// Returns `("en", 0.0)` for empty input and a low-confidence English guess
/// when nothing matches.
pub fn detect_from_text(text: &str) -> (String, f32) {
    if text.trim().is_empty() {
        return ("en".to_string(), 0.0);
    }

    let lower = text.to_lowercase();
    let mut scores: Vec<(&str, f32)> = Vec::new();

    // Script-range evidence for non-Latin languages
    let ranges: &[(&str, fn(char) -> bool)] = &[
        ("zh", |c| ('\u{4e00}'..='\u{9fff}').contains(&c)),
        ("ja", |c| {
            ('\u{3040}'..='\u{309f}').contains(&c) || ('\u{30a0}'..='\u{30ff}').contains(&c)
        }),
        ("ko", |c| ('\u{ac00}'..='\u{d7af}').contains(&c)),
        ("ar", |c| ('\u{0600}'..='\u{06ff}').contains(&c)),
        ("th", |c| ('\u{0e00}'..='\u{0e7f}').contains(&c)),
    ];
    for &(lang, in_script) in ranges {
        let ratio = script_ratio(text, in_script);
        if ratio > 0.0 {
            scores.push((lang, ratio));
        }
    }

    // Diacritic/alphabet evidence
    for &(lang, chars) in &[("vi", VIETNAMESE_CHARS), ("ru", RUSSIAN_CHARS)] {
        let ratio = script_ratio(&lower, |c| chars.contains(c));
        if ratio > 0.0 {
            push_score(&mut scores, lang, ratio);
        }
    }

    // Stop-word evidence for Latin-script languages
    let words: Vec<&str> = lower.split_whitespace().collect();
    if !words.is_empty() {
        for &(lang, stop_words) in STOP_WORDS {
            let hits = words.iter().filter(|w| stop_words.contains(w)).count();
            if hits > 0 {
                let score = hits as f32 / words.len() as f32 * 0.5;
                push_score(&mut scores, lang, score);
            }
        }
    }

    match scores
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    {
        Some((lang, score)) => (lang.to_string(), score.min(1.0)),
        None => ("en".to_string(), 0.1),
    }
}

fn push_score<'a>(scores: &mut Vec<(&'a str, f32)>, lang: &'a str, add: f32) {
    match scores.iter_mut().find(|(l, _)| *l == lang) {
        Some((_, s)) => *s += add,
        None => scores.push((lang, add)),
    }
}
