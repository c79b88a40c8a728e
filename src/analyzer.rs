//! Language-aware tokenization.
//!
//! Maps an ISO-639 language tag to a text-search profile and splits text
//! into lowercase lexemes, dropping the profile's stopwords. Unknown or
//! missing tags fall back to the language-agnostic `simple` profile.

/// Lexemes longer than this (in bytes) are discarded.
pub const MAX_LEXEME_BYTES: usize = 255;

#[derive(Debug, PartialEq, Eq)]
pub struct Profile {
    pub name: &'static str,
    stopwords: &'static [&'static str],
}

impl Profile {
    pub fn is_stopword(&self, lexeme: &str) -> bool {
        self.stopwords.binary_search(&lexeme).is_ok()
    }

    /// Split `text` into lexemes, in order of appearance.
    pub fn tokenize<'a>(&'a self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty() && word.len() <= MAX_LEXEME_BYTES)
            .map(str::to_lowercase)
            .filter(move |lexeme| !self.is_stopword(lexeme))
    }
}

pub static SIMPLE: Profile = Profile {
    name: "simple",
    stopwords: &[],
};

// Stopword lists must stay sorted: lookups are binary searches.
static ENGLISH: Profile = Profile {
    name: "english",
    stopwords: &[
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
        "in", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were",
        "will", "with",
    ],
};

static NORWEGIAN: Profile = Profile {
    name: "norwegian",
    stopwords: &[
        "av", "de", "den", "det", "en", "er", "et", "for", "fra", "har", "i", "ikke", "med",
        "og", "om", "på", "som", "til", "var", "å",
    ],
};

static SWEDISH: Profile = Profile {
    name: "swedish",
    stopwords: &[
        "att", "av", "de", "den", "det", "en", "ett", "för", "har", "i", "inte", "med", "och",
        "om", "på", "som", "till", "var", "är",
    ],
};

static DANISH: Profile = Profile {
    name: "danish",
    stopwords: &[
        "af", "de", "den", "det", "en", "er", "et", "for", "fra", "har", "i", "ikke", "med",
        "og", "om", "på", "som", "til", "var",
    ],
};

static GERMAN: Profile = Profile {
    name: "german",
    stopwords: &[
        "auf", "das", "dem", "den", "der", "die", "ein", "eine", "für", "ist", "mit", "nicht",
        "und", "von", "zu",
    ],
};

macro_rules! bare_profile {
    ($ident:ident, $name:literal) => {
        static $ident: Profile = Profile {
            name: $name,
            stopwords: &[],
        };
    };
}

bare_profile!(ARABIC, "arabic");
bare_profile!(CATALAN, "catalan");
bare_profile!(GREEK, "greek");
bare_profile!(SPANISH, "spanish");
bare_profile!(BASQUE, "basque");
bare_profile!(FINNISH, "finnish");
bare_profile!(FRENCH, "french");
bare_profile!(IRISH, "irish");
bare_profile!(HINDI, "hindi");
bare_profile!(HUNGARIAN, "hungarian");
bare_profile!(ARMENIAN, "armenian");
bare_profile!(INDONESIAN, "indonesian");
bare_profile!(ITALIAN, "italian");
bare_profile!(LITHUANIAN, "lithuanian");
bare_profile!(NEPALI, "nepali");
bare_profile!(DUTCH, "dutch");
bare_profile!(PORTUGUESE, "portuguese");
bare_profile!(ROMANIAN, "romanian");
bare_profile!(RUSSIAN, "russian");
bare_profile!(SERBIAN, "serbian");
bare_profile!(TAMIL, "tamil");
bare_profile!(TURKISH, "turkish");
bare_profile!(YIDDISH, "yiddish");

/// Normalize a language tag to its lowercase primary subtag (`en-GB` → `en`).
pub fn normalize_tag(tag: &str) -> Option<String> {
    let primary = tag.trim().split(['-', '_']).next()?.trim();
    if primary.is_empty() {
        None
    } else {
        Some(primary.to_ascii_lowercase())
    }
}

/// Profile for an ISO-639 language tag.
pub fn profile_for(tag: Option<&str>) -> &'static Profile {
    let Some(code) = tag.and_then(normalize_tag) else {
        return &SIMPLE;
    };
    match code.as_str() {
        "ar" => &ARABIC,
        "ca" => &CATALAN,
        "da" => &DANISH,
        "de" => &GERMAN,
        "el" => &GREEK,
        "en" => &ENGLISH,
        "es" => &SPANISH,
        "eu" => &BASQUE,
        "fi" => &FINNISH,
        "fr" => &FRENCH,
        "ga" => &IRISH,
        "hi" => &HINDI,
        "hu" => &HUNGARIAN,
        "hy" => &ARMENIAN,
        "id" => &INDONESIAN,
        "it" => &ITALIAN,
        "lt" => &LITHUANIAN,
        "nb" | "nn" | "no" => &NORWEGIAN,
        "ne" => &NEPALI,
        "nl" => &DUTCH,
        "pt" => &PORTUGUESE,
        "ro" => &ROMANIAN,
        "ru" => &RUSSIAN,
        "sr" => &SERBIAN,
        "sv" => &SWEDISH,
        "ta" => &TAMIL,
        "tr" => &TURKISH,
        "yi" => &YIDDISH,
        _ => &SIMPLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopword_lists_are_sorted() {
        for profile in [&ENGLISH, &NORWEGIAN, &SWEDISH, &DANISH, &GERMAN] {
            let mut sorted = profile.stopwords.to_vec();
            sorted.sort_unstable();
            assert_eq!(sorted, profile.stopwords, "{} is not sorted", profile.name);
        }
    }

    #[test]
    fn maps_iso_codes_and_regions() {
        assert_eq!(profile_for(Some("en")).name, "english");
        assert_eq!(profile_for(Some("EN-gb")).name, "english");
        assert_eq!(profile_for(Some("nn")).name, "norwegian");
        assert_eq!(profile_for(Some("nb_NO")).name, "norwegian");
        assert_eq!(profile_for(Some("fr")).name, "french");
    }

    #[test]
    fn unknown_or_missing_tags_fall_back_to_simple() {
        assert_eq!(profile_for(None).name, "simple");
        assert_eq!(profile_for(Some("")).name, "simple");
        assert_eq!(profile_for(Some("xx")).name, "simple");
    }

    #[test]
    fn tokenize_lowercases_and_drops_stopwords() {
        let lexemes: Vec<String> = profile_for(Some("en"))
            .tokenize("The Tax-return is DUE, on 2024-05-01!")
            .collect();
        assert_eq!(lexemes, vec!["tax", "return", "due", "2024", "05", "01"]);
    }

    #[test]
    fn simple_profile_keeps_every_word() {
        let lexemes: Vec<String> = SIMPLE.tokenize("the and of").collect();
        assert_eq!(lexemes, vec!["the", "and", "of"]);
    }

    #[test]
    fn tokenize_handles_non_ascii() {
        let lexemes: Vec<String> = profile_for(Some("nb"))
            .tokenize("Søknad om støtte på Ærøy")
            .collect();
        assert_eq!(lexemes, vec!["søknad", "støtte", "ærøy"]);
    }

    #[test]
    fn overlong_words_are_dropped() {
        let long = "x".repeat(MAX_LEXEME_BYTES + 1);
        let text = format!("short {}", long);
        let lexemes: Vec<String> = SIMPLE.tokenize(&text).collect();
        assert_eq!(lexemes, vec!["short"]);
    }
}
