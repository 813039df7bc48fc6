// src/utils/text.rs
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Failed to compile WHITESPACE_RE"));

/// Strips diacritics and ASCII punctuation, uppercases and collapses whitespace.
/// "Cia. Energética de São Paulo" -> "CIA ENERGETICA DE SAO PAULO"
pub fn clean_text(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| !c.is_ascii_punctuation())
        .collect::<String>()
        .to_uppercase();
    WHITESPACE_RE.replace_all(folded.trim(), " ").into_owned()
}

/// Cleans a company name and removes legal-status suffixes such as
/// "EM LIQUIDACAO" or "EM RECUPERACAO JUDICIAL".
pub fn clean_company_name(name: &str, legal_terms: &[String]) -> String {
    let mut cleaned = format!(" {} ", clean_text(name));

    // Longest first: "EM LIQUIDACAO EXTRAJUDICIAL" before "EM LIQUIDACAO".
    let mut terms: Vec<String> = legal_terms
        .iter()
        .map(|t| clean_text(t))
        .filter(|t| !t.is_empty())
        .collect();
    terms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    for term in &terms {
        let needle = format!(" {} ", term);
        while let Some(pos) = cleaned.find(&needle) {
            cleaned.replace_range(pos..pos + needle.len(), " ");
        }
    }

    WHITESPACE_RE.replace_all(cleaned.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms() -> Vec<String> {
        ["EM LIQUIDACAO", "EXTRAJUDICIAL", "EM RECUPERACAO JUDICIAL", "EM LIQUIDACAO EXTRAJUDICIAL"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_clean_text_strips_accents_and_punctuation() {
        assert_eq!(clean_text("  Cia. Energética   de São Paulo "), "CIA ENERGETICA DE SAO PAULO");
        assert_eq!(clean_text("Embraer S.A."), "EMBRAER SA");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn test_clean_company_name_removes_legal_status() {
        assert_eq!(
            clean_company_name("Mundial S.A. - Em Recuperação Judicial", &terms()),
            "MUNDIAL SA"
        );
        assert_eq!(
            clean_company_name("Banco X S.A. em Liquidação Extrajudicial", &terms()),
            "BANCO X SA"
        );
        assert_eq!(clean_company_name("Petrobras", &terms()), "PETROBRAS");
    }

    #[test]
    fn test_clean_company_name_keeps_partial_words() {
        // "EM LIQUIDACAO" must match on word boundaries only.
        assert_eq!(clean_company_name("Temliquidacao SA", &terms()), "TEMLIQUIDACAO SA");
    }
}
