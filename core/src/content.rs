//! Free-text transfer description parsing.
//!
//! Pure: no storage access. The matcher turns the clues found here into a
//! player by asking the directory.
//!
//!   - has_keyword: any configured keyword, case-insensitive substring.
//!   - short code: prefix letter + exactly three digits, case-insensitive.
//!   - name: text before the first keyword (tried in table order) that does not
//!     start the content, with filler phrases removed as whole words and
//!     whitespace collapsed.

use crate::{config::MatchingConfig, error::LedgerResult, player::ShortCode};
use regex::Regex;

/// Everything the description says about who paid.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PayerClues {
    pub short_code: Option<ShortCode>,
    pub name: Option<String>,
}

impl PayerClues {
    pub fn is_empty(&self) -> bool {
        self.short_code.is_none() && self.name.is_none()
    }
}

pub struct ContentRules {
    keywords: Vec<Regex>,
    fillers: Vec<Regex>,
    short_code: Regex,
    prefix: char,
}

impl ContentRules {
    pub fn new(config: &MatchingConfig) -> LedgerResult<Self> {
        let keywords = config
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| Regex::new(&format!("(?i){}", regex::escape(k))))
            .collect::<Result<Vec<_>, _>>()?;
        let fillers = config
            .filler_phrases
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(p))))
            .collect::<Result<Vec<_>, _>>()?;
        let prefix = config.short_code_prefix.to_ascii_uppercase();
        let short_code = Regex::new(&format!(
            r"(?i){}(\d{{3}})(?:\D|$)",
            regex::escape(&prefix.to_string())
        ))?;
        Ok(Self {
            keywords,
            fillers,
            short_code,
            prefix,
        })
    }

    pub fn has_keyword(&self, content: &str) -> bool {
        self.keywords.iter().any(|k| k.is_match(content))
    }

    /// First well-formed short code in the content.
    pub fn extract_short_code(&self, content: &str) -> Option<ShortCode> {
        self.short_code
            .captures_iter(content)
            .filter_map(|c| c.get(1))
            .find_map(|digits| ShortCode::new(self.prefix, digits.as_str().parse().ok()?))
    }

    /// Display name written before the payment keyword, if any.
    pub fn extract_name(&self, content: &str) -> Option<String> {
        for keyword in &self.keywords {
            let Some(found) = keyword.find(content) else {
                continue;
            };
            if found.start() == 0 {
                continue;
            }
            let mut name = content[..found.start()].to_string();
            for filler in &self.fillers {
                name = filler.replace_all(&name, " ").into_owned();
            }
            let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
            let name = name.trim_matches(|c: char| !c.is_alphanumeric());
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
        None
    }

    pub fn clues(&self, content: &str) -> PayerClues {
        PayerClues {
            short_code: self.extract_short_code(content),
            name: self.extract_name(content),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ContentRules {
        ContentRules::new(&MatchingConfig::default()).expect("default rules compile")
    }

    #[test]
    fn keyword_detection_table() {
        let rules = rules();
        let cases: &[(&str, bool)] = &[
            ("Manh thanh toan cau long", true),
            ("Manh thanh toan caulong", true),
            ("Manh thanh toan badminton", true),
            ("Manh thanh toan cl", true),
            ("MANH THANH TOAN CAU LONG", true),
            ("manh Cau Long", true),
            ("", false),
            ("Random content", false),
            ("Random transfer", false),
            ("Manh thanh toan tennis", false),
        ];
        for (content, expected) in cases {
            assert_eq!(rules.has_keyword(content), *expected, "content: {content:?}");
        }
    }

    #[test]
    fn name_extraction_table() {
        let rules = rules();
        let cases: &[(&str, Option<&str>)] = &[
            ("Manh thanh toan cau long", Some("Manh")),
            ("Manh cau long", Some("Manh")),
            ("Nguyen Van A thanh toan cau long", Some("Nguyen Van A")),
            ("Manh caulong", Some("Manh")),
            ("Manh thanh toan caulong", Some("Manh")),
            ("Manh badminton", Some("Manh")),
            ("Manh thanh toan badminton", Some("Manh")),
            ("Manh cl", Some("Manh")),
            ("Manh thanh toan cl", Some("Manh")),
            ("MANH CAU LONG", Some("MANH")),
            ("manh Cau Long", Some("manh")),
            ("Manh tt cau long", Some("Manh")),
            ("Manh chuyen tien cau long", Some("Manh")),
            ("Manh tra tien cau long", Some("Manh")),
            ("Manh gui tien cau long", Some("Manh")),
            ("Manh nop tien cau long", Some("Manh")),
            ("Manh dong tien cau long", Some("Manh")),
            ("Manh  THANH TOAN   cau long", Some("Manh")),
            ("Manh - cau long", Some("Manh")),
            ("Mạnh thanh toán cầu lông badminton", Some("Mạnh thanh toán cầu lông")),
            ("cau long", None),
            ("   cau long", None),
            ("thanh toan cau long", None),
            ("", None),
            ("Random content", None),
        ];
        for (content, expected) in cases {
            assert_eq!(
                rules.extract_name(content).as_deref(),
                *expected,
                "content: {content:?}"
            );
        }
    }

    #[test]
    fn filler_phrases_only_strip_whole_words() {
        let rules = rules();
        // "tt" inside "Matt" is part of the name.
        assert_eq!(rules.extract_name("Matt cau long").as_deref(), Some("Matt"));
    }

    #[test]
    fn short_code_table() {
        let rules = rules();
        let cases: &[(&str, Option<&str>)] = &[
            ("Manh thanh toan cau long P001", Some("P001")),
            ("Manh thanh toan cau long - 28122025 - P001", Some("P001")),
            ("manh thanh toan cau long p002", Some("P002")),
            ("Random text P002 more text", Some("P002")),
            ("P010cau long", Some("P010")),
            ("Manh thanh toan cau long", None),
            ("Manh P0012 cau long", None),
            ("Manh P000 cau long", None),
            ("Manh Q001 cau long", None),
            ("", None),
        ];
        for (content, expected) in cases {
            assert_eq!(
                rules.extract_short_code(content).map(|c| c.to_string()).as_deref(),
                *expected,
                "content: {content:?}"
            );
        }
    }

    #[test]
    fn clues_carry_both_tiers() {
        let clues = rules().clues("Minh thanh toan cau long P002");
        assert_eq!(clues.short_code.map(|c| c.to_string()).as_deref(), Some("P002"));
        assert_eq!(clues.name.as_deref(), Some("Minh"));
        assert!(rules().clues("nothing useful").is_empty());
    }

    #[test]
    fn custom_keywords_and_prefix() {
        let config = MatchingConfig {
            keywords: vec!["court fee".into()],
            filler_phrases: vec!["paid".into()],
            short_code_prefix: 'm',
        };
        let rules = ContentRules::new(&config).unwrap();
        assert!(rules.has_keyword("Anna paid COURT FEE"));
        assert_eq!(rules.extract_name("Anna paid court fee").as_deref(), Some("Anna"));
        assert_eq!(
            rules.extract_short_code("court fee M042").map(|c| c.to_string()).as_deref(),
            Some("M042")
        );
    }
}
