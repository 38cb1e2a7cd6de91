//! Topic shape detection.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static MULTI_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{2,}").unwrap());
static STREET_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(ave|avenue|st|street|rd|road|blvd|boulevard|ln|lane|dr|drive|ct|court|cir|circle|way|pkwy|parkway|pl|place|hwy|highway)\b",
    )
    .unwrap()
});
static ZIP_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{5}(?:-\d{4})?\b").unwrap());

/// Coarse shape of a research topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicShape {
    Address,
    Person,
    General,
}

impl TopicShape {
    pub fn of(topic: &str) -> Self {
        if is_address_like(topic) {
            TopicShape::Address
        } else if is_person_like(topic) {
            TopicShape::Person
        } else {
            TopicShape::General
        }
    }

    pub fn is_address(self) -> bool {
        self == TopicShape::Address
    }
}

/// A street number plus a street-suffix word, or a ZIP code.
pub fn is_address_like(topic: &str) -> bool {
    (MULTI_DIGIT.is_match(topic) && STREET_WORD.is_match(topic)) || ZIP_CODE.is_match(topic)
}

/// Two or more words and no digits.
pub fn is_person_like(topic: &str) -> bool {
    topic.split_whitespace().count() >= 2 && !topic.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_like() {
        assert!(is_address_like("1500 Marilla St, Dallas, TX"));
        assert!(is_address_like("Somewhere 75201"));
        assert!(is_address_like("4 Elm Rd 02139-1234"));
        assert!(!is_address_like("Main Street"));
        assert!(!is_address_like("Ada Lovelace"));
        assert!(!is_address_like("7 Dr"));
    }

    #[test]
    fn test_person_like() {
        assert!(is_person_like("Ada Lovelace"));
        assert!(!is_person_like("Rust"));
        assert!(!is_person_like("Apollo 11"));
    }

    #[test]
    fn test_shape_precedence() {
        assert_eq!(TopicShape::of("1500 Marilla St, Dallas"), TopicShape::Address);
        assert_eq!(TopicShape::of("Grace Hopper"), TopicShape::Person);
        assert_eq!(TopicShape::of("photosynthesis"), TopicShape::General);
        assert!(TopicShape::Address.is_address());
    }
}
