//! Street address normalization.
//!
//! Expands a raw address into a small set of search variants: abbreviated and
//! spelled-out street suffixes and directionals, unit designator spellings,
//! and the cleaned original. The first variant is the canonical form.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const MAX_ADDRESS_VARIANTS: usize = 4;

struct Spelling {
    abbr: &'static str,
    full: &'static str,
    tokens: &'static [&'static str],
}

const DIRECTIONS: &[Spelling] = &[
    Spelling { abbr: "N", full: "North", tokens: &["north", "n"] },
    Spelling { abbr: "S", full: "South", tokens: &["south", "s"] },
    Spelling { abbr: "E", full: "East", tokens: &["east", "e"] },
    Spelling { abbr: "W", full: "West", tokens: &["west", "w"] },
    Spelling { abbr: "NE", full: "Northeast", tokens: &["northeast", "ne"] },
    Spelling { abbr: "NW", full: "Northwest", tokens: &["northwest", "nw"] },
    Spelling { abbr: "SE", full: "Southeast", tokens: &["southeast", "se"] },
    Spelling { abbr: "SW", full: "Southwest", tokens: &["southwest", "sw"] },
];

const STREET_SUFFIXES: &[Spelling] = &[
    Spelling { abbr: "Aly", full: "Alley", tokens: &["alley", "aly"] },
    Spelling { abbr: "Ave", full: "Avenue", tokens: &["avenue", "ave", "av"] },
    Spelling { abbr: "Blvd", full: "Boulevard", tokens: &["boulevard", "blvd", "boulv"] },
    Spelling { abbr: "Cir", full: "Circle", tokens: &["circle", "cir"] },
    Spelling { abbr: "Ct", full: "Court", tokens: &["court", "ct"] },
    Spelling { abbr: "Dr", full: "Drive", tokens: &["drive", "dr"] },
    Spelling { abbr: "Expy", full: "Expressway", tokens: &["expressway", "expy", "expwy"] },
    Spelling { abbr: "Fwy", full: "Freeway", tokens: &["freeway", "fwy"] },
    Spelling { abbr: "Hwy", full: "Highway", tokens: &["highway", "hwy"] },
    Spelling { abbr: "Ln", full: "Lane", tokens: &["lane", "ln"] },
    Spelling { abbr: "Loop", full: "Loop", tokens: &["loop"] },
    Spelling { abbr: "Pkwy", full: "Parkway", tokens: &["parkway", "pkwy", "pky"] },
    Spelling { abbr: "Pl", full: "Place", tokens: &["place", "pl"] },
    Spelling { abbr: "Plz", full: "Plaza", tokens: &["plaza", "plz"] },
    Spelling { abbr: "Rd", full: "Road", tokens: &["road", "rd"] },
    Spelling { abbr: "Sq", full: "Square", tokens: &["square", "sq"] },
    Spelling { abbr: "St", full: "Street", tokens: &["street", "st"] },
    Spelling { abbr: "Ter", full: "Terrace", tokens: &["terrace", "ter"] },
    Spelling { abbr: "Trl", full: "Trail", tokens: &["trail", "trl"] },
    Spelling { abbr: "Way", full: "Way", tokens: &["way"] },
];

const UNIT_DESIGNATORS: &str =
    r"#|\b(?:apt|apartment|unit|suite|ste|bldg|building|fl|floor|lot|trlr|trailer)\b";

static UNIT_IN_STREET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(.*?)(?:,?\s*({UNIT_DESIGNATORS})\.?\s*([a-zA-Z0-9-]+))$"
    ))
    .unwrap()
});
static UNIT_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^({UNIT_DESIGNATORS})\.?\s*([a-zA-Z0-9-]+)$")).unwrap()
});

fn lookup(table: &'static [Spelling], token: &str) -> Option<&'static Spelling> {
    table.iter().find(|s| s.tokens.contains(&token))
}

fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Unit designator and identifier, e.g. `apt` + `4B`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub designator: String,
    pub id: String,
}

/// A raw address split into its street line, unit, and the remainder
/// (city/state/zip parts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAddress {
    pub cleaned: String,
    pub street_line: String,
    pub unit: Option<UnitInfo>,
    pub remainder: Vec<String>,
}

impl ParsedAddress {
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<String> = raw
            .split(',')
            .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|p| !p.is_empty())
            .collect();
        let cleaned = parts.join(", ");
        let mut street_line = parts.first().cloned()?;
        let mut remainder: Vec<String> = parts.iter().skip(1).cloned().collect();

        let mut unit = None;
        if let Some(caps) = UNIT_IN_STREET.captures(&street_line) {
            let id = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
            if !id.is_empty() {
                unit = Some(UnitInfo {
                    designator: caps[2].to_lowercase(),
                    id: id.to_string(),
                });
                street_line = caps[1].trim().to_string();
            }
        }

        if unit.is_none() {
            if let Some(first) = remainder.first() {
                if let Some(caps) = UNIT_ONLY.captures(first) {
                    unit = Some(UnitInfo {
                        designator: caps[1].to_lowercase(),
                        id: caps[2].trim().to_string(),
                    });
                    remainder.remove(0);
                }
            }
        }

        Some(Self {
            cleaned,
            street_line,
            unit,
            remainder,
        })
    }

    /// Best-effort city from the remainder (first part that is not a state/zip).
    pub fn city(&self) -> Option<&str> {
        self.remainder
            .iter()
            .map(String::as_str)
            .find(|part| !part.chars().any(|c| c.is_ascii_digit()) && part.len() > 2)
    }

    /// Best-effort two-letter state from the remainder.
    pub fn state(&self) -> Option<String> {
        self.remainder.iter().find_map(|part| {
            let token = part.split_whitespace().next()?;
            (token.len() == 2 && token.chars().all(|c| c.is_ascii_alphabetic()))
                .then(|| token.to_ascii_uppercase())
        })
    }
}

#[derive(Clone, Copy)]
enum Mode {
    Abbr,
    Full,
}

fn street_variants(street_line: &str) -> Vec<String> {
    let tokens: Vec<&str> = street_line.split(' ').filter(|t| !t.is_empty()).collect();
    if tokens.is_empty() {
        return Vec::new();
    }
    let normalized: Vec<String> = tokens.iter().map(|t| normalize_token(t)).collect();
    let last = normalized.len() - 1;

    let prefix_direction = (tokens.len() >= 2
        && tokens[0].starts_with(|c: char| c.is_ascii_digit())
        && lookup(DIRECTIONS, &normalized[1]).is_some())
    .then_some(1);

    let suffix_direction = lookup(DIRECTIONS, &normalized[last]).is_some().then_some(last);

    let suffix = match suffix_direction {
        Some(0) => None,
        Some(idx) => Some(idx - 1),
        None => Some(last),
    }
    .filter(|&idx| lookup(STREET_SUFFIXES, &normalized[idx]).is_some());

    let build = |mode: Mode| -> String {
        let mut updated: Vec<&str> = tokens.clone();
        let mut replace = |idx: Option<usize>, table: &'static [Spelling]| {
            if let Some(idx) = idx {
                if let Some(spelling) = lookup(table, &normalized[idx]) {
                    updated[idx] = match mode {
                        Mode::Abbr => spelling.abbr,
                        Mode::Full => spelling.full,
                    };
                }
            }
        };
        replace(prefix_direction, DIRECTIONS);
        replace(suffix_direction, DIRECTIONS);
        replace(suffix, STREET_SUFFIXES);
        updated.join(" ")
    };

    unique(vec![build(Mode::Abbr), build(Mode::Full), tokens.join(" ")])
}

fn unit_variants(unit: Option<&UnitInfo>) -> Vec<String> {
    let Some(unit) = unit else {
        return Vec::new();
    };
    let id = &unit.id;
    let (abbr, full, hash) = match unit.designator.as_str() {
        "apt" | "apartment" => ("Apt", "Apartment", true),
        "suite" | "ste" => ("Ste", "Suite", false),
        "unit" | "#" => ("Unit", "Unit", true),
        "bldg" | "building" => ("Bldg", "Building", false),
        "fl" | "floor" => ("Fl", "Floor", false),
        "lot" => ("Lot", "Lot", false),
        "trlr" | "trailer" => ("Trlr", "Trailer", false),
        _ => ("Unit", "Unit", false),
    };
    let mut variants = vec![format!("{abbr} {id}"), format!("{full} {id}")];
    if hash {
        variants.push(format!("#{id}"));
    }
    unique(variants)
}

fn join_address(street: &str, unit: &str, remainder: &str) -> String {
    let base = if unit.is_empty() {
        street.to_string()
    } else {
        format!("{street} {unit}")
    };
    if remainder.is_empty() {
        base
    } else {
        format!("{base}, {remainder}")
    }
}

fn unique(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Expand a raw address into at most [`MAX_ADDRESS_VARIANTS`] search variants.
///
/// Street variants come first in abbreviated, spelled-out, then original form,
/// each combined with every unit spelling; the whitespace-cleaned input is
/// always a candidate. Returns an empty list for blank input.
pub fn normalize_address_variants(raw: &str) -> Vec<String> {
    let Some(parsed) = ParsedAddress::parse(raw) else {
        return Vec::new();
    };
    let remainder = parsed.remainder.join(", ");
    let streets = street_variants(&parsed.street_line);
    let units = unit_variants(parsed.unit.as_ref());

    let mut addresses = Vec::new();
    if streets.is_empty() {
        addresses.push(parsed.cleaned.clone());
    } else if units.is_empty() {
        for street in &streets {
            addresses.push(join_address(street, "", &remainder));
        }
    } else {
        for street in &streets {
            for unit in &units {
                addresses.push(join_address(street, unit, &remainder));
            }
        }
    }
    addresses.push(parsed.cleaned);

    let mut variants = unique(addresses);
    variants.truncate(MAX_ADDRESS_VARIANTS);
    variants
}

/// Canonical (first) variant, or the trimmed input when nothing parses.
pub fn canonical_address(raw: &str) -> String {
    normalize_address_variants(raw)
        .into_iter()
        .next()
        .unwrap_or_else(|| raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_suffix_and_direction_variants() {
        let variants = normalize_address_variants("123 north main street, Dallas, TX 75201");
        assert_eq!(
            variants,
            vec![
                "123 N main St, Dallas, TX 75201".to_string(),
                "123 North main Street, Dallas, TX 75201".to_string(),
                "123 north main street, Dallas, TX 75201".to_string(),
            ]
        );
    }

    #[test]
    fn test_trailing_direction_moves_suffix_index() {
        let variants = normalize_address_variants("500 Elm Ave SW");
        assert_eq!(variants[0], "500 Elm Ave SW");
        assert_eq!(variants[1], "500 Elm Avenue Southwest");
    }

    #[test]
    fn test_unit_in_street_line() {
        let variants = normalize_address_variants("1500 Marilla St Apt 4B, Dallas, TX");
        assert_eq!(variants.len(), MAX_ADDRESS_VARIANTS);
        assert_eq!(variants[0], "1500 Marilla St Apt 4B, Dallas, TX");
        assert_eq!(variants[1], "1500 Marilla St Apartment 4B, Dallas, TX");
        assert_eq!(variants[2], "1500 Marilla St #4B, Dallas, TX");
        assert_eq!(variants[3], "1500 Marilla Street Apt 4B, Dallas, TX");
    }

    #[test]
    fn test_unit_in_remainder_part() {
        let parsed = ParsedAddress::parse("77 Oak Ln, Suite 200, Austin, TX").unwrap();
        assert_eq!(
            parsed.unit,
            Some(UnitInfo {
                designator: "suite".into(),
                id: "200".into()
            })
        );
        assert_eq!(parsed.remainder, vec!["Austin".to_string(), "TX".to_string()]);
        let variants = normalize_address_variants("77 Oak Ln, Suite 200, Austin, TX");
        assert_eq!(variants[0], "77 Oak Ln Ste 200, Austin, TX");
    }

    #[test]
    fn test_hash_unit() {
        let parsed = ParsedAddress::parse("9 Pine Rd #12").unwrap();
        assert_eq!(parsed.street_line, "9 Pine Rd");
        assert_eq!(parsed.unit.unwrap().designator, "#");
    }

    #[test]
    fn test_blank_input() {
        assert!(normalize_address_variants("   ").is_empty());
        assert_eq!(canonical_address("  "), "");
    }

    #[test]
    fn test_cleans_whitespace_and_keeps_original() {
        let variants = normalize_address_variants("  42   Wallaby   Way ,  Sydney ");
        assert_eq!(variants, vec!["42 Wallaby Way, Sydney".to_string()]);
    }

    #[test]
    fn test_city_and_state_extraction() {
        let parsed = ParsedAddress::parse("1500 Marilla St, Dallas, TX 75201").unwrap();
        assert_eq!(parsed.city(), Some("Dallas"));
        assert_eq!(parsed.state(), Some("TX".to_string()));
    }
}
