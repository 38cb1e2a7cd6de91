//! Vertical classification.
//!
//! Maps a topic to a weight distribution over taxonomy verticals. The oracle's
//! answer is normalized and checked for uncertainty; keyword rules provide
//! hints to the oracle and the fallback distribution when its answer is
//! unusable.

use crate::oracle::{ClassificationReply, Parsed, VerticalWeight};
use crate::taxonomy::GENERAL_VERTICAL_ID;
use crate::topic::{is_address_like, is_person_like};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const UNCERTAIN_TOP_WEIGHT: f64 = 0.5;
pub const UNCERTAIN_CONFIDENCE: f64 = 0.6;
pub const UNCERTAIN_GAP: f64 = 0.1;
pub const SELECT_MIN_WEIGHT: f64 = 0.25;
pub const SELECT_NEAR_TOP: f64 = 0.15;
pub const SELECT_NEAR_TOP_MIN_WEIGHT: f64 = 0.1;
pub const MAX_DISCOVERY_QUERIES: usize = 2;

const WEIGHT_EPSILON: f64 = 1e-9;

fn word_regex(words: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b({words})\b")).unwrap()
}

static CORP_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(inc|llc|ltd|corp|corporation|company)\b|\bco\.").unwrap());
static PRODUCT_TERMS: LazyLock<Regex> =
    LazyLock::new(|| word_regex("product|device|software|app|platform|tool|service"));
static LOCATION_TERMS: LazyLock<Regex> =
    LazyLock::new(|| word_regex("city|county|state|province|region|district"));
static EVENT_TERMS: LazyLock<Regex> =
    LazyLock::new(|| word_regex("event|incident|summit|conference|protest"));
static LEGAL_TERMS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(law|statute|regulation|act|code)\b|\bv\.").unwrap());
static MEDICAL_TERMS: LazyLock<Regex> =
    LazyLock::new(|| word_regex("disease|condition|syndrome|drug|medication|anatomy"));
static CREATIVE_TERMS: LazyLock<Regex> =
    LazyLock::new(|| word_regex("film|movie|book|novel|album|song|painting"));
static RECEPTION_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    word_regex(
        r"review|reviews|rating|ratings|critic|critics|audience|sentiment|award|awards|nomination|box office|rotten\s+tomatoes|metacritic|goodreads|imdb|omdb",
    )
});
static TECHNICAL_TERMS: LazyLock<Regex> =
    LazyLock::new(|| word_regex("algorithm|protocol|framework|library|api|system"));
static NONTECHNICAL_TERMS: LazyLock<Regex> =
    LazyLock::new(|| word_regex("theory|movement|ideology|philosophy"));

struct HintContext<'a> {
    topic: &'a str,
    creative: bool,
    reception: bool,
}

/// A keyword rule mapping topic text to a vertical.
pub struct HintRule {
    pub id: &'static str,
    pub vertical_id: &'static str,
    pub signals: &'static str,
    matches: fn(&HintContext<'_>) -> bool,
}

pub static HINT_RULES: &[HintRule] = &[
    HintRule {
        id: "person_like",
        vertical_id: "individual",
        signals: "Looks like a person name (2+ words, no digits).",
        matches: |c| is_person_like(c.topic),
    },
    HintRule {
        id: "address_like",
        vertical_id: "location",
        signals: "Street address or ZIP code present.",
        matches: |c| is_address_like(c.topic),
    },
    HintRule {
        id: "corp_suffix",
        vertical_id: "corporation",
        signals: "Company suffix (inc, llc, ltd, corp, co.).",
        matches: |c| CORP_SUFFIX.is_match(c.topic),
    },
    HintRule {
        id: "product_terms",
        vertical_id: "product",
        signals: "Product or service terms.",
        matches: |c| PRODUCT_TERMS.is_match(c.topic),
    },
    HintRule {
        id: "location_terms",
        vertical_id: "location",
        signals: "Location terms (city, county, state, province, region, district).",
        matches: |c| LOCATION_TERMS.is_match(c.topic),
    },
    HintRule {
        id: "event_terms",
        vertical_id: "event",
        signals: "Event terms (event, incident, summit, conference, protest).",
        matches: |c| EVENT_TERMS.is_match(c.topic),
    },
    HintRule {
        id: "legal_terms",
        vertical_id: "legal_matter",
        signals: "Legal terms (law, statute, regulation, act, code, v.).",
        matches: |c| LEGAL_TERMS.is_match(c.topic),
    },
    HintRule {
        id: "medical_terms",
        vertical_id: "medical_subject",
        signals: "Medical terms (disease, condition, syndrome, drug, medication, anatomy).",
        matches: |c| MEDICAL_TERMS.is_match(c.topic),
    },
    HintRule {
        id: "creative_work_terms",
        vertical_id: "creative_work",
        signals: "Creative work terms (film, movie, book, novel, album, song, painting).",
        matches: |c| c.creative,
    },
    HintRule {
        id: "reception_signals",
        vertical_id: "reception",
        signals: "Reception signals (reviews, ratings, critics, awards, box office).",
        matches: |c| c.reception,
    },
    HintRule {
        id: "reception_from_creative_work",
        vertical_id: "reception",
        signals: "Creative work topics implicitly include reception coverage.",
        matches: |c| c.creative,
    },
    HintRule {
        id: "technical_terms",
        vertical_id: "technical_concept",
        signals: "Technical terms (algorithm, protocol, framework, library, api, system).",
        matches: |c| TECHNICAL_TERMS.is_match(c.topic),
    },
    HintRule {
        id: "nontechnical_terms",
        vertical_id: "nontechnical_concept",
        signals: "Non-technical concepts (theory, movement, ideology, philosophy).",
        matches: |c| NONTECHNICAL_TERMS.is_match(c.topic),
    },
];

/// Vertical ids suggested by keyword rules, in rule order, deduplicated.
/// Falls back to the general discovery vertical when nothing matches.
pub fn infer_vertical_hints(topic: &str) -> Vec<String> {
    let context = HintContext {
        topic,
        creative: CREATIVE_TERMS.is_match(topic),
        reception: RECEPTION_TERMS.is_match(topic),
    };
    let mut hints: Vec<String> = Vec::new();
    for rule in HINT_RULES {
        if (rule.matches)(&context) && !hints.iter().any(|h| h == rule.vertical_id) {
            hints.push(rule.vertical_id.to_string());
        }
    }
    if hints.is_empty() {
        hints.push(GENERAL_VERTICAL_ID.to_string());
    }
    hints
}

/// One broad query per vertical, `{topic}` substituted by the caller.
pub const VERTICAL_SEED_QUERIES: &[(&str, &str)] = &[
    ("individual", "\"{topic}\" biography"),
    ("corporation", "\"{topic}\" company profile"),
    ("product", "\"{topic}\" specifications"),
    ("location", "\"{topic}\" demographics"),
    ("event", "\"{topic}\" timeline"),
    ("technical_concept", "\"{topic}\" implementation"),
    ("nontechnical_concept", "\"{topic}\" definition"),
    ("creative_work", "\"{topic}\" review"),
    ("reception", "\"{topic}\" reviews"),
    ("medical_subject", "\"{topic}\" overview"),
    ("legal_matter", "\"{topic}\" summary"),
    ("general_discovery", "{topic} overview"),
];

pub fn vertical_seed_query(vertical_id: &str, topic: &str) -> Option<String> {
    VERTICAL_SEED_QUERIES
        .iter()
        .find(|(id, _)| *id == vertical_id)
        .map(|(_, template)| template.replace("{topic}", topic))
}

/// Where a classification's weights came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Oracle,
    Hints,
}

/// A normalized vertical classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Weights over valid vertical ids, summing to 1, highest first.
    pub weights: Vec<VerticalWeight>,
    pub confidence: f64,
    pub is_uncertain: bool,
    /// Verticals that drive planning.
    pub selected: Vec<String>,
    pub hints: Vec<String>,
    pub source: ClassificationSource,
    pub rationale: Option<String>,
}

impl Classification {
    pub fn top(&self) -> Option<&VerticalWeight> {
        self.weights.first()
    }

    pub fn weight_of(&self, vertical_id: &str) -> f64 {
        self.weights
            .iter()
            .find(|w| w.id == vertical_id)
            .map(|w| w.weight)
            .unwrap_or(0.0)
    }

    /// Equal weights over the keyword hints.
    pub fn from_hints(hints: &[String], valid_ids: &[&str]) -> Self {
        let mut ids: Vec<&str> = hints
            .iter()
            .map(String::as_str)
            .filter(|h| valid_ids.contains(h))
            .collect();
        if ids.is_empty() {
            ids.push(GENERAL_VERTICAL_ID);
        }
        let share = 1.0 / ids.len() as f64;
        let weights: Vec<VerticalWeight> = ids
            .iter()
            .map(|id| VerticalWeight {
                id: id.to_string(),
                weight: share,
            })
            .collect();
        let selected = select_verticals(&weights);
        Self {
            weights,
            confidence: 0.0,
            is_uncertain: true,
            selected,
            hints: hints.to_vec(),
            source: ClassificationSource::Hints,
            rationale: None,
        }
    }
}

/// Turn an oracle reply into a classification.
///
/// Unknown ids and non-positive weights are dropped, duplicate ids summed,
/// and the rest re-normalized to sum to 1. An unusable reply falls back to
/// equal weights over `hints`.
pub fn normalize_classification(
    reply: Parsed<ClassificationReply>,
    valid_ids: &[&str],
    hints: &[String],
) -> Classification {
    let Some(reply) = reply.ok() else {
        return Classification::from_hints(hints, valid_ids);
    };

    let mut weights: Vec<VerticalWeight> = Vec::new();
    for entry in &reply.verticals {
        if !valid_ids.contains(&entry.id.as_str()) || !entry.weight.is_finite() || entry.weight <= 0.0
        {
            continue;
        }
        match weights.iter_mut().find(|w| w.id == entry.id) {
            Some(existing) => existing.weight += entry.weight,
            None => weights.push(entry.clone()),
        }
    }
    let total: f64 = weights.iter().map(|w| w.weight).sum();
    if weights.is_empty() || total <= 0.0 {
        return Classification::from_hints(hints, valid_ids);
    }
    for w in &mut weights {
        w.weight /= total;
    }
    weights.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let top = weights[0].weight;
    let second = weights.get(1).map(|w| w.weight).unwrap_or(0.0);
    let confidence = reply.confidence.map(|c| c.clamp(0.0, 1.0)).unwrap_or(top);
    let is_uncertain = reply.is_uncertain
        || top < UNCERTAIN_TOP_WEIGHT
        || confidence < UNCERTAIN_CONFIDENCE
        || top - second < UNCERTAIN_GAP;
    let selected = select_verticals(&weights);

    Classification {
        weights,
        confidence,
        is_uncertain,
        selected,
        hints: hints.to_vec(),
        source: ClassificationSource::Oracle,
        rationale: reply.rationale,
    }
}

/// Pick the verticals that drive planning from weights sorted highest first.
pub fn select_verticals(weights: &[VerticalWeight]) -> Vec<String> {
    let Some(top) = weights.first().map(|w| w.weight) else {
        return vec![GENERAL_VERTICAL_ID.to_string()];
    };
    let mut selected: Vec<String> = weights
        .iter()
        .filter(|w| {
            w.weight + WEIGHT_EPSILON >= SELECT_MIN_WEIGHT
                || (top - w.weight <= SELECT_NEAR_TOP + WEIGHT_EPSILON
                    && w.weight + WEIGHT_EPSILON >= SELECT_NEAR_TOP_MIN_WEIGHT)
        })
        .map(|w| w.id.clone())
        .collect();
    if selected.len() > 1 {
        selected.retain(|id| id != GENERAL_VERTICAL_ID);
    }
    if selected.is_empty() {
        selected.push(weights[0].id.clone());
    }
    selected
}
