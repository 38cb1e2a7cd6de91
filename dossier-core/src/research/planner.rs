//! Task planning: query templates, taxonomy-derived tactic groups, oracle
//! sectors and fallback padding.

use super::metrics::query_key;
use crate::classifier::{Classification, vertical_seed_query};
use crate::config::RunConfig;
use crate::evidence::RecoverySlots;
use crate::oracle::SectorReply;
use crate::taxonomy::{SlotValues, Taxonomy, expand_templates};
use crate::topic::TopicShape;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const GENERAL_METHOD_TEMPLATES: &[&str] = &[
    "{topic} official documentation",
    "{topic} primary source",
    "{topic} standards specification",
    "{topic} academic paper",
    "{topic} patent",
    "{topic} regulatory guidance",
    "{topic} safety issues",
    "{topic} failure modes",
    "{topic} case study",
    "{topic} forum troubleshooting",
    "{topic} competitive alternatives",
    "{topic} timeline history",
];

pub const ADDRESS_METHOD_TEMPLATES: &[&str] = &[
    "{topic} county assessor",
    "{topic} property appraiser",
    "{topic} central appraisal district",
    "{topic} tax assessor-collector",
    "{topic} parcel map",
    "{topic} GIS map",
    "{topic} deed records",
    "{topic} tax records",
    "{topic} permit history",
    "{topic} zoning",
    "{topic} code violations",
    "{topic} appraisal",
    "{topic} MLS listing",
    "{topic} sale history",
];

pub const GENERAL_DISCOVERY_TEMPLATES: &[&str] = &[
    "how to research {topic}",
    "best sources to research {topic}",
    "where to find primary sources about {topic}",
    "how to verify facts about {topic}",
];

pub const PERSON_DISCOVERY_TEMPLATES: &[&str] = &[
    "how to research a person named {topic}",
    "public records to find information about {topic}",
    "property ownership records for {topic}",
    "how to find news mentions of {topic}",
    "how to find professional profiles for {topic}",
];

pub const ADDRESS_DISCOVERY_TEMPLATES: &[&str] = &[
    "how to research a property at {topic}",
    "where to find property records for {topic}",
    "how to find building permits for {topic}",
    "how to find sale history for {topic}",
];

/// Discovery queries run before planning.
pub const MAX_DISCOVERY_SCOUTS: usize = 3;

/// Slots that name the research subject itself.
const SUBJECT_SLOTS: &[&str] = &[
    "topic", "name", "company", "concept", "title", "event", "product", "condition", "law",
    "drug", "caseName",
];

/// Where a planned task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrigin {
    Sector,
    VerticalSeed,
    Taxonomy,
    Fallback,
}

/// One round-1 search task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub name: String,
    pub focus: String,
    pub query: String,
    pub origin: PlanOrigin,
}

impl PlannedTask {
    pub fn new(
        name: impl Into<String>,
        focus: impl Into<String>,
        query: impl Into<String>,
        origin: PlanOrigin,
    ) -> Self {
        Self {
            name: name.into(),
            focus: focus.into(),
            query: query.into(),
            origin,
        }
    }
}

pub fn fill_topic(template: &str, topic: &str) -> String {
    template.replace("{topic}", topic)
}

pub fn method_templates(shape: TopicShape) -> &'static [&'static str] {
    if shape.is_address() {
        ADDRESS_METHOD_TEMPLATES
    } else {
        GENERAL_METHOD_TEMPLATES
    }
}

pub fn discovery_templates(shape: TopicShape) -> &'static [&'static str] {
    match shape {
        TopicShape::Address => ADDRESS_DISCOVERY_TEMPLATES,
        TopicShape::Person => PERSON_DISCOVERY_TEMPLATES,
        TopicShape::General => GENERAL_DISCOVERY_TEMPLATES,
    }
}

/// Distinct strings, first occurrence wins, empties dropped.
pub fn unique_list<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let item: String = item.into();
        let trimmed = item.trim();
        if !trimmed.is_empty() && seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// At most `min(3, max_method_agents)` shape-specific discovery queries.
pub fn discovery_queries(topic: &str, shape: TopicShape, max_method_agents: usize) -> Vec<String> {
    let mut queries = unique_list(
        discovery_templates(shape)
            .iter()
            .map(|t| fill_topic(t, topic)),
    );
    queries.truncate(MAX_DISCOVERY_SCOUTS.min(max_method_agents));
    queries
}

/// Slot values for expanding taxonomy tactics against a topic.
///
/// Subject slots take the topic itself. Address topics also fill location
/// slots from the parsed address; unfilled slots drop their tactics.
pub fn topic_slots(topic: &str, shape: TopicShape) -> SlotValues {
    let topic = topic.trim();
    let mut slots = SlotValues::new();
    for slot in SUBJECT_SLOTS {
        slots.insert(slot.to_string(), vec![topic.to_string()]);
    }
    if shape.is_address() {
        let parsed = RecoverySlots::from_topic(topic);
        let mut put = |keys: &[&str], value: Option<&String>| {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                for key in keys {
                    slots.insert(key.to_string(), vec![value.clone()]);
                }
            }
        };
        put(&["address"], Some(&parsed.address));
        put(&["city", "cityMetro", "hometown"], parsed.city.as_ref());
        put(&["state", "stateOrCountry"], parsed.state.as_ref());
        put(
            &["countyPrimary", "countyRegion", "countyMetro"],
            parsed.county.as_ref(),
        );
        put(&["propertyAuthorityPrimary"], parsed.authority.as_ref());
    }
    slots
}

/// One seed query per distinct subtopic of every selected vertical, highest
/// vertical weight first. A subtopic contributes its first tactic whose slots
/// all resolve.
pub fn taxonomy_groups(
    taxonomy: &Taxonomy,
    classification: &Classification,
    slots: &SlotValues,
) -> Vec<PlannedTask> {
    let mut selected: Vec<&String> = classification.selected.iter().collect();
    selected.sort_by(|a, b| {
        classification
            .weight_of(b)
            .partial_cmp(&classification.weight_of(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut tasks = Vec::new();
    let mut seen_subtopics = HashSet::new();
    for vertical_id in selected {
        let Some(vertical) = taxonomy.vertical(vertical_id) else {
            continue;
        };
        for subtopic in &vertical.subtopics {
            if !seen_subtopics.insert((vertical.id.as_str(), subtopic.id.as_str())) {
                continue;
            }
            let first = subtopic
                .methods
                .iter()
                .find_map(|m| expand_templates(&m.tactics, slots, false).into_iter().next());
            if let Some(expanded) = first {
                tasks.push(PlannedTask::new(
                    format!("{} / {}", vertical.label, subtopic.label),
                    subtopic
                        .description
                        .clone()
                        .unwrap_or_else(|| subtopic.label.clone()),
                    expanded.query,
                    PlanOrigin::Taxonomy,
                ));
            }
        }
    }
    tasks
}

/// One broad seed query per selected vertical.
pub fn vertical_seed_tasks(classification: &Classification, topic: &str) -> Vec<PlannedTask> {
    classification
        .selected
        .iter()
        .filter_map(|id| {
            vertical_seed_query(id, topic).map(|query| {
                PlannedTask::new(
                    format!("Vertical Seed: {id}"),
                    format!("{id} overview"),
                    query,
                    PlanOrigin::VerticalSeed,
                )
            })
        })
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Oracle-proposed sectors with fallbacks for missing fields.
pub fn sector_tasks(topic: &str, reply: &SectorReply) -> Vec<PlannedTask> {
    reply
        .sectors
        .iter()
        .enumerate()
        .map(|(index, sector)| {
            let name = non_empty(&sector.name)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Researcher {}", index + 1));
            let focus = non_empty(&sector.focus).unwrap_or("General Research").to_string();
            let query = non_empty(&sector.initial_query)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{topic} {focus}"));
            PlannedTask::new(name, focus, query, PlanOrigin::Sector)
        })
        .collect()
}

/// Merge candidates into the round-1 plan.
///
/// Candidates are deduplicated by (name, query) in order, padded with method
/// scouts drawn from the shape's templates not already planned, up to
/// `min_agents`, then truncated to `max_agents`. Padding never repeats a
/// query, so a plan may stay below `min_agents` once templates run out.
pub fn build_plan(
    topic: &str,
    shape: TopicShape,
    candidates: Vec<PlannedTask>,
    config: &RunConfig,
) -> Vec<PlannedTask> {
    let mut seen = HashSet::new();
    let mut plan: Vec<PlannedTask> = candidates
        .into_iter()
        .filter(|t| !t.query.trim().is_empty())
        .filter(|t| seen.insert((t.name.clone(), t.query.clone())))
        .collect();

    if plan.is_empty() {
        plan.push(PlannedTask::new(
            "General Researcher",
            "Overview",
            topic,
            PlanOrigin::Fallback,
        ));
    }

    let planned: HashSet<String> = plan.iter().map(|t| query_key(&t.query)).collect();
    let needed = config.min_agents.saturating_sub(plan.len());
    let scouts: Vec<String> = method_templates(shape)
        .iter()
        .map(|t| fill_topic(t, topic))
        .filter(|q| !planned.contains(&query_key(q)))
        .take(needed)
        .collect();
    for (i, query) in scouts.into_iter().enumerate() {
        plan.push(PlannedTask::new(
            format!("Method Scout {}", i + 1),
            "Method-based deep search",
            query,
            PlanOrigin::Fallback,
        ));
    }

    plan.truncate(config.max_agents);
    plan
}

/// Candidate queries for method-audit rounds: templates, then knowledge-base
/// queries, then methods extracted during discovery. Each round draws the
/// next unissued ones.
pub fn method_audit_pool(
    topic: &str,
    shape: TopicShape,
    knowledge_queries: &[String],
    extracted: &[String],
) -> Vec<String> {
    unique_list(
        method_templates(shape)
            .iter()
            .map(|t| fill_topic(t, topic))
            .chain(knowledge_queries.iter().cloned())
            .chain(extracted.iter().cloned()),
    )
}

/// Candidate queries for exhaustion scouts: templates and knowledge-base
/// queries, in order.
pub fn exhaustion_pool(topic: &str, shape: TopicShape, knowledge_queries: &[String]) -> Vec<String> {
    unique_list(
        method_templates(shape)
            .iter()
            .map(|t| fill_topic(t, topic))
            .chain(knowledge_queries.iter().cloned()),
    )
}
