//! Property-based tests for core components using proptest.

use proptest::prelude::*;

use dossier_core::address::{MAX_ADDRESS_VARIANTS, normalize_address_variants};
use dossier_core::evidence::{evaluate_evidence, score_authority, score_recovery_query};
use dossier_core::parcel::normalize_parcel_id;
use dossier_core::research::diminishing_returns_score;
use dossier_core::research::metrics::query_key;
use dossier_core::sources::{NormalizedSource, RawSource};
use dossier_core::taxonomy::{
    GrowthStore, SlotValues, Tactic, expand_templates, seed_taxonomy,
};
use std::collections::HashSet;

const DOMAINS: &[&str] = &[
    "www.dallascounty.gov",
    "data.cityofdallas.gov",
    "www.zillow.com",
    "www.facebook.com",
    "blog.example.com",
    "records.tx.us",
];

const PATHS: &[&str] = &["assessor/parcel/1", "deed/2", "listing/3", "posts/4", "about", ""];

fn source_strategy() -> impl Strategy<Value = NormalizedSource> {
    (0..DOMAINS.len(), 0..PATHS.len(), "[A-Za-z ]{0,20}").prop_map(|(d, p, title)| {
        let uri = format!("https://{}/{}", DOMAINS[d], PATHS[p]);
        NormalizedSource::from_raw(&RawSource::new(uri, title), "prop").unwrap()
    })
}

fn tactic(id: &str, template: &str) -> Tactic {
    Tactic {
        id: id.to_string(),
        template: template.to_string(),
        notes: None,
        provenance: Vec::new(),
    }
}

// --- Exhaustion metrics properties ---

proptest! {
    #[test]
    fn diminishing_score_stays_in_unit_range(
        domain_gain in any::<f64>(),
        source_gain in any::<f64>(),
        novelty in any::<f64>(),
    ) {
        let score = diminishing_returns_score(domain_gain, source_gain, novelty);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn diminishing_score_falls_as_novelty_rises(
        gain in 0.0f64..=1.0,
        low in 0.0f64..=1.0,
        high in 0.0f64..=1.0,
    ) {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        prop_assert!(
            diminishing_returns_score(gain, gain, high)
                <= diminishing_returns_score(gain, gain, low)
        );
    }

    #[test]
    fn query_key_is_idempotent(query in "[a-zA-Z0-9 \t]{0,40}") {
        let once = query_key(&query);
        prop_assert_eq!(query_key(&once), once.clone());
        prop_assert!(!once.contains("  "));
    }
}

// --- Evidence gate properties ---

proptest! {
    #[test]
    fn authority_score_is_bounded(source in source_strategy()) {
        prop_assert!(score_authority(&source) <= 100);
    }

    #[test]
    fn adding_sources_never_weakens_the_gate(
        sources in prop::collection::vec(source_strategy(), 0..12),
        split in 0usize..12,
    ) {
        let split = split.min(sources.len());
        let before = evaluate_evidence(&sources[..split]);
        let after = evaluate_evidence(&sources);
        prop_assert!(after.total_sources >= before.total_sources);
        prop_assert!(after.authoritative_sources >= before.authoritative_sources);
        prop_assert!(after.max_authority_score >= before.max_authority_score);
        prop_assert!(!before.meets_all || after.meets_all);
    }

    #[test]
    fn duplicate_sources_count_once(source in source_strategy(), copies in 1usize..5) {
        let sources = vec![source; copies];
        prop_assert_eq!(evaluate_evidence(&sources).total_sources, 1);
    }

    #[test]
    fn recovery_score_bounded_by_keyword_weights(query in "[a-z:. ]{0,60}") {
        prop_assert!(score_recovery_query(&query) <= 30);
    }
}

// --- Taxonomy properties ---

proptest! {
    #[test]
    fn expansion_is_cartesian_product(a in 1usize..5, b in 1usize..5) {
        let mut slots = SlotValues::new();
        slots.insert("name".into(), (0..a).map(|i| format!("n{i}")).collect());
        slots.insert("city".into(), (0..b).map(|i| format!("c{i}")).collect());
        let expanded = expand_templates(&[tactic("t", "{name} in {city}")], &slots, false);
        prop_assert_eq!(expanded.len(), a * b);
        let queries: HashSet<&str> = expanded.iter().map(|e| e.query.as_str()).collect();
        prop_assert_eq!(queries.len(), a * b);
        prop_assert!(expanded.iter().all(|e| e.unresolved_slots.is_empty()));
    }

    #[test]
    fn missing_slot_drops_or_keeps_placeholder(a in 1usize..5) {
        let mut slots = SlotValues::new();
        slots.insert("name".into(), (0..a).map(|i| format!("n{i}")).collect());
        let templates = [tactic("t", "{name} {court}")];
        prop_assert!(expand_templates(&templates, &slots, false).is_empty());
        let kept = expand_templates(&templates, &slots, true);
        prop_assert_eq!(kept.len(), a);
        prop_assert!(kept.iter().all(|e| e.unresolved_slots == vec!["court".to_string()]));
    }

    #[test]
    fn growth_merge_is_idempotent(
        templates in prop::collection::vec("[a-z]{3,12} \\{name\\} [a-z]{3,12}", 1..6),
    ) {
        let seed = seed_taxonomy().unwrap();
        let mut store = GrowthStore::default();
        let added = store
            .added_tactics
            .entry("individual".into())
            .or_default()
            .entry("professional".into())
            .or_default();
        for (i, template) in templates.iter().enumerate() {
            added.push(tactic(&format!("individual-professional-prop-{i}"), template));
        }
        let once = seed.merge_growth(&store);
        let twice = once.merge_growth(&store);
        prop_assert_eq!(&once, &twice);
        prop_assert!(once.tactic_count() >= seed.tactic_count());
    }
}

// --- Address and parcel id properties ---

proptest! {
    #[test]
    fn address_variants_are_unique_and_capped(
        number in 1u32..99999,
        street in "[A-Z][a-z]{2,10}",
        suffix in prop::sample::select(vec!["St", "Street", "Ave", "Avenue", "Rd", "Blvd"]),
        city in "[A-Z][a-z]{2,10}",
    ) {
        let raw = format!("{number} {street} {suffix}, {city}, TX");
        let variants = normalize_address_variants(&raw);
        prop_assert!(!variants.is_empty());
        prop_assert!(variants.len() <= MAX_ADDRESS_VARIANTS);
        let unique: HashSet<&String> = variants.iter().collect();
        prop_assert_eq!(unique.len(), variants.len());
        prop_assert!(variants.iter().all(|v| v.starts_with(&number.to_string())));
    }

    #[test]
    fn parcel_id_normalization_is_idempotent(id in "[A-Za-z0-9 .\\-]{0,20}") {
        let once = normalize_parcel_id(&id);
        prop_assert_eq!(normalize_parcel_id(&once), once.clone());
        prop_assert!(once.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
