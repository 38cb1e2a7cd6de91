//! Built-in seed taxonomy.

use super::{Provenance, Taxonomy};
use crate::error::TaxonomyError;
use std::sync::LazyLock;

const SEED_TOML: &str = include_str!("../../data/seed_taxonomy.toml");

static SEED: LazyLock<Result<Taxonomy, String>> = LazyLock::new(|| parse_seed(SEED_TOML));

fn parse_seed(source: &str) -> Result<Taxonomy, String> {
    let mut taxonomy: Taxonomy = toml::from_str(source).map_err(|e| e.to_string())?;
    let seed = Provenance::seed();
    for vertical in &mut taxonomy.verticals {
        if vertical.provenance.is_empty() {
            vertical.provenance.push(seed.clone());
        }
        for subtopic in &mut vertical.subtopics {
            if subtopic.provenance.is_empty() {
                subtopic.provenance.push(seed.clone());
            }
            for tactic in subtopic.methods.iter_mut().flat_map(|m| m.tactics.iter_mut()) {
                if tactic.provenance.is_empty() {
                    tactic.provenance.push(seed.clone());
                }
            }
        }
    }
    Ok(taxonomy)
}

/// A fresh copy of the seed taxonomy.
pub fn seed_taxonomy() -> Result<Taxonomy, TaxonomyError> {
    SEED.clone()
        .map_err(|message| TaxonomyError::InvalidSeed { message })
}
