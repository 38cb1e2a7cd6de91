//! CLI subcommand handlers.

use crate::replay::ReplayScript;
use crate::{Commands, ConfigAction, TaxonomyAction};
use chrono::Utc;
use dossier_core::cache::{CacheSnapshot, PersistentCache};
use dossier_core::evidence::{RecoveryCache, classify_source, evaluate_evidence, score_authority};
use dossier_core::parcel::{CachingGeocoder, GeocodeResult, ParcelProviders};
use dossier_core::persistence::JsonFilePort;
use dossier_core::research::{
    ExhaustionMetrics, KnowledgeBase, KnowledgeStore, LogEntry, LogLevel, RunObserver, RunPhase,
    Task,
};
use dossier_core::sources::{NormalizedSource, RawSource, normalize_sources};
use dossier_core::taxonomy::{
    GrowthStore, Provenance, ProvenanceSource, SlotValues, TaxonomyProposalBundle, TaxonomyStore,
    expand_vertical,
};
use dossier_core::{DossierConfig, FinalReport, Orchestrator, normalize_address_variants};
use std::path::Path;
use std::sync::Arc;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            topic,
            script,
            max_rounds,
            force_exhaustion,
        } => {
            let mut config = load(workspace)?;
            if let Some(rounds) = max_rounds {
                config.run.max_rounds = rounds;
            }
            if force_exhaustion {
                config.run.force_exhaustion = true;
            }
            let script = ReplayScript::load(&script)?;
            let report = execute_run(&topic, &script, &config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Taxonomy { action } => handle_taxonomy(action, workspace).await,
        Commands::Address { raw } => {
            for variant in address_variants(&raw)? {
                println!("{}", variant);
            }
            Ok(())
        }
        Commands::Evidence { file } => {
            let data = std::fs::read_to_string(&file)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;
            let raw: Vec<RawSource> = serde_json::from_str(&data)
                .map_err(|e| anyhow::anyhow!("Invalid source list: {}", e))?;
            print!("{}", evidence_report(&raw));
            Ok(())
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load(workspace)?;
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
        },
    }
}

fn load(workspace: &Path) -> anyhow::Result<DossierConfig> {
    dossier_core::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

fn open_taxonomy(config: &DossierConfig) -> anyhow::Result<Arc<TaxonomyStore>> {
    let port = JsonFilePort::<GrowthStore>::new(config.storage.taxonomy_path());
    let store = TaxonomyStore::new(Arc::new(port))?;
    Ok(Arc::new(store))
}

/// Forwards the run narrative to tracing.
struct NarrativeObserver;

impl RunObserver for NarrativeObserver {
    fn on_phase_change(&self, generation: u64, phase: RunPhase) {
        tracing::debug!(generation, %phase, "Phase changed");
    }

    fn on_log(&self, entry: &LogEntry) {
        match entry.level {
            LogLevel::Warning => tracing::warn!(task = %entry.task_name, "{}", entry.message),
            LogLevel::Error => tracing::error!(task = %entry.task_name, "{}", entry.message),
            _ => tracing::info!(task = %entry.task_name, "{}", entry.message),
        }
    }

    fn on_task_update(&self, task: &Task) {
        tracing::trace!(task = %task.name, status = ?task.status, "Task updated");
    }

    fn on_metrics(&self, metrics: &ExhaustionMetrics) {
        tracing::debug!(
            label = %metrics.label,
            novelty = metrics.query_novelty_ratio,
            new_domains = metrics.new_domains,
            score = metrics.diminishing_returns_score,
            "Round metrics"
        );
    }

    fn on_report(&self, report: &FinalReport) {
        tracing::info!(sections = report.sections.len(), "Report ready");
    }
}

/// Run one research pass against a replay script with the persisted stores.
/// Ctrl-C cancels the run.
pub async fn execute_run(
    topic: &str,
    script: &ReplayScript,
    config: &DossierConfig,
) -> anyhow::Result<FinalReport> {
    let oracle = Arc::new(script.oracle()?);
    let taxonomy = open_taxonomy(config)?;
    let knowledge = Arc::new(KnowledgeStore::new(Arc::new(JsonFilePort::<KnowledgeBase>::new(
        config.storage.knowledge_path(),
    ))));
    let recovery_cache = Arc::new(RecoveryCache::open(
        Arc::new(JsonFilePort::<CacheSnapshot<Vec<NormalizedSource>>>::new(
            config.storage.recovery_cache_path(),
        )),
        config.cache.recovery_ttl_secs,
        config.cache.recovery_max_entries,
    ));

    let mut orchestrator = Orchestrator::new(oracle, taxonomy, config)
        .with_knowledge(knowledge)
        .with_recovery_cache(recovery_cache)
        .with_observer(Arc::new(NarrativeObserver));
    if let Some(fixtures) = script.fixture_providers() {
        let geocodes = Arc::new(PersistentCache::<GeocodeResult>::open(
            Arc::new(JsonFilePort::<CacheSnapshot<GeocodeResult>>::new(
                config.storage.geocode_cache_path(),
            )),
            config.cache.geocode_ttl_secs,
            config.cache.geocode_max_entries,
        ));
        let providers: Arc<dyn ParcelProviders> =
            Arc::new(CachingGeocoder::new(Arc::new(fixtures), geocodes));
        orchestrator = orchestrator.with_providers(providers);
    }

    let run = orchestrator.run(topic);
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; cancelling run");
            orchestrator.cancel();
            run.await
        }
    };
    Ok(result?)
}

async fn handle_taxonomy(action: TaxonomyAction, workspace: &Path) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let store = open_taxonomy(&config)?;
    match action {
        TaxonomyAction::Summary => {
            let taxonomy = store.taxonomy();
            for vertical in &taxonomy.verticals {
                println!(
                    "{} ({}): {} tactics",
                    vertical.id,
                    vertical.label,
                    vertical.tactics().count()
                );
                for subtopic in &vertical.subtopics {
                    println!("  - {} ({})", subtopic.id, subtopic.label);
                }
            }
            println!("\nTotal tactics: {}", taxonomy.tactic_count());
            Ok(())
        }
        TaxonomyAction::Expand {
            vertical,
            slots,
            allow_unresolved,
        } => {
            let taxonomy = store.taxonomy();
            if taxonomy.vertical(&vertical).is_none() {
                anyhow::bail!(
                    "Vertical '{}' not found. Available: {}",
                    vertical,
                    taxonomy.vertical_ids().join(", ")
                );
            }
            let slots = parse_slot_args(&slots)?;
            let expanded = expand_vertical(&taxonomy, &vertical, &slots, allow_unresolved);
            if expanded.is_empty() {
                println!("No tactics expanded; supply --slot values for the template slots.");
            }
            for tactic in &expanded {
                println!("[{}] {}", tactic.subtopic_id, tactic.query);
            }
            Ok(())
        }
        TaxonomyAction::Propose { file } => {
            let data = std::fs::read_to_string(&file)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;
            let bundle: TaxonomyProposalBundle = serde_json::from_str(&data)
                .map_err(|e| anyhow::anyhow!("Invalid proposal bundle: {}", e))?;
            let mut provenance = Provenance::new(ProvenanceSource::Manual, Utc::now());
            provenance.note = Some(format!("Proposed from {}", file.display()));
            let result = store.propose_and_vet(&bundle, provenance).await;
            println!("Accepted: {}", result.accepted);
            for item in &result.accepted_items {
                println!("  + {}", item);
            }
            println!("Rejected: {}", result.rejected);
            for rejection in &result.rejected_items {
                println!("  - {}: {}", rejection.item, rejection.reason);
            }
            Ok(())
        }
    }
}

/// Parse repeated `key=value` arguments. A key may repeat to supply several
/// values for one slot.
pub fn parse_slot_args(args: &[String]) -> anyhow::Result<SlotValues> {
    let mut slots = SlotValues::new();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            anyhow::bail!("Invalid slot '{}': expected key=value", arg);
        };
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Invalid slot '{}': empty key", arg);
        }
        slots
            .entry(key.to_string())
            .or_default()
            .push(value.trim().to_string());
    }
    Ok(slots)
}

fn address_variants(raw: &str) -> anyhow::Result<Vec<String>> {
    let variants = normalize_address_variants(raw);
    if variants.is_empty() {
        anyhow::bail!("Address is blank");
    }
    Ok(variants)
}

/// Per-source authority lines followed by the gate verdict.
pub fn evidence_report(raw: &[RawSource]) -> String {
    let batch = normalize_sources(raw, "file");
    let mut out = String::new();
    for source in &batch.sources {
        out.push_str(&format!(
            "{:>3}  {:<14} {}\n",
            score_authority(source),
            classify_source(source).to_string(),
            source.uri
        ));
    }
    for error in &batch.errors {
        out.push_str(&format!("skipped: {}\n", error));
    }
    let status = evaluate_evidence(&batch.sources);
    out.push_str(&format!(
        "\nSources: {}  Authoritative: {}  Max score: {}\n",
        status.total_sources, status.authoritative_sources, status.max_authority_score
    ));
    if status.meets_all {
        out.push_str("Evidence gate: PASSED\n");
    } else {
        out.push_str(&format!(
            "Evidence gate: FAILED ({})\n",
            status.reasons().join(", ")
        ));
    }
    out
}
