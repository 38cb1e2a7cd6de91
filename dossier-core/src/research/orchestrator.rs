//! The research run controller.
//!
//! [`Orchestrator::run`] drives one topic through classification, method
//! discovery, planning, bounded search rounds, critique, the exhaustion
//! check, evidence recovery (address topics), synthesis and dossier
//! building.
//!
//! Every run gets a strictly increasing generation and a fresh
//! [`CancellationToken`]. Starting a run cancels the previous token first.
//! Every pending oracle or provider call is raced against the token, and
//! every write to the shared [`RunBoard`] goes through [`Orchestrator::commit`],
//! which re-checks "generation current and token not cancelled" inside the
//! board lock. A superseded run therefore never changes observable state.

use super::knowledge::{KnowledgeBase, KnowledgeStore};
use super::metrics::{
    ExhaustionMetrics, ExhaustionTracker, gap_fill_warranted, missing_vertical_coverage,
    query_key, should_stop_early,
};
use super::planner::{
    PlannedTask, build_plan, discovery_queries, exhaustion_pool, fill_topic, method_audit_pool,
    sector_tasks, taxonomy_groups, topic_slots, unique_list, vertical_seed_tasks,
};
use super::session::{
    Finding, LogLevel, NoOpObserver, RunBoard, RunObserver, RunPhase, Task, TaskRole, TaskStatus,
};
use super::synthesis::{apply_validation, cited_sources, finalize_draft};
use crate::cache::{CacheSnapshot, PersistentCache};
use crate::classifier::{
    Classification, MAX_DISCOVERY_QUERIES, infer_vertical_hints, normalize_classification,
};
use crate::config::{DossierConfig, RecoveryConfig, RunConfig};
use crate::dossier::{DossierInput, FinalReport, build_dossier};
use crate::error::{OracleError, ProviderError, RunError};
use crate::evidence::{
    EvidenceRecovery, RecoveryCache, RecoveryReport, RecoverySlots, build_recovery_queries,
    evaluate_evidence,
};
use crate::oracle::{
    ClassificationReply, CritiqueReply, MethodReply, Parsed, ReportDraft, ResearchOracle,
    SectorReply, ValidationReply, guarded, parse_structured,
};
use crate::parcel::{ParcelProviders, ParcelRequest, ParcelResolution, resolve_parcel};
use crate::persistence::MemoryPort;
use crate::sources::{NormalizedSource, dedupe_sources, normalize_sources};
use crate::taxonomy::{
    Provenance, ProvenanceSource, TaxonomyProposalBundle, TaxonomyStore,
};
use crate::topic::TopicShape;
use chrono::Utc;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DIRECTOR_NAME: &str = "Director";
const CRITIC_NAME: &str = "Red Team";
const SYNTHESIZER_NAME: &str = "Synthesizer";
const RECOVERY_NAME: &str = "Evidence Recovery";

const ROUND_ONE_CONFIDENCE: f64 = 0.9;
const AUDIT_CONFIDENCE: f64 = 0.85;
const GAP_FILL_CONFIDENCE: f64 = 0.85;
const SCOUT_CONFIDENCE: f64 = 0.8;
const DISCOVERY_CONFIDENCE: f64 = 0.6;
const RECOVERY_CONFIDENCE: f64 = 0.95;

/// Identity of one run, carried by every continuation.
struct RunCtx {
    generation: u64,
    token: CancellationToken,
    topic: String,
    shape: TopicShape,
    director_id: String,
}

/// One search task to launch.
struct SearchSpec {
    name: String,
    description: String,
    query: String,
    reasoning: String,
    confidence: f64,
    /// Whether the finding joins the research findings used by synthesis.
    collect: bool,
}

impl SearchSpec {
    fn research(name: impl Into<String>, description: impl Into<String>, query: impl Into<String>, confidence: f64) -> Self {
        let query = query.into();
        Self {
            name: name.into(),
            description: description.into(),
            reasoning: format!("Query: {query}"),
            query,
            confidence,
            collect: true,
        }
    }

    fn from_plan(task: PlannedTask) -> Self {
        Self::research(task.name, task.focus, task.query, ROUND_ONE_CONFIDENCE)
    }
}

struct Shared {
    board: RunBoard,
    token: CancellationToken,
    /// Generation installed by the latest reset, if any.
    reset_generation: Option<u64>,
}

/// What the round loop hands to the later phases.
struct RoundsOutcome {
    findings: Vec<Finding>,
    spawned: usize,
    method_sources: Vec<(String, Vec<String>)>,
}

/// Drives research runs against one oracle.
pub struct Orchestrator {
    oracle: Arc<dyn ResearchOracle>,
    taxonomy: Arc<TaxonomyStore>,
    knowledge: Arc<KnowledgeStore>,
    recovery_cache: Arc<RecoveryCache>,
    providers: Option<Arc<dyn ParcelProviders>>,
    config: RunConfig,
    recovery_config: RecoveryConfig,
    observer: Arc<dyn RunObserver>,
    generation: AtomicU64,
    shared: Mutex<Shared>,
}

impl Orchestrator {
    /// Create an orchestrator with in-memory knowledge and recovery cache.
    pub fn new(
        oracle: Arc<dyn ResearchOracle>,
        taxonomy: Arc<TaxonomyStore>,
        config: &DossierConfig,
    ) -> Self {
        let recovery_cache = PersistentCache::open(
            Arc::new(MemoryPort::<CacheSnapshot<Vec<NormalizedSource>>>::new()),
            config.cache.recovery_ttl_secs,
            config.cache.recovery_max_entries,
        );
        Self {
            oracle,
            taxonomy,
            knowledge: Arc::new(KnowledgeStore::new(Arc::new(
                MemoryPort::<KnowledgeBase>::new(),
            ))),
            recovery_cache: Arc::new(recovery_cache),
            providers: None,
            config: config.run.clamped(),
            recovery_config: config.recovery.clone(),
            observer: Arc::new(NoOpObserver),
            generation: AtomicU64::new(0),
            shared: Mutex::new(Shared {
                board: RunBoard::default(),
                token: CancellationToken::new(),
                reset_generation: None,
            }),
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<KnowledgeStore>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_recovery_cache(mut self, cache: Arc<RecoveryCache>) -> Self {
        self.recovery_cache = cache;
        self
    }

    /// Record, geocode and GIS providers for parcel resolution. Without them
    /// address runs skip the parcel stage.
    pub fn with_providers(mut self, providers: Arc<dyn ParcelProviders>) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Generation of the most recent run or reset.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Snapshot of the observable run state.
    pub fn board(&self) -> RunBoard {
        self.lock().board.clone()
    }

    /// Cancel the current run. Its `run` call returns [`RunError::Cancelled`].
    pub fn cancel(&self) {
        let shared = self.lock();
        debug!(generation = shared.board.generation, "Cancelling current run");
        shared.token.cancel();
    }

    /// Cancel the current run and clear the board without marking anything
    /// failed.
    pub fn reset(&self) {
        let mut shared = self.lock();
        shared.token.cancel();
        shared.token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        shared.board = RunBoard::cleared(generation);
        shared.reset_generation = Some(generation);
        debug!(generation, "Run state reset");
        self.observer.on_phase_change(generation, RunPhase::Idle);
    }

    /// Research a topic and deliver the final report.
    ///
    /// Non-fatal problems (oracle failures, malformed replies, unmet evidence
    /// thresholds, parcel ambiguity) are logged and disclosed in the report.
    /// Only fatal oracle errors fail the run.
    pub async fn run(&self, topic: &str) -> Result<FinalReport, RunError> {
        let ctx = self.begin(topic);
        info!(generation = ctx.generation, topic = %ctx.topic, shape = ?ctx.shape, "Starting research run");

        match self.drive(&ctx).await {
            Ok(report) => {
                info!(
                    generation = ctx.generation,
                    sections = report.sections.len(),
                    sources = report.sources.len(),
                    gaps = report.data_gaps.len(),
                    "Research run complete"
                );
                Ok(report)
            }
            Err(e) if e.is_aborted() => Err(self.stopped(&ctx)),
            Err(e) => {
                let message = e.to_string();
                let failed = self.commit(&ctx, |board, observer| {
                    board.phase = RunPhase::Failed;
                    board.running = false;
                    board.error = Some(message.clone());
                    observer.on_phase_change(ctx.generation, RunPhase::Failed);
                    if let Some(director) = board.task_mut(&ctx.director_id) {
                        director.status = TaskStatus::Failed;
                        observer.on_task_update(director);
                    }
                    let entry = board.log(
                        &ctx.director_id,
                        DIRECTOR_NAME,
                        LogLevel::Error,
                        format!("Run failed: {message}"),
                    );
                    observer.on_log(entry);
                });
                match failed {
                    Ok(()) => {
                        error!(generation = ctx.generation, error = %e, "Research run failed");
                        Err(RunError::InitFailed { message })
                    }
                    Err(_) => Err(self.stopped(&ctx)),
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a new generation and token, cancelling the previous run.
    fn begin(&self, topic: &str) -> RunCtx {
        let topic = topic.trim().to_string();
        let mut shared = self.lock();
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut shared.token, token.clone());
        previous.cancel();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let director = Task::new(DIRECTOR_NAME, TaskRole::Director, format!("Research: {topic}"))
            .with_status(TaskStatus::Thinking);
        let director_id = director.id.clone();

        shared.board = RunBoard::begin(generation, topic.clone());
        shared.board.tasks.push(director);
        self.observer.on_phase_change(generation, RunPhase::Init);
        if let Some(director) = shared.board.task(&director_id) {
            self.observer.on_task_update(director);
        }

        RunCtx {
            generation,
            token,
            shape: TopicShape::of(&topic),
            topic,
            director_id,
        }
    }

    /// How an aborted run reports itself: cancelled while still current (or
    /// displaced by a reset), superseded when a newer run took over.
    fn stopped(&self, ctx: &RunCtx) -> RunError {
        let mut shared = self.lock();
        if shared.board.generation == ctx.generation {
            shared.board.running = false;
            debug!(generation = ctx.generation, "Research run cancelled");
            RunError::Cancelled
        } else if shared.reset_generation == Some(shared.board.generation) {
            debug!(generation = ctx.generation, "Research run discarded by reset");
            RunError::Cancelled
        } else {
            debug!(
                generation = ctx.generation,
                current = shared.board.generation,
                "Research run superseded"
            );
            RunError::Superseded {
                generation: ctx.generation,
            }
        }
    }

    /// Apply a mutation to the board if this run is still current.
    ///
    /// Stale continuations get [`OracleError::Aborted`] and change nothing.
    fn commit<R>(
        &self,
        ctx: &RunCtx,
        apply: impl FnOnce(&mut RunBoard, &dyn RunObserver) -> R,
    ) -> Result<R, OracleError> {
        let mut shared = self.lock();
        if shared.board.generation != ctx.generation || ctx.token.is_cancelled() {
            debug!(generation = ctx.generation, "Discarding stale update");
            return Err(OracleError::Aborted);
        }
        Ok(apply(&mut shared.board, self.observer.as_ref()))
    }

    fn ensure_current(&self, ctx: &RunCtx) -> Result<(), OracleError> {
        self.commit(ctx, |_, _| ())
    }

    fn say(
        &self,
        ctx: &RunCtx,
        task_id: &str,
        task_name: &str,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<(), OracleError> {
        let message = message.into();
        match level {
            LogLevel::Warning => warn!(generation = ctx.generation, task = task_name, "{message}"),
            LogLevel::Error => error!(generation = ctx.generation, task = task_name, "{message}"),
            _ => info!(generation = ctx.generation, task = task_name, "{message}"),
        }
        self.commit(ctx, |board, observer| {
            let entry = board.log(task_id, task_name, level, message);
            observer.on_log(entry);
        })
    }

    /// Log a line on the director task.
    fn narrate(&self, ctx: &RunCtx, level: LogLevel, message: impl Into<String>) -> Result<(), OracleError> {
        self.say(ctx, &ctx.director_id, DIRECTOR_NAME, level, message)
    }

    fn set_phase(&self, ctx: &RunCtx, phase: RunPhase, message: impl Into<String>) -> Result<(), OracleError> {
        let message = message.into();
        info!(generation = ctx.generation, phase = %phase, "{message}");
        self.commit(ctx, |board, observer| {
            board.phase = phase;
            observer.on_phase_change(ctx.generation, phase);
            let entry = board.log(&ctx.director_id, DIRECTOR_NAME, LogLevel::Info, message);
            observer.on_log(entry);
        })
    }

    fn add_task(&self, ctx: &RunCtx, task: Task) -> Result<String, OracleError> {
        let id = task.id.clone();
        self.commit(ctx, |board, observer| {
            observer.on_task_update(&task);
            board.tasks.push(task);
        })?;
        Ok(id)
    }

    fn update_task(
        &self,
        ctx: &RunCtx,
        task_id: &str,
        update: impl FnOnce(&mut Task),
    ) -> Result<(), OracleError> {
        self.commit(ctx, |board, observer| {
            if let Some(task) = board.task_mut(task_id) {
                update(task);
                observer.on_task_update(task);
            }
        })
    }

    /// Call a structured oracle operation and parse its reply.
    ///
    /// Cancellation and fatal errors propagate. Any other failure, like an
    /// unparsable reply, is logged and yields an empty `Unparsed` result.
    async fn ask<T, F>(&self, ctx: &RunCtx, what: &str, call: F) -> Result<Parsed<T>, OracleError>
    where
        T: DeserializeOwned,
        F: Future<Output = Result<String, OracleError>> + Send,
    {
        match guarded(&ctx.token, call).await {
            Ok(raw) => {
                let parsed = parse_structured::<T>(&raw);
                if !parsed.is_ok() {
                    self.narrate(
                        ctx,
                        LogLevel::Warning,
                        format!("{what} returned unstructured output; using defaults"),
                    )?;
                }
                Ok(parsed)
            }
            Err(e) if e.is_aborted() || e.is_fatal() => Err(e),
            Err(e) => {
                self.narrate(ctx, LogLevel::Warning, format!("{what} failed: {e}"))?;
                Ok(Parsed::Unparsed { raw: String::new() })
            }
        }
    }

    /// Run one search task: optional stagger, search, normalize, record.
    ///
    /// A non-fatal search failure completes the task with no finding.
    async fn run_search(
        &self,
        ctx: &RunCtx,
        spec: SearchSpec,
        delay: Duration,
    ) -> Result<Option<Finding>, OracleError> {
        if !delay.is_zero() {
            guarded(&ctx.token, async {
                tokio::time::sleep(delay).await;
                Ok::<_, OracleError>(())
            })
            .await?;
        }

        let task = Task::new(spec.name.clone(), TaskRole::Researcher, spec.description.clone())
            .with_parent(ctx.director_id.clone())
            .with_status(TaskStatus::Searching)
            .with_reasoning(spec.reasoning.clone());
        let task_id = self.add_task(ctx, task)?;
        debug!(generation = ctx.generation, task = %spec.name, query = %spec.query, "Search started");

        let reply = guarded(&ctx.token, self.oracle.search(&spec.query, &spec.description)).await;
        match reply {
            Ok(reply) => {
                let batch = normalize_sources(&reply.sources, self.oracle.name());
                if !batch.errors.is_empty() {
                    debug!(
                        generation = ctx.generation,
                        task = %spec.name,
                        errors = batch.errors.len(),
                        "Dropped invalid sources"
                    );
                }
                let finding = Finding {
                    origin_task: task_id.clone(),
                    task_name: spec.name.clone(),
                    query: spec.query.clone(),
                    content: reply.text,
                    confidence: spec.confidence,
                    sources: batch.sources,
                };
                let count = finding.sources.len();
                self.commit(ctx, |board, observer| {
                    if let Some(task) = board.task_mut(&task_id) {
                        task.status = TaskStatus::Complete;
                        task.findings.push(finding.clone());
                        task.reasoning.push(format!("Collected {count} sources"));
                        observer.on_task_update(task);
                    }
                    if spec.collect {
                        board.findings.push(finding.clone());
                    }
                    let entry = board.log(
                        &task_id,
                        &spec.name,
                        LogLevel::Success,
                        format!("Found {count} sources for \"{}\"", spec.query),
                    );
                    observer.on_log(entry);
                })?;
                Ok(Some(finding))
            }
            Err(e) if e.is_aborted() => Err(e),
            Err(e) if e.is_fatal() => {
                self.update_task(ctx, &task_id, |task| task.status = TaskStatus::Failed)?;
                self.say(ctx, &task_id, &spec.name, LogLevel::Error, format!("Search failed: {e}"))?;
                Err(e)
            }
            Err(e) => {
                self.update_task(ctx, &task_id, |task| {
                    task.status = TaskStatus::Complete;
                    task.reasoning.push(format!("Search failed: {e}"));
                })?;
                self.say(
                    ctx,
                    &task_id,
                    &spec.name,
                    LogLevel::Warning,
                    format!("Search failed, continuing without findings: {e}"),
                )?;
                Ok(None)
            }
        }
    }

    /// Launch a batch with staggered starts and wait for every task to settle.
    async fn run_batch(
        &self,
        ctx: &RunCtx,
        specs: Vec<SearchSpec>,
        stagger_ms: u64,
    ) -> Result<Vec<Finding>, OracleError> {
        let launches = specs.into_iter().enumerate().map(|(index, spec)| {
            let delay = Duration::from_millis(stagger_ms.saturating_mul(index as u64));
            self.run_search(ctx, spec, delay)
        });
        let results = join_all(launches).await;

        let mut findings = Vec::new();
        let mut failure: Option<OracleError> = None;
        for result in results {
            match result {
                Ok(Some(finding)) => findings.push(finding),
                Ok(None) => {}
                Err(e) => {
                    if failure.as_ref().is_none_or(OracleError::is_aborted) {
                        failure = Some(e);
                    }
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(findings),
        }
    }

    fn record_metrics(
        &self,
        ctx: &RunCtx,
        tracker: &mut ExhaustionTracker,
        label: &str,
        queries: &[String],
        findings: &[Finding],
    ) -> Result<ExhaustionMetrics, OracleError> {
        let sources: Vec<NormalizedSource> = findings
            .iter()
            .flat_map(|f| f.sources.iter().cloned())
            .collect();
        let metrics = tracker.record_round(label, queries, &sources);
        info!(
            generation = ctx.generation,
            round = metrics.round,
            score = metrics.diminishing_returns_score,
            novelty = metrics.query_novelty_ratio,
            new_domains = metrics.new_domains,
            new_sources = metrics.new_sources,
            "Exhaustion metrics recorded"
        );
        self.commit(ctx, |board, observer| {
            board.metrics.push(metrics.clone());
            observer.on_metrics(&metrics);
        })?;
        self.narrate(
            ctx,
            LogLevel::Info,
            format!(
                "{label}: diminishing score {:.2}, novelty {:.2}, +{} domains ({} total), +{} sources ({} total)",
                metrics.diminishing_returns_score,
                metrics.query_novelty_ratio,
                metrics.new_domains,
                metrics.total_domains,
                metrics.new_sources,
                metrics.total_sources
            ),
        )?;
        Ok(metrics)
    }

    async fn drive(&self, ctx: &RunCtx) -> Result<FinalReport, OracleError> {
        let topic = ctx.topic.as_str();
        self.narrate(ctx, LogLevel::Action, format!("Run started for \"{topic}\""))?;

        let taxonomy = self.taxonomy.taxonomy();
        let summary = taxonomy.summary();
        let valid_ids = taxonomy.vertical_ids();
        let hints = infer_vertical_hints(topic);

        self.set_phase(ctx, RunPhase::Classify, "Classifying topic into verticals")?;
        let reply = self
            .ask::<ClassificationReply, _>(
                ctx,
                "Classification",
                self.oracle.classify(topic, &summary, &hints, ""),
            )
            .await?;
        let mut classification = normalize_classification(reply, &valid_ids, &hints);
        self.log_classification(ctx, &classification)?;

        self.set_phase(ctx, RunPhase::Discover, "Discovering research methods")?;
        let discovery_issued = discovery_queries(topic, ctx.shape, self.config.max_method_agents);
        let specs: Vec<SearchSpec> = discovery_issued
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, query)| SearchSpec {
                collect: false,
                ..SearchSpec::research(
                    format!("Discovery Scout {}", i + 1),
                    "Method discovery",
                    query,
                    DISCOVERY_CONFIDENCE,
                )
            })
            .collect();
        let discovery = self
            .run_batch(ctx, specs, self.config.discovery_stagger_ms)
            .await?;
        let discovery_texts: Vec<&str> = discovery
            .iter()
            .map(|f| f.content.as_str())
            .filter(|t| !t.trim().is_empty())
            .collect();

        let extracted = if discovery_texts.is_empty() {
            Vec::new()
        } else {
            let reply = self
                .ask::<MethodReply, _>(
                    ctx,
                    "Method extraction",
                    self.oracle.extract_methods(topic, &discovery_texts.join("\n\n")),
                )
                .await?;
            unique_list(
                reply
                    .or_default()
                    .methods
                    .into_iter()
                    .filter_map(|m| m.query)
                    .map(|q| fill_topic(&q, topic)),
            )
        };
        self.narrate(
            ctx,
            LogLevel::Info,
            format!("Discovery proposed {} method queries", extracted.len()),
        )?;

        if classification.is_uncertain && !discovery_texts.is_empty() {
            self.set_phase(ctx, RunPhase::Reclassify, "Classification uncertain; reclassifying with discovery context")?;
            let context = discovery_texts
                .iter()
                .take(MAX_DISCOVERY_QUERIES)
                .copied()
                .collect::<Vec<_>>()
                .join("\n\n");
            let reply = self
                .ask::<ClassificationReply, _>(
                    ctx,
                    "Reclassification",
                    self.oracle.classify(topic, &summary, &hints, &context),
                )
                .await?;
            if reply.is_ok() {
                classification = normalize_classification(reply, &valid_ids, &hints);
                self.log_classification(ctx, &classification)?;
            }
        }

        self.set_phase(ctx, RunPhase::Plan, "Planning research tasks")?;
        let sectors = self
            .ask::<SectorReply, _>(ctx, "Sector proposal", self.oracle.propose_sectors(topic))
            .await?
            .or_default();
        let mut candidates = sector_tasks(topic, &sectors);
        candidates.extend(vertical_seed_tasks(&classification, topic));
        candidates.extend(taxonomy_groups(
            &taxonomy,
            &classification,
            &topic_slots(topic, ctx.shape),
        ));
        let plan = build_plan(topic, ctx.shape, candidates, &self.config);
        self.narrate(
            ctx,
            LogLevel::Action,
            format!("Spawning {} research tasks", plan.len()),
        )?;

        let knowledge_queries = self.knowledge.load().queries_for(topic);
        let mut tracker = ExhaustionTracker::new();
        tracker.mark_issued(&discovery_issued);
        let rounds = self
            .run_rounds(ctx, plan, &classification, &hints, &knowledge_queries, &extracted, &mut tracker)
            .await?;
        let RoundsOutcome {
            mut findings,
            mut spawned,
            mut method_sources,
        } = rounds;

        self.set_phase(ctx, RunPhase::Critique, "Red-teaming findings")?;
        self.critique(ctx, &mut tracker, &mut findings, &mut spawned, &mut method_sources)
            .await?;

        self.set_phase(ctx, RunPhase::ExhaustionCheck, "Checking domain coverage")?;
        self.exhaustion_check(
            ctx,
            &mut tracker,
            &knowledge_queries,
            &mut findings,
            &mut spawned,
            &mut method_sources,
        )
        .await?;

        let mut recovery: Option<RecoveryReport> = None;
        let mut parcel: Option<ParcelResolution> = None;
        if ctx.shape.is_address() {
            self.set_phase(ctx, RunPhase::EvidenceRecovery, "Checking address evidence")?;
            let report = self.recover_evidence(ctx, &mut findings).await?;
            recovery = Some(report);
            parcel = self.resolve_subject_parcel(ctx).await?;
        }

        self.set_phase(ctx, RunPhase::Synthesis, "Synthesizing report")?;
        let allowed = dedupe_sources(findings.iter().flat_map(|f| f.sources.iter()));
        let synthesizer = Task::new(SYNTHESIZER_NAME, TaskRole::Synthesizer, "Compile the final report")
            .with_parent(ctx.director_id.clone())
            .with_status(TaskStatus::Analyzing);
        let synthesizer_id = self.add_task(ctx, synthesizer)?;

        let reply = self
            .ask::<ReportDraft, _>(
                ctx,
                "Synthesis",
                self.oracle.synthesize(topic, &findings, &allowed),
            )
            .await?;
        let outcome = finalize_draft(topic, reply, &allowed);
        if outcome.removed_sources > 0 {
            self.say(
                ctx,
                &synthesizer_id,
                SYNTHESIZER_NAME,
                LogLevel::Warning,
                format!("Stripped {} citations outside the allowed sources", outcome.removed_sources),
            )?;
        }
        let mut draft = outcome.draft;

        let reply = self
            .ask::<ValidationReply, _>(
                ctx,
                "Validation",
                self.oracle.validate(topic, &draft, &allowed),
            )
            .await?;
        let validation = apply_validation(&mut draft, reply);
        if validation.is_valid {
            self.ensure_current(ctx)?;
            self.knowledge
                .record_validated(&cited_sources(&draft), &method_sources);
            self.say(ctx, &synthesizer_id, SYNTHESIZER_NAME, LogLevel::Success, "Report validated; knowledge base updated")?;
        } else {
            self.say(
                ctx,
                &synthesizer_id,
                SYNTHESIZER_NAME,
                LogLevel::Warning,
                format!(
                    "Validation failed ({} issues); knowledge base update skipped",
                    validation.issues.len()
                ),
            )?;
        }

        let report = build_dossier(DossierInput {
            draft,
            sources: &allowed,
            is_address: ctx.shape.is_address(),
            evidence: recovery.as_ref().map(|r| r.status.clone()),
            recovery: recovery.as_ref(),
            parcel: parcel.as_ref(),
            now: Utc::now(),
        });

        self.update_task(ctx, &synthesizer_id, |task| task.status = TaskStatus::Complete)?;
        self.commit(ctx, |board, observer| {
            board.report = Some(report.clone());
            board.phase = RunPhase::Complete;
            board.running = false;
            observer.on_report(&report);
            observer.on_phase_change(ctx.generation, RunPhase::Complete);
            if let Some(director) = board.task_mut(&ctx.director_id) {
                director.status = TaskStatus::Complete;
                observer.on_task_update(director);
            }
            let entry = board.log(
                &ctx.director_id,
                DIRECTOR_NAME,
                LogLevel::Success,
                format!(
                    "Report delivered: {} sections, {} sources, {} data gaps",
                    report.sections.len(),
                    report.sources.len(),
                    report.data_gaps.len()
                ),
            );
            observer.on_log(entry);
        })?;
        Ok(report)
    }

    fn log_classification(&self, ctx: &RunCtx, classification: &Classification) -> Result<(), OracleError> {
        let top = classification
            .top()
            .map(|w| format!("{} ({:.2})", w.id, w.weight))
            .unwrap_or_else(|| "none".to_string());
        self.narrate(
            ctx,
            LogLevel::Info,
            format!(
                "Classified as {top}; selected [{}]; confidence {:.2}{}",
                classification.selected.join(", "),
                classification.confidence,
                if classification.is_uncertain { ", uncertain" } else { "" }
            ),
        )
    }

    /// Round 1 runs the plan minus queries already issued; later rounds run
    /// the next unissued method-audit queries, at most `max_method_agents`
    /// each, until early stop, `max_rounds` or the pool runs dry.
    #[allow(clippy::too_many_arguments)]
    async fn run_rounds(
        &self,
        ctx: &RunCtx,
        plan: Vec<PlannedTask>,
        classification: &Classification,
        hints: &[String],
        knowledge_queries: &[String],
        extracted: &[String],
        tracker: &mut ExhaustionTracker,
    ) -> Result<RoundsOutcome, OracleError> {
        let topic = ctx.topic.as_str();
        let mut findings: Vec<Finding> = Vec::new();
        let mut method_sources: Vec<(String, Vec<String>)> = Vec::new();

        self.set_phase(ctx, RunPhase::Round, "Round 1: running planned tasks")?;
        let planned = plan.len();
        let mut seen = HashSet::new();
        let plan: Vec<PlannedTask> = plan
            .into_iter()
            .filter(|t| !tracker.has_issued(&t.query) && seen.insert(query_key(&t.query)))
            .collect();
        if plan.len() < planned {
            self.narrate(
                ctx,
                LogLevel::Info,
                format!("Skipped {} planned tasks repeating an issued query", planned - plan.len()),
            )?;
        }
        let queries: Vec<String> = plan.iter().map(|t| t.query.clone()).collect();
        let mut spawned = plan.len();
        let specs = plan.into_iter().map(SearchSpec::from_plan).collect();
        let round = self.run_batch(ctx, specs, self.config.sector_stagger_ms).await?;
        let metrics = self.record_metrics(ctx, tracker, "Round 1", &queries, &round)?;
        findings.extend(round);

        self.grow_taxonomy(ctx, &findings, hints).await?;
        let mut stop = self.early_stop(ctx, &metrics, classification, &findings)?;

        let pool = method_audit_pool(topic, ctx.shape, knowledge_queries, extracted);
        for round_number in 2..=self.config.max_rounds {
            if stop {
                break;
            }
            let remaining = self.config.max_agents.saturating_sub(spawned);
            if remaining == 0 {
                self.narrate(ctx, LogLevel::Info, "Task capacity reached; no further rounds")?;
                break;
            }
            let queries: Vec<String> = tracker
                .unissued(&pool)
                .into_iter()
                .take(remaining.min(self.config.max_method_agents))
                .collect();
            if queries.is_empty() {
                self.narrate(ctx, LogLevel::Info, "No unissued method audit queries; ending rounds")?;
                break;
            }

            self.set_phase(
                ctx,
                RunPhase::Round,
                format!("Round {round_number}: method audit with {} tasks", queries.len()),
            )?;
            spawned += queries.len();
            let specs = queries
                .iter()
                .enumerate()
                .map(|(i, q)| {
                    SearchSpec::research(
                        format!("Method Audit {}", i + 1),
                        "Method audit",
                        q.clone(),
                        AUDIT_CONFIDENCE,
                    )
                })
                .collect();
            let round = self.run_batch(ctx, specs, self.config.audit_stagger_ms).await?;
            let label = format!("Round {round_number}");
            let metrics = self.record_metrics(ctx, tracker, &label, &queries, &round)?;
            method_sources.extend(round.iter().map(method_source));
            findings.extend(round);
            stop = self.early_stop(ctx, &metrics, classification, &findings)?;
        }

        Ok(RoundsOutcome {
            findings,
            spawned,
            method_sources,
        })
    }

    /// Apply the early-stop rule, subject to the vertical coverage veto.
    fn early_stop(
        &self,
        ctx: &RunCtx,
        metrics: &ExhaustionMetrics,
        classification: &Classification,
        findings: &[Finding],
    ) -> Result<bool, OracleError> {
        if !should_stop_early(metrics, &self.config) {
            return Ok(false);
        }
        let missing = missing_vertical_coverage(&classification.selected, &findings_text(findings));
        if missing.is_empty() {
            self.narrate(
                ctx,
                LogLevel::Action,
                format!("Diminishing returns after round {}; stopping early", metrics.round),
            )?;
            Ok(true)
        } else {
            self.narrate(
                ctx,
                LogLevel::Info,
                format!("Early stop vetoed; still missing {}", missing.join(", ")),
            )?;
            Ok(false)
        }
    }

    /// Ask the oracle for taxonomy growth from round-1 findings and vet it.
    async fn grow_taxonomy(
        &self,
        ctx: &RunCtx,
        findings: &[Finding],
        hints: &[String],
    ) -> Result<(), OracleError> {
        let text = findings_text(findings);
        if text.trim().is_empty() {
            return Ok(());
        }
        let summary = self.taxonomy.taxonomy().summary();
        let reply = self
            .ask::<TaxonomyProposalBundle, _>(
                ctx,
                "Taxonomy growth",
                self.oracle
                    .propose_taxonomy_growth(&ctx.topic, &text, &summary, hints),
            )
            .await?;
        let Some(bundle) = reply.ok().filter(|b| !b.is_empty()) else {
            return Ok(());
        };

        self.ensure_current(ctx)?;
        let mut provenance = Provenance::new(ProvenanceSource::AgentProposal, Utc::now());
        provenance.topic = Some(ctx.topic.clone());
        provenance.agent_id = Some(ctx.director_id.clone());
        provenance.agent_name = Some(DIRECTOR_NAME.to_string());
        provenance.run_id = Some(ctx.generation.to_string());
        let result = self.taxonomy.propose_and_vet(&bundle, provenance).await;
        self.narrate(
            ctx,
            LogLevel::Info,
            format!(
                "Taxonomy growth: {} accepted, {} rejected",
                result.accepted, result.rejected
            ),
        )
    }

    /// One critique pass; may add a single gap-fill task.
    async fn critique(
        &self,
        ctx: &RunCtx,
        tracker: &mut ExhaustionTracker,
        findings: &mut Vec<Finding>,
        spawned: &mut usize,
        method_sources: &mut Vec<(String, Vec<String>)>,
    ) -> Result<(), OracleError> {
        let critic = Task::new(CRITIC_NAME, TaskRole::Critic, "Find gaps in the findings")
            .with_parent(ctx.director_id.clone())
            .with_status(TaskStatus::Thinking);
        let critic_id = self.add_task(ctx, critic)?;

        let reply = self
            .ask::<CritiqueReply, _>(
                ctx,
                "Critique",
                self.oracle.critique(&ctx.topic, &findings_text(findings)),
            )
            .await?
            .or_default();
        let gap_analysis = reply.gap_analysis.clone();
        self.update_task(ctx, &critic_id, |task| {
            task.status = TaskStatus::Complete;
            if !gap_analysis.trim().is_empty() {
                task.reasoning.push(gap_analysis);
            }
        })?;

        let Some(method) = reply.new_method.filter(|m| !m.query.trim().is_empty()) else {
            return self.say(ctx, &critic_id, CRITIC_NAME, LogLevel::Info, "No gap-fill method proposed");
        };
        if !gap_fill_warranted(tracker.last(), &self.config) {
            return self.say(
                ctx,
                &critic_id,
                CRITIC_NAME,
                LogLevel::Info,
                "Gap-fill skipped; returns already diminishing",
            );
        }
        if *spawned >= self.config.max_agents {
            return self.say(ctx, &critic_id, CRITIC_NAME, LogLevel::Info, "Gap-fill skipped; task capacity reached");
        }
        if tracker.has_issued(&method.query) {
            return self.say(ctx, &critic_id, CRITIC_NAME, LogLevel::Info, "Gap-fill skipped; query already issued");
        }

        let name = if method.name.trim().is_empty() {
            "Gap Hunter".to_string()
        } else {
            format!("Gap Hunter: {}", method.name.trim())
        };
        self.say(ctx, &critic_id, CRITIC_NAME, LogLevel::Action, format!("Spawning {name}"))?;
        *spawned += 1;
        let query = method.query.trim().to_string();
        let spec = SearchSpec::research(name, "Gap fill", query.clone(), GAP_FILL_CONFIDENCE);
        let batch = self.run_batch(ctx, vec![spec], 0).await?;
        self.record_metrics(ctx, tracker, "Gap Fill", &[query], &batch)?;
        method_sources.extend(batch.iter().map(method_source));
        findings.extend(batch);
        Ok(())
    }

    /// Spawn exhaustion scouts while unique-domain coverage is below the
    /// floor, independently of early stop.
    async fn exhaustion_check(
        &self,
        ctx: &RunCtx,
        tracker: &mut ExhaustionTracker,
        knowledge_queries: &[String],
        findings: &mut Vec<Finding>,
        spawned: &mut usize,
        method_sources: &mut Vec<(String, Vec<String>)>,
    ) -> Result<(), OracleError> {
        let floor = self.config.exhaustion_domain_floor();
        let domains = tracker.unique_domains();
        if !self.config.force_exhaustion && domains >= floor {
            return self.narrate(
                ctx,
                LogLevel::Info,
                format!("Domain coverage {domains} meets floor {floor}"),
            );
        }

        let count = self
            .config
            .max_agents
            .saturating_sub(*spawned)
            .min(self.config.max_method_agents);
        let queries: Vec<String> = tracker
            .unissued(&exhaustion_pool(&ctx.topic, ctx.shape, knowledge_queries))
            .into_iter()
            .take(count)
            .collect();
        if queries.is_empty() {
            return self.narrate(
                ctx,
                LogLevel::Warning,
                format!("Domain coverage {domains} below floor {floor}, but no scouts available"),
            );
        }

        self.narrate(
            ctx,
            LogLevel::Action,
            format!(
                "Domain coverage {domains} below floor {floor}; spawning {} exhaustion scouts",
                queries.len()
            ),
        )?;
        *spawned += queries.len();
        let specs = queries
            .iter()
            .enumerate()
            .map(|(i, q)| {
                SearchSpec::research(
                    format!("Exhaustion Scout {}", i + 1),
                    "Exhaustion test",
                    q.clone(),
                    SCOUT_CONFIDENCE,
                )
            })
            .collect();
        let batch = self.run_batch(ctx, specs, self.config.audit_stagger_ms).await?;
        self.record_metrics(ctx, tracker, "Exhaustion Check", &queries, &batch)?;
        method_sources.extend(batch.iter().map(method_source));
        findings.extend(batch);
        Ok(())
    }

    /// Evaluate the evidence gate and run a recovery pass when it fails.
    /// Recovered sources join the findings as one extra finding.
    async fn recover_evidence(
        &self,
        ctx: &RunCtx,
        findings: &mut Vec<Finding>,
    ) -> Result<RecoveryReport, OracleError> {
        let existing = dedupe_sources(findings.iter().flat_map(|f| f.sources.iter()));
        let status = evaluate_evidence(&existing);
        if status.meets_all {
            self.narrate(ctx, LogLevel::Success, "Evidence gate passed")?;
        } else {
            self.narrate(
                ctx,
                LogLevel::Warning,
                format!("Evidence gate failed: {}", status.reasons().join(", ")),
            )?;
        }

        let recovery = EvidenceRecovery::new(
            self.oracle.clone(),
            self.recovery_config.clone(),
            self.recovery_cache.clone(),
        );
        let candidates = build_recovery_queries(
            &RecoverySlots::from_topic(&ctx.topic),
            self.recovery_config.max_queries,
        );
        let report = recovery
            .recover(&ctx.topic, &existing, &candidates, &ctx.token)
            .await?;

        if !report.sources.is_empty() {
            let mut task = Task::new(RECOVERY_NAME, TaskRole::Researcher, "Recover authoritative evidence")
                .with_parent(ctx.director_id.clone())
                .with_status(TaskStatus::Complete)
                .with_reasoning(format!("Ran {} recovery queries", report.executed.len()));
            let task_id = task.id.clone();
            let finding = Finding {
                origin_task: task_id.clone(),
                task_name: RECOVERY_NAME.to_string(),
                query: report.executed.join(" | "),
                content: format!(
                    "Recovered {} sources from property record queries.",
                    report.sources.len()
                ),
                confidence: RECOVERY_CONFIDENCE,
                sources: report.sources.clone(),
            };
            task.findings.push(finding.clone());
            self.add_task(ctx, task)?;
            self.commit(ctx, |board, _| board.findings.push(finding.clone()))?;
            findings.push(finding);
        }

        match report.warning() {
            Some(warning) => self.narrate(ctx, LogLevel::Warning, warning)?,
            None => self.narrate(
                ctx,
                LogLevel::Info,
                format!(
                    "Evidence recovery {:?}: {} queries, {} sources recovered",
                    report.outcome,
                    report.executed.len(),
                    report.sources.len()
                ),
            )?,
        }
        Ok(report)
    }

    /// Resolve the parcel when providers are configured. Provider trouble
    /// becomes gaps inside the resolution; only cancellation escapes.
    async fn resolve_subject_parcel(&self, ctx: &RunCtx) -> Result<Option<ParcelResolution>, OracleError> {
        let Some(providers) = &self.providers else {
            return Ok(None);
        };
        match resolve_parcel(&ParcelRequest::new(ctx.topic.clone()), providers.as_ref(), &ctx.token).await {
            Ok(resolution) => {
                let message = match &resolution.parcel {
                    Some(parcel) => format!(
                        "Parcel resolved: {}",
                        parcel
                            .parcel_id
                            .as_deref()
                            .or(parcel.account_id.as_deref())
                            .unwrap_or("unknown id")
                    ),
                    None => format!("Parcel unresolved; {} gaps recorded", resolution.gaps.len()),
                };
                let level = if resolution.is_resolved() {
                    LogLevel::Success
                } else {
                    LogLevel::Warning
                };
                self.narrate(ctx, level, message)?;
                Ok(Some(resolution))
            }
            Err(ProviderError::Aborted) => Err(OracleError::Aborted),
            Err(e) => {
                self.narrate(ctx, LogLevel::Warning, format!("Parcel resolution failed: {e}"))?;
                Ok(None)
            }
        }
    }
}

fn findings_text(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(|f| f.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn method_source(finding: &Finding) -> (String, Vec<String>) {
    (
        finding.query.clone(),
        finding.sources.iter().map(|s| s.uri.clone()).collect(),
    )
}
