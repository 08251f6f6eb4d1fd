//! Profiling pipeline orchestration: fetch, prompt, call, normalize, validate, score, persist.

mod report;
mod settings;
mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rdp_core::{Animal, DogProfilerData, ValidationError};
use rdp_llm::{ChatCompletion, ChatOutcome, ChatRequest, LlmError, RetryConfig, RetryHandler, RetryStats};
use rdp_profiler::{
    normalize_profile, NormalizeContext, OrganizationConfig, OrganizationConfigLoader, PromptBuilder,
    PromptTemplate, QualityReport, QualityRubric,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub use report::{render_brief_markdown, write_run_report, RunReportPaths};
pub use settings::{Environment, ProfilerSettings, DEFAULT_FALLBACK_MODELS};
pub use store::{AnimalStore, FileAnimalStore, PgAnimalStore};

pub const CRATE_NAME: &str = "rdp-pipeline";

/// Error messages retained per run.
pub const MAX_RECORDED_ERRORS: usize = 10;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub dry_run: bool,
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub batch_delay: Duration,
    pub timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            batch_size: 5,
            max_concurrent: 3,
            batch_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &ProfilerSettings, dry_run: bool) -> Self {
        Self {
            dry_run,
            batch_size: settings.batch_size,
            max_concurrent: settings.max_concurrent,
            batch_delay: settings.batch_delay,
            timeout: settings.timeout,
        }
    }
}

/// Why a single dog produced no profile.
#[derive(Debug, Error)]
pub enum DogError {
    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("persisting profile failed: {0:#}")]
    Persist(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct DogOutcome {
    pub animal_id: i64,
    pub profile: DogProfilerData,
    pub quality: QualityReport,
    pub persisted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub validation_failures: usize,
    pub persisted: usize,
    pub review_recommended: usize,
    pub errors: Vec<String>,
}

impl PipelineStats {
    fn record(&mut self, animal: &Animal, result: &Result<DogOutcome, DogError>) {
        self.total += 1;
        match result {
            Ok(outcome) => {
                self.succeeded += 1;
                if outcome.persisted {
                    self.persisted += 1;
                }
                if !outcome.quality.passes {
                    self.review_recommended += 1;
                }
            }
            Err(err) => {
                self.failed += 1;
                if matches!(err, DogError::Validation(_)) {
                    self.validation_failures += 1;
                }
                if self.errors.len() < MAX_RECORDED_ERRORS {
                    self.errors.push(format!("{} ({}): {err}", animal.name, animal.id));
                }
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Per-dog line in the run report.
#[derive(Debug, Clone, Serialize)]
pub struct DogRecord {
    pub animal_id: i64,
    pub name: String,
    pub status: &'static str,
    pub quality_score: Option<f64>,
    pub quality: Option<QualityReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub organization_id: i64,
    pub organization_name: String,
    pub model: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: PipelineStats,
    pub retry: RetryStats,
    pub dogs: Vec<DogRecord>,
}

pub struct ProfilerPipeline {
    org: OrganizationConfig,
    template: Arc<PromptTemplate>,
    model: String,
    llm: Arc<dyn ChatCompletion>,
    store: Arc<dyn AnimalStore>,
    retry: RetryHandler,
    rubric: QualityRubric,
    options: PipelineOptions,
    limiter: Semaphore,
}

impl ProfilerPipeline {
    pub fn new(
        org: OrganizationConfig,
        template: Arc<PromptTemplate>,
        model: impl Into<String>,
        llm: Arc<dyn ChatCompletion>,
        store: Arc<dyn AnimalStore>,
        retry: RetryConfig,
        options: PipelineOptions,
    ) -> Self {
        let limiter = Semaphore::new(options.max_concurrent.max(1));
        Self {
            org,
            template,
            model: model.into(),
            llm,
            store,
            retry: RetryHandler::new(retry),
            rubric: QualityRubric::default(),
            options,
            limiter,
        }
    }

    /// Resolve org config, prompt template and model for `org_id`.
    ///
    /// Config errors surface here and abort the organization's run before any dog is touched.
    pub fn for_organization(
        org_id: i64,
        loader: &OrganizationConfigLoader,
        prompts: &PromptBuilder,
        settings: &ProfilerSettings,
        llm: Arc<dyn ChatCompletion>,
        store: Arc<dyn AnimalStore>,
        options: PipelineOptions,
    ) -> Result<Self> {
        let org = loader.get(org_id)?.clone();
        let path = loader.prompt_path(org_id)?;
        let template = prompts
            .template(&path)
            .with_context(|| format!("loading prompt template for organization {org_id}"))?;
        let model = org
            .model_preference
            .clone()
            .or_else(|| template.model.clone())
            .unwrap_or_else(|| settings.default_model.clone());
        Ok(Self::new(
            org,
            template,
            model,
            llm,
            store,
            settings.retry_config(),
            options,
        ))
    }

    pub fn organization(&self) -> &OrganizationConfig {
        &self.org
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_llm(&self, animal: &Animal) -> Result<ChatOutcome, LlmError> {
        let messages = self.template.build_messages(animal, &self.org);
        let llm = self.llm.as_ref();
        let limiter = &self.limiter;
        let template = self.template.as_ref();

        self.retry
            .execute_with_retry(&self.model, self.options.timeout, |ctx| {
                let mut request = ChatRequest {
                    model: ctx.model,
                    messages: messages.clone(),
                    temperature: template.temperature,
                    max_tokens: template.max_tokens,
                    timeout: ctx.timeout,
                };
                if ctx.require_pure_json {
                    request = request.with_pure_json_reminder();
                }
                async move {
                    let _permit = limiter
                        .acquire()
                        .await
                        .map_err(|_| LlmError::Provider("request limiter closed".to_string()))?;
                    llm.complete(&request).await
                }
            })
            .await
    }

    /// Profile one dog end to end. Persists unless running dry.
    pub async fn process_dog(&self, animal: &Animal) -> Result<DogOutcome, DogError> {
        let started = Instant::now();
        let outcome = self.call_llm(animal).await?;

        let ctx = NormalizeContext {
            animal,
            model_used: &outcome.model,
            prompt_version: &self.template.version,
            generated_at: Utc::now(),
            processing_time_ms: elapsed_ms(started),
        };
        let mut profile = normalize_profile(&outcome.content, &ctx);
        profile.validate()?;

        let quality = self
            .rubric
            .score(&profile, animal, Some(&self.org.source_language));
        if !quality.passes {
            info!(
                animal_id = animal.id,
                score = quality.total_score,
                threshold = self.rubric.threshold(),
                issues = quality.issues.len(),
                "profile flagged for review"
            );
        }
        profile.quality_score = Some(quality.total_score);
        profile.processing_time_ms = elapsed_ms(started);

        let persisted = if self.options.dry_run {
            false
        } else {
            self.store
                .save_profile(animal.id, &profile)
                .await
                .map_err(DogError::Persist)?;
            true
        };

        Ok(DogOutcome {
            animal_id: animal.id,
            profile,
            quality,
            persisted,
        })
    }

    /// Run one batch concurrently; each dog's result is independent of the others.
    pub async fn process_batch(&self, animals: &[Animal]) -> Vec<Result<DogOutcome, DogError>> {
        let tasks = animals.iter().map(|animal| {
            let span = info_span!("profile_dog", animal_id = animal.id, org_id = self.org.id);
            async move {
                let result = self.process_dog(animal).await;
                match &result {
                    Ok(outcome) => info!(
                        score = outcome.quality.total_score,
                        persisted = outcome.persisted,
                        "dog profiled"
                    ),
                    Err(err) => warn!(error = %err, "dog profiling failed"),
                }
                result
            }
            .instrument(span)
        });
        join_all(tasks).await
    }

    /// Fetch pending dogs from the store and profile them batch by batch.
    pub async fn run(&self, limit: Option<i64>) -> Result<PipelineRun> {
        let animals = self
            .store
            .fetch_animals_for_profiling(self.org.id, limit)
            .await?;
        self.run_animals(animals).await
    }

    pub async fn run_animals(&self, animals: Vec<Animal>) -> Result<PipelineRun> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!(
            "profiling_run",
            %run_id,
            org_id = self.org.id,
            provider = self.llm.provider()
        );

        async {
            info!(
                dogs = animals.len(),
                model = %self.model,
                fallbacks = ?self.retry.config().fallback_models,
                dry_run = self.options.dry_run,
                "starting profiling run"
            );
            let mut stats = PipelineStats::default();
            let mut dogs = Vec::with_capacity(animals.len());
            let batch_size = self.options.batch_size.max(1);

            for (index, batch) in animals.chunks(batch_size).enumerate() {
                if index > 0 && !self.options.batch_delay.is_zero() {
                    tokio::time::sleep(self.options.batch_delay).await;
                }
                let results = self.process_batch(batch).await;
                for (animal, result) in batch.iter().zip(results) {
                    stats.record(animal, &result);
                    dogs.push(dog_record(animal, result));
                }
            }

            info!(
                total = stats.total,
                succeeded = stats.succeeded,
                failed = stats.failed,
                persisted = stats.persisted,
                "profiling run finished"
            );
            Ok(PipelineRun {
                run_id,
                organization_id: self.org.id,
                organization_name: self.org.name.clone(),
                model: self.model.clone(),
                dry_run: self.options.dry_run,
                started_at,
                finished_at: Utc::now(),
                stats,
                retry: self.retry.stats(),
                dogs,
            })
        }
        .instrument(span)
        .await
    }
}

fn dog_record(animal: &Animal, result: Result<DogOutcome, DogError>) -> DogRecord {
    match result {
        Ok(outcome) => DogRecord {
            animal_id: animal.id,
            name: animal.name.clone(),
            status: if outcome.persisted { "persisted" } else { "profiled" },
            quality_score: outcome.profile.quality_score,
            quality: Some(outcome.quality),
            error: None,
        },
        Err(err) => DogRecord {
            animal_id: animal.id,
            name: animal.name.clone(),
            status: match err {
                DogError::Validation(_) => "invalid",
                _ => "failed",
            },
            quality_score: None,
            quality: None,
            error: Some(err.to_string()),
        },
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
