use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::{FailureKind, LlmError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// `initial_delay * backoff_factor^attempt_index`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let factor = self.backoff_factor.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts on the primary model.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Tried in order once the primary model is exhausted.
    pub fallback_models: Vec<String>,
    /// Attempts per fallback model.
    pub fallback_attempts: u32,
    /// Multiplier applied to the request timeout after a timeout failure.
    pub timeout_growth: f64,
    pub max_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            fallback_models: Vec::new(),
            fallback_attempts: 2,
            timeout_growth: 1.5,
            max_timeout: Duration::from_secs(180),
        }
    }
}

/// What the operation should send on this attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptContext {
    pub model: String,
    /// 1-based across all models.
    pub attempt: u32,
    /// 1-based within the current model.
    pub model_attempt: u32,
    pub timeout: Duration,
    pub require_pure_json: bool,
    pub is_fallback: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    pub total_attempts: u64,
    pub first_try_successes: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub model_fallbacks: u64,
}

#[derive(Debug, Default)]
struct RetryCounters {
    total_attempts: AtomicU64,
    first_try_successes: AtomicU64,
    successful_retries: AtomicU64,
    failed_retries: AtomicU64,
    model_fallbacks: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug)]
pub struct RetryHandler {
    config: RetryConfig,
    counters: RetryCounters,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            counters: RetryCounters::default(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            total_attempts: self.counters.total_attempts.load(Ordering::Relaxed),
            first_try_successes: self.counters.first_try_successes.load(Ordering::Relaxed),
            successful_retries: self.counters.successful_retries.load(Ordering::Relaxed),
            failed_retries: self.counters.failed_retries.load(Ordering::Relaxed),
            model_fallbacks: self.counters.model_fallbacks.load(Ordering::Relaxed),
        }
    }

    fn model_plan(&self, primary_model: &str) -> Vec<(String, u32)> {
        let mut plan = vec![(primary_model.to_string(), self.config.max_attempts.max(1))];
        for model in &self.config.fallback_models {
            if self.config.fallback_attempts == 0 || plan.iter().any(|(m, _)| m == model) {
                continue;
            }
            plan.push((model.clone(), self.config.fallback_attempts));
        }
        plan
    }

    /// Run `op` against the primary model, then each fallback model, until one attempt succeeds.
    ///
    /// The last error is returned once every model/attempt combination has failed.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        primary_model: &str,
        timeout: Duration,
        mut op: F,
    ) -> Result<T, LlmError>
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut last_error: Option<LlmError> = None;
        let mut require_pure_json = false;
        let mut timeout = timeout;
        let mut attempt = 0u32;

        for (model_index, (model, attempts)) in self.model_plan(primary_model).into_iter().enumerate() {
            let is_fallback = model_index > 0;
            if is_fallback {
                bump(&self.counters.model_fallbacks);
                warn!(model = %model, "falling back to next model");
            }

            for model_attempt in 0..attempts {
                if last_error.is_some() {
                    tokio::time::sleep(
                        self.config
                            .backoff
                            .delay_for_attempt(model_attempt.saturating_sub(1)),
                    )
                    .await;
                }

                attempt += 1;
                bump(&self.counters.total_attempts);
                let ctx = AttemptContext {
                    model: model.clone(),
                    attempt,
                    model_attempt: model_attempt + 1,
                    timeout,
                    require_pure_json,
                    is_fallback,
                };

                match op(ctx).await {
                    Ok(value) => {
                        if last_error.is_none() {
                            bump(&self.counters.first_try_successes);
                        } else {
                            bump(&self.counters.successful_retries);
                            info!(model = %model, attempt, "succeeded after retry");
                        }
                        return Ok(value);
                    }
                    Err(err) => {
                        match err.kind() {
                            FailureKind::JsonParse => {
                                require_pure_json = true;
                                warn!(model = %model, attempt, error = %err, "unparseable response; requesting pure JSON");
                            }
                            FailureKind::Timeout => {
                                timeout = timeout
                                    .mul_f64(self.config.timeout_growth.max(1.0))
                                    .min(self.config.max_timeout);
                                warn!(model = %model, attempt, next_timeout_ms = timeout.as_millis() as u64, "request timed out");
                            }
                            FailureKind::Other => {
                                warn!(model = %model, attempt, error = %err, "attempt failed");
                            }
                        }
                        let retryable = err.is_retryable();
                        last_error = Some(err);
                        if !retryable {
                            warn!(model = %model, "non-retryable error; skipping remaining attempts for model");
                            break;
                        }
                    }
                }
            }
        }

        bump(&self.counters.failed_retries);
        Err(last_error.unwrap_or(LlmError::Exhausted))
    }
}
