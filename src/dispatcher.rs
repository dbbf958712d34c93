//! Task dispatcher: bounded-concurrency fan-out per provider family.
//!
//! Tasks are bucketed by provider family. Every bucket runs its own loop of
//! fixed-size batches: the calls of one batch are spawned together, gated by
//! the bucket's semaphore, and the next batch starts only after all of them
//! resolved and the pacing delay elapsed. Buckets run concurrently with each
//! other. Each bucket materializes its own results before they are merged.
//!
//! Every input task yields exactly one [`TaskResult`] whose score lies inside
//! the task's range. Failed calls and out-of-range scores are replaced by the
//! scale midpoint and tagged.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::invoker::{InvokeError, Invocation, ModelInvoker};
use crate::parser::{AnswerStatus, ParsedAnswer};
use crate::task::{Task, TaskResult};

// =============================================================================
// POLICIES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("max_in_flight must be at least 1")]
    ZeroInFlight,
    #[error("max_in_flight must be at most {}", Semaphore::MAX_PERMITS)]
    TooManyInFlight,
    #[error("batch_size must be at least 1")]
    ZeroBatch,
}

/// Concurrency profile for one provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyPolicy {
    /// Calls allowed in flight at once.
    pub max_in_flight: usize,
    /// Sleep between consecutive batches.
    pub pacing: Duration,
    pub batch_size: usize,
}

pub const DEFAULT_BATCH_SIZE: usize = 5;

impl FamilyPolicy {
    pub fn new(max_in_flight: usize, pacing: Duration, batch_size: usize) -> Result<Self, PolicyError> {
        if max_in_flight == 0 {
            return Err(PolicyError::ZeroInFlight);
        }
        if max_in_flight > Semaphore::MAX_PERMITS {
            return Err(PolicyError::TooManyInFlight);
        }
        if batch_size == 0 {
            return Err(PolicyError::ZeroBatch);
        }
        Ok(Self {
            max_in_flight,
            pacing,
            batch_size,
        })
    }

    const fn preset(max_in_flight: usize, pacing_ms: u64) -> Self {
        Self {
            max_in_flight,
            pacing: Duration::from_millis(pacing_ms),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Built-in profile for a family name; unknown families get the
    /// anthropic-like middle ground.
    pub fn for_family(family: &str) -> Self {
        match family {
            "openai" => Self::preset(3, 1_000),
            "anthropic" => Self::preset(5, 500),
            "llama" => Self::preset(10, 200),
            _ => Self::preset(5, 500),
        }
    }
}

/// Family name → policy, falling back to [`FamilyPolicy::for_family`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyTable {
    overrides: BTreeMap<String, FamilyPolicy>,
}

impl PolicyTable {
    pub fn get(&self, family: &str) -> FamilyPolicy {
        self.overrides
            .get(family)
            .copied()
            .unwrap_or_else(|| FamilyPolicy::for_family(family))
    }

    pub fn set(&mut self, family: impl Into<String>, policy: FamilyPolicy) {
        self.overrides.insert(family.into(), policy);
    }

    pub fn with(mut self, family: impl Into<String>, policy: FamilyPolicy) -> Self {
        self.set(family, policy);
        self
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

#[derive(Debug, Error)]
pub enum DispatchError {
    /// A task names a provider or persona the invoker cannot resolve.
    #[error("task {index} ({provider_id}/{question_id}): {source}")]
    Config {
        index: usize,
        provider_id: String,
        question_id: String,
        #[source]
        source: ConfigError,
    },
}

/// Why a spawned call produced no invocation.
#[derive(Debug, Error)]
enum CallFailure {
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("concurrency limiter closed")]
    LimiterClosed,
    #[error("task panicked: {0}")]
    Panicked(String),
}

type Outcome = Result<Invocation, CallFailure>;

/// Counts reported after a dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchSummary {
    pub total: usize,
    pub processed: usize,
    /// Synthesized answers by status.
    pub synthesized: BTreeMap<AnswerStatus, usize>,
    /// Token snapshot taken when dispatch finished.
    pub tokens: BTreeMap<String, u64>,
}

pub struct TaskDispatcher {
    invoker: Arc<ModelInvoker>,
    policies: PolicyTable,
    temperature: f32,
}

impl TaskDispatcher {
    pub fn new(invoker: Arc<ModelInvoker>, policies: PolicyTable, temperature: f32) -> Self {
        Self {
            invoker,
            policies,
            temperature,
        }
    }

    pub fn invoker(&self) -> &ModelInvoker {
        &self.invoker
    }

    pub async fn dispatch(&self, tasks: Vec<Task>) -> Result<Vec<TaskResult>, DispatchError> {
        self.dispatch_with_summary(tasks).await.map(|(results, _)| results)
    }

    pub async fn dispatch_with_summary(
        &self,
        tasks: Vec<Task>,
    ) -> Result<(Vec<TaskResult>, DispatchSummary), DispatchError> {
        let total = tasks.len();
        let buckets = self.partition(tasks)?;

        info!(
            total,
            buckets = buckets.len(),
            temperature = self.temperature,
            "dispatch started"
        );

        let runs = buckets.into_iter().map(|(family, tasks)| {
            let policy = self.policies.get(&family);
            run_bucket(
                Arc::clone(&self.invoker),
                family,
                tasks,
                policy,
                self.temperature,
            )
        });
        let bucket_outcomes = join_all(runs).await;

        let mut results = Vec::with_capacity(total);
        for (task, outcome) in bucket_outcomes.into_iter().flatten() {
            results.push(finalize(task, outcome));
        }

        let mut synthesized = BTreeMap::new();
        for r in results.iter().filter(|r| r.is_synthesized()) {
            *synthesized.entry(r.status).or_insert(0) += 1;
        }
        let summary = DispatchSummary {
            total,
            processed: results.len(),
            synthesized,
            tokens: self.invoker.costs().snapshot(),
        };

        info!(
            processed = summary.processed,
            total = summary.total,
            tokens = ?summary.tokens,
            "Processed {}/{} tasks",
            summary.processed,
            summary.total
        );

        Ok((results, summary))
    }

    /// Resolve every task up front and group by family, keeping input order
    /// within a family.
    fn partition(&self, tasks: Vec<Task>) -> Result<BTreeMap<String, Vec<Task>>, DispatchError> {
        let registry = self.invoker.registry();
        let personas = self.invoker.personas();

        let mut buckets: BTreeMap<String, Vec<Task>> = BTreeMap::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let config_err = |source| DispatchError::Config {
                index,
                provider_id: task.provider_id.clone(),
                question_id: task.question_id.clone(),
                source,
            };
            let family = registry
                .family_of(&task.provider_id)
                .map_err(config_err)?
                .to_string();
            if !personas.contains(&task.persona_style) {
                return Err(config_err(ConfigError::UnknownPersona(
                    task.persona_style.clone(),
                )));
            }
            buckets.entry(family).or_default().push(task);
        }
        Ok(buckets)
    }
}

async fn run_bucket(
    invoker: Arc<ModelInvoker>,
    family: String,
    tasks: Vec<Task>,
    policy: FamilyPolicy,
    temperature: f32,
) -> Vec<(Task, Outcome)> {
    let limiter = Arc::new(Semaphore::new(policy.max_in_flight));
    let batch_count = tasks.len().div_ceil(policy.batch_size);
    let mut outcomes = Vec::with_capacity(tasks.len());

    for (batch_index, batch) in tasks.chunks(policy.batch_size).enumerate() {
        let handles: Vec<_> = batch
            .iter()
            .cloned()
            .map(|task| {
                let invoker = Arc::clone(&invoker);
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    let _permit = limiter
                        .acquire_owned()
                        .await
                        .map_err(|_| CallFailure::LimiterClosed)?;
                    invoker
                        .invoke(
                            &task.provider_id,
                            &task.question_text,
                            &task.persona_style,
                            task.scale_range,
                            temperature,
                        )
                        .await
                        .map_err(CallFailure::from)
                })
            })
            .collect();

        for (task, joined) in batch.iter().zip(join_all(handles).await) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(CallFailure::Panicked(e.to_string())),
            };
            outcomes.push((task.clone(), outcome));
        }

        debug!(
            family = %family,
            batch = batch_index + 1,
            batches = batch_count,
            size = batch.len(),
            "batch complete"
        );

        if batch_index + 1 < batch_count && !policy.pacing.is_zero() {
            sleep(policy.pacing).await;
        }
    }

    outcomes
}

/// Merge a task with its outcome and enforce the range invariant.
fn finalize(task: Task, outcome: Outcome) -> TaskResult {
    let mut result = match outcome {
        Ok(invocation) => TaskResult::from_invocation(task, invocation),
        Err(failure) => {
            error!(
                provider = %task.provider_id,
                question = %task.question_id,
                error = %failure,
                "Task failed"
            );
            TaskResult::failed(task, &failure.to_string())
        }
    };

    let range = result.task.scale_range;
    if !range.contains(result.numeric_score) {
        let original = result.numeric_score;
        warn!(
            question = %result.task.question_id,
            score = original,
            "Score out of range, using midpoint"
        );
        let repaired = ParsedAnswer::synthesized(
            range,
            AnswerStatus::RangeError,
            &format!("Original score: {original:?}"),
        );
        result.numeric_score = repaired.numeric_score;
        result.justification = repaired.justification;
        result.status = repaired.status;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::ScaleRange;

    fn task(range: ScaleRange) -> Task {
        Task {
            provider_id: "OpenAI".into(),
            scale_name: "RWA".into(),
            question_id: "rwa_1".into(),
            question_text: "q".into(),
            persona_style: "minimal".into(),
            run_index: 1,
            scale_range: range,
            reverse_flag: false,
        }
    }

    fn invocation(score: f64) -> Invocation {
        Invocation {
            answer: ParsedAnswer {
                numeric_score: score,
                label: String::new(),
                justification: "fine".into(),
                status: AnswerStatus::LabeledField,
            },
            raw_response: format!("rating: {score}"),
            duration: Duration::from_millis(20),
            truncated: false,
        }
    }

    #[test]
    fn default_family_policies() {
        let table = PolicyTable::default();
        assert_eq!(table.get("openai"), FamilyPolicy::preset(3, 1_000));
        assert_eq!(table.get("anthropic").max_in_flight, 5);
        assert_eq!(table.get("llama").pacing, Duration::from_millis(200));
        assert_eq!(table.get("mistral"), FamilyPolicy::preset(5, 500));
        assert_eq!(table.get("openai").batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn policy_validation() {
        assert_eq!(
            FamilyPolicy::new(0, Duration::ZERO, 5),
            Err(PolicyError::ZeroInFlight)
        );
        assert_eq!(
            FamilyPolicy::new(1, Duration::ZERO, 0),
            Err(PolicyError::ZeroBatch)
        );
        assert_eq!(
            FamilyPolicy::new(Semaphore::MAX_PERMITS + 1, Duration::ZERO, 5),
            Err(PolicyError::TooManyInFlight)
        );
        assert!(FamilyPolicy::new(Semaphore::MAX_PERMITS, Duration::ZERO, 5).is_ok());
        let table = PolicyTable::default().with("openai", FamilyPolicy::new(1, Duration::ZERO, 2).unwrap());
        assert_eq!(table.get("openai").max_in_flight, 1);
    }

    #[test]
    fn in_range_answer_passes_through() {
        let range = ScaleRange::new(1, 7).unwrap();
        let result = finalize(task(range), Ok(invocation(6.0)));
        assert_eq!(result.numeric_score, 6.0);
        assert_eq!(result.justification, "fine");
        assert_eq!(result.label.as_deref(), Some(""));
        assert_eq!(result.duration, Some(0.02));
        assert_eq!(result.status, AnswerStatus::LabeledField);
    }

    #[test]
    fn out_of_range_answer_is_repaired() {
        let range = ScaleRange::new(1, 7).unwrap();
        let result = finalize(task(range), Ok(invocation(12.0)));
        assert_eq!(result.numeric_score, 4.0);
        assert_eq!(result.justification, "RANGE ERROR: Original score: 12.0");
        assert_eq!(result.status, AnswerStatus::RangeError);
        assert_eq!(result.raw_response, "rating: 12");
    }

    #[test]
    fn nan_is_out_of_range() {
        let range = ScaleRange::new(1, 5).unwrap();
        let result = finalize(task(range), Ok(invocation(f64::NAN)));
        assert_eq!(result.numeric_score, 3.0);
        assert_eq!(result.justification, "RANGE ERROR: Original score: NaN");
    }

    #[test]
    fn failure_becomes_error_midpoint() {
        let range = ScaleRange::new(1, 7).unwrap();
        let result = finalize(task(range), Err(CallFailure::Panicked("boom".into())));
        assert_eq!(result.numeric_score, 4.0);
        assert_eq!(result.justification, "ERROR: task panicked: boom");
        assert_eq!(result.raw_response, "task panicked: boom");
        assert!(result.label.is_none());
        assert!(result.duration.is_none());
        assert_eq!(result.status, AnswerStatus::TaskError);
    }
}
