#![forbid(unsafe_code)]

//! # survey-harness
//!
//! Put psychometric survey items to several LLM providers under persona
//! prompts and get back one clean, scale-valid score per question.
//!
//! A run is the cross product question × provider × persona × repetition.
//! The [`TaskDispatcher`] buckets those tasks by provider family, runs each
//! bucket under its own concurrency limit and pacing, and merges the results.
//! Every task yields exactly one [`TaskResult`] whose score lies inside the
//! question's range: answers that cannot be recovered from the model's text,
//! failed calls and out-of-range scores are replaced by the scale midpoint and
//! tagged with an [`AnswerStatus`].

pub mod config;
pub mod dispatcher;
pub mod gateway;
pub mod invoker;
pub mod parser;
pub mod prompts;
pub mod registry;
pub mod report;
pub mod scale;
pub mod scoring;
pub mod task;

pub use config::{ConfigError, RunConfig, SurveyConfig};
pub use dispatcher::{DispatchError, DispatchSummary, FamilyPolicy, PolicyTable, TaskDispatcher};
pub use gateway::{CostTracker, ModelConfig, ProviderAdapter, ProviderError, RawAnswer};
pub use invoker::{InvokeError, Invocation, ModelInvoker};
pub use parser::{parse, AnswerStatus, ParsedAnswer};
pub use prompts::PersonaCatalog;
pub use registry::{ProviderDef, ProviderRegistry};
pub use scale::{validate, InvalidScaleError, ScaleRange};
pub use scoring::ReverseScorer;
pub use task::{build_tasks, QuestionDef, Task, TaskResult};
