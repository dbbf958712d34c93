#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use survey_harness::registry::FamilyLookup;
use survey_harness::report::{self, RunSummary};
use survey_harness::{
    build_tasks, CostTracker, ModelInvoker, PersonaCatalog, ProviderRegistry, SurveyConfig,
    TaskDispatcher,
};

const DEFAULT_LOG_FILTER: &str = "survey_harness=info,survey=info";

#[derive(Parser)]
#[command(name = "survey", version, about = "LLM persona survey harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the survey and write one result per task
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Results as JSON Lines
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Parser warnings and API errors as CSV
        #[arg(long)]
        refusals: Option<PathBuf>,
        /// Run summary JSON
        #[arg(long)]
        summary: Option<PathBuf>,
        /// Overrides run.temperature
        #[arg(long)]
        temperature: Option<f32>,
        /// Overrides run.num_repetitions
        #[arg(long)]
        repetitions: Option<u32>,
    },
    /// Count tasks per provider without calling anything
    Tasks {
        #[arg(long)]
        config: PathBuf,
    },
    /// List persona ids
    Personas {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Rebuild the refusal report from a results file
    Refusals {
        #[arg(long)]
        results: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            out,
            csv,
            refusals,
            summary,
            temperature,
            repetitions,
        } => {
            let mut config = SurveyConfig::load(&config)?;
            if let Some(t) = temperature {
                config.run.temperature = t;
            }
            if let Some(n) = repetitions {
                config.run.num_repetitions = n;
            }

            let questions = config.question_defs()?;
            let personas = config.persona_catalog();
            let defs = config.provider_defs()?;
            let registry = ProviderRegistry::from_env(
                &defs,
                &config.run.models_to_run,
                &config.gateway_config(),
            )?;
            let tasks = build_tasks(&questions, &config.run, &registry, &personas)?;
            let scorer = config.reverse_scorer()?;
            let policies = config.policies()?;

            let run_id = Uuid::new_v4();
            let started_at = Utc::now();
            info!(%run_id, tasks = tasks.len(), "survey run starting");

            let invoker = Arc::new(ModelInvoker::new(
                Arc::new(registry),
                Arc::new(personas),
                Arc::new(CostTracker::new()),
            ));
            let dispatcher = TaskDispatcher::new(invoker, policies, config.run.temperature);
            let (mut results, dispatch_summary) = dispatcher.dispatch_with_summary(tasks).await?;
            scorer.apply(&mut results);

            report::write_jsonl(&out, &results)?;
            if let Some(path) = csv {
                report::write_csv(&path, &results)?;
            }
            if let Some(path) = refusals {
                let n = report::write_refusals_csv(&path, &results)?;
                info!(refusals = n, path = %path.display(), "refusal report written");
            }

            let run_summary = RunSummary::new(run_id, started_at, Utc::now(), &dispatch_summary);
            if let Some(path) = summary {
                run_summary.write(&path)?;
            }
            info!(
                %run_id,
                processed = run_summary.processed_tasks,
                total = run_summary.total_tasks,
                tokens = ?run_summary.tokens,
                "survey run finished"
            );
        }
        Commands::Tasks { config } => {
            let config = SurveyConfig::load(&config)?;
            let questions = config.question_defs()?;
            let defs = config.provider_defs()?;
            let personas = config.persona_catalog();
            let tasks = build_tasks(&questions, &config.run, defs.as_slice(), &personas)?;

            let mut per_provider: BTreeMap<&str, usize> = BTreeMap::new();
            for task in &tasks {
                *per_provider.entry(task.provider_id.as_str()).or_insert(0) += 1;
            }
            for (provider, count) in per_provider {
                let family = defs.as_slice().family_of(provider)?;
                println!("{provider}\t{family}\t{count}");
            }
            println!("total\t{}", tasks.len());
        }
        Commands::Personas { config } => {
            let catalog = match config {
                Some(path) => SurveyConfig::load(&path)?.persona_catalog(),
                None => PersonaCatalog::builtin(),
            };
            for id in catalog.ids() {
                println!("{id}");
            }
        }
        Commands::Refusals { results, out } => {
            let rows = report::read_jsonl(&results)?;
            let n = report::write_refusals_csv(&out, &rows)?;
            println!("{n}");
        }
    }

    Ok(())
}
