//! Result persistence: JSONL, CSV, refusal report and run summary.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::dispatcher::DispatchSummary;
use crate::task::TaskResult;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {source}", .path.display())]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// =============================================================================
// JSONL
// =============================================================================

pub fn write_jsonl(path: impl AsRef<Path>, results: &[TaskResult]) -> Result<(), ReportError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(io_err(path))?;
    let mut writer = BufWriter::new(file);
    for (idx, result) in results.iter().enumerate() {
        let line = serde_json::to_string(result).map_err(|source| ReportError::Json {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        writeln!(writer, "{line}").map_err(io_err(path))?;
    }
    writer.flush().map_err(io_err(path))
}

/// Blank lines are skipped.
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<TaskResult>, ReportError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(io_err(path))?;
    let mut results = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_err(path))?;
        if line.trim().is_empty() {
            continue;
        }
        let result = serde_json::from_str(&line).map_err(|source| ReportError::Json {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        results.push(result);
    }
    Ok(results)
}

// =============================================================================
// CSV
// =============================================================================

pub const RESULT_COLUMNS: &[&str] = &[
    "provider_id",
    "scale_name",
    "question_id",
    "question_text",
    "persona_style",
    "run_index",
    "scale_range",
    "reverse_flag",
    "numeric_score",
    "label",
    "justification",
    "raw_response",
    "duration",
    "scored_value",
    "status",
];

pub const REFUSAL_COLUMNS: &[&str] = &[
    "provider_id",
    "persona_style",
    "question_id",
    "question_text",
    "justification",
    "raw_response",
];

/// Quote a field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row<W: Write>(w: &mut W, fields: &[String]) -> std::io::Result<()> {
    let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
    writeln!(w, "{}", line.join(","))
}

fn opt_num(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn result_row(r: &TaskResult) -> Vec<String> {
    vec![
        r.task.provider_id.clone(),
        r.task.scale_name.clone(),
        r.task.question_id.clone(),
        r.task.question_text.clone(),
        r.task.persona_style.clone(),
        r.task.run_index.to_string(),
        r.task.scale_range.to_string(),
        r.task.reverse_flag.to_string(),
        r.numeric_score.to_string(),
        r.label.clone().unwrap_or_default(),
        r.justification.clone(),
        r.raw_response.clone(),
        opt_num(r.duration),
        opt_num(r.scored_value),
        r.status.as_str().to_string(),
    ]
}

fn write_csv_rows(
    path: &Path,
    header: &[&str],
    rows: impl Iterator<Item = Vec<String>>,
) -> Result<(), ReportError> {
    let file = File::create(path).map_err(io_err(path))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", header.join(",")).map_err(io_err(path))?;
    for row in rows {
        csv_row(&mut writer, &row).map_err(io_err(path))?;
    }
    writer.flush().map_err(io_err(path))
}

pub fn write_csv(path: impl AsRef<Path>, results: &[TaskResult]) -> Result<(), ReportError> {
    write_csv_rows(path.as_ref(), RESULT_COLUMNS, results.iter().map(result_row))
}

// =============================================================================
// REFUSALS
// =============================================================================

/// Rows where the model declined or the call failed: parser warnings and API
/// errors.
pub fn refusals(results: &[TaskResult]) -> Vec<&TaskResult> {
    results.iter().filter(|r| r.status.is_refusal()).collect()
}

/// Write the refusal subset and return how many rows it has.
pub fn write_refusals_csv(
    path: impl AsRef<Path>,
    results: &[TaskResult],
) -> Result<usize, ReportError> {
    let rows = refusals(results);
    let count = rows.len();
    write_csv_rows(
        path.as_ref(),
        REFUSAL_COLUMNS,
        rows.into_iter().map(|r| {
            vec![
                r.task.provider_id.clone(),
                r.task.persona_style.clone(),
                r.task.question_id.clone(),
                r.task.question_text.clone(),
                r.justification.clone(),
                r.raw_response.clone(),
            ]
        }),
    )?;
    Ok(count)
}

// =============================================================================
// RUN SUMMARY
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_tasks: usize,
    pub processed_tasks: usize,
    /// Synthesized answers keyed by status name.
    pub synthesized: BTreeMap<String, usize>,
    /// Cumulative tokens per provider.
    pub tokens: BTreeMap<String, u64>,
}

impl RunSummary {
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        dispatch: &DispatchSummary,
    ) -> Self {
        Self {
            run_id,
            started_at,
            finished_at,
            total_tasks: dispatch.total,
            processed_tasks: dispatch.processed,
            synthesized: dispatch
                .synthesized
                .iter()
                .map(|(status, n)| (status.as_str().to_string(), *n))
                .collect(),
            tokens: dispatch.tokens.clone(),
        }
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| ReportError::Json {
            path: path.to_path_buf(),
            line: 0,
            source,
        })?;
        std::fs::write(path, json).map_err(io_err(path))
    }
}
