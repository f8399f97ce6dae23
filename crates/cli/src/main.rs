use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

use sheetqc_core::{
    build_feedback_request, calculate_score, classify_batch, fingerprint_rows, needs_feedback,
    sample_rows, score_summary, Category, IngestPolicy, IssueDetail, Marking, ScoreResult,
    StaticCatalog, DEFAULT_FEEDBACK_THRESHOLD,
};
use sheetqc_llm::{
    evaluate_dataset_blocking, generate_feedback_blocking, FeedbackClient, LlmProvider,
    RequestGate, ServiceLimits, CHUNK_SIZE,
};
use sheetqc_store::{CatalogStore, FingerprintScope, FingerprintStore};

#[derive(Parser, Debug)]
#[command(name = "sheetqc", version, about = "QC evaluation toolkit for tabular record batches")]
struct Cli {
    /// SQLite database holding fingerprints and the category catalog.
    #[arg(long, global = true, default_value = "sheetqc.sqlite")]
    db: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database schema.
    Init,
    /// Fingerprint a CSV batch and report duplicates.
    Dedup {
        input: PathBuf,
        /// Important columns, comma separated. Defaults to the file header.
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        #[arg(long)]
        project: Option<i64>,
        #[arg(long)]
        task: Option<i64>,
        /// strict rejects the batch on any duplicate; lenient keeps going.
        #[arg(long, default_value = "strict")]
        mode: String,
        /// Persist unique fingerprints after classification (needs
        /// --project and --task).
        #[arg(long, action = ArgAction::SetTrue)]
        commit: bool,
    },
    /// Score a marking submission against the category catalog.
    Score {
        /// JSON file with the marking list.
        markings: PathBuf,
        #[arg(long = "project-type")]
        project_type: i64,
        /// JSON catalog file; defaults to the catalog tables in --db.
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// JSON file with per-record issue details for feedback.
        #[arg(long)]
        issues: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        total_records: usize,
        /// Ask the text-generation collaborator for feedback when the score
        /// falls below the threshold or the evaluation is rejected.
        #[arg(long, action = ArgAction::SetTrue)]
        feedback: bool,
        #[arg(long, default_value_t = DEFAULT_FEEDBACK_THRESHOLD)]
        threshold: f64,
        #[arg(long, default_value = "local")]
        provider: String,
        #[arg(long)]
        model: Option<String>,
    },
    /// Run the chunked data-quality sweep over a CSV file.
    Evaluate {
        input: PathBuf,
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        #[arg(long, default_value = "local")]
        provider: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = CHUNK_SIZE)]
        chunk_size: usize,
    },
    /// Pick a reproducible review sample from a CSV file.
    Sample {
        input: PathBuf,
        #[arg(long)]
        size: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Init => run_init(&cli.db),
        Commands::Dedup {
            input,
            columns,
            project,
            task,
            mode,
            commit,
        } => run_dedup(&cli.db, &input, columns, project, task, &mode, commit),
        Commands::Score {
            markings,
            project_type,
            catalog,
            issues,
            total_records,
            feedback,
            threshold,
            provider,
            model,
        } => run_score(
            &cli.db,
            &markings,
            project_type,
            catalog.as_deref(),
            issues.as_deref(),
            total_records,
            feedback,
            threshold,
            &provider,
            model.as_deref(),
        ),
        Commands::Evaluate {
            input,
            columns,
            provider,
            model,
            chunk_size,
        } => run_evaluate(&input, columns, &provider, model.as_deref(), chunk_size),
        Commands::Sample { input, size, seed } => run_sample(&input, size, seed),
    }
}

fn run_init(db: &Path) -> Result<()> {
    FingerprintStore::open(db)?;
    CatalogStore::open(db)?;
    eprintln!("initialized {}", db.display());
    Ok(())
}

fn run_dedup(
    db: &Path,
    input: &Path,
    columns: Vec<String>,
    project: Option<i64>,
    task: Option<i64>,
    mode: &str,
    commit: bool,
) -> Result<()> {
    let policy = parse_policy(mode)?;
    let (headers, rows) = read_csv_rows(input)?;
    let selection = if columns.is_empty() { headers } else { columns };

    let store = FingerprintStore::open(db)?;
    let scope = match (project, task) {
        (Some(project_id), Some(task_id)) => FingerprintScope::Task {
            project_id,
            task_id,
        },
        _ => FingerprintScope::Global,
    };
    let persisted = store.load(scope)?;
    let report = classify_batch(fingerprint_rows(&rows, &selection, 2), &persisted);

    println!("{}", serde_json::to_string_pretty(&report)?);

    if policy == IngestPolicy::Strict && report.has_duplicates() {
        bail!(
            "batch rejected: {} duplicate row(s) found",
            report.duplicate_count()
        );
    }
    if commit {
        let (project_id, task_id) = project
            .zip(task)
            .ok_or_else(|| anyhow!("--commit needs --project and --task"))?;
        let unique: Vec<(usize, String)> = report
            .unique_rows()
            .map(|row| (row.row, row.fingerprint.clone()))
            .collect();
        let inserted = store.insert_batch(project_id, task_id, &unique)?;
        eprintln!(
            "persisted {} fingerprint(s), skipped {} duplicate(s)",
            inserted,
            report.duplicate_count()
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_score(
    db: &Path,
    markings_path: &Path,
    project_type: i64,
    catalog_path: Option<&Path>,
    issues_path: Option<&Path>,
    total_records: usize,
    feedback: bool,
    threshold: f64,
    provider: &str,
    model: Option<&str>,
) -> Result<()> {
    let markings: Vec<Marking> = read_json_file(markings_path)?;
    let issues: Vec<IssueDetail> = match issues_path {
        Some(path) => read_json_file(path)?,
        None => Vec::new(),
    };

    let score = match catalog_path {
        Some(path) => {
            let categories: Vec<Category> = read_json_file(path)?;
            let catalog = StaticCatalog::single(project_type, categories);
            calculate_score(&catalog, project_type, &markings)?
        }
        None => {
            let catalog = CatalogStore::open(db)?;
            calculate_score(&catalog, project_type, &markings)?
        }
    };
    eprintln!("{}", score_summary(&score));

    let feedback_summary = if feedback && needs_feedback(&score, threshold) {
        let payload = build_feedback_request(&score, &issues, total_records, 3);
        let limits = ServiceLimits::default();
        let client = build_client(provider, model, &limits)?;
        let gate = RequestGate::new(&limits);
        // feedback being unavailable never blocks the score itself
        match generate_feedback_blocking(&client, &gate, &payload) {
            Ok(summary) => Some(summary),
            Err(err) => {
                eprintln!("feedback unavailable: {err:#}");
                None
            }
        }
    } else {
        None
    };

    print_score(&score, feedback_summary.as_ref())?;
    Ok(())
}

fn run_evaluate(
    input: &Path,
    columns: Vec<String>,
    provider: &str,
    model: Option<&str>,
    chunk_size: usize,
) -> Result<()> {
    let (headers, rows) = read_csv_rows(input)?;
    let selection = if columns.is_empty() { headers } else { columns };

    let limits = ServiceLimits::default();
    let client = build_client(provider, model, &limits)?;
    let gate = RequestGate::new(&limits);
    let aggregate =
        evaluate_dataset_blocking(&client, &gate, &rows, &selection.join(", "), chunk_size)?;
    println!("{}", serde_json::to_string_pretty(&aggregate)?);
    Ok(())
}

fn run_sample(input: &Path, size: usize, seed: u64) -> Result<()> {
    let (_, rows) = read_csv_rows(input)?;
    let picked = sample_rows(rows.len(), size, seed);
    let sampled: Vec<&Value> = picked.iter().map(|&idx| &rows[idx]).collect();
    println!("{}", serde_json::to_string_pretty(&sampled)?);
    Ok(())
}

fn parse_policy(mode: &str) -> Result<IngestPolicy> {
    match mode.to_lowercase().as_str() {
        "strict" => Ok(IngestPolicy::Strict),
        "lenient" => Ok(IngestPolicy::Lenient),
        other => bail!("unknown mode {other}, expected strict or lenient"),
    }
}

fn build_client(
    provider: &str,
    model: Option<&str>,
    limits: &ServiceLimits,
) -> Result<FeedbackClient> {
    let provider = LlmProvider::from_str(provider)
        .ok_or_else(|| anyhow!(format!("unknown provider {provider}")))?;
    let model = model.map(str::to_string).unwrap_or_else(|| {
        match provider {
            LlmProvider::Gemini => "gemini-2.5-flash",
            LlmProvider::OpenAi => "gpt-4.1-mini",
            LlmProvider::Local => "local",
        }
        .to_string()
    });
    FeedbackClient::new(provider, model, limits.clone())
}

/// Reads a CSV file into JSON row objects, keeping the header order.
fn read_csv_rows(path: &Path) -> Result<(Vec<String>, Vec<Value>)> {
    let file = File::open(path)
        .with_context(|| format!("failed to open CSV file {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new().from_reader(file);
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("missing headers in {}", path.display()))?
        .iter()
        .map(|cell| cell.to_string())
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("invalid row in {}", path.display()))?;
        let mut object = Map::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            object.insert(header.clone(), json!(cell));
        }
        rows.push(Value::Object(object));
    }
    Ok((headers, rows))
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .with_context(|| format!("failed to open JSON file {}", path.display()))?;
    serde_json::from_reader(file)
        .with_context(|| format!("failed to parse JSON file {}", path.display()))
}

fn print_score(
    score: &ScoreResult,
    feedback: Option<&sheetqc_llm::FeedbackSummary>,
) -> Result<()> {
    let output = json!({
        "score": score,
        "feedback": feedback,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn csv_rows_keep_header_order() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Name,Email,Id").unwrap();
        writeln!(file, "Ada,a@b.c,1").unwrap();
        let (headers, rows) = read_csv_rows(file.path()).unwrap();
        assert_eq!(headers, vec!["Name", "Email", "Id"]);
        let keys: Vec<&String> = rows[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["Name", "Email", "Id"]);
    }

    #[test]
    fn mode_strings_parse() {
        assert_eq!(parse_policy("strict").unwrap(), IngestPolicy::Strict);
        assert_eq!(parse_policy("LENIENT").unwrap(), IngestPolicy::Lenient);
        assert!(parse_policy("whatever").is_err());
    }
}
