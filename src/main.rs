use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use solidity_doppelganger::{
    find_duplicates, Algorithm, AstError, CompareError, CompareResult, Corpus, CorpusError, Doppelganger,
    FingerprintError, FingerprintOptions, HashedContract, SyntaxNode,
};
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// File name fragments of sources that are not worth fingerprinting
const EXCLUDED_NAME_PARTS: [&str; 4] = ["mock", "test", ".t.", "migrations"];

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },

    #[error("{path} is not a syntax tree: {source}")]
    Ast { path: String, source: AstError },

    #[error("{path}: {source}")]
    Fingerprint {
        path: String,
        source: CompareError,
    },

    #[error(transparent)]
    Options(#[from] FingerprintError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Parser)]
#[command(
    name = "doppelganger",
    version,
    about = "Find near-duplicate Solidity contracts by AST fingerprint"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct InputArgs {
    /// JSON syntax trees as emitted by @solidity-parser/parser
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Comma separated hash modes
    #[arg(short, long, default_value = "AST_EXACT,AST_STRUCTURE")]
    modes: String,

    /// Digest algorithm (sha1, sha256, sha512, keccak256)
    #[arg(short, long, default_value = "sha1")]
    algorithm: String,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print one corpus record per contract and mode
    Hash {
        #[command(flatten)]
        input: InputArgs,

        /// Prefix for the reported paths, e.g. a repository URL
        #[arg(short, long, default_value = "")]
        base_path: String,
    },
    /// Compare files against a corpus
    Compare {
        #[command(flatten)]
        input: InputArgs,

        /// Corpus file or directory of *.json corpus files
        #[arg(short, long = "db", required = true)]
        db: Vec<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find input files that fingerprint identically
    Dupes {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every input file was processed
async fn run(cli: Cli) -> Result<bool, CliError> {
    match cli.command {
        Command::Hash { input, base_path } => {
            let engine = Doppelganger::new(fingerprint_options(&input)?);
            let prefix = base_prefix(&base_path);
            let (records, ok) = fingerprint_files(&engine, &input.files, &prefix).await?;
            for record in &records {
                println!("{}", serde_json::to_string(&record.to_entry())?);
            }
            Ok(ok)
        }
        Command::Compare { input, db, json } => {
            let corpus = Arc::new(Corpus::new());
            for source in &db {
                corpus.load_path(source)?;
            }
            let engine = Doppelganger::with_corpus(fingerprint_options(&input)?, corpus);
            let (records, ok) = fingerprint_files(&engine, &input.files, "").await?;
            let results = engine.compare_records(&records);
            debug!(records = records.len(), matched = results.len(), "compare_finished");

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_matches(&results);
            }
            Ok(ok)
        }
        Command::Dupes { input } => {
            let engine = Doppelganger::new(fingerprint_options(&input)?);
            let (records, ok) = fingerprint_files(&engine, &input.files, "").await?;
            for group in find_duplicates(&records) {
                println!(
                    "**** DUPLICATE ****: {} (mode={})",
                    group.hash, group.options.mode
                );
                for member in &group.members {
                    println!(
                        "    :: {} :: {}",
                        member.name,
                        member.path.as_deref().unwrap_or_default()
                    );
                }
            }
            Ok(ok)
        }
    }
}

fn fingerprint_options(input: &InputArgs) -> Result<FingerprintOptions, FingerprintError> {
    let algorithm: Algorithm = input.algorithm.parse()?;
    FingerprintOptions::new(algorithm, FingerprintOptions::parse_modes(&input.modes)?)
}

fn base_prefix(base_path: &str) -> String {
    if base_path.is_empty() || base_path.ends_with('/') {
        base_path.to_string()
    } else {
        format!("{base_path}/")
    }
}

fn is_excluded(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    EXCLUDED_NAME_PARTS.iter().any(|part| name.contains(part))
}

/// Fingerprint every file concurrently, one task per file. Records keep the
/// input file order; failing files are reported and skipped.
async fn fingerprint_files(
    engine: &Doppelganger,
    files: &[PathBuf],
    prefix: &str,
) -> Result<(Vec<HashedContract>, bool), CliError> {
    let mut tasks = Vec::new();
    for file in files {
        if is_excluded(file) {
            warn!(path = %file.display(), "skipped_excluded_file");
            continue;
        }
        let engine = engine.clone();
        let file = file.clone();
        let reported = format!("{prefix}{}", file.display());
        tasks.push(tokio::spawn(async move {
            let document = tokio::task::spawn_blocking({
                let file = file.clone();
                move || load_document(&file)
            })
            .await??;
            engine
                .fingerprint_async(document, Some(reported))
                .await
                .map_err(|source| CliError::Fingerprint {
                    path: file.display().to_string(),
                    source,
                })
        }));
    }

    let mut records = Vec::new();
    let mut ok = true;
    for task in tasks {
        match task.await? {
            Ok(found) => records.extend(found),
            Err(e) => {
                warn!(error = %e, "file_failed");
                eprintln!("ERROR processing file: {e}");
                ok = false;
            }
        }
    }
    Ok((records, ok))
}

fn load_document(path: &Path) -> Result<SyntaxNode, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|source| CliError::Json {
            path: path.display().to_string(),
            source,
        })?;
    SyntaxNode::from_json(value).map_err(|source| CliError::Ast {
        path: path.display().to_string(),
        source,
    })
}

fn print_matches(results: &CompareResult) {
    for (key, group) in results.iter() {
        println!("**** MATCH ****: {} :: {}", key.path, key.name);
        for m in &group.matches {
            println!(
                "    :: {} :: {}  (mode={})",
                m.name,
                m.path.as_deref().unwrap_or_default(),
                m.options.mode
            );
        }
    }
}
