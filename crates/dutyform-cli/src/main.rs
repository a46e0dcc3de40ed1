mod display;
mod pipeline;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use dutyform_ai::{
    AnthropicProvider, DEFAULT_MODEL, FallbackCompiler, FallbackConfig, MAX_BATCH_ITEMS,
    ProviderConfig, RateCompiler,
};
use dutyform_core::{
    BatchSynthesizer, RateSpecification, WRITE_BATCH_SIZE, evaluate, validate_formula,
};
use dutyform_store::{SnapshotStore, write_formula_parquet};
use tracing_subscriber::EnvFilter;

/// Compile tariff rate text into formulas and synthesize Chapter 99 adjustments.
#[derive(Parser, Debug)]
#[command(name = "dutyform", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile one rate text
    Compile {
        text: String,
        /// Unit of quantity, e.g. "No." or "kg"
        #[arg(long)]
        unit: Option<String>,
        #[command(flatten)]
        ai: AiArgs,
    },
    /// Check a formula against the safety rules
    Validate { formula: String },
    /// Evaluate a formula for given inputs (diagnostics only)
    Eval {
        formula: String,
        #[arg(long, default_value_t = 0.0)]
        value: f64,
        #[arg(long, default_value_t = 0.0)]
        weight: f64,
        #[arg(long, default_value_t = 0.0)]
        quantity: f64,
    },
    /// Compile general and other rate formulas for every entry in a snapshot
    Formulas {
        #[command(flatten)]
        io: SnapshotArgs,
        #[command(flatten)]
        ai: AiArgs,
    },
    /// Resolve Chapter 99 links and write adjusted formulas
    Synthesize {
        #[command(flatten)]
        io: SnapshotArgs,
        /// Entries written per batch
        #[arg(long, default_value_t = WRITE_BATCH_SIZE)]
        batch_size: usize,
        /// Worker threads for per-entry resolution
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
    /// Print one entry of a snapshot
    Show {
        #[arg(long)]
        snapshot: PathBuf,
        code: String,
    },
    /// Export formula columns to Parquet
    Export {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SnapshotArgs {
    /// JSON schedule snapshot
    #[arg(long)]
    snapshot: PathBuf,
    /// Write here instead of updating the snapshot in place
    #[arg(long)]
    output: Option<PathBuf>,
}

impl SnapshotArgs {
    fn target(&self) -> &PathBuf {
        self.output.as_ref().unwrap_or(&self.snapshot)
    }
}

#[derive(Args, Debug)]
struct AiArgs {
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, env = "DUTYFORM_MODEL", default_value = DEFAULT_MODEL)]
    model: String,
    /// Deadline per generative call
    #[arg(long, env = "DUTYFORM_AI_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
    /// Generative calls in flight at once
    #[arg(long, env = "DUTYFORM_AI_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,
    /// Deterministic grammar only
    #[arg(long)]
    no_ai: bool,
}

impl AiArgs {
    fn compiler(&self) -> anyhow::Result<RateCompiler<AnthropicProvider>> {
        let api_key = match (&self.api_key, self.no_ai) {
            (Some(key), false) if !key.is_empty() => key,
            _ => {
                tracing::info!("generative fallback disabled");
                return Ok(RateCompiler::deterministic_only());
            }
        };
        let timeout = Duration::from_secs(self.timeout_secs);
        let provider = AnthropicProvider::new(
            ProviderConfig::new(api_key.clone())
                .with_model(self.model.clone())
                .with_timeout(timeout + Duration::from_secs(5)),
        )
        .context("building Anthropic client")?;
        Ok(RateCompiler::with_fallback(FallbackCompiler::new(
            provider,
            FallbackConfig {
                timeout,
                batch_size: MAX_BATCH_ITEMS,
                concurrency: self.concurrency,
            },
        )))
    }
}

fn load(path: &Path) -> anyhow::Result<SnapshotStore> {
    SnapshotStore::load(path).with_context(|| format!("loading snapshot {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!("dutyform v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Compile { text, unit, ai } => {
            let compiler = ai.compiler()?;
            let mut spec = RateSpecification::new(text.clone());
            if let Some(unit) = unit {
                spec = spec.with_unit_hint(unit);
            }
            let formula = compiler.compile(&spec).await?;
            display::print_formula(&text, &formula);
        }
        Command::Validate { formula } => {
            let validation = validate_formula(&formula);
            display::print_validation(&formula, &validation);
            if !validation.valid {
                std::process::exit(1);
            }
        }
        Command::Eval {
            formula,
            value,
            weight,
            quantity,
        } => {
            let validation = validate_formula(&formula);
            if !validation.valid {
                bail!(
                    "invalid formula: {}",
                    validation.error.unwrap_or_default()
                );
            }
            let result = evaluate(&formula, value, weight, quantity)
                .with_context(|| format!("evaluating {formula:?}"))?;
            println!("{result}");
        }
        Command::Formulas { io, ai } => {
            let compiler = ai.compiler()?;
            let mut store = load(&io.snapshot)?;
            let stats = pipeline::run_compile_pipeline(&mut store, &compiler).await?;
            store.save(io.target())?;
            eprintln!(
                "  Compiled {} pattern + {} generated, {} failed, {} empty columns in {:.1}s",
                stats.pattern, stats.ai, stats.failed, stats.skipped, stats.elapsed_secs
            );
        }
        Command::Synthesize {
            io,
            batch_size,
            workers,
        } => {
            let store = load(&io.snapshot)?;
            let synthesizer = BatchSynthesizer::new()
                .with_batch_size(batch_size)
                .with_workers(workers);
            let run = pipeline::run_synthesis_pipeline(store, synthesizer).await?;
            let stats = run.stats;
            if stats.updated > 0 || io.output.is_some() {
                run.store.save(io.target())?;
            }
            eprintln!(
                "  Processed {} entries: {} updated, {} linked, {} unresolved, {} non-NTR defaults in {:.1}s",
                stats.processed,
                stats.updated,
                stats.linked,
                stats.unresolved,
                stats.non_ntr_defaults_applied,
                run.elapsed_secs
            );
        }
        Command::Show { snapshot, code } => {
            let store = load(&snapshot)?;
            match store.get(&code) {
                Some(entry) => display::print_entry_card(entry),
                None => bail!("no entry with code {code}"),
            }
        }
        Command::Export { snapshot, output } => {
            let store = load(&snapshot)?;
            let rows = write_formula_parquet(store.entries(), &output)
                .with_context(|| format!("writing {}", output.display()))?;
            eprintln!("  Wrote {rows} rows to {}", output.display());
        }
    }

    Ok(())
}
