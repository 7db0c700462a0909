use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use anbieter_abgleich::{
    load_sources, validate, write_merged_csv, AbortingPrompt, CandidatePrompt, CombineEngine,
    DecisionLog, RunOutcome, SourceCatalog, StdinPrompt,
};

/// Combine scraped green-electricity provider datasets into one
/// deduplicated table.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Directory with the per-source scrape files (<source>.json)
    #[arg(long, default_value = "scraped_data")]
    data_dir: PathBuf,

    /// Decision log, appended after every manual resolution
    #[arg(long, default_value = "scraped_data/combine_selections.csv")]
    decisions: PathBuf,

    /// Merged output table
    #[arg(long, default_value = "scraped_data/combined.csv")]
    output: PathBuf,

    /// Run unattended: apply everything the decision log and the
    /// auto-accept policy can resolve, stop at the first ambiguity
    #[arg(long)]
    batch: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let catalog = SourceCatalog::standard();
    let mut decisions = DecisionLog::open(&cli.decisions)?;
    tracing::info!(decisions = decisions.len(), "replaying decision log");

    let loaded = load_sources(&cli.data_dir, &catalog)?;
    let baseline = loaded
        .iter()
        .find(|s| s.id == catalog.baseline_id())
        .with_context(|| format!("baseline source '{}' not found", catalog.baseline_id()))?
        .clone();
    let others: Vec<_> = loaded
        .into_iter()
        .filter(|s| s.id != catalog.baseline_id())
        .collect();

    let mut stdin_prompt = StdinPrompt::new();
    let mut batch_prompt = AbortingPrompt;
    let prompt: &mut dyn CandidatePrompt = if cli.batch {
        &mut batch_prompt
    } else {
        &mut stdin_prompt
    };

    let engine = CombineEngine::new();
    match engine.run(&baseline, &others, &mut decisions, prompt)? {
        RunOutcome::Completed(result) => {
            validate(&result, &catalog)?;
            write_merged_csv(&cli.output, &result, &catalog)?;
            println!("{}", result.summary.render());
            println!(
                "Wrote {} canonical entries to {}",
                result.canonical.len(),
                cli.output.display()
            );
        }
        RunOutcome::Aborted(summary) => {
            // Partial progress is already persisted in the decision log;
            // completeness cannot be guaranteed, so nothing is written.
            println!("{}", summary.render());
            println!("Aborted - no output written. Re-run to continue.");
        }
    }

    Ok(())
}
