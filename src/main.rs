use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use gpu_listing_pipeline::input::read_rows;
use gpu_listing_pipeline::logging;
use gpu_listing_pipeline::pipeline::{to_output_rows, write_output, Pipeline, PipelineReport};
use gpu_listing_pipeline::registry::load_registry;
use gpu_listing_pipeline::{CanonicalRegistry, PipelineConfig};

#[derive(Parser)]
#[command(name = "gpu-listings")]
#[command(about = "Clean, match, deduplicate, enrich and score GPU marketplace listings")]
#[command(version)]
struct Cli {
    /// Pipeline configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Canonical model registry (TOML or JSON). Overrides `registry_path` in the config.
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Also write JSON logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over a batch of listings
    Run {
        /// Listings file (.csv or .json)
        #[arg(long)]
        input: PathBuf,
        /// Scored listings (.csv or .json)
        #[arg(long)]
        output: PathBuf,
        /// Where to write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Load the configuration and registry and report any problem
    Validate,
    /// Show how titles resolve against the registry
    Match {
        /// Titles to resolve
        #[arg(required = true)]
        titles: Vec<String>,
    },
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display())),
        None => {
            let config = PipelineConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn resolve_registry(cli_path: Option<PathBuf>, config: &PipelineConfig) -> Result<CanonicalRegistry> {
    let path = cli_path
        .or_else(|| config.registry_path.clone())
        .ok_or_else(|| anyhow!("no registry given; pass --registry or set registry_path in the config"))?;
    load_registry(&path).with_context(|| format!("failed to load registry {}", path.display()))
}

fn print_report(report: &PipelineReport) {
    println!("\n📊 Run {}", report.run_id);
    println!(
        "   Rows: {} read, {} accepted, {} rejected",
        report.clean.input_rows,
        report.clean.accepted,
        report.clean.rejected()
    );
    println!(
        "   Matches: {} exact, {} regex, {} fuzzy, {} unmatched",
        report.matching.exact, report.matching.regex, report.matching.fuzzy, report.matching.none
    );
    if let Some(dedup) = &report.dedup {
        println!("   Dedup: {} groups, {} secondaries", dedup.groups, dedup.secondaries);
    }
    println!("   Missing metadata: {}", report.enrich.missing_metadata);
    println!(
        "   Scores: min {:.1}, max {:.1}, mean {:.1}",
        report.score.min_final, report.score.max_final, report.score.mean_final
    );
    if !report.clean.rejections.is_empty() {
        println!("\n⚠️  Rejected rows:");
        for rejection in &report.clean.rejections {
            println!("   - {}", rejection.error);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let registry = resolve_registry(cli.registry, &config)?;
    let pipeline = Pipeline::new(&config).context("invalid pipeline configuration")?;

    match cli.command {
        Commands::Run { input, output, report } => {
            let rows = read_rows(&input).with_context(|| format!("failed to read {}", input.display()))?;
            let result = pipeline.run(&rows, &registry);

            write_output(&output, &to_output_rows(&result.listings))
                .with_context(|| format!("failed to write {}", output.display()))?;
            if let Some(report_path) = report {
                let json = serde_json::to_string_pretty(&result.report)?;
                fs::write(&report_path, json)
                    .with_context(|| format!("failed to write report {}", report_path.display()))?;
            }
            print_report(&result.report);
        }
        Commands::Validate => {
            info!("Configuration and registry are valid");
            println!("✅ Configuration valid, {} canonical models loaded", registry.len());
        }
        Commands::Match { titles } => {
            for title in &titles {
                let result = pipeline.matcher().match_title(title, &registry);
                println!(
                    "{:<48} {:<7} {:<24} {:.3}",
                    title,
                    result.match_type.to_string(),
                    result.canonical_model.as_deref().unwrap_or("-"),
                    result.confidence
                );
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let _guard = match cli.log_dir.as_deref() {
        Some(dir) => Some(logging::init_logging(dir)),
        None => {
            logging::init_console_logging();
            None
        }
    };

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}
