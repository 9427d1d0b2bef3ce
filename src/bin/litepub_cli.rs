//! LitePub CLI - normalize, resolve, build, check
//!
//! Trees and reports are written to files; a JSON summary goes to
//! stdout and logs go to stderr.
//!
//! Exit codes: 0 success, 1 structural/config/IO error (nothing
//! written), 2 resolution failure (report written).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use litepub_core::pipeline::{read_document, to_output_json};
use litepub_core::{
    ArtifactRegistry, BuildConfig, BuildPipeline, NormalizationRegistry, Overrides, PipelineError,
    ResolutionReport,
};

const EXIT_STRUCTURAL: u8 = 1;
const EXIT_UNRESOLVED: u8 = 2;

#[derive(Parser)]
#[command(name = "litepub-cli")]
#[command(about = "LitePub CLI - evidence-backed document builder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    build: BuildFlags,
}

#[derive(Args)]
struct BuildFlags {
    /// Build configuration (TOML)
    #[arg(long, global = true, env = "LITEPUB_CONFIG")]
    config: Option<PathBuf>,

    /// Stub unresolved placeholders instead of failing
    #[arg(long, global = true)]
    lenient: bool,

    /// Do not verify artifact digests
    #[arg(long, global = true)]
    skip_hash_verify: bool,

    /// Resolver worker threads (0 = one per core)
    #[arg(long, global = true)]
    jobs: Option<usize>,

    /// Inline figures as data URIs
    #[arg(long, global = true)]
    embed_figures: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan markers and attach registry metadata
    Normalize {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        registry: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Replace placeholders with artifact fragments
    Resolve {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        aarc: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        report: PathBuf,
    },

    /// Normalize and resolve in one pass
    Build {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        registry: PathBuf,
        #[arg(short, long)]
        aarc: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
    },

    /// Verify every artifact registry entry against its file
    Check {
        #[arg(short, long)]
        aarc: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "litepub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            let output = json!({"success": false, "error": format!("{e:#}")});
            println!("{output}");
            ExitCode::from(EXIT_STRUCTURAL)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let flags = cli.build;
    let config = BuildConfig::load_or_default(flags.config.as_deref())?.apply(Overrides {
        lenient: flags.lenient,
        skip_hash_verify: flags.skip_hash_verify,
        jobs: flags.jobs,
        embed_figures: flags.embed_figures,
    });
    let pipeline = BuildPipeline::new(config);

    match cli.command {
        Commands::Normalize {
            input,
            registry,
            output,
        } => {
            let raw = read_document(&input)?;
            let registry = NormalizationRegistry::load(&registry)?;
            let normalized = pipeline.normalize(raw, &registry)?;
            write_json(&output, &normalized.document.to_pandoc())?;
            print_json(&json!({
                "success": true,
                "placeholders": normalized.document.placeholders().len(),
                "warnings": normalized.warnings,
            }))?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Resolve {
            input,
            aarc,
            output,
            report,
        } => {
            let normalized = read_document(&input)?;
            let aarc = ArtifactRegistry::load(&aarc)?;
            match pipeline.resolve(normalized, &aarc) {
                Ok(resolution) => {
                    write_json(&output, &resolution.document.to_pandoc())?;
                    write_json(&report, &resolution.report)?;
                    print_json(&json!({"success": true, "counts": resolution.report.counts()}))?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => resolution_failure(e, &report),
            }
        }

        Commands::Build {
            input,
            registry,
            aarc,
            out_dir,
        } => {
            let raw = read_document(&input)?;
            let registry = NormalizationRegistry::load(&registry)?;
            let aarc = ArtifactRegistry::load(&aarc)?;
            let report_path = out_dir.join("report.json");
            match pipeline.build(raw, &registry, &aarc) {
                Ok(out) => {
                    fs::create_dir_all(&out_dir)
                        .with_context(|| format!("creating {}", out_dir.display()))?;
                    write_json(&out_dir.join("normalized.json"), &out.normalized.to_pandoc())?;
                    write_json(&out_dir.join("resolved.json"), &out.resolved.to_pandoc())?;
                    write_json(&report_path, &out.report)?;
                    info!(out_dir = %out_dir.display(), "outputs written");
                    print_json(&json!({"success": true, "summary": out.summary}))?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    if e.is_resolution_failure() {
                        fs::create_dir_all(&out_dir)
                            .with_context(|| format!("creating {}", out_dir.display()))?;
                    }
                    resolution_failure(e, &report_path)
                }
            }
        }

        Commands::Check { aarc } => {
            let aarc = ArtifactRegistry::load(&aarc)?;
            let report = pipeline.check(&aarc)?;
            print_json(&report)?;
            if report.is_clean() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_UNRESOLVED))
            }
        }
    }
}

/// Write the report of a failed pass and exit 2; other errors propagate
fn resolution_failure(e: PipelineError, report_path: &Path) -> Result<ExitCode> {
    let report = match e.report() {
        Some(report) if e.is_resolution_failure() => report.clone(),
        _ => return Err(e.into()),
    };
    write_json(report_path, &report)?;
    error!("{e}");
    print_json(&json!({
        "success": false,
        "error": e.to_string(),
        "report": report_path.display().to_string(),
        "counts": counts(&report),
    }))?;
    Ok(ExitCode::from(EXIT_UNRESOLVED))
}

fn counts(report: &ResolutionReport) -> serde_json::Value {
    json!(report.counts())
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = to_output_json(value)?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
