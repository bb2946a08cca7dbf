//! tlcfuzz command-line front-end.
//!
//! Two subcommands: `fuzz` runs one campaign with the configured guider
//! and mutator; `compare` runs the {tlcstate, random} × {combined, empty}
//! matrix with a shared seed and writes per-cell coverage series.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tlcfuzz::{
    run_compare_cell, ClusterConfig, CombinedMutator, EmptyMutator, Fuzzer, FuzzerConfig, Guider,
    Mutator, TlcClient, TlcStateGuider, TraceCoverageGuider, COMPARE_MATRIX,
};

/// Coverage-guided fuzzing of a raft cluster against a TLA+ model server.
#[derive(Parser)]
#[command(name = "tlcfuzz")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum GuiderArg {
    /// Abstract-state coverage from the model server.
    Tlcstate,
    /// Local event-trace novelty; needs no server.
    Random,
}

#[derive(Clone, Copy, ValueEnum)]
enum MutatorArg {
    /// Weighted mix of swap/flip/bump/truncate/identity.
    Combined,
    /// Identity-only baseline.
    Empty,
}

#[derive(Args)]
struct CampaignArgs {
    /// Number of fuzzing iterations.
    #[arg(long, default_value_t = 1000)]
    iterations: u64,

    /// Scheduling choices per iteration.
    #[arg(long, default_value_t = 100)]
    horizon: usize,

    /// Mutants spawned per newly discovered state.
    #[arg(long, default_value_t = 5)]
    mutations_per_trace: usize,

    /// Campaign seed.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Cluster size.
    #[arg(long, default_value_t = 3)]
    nodes: u64,

    /// Model server base URL (e.g. http://127.0.0.1:2023).
    #[arg(long)]
    server: Option<String>,

    /// Model server request deadline, in seconds.
    #[arg(long, default_value_t = 5)]
    server_timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one fuzzing campaign.
    Fuzz {
        #[command(flatten)]
        campaign: CampaignArgs,

        /// Guider to score iterations with.
        #[arg(long, value_enum, default_value = "tlcstate")]
        guider: GuiderArg,

        /// Mutator to spawn children with.
        #[arg(long, value_enum, default_value = "combined")]
        mutator: MutatorArg,

        /// Persist retained traces under this directory.
        #[arg(long)]
        record: Option<PathBuf>,

        /// Execute every trace twice and fail on divergence.
        #[arg(long)]
        check_determinism: bool,

        /// Directory for the coverage series CSV.
        #[arg(long, default_value = "results")]
        out: PathBuf,
    },

    /// Run the guider × mutator comparison matrix with a shared seed.
    Compare {
        #[command(flatten)]
        campaign: CampaignArgs,

        /// Directory for the per-cell coverage series.
        #[arg(long, default_value = "results")]
        out: PathBuf,
    },
}

fn fuzzer_config(args: &CampaignArgs, record: Option<&PathBuf>) -> FuzzerConfig {
    FuzzerConfig::default()
        .with_seed(args.seed)
        .with_iterations(args.iterations)
        .with_horizon(args.horizon)
        .with_mutations_per_trace(args.mutations_per_trace)
        .with_cluster(ClusterConfig::default().with_num_nodes(args.nodes))
        .with_violation_dir(record.cloned())
}

fn make_guider(
    kind: GuiderArg,
    args: &CampaignArgs,
    record: Option<&PathBuf>,
) -> Result<Box<dyn Guider>> {
    match kind {
        GuiderArg::Tlcstate => {
            let Some(server) = &args.server else {
                bail!("--guider tlcstate requires --server");
            };
            let client = TlcClient::new(server, Duration::from_secs(args.server_timeout));
            let mut guider = TlcStateGuider::new(client);
            if let Some(dir) = record {
                guider = guider.with_record_dir(dir);
            }
            Ok(Box::new(guider))
        }
        GuiderArg::Random => {
            let mut guider = TraceCoverageGuider::new();
            if let Some(dir) = record {
                guider = guider.with_record_dir(dir);
            }
            Ok(Box::new(guider))
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Fuzz {
            campaign,
            guider,
            mutator,
            record,
            check_determinism,
            out,
        } => {
            let mut config = fuzzer_config(&campaign, record.as_ref());
            if check_determinism {
                config = config.with_determinism_check();
            }
            let guider_box = make_guider(guider, &campaign, record.as_ref())?;
            let mutator_box: Box<dyn Mutator> = match mutator {
                MutatorArg::Combined => Box::new(CombinedMutator::new()),
                MutatorArg::Empty => Box::new(EmptyMutator),
            };

            let mut fuzzer = Fuzzer::new(config, guider_box, mutator_box);
            let report = fuzzer.run().context("campaign failed")?;

            let label = format!(
                "fuzz-{}-{}",
                match guider {
                    GuiderArg::Tlcstate => "tlcstate",
                    GuiderArg::Random => "random",
                },
                match mutator {
                    MutatorArg::Combined => "combined",
                    MutatorArg::Empty => "empty",
                }
            );
            let csv = out.join(format!("{label}.csv"));
            report.write_csv(&csv)?;
            println!(
                "campaign complete: {} iterations, {} states, series at {}",
                report.outcomes.len(),
                report.final_coverage,
                csv.display()
            );
        }
        Commands::Compare { campaign, out } => {
            if campaign.server.is_none() {
                tracing::warn!("no --server configured; running only the random-guider cells");
            }
            let config = fuzzer_config(&campaign, None);
            for (guider_kind, mutator_kind) in COMPARE_MATRIX {
                let guider = match guider_kind {
                    tlcfuzz::GuiderKind::TlcState => {
                        if campaign.server.is_none() {
                            continue;
                        }
                        make_guider(GuiderArg::Tlcstate, &campaign, None)?
                    }
                    tlcfuzz::GuiderKind::Random => make_guider(GuiderArg::Random, &campaign, None)?,
                };
                let label = format!("{}-{}", guider_kind.label(), mutator_kind.label());
                let report = run_compare_cell(&config, guider, mutator_kind, &label, &out)
                    .with_context(|| format!("comparison cell {label} failed"))?;
                println!(
                    "{label}: {} states after {} iterations",
                    report.final_coverage,
                    report.outcomes.len()
                );
            }
        }
    }
    Ok(())
}
