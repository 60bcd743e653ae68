// SPDX-License-Identifier: Apache-2.0

//! Feedback-driven differential fuzzing driver for RISC-V cores.
//!
//! Seeds come from a directory of `.hex` programs; the golden model and
//! each candidate implementation are external commands that take a hex
//! program path and print a JSON trace on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use rvfuzz::campaign::Campaign;
use rvfuzz::config::FuzzConfig;
use rvfuzz::exec::CommandExecutor;
use rvfuzz::testcase;
use rvfuzz::wcache::ConstantNovelty;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct CliArgs {
    /// Directory of `.hex` seed programs.
    seeds: PathBuf,

    /// Golden reference command, e.g. "spike-trace --isa=rv32i".
    #[clap(long)]
    golden: String,

    /// Candidate implementation as "name=command"; repeatable.
    #[clap(long = "candidate", required = true)]
    candidates: Vec<String>,

    /// JSON config file; defaults are used when omitted.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Directory for the persistent stores (weight cache, coverage, corpus).
    #[clap(long, default_value = "fuzz-state")]
    state_dir: PathBuf,

    /// Number of generations to run.
    #[clap(short = 'n', long, default_value_t = 10)]
    generations: u64,

    /// Random seed.
    #[clap(short = 'S', long, default_value_t = 1)]
    seed: u64,
}

fn parse_candidate(spec: &str) -> Result<(String, Vec<String>)> {
    let Some((name, command)) = spec.split_once('=') else {
        bail!("candidate '{spec}' is not of the form name=command");
    };
    let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    if name.is_empty() || argv.is_empty() {
        bail!("candidate '{spec}' has an empty name or command");
    }
    Ok((name.to_string(), argv))
}

fn main() -> Result<()> {
    let _ = env_logger::try_init();
    let cli = CliArgs::parse();

    let config = match &cli.config {
        Some(path) => FuzzConfig::from_json_file(path)
            .with_context(|| format!("loading config '{}'", path.display()))?,
        None => FuzzConfig::default(),
    };

    let golden: Vec<String> = cli.golden.split_whitespace().map(str::to_string).collect();
    if golden.is_empty() {
        bail!("--golden command is empty");
    }
    let candidates = cli
        .candidates
        .iter()
        .map(|s| parse_candidate(s))
        .collect::<Result<Vec<_>>>()?;
    let executor = Arc::new(CommandExecutor::new(golden, candidates));

    let mut campaign = Campaign::new(
        config,
        executor,
        &cli.state_dir,
        Box::new(ConstantNovelty(1.0)),
    )
    .context("opening campaign state")?;

    let seeds = testcase::load_seed_dir(&cli.seeds)
        .with_context(|| format!("loading seeds from '{}'", cli.seeds.display()))?;
    if seeds.is_empty() {
        bail!("no .hex seed programs found in '{}'", cli.seeds.display());
    }
    let admitted = campaign.add_seeds(seeds);
    println!("admitted {admitted} seed programs");

    let mut rng = Pcg64Mcg::seed_from_u64(cli.seed);
    for generation in 0..cli.generations {
        let report = campaign
            .run_generation(&mut rng)
            .with_context(|| format!("generation {generation}"))?;
        println!(
            "gen {generation}: {} offspring from {} seeds | {} divergent ({} mismatches) | {} promoted | {} coverage points",
            report.offspring,
            report.seeds,
            report.divergent,
            report.mismatches,
            report.promoted.len(),
            report.coverage_points
        );
    }

    println!(
        "done: corpus holds {} testcases, {} coverage points observed",
        campaign.corpus().len(),
        campaign.coverage().len()
    );
    Ok(())
}
