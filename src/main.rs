// src/main.rs
// Entry point for mpnav: generates two-tier tasks, estimates per-class trajectory lengths,
// scores agent trajectories, converts and mixes datasets, and prints dataset statistics.

use log::{error, info};
use mpnav::{
    budget, dataset,
    dataset::transform::{combine_datasets, renumber, transform_source, TrajectoryStats},
    Evaluation, MpnavConfig, ScanStore, TaskGenerator,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;

const USAGE: &str = "usage:
  mpnav generate <config.yaml> <source.json> <out.json>
  mpnav estimate <config.yaml> <out.json> <split>...
  mpnav score    <config.yaml> <results.json> <split>...
  mpnav mix      <config.yaml> <primary.json> <secondary.json> <proportion> <total> <out.json>
  mpnav stats    <tasks.json>
  mpnav transform <source.json> <out.json>";

fn arg<'a>(args: &'a [String], i: usize) -> Result<&'a str, Box<dyn Error>> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| format!("missing argument {}\n{}", i, USAGE).into())
}

fn splits(args: &[String], from: usize) -> Result<Vec<String>, Box<dyn Error>> {
    let splits = args.get(from..).unwrap_or_default().to_vec();
    if splits.is_empty() {
        return Err(format!("at least one split is required\n{}", USAGE).into());
    }
    Ok(splits)
}

/// Synthesizes two-tier tasks from single-goal source records
fn generate(config: &MpnavConfig, source: &Path, out: &Path) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(ScanStore::new(config.data.connectivity_dir.clone()));
    let sources = dataset::load_source_tasks(source)?;
    let generator = TaskGenerator::new(
        store,
        &config.simulator,
        &config.episode,
        &config.generation,
    );
    let (tasks, stats) = generator.generate(&sources)?;
    dataset::save_tasks(out, &tasks)?;
    info!(
        "Wrote {} tasks to {} ({} candidates over {} houses, {} rejected)",
        tasks.len(),
        out.display(),
        stats.candidates,
        stats.houses,
        stats.rejected_total()
    );
    for (kind, n) in &stats.rejected {
        info!("  rejected {}: {}", kind, n);
    }
    Ok(())
}

/// Reduces per-class trajectory lengths of the given splits and saves them
fn estimate(config: &MpnavConfig, out: &Path, splits: &[String]) -> Result<(), Box<dyn Error>> {
    let tasks = dataset::load_splits(&config.data.data_dir, &config.data.split_prefix, splits)?;
    let accumulator = budget::accumulate(&tasks, config.budget.key_basis)?;
    info!("Collected {} task classes from {} tasks", accumulator.class_count(), tasks.len());
    let estimates = accumulator.finalize(
        config.budget.max_episode_length,
        config.budget.confidence_z,
        config.budget.fallback_to_max_length,
    )?;
    estimates.save(out)?;
    info!("Saved {} class estimates to {}", estimates.len(), out.display());
    Ok(())
}

/// Scores a results file against the given splits and prints the summary
fn score(config: &MpnavConfig, results: &Path, splits: Vec<String>) -> Result<(), Box<dyn Error>> {
    let tasks = dataset::load_splits(&config.data.data_dir, &config.data.split_prefix, &splits)?;
    let store = Arc::new(ScanStore::new(config.data.connectivity_dir.clone()));
    let mut evaluation = Evaluation::new(store, &config.eval, tasks, splits)?;
    if let Some(dir) = &config.data.region_dir {
        evaluation.load_regions(dir)?;
    }
    let report = evaluation.score_file(results)?;
    println!("{}", serde_json::to_string_pretty(&report.summary)?);
    Ok(())
}

/// Mixes two datasets and renumbers the result
fn mix(config: &MpnavConfig, args: &[String]) -> Result<(), Box<dyn Error>> {
    let primary = dataset::load_tasks(arg(args, 3)?)?;
    let secondary = dataset::load_tasks(arg(args, 4)?)?;
    let proportion: f64 = arg(args, 5)?.parse()?;
    let total: usize = arg(args, 6)?.parse()?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.generation.seed);
    let mut mixed = combine_datasets(&primary, &secondary, proportion, total, &mut rng)?;
    renumber(&mut mixed, 0);
    let out = Path::new(arg(args, 7)?);
    dataset::save_tasks(out, &mixed)?;
    info!("Wrote {} mixed tasks to {}", mixed.len(), out.display());
    Ok(())
}

fn run(args: &[String]) -> Result<(), Box<dyn Error>> {
    let command = arg(args, 1)?;
    if command == "stats" {
        let tasks = dataset::load_tasks(arg(args, 2)?)?;
        println!("{}", serde_json::to_string_pretty(&TrajectoryStats::from_tasks(&tasks))?);
        return Ok(());
    }

    if command == "transform" {
        let tasks = dataset::load_source_tasks(arg(args, 2)?)?
            .iter()
            .map(transform_source)
            .collect::<Result<Vec<_>, _>>()?;
        let out = Path::new(arg(args, 3)?);
        dataset::save_tasks(out, &tasks)?;
        info!("Wrote {} single-tier tasks to {}", tasks.len(), out.display());
        return Ok(());
    }

    let config = MpnavConfig::load(arg(args, 2)?)?;
    match command {
        "generate" => generate(&config, Path::new(arg(args, 3)?), Path::new(arg(args, 4)?)),
        "estimate" => estimate(&config, Path::new(arg(args, 3)?), &splits(args, 4)?),
        "score" => score(&config, Path::new(arg(args, 3)?), splits(args, 4)?),
        "mix" => mix(&config, args),
        other => Err(format!("unknown command {}\n{}", other, USAGE).into()),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging; RUST_LOG controls verbosity
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    info!("Starting mpnav {}", args.get(1).map(String::as_str).unwrap_or(""));

    if let Err(e) = run(&args) {
        error!("mpnav failed: {}", e);
        return Err(e);
    }
    Ok(())
}
