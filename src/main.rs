//! CLI entry point for the combat simulator

use clap::{Parser, ValueEnum};
use spellsim::{
    attack_table::AttackKind,
    config::{Scenario, SimConfig},
    orchestrator::{run_and_aggregate, BatchReport},
};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::filter::EnvFilter;

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "spellsim")]
#[command(version)]
#[command(about = "Deterministic discrete-event combat simulator", long_about = None)]
struct Args {
    /// Path to the scenario file (YAML or JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Number of trials to run (overrides the scenario file)
    #[arg(short, long)]
    num_trials: Option<usize>,

    /// Base seed; trial i uses a seed derived from it
    #[arg(short, long)]
    seed: Option<u64>,

    /// Trial duration ceiling in seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Run trials in parallel
    #[arg(short, long)]
    parallel: Option<bool>,

    /// Worker threads for parallel runs
    #[arg(short, long)]
    workers: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Show timing information
    #[arg(short, long, default_value = "false")]
    timing: bool,

    /// Debug: print every actor pair's opening attack tables and exit
    #[arg(long, default_value = "false")]
    debug_tables: bool,

    /// Debug: log cast, aura and periodic lifecycle to stderr
    #[arg(long, default_value = "false")]
    debug_trace: bool,
}

fn init_logging(debug_trace: bool) {
    let default = if debug_trace { "spellsim=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_overrides(config: &mut SimConfig, args: &Args) {
    let trials = &mut config.trials;
    if let Some(n) = args.num_trials {
        trials.num_trials = n;
    }
    if let Some(seed) = args.seed {
        trials.seed = Some(seed);
    }
    if let Some(d) = args.duration {
        trials.duration = d;
    }
    if let Some(p) = args.parallel {
        trials.parallel = p;
    }
    if let Some(w) = args.workers {
        trials.workers = Some(w);
    }
}

fn print_tables(scenario: &Scenario) {
    println!("============================================================");
    println!("OPENING ATTACK TABLES");
    println!("============================================================");
    for attacker in &scenario.actors {
        for defender in &scenario.actors {
            if attacker.id == defender.id {
                continue;
            }
            for kind in [AttackKind::Melee, AttackKind::Spell] {
                let Some(table) = scenario.opening_table(attacker.id, defender.id, kind) else {
                    continue;
                };
                println!(
                    "{:>12} -> {:<12} {:<6} miss {:>6.2}%  partial {:>6.2}%  hit {:>6.2}%  crit {:>6.2}%",
                    attacker.name,
                    defender.name,
                    format!("{kind:?}"),
                    table.miss_chance() * 100.0,
                    table.partial_resist_chance() * 100.0,
                    table.hit_chance() * 100.0,
                    table.crit_chance() * 100.0,
                );
            }
        }
    }
}

fn print_text(report: &BatchReport, scenario: &Scenario) {
    let stats = &report.stats;
    println!("=== Simulation Results ===");
    println!(
        "Trials: {} requested, {} completed, {} aborted, {} failed, {} skipped",
        report.requested, report.completed, report.aborted, report.failed, report.skipped
    );
    println!("Base seed: {}", report.base_seed);
    println!("Duration: {:.1}s", scenario.duration.as_secs_f64());
    println!();
    println!("Average DPS: {:.1} ± {:.1}", stats.avg_dps, stats.std_dps);
    println!("DPS Range: {:.1} - {:.1}", stats.min_dps, stats.max_dps);
    println!("Avg Damage: {:.0}", stats.avg_damage);
    println!("Avg Casts: {:.1}", stats.avg_casts);
    println!("Crit Rate: {:.2}%", stats.crit_rate * 100.0);
    println!("Miss Rate: {:.2}%", stats.miss_rate * 100.0);
    println!();
    println!("--- Per Ability (all trials) ---");
    for row in &report.metrics.rows {
        let m = &row.metrics;
        println!(
            "{:<20} -> {:<10} casts {:>8}  hits {:>8}  crits {:>8}  misses {:>6}  ticks {:>8}  damage {:>14.0}",
            row.name.clone().unwrap_or_else(|| row.ability.to_string()),
            row.target.to_string(),
            m.casts,
            m.hits,
            m.crits,
            m.misses,
            m.ticks,
            m.damage,
        );
    }
    for failure in &report.failures {
        println!("FAILED: {failure}");
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.debug_trace);

    // Load config
    let mut config = match SimConfig::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };
    apply_overrides(&mut config, &args);

    let scenario = match config.build() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid scenario: {}", e);
            std::process::exit(1);
        }
    };

    if args.debug_tables {
        print_tables(&scenario);
        return;
    }

    let start = Instant::now();
    let report = run_and_aggregate(&scenario);
    let elapsed = start.elapsed();
    let trials = report.requested.max(1) as f64;

    match args.output {
        OutputFormat::Text => {
            print_text(&report, &scenario);
            if args.timing {
                println!();
                println!("--- Performance ---");
                println!("Total time: {:.3}s", elapsed.as_secs_f64());
                println!("Per trial: {:.3}ms", elapsed.as_secs_f64() * 1000.0 / trials);
                println!("Trials/sec: {:.0}", trials / elapsed.as_secs_f64());
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "elapsed_seconds": elapsed.as_secs_f64(),
                "report": report,
            });
            match serde_json::to_string_pretty(&output) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Failed to serialize results: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
