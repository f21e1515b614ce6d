use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use nestegg::core::{
    EnsembleParams, HouseholdConfig, RunMode, ShockMethod, SimulationContext, run_ensemble,
    run_projection,
};

#[derive(Parser)]
#[command(name = "nestegg", about = "Household retirement cash-flow projections")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run one deterministic projection and print the per-year rows.
    Project {
        /// Path to a household configuration JSON file.
        config: PathBuf,
        /// Write the JSON output here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run a Monte Carlo ensemble and print the summary.
    Ensemble {
        config: PathBuf,
        #[arg(long, default_value_t = 1_000)]
        runs: u32,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Annual return volatility for the parametric shock model.
        #[arg(long, default_value_t = 0.12)]
        volatility: f64,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve { port } => nestegg::api::run_http_server(port)
            .await
            .map_err(|e| e.to_string()),
        Command::Project { config, output } => project(&config, output.as_deref()),
        Command::Ensemble { config, runs, seed, volatility, output } => {
            ensemble(&config, runs, seed, volatility, output.as_deref())
        }
    };

    if let Err(msg) = result {
        eprintln!("error: {msg}");
        process::exit(1);
    }
}

fn load_config(path: &std::path::Path) -> Result<HouseholdConfig, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let config: HouseholdConfig =
        serde_json::from_str(&raw).map_err(|e| format!("bad configuration: {e}"))?;
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn emit<T: serde::Serialize>(value: &T, output: Option<&std::path::Path>) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    match output {
        Some(path) => fs::write(path, json)
            .map_err(|e| format!("cannot write {}: {e}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

fn project(path: &std::path::Path, output: Option<&std::path::Path>) -> Result<(), String> {
    let config = load_config(path)?;
    let mut ctx = SimulationContext::deterministic();
    let run = run_projection(&config, &mut ctx, RunMode::Detailed);
    log::info!(
        "projected {} years, terminal net worth {:.0}",
        run.rows.len(),
        run.terminal_net_worth
    );
    emit(&run.rows, output)
}

fn ensemble(
    path: &std::path::Path,
    runs: u32,
    seed: u64,
    volatility: f64,
    output: Option<&std::path::Path>,
) -> Result<(), String> {
    let config = load_config(path)?;
    let params = EnsembleParams {
        runs,
        base_seed: seed,
        method: ShockMethod::Parametric { volatility },
    };
    let summary = run_ensemble(&config, &params);
    log::info!(
        "{} runs, success rate {:.1}%",
        summary.runs,
        summary.success_rate * 100.0
    );
    emit(&summary, output)
}
