use rayon::prelude::*;
use serde::Serialize;

use super::config::HouseholdConfig;
use super::engine::{RunMode, RunOutput, run_projection};
use super::market::{ShockMethod, SimulationContext};

#[derive(Debug, Clone)]
pub struct EnsembleParams {
    pub runs: u32,
    pub base_seed: u64,
    pub method: ShockMethod,
}

/// Per-year spread of household net worth across the ensemble.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearBand {
    pub year: i32,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

/// Whole single-run trajectories picked by terminal-value rank, so each band
/// line is an internally consistent history rather than a percentile of
/// unrelated years.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepresentativeTrajectories {
    pub p10: Vec<f64>,
    pub p50: Vec<f64>,
    pub p90: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleSummary {
    pub runs: u32,
    /// Fraction of runs whose terminal net worth stayed positive.
    pub success_rate: f64,
    pub terminal_p10: f64,
    pub terminal_p50: f64,
    pub terminal_p90: f64,
    pub bands: Vec<YearBand>,
    pub representative: RepresentativeTrajectories,
}

/// Run the configuration many times with independent shock streams and
/// aggregate. Each run deep-copies nothing from its siblings; the config is
/// shared read-only.
pub fn run_ensemble(cfg: &HouseholdConfig, params: &EnsembleParams) -> EnsembleSummary {
    let runs = params.runs.max(1);

    let mut outputs: Vec<RunOutput> = (0..runs)
        .into_par_iter()
        .map(|run_id| {
            let seed = derive_seed(params.base_seed, run_id);
            let mut ctx = SimulationContext::new(params.method.clone(), seed);
            run_projection(cfg, &mut ctx, RunMode::Lean)
        })
        .collect();

    let successes = outputs.iter().filter(|o| o.terminal_net_worth > 0.0).count();
    let success_rate = successes as f64 / runs as f64;

    let horizon = outputs
        .first()
        .map(|o| o.net_worth_by_year.len())
        .unwrap_or(0);
    let mut bands = Vec::with_capacity(horizon);
    for year_index in 0..horizon {
        let mut values: Vec<f64> = outputs
            .iter()
            .map(|o| o.net_worth_by_year[year_index])
            .collect();
        bands.push(YearBand {
            year: cfg.start_year + year_index as i32,
            p10: percentile(&mut values, 10.0),
            p50: percentile(&mut values, 50.0),
            p90: percentile(&mut values, 90.0),
        });
    }

    outputs.sort_by(|a, b| a.terminal_net_worth.total_cmp(&b.terminal_net_worth));
    let representative = RepresentativeTrajectories {
        p10: trajectory_at(&outputs, 10.0),
        p50: trajectory_at(&outputs, 50.0),
        p90: trajectory_at(&outputs, 90.0),
    };

    let mut terminals: Vec<f64> = outputs.iter().map(|o| o.terminal_net_worth).collect();
    EnsembleSummary {
        runs,
        success_rate,
        terminal_p10: percentile(&mut terminals, 10.0),
        terminal_p50: percentile(&mut terminals, 50.0),
        terminal_p90: percentile(&mut terminals, 90.0),
        bands,
        representative,
    }
}

/// Whole net-worth series of the run ranked at percentile `p` by terminal
/// value. Expects `sorted` ascending.
fn trajectory_at(sorted: &[RunOutput], p: f64) -> Vec<f64> {
    if sorted.is_empty() {
        return Vec::new();
    }
    let rank = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)].net_worth_by_year.clone()
}

fn derive_seed(base_seed: u64, run_id: u32) -> u64 {
    splitmix64(base_seed ^ ((run_id as u64) << 32) ^ run_id as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Linear-interpolation percentile over an unsorted slice; sorts in place.
fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
