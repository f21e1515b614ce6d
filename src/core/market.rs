use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::config::ReturnRates;
use super::types::AccountSet;

/// How stochastic return shocks are generated for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum ShockMethod {
    #[default]
    None,
    Parametric {
        volatility: f64,
    },
    /// Bootstrap from a historical return sequence: a random starting offset
    /// is chosen once per run, then the series is read circularly.
    Historical {
        series: Vec<f64>,
    },
}

/// Ephemeral per-run state: the shock source and any ad-hoc override.
/// One context per run; never shared.
#[derive(Debug, Clone)]
pub struct SimulationContext {
    rng: ChaCha20Rng,
    method: ShockMethod,
    historical_offset: usize,
    pub expense_multiplier: Option<f64>,
}

impl SimulationContext {
    pub fn new(method: ShockMethod, seed: u64) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let historical_offset = match &method {
            ShockMethod::Historical { series } if !series.is_empty() => {
                rng.random_range(0..series.len())
            }
            _ => 0,
        };
        SimulationContext {
            rng,
            method,
            historical_offset,
            expense_multiplier: None,
        }
    }

    /// Deterministic variant used for plain single-scenario projections.
    pub fn deterministic() -> Self {
        SimulationContext::new(ShockMethod::None, 0)
    }

    /// One scalar market shock per simulated year. The same value is applied
    /// to every growth-sensitive account of both people, preserving
    /// cross-account correlation.
    pub fn shock(&mut self, year_index: u32) -> f64 {
        match &self.method {
            ShockMethod::None => 0.0,
            ShockMethod::Parametric { volatility } => {
                let z: f64 = self.rng.sample(StandardNormal);
                (volatility.max(0.0) * z).clamp(-0.95, 2.5)
            }
            ShockMethod::Historical { series } => {
                if series.is_empty() {
                    return 0.0;
                }
                series[(self.historical_offset + year_index as usize) % series.len()]
            }
        }
    }
}

/// Apply one year of growth to every account. `stress_rate` replaces the
/// configured nominal rates for growth-sensitive accounts (first stress-test
/// year); the shock is added on top of whichever base rate applies.
pub fn apply_growth(
    accounts: &mut AccountSet,
    rates: &ReturnRates,
    shock: f64,
    stress_rate: Option<f64>,
) {
    let base = |configured: f64| stress_rate.unwrap_or(configured) + shock;

    accounts.tfsa *= 1.0 + base(rates.tfsa);
    accounts.rrsp *= 1.0 + base(rates.rrsp);
    accounts.lira *= 1.0 + base(rates.lira);
    accounts.lif *= 1.0 + base(rates.lif);
    accounts.rrif *= 1.0 + base(rates.rrif);
    // The cash-yield component is paid out and taxed annually, so it does
    // not compound inside the account.
    accounts.non_registered *=
        1.0 + base(rates.non_registered) - rates.non_registered_yield.max(0.0);
    accounts.crypto *= 1.0 + base(rates.crypto);
    // Cash is not market-sensitive: no shock, no stress override.
    accounts.cash *= 1.0 + rates.cash;

    accounts.normalize();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded_accounts() -> AccountSet {
        AccountSet {
            tfsa: 10_000.0,
            rrsp: 20_000.0,
            non_registered: 10_000.0,
            non_registered_acb: 8_000.0,
            cash: 5_000.0,
            crypto: 2_000.0,
            ..AccountSet::default()
        }
    }

    #[test]
    fn deterministic_context_produces_zero_shock() {
        let mut ctx = SimulationContext::deterministic();
        for year in 0..10 {
            assert_eq!(ctx.shock(year), 0.0);
        }
    }

    #[test]
    fn historical_shock_wraps_circularly_from_offset() {
        let series = vec![0.01, -0.20, 0.07];
        let mut ctx = SimulationContext::new(
            ShockMethod::Historical {
                series: series.clone(),
            },
            42,
        );
        let first = ctx.shock(0);
        let wrapped = ctx.shock(series.len() as u32);
        assert_eq!(first, wrapped);
    }

    #[test]
    fn same_seed_same_parametric_draws() {
        let method = ShockMethod::Parametric { volatility: 0.15 };
        let mut a = SimulationContext::new(method.clone(), 7);
        let mut b = SimulationContext::new(method, 7);
        for year in 0..20 {
            assert_eq!(a.shock(year), b.shock(year));
        }
    }

    #[test]
    fn stress_rate_replaces_configured_rates_but_not_cash() {
        let mut accounts = funded_accounts();
        let rates = ReturnRates {
            non_registered_yield: 0.0,
            ..ReturnRates::default()
        };
        apply_growth(&mut accounts, &rates, 0.0, Some(-0.30));
        assert!((accounts.tfsa - 7_000.0).abs() <= 1e-6);
        assert!((accounts.cash - 5_000.0 * 1.015).abs() <= 1e-6);
    }

    #[test]
    fn yield_component_reduces_non_registered_growth() {
        let mut accounts = funded_accounts();
        let rates = ReturnRates::default();
        apply_growth(&mut accounts, &rates, 0.0, None);
        let expected = 10_000.0 * (1.0 + rates.non_registered - rates.non_registered_yield);
        assert!((accounts.non_registered - expected).abs() <= 1e-6);
    }

    #[test]
    fn severe_crash_never_leaves_negative_balances() {
        let mut accounts = funded_accounts();
        apply_growth(&mut accounts, &ReturnRates::default(), -1.5, None);
        assert!(accounts.tfsa >= 0.0);
        assert!(accounts.crypto >= 0.0);
        assert!(accounts.non_registered_acb <= accounts.non_registered);
    }
}
