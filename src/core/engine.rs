use super::allocate::{ContributionRoom, allocate_surplus};
use super::cashflow::person_inflows;
use super::config::{ExpenseModel, HouseholdConfig, Person, Property};
use super::market::{SimulationContext, apply_growth};
use super::resolve::{ResolveParams, ResolveTarget, resolve_deficit};
use super::tax::income_tax;
use super::types::{AccountSet, BucketKind, HouseholdYear, PersonYear, ProjectionRow};

const EPS: f64 = 1e-6;
/// Withdrawals change taxable income which changes the deficit; a handful of
/// rounds is enough for the fixed point because each round shrinks the gap
/// by the marginal rate.
const MAX_DEFICIT_ROUNDS: u32 = 5;

/// Published minimum-withdrawal factors for ages 71 through 94.
const RRIF_FACTORS: [f64; 24] = [
    0.0528, 0.0540, 0.0553, 0.0567, 0.0582, 0.0598, 0.0617, 0.0636, 0.0658,
    0.0682, 0.0708, 0.0738, 0.0771, 0.0808, 0.0851, 0.0899, 0.0955, 0.1021,
    0.1099, 0.1192, 0.1306, 0.1449, 0.1634, 0.1879,
];

/// Years to amortize `loan` at `rate` with a fixed annual `payment`.
/// `None` when the payment can never retire the loan; the closed form
/// `-ln(1 - rB/P) / ln(1 + r)` is guarded against non-positive logs.
pub fn payoff_years(loan: f64, rate: f64, payment: f64) -> Option<f64> {
    if loan <= 0.0 {
        return Some(0.0);
    }
    if payment <= 0.0 || rate <= -1.0 {
        return None;
    }
    if rate.abs() < 1e-12 {
        return Some(loan / payment);
    }
    let x = 1.0 - rate * loan / payment;
    if x <= 0.0 {
        return None;
    }
    Some(-x.ln() / (1.0 + rate).ln())
}

/// Mandatory annual withdrawal fraction for a registered income fund.
pub fn rrif_minimum_factor(age: i32) -> f64 {
    if age >= 95 {
        0.20
    } else if age >= 71 {
        RRIF_FACTORS[(age - 71) as usize]
    } else if age < 90 {
        1.0 / (90 - age) as f64
    } else {
        0.20
    }
}

/// How much per-year detail a run keeps. Lean runs only track the net-worth
/// series, which is what the ensemble aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Detailed,
    Lean,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// Empty in lean mode.
    pub rows: Vec<ProjectionRow>,
    /// End-of-year household net worth, one entry per simulated year.
    pub net_worth_by_year: Vec<f64>,
    pub terminal_net_worth: f64,
    pub terminal_liquid: f64,
    /// First year the household could not meet its spending from any bucket.
    pub first_shortfall_year: Option<i32>,
}

#[derive(Debug, Clone)]
struct PersonState {
    accounts: AccountSet,
    alive: bool,
    retired: bool,
    employment_income: f64,
    lif_cap_remaining: f64,
}

#[derive(Debug, Clone)]
struct PropertyState {
    cfg: Property,
    value: f64,
    loan: f64,
    sold: bool,
}

/// Run one full projection over the configured horizon. The configuration
/// must already have passed `HouseholdConfig::validate`; inside the loop
/// every imbalance degrades to a recorded sentinel rather than an error.
pub fn run_projection(
    cfg: &HouseholdConfig,
    ctx: &mut SimulationContext,
    mode: RunMode,
) -> RunOutput {
    let mut output = RunOutput::default();
    let mut debt = cfg.starting_debt.max(0.0);

    let mut persons: [PersonState; 2] = [
        initial_person_state(&cfg.persons[0]),
        initial_person_state(&cfg.persons[1]),
    ];
    let mut properties: Vec<PropertyState> = cfg
        .properties
        .iter()
        .map(|p| PropertyState {
            cfg: p.clone(),
            value: p.value,
            loan: p.loan,
            sold: false,
        })
        .collect();

    for year_index in 0..cfg.horizon_years {
        let year = cfg.start_year + year_index as i32;
        let price_index = (1.0 + cfg.inflation).powi(year_index as i32);
        let table = cfg.tax_table.inflated(price_index);
        let mut events: Vec<String> = Vec::new();

        // Mortality and the estate rollover to a surviving partner.
        for idx in 0..2 {
            let was_alive = persons[idx].alive;
            let now_alive = is_alive(&cfg.persons[idx], year);
            if was_alive && !now_alive {
                persons[idx].alive = false;
                let other = 1 - idx;
                if persons[other].alive {
                    let estate = std::mem::take(&mut persons[idx].accounts);
                    merge_estate(&mut persons[other].accounts, estate);
                    events.push(format!("person {} died, estate rolled to survivor", idx + 1));
                } else {
                    events.push(format!("person {} died", idx + 1));
                }
            }
        }

        let mut rows_persons: [PersonYear; 2] = [PersonYear::default(), PersonYear::default()];
        let mut pool = 0.0;
        let mut taxable_income = [0.0f64; 2];
        let mut oas_received = [0.0f64; 2];
        let mut eligible_pension = [0.0f64; 2];

        // One scalar shock for the whole household-year; the first-year
        // stress override replaces the configured rates, not the shock.
        let stress = if cfg.stress_test && year_index == 0 {
            events.push("stress-test return applied".to_string());
            Some(cfg.limits.stress_rate)
        } else {
            None
        };
        let shock = ctx.shock(year_index);

        for idx in 0..2 {
            let pcfg = &cfg.persons[idx];
            let age = pcfg.age_in(year);
            let state = &mut persons[idx];
            state.retired = age >= pcfg.retirement_age as i32;
            rows_persons[idx].age = age;
            rows_persons[idx].alive = state.alive;
            rows_persons[idx].retired = state.retired;
            if !state.alive {
                // A terminal estate with no survivor still tracks market
                // value for net worth.
                if state.accounts.liquid_total() > 0.0 {
                    apply_growth(&mut state.accounts, &pcfg.returns, shock, stress);
                }
                continue;
            }

            // Registered plan conversion at or past the statutory age, so a
            // household entering the projection already older still converts.
            if age >= cfg.limits.rrif_minimum_start_age as i32 {
                if state.accounts.rrsp > 0.0 {
                    state.accounts.rrif += std::mem::take(&mut state.accounts.rrsp);
                    events.push(format!("person {} rrsp converted to rrif", idx + 1));
                }
                if state.accounts.lira > 0.0 {
                    state.accounts.lif += std::mem::take(&mut state.accounts.lira);
                    events.push(format!("person {} lira converted to lif", idx + 1));
                }
            }

            // Mandated minimums and the LIF cap key off start-of-year
            // balances, so snapshot before growth lands.
            let rrif_start = state.accounts.rrif;
            let lif_start = state.accounts.lif;
            let yield_base = state.accounts.non_registered;
            state.lif_cap_remaining = cfg.limits.lif_max_fraction * lif_start;

            apply_growth(&mut state.accounts, &pcfg.returns, shock, stress);

            let inflows = person_inflows(
                idx,
                pcfg,
                age,
                state.retired,
                state.employment_income,
                year,
                price_index,
                &cfg.income_streams,
                &cfg.windfalls,
            );
            pool += inflows.total();
            taxable_income[idx] += inflows.taxable();
            oas_received[idx] = inflows.oas;
            eligible_pension[idx] += inflows.db_pension;

            // Mandatory minimums come out before any discretionary draw and
            // always count as taxable income.
            let mandated = mandated_withdrawals(state, age, rrif_start, lif_start);
            pool += mandated;
            taxable_income[idx] += mandated;
            eligible_pension[idx] += mandated;

            // The non-registered cash yield is paid out and taxed annually.
            let paid_yield = yield_base * pcfg.returns.non_registered_yield.max(0.0);
            pool += paid_yield;
            taxable_income[idx] += paid_yield;

            rows_persons[idx].employment = inflows.employment;
            rows_persons[idx].db_pension = inflows.db_pension;
            rows_persons[idx].db_bridge = inflows.db_bridge;
            rows_persons[idx].cpp = inflows.cpp;
            rows_persons[idx].oas = inflows.oas;
            rows_persons[idx].rrif_minimum = mandated;
            rows_persons[idx].streams_taxable = inflows.streams_taxable;
            rows_persons[idx].streams_nontaxable = inflows.streams_nontaxable;
            rows_persons[idx].windfalls_taxable = inflows.windfalls_taxable;
            rows_persons[idx].windfalls_nontaxable = inflows.windfalls_nontaxable;

            if !state.retired {
                state.employment_income *= 1.0 + pcfg.income_growth;
            }
        }

        // Properties: interest accrues first, the stated payment covers
        // interest then principal, and a payment below interest is flagged
        // rather than silently fixed.
        let mut mortgage_interest = 0.0;
        let mut mortgage_principal = 0.0;
        let mut payment_too_low = false;
        for prop in properties.iter_mut().filter(|p| !p.sold) {
            let interest = prop.loan * prop.cfg.loan_rate;
            let payment = prop.cfg.annual_payment.min(prop.loan + interest);
            if prop.loan > EPS && payment < interest {
                payment_too_low = true;
                prop.loan += interest - payment;
                mortgage_interest += payment;
            } else {
                let principal = (payment - interest).max(0.0);
                prop.loan = (prop.loan - principal).max(0.0);
                mortgage_interest += interest.min(payment);
                mortgage_principal += principal;
            }
            prop.value *= 1.0 + prop.cfg.growth_rate;
        }
        let mortgage_outflow = mortgage_interest + mortgage_principal;

        // Sale events key off the primary person's age.
        let primary_age = cfg.persons[0].age_in(year);
        let living: Vec<usize> = (0..2).filter(|&i| persons[i].alive).collect();
        for prop in properties.iter_mut().filter(|p| !p.sold) {
            let Some(sale) = prop.cfg.sale else { continue };
            if primary_age != sale.at_age as i32 {
                continue;
            }
            let mut proceeds = prop.value * (1.0 - prop.cfg.selling_cost_rate) - prop.loan;
            prop.loan = 0.0;
            prop.sold = true;
            if let Some(replacement) = sale.replacement_cost {
                prop.value = replacement;
                prop.sold = false;
                prop.cfg.sale = None;
                prop.cfg.annual_payment = 0.0;
                proceeds -= replacement;
                events.push(format!("property sold at age {}, replacement bought", sale.at_age));
            } else {
                prop.value = 0.0;
                events.push(format!("property sold at age {}", sale.at_age));
            }
            if !living.is_empty() {
                let share = proceeds.max(0.0) / living.len() as f64;
                for &idx in &living {
                    persons[idx].accounts.cash += share;
                }
            }
        }

        let expenses = household_expenses(cfg, ctx, primary_age, persons[0].retired, price_index);

        let debt_payment = (debt * cfg.limits.debt_repayment_rate).min(debt);
        debt -= debt_payment;

        // Pension income splitting narrows the taxable gap but never
        // reverses it.
        if cfg.income_splitting && persons.iter().all(|p| p.alive) {
            let (hi, lo) = if taxable_income[0] >= taxable_income[1] { (0, 1) } else { (1, 0) };
            let both_eligible =
                cfg.persons[0].age_in(year) >= 65 && cfg.persons[1].age_in(year) >= 65;
            if both_eligible {
                let gap = taxable_income[hi] - taxable_income[lo];
                let shift = (eligible_pension[hi] * 0.5).min(gap / 2.0).max(0.0);
                taxable_income[hi] -= shift;
                taxable_income[lo] += shift;
            }
        }

        let outflows = expenses + mortgage_outflow + debt_payment;

        // Balance the year: tax first, then either allocate the surplus or
        // withdraw toward the deficit until the numbers stop moving.
        let mut added_taxable = [0.0f64; 2];
        let mut tax_results = [
            income_tax(taxable_income[0], &table, oas_received[0]),
            income_tax(taxable_income[1], &table, oas_received[1]),
        ];
        let mut balance = pool - outflows - tax_results[0].total - tax_results[1].total;
        let mut unassigned_surplus = 0.0;
        let mut surplus = 0.0;
        let mut unresolved_deficit = 0.0;

        if balance >= -EPS {
            surplus = balance.max(0.0);
            let rooms = contribution_rooms(cfg, &rows_persons, year_index, price_index);
            let [first, second] = &mut persons;
            let report = allocate_surplus(
                surplus,
                &cfg.strategy.accumulation,
                [&mut first.accounts, &mut second.accounts],
                [first.alive, second.alive],
                rooms,
            );
            unassigned_surplus = report.unassigned;
        } else {
            for _ in 0..MAX_DEFICIT_ROUNDS {
                if balance >= -EPS {
                    break;
                }
                let deficit = -balance;
                let ages = [cfg.persons[0].age_in(year), cfg.persons[1].age_in(year)];
                let report = {
                    let [first, second] = &mut persons;
                    let params = ResolveParams {
                        order: &cfg.strategy.decumulation,
                        table: &table,
                        oas_received,
                        clawback_optimization: cfg.clawback_optimization,
                    };
                    let mut cap_a = first.lif_cap_remaining;
                    let mut cap_b = second.lif_cap_remaining;
                    let r = resolve_deficit(
                        deficit,
                        [
                            ResolveTarget {
                                accounts: &mut first.accounts,
                                alive: first.alive,
                                age: ages[0],
                                lif_cap_remaining: &mut cap_a,
                            },
                            ResolveTarget {
                                accounts: &mut second.accounts,
                                alive: second.alive,
                                age: ages[1],
                                lif_cap_remaining: &mut cap_b,
                            },
                        ],
                        [
                            taxable_income[0] + added_taxable[0],
                            taxable_income[1] + added_taxable[1],
                        ],
                        &params,
                    );
                    first.lif_cap_remaining = cap_a;
                    second.lif_cap_remaining = cap_b;
                    r
                };
                let gross: f64 = report.withdrawals.iter().map(|w| w.gross).sum();
                pool += gross;
                added_taxable[0] += report.taxable_added[0];
                added_taxable[1] += report.taxable_added[1];
                tax_results = [
                    income_tax(taxable_income[0] + added_taxable[0], &table, oas_received[0]),
                    income_tax(taxable_income[1] + added_taxable[1], &table, oas_received[1]),
                ];
                balance = pool - outflows - tax_results[0].total - tax_results[1].total;
                if gross <= EPS && report.unresolved > EPS {
                    break;
                }
            }
            if balance < -EPS {
                unresolved_deficit = -balance;
                debt += unresolved_deficit;
                events.push(format!("unmet spending of {:.0} added to debt", unresolved_deficit));
            } else if balance > EPS {
                // Withdrawal rounding overshoot goes back to cash.
                let living: Vec<usize> = (0..2).filter(|&i| persons[i].alive).collect();
                if !living.is_empty() {
                    let share = balance / living.len() as f64;
                    for &idx in &living {
                        persons[idx].accounts.cash += share;
                    }
                }
            }
        }

        let mut mortgage_years_remaining = Some(0.0f64);
        for prop in properties.iter().filter(|p| !p.sold && p.loan > EPS) {
            let years = payoff_years(prop.loan, prop.cfg.loan_rate, prop.cfg.annual_payment);
            mortgage_years_remaining = match (mortgage_years_remaining, years) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            };
        }

        let real_estate_value: f64 = properties
            .iter()
            .filter(|p| !p.sold && p.cfg.include_in_net_worth)
            .map(|p| p.value)
            .sum();
        let real_estate_debt: f64 = properties.iter().filter(|p| !p.sold).map(|p| p.loan).sum();
        let liquid: f64 = persons.iter().map(|p| p.accounts.liquid_total()).sum();
        let net_worth = liquid + real_estate_value - real_estate_debt - debt;

        output.net_worth_by_year.push(net_worth);
        output.terminal_net_worth = net_worth;
        output.terminal_liquid = liquid;
        if unresolved_deficit > EPS && output.first_shortfall_year.is_none() {
            output.first_shortfall_year = Some(year);
        }

        if mode == RunMode::Detailed {
            for idx in 0..2 {
                let final_income = taxable_income[idx] + added_taxable[idx];
                rows_persons[idx].taxable_income = final_income;
                rows_persons[idx].tax = tax_results[idx].total;
                rows_persons[idx].marginal_rate = tax_results[idx].marginal_rate;
                rows_persons[idx].oas_clawback = tax_results[idx].oas_clawback;
                rows_persons[idx].accounts = persons[idx].accounts.clone();
            }
            output.rows.push(ProjectionRow {
                year,
                persons: rows_persons,
                household: HouseholdYear {
                    expenses,
                    mortgage_interest,
                    mortgage_principal,
                    debt_payment,
                    debt_balance: debt,
                    surplus,
                    unassigned_surplus,
                    unresolved_deficit,
                    real_estate_value,
                    real_estate_debt,
                    payment_too_low,
                    mortgage_years_remaining,
                    net_worth,
                },
                events,
            });
        }

        // Nothing left to simulate once both people are gone; the estate
        // keeps its terminal value.
        if !persons.iter().any(|p| p.alive) {
            break;
        }
    }

    output
}

fn initial_person_state(cfg: &Person) -> PersonState {
    PersonState {
        accounts: cfg.accounts.clone(),
        alive: cfg.present,
        retired: false,
        employment_income: cfg.employment_income.max(0.0),
        lif_cap_remaining: 0.0,
    }
}

fn is_alive(cfg: &Person, year: i32) -> bool {
    cfg.present && cfg.age_in(year) <= cfg.life_expectancy as i32
}

fn merge_estate(survivor: &mut AccountSet, estate: AccountSet) {
    survivor.tfsa += estate.tfsa;
    survivor.rrsp += estate.rrsp;
    survivor.lira += estate.lira;
    survivor.lif += estate.lif;
    survivor.rrif += estate.rrif;
    survivor.non_registered += estate.non_registered;
    survivor.non_registered_acb += estate.non_registered_acb;
    survivor.cash += estate.cash;
    survivor.crypto += estate.crypto;
    survivor.crypto_acb += estate.crypto_acb;
}

/// Forced registered-fund withdrawals for the year, deposited to the cash
/// pool as gross taxable income. Factors apply to the start-of-year balance
/// but draws are capped at what the account currently holds.
fn mandated_withdrawals(
    state: &mut PersonState,
    age: i32,
    rrif_start: f64,
    lif_start: f64,
) -> f64 {
    let factor = rrif_minimum_factor(age);
    let mut total = 0.0;

    if state.accounts.rrif > 0.0 {
        let gross = (factor * rrif_start).min(state.accounts.rrif);
        state.accounts.rrif -= gross;
        total += gross;
    }
    if state.accounts.lif > 0.0 {
        let gross = (factor * lif_start).min(state.accounts.lif);
        state.accounts.lif -= gross;
        state.lif_cap_remaining = (state.lif_cap_remaining - gross).max(0.0);
        total += gross;
    }
    total
}

fn household_expenses(
    cfg: &HouseholdConfig,
    ctx: &SimulationContext,
    primary_age: i32,
    primary_retired: bool,
    price_index: f64,
) -> f64 {
    let base = match &cfg.expenses.model {
        ExpenseModel::Simple { current, retirement } => {
            if primary_retired { *retirement } else { *current }
        }
        ExpenseModel::Tiered { tiers } => tiers
            .iter()
            .find(|t| primary_age < t.up_to_age)
            .or(tiers.last())
            .map(|t| t.annual_amount)
            .unwrap_or(0.0),
    };
    let d = cfg.expenses.discretionary_fraction.clamp(0.0, 1.0);
    let discretionary_index = if cfg.expenses.index_discretionary { price_index } else { 1.0 };
    let indexed = base * (1.0 - d) * price_index + base * d * discretionary_index;
    indexed * ctx.expense_multiplier.unwrap_or(1.0)
}

/// Annual contribution room per person; skip-first-year flags zero the
/// matching bucket in the first projection year.
fn contribution_rooms(
    cfg: &HouseholdConfig,
    rows: &[PersonYear; 2],
    year_index: u32,
    price_index: f64,
) -> [ContributionRoom; 2] {
    let mut rooms = [ContributionRoom::default(), ContributionRoom::default()];
    for idx in 0..2 {
        let pcfg = &cfg.persons[idx];
        rooms[idx].tfsa = cfg.limits.tfsa_annual * price_index;
        rooms[idx].rrsp = (rows[idx].employment * cfg.limits.rrsp_earned_income_rate)
            .min(cfg.limits.rrsp_cap * price_index);
        rooms[idx].crypto = cfg.limits.crypto_annual * price_index;
        if year_index == 0 {
            for bucket in &pcfg.skip_first_year {
                match bucket {
                    BucketKind::TaxFree => rooms[idx].tfsa = 0.0,
                    BucketKind::TaxDeferred => rooms[idx].rrsp = 0.0,
                    BucketKind::CapitalAsset => rooms[idx].crypto = 0.0,
                    _ => {}
                }
            }
        }
    }
    rooms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Expenses, Person, Property, SaleEvent};
    use crate::core::types::AccountSet;

    fn assert_approx(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}"
        );
    }

    fn flat_expenses(amount: f64) -> Expenses {
        Expenses {
            model: ExpenseModel::Simple { current: amount, retirement: amount },
            discretionary_fraction: 0.0,
            index_discretionary: false,
        }
    }

    fn single_person(accounts: AccountSet, retirement_age: u32) -> HouseholdConfig {
        HouseholdConfig {
            inflation: 0.0,
            persons: [
                Person {
                    birth_year: 1961,
                    retirement_age,
                    life_expectancy: 100,
                    accounts,
                    ..Person::default()
                },
                Person::not_alive(),
            ],
            expenses: flat_expenses(0.0),
            ..HouseholdConfig::default()
        }
    }

    #[test]
    fn rrif_factor_schedule_endpoints() {
        assert_approx(rrif_minimum_factor(71), 0.0528, 1e-12);
        assert_approx(rrif_minimum_factor(65), 1.0 / 25.0, 1e-12);
        assert_approx(rrif_minimum_factor(94), 0.1879, 1e-12);
        assert_approx(rrif_minimum_factor(95), 0.20, 1e-12);
        assert_approx(rrif_minimum_factor(101), 0.20, 1e-12);
    }

    #[test]
    fn mortgage_amortizes_to_zero_in_twenty_five_years() {
        let mut cfg = single_person(
            AccountSet { cash: 3_000_000.0, ..AccountSet::default() },
            99,
        );
        cfg.horizon_years = 30;
        cfg.expenses = flat_expenses(10_000.0);
        cfg.persons[0].employment_income = 200_000.0;
        cfg.properties = vec![Property {
            value: 500_000.0,
            loan: 400_000.0,
            growth_rate: 0.0,
            loan_rate: 0.04,
            annual_payment: 25_605.0,
            ..Property::default()
        }];

        let mut ctx = SimulationContext::deterministic();
        let out = run_projection(&cfg, &mut ctx, RunMode::Detailed);

        assert!(out.rows.iter().all(|r| !r.household.payment_too_low));
        let year_25 = &out.rows[24].household;
        assert!(year_25.real_estate_debt < 1_000.0, "loan was {}", year_25.real_estate_debt);
        // Interest declines monotonically while the loan amortizes.
        let interests: Vec<f64> = out.rows[..24]
            .iter()
            .map(|r| r.household.mortgage_interest)
            .collect();
        assert!(interests.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn payoff_years_matches_the_closed_form() {
        let years = payoff_years(400_000.0, 0.04, 25_605.0).expect("amortizes");
        assert!((years - 25.0).abs() < 0.1, "got {years}");
        assert_eq!(payoff_years(0.0, 0.04, 1_000.0), Some(0.0));
        // Payment at or below interest never retires the loan.
        assert_eq!(payoff_years(400_000.0, 0.05, 10_000.0), None);
        assert_eq!(payoff_years(100_000.0, 0.0, 10_000.0), Some(10.0));
    }

    #[test]
    fn underpayment_grows_the_loan_and_sets_the_flag() {
        let mut cfg = single_person(
            AccountSet { cash: 1_000_000.0, ..AccountSet::default() },
            99,
        );
        cfg.horizon_years = 3;
        cfg.persons[0].employment_income = 100_000.0;
        cfg.properties = vec![Property {
            value: 500_000.0,
            loan: 400_000.0,
            loan_rate: 0.05,
            annual_payment: 10_000.0,
            ..Property::default()
        }];

        let mut ctx = SimulationContext::deterministic();
        let out = run_projection(&cfg, &mut ctx, RunMode::Detailed);

        assert!(out.rows[0].household.payment_too_low);
        assert!(out.rows[1].household.real_estate_debt > 400_000.0);
        assert_eq!(out.rows[0].household.mortgage_years_remaining, None);
    }

    #[test]
    fn surplus_years_fill_the_tfsa_first() {
        let mut cfg = single_person(AccountSet::default(), 99);
        cfg.horizon_years = 1;
        cfg.persons[0].employment_income = 120_000.0;
        cfg.persons[0].returns = crate::core::config::ReturnRates {
            tfsa: 0.0,
            rrsp: 0.0,
            lira: 0.0,
            lif: 0.0,
            rrif: 0.0,
            non_registered: 0.0,
            non_registered_yield: 0.0,
            cash: 0.0,
            crypto: 0.0,
        };

        let mut ctx = SimulationContext::deterministic();
        let out = run_projection(&cfg, &mut ctx, RunMode::Detailed);

        let accounts = &out.rows[0].persons[0].accounts;
        assert_approx(accounts.tfsa, cfg.limits.tfsa_annual, 0.01);
        assert!(accounts.rrsp > 0.0);
        assert!(out.rows[0].household.surplus > 0.0);
    }

    #[test]
    fn minimums_apply_when_starting_past_the_conversion_age() {
        let mut cfg = single_person(
            AccountSet { rrsp: 500_000.0, cash: 200_000.0, ..AccountSet::default() },
            65,
        );
        cfg.horizon_years = 3;
        // Age 80 at the start, well past the conversion age.
        cfg.persons[0].birth_year = 1946;

        let mut ctx = SimulationContext::deterministic();
        let out = run_projection(&cfg, &mut ctx, RunMode::Detailed);

        assert!(out.rows[0]
            .events
            .iter()
            .any(|e| e.contains("rrsp converted to rrif")));
        for row in &out.rows {
            assert!(row.persons[0].rrif_minimum > 0.0);
            assert_approx(row.persons[0].accounts.rrsp, 0.0, 1e-9);
            assert!(row.persons[0].accounts.rrif > 0.0);
        }
    }

    #[test]
    fn deficit_years_draw_down_the_portfolio_and_pay_tax() {
        let mut cfg = single_person(
            AccountSet { rrsp: 800_000.0, ..AccountSet::default() },
            60,
        );
        cfg.horizon_years = 5;
        cfg.expenses = flat_expenses(60_000.0);
        cfg.strategy.decumulation = vec![BucketKind::TaxDeferred];

        let mut ctx = SimulationContext::deterministic();
        let out = run_projection(&cfg, &mut ctx, RunMode::Detailed);

        for row in &out.rows {
            assert_approx(row.household.unresolved_deficit, 0.0, 0.01);
            assert!(row.persons[0].tax > 0.0);
        }
        let deferred_start = 800_000.0;
        let deferred_end = out.rows.last().unwrap().persons[0].accounts.deferred_total();
        assert!(deferred_end < deferred_start);
    }

    #[test]
    fn exhausted_household_accrues_shortfall_as_debt() {
        let mut cfg = single_person(
            AccountSet { cash: 30_000.0, ..AccountSet::default() },
            60,
        );
        cfg.horizon_years = 3;
        cfg.expenses = flat_expenses(50_000.0);

        let mut ctx = SimulationContext::deterministic();
        let out = run_projection(&cfg, &mut ctx, RunMode::Detailed);

        assert!(out.first_shortfall_year.is_some());
        let last = out.rows.last().unwrap();
        assert!(last.household.debt_balance > 0.0);
        assert!(last.household.unresolved_deficit > 0.0);
    }

    #[test]
    fn estate_rolls_over_to_the_survivor() {
        let mut cfg = single_person(AccountSet::default(), 99);
        cfg.horizon_years = 5;
        cfg.persons[0].accounts = AccountSet { cash: 500_000.0, ..AccountSet::default() };
        cfg.persons[1] = Person {
            present: true,
            birth_year: 1961,
            retirement_age: 60,
            life_expectancy: 66,
            accounts: AccountSet { tfsa: 90_000.0, rrsp: 200_000.0, ..AccountSet::default() },
            ..Person::default()
        };
        cfg.expenses = flat_expenses(10_000.0);

        let mut ctx = SimulationContext::deterministic();
        let out = run_projection(&cfg, &mut ctx, RunMode::Detailed);

        // Partner dies at the start of the 2028 row (age 67 > 66).
        let death_row = out
            .rows
            .iter()
            .find(|r| r.events.iter().any(|e| e.contains("estate")))
            .expect("death event recorded");
        assert!(!death_row.persons[1].alive);
        let survivor = &death_row.persons[0].accounts;
        assert!(survivor.tfsa >= 90_000.0);
        assert!(survivor.rrsp >= 200_000.0 * 0.9);
        assert_approx(death_row.persons[1].accounts.liquid_total(), 0.0, 1e-6);
    }

    #[test]
    fn property_sale_pays_off_the_loan_and_banks_the_residual() {
        let mut cfg = single_person(
            AccountSet { cash: 200_000.0, ..AccountSet::default() },
            99,
        );
        cfg.horizon_years = 3;
        cfg.persons[0].employment_income = 100_000.0;
        cfg.persons[0].returns.cash = 0.0;
        cfg.properties = vec![Property {
            value: 600_000.0,
            loan: 100_000.0,
            growth_rate: 0.0,
            loan_rate: 0.0,
            annual_payment: 0.0,
            selling_cost_rate: 0.05,
            sale: Some(SaleEvent { at_age: 66, replacement_cost: None }),
            ..Property::default()
        }];

        let mut ctx = SimulationContext::deterministic();
        let out = run_projection(&cfg, &mut ctx, RunMode::Detailed);

        let sale_row = out
            .rows
            .iter()
            .find(|r| r.events.iter().any(|e| e.contains("sold")))
            .expect("sale event recorded");
        assert_approx(sale_row.household.real_estate_value, 0.0, 1e-6);
        assert_approx(sale_row.household.real_estate_debt, 0.0, 1e-6);
        // 600k less 5% selling costs less the 100k loan.
        assert!(sale_row.persons[0].accounts.cash >= 470_000.0);
    }

    #[test]
    fn stress_test_hits_the_first_year_only() {
        let mut cfg = single_person(
            AccountSet { tfsa: 100_000.0, cash: 100_000.0, ..AccountSet::default() },
            60,
        );
        cfg.horizon_years = 2;
        cfg.stress_test = true;
        cfg.persons[0].returns.tfsa = 0.05;
        cfg.persons[0].returns.cash = 0.0;
        cfg.strategy.decumulation = vec![BucketKind::Cash];

        let mut ctx = SimulationContext::deterministic();
        let out = run_projection(&cfg, &mut ctx, RunMode::Detailed);

        let tfsa_after_year_1 = out.rows[0].persons[0].accounts.tfsa;
        assert_approx(tfsa_after_year_1, 70_000.0, 0.01);
        let tfsa_after_year_2 = out.rows[1].persons[0].accounts.tfsa;
        assert_approx(tfsa_after_year_2, 70_000.0 * 1.05, 0.01);
    }

    #[test]
    fn lean_mode_skips_rows_but_keeps_the_series() {
        let mut cfg = single_person(
            AccountSet { cash: 1_000_000.0, ..AccountSet::default() },
            60,
        );
        cfg.horizon_years = 10;
        cfg.expenses = flat_expenses(40_000.0);

        let mut ctx = SimulationContext::deterministic();
        let out = run_projection(&cfg, &mut ctx, RunMode::Lean);

        assert!(out.rows.is_empty());
        assert_eq!(out.net_worth_by_year.len(), 10);
        assert!(out.terminal_liquid > 0.0);
    }

    #[test]
    fn income_splitting_narrows_the_taxable_gap() {
        let mut cfg = single_person(AccountSet::default(), 60);
        cfg.horizon_years = 1;
        cfg.income_splitting = true;
        cfg.persons[0].birth_year = 1956;
        cfg.persons[0].db_pension = crate::core::config::DbPension {
            annual: 80_000.0,
            start_age: 60,
            bridge_annual: 0.0,
            indexed: false,
        };
        cfg.persons[1] = Person {
            present: true,
            birth_year: 1956,
            retirement_age: 60,
            life_expectancy: 100,
            ..Person::default()
        };
        cfg.expenses = flat_expenses(10_000.0);
        cfg.persons[0].accounts.cash = 100_000.0;

        let mut ctx = SimulationContext::deterministic();
        let out = run_projection(&cfg, &mut ctx, RunMode::Detailed);
        let row = &out.rows[0];

        // Half the 80k pension is splittable and the gap cap allows all of
        // it, so the incomes meet in the middle.
        assert_approx(row.persons[0].taxable_income, 40_000.0, 0.01);
        assert_approx(row.persons[1].taxable_income, 40_000.0, 0.01);
    }
}
