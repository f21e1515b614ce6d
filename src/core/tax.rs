use super::config::{Bracket, TaxTable};

/// Combined tax owed on one person's income for one year, with the pieces
/// broken out for the projection row.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaxResult {
    pub total: f64,
    pub federal: f64,
    pub provincial: f64,
    pub surtax: f64,
    pub health_premium: f64,
    pub payroll: f64,
    pub oas_clawback: f64,
    pub marginal_rate: f64,
}

/// Progressive two-tier tax with provincial surtax, a phased-in flat premium,
/// payroll premiums and the OAS clawback. Pure function of its inputs; the
/// table is assumed already inflated to the simulated year.
pub fn income_tax(taxable_income: f64, table: &TaxTable, oas_received: f64) -> TaxResult {
    let income = taxable_income.max(0.0);
    if income <= 0.0 {
        return TaxResult::default();
    }

    let (federal, federal_marginal) = progressive_tax(income, &table.federal);
    let (provincial, provincial_marginal) = progressive_tax(income, &table.provincial);

    // Surtax is a percentage of the provincial tax itself above each tier
    // threshold, so it inflates the provincial marginal rate
    // multiplicatively rather than additively.
    let mut surtax = 0.0;
    let mut surtax_rate_active = 0.0;
    for tier in &table.surtax {
        let excess = (provincial - tier.threshold).max(0.0);
        if excess > 0.0 {
            surtax += excess * tier.rate;
            surtax_rate_active += tier.rate;
        }
    }

    let premium = &table.health_premium;
    let health_premium = ((income - premium.floor).max(0.0) * premium.phase_in_rate)
        .min(premium.cap)
        .max(0.0);

    let mut payroll = 0.0;
    for tier in &table.payroll {
        let pensionable = income.min(tier.ceiling);
        payroll += (pensionable - tier.exemption).max(0.0) * tier.rate;
    }

    let oas = oas_received.max(0.0);
    let clawback_excess = (income - table.oas_clawback_threshold).max(0.0);
    let oas_clawback = (clawback_excess * table.oas_clawback_rate).min(oas);
    let in_clawback_band = oas > 0.0 && clawback_excess > 0.0 && oas_clawback < oas;

    let mut marginal_rate = federal_marginal + provincial_marginal * (1.0 + surtax_rate_active);
    if in_clawback_band {
        marginal_rate += table.oas_clawback_rate;
    }

    TaxResult {
        total: federal + provincial + surtax + health_premium + payroll + oas_clawback,
        federal,
        provincial,
        surtax,
        health_premium,
        payroll,
        oas_clawback,
        marginal_rate,
    }
}

/// Combined marginal rate at a given income, used by the deficit resolver to
/// convert gross headroom into net dollars.
pub fn marginal_rate_at(income: f64, table: &TaxTable, oas_received: f64) -> f64 {
    income_tax(income, table, oas_received).marginal_rate
}

fn progressive_tax(income: f64, brackets: &[Bracket]) -> (f64, f64) {
    let mut tax = 0.0;
    let mut marginal = 0.0;
    for (idx, bracket) in brackets.iter().enumerate() {
        if income <= bracket.threshold {
            break;
        }
        let upper = brackets
            .get(idx + 1)
            .map(|b| b.threshold)
            .unwrap_or(f64::INFINITY);
        tax += (income.min(upper) - bracket.threshold) * bracket.rate;
        marginal = bracket.rate;
    }
    (tax, marginal)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BenefitKind {
    Cpp,
    Oas,
}

const CPP_EARLY_RATE_PER_MONTH: f64 = 0.006;
const CPP_LATE_RATE_PER_MONTH: f64 = 0.007;
const OAS_LATE_RATE_PER_MONTH: f64 = 0.006;
const BENEFIT_REFERENCE_AGE: i32 = 65;
const CPP_FLOOR_AGE: u32 = 60;
const CPP_LATEST_AGE: u32 = 70;
// One lost maximum year out of the 39 that survive the general drop-out, per
// year of retirement before the contributory floor age.
const EARLY_RETIREMENT_PENALTY_PER_YEAR: f64 = 1.0 / 39.0;

/// Actuarial adjustment of a benefit for its chosen claim age, plus the
/// statutory penalty for retiring before the CPP floor age.
pub fn adjusted_benefit(
    annual_max: f64,
    start_age: u32,
    scale: f64,
    retirement_age: u32,
    kind: BenefitKind,
) -> f64 {
    let base = (annual_max * scale).max(0.0);
    if base <= 0.0 {
        return 0.0;
    }

    match kind {
        BenefitKind::Cpp => {
            let claim_age = start_age.clamp(CPP_FLOOR_AGE, CPP_LATEST_AGE);
            let months = (claim_age as i32 - BENEFIT_REFERENCE_AGE) * 12;
            let claim_factor = if months < 0 {
                1.0 + CPP_EARLY_RATE_PER_MONTH * months as f64
            } else {
                1.0 + CPP_LATE_RATE_PER_MONTH * months as f64
            };
            let early_years = (CPP_FLOOR_AGE as i32 - retirement_age as i32).max(0) as f64;
            let retirement_factor =
                (1.0 - early_years * EARLY_RETIREMENT_PENALTY_PER_YEAR).max(0.0);
            base * claim_factor.max(0.0) * retirement_factor
        }
        BenefitKind::Oas => {
            let claim_age = start_age.min(CPP_LATEST_AGE);
            let months = ((claim_age as i32 - BENEFIT_REFERENCE_AGE) * 12).max(0);
            base * (1.0 + OAS_LATE_RATE_PER_MONTH * months as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TaxTable;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn zero_income_is_all_zero() {
        let result = income_tax(0.0, &TaxTable::default(), 8_000.0);
        assert_approx(result.total, 0.0);
        assert_approx(result.marginal_rate, 0.0);
    }

    #[test]
    fn first_bracket_income_uses_lowest_rates() {
        let table = TaxTable::default();
        let result = income_tax(40_000.0, &table, 0.0);
        assert_approx(result.federal, 40_000.0 * 0.15);
        assert_approx(result.provincial, 40_000.0 * 0.0505);
        assert_approx(result.surtax, 0.0);
        assert_approx(result.oas_clawback, 0.0);
    }

    #[test]
    fn surtax_applies_to_provincial_tax_not_income() {
        let table = TaxTable::default();
        let result = income_tax(200_000.0, &table, 0.0);
        let expected = (result.provincial - table.surtax[0].threshold) * table.surtax[0].rate
            + (result.provincial - table.surtax[1].threshold) * table.surtax[1].rate;
        assert_approx(result.surtax, expected);
        // Both tiers active: provincial marginal is inflated by 56%.
        assert_approx(result.marginal_rate, 0.29 + 0.1216 * 1.56);
    }

    #[test]
    fn health_premium_phases_in_and_caps() {
        let table = TaxTable::default();
        let low = income_tax(21_000.0, &table, 0.0);
        assert_approx(low.health_premium, 1_000.0 * 0.06);
        let high = income_tax(150_000.0, &table, 0.0);
        assert_approx(high.health_premium, table.health_premium.cap);
    }

    #[test]
    fn clawback_is_capped_at_benefit_received() {
        let table = TaxTable::default();
        let result = income_tax(500_000.0, &table, 8_500.0);
        assert_approx(result.oas_clawback, 8_500.0);
        // Fully clawed back: no extra 15 points on the marginal rate.
        assert!(result.marginal_rate < 0.70);
    }

    #[test]
    fn marginal_rate_includes_clawback_inside_band() {
        let table = TaxTable::default();
        let inside = income_tax(table.oas_clawback_threshold + 5_000.0, &table, 8_500.0);
        let no_oas = income_tax(table.oas_clawback_threshold + 5_000.0, &table, 0.0);
        assert_approx(inside.marginal_rate - no_oas.marginal_rate, 0.15);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_total_tax_is_monotone_in_income(
            lo in 0u32..400_000,
            delta in 0u32..200_000,
            oas in 0u32..10_000,
        ) {
            let table = TaxTable::default();
            let a = income_tax(lo as f64, &table, oas as f64);
            let b = income_tax((lo + delta) as f64, &table, oas as f64);
            prop_assert!(b.total + EPS >= a.total);
        }

        #[test]
        fn prop_marginal_rate_is_non_decreasing_without_clawback(
            lo in 0u32..400_000,
            delta in 0u32..200_000,
        ) {
            let table = TaxTable::default();
            let a = income_tax(lo as f64, &table, 0.0);
            let b = income_tax((lo + delta) as f64, &table, 0.0);
            prop_assert!(b.marginal_rate + EPS >= a.marginal_rate);
        }

        #[test]
        fn prop_clawback_never_exceeds_benefit(
            income in 0u32..1_000_000,
            oas in 0u32..12_000,
        ) {
            let result = income_tax(income as f64, &TaxTable::default(), oas as f64);
            prop_assert!(result.oas_clawback <= oas as f64 + EPS);
            prop_assert!(result.oas_clawback >= -EPS);
        }
    }

    #[test]
    fn cpp_reduces_point_six_percent_per_early_month() {
        let at_60 = adjusted_benefit(17_000.0, 60, 1.0, 65, BenefitKind::Cpp);
        assert_approx(at_60, 17_000.0 * (1.0 - 0.006 * 60.0));
    }

    #[test]
    fn cpp_increases_point_seven_percent_per_late_month() {
        let at_70 = adjusted_benefit(17_000.0, 70, 1.0, 65, BenefitKind::Cpp);
        assert_approx(at_70, 17_000.0 * (1.0 + 0.007 * 60.0));
    }

    #[test]
    fn cpp_penalizes_retirement_before_sixty() {
        let retired_55 = adjusted_benefit(17_000.0, 65, 1.0, 55, BenefitKind::Cpp);
        assert_approx(retired_55, 17_000.0 * (1.0 - 5.0 / 39.0));
    }

    #[test]
    fn oas_has_no_early_reduction() {
        let at_63 = adjusted_benefit(8_500.0, 63, 1.0, 63, BenefitKind::Oas);
        assert_approx(at_63, 8_500.0);
        let at_70 = adjusted_benefit(8_500.0, 70, 1.0, 63, BenefitKind::Oas);
        assert_approx(at_70, 8_500.0 * (1.0 + 0.006 * 60.0));
    }
}
